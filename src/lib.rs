// Entity model and store
pub mod entity;

// Per-connection viewport filtering
pub mod viewport;

// Per-topic presence tracking
pub mod presence;

// Channel protocol: frames, session state machine, event handlers
pub mod protocol;

// Connection registry and outbound queues
pub mod registry;

// NATS bridge: ingress and relay
pub mod bridge;

// Periodic snapshot broadcaster
pub mod broadcast;

// Join authorization
pub mod auth;

// WebSocket and admin APIs
pub mod api;

// Configuration
pub mod config;
