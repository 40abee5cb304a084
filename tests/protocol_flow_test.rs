// End-to-end protocol flow: join, presence fan-out, viewport-filtered
// snapshots, and error recovery, driven through real sessions and queues.

use std::sync::Arc;
use std::time::Duration;
use windsock::auth::TokenAuthorizer;
use windsock::broadcast::Broadcaster;
use windsock::entity::{EntityStore, EntityUpdate};
use windsock::presence::PresenceTracker;
use windsock::protocol::handlers::{viewport_handler, HandlerTable};
use windsock::protocol::{Frame, Session, SessionContext};
use windsock::registry::{ConnectionRegistry, OutboundQueue, SlowConsumerPolicy};
use windsock::viewport::ViewportFilter;

use serde_json::{json, Value};

struct TestServer {
    ctx: Arc<SessionContext>,
    entities: Arc<EntityStore>,
    broadcaster: Broadcaster,
}

fn test_server() -> TestServer {
    let (registry, _topic_events) = ConnectionRegistry::new();
    let registry = Arc::new(registry);
    let viewports = Arc::new(ViewportFilter::new());
    let entities = Arc::new(EntityStore::new());

    let mut handlers = HandlerTable::new();
    handlers.register("*", "viewport", viewport_handler(Arc::clone(&viewports)));

    let ctx = Arc::new(SessionContext {
        registry: Arc::clone(&registry),
        presence: Arc::new(PresenceTracker::new()),
        viewports: Arc::clone(&viewports),
        handlers: Arc::new(handlers),
        authorizer: Arc::new(TokenAuthorizer::from_tokens([(
            "valid-token".to_string(),
            "client-a".to_string(),
        )])),
        auth_enabled: false,
        join_timeout: Duration::from_millis(100),
    });

    let broadcaster = Broadcaster::new(
        registry,
        viewports,
        Arc::clone(&entities),
        Duration::from_secs(1),
        60,
    );

    TestServer {
        ctx,
        entities,
        broadcaster,
    }
}

fn connect(server: &TestServer, conn_id: &str) -> (Session, Arc<OutboundQueue>) {
    let queue = Arc::new(OutboundQueue::new(32, SlowConsumerPolicy::DropOldest));
    server
        .ctx
        .registry
        .add_connection(conn_id, Arc::clone(&queue));
    (
        Session::new(conn_id.to_string(), Arc::clone(&queue), Arc::clone(&server.ctx)),
        queue,
    )
}

fn frame(join_ref: &str, reference: &str, topic: &str, event: &str, payload: Value) -> Frame {
    Frame {
        join_ref: Some(join_ref.to_string()),
        reference: Some(reference.to_string()),
        topic: topic.to_string(),
        event: event.to_string(),
        payload,
    }
}

async fn next_frame(queue: &OutboundQueue) -> Frame {
    tokio::time::timeout(Duration::from_millis(200), queue.pop())
        .await
        .expect("expected a frame")
        .expect("queue closed")
}

/// Two clients join, set disjoint viewports, and an upstream update lands in
/// only one of them: only that client's snapshot contains the entity.
#[tokio::test]
async fn snapshots_are_filtered_per_client_viewport() {
    let server = test_server();
    let (mut a, a_queue) = connect(&server, "conn-a");
    let (mut b, b_queue) = connect(&server, "conn-b");

    // Both join the entities topic
    a.handle_frame(frame("1", "1", "entities", "phx_join", json!({})))
        .await;
    b.handle_frame(frame("1", "1", "entities", "phx_join", json!({})))
        .await;

    // A's viewport contains (10, 10); B's does not
    a.handle_frame(frame(
        "1",
        "2",
        "entities",
        "viewport",
        json!({"south": 0.0, "west": 0.0, "north": 20.0, "east": 20.0}),
    ))
    .await;
    b.handle_frame(frame(
        "1",
        "2",
        "entities",
        "viewport",
        json!({"south": 40.0, "west": 40.0, "north": 60.0, "east": 60.0}),
    ))
    .await;

    // Upstream update arrives via the bridge's ingress path
    server.entities.apply(EntityUpdate {
        id: "abc123".to_string(),
        latitude: 10.0,
        longitude: 10.0,
        altitude: Some(35_000.0),
        attributes: [("callsign".to_string(), json!("UAL123"))]
            .into_iter()
            .collect(),
    });

    server.broadcaster.tick();

    let a_snapshot = last_snapshot(&a_queue).await;
    let entities = a_snapshot.payload["entities"].as_array().unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0]["id"], "abc123");
    assert_eq!(entities[0]["attributes"]["callsign"], "UAL123");
    // Snapshot rides the join it was scoped to
    assert_eq!(a_snapshot.join_ref.as_deref(), Some("1"));
    assert_eq!(a_snapshot.reference, None);

    let b_snapshot = last_snapshot(&b_queue).await;
    assert!(b_snapshot.payload["entities"].as_array().unwrap().is_empty());
}

/// Drain a queue until the snapshot push appears.
async fn last_snapshot(queue: &OutboundQueue) -> Frame {
    loop {
        let frame = next_frame(queue).await;
        if frame.event == "snapshot" {
            return frame;
        }
    }
}

/// Join replies correlate by ref, and both members see each other through
/// presence state/diff pushes.
#[tokio::test]
async fn join_reply_and_presence_exchange() {
    let server = test_server();
    let (mut a, a_queue) = connect(&server, "conn-a");
    let (mut b, b_queue) = connect(&server, "conn-b");

    a.handle_frame(frame("1", "41", "entities", "phx_join", json!({})))
        .await;
    let reply = next_frame(&a_queue).await;
    assert_eq!(reply.event, "phx_reply");
    assert_eq!(reply.reference.as_deref(), Some("41"));
    assert_eq!(reply.payload["status"], "ok");

    let a_state = next_frame(&a_queue).await;
    assert_eq!(a_state.event, "presence_state");

    b.handle_frame(frame("1", "42", "entities", "phx_join", json!({})))
        .await;
    let reply = next_frame(&b_queue).await;
    assert_eq!(reply.reference.as_deref(), Some("42"));

    // A learns about B via a diff; B's baseline already includes A
    let diff = next_frame(&a_queue).await;
    assert_eq!(diff.event, "presence_diff");
    assert!(diff.payload["joins"].as_object().unwrap().contains_key("conn-b"));

    let b_state = next_frame(&b_queue).await;
    assert_eq!(b_state.event, "presence_state");
    let members = b_state.payload.as_object().unwrap();
    assert!(members.contains_key("conn-a"));
    assert!(members.contains_key("conn-b"));
}

/// An event on a never-joined topic is answered with an error reply and the
/// connection stays usable for other topics.
#[tokio::test]
async fn protocol_error_leaves_connection_usable() {
    let server = test_server();
    let (mut a, a_queue) = connect(&server, "conn-a");

    a.handle_frame(frame(
        "1",
        "1",
        "entities",
        "viewport",
        json!({"south": 0.0, "west": 0.0, "north": 1.0, "east": 1.0}),
    ))
    .await;
    let reply = next_frame(&a_queue).await;
    assert_eq!(reply.payload["status"], "error");
    assert_eq!(reply.payload["response"]["reason"], "not_joined");

    a.handle_frame(frame("1", "2", "weather", "phx_join", json!({})))
        .await;
    let reply = next_frame(&a_queue).await;
    assert_eq!(reply.payload["status"], "ok");
}

/// Transport close removes all memberships and the peer sees a leave diff.
#[tokio::test]
async fn disconnect_triggers_leave_diffs() {
    let server = test_server();
    let (mut a, a_queue) = connect(&server, "conn-a");
    let (mut b, _b_queue) = connect(&server, "conn-b");

    a.handle_frame(frame("1", "1", "entities", "phx_join", json!({})))
        .await;
    b.handle_frame(frame("1", "1", "entities", "phx_join", json!({})))
        .await;
    // Drain A: reply, presence_state, B's join diff
    for _ in 0..3 {
        next_frame(&a_queue).await;
    }

    b.shutdown();

    let diff = next_frame(&a_queue).await;
    assert_eq!(diff.event, "presence_diff");
    assert!(diff.payload["leaves"].as_object().unwrap().contains_key("conn-b"));
    assert_eq!(server.ctx.registry.members("entities").len(), 1);
}

/// Expired entities vanish from the next snapshot without any explicit
/// deletion push.
#[tokio::test]
async fn expired_entities_are_absent_from_next_snapshot() {
    let server = test_server();
    let (mut a, a_queue) = connect(&server, "conn-a");

    a.handle_frame(frame("1", "1", "entities", "phx_join", json!({})))
        .await;
    a.handle_frame(frame(
        "1",
        "2",
        "entities",
        "viewport",
        json!({"south": -90.0, "west": -180.0, "north": 90.0, "east": 180.0}),
    ))
    .await;

    server.entities.apply(EntityUpdate {
        id: "fleeting".to_string(),
        latitude: 0.0,
        longitude: 0.0,
        altitude: None,
        attributes: Default::default(),
    });

    server.broadcaster.tick();
    let snapshot = last_snapshot(&a_queue).await;
    assert_eq!(snapshot.payload["entities"].as_array().unwrap().len(), 1);

    // A zero-second silence window expires everything on the next tick
    let zero_expiry = Broadcaster::new(
        Arc::clone(&server.ctx.registry),
        Arc::clone(&server.ctx.viewports),
        Arc::clone(&server.entities),
        Duration::from_secs(1),
        0,
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    zero_expiry.tick();

    let snapshot = last_snapshot(&a_queue).await;
    assert!(snapshot.payload["entities"].as_array().unwrap().is_empty());
}
