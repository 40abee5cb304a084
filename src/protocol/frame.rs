use crate::protocol::{ProtocolError, PHX_REPLY};
use serde_json::{json, Value};

/// Wire representation: a JSON array [join_ref, ref, topic, event, payload]
type WireFrame = (Option<String>, Option<String>, String, String, Value);

/// Status carried in a phx_reply payload
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReplyStatus {
    Ok,
    Error,
    Timeout,
}

impl ReplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStatus::Ok => "ok",
            ReplyStatus::Error => "error",
            ReplyStatus::Timeout => "timeout",
        }
    }
}

/// Message envelope: the (join_ref, ref, topic, event, payload) 5-tuple.
///
/// `reference` is the client-chosen correlation token; the exactly-one reply
/// to a request echoes it. Server-initiated pushes carry `reference = None`.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub join_ref: Option<String>,
    pub reference: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

impl Frame {
    /// Decode a text frame from the wire.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let (join_ref, reference, topic, event, payload): WireFrame =
            serde_json::from_str(text)
                .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
        Ok(Self {
            join_ref,
            reference,
            topic,
            event,
            payload,
        })
    }

    /// Encode as the wire JSON array.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&(
            &self.join_ref,
            &self.reference,
            &self.topic,
            &self.event,
            &self.payload,
        ))
    }

    /// Build the phx_reply answering this frame. The reply echoes the frame's
    /// ref and join_ref.
    pub fn reply(&self, status: ReplyStatus, response: Value) -> Frame {
        Frame {
            join_ref: self.join_ref.clone(),
            reference: self.reference.clone(),
            topic: self.topic.clone(),
            event: PHX_REPLY.to_string(),
            payload: json!({
                "status": status.as_str(),
                "response": response,
            }),
        }
    }

    /// Build a server-initiated push (ref = null).
    pub fn push(topic: &str, event: &str, join_ref: Option<String>, payload: Value) -> Frame {
        Frame {
            join_ref,
            reference: None,
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PHOENIX_TOPIC;

    #[test]
    fn round_trip_preserves_the_five_tuple() {
        let frame = Frame {
            join_ref: Some("1".to_string()),
            reference: Some("42".to_string()),
            topic: "entities".to_string(),
            event: "phx_join".to_string(),
            payload: json!({"token": "abc"}),
        };

        let encoded = frame.encode().unwrap();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trip_preserves_null_refs() {
        let frame = Frame::push("entities", "snapshot", None, json!({"entities": []}));

        let encoded = frame.encode().unwrap();
        assert!(encoded.starts_with("[null,null,"));
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.join_ref, None);
        assert_eq!(decoded.reference, None);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_accepts_client_join_frame() {
        let text = r#"["1","1","entities","phx_join",{"token":"t"}]"#;
        let frame = Frame::decode(text).unwrap();
        assert_eq!(frame.join_ref.as_deref(), Some("1"));
        assert_eq!(frame.topic, "entities");
        assert_eq!(frame.event, "phx_join");
    }

    #[test]
    fn decode_rejects_malformed_frames() {
        assert!(matches!(
            Frame::decode("not json"),
            Err(ProtocolError::MalformedFrame(_))
        ));
        // Wrong arity
        assert!(matches!(
            Frame::decode(r#"["1","entities","phx_join"]"#),
            Err(ProtocolError::MalformedFrame(_))
        ));
        // Non-string topic
        assert!(matches!(
            Frame::decode(r#"[null,null,7,"phx_join",{}]"#),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn reply_echoes_ref_and_join_ref() {
        let request = Frame::decode(r#"["5","9","entities","phx_join",{}]"#).unwrap();
        let reply = request.reply(ReplyStatus::Ok, json!({}));

        assert_eq!(reply.join_ref.as_deref(), Some("5"));
        assert_eq!(reply.reference.as_deref(), Some("9"));
        assert_eq!(reply.event, "phx_reply");
        assert_eq!(reply.payload["status"], "ok");
    }

    #[test]
    fn timeout_status_encodes_as_timeout() {
        let request = Frame::decode(&format!(
            r#"[null,"1","{}","heartbeat",{{}}]"#,
            PHOENIX_TOPIC
        ))
        .unwrap();
        let reply = request.reply(ReplyStatus::Timeout, json!({}));
        assert_eq!(reply.payload["status"], "timeout");
    }
}
