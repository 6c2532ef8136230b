use serde::{Deserialize, Serialize};
use serde_json::Value;

// A single drawing stroke: an id plus points and style. The server never
// looks inside, it is stored and forwarded as the client sent it.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(transparent)]
pub struct Stroke(pub Value);

// The public view of a room. Undo/redo history never leaves the server.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct RoomView {
    pub lines: Vec<Stroke>,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum DrawStatus {
    InProgress,
    Complete,
}

// Raw command body as submitted by clients, over HTTP or WebSocket.
// Every field is optional here; shape checks happen when it is turned
// into a `Command`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub line: Option<Stroke>,
    pub lines: Option<Vec<Stroke>>,
    pub timestamp: Option<i64>,
    pub client_id: Option<String>,
}

// Message format pushed to room listeners (SSE `data:` payloads and
// WebSocket text frames).
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    Draw {
        status: DrawStatus,
        line: Stroke,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lines: Option<Vec<Stroke>>,
        timestamp: i64,
        #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    Undo {
        lines: Vec<Stroke>,
        timestamp: i64,
        #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    Redo {
        lines: Vec<Stroke>,
        timestamp: i64,
        #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    Sync {
        lines: Vec<Stroke>,
        timestamp: i64,
        #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Draw {
                status: DrawStatus::InProgress,
                ..
            } => "draw/in-progress",
            Notification::Draw {
                status: DrawStatus::Complete,
                ..
            } => "draw/complete",
            Notification::Undo { .. } => "undo",
            Notification::Redo { .. } => "redo",
            Notification::Sync { .. } => "sync",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_progress_draw_omits_lines() {
        let notification = Notification::Draw {
            status: DrawStatus::InProgress,
            line: Stroke(json!({"id": 5, "points": [1, 2]})),
            lines: None,
            timestamp: 42,
            client_id: None,
        };

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "draw",
                "status": "in-progress",
                "line": {"id": 5, "points": [1, 2]},
                "timestamp": 42
            })
        );
    }

    #[test]
    fn undo_carries_lines_and_client() {
        let notification = Notification::Undo {
            lines: vec![],
            timestamp: 7,
            client_id: Some("alice".into()),
        };

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(
            value,
            json!({"type": "undo", "lines": [], "timestamp": 7, "clientId": "alice"})
        );
        assert_eq!(notification.kind(), "undo");
    }

    #[test]
    fn command_request_reads_camel_case_body() {
        let request: CommandRequest = serde_json::from_value(json!({
            "type": "draw",
            "status": "complete",
            "line": {"id": "a"},
            "lines": [{"id": "a"}],
            "timestamp": 1700000000000_i64,
            "clientId": "tab-1"
        }))
        .unwrap();

        assert_eq!(request.kind.as_deref(), Some("draw"));
        assert_eq!(request.client_id.as_deref(), Some("tab-1"));
        assert_eq!(request.line, Some(Stroke(json!({"id": "a"}))));
        assert_eq!(request.lines.map(|l| l.len()), Some(1));
    }
}
