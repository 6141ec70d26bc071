//! Service API publish request and response.

use serde::{Deserialize, Serialize};

use crate::signature::Signature;

/// Body of `POST /api/v1/service/events`.
///
/// `payload` must be a JSON object; anything else is rejected with
/// `422 Unprocessable Entity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishEventRequest {
    pub channel: String,
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
}

impl Signature for PublishEventRequest {}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Response of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishEventResponse {
    pub id: i64,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_payload_defaults_to_empty_object() {
        let request: PublishEventRequest = serde_json::from_str(
            r#"{"channel":"discord:message","event_type":"discord.message.received","source":"ingest"}"#,
        )
        .unwrap();
        assert_eq!(request.payload, serde_json::json!({}));
        assert_eq!(request.correlation_id, None);
    }
}
