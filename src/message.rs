use crate::error::Result;
use lapin::options::QueueDeclareOptions;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, ExchangeKind};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ROUTING_KEY: &str = "default";

/// Typed message envelope. Callers decide at the call site whether they are
/// sending raw text or structured data; text passes through untouched,
/// structured values serialize through serde_json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Payload::Text(text) => Ok(text.clone().into_bytes()),
            Payload::Json(value) => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Decode delivered bytes: JSON when parseable, raw text otherwise.
    pub fn from_bytes(data: &[u8]) -> Payload {
        match serde_json::from_slice::<serde_json::Value>(data) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(String::from_utf8_lossy(data).into_owned()),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

/// Properties attached to a published message and surfaced to handlers on
/// the delivered message.
#[derive(Debug, Clone, Default)]
pub struct MessageProperties {
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub timestamp: Option<u64>,
}

impl MessageProperties {
    pub(crate) fn to_basic(&self) -> BasicProperties {
        let mut properties = BasicProperties::default();
        if let Some(correlation_id) = &self.correlation_id {
            properties = properties.with_correlation_id(correlation_id.clone().into());
        }
        if let Some(reply_to) = &self.reply_to {
            properties = properties.with_reply_to(reply_to.clone().into());
        }
        if let Some(timestamp) = self.timestamp {
            properties = properties.with_timestamp(timestamp);
        }
        properties
    }
}

/// Declaration options for a queue. `skip_assert` means the queue is assumed
/// to pre-exist and no declare is attempted.
#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub durable: bool,
    pub exclusive: bool,
    pub message_ttl: Option<u64>,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
    pub skip_assert: bool,
}

impl Default for QueueSpec {
    fn default() -> Self {
        QueueSpec {
            durable: true,
            exclusive: false,
            message_ttl: None,
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
            skip_assert: false,
        }
    }
}

impl QueueSpec {
    pub(crate) fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            durable: self.durable,
            exclusive: self.exclusive,
            ..QueueDeclareOptions::default()
        }
    }

    pub(crate) fn arguments(&self) -> FieldTable {
        let mut arguments = FieldTable::default();
        if let Some(ttl) = self.message_ttl {
            arguments.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl as i64));
        }
        if let Some(exchange) = &self.dead_letter_exchange {
            arguments.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(exchange.clone().into()),
            );
        }
        if let Some(routing_key) = &self.dead_letter_routing_key {
            arguments.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(routing_key.clone().into()),
            );
        }
        arguments
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Topic,
    Fanout,
}

impl ExchangeType {
    pub(crate) fn kind(self) -> ExchangeKind {
        match self {
            ExchangeType::Direct => ExchangeKind::Direct,
            ExchangeType::Topic => ExchangeKind::Topic,
            ExchangeType::Fanout => ExchangeKind::Fanout,
        }
    }
}

/// Binds a consumer's queue to an exchange with a routing key.
#[derive(Debug, Clone)]
pub struct ExchangeBinding {
    pub name: String,
    pub kind: ExchangeType,
    pub routing_key: String,
}

impl ExchangeBinding {
    pub fn direct(name: &str) -> Self {
        ExchangeBinding {
            name: name.to_string(),
            kind: ExchangeType::Direct,
            routing_key: DEFAULT_ROUTING_KEY.to_string(),
        }
    }

    pub fn with_routing_key(mut self, routing_key: &str) -> Self {
        self.routing_key = routing_key.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_payload_passes_through() {
        let payload = Payload::from("plain text, not json");
        assert_eq!(payload.to_bytes().unwrap(), b"plain text, not json");
    }

    #[test]
    fn json_payload_serializes() {
        let payload = Payload::from(json!({"order_id": "o-1", "total": 59.99}));
        let bytes = payload.to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["order_id"], "o-1");
    }

    #[test]
    fn from_bytes_prefers_json() {
        assert_eq!(
            Payload::from_bytes(br#"{"ok":true}"#),
            Payload::Json(json!({"ok": true}))
        );
        assert_eq!(
            Payload::from_bytes(b"hello there"),
            Payload::Text("hello there".to_string())
        );
    }

    #[test]
    fn queue_spec_translates_ttl_and_dead_letter() {
        let spec = QueueSpec {
            message_ttl: Some(60_000),
            dead_letter_exchange: Some("dlx".to_string()),
            dead_letter_routing_key: Some("dead".to_string()),
            ..QueueSpec::default()
        };

        let mut expected = FieldTable::default();
        expected.insert("x-message-ttl".into(), AMQPValue::LongLongInt(60_000));
        expected.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("dlx".into()),
        );
        expected.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString("dead".into()),
        );
        assert_eq!(spec.arguments(), expected);

        let options = spec.declare_options();
        assert!(options.durable);
        assert!(!options.exclusive);
    }

    #[test]
    fn empty_spec_has_no_arguments() {
        let spec = QueueSpec::default();
        assert_eq!(spec.arguments(), FieldTable::default());
    }
}
