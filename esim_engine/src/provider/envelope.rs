use serde::{de::DeserializeOwned, Deserialize};

use crate::provider::ProviderError;

/// The provider puts either an object or a plain string into `message` and `data`, depending on the endpoint and
/// outcome. This is decoded once into a tagged variant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Object(serde_json::Map<String, serde_json::Value>),
    Text(String),
    Other(serde_json::Value),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Other(serde_json::Value::Null)
    }
}

impl Payload {
    pub fn as_object(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        match self {
            Payload::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// `{success, code, message, data, timestamp}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: Payload,
    #[serde(default)]
    pub data: Payload,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Which slot to look in first for the structured payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOrder {
    MessageFirst,
    DataFirst,
}

impl ProviderEnvelope {
    pub fn parse(body: &str) -> Result<Self, ProviderError> {
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(format!("{e}. Body: {body}")))
    }

    /// Converts an unsuccessful envelope into an API error.
    pub fn ensure_success(self) -> Result<Self, ProviderError> {
        if self.success {
            return Ok(self);
        }
        let message = self
            .message
            .as_text()
            .or_else(|| self.data.as_text())
            .map(str::to_string)
            .unwrap_or_else(|| "request failed".to_string());
        Err(ProviderError::Api { code: self.code, message })
    }

    /// The first object payload, looking in the given order.
    pub fn object(&self, order: SlotOrder) -> Option<&serde_json::Map<String, serde_json::Value>> {
        let (first, second) = match order {
            SlotOrder::MessageFirst => (&self.message, &self.data),
            SlotOrder::DataFirst => (&self.data, &self.message),
        };
        first.as_object().or_else(|| second.as_object())
    }

    /// Decodes the first object payload into `T`, returning it alongside the raw object.
    pub fn decode<T: DeserializeOwned>(&self, order: SlotOrder) -> Result<(T, serde_json::Value), ProviderError> {
        let map = self.object(order).ok_or_else(|| ProviderError::Decode("response carries no object payload".into()))?;
        let raw = serde_json::Value::Object(map.clone());
        let typed = serde_json::from_value(raw.clone()).map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok((typed, raw))
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Ack {
        order_number: String,
    }

    #[test]
    fn object_in_message() {
        let env = ProviderEnvelope::parse(
            r#"{"success": true, "code": 200, "message": {"orderNumber": "P-1"}, "data": "created"}"#,
        )
        .unwrap();
        assert_eq!(env.data, Payload::Text("created".into()));
        let (ack, raw): (Ack, _) = env.decode(SlotOrder::MessageFirst).unwrap();
        assert_eq!(ack.order_number, "P-1");
        assert_eq!(raw, json!({"orderNumber": "P-1"}));
        let (ack, _): (Ack, _) = env.decode(SlotOrder::DataFirst).unwrap();
        assert_eq!(ack.order_number, "P-1");
    }

    #[test]
    fn object_in_data() {
        let env = ProviderEnvelope::parse(r#"{"success": true, "message": "ok", "data": {"orderNumber": "P-2"}}"#)
            .unwrap();
        let (ack, _): (Ack, _) = env.decode(SlotOrder::DataFirst).unwrap();
        assert_eq!(ack.order_number, "P-2");
        assert_eq!(env.message.as_text(), Some("ok"));
    }

    #[test]
    fn missing_and_failed() {
        let env = ProviderEnvelope::parse(r#"{"success": true, "message": "ok", "data": null}"#).unwrap();
        assert!(matches!(env.decode::<Ack>(SlotOrder::DataFirst), Err(ProviderError::Decode(_))));
        let env = ProviderEnvelope::parse(r#"{"success": false, "code": 4001, "message": "insufficient credit"}"#)
            .unwrap();
        match env.ensure_success() {
            Err(ProviderError::Api { code, message }) => {
                assert_eq!(code, 4001);
                assert_eq!(message, "insufficient credit");
            },
            other => panic!("unexpected {other:?}"),
        }
        assert!(ProviderEnvelope::parse("<html>").is_err());
    }
}
