//! Storage-boundary representation of events.
//!
//! Internally an event keeps its canonical payload. Sinks write the
//! SIEM-friendly shape where the payload sits under its own type key
//! (`{"data": {"DNS_NAME": "example.com"}}`); reading accepts either shape.

use serde_json::{Map, Value};

use crate::{
    error::Result,
    events::{Event, normalize_payload},
};

impl Event {
    /// Canonical storage form: sorted keys, naive UTC timestamp, payload
    /// wrapped under the event type.
    pub fn to_storage_value(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            let data = map.remove("data").unwrap_or(Value::Null);
            let mut wrapped = Map::new();
            wrapped.insert(self.event_type().to_string(), data);
            map.insert("data".to_string(), Value::Object(wrapped));
        }
        Ok(value)
    }

    pub fn to_storage_line(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_storage_value()?)?)
    }

    pub fn from_storage_value(mut value: Value) -> Result<Self> {
        if let Value::Object(map) = &mut value {
            let event_type = map
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let data = map.remove("data").unwrap_or(Value::Null);
            map.insert("data".to_string(), normalize_payload(&event_type, data)?);
        }
        Ok(serde_json::from_value(value)?)
    }
}
