//! Attribution and deeplink payloads.
//!
//! Both are opaque string-keyed JSON maps. Only `af_status` is read by name;
//! everything else is passed through to remote config untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const AF_STATUS_KEY: &str = "af_status";
pub const ORGANIC_STATUS: &str = "Organic";

macro_rules! payload_map {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
        #[serde(transparent)]
        pub struct $name(Map<String, Value>);

        impl $name {
            pub fn new(fields: Map<String, Value>) -> Self {
                Self(fields)
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn get(&self, key: &str) -> Option<&Value> {
                self.0.get(key)
            }

            pub fn fields(&self) -> &Map<String, Value> {
                &self.0
            }

            /// Accepts only JSON objects.
            pub fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::Object(fields) => Some(Self(fields)),
                    _ => None,
                }
            }
        }

        impl From<Map<String, Value>> for $name {
            fn from(fields: Map<String, Value>) -> Self {
                Self(fields)
            }
        }

        impl<K: Into<String>> FromIterator<(K, Value)> for $name {
            fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
                Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
            }
        }
    };
}

payload_map!(AttributionPayload);
payload_map!(DeeplinkPayload);

impl AttributionPayload {
    pub fn af_status(&self) -> Option<&str> {
        self.0.get(AF_STATUS_KEY).and_then(Value::as_str)
    }

    pub fn is_organic(&self) -> bool {
        self.af_status() == Some(ORGANIC_STATUS)
    }

    /// Attribution fields win; the deeplink only fills keys that are absent.
    #[must_use]
    pub fn merged_with(&self, deeplink: Option<&DeeplinkPayload>) -> Self {
        let mut merged = self.0.clone();
        if let Some(deeplink) = deeplink {
            for (key, value) in &deeplink.0 {
                if !merged.contains_key(key) {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        Self(merged)
    }
}

impl From<DeeplinkPayload> for AttributionPayload {
    fn from(deeplink: DeeplinkPayload) -> Self {
        Self(deeplink.0)
    }
}
