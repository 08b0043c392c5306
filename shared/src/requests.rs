//! Wire shapes for the two outbound calls: remote config and organic
//! install validation.

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use url::Url;

use crate::capabilities::HttpError;
use crate::config::LaunchConfig;
use crate::model::{DeviceContext, Destination};
use crate::payload::AttributionPayload;

/// JSON body POSTed to the remote config endpoint.
///
/// Attribution fields go first; the fixed fields below overwrite any
/// attribution key with the same name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigRequest {
    body: Map<String, Value>,
}

impl ConfigRequest {
    pub fn build(
        attribution: &AttributionPayload,
        device: &DeviceContext,
        push_token: Option<&str>,
        config: &LaunchConfig,
    ) -> Self {
        let mut body = attribution.fields().clone();
        body.insert("af_id".into(), opt_string(device.attribution_id.as_deref()));
        body.insert("os".into(), Value::String(config.platform.clone()));
        body.insert("store_id".into(), Value::String(config.store_id()));
        body.insert(
            "firebase_project_id".into(),
            opt_string(config.firebase_project_id.as_deref()),
        );
        body.insert("bundle_id".into(), Value::String(config.bundle_id.clone()));
        body.insert("locale".into(), Value::String(device.locale.clone()));
        body.insert("push_token".into(), opt_string(push_token));
        Self { body }
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

fn opt_string(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::String(v.to_string()))
}

/// Successful remote config answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteGrant {
    pub destination: Destination,
    pub expires: f64,
}

impl RemoteGrant {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HttpError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| HttpError::Decode(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Requires a truthy `ok`, a non-empty http(s) `url` and a numeric
    /// `expires`.
    pub fn from_value(value: &Value) -> Result<Self, HttpError> {
        let object = value
            .as_object()
            .ok_or_else(|| HttpError::Decode("response is not a JSON object".into()))?;

        if !object.get("ok").is_some_and(is_truthy) {
            return Err(HttpError::Rejected);
        }

        let url = object
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| HttpError::MissingField("url".into()))?;
        let destination =
            Destination::parse(url).map_err(|e| HttpError::Decode(e.to_string()))?;

        let expires = object
            .get("expires")
            .and_then(Value::as_f64)
            .ok_or_else(|| HttpError::MissingField("expires".into()))?;

        Ok(Self {
            destination,
            expires,
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// GET `<base>id<app_id>?devkey=..&device_id=..`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganicValidationRequest {
    url: Url,
}

impl OrganicValidationRequest {
    pub fn build(config: &LaunchConfig, device_id: &str) -> Result<Self, HttpError> {
        if device_id.trim().is_empty() {
            return Err(HttpError::MissingDeviceId);
        }

        let base = config.organic_validation_base_url.trim();
        let joined = if base.ends_with('/') {
            format!("{base}id{}", config.app_id)
        } else {
            format!("{base}/id{}", config.app_id)
        };
        let mut url = Url::parse(&joined).map_err(|e| HttpError::InvalidUrl {
            url: config.organic_validation_base_url.clone(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("devkey", config.dev_key.expose_secret())
            .append_pair("device_id", device_id);

        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

// The query carries the developer key.
impl fmt::Debug for OrganicValidationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut redacted = self.url.clone();
        redacted.set_query(None);
        f.debug_struct("OrganicValidationRequest")
            .field("url", &redacted.as_str())
            .finish()
    }
}

/// Organic validation answers with an arbitrary JSON object.
pub fn parse_validation_response(bytes: &[u8]) -> Result<AttributionPayload, HttpError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| HttpError::Decode(e.to_string()))?;
    AttributionPayload::from_value(value)
        .ok_or_else(|| HttpError::Decode("validation response is not a JSON object".into()))
}
