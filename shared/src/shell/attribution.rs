//! Attribution SDK seam.
//!
//! The SDK delivers conversion data at most once per launch and may also hand
//! over a deferred deeplink. Both arrive asynchronously.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::Event;
use crate::payload::{AttributionPayload, DeeplinkPayload};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttributionError {
    #[error("attribution SDK error: {0}")]
    Sdk(String),

    #[error("attribution source closed without data")]
    Closed,
}

#[async_trait]
pub trait AttributionSource: Send + Sync {
    /// The SDK's stable device id, used for organic validation and `af_id`.
    fn device_id(&self) -> Option<String>;

    async fn conversion_data(&self) -> Result<AttributionPayload, AttributionError>;

    /// Resolves once a deeplink arrives; `None` when there is none.
    async fn deeplink(&self) -> Option<DeeplinkPayload> {
        None
    }
}

impl From<Result<AttributionPayload, AttributionError>> for Event {
    fn from(result: Result<AttributionPayload, AttributionError>) -> Self {
        match result {
            Ok(payload) => Self::AttributionReceived(payload),
            Err(e) => Self::AttributionFailed {
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribution_result_conversion() {
        let event = Event::from(Err(AttributionError::Closed));
        assert!(matches!(event, Event::AttributionFailed { ref reason } if reason.contains("closed")));
        assert_eq!(event.name(), "attribution_failed");

        let event = Event::from(Ok(AttributionPayload::default()));
        assert_eq!(event.name(), "attribution_received");
    }
}
