//! Transport for the remote config and install validation capabilities.
//!
//! The runtime only sees the two traits; the reqwest clients live behind the
//! `http` feature so hosts can bring their own transport.

use async_trait::async_trait;

use crate::capabilities::HttpError;
use crate::payload::AttributionPayload;
use crate::requests::{ConfigRequest, OrganicValidationRequest, RemoteGrant};

#[async_trait]
pub trait ConfigService: Send + Sync {
    async fn fetch_config(&self, request: ConfigRequest) -> Result<RemoteGrant, HttpError>;
}

#[async_trait]
pub trait OrganicValidator: Send + Sync {
    async fn validate_install(
        &self,
        request: OrganicValidationRequest,
    ) -> Result<AttributionPayload, HttpError>;
}

#[cfg(feature = "http")]
pub use self::client::{HttpConfigService, HttpOrganicValidator};

#[cfg(feature = "http")]
mod client {
    use super::*;
    use crate::requests::parse_validation_response;
    use std::time::Duration;
    use tracing::debug;

    fn build_client(timeout: Duration) -> Result<reqwest::Client, HttpError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout.max(Duration::from_millis(1)))
            .build()
            .map_err(|e| HttpError::Client(e.to_string()))
    }

    fn classify(error: reqwest::Error) -> HttpError {
        if error.is_timeout() {
            HttpError::Timeout
        } else if let Some(status) = error.status() {
            HttpError::Status {
                status: status.as_u16(),
            }
        } else {
            HttpError::Network(error.without_url().to_string())
        }
    }

    /// POSTs the merged attribution to the remote config endpoint.
    #[derive(Debug, Clone)]
    pub struct HttpConfigService {
        http: reqwest::Client,
        endpoint: String,
    }

    impl HttpConfigService {
        pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, HttpError> {
            Ok(Self {
                http: build_client(timeout)?,
                endpoint: endpoint.into(),
            })
        }
    }

    #[async_trait]
    impl ConfigService for HttpConfigService {
        async fn fetch_config(&self, request: ConfigRequest) -> Result<RemoteGrant, HttpError> {
            let response = self
                .http
                .post(&self.endpoint)
                .json(request.body())
                .send()
                .await
                .map_err(classify)?;

            let status = response.status();
            debug!(status = status.as_u16(), "remote config responded");
            if !status.is_success() {
                return Err(HttpError::Status {
                    status: status.as_u16(),
                });
            }
            let bytes = response.bytes().await.map_err(classify)?;
            RemoteGrant::from_slice(&bytes)
        }
    }

    /// GETs the install data record for an organic install.
    #[derive(Debug, Clone)]
    pub struct HttpOrganicValidator {
        http: reqwest::Client,
    }

    impl HttpOrganicValidator {
        pub fn new(timeout: Duration) -> Result<Self, HttpError> {
            Ok(Self {
                http: build_client(timeout)?,
            })
        }
    }

    #[async_trait]
    impl OrganicValidator for HttpOrganicValidator {
        async fn validate_install(
            &self,
            request: OrganicValidationRequest,
        ) -> Result<AttributionPayload, HttpError> {
            let response = self
                .http
                .get(request.url().clone())
                .send()
                .await
                .map_err(classify)?;

            // Anything other than a plain 200 counts as a failed validation.
            let status = response.status().as_u16();
            debug!(status, "organic validation responded");
            if status != 200 {
                return Err(HttpError::Status { status });
            }
            let bytes = response.bytes().await.map_err(classify)?;
            parse_validation_response(&bytes)
        }
    }
}

#[cfg(all(test, feature = "http"))]
mod tests {
    use super::*;
    use crate::config::LaunchConfig;
    use crate::model::DeviceContext;
    use httpmock::prelude::*;
    use secrecy::SecretString;
    use serde_json::json;
    use std::time::Duration;

    fn config(server: &MockServer) -> LaunchConfig {
        LaunchConfig {
            app_id: "6740000000".into(),
            dev_key: SecretString::new("dev-key".into()),
            remote_config_url: server.url("/config.php"),
            organic_validation_base_url: server.url("/install_data/v4.0/"),
            ..LaunchConfig::default()
        }
    }

    fn config_request(config: &LaunchConfig) -> ConfigRequest {
        let attribution = AttributionPayload::from_value(json!({"af_status": "Non-organic"}))
            .expect("object payload");
        let device = DeviceContext::new(Some("af-1".into()), Some("de_DE"));
        ConfigRequest::build(&attribution, &device, None, config)
    }

    #[tokio::test]
    async fn test_config_service_posts_body_and_parses_grant() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/config.php").json_body_includes(
                json!({
                    "af_status": "Non-organic",
                    "af_id": "af-1",
                    "store_id": "id6740000000",
                    "locale": "DE",
                    "push_token": null
                })
                .to_string(),
            );
            then.status(200)
                .json_body(json!({"ok": true, "url": "https://web.example.com/", "expires": 1700000000}));
        });

        let config = config(&server);
        let service =
            HttpConfigService::new(config.remote_config_url.clone(), Duration::from_secs(5))
                .expect("client");
        let grant = service
            .fetch_config(config_request(&config))
            .await
            .expect("grant");

        mock.assert();
        assert_eq!(grant.destination.as_str(), "https://web.example.com/");
    }

    #[tokio::test]
    async fn test_config_service_maps_rejection_and_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/config.php");
            then.status(200).json_body(json!({"ok": false}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/down.php");
            then.status(503);
        });

        let config = config(&server);
        let service = HttpConfigService::new(server.url("/config.php"), Duration::from_secs(5))
            .expect("client");
        assert_eq!(
            service.fetch_config(config_request(&config)).await,
            Err(HttpError::Rejected)
        );

        let down = HttpConfigService::new(server.url("/down.php"), Duration::from_secs(5))
            .expect("client");
        assert_eq!(
            down.fetch_config(config_request(&config)).await,
            Err(HttpError::Status { status: 503 })
        );
    }

    #[tokio::test]
    async fn test_organic_validator_sends_query() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/install_data/v4.0/id6740000000")
                .query_param("devkey", "dev-key")
                .query_param("device_id", "af-1");
            then.status(200)
                .json_body(json!({"af_status": "Non-organic", "media_source": "ads"}));
        });

        let config = config(&server);
        let request = OrganicValidationRequest::build(&config, "af-1").expect("request");
        let validator = HttpOrganicValidator::new(Duration::from_secs(5)).expect("client");
        let payload = validator.validate_install(request).await.expect("payload");

        mock.assert();
        assert_eq!(payload.af_status(), Some("Non-organic"));
    }

    #[tokio::test]
    async fn test_organic_validator_requires_exact_200() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/install_data/v4.0/id6740000000");
            then.status(204);
        });

        let config = config(&server);
        let request = OrganicValidationRequest::build(&config, "af-1").expect("request");
        let validator = HttpOrganicValidator::new(Duration::from_secs(5)).expect("client");
        assert_eq!(
            validator.validate_install(request).await,
            Err(HttpError::Status { status: 204 })
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let validator = HttpOrganicValidator::new(Duration::from_secs(2)).expect("client");
        let config = LaunchConfig {
            app_id: "1".into(),
            organic_validation_base_url: "http://127.0.0.1:9/".into(),
            ..LaunchConfig::default()
        };
        let request = OrganicValidationRequest::build(&config, "af-1").expect("request");
        let err = validator.validate_install(request).await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err:?}");
    }
}
