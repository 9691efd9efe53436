use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::traits::PlatformBinder;

const CUSTOM_DOMAIN_CREATE: &str = r#"
mutation CustomDomainCreate($input: CustomDomainCreateInput!) {
  customDomainCreate(input: $input) {
    id
    domain
  }
}
"#;

/// Credentials and target service for the hosting platform API.
#[derive(Debug, Clone)]
pub struct PlatformSettings {
    pub api_url: Url,
    pub token: String,
    pub service_id: String,
    pub environment_id: String,
}

/// Client that attaches custom domains to the hosting platform service.
#[derive(Clone)]
pub struct PlatformClient {
    http: Client,
    settings: Option<PlatformSettings>,
}

impl PlatformClient {
    /// `settings` is `None` when the platform credentials are not configured.
    pub fn new(settings: Option<PlatformSettings>, http: Client) -> Self {
        Self { http, settings }
    }
}

#[async_trait]
impl PlatformBinder for PlatformClient {
    async fn bind_domain(&self, domain: &str) -> Result<String, PlatformError> {
        let settings = self.settings.as_ref().ok_or(PlatformError::NotConfigured)?;

        let body = json!({
            "query": CUSTOM_DOMAIN_CREATE,
            "variables": {
                "input": {
                    "domain": domain,
                    "serviceId": settings.service_id,
                    "environmentId": settings.environment_id,
                }
            }
        });

        let response = self
            .http
            .post(settings.api_url.clone())
            .bearer_auth(&settings.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unavailable>"));
            return Err(PlatformError::Status { status, body });
        }

        let payload: GraphqlResponse = response.json().await?;
        if let Some(error) = payload.errors.into_iter().next() {
            return Err(PlatformError::Api(error.message));
        }

        let created = payload
            .data
            .and_then(|data| data.custom_domain_create)
            .ok_or(PlatformError::MissingData)?;

        info!(
            stage = "provision",
            domain = %created.domain,
            binding_id = %created.id,
            "platform custom domain added"
        );
        Ok(created.id)
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<GraphqlData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphqlData {
    custom_domain_create: Option<CreatedDomain>,
}

#[derive(Debug, Deserialize)]
struct CreatedDomain {
    id: String,
    domain: String,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// Errors produced while binding a domain to the hosting platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform API not configured (RAILWAY_API_TOKEN, RAILWAY_SERVICE_ID, RAILWAY_ENVIRONMENT_ID)")]
    NotConfigured,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("platform API error: {0}")]
    Api(String),
    #[error("platform returned no domain data")]
    MissingData,
}
