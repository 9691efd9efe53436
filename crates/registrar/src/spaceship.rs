use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use famdomain_core::{is_under_budget, SearchResult};
use futures::future::join_all;
use metrics::counter;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::traits::Registrar;

/// Transport timeout applied to every outbound registrar call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const ASYNC_OPERATION_HEADER: &str = "spaceship-async-operationid";
const DNS_RECORD_TTL: u32 = 300;

/// Builds the HTTP client shared by the outbound integrations.
pub fn default_http_client() -> Result<Client, reqwest::Error> {
    Client::builder().timeout(DEFAULT_TIMEOUT).build()
}

/// Account-level settings for the registrar API.
#[derive(Debug, Clone)]
pub struct SpaceshipSettings {
    pub base_url: Url,
    pub api_key: String,
    pub api_secret: String,
    /// Contact profile used for every registration role.
    pub contact_id: Option<String>,
    /// Hostname the apex and `www` records point at.
    pub cname_target: Option<String>,
}

/// Client for the registrar's availability, registration and DNS endpoints.
#[derive(Clone)]
pub struct SpaceshipClient {
    http: Client,
    settings: SpaceshipSettings,
}

impl SpaceshipClient {
    pub fn new(settings: SpaceshipSettings, http: Client) -> Self {
        Self { http, settings }
    }

    /// One bulk call, answered in the order of `domains`. Rows the registrar
    /// leaves out come back as unknown.
    async fn bulk_check(
        &self,
        domains: &[String],
        tlds: &[&str],
    ) -> Result<Vec<SearchResult>, RegistrarError> {
        let url = self.endpoint(&["domains", "available"])?;
        let response = self
            .request(Method::POST, url)
            .json(&json!({ "domains": domains }))
            .send()
            .await?;

        let body: BulkAvailabilityBody = parse_json(response).await?;
        let mut reported: HashMap<String, AvailabilityBody> = body
            .domains
            .into_iter()
            .map(|item| (item.domain.to_ascii_lowercase(), item.availability))
            .collect();

        Ok(domains
            .iter()
            .zip(tlds)
            .map(|(domain, tld)| match reported.remove(domain) {
                Some(availability) => SearchResult::new(
                    domain.clone(),
                    availability.is_available(),
                    availability.first_price(),
                ),
                None => {
                    warn!(stage = "registrar", %domain, "bulk response omitted domain");
                    SearchResult::unknown(domain.clone(), *tld)
                }
            })
            .collect())
    }

    async fn individual_checks(&self, domains: &[String], tlds: &[&str]) -> Vec<SearchResult> {
        let checks = join_all(domains.iter().map(|domain| self.check_availability(domain))).await;

        checks
            .into_iter()
            .zip(domains.iter().zip(tlds))
            .map(|(outcome, (domain, tld))| match outcome {
                Ok(availability) => SearchResult {
                    domain: availability.domain,
                    tld: (*tld).to_string(),
                    available: availability.available,
                    price: availability.price,
                    under_budget: is_under_budget(availability.price),
                },
                Err(err) => {
                    warn!(stage = "registrar", %domain, error = %err, "availability check failed");
                    SearchResult::unknown(domain.clone(), *tld)
                }
            })
            .collect()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RegistrarError> {
        let mut url = self.settings.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RegistrarError::InvalidBaseUrl)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("X-Api-Key", &self.settings.api_key)
            .header("X-Api-Secret", &self.settings.api_secret)
    }
}

#[async_trait]
impl Registrar for SpaceshipClient {
    async fn check_availability(&self, domain: &str) -> Result<Availability, RegistrarError> {
        let url = self.endpoint(&["domains", domain, "available"])?;
        let response = match self.request(Method::GET, url).send().await {
            Ok(response) => response,
            Err(err) => return tally("availability", Err(err.into())),
        };

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            record("availability", "rate_limited");
            warn!(stage = "registrar", %domain, "availability check rate limited");
            return Ok(Availability::rate_limited(domain));
        }

        let body: AvailabilityBody = tally("availability", parse_json::<AvailabilityBody>(response).await)?;

        Ok(Availability {
            domain: domain.to_string(),
            available: body.is_available(),
            price: body.first_price(),
            rate_limited: false,
        })
    }

    async fn check_multiple_tlds(
        &self,
        base_name: &str,
        tlds: &[&str],
    ) -> Result<Vec<SearchResult>, RegistrarError> {
        let domains: Vec<String> = tlds.iter().map(|tld| format!("{base_name}.{tld}")).collect();

        match self.bulk_check(&domains, tlds).await {
            Ok(results) => {
                record("bulk_availability", "ok");
                Ok(results)
            }
            Err(err) => {
                record("bulk_availability", "error");
                warn!(
                    stage = "registrar",
                    base_name,
                    error = %err,
                    "bulk availability check failed; falling back to single checks"
                );
                Ok(self.individual_checks(&domains, tlds).await)
            }
        }
    }

    async fn register_domain(&self, domain: &str) -> Result<String, RegistrarError> {
        let contact_id = self
            .settings
            .contact_id
            .as_deref()
            .ok_or(RegistrarError::NotConfigured("SPACESHIP_CONTACT_ID"))?;

        let url = self.endpoint(&["domains", domain])?;
        let body = json!({
            "autoRenew": true,
            "years": 1,
            "privacyProtection": {
                "level": "high",
                "userConsent": true,
            },
            "contacts": {
                "registrant": contact_id,
                "admin": contact_id,
                "tech": contact_id,
                "billing": contact_id,
            },
        });

        let operation_id = tally("register", async {
            let response = self.request(Method::POST, url).json(&body).send().await?;
            let response = check_status(response).await?;
            response
                .headers()
                .get(ASYNC_OPERATION_HEADER)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or(RegistrarError::MissingOperationId)
        }
        .await)?;

        info!(stage = "registrar", %domain, operation_id = %operation_id, "domain registration started");
        Ok(operation_id)
    }

    async fn poll_operation(&self, operation_id: &str) -> Result<OperationStatus, RegistrarError> {
        let url = self.endpoint(&["async-operations", operation_id])?;
        let body: OperationBody = tally("poll", async {
            let response = self.request(Method::GET, url).send().await?;
            parse_json::<OperationBody>(response).await
        }
        .await)?;

        let status = OperationStatus::from_wire(&body.status);
        debug!(
            stage = "registrar",
            %operation_id,
            reported = %body.status,
            status = status.as_str(),
            "operation polled"
        );
        Ok(status)
    }

    async fn setup_dns(&self, domain: &str) -> Result<(), RegistrarError> {
        let target = self
            .settings
            .cname_target
            .as_deref()
            .ok_or(RegistrarError::NotConfigured("HOSTING_CNAME_TARGET"))?;

        let url = self.endpoint(&["dns-records"])?;
        let body = json!({
            "domain": domain,
            "records": [
                { "type": "CNAME", "name": "@", "content": target, "ttl": DNS_RECORD_TTL },
                { "type": "CNAME", "name": "www", "content": target, "ttl": DNS_RECORD_TTL },
            ],
        });

        tally("dns", async {
            let response = self.request(Method::PUT, url).json(&body).send().await?;
            check_status(response).await
        }
        .await)?;

        info!(stage = "registrar", %domain, %target, "dns records configured");
        Ok(())
    }
}

/// Availability of a single domain as reported by the registrar.
#[derive(Debug, Clone, PartialEq)]
pub struct Availability {
    pub domain: String,
    pub available: bool,
    pub price: Option<f64>,
    /// The registrar throttled the check; `available` is reported as `false`.
    pub rate_limited: bool,
}

impl Availability {
    fn rate_limited(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            available: false,
            price: None,
            rate_limited: true,
        }
    }
}

/// State of an asynchronous registrar operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Success,
    Failed,
}

impl OperationStatus {
    /// Unrecognised values keep the caller polling.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityBody {
    result: String,
    #[serde(default)]
    premium_pricing: Option<Vec<PremiumPrice>>,
}

impl AvailabilityBody {
    fn is_available(&self) -> bool {
        self.result == "available"
    }

    fn first_price(&self) -> Option<f64> {
        self.premium_pricing
            .as_ref()
            .and_then(|prices| prices.first())
            .and_then(|premium| premium.price)
    }
}

#[derive(Debug, Deserialize)]
struct PremiumPrice {
    #[serde(default, deserialize_with = "deserialize_price")]
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BulkAvailabilityBody {
    #[serde(default)]
    domains: Vec<BulkAvailabilityItem>,
}

#[derive(Debug, Deserialize)]
struct BulkAvailabilityItem {
    domain: String,
    #[serde(flatten)]
    availability: AvailabilityBody,
}

#[derive(Debug, Deserialize)]
struct OperationBody {
    status: String,
}

fn deserialize_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(raw)) => raw.trim().parse().ok(),
        _ => None,
    })
}

/// Errors produced by the registrar client.
#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("registrar is not configured: {0} is missing")]
    NotConfigured(&'static str),
    #[error("registrar base url cannot carry path segments")]
    InvalidBaseUrl,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("registration response carried no operation id")]
    MissingOperationId,
}

impl RegistrarError {
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured(_))
    }
}

fn record(op: &'static str, outcome: &'static str) {
    counter!("registrar_requests_total", "op" => op, "outcome" => outcome).increment(1);
}

/// Counts one registrar call as `ok` or `error` and passes the result through.
fn tally<T>(op: &'static str, result: Result<T, RegistrarError>) -> Result<T, RegistrarError> {
    record(op, if result.is_ok() { "ok" } else { "error" });
    result
}

async fn check_status(response: Response) -> Result<Response, RegistrarError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(RegistrarError::Status { status, body });
    }
    Ok(response)
}

async fn parse_json<T>(response: Response) -> Result<T, RegistrarError>
where
    T: DeserializeOwned,
{
    let response = check_status(response).await?;
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer, contact_id: Option<&str>, target: Option<&str>) -> SpaceshipClient {
        SpaceshipClient::new(
            SpaceshipSettings {
                base_url: Url::parse(&server.url("/api/v1/")).expect("url"),
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                contact_id: contact_id.map(str::to_string),
                cname_target: target.map(str::to_string),
            },
            default_http_client().expect("client"),
        )
    }

    #[tokio::test]
    async fn check_availability_parses_string_price() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/domains/janedoe.com/available")
                    .header("X-Api-Key", "key")
                    .header("X-Api-Secret", "secret");
                then.status(200).json_body(json!({
                    "domain": "janedoe.com",
                    "result": "available",
                    "premiumPricing": [{ "price": "12.50", "currency": "USD" }]
                }));
            })
            .await;

        let availability = client(&server, None, None)
            .check_availability("janedoe.com")
            .await
            .expect("availability");
        mock.assert_async().await;

        assert!(availability.available);
        assert_eq!(availability.price, Some(12.5));
        assert!(!availability.rate_limited);
    }

    #[tokio::test]
    async fn check_availability_treats_rate_limit_as_soft_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/domains/janedoe.com/available");
                then.status(429).body("slow down");
            })
            .await;

        let availability = client(&server, None, None)
            .check_availability("janedoe.com")
            .await
            .expect("rate limit is not an error");

        assert!(!availability.available);
        assert!(availability.rate_limited);
        assert_eq!(availability.price, None);
    }

    #[tokio::test]
    async fn check_availability_raises_on_server_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/domains/janedoe.com/available");
                then.status(500).body("boom");
            })
            .await;

        let err = client(&server, None, None)
            .check_availability("janedoe.com")
            .await
            .expect_err("should error");
        match err {
            RegistrarError::Status { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn check_multiple_tlds_uses_bulk_endpoint() {
        let server = MockServer::start_async().await;
        let bulk = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/domains/available")
                    .json_body(json!({ "domains": ["janedoe.com", "janedoe.family"] }));
                then.status(200).json_body(json!({
                    "domains": [
                        { "domain": "janedoe.com", "result": "taken", "premiumPricing": [] },
                        { "domain": "janedoe.family", "result": "available", "premiumPricing": [{ "price": 25 }] }
                    ]
                }));
            })
            .await;

        let results = client(&server, None, None)
            .check_multiple_tlds("janedoe", &["com", "family"])
            .await
            .expect("bulk results");
        bulk.assert_async().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tld, "com");
        assert!(!results[0].available);
        assert!(results[0].under_budget);
        assert_eq!(results[1].price, Some(25.0));
        assert!(!results[1].under_budget);
    }

    #[tokio::test]
    async fn bulk_results_follow_requested_tld_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/domains/available");
                then.status(200).json_body(json!({
                    "domains": [
                        { "domain": "janedoe.family", "result": "available", "premiumPricing": [{ "price": "18.5" }] },
                        { "domain": "JaneDoe.com", "result": "taken" }
                    ]
                }));
            })
            .await;

        let results = client(&server, None, None)
            .check_multiple_tlds("janedoe", &["com", "family", "baby"])
            .await
            .expect("bulk results");

        let domains: Vec<&str> = results.iter().map(|result| result.domain.as_str()).collect();
        assert_eq!(domains, ["janedoe.com", "janedoe.family", "janedoe.baby"]);
        assert!(!results[0].available);
        assert_eq!(results[1].price, Some(18.5));
        assert_eq!(results[2].tld, "baby");
        assert!(!results[2].available);
        assert_eq!(results[2].price, None);
    }

    #[tokio::test]
    async fn poll_operation_surfaces_server_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/async-operations/op-9");
                then.status(502).body("bad gateway");
            })
            .await;

        let err = client(&server, None, None)
            .poll_operation("op-9")
            .await
            .expect_err("502 should error");
        assert!(matches!(err, RegistrarError::Status { status, .. } if status == StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn tally_counts_errors_and_successes() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let _ = tally::<()>("poll", Err(RegistrarError::MissingOperationId));
            let _ = tally::<()>("poll", Err(RegistrarError::InvalidBaseUrl));
            let _ = tally("poll", Ok(()));
        });

        let body = handle.render();
        let count = |outcome: &str| {
            body.lines()
                .find(|line| {
                    line.starts_with("registrar_requests_total{")
                        && line.contains(r#"op="poll""#)
                        && line.contains(&format!(r#"outcome="{outcome}""#))
                })
                .and_then(|line| line.rsplit(' ').next())
                .map(str::to_string)
        };
        assert_eq!(count("error").as_deref(), Some("2"));
        assert_eq!(count("ok").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn check_multiple_tlds_falls_back_to_single_checks() {
        let server = MockServer::start_async().await;
        let bulk = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/domains/available");
                then.status(502);
            })
            .await;
        let com = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/domains/janedoe.com/available");
                then.status(200).json_body(json!({
                    "domain": "janedoe.com",
                    "result": "available",
                    "premiumPricing": [{ "price": 9.99 }]
                }));
            })
            .await;
        let me = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/domains/janedoe.me/available");
                then.status(503);
            })
            .await;

        let results = client(&server, None, None)
            .check_multiple_tlds("janedoe", &["com", "me"])
            .await
            .expect("fallback never errors");
        bulk.assert_async().await;
        com.assert_async().await;
        me.assert_async().await;

        assert_eq!(
            results,
            vec![
                SearchResult {
                    domain: "janedoe.com".to_string(),
                    tld: "com".to_string(),
                    available: true,
                    price: Some(9.99),
                    under_budget: true,
                },
                SearchResult::unknown("janedoe.me", "me"),
            ]
        );
    }

    #[tokio::test]
    async fn register_domain_returns_operation_id_from_header() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/domains/janedoe.com")
                    .json_body(json!({
                        "autoRenew": true,
                        "years": 1,
                        "privacyProtection": { "level": "high", "userConsent": true },
                        "contacts": {
                            "registrant": "contact-1",
                            "admin": "contact-1",
                            "tech": "contact-1",
                            "billing": "contact-1"
                        }
                    }));
                then.status(202)
                    .header("spaceship-async-operationid", "op-123");
            })
            .await;

        let operation_id = client(&server, Some("contact-1"), None)
            .register_domain("janedoe.com")
            .await
            .expect("register");
        mock.assert_async().await;
        assert_eq!(operation_id, "op-123");
    }

    #[tokio::test]
    async fn register_domain_requires_contact_profile() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/domains/janedoe.com");
                then.status(202).header("spaceship-async-operationid", "op-123");
            })
            .await;

        let err = client(&server, None, None)
            .register_domain("janedoe.com")
            .await
            .expect_err("missing contact should error");
        assert!(err.is_not_configured());
        assert_eq!(mock.hits_async().await, 0);
    }

    #[tokio::test]
    async fn register_domain_errors_without_operation_header() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/domains/janedoe.com");
                then.status(202);
            })
            .await;

        let err = client(&server, Some("contact-1"), None)
            .register_domain("janedoe.com")
            .await
            .expect_err("missing header should error");
        assert!(matches!(err, RegistrarError::MissingOperationId));
    }

    #[tokio::test]
    async fn poll_operation_maps_statuses() {
        let server = MockServer::start_async().await;
        for (id, status) in [("op-1", "success"), ("op-2", "failed"), ("op-3", "queued")] {
            server
                .mock_async(move |when, then| {
                    when.method(GET).path(format!("/api/v1/async-operations/{id}"));
                    then.status(200).json_body(json!({ "status": status }));
                })
                .await;
        }

        let client = client(&server, None, None);
        assert_eq!(client.poll_operation("op-1").await.expect("poll"), OperationStatus::Success);
        assert_eq!(client.poll_operation("op-2").await.expect("poll"), OperationStatus::Failed);
        assert_eq!(client.poll_operation("op-3").await.expect("poll"), OperationStatus::Pending);
    }

    #[tokio::test]
    async fn setup_dns_points_apex_and_www_at_target() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT).path("/api/v1/dns-records").json_body(json!({
                    "domain": "janedoe.com",
                    "records": [
                        { "type": "CNAME", "name": "@", "content": "app.example.net", "ttl": 300 },
                        { "type": "CNAME", "name": "www", "content": "app.example.net", "ttl": 300 }
                    ]
                }));
                then.status(200);
            })
            .await;

        client(&server, None, Some("app.example.net"))
            .setup_dns("janedoe.com")
            .await
            .expect("dns");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn setup_dns_requires_target() {
        let server = MockServer::start_async().await;
        let err = client(&server, None, None)
            .setup_dns("janedoe.com")
            .await
            .expect_err("missing target");
        assert!(matches!(err, RegistrarError::NotConfigured("HOSTING_CNAME_TARGET")));
    }
}
