use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Problem types `/search` can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    MissingName,
    InvalidName,
    RateLimited,
    RegistrarNotConfigured,
    RegistrarUnavailable,
}

impl ProblemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingName => "missing_name",
            Self::InvalidName => "invalid_name",
            Self::RateLimited => "rate_limited",
            Self::RegistrarNotConfigured => "registrar_not_configured",
            Self::RegistrarUnavailable => "registrar_unavailable",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            Self::MissingName | Self::InvalidName => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::RegistrarNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::RegistrarUnavailable => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

/// `application/problem+json` error body with an optional `Retry-After`.
#[derive(Debug)]
pub struct ProblemResponse {
    kind: ProblemKind,
    body: ProblemDetails,
    retry_after_secs: Option<u64>,
}

impl ProblemResponse {
    pub fn new(kind: ProblemKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            body: ProblemDetails {
                problem_type: kind.as_str(),
                title: kind.status().canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
            retry_after_secs: None,
        }
    }

    /// Search is switched off until registrar credentials are provided.
    pub fn registrar_not_configured() -> Self {
        Self::new(
            ProblemKind::RegistrarNotConfigured,
            "domain search is not available at this time",
        )
    }

    /// Adds `Retry-After`, rounded up to whole seconds and never below one.
    pub fn retry_after(mut self, wait: Duration) -> Self {
        let seconds = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        self.retry_after_secs = Some(seconds.max(1));
        self
    }

    pub fn kind(&self) -> ProblemKind {
        self.kind
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after_secs
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.kind.status();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if let Some(seconds) = self.retry_after_secs {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}
