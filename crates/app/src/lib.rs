//! HTTP surface and background provisioning for custom family domains.
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub mod cache;
pub mod problem;
pub mod provisioning;
pub mod rate_limit;
pub mod router;
pub mod search;
pub mod telemetry;

/// Injected time source shared by the cache, the limiter and the orchestrator.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
