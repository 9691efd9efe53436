use async_trait::async_trait;
use famdomain_core::SearchResult;

use crate::platform::PlatformError;
use crate::spaceship::{Availability, OperationStatus, RegistrarError};

/// Registrar capabilities consumed by search and provisioning.
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Checks a single fully-qualified domain.
    ///
    /// A throttled check resolves to `available = false`; transport failures are errors.
    async fn check_availability(&self, domain: &str) -> Result<Availability, RegistrarError>;

    /// Checks `base_name` under each TLD, keeping the order of `tlds`.
    async fn check_multiple_tlds(
        &self,
        base_name: &str,
        tlds: &[&str],
    ) -> Result<Vec<SearchResult>, RegistrarError>;

    /// Starts an asynchronous purchase and returns the operation id to poll.
    async fn register_domain(&self, domain: &str) -> Result<String, RegistrarError>;

    async fn poll_operation(&self, operation_id: &str) -> Result<OperationStatus, RegistrarError>;

    /// Points the apex and `www` records at the hosting target. Idempotent.
    async fn setup_dns(&self, domain: &str) -> Result<(), RegistrarError>;

    fn is_configured(&self) -> bool {
        true
    }
}

/// Binds a domain to the hosting platform, returning the platform's identifier.
#[async_trait]
pub trait PlatformBinder: Send + Sync {
    async fn bind_domain(&self, domain: &str) -> Result<String, PlatformError>;
}

/// Stand-in used when registrar credentials are absent; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRegistrar;

const MISSING_CREDENTIALS: &str = "SPACESHIP_API_KEY/SPACESHIP_API_SECRET";

#[async_trait]
impl Registrar for UnconfiguredRegistrar {
    async fn check_availability(&self, _domain: &str) -> Result<Availability, RegistrarError> {
        Err(RegistrarError::NotConfigured(MISSING_CREDENTIALS))
    }

    async fn check_multiple_tlds(
        &self,
        _base_name: &str,
        _tlds: &[&str],
    ) -> Result<Vec<SearchResult>, RegistrarError> {
        Err(RegistrarError::NotConfigured(MISSING_CREDENTIALS))
    }

    async fn register_domain(&self, _domain: &str) -> Result<String, RegistrarError> {
        Err(RegistrarError::NotConfigured(MISSING_CREDENTIALS))
    }

    async fn poll_operation(&self, _operation_id: &str) -> Result<OperationStatus, RegistrarError> {
        Err(RegistrarError::NotConfigured(MISSING_CREDENTIALS))
    }

    async fn setup_dns(&self, _domain: &str) -> Result<(), RegistrarError> {
        Err(RegistrarError::NotConfigured(MISSING_CREDENTIALS))
    }

    fn is_configured(&self) -> bool {
        false
    }
}
