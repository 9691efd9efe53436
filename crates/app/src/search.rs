use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use famdomain_core::{
    generate_variations, validate_base_name, NameError, SearchResponse, SearchResult,
    MAX_ALTERNATIVE_CHECKS, PRIMARY_TLDS,
};
use famdomain_registrar::{Registrar, RegistrarError};
use futures::future::join_all;
use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::AvailabilityCache;
use crate::problem::{ProblemKind, ProblemResponse};
use crate::router::AppState;

/// Answers availability searches, proposing alternatives when nothing affordable is free.
#[derive(Clone)]
pub struct DomainSearchEngine {
    registrar: Arc<dyn Registrar>,
    cache: AvailabilityCache,
}

impl DomainSearchEngine {
    pub fn new(registrar: Arc<dyn Registrar>, cache: AvailabilityCache) -> Self {
        Self { registrar, cache }
    }

    pub fn is_configured(&self) -> bool {
        self.registrar.is_configured()
    }

    /// Searches the primary TLDs for `raw`, falling back to generated alternatives.
    pub async fn search(&self, raw: &str) -> Result<SearchResponse, SearchError> {
        let base_name = validate_base_name(raw)?;

        if let Some(cached) = self.cache.get(&base_name) {
            counter!("domain_search_cache_total", "outcome" => "hit").increment(1);
            debug!(stage = "search", %base_name, "availability cache hit");
            return Ok(cached);
        }
        counter!("domain_search_cache_total", "outcome" => "miss").increment(1);

        let results = self
            .registrar
            .check_multiple_tlds(&base_name, &PRIMARY_TLDS)
            .await?;

        let alternatives = if results.iter().any(SearchResult::is_purchasable) {
            Vec::new()
        } else {
            self.suggest_alternatives(&base_name).await
        };

        info!(
            stage = "search",
            %base_name,
            results = results.len(),
            alternatives = alternatives.len(),
            "domain search completed"
        );

        let response = SearchResponse {
            results,
            alternatives,
        };
        self.cache.set(base_name, response.clone());
        Ok(response)
    }

    async fn suggest_alternatives(&self, base_name: &str) -> Vec<SearchResult> {
        let candidates: Vec<String> = generate_variations(base_name)
            .into_iter()
            .take(MAX_ALTERNATIVE_CHECKS)
            .collect();

        let checks = join_all(
            candidates
                .iter()
                .map(|domain| self.registrar.check_availability(domain)),
        )
        .await;

        checks
            .into_iter()
            .zip(&candidates)
            .filter_map(|(outcome, domain)| match outcome {
                Ok(availability) => {
                    let result = SearchResult::new(
                        availability.domain,
                        availability.available,
                        availability.price,
                    );
                    result.is_purchasable().then_some(result)
                }
                Err(err) => {
                    warn!(stage = "search", %domain, error = %err, "alternative check failed");
                    None
                }
            })
            .collect()
    }
}

/// Errors surfaced by [`DomainSearchEngine::search`].
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    InvalidName(#[from] NameError),
    #[error("registrar request failed: {0}")]
    Registrar(#[from] RegistrarError),
}

impl From<SearchError> for ProblemResponse {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidName(err) => {
                ProblemResponse::new(ProblemKind::InvalidName, err.to_string())
            }
            SearchError::Registrar(err) if err.is_not_configured() => {
                ProblemResponse::registrar_not_configured()
            }
            SearchError::Registrar(err) => {
                ProblemResponse::new(ProblemKind::RegistrarUnavailable, err.to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    name: Option<String>,
}

/// `GET /search?name=<string>`
pub async fn handle(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ProblemResponse> {
    let engine = state.search();
    if !engine.is_configured() {
        counter!("domain_search_requests_total", "result" => "not_configured").increment(1);
        return Err(ProblemResponse::registrar_not_configured());
    }

    let Some(name) = query.name.filter(|value| !value.trim().is_empty()) else {
        counter!("domain_search_requests_total", "result" => "invalid").increment(1);
        return Err(ProblemResponse::new(
            ProblemKind::MissingName,
            "name query parameter is required",
        ));
    };

    match engine.search(&name).await {
        Ok(response) => {
            counter!("domain_search_requests_total", "result" => "ok").increment(1);
            Ok(Json(response))
        }
        Err(err) => {
            let label = match &err {
                SearchError::InvalidName(_) => "invalid",
                SearchError::Registrar(_) => "error",
            };
            counter!("domain_search_requests_total", "result" => label).increment(1);
            Err(err.into())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use famdomain_registrar::{Availability, OperationStatus};

    use crate::cache::DEFAULT_TTL;

    /// Registrar double answering from a fixed table and counting calls.
    #[derive(Default)]
    pub(crate) struct TableRegistrar {
        pub primary: Vec<SearchResult>,
        pub singles: HashMap<String, Result<Availability, u16>>,
        pub bulk_calls: AtomicUsize,
        pub single_calls: AtomicUsize,
        pub checked: Mutex<Vec<String>>,
    }

    impl TableRegistrar {
        pub fn with_primary(primary: Vec<SearchResult>) -> Self {
            Self {
                primary,
                ..Self::default()
            }
        }

        pub fn single(mut self, domain: &str, available: bool, price: Option<f64>) -> Self {
            self.singles.insert(
                domain.to_string(),
                Ok(Availability {
                    domain: domain.to_string(),
                    available,
                    price,
                    rate_limited: false,
                }),
            );
            self
        }

        pub fn failing(mut self, domain: &str) -> Self {
            self.singles.insert(domain.to_string(), Err(500));
            self
        }

        pub fn calls(&self) -> usize {
            self.bulk_calls.load(Ordering::SeqCst) + self.single_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Registrar for TableRegistrar {
        async fn check_availability(&self, domain: &str) -> Result<Availability, RegistrarError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            self.checked
                .lock()
                .expect("checked poisoned")
                .push(domain.to_string());
            match self.singles.get(domain) {
                Some(Ok(availability)) => Ok(availability.clone()),
                Some(Err(_)) => Err(RegistrarError::InvalidBaseUrl),
                None => Ok(Availability {
                    domain: domain.to_string(),
                    available: false,
                    price: None,
                    rate_limited: false,
                }),
            }
        }

        async fn check_multiple_tlds(
            &self,
            _base_name: &str,
            _tlds: &[&str],
        ) -> Result<Vec<SearchResult>, RegistrarError> {
            self.bulk_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.primary.clone())
        }

        async fn register_domain(&self, _domain: &str) -> Result<String, RegistrarError> {
            unreachable!("search never registers")
        }

        async fn poll_operation(&self, _id: &str) -> Result<OperationStatus, RegistrarError> {
            unreachable!("search never polls")
        }

        async fn setup_dns(&self, _domain: &str) -> Result<(), RegistrarError> {
            unreachable!("search never touches dns")
        }
    }

    pub(crate) fn taken_primaries(base: &str) -> Vec<SearchResult> {
        PRIMARY_TLDS
            .iter()
            .map(|tld| SearchResult::new(format!("{base}.{tld}"), false, None))
            .collect()
    }

    fn engine(registrar: Arc<TableRegistrar>) -> DomainSearchEngine {
        DomainSearchEngine::new(registrar, AvailabilityCache::new(DEFAULT_TTL))
    }

    #[tokio::test]
    async fn skips_alternatives_when_primary_is_affordable() {
        let mut primary = taken_primaries("janedoe");
        primary[1] = SearchResult::new("janedoe.family", true, Some(15.0));
        let registrar = Arc::new(TableRegistrar::with_primary(primary.clone()));

        let response = engine(registrar.clone())
            .search("JaneDoe")
            .await
            .expect("search");

        assert_eq!(response.results, primary);
        assert!(response.alternatives.is_empty());
        assert_eq!(registrar.single_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn over_budget_primary_triggers_alternatives() {
        let mut primary = taken_primaries("janedoe");
        primary[0] = SearchResult::new("janedoe.com", true, Some(25.0));
        let registrar = Arc::new(
            TableRegistrar::with_primary(primary)
                .single("thejanedoe.com", true, Some(12.0))
                .single("littlejanedoe.com", true, Some(40.0))
                .single("janedoe.us", true, None)
                .failing("janedoebook.com"),
        );

        let response = engine(registrar.clone())
            .search("janedoe")
            .await
            .expect("search");

        let domains: Vec<_> = response
            .alternatives
            .iter()
            .map(|result| result.domain.as_str())
            .collect();
        assert_eq!(domains, vec!["thejanedoe.com", "janedoe.us"]);
        assert!(response.alternatives.iter().all(SearchResult::is_purchasable));
        assert_eq!(response.alternatives[1].tld, "us");
    }

    #[tokio::test]
    async fn never_checks_more_than_ten_alternatives() {
        let registrar = Arc::new(TableRegistrar::with_primary(taken_primaries("doe")));

        engine(registrar.clone()).search("doe").await.expect("search");

        assert_eq!(registrar.single_calls.load(Ordering::SeqCst), MAX_ALTERNATIVE_CHECKS);
        let checked = registrar.checked.lock().expect("checked").clone();
        assert!(!checked.contains(&"doerose.com".to_string()));
    }

    #[tokio::test]
    async fn repeated_search_is_served_from_cache() {
        let registrar = Arc::new(TableRegistrar::with_primary(taken_primaries("janedoe")));
        let cache = AvailabilityCache::new(DEFAULT_TTL);
        let engine = DomainSearchEngine::new(registrar.clone(), cache.clone());

        let first = engine.search("Jane_Doe!!").await.expect("first search");
        let calls_after_first = registrar.calls();
        let second = engine.search("janedoe").await.expect("second search");

        assert_eq!(first, second);
        assert_eq!(cache.get("janedoe"), Some(first));
        assert_eq!(registrar.calls(), calls_after_first);
        assert_eq!(registrar.bulk_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_short_names_without_calling_registrar() {
        let registrar = Arc::new(TableRegistrar::default());
        let err = engine(registrar.clone())
            .search("a!")
            .await
            .expect_err("too short");

        assert!(matches!(err, SearchError::InvalidName(_)));
        assert_eq!(registrar.calls(), 0);
    }

    #[test]
    fn search_errors_map_to_problem_kinds() {
        let invalid = ProblemResponse::from(SearchError::InvalidName(NameError::TooShort {
            sanitized: "a".to_string(),
        }));
        assert_eq!(invalid.kind(), ProblemKind::InvalidName);

        let unconfigured = ProblemResponse::from(SearchError::Registrar(
            RegistrarError::NotConfigured("SPACESHIP_API_KEY"),
        ));
        assert_eq!(unconfigured.kind(), ProblemKind::RegistrarNotConfigured);

        let upstream = ProblemResponse::from(SearchError::Registrar(RegistrarError::InvalidBaseUrl));
        assert_eq!(upstream.kind(), ProblemKind::RegistrarUnavailable);
        assert_eq!(upstream.retry_after_secs(), None);
    }
}
