//! Domain types and pure rules shared by the search engine, the provisioning
//! pipeline and the storage layer.
pub mod naming;
pub mod types;

pub use naming::{
    generate_variations, is_under_budget, sanitize_base_name, tld_of, validate_base_name,
    NameError, MAX_ALTERNATIVE_CHECKS, MAX_LABEL_LEN, MIN_BASE_NAME_LEN, PRICE_CAP,
    PRIMARY_TLDS,
};
pub use types::{
    DomainOrder, OrderStatus, SearchResponse, SearchResult, TransitionError, UnknownStatus,
};
