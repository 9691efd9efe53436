use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::naming::{is_under_budget, tld_of};

/// Availability of a single domain annotated with the budget rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub domain: String,
    pub tld: String,
    pub available: bool,
    pub price: Option<f64>,
    pub under_budget: bool,
}

impl SearchResult {
    /// Builds a result, deriving `tld` from the domain and `under_budget` from the price.
    pub fn new(domain: impl Into<String>, available: bool, price: Option<f64>) -> Self {
        let domain = domain.into();
        let tld = tld_of(&domain).to_string();
        Self {
            domain,
            tld,
            available,
            price,
            under_budget: is_under_budget(price),
        }
    }

    /// Result used when a check could not be completed: unavailable, no price.
    pub fn unknown(domain: impl Into<String>, tld: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            tld: tld.into(),
            available: false,
            price: None,
            under_budget: is_under_budget(None),
        }
    }

    /// `true` when the domain can be bought under the price cap.
    pub fn is_purchasable(&self) -> bool {
        self.available && self.under_budget
    }
}

/// Payload returned by a search and stored in the availability cache.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub alternatives: Vec<SearchResult>,
}

/// Provisioning state of a domain order.
///
/// The happy path is strictly forward:
/// `pending -> registering -> registered -> dns_setup -> active`.
/// `failed` is reachable from `registering`, `registered` and `dns_setup`
/// and, like `active`, is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Registering,
    Registered,
    DnsSetup,
    Active,
    Failed,
}

impl OrderStatus {
    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Registering => "registering",
            Self::Registered => "registered",
            Self::DnsSetup => "dns_setup",
            Self::Active => "active",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Active | Self::Failed)
    }

    /// Checks the transition table.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Registering)
                | (Self::Registering, Self::Registered)
                | (Self::Registered, Self::DnsSetup)
                | (Self::DnsSetup, Self::Active)
                | (Self::Registering, Self::Failed)
                | (Self::Registered, Self::Failed)
                | (Self::DnsSetup, Self::Failed)
        )
    }

    /// Returns `next` when the move is legal.
    pub fn transition(self, next: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "registering" => Ok(Self::Registering),
            "registered" => Ok(Self::Registered),
            "dns_setup" => Ok(Self::DnsSetup),
            "active" => Ok(Self::Active),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Raised when a status string does not name a known state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown order status '{0}'")]
pub struct UnknownStatus(pub String);

/// Raised when an order is asked to move along an edge the table does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal order transition {from} -> {to}")]
pub struct TransitionError {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// A purchased domain and its provisioning progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainOrder {
    pub id: String,
    pub tenant_id: String,
    pub domain: String,
    pub tld: String,
    pub status: OrderStatus,
    pub payment_reference: Option<String>,
    pub price: Option<f64>,
    pub external_operation_id: Option<String>,
    pub platform_binding_id: Option<String>,
    /// Set when the order went `active` without a platform binding.
    pub platform_binding_error: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub registered_at: Option<DateTime<Utc>>,
    pub dns_configured_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DomainOrder {
    /// Active orders whose platform binding failed and still need a manual bind.
    pub fn is_unbound(&self) -> bool {
        self.status == OrderStatus::Active && self.platform_binding_id.is_none()
    }
}
