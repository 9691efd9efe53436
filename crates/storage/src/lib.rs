use std::borrow::Cow;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use famdomain_core::{tld_of, DomainOrder, OrderStatus, TransitionError, UnknownStatus};

const ORDER_COLUMNS: &str = "id, tenant_id, domain, tld, status, payment_reference, price, \
     external_operation_id, platform_binding_id, platform_binding_error, error_message, \
     created_at, registered_at, dns_configured_at, updated_at";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to the domain order records.
    pub fn domain_orders(&self) -> DomainOrderRepository {
        DomainOrderRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to the tenant records.
    pub fn tenants(&self) -> TenantRepository {
        TenantRepository {
            pool: self.pool.clone(),
        }
    }

    /// Round-trips a trivial query to confirm the pool is usable.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for domain purchase orders. Rows are never deleted.
#[derive(Clone)]
pub struct DomainOrderRepository {
    pool: SqlitePool,
}

impl DomainOrderRepository {
    /// Inserts a new order in `pending`.
    pub async fn create(
        &self,
        order: &NewDomainOrder<'_>,
        created_at: DateTime<Utc>,
    ) -> Result<DomainOrder, OrderError> {
        let tld = tld_of(order.domain);
        if tld.is_empty() || order.domain.starts_with('.') {
            return Err(OrderError::InvalidDomain(order.domain.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let at = to_rfc3339(created_at);
        let sql = format!(
            "INSERT INTO domain_orders \
             (id, tenant_id, domain, tld, status, payment_reference, price, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {ORDER_COLUMNS}"
        );

        let row = sqlx::query_as::<_, DomainOrderRow>(&sql)
            .bind(&id)
            .bind(order.tenant_id)
            .bind(order.domain)
            .bind(tld)
            .bind(OrderStatus::Pending.as_str())
            .bind(order.payment_reference)
            .bind(order.price)
            .bind(&at)
            .bind(&at)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db_err)
                    if db_err.code() == Some(Cow::Borrowed("787")) =>
                {
                    OrderError::MissingTenant
                }
                other => OrderError::Database(other),
            })?;

        row.into_domain()
    }

    /// Loads an order by id.
    pub async fn fetch(&self, id: &str) -> Result<Option<DomainOrder>, OrderError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM domain_orders WHERE id = ?");
        let row = sqlx::query_as::<_, DomainOrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DomainOrderRow::into_domain).transpose()
    }

    /// Records the registrar operation id. Only accepted once, while `registering`.
    pub async fn set_operation_id(
        &self,
        id: &str,
        operation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let result = sqlx::query(
            "UPDATE domain_orders \
             SET external_operation_id = ?, updated_at = ? \
             WHERE id = ? AND status = 'registering' AND external_operation_id IS NULL",
        )
        .bind(operation_id)
        .bind(to_rfc3339(at))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrderError::OperationIdRejected);
        }
        Ok(())
    }

    /// Moves an order from `from` along `change`, returning the updated record.
    ///
    /// The move is checked against the transition table and applied only if
    /// the stored status still equals `from`.
    pub async fn transition(
        &self,
        id: &str,
        from: OrderStatus,
        change: &OrderTransition,
        at: DateTime<Utc>,
    ) -> Result<DomainOrder, OrderError> {
        from.transition(change.to)?;

        let sql = format!(
            "UPDATE domain_orders \
             SET status = ?, \
                 registered_at = COALESCE(?, registered_at), \
                 dns_configured_at = COALESCE(?, dns_configured_at), \
                 platform_binding_id = COALESCE(?, platform_binding_id), \
                 platform_binding_error = COALESCE(?, platform_binding_error), \
                 error_message = COALESCE(?, error_message), \
                 updated_at = ? \
             WHERE id = ? AND status = ? \
             RETURNING {ORDER_COLUMNS}"
        );

        let row = sqlx::query_as::<_, DomainOrderRow>(&sql)
            .bind(change.to.as_str())
            .bind(change.registered_at.map(to_rfc3339))
            .bind(change.dns_configured_at.map(to_rfc3339))
            .bind(change.platform_binding_id.as_deref())
            .bind(change.platform_binding_error.as_deref())
            .bind(change.error_message.as_deref())
            .bind(to_rfc3339(at))
            .bind(id)
            .bind(from.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.into_domain(),
            None => match self.fetch(id).await? {
                Some(current) => Err(OrderError::StaleStatus {
                    expected: from,
                    actual: current.status,
                }),
                None => Err(OrderError::NotFound),
            },
        }
    }

    /// Lists orders in `status`, oldest first.
    pub async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<DomainOrder>, OrderError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM domain_orders WHERE status = ? ORDER BY created_at ASC"
        );
        let rows = sqlx::query_as::<_, DomainOrderRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DomainOrderRow::into_domain).collect()
    }

    /// Active orders that never received a platform binding id.
    pub async fn list_unbound_active(&self) -> Result<Vec<DomainOrder>, OrderError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM domain_orders \
             WHERE status = 'active' AND platform_binding_id IS NULL \
             ORDER BY created_at ASC"
        );
        let rows = sqlx::query_as::<_, DomainOrderRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DomainOrderRow::into_domain).collect()
    }
}

/// Parameters required to insert a domain order.
#[derive(Debug, Clone)]
pub struct NewDomainOrder<'a> {
    pub tenant_id: &'a str,
    pub domain: &'a str,
    pub payment_reference: Option<&'a str>,
    pub price: Option<f64>,
}

/// Target status plus the fields that move with it.
#[derive(Debug, Clone)]
pub struct OrderTransition {
    to: OrderStatus,
    registered_at: Option<DateTime<Utc>>,
    dns_configured_at: Option<DateTime<Utc>>,
    platform_binding_id: Option<String>,
    platform_binding_error: Option<String>,
    error_message: Option<String>,
}

impl OrderTransition {
    pub fn to(status: OrderStatus) -> Self {
        Self {
            to: status,
            registered_at: None,
            dns_configured_at: None,
            platform_binding_id: None,
            platform_binding_error: None,
            error_message: None,
        }
    }

    /// Transition into `failed`, the only one that carries an error message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::to(OrderStatus::Failed)
        }
    }

    pub fn with_registered_at(mut self, at: DateTime<Utc>) -> Self {
        self.registered_at = Some(at);
        self
    }

    pub fn with_dns_configured_at(mut self, at: DateTime<Utc>) -> Self {
        self.dns_configured_at = Some(at);
        self
    }

    /// Records the outcome of the platform binding attempt.
    pub fn with_platform_binding(mut self, binding: Result<String, String>) -> Self {
        match binding {
            Ok(id) => self.platform_binding_id = Some(id),
            Err(message) => self.platform_binding_error = Some(message),
        }
        self
    }
}

/// Raw `domain_orders` row.
#[derive(Debug, sqlx::FromRow)]
pub struct DomainOrderRow {
    pub id: String,
    pub tenant_id: String,
    pub domain: String,
    pub tld: String,
    pub status: String,
    pub payment_reference: Option<String>,
    pub price: Option<f64>,
    pub external_operation_id: Option<String>,
    pub platform_binding_id: Option<String>,
    pub platform_binding_error: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub registered_at: Option<DateTime<Utc>>,
    pub dns_configured_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DomainOrderRow {
    /// Converts the database row into the domain record.
    pub fn into_domain(self) -> Result<DomainOrder, OrderError> {
        let status = self.status.parse::<OrderStatus>()?;
        Ok(DomainOrder {
            id: self.id,
            tenant_id: self.tenant_id,
            domain: self.domain,
            tld: self.tld,
            status,
            payment_reference: self.payment_reference,
            price: self.price,
            external_operation_id: self.external_operation_id,
            platform_binding_id: self.platform_binding_id,
            platform_binding_error: self.platform_binding_error,
            error_message: self.error_message,
            created_at: self.created_at,
            registered_at: self.registered_at,
            dns_configured_at: self.dns_configured_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while reading or mutating domain orders.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("domain order not found")]
    NotFound,
    #[error("tenant does not exist for the order")]
    MissingTenant,
    #[error("'{0}' is not a name.tld domain")]
    InvalidDomain(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("order status changed concurrently: expected {expected}, found {actual}")]
    StaleStatus {
        expected: OrderStatus,
        actual: OrderStatus,
    },
    #[error("operation id can only be recorded once while registering")]
    OperationIdRejected,
    #[error("stored order has an invalid status: {0}")]
    CorruptStatus(#[from] UnknownStatus),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository over the tenant records this service is allowed to touch.
#[derive(Clone)]
pub struct TenantRepository {
    pool: SqlitePool,
}

impl TenantRepository {
    pub async fn insert(&self, tenant: &NewTenant<'_>, at: DateTime<Utc>) -> Result<(), TenantError> {
        let at = to_rfc3339(at);
        sqlx::query(
            "INSERT INTO tenants (id, display_name, custom_domain, created_at, updated_at) \
             VALUES (?, ?, NULL, ?, ?)",
        )
        .bind(tenant.id)
        .bind(tenant.display_name)
        .bind(&at)
        .bind(&at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Points the tenant's site at `domain`.
    pub async fn set_custom_domain(
        &self,
        tenant_id: &str,
        domain: &str,
        at: DateTime<Utc>,
    ) -> Result<(), TenantError> {
        let result =
            sqlx::query("UPDATE tenants SET custom_domain = ?, updated_at = ? WHERE id = ?")
                .bind(domain)
                .bind(to_rfc3339(at))
                .bind(tenant_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(TenantError::NotFound);
        }
        Ok(())
    }

    pub async fn fetch_custom_domain(&self, tenant_id: &str) -> Result<Option<String>, TenantError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT custom_domain FROM tenants WHERE id = ?")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(domain,)| domain).ok_or(TenantError::NotFound)
    }
}

/// Data required to create a tenant row.
pub struct NewTenant<'a> {
    pub id: &'a str,
    pub display_name: &'a str,
}

/// Errors raised by the tenant repository.
#[derive(Debug, Error)]
pub enum TenantError {
    #[error("tenant not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
