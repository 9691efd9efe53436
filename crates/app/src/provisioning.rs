use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use famdomain_core::{DomainOrder, OrderStatus};
use famdomain_registrar::{OperationStatus, PlatformBinder, Registrar};
use famdomain_storage::{
    DomainOrderRepository, NewDomainOrder, OrderError, OrderTransition, TenantError,
    TenantRepository,
};
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::Clock;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_POLLS: u32 = 30;
const JOB_QUEUE_CAPACITY: usize = 32;

/// Writes the tenant's custom domain once its order is live.
#[async_trait]
pub trait TenantRecordUpdater: Send + Sync {
    async fn set_custom_domain(
        &self,
        tenant_id: &str,
        domain: &str,
        at: DateTime<Utc>,
    ) -> Result<(), TenantError>;
}

#[async_trait]
impl TenantRecordUpdater for TenantRepository {
    async fn set_custom_domain(
        &self,
        tenant_id: &str,
        domain: &str,
        at: DateTime<Utc>,
    ) -> Result<(), TenantError> {
        TenantRepository::set_custom_domain(self, tenant_id, domain, at).await
    }
}

/// How a provisioning run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The order is live; the binding id is absent when the platform call failed.
    Active { platform_binding_id: Option<String> },
    Failed { reason: String },
    /// The order was missing or had already left `pending`.
    Skipped { status: Option<OrderStatus> },
    /// The order store failed mid-run.
    Interrupted { reason: String },
}

impl ProvisionOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Active { .. } => "active",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
            Self::Interrupted { .. } => "interrupted",
        }
    }
}

/// Drives one order from `pending` to `active` or `failed`.
///
/// A run never returns an error: external failures end in `failed` with the
/// message stored on the order, and platform binding failures are recorded
/// without blocking activation.
#[derive(Clone)]
pub struct ProvisioningOrchestrator {
    orders: DomainOrderRepository,
    registrar: Arc<dyn Registrar>,
    platform: Arc<dyn PlatformBinder>,
    tenants: Arc<dyn TenantRecordUpdater>,
    clock: Clock,
    poll_interval: Duration,
    max_polls: u32,
}

impl ProvisioningOrchestrator {
    pub fn new(
        orders: DomainOrderRepository,
        registrar: Arc<dyn Registrar>,
        platform: Arc<dyn PlatformBinder>,
        tenants: Arc<dyn TenantRecordUpdater>,
    ) -> Self {
        Self {
            orders,
            registrar,
            platform,
            tenants,
            clock: Arc::new(Utc::now),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn run(&self, order_id: &str) -> ProvisionOutcome {
        let outcome = match self.drive(order_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(stage = "provision", %order_id, error = %err, "provisioning run aborted");
                self.abandon(order_id, err.to_string()).await
            }
        };
        counter!("provision_runs_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn drive(&self, order_id: &str) -> Result<ProvisionOutcome, OrderError> {
        let Some(order) = self.orders.fetch(order_id).await? else {
            warn!(stage = "provision", %order_id, "order not found; nothing to provision");
            return Ok(ProvisionOutcome::Skipped { status: None });
        };
        if order.status.is_terminal() {
            info!(
                stage = "provision",
                %order_id,
                status = %order.status,
                "order already finished; skipping run"
            );
            return Ok(ProvisionOutcome::Skipped {
                status: Some(order.status),
            });
        }
        if order.status != OrderStatus::Pending {
            info!(
                stage = "provision",
                %order_id,
                status = %order.status,
                "order already started; skipping run"
            );
            return Ok(ProvisionOutcome::Skipped {
                status: Some(order.status),
            });
        }

        let order = match self
            .advance(&order, OrderTransition::to(OrderStatus::Registering))
            .await
        {
            Ok(order) => order,
            Err(OrderError::StaleStatus { actual, .. }) => {
                info!(stage = "provision", %order_id, status = %actual, "order claimed by another run");
                return Ok(ProvisionOutcome::Skipped {
                    status: Some(actual),
                });
            }
            Err(err) => return Err(err),
        };
        info!(stage = "provision", %order_id, domain = %order.domain, "registration started");

        let operation_id = match self.registrar.register_domain(&order.domain).await {
            Ok(operation_id) => operation_id,
            Err(err) => return self.fail(&order, err.to_string()).await,
        };
        self.orders
            .set_operation_id(&order.id, &operation_id, self.now())
            .await?;

        if let Err(reason) = self.await_registration(&order, &operation_id).await {
            return self.fail(&order, reason).await;
        }

        let now = self.now();
        let order = self
            .advance(
                &order,
                OrderTransition::to(OrderStatus::Registered).with_registered_at(now),
            )
            .await?;

        if let Err(err) = self.registrar.setup_dns(&order.domain).await {
            let reason = format!("DNS setup failed for {}: {err}", order.domain);
            return self.fail(&order, reason).await;
        }

        let now = self.now();
        let order = self
            .advance(
                &order,
                OrderTransition::to(OrderStatus::DnsSetup).with_dns_configured_at(now),
            )
            .await?;

        let binding = match self.platform.bind_domain(&order.domain).await {
            Ok(binding_id) => Ok(binding_id),
            Err(err) => {
                counter!("platform_binding_failures_total").increment(1);
                warn!(
                    stage = "provision",
                    %order_id,
                    domain = %order.domain,
                    error = %err,
                    "platform binding failed; activating unbound"
                );
                Err(err.to_string())
            }
        };

        let order = self
            .advance(
                &order,
                OrderTransition::to(OrderStatus::Active).with_platform_binding(binding),
            )
            .await?;
        info!(
            stage = "provision",
            %order_id,
            domain = %order.domain,
            unbound = order.is_unbound(),
            "domain active"
        );

        self.update_tenant(&order).await;

        Ok(ProvisionOutcome::Active {
            platform_binding_id: order.platform_binding_id,
        })
    }

    /// Polls the registrar until the purchase settles. `Err` carries the failure message.
    ///
    /// The loop stops after `max_polls` attempts or once `poll_interval * max_polls`
    /// has elapsed, whichever comes first. A poll still in flight at the deadline
    /// is abandoned.
    async fn await_registration(
        &self,
        order: &DomainOrder,
        operation_id: &str,
    ) -> Result<(), String> {
        let deadline = Instant::now() + self.poll_interval.saturating_mul(self.max_polls);
        let timed_out = |polls: u32| {
            format!(
                "registration timed out for {} after {polls} polls",
                order.domain
            )
        };

        for attempt in 1..=self.max_polls {
            sleep_until((Instant::now() + self.poll_interval).min(deadline)).await;
            counter!("provision_polls_total").increment(1);

            let remaining = deadline.saturating_duration_since(Instant::now());
            let polled = timeout(remaining, self.registrar.poll_operation(operation_id)).await;
            match polled {
                Err(_) => {
                    warn!(
                        stage = "provision",
                        order_id = %order.id,
                        attempt,
                        "registration poll outlived the polling deadline"
                    );
                    return Err(timed_out(attempt));
                }
                Ok(Ok(OperationStatus::Success)) => return Ok(()),
                Ok(Ok(OperationStatus::Failed)) => {
                    return Err(format!(
                        "registrar reported registration failed for {}",
                        order.domain
                    ));
                }
                Ok(Ok(OperationStatus::Pending)) => {
                    debug!(
                        stage = "provision",
                        order_id = %order.id,
                        attempt,
                        max_polls = self.max_polls,
                        "registration pending"
                    );
                }
                Ok(Err(err)) => {
                    warn!(
                        stage = "provision",
                        order_id = %order.id,
                        attempt,
                        error = %err,
                        "registration poll failed"
                    );
                }
            }
        }

        Err(timed_out(self.max_polls))
    }

    async fn advance(
        &self,
        order: &DomainOrder,
        change: OrderTransition,
    ) -> Result<DomainOrder, OrderError> {
        self.orders
            .transition(&order.id, order.status, &change, self.now())
            .await
    }

    async fn fail(
        &self,
        order: &DomainOrder,
        reason: String,
    ) -> Result<ProvisionOutcome, OrderError> {
        warn!(
            stage = "provision",
            order_id = %order.id,
            domain = %order.domain,
            from = %order.status,
            %reason,
            "provisioning failed"
        );
        self.advance(order, OrderTransition::failed(reason.clone()))
            .await?;
        Ok(ProvisionOutcome::Failed { reason })
    }

    /// Best effort: moves a half-provisioned order to `failed` after a store error.
    async fn abandon(&self, order_id: &str, reason: String) -> ProvisionOutcome {
        match self.orders.fetch(order_id).await {
            Ok(Some(order)) if order.status.can_transition_to(OrderStatus::Failed) => {
                if let Err(err) = self
                    .orders
                    .transition(
                        order_id,
                        order.status,
                        &OrderTransition::failed(reason.clone()),
                        self.now(),
                    )
                    .await
                {
                    error!(stage = "provision", %order_id, error = %err, "failed to record provisioning failure");
                }
            }
            Ok(_) => {}
            Err(err) => {
                error!(stage = "provision", %order_id, error = %err, "failed to reload order after abort");
            }
        }
        ProvisionOutcome::Interrupted { reason }
    }

    async fn update_tenant(&self, order: &DomainOrder) {
        match self
            .tenants
            .set_custom_domain(&order.tenant_id, &order.domain, self.now())
            .await
        {
            Ok(()) => {
                info!(
                    stage = "provision",
                    order_id = %order.id,
                    tenant_id = %order.tenant_id,
                    "tenant custom domain updated"
                );
            }
            Err(err) => {
                counter!("tenant_update_failures_total").increment(1);
                error!(
                    stage = "provision",
                    order_id = %order.id,
                    tenant_id = %order.tenant_id,
                    error = %err,
                    "failed to update tenant custom domain"
                );
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionJob {
    pub order_id: String,
}

/// Hands orders to the background worker.
#[derive(Clone)]
pub struct ProvisioningService {
    sender: mpsc::Sender<ProvisionJob>,
    orders: DomainOrderRepository,
    clock: Clock,
}

impl ProvisioningService {
    pub fn new(orchestrator: ProvisioningOrchestrator) -> (Self, ProvisioningWorker) {
        let (sender, receiver) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let service = Self {
            sender,
            orders: orchestrator.orders.clone(),
            clock: orchestrator.clock.clone(),
        };
        let worker = ProvisioningWorker {
            orchestrator,
            receiver,
        };
        (service, worker)
    }

    pub async fn submit(&self, order_id: impl Into<String>) -> Result<(), ProvisionSubmitError> {
        self.sender
            .send(ProvisionJob {
                order_id: order_id.into(),
            })
            .await
            .map_err(|_| ProvisionSubmitError::ChannelClosed)
    }

    /// Persists a `pending` order for a paid domain and queues its provisioning.
    pub async fn create_order(
        &self,
        order: &NewDomainOrder<'_>,
    ) -> Result<DomainOrder, ProvisionSubmitError> {
        let created = self.orders.create(order, (self.clock)()).await?;
        info!(
            stage = "provision",
            order_id = %created.id,
            tenant_id = %created.tenant_id,
            domain = %created.domain,
            "domain order created"
        );
        self.submit(created.id.clone()).await?;
        Ok(created)
    }
}

#[derive(Debug, Error)]
pub enum ProvisionSubmitError {
    #[error("provisioning worker channel closed")]
    ChannelClosed,
    #[error("failed to create domain order: {0}")]
    Order(#[from] OrderError),
}

pub struct ProvisioningWorker {
    orchestrator: ProvisioningOrchestrator,
    receiver: mpsc::Receiver<ProvisionJob>,
}

impl ProvisioningWorker {
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(mut self) {
        self.resume_pending().await;
        while let Some(job) = self.receiver.recv().await {
            self.dispatch(job.order_id);
        }
        debug!(stage = "provision", "provisioning queue closed");
    }

    /// Restarts orders that were created but never picked up.
    async fn resume_pending(&self) {
        match self
            .orchestrator
            .orders
            .list_by_status(OrderStatus::Pending)
            .await
        {
            Ok(orders) => {
                if !orders.is_empty() {
                    info!(stage = "provision", count = orders.len(), "resuming pending orders");
                }
                for order in orders {
                    self.dispatch(order.id);
                }
            }
            Err(err) => {
                error!(stage = "provision", error = %err, "failed to load pending orders");
            }
        }
    }

    fn dispatch(&self, order_id: String) {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.run(&order_id).await;
        });
    }
}
