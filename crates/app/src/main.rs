use std::{net::SocketAddr, sync::Arc};

use famdomain_app::{
    cache::AvailabilityCache,
    provisioning::{ProvisioningOrchestrator, ProvisioningService},
    rate_limit::{FixedWindowRateLimiter, DEFAULT_WINDOW},
    router,
    search::DomainSearchEngine,
    telemetry,
};
use famdomain_registrar::{
    default_http_client, PlatformClient, PlatformSettings, Registrar, SpaceshipClient,
    SpaceshipSettings, UnconfiguredRegistrar,
};
use famdomain_storage::Database;
use famdomain_util::{load_env_file, AppConfig};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv_path = load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;
    if let Some(path) = dotenv_path {
        debug!(stage = "app", path = %path.display(), "loaded environment file");
    }

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let http = default_http_client()?;
    let registrar: Arc<dyn Registrar> = match config.registrar.clone() {
        Some(registrar) => {
            if registrar.contact_id.is_none() {
                warn!(stage = "app", "SPACESHIP_CONTACT_ID missing; registrations will fail");
            }
            Arc::new(SpaceshipClient::new(
                SpaceshipSettings {
                    base_url: registrar.base_url,
                    api_key: registrar.api_key,
                    api_secret: registrar.api_secret,
                    contact_id: registrar.contact_id,
                    cname_target: registrar.cname_target,
                },
                http.clone(),
            ))
        }
        None => {
            warn!(stage = "app", "registrar credentials missing; domain search disabled");
            Arc::new(UnconfiguredRegistrar)
        }
    };

    let platform_settings = config.platform.clone().map(|platform| PlatformSettings {
        api_url: platform.api_url,
        token: platform.token,
        service_id: platform.service_id,
        environment_id: platform.environment_id,
    });
    if platform_settings.is_none() {
        warn!(stage = "app", "hosting platform credentials missing; domains will activate unbound");
    }
    let platform = Arc::new(PlatformClient::new(platform_settings, http));

    let search = DomainSearchEngine::new(
        registrar.clone(),
        AvailabilityCache::new(config.search.cache_ttl),
    );

    let orchestrator = ProvisioningOrchestrator::new(
        database.domain_orders(),
        registrar,
        platform,
        Arc::new(database.tenants()),
    )
    .with_polling(
        config.provisioning.poll_interval,
        config.provisioning.max_polls,
    );
    let (provisioning, worker) = ProvisioningService::new(orchestrator);
    worker.spawn();

    let limiter = FixedWindowRateLimiter::new(config.search.rate_limit_per_minute, DEFAULT_WINDOW);
    spawn_limiter_sweep(limiter.clone());

    let state = router::AppState::new(metrics, database, search, provisioning, limiter);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router::app_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|err| err.into())
}

fn spawn_limiter_sweep(limiter: FixedWindowRateLimiter) {
    tokio::spawn(async move {
        let mut ticker = interval(limiter.window());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = limiter.purge_expired();
            if purged > 0 {
                debug!(stage = "app", purged, "expired rate limit windows dropped");
            }
        }
    });
}
