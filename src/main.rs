use powerdial::application::{
    CallSessionManager, CreditLedger, DispositionCapture, EventBroadcaster, PowerDialer,
};
use powerdial::config::{Config, ProviderKind};
use powerdial::domain::dialer::DialQueueRepository;
use powerdial::domain::disposition::FollowUpRepository;
use powerdial::domain::lead::{Lead, LeadStore};
use powerdial::domain::ledger::LedgerStore;
use powerdial::domain::session::SessionRepository;
use powerdial::infrastructure::persistence::{
    InMemoryDialQueueRepository, InMemoryFollowUpRepository, InMemoryLeadStore,
    InMemoryLedgerStore, InMemorySessionRepository,
};
use powerdial::infrastructure::telephony::SimulatedProvider;
use powerdial::interface::api::{build_router, init_metrics, AppState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "postgres")]
use powerdial::infrastructure::persistence::{
    create_pool, run_migrations, DatabaseConfig, PgDialQueueRepository, PgFollowUpRepository,
    PgLedgerStore, PgSessionRepository,
};

/// Provider status events waiting for the session manager
const PROVIDER_EVENT_BUFFER: usize = 1024;

struct Stores {
    ledger: Arc<dyn LedgerStore>,
    sessions: Arc<dyn SessionRepository>,
    follow_ups: Arc<dyn FollowUpRepository>,
    queues: Arc<dyn DialQueueRepository>,
}

fn memory_stores() -> Stores {
    Stores {
        ledger: Arc::new(InMemoryLedgerStore::new()),
        sessions: Arc::new(InMemorySessionRepository::new()),
        follow_ups: Arc::new(InMemoryFollowUpRepository::new()),
        queues: Arc::new(InMemoryDialQueueRepository::new()),
    }
}

#[cfg(feature = "postgres")]
async fn build_stores(config: &Config) -> anyhow::Result<Stores> {
    let Some(url) = &config.database.url else {
        info!("No database configured, using in-memory stores");
        return Ok(memory_stores());
    };

    let pool = create_pool(&DatabaseConfig::with_url(
        url.clone(),
        config.database.max_connections,
    ))
    .await?;
    run_migrations(&pool).await?;

    Ok(Stores {
        ledger: Arc::new(PgLedgerStore::new(pool.clone())),
        sessions: Arc::new(PgSessionRepository::new(pool.clone())),
        follow_ups: Arc::new(PgFollowUpRepository::new(pool.clone())),
        queues: Arc::new(PgDialQueueRepository::new(pool)),
    })
}

#[cfg(not(feature = "postgres"))]
async fn build_stores(config: &Config) -> anyhow::Result<Stores> {
    if config.database.url.is_some() {
        warn!("Built without the postgres feature, ignoring database.url");
    }
    Ok(memory_stores())
}

async fn load_leads(config: &Config) -> anyhow::Result<InMemoryLeadStore> {
    let store = InMemoryLeadStore::new();
    if let Some(path) = &config.dialer.leads_file {
        let raw = tokio::fs::read_to_string(path).await?;
        let leads: Vec<Lead> = serde_json::from_str(&raw)?;
        let count = leads.len();
        for lead in leads {
            store.insert(lead).await;
        }
        info!("Loaded {} leads from {}", count, path);
    }
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "--print-config") {
        println!("{}", Config::default_toml()?);
        return Ok(());
    }

    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting PowerDial");
    info!("Configuration loaded: {:?}", config);

    info!("Initializing Prometheus metrics exporter");
    let prometheus_handle = init_metrics();

    let stores = build_stores(&config).await?;
    let leads: Arc<dyn LeadStore> = Arc::new(load_leads(&config).await?);

    let (provider_tx, provider_rx) = mpsc::channel(PROVIDER_EVENT_BUFFER);
    let provider = match config.provider.kind {
        ProviderKind::Simulated => {
            info!("Using simulated telephony provider");
            Arc::new(SimulatedProvider::new(config.simulated_behaviour(), provider_tx))
        }
    };

    let ledger = Arc::new(CreditLedger::new(
        stores.ledger,
        config.credit_rate(),
        config.billing_cycle(),
    ));
    let dispositions = Arc::new(DispositionCapture::new(stores.follow_ups));

    let sessions = CallSessionManager::new(
        ledger,
        provider,
        stores.sessions,
        leads.clone(),
        dispositions.clone(),
        EventBroadcaster::new(),
        config.session_settings(),
    );
    let dialer = PowerDialer::new(
        sessions.clone(),
        leads,
        stores.queues,
        dispositions,
        config.dialer.estimated_max_seconds,
    );

    for caller_id in &config.dialer.caller_ids {
        sessions
            .register_caller_id(caller_id.tenant_id, caller_id.number.clone())
            .await;
    }

    let consumer = sessions.spawn_event_consumer(provider_rx);
    let listener_task = dialer.spawn_listener();

    match sessions.recover().await {
        Ok(count) => info!("Recovered {} unfinished sessions", count),
        Err(e) => warn!("Session recovery failed: {}", e),
    }
    if let Err(e) = dialer.recover().await {
        warn!("Dial queue recovery failed: {}", e);
    }
    let reconcile_task = sessions.spawn_reconcile_loop(config.reconcile_interval());

    let app = build_router(AppState::new(sessions, dialer), prometheus_handle);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!("REST API server listening on {}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;

    reconcile_task.abort();
    listener_task.abort();
    consumer.abort();
    info!("PowerDial stopped");

    Ok(())
}
