//! Application state - shared across all handlers.

use std::sync::Arc;

use stepwise_core::ports::{
    AssignmentRepository, IncidentReporter, InferenceError, InferenceProvider, StepRepository,
    WindowStore,
};
use stepwise_core::{RelayConfig, RequestGate, SlidingWindowLimiter, StreamRelay};
use stepwise_infra::{
    AnthropicConfig, AnthropicProvider, InMemoryAssignmentRepository, InMemoryStepRepository,
    InMemoryWindowStore,
};

use crate::config::{AppConfig, RateLimits, TokenBudgets, WindowStoreKind};

#[cfg(feature = "postgres")]
use stepwise_infra::database::DbConn;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<RequestGate>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub steps: Arc<dyn StepRepository>,
    pub incidents: Arc<dyn IncidentReporter>,
    pub limits: RateLimits,
    pub budgets: TokenBudgets,
}

/// Repositories plus the database handle the window store may share.
struct Persistence {
    assignments: Arc<dyn AssignmentRepository>,
    steps: Arc<dyn StepRepository>,
    #[cfg(feature = "postgres")]
    db: Option<DbConn>,
}

impl Persistence {
    fn in_memory() -> Self {
        Self {
            assignments: Arc::new(InMemoryAssignmentRepository::new()),
            steps: Arc::new(InMemoryStepRepository::new()),
            #[cfg(feature = "postgres")]
            db: None,
        }
    }
}

/// Ports the state is assembled from.
pub struct Services {
    pub store: Arc<dyn WindowStore>,
    pub provider: Arc<dyn InferenceProvider>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub steps: Arc<dyn StepRepository>,
    pub incidents: Arc<dyn IncidentReporter>,
}

impl AppState {
    /// Build the application state, falling back to in-memory stores for
    /// anything that is not configured or not reachable.
    pub async fn new(
        config: &AppConfig,
        incidents: Arc<dyn IncidentReporter>,
    ) -> Result<Self, InferenceError> {
        let persistence = persistence(config).await;
        let store = window_store(config, &persistence).await;
        let provider = Arc::new(AnthropicProvider::new(AnthropicConfig::from_env())?);

        tracing::info!("Application state initialized");

        let services = Services {
            store,
            provider,
            assignments: persistence.assignments,
            steps: persistence.steps,
            incidents,
        };
        Ok(Self::from_services(
            services,
            config.limits,
            config.budgets,
            config.relay.clone(),
        ))
    }

    /// Wire the gate from already-built ports.
    pub fn from_services(
        services: Services,
        limits: RateLimits,
        budgets: TokenBudgets,
        relay: RelayConfig,
    ) -> Self {
        let incidents = services.incidents;
        let limiter = Arc::new(
            SlidingWindowLimiter::new(services.store).with_incidents(incidents.clone()),
        );
        let relay = StreamRelay::new(services.provider, relay);
        let gate = RequestGate::new(limiter, relay).with_incidents(incidents.clone());

        Self {
            gate: Arc::new(gate),
            assignments: services.assignments,
            steps: services.steps,
            incidents,
            limits,
            budgets,
        }
    }

    pub fn window_store(&self) -> &Arc<dyn WindowStore> {
        self.gate.limiter().store()
    }
}

#[cfg(feature = "postgres")]
async fn persistence(config: &AppConfig) -> Persistence {
    use stepwise_infra::database::connect;
    use stepwise_infra::{PostgresAssignmentRepository, PostgresStepRepository};

    let Some(db_config) = &config.database else {
        tracing::warn!("DATABASE_URL not set. Running without database (in-memory mode).");
        return Persistence::in_memory();
    };

    match connect(db_config).await {
        Ok(db) => Persistence {
            assignments: Arc::new(PostgresAssignmentRepository::new(db.clone())),
            steps: Arc::new(PostgresStepRepository::new(db.clone())),
            db: Some(db),
        },
        Err(e) => {
            tracing::error!("Failed to connect to database: {}. Using in-memory fallback.", e);
            Persistence::in_memory()
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn persistence(_config: &AppConfig) -> Persistence {
    tracing::info!("Running without postgres feature - using in-memory repositories");
    Persistence::in_memory()
}

async fn window_store(
    config: &AppConfig,
    #[cfg_attr(not(feature = "postgres"), allow(unused_variables))] persistence: &Persistence,
) -> Arc<dyn WindowStore> {
    match config.window_store {
        WindowStoreKind::Memory => {}
        WindowStoreKind::Redis => {
            #[cfg(feature = "redis")]
            match stepwise_infra::RedisWindowStore::from_env().await {
                Ok(store) => return Arc::new(store),
                Err(e) => {
                    tracing::error!("Failed to connect to Redis: {}. Using in-memory window store.", e)
                }
            }
            #[cfg(not(feature = "redis"))]
            tracing::warn!("Built without redis feature. Using in-memory window store.");
        }
        WindowStoreKind::Postgres => {
            #[cfg(feature = "postgres")]
            match &persistence.db {
                Some(db) => return Arc::new(stepwise_infra::PostgresWindowStore::new(db.clone())),
                None => tracing::warn!("No database connection. Using in-memory window store."),
            }
            #[cfg(not(feature = "postgres"))]
            tracing::warn!("Built without postgres feature. Using in-memory window store.");
        }
    }

    tracing::info!("Rate limits are per process (in-memory window store)");
    Arc::new(InMemoryWindowStore::new())
}
