//! Metal Recovery Platform - Business Core
//!
//! A system for precious-metals refineries to track client metal
//! accounts, chemical analyses, recovery orders, FIFO stock and
//! settlement against daily quotations.

use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;
pub mod error;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};

use services::{
    analysis::AnalysisService, inventory::InventoryService, ledger::LedgerService,
    quotation::QuotationService, recovery::RecoveryService, settlement::SettlementService,
};

/// Application state shared across embedders
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<Config>,
}

/// Initialize tracing with an env-filter default suitable for the core
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metal_recovery_backend=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

impl AppState {
    /// Build state from an existing pool and configuration
    pub fn new(db: sqlx::PgPool, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }

    /// Load configuration, connect the pool and run development migrations
    pub async fn initialize() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = Config::load()?;

        tracing::info!("Starting Metal Recovery Platform core");
        tracing::info!("Environment: {}", config.environment);

        tracing::info!("Connecting to database...");
        let db_pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
            .connect(&config.database.url)
            .await?;

        tracing::info!("Database connection established");

        // Run migrations in development
        if config.environment == "development" {
            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&db_pool).await?;
            tracing::info!("Migrations completed");
        }

        Ok(Self::new(db_pool, config))
    }

    /// Quotation service bound to this state's pool
    pub fn quotations(&self) -> QuotationService {
        QuotationService::new(self.db.clone())
    }

    /// Metal account ledger service bound to this state's pool
    pub fn ledger(&self) -> LedgerService {
        LedgerService::new(self.db.clone())
    }

    /// Inventory service bound to this state's pool
    pub fn inventory(&self) -> InventoryService {
        InventoryService::new(self.db.clone())
    }

    /// Analysis service bound to this state's pool and defaults
    pub fn analyses(&self) -> AnalysisService {
        AnalysisService::new(self.db.clone(), self.config.refining.clone())
    }

    /// Recovery order service bound to this state's pool
    pub fn recovery(&self) -> RecoveryService {
        RecoveryService::new(self.db.clone())
    }

    /// Settlement service bound to this state's pool and defaults
    pub fn settlements(&self) -> SettlementService {
        SettlementService::new(self.db.clone(), self.config.refining.clone())
    }
}
