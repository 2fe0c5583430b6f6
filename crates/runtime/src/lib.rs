use std::sync::Arc;

use anyhow::{bail, Context, Result};
use crossbar_commands::{
    MemoryPreferenceStore, MemoryWelcomeStore, PreferenceStore, SqlitePreferenceStore,
    SqliteWelcomeStore, WelcomeStore,
};
use crossbar_config::AppConfig;
use crossbar_database::{
    initialize_database, CorrelationRepository, PreferenceRepository, WelcomeRepository,
};
use crossbar_gateway::{CorrelationStore, DurableCorrelationStore, HttpTranslator, Translator};
use crossbar_router::{CorrelationBackend, RouterServices};
use sqlx::SqlitePool;
use tracing::info;

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::TRACE)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// The stores and clients the router needs, built from configuration.
#[derive(Clone)]
pub struct RelayServices {
    /// Present only when some relay state is meant to survive restarts.
    pub db_pool: Option<SqlitePool>,
    pub router: RouterServices,
}

impl RelayServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let general = &config.general;
        let translator = HttpTranslator::from_config(&general.translation)
            .context("failed to build translation client")?
            .map(|translator| Arc::new(translator) as Arc<dyn Translator>);
        if translator.is_some() {
            info!("translation enabled");
        }

        if !config.database.enabled() {
            info!("relay state kept in memory");
            let mut router = RouterServices::in_memory(general.message_cache_size);
            router.translator = translator;
            return Ok(Self {
                db_pool: None,
                router,
            });
        }

        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to initialise relay database")?;

        let correlation = if config.database.durable_correlation {
            CorrelationBackend::Durable {
                repository: CorrelationRepository::new(db_pool.clone()),
                max_rows: config.database.max_correlation_rows,
            }
        } else {
            CorrelationBackend::Memory {
                capacity: general.message_cache_size,
            }
        };

        let (preferences, welcomes): (Arc<dyn PreferenceStore>, Arc<dyn WelcomeStore>) =
            if config.database.persist_preferences {
                (
                    Arc::new(SqlitePreferenceStore::new(PreferenceRepository::new(
                        db_pool.clone(),
                    ))),
                    Arc::new(SqliteWelcomeStore::new(WelcomeRepository::new(
                        db_pool.clone(),
                    ))),
                )
            } else {
                (
                    Arc::new(MemoryPreferenceStore::new()),
                    Arc::new(MemoryWelcomeStore::new()),
                )
            };

        info!(
            correlation = correlation.name(),
            persist_preferences = config.database.persist_preferences,
            "relay state opened"
        );

        Ok(Self {
            db_pool: Some(db_pool),
            router: RouterServices {
                correlation,
                preferences,
                welcomes,
                translator,
            },
        })
    }
}

/// Trim every gateway's durable correlation window to the configured cap.
/// Returns the number of origins removed.
pub async fn prune_correlation(config: &AppConfig) -> Result<u64> {
    if !config.database.durable_correlation {
        bail!("durable correlation is disabled, nothing to prune");
    }
    let pool = initialize_database(&config.database)
        .await
        .context("failed to initialise relay database")?;
    let repository = CorrelationRepository::new(pool);

    let mut removed = 0;
    for gateway in repository
        .gateways()
        .await
        .context("failed to list correlated gateways")?
    {
        let store = DurableCorrelationStore::new(
            gateway.as_str(),
            repository.clone(),
            config.database.max_correlation_rows,
        );
        let trimmed = store
            .maintain()
            .await
            .with_context(|| format!("failed to prune gateway {gateway}"))?;
        info!(gateway = %gateway, removed = trimmed, "pruned correlation window");
        removed += trimmed;
    }
    Ok(removed)
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
