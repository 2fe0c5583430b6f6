use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use crossbar_commands::UserPreference;
use crossbar_config::AppConfig;
use crossbar_database::{CorrelationRepository, CorrelationRow, OriginRef};
use crossbar_router::CorrelationBackend;
use crossbar_runtime::{self, prune_correlation, RelayServices};
use sqlx::Row;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}", path.to_string_lossy())
}

fn build_config(database_url: String, max_connections: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = database_url;
    config.database.max_connections = max_connections;
    config.database.durable_correlation = true;
    config.database.persist_preferences = true;
    config
}

async fn initialise(config: &AppConfig) -> Result<RelayServices> {
    RelayServices::initialise(config)
        .await
        .context("failed to initialise relay services")
}

fn pool(services: &RelayServices) -> &sqlx::SqlitePool {
    services
        .db_pool
        .as_ref()
        .expect("durable configuration should open a pool")
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_runs_migrations_and_selects_durable_stores() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("runtime/init.db");
    let config = build_config(sqlite_url(&db_path), 4);

    let services = initialise(&config).await?;
    let table: String = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'correlation_entries'",
    )
    .fetch_one(pool(&services))
    .await?;
    assert_eq!("correlation_entries", table);
    assert!(matches!(
        services.router.correlation,
        CorrelationBackend::Durable { .. }
    ));
    assert!(services.router.translator.is_none());

    drop(services);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn memory_only_configuration_opens_no_database() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("never.db");
    let mut config = build_config(sqlite_url(&db_path), 1);
    config.database.durable_correlation = false;
    config.database.persist_preferences = false;

    let services = initialise(&config).await?;
    assert!(services.db_pool.is_none());
    assert_eq!(services.router.correlation.name(), "memory");
    assert!(!db_path.exists(), "memory-only relay must not touch the filesystem");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn persisted_preferences_survive_reinitialisation() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("prefs.db");
    let config = build_config(sqlite_url(&db_path), 2);

    let services = initialise(&config).await?;
    services
        .router
        .preferences
        .put(
            "u-1",
            UserPreference {
                opt_out: true,
                ..Default::default()
            },
        )
        .await?;
    drop(services);

    let services = initialise(&config).await?;
    let preference = services.router.preferences.get("u-1").await?;
    assert!(preference.is_some_and(|p| p.opt_out));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn prepare_database_creates_sqlite_directory_if_missing() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_dir = temp_dir.path().join("nested");
    let db_path = db_dir.join("prepared.db");
    let config = build_config(sqlite_url(&db_path), 2);

    assert!(!db_dir.exists());

    let services = initialise(&config).await?;
    assert!(db_dir.exists(), "database directory should be created");
    drop(services);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn prepare_database_applies_max_connections_setting() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("runtime/max_conn.db");
    let max_connections = 3;
    let config = build_config(sqlite_url(&db_path), max_connections);

    let services = initialise(&config).await?;
    assert_eq!(
        max_connections,
        pool(&services).options().get_max_connections()
    );

    drop(services);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn in_memory_database_creates_no_files() -> Result<()> {
    let config = build_config("sqlite://:memory:".into(), 1);
    let services = initialise(&config).await?;

    let databases = sqlx::query("PRAGMA database_list")
        .fetch_all(pool(&services))
        .await?;
    let main_db = databases
        .into_iter()
        .find(|row| {
            row.try_get::<String, _>("name")
                .map(|name| name == "main")
                .unwrap_or(false)
        })
        .context("expected main in PRAGMA database_list")?;
    let file: String = main_db.try_get("file")?;
    assert!(
        file.is_empty(),
        "in-memory sqlite database should not create filesystem entries"
    );

    drop(services);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn non_sqlite_urls_fail_without_touching_the_filesystem() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let target_dir = temp_dir.path().join("should_not_exist");
    let malformed_url = format!("postgres://{}/ignored.db", target_dir.to_string_lossy());
    let config = build_config(malformed_url, 1);

    let error = match RelayServices::initialise(&config).await {
        Ok(_) => panic!("expected sqlite connection to fail for non-sqlite URL"),
        Err(error) => error,
    };
    assert!(
        !target_dir.exists(),
        "non-sqlite URLs must not create filesystem structures"
    );
    let message = format!("{error:#}");
    assert!(
        message.contains("failed to initialise relay database"),
        "expected database initialisation context, got {message}"
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn prune_trims_every_gateway_to_the_row_cap() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("prune.db");
    let mut config = build_config(sqlite_url(&db_path), 1);
    config.database.max_correlation_rows = 2;

    let services = initialise(&config).await?;
    let repository = CorrelationRepository::new(pool(&services).clone());
    for gateway in ["main", "mirror"] {
        for id in 0..5 {
            let row = CorrelationRow {
                dest_account: "slack.team".to_string(),
                dest_id: format!("{gateway}-{id}"),
                dest_channel: "generalslack.team".to_string(),
            };
            repository
                .record(gateway, &OriginRef::new("irc.net", id.to_string()), &[row])
                .await?;
        }
    }
    drop(services);

    let removed = prune_correlation(&config).await?;
    assert_eq!(removed, 6);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn prune_refuses_without_durable_correlation() {
    let mut config = build_config("sqlite://:memory:".into(), 1);
    config.database.durable_correlation = false;
    assert!(prune_correlation(&config).await.is_err());
}

#[test]
fn telemetry_init_tracing_sets_global_subscriber() {
    crossbar_runtime::telemetry::init_tracing().expect("first initialisation should succeed");

    let second = crossbar_runtime::telemetry::init_tracing();
    assert!(
        second.is_err(),
        "initialising telemetry twice should fail with global subscriber already set"
    );
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(unix), ignore = "requires Unix signal handling")]
async fn shutdown_signal_completes_on_ctrl_c_notification() -> Result<()> {
    let shutdown_task = tokio::spawn(async { crossbar_runtime::shutdown_signal().await });

    sleep(Duration::from_millis(50)).await;
    #[cfg(unix)]
    unsafe {
        libc::raise(libc::SIGINT);
    }

    timeout(Duration::from_secs(2), shutdown_task).await??;
    Ok(())
}
