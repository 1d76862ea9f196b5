//! AuthBridge server binary
//!
//! Loads `.env`, installs logging, picks a store and runs the bridge.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use authbridge_core::{branding, OAuthClientProvider};
use authbridge_gateway::{BridgeConfig, GatewayServer, MemoryOAuthClientProvider, ProviderRegistry};
use authbridge_storage::{Database, FieldEncryptor, SqliteOAuthClientProvider};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Local data directory for logs
///
/// - Linux: ~/.local/share/authbridge/
/// - macOS: ~/Library/Application Support/authbridge/
/// - Windows: %LOCALAPPDATA%/authbridge/
fn get_app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(branding::SERVER_NAME)
}

/// Console (compact, colored) plus a daily rolling file under the data dir.
///
/// The returned guard flushes the file writer and must outlive the server.
fn init_tracing() -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let logs_dir = get_app_data_dir().join("logs");
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
    }

    // authbridge.2026-10-19.log
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(branding::LOG_PREFIX)
        .filename_suffix("log")
        .build(&logs_dir)
        .context("Failed to create log file appender")?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info")
            .add_directive("authbridge_core=debug".parse()?)
            .add_directive("authbridge_gateway=debug".parse()?)
            .add_directive("authbridge_storage=debug".parse()?)
            .add_directive("rmcp=info".parse()?)
            .add_directive("tower_http=info".parse()?),
    };

    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// SQLite when a database path is configured, memory otherwise
fn open_store(config: &BridgeConfig) -> anyhow::Result<Arc<dyn OAuthClientProvider>> {
    let Some(path) = config.database_path.as_ref() else {
        info!("[Storage] Using in-memory store (sessions are lost on restart)");
        return Ok(Arc::new(MemoryOAuthClientProvider::new()));
    };

    // Encrypted rows are unreadable after a restart unless the key is stable
    let Some(secret) = config.session_secret.as_ref() else {
        bail!("BRIDGE_DATABASE_PATH requires BRIDGE_SESSION_SECRET (64 hex chars)");
    };

    let db = Database::open(path)?;
    let encryptor = FieldEncryptor::new(secret)?;
    info!("[Storage] Using SQLite store at {:?}", path);
    Ok(Arc::new(SqliteOAuthClientProvider::new(
        Arc::new(Mutex::new(db)),
        Arc::new(encryptor),
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _guard = init_tracing()?;

    info!("{} v{}", branding::DISPLAY_NAME, env!("CARGO_PKG_VERSION"));

    let config = BridgeConfig::from_env()?;
    info!("[Gateway] Configuration: {:?}", config);

    let registry = ProviderRegistry::from_config(&config.providers, config.provider_timeout)?;
    if registry.is_empty() {
        warn!("[Gateway] Set ATLASSIAN_CLIENT_ID, FIGMA_CLIENT_ID or GOOGLE_CLIENT_ID to enable a provider");
    }

    let store = open_store(&config)?;
    let server = GatewayServer::new(config, store, registry)?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("[Gateway] Shutting down");
            Ok(())
        }
    }
}
