pub mod codec;
pub mod gateway;
pub mod gemini;
pub mod history;
pub mod model;
pub mod prompts;
pub mod settings;
pub mod storage;
pub mod studio;
pub mod utils;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub use gateway::{GenerationError, GenerationGateway, ImageService};
pub use gemini::GeminiClient;
pub use history::HistoryStore;
pub use model::{
    AspectRatio, CreateFunction, EditFunction, GenerationResult, HistoryEntry, ImageInput, Mode,
    Slot,
};
pub use settings::Settings;
pub use storage::{KvStore, MemoryStore, SqliteStore};
pub use studio::{StudioController, StudioError, StudioState};

use crate::settings::load_settings_from_dir;
use crate::utils::{db_path, log_dir};

/// The production wiring: Gemini over HTTP, history in SQLite.
pub type Studio = StudioController<GeminiClient, SqliteStore>;

// ===== Startup =====

/// Logs go to a daily file under `<data dir>/logs`; keep the guard alive for
/// the life of the process so buffered lines are flushed.
pub fn init_tracing(data_dir: &Path) -> Result<WorkerGuard> {
    let appender = tracing_appender::rolling::daily(log_dir(data_dir), "studio.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter =
        EnvFilter::try_from_env("HYDRA_STUDIO_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing init: {e}"))?;
    Ok(guard)
}

pub async fn open_studio(data_dir: &Path) -> Result<Studio> {
    let settings = load_settings_from_dir(data_dir);
    let client = GeminiClient::new(&settings);
    let store = SqliteStore::open(&db_path(data_dir))
        .await
        .context("open history storage")?;

    let studio = StudioController::new(
        GenerationGateway::new(Arc::new(client)),
        HistoryStore::new(Arc::new(store)),
        settings,
    )
    .await;
    tracing::info!(
        data_dir = %data_dir.display(),
        history = studio.state().history.len(),
        "studio ready"
    );
    Ok(studio)
}
