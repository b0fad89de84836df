use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub fn app_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("app", "hydra", "hydra-studio")
        .ok_or_else(|| anyhow!("cannot resolve project dirs"))
}

/// `HYDRA_STUDIO_DATA_DIR` wins over the platform data dir.
pub fn ensure_data_dir() -> Result<PathBuf> {
    let data_dir = match std::env::var_os("HYDRA_STUDIO_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => app_dirs()?.data_dir().to_path_buf(),
    };
    fs::create_dir_all(&data_dir).context("create data dir")?;
    Ok(data_dir)
}

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("studio.sqlite")
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

pub fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
