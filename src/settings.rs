use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_CREATE_MODEL: &str = "imagen-4.0-generate-001";
pub const DEFAULT_EDIT_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_DOWNLOAD_PREFIX: &str = "hydra-studios-image";

/// Unset fields fall back to the defaults above and are left out of the file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_prefix: Option<String>,
    /// Open the result view as soon as a generation lands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compact_layout: Option<bool>,
}

impl Settings {
    pub fn api_key(&self) -> Option<String> {
        self.gemini_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
    }

    pub fn base_url(&self) -> &str {
        self.gemini_base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn create_model(&self) -> &str {
        self.create_model.as_deref().unwrap_or(DEFAULT_CREATE_MODEL)
    }

    pub fn edit_model(&self) -> &str {
        self.edit_model.as_deref().unwrap_or(DEFAULT_EDIT_MODEL)
    }

    pub fn download_prefix(&self) -> &str {
        self.download_prefix
            .as_deref()
            .unwrap_or(DEFAULT_DOWNLOAD_PREFIX)
    }

    pub fn compact_layout(&self) -> bool {
        self.compact_layout.unwrap_or(false)
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn load_settings_from_dir(data_dir: &Path) -> Settings {
    let path = settings_path(data_dir);
    if let Ok(bytes) = fs::read(&path) {
        if let Ok(s) = serde_json::from_slice::<Settings>(&bytes) {
            return s;
        }
    }
    Settings::default()
}

/// Writes `settings.json`, creating the data dir if needed. Returns the path.
pub fn save_settings_to_dir(data_dir: &Path, settings: &Settings) -> Result<PathBuf> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("create data dir {}", data_dir.display()))?;
    let path = settings_path(data_dir);
    let json = serde_json::to_vec_pretty(settings).context("serialize settings")?;
    fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from_dir(dir.path());
        assert_eq!(s.create_model(), DEFAULT_CREATE_MODEL);
        assert_eq!(s.edit_model(), DEFAULT_EDIT_MODEL);
        assert_eq!(s.download_prefix(), DEFAULT_DOWNLOAD_PREFIX);
        assert!(!s.compact_layout());

        fs::write(settings_path(dir.path()), b"{ nope").unwrap();
        assert!(load_settings_from_dir(dir.path()).create_model.is_none());
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested");
        let s = Settings {
            gemini_base_url: Some("http://localhost:9000/v1/".into()),
            edit_model: Some("custom-edit".into()),
            compact_layout: Some(true),
            ..Settings::default()
        };
        let path = save_settings_to_dir(&data_dir, &s).unwrap();
        assert_eq!(path, settings_path(&data_dir));

        let written: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert!(written.get("gemini_api_key").is_none());
        assert_eq!(written["edit_model"], "custom-edit");

        let loaded = load_settings_from_dir(&data_dir);
        assert!(loaded.gemini_api_key.is_none());
        assert_eq!(loaded.base_url(), "http://localhost:9000/v1");
        assert_eq!(loaded.edit_model(), "custom-edit");
        assert!(loaded.compact_layout());
    }
}
