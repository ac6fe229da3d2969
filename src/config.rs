use std::path::PathBuf;

use crate::db::sqlite::default_db_path;

const DEFAULT_NATIVE_LANGUAGE: &str = "Romanian";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: PathBuf,
    pub native_language: String,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let db_path = std::env::var("TUTOR_DB_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);

        let native_language = std::env::var("TUTOR_NATIVE_LANGUAGE")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_NATIVE_LANGUAGE.to_string());

        Self {
            log_level,
            db_path,
            native_language,
        }
    }
}
