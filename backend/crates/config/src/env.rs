use serde::Deserialize;
use std::env;
use tidemark_common::error::{TidemarkError, TidemarkResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub sync_plan_path: String,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> TidemarkResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            sync_plan_path: get_var_or("SYNC_PLAN_PATH", "sync_plan.json"),
            log_level: get_var_or("LOG_LEVEL", "info"),
        })
    }
}

fn get_var(key: &str) -> TidemarkResult<String> {
    env::var(key).map_err(|_| TidemarkError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn config_from_env_succeeds_with_required_vars() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::set_var("DATABASE_URL", "postgres://localhost/tidemark_test");
        env::remove_var("SYNC_PLAN_PATH");
        env::remove_var("LOG_LEVEL");

        let cfg = AppConfig::from_env().expect("should parse config");
        assert_eq!(cfg.database_url, "postgres://localhost/tidemark_test");
        assert_eq!(cfg.sync_plan_path, "sync_plan.json");
        assert_eq!(cfg.log_level, "info");

        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn config_from_env_reads_overrides() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::set_var("DATABASE_URL", "postgres://localhost/tidemark_test");
        env::set_var("SYNC_PLAN_PATH", "/etc/tidemark/plan.json");
        env::set_var("LOG_LEVEL", "debug");

        let cfg = AppConfig::from_env().expect("should parse config");
        assert_eq!(cfg.sync_plan_path, "/etc/tidemark/plan.json");
        assert_eq!(cfg.log_level, "debug");

        env::remove_var("DATABASE_URL");
        env::remove_var("SYNC_PLAN_PATH");
        env::remove_var("LOG_LEVEL");
    }

    #[test]
    fn config_from_env_fails_without_database_url() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::remove_var("DATABASE_URL");
        let result = AppConfig::from_env();
        assert!(matches!(result, Err(TidemarkError::Config(_))));
    }
}
