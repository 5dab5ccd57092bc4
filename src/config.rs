use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

use crate::auth::HashCost;

/// Which backing file a store is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreMode {
    #[default]
    Production,
    Test,
}

impl FromStr for StoreMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(StoreMode::Production),
            "test" => Ok(StoreMode::Test),
            other => anyhow::bail!("unknown STORE_MODE {other:?}, expected production or test"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub test_database_path: PathBuf,
    pub mode: StoreMode,
    /// PHC string the destructive-deletion code must verify against.
    pub delete_confirmation_hash: Option<String>,
    pub hash_cost: HashCost,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("accounts.db"),
            test_database_path: PathBuf::from("accounts_test.db"),
            mode: StoreMode::Production,
            delete_confirmation_hash: None,
            hash_cost: HashCost::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let default_cost = defaults.hash_cost;

        let mode = match std::env::var("STORE_MODE") {
            Ok(v) => v.parse()?,
            Err(_) => StoreMode::Production,
        };

        Ok(Self {
            database_path: std::env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            test_database_path: std::env::var("TEST_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.test_database_path),
            mode,
            delete_confirmation_hash: std::env::var("DELETE_CONFIRMATION_HASH")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            hash_cost: HashCost {
                memory_kib: env_u32("HASH_MEMORY_KIB", default_cost.memory_kib)?,
                iterations: env_u32("HASH_ITERATIONS", default_cost.iterations)?,
                parallelism: env_u32("HASH_PARALLELISM", default_cost.parallelism)?,
            },
        })
    }

    /// Backing file for the given mode.
    pub fn path_for(&self, mode: StoreMode) -> &PathBuf {
        match mode {
            StoreMode::Production => &self.database_path,
            StoreMode::Test => &self.test_database_path,
        }
    }

    pub fn active_path(&self) -> &PathBuf {
        self.path_for(self.mode)
    }
}

fn env_u32(key: &str, default: u32) -> anyhow::Result<u32> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<u32>()
            .with_context(|| format!("{key} must be an unsigned integer, got {v:?}")),
        Err(_) => Ok(default),
    }
}
