//! # Configuration Module
//!
//! Configuration structures for the engine, the recommendation scorer and
//! the Postgres document store, with defaults and environment loading.

use anyhow::{Context, Result};
use std::env;
use std::path::Path;

// Constants for engine configuration
pub const DEFAULT_MAX_RECIPES: usize = 50;
pub const DEFAULT_LIST_COVERAGE_WEIGHT: f64 = 0.2;
pub const DEFAULT_RECIPE_COVERAGE_WEIGHT: f64 = 0.8;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Recovery configuration for document store errors
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// Maximum number of retry attempts after the first failure
    pub max_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay_ms: 100,
            max_retry_delay_ms: 2000,
        }
    }
}

/// Recipe recommendation settings
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    /// Candidates kept after match counting
    pub max_recipes: usize,
    /// Weight of the share of queried ingredients a recipe uses
    pub list_coverage_weight: f64,
    /// Weight of the share of a recipe's ingredients that were queried
    pub recipe_coverage_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_recipes: DEFAULT_MAX_RECIPES,
            list_coverage_weight: DEFAULT_LIST_COVERAGE_WEIGHT,
            recipe_coverage_weight: DEFAULT_RECIPE_COVERAGE_WEIGHT,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Postgres connection string
    pub database_url: String,
    /// Pool size for the document store
    pub max_connections: u32,
    /// Recommendation settings
    pub scoring: ScoringConfig,
    /// Document store retry settings
    pub recovery: RecoveryConfig,
}

impl EngineConfig {
    /// Build the configuration from environment variables
    ///
    /// `DATABASE_URL` is required; every other setting falls back to its default.
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let defaults = RecoveryConfig::default();
        let recovery = RecoveryConfig {
            max_retries: parse_var("PANTRY_DB_MAX_RETRIES", defaults.max_retries)?,
            base_retry_delay_ms: parse_var(
                "PANTRY_DB_RETRY_DELAY_MS",
                defaults.base_retry_delay_ms,
            )?,
            max_retry_delay_ms: parse_var(
                "PANTRY_DB_MAX_RETRY_DELAY_MS",
                defaults.max_retry_delay_ms,
            )?,
        };

        let scoring = ScoringConfig {
            max_recipes: parse_var("PANTRY_MAX_RECIPES", DEFAULT_MAX_RECIPES)?,
            ..ScoringConfig::default()
        };

        Ok(Self {
            database_url,
            max_connections: parse_var("PANTRY_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            scoring,
            recovery,
        })
    }

    /// Load a `.env` file (if any) and then read the environment
    pub fn load(dotenv_path: Option<&Path>) -> Result<Self> {
        match dotenv_path {
            Some(path) => {
                dotenv::from_path(path)
                    .with_context(|| format!("Failed to load env file {}", path.display()))?;
            }
            None => {
                dotenv::dotenv().ok();
            }
        }
        Self::from_env()
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {name}: {raw}")),
        Err(_) => Ok(default),
    }
}
