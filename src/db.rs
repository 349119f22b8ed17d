//! # Postgres Document Store
//!
//! Postgres implementation of the three collaborators. Each user aggregate is
//! one JSONB document guarded by a version column; recipes keep their
//! ingredient requirements in JSONB; ingredients keep back-references to the
//! recipes using them and the months they are out of season.
//!
//! Transient connection errors are retried with exponential backoff and
//! jitter, according to [`RecoveryConfig`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::collaborators::{
    DocumentStore, IngredientStore, ListRemoval, RecipeId, RecipeIngredientRequirement,
    RecipeRecord, RecipeStore, SavedRecipeRef, UserAggregate, UserId, UserParameters,
};
use crate::config::{EngineConfig, RecoveryConfig};
use crate::errors::{EngineError, EngineResult, EntityKind};
use crate::quantity_algebra::{FoodList, IngredientId};

/// JSONB body of a user row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDocument {
    #[serde(default)]
    saved_recipes: Vec<SavedRecipeRef>,
    #[serde(default)]
    fridge: FoodList,
    #[serde(default)]
    shopping_list: FoodList,
    #[serde(default)]
    parameters: UserParameters,
}

impl From<&UserAggregate> for UserDocument {
    fn from(user: &UserAggregate) -> Self {
        Self {
            saved_recipes: user.saved_recipes.clone(),
            fridge: user.fridge.clone(),
            shopping_list: user.shopping_list.clone(),
            parameters: user.parameters.clone(),
        }
    }
}

/// JSONB body of a recipe row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecipeDocument {
    #[serde(default)]
    ingredients: Vec<RecipeIngredientRequirement>,
    #[serde(default)]
    total_time_minutes: Option<u32>,
    #[serde(default)]
    picture: Option<String>,
}

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id BIGSERIAL PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            document JSONB NOT NULL DEFAULT '{}'::jsonb,
            version BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create users table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS recipes (
            id BIGSERIAL PRIMARY KEY,
            title TEXT NOT NULL,
            document JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create recipes table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ingredients (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            recipe_ids BIGINT[] NOT NULL DEFAULT '{}',
            unavailable_months INTEGER[] NOT NULL DEFAULT '{}'
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create ingredients table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ingredients_recipe_ids_idx
         ON ingredients USING GIN (recipe_ids)",
    )
    .execute(pool)
    .await
    .context("Failed to create ingredient back-reference index")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Create a user with empty lists
pub async fn create_user(pool: &PgPool, email: &str) -> Result<UserId> {
    let document = Json(UserDocument::default());
    let id: i64 =
        sqlx::query_scalar("INSERT INTO users (email, document) VALUES ($1, $2) RETURNING id")
            .bind(email)
            .bind(document)
            .fetch_one(pool)
            .await
            .context("Failed to insert new user")?;

    info!(user_id = id, "User created");
    Ok(UserId(id))
}

/// Get or create an ingredient by name
pub async fn get_or_create_ingredient(pool: &PgPool, name: &str) -> Result<IngredientId> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO ingredients (name) VALUES ($1)
         ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
         RETURNING id",
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .context("Failed to upsert ingredient")?;

    Ok(IngredientId(id))
}

/// Flag the months (1-12) during which an ingredient is out of season
pub async fn set_unavailable_months(
    pool: &PgPool,
    ingredient_id: IngredientId,
    months: &[u32],
) -> Result<bool> {
    let months: Vec<i32> = months.iter().map(|m| *m as i32).collect();
    let rows_affected = sqlx::query("UPDATE ingredients SET unavailable_months = $1 WHERE id = $2")
        .bind(&months)
        .bind(ingredient_id.0)
        .execute(pool)
        .await
        .context("Failed to update ingredient seasonality")?
        .rows_affected();

    Ok(rows_affected > 0)
}

/// Store a recipe and register it on each of its ingredients
pub async fn create_recipe(
    pool: &PgPool,
    title: &str,
    ingredients: Vec<RecipeIngredientRequirement>,
) -> Result<RecipeId> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let ingredient_ids: Vec<i64> = ingredients
        .iter()
        .map(|requirement| requirement.ingredient_id.0)
        .collect();
    let document = Json(RecipeDocument {
        ingredients,
        ..RecipeDocument::default()
    });

    let id: i64 =
        sqlx::query_scalar("INSERT INTO recipes (title, document) VALUES ($1, $2) RETURNING id")
            .bind(title)
            .bind(document)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to insert recipe")?;

    sqlx::query(
        "UPDATE ingredients SET recipe_ids = array_append(recipe_ids, $1)
         WHERE id = ANY($2) AND NOT ($1 = ANY(recipe_ids))",
    )
    .bind(id)
    .bind(&ingredient_ids)
    .execute(&mut *tx)
    .await
    .context("Failed to register recipe on its ingredients")?;

    tx.commit().await.context("Failed to commit recipe")?;
    info!(recipe_id = id, title = %title, "Recipe created");
    Ok(RecipeId(id))
}

/// Postgres implementation of every collaborator
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    recovery: RecoveryConfig,
}

impl PgStore {
    pub fn new(pool: PgPool, recovery: RecoveryConfig) -> Self {
        Self { pool, recovery }
    }

    /// Open a pool according to `config`
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool, config.recovery.clone()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `attempt_fn`, retrying the errors `retryable` accepts with backoff
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        retryable: fn(&sqlx::Error) -> bool,
        mut attempt_fn: F,
    ) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 0;
        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.recovery.max_retries && retryable(&e) => {
                    let delay = retry_delay(&self.recovery, attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient database error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn try_load(&self, user_id: UserId) -> Result<Option<UserAggregate>, sqlx::Error> {
        let row = sqlx::query("SELECT id, email, document, version FROM users WHERE id = $1")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| user_from_row(&row)).transpose()
    }

    async fn try_save(&self, user: &UserAggregate) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE users SET document = $1, version = version + 1, updated_at = NOW()
             WHERE id = $2 AND version = $3
             RETURNING version",
        )
        .bind(Json(UserDocument::from(user)))
        .bind(user.id.0)
        .bind(user.version)
        .fetch_optional(&self.pool)
        .await
    }

    async fn try_atomic_remove(
        &self,
        user_id: UserId,
        removal: &ListRemoval,
    ) -> Result<Option<bool>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id, email, document, version FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(user_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut user = user_from_row(&row)?;

        let removed = removal.apply(&mut user);
        if removed > 0 {
            sqlx::query(
                "UPDATE users SET document = $1, version = version + 1, updated_at = NOW()
                 WHERE id = $2",
            )
            .bind(Json(UserDocument::from(&user)))
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(user_id = %user_id, list = removal.list_name(), removed, "Applied list removal");
        Ok(Some(removed > 0))
    }
}

fn user_from_row(row: &PgRow) -> Result<UserAggregate, sqlx::Error> {
    let Json(document): Json<UserDocument> = row.try_get("document")?;
    Ok(UserAggregate {
        id: UserId(row.try_get("id")?),
        email: row.try_get("email")?,
        saved_recipes: document.saved_recipes,
        fridge: document.fridge,
        shopping_list: document.shopping_list,
        parameters: document.parameters,
        version: row.try_get("version")?,
    })
}

fn recipe_from_row(row: &PgRow) -> Result<RecipeRecord, sqlx::Error> {
    let Json(document): Json<RecipeDocument> = row.try_get("document")?;
    Ok(RecipeRecord {
        id: RecipeId(row.try_get("id")?),
        title: row.try_get("title")?,
        ingredients: document.ingredients,
        total_time_minutes: document.total_time_minutes,
        picture: document.picture,
    })
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_)
    )
}

/// Transient errors raised before the statement could reach the server
///
/// An I/O error may hide a write that committed, so a versioned save is only
/// replayed when it never left the pool.
fn is_unsent(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_))
}

/// Exponential backoff capped at `max_retry_delay_ms`, plus up to 50% jitter
fn retry_delay(recovery: &RecoveryConfig, attempt: u32) -> Duration {
    let exponential = recovery
        .base_retry_delay_ms
        .saturating_mul(1u64 << attempt.min(16));
    let capped = exponential.min(recovery.max_retry_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=capped / 2);
    Duration::from_millis(capped + jitter)
}

#[async_trait]
impl RecipeStore for PgStore {
    async fn find_by_ids(&self, ids: &[RecipeId]) -> EngineResult<Vec<RecipeRecord>> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let raw_ids = raw_ids.as_slice();
        let pool = &self.pool;

        let rows = self
            .with_retry("find_recipes", is_transient, move || async move {
                sqlx::query(
                    "SELECT id, title, document FROM recipes WHERE id = ANY($1) ORDER BY id",
                )
                .bind(raw_ids)
                .fetch_all(pool)
                .await
            })
            .await?;

        let recipes = rows
            .iter()
            .map(recipe_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(requested = ids.len(), found = recipes.len(), "Fetched recipes");
        Ok(recipes)
    }
}

#[async_trait]
impl IngredientStore for PgStore {
    async fn find_recipe_refs(
        &self,
        ingredient_ids: &[IngredientId],
    ) -> EngineResult<HashMap<IngredientId, Vec<RecipeId>>> {
        let raw_ids: Vec<i64> = ingredient_ids.iter().map(|id| id.0).collect();
        let raw_ids = raw_ids.as_slice();
        let pool = &self.pool;

        let rows: Vec<(i64, Vec<i64>)> = self
            .with_retry("find_recipe_refs", is_transient, move || async move {
                sqlx::query_as("SELECT id, recipe_ids FROM ingredients WHERE id = ANY($1)")
                    .bind(raw_ids)
                    .fetch_all(pool)
                    .await
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, recipe_ids)| {
                (
                    IngredientId(id),
                    recipe_ids.into_iter().map(RecipeId).collect(),
                )
            })
            .collect())
    }

    async fn find_seasonally_unavailable(&self, month: u32) -> EngineResult<HashSet<IngredientId>> {
        let month = month as i32;
        let pool = &self.pool;

        let ids: Vec<i64> = self
            .with_retry("find_seasonally_unavailable", is_transient, move || async move {
                sqlx::query_scalar("SELECT id FROM ingredients WHERE $1 = ANY(unavailable_months)")
                    .bind(month)
                    .fetch_all(pool)
                    .await
            })
            .await?;

        Ok(ids.into_iter().map(IngredientId).collect())
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn load(&self, user_id: UserId) -> EngineResult<UserAggregate> {
        self.with_retry("load_user", is_transient, move || self.try_load(user_id))
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::User, user_id))
    }

    async fn save(&self, user: &UserAggregate) -> EngineResult<UserAggregate> {
        let saved = self
            .with_retry("save_user", is_unsent, move || self.try_save(user))
            .await?;
        match saved {
            Some(version) => {
                debug!(user_id = %user.id, version, "User document saved");
                Ok(UserAggregate {
                    version,
                    ..user.clone()
                })
            }
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                        .bind(user.id.0)
                        .fetch_one(&self.pool)
                        .await?;
                if exists {
                    Err(EngineError::ConcurrentModification {
                        user_id: user.id.0,
                        expected_version: user.version,
                    })
                } else {
                    Err(EngineError::not_found(EntityKind::User, user.id))
                }
            }
        }
    }

    async fn atomic_remove(&self, user_id: UserId, removal: &ListRemoval) -> EngineResult<bool> {
        self.with_retry("atomic_remove", is_transient, move || {
            self.try_atomic_remove(user_id, removal)
        })
        .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::User, user_id))
    }
}
