use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pantry::collaborators::UserId;
use pantry::config::EngineConfig;
use pantry::db::{self, PgStore};
use pantry::list_reconciler::ListReconciler;
use pantry::quantity_algebra::IngredientId;
use pantry::recommendation::{RecommendationQuery, RecommendationScorer};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Shopping-list reconciliation and recipe recommendation",
    long_about = None
)]
struct Cli {
    /// Env file to load instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema
    InitDb,

    /// Recompute a user's shopping list from saved recipes and fridge
    Refresh {
        /// User ID
        #[arg(long)]
        user: i64,
    },

    /// Rank recipes by coverage of the given ingredients
    Recommend {
        /// Comma-separated ingredient IDs
        #[arg(long, value_delimiter = ',', required = true)]
        ingredients: Vec<i64>,

        /// Skip recipes needing out-of-season ingredients
        #[arg(long)]
        seasonal: bool,

        /// Maximum number of candidate recipes
        #[arg(long)]
        max_recipes: Option<usize>,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if env::var("PANTRY_LOG_JSON").is_ok_and(|v| v == "1") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = EngineConfig::load(cli.env_file.as_deref())?;
    info!(max_connections = config.max_connections, "Connecting to database");
    let store = PgStore::connect(&config).await?;

    match cli.command {
        Command::InitDb => {
            db::init_database_schema(store.pool()).await?;
        }
        Command::Refresh { user } => {
            let store = Arc::new(store);
            let reconciler = ListReconciler::new(store.clone(), store);
            let outcome = reconciler
                .refresh(UserId(user))
                .await
                .with_context(|| format!("Failed to refresh shopping list of user {user}"))?;

            for item in outcome.shopping_list() {
                println!("{item}");
            }
            for recipe_id in &outcome.missing_recipe_ids {
                eprintln!("warning: saved recipe {recipe_id} no longer exists");
            }
        }
        Command::Recommend {
            ingredients,
            seasonal,
            max_recipes,
        } => {
            let store = Arc::new(store);
            let scorer = RecommendationScorer::new(store.clone(), store, config.scoring.clone());

            let ingredient_ids = ingredients.into_iter().map(IngredientId).collect();
            let mut query = RecommendationQuery::new(ingredient_ids).seasonal(seasonal);
            if let Some(max_recipes) = max_recipes {
                query = query.max_recipes(max_recipes);
            }

            let scores = scorer.score(&query).await.context("Failed to rank recipes")?;
            for score in scores {
                println!(
                    "{:>6.3}  {}  {} ({}/{} ingredients)",
                    score.score, score.recipe_id, score.title, score.matches, score.ingredient_count
                );
            }
        }
    }

    Ok(())
}
