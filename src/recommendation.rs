//! # Recipe Recommendation Scorer
//!
//! Ranks recipes by how well they cover a set of ingredients the user has.
//!
//! Each candidate gets two coverages:
//!
//! - `list_coverage`: share of the queried ingredients the recipe uses
//! - `recipe_coverage`: share of the recipe's ingredients that were queried
//!
//! The score weighs recipe coverage much higher (0.8 against 0.2 by default),
//! so a recipe that can be cooked right away beats one that merely uses more
//! of the queried ingredients.

use chrono::{Datelike, Utc};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collaborators::{IngredientStore, RecipeId, RecipeRecord, RecipeStore};
use crate::config::ScoringConfig;
use crate::errors::EngineResult;
use crate::quantity_algebra::IngredientId;

/// What to rank recipes against
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecommendationQuery {
    pub ingredient_ids: Vec<IngredientId>,
    /// Exclude recipes needing out-of-season ingredients that were not queried
    pub seasonal: bool,
    /// Overrides the configured candidate limit
    pub max_recipes: Option<usize>,
    /// Month (1-12) used for seasonality; defaults to the current month
    pub month: Option<u32>,
}

impl RecommendationQuery {
    pub fn new(ingredient_ids: Vec<IngredientId>) -> Self {
        Self {
            ingredient_ids,
            ..Self::default()
        }
    }

    pub fn seasonal(mut self, seasonal: bool) -> Self {
        self.seasonal = seasonal;
        self
    }

    pub fn max_recipes(mut self, max_recipes: usize) -> Self {
        self.max_recipes = Some(max_recipes);
        self
    }

    pub fn in_month(mut self, month: u32) -> Self {
        self.month = Some(month);
        self
    }
}

/// Ranked recipe
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeScore {
    pub recipe_id: RecipeId,
    pub title: String,
    /// Number of queried ingredients the recipe uses
    pub matches: usize,
    /// Number of distinct ingredients in the recipe
    pub ingredient_count: usize,
    pub list_coverage: f64,
    pub recipe_coverage: f64,
    pub score: f64,
}

/// Scores recipes against queried ingredients
pub struct RecommendationScorer {
    recipes: Arc<dyn RecipeStore>,
    ingredients: Arc<dyn IngredientStore>,
    config: ScoringConfig,
}

impl RecommendationScorer {
    pub fn new(
        recipes: Arc<dyn RecipeStore>,
        ingredients: Arc<dyn IngredientStore>,
        config: ScoringConfig,
    ) -> Self {
        Self {
            recipes,
            ingredients,
            config,
        }
    }

    /// Rank recipes for `query`, best first
    ///
    /// Ties keep the order of the match counting, which itself keeps the
    /// order in which recipes were first referenced.
    pub async fn score(&self, query: &RecommendationQuery) -> EngineResult<Vec<RecipeScore>> {
        let queried = dedup_preserving_order(&query.ingredient_ids);
        if queried.is_empty() {
            return Ok(Vec::new());
        }
        let max_recipes = query.max_recipes.unwrap_or(self.config.max_recipes);

        let refs = self.ingredients.find_recipe_refs(&queried).await?;
        let candidates = count_matches(&queried, &refs, max_recipes);
        debug!(
            queried = queried.len(),
            candidates = candidates.len(),
            "Counted recipe matches"
        );
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let candidate_ids: Vec<RecipeId> = candidates.iter().map(|(id, _)| *id).collect();
        let summaries: HashMap<RecipeId, RecipeRecord> = self
            .recipes
            .find_by_ids(&candidate_ids)
            .await?
            .into_iter()
            .map(|recipe| (recipe.id, recipe))
            .collect();

        let excluded = if query.seasonal {
            let month = query.month.unwrap_or_else(|| Utc::now().month());
            self.ingredients.find_seasonally_unavailable(month).await?
        } else {
            HashSet::new()
        };
        let queried_set: HashSet<IngredientId> = queried.iter().copied().collect();

        let mut scores = Vec::with_capacity(candidates.len());
        for (recipe_id, matches) in candidates {
            let Some(recipe) = summaries.get(&recipe_id) else {
                warn!(recipe_id = %recipe_id, "Skipping unresolved recipe");
                continue;
            };
            let ingredient_ids = recipe.ingredient_ids();
            if ingredient_ids
                .iter()
                .any(|id| excluded.contains(id) && !queried_set.contains(id))
            {
                debug!(recipe_id = %recipe_id, "Excluding out-of-season recipe");
                continue;
            }
            scores.push(self.score_recipe(recipe, matches, ingredient_ids.len(), queried.len()));
        }

        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        info!(
            queried = queried.len(),
            ranked = scores.len(),
            seasonal = query.seasonal,
            "Ranked recipes by ingredient coverage"
        );
        Ok(scores)
    }

    fn score_recipe(
        &self,
        recipe: &RecipeRecord,
        matches: usize,
        ingredient_count: usize,
        queried_count: usize,
    ) -> RecipeScore {
        let list_coverage = coverage(matches, queried_count);
        let recipe_coverage = coverage(matches, ingredient_count);
        RecipeScore {
            recipe_id: recipe.id,
            title: recipe.title.clone(),
            matches,
            ingredient_count,
            list_coverage,
            recipe_coverage,
            score: self.config.list_coverage_weight * list_coverage
                + self.config.recipe_coverage_weight * recipe_coverage,
        }
    }
}

fn dedup_preserving_order(ids: &[IngredientId]) -> Vec<IngredientId> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Count, per recipe, how many queried ingredients reference it, and keep the
/// `limit` best counts in first-referenced order
fn count_matches(
    queried: &[IngredientId],
    refs: &HashMap<IngredientId, Vec<RecipeId>>,
    limit: usize,
) -> Vec<(RecipeId, usize)> {
    let mut counts: Vec<(RecipeId, usize)> = Vec::new();
    let mut positions: HashMap<RecipeId, usize> = HashMap::new();

    for ingredient_id in queried {
        let Some(recipe_ids) = refs.get(ingredient_id) else {
            continue;
        };
        let mut seen = HashSet::new();
        for recipe_id in recipe_ids.iter().copied().filter(|id| seen.insert(*id)) {
            let position = *positions.entry(recipe_id).or_insert_with(|| {
                counts.push((recipe_id, 0));
                counts.len() - 1
            });
            counts[position].1 += 1;
        }
    }

    counts.sort_by_key(|(_, count)| Reverse(*count));
    counts.truncate(limit);
    counts
}

/// `part / whole` clamped to `[0, 1]`, zero when `whole` is zero
fn coverage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64).min(1.0)
}
