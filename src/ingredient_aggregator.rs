//! # Ingredient Aggregator
//!
//! Derives the "needed ingredients" of a set of recipes: one batched recipe
//! lookup, flat requirements turned into items, duplicates merged with `Add`.

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::collaborators::{RecipeId, RecipeStore};
use crate::errors::EngineResult;
use crate::quantity_algebra::{unflatten, IngredientId, IngredientItem};

/// Needed ingredients keyed by ingredient id
pub type NeededIngredients = BTreeMap<IngredientId, IngredientItem>;

/// Best-effort aggregation result
///
/// `resolved` holds the merged needs of every recipe that could be found;
/// `missing_ids` lists the requested recipes that could not, so callers can
/// surface gaps if they want to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregatedIngredients {
    pub resolved: NeededIngredients,
    pub missing_ids: Vec<RecipeId>,
}

impl AggregatedIngredients {
    pub fn is_complete(&self) -> bool {
        self.missing_ids.is_empty()
    }
}

/// Merge the ingredient requirements of `recipe_ids`
///
/// Unknown recipe ids are skipped and reported in `missing_ids`. Requirements
/// without a usable quantity cannot be tracked per unit and are left out.
/// Only a failing recipe store makes this return an error.
pub async fn get_needed_ingredients<S>(
    recipes: &S,
    recipe_ids: &[RecipeId],
) -> EngineResult<AggregatedIngredients>
where
    S: RecipeStore + ?Sized,
{
    if recipe_ids.is_empty() {
        return Ok(AggregatedIngredients::default());
    }

    let found = recipes.find_by_ids(recipe_ids).await?;

    let found_ids: HashSet<RecipeId> = found.iter().map(|recipe| recipe.id).collect();
    let mut missing_ids: Vec<RecipeId> = recipe_ids
        .iter()
        .copied()
        .filter(|id| !found_ids.contains(id))
        .collect();
    missing_ids.dedup();
    if !missing_ids.is_empty() {
        warn!(missing = ?missing_ids, "Skipping recipes that could not be resolved");
    }

    let flat = found
        .iter()
        .flat_map(|recipe| recipe.ingredients.iter())
        .filter(|requirement| requirement.quantity.is_some_and(|quantity| quantity > 0.0))
        .map(IngredientItem::from)
        .filter(IngredientItem::has_quantities);
    let resolved = unflatten(flat);

    debug!(
        recipe_count = found.len(),
        ingredient_count = resolved.len(),
        "Aggregated needed ingredients"
    );

    Ok(AggregatedIngredients {
        resolved,
        missing_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryStore, RecipeIngredientRequirement, RecipeRecord};

    fn store_with_butter_recipes() -> InMemoryStore {
        let store = InMemoryStore::new();
        for id in [1, 2] {
            store.insert_recipe(RecipeRecord::new(
                RecipeId(id),
                "Tartine",
                vec![
                    RecipeIngredientRequirement::new(IngredientId(72), "beurre", 10.0, "g"),
                    RecipeIngredientRequirement::new(IngredientId(70), "pain", 1.0, ""),
                ],
            ));
        }
        store
    }

    #[tokio::test]
    async fn test_duplicates_are_merged() {
        let store = store_with_butter_recipes();
        let aggregated = get_needed_ingredients(&store, &[RecipeId(1), RecipeId(2)])
            .await
            .unwrap();

        assert!(aggregated.is_complete());
        assert_eq!(aggregated.resolved.len(), 2);
        assert_eq!(
            aggregated.resolved[&IngredientId(72)].quantity(&"g".into()),
            Some(20.0)
        );
        assert_eq!(
            aggregated.resolved[&IngredientId(70)].quantity(&"".into()),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn test_single_batched_lookup() {
        let store = store_with_butter_recipes();
        get_needed_ingredients(&store, &[RecipeId(1), RecipeId(2), RecipeId(3)])
            .await
            .unwrap();
        assert_eq!(store.recipe_lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_recipes_are_reported_not_fatal() {
        let store = store_with_butter_recipes();
        let aggregated = get_needed_ingredients(&store, &[RecipeId(1), RecipeId(99)])
            .await
            .unwrap();

        assert_eq!(aggregated.missing_ids, vec![RecipeId(99)]);
        assert_eq!(
            aggregated.resolved[&IngredientId(72)].quantity(&"g".into()),
            Some(10.0)
        );
    }

    #[tokio::test]
    async fn test_requirements_without_quantity_are_left_out() {
        let store = InMemoryStore::new();
        store.insert_recipe(RecipeRecord::new(
            RecipeId(1),
            "Salade",
            vec![RecipeIngredientRequirement {
                ingredient_id: IngredientId(5),
                ingredient_name: "sel".to_string(),
                quantity: None,
                unit: String::new(),
            }],
        ));

        let aggregated = get_needed_ingredients(&store, &[RecipeId(1)]).await.unwrap();
        assert!(aggregated.resolved.is_empty());
        assert!(aggregated.is_complete());
    }

    #[tokio::test]
    async fn test_zero_requirements_are_left_out() {
        let store = InMemoryStore::new();
        store.insert_recipe(RecipeRecord::new(
            RecipeId(1),
            "Omelette",
            vec![
                RecipeIngredientRequirement::new(IngredientId(3), "oeuf", 3.0, ""),
                RecipeIngredientRequirement::new(IngredientId(9), "poivre", 0.0, "g"),
            ],
        ));

        let aggregated = get_needed_ingredients(&store, &[RecipeId(1)]).await.unwrap();
        assert_eq!(aggregated.resolved.len(), 1);
        assert!(!aggregated.resolved.contains_key(&IngredientId(9)));
    }

    #[tokio::test]
    async fn test_no_recipes_no_lookup() {
        let store = InMemoryStore::new();
        let aggregated = get_needed_ingredients(&store, &[]).await.unwrap();
        assert!(aggregated.resolved.is_empty());
        assert_eq!(store.recipe_lookup_count(), 0);
    }
}
