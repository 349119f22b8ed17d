//! # Collaborator Contracts
//!
//! The engine only talks to three collaborators: the recipe collection, the
//! ingredient collection (with its back-references to recipes and seasonal
//! availability) and the per-user document store. Each one is an async trait
//! so the Postgres implementation in [`crate::db`] and the in-memory
//! [`InMemoryStore`] are interchangeable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::errors::{EngineError, EngineResult, EntityKind};
use crate::quantity_algebra::{FoodList, IngredientId, IngredientItem, Quantities};

/// Stable identifier of a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipeId(pub i64);

impl fmt::Display for RecipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One ingredient line of a recipe, in the flat shape recipes are stored in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeIngredientRequirement {
    #[serde(rename = "ingredientID")]
    pub ingredient_id: IngredientId,
    pub ingredient_name: String,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: String,
}

impl RecipeIngredientRequirement {
    pub fn new(
        ingredient_id: IngredientId,
        ingredient_name: &str,
        quantity: f64,
        unit: &str,
    ) -> Self {
        Self {
            ingredient_id,
            ingredient_name: ingredient_name.to_string(),
            quantity: Some(quantity),
            unit: unit.to_string(),
        }
    }
}

impl From<&RecipeIngredientRequirement> for IngredientItem {
    fn from(requirement: &RecipeIngredientRequirement) -> Self {
        match requirement.quantity {
            Some(quantity) => IngredientItem::flat(
                requirement.ingredient_id,
                &requirement.ingredient_name,
                quantity,
                requirement.unit.as_str(),
            ),
            None => IngredientItem::combined(
                requirement.ingredient_id,
                &requirement.ingredient_name,
                Quantities::new(),
            ),
        }
    }
}

/// Recipe summary with its full ingredient requirements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeRecord {
    pub id: RecipeId,
    pub title: String,
    #[serde(default)]
    pub ingredients: Vec<RecipeIngredientRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl RecipeRecord {
    pub fn new(id: RecipeId, title: &str, ingredients: Vec<RecipeIngredientRequirement>) -> Self {
        Self {
            id,
            title: title.to_string(),
            ingredients,
            total_time_minutes: None,
            picture: None,
        }
    }

    /// Distinct ingredient ids used by this recipe
    pub fn ingredient_ids(&self) -> HashSet<IngredientId> {
        self.ingredients.iter().map(|i| i.ingredient_id).collect()
    }
}

/// Bookmark of a recipe by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecipeRef {
    #[serde(rename = "recipeID")]
    pub recipe_id: RecipeId,
    pub saving_date: DateTime<Utc>,
}

/// Per-user preferences
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParameters {
    /// When set, fridge contents do not offset the shopping list
    #[serde(default)]
    pub keep_food_lists_independent: bool,
}

/// The user aggregate owning the three linked lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAggregate {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub saved_recipes: Vec<SavedRecipeRef>,
    #[serde(default)]
    pub fridge: FoodList,
    #[serde(default)]
    pub shopping_list: FoodList,
    #[serde(default)]
    pub parameters: UserParameters,
    /// Document version, incremented on every successful save
    #[serde(default)]
    pub version: i64,
}

impl UserAggregate {
    pub fn new(id: UserId, email: &str) -> Self {
        Self {
            id,
            email: email.to_string(),
            saved_recipes: Vec::new(),
            fridge: FoodList::new(),
            shopping_list: FoodList::new(),
            parameters: UserParameters::default(),
            version: 0,
        }
    }

    pub fn saved_recipe_ids(&self) -> Vec<RecipeId> {
        self.saved_recipes.iter().map(|saved| saved.recipe_id).collect()
    }

    pub fn has_saved_recipe(&self, recipe_id: RecipeId) -> bool {
        self.saved_recipes.iter().any(|saved| saved.recipe_id == recipe_id)
    }

    /// Bookmark a recipe unless already saved; returns whether it was added
    pub fn save_recipe(&mut self, recipe_id: RecipeId, saving_date: DateTime<Utc>) -> bool {
        if self.has_saved_recipe(recipe_id) {
            return false;
        }
        self.saved_recipes.push(SavedRecipeRef {
            recipe_id,
            saving_date,
        });
        true
    }
}

/// Pull-style deletion applied atomically by the document store
#[derive(Debug, Clone, PartialEq)]
pub enum ListRemoval {
    /// Drop saved recipes with these ids
    SavedRecipes(Vec<RecipeId>),
    /// Drop fridge items with these ingredient ids
    Fridge(Vec<IngredientId>),
    /// Drop shopping-list items with these ingredient ids
    ShoppingList(Vec<IngredientId>),
}

impl ListRemoval {
    /// Name of the list this removal targets
    pub fn list_name(&self) -> &'static str {
        match self {
            ListRemoval::SavedRecipes(_) => "savedRecipes",
            ListRemoval::Fridge(_) => "fridge",
            ListRemoval::ShoppingList(_) => "shoppingList",
        }
    }

    /// Apply the removal to an aggregate, returning how many entries went away
    pub fn apply(&self, user: &mut UserAggregate) -> usize {
        match self {
            ListRemoval::SavedRecipes(ids) => {
                let before = user.saved_recipes.len();
                user.saved_recipes.retain(|saved| !ids.contains(&saved.recipe_id));
                before - user.saved_recipes.len()
            }
            ListRemoval::Fridge(ids) => remove_from_list(&mut user.fridge, ids),
            ListRemoval::ShoppingList(ids) => remove_from_list(&mut user.shopping_list, ids),
        }
    }
}

fn remove_from_list(list: &mut FoodList, ids: &[IngredientId]) -> usize {
    ids.iter().filter(|id| list.remove(**id).is_some()).count()
}

/// Recipe collection
#[async_trait]
pub trait RecipeStore: Send + Sync {
    /// Fetch recipes by id in one batched lookup; unknown ids are simply absent
    async fn find_by_ids(&self, ids: &[RecipeId]) -> EngineResult<Vec<RecipeRecord>>;
}

/// Ingredient collection
#[async_trait]
pub trait IngredientStore: Send + Sync {
    /// Recipes referencing each of the given ingredients
    async fn find_recipe_refs(
        &self,
        ingredient_ids: &[IngredientId],
    ) -> EngineResult<HashMap<IngredientId, Vec<RecipeId>>>;

    /// Ingredients flagged as unavailable during `month` (1-12)
    async fn find_seasonally_unavailable(&self, month: u32) -> EngineResult<HashSet<IngredientId>>;
}

/// Per-user document persistence
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the aggregate; `NotFound` if the user does not exist
    async fn load(&self, user_id: UserId) -> EngineResult<UserAggregate>;

    /// Overwrite the aggregate if its version is still current
    ///
    /// Returns the stored aggregate with its new version, or
    /// `ConcurrentModification` when someone saved in between.
    async fn save(&self, user: &UserAggregate) -> EngineResult<UserAggregate>;

    /// Apply a pull-style removal atomically; returns whether anything was removed
    async fn atomic_remove(&self, user_id: UserId, removal: &ListRemoval) -> EngineResult<bool>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    users: HashMap<UserId, UserAggregate>,
    recipes: BTreeMap<RecipeId, RecipeRecord>,
    unavailable_months: HashMap<IngredientId, HashSet<u32>>,
    failing_saves: u32,
    recipe_lookups: usize,
    saves: usize,
}

/// Thread-safe in-memory implementation of every collaborator
///
/// Ingredient back-references are derived from the inserted recipes.
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<InMemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_user(&self, user: UserAggregate) {
        self.state().users.insert(user.id, user);
    }

    pub fn insert_recipe(&self, recipe: RecipeRecord) {
        self.state().recipes.insert(recipe.id, recipe);
    }

    /// Flag an ingredient as unavailable during the given months
    pub fn mark_unavailable(&self, ingredient_id: IngredientId, months: &[u32]) {
        self.state()
            .unavailable_months
            .entry(ingredient_id)
            .or_default()
            .extend(months.iter().copied());
    }

    /// Current stored aggregate, bypassing the trait
    pub fn user(&self, user_id: UserId) -> Option<UserAggregate> {
        self.state().users.get(&user_id).cloned()
    }

    /// Make the next `count` saves fail with a persistence error
    pub fn fail_next_saves(&self, count: u32) {
        self.state().failing_saves = count;
    }

    /// Number of `find_by_ids` calls served so far
    pub fn recipe_lookup_count(&self) -> usize {
        self.state().recipe_lookups
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.state().saves
    }
}

#[async_trait]
impl RecipeStore for InMemoryStore {
    async fn find_by_ids(&self, ids: &[RecipeId]) -> EngineResult<Vec<RecipeRecord>> {
        let mut state = self.state();
        state.recipe_lookups += 1;
        let wanted: HashSet<RecipeId> = ids.iter().copied().collect();
        Ok(state
            .recipes
            .values()
            .filter(|recipe| wanted.contains(&recipe.id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IngredientStore for InMemoryStore {
    async fn find_recipe_refs(
        &self,
        ingredient_ids: &[IngredientId],
    ) -> EngineResult<HashMap<IngredientId, Vec<RecipeId>>> {
        let state = self.state();
        let mut refs: HashMap<IngredientId, Vec<RecipeId>> = HashMap::new();
        for recipe in state.recipes.values() {
            for ingredient_id in recipe.ingredient_ids() {
                if ingredient_ids.contains(&ingredient_id) {
                    refs.entry(ingredient_id).or_default().push(recipe.id);
                }
            }
        }
        Ok(refs)
    }

    async fn find_seasonally_unavailable(&self, month: u32) -> EngineResult<HashSet<IngredientId>> {
        Ok(self
            .state()
            .unavailable_months
            .iter()
            .filter(|(_, months)| months.contains(&month))
            .map(|(id, _)| *id)
            .collect())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn load(&self, user_id: UserId) -> EngineResult<UserAggregate> {
        self.state()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::User, user_id))
    }

    async fn save(&self, user: &UserAggregate) -> EngineResult<UserAggregate> {
        let mut state = self.state();
        if state.failing_saves > 0 {
            state.failing_saves -= 1;
            return Err(EngineError::Persistence("simulated save failure".to_string()));
        }

        let current_version = match state.users.get(&user.id) {
            Some(stored) => stored.version,
            None => return Err(EngineError::not_found(EntityKind::User, user.id)),
        };
        if current_version != user.version {
            return Err(EngineError::ConcurrentModification {
                user_id: user.id.0,
                expected_version: user.version,
            });
        }

        let mut stored = user.clone();
        stored.version += 1;
        state.users.insert(stored.id, stored.clone());
        state.saves += 1;
        Ok(stored)
    }

    async fn atomic_remove(&self, user_id: UserId, removal: &ListRemoval) -> EngineResult<bool> {
        let mut state = self.state();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::User, user_id))?;

        let removed = removal.apply(user);
        if removed > 0 {
            user.version += 1;
        }
        Ok(removed > 0)
    }
}
