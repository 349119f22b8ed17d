//! # List Reconciler
//!
//! Keeps a user's shopping list consistent with what their saved recipes
//! require net of their fridge, around every mutating action.
//!
//! ## Cycle
//!
//! One call runs one cycle to completion or aborts it:
//!
//! 1. **Snapshotting**: compute the shopping needs for the current state and
//!    diff the shopping list against them
//! 2. **ActionApplied**: apply exactly one action through the document store
//! 3. **Recomputed**: reload the user and compute the new shopping needs
//! 4. **Committed**: subtract the pre-action deficit from the new needs, merge
//!    back whatever the list held beyond the old needs, save once
//!
//! The pre-action deficit is what the recipes asked for but the list no
//! longer held (bought, crossed out or edited down by the user). Subtracting
//! it keeps those quantities from reappearing, while list entries not
//! explained by any recipe are carried over untouched.
//!
//! Cycles of one user are serialized with [`UserLocks`]; the commit is also a
//! versioned save, so a write from outside the reconciler between reload and
//! commit is reported as `ConcurrentModification` rather than overwritten.

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::collaborators::{
    DocumentStore, ListRemoval, RecipeId, RecipeStore, UserAggregate, UserId,
};
use crate::errors::{EngineError, EngineResult, EntityKind};
use crate::fridge_offsetter::build_shopping_needs;
use crate::ingredient_aggregator::{get_needed_ingredients, NeededIngredients};
use crate::quantity_algebra::{
    combine, diff_quantities, merge_lists, CombineOp, FoodList, IngredientId, IngredientItem,
};
use crate::user_locks::UserLocks;

/// Mutating action driving a reconciliation cycle
#[derive(Debug, Clone, PartialEq)]
pub enum ListAction {
    /// Bookmark recipes; every id must exist
    SaveRecipes(Vec<RecipeId>),
    /// Drop bookmarks
    RemoveRecipes(Vec<RecipeId>),
    /// Add items to the fridge, merging with what is already there
    AddFridgeItems(Vec<IngredientItem>),
    /// Remove fridge items by ingredient id
    RemoveFridgeItems(Vec<IngredientId>),
}

impl ListAction {
    fn name(&self) -> &'static str {
        match self {
            ListAction::SaveRecipes(_) => "save_recipes",
            ListAction::RemoveRecipes(_) => "remove_recipes",
            ListAction::AddFridgeItems(_) => "add_fridge_items",
            ListAction::RemoveFridgeItems(_) => "remove_fridge_items",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            ListAction::SaveRecipes(ids) | ListAction::RemoveRecipes(ids) => ids.is_empty(),
            ListAction::AddFridgeItems(items) => items.is_empty(),
            ListAction::RemoveFridgeItems(ids) => ids.is_empty(),
        }
    }
}

/// Phase a cycle is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Snapshotting,
    ActionApplied,
    Recomputed,
    Committed,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Snapshotting => "snapshotting",
            CyclePhase::ActionApplied => "action-applied",
            CyclePhase::Recomputed => "recomputed",
            CyclePhase::Committed => "committed",
        };
        write!(f, "{name}")
    }
}

/// Shopping list compared with the shopping needs, before an action
///
/// Ephemeral: rebuilt at the start of every cycle and never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconciliationSnapshot {
    /// Quantities held beyond the needs, including entries no recipe explains
    pub to_keep: Vec<IngredientItem>,
    /// Needed quantities the list does not hold
    pub to_remove: BTreeMap<IngredientId, IngredientItem>,
}

/// Result of a committed cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationOutcome {
    /// The user as committed, with its new version
    pub user: UserAggregate,
    /// Whether the action changed anything
    pub action_applied: bool,
    /// Saved recipes that could not be resolved while recomputing
    pub missing_recipe_ids: Vec<RecipeId>,
}

impl ReconciliationOutcome {
    pub fn shopping_list(&self) -> &FoodList {
        &self.user.shopping_list
    }
}

/// Diff a shopping list against shopping needs
///
/// Matching entries contribute their excess to `to_keep` and their deficit to
/// `to_remove`; entries without a matching need are kept whole; needs absent
/// from the list are recorded whole in `to_remove`.
pub fn diff_shopping_lists(
    shopping_list: &FoodList,
    needs: &NeededIngredients,
) -> ReconciliationSnapshot {
    let mut snapshot = ReconciliationSnapshot::default();

    for item in shopping_list {
        match needs.get(&item.ingredient_id) {
            Some(need) => {
                let diff = diff_quantities(Some(item), Some(need));
                if let Some(keep) = diff.to_keep {
                    snapshot.to_keep.push(keep);
                }
                if let Some(remove) = diff.to_remove {
                    snapshot.to_remove.insert(item.ingredient_id, remove);
                }
            }
            None => snapshot.to_keep.push(item.clone()),
        }
    }

    for (id, need) in needs {
        if !shopping_list.contains(*id) {
            snapshot.to_remove.insert(*id, need.clone());
        }
    }

    snapshot
}

/// Build the shopping list to commit from the recomputed needs
///
/// `previous` is the list the snapshot was taken from. Its entries keep their
/// position and their user metadata (expiration date, associated product);
/// ingredients it did not hold are appended in id order.
pub fn commit_shopping_list(
    snapshot: &ReconciliationSnapshot,
    needs: NeededIngredients,
    previous: &FoodList,
) -> FoodList {
    let mut kept: NeededIngredients = needs
        .into_iter()
        .filter_map(|(id, need)| match snapshot.to_remove.get(&id) {
            Some(deficit) => {
                let remaining = combine(&need, deficit, CombineOp::Subtract);
                remaining.has_quantities().then_some((id, remaining))
            }
            None => Some((id, need)),
        })
        .collect();

    let mut committed = FoodList::new();
    for listed in previous {
        let id = listed.ingredient_id;
        if let Some(item) = kept.remove(&id) {
            committed.add(item.with_metadata_of(listed));
        }
        if let Some(excess) = snapshot.to_keep.iter().find(|item| item.ingredient_id == id) {
            committed.add(excess.clone());
        }
    }

    let unlisted = snapshot
        .to_keep
        .iter()
        .filter(|item| !previous.contains(item.ingredient_id))
        .cloned();
    merge_lists(merge_lists(committed, kept.into_values()), unlisted)
}

/// Orchestrates reconciliation cycles over the recipe and document stores
pub struct ListReconciler {
    recipes: Arc<dyn RecipeStore>,
    documents: Arc<dyn DocumentStore>,
    locks: UserLocks,
}

impl ListReconciler {
    pub fn new(recipes: Arc<dyn RecipeStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            recipes,
            documents,
            locks: UserLocks::new(),
        }
    }

    /// Run one full cycle around `action`
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an action without any subject
    /// - `NotFound` for an unknown user, or an unknown recipe being saved
    /// - `Persistence` when the document store fails; a failure in the action
    ///   leaves every list unchanged, a later failure leaves the action applied
    ///   and the shopping list stale until the next cycle
    /// - `ConcurrentModification` when the user was written outside this
    ///   reconciler between reload and commit
    pub async fn reconcile(
        &self,
        user_id: UserId,
        action: ListAction,
    ) -> EngineResult<ReconciliationOutcome> {
        if action.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "{} requires at least one item",
                action.name()
            )));
        }
        self.run_cycle(user_id, Some(action)).await
    }

    /// Run a cycle without any action, bringing a stale list up to date
    pub async fn refresh(&self, user_id: UserId) -> EngineResult<ReconciliationOutcome> {
        self.run_cycle(user_id, None).await
    }

    pub async fn save_recipes(
        &self,
        user_id: UserId,
        recipe_ids: Vec<RecipeId>,
    ) -> EngineResult<ReconciliationOutcome> {
        self.reconcile(user_id, ListAction::SaveRecipes(recipe_ids)).await
    }

    pub async fn remove_recipes(
        &self,
        user_id: UserId,
        recipe_ids: Vec<RecipeId>,
    ) -> EngineResult<ReconciliationOutcome> {
        self.reconcile(user_id, ListAction::RemoveRecipes(recipe_ids)).await
    }

    pub async fn add_fridge_items(
        &self,
        user_id: UserId,
        items: Vec<IngredientItem>,
    ) -> EngineResult<ReconciliationOutcome> {
        self.reconcile(user_id, ListAction::AddFridgeItems(items)).await
    }

    pub async fn remove_fridge_items(
        &self,
        user_id: UserId,
        ingredient_ids: Vec<IngredientId>,
    ) -> EngineResult<ReconciliationOutcome> {
        self.reconcile(user_id, ListAction::RemoveFridgeItems(ingredient_ids)).await
    }

    async fn run_cycle(
        &self,
        user_id: UserId,
        action: Option<ListAction>,
    ) -> EngineResult<ReconciliationOutcome> {
        let _guard = self.locks.acquire(user_id).await;
        let action_name = action.as_ref().map_or("refresh", ListAction::name);
        info!(user_id = %user_id, action = action_name, "Starting reconciliation cycle");

        let mut phase = CyclePhase::Idle;
        let result = self.cycle_phases(user_id, action, &mut phase).await;
        match &result {
            Ok(outcome) => info!(
                user_id = %user_id,
                action = action_name,
                shopping_items = outcome.user.shopping_list.len(),
                version = outcome.user.version,
                "Reconciliation cycle committed"
            ),
            Err(e) => error!(
                user_id = %user_id,
                action = action_name,
                phase = %phase,
                error = %e,
                "Reconciliation cycle aborted"
            ),
        }

        drop(_guard);
        self.locks.prune();
        result
    }

    async fn cycle_phases(
        &self,
        user_id: UserId,
        action: Option<ListAction>,
        phase: &mut CyclePhase,
    ) -> EngineResult<ReconciliationOutcome> {
        *phase = CyclePhase::Snapshotting;
        let user = self.documents.load(user_id).await?;
        let needs_before = self.shopping_needs(&user).await?.0;
        let snapshot = diff_shopping_lists(&user.shopping_list, &needs_before);
        debug!(
            user_id = %user_id,
            to_keep = snapshot.to_keep.len(),
            to_remove = snapshot.to_remove.len(),
            "Snapshot taken"
        );

        let action_applied = match action {
            Some(action) => self.apply_action(user.clone(), action).await?,
            None => false,
        };
        *phase = CyclePhase::ActionApplied;

        let mut reloaded = self.documents.load(user_id).await?;
        let (needs_after, missing_recipe_ids) = self.shopping_needs(&reloaded).await?;
        *phase = CyclePhase::Recomputed;

        reloaded.shopping_list = commit_shopping_list(&snapshot, needs_after, &user.shopping_list);
        let committed = self.documents.save(&reloaded).await?;
        *phase = CyclePhase::Committed;

        Ok(ReconciliationOutcome {
            user: committed,
            action_applied,
            missing_recipe_ids,
        })
    }

    async fn shopping_needs(
        &self,
        user: &UserAggregate,
    ) -> EngineResult<(NeededIngredients, Vec<RecipeId>)> {
        let aggregated =
            get_needed_ingredients(self.recipes.as_ref(), &user.saved_recipe_ids()).await?;
        let needs = build_shopping_needs(user, aggregated.resolved);
        Ok((needs, aggregated.missing_ids))
    }

    async fn apply_action(
        &self,
        mut user: UserAggregate,
        action: ListAction,
    ) -> EngineResult<bool> {
        match action {
            ListAction::SaveRecipes(recipe_ids) => {
                let found: HashSet<RecipeId> = self
                    .recipes
                    .find_by_ids(&recipe_ids)
                    .await?
                    .into_iter()
                    .map(|recipe| recipe.id)
                    .collect();
                if let Some(missing) = recipe_ids.iter().find(|id| !found.contains(*id)) {
                    return Err(EngineError::not_found(EntityKind::Recipe, missing));
                }

                let now = Utc::now();
                let added = recipe_ids
                    .into_iter()
                    .filter(|id| user.save_recipe(*id, now))
                    .count();
                if added > 0 {
                    self.documents.save(&user).await?;
                }
                Ok(added > 0)
            }
            ListAction::RemoveRecipes(recipe_ids) => {
                self.documents
                    .atomic_remove(user.id, &ListRemoval::SavedRecipes(recipe_ids))
                    .await
            }
            ListAction::AddFridgeItems(items) => {
                user.fridge = merge_lists(std::mem::take(&mut user.fridge), items);
                self.documents.save(&user).await?;
                Ok(true)
            }
            ListAction::RemoveFridgeItems(ingredient_ids) => {
                self.documents
                    .atomic_remove(user.id, &ListRemoval::Fridge(ingredient_ids))
                    .await
            }
        }
    }
}
