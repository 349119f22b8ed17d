//! # Single-Item List Operations
//!
//! Direct edits of one shopping-list or fridge entry. These do not run a
//! reconciliation cycle: a manual shopping-list entry is exactly what the
//! reconciler later preserves as "not explained by any saved recipe".

use tracing::info;

use crate::collaborators::{DocumentStore, ListRemoval, UserAggregate, UserId};
use crate::errors::{EngineError, EngineResult, EntityKind};
use crate::quantity_algebra::{FoodList, IngredientId, IngredientItem};

/// Which of the two food lists to edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoodListKind {
    ShoppingList,
    Fridge,
}

impl FoodListKind {
    fn list(self, user: &UserAggregate) -> &FoodList {
        match self {
            FoodListKind::ShoppingList => &user.shopping_list,
            FoodListKind::Fridge => &user.fridge,
        }
    }

    fn list_mut(self, user: &mut UserAggregate) -> &mut FoodList {
        match self {
            FoodListKind::ShoppingList => &mut user.shopping_list,
            FoodListKind::Fridge => &mut user.fridge,
        }
    }

    fn removal(self, ingredient_id: IngredientId) -> ListRemoval {
        match self {
            FoodListKind::ShoppingList => ListRemoval::ShoppingList(vec![ingredient_id]),
            FoodListKind::Fridge => ListRemoval::Fridge(vec![ingredient_id]),
        }
    }
}

/// Add one item, merging with an existing entry for the same ingredient
///
/// Returns the entry as stored after the merge.
pub async fn add_item<S>(
    store: &S,
    user_id: UserId,
    kind: FoodListKind,
    item: IngredientItem,
) -> EngineResult<IngredientItem>
where
    S: DocumentStore + ?Sized,
{
    let ingredient_id = item.ingredient_id;
    let mut user = store.load(user_id).await?;
    kind.list_mut(&mut user).add(item);
    let stored = store.save(&user).await?;

    info!(user_id = %user_id, ingredient_id = %ingredient_id, list = ?kind, "Added item");
    kind.list(&stored)
        .get(ingredient_id)
        .cloned()
        .ok_or_else(|| EngineError::not_found(EntityKind::Ingredient, ingredient_id))
}

/// Remove the entry for one ingredient; returns whether it existed
pub async fn remove_item<S>(
    store: &S,
    user_id: UserId,
    kind: FoodListKind,
    ingredient_id: IngredientId,
) -> EngineResult<bool>
where
    S: DocumentStore + ?Sized,
{
    let removed = store.atomic_remove(user_id, &kind.removal(ingredient_id)).await?;
    info!(
        user_id = %user_id,
        ingredient_id = %ingredient_id,
        list = ?kind,
        removed,
        "Removed item"
    );
    Ok(removed)
}

pub async fn add_item_to_shopping_list<S>(
    store: &S,
    user_id: UserId,
    item: IngredientItem,
) -> EngineResult<IngredientItem>
where
    S: DocumentStore + ?Sized,
{
    add_item(store, user_id, FoodListKind::ShoppingList, item).await
}

pub async fn remove_item_from_shopping_list<S>(
    store: &S,
    user_id: UserId,
    ingredient_id: IngredientId,
) -> EngineResult<bool>
where
    S: DocumentStore + ?Sized,
{
    remove_item(store, user_id, FoodListKind::ShoppingList, ingredient_id).await
}

pub async fn add_item_to_fridge<S>(
    store: &S,
    user_id: UserId,
    item: IngredientItem,
) -> EngineResult<IngredientItem>
where
    S: DocumentStore + ?Sized,
{
    add_item(store, user_id, FoodListKind::Fridge, item).await
}

pub async fn remove_item_from_fridge<S>(
    store: &S,
    user_id: UserId,
    ingredient_id: IngredientId,
) -> EngineResult<bool>
where
    S: DocumentStore + ?Sized,
{
    remove_item(store, user_id, FoodListKind::Fridge, ingredient_id).await
}

pub fn get_item_from_shopping_list(
    user: &UserAggregate,
    ingredient_id: IngredientId,
) -> Option<&IngredientItem> {
    user.shopping_list.get(ingredient_id)
}

pub fn get_item_from_fridge(
    user: &UserAggregate,
    ingredient_id: IngredientId,
) -> Option<&IngredientItem> {
    user.fridge.get(ingredient_id)
}
