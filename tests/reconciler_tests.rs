use chrono::Utc;
use std::sync::Arc;

use pantry::collaborators::{
    InMemoryStore, RecipeId, RecipeIngredientRequirement, RecipeRecord, UserAggregate, UserId,
};
use pantry::errors::{EngineError, EntityKind};
use pantry::list_reconciler::{ListAction, ListReconciler};
use pantry::quantity_algebra::{FoodList, IngredientId, IngredientItem};
use pantry::user_lists::remove_item_from_shopping_list;

const USER: UserId = UserId(1);
const BEURRE: IngredientId = IngredientId(72);
const PAIN: IngredientId = IngredientId(70);
const OEUF: IngredientId = IngredientId(3);
const LAIT: IngredientId = IngredientId(8);

fn tartine() -> RecipeRecord {
    RecipeRecord::new(
        RecipeId(1),
        "Tartine beurrée",
        vec![
            RecipeIngredientRequirement::new(BEURRE, "beurre", 10.0, "g"),
            RecipeIngredientRequirement::new(PAIN, "pain", 1.0, ""),
        ],
    )
}

fn gateau() -> RecipeRecord {
    RecipeRecord::new(
        RecipeId(2),
        "Gâteau",
        vec![
            RecipeIngredientRequirement::new(BEURRE, "beurre", 10.0, "g"),
            RecipeIngredientRequirement::new(OEUF, "oeuf", 2.0, ""),
        ],
    )
}

fn setup(user: UserAggregate) -> (InMemoryStore, ListReconciler) {
    let store = InMemoryStore::new();
    store.insert_recipe(tartine());
    store.insert_recipe(gateau());
    store.insert_user(user);

    let shared = Arc::new(store.clone());
    let reconciler = ListReconciler::new(shared.clone(), shared);
    (store, reconciler)
}

fn empty_user() -> UserAggregate {
    UserAggregate::new(USER, "cook@example.com")
}

fn grams(list: &FoodList, id: IngredientId) -> Option<f64> {
    list.get(id).and_then(|item| item.quantity(&"g".into()))
}

fn count(list: &FoodList, id: IngredientId) -> Option<f64> {
    list.get(id).and_then(|item| item.quantity(&"".into()))
}

#[tokio::test]
async fn test_saving_recipe_populates_shopping_list() {
    let (store, reconciler) = setup(empty_user());

    let outcome = reconciler.save_recipes(USER, vec![RecipeId(1)]).await.unwrap();

    assert!(outcome.action_applied);
    let list = outcome.shopping_list();
    assert_eq!(list.len(), 2);
    assert_eq!(grams(list, BEURRE), Some(10.0));
    assert_eq!(count(list, PAIN), Some(1.0));

    let stored = store.user(USER).unwrap();
    assert!(stored.has_saved_recipe(RecipeId(1)));
    assert_eq!(&stored.shopping_list, list);
}

#[tokio::test]
async fn test_removing_only_recipe_empties_list() {
    let mut user = empty_user();
    user.save_recipe(RecipeId(3), Utc::now());
    user.shopping_list
        .add(IngredientItem::flat(BEURRE, "beurre", 10.0, "g"));

    let (store, reconciler) = setup(user);
    store.insert_recipe(RecipeRecord::new(
        RecipeId(3),
        "Beurre fondu",
        vec![RecipeIngredientRequirement::new(BEURRE, "beurre", 10.0, "g")],
    ));

    let outcome = reconciler.remove_recipes(USER, vec![RecipeId(3)]).await.unwrap();

    assert!(outcome.action_applied);
    assert!(outcome.shopping_list().is_empty());
    assert!(store.user(USER).unwrap().saved_recipes.is_empty());
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let (_store, reconciler) = setup(empty_user());
    reconciler.save_recipes(USER, vec![RecipeId(1), RecipeId(2)]).await.unwrap();

    let first = reconciler.refresh(USER).await.unwrap();
    let second = reconciler.refresh(USER).await.unwrap();

    assert!(!first.action_applied);
    assert_eq!(first.shopping_list(), second.shopping_list());
    assert_eq!(grams(second.shopping_list(), BEURRE), Some(20.0));
    assert_eq!(second.user.version, first.user.version + 1);
}

#[tokio::test]
async fn test_fridge_items_reduce_shopping_list() {
    let (_store, reconciler) = setup(empty_user());
    reconciler.save_recipes(USER, vec![RecipeId(1)]).await.unwrap();

    let outcome = reconciler
        .add_fridge_items(USER, vec![IngredientItem::flat(BEURRE, "beurre", 4.0, "g")])
        .await
        .unwrap();

    assert_eq!(grams(outcome.shopping_list(), BEURRE), Some(6.0));
    assert_eq!(count(outcome.shopping_list(), PAIN), Some(1.0));
    assert_eq!(grams(&outcome.user.fridge, BEURRE), Some(4.0));
}

#[tokio::test]
async fn test_removing_fridge_items_restores_needs() {
    let mut user = empty_user();
    user.fridge.add(IngredientItem::flat(BEURRE, "beurre", 10.0, "g"));
    let (_store, reconciler) = setup(user);

    let saved = reconciler.save_recipes(USER, vec![RecipeId(1)]).await.unwrap();
    assert!(!saved.shopping_list().contains(BEURRE));

    let outcome = reconciler.remove_fridge_items(USER, vec![BEURRE]).await.unwrap();
    assert!(outcome.action_applied);
    assert_eq!(grams(outcome.shopping_list(), BEURRE), Some(10.0));
    assert!(outcome.user.fridge.is_empty());
}

#[tokio::test]
async fn test_manual_entries_survive_cycles() {
    let mut user = empty_user();
    user.shopping_list.add(IngredientItem::flat(LAIT, "lait", 1.0, "l"));
    let (_store, reconciler) = setup(user);

    let outcome = reconciler.save_recipes(USER, vec![RecipeId(1)]).await.unwrap();
    let list = outcome.shopping_list();
    assert_eq!(list.len(), 3);
    assert_eq!(list.get(LAIT).and_then(|item| item.quantity(&"l".into())), Some(1.0));

    let outcome = reconciler.remove_recipes(USER, vec![RecipeId(1)]).await.unwrap();
    assert_eq!(outcome.shopping_list().len(), 1);
    assert!(outcome.shopping_list().contains(LAIT));
}

#[tokio::test]
async fn test_bought_items_are_not_added_back() {
    let (store, reconciler) = setup(empty_user());
    reconciler.save_recipes(USER, vec![RecipeId(1)]).await.unwrap();

    // The bread was bought and crossed off by hand
    assert!(remove_item_from_shopping_list(&store, USER, PAIN).await.unwrap());

    let refreshed = reconciler.refresh(USER).await.unwrap();
    assert!(!refreshed.shopping_list().contains(PAIN));
    assert_eq!(grams(refreshed.shopping_list(), BEURRE), Some(10.0));

    let outcome = reconciler.save_recipes(USER, vec![RecipeId(2)]).await.unwrap();
    let list = outcome.shopping_list();
    assert!(!list.contains(PAIN));
    assert_eq!(grams(list, BEURRE), Some(20.0));
    assert_eq!(count(list, OEUF), Some(2.0));
}

#[tokio::test]
async fn test_failed_action_leaves_lists_unchanged() {
    let (store, reconciler) = setup(empty_user());
    let before = store.user(USER).unwrap();

    store.fail_next_saves(1);
    let err = reconciler.save_recipes(USER, vec![RecipeId(1)]).await.unwrap_err();

    assert!(matches!(err, EngineError::Persistence(_)));
    assert_eq!(store.user(USER).unwrap(), before);
}

#[tokio::test]
async fn test_failed_commit_keeps_action_and_list() {
    let mut user = empty_user();
    user.save_recipe(RecipeId(1), Utc::now());
    user.shopping_list.add(IngredientItem::flat(BEURRE, "beurre", 10.0, "g"));
    user.shopping_list.add(IngredientItem::flat(PAIN, "pain", 1.0, ""));
    let (store, reconciler) = setup(user);
    let list_before = store.user(USER).unwrap().shopping_list;

    // Removing a bookmark does not save, so the failing save is the commit
    store.fail_next_saves(1);
    let err = reconciler.remove_recipes(USER, vec![RecipeId(1)]).await.unwrap_err();

    assert!(matches!(err, EngineError::Persistence(_)));
    let stored = store.user(USER).unwrap();
    assert!(stored.saved_recipes.is_empty());
    assert_eq!(stored.shopping_list, list_before);
}

#[tokio::test]
async fn test_zero_quantity_requirements_stay_off_the_list() {
    let (store, reconciler) = setup(empty_user());
    store.insert_recipe(RecipeRecord::new(
        RecipeId(4),
        "Omelette",
        vec![
            RecipeIngredientRequirement::new(OEUF, "oeuf", 3.0, ""),
            RecipeIngredientRequirement::new(IngredientId(9), "poivre", 0.0, "g"),
        ],
    ));

    let outcome = reconciler.save_recipes(USER, vec![RecipeId(4)]).await.unwrap();

    assert_eq!(outcome.shopping_list().len(), 1);
    assert!(!outcome.shopping_list().contains(IngredientId(9)));
    assert_eq!(count(outcome.shopping_list(), OEUF), Some(3.0));
}

#[tokio::test]
async fn test_refresh_keeps_list_order() {
    let mut user = empty_user();
    user.save_recipe(RecipeId(1), Utc::now());
    user.shopping_list.add(IngredientItem::flat(BEURRE, "beurre", 10.0, "g"));
    user.shopping_list.add(IngredientItem::flat(PAIN, "pain", 1.0, ""));
    let (_store, reconciler) = setup(user);

    let outcome = reconciler.refresh(USER).await.unwrap();

    let order: Vec<IngredientId> = outcome
        .shopping_list()
        .iter()
        .map(|item| item.ingredient_id)
        .collect();
    assert_eq!(order, vec![BEURRE, PAIN]);
}

#[tokio::test]
async fn test_unknown_recipe_is_rejected() {
    let (store, reconciler) = setup(empty_user());

    let err = reconciler
        .save_recipes(USER, vec![RecipeId(1), RecipeId(99)])
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::NotFound { kind: EntityKind::Recipe, .. }));
    assert!(store.user(USER).unwrap().saved_recipes.is_empty());
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn test_empty_action_is_invalid() {
    let (store, reconciler) = setup(empty_user());

    let err = reconciler
        .reconcile(USER, ListAction::RemoveFridgeItems(Vec::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidInput(_)));
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let (_store, reconciler) = setup(empty_user());
    let err = reconciler.refresh(UserId(42)).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: EntityKind::User, .. }));
}

#[tokio::test]
async fn test_deleted_saved_recipe_is_reported() {
    let mut user = empty_user();
    user.save_recipe(RecipeId(1), Utc::now());
    user.save_recipe(RecipeId(5), Utc::now());
    user.shopping_list.add(IngredientItem::flat(BEURRE, "beurre", 10.0, "g"));
    user.shopping_list.add(IngredientItem::flat(PAIN, "pain", 1.0, ""));
    let (_store, reconciler) = setup(user);

    let outcome = reconciler.refresh(USER).await.unwrap();

    assert_eq!(outcome.missing_recipe_ids, vec![RecipeId(5)]);
    assert_eq!(grams(outcome.shopping_list(), BEURRE), Some(10.0));
    assert_eq!(count(outcome.shopping_list(), PAIN), Some(1.0));
}

#[tokio::test]
async fn test_independent_lists_ignore_fridge() {
    let mut user = empty_user();
    user.parameters.keep_food_lists_independent = true;
    user.fridge.add(IngredientItem::flat(BEURRE, "beurre", 10.0, "g"));
    let (_store, reconciler) = setup(user);

    let outcome = reconciler.save_recipes(USER, vec![RecipeId(1)]).await.unwrap();
    assert_eq!(grams(outcome.shopping_list(), BEURRE), Some(10.0));
}

#[tokio::test]
async fn test_concurrent_cycles_for_one_user_are_serialized() {
    let (store, reconciler) = setup(empty_user());
    let reconciler = Arc::new(reconciler);

    let first = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move { reconciler.save_recipes(USER, vec![RecipeId(1)]).await })
    };
    let second = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move { reconciler.save_recipes(USER, vec![RecipeId(2)]).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let user = store.user(USER).unwrap();
    assert_eq!(user.saved_recipes.len(), 2);
    assert_eq!(grams(&user.shopping_list, BEURRE), Some(20.0));
    assert_eq!(count(&user.shopping_list, PAIN), Some(1.0));
    assert_eq!(count(&user.shopping_list, OEUF), Some(2.0));
}
