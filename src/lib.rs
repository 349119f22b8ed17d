//! # Pantry
//!
//! Shopping-list reconciliation and recipe recommendation for a meal-planning
//! service.
//!
//! A user's shopping list is kept consistent with the recipes they saved and
//! the food already in their fridge: every change to saved recipes or fridge
//! contents runs one reconciliation cycle that recomputes what to buy while
//! preserving what the user added by hand. Recipes can also be ranked by how
//! well they cover a set of available ingredients.

pub mod collaborators;
pub mod config;
pub mod db;
pub mod errors;
pub mod fridge_offsetter;
pub mod ingredient_aggregator;
pub mod list_reconciler;
pub mod quantity_algebra;
pub mod recommendation;
pub mod user_lists;
pub mod user_locks;
