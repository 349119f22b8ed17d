//! # Fridge Offsetter
//!
//! Removes what the fridge already holds from the needed ingredients.

use tracing::debug;

use crate::collaborators::UserAggregate;
use crate::ingredient_aggregator::NeededIngredients;
use crate::quantity_algebra::{combine, CombineOp};

/// Needed ingredients net of the user's fridge
///
/// Ingredients present in both are reduced with `GetRemaining` and dropped
/// once fully covered; needed-only ingredients pass through and fridge-only
/// ones are ignored. Users who keep their food lists independent get the
/// needs back untouched.
pub fn build_shopping_needs(user: &UserAggregate, needed: NeededIngredients) -> NeededIngredients {
    if user.parameters.keep_food_lists_independent {
        return needed;
    }

    let before = needed.len();
    let needs: NeededIngredients = needed
        .into_iter()
        .filter_map(|(id, item)| match user.fridge.get(id) {
            Some(in_fridge) => {
                let remaining = combine(&item, in_fridge, CombineOp::GetRemaining);
                remaining.has_quantities().then_some((id, remaining))
            }
            None => Some((id, item)),
        })
        .collect();

    debug!(
        user_id = %user.id,
        needed = before,
        to_buy = needs.len(),
        "Offset needed ingredients against fridge"
    );
    needs
}
