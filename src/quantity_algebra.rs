//! # Quantity Algebra
//!
//! Pure operations over per-unit ingredient quantities. Units are never
//! converted: `g` and `kg` are two unrelated keys, and each
//! (ingredient, unit) pair is tracked on its own.
//!
//! ## Core Concepts
//!
//! - **IngredientQuantity**: one `(unit, quantity)` pair
//! - **Quantities**: a set of quantities keyed by unit (at most one entry per unit)
//! - **IngredientItem**: an ingredient identity plus its quantities and user metadata
//! - **FoodList**: an ordered list of items, unique by ingredient id
//!
//! ## Usage
//!
//! ```rust
//! use pantry::quantity_algebra::{combine, CombineOp, IngredientId, IngredientItem};
//!
//! let butter = IngredientItem::flat(IngredientId(72), "beurre", 100.0, "g");
//! let more = IngredientItem::flat(IngredientId(72), "beurre", 200.0, "g");
//!
//! let total = combine(&butter, &more, CombineOp::Add);
//! assert_eq!(total.quantity(&"g".into()), Some(300.0));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Wire spelling of the unit that cancels every quantity it is subtracted from
pub const UNLIMITED_UNIT: &str = "INFINITY";

/// Stable identifier of a canonical ingredient
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IngredientId(pub i64);

impl fmt::Display for IngredientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Measurement unit, compared verbatim
///
/// The empty string is a legitimate unit ("6 abricots"). `Unlimited` is the
/// typed form of the legacy `"INFINITY"` unit: an operand carrying it cancels
/// everything in a subtraction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Unit {
    /// Any unit spelled by recipes or users (`"g"`, `"cl"`, `"sachet"`, `""`)
    Named(String),
    /// Unlimited stock
    Unlimited,
}

impl Unit {
    /// Wire representation of this unit
    pub fn as_str(&self) -> &str {
        match self {
            Unit::Named(name) => name,
            Unit::Unlimited => UNLIMITED_UNIT,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Unit::Unlimited)
    }
}

impl From<String> for Unit {
    fn from(value: String) -> Self {
        if value == UNLIMITED_UNIT {
            Unit::Unlimited
        } else {
            Unit::Named(value)
        }
    }
}

impl From<&str> for Unit {
    fn from(value: &str) -> Self {
        Unit::from(value.to_string())
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        match unit {
            Unit::Named(name) => name,
            Unit::Unlimited => UNLIMITED_UNIT.to_string(),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single `(unit, quantity)` pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngredientQuantity {
    pub unit: Unit,
    pub quantity: f64,
}

impl IngredientQuantity {
    pub fn new(unit: impl Into<Unit>, quantity: f64) -> Self {
        Self {
            unit: unit.into(),
            quantity,
        }
    }
}

/// Quantity record as it may arrive from storage or a client
///
/// Missing units default to `""`. Quantities that are missing, non-numeric,
/// negative or non-finite make the record invalid, and invalid records are
/// dropped instead of failing the whole document.
#[derive(Debug, Clone, Deserialize)]
struct RawQuantity {
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    quantity: Option<serde_json::Value>,
}

impl RawQuantity {
    fn normalize(self) -> Option<IngredientQuantity> {
        let quantity = match self.quantity? {
            serde_json::Value::Number(number) => number.as_f64()?,
            serde_json::Value::String(text) => text.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        let quantity = valid_quantity(quantity)?;
        Some(IngredientQuantity::new(self.unit.unwrap_or_default(), quantity))
    }
}

fn valid_quantity(quantity: f64) -> Option<f64> {
    (quantity.is_finite() && quantity >= 0.0).then_some(quantity)
}

/// Set of quantities keyed by unit, in first-seen unit order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<RawQuantity>", into = "Vec<IngredientQuantity>")]
pub struct Quantities(Vec<IngredientQuantity>);

impl Quantities {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add `quantity` on `unit`, summing with any existing entry for that unit
    ///
    /// Invalid quantities are ignored.
    pub fn add(&mut self, unit: impl Into<Unit>, quantity: f64) {
        let Some(quantity) = valid_quantity(quantity) else {
            return;
        };
        let unit = unit.into();
        match self.0.iter_mut().find(|entry| entry.unit == unit) {
            Some(entry) => entry.quantity += quantity,
            None => self.0.push(IngredientQuantity { unit, quantity }),
        }
    }

    /// Builder form of [`Quantities::add`]
    pub fn with(mut self, unit: impl Into<Unit>, quantity: f64) -> Self {
        self.add(unit, quantity);
        self
    }

    pub fn get(&self, unit: &Unit) -> Option<f64> {
        self.0
            .iter()
            .find(|entry| &entry.unit == unit)
            .map(|entry| entry.quantity)
    }

    pub fn contains_unit(&self, unit: &Unit) -> bool {
        self.0.iter().any(|entry| &entry.unit == unit)
    }

    pub fn has_unlimited(&self) -> bool {
        self.0.iter().any(|entry| entry.unit.is_unlimited())
    }

    pub fn iter(&self) -> impl Iterator<Item = &IngredientQuantity> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Push an entry known to be valid and not yet present
    fn push_unchecked(&mut self, unit: Unit, quantity: f64) {
        self.0.push(IngredientQuantity { unit, quantity });
    }
}

impl From<Vec<RawQuantity>> for Quantities {
    fn from(raw: Vec<RawQuantity>) -> Self {
        raw.into_iter()
            .filter_map(RawQuantity::normalize)
            .collect()
    }
}

impl From<Quantities> for Vec<IngredientQuantity> {
    fn from(quantities: Quantities) -> Self {
        quantities.0
    }
}

impl FromIterator<IngredientQuantity> for Quantities {
    fn from_iter<T: IntoIterator<Item = IngredientQuantity>>(iter: T) -> Self {
        let mut quantities = Quantities::new();
        for entry in iter {
            quantities.add(entry.unit, entry.quantity);
        }
        quantities
    }
}

impl<'a> IntoIterator for &'a Quantities {
    type Item = &'a IngredientQuantity;
    type IntoIter = std::slice::Iter<'a, IngredientQuantity>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// An ingredient with its per-unit quantities and user metadata
///
/// Identity is `ingredient_id`. During combinations the metadata (name,
/// expiration date, associated product) always comes from the left operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawIngredientItem")]
pub struct IngredientItem {
    #[serde(rename = "ingredientID")]
    pub ingredient_id: IngredientId,
    pub ingredient_name: String,
    pub quantities: Quantities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    /// Opaque reference attached by the user (e.g. a preferred product)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub associated_product: Option<String>,
}

/// Item as it may arrive: either the flat `quantity`/`unit` shape used by
/// recipe requirements or the nested `quantities` shape used by user lists
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIngredientItem {
    #[serde(rename = "ingredientID")]
    ingredient_id: IngredientId,
    #[serde(default)]
    ingredient_name: String,
    #[serde(default)]
    quantities: Quantities,
    #[serde(default)]
    quantity: Option<serde_json::Value>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    associated_product: Option<String>,
}

impl From<RawIngredientItem> for IngredientItem {
    fn from(raw: RawIngredientItem) -> Self {
        let mut quantities = raw.quantities;
        let flat = RawQuantity {
            unit: raw.unit,
            quantity: raw.quantity,
        };
        if let Some(entry) = flat.normalize() {
            quantities.add(entry.unit, entry.quantity);
        }

        Self {
            ingredient_id: raw.ingredient_id,
            ingredient_name: raw.ingredient_name,
            quantities,
            expiration_date: raw.expiration_date,
            associated_product: raw.associated_product,
        }
    }
}

impl IngredientItem {
    /// Create an item from a single `(quantity, unit)` pair
    pub fn flat(
        ingredient_id: IngredientId,
        ingredient_name: &str,
        quantity: f64,
        unit: impl Into<Unit>,
    ) -> Self {
        Self::combined(
            ingredient_id,
            ingredient_name,
            Quantities::new().with(unit, quantity),
        )
    }

    /// Create an item from an already combined set of quantities
    pub fn combined(
        ingredient_id: IngredientId,
        ingredient_name: &str,
        quantities: Quantities,
    ) -> Self {
        Self {
            ingredient_id,
            ingredient_name: ingredient_name.to_string(),
            quantities,
            expiration_date: None,
            associated_product: None,
        }
    }

    /// Set the expiration date of this item
    pub fn with_expiration_date(mut self, expiration_date: DateTime<Utc>) -> Self {
        self.expiration_date = Some(expiration_date);
        self
    }

    /// Attach an opaque product reference to this item
    pub fn with_associated_product(mut self, product: &str) -> Self {
        self.associated_product = Some(product.to_string());
        self
    }

    /// Same metadata as `self`, different quantities
    pub fn with_quantities(&self, quantities: Quantities) -> Self {
        Self {
            ingredient_id: self.ingredient_id,
            ingredient_name: self.ingredient_name.clone(),
            quantities,
            expiration_date: self.expiration_date,
            associated_product: self.associated_product.clone(),
        }
    }

    /// Replace name, expiration date and product with those of `other`
    pub fn with_metadata_of(mut self, other: &IngredientItem) -> Self {
        self.ingredient_name = other.ingredient_name.clone();
        self.expiration_date = other.expiration_date;
        self.associated_product = other.associated_product.clone();
        self
    }

    pub fn quantity(&self, unit: &Unit) -> Option<f64> {
        self.quantities.get(unit)
    }

    pub fn has_quantities(&self) -> bool {
        !self.quantities.is_empty()
    }
}

impl fmt::Display for IngredientQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quantity.fract() == 0.0 {
            write!(f, "{}", self.quantity as i64)?;
        } else {
            write!(f, "{}", self.quantity)?;
        }
        match &self.unit {
            Unit::Named(name) if name.is_empty() => Ok(()),
            unit => write!(f, " {}", unit),
        }
    }
}

impl fmt::Display for IngredientItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ingredient_name)?;
        if self.quantities.is_empty() {
            return Ok(());
        }
        let rendered: Vec<String> = self.quantities.iter().map(|q| q.to_string()).collect();
        write!(f, " ({})", rendered.join(" + "))
    }
}

/// How two items are combined by [`combine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineOp {
    /// Union of units, shared units summed
    Add,
    /// Left minus right, clipped at zero, restricted to the left's units
    Subtract,
    /// "Needed minus already available"; same arithmetic as `Subtract`
    GetRemaining,
}

/// Combine two items unit by unit
///
/// The result carries the metadata of `left`. For `Subtract` and
/// `GetRemaining`, a unit whose remainder is zero or less is dropped, units
/// only present in `right` are ignored, and a `right` holding an
/// [`Unit::Unlimited`] quantity cancels everything.
pub fn combine(left: &IngredientItem, right: &IngredientItem, op: CombineOp) -> IngredientItem {
    let quantities = match op {
        CombineOp::Add => add_quantities(&left.quantities, &right.quantities),
        CombineOp::Subtract | CombineOp::GetRemaining => {
            subtract_quantities(&left.quantities, &right.quantities)
        }
    };
    left.with_quantities(quantities)
}

fn add_quantities(left: &Quantities, right: &Quantities) -> Quantities {
    let mut sum = left.clone();
    for entry in right {
        sum.add(entry.unit.clone(), entry.quantity);
    }
    sum
}

fn subtract_quantities(left: &Quantities, right: &Quantities) -> Quantities {
    let mut remaining = Quantities::new();
    if right.has_unlimited() {
        return remaining;
    }

    for entry in left {
        match right.get(&entry.unit) {
            Some(taken) => {
                let rest = entry.quantity - taken;
                if rest > 0.0 {
                    remaining.push_unchecked(entry.unit.clone(), rest);
                }
            }
            None if entry.quantity > 0.0 => {
                remaining.push_unchecked(entry.unit.clone(), entry.quantity)
            }
            None => {}
        }
    }
    remaining
}

/// Split between what is held and what is required for one ingredient
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuantityDiff {
    /// Excess held beyond the requirement; `None` when nothing is in excess
    pub to_keep: Option<IngredientItem>,
    /// Requirement not covered by what is held; `None` when fully covered
    pub to_remove: Option<IngredientItem>,
}

/// Compare what is held (`have`) with what is required (`need`)
///
/// `None` on either side means the item is absent, which differs from an
/// item that is present with no quantities only in where metadata comes from.
/// Per shared unit the excess goes to `to_keep` and the deficit to
/// `to_remove`; units held on one side only go wholly to that side.
pub fn diff_quantities(
    have: Option<&IngredientItem>,
    need: Option<&IngredientItem>,
) -> QuantityDiff {
    let empty = Quantities::new();
    let have_quantities = have.map(|item| &item.quantities).unwrap_or(&empty);
    let need_quantities = need.map(|item| &item.quantities).unwrap_or(&empty);

    let mut excess = Quantities::new();
    let mut deficit = Quantities::new();

    for held in have_quantities {
        let required = need_quantities.get(&held.unit).unwrap_or(0.0);
        let rest = held.quantity - required;
        if rest > 0.0 {
            excess.push_unchecked(held.unit.clone(), rest);
        } else if rest < 0.0 {
            deficit.push_unchecked(held.unit.clone(), -rest);
        }
    }
    for required in need_quantities {
        if !have_quantities.contains_unit(&required.unit) && required.quantity > 0.0 {
            deficit.push_unchecked(required.unit.clone(), required.quantity);
        }
    }

    let keep_template = have.or(need);
    let remove_template = need.or(have);

    QuantityDiff {
        to_keep: keep_template
            .filter(|_| !excess.is_empty())
            .map(|item| item.with_quantities(excess)),
        to_remove: remove_template
            .filter(|_| !deficit.is_empty())
            .map(|item| item.with_quantities(deficit)),
    }
}

/// Group flat items by ingredient id, summing repeats with `Add`
pub fn unflatten<I>(items: I) -> BTreeMap<IngredientId, IngredientItem>
where
    I: IntoIterator<Item = IngredientItem>,
{
    let mut grouped: BTreeMap<IngredientId, IngredientItem> = BTreeMap::new();
    for item in items {
        match grouped.get_mut(&item.ingredient_id) {
            Some(existing) => *existing = combine(existing, &item, CombineOp::Add),
            None => {
                grouped.insert(item.ingredient_id, item);
            }
        }
    }
    grouped
}

/// Ordered list of items, unique by ingredient id
///
/// Every mutation keeps the uniqueness invariant: adding an item whose id is
/// already present merges into the existing entry in place.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<IngredientItem>", into = "Vec<IngredientItem>")]
pub struct FoodList {
    items: Vec<IngredientItem>,
}

impl FoodList {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn items(&self) -> &[IngredientItem] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &IngredientItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, ingredient_id: IngredientId) -> Option<&IngredientItem> {
        self.items.iter().find(|item| item.ingredient_id == ingredient_id)
    }

    pub fn contains(&self, ingredient_id: IngredientId) -> bool {
        self.get(ingredient_id).is_some()
    }

    /// Merge `item` into the entry with the same id, or append it
    pub fn add(&mut self, item: IngredientItem) {
        match self
            .items
            .iter_mut()
            .find(|existing| existing.ingredient_id == item.ingredient_id)
        {
            Some(existing) => *existing = combine(existing, &item, CombineOp::Add),
            None => self.items.push(item),
        }
    }

    /// Subtract `item` from the entry with the same id, dropping the entry
    /// when no quantity is left. Returns whether an entry matched.
    pub fn subtract(&mut self, item: &IngredientItem) -> bool {
        let Some(position) = self
            .items
            .iter()
            .position(|existing| existing.ingredient_id == item.ingredient_id)
        else {
            return false;
        };

        let remaining = combine(&self.items[position], item, CombineOp::Subtract);
        if remaining.has_quantities() {
            self.items[position] = remaining;
        } else {
            self.items.remove(position);
        }
        true
    }

    /// Remove the entry for `ingredient_id`
    pub fn remove(&mut self, ingredient_id: IngredientId) -> Option<IngredientItem> {
        let position = self
            .items
            .iter()
            .position(|item| item.ingredient_id == ingredient_id)?;
        Some(self.items.remove(position))
    }

    pub fn into_items(self) -> Vec<IngredientItem> {
        self.items
    }
}

impl From<Vec<IngredientItem>> for FoodList {
    fn from(items: Vec<IngredientItem>) -> Self {
        items.into_iter().collect()
    }
}

impl From<FoodList> for Vec<IngredientItem> {
    fn from(list: FoodList) -> Self {
        list.items
    }
}

impl FromIterator<IngredientItem> for FoodList {
    fn from_iter<T: IntoIterator<Item = IngredientItem>>(iter: T) -> Self {
        let mut list = FoodList::new();
        for item in iter {
            list.add(item);
        }
        list
    }
}

impl IntoIterator for FoodList {
    type Item = IngredientItem;
    type IntoIter = std::vec::IntoIter<IngredientItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a FoodList {
    type Item = &'a IngredientItem;
    type IntoIter = std::slice::Iter<'a, IngredientItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Merge `incoming` into `existing`: matches are summed in place, new
/// ingredients are appended in arrival order
pub fn merge_lists<I>(mut existing: FoodList, incoming: I) -> FoodList
where
    I: IntoIterator<Item = IngredientItem>,
{
    for item in incoming {
        existing.add(item);
    }
    existing
}

/// Subtract `to_remove` from `existing`; entries left without any quantity
/// are dropped and unmatched removals are ignored
pub fn subtract_lists<'a, I>(mut existing: FoodList, to_remove: I) -> FoodList
where
    I: IntoIterator<Item = &'a IngredientItem>,
{
    for item in to_remove {
        existing.subtract(item);
    }
    existing
}
