pub mod data_loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngredientCategory {
    Dairy,
    Sugar,
    Stabilizer,
    Fruit,
    Flavor,
    Fat,
    #[default]
    Other,
}

impl FromStr for IngredientCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dairy" => Ok(IngredientCategory::Dairy),
            "sugar" => Ok(IngredientCategory::Sugar),
            "stabilizer" => Ok(IngredientCategory::Stabilizer),
            "fruit" => Ok(IngredientCategory::Fruit),
            "flavor" | "flavour" => Ok(IngredientCategory::Flavor),
            "fat" => Ok(IngredientCategory::Fat),
            "other" | "" => Ok(IngredientCategory::Other),
            other => Err(format!("unknown ingredient category '{}'", other)),
        }
    }
}

/// Composition of one catalog ingredient, in percent of ingredient mass.
/// Anything not listed is water.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IngredientData {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: IngredientCategory,
    #[serde(default)]
    pub fat_pct: f64,
    #[serde(default)]
    pub sugars_pct: f64,
    #[serde(default)]
    pub msnf_pct: f64,
    #[serde(default)]
    pub other_solids_pct: f64,
    /// Key into the profile's sugar coefficient table (e.g. "dextrose").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugar_type: Option<String>,
    /// Overrides the sugar table's SP coefficient for this ingredient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sp_coeff: Option<f64>,
    /// Overrides the sugar table's PAC coefficient for this ingredient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pac_coeff: Option<f64>,
}

impl IngredientData {
    pub fn new(id: &str) -> Self {
        IngredientData {
            id: id.to_string(),
            name: id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: IngredientCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_fat(mut self, pct: f64) -> Self {
        self.fat_pct = pct;
        self
    }

    pub fn with_sugars(mut self, pct: f64, sugar_type: &str) -> Self {
        self.sugars_pct = pct;
        self.sugar_type = Some(sugar_type.to_string());
        self
    }

    pub fn with_msnf(mut self, pct: f64) -> Self {
        self.msnf_pct = pct;
        self
    }

    pub fn with_other_solids(mut self, pct: f64) -> Self {
        self.other_solids_pct = pct;
        self
    }
}

/// Read-only view of the ingredient catalog. The engine never fetches data
/// itself; callers materialize a snapshot and hand it in.
pub trait IngredientCatalog {
    fn lookup(&self, ingredient_id: &str) -> Option<&IngredientData>;

    /// Every ingredient, ordered by id. Catalogs that cannot enumerate
    /// return nothing, which disables catalog-driven additions.
    fn ingredients(&self) -> Vec<&IngredientData> {
        Vec::new()
    }
}

fn sorted_by_id<'a>(items: impl Iterator<Item = &'a IngredientData>) -> Vec<&'a IngredientData> {
    let mut items: Vec<&IngredientData> = items.collect();
    items.sort_by(|a, b| a.id.cmp(&b.id));
    items
}

impl IngredientCatalog for HashMap<String, IngredientData> {
    fn lookup(&self, ingredient_id: &str) -> Option<&IngredientData> {
        self.get(ingredient_id)
    }

    fn ingredients(&self) -> Vec<&IngredientData> {
        sorted_by_id(self.values())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    items: HashMap<String, IngredientData>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an ingredient, keyed by its id.
    pub fn insert(&mut self, ingredient: IngredientData) {
        self.items.insert(ingredient.id.clone(), ingredient);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IngredientData> {
        self.items.values()
    }
}

impl FromIterator<IngredientData> for InMemoryCatalog {
    fn from_iter<T: IntoIterator<Item = IngredientData>>(iter: T) -> Self {
        let mut catalog = InMemoryCatalog::new();
        for item in iter {
            catalog.insert(item);
        }
        catalog
    }
}

impl IngredientCatalog for InMemoryCatalog {
    fn lookup(&self, ingredient_id: &str) -> Option<&IngredientData> {
        self.items.get(ingredient_id)
    }

    fn ingredients(&self) -> Vec<&IngredientData> {
        sorted_by_id(self.items.values())
    }
}
