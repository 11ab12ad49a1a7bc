//! Pre-flight check that a recipe (or the catalog behind it) has the kinds of
//! ingredient balancing needs: a diluent plus fat, MSNF and sugar sources.

use serde::{Deserialize, Serialize};

use crate::catalog::{IngredientCatalog, IngredientData};
use crate::params::{ProductBands, Range};
use crate::recipe::RecipeIngredient;

pub const MIN_BALANCEABLE_LINES: usize = 3;

/// Recipe thresholds are looser than catalog ones: a line already in the mix
/// only has to carry some of the component, an addition has to be a real
/// source of it.
const WATER_IN_RECIPE_PCT: f64 = 80.0;
const WATER_IN_CATALOG_PCT: f64 = 95.0;
const FAT_IN_RECIPE_PCT: f64 = 2.0;
const FAT_IN_CATALOG_PCT: f64 = 30.0;
const MSNF_IN_RECIPE_PCT: f64 = 5.0;
const MSNF_IN_CATALOG_PCT: f64 = 85.0;
const SUGAR_SOURCE_PCT: f64 = 90.0;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceDiagnosis {
    pub has_water: bool,
    pub has_fat_source: bool,
    pub has_msnf_source: bool,
    pub has_sugar_source: bool,
    /// Enough lines and sources for the bands of the product type.
    pub sufficient: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

fn water_pct(ingredient: &IngredientData) -> f64 {
    let solids = ingredient.fat_pct + ingredient.sugars_pct + ingredient.msnf_pct + ingredient.other_solids_pct;
    (100.0 - solids).clamp(0.0, 100.0)
}

/// Band that asks for a non-zero amount of the component.
fn requires(band: Option<Range>) -> bool {
    band.map(|b| b.min() > 0.0).unwrap_or(false)
}

pub fn diagnose_sources<C: IngredientCatalog + ?Sized>(
    recipe: &[RecipeIngredient],
    catalog: &C,
    bands: Option<&ProductBands>,
) -> SourceDiagnosis {
    let in_recipe: Vec<&IngredientData> = recipe
        .iter()
        .filter_map(|line| catalog.lookup(&line.ingredient_id))
        .collect();
    let available = catalog.ingredients();

    let found = |recipe_test: &dyn Fn(&IngredientData) -> bool, catalog_test: &dyn Fn(&IngredientData) -> bool| {
        in_recipe.iter().any(|i| recipe_test(i)) || available.iter().any(|i| catalog_test(i))
    };

    let has_water = found(&|i| water_pct(i) >= WATER_IN_RECIPE_PCT, &|i| water_pct(i) >= WATER_IN_CATALOG_PCT);
    let has_fat_source = found(&|i| i.fat_pct >= FAT_IN_RECIPE_PCT, &|i| i.fat_pct >= FAT_IN_CATALOG_PCT);
    let has_msnf_source = found(&|i| i.msnf_pct >= MSNF_IN_RECIPE_PCT, &|i| i.msnf_pct >= MSNF_IN_CATALOG_PCT);
    let has_sugar_source = found(&|i| i.sugars_pct >= SUGAR_SOURCE_PCT, &|i| i.sugars_pct >= SUGAR_SOURCE_PCT);

    let needs_fat = requires(bands.and_then(|b| b.fat));
    let needs_msnf = requires(bands.and_then(|b| b.msnf));
    let lines = recipe.len();

    let mut suggestions = Vec::new();
    if !has_water {
        suggestions.push("Add water as a diluent".to_string());
    }
    if !has_fat_source && needs_fat {
        suggestions.push("Add a high-fat ingredient such as cream 35% or butter".to_string());
    }
    if !has_msnf_source && needs_msnf {
        suggestions.push("Add skim milk powder to raise MSNF without fat".to_string());
    }
    if !has_sugar_source {
        suggestions.push("Add sucrose or dextrose for sweetness and freezing point control".to_string());
    }
    if lines < MIN_BALANCEABLE_LINES {
        suggestions.push(format!(
            "Add more ingredients (current: {}, minimum: {})",
            lines, MIN_BALANCEABLE_LINES
        ));
    }

    let reason = if lines < MIN_BALANCEABLE_LINES {
        Some(format!("Recipe too simple: balancing needs at least {} ingredients", MIN_BALANCEABLE_LINES))
    } else if !has_water {
        Some("Missing water or another diluent: concentrations cannot be lowered".to_string())
    } else if !has_fat_source && needs_fat {
        Some("Missing high-fat ingredient in recipe and catalog".to_string())
    } else if !has_msnf_source && needs_msnf {
        Some("Missing MSNF source in recipe and catalog".to_string())
    } else {
        None
    };

    SourceDiagnosis {
        has_water,
        has_fat_source,
        has_msnf_source,
        has_sugar_source,
        sufficient: reason.is_none(),
        reason,
        suggestions,
    }
}
