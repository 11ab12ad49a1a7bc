use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// One line of a formulation. Duplicate ids are allowed and add up.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecipeIngredient {
    pub ingredient_id: String,
    pub quantity_grams: f64,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_grams: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_grams: Option<f64>,
}

impl RecipeIngredient {
    pub fn new(ingredient_id: &str, quantity_grams: f64) -> Self {
        RecipeIngredient {
            ingredient_id: ingredient_id.to_string(),
            quantity_grams,
            locked: false,
            min_grams: None,
            max_grams: None,
        }
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn with_bounds(mut self, min_grams: Option<f64>, max_grams: Option<f64>) -> Self {
        self.min_grams = min_grams;
        self.max_grams = max_grams;
        self
    }

    /// `[min, max]` grams the balancer may move this line within.
    pub fn gram_bounds(&self) -> (f64, f64) {
        (
            self.min_grams.unwrap_or(0.0).max(0.0),
            self.max_grams.unwrap_or(f64::INFINITY),
        )
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !self.quantity_grams.is_finite() || self.quantity_grams < 0.0 {
            return Err(EngineError::InvalidQuantity {
                ingredient_id: self.ingredient_id.clone(),
                quantity: self.quantity_grams,
            });
        }
        let min = self.min_grams.unwrap_or(0.0);
        let max = self.max_grams.unwrap_or(f64::INFINITY);
        if min.is_nan() || max.is_nan() || min < 0.0 || min > max {
            return Err(EngineError::InvalidBounds {
                ingredient_id: self.ingredient_id.clone(),
                min,
                max,
            });
        }
        Ok(())
    }
}

pub fn validate_ingredients(ingredients: &[RecipeIngredient]) -> EngineResult<()> {
    ingredients.iter().try_for_each(RecipeIngredient::validate)
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecipeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_profile_version: Option<String>,
}

/// A stored formulation as callers hand it to the engine.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    #[serde(default)]
    pub name: String,
    pub ingredients: Vec<RecipeIngredient>,
    #[serde(default)]
    pub meta: RecipeMeta,
}

impl Recipe {
    pub fn new(name: &str, ingredients: Vec<RecipeIngredient>) -> Self {
        Recipe {
            name: name.to_string(),
            ingredients,
            meta: RecipeMeta::default(),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        validate_ingredients(&self.ingredients)
    }
}

/// One-time migration: pins every recipe that has no parameter profile to
/// the given profile id and version. Returns how many recipes were changed.
pub fn pin_profiles(recipes: &mut [Recipe], profile_id: &str, profile_version: &str) -> usize {
    let mut pinned = 0;
    for recipe in recipes.iter_mut() {
        if recipe.meta.parameter_profile_id.is_none() {
            recipe.meta.parameter_profile_id = Some(profile_id.to_string());
            recipe.meta.parameter_profile_version = Some(profile_version.to_string());
            pinned += 1;
        }
    }
    pinned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_quantity_rejected() {
        let err = RecipeIngredient::new("milk", -1.0).validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuantity { .. }));
    }

    #[test]
    fn test_nan_quantity_rejected() {
        assert!(RecipeIngredient::new("milk", f64::NAN).validate().is_err());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let line = RecipeIngredient::new("cream", 100.0).with_bounds(Some(200.0), Some(150.0));
        assert!(matches!(line.validate(), Err(EngineError::InvalidBounds { .. })));
    }

    #[test]
    fn test_gram_bounds_defaults() {
        let line = RecipeIngredient::new("cream", 100.0);
        assert_eq!(line.gram_bounds(), (0.0, f64::INFINITY));
        let line = line.with_bounds(Some(50.0), Some(150.0));
        assert_eq!(line.gram_bounds(), (50.0, 150.0));
    }

    #[test]
    fn test_recipe_json_shape() {
        let json = r#"{ "name": "base", "ingredients": [
            { "ingredientId": "milk", "quantityGrams": 500 },
            { "ingredientId": "cream", "quantityGrams": 100, "locked": true, "maxGrams": 200 }
        ] }"#;
        let recipe: Recipe = serde_json::from_str(json).unwrap();
        assert_eq!(recipe.ingredients.len(), 2);
        assert!(recipe.ingredients[1].locked);
        assert_eq!(recipe.ingredients[1].max_grams, Some(200.0));
        assert!(recipe.validate().is_ok());
    }

    #[test]
    fn test_pin_profiles_only_touches_unpinned() {
        let mut recipes = vec![Recipe::new("a", vec![]), Recipe::new("b", vec![])];
        recipes[1].meta.parameter_profile_id = Some("science-v2025".to_string());
        recipes[1].meta.parameter_profile_version = Some("2025.09".to_string());

        let changed = pin_profiles(&mut recipes, "mp-artisan-v2024", "2024.08");
        assert_eq!(changed, 1);
        assert_eq!(recipes[0].meta.parameter_profile_id.as_deref(), Some("mp-artisan-v2024"));
        assert_eq!(recipes[1].meta.parameter_profile_id.as_deref(), Some("science-v2025"));

        // running it again is a no-op
        assert_eq!(pin_profiles(&mut recipes, "mp-artisan-v2024", "2024.08"), 0);
    }
}
