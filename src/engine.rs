//! The in-process entry points callers use: evaluate a recipe, optionally
//! balance it, and return the `{ metrics, feasibility, balanced? }` shape.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::catalog::IngredientCatalog;
use crate::error::EngineResult;
use crate::metrics::{calc_metrics_v2_with, CalcOptions, MetricsV2};
use crate::optim::balancer::{balance, BalanceOptions, BalanceResult};
use crate::optim::feasibility::{diagnose_feasibility_with, DiagnosisOptions, FeasibilityReport};
use crate::params::{EffectiveParameters, ProductType};
use crate::recipe::RecipeIngredient;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub metrics: MetricsV2,
    pub feasibility: FeasibilityReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balanced: Option<BalanceResult>,
}

/// Metrics plus feasibility for one recipe snapshot.
pub fn evaluate<C: IngredientCatalog + ?Sized>(
    recipe: &[RecipeIngredient],
    catalog: &C,
    product_type: ProductType,
    params: &EffectiveParameters,
) -> EngineResult<Evaluation> {
    evaluate_with(recipe, catalog, product_type, params, &CalcOptions::default(), &DiagnosisOptions::default())
}

pub fn evaluate_with<C: IngredientCatalog + ?Sized>(
    recipe: &[RecipeIngredient],
    catalog: &C,
    product_type: ProductType,
    params: &EffectiveParameters,
    calc: &CalcOptions,
    diagnosis: &DiagnosisOptions,
) -> EngineResult<Evaluation> {
    crate::recipe::validate_ingredients(recipe)?;
    let metrics = calc_metrics_v2_with(recipe, catalog, params, calc);
    let feasibility = diagnose_feasibility_with(&metrics, product_type, params, diagnosis);
    Ok(Evaluation {
        metrics,
        feasibility,
        balanced: None,
    })
}

/// Evaluates the recipe as given and, when it is not feasible, balances it.
/// `metrics` and `feasibility` always describe the input recipe.
pub fn evaluate_and_balance<C: IngredientCatalog + ?Sized>(
    recipe: &[RecipeIngredient],
    catalog: &C,
    product_type: ProductType,
    params: &EffectiveParameters,
    options: &BalanceOptions,
) -> EngineResult<Evaluation> {
    let mut evaluation = evaluate_with(recipe, catalog, product_type, params, &options.calc, &options.diagnosis)?;
    if !evaluation.feasibility.feasible {
        evaluation.balanced = Some(balance(recipe, catalog, product_type, params, options)?);
    }
    Ok(evaluation)
}

/// Evaluates independent recipes in parallel. Results keep input order; one
/// invalid recipe does not affect the others.
pub fn evaluate_batch<C: IngredientCatalog + Sync + ?Sized>(
    recipes: &[Vec<RecipeIngredient>],
    catalog: &C,
    product_type: ProductType,
    params: &EffectiveParameters,
    options: Option<&BalanceOptions>,
) -> Vec<EngineResult<Evaluation>> {
    recipes
        .par_iter()
        .map(|recipe| match options {
            Some(opts) => evaluate_and_balance(recipe, catalog, product_type, params, opts),
            None => evaluate(recipe, catalog, product_type, params),
        })
        .collect()
}
