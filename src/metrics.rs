use serde::{Deserialize, Serialize};

use crate::catalog::{IngredientCatalog, IngredientCategory, IngredientData};
use crate::math::{clamp, percent_of, safe_ratio};
use crate::params::{Dimension, EffectiveParameters, SugarCoeff, SugarCoeffs};
use crate::recipe::RecipeIngredient;

const LACTOSE: &str = "lactose";
const SUCROSE: &str = "sucrose";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalcOptions {
    /// Share of the mix water boiled off during cooking, in percent.
    #[serde(default)]
    pub evaporation_pct: f64,
}

/// Absolute composition of a batch, in grams.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total_weight: f64,
    pub total_solids: f64,
    pub sugars: f64,
    pub fat: f64,
    pub msnf: f64,
    pub other: f64,
    pub water: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MetricsWarning {
    #[serde(rename_all = "camelCase")]
    UnresolvedIngredient { ingredient_id: String },
    #[serde(rename_all = "camelCase")]
    UnknownSugarType { ingredient_id: String, sugar_type: String },
    /// Composition percentages added up to more than 100 and were scaled down.
    #[serde(rename_all = "camelCase")]
    CompositionOverflow { ingredient_id: String, solids_pct: f64 },
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsV2 {
    #[serde(flatten)]
    pub totals: Totals,

    pub ts_pct: f64,
    pub fat_pct: f64,
    pub sugars_pct: f64,
    pub msnf_pct: f64,
    pub other_pct: f64,
    pub water_pct: f64,

    /// Sweetness power in sucrose-equivalent grams.
    pub sp_g: f64,
    /// Anti-freezing power in sucrose-equivalent grams.
    pub pac_g: f64,
    /// Sweetness power per 100 g of mix.
    pub sp: f64,
    /// Anti-freezing power per 100 g of mix.
    pub pac: f64,

    pub stabilizer_pct: f64,
    pub fruit_pct: f64,

    pub warnings: Vec<MetricsWarning>,
}

impl MetricsV2 {
    /// AFP is the same index as PAC under its other name.
    pub fn afp(&self) -> f64 {
        self.pac
    }

    pub fn value(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Ts => self.ts_pct,
            Dimension::Fat => self.fat_pct,
            Dimension::Sugars => self.sugars_pct,
            Dimension::Msnf => self.msnf_pct,
            Dimension::Sp => self.sp,
            Dimension::Pac => self.pac,
            Dimension::Stabilizer => self.stabilizer_pct,
            Dimension::FruitPct => self.fruit_pct,
        }
    }

    pub fn unresolved_ids(&self) -> Vec<&str> {
        self.warnings
            .iter()
            .filter_map(|w| match w {
                MetricsWarning::UnresolvedIngredient { ingredient_id } => Some(ingredient_id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Per-gram contribution of one recipe line to every bucket and index.
///
/// Every metric is `100 * Σ grams·coef / Σ grams·weight`, which is what lets
/// the balancer solve each correction step in closed form.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Contribution {
    pub solids: f64,
    pub fat: f64,
    pub sugars: f64,
    pub msnf: f64,
    pub other: f64,
    pub sp: f64,
    pub pac: f64,
    pub stabilizer: f64,
    pub fruit: f64,
    /// Grams of finished mix per gram of ingredient (below 1 under evaporation).
    pub weight: f64,
}

impl Contribution {
    pub fn coefficient(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Ts => self.solids,
            Dimension::Fat => self.fat,
            Dimension::Sugars => self.sugars,
            Dimension::Msnf => self.msnf,
            Dimension::Sp => self.sp,
            Dimension::Pac => self.pac,
            Dimension::Stabilizer => self.stabilizer,
            Dimension::FruitPct => self.fruit,
        }
    }
}

/// What the contribution model needs from a parameter snapshot.
#[derive(Debug, Clone, Copy)]
pub struct CoefficientSource<'a> {
    pub sugar: Option<&'a SugarCoeffs>,
    pub lactose_fraction: Option<f64>,
    pub evaporation_pct: f64,
}

impl<'a> CoefficientSource<'a> {
    pub fn from_params(params: &'a EffectiveParameters, options: &CalcOptions) -> Self {
        CoefficientSource {
            sugar: Some(params.sugar_coeffs()),
            lactose_fraction: params.parameters.lactose_fraction,
            evaporation_pct: options.evaporation_pct,
        }
    }

    fn sucrose_baseline(&self) -> SugarCoeff {
        self.sugar
            .and_then(|table| table.get(SUCROSE).copied())
            .unwrap_or(SugarCoeff::SUCROSE)
    }

    fn sugar_coeff(&self, ingredient: &IngredientData, warnings: &mut Vec<MetricsWarning>) -> SugarCoeff {
        let from_table = match ingredient.sugar_type.as_deref() {
            Some(kind) => match self.sugar.and_then(|table| table.get(kind)) {
                Some(coeff) => *coeff,
                None => {
                    if self.sugar.is_some() {
                        tracing::warn!(ingredient = %ingredient.id, sugar_type = kind, "unknown sugar type, using sucrose coefficients");
                        warnings.push(MetricsWarning::UnknownSugarType {
                            ingredient_id: ingredient.id.clone(),
                            sugar_type: kind.to_string(),
                        });
                    }
                    self.sucrose_baseline()
                }
            },
            None => self.sucrose_baseline(),
        };
        SugarCoeff {
            sp: ingredient.sp_coeff.unwrap_or(from_table.sp),
            pac: ingredient.pac_coeff.unwrap_or(from_table.pac),
        }
    }

    /// Resolves one catalog entry into its per-gram contribution.
    pub fn contribution(&self, ingredient: &IngredientData, warnings: &mut Vec<MetricsWarning>) -> Contribution {
        let mut fat = clamp(ingredient.fat_pct, 0.0, 100.0) / 100.0;
        let mut sugars = clamp(ingredient.sugars_pct, 0.0, 100.0) / 100.0;
        let mut msnf = clamp(ingredient.msnf_pct, 0.0, 100.0) / 100.0;
        let mut other = clamp(ingredient.other_solids_pct, 0.0, 100.0) / 100.0;

        let raw_solids = fat + sugars + msnf + other;
        if raw_solids > 1.0 {
            warnings.push(MetricsWarning::CompositionOverflow {
                ingredient_id: ingredient.id.clone(),
                solids_pct: raw_solids * 100.0,
            });
            let scale = safe_ratio(1.0, raw_solids);
            fat *= scale;
            sugars *= scale;
            msnf *= scale;
            other *= scale;
        }
        let solids = fat + sugars + msnf + other;

        let mut sp = 0.0;
        let mut pac = 0.0;
        if sugars > 0.0 {
            let coeff = self.sugar_coeff(ingredient, warnings);
            sp += sugars * coeff.sp;
            pac += sugars * coeff.pac;
        }
        if let (Some(fraction), Some(lactose)) = (
            self.lactose_fraction,
            self.sugar.and_then(|table| table.get(LACTOSE)),
        ) {
            let lactose_share = msnf * clamp(fraction, 0.0, 1.0);
            sp += lactose_share * lactose.sp;
            pac += lactose_share * lactose.pac;
        }

        let evaporation = clamp(self.evaporation_pct, 0.0, 100.0) / 100.0;
        Contribution {
            solids,
            fat,
            sugars,
            msnf,
            other,
            sp,
            pac,
            stabilizer: if ingredient.category == IngredientCategory::Stabilizer { 1.0 } else { 0.0 },
            fruit: if ingredient.category == IngredientCategory::Fruit { 1.0 } else { 0.0 },
            weight: (1.0 - evaporation) + evaporation * solids,
        }
    }
}

/// Contribution per recipe line, in recipe order. Unresolved ids yield a zero
/// contribution (including weight) and an `UnresolvedIngredient` warning.
pub fn contributions<C: IngredientCatalog + ?Sized>(
    ingredients: &[RecipeIngredient],
    catalog: &C,
    source: &CoefficientSource<'_>,
    warnings: &mut Vec<MetricsWarning>,
) -> Vec<Contribution> {
    ingredients
        .iter()
        .map(|line| match catalog.lookup(&line.ingredient_id) {
            Some(data) => source.contribution(data, warnings),
            None => {
                let already_reported = warnings.iter().any(|w| {
                    matches!(w, MetricsWarning::UnresolvedIngredient { ingredient_id } if ingredient_id == &line.ingredient_id)
                });
                if !already_reported {
                    tracing::warn!(ingredient = %line.ingredient_id, "ingredient not found in catalog, counted as zero");
                    warnings.push(MetricsWarning::UnresolvedIngredient {
                        ingredient_id: line.ingredient_id.clone(),
                    });
                }
                Contribution::default()
            }
        })
        .collect()
}

/// Quantities are read through `clamp` so a stray negative or NaN never
/// poisons the sums; contract checks happen at the engine boundary.
fn grams(line: &RecipeIngredient) -> f64 {
    clamp(line.quantity_grams, 0.0, f64::MAX)
}

#[derive(Debug, Clone, Default)]
struct Accumulation {
    totals: Totals,
    sp_g: f64,
    pac_g: f64,
    stabilizer_g: f64,
    fruit_g: f64,
}

fn accumulate(ingredients: &[RecipeIngredient], parts: &[Contribution]) -> Accumulation {
    let mut acc = Accumulation::default();
    for (line, part) in ingredients.iter().zip(parts) {
        let g = grams(line);
        acc.totals.total_weight += g * part.weight;
        acc.totals.fat += g * part.fat;
        acc.totals.sugars += g * part.sugars;
        acc.totals.msnf += g * part.msnf;
        acc.totals.other += g * part.other;
        acc.sp_g += g * part.sp;
        acc.pac_g += g * part.pac;
        acc.stabilizer_g += g * part.stabilizer;
        acc.fruit_g += g * part.fruit;
    }
    let t = &mut acc.totals;
    t.total_solids = t.sugars + t.fat + t.msnf + t.other;
    // guard against rounding pushing solids a hair above weight
    t.total_solids = t.total_solids.min(t.total_weight);
    t.water = (t.total_weight - t.total_solids).max(0.0);
    acc
}

/// Gram totals of a recipe. No evaporation is applied.
pub fn compute_totals<C: IngredientCatalog + ?Sized>(ingredients: &[RecipeIngredient], catalog: &C) -> Totals {
    let source = CoefficientSource {
        sugar: None,
        lactose_fraction: None,
        evaporation_pct: 0.0,
    };
    let mut warnings = Vec::new();
    let parts = contributions(ingredients, catalog, &source, &mut warnings);
    accumulate(ingredients, &parts).totals
}

fn sugar_only_source(sugar_coeffs: &SugarCoeffs) -> CoefficientSource<'_> {
    CoefficientSource {
        sugar: Some(sugar_coeffs),
        lactose_fraction: None,
        evaporation_pct: 0.0,
    }
}

/// Sweetness power of the sugars in the recipe, in sucrose-equivalent grams.
pub fn compute_sp<C: IngredientCatalog + ?Sized>(
    ingredients: &[RecipeIngredient],
    catalog: &C,
    sugar_coeffs: &SugarCoeffs,
) -> f64 {
    let mut warnings = Vec::new();
    let parts = contributions(ingredients, catalog, &sugar_only_source(sugar_coeffs), &mut warnings);
    accumulate(ingredients, &parts).sp_g
}

/// Anti-freezing power of the sugars in the recipe, in sucrose-equivalent grams.
pub fn compute_afp<C: IngredientCatalog + ?Sized>(
    ingredients: &[RecipeIngredient],
    catalog: &C,
    sugar_coeffs: &SugarCoeffs,
) -> f64 {
    let mut warnings = Vec::new();
    let parts = contributions(ingredients, catalog, &sugar_only_source(sugar_coeffs), &mut warnings);
    accumulate(ingredients, &parts).pac_g
}

pub fn calc_metrics_v2<C: IngredientCatalog + ?Sized>(
    ingredients: &[RecipeIngredient],
    catalog: &C,
    params: &EffectiveParameters,
) -> MetricsV2 {
    calc_metrics_v2_with(ingredients, catalog, params, &CalcOptions::default())
}

pub fn calc_metrics_v2_with<C: IngredientCatalog + ?Sized>(
    ingredients: &[RecipeIngredient],
    catalog: &C,
    params: &EffectiveParameters,
    options: &CalcOptions,
) -> MetricsV2 {
    let source = CoefficientSource::from_params(params, options);
    let mut warnings = Vec::new();
    let parts = contributions(ingredients, catalog, &source, &mut warnings);
    metrics_from_parts(ingredients, &parts, warnings)
}

/// Builds the metric record from already resolved contributions.
pub fn metrics_from_parts(
    ingredients: &[RecipeIngredient],
    parts: &[Contribution],
    warnings: Vec<MetricsWarning>,
) -> MetricsV2 {
    let acc = accumulate(ingredients, parts);
    let w = acc.totals.total_weight;

    MetricsV2 {
        ts_pct: percent_of(acc.totals.total_solids, w),
        fat_pct: percent_of(acc.totals.fat, w),
        sugars_pct: percent_of(acc.totals.sugars, w),
        msnf_pct: percent_of(acc.totals.msnf, w),
        other_pct: percent_of(acc.totals.other, w),
        water_pct: percent_of(acc.totals.water, w),
        sp_g: acc.sp_g,
        pac_g: acc.pac_g,
        sp: percent_of(acc.sp_g, w),
        pac: percent_of(acc.pac_g, w),
        stabilizer_pct: percent_of(acc.stabilizer_g, w),
        fruit_pct: percent_of(acc.fruit_g, w),
        totals: acc.totals,
        warnings,
    }
}
