use mix_optim::catalog::{IngredientCategory, InMemoryCatalog, IngredientData};
use mix_optim::math::{clamp, safe_divide};
use mix_optim::metrics::{calc_metrics_v2_with, CalcOptions, MetricsV2};
use mix_optim::optim::balancer::{balance, AdjustmentReason, BalanceOptions, SourceSelection, DEFAULT_CONVERGENCE_TOLERANCE};
use mix_optim::optim::feasibility::{classify, diagnose_feasibility, DiagnosisOptions, Verdict};
use mix_optim::params::profiles::{effective_builtin, list_profiles};
use mix_optim::params::{Dimension, EffectiveParameters, ParameterSet, ProductBands, ProductType, Range, SugarCoeff};
use mix_optim::recipe::RecipeIngredient;
use proptest::prelude::*;

fn fixed_catalog() -> InMemoryCatalog {
    vec![
        IngredientData::new("milk").with_fat(3.5).with_msnf(8.5),
        IngredientData::new("cream").with_fat(35.0),
        IngredientData::new("sucrose").with_sugars(100.0, "sucrose"),
        IngredientData::new("water"),
    ]
    .into_iter()
    .collect()
}

fn fat_band_params(band: Range) -> EffectiveParameters {
    let mut set = ParameterSet {
        id: "prop".to_string(),
        version: "1".to_string(),
        ..Default::default()
    };
    set.sugar.insert("sucrose".to_string(), SugarCoeff { sp: 1.0, pac: 1.0 });
    set.bands.insert(
        ProductType::IceCream,
        ProductBands {
            fat: Some(band),
            ..Default::default()
        },
    );
    EffectiveParameters::from_parameter_set(set)
}

fn lean_base(cream: f64) -> Vec<RecipeIngredient> {
    vec![
        RecipeIngredient::new("milk", 500.0),
        RecipeIngredient::new("cream", cream),
        RecipeIngredient::new("sucrose", 150.0),
        RecipeIngredient::new("water", 250.0),
    ]
}

fn dairy_catalog() -> InMemoryCatalog {
    vec![
        IngredientData::new("milk").with_fat(3.5).with_msnf(8.5),
        IngredientData::new("cream").with_fat(35.0),
        IngredientData::new("smp").with_fat(1.0).with_msnf(97.0),
        IngredientData::new("sucrose").with_sugars(100.0, "sucrose"),
        IngredientData::new("dextrose").with_sugars(100.0, "dextrose"),
        IngredientData::new("water"),
        IngredientData::new("lbg")
            .with_category(IngredientCategory::Stabilizer)
            .with_other_solids(100.0),
    ]
    .into_iter()
    .collect()
}

const MIX_IDS: [&str; 7] = ["milk", "cream", "smp", "sucrose", "dextrose", "water", "lbg"];

fn within_tolerance(value: f64, band: Range) -> bool {
    let slack = 1e-9 + DEFAULT_CONVERGENCE_TOLERANCE * band.min().abs().max(band.max().abs());
    band.contains_within(value, slack)
}

fn composition() -> impl Strategy<Value = (f64, f64, f64, f64)> {
    (0.0..60.0f64, 0.0..60.0f64, 0.0..60.0f64, 0.0..60.0f64)
}

fn selection() -> impl Strategy<Value = SourceSelection> {
    prop_oneof![
        Just(SourceSelection::StrongestCoefficient),
        Just(SourceSelection::GreatestLeverage),
    ]
}

proptest! {
    #[test]
    fn safe_divide_is_total(a in any::<f64>(), b in any::<f64>(), fallback in -1e6..1e6f64) {
        let q = safe_divide(a, b, fallback);
        prop_assert!(q.is_finite());
        prop_assert_eq!(safe_divide(a, 0.0, fallback), fallback);
    }

    #[test]
    fn clamp_stays_in_range(n in any::<f64>(), lo in -1e6..1e6f64, width in 0.0..1e6f64) {
        let hi = lo + width;
        let c = clamp(n, lo, hi);
        prop_assert!(c >= lo && c <= hi);
    }

    #[test]
    fn totals_are_consistent(
        comps in prop::collection::vec(composition(), 1..6),
        grams in prop::collection::vec(0.0..2000.0f64, 1..6),
        evaporation in 0.0..60.0f64,
    ) {
        let catalog: InMemoryCatalog = comps
            .iter()
            .enumerate()
            .map(|(i, (fat, sugars, msnf, other))| {
                IngredientData::new(&format!("ing{}", i))
                    .with_fat(*fat)
                    .with_sugars(*sugars, "sucrose")
                    .with_msnf(*msnf)
                    .with_other_solids(*other)
            })
            .collect();
        let recipe: Vec<RecipeIngredient> = grams
            .iter()
            .enumerate()
            .map(|(i, g)| RecipeIngredient::new(&format!("ing{}", i % comps.len()), *g))
            .collect();
        let params = effective_builtin("mp-artisan-v2024", None).unwrap();
        let metrics = calc_metrics_v2_with(&recipe, &catalog, &params, &CalcOptions { evaporation_pct: evaporation });

        let t = &metrics.totals;
        let sum = t.sugars + t.fat + t.msnf + t.other;
        prop_assert!((t.total_solids - sum).abs() <= 1e-6 * sum.max(1.0));
        prop_assert!(t.total_solids <= t.total_weight);
        prop_assert!(metrics.ts_pct.is_finite() && metrics.ts_pct <= 100.0 + 1e-9);
        prop_assert!(metrics.sp.is_finite() && metrics.pac.is_finite());
    }

    #[test]
    fn diagnosis_is_idempotent(
        ts in 0.0..80.0f64, fat in 0.0..30.0f64, sugars in 0.0..40.0f64,
        msnf in 0.0..20.0f64, sp in 0.0..40.0f64, pac in 0.0..40.0f64,
    ) {
        let params = effective_builtin("science-v2025", None).unwrap();
        let metrics = MetricsV2 { ts_pct: ts, fat_pct: fat, sugars_pct: sugars, msnf_pct: msnf, sp, pac, ..Default::default() };
        for product in ProductType::ALL {
            let a = diagnose_feasibility(&metrics, product, &params);
            let b = diagnose_feasibility(&metrics, product, &params);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.feasible, a.failing_hard().is_empty());
        }
    }

    #[test]
    fn warn_margin_boundaries(
        lo in 0.0..50.0f64,
        width in 0.1..20.0f64,
        fraction in 0.01..0.5f64,
        inside in 0.0..1.0f64,
    ) {
        let band = Range(lo, lo + width);
        let opts = DiagnosisOptions { warn_margin_fraction: fraction, ..Default::default() };
        let margin = width * fraction;

        prop_assert_eq!(classify(lo + width * inside, band, &opts), Verdict::Pass);
        prop_assert_eq!(classify(lo - margin * 0.5, band, &opts), Verdict::Warn);
        prop_assert_eq!(classify(lo + width + margin * 0.5, band, &opts), Verdict::Warn);
        prop_assert_eq!(classify(lo - margin * 1.5, band, &opts), Verdict::Fail);
        prop_assert_eq!(classify(lo + width + margin * 1.5, band, &opts), Verdict::Fail);
    }

    #[test]
    fn balancer_converges_on_solvable_fat_band(
        lo in 2.0..25.0f64,
        width in 1.0..8.0f64,
        policy in selection(),
    ) {
        let band = Range(lo, lo + width);
        let options = BalanceOptions { source_selection: policy, ..Default::default() };
        let result = balance(&lean_base(100.0), &fixed_catalog(), ProductType::IceCream, &fat_band_params(band), &options).unwrap();

        prop_assert!(result.converged);
        prop_assert!(result.unresolved.is_empty());
        prop_assert!(within_tolerance(result.metrics.fat_pct, band));
    }

    #[test]
    fn balancer_respects_bounds_and_locks(
        bounds in prop::collection::vec((0.0..1.0f64, 0.0..300.0f64, any::<bool>()), 4),
        policy in selection(),
    ) {
        let recipe: Vec<RecipeIngredient> = lean_base(100.0)
            .into_iter()
            .zip(&bounds)
            .map(|(line, (down, up, locked))| {
                let q = line.quantity_grams;
                let line = line.with_bounds(Some(q * down), Some(q + up));
                if *locked { line.locked() } else { line }
            })
            .collect();
        let options = BalanceOptions { source_selection: policy, ..Default::default() };
        let result = balance(&recipe, &fixed_catalog(), ProductType::IceCream, &fat_band_params(Range(10.0, 16.0)), &options).unwrap();

        for (before, after) in recipe.iter().zip(&result.recipe) {
            let (min, max) = before.gram_bounds();
            prop_assert!(after.quantity_grams >= min - 1e-9 && after.quantity_grams <= max + 1e-9);
            if before.locked {
                prop_assert_eq!(after.quantity_grams, before.quantity_grams);
            }
        }
        prop_assert_eq!(result.converged, result.feasibility.feasible);
        prop_assert_eq!(result.converged, result.unresolved.is_empty());
        if !result.converged {
            prop_assert_eq!(&result.unresolved, &vec![Dimension::Fat]);
        }
    }

    #[test]
    fn strongest_coefficient_reaches_for_cream_first(cream in 0.0..120.0f64) {
        let result = balance(
            &lean_base(cream),
            &fixed_catalog(),
            ProductType::IceCream,
            &fat_band_params(Range(10.0, 16.0)),
            &BalanceOptions::default(),
        )
        .unwrap();
        prop_assert_eq!(result.adjustments[0].ingredient_id.as_str(), "cream");
        prop_assert!(result.converged);
    }

    #[test]
    fn balancer_pulls_out_of_bounds_starts_inside(
        caps in prop::collection::vec((0.05..0.95f64, any::<bool>()), 4),
        policy in selection(),
    ) {
        // every capped line starts above its own maxGrams
        let recipe: Vec<RecipeIngredient> = lean_base(100.0)
            .into_iter()
            .zip(&caps)
            .map(|(line, (share, capped))| {
                let q = line.quantity_grams;
                if *capped { line.with_bounds(None, Some(q * share)) } else { line }
            })
            .collect();
        let options = BalanceOptions { source_selection: policy, ..Default::default() };
        let result = balance(&recipe, &fixed_catalog(), ProductType::IceCream, &fat_band_params(Range(10.0, 16.0)), &options).unwrap();

        for (before, after) in recipe.iter().zip(&result.recipe) {
            let (min, max) = before.gram_bounds();
            prop_assert!(after.quantity_grams >= min - 1e-9 && after.quantity_grams <= max + 1e-9);
        }
        let pulled = result.adjustments.iter().filter(|a| a.reason == AdjustmentReason::Bounds).count();
        prop_assert_eq!(pulled, caps.iter().filter(|(_, capped)| *capped).count());
        prop_assert_eq!(result.converged, result.feasibility.feasible);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        .. ProptestConfig::default()
    })]

    #[test]
    fn balancer_converges_on_builtin_profiles_from_any_start(
        grams in prop::collection::vec(1.0..800.0f64, 6),
        stabilizer in 1.0..20.0f64,
        policy in selection(),
    ) {
        let recipe: Vec<RecipeIngredient> = MIX_IDS
            .iter()
            .zip(grams.iter().chain(std::iter::once(&stabilizer)))
            .map(|(id, g)| RecipeIngredient::new(id, *g))
            .collect();
        let options = BalanceOptions { source_selection: policy, ..Default::default() };

        for profile in list_profiles() {
            let params = effective_builtin(&profile.id, None).unwrap();
            for product in ProductType::ALL {
                let result = balance(&recipe, &dairy_catalog(), product, &params, &options).unwrap();
                prop_assert!(result.converged, "{} / {} from {:?}: {:?}", profile.id, product, grams, result.unresolved);
                let bands = params.bands_for(product).cloned().unwrap_or_default();
                for dim in Dimension::HARD {
                    if let Some(band) = bands.band(dim) {
                        prop_assert!(within_tolerance(result.metrics.value(dim), band));
                    }
                }
            }
        }
    }
}
