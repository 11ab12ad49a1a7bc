//! Built-in parameter profiles and the base ⊕ profile ⊕ overrides merge that
//! turns them into an [`EffectiveParameters`] snapshot.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{
    EffectiveParameters, ParameterSet, ProcessTargets, ProductBands, ProductType, ProfileStyle,
    Provenance, Range, SugarCoeff, SugarCoeffs,
};
use crate::error::{EngineError, EngineResult};

pub const BASE_VERSION: &str = "base-1.0.0";
pub const DEFAULT_PROFILE_ID: &str = "mp-artisan-v2024";

const LACTOSE_SHARE_OF_MSNF: f64 = 0.545;

fn bands(ts: (f64, f64), fat: (f64, f64), sugars: (f64, f64), msnf: (f64, f64), sp: (f64, f64), pac: (f64, f64)) -> ProductBands {
    ProductBands {
        ts: Some(Range(ts.0, ts.1)),
        fat: Some(Range(fat.0, fat.1)),
        sugars: Some(Range(sugars.0, sugars.1)),
        msnf: Some(Range(msnf.0, msnf.1)),
        sp: Some(Range(sp.0, sp.1)),
        pac: Some(Range(pac.0, pac.1)),
        stabilizer: None,
        fruit_pct: None,
    }
}

fn default_sugar_table() -> SugarCoeffs {
    [
        ("sucrose", 1.00, 1.00),
        ("dextrose", 0.74, 1.90),
        ("fructose", 1.73, 1.90),
        ("invert", 1.25, 1.90),
        ("lactose", 0.16, 1.00),
        ("glucose_de60", 0.50, 1.18),
        ("honey", 1.30, 1.46),
        ("corn_syrup", 0.33, 1.90),
        ("maltodextrin", 0.20, 0.30),
    ]
    .into_iter()
    .map(|(name, sp, pac)| (name.to_string(), SugarCoeff { sp, pac }))
    .collect()
}

/// Sugar coefficients, lactose share and process temperatures shared by all
/// profiles. Carries no bands.
pub fn base_defaults() -> ParameterSet {
    ParameterSet {
        id: "base-defaults".to_string(),
        name: "Base Defaults".to_string(),
        version: "1.0.0".to_string(),
        style: ProfileStyle::Artisan,
        bands: Default::default(),
        sugar: default_sugar_table(),
        process: Some(ProcessTargets {
            entry_temp_c: Some(Range(1.0, 4.0)),
            draw_temp_c: Some(Range(-7.0, -5.0)),
            serve_temp_c: Some(Range(-13.0, -11.0)),
            store_temp_c: Some(Range(-20.0, -18.0)),
            overrun_pct: None,
        }),
        lactose_fraction: Some(LACTOSE_SHARE_OF_MSNF),
        notes: vec!["Merge base; do not edit.".to_string()],
    }
}

pub fn mp_artisan_v2024() -> ParameterSet {
    let mut set = ParameterSet {
        id: "mp-artisan-v2024".to_string(),
        name: "MP-Artisan".to_string(),
        version: "2024.08".to_string(),
        style: ProfileStyle::Artisan,
        notes: vec!["Pinned to existing recipes for reproducibility.".to_string()],
        ..Default::default()
    };
    set.bands.insert(ProductType::IceCream, bands((37.0, 46.0), (10.0, 20.0), (16.0, 22.0), (7.0, 12.0), (12.0, 22.0), (22.0, 28.0)));
    set.bands.insert(ProductType::GelatoFinished, bands((32.0, 40.0), (6.0, 12.0), (18.0, 24.0), (7.0, 12.0), (12.0, 22.0), (22.0, 28.0)));
    set.bands.insert(ProductType::Sorbet, bands((22.0, 30.0), (0.0, 0.0), (26.0, 31.0), (0.0, 0.0), (20.0, 28.0), (28.0, 33.0)));
    set.bands.insert(ProductType::GelatoWhite, bands((32.0, 37.0), (3.0, 7.0), (16.0, 19.0), (7.0, 12.0), (12.0, 22.0), (22.0, 28.0)));
    set.bands.insert(ProductType::FruitGelato, bands((32.0, 42.0), (3.0, 10.0), (22.0, 24.0), (3.0, 7.0), (18.0, 26.0), (25.0, 29.0)));
    set
}

pub fn science_v2025() -> ParameterSet {
    let with_stabilizer = |mut b: ProductBands, lo: f64, hi: f64| {
        b.stabilizer = Some(Range(lo, hi));
        b
    };

    let mut set = ParameterSet {
        id: "science-v2025".to_string(),
        name: "Science (Goff/Hartel)".to_string(),
        version: "2025.09".to_string(),
        style: ProfileStyle::Science,
        process: Some(ProcessTargets {
            overrun_pct: Some(Range(20.0, 50.0)),
            ..Default::default()
        }),
        notes: vec!["Science-backed checklist; optional.".to_string()],
        ..Default::default()
    };
    set.bands.insert(
        ProductType::IceCream,
        with_stabilizer(bands((36.0, 42.0), (10.0, 20.0), (13.0, 17.0), (7.0, 12.0), (12.0, 22.0), (22.0, 28.0)), 0.2, 0.5),
    );
    set.bands.insert(
        ProductType::GelatoWhite,
        with_stabilizer(bands((36.0, 43.0), (4.0, 8.0), (16.0, 22.0), (11.0, 12.0), (12.0, 22.0), (22.0, 28.0)), 0.3, 0.6),
    );
    set.bands.insert(
        ProductType::GelatoFinished,
        with_stabilizer(bands((37.0, 46.0), (7.0, 16.0), (18.0, 22.0), (7.0, 12.0), (12.0, 22.0), (22.0, 28.0)), 0.3, 0.6),
    );
    set.bands.insert(
        ProductType::FruitGelato,
        with_stabilizer(bands((32.0, 42.0), (3.0, 10.0), (22.0, 24.0), (3.0, 7.0), (18.0, 26.0), (25.0, 29.0)), 0.2, 0.5),
    );
    let mut sorbet = with_stabilizer(
        bands((32.0, 42.0), (0.0, 0.0), (26.0, 31.0), (0.0, 0.0), (20.0, 28.0), (28.0, 33.0)),
        0.1,
        0.4,
    );
    sorbet.fruit_pct = Some(Range(35.0, 75.0));
    set.bands.insert(ProductType::Sorbet, sorbet);
    set
}

pub fn list_profiles() -> Vec<ParameterSet> {
    vec![mp_artisan_v2024(), science_v2025()]
}

pub fn builtin_profile(profile_id: &str) -> Option<ParameterSet> {
    list_profiles().into_iter().find(|p| p.id == profile_id)
}

/// Recursively merges `overlay` into `target`. Objects merge key by key;
/// arrays and scalars replace; `null` in the overlay leaves the target as is.
fn merge_values(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (_, Value::Null) => {}
        (Value::Object(t), Value::Object(o)) => {
            for (key, value) in o {
                if value.is_null() {
                    continue;
                }
                if let Some(existing) = t.get_mut(key) {
                    if existing.is_object() && value.is_object() {
                        merge_values(existing, value);
                        continue;
                    }
                }
                t.insert(key.clone(), value.clone());
            }
        }
        (t, o) => *t = o.clone(),
    }
}

/// SHA-256 hex digest of a JSON document, used to tag overridden snapshots.
/// Object keys serialize sorted, so equal documents hash equally.
pub fn hash_json(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Builds an effective snapshot: `base`, then `profile`, then optional user
/// `overrides` (a partial parameter-set document).
pub fn as_effective(
    base: &ParameterSet,
    profile: &ParameterSet,
    overrides: Option<&Value>,
) -> EngineResult<EffectiveParameters> {
    let mut merged = serde_json::to_value(base)?;
    merge_values(&mut merged, &serde_json::to_value(profile)?);
    if let Some(o) = overrides {
        if !o.is_object() {
            return Err(EngineError::Profile("overrides must be a JSON object".to_string()));
        }
        merge_values(&mut merged, o);
    }
    let parameters: ParameterSet = serde_json::from_value(merged)?;
    parameters.validate()?;

    Ok(EffectiveParameters {
        parameters,
        source: Provenance {
            base_version: BASE_VERSION.to_string(),
            profile_id: profile.id.clone(),
            profile_version: profile.version.clone(),
            overrides_hash: overrides.map(hash_json),
        },
    })
}

/// Resolves a built-in profile id against the base defaults.
pub fn effective_builtin(profile_id: &str, overrides: Option<&Value>) -> EngineResult<EffectiveParameters> {
    let profile = builtin_profile(profile_id)
        .ok_or_else(|| EngineError::Profile(format!("unknown profile id '{}'", profile_id)))?;
    as_effective(&base_defaults(), &profile, overrides)
}

pub fn load_profile_json(json: &str) -> EngineResult<ParameterSet> {
    let set: ParameterSet = serde_json::from_str(json)?;
    if set.id.trim().is_empty() {
        return Err(EngineError::Profile("profile id must not be empty".to_string()));
    }
    set.validate()?;
    Ok(set)
}
