pub mod profiles;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Inclusive `[min, max]` band; serialized as a two-element array.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Range(pub f64, pub f64);

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Range(min, max)
    }

    pub fn min(&self) -> f64 {
        self.0
    }

    pub fn max(&self) -> f64 {
        self.1
    }

    pub fn width(&self) -> f64 {
        (self.1 - self.0).max(0.0)
    }

    pub fn midpoint(&self) -> f64 {
        (self.0 + self.1) / 2.0
    }

    /// Membership test with an absolute slack on both ends.
    pub fn contains_within(&self, value: f64, slack: f64) -> bool {
        value >= self.0 - slack && value <= self.1 + slack
    }

    /// Both ends finite and `min <= max`.
    pub fn is_well_formed(&self) -> bool {
        self.0.is_finite() && self.1.is_finite() && self.0 <= self.1
    }

    /// Distance from the nearest bound; zero inside the band.
    pub fn distance(&self, value: f64) -> f64 {
        if value < self.0 {
            self.0 - value
        } else if value > self.1 {
            value - self.1
        } else {
            0.0
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    IceCream,
    GelatoWhite,
    GelatoFinished,
    FruitGelato,
    Sorbet,
}

impl ProductType {
    pub const ALL: [ProductType; 5] = [
        ProductType::IceCream,
        ProductType::GelatoWhite,
        ProductType::GelatoFinished,
        ProductType::FruitGelato,
        ProductType::Sorbet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::IceCream => "ice_cream",
            ProductType::GelatoWhite => "gelato_white",
            ProductType::GelatoFinished => "gelato_finished",
            ProductType::FruitGelato => "fruit_gelato",
            ProductType::Sorbet => "sorbet",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "ice_cream" => Ok(ProductType::IceCream),
            "gelato_white" | "gelato" => Ok(ProductType::GelatoWhite),
            "gelato_finished" => Ok(ProductType::GelatoFinished),
            "fruit_gelato" | "gelato_fruit" => Ok(ProductType::FruitGelato),
            "sorbet" => Ok(ProductType::Sorbet),
            _ => Err(EngineError::UnsupportedProductType(s.to_string())),
        }
    }
}

/// A checked metric axis. The first six are hard-gate dimensions, listed in
/// the order the balancer corrects them.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Ts,
    Fat,
    Sugars,
    Msnf,
    Sp,
    Pac,
    Stabilizer,
    FruitPct,
}

impl Dimension {
    pub const HARD: [Dimension; 6] = [
        Dimension::Ts,
        Dimension::Fat,
        Dimension::Sugars,
        Dimension::Msnf,
        Dimension::Sp,
        Dimension::Pac,
    ];

    pub const ADVISORY: [Dimension; 2] = [Dimension::Stabilizer, Dimension::FruitPct];

    pub fn is_hard(&self) -> bool {
        !matches!(self, Dimension::Stabilizer | Dimension::FruitPct)
    }

    pub fn all() -> impl Iterator<Item = Dimension> {
        Self::HARD.into_iter().chain(Self::ADVISORY)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dimension::Ts => "total solids",
            Dimension::Fat => "fat",
            Dimension::Sugars => "sugars",
            Dimension::Msnf => "MSNF",
            Dimension::Sp => "SP",
            Dimension::Pac => "PAC",
            Dimension::Stabilizer => "stabilizer",
            Dimension::FruitPct => "fruit",
        }
    }
}

/// Target bands for one product type. A missing band means the dimension is
/// not checked for that product.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductBands {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat: Option<Range>,
    #[serde(default, alias = "sugar", skip_serializing_if = "Option::is_none")]
    pub sugars: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msnf: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sp: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pac: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stabilizer: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fruit_pct: Option<Range>,
}

impl ProductBands {
    pub fn band(&self, dimension: Dimension) -> Option<Range> {
        match dimension {
            Dimension::Ts => self.ts,
            Dimension::Fat => self.fat,
            Dimension::Sugars => self.sugars,
            Dimension::Msnf => self.msnf,
            Dimension::Sp => self.sp,
            Dimension::Pac => self.pac,
            Dimension::Stabilizer => self.stabilizer,
            Dimension::FruitPct => self.fruit_pct,
        }
    }

    /// First dimension whose band is inverted or not finite.
    pub fn malformed(&self) -> Option<(Dimension, Range)> {
        Dimension::all().find_map(|d| self.band(d).filter(|r| !r.is_well_formed()).map(|r| (d, r)))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct SugarCoeff {
    pub sp: f64,
    pub pac: f64,
}

impl SugarCoeff {
    pub const SUCROSE: SugarCoeff = SugarCoeff { sp: 1.0, pac: 1.0 };
}

pub type SugarCoeffs = BTreeMap<String, SugarCoeff>;

/// Process bands. Advisory only; the balancer ignores them.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTargets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_temp_c: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw_temp_c: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_temp_c: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_temp_c: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrun_pct: Option<Range>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStyle {
    #[default]
    Artisan,
    Science,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub style: ProfileStyle,
    #[serde(default)]
    pub bands: BTreeMap<ProductType, ProductBands>,
    #[serde(default)]
    pub sugar: SugarCoeffs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessTargets>,
    /// Share of MSNF that is lactose. When set, lactose contributes to SP and
    /// PAC through the `lactose` entry of the sugar table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lactose_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl ParameterSet {
    /// Rejects bands that can never pass (inverted or non-finite).
    pub fn validate(&self) -> Result<(), EngineError> {
        for (product, bands) in &self.bands {
            if let Some((dimension, range)) = bands.malformed() {
                return Err(EngineError::Profile(format!(
                    "profile '{}': {} band for {} is malformed ([{}, {}])",
                    self.id,
                    dimension.label(),
                    product,
                    range.min(),
                    range.max()
                )));
            }
        }
        if let Some(fraction) = self.lactose_fraction {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(EngineError::Profile(format!(
                    "profile '{}': lactoseFraction must be within [0, 1], got {}",
                    self.id, fraction
                )));
            }
        }
        Ok(())
    }
}

/// Where an effective parameter snapshot came from. Passed through to every
/// report untouched.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub base_version: String,
    pub profile_id: String,
    pub profile_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides_hash: Option<String>,
}

/// Immutable, fully merged parameter snapshot handed to every engine call.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveParameters {
    #[serde(flatten)]
    pub parameters: ParameterSet,
    pub source: Provenance,
}

impl EffectiveParameters {
    /// Wraps a parameter set with provenance pointing at itself.
    pub fn from_parameter_set(parameters: ParameterSet) -> Self {
        let source = Provenance {
            base_version: profiles::BASE_VERSION.to_string(),
            profile_id: parameters.id.clone(),
            profile_version: parameters.version.clone(),
            overrides_hash: None,
        };
        EffectiveParameters { parameters, source }
    }

    pub fn bands_for(&self, product_type: ProductType) -> Option<&ProductBands> {
        self.parameters.bands.get(&product_type)
    }

    pub fn sugar_coeff(&self, sugar_type: &str) -> Option<SugarCoeff> {
        self.parameters.sugar.get(sugar_type).copied()
    }

    pub fn sugar_coeffs(&self) -> &SugarCoeffs {
        &self.parameters.sugar
    }
}
