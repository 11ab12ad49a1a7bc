use serde::{Deserialize, Serialize};

use crate::math::clamp;
use crate::metrics::MetricsV2;
use crate::params::{Dimension, EffectiveParameters, ProcessTargets, ProductType, Provenance, Range};

pub const DEFAULT_WARN_MARGIN_FRACTION: f64 = 0.10;
pub const DEFAULT_PASS_EPSILON: f64 = 1e-9;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Pass,
    /// Outside the band but within the warn margin.
    Warn,
    Fail,
    /// No band defined for this dimension; not a violation.
    Skipped,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DiagnosisOptions {
    /// Width of the warn zone on each side of a band, as a fraction of the
    /// band width.
    pub warn_margin_fraction: f64,
    /// Absolute slack applied to the band edges when deciding `Pass`.
    pub pass_epsilon: f64,
    /// Extra slack on each band edge, as a fraction of that edge's value.
    pub relative_tolerance: f64,
}

impl Default for DiagnosisOptions {
    fn default() -> Self {
        DiagnosisOptions {
            warn_margin_fraction: DEFAULT_WARN_MARGIN_FRACTION,
            pass_epsilon: DEFAULT_PASS_EPSILON,
            relative_tolerance: 0.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DimensionReport {
    pub dimension: Dimension,
    pub value: f64,
    pub band: Option<Range>,
    pub verdict: Verdict,
    pub hard: bool,
    /// Distance to the nearest band edge; zero when inside or skipped.
    pub deviation: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeasibilityReport {
    pub product_type: ProductType,
    pub dimensions: Vec<DimensionReport>,
    /// Hard gate: every hard dimension with a band passes.
    pub feasible: bool,
    pub source: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessTargets>,
}

impl FeasibilityReport {
    pub fn get(&self, dimension: Dimension) -> Option<&DimensionReport> {
        self.dimensions.iter().find(|d| d.dimension == dimension)
    }

    pub fn verdict(&self, dimension: Dimension) -> Verdict {
        self.get(dimension).map(|d| d.verdict).unwrap_or(Verdict::Skipped)
    }

    /// Hard dimensions that do not pass, in correction priority order.
    pub fn failing_hard(&self) -> Vec<Dimension> {
        self.dimensions
            .iter()
            .filter(|d| d.hard && matches!(d.verdict, Verdict::Warn | Verdict::Fail))
            .map(|d| d.dimension)
            .collect()
    }

    /// Advisory dimensions outside their band.
    pub fn advisories(&self) -> Vec<&DimensionReport> {
        self.dimensions
            .iter()
            .filter(|d| !d.hard && matches!(d.verdict, Verdict::Warn | Verdict::Fail))
            .collect()
    }
}

/// Classifies one value against one band.
pub fn classify(value: f64, band: Range, options: &DiagnosisOptions) -> Verdict {
    let epsilon = clamp(options.pass_epsilon, 0.0, f64::MAX);
    let relative = clamp(options.relative_tolerance, 0.0, f64::MAX);
    let low_slack = epsilon + relative * band.min().abs();
    let high_slack = epsilon + relative * band.max().abs();
    if value >= band.min() - low_slack && value <= band.max() + high_slack {
        return Verdict::Pass;
    }
    let slack = low_slack.max(high_slack);
    let margin = band.width() * clamp(options.warn_margin_fraction, 0.0, f64::MAX);
    if margin > 0.0 && band.contains_within(value, margin + slack) {
        Verdict::Warn
    } else {
        Verdict::Fail
    }
}

pub fn diagnose_feasibility(
    metrics: &MetricsV2,
    product_type: ProductType,
    params: &EffectiveParameters,
) -> FeasibilityReport {
    diagnose_feasibility_with(metrics, product_type, params, &DiagnosisOptions::default())
}

pub fn diagnose_feasibility_with(
    metrics: &MetricsV2,
    product_type: ProductType,
    params: &EffectiveParameters,
    options: &DiagnosisOptions,
) -> FeasibilityReport {
    let bands = params.bands_for(product_type);
    if bands.is_none() {
        tracing::warn!(
            product = %product_type,
            profile = %params.source.profile_id,
            "no bands defined for product type, every dimension skipped"
        );
    }

    let dimensions: Vec<DimensionReport> = Dimension::all()
        .map(|dimension| {
            let value = metrics.value(dimension);
            let band = bands.and_then(|b| b.band(dimension));
            let (verdict, deviation) = match band {
                Some(range) => (classify(value, range, options), range.distance(value)),
                None => (Verdict::Skipped, 0.0),
            };
            DimensionReport {
                dimension,
                value,
                band,
                verdict,
                hard: dimension.is_hard(),
                deviation,
            }
        })
        .collect();

    let feasible = dimensions
        .iter()
        .filter(|d| d.hard)
        .all(|d| matches!(d.verdict, Verdict::Pass | Verdict::Skipped));

    FeasibilityReport {
        product_type,
        dimensions,
        feasible,
        source: params.source.clone(),
        process: params.parameters.process.clone(),
    }
}
