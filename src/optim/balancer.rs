use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::IngredientCatalog;
use crate::error::{EngineError, EngineResult};
use crate::math::{clamp, percent_of, safe_divide};
use crate::metrics::{contributions, metrics_from_parts, CalcOptions, CoefficientSource, Contribution, MetricsV2, MetricsWarning};
use crate::optim::band_eval::band_error;
use crate::optim::feasibility::{classify, diagnose_feasibility_with, DiagnosisOptions, FeasibilityReport, Verdict};
use crate::optim::sources::{diagnose_sources, SourceDiagnosis};
use crate::params::{Dimension, EffectiveParameters, ProductBands, ProductType, Range};
use crate::recipe::{validate_ingredients, RecipeIngredient};

pub const DEFAULT_MAX_ITERATIONS: usize = 50;
pub const DEFAULT_CONVERGENCE_TOLERANCE: f64 = 0.001;
pub const DEFAULT_STALL_TOLERANCE: f64 = 0.001;
pub const DEFAULT_STALL_PATIENCE: usize = 3;
pub const DEFAULT_MIN_STEP_GRAMS: f64 = 1e-6;

const LEVERAGE_EPSILON: f64 = 1e-12;
const SCORE_EPSILON: f64 = 1e-12;
/// Aims sit this fraction of the band width inside each edge, next to the
/// midpoint.
const AIM_INSET: f64 = 0.05;
/// A round of per-dimension moves that removes less than this share of the
/// score is followed by a sweep over every line and pair of lines.
const SWEEP_BELOW_GAIN: f64 = 0.05;

/// How the balancer picks which ingredient to move for a failing dimension.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceSelection {
    /// Largest per-gram coefficient on the dimension's axis (fat sources for
    /// fat, sugars for sugars/SP, ...).
    #[default]
    StrongestCoefficient,
    /// Largest change of the dimension's percentage per gram moved, which
    /// also ranks diluents such as water.
    GreatestLeverage,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GramBounds {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl GramBounds {
    fn resolve(&self) -> (f64, f64) {
        (self.min.unwrap_or(0.0).max(0.0), self.max.unwrap_or(f64::INFINITY))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BalanceOptions {
    pub max_iterations: usize,
    /// Bands count as met within this fraction of each edge's value
    /// (0.001 accepts 0.1 % relative error).
    pub convergence_tolerance: f64,
    /// Relative score improvement under which an iteration counts as stalled.
    pub stall_tolerance: f64,
    /// Stalled iterations in a row before the search gives up.
    pub stall_patience: usize,
    /// Moves smaller than this many grams are treated as no-ops.
    pub min_step_grams: f64,
    /// Ingredient ids excluded from adjustment, on top of per-line `locked`.
    pub locked_ids: BTreeSet<String>,
    /// Extra per-ingredient bounds, intersected with the per-line bounds.
    pub bounds: BTreeMap<String, GramBounds>,
    pub source_selection: SourceSelection,
    /// Lets the balancer add a catalog ingredient when no line in the recipe
    /// can move a failing dimension.
    pub add_from_catalog: bool,
    pub diagnosis: DiagnosisOptions,
    pub calc: CalcOptions,
}

impl Default for BalanceOptions {
    fn default() -> Self {
        BalanceOptions {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_tolerance: DEFAULT_CONVERGENCE_TOLERANCE,
            stall_tolerance: DEFAULT_STALL_TOLERANCE,
            stall_patience: DEFAULT_STALL_PATIENCE,
            min_step_grams: DEFAULT_MIN_STEP_GRAMS,
            locked_ids: BTreeSet::new(),
            bounds: BTreeMap::new(),
            source_selection: SourceSelection::default(),
            add_from_catalog: false,
            diagnosis: DiagnosisOptions::default(),
            calc: CalcOptions::default(),
        }
    }
}

impl BalanceOptions {
    pub fn validate(&self) -> EngineResult<()> {
        let non_negative = |name: &str, v: f64| {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(EngineError::InvalidOptions(format!("{} must be finite and >= 0, got {}", name, v)))
            }
        };
        non_negative("convergence_tolerance", self.convergence_tolerance)?;
        non_negative("stall_tolerance", self.stall_tolerance)?;
        non_negative("min_step_grams", self.min_step_grams)?;
        non_negative("warn_margin_fraction", self.diagnosis.warn_margin_fraction)?;
        non_negative("relative_tolerance", self.diagnosis.relative_tolerance)?;
        if self.stall_patience == 0 {
            return Err(EngineError::InvalidOptions("stall_patience must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.calc.evaporation_pct) {
            return Err(EngineError::InvalidOptions(format!(
                "evaporation_pct must be within [0, 100], got {}",
                self.calc.evaporation_pct
            )));
        }
        for (id, b) in &self.bounds {
            let min = b.min.unwrap_or(0.0);
            let max = b.max.unwrap_or(f64::INFINITY);
            if min.is_nan() || max.is_nan() || min < 0.0 || min > max {
                return Err(EngineError::InvalidBounds {
                    ingredient_id: id.clone(),
                    min,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Diagnosis options the balancer judges convergence with.
    fn convergence_diagnosis(&self) -> DiagnosisOptions {
        DiagnosisOptions {
            relative_tolerance: self.diagnosis.relative_tolerance.max(self.convergence_tolerance),
            ..self.diagnosis.clone()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    AlreadyFeasible,
    Converged,
    MaxIterations,
    /// No move improved the recipe, or the score stopped improving.
    Stalled,
}

/// Why a line's quantity changed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "dimension")]
pub enum AdjustmentReason {
    /// Moved toward a point inside this dimension's band.
    Band(Dimension),
    /// The starting quantity lay outside the line's gram bounds.
    Bounds,
    /// Added from the catalog, then moved like any other line.
    Added,
}

/// One quantity change made while balancing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Adjustment {
    /// Zero for changes made before the first iteration.
    pub iteration: usize,
    pub reason: AdjustmentReason,
    pub line: usize,
    pub ingredient_id: String,
    pub from_grams: f64,
    pub to_grams: f64,
    /// The move was cut short by the line's gram bounds.
    pub clamped: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResult {
    pub recipe: Vec<RecipeIngredient>,
    pub metrics: MetricsV2,
    pub feasibility: FeasibilityReport,
    pub original_metrics: MetricsV2,
    pub iterations: usize,
    pub converged: bool,
    pub stop_reason: StopReason,
    /// Hard dimensions still outside their band in the returned recipe.
    pub unresolved: Vec<Dimension>,
    pub adjustments: Vec<Adjustment>,
    pub sources: SourceDiagnosis,
}

/// One recipe line as the search sees it.
struct Line {
    row: RecipeIngredient,
    part: Contribution,
    bounds: (f64, f64),
    locked: bool,
}

fn effective_bounds(row: &RecipeIngredient, options: &BalanceOptions) -> EngineResult<(f64, f64)> {
    let (mut lo, mut hi) = row.gram_bounds();
    if let Some(extra) = options.bounds.get(&row.ingredient_id) {
        let (extra_lo, extra_hi) = extra.resolve();
        lo = lo.max(extra_lo);
        hi = hi.min(extra_hi);
    }
    if lo > hi {
        return Err(EngineError::InvalidBounds {
            ingredient_id: row.ingredient_id.clone(),
            min: lo,
            max: hi,
        });
    }
    Ok((lo, hi))
}

/// A percentage the search tries to put one dimension at.
#[derive(Debug, Clone, Copy)]
struct Aim {
    dimension: Dimension,
    percent: f64,
}

/// Midpoint and both inset points of every hard band.
fn aims_for(bands: &ProductBands) -> Vec<Aim> {
    Dimension::HARD
        .into_iter()
        .filter_map(|dimension| bands.band(dimension).map(|band| (dimension, band)))
        .flat_map(|(dimension, band)| {
            let inset = band.width() * AIM_INSET;
            [band.midpoint(), band.min() + inset, band.max() - inset]
                .into_iter()
                .map(move |percent| Aim { dimension, percent })
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Step {
    line: usize,
    aim: Dimension,
    from: f64,
    to: f64,
    wanted: f64,
}

/// A trial of one or two line changes and the score it leads to.
#[derive(Debug, Clone)]
struct Move {
    score: f64,
    steps: Vec<Step>,
}

impl Move {
    fn better_than(&self, other: &Option<Move>) -> bool {
        other.as_ref().map_or(true, |o| self.score < o.score - SCORE_EPSILON)
    }
}

struct Mix {
    lines: Vec<Line>,
}

impl Mix {
    /// `(Σ grams·coef, Σ grams·weight)` for one dimension.
    fn sums(&self, dimension: Dimension) -> (f64, f64) {
        self.lines.iter().fold((0.0, 0.0), |(n, d), line| {
            let q = line.row.quantity_grams;
            (n + q * line.part.coefficient(dimension), d + q * line.part.weight)
        })
    }

    fn value(&self, dimension: Dimension) -> f64 {
        let (n, d) = self.sums(dimension);
        percent_of(n, d)
    }

    fn score(&self, bands: &ProductBands) -> f64 {
        band_error(bands, |dimension| self.value(dimension))
    }

    fn passes(&self, dimension: Dimension, band: Range, diagnosis: &DiagnosisOptions) -> bool {
        classify(self.value(dimension), band, diagnosis) == Verdict::Pass
    }

    fn feasible(&self, bands: &ProductBands, diagnosis: &DiagnosisOptions) -> bool {
        Dimension::HARD
            .into_iter()
            .all(|d| bands.band(d).map_or(true, |band| self.passes(d, band, diagnosis)))
    }

    /// Runs `check` with the given quantities in place, then restores them.
    fn with_quantities<T>(&mut self, quantities: &[(usize, f64)], check: impl Fn(&Mix) -> T) -> T {
        let saved: Vec<f64> = quantities.iter().map(|(i, _)| self.lines[*i].row.quantity_grams).collect();
        for (i, q) in quantities {
            self.lines[*i].row.quantity_grams = *q;
        }
        let out = check(&*self);
        for ((i, _), q) in quantities.iter().zip(saved) {
            self.lines[*i].row.quantity_grams = q;
        }
        out
    }

    fn apply(&mut self, mv: &Move) {
        for step in &mv.steps {
            self.lines[step.line].row.quantity_grams = step.to;
        }
    }

    /// Grams to add to `line` so that `aim.dimension` lands on `aim.percent`:
    /// `Δ = (t·D − N) / (c − t·w)`.
    fn step_toward(&self, line: usize, aim: Aim) -> Option<f64> {
        let (n, d) = self.sums(aim.dimension);
        let part = &self.lines[line].part;
        let t = aim.percent / 100.0;
        let leverage = part.coefficient(aim.dimension) - t * part.weight;
        if leverage.abs() < LEVERAGE_EPSILON {
            return None;
        }
        Some(safe_divide(t * d - n, leverage, 0.0))
    }

    /// Grams for two lines that put both aims on target at once.
    fn pair_toward(&self, i: usize, j: usize, a: Aim, b: Aim) -> Option<(f64, f64)> {
        let (na, d) = self.sums(a.dimension);
        let (nb, _) = self.sums(b.dimension);
        let (pi, pj) = (&self.lines[i].part, &self.lines[j].part);
        let (ta, tb) = (a.percent / 100.0, b.percent / 100.0);
        let a11 = pi.coefficient(a.dimension) - ta * pi.weight;
        let a12 = pj.coefficient(a.dimension) - ta * pj.weight;
        let a21 = pi.coefficient(b.dimension) - tb * pi.weight;
        let a22 = pj.coefficient(b.dimension) - tb * pj.weight;
        let det = a11 * a22 - a12 * a21;
        if det.abs() < LEVERAGE_EPSILON {
            return None;
        }
        let (r1, r2) = (ta * d - na, tb * d - nb);
        Some(((r1 * a22 - a12 * r2) / det, (a11 * r2 - a21 * r1) / det))
    }

    fn step(&self, line: usize, aim: Dimension, delta: f64) -> Step {
        let from = self.lines[line].row.quantity_grams;
        let (lo, hi) = self.lines[line].bounds;
        let wanted = from + delta;
        Step {
            line,
            aim,
            from,
            to: clamp(wanted, lo, hi),
            wanted,
        }
    }

    /// Best-scoring single move of `line` over every aim.
    fn best_single(&mut self, line: usize, aims: &[Aim], bands: &ProductBands, min_step: f64) -> Option<Move> {
        let mut best: Option<Move> = None;
        for aim in aims {
            let Some(delta) = self.step_toward(line, *aim) else {
                continue;
            };
            let step = self.step(line, aim.dimension, delta);
            if (step.to - step.from).abs() < min_step {
                continue;
            }
            let score = self.with_quantities(&[(line, step.to)], |mix| mix.score(bands));
            let mv = Move { score, steps: vec![step] };
            if mv.better_than(&best) {
                best = Some(mv);
            }
        }
        best
    }

    /// Best-scoring simultaneous move of two lines over every pair of aims on
    /// different dimensions.
    fn best_pair(&mut self, lines: &[usize], aims: &[Aim], bands: &ProductBands, min_step: f64) -> Option<Move> {
        let mut best: Option<Move> = None;
        for (x, &i) in lines.iter().enumerate() {
            for &j in &lines[x + 1..] {
                for (y, a) in aims.iter().enumerate() {
                    for b in aims[y + 1..].iter().filter(|b| b.dimension != a.dimension) {
                        let Some((di, dj)) = self.pair_toward(i, j, *a, *b) else {
                            continue;
                        };
                        let si = self.step(i, a.dimension, di);
                        let sj = self.step(j, b.dimension, dj);
                        let moves_i = (si.to - si.from).abs() >= min_step;
                        let moves_j = (sj.to - sj.from).abs() >= min_step;
                        if !moves_i && !moves_j {
                            continue;
                        }
                        let score = self.with_quantities(&[(i, si.to), (j, sj.to)], |mix| mix.score(bands));
                        let steps = [(moves_i, si), (moves_j, sj)]
                            .into_iter()
                            .filter(|(moves, _)| *moves)
                            .map(|(_, s)| s)
                            .collect();
                        let mv = Move { score, steps };
                        if mv.better_than(&best) {
                            best = Some(mv);
                        }
                    }
                }
            }
        }
        best
    }

    fn unlocked(&self) -> Vec<usize> {
        (0..self.lines.len()).filter(|i| !self.lines[*i].locked).collect()
    }

    fn contains(&self, ingredient_id: &str) -> bool {
        self.lines.iter().any(|l| l.row.ingredient_id == ingredient_id)
    }

    fn rows(&self) -> Vec<RecipeIngredient> {
        self.lines.iter().map(|l| l.row.clone()).collect()
    }

    fn parts(&self) -> Vec<Contribution> {
        self.lines.iter().map(|l| l.part).collect()
    }
}

fn selection_key(selection: SourceSelection, coef: f64, leverage: f64) -> f64 {
    match selection {
        SourceSelection::StrongestCoefficient => coef,
        SourceSelection::GreatestLeverage => leverage.abs(),
    }
}

/// Unlocked lines able to move `dimension` in the needed direction, best first.
/// Lines already used for an earlier dimension this iteration go last.
fn rank_candidates(
    mix: &Mix,
    dimension: Dimension,
    target: f64,
    need_increase: bool,
    claimed: &[bool],
    selection: SourceSelection,
) -> Vec<usize> {
    let mut ranked: Vec<(bool, f64, usize)> = mix
        .lines
        .iter()
        .enumerate()
        .filter(|(_, line)| !line.locked)
        .filter_map(|(i, line)| {
            let coef = line.part.coefficient(dimension);
            let leverage = coef - target * line.part.weight;
            if leverage.abs() < LEVERAGE_EPSILON {
                return None;
            }
            let add_grams = (leverage > 0.0) == need_increase;
            let q = line.row.quantity_grams;
            let (lo, hi) = line.bounds;
            if (add_grams && q >= hi) || (!add_grams && q <= lo) {
                return None;
            }
            Some((claimed[i], selection_key(selection, coef, leverage), i))
        })
        .collect();

    ranked.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.total_cmp(&a.1)).then(a.2.cmp(&b.2)));
    ranked.into_iter().map(|(_, _, i)| i).collect()
}

/// Picks the move for one failing dimension: the first candidate, in ranking
/// order, whose best move lowers the score and passes the dimension; failing
/// that, the candidate whose move lowers the score most. The flag tells
/// whether the returned move passes the dimension.
#[allow(clippy::too_many_arguments)]
fn move_for_dimension(
    mix: &mut Mix,
    candidates: &[usize],
    dimension: Dimension,
    band: Range,
    aims: &[Aim],
    bands: &ProductBands,
    current: f64,
    diagnosis: &DiagnosisOptions,
    min_step: f64,
) -> Option<(Move, bool)> {
    let mut fallback: Option<Move> = None;
    for &line in candidates {
        let Some(mv) = mix.best_single(line, aims, bands, min_step) else {
            continue;
        };
        if mv.score >= current - SCORE_EPSILON {
            continue;
        }
        let quantities: Vec<(usize, f64)> = mv.steps.iter().map(|s| (s.line, s.to)).collect();
        if mix.with_quantities(&quantities, |m| m.passes(dimension, band, diagnosis)) {
            return Some((mv, true));
        }
        if mv.better_than(&fallback) {
            fallback = Some(mv);
        }
    }
    fallback.map(|mv| (mv, false))
}

/// Tries catalog ingredients the recipe lacks, best ranked first, and keeps
/// the first one whose move scores below `threshold`. The new line is pushed
/// onto `mix` and the move returned.
#[allow(clippy::too_many_arguments)]
fn catalog_addition<C: IngredientCatalog + ?Sized>(
    mix: &mut Mix,
    catalog: &C,
    source: &CoefficientSource<'_>,
    warnings: &mut Vec<MetricsWarning>,
    dimension: Dimension,
    target: f64,
    need_increase: bool,
    aims: &[Aim],
    bands: &ProductBands,
    threshold: f64,
    options: &BalanceOptions,
) -> Option<Move> {
    let mut ranked: Vec<(f64, Line, Vec<MetricsWarning>)> = catalog
        .ingredients()
        .into_iter()
        .filter(|data| !mix.contains(&data.id) && !options.locked_ids.contains(&data.id))
        .filter_map(|data| {
            let mut notes = Vec::new();
            let part = source.contribution(data, &mut notes);
            let coef = part.coefficient(dimension);
            let leverage = coef - target * part.weight;
            if leverage.abs() < LEVERAGE_EPSILON || (leverage > 0.0) != need_increase {
                return None;
            }
            let row = RecipeIngredient::new(&data.id, 0.0);
            let bounds = effective_bounds(&row, options).ok()?;
            if bounds.1 <= 0.0 {
                return None;
            }
            let line = Line {
                row,
                part,
                bounds,
                locked: false,
            };
            Some((selection_key(options.source_selection, coef, leverage), line, notes))
        })
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

    for (_, line, notes) in ranked {
        let id = line.row.ingredient_id.clone();
        mix.lines.push(line);
        let index = mix.lines.len() - 1;
        match mix.best_single(index, aims, bands, options.min_step_grams) {
            Some(mv) if mv.score < threshold - SCORE_EPSILON => {
                tracing::debug!(ingredient = %id, dimension = dimension.label(), "added from catalog");
                warnings.extend(notes);
                return Some(mv);
            }
            _ => {
                mix.lines.pop();
            }
        }
    }
    None
}

struct Snapshot {
    rows: Vec<RecipeIngredient>,
    metrics: MetricsV2,
    report: FeasibilityReport,
}

fn snapshot(
    mix: &Mix,
    warnings: &[MetricsWarning],
    product_type: ProductType,
    params: &EffectiveParameters,
    diagnosis: &DiagnosisOptions,
) -> Snapshot {
    let rows = mix.rows();
    let metrics = metrics_from_parts(&rows, &mix.parts(), warnings.to_vec());
    let report = diagnose_feasibility_with(&metrics, product_type, params, diagnosis);
    Snapshot { rows, metrics, report }
}

fn record(adjustments: &mut Vec<Adjustment>, mix: &Mix, iteration: usize, reason: Option<AdjustmentReason>, mv: &Move, min_step: f64) {
    for step in &mv.steps {
        let ingredient_id = mix.lines[step.line].row.ingredient_id.clone();
        let clamped = (step.to - step.wanted).abs() > min_step;
        tracing::debug!(
            iteration,
            aim = step.aim.label(),
            ingredient = %ingredient_id,
            from = step.from,
            to = step.to,
            clamped,
            "adjusted"
        );
        adjustments.push(Adjustment {
            iteration,
            reason: reason.unwrap_or(AdjustmentReason::Band(step.aim)),
            line: step.line,
            ingredient_id,
            from_grams: step.from,
            to_grams: step.to,
            clamped,
        });
    }
}

/// Moves ingredient quantities until every hard band of `product_type` is
/// met, or the search runs out of iterations or room to move.
///
/// Unlocked lines that start outside their gram bounds are first pulled
/// inside them. Each iteration then walks the failing hard dimensions in
/// priority order. For each one the ranked candidate lines are tried against
/// a set of aims (midpoint and inset points of every band), solving
/// `100·(N + c·Δ)/(D + w·Δ) = aim` in closed form and clamping to the line's
/// bounds; a move is only taken when it lowers the band-error score. When a
/// round gains little, a sweep over every unlocked line and pair of lines
/// takes the best improving move. Non-convergence is not an error: the
/// closest recipe found is returned with `converged = false`.
pub fn balance<C: IngredientCatalog + ?Sized>(
    recipe: &[RecipeIngredient],
    catalog: &C,
    product_type: ProductType,
    params: &EffectiveParameters,
    options: &BalanceOptions,
) -> EngineResult<BalanceResult> {
    options.validate()?;
    validate_ingredients(recipe)?;

    let diagnosis = options.convergence_diagnosis();
    let source = CoefficientSource::from_params(params, &options.calc);
    let mut warnings: Vec<MetricsWarning> = Vec::new();
    let parts = contributions(recipe, catalog, &source, &mut warnings);
    let bands = params.bands_for(product_type).cloned().unwrap_or_default();
    let sources = diagnose_sources(recipe, catalog, params.bands_for(product_type));
    if !sources.sufficient {
        tracing::warn!(product = %product_type, reason = ?sources.reason, "recipe lacks ingredient sources for balancing");
    }

    let mut lines = Vec::with_capacity(recipe.len());
    for (row, part) in recipe.iter().zip(parts) {
        let bounds = effective_bounds(row, options)?;
        let locked = row.locked || options.locked_ids.contains(&row.ingredient_id);
        let (lo, hi) = bounds;
        if locked && !(lo..=hi).contains(&row.quantity_grams) {
            return Err(EngineError::InvalidBounds {
                ingredient_id: row.ingredient_id.clone(),
                min: lo,
                max: hi,
            });
        }
        lines.push(Line {
            row: row.clone(),
            part,
            bounds,
            locked,
        });
    }
    let mut mix = Mix { lines };

    let original_metrics = metrics_from_parts(recipe, &mix.parts(), warnings.clone());
    let mut adjustments = Vec::new();
    for i in mix.unlocked() {
        let line = &mut mix.lines[i];
        let q = line.row.quantity_grams;
        let to = clamp(q, line.bounds.0, line.bounds.1);
        if to != q {
            tracing::debug!(ingredient = %line.row.ingredient_id, from = q, to, "start pulled inside bounds");
            adjustments.push(Adjustment {
                iteration: 0,
                reason: AdjustmentReason::Bounds,
                line: i,
                ingredient_id: line.row.ingredient_id.clone(),
                from_grams: q,
                to_grams: to,
                clamped: true,
            });
            line.row.quantity_grams = to;
        }
    }

    let mut current = mix.score(&bands);
    tracing::debug!(product = %product_type, score = current, "balance start");

    let finish = |mix: &Mix, warnings: &[MetricsWarning], iterations: usize, stop_reason: StopReason, adjustments: Vec<Adjustment>| {
        let end = snapshot(mix, warnings, product_type, params, &diagnosis);
        let converged = end.report.feasible;
        let unresolved = end.report.failing_hard();
        tracing::info!(
            product = %product_type,
            converged,
            iterations,
            unresolved = ?unresolved,
            "balance finished"
        );
        BalanceResult {
            recipe: end.rows,
            metrics: end.metrics,
            feasibility: end.report,
            original_metrics: original_metrics.clone(),
            iterations,
            converged,
            stop_reason,
            unresolved,
            adjustments,
            sources: sources.clone(),
        }
    };

    if mix.feasible(&bands, &diagnosis) {
        let reason = if adjustments.is_empty() {
            StopReason::AlreadyFeasible
        } else {
            StopReason::Converged
        };
        return Ok(finish(&mix, &warnings, 0, reason, adjustments));
    }

    let aims = aims_for(&bands);
    let mut iterations = 0;
    let mut stalls = 0;
    let mut stop_reason = StopReason::MaxIterations;

    for iteration in 1..=options.max_iterations {
        iterations = iteration;
        let start = current;
        let mut claimed = vec![false; mix.lines.len()];

        for dimension in Dimension::HARD {
            let Some(band) = bands.band(dimension) else {
                continue;
            };
            if mix.passes(dimension, band, &diagnosis) {
                continue;
            }

            let target = band.midpoint() / 100.0;
            let need_increase = mix.value(dimension) < band.min();
            let candidates = rank_candidates(&mix, dimension, target, need_increase, &claimed, options.source_selection);
            // own aims first so ties favour this dimension
            let ordered: Vec<Aim> = aims
                .iter()
                .filter(|a| a.dimension == dimension)
                .chain(aims.iter().filter(|a| a.dimension != dimension))
                .copied()
                .collect();

            let found = move_for_dimension(
                &mut mix,
                &candidates,
                dimension,
                band,
                &ordered,
                &bands,
                current,
                &diagnosis,
                options.min_step_grams,
            );
            let fixes_dimension = found.as_ref().map_or(false, |(_, passes)| *passes);
            let mut chosen = found.map(|(mv, _)| mv);
            let mut reason = None;
            if options.add_from_catalog && !fixes_dimension {
                let threshold = chosen.as_ref().map_or(current, |mv| mv.score);
                if let Some(mv) = catalog_addition(
                    &mut mix,
                    catalog,
                    &source,
                    &mut warnings,
                    dimension,
                    target,
                    need_increase,
                    &ordered,
                    &bands,
                    threshold,
                    options,
                ) {
                    claimed.push(false);
                    reason = Some(AdjustmentReason::Added);
                    chosen = Some(mv);
                }
            }

            match chosen {
                Some(mv) => {
                    record(&mut adjustments, &mix, iteration, reason, &mv, options.min_step_grams);
                    mix.apply(&mv);
                    for step in &mv.steps {
                        claimed[step.line] = true;
                    }
                    current = mv.score;
                }
                None => tracing::debug!(iteration, dimension = dimension.label(), "no improving move"),
            }
        }

        if mix.feasible(&bands, &diagnosis) {
            stop_reason = StopReason::Converged;
            break;
        }

        if start - current <= SWEEP_BELOW_GAIN * start {
            let unlocked = mix.unlocked();
            let mut best: Option<Move> = None;
            for &line in &unlocked {
                if let Some(mv) = mix.best_single(line, &aims, &bands, options.min_step_grams) {
                    if mv.better_than(&best) {
                        best = Some(mv);
                    }
                }
            }
            if let Some(mv) = mix.best_pair(&unlocked, &aims, &bands, options.min_step_grams) {
                if mv.better_than(&best) {
                    best = Some(mv);
                }
            }
            if let Some(mv) = best.filter(|mv| mv.score < current - SCORE_EPSILON) {
                tracing::debug!(iteration, score = mv.score, "sweep move");
                record(&mut adjustments, &mix, iteration, None, &mv, options.min_step_grams);
                mix.apply(&mv);
                current = mv.score;
            }
            if mix.feasible(&bands, &diagnosis) {
                stop_reason = StopReason::Converged;
                break;
            }
        }

        tracing::debug!(iteration, score = current, "iteration done");
        if start - current <= SCORE_EPSILON {
            stop_reason = StopReason::Stalled;
            break;
        }
        if start - current <= options.stall_tolerance * start {
            stalls += 1;
            if stalls >= options.stall_patience {
                stop_reason = StopReason::Stalled;
                break;
            }
        } else {
            stalls = 0;
        }
    }

    Ok(finish(&mix, &warnings, iterations, stop_reason, adjustments))
}
