use anyhow::{Context, Result};
use mix_optim::catalog::data_loader::load_ingredient_catalog;
use mix_optim::cli::{parse_args, Cli};
use mix_optim::engine::{evaluate_and_balance, evaluate_with, Evaluation};
use mix_optim::math::safe_percent;
use mix_optim::metrics::{CalcOptions, MetricsV2};
use mix_optim::optim::balancer::{AdjustmentReason, BalanceOptions};
use mix_optim::optim::feasibility::{DiagnosisOptions, FeasibilityReport, Verdict};
use mix_optim::params::profiles::{as_effective, base_defaults, effective_builtin, load_profile_json, DEFAULT_PROFILE_ID};
use mix_optim::params::{EffectiveParameters, ProductType};
use mix_optim::recipe::Recipe;
use serde_json::Value;
use std::env;
use std::path::Path;
use tokio::fs;
use tracing_subscriber::EnvFilter;

const PROFILE_ENV_VAR: &str = "MIX_OPTIM_PROFILE";
const CATALOG_ENV_VAR: &str = "MIX_OPTIM_CATALOG";
const DEFAULT_CATALOG_PATH: &str = "ingredients.csv";

async fn read_json_file(path: &str) -> Result<Value> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read '{}'", path))?;
    serde_json::from_str(&content).with_context(|| format!("'{}' is not valid JSON", path))
}

async fn load_parameters(cli: &Cli, recipe: &Recipe) -> Result<EffectiveParameters> {
    let overrides = match &cli.overrides_file {
        Some(path) => Some(read_json_file(path).await?),
        None => None,
    };

    if let Some(path) = &cli.profile_file {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read profile file '{}'", path))?;
        let profile = load_profile_json(&content).with_context(|| format!("Invalid profile in '{}'", path))?;
        return as_effective(&base_defaults(), &profile, overrides.as_ref())
            .with_context(|| format!("Failed to merge profile '{}'", profile.id));
    }

    let profile_id = cli
        .profile
        .clone()
        .or_else(|| recipe.meta.parameter_profile_id.clone())
        .or_else(|| env::var(PROFILE_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_PROFILE_ID.to_string());
    effective_builtin(&profile_id, overrides.as_ref())
        .with_context(|| format!("Failed to resolve parameter profile '{}'", profile_id))
}

fn print_metrics(metrics: &MetricsV2) {
    println!("  weight        {:>9.1} g", metrics.totals.total_weight);
    println!("  total solids  {:>10}", safe_percent(metrics.ts_pct, 2));
    println!("  fat           {:>10}", safe_percent(metrics.fat_pct, 2));
    println!("  sugars        {:>10}", safe_percent(metrics.sugars_pct, 2));
    println!("  MSNF          {:>10}", safe_percent(metrics.msnf_pct, 2));
    println!("  SP            {:>9.2}", metrics.sp);
    println!("  PAC           {:>9.2}", metrics.pac);
    for id in metrics.unresolved_ids() {
        println!("  ! '{}' is not in the catalog and was counted as zero", id);
    }
}

fn print_report(report: &FeasibilityReport) {
    for dim in &report.dimensions {
        let band = match dim.band {
            Some(range) => format!("[{}, {}]", range.min(), range.max()),
            None => "-".to_string(),
        };
        let marker = match dim.verdict {
            Verdict::Pass => "ok",
            Verdict::Warn => "warn",
            Verdict::Fail => "FAIL",
            Verdict::Skipped => "skip",
        };
        println!(
            "  {:<14}{:>9.2}  {:<14} {}{}",
            dim.dimension.label(),
            dim.value,
            band,
            marker,
            if dim.hard { "" } else { " (advisory)" }
        );
    }
    println!(
        "  feasible: {}  (profile {} {})",
        report.feasible, report.source.profile_id, report.source.profile_version
    );
}

fn print_evaluation(name: &str, evaluation: &Evaluation) {
    println!("\nRecipe '{}':", name);
    print_metrics(&evaluation.metrics);
    println!("\nFeasibility:");
    print_report(&evaluation.feasibility);

    if let Some(balanced) = &evaluation.balanced {
        println!(
            "\nBalancer: {} after {} iteration(s) ({:?})",
            if balanced.converged { "converged" } else { "did not converge" },
            balanced.iterations,
            balanced.stop_reason
        );
        for line in &balanced.recipe {
            println!("  {:<20}{:>10.1} g", line.ingredient_id, line.quantity_grams);
        }
        for adj in &balanced.adjustments {
            match adj.reason {
                AdjustmentReason::Added => println!("  + added '{}' from the catalog", adj.ingredient_id),
                AdjustmentReason::Bounds => println!(
                    "  ! '{}' started outside its bounds, moved {:.1} -> {:.1} g",
                    adj.ingredient_id, adj.from_grams, adj.to_grams
                ),
                AdjustmentReason::Band(_) => {}
            }
        }
        println!();
        print_metrics(&balanced.metrics);
        println!();
        print_report(&balanced.feasibility);
        if !balanced.unresolved.is_empty() {
            let labels: Vec<&str> = balanced.unresolved.iter().map(|d| d.label()).collect();
            println!("  unresolved: {}", labels.join(", "));
        }
        if !balanced.converged {
            if let Some(reason) = &balanced.sources.reason {
                println!("  {}", reason);
            }
            for suggestion in &balanced.sources.suggestions {
                println!("  - {}", suggestion);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();

    let recipe_content = fs::read_to_string(&cli.recipe_file)
        .await
        .with_context(|| format!("Failed to read recipe file '{}'", cli.recipe_file))?;
    let recipe: Recipe = serde_json::from_str(&recipe_content)
        .with_context(|| format!("Failed to parse recipe file '{}'", cli.recipe_file))?;

    let catalog_path = cli
        .catalog
        .clone()
        .or_else(|| env::var(CATALOG_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_CATALOG_PATH.to_string());
    let catalog = load_ingredient_catalog(Path::new(&catalog_path))
        .with_context(|| format!("Failed to load ingredient catalog from '{}'", catalog_path))?;
    tracing::info!(path = %catalog_path, ingredients = catalog.len(), "catalog loaded");

    let product_type: ProductType = cli.product_type.parse()?;
    let params = load_parameters(&cli, &recipe).await?;

    let calc = CalcOptions {
        evaporation_pct: cli.evaporation,
    };
    let evaluation = if cli.balance {
        let options = BalanceOptions {
            max_iterations: cli.max_iterations,
            source_selection: cli.selection.into(),
            add_from_catalog: cli.allow_additions,
            calc,
            ..Default::default()
        };
        evaluate_and_balance(&recipe.ingredients, &catalog, product_type, &params, &options)?
    } else {
        evaluate_with(&recipe.ingredients, &catalog, product_type, &params, &calc, &DiagnosisOptions::default())?
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
    } else {
        print_evaluation(&recipe.name, &evaluation);
    }

    Ok(())
}
