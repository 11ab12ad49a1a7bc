use clap::{Parser, ValueEnum};

use crate::optim::balancer::SourceSelection;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionArg {
    /// Move the ingredient with the largest coefficient on the failing axis
    Strongest,
    /// Move the ingredient that shifts the failing percentage the most per gram
    Leverage,
}

impl From<SelectionArg> for SourceSelection {
    fn from(arg: SelectionArg) -> Self {
        match arg {
            SelectionArg::Strongest => SourceSelection::StrongestCoefficient,
            SelectionArg::Leverage => SourceSelection::GreatestLeverage,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the recipe JSON file
    #[arg(short, long)]
    pub recipe_file: String,

    /// Ingredient catalog CSV (falls back to MIX_OPTIM_CATALOG, then ingredients.csv)
    #[arg(short, long)]
    pub catalog: Option<String>,

    /// Product type the recipe is checked against
    #[arg(short = 't', long, default_value = "ice_cream")]
    pub product_type: String,

    /// Built-in parameter profile id (falls back to the recipe's pinned
    /// profile, then MIX_OPTIM_PROFILE, then mp-artisan-v2024)
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Parameter profile JSON document, merged over the base defaults
    #[arg(long, conflicts_with = "profile")]
    pub profile_file: Option<String>,

    /// Partial parameter JSON applied on top of the profile
    #[arg(long)]
    pub overrides_file: Option<String>,

    /// Balance the recipe when it is not feasible
    #[arg(short, long)]
    pub balance: bool,

    #[arg(long, default_value_t = 50)]
    pub max_iterations: usize,

    /// Let the balancer add catalog ingredients the recipe is missing
    #[arg(long, requires = "balance")]
    pub allow_additions: bool,

    #[arg(long, value_enum, default_value_t = SelectionArg::Strongest)]
    pub selection: SelectionArg,

    /// Share of the mix water boiled off during cooking, in percent
    #[arg(long, default_value_t = 0.0)]
    pub evaporation: f64,

    /// Print the result as JSON instead of the text report
    #[arg(long)]
    pub json: bool,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["mix_optim", "--recipe-file", "r.json"]).unwrap();
        assert_eq!(cli.product_type, "ice_cream");
        assert_eq!(cli.max_iterations, 50);
        assert_eq!(cli.selection, SelectionArg::Strongest);
        assert!(!cli.balance);
        assert!(!cli.allow_additions);
        assert!(cli.profile.is_none());
    }

    #[test]
    fn test_balance_flags() {
        let cli = Cli::try_parse_from([
            "mix_optim", "-r", "r.json", "-t", "sorbet", "--balance", "--selection", "leverage", "--evaporation", "5",
        ])
        .unwrap();
        assert!(cli.balance);
        assert_eq!(SourceSelection::from(cli.selection), SourceSelection::GreatestLeverage);
        assert_eq!(cli.evaporation, 5.0);
    }

    #[test]
    fn test_profile_and_profile_file_conflict() {
        let res = Cli::try_parse_from(["mix_optim", "-r", "r.json", "-p", "science-v2025", "--profile-file", "p.json"]);
        assert!(res.is_err());
    }

    #[test]
    fn test_additions_need_balance() {
        let cli = Cli::try_parse_from(["mix_optim", "-r", "r.json", "--balance", "--allow-additions"]).unwrap();
        assert!(cli.allow_additions);
        assert!(Cli::try_parse_from(["mix_optim", "-r", "r.json", "--allow-additions"]).is_err());
    }
}
