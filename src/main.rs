//! Factory Balancer
//!
//! Machine counts for GregTech-style production lines.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rusqlite::Connection;
use tracing::info;

use factory_balancer::calculator::{self, format_solution, summarize};
use factory_balancer::config::load_factory_config;
use factory_balancer::models::{GameTime, RecipeDef, TargetSpec};
use factory_balancer::solution::SolvedGraph;
use factory_balancer::solver::SolverSettings;
use factory_balancer::{db, logging, render};

#[derive(Parser)]
#[command(name = "factory-balancer")]
#[command(about = "Production line balancer for GregTech-style factories")]
struct Cli {
    /// Path to the SQLite recipe catalog
    #[arg(short, long, default_value = "factory.db", global = true)]
    database: PathBuf,

    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Balance the recipes and targets of a factory file
    Solve {
        /// Factory file (.json, .yaml or .yml)
        config: PathBuf,

        #[command(flatten)]
        solver: SolverArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Store the recipes of a factory file in the catalog
    Import {
        /// Factory file (.json, .yaml or .yml)
        config: PathBuf,

        /// Clear existing recipes before importing
        #[arg(long)]
        clear: bool,
    },

    /// Balance every catalog recipe to make one item
    Calc {
        /// Target item (e.g. "hydrogen_sulfide")
        item: String,

        /// Target production rate in items per second
        #[arg(short, long, default_value = "1.0")]
        rate: f64,

        #[command(flatten)]
        solver: SolverArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List all recipes in the catalog
    ListRecipes,

    /// List all items some catalog recipe produces
    ListItems,

    /// Show details for a specific recipe
    Recipe {
        /// Recipe ID
        id: i64,
    },

    /// Initialize empty catalog with schema
    Init,

    /// Load sample recipes for testing
    LoadSample,
}

#[derive(Args)]
struct SolverArgs {
    /// Seconds before a solver attempt is abandoned
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Extra attempts after a timeout
    #[arg(long, default_value = "2")]
    retries: u32,

    /// Slack for comparing solved rates
    #[arg(long, default_value = "1e-6")]
    tolerance: f64,

    /// Skip the check for recipe loops that create items from nothing
    #[arg(long)]
    allow_free_production: bool,
}

impl SolverArgs {
    fn settings(&self) -> SolverSettings {
        SolverSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.retries,
            tolerance: self.tolerance,
            reject_free_production: !self.allow_free_production,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Args)]
struct OutputArgs {
    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    format: Format,

    /// Show per-machine inputs and outputs
    #[arg(long)]
    detail: bool,

    /// Also write a Graphviz graph of the solution to this path
    #[arg(long)]
    dot: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Solve { config, solver, output } => {
            let factory = load_factory_config(&config)
                .with_context(|| format!("loading factory file {}", config.display()))?;
            let solved = calculator::balance(&factory.recipes, &factory.targets, &solver.settings())?;
            report(&solved, &output)?;
        }

        Commands::Import { config, clear } => {
            let factory = load_factory_config(&config)
                .with_context(|| format!("loading factory file {}", config.display()))?;
            let mut conn = open_catalog(&cli.database)?;
            if clear {
                println!("Clearing existing recipes...");
                db::clear_recipes(&conn)?;
            }
            let ids = db::insert_recipes(&mut conn, &factory.recipes)?;
            info!(recipes = ids.len(), database = %cli.database.display(), "catalog import");
            println!("Imported {} recipes into {}", ids.len(), cli.database.display());
            if !factory.targets.is_empty() {
                println!("Targets are not stored; use 'solve' or 'calc' to balance them.");
            }
        }

        Commands::Calc {
            item,
            rate,
            solver,
            output,
        } => {
            let conn = open_catalog(&cli.database)?;
            let recipes = db::load_recipes(&conn)?;
            if recipes.is_empty() {
                println!("No recipes in catalog. Run 'import' or 'load-sample' first.");
                return Ok(());
            }
            let producers = db::get_producers(&conn, &item)?;
            if producers.is_empty() {
                println!("No recipe in the catalog produces '{}'. Run 'list-items' to see what can be made.", item);
                return Ok(());
            }
            for (c, quantity) in &producers {
                info!(recipe = %c.recipe.name, id = c.id, per_cycle = quantity, "producer");
            }
            let solved = calculator::balance(&recipes, &TargetSpec::single(item, rate), &solver.settings())?;
            report(&solved, &output)?;
        }

        Commands::ListRecipes => {
            let conn = open_catalog(&cli.database)?;
            let recipes = db::list_recipes(&conn)?;
            if recipes.is_empty() {
                println!("No recipes in catalog. Run 'import' or 'load-sample' first.");
            } else {
                println!("{:>4}  {:<30} {:>10} {:>10}", "ID", "Recipe", "Cycle (s)", "EU/t");
                println!("{}", "-".repeat(58));
                for c in recipes {
                    println!(
                        "{:>4}  {:<30} {:>10.2} {:>10}",
                        c.id,
                        c.recipe.name,
                        c.recipe.duration.as_seconds(),
                        calculator::si(c.recipe.energy_per_tick)
                    );
                }
            }
        }

        Commands::ListItems => {
            let conn = open_catalog(&cli.database)?;
            let items = db::list_items(&conn)?;
            if items.is_empty() {
                println!("No items in catalog. Run 'import' or 'load-sample' first.");
            } else {
                println!("Producible items:");
                for item in items {
                    println!("  {}", item);
                }
            }
        }

        Commands::Recipe { id } => {
            let conn = open_catalog(&cli.database)?;
            match db::get_recipe(&conn, id)? {
                Some(c) => {
                    let recipe = &c.recipe;
                    println!("Recipe: {}", recipe.name);
                    println!("  ID: {}", c.id);
                    println!("  Cycle: {}", recipe.duration);
                    println!("  Power: {} EU/t", calculator::si(recipe.energy_per_tick));

                    if !recipe.inputs.is_empty() {
                        println!("  Inputs:");
                        for (item, quantity) in &recipe.inputs {
                            println!("    {} x{} ({:.3}/s)", item, quantity, recipe.rate_per_second(*quantity));
                        }
                    }
                    if !recipe.outputs.is_empty() {
                        println!("  Outputs:");
                        for (item, quantity) in &recipe.outputs {
                            println!("    {} x{} ({:.3}/s)", item, quantity, recipe.rate_per_second(*quantity));
                        }
                    }
                }
                None => println!("Recipe {} not found", id),
            }
        }

        Commands::Init => {
            open_catalog(&cli.database)?;
            println!("Catalog initialized at: {}", cli.database.display());
        }

        Commands::LoadSample => {
            let mut conn = open_catalog(&cli.database)?;
            db::clear_recipes(&conn)?;
            let ids = db::insert_recipes(&mut conn, &sample_recipes())?;
            println!("Loaded {} sample recipes", ids.len());
        }
    }

    Ok(())
}

fn open_catalog(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("opening catalog {}", path.display()))?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn report(solved: &SolvedGraph, output: &OutputArgs) -> Result<()> {
    match output.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(solved)?),
        Format::Text => {
            if output.detail {
                println!("Production line:\n");
                println!("{}", format_solution(solved));
            }
            println!("{}", summarize(solved));
        }
    }

    if let Some(path) = &output.dot {
        fs::write(path, render::to_dot(solved)).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "graph written");
    }
    Ok(())
}

/// A small hydrogen sulfide line for trying the tool without a factory file
fn sample_recipes() -> Vec<RecipeDef> {
    vec![
        // Offshore pump: free water
        RecipeDef::new("Offshore Pump", GameTime::from_ticks(20), 0.0).output("water", 1000.0),
        RecipeDef::new("Electrolyzer", GameTime::from_ticks(1000), 30.0)
            .input("water", 500.0)
            .output("hydrogen", 1000.0)
            .output("oxygen", 500.0),
        RecipeDef::new("Macerator", GameTime::from_ticks(400), 2.0)
            .input("sulfur_ore", 1.0)
            .output("sulfur_dust", 2.0),
        RecipeDef::new("Chemical Reactor", GameTime::from_ticks(60), 8.0)
            .input("sulfur_dust", 1.0)
            .input("hydrogen", 2000.0)
            .output("hydrogen_sulfide", 1000.0),
        // Sulfuric acid needs the oxygen the electrolyzers throw off
        RecipeDef::new("Chemical Reactor", GameTime::from_ticks(480), 8.0)
            .input("hydrogen_sulfide", 1000.0)
            .input("oxygen", 4000.0)
            .output("sulfuric_acid", 1000.0)
            .output("water", 1000.0),
    ]
}
