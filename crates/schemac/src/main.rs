//! schemac command line interface

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use schemac::{load_bundles, module_json, parse_bundle, parse_feature_arg, render_module};
use schemac_core::{ContextOptions, FeatureSelection, ModuleId, SchemaContext};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schemac")]
#[command(author, version, about = "YANG schema compiler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile modules and print the compiled schema
    Compile {
        #[command(flatten)]
        input: Input,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Compile modules and report errors only
    Check {
        #[command(flatten)]
        input: Input,
    },
}

#[derive(Args)]
struct Input {
    /// Module bundle file(s), JSON
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Module(s) to implement; every loaded module when omitted
    #[arg(short, long = "module")]
    modules: Vec<String>,

    /// Enabled features, as module:f1,f2 or module:*
    #[arg(short, long = "features")]
    features: Vec<String>,

    /// Fail instead of implementing referenced modules implicitly
    #[arg(long)]
    no_implicit_implement: bool,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Indented tree
    Text,
    /// JSON document per module
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { input, output } => compile(input, output),
        Commands::Check { input } => check(input),
    }
}

/// Load the bundles and implement the requested modules.
fn build(input: &Input) -> Result<SchemaContext> {
    let mut selections: HashMap<String, FeatureSelection> = HashMap::new();
    for arg in &input.features {
        let (module, selection) = parse_feature_arg(arg)?;
        selections.insert(module, selection);
    }

    let mut bundles = Vec::new();
    for file in &input.files {
        let text = fs::read_to_string(file)
            .with_context(|| format!("Failed to read file: {}", file.display()))?;
        let modules = parse_bundle(&text).with_context(|| format!("In file: {}", file.display()))?;
        bundles.push(modules);
    }

    let mut sctx = SchemaContext::with_options(ContextOptions {
        implicit_implement: !input.no_implicit_implement,
    });
    let loaded = load_bundles(&mut sctx, bundles)?;
    debug!(count = loaded.len(), "modules loaded");

    let targets = if input.modules.is_empty() {
        loaded
    } else {
        input
            .modules
            .iter()
            .map(|name| {
                sctx.find_module(name)
                    .ok_or_else(|| anyhow!("Module \"{name}\" is not loaded"))
            })
            .collect::<Result<Vec<_>>>()?
    };
    if let Some(unknown) = selections.keys().find(|m| sctx.find_module(m).is_none()) {
        return Err(anyhow!("Module \"{unknown}\" is not loaded"));
    }

    for &module in &targets {
        let name = sctx.module_name(module).to_string();
        let features = selections.get(&name).cloned().unwrap_or_default();
        sctx.implement(module, features)
            .with_context(|| format!("Failed to compile module \"{name}\""))?;
    }
    Ok(sctx)
}

fn compile(input: Input, output: OutputFormat) -> Result<()> {
    let sctx = build(&input)?;
    // implicitly implemented modules are shown too
    let shown: Vec<ModuleId> = sctx
        .modules()
        .filter(|(_, m)| m.compiled.is_some())
        .map(|(id, _)| id)
        .collect();

    match output {
        OutputFormat::Text => {
            for module in shown {
                print!("{}", render_module(&sctx, module));
            }
        }
        OutputFormat::Json => {
            let docs: Vec<_> = shown.into_iter().map(|m| module_json(&sctx, m)).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&docs).context("Failed to serialize schema to JSON")?
            );
        }
    }
    Ok(())
}

fn check(input: Input) -> Result<()> {
    let sctx = build(&input)?;
    let compiled = sctx.modules().filter(|(_, m)| m.compiled.is_some()).count();
    eprintln!("OK: {} module(s) compiled", compiled);
    Ok(())
}
