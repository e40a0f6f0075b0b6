use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use statlab_core::ExperimentRequest;
use statlab_runner::{plan_trials, ConfigDiffTracker};
use statlab_sources::{ConfigStore, Registry};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statlab", version = "0.3.0", about = "PostgreSQL statistics benchmarking CLI")]
struct Cli {
    /// Directory with configuration bundles, overriding the embedded ones.
    #[arg(long, global = true)]
    configs: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered statistics sources.
    Sources {
        #[arg(long)]
        json: bool,
    },
    /// List configuration variants for one source.
    Configs {
        source: String,
        #[arg(long)]
        json: bool,
    },
    /// Print one configuration bundle as stored.
    ShowConfig {
        source: String,
        config: String,
        #[arg(long)]
        json: bool,
    },
    /// Validate an experiment request file.
    Validate {
        request: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Expand an experiment request into its trial plan.
    Describe {
        request: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Compare a candidate bundle against its original.
    ConfigDiff {
        original: PathBuf,
        candidate: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let registry = Registry::with_defaults(config_store(cli.configs.as_deref()));
    match run_command(cli.command, &registry) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string()));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn config_store(root: Option<&Path>) -> ConfigStore {
    match root {
        Some(path) => ConfigStore::with_root(path),
        None => ConfigStore::embedded(),
    }
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Sources { json }
        | Commands::Configs { json, .. }
        | Commands::ShowConfig { json, .. }
        | Commands::Validate { json, .. }
        | Commands::Describe { json, .. }
        | Commands::ConfigDiff { json, .. } => *json,
    }
}

fn run_command(command: Commands, registry: &Registry) -> Result<Option<Value>> {
    match command {
        Commands::Sources { json } => {
            let sources = registry.list_sources();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "sources",
                    "sources": sources,
                })));
            }
            for source in sources {
                println!("{source}");
            }
        }
        Commands::Configs { source, json } => {
            let configs = registry.list_configs(&source)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "configs",
                    "source": source,
                    "configs": configs,
                })));
            }
            for config in configs {
                println!("{config}");
            }
        }
        Commands::ShowConfig {
            source,
            config,
            json,
        } => {
            let content = registry.config_content(&source, &config)?;
            if json {
                let (_, parsed) = registry.resolve(&source, &config)?;
                return Ok(Some(json!({
                    "ok": true,
                    "command": "show-config",
                    "source": source,
                    "config": config,
                    "content": content,
                    "parsed": parsed.normalized(),
                })));
            }
            print!("{content}");
        }
        Commands::Validate { request, json } => {
            let parsed = load_request(&request)?;
            parsed.validate()?;
            // Resolution catches unknown sources and configs before any run.
            for selection in &parsed.sources {
                registry.resolve(&selection.source, &selection.config)?;
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "validate",
                    "name": parsed.name,
                    "sources": parsed.sources.len(),
                    "trial_count": parsed.trial_count,
                    "total_queries": parsed.total_queries(),
                })));
            }
            println!("name: {}", parsed.name);
            println!("sources: {}", parsed.sources.len());
            println!("trial_count: {}", parsed.trial_count);
            println!("total_queries: {}", parsed.total_queries());
            println!("valid: true");
        }
        Commands::Describe { request, json } => {
            let parsed = load_request(&request)?;
            parsed.validate()?;
            let trials = plan_trials("planned", &parsed);
            if json {
                let plan: Vec<Value> = trials
                    .iter()
                    .map(|t| {
                        json!({
                            "number": t.number,
                            "source": t.source,
                            "config": t.config,
                            "repetition": t.repetition,
                        })
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "name": parsed.name,
                    "total_trials": trials.len(),
                    "trials": plan,
                })));
            }
            println!("name: {}", parsed.name);
            println!("total_trials: {}", trials.len());
            for trial in &trials {
                println!(
                    "trial {}: {}/{} repetition {}",
                    trial.number, trial.source, trial.config, trial.repetition
                );
            }
        }
        Commands::ConfigDiff {
            original,
            candidate,
            json,
        } => {
            let original_yaml = read_file(&original)?;
            let candidate_yaml = read_file(&candidate)?;
            let modified = ConfigDiffTracker::is_modified(&original_yaml, &candidate_yaml)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "config-diff",
                    "original": original.display().to_string(),
                    "candidate": candidate.display().to_string(),
                    "modified": modified,
                })));
            }
            println!("modified: {modified}");
        }
    }
    Ok(None)
}

fn load_request(path: &Path) -> Result<ExperimentRequest> {
    let raw = read_file(path)?;
    let request = ExperimentRequest::from_yaml_str(&raw)
        .with_context(|| format!("invalid experiment request: {}", path.display()))?;
    Ok(request)
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn emit_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{value}"),
    }
}

fn json_error(code: &str, message: String) -> Value {
    json!({
        "ok": false,
        "error": code,
        "message": message,
    })
}
