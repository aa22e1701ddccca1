//! fpgabuild - remote FPGA build orchestration
//!
//! ## Commands
//!
//! - `synth`: build every target of a manifest, locally or on its servers
//! - `check`: report readiness of each target without connecting anywhere
//! - `script`: print the scripts one stage would run for one target

mod manifest;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fpgabuild_core::{ConsolePrompt, CoreResult, HostOs, Outcome, PasswordProvider, TargetSpec};
use fpgabuild_pipeline::{
    assign_servers, preview_stage, ready_for_compilation, ready_for_synthesis, Coordinator,
    PurgeCallback, SkipCallback, Stage, SynthesisResult, SynthesizeOptions,
};
use serde_json::json;
use tracing::{info, warn, Level};

use crate::manifest::Manifest;

#[derive(Parser)]
#[command(name = "fpgabuild")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Remote FPGA build orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and results
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every target in a manifest
    Synth {
        /// Path to the build manifest (TOML)
        manifest: PathBuf,

        /// Run only the hardware stages
        #[arg(long, conflicts_with = "software")]
        hardware: bool,

        /// Run only the software stages
        #[arg(long)]
        software: bool,

        /// Purge generated directories before each stage group
        #[arg(long)]
        force_clean: bool,

        /// Leave outputs on the build servers
        #[arg(long)]
        no_download: bool,

        /// Target to leave out (repeatable)
        #[arg(long = "skip", value_name = "TARGET")]
        skip: Vec<String>,

        /// Target whose core outputs are purged before building (repeatable)
        #[arg(long = "purge", value_name = "TARGET")]
        purge: Vec<String>,

        /// Core instance to purge (repeatable). Applies to the `--purge`
        /// targets, or to every target when none are named.
        #[arg(long = "purge-core", value_name = "CORE")]
        purge_core: Vec<String>,

        /// Password for every server; prompted for when absent
        #[arg(long, env = "FPGABUILD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Check that every target is ready to build
    Check {
        /// Path to the build manifest (TOML)
        manifest: PathBuf,
    },

    /// Print the scripts a stage would run
    Script {
        /// Path to the build manifest (TOML)
        manifest: PathBuf,

        /// Target id
        target: String,

        /// Stage name, e.g. `implement`
        stage: String,
    },
}

/// Uses a preset password when one was given, the console otherwise.
struct CliPasswords {
    preset: Option<String>,
}

impl PasswordProvider for CliPasswords {
    fn password(&self, user: &str, address: &str) -> CoreResult<String> {
        match &self.preset {
            Some(password) => Ok(password.clone()),
            None => ConsolePrompt.password(user, address),
        }
    }
}

struct SynthArgs {
    options: SynthesizeOptions,
    skip: Vec<String>,
    purge: Vec<String>,
    purge_core: Vec<String>,
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fpgabuild_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Synth {
            manifest,
            hardware,
            software,
            force_clean,
            no_download,
            skip,
            purge,
            purge_core,
            password,
        } => {
            let args = SynthArgs {
                options: SynthesizeOptions {
                    hardware: hardware || !software,
                    software: software || !hardware,
                    force_clean,
                    download: !no_download,
                },
                skip,
                purge,
                purge_core,
                password,
            };
            cmd_synth(&manifest, args, cli.json).await
        }
        Commands::Check { manifest } => cmd_check(&manifest, cli.json),
        Commands::Script {
            manifest,
            target,
            stage,
        } => cmd_script(&manifest, &target, &stage).await,
    }
}

fn skip_callback(ids: Vec<String>) -> SkipCallback {
    Arc::new(move |targets: &[TargetSpec]| {
        targets
            .iter()
            .filter(|t| ids.contains(&t.id))
            .map(|t| t.id.clone())
            .collect()
    })
}

/// Purge plan for the named targets; every target when `ids` is empty.
fn purge_callback(ids: Vec<String>, cores: Vec<String>) -> PurgeCallback {
    Arc::new(move |targets: &[TargetSpec]| {
        targets
            .iter()
            .filter(|t| ids.is_empty() || ids.contains(&t.id))
            .map(|t| (t.id.clone(), cores.clone()))
            .collect::<HashMap<_, _>>()
    })
}

async fn cmd_synth(path: &PathBuf, args: SynthArgs, json_output: bool) -> Result<()> {
    let manifest = Manifest::load(path)?;
    for id in args.skip.iter().chain(&args.purge) {
        manifest.target(id)?;
    }
    info!(
        targets = manifest.targets.len(),
        servers = manifest.servers.len(),
        "starting build"
    );

    let mut coordinator = Coordinator::new(
        manifest.targets,
        manifest.servers,
        manifest.settings,
        Arc::new(CliPasswords {
            preset: args.password,
        }),
    );
    if !args.skip.is_empty() {
        coordinator = coordinator.with_skip_callback(skip_callback(args.skip));
    }
    if !args.purge.is_empty() || !args.purge_core.is_empty() {
        coordinator = coordinator.with_purge_callback(purge_callback(args.purge, args.purge_core));
    }

    let abort = coordinator.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, aborting build");
            abort.abort();
        }
    });

    let result = coordinator.synthesize_all(args.options).await;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    if result.verdict.passed {
        Ok(())
    } else {
        bail!("{}", result.verdict.message)
    }
}

fn print_summary(result: &SynthesisResult) {
    println!();
    println!("Run ID: {}", result.run_id);
    for target in &result.targets {
        let status = match target.outcome {
            Outcome::Ok => "✓",
            Outcome::Skipped => "-",
            _ => "✗",
        };
        let server = target.server.as_deref().unwrap_or("local");
        println!(
            "  {} {} [{}] {} ({}ms)",
            status, target.target, server, target.outcome, target.duration_ms
        );
    }
    for report in &result.resource_reports {
        println!("Resources: {}", report.display());
    }
    println!("Duration: {}ms", result.duration_ms);
    println!(
        "{} {}",
        if result.verdict.passed { "✓" } else { "✗" },
        result.verdict.message
    );
}

fn cmd_check(path: &PathBuf, json_output: bool) -> Result<()> {
    let manifest = Manifest::load(path)?;
    let assignments = assign_servers(&manifest.targets, &manifest.servers);

    let mut all_ready = true;
    let mut rows = Vec::new();
    for (target, server) in manifest.targets.iter().zip(&assignments) {
        let hardware = ready_for_synthesis(target, server.as_ref());
        let software = ready_for_compilation(target, server.as_ref());
        let missing: Vec<String> = hardware
            .missing
            .iter()
            .chain(&software.missing)
            .map(ToString::to_string)
            .collect();
        all_ready &= missing.is_empty();

        if json_output {
            rows.push(json!({
                "target": target.id,
                "server": server.as_ref().map(|s| s.key()),
                "ready": missing.is_empty(),
                "missing": missing,
            }));
            continue;
        }
        if missing.is_empty() {
            println!("✓ {}", target.id);
        } else {
            println!("✗ {}", target.id);
            for line in &missing {
                println!("    {}", line);
            }
        }
    }
    if json_output {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }

    if all_ready {
        Ok(())
    } else {
        bail!("one or more targets are not ready")
    }
}

async fn cmd_script(path: &PathBuf, target_id: &str, stage_name: &str) -> Result<()> {
    let manifest = Manifest::load(path)?;
    let stage = Stage::parse(stage_name)
        .with_context(|| format!("Unknown stage: {stage_name}"))?;
    let index = manifest
        .targets
        .iter()
        .position(|t| t.id == target_id)
        .with_context(|| format!("no target '{target_id}' in manifest"))?;
    let spec = &manifest.targets[index];
    let os = assign_servers(&manifest.targets, &manifest.servers)
        .swap_remove(index)
        .map(|s| s.os)
        .unwrap_or(HostOs::Linux);

    let scripts = preview_stage(spec, os, &manifest.settings, stage)
        .await
        .with_context(|| format!("Failed to render {stage} for {target_id}"))?;
    if scripts.is_empty() {
        println!("{stage} runs no tools for {target_id}");
    }
    for script in scripts {
        println!("# {} (sha256 {})", script.file_name, script.digest);
        println!("{}", script.text);
    }
    Ok(())
}
