//! Overseer - quota-aware model routing and agent supervision
//!
//! Main entry point for the Overseer CLI.

use clap::{Parser, Subcommand, ValueEnum};
use overseer::clock::{format_duration, SystemClock};
use overseer::config::{validate_config, validate_config_result, OverseerConfig};
use overseer::pool::AgentKind;
use overseer::quota::QuotaLedger;
use overseer::routing::{Complexity, LoopbackClient, ModelRouter};
use overseer::runtime::ControlPlane;
use overseer::transport::{forward_broadcasts, pump_json_lines, JsonLinesSink};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

/// Overseer - route model calls across accounts and supervise agent pools
#[derive(Parser, Debug)]
#[command(name = "overseer")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/overseer/config.yaml)
    #[arg(short, long, global = true, env = "OVERSEER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a sample configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check the configuration for problems
    Validate,

    /// Show the order candidates would be tried in
    Candidates {
        /// Task complexity to rank for
        #[arg(long, value_enum, default_value_t = ComplexityArg::Medium)]
        complexity: ComplexityArg,
    },

    /// List agent kinds and their defaults
    Templates,

    /// Run the control plane on JSON-line events from stdin
    ///
    /// Processed events are written to stdout as JSON lines. System health is
    /// printed to stderr when input ends.
    Run {
        /// Also print prometheus metrics on exit
        #[arg(long)]
        metrics: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ComplexityArg {
    Low,
    Medium,
    High,
}

impl From<ComplexityArg> for Complexity {
    fn from(arg: ComplexityArg) -> Self {
        match arg {
            ComplexityArg::Low => Complexity::Low,
            ComplexityArg::Medium => Complexity::Medium,
            ComplexityArg::High => Complexity::High,
        }
    }
}

fn main() {
    // Initialize logging
    if let Err(e) = overseer::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> overseer::Result<()> {
    let path = cli.config.unwrap_or_else(OverseerConfig::default_path);

    if let Commands::Init { force } = cli.command {
        return handle_init_command(&path, force);
    }

    let config = match OverseerConfig::load(&path) {
        Ok(config) => config,
        Err(overseer::OverseerError::Config(msg)) if msg.contains("Config file not found") => {
            return Err(overseer::OverseerError::Config(format!(
                "No configuration found at {}. Run 'overseer init' first to create one.",
                path.display()
            )));
        }
        Err(e) => return Err(e),
    };

    match cli.command {
        Commands::Init { .. } => unreachable!("init is handled before loading configuration"),
        Commands::Validate => handle_validate_command(&config),
        Commands::Candidates { complexity } => handle_candidates_command(&config, complexity.into()),
        Commands::Templates => {
            handle_templates_command();
            Ok(())
        }
        Commands::Run { metrics } => {
            validate_config_result(&config)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(handle_run_command(config, metrics))
        }
    }
}

fn handle_init_command(path: &Path, force: bool) -> overseer::Result<()> {
    if path.exists() && !force {
        println!("Configuration already exists at {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    OverseerConfig::sample().save(path)?;
    println!("Created configuration at {}", path.display());
    println!("Set OVERSEER_PRIMARY_API_KEY before running against a real provider.");
    Ok(())
}

fn handle_validate_command(config: &OverseerConfig) -> overseer::Result<()> {
    match validate_config(config) {
        Ok(()) => {
            println!(
                "Configuration OK: {} account(s), {} candidate(s)",
                config.accounts.len(),
                config.candidates.len()
            );
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                println!("  - {}", error);
            }
            Err(overseer::OverseerError::Config(format!(
                "{} validation error(s)",
                errors.len()
            )))
        }
    }
}

fn handle_candidates_command(config: &OverseerConfig, complexity: Complexity) -> overseer::Result<()> {
    let ledger = QuotaLedger::new(config.quota.clone(), Arc::new(SystemClock));
    let router = ModelRouter::new(ledger, Arc::new(LoopbackClient), &config.router);
    let ranked = router.rank(complexity, &config.candidates);

    if ranked.is_empty() {
        println!("No selectable candidates.");
        return Ok(());
    }

    println!("{:<4} {:<40} {:<6} {:<10} {:<10} {:>8} {:>8}", "#", "CANDIDATE", "TIER", "CLASS", "STATUS", "RPM", "RPD");
    for (position, candidate) in ranked.iter().enumerate() {
        let descriptor = &candidate.descriptor;
        println!(
            "{:<4} {:<40} {:<6} {:<10} {:<10} {:>8} {:>8}",
            position + 1,
            descriptor.key().to_string(),
            descriptor.priority_tier,
            descriptor.model_class().to_string(),
            format!("{:?}", candidate.status).to_lowercase(),
            descriptor.rpm_limit,
            descriptor.rpd_limit,
        );
    }
    Ok(())
}

fn handle_templates_command() {
    println!("{:<12} {:<10} {:>9} {:>12}  CAPABILITIES", "KIND", "CLASS", "MAX TASKS", "IDLE AFTER");
    for kind in AgentKind::ALL {
        let template = kind.template();
        println!(
            "{:<12} {:<10} {:>9} {:>12}  {}",
            kind.as_str(),
            template.model_class.to_string(),
            template.max_tasks,
            format_duration(template.idle_timeout),
            template.capabilities.join(", ")
        );
    }
}

async fn handle_run_command(config: OverseerConfig, print_metrics: bool) -> overseer::Result<()> {
    let plane = ControlPlane::builder(config).start();

    let forwarder = tokio::spawn(forward_broadcasts(
        plane.supervisor().subscribe(),
        JsonLinesSink::new(tokio::io::stdout()),
    ));

    let stats = pump_json_lines(BufReader::new(tokio::io::stdin()), plane.bus()).await?;

    // Let the supervisor catch up before stopping it
    while plane.bus().queue_depth() > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let health = plane.supervisor().system_health();
    plane.shutdown().await?;

    match forwarder.await {
        Ok(Ok(delivered)) => tracing::debug!(delivered, "Broadcast output finished"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Broadcast output failed"),
        Err(e) => tracing::warn!(error = %e, "Broadcast task failed"),
    }

    eprintln!(
        "Published {} event(s), rejected {} line(s)",
        stats.published, stats.rejected
    );
    eprintln!("{}", serde_json::to_string_pretty(&health)?);
    if print_metrics {
        eprintln!("{}", overseer::metrics::encode_metrics());
    }
    Ok(())
}
