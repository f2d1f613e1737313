//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Subcommand;
use shoal_core::peer::FileOutcome;
use shoal_core::{
    AvailabilityPolicy, DirectorySink, MemorySink, PeerManifest, ScenarioBuilder, SegmentSink,
    ShoalConfig, ShoalError, Swarm, SwarmReport,
};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a swarm from per-peer manifest files (in1.txt ... inN.txt)
    Run {
        /// Number of peers, not counting the tracker
        #[arg(short, long)]
        peers: u32,
        /// Directory holding the manifests
        #[arg(short, long)]
        input_dir: Option<PathBuf>,
        /// Directory receiving completed files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// How peers answer availability queries
        #[arg(long, value_enum)]
        availability: Option<AvailabilityPolicy>,
        /// Negative sweeps tolerated per segment before giving up
        #[arg(long)]
        max_probe_rounds: Option<u32>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a generated swarm
    Demo {
        /// Number of peers, not counting the tracker
        #[arg(short, long, default_value = "4")]
        peers: u32,
        /// Number of distinct files
        #[arg(short, long, default_value = "3")]
        files: u32,
        /// Segments per file
        #[arg(short, long, default_value = "5")]
        segments: u32,
        /// Seed for the scenario generator
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Write completed files here instead of keeping them in memory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// How peers answer availability queries
        #[arg(long, value_enum)]
        availability: Option<AvailabilityPolicy>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the first node that fails, or a configuration error
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            peers,
            input_dir,
            output_dir,
            availability,
            max_probe_rounds,
            json,
        } => {
            let mut config = ShoalConfig::from_env();
            if let Some(dir) = input_dir {
                config.storage.input_dir = dir;
            }
            if let Some(dir) = output_dir {
                config.storage.output_dir = dir;
            }
            if let Some(policy) = availability {
                config.peer.availability = policy;
            }
            if max_probe_rounds.is_some() {
                config.peer.max_probe_rounds = max_probe_rounds;
            }
            run_from_manifests(config, peers, json).await
        }
        Commands::Demo {
            peers,
            files,
            segments,
            seed,
            output_dir,
            availability,
            json,
        } => {
            let mut config = ShoalConfig::from_env();
            if let Some(policy) = availability {
                config.peer.availability = policy;
            }
            let scenario = ScenarioBuilder::new()
                .peers(peers)
                .files(files)
                .segments(segments)
                .seed(seed);
            run_demo(config, scenario, output_dir, json).await
        }
    }
}

/// Loads `in<k>.txt` for every peer and writes `client<k>_<file>` outputs.
///
/// # Errors
/// - Manifest missing, unreadable or malformed
/// - Any node failure during the run
pub async fn run_from_manifests(config: ShoalConfig, peers: u32, json: bool) -> anyhow::Result<()> {
    let manifests = PeerManifest::load_all(&config.storage, peers)
        .await
        .map_err(|e| user_facing(e.into()))?;

    let sink = Arc::new(DirectorySink::new(
        config.storage.output_dir.clone(),
        config.storage.output_prefix,
    ));
    let report = run_swarm(config, manifests, sink).await?;
    print_report(&report, json)
}

/// Generates a scenario and runs it.
///
/// # Errors
/// - Generated names do not fit the wire format
/// - Any node failure during the run
pub async fn run_demo(
    config: ShoalConfig,
    scenario: ScenarioBuilder,
    output_dir: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let manifests = scenario.build().map_err(|e| user_facing(e.into()))?;

    let report = match output_dir {
        Some(dir) => {
            let sink = Arc::new(DirectorySink::new(dir, config.storage.output_prefix));
            run_swarm(config, manifests, sink).await?
        }
        None => run_swarm(config, manifests, Arc::new(MemorySink::new())).await?,
    };
    print_report(&report, json)
}

async fn run_swarm<S: SegmentSink + 'static>(
    config: ShoalConfig,
    manifests: Vec<PeerManifest>,
    sink: Arc<S>,
) -> anyhow::Result<SwarmReport> {
    Swarm::new(config, manifests, sink)
        .run()
        .await
        .map_err(user_facing)
}

fn user_facing(error: ShoalError) -> anyhow::Error {
    if error.is_user_error() {
        anyhow!(error.user_message())
    } else {
        anyhow::Error::new(error)
    }
}

fn print_report(report: &SwarmReport, json: bool) -> anyhow::Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(report).context("Failed to render report")?;
        println!("{rendered}");
        return Ok(());
    }

    println!("Swarm finished");
    println!("{:-<60}", "");
    println!("Files catalogued: {}", report.tracker.catalog_size);
    println!("Downloads completed: {}", report.completed_downloads());

    for peer in &report.peers {
        println!("\nPeer {}", peer.node);
        println!("  Owns: {}", join_names(&peer.owned_files));
        println!(
            "  Answered {} queries ({} affirmative)",
            peer.uploads.queries_answered, peer.uploads.affirmative_answers
        );
        for file in &peer.downloads.files {
            match &file.outcome {
                FileOutcome::Completed { segments, probes } => {
                    println!("  Got {} ({segments} segments, {probes} probes)", file.name);
                }
                FileOutcome::NotFound => println!("  {} is unknown to the tracker", file.name),
            }
        }
    }

    println!("\nSwarms");
    for (name, members) in &report.tracker.swarms {
        let members: Vec<String> = members.iter().map(ToString::to_string).collect();
        println!("  {name}: {}", members.join(", "));
    }
    Ok(())
}

fn join_names(names: &[shoal_core::FileName]) -> String {
    if names.is_empty() {
        return "-".to_string();
    }
    names
        .iter()
        .map(|name| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
