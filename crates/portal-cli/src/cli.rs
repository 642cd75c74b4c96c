use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use portal_beacon::BeaconAccumulator;
use portal_metadata::{mint_claim, parse_metadata, BeaconInstruction, MetadataValidator, ShardAction};
use portal_state::{MemoryStatusStore, PortalParams, PortalState};

#[derive(Parser)]
#[command(name = "portal-cli")]
#[command(about = "Portal custody CLI", long_about = None)]
struct Cli {
    /// Params file (YAML, TOML or JSON); PORTAL_* env vars override it
    #[arg(long, global = true)]
    params: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective Portal parameters as YAML
    ShowParams,

    /// Decode transaction metadata and print its type and hash
    ParseMetadata {
        /// Metadata JSON, or a path to a file holding it
        input: String,
    },

    /// Build one beacon height from a JSON file of shard actions
    Replay {
        input: PathBuf,

        /// Write the resulting Portal state here
        #[arg(long)]
        state_out: Option<PathBuf>,
    },
}

/// One beacon height to rebuild. Status records start empty.
#[derive(Deserialize)]
struct HeightInput {
    beacon_height: u64,
    #[serde(default)]
    state: PortalState,
    #[serde(default)]
    actions: BTreeMap<u8, Vec<ShardAction>>,
    /// Instructions proposed by another producer; verified against the rebuild when present
    #[serde(default)]
    proposed: Option<Vec<BeaconInstruction>>,
}

fn read_input(input: &str) -> Result<String> {
    let path = Path::new(input);
    if path.is_file() {
        return fs::read_to_string(path).with_context(|| format!("reading {}", path.display()));
    }
    Ok(input.to_string())
}

fn show_params(params: &PortalParams) -> Result<()> {
    print!("{}", serde_yaml::to_string(params)?);
    Ok(())
}

fn parse(input: &str) -> Result<()> {
    let json = read_input(input)?;
    let meta = parse_metadata(&json)?;
    let meta_type = meta.meta_type();
    println!("type:        {}", meta_type);
    println!("hash:        {}", meta.hash());
    println!("request:     {}", meta_type.is_request());
    println!("well-formed: {}", meta.validate_metadata_by_itself());
    Ok(())
}

fn replay(params: PortalParams, input: &Path, state_out: Option<&Path>) -> Result<()> {
    let raw = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let height: HeightInput = serde_json::from_str(&raw).context("decoding height input")?;
    let store = MemoryStatusStore::new();
    let accumulator = BeaconAccumulator::new(params);

    let outcome = match &height.proposed {
        Some(proposed) => accumulator.verify(height.beacon_height, &height.state, &store, &height.actions, proposed)?,
        None => accumulator.produce(height.beacon_height, &height.state, &store, &height.actions)?,
    };
    info!(
        "beacon height {}: {} instruction(s), state root {}",
        outcome.beacon_height,
        outcome.instructions.len(),
        outcome.state_root
    );

    for inst in &outcome.instructions {
        println!("{}", serde_json::to_string(inst)?);
        match mint_claim(inst, accumulator.params()) {
            Ok(Some(claim)) => println!(
                "  mint {} of {} to {} on shard {}",
                claim.amount, claim.token_id, claim.receiver, claim.shard_id
            ),
            Ok(None) => {}
            Err(e) => warn!("instruction {} has no readable mint claim: {}", inst.meta_type, e),
        }
    }

    if let Some(path) = state_out {
        let json = serde_json::to_string_pretty(&outcome.state)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("state written to {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    if let Some(path) = &cli.params {
        if !path.is_file() {
            bail!("params file {} not found", path.display());
        }
    }
    let params = PortalParams::load(cli.params.as_deref()).context("loading portal params")?;

    match cli.command {
        Commands::ShowParams => show_params(&params)?,
        Commands::ParseMetadata { input } => parse(&input)?,
        Commands::Replay { input, state_out } => replay(params, &input, state_out.as_deref())?,
    }

    Ok(())
}
