use anyhow::{Context, Result};
use clap::Parser;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tilesim_config::RunOptions;
use tilesim_core::builder::Simulator;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Device hint (advisory; only cpu is simulated)
    #[arg(short, long, default_value = "cpu")]
    device: String,

    /// Path to the instruction descriptor
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Case name; stemmed from its basename
    #[arg(short, long)]
    case_name: String,

    /// Output root for hex dumps (default: temp/<case>/behavior_out)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Emit readable hex text rather than raw words
    #[arg(short, long, default_value = "true", action = clap::ArgAction::Set)]
    readable: bool,

    /// Port of the external IO streamer
    #[arg(long, default_value = "7000")]
    streamer_port: u16,

    /// Enable per-phase execution tracing
    #[arg(short, long)]
    trace: bool,
}

fn main() {
    let args = Args::parse();

    if args.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    if let Err(e) = run(args) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    info!("Starting TileSim behavior simulator");
    if args.device != "cpu" {
        info!(device = %args.device, "device hint ignored; simulating on cpu");
    }

    let case_name = Path::new(&args.case_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.case_name.clone());

    let output_dir = args
        .output_dir
        .unwrap_or_else(|| PathBuf::from("temp").join(&case_name).join("behavior_out"));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output dir {:?}", output_dir))?;

    let raw = std::fs::read(&args.input)
        .with_context(|| format!("Failed to read descriptor {:?}", args.input))?;
    info!(
        descriptor = %args.input.display(),
        sha256 = %hex_digest(&raw),
        "descriptor fingerprint"
    );

    let desc = tilesim_loader::load_descriptor(&args.input)?;

    let options = RunOptions {
        test_mode: desc.test_mode,
        output_dir,
        readable: args.readable,
        case_name: case_name.clone(),
        streamer_port: args.streamer_port,
    };

    let sim = Simulator::build(&desc, options).context("Failed to build simulator tree")?;

    info!(case = %case_name, "start behavior simulation");
    let start = Instant::now();
    sim.simulate().context("Simulation failed")?;
    let elapsed = start.elapsed();

    info!(case = %case_name, ?elapsed, "case finished");
    println!("case {case_name}  running time : {} ns", elapsed.as_nanos());
    Ok(())
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
