use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tilesim_streamer_fixture::StubStreamer;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stub IO streamer for TileSim test cases")]
struct Args {
    /// Port to listen on (0 picks an ephemeral port)
    #[arg(short, long, default_value = "7000")]
    port: u16,

    /// Directory of input block files; each file is served under its stem
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Directory to persist received output blocks into
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();
    let args = Args::parse();

    let mut stub = StubStreamer::bind(args.port)?;
    if let Some(dir) = &args.data_dir {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry
                .path()
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            stub.add_input(&name, std::fs::read(entry.path())?);
            info!(name, "input block registered");
        }
    }
    if let Some(dir) = args.output_dir {
        stub.set_output_dir(dir);
    }

    info!(port = stub.port(), "serving");
    stub.serve().join().ok();
    Ok(())
}
