use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ringvault_core::{Volume, VolumeOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ringvault", version, about = "ringvault: a fixed-capacity on-disk key/value cache")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Truncate and initialize a new volume file
    Create {
        path: PathBuf,
        #[arg(long)]
        size: u64,
        #[arg(long)]
        chunk_size: u64,
    },
    /// Open (or initialize) a volume and set one key
    Set {
        path: PathBuf,
        #[arg(long)]
        size: u64,
        #[arg(long)]
        chunk_size: u64,
        key: String,
        value: String,
    },
    /// Open a volume and print the value on hit, exit non-zero on miss
    Get {
        path: PathBuf,
        #[arg(long)]
        size: u64,
        #[arg(long)]
        chunk_size: u64,
        key: String,
    },
    /// Print a volume's stats report as pretty JSON
    Stat {
        path: PathBuf,
        #[arg(long)]
        size: u64,
        #[arg(long)]
        chunk_size: u64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Create { path, size, chunk_size } => create(&path, size, chunk_size),
        Cmd::Set { path, size, chunk_size, key, value } => set(&path, size, chunk_size, &key, &value),
        Cmd::Get { path, size, chunk_size, key } => get(&path, size, chunk_size, &key),
        Cmd::Stat { path, size, chunk_size } => stat(&path, size, chunk_size),
    }
}

fn open_volume(path: &Path, size: u64, chunk_size: u64) -> Result<(Volume, bool)> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .with_context(|| format!("opening volume file {}", path.display()))?;
    file.set_len(size).with_context(|| format!("sizing volume file {} to {size} bytes", path.display()))?;

    let options = VolumeOptions::new(Arc::new(file), size, chunk_size);
    Volume::open(options).with_context(|| format!("opening volume {}", path.display()))
}

fn create(path: &Path, size: u64, chunk_size: u64) -> Result<()> {
    let (volume, corrupted) = open_volume(path, size, chunk_size)?;
    if corrupted {
        log::warn!("volume {} could not be fully restored; starting from empty metadata", path.display());
    }
    println!("created {} ({size} bytes, ~{chunk_size} byte chunks)", path.display());
    volume.flush().context("flushing volume metadata after create")?;
    volume.close().context("closing volume after create")?;
    Ok(())
}

fn set(path: &Path, size: u64, chunk_size: u64, key: &str, value: &str) -> Result<()> {
    let (volume, _) = open_volume(path, size, chunk_size)?;
    volume
        .set(key.as_bytes(), value.as_bytes())
        .with_context(|| format!("setting key {key:?} in {}", path.display()))?;
    volume.flush().context("flushing volume metadata after set")?;
    volume.close().context("closing volume after set")?;
    Ok(())
}

fn get(path: &Path, size: u64, chunk_size: u64, key: &str) -> Result<()> {
    let (volume, _) = open_volume(path, size, chunk_size)?;
    let (hit, data) =
        volume.get(key.as_bytes()).with_context(|| format!("getting key {key:?} from {}", path.display()))?;
    volume.close().context("closing volume after get")?;
    if !hit {
        bail!("key {key:?} not found in {}", path.display());
    }
    match std::str::from_utf8(&data) {
        Ok(s) => println!("{s}"),
        Err(_) => {
            use std::io::Write;
            std::io::stdout().write_all(&data).context("writing binary value to stdout")?;
        }
    }
    Ok(())
}

fn stat(path: &Path, size: u64, chunk_size: u64) -> Result<()> {
    let (volume, _) = open_volume(path, size, chunk_size)?;
    let stats = volume.stats();
    volume.close().context("closing volume after stat")?;
    let json = serde_json::to_string_pretty(&stats).context("serializing volume stats")?;
    println!("{json}");
    Ok(())
}
