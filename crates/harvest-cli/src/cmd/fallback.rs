//! `harvest fallback` - inspect spilled payloads

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::Cell;
use harvest_store::FallbackStore;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct FallbackArgs {
    #[command(subcommand)]
    pub action: FallbackAction,
}

#[derive(Subcommand, Debug)]
pub enum FallbackAction {
    /// List spilled payloads awaiting replay
    List {
        /// Fallback directory (default: writer.fallback_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Drop manifest entries whose payload file is gone
    Compact {
        /// Fallback directory (default: writer.fallback_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

pub fn run(args: FallbackArgs, config: &Config) -> Result<()> {
    let default_dir = config.writer.fallback_dir.as_path();
    match args.action {
        FallbackAction::List { dir } => list(dir.as_deref().unwrap_or(default_dir)),
        FallbackAction::Compact { dir } => compact(dir.as_deref().unwrap_or(default_dir)),
    }
}

fn list(dir: &Path) -> Result<()> {
    let store = FallbackStore::new(dir)?;
    let records = store.list()?;
    let files = store.files()?;

    if records.is_empty() && files.is_empty() {
        eprintln!("No spilled payloads in {}.", dir.display());
        return Ok(());
    }

    let mut table = super::table(&["Spilled", "Path", "Kind", "Size", "Error"]);
    for record in &records {
        let size = std::fs::metadata(dir.join(&record.file)).map_or(0, |m| m.len());
        table.add_row(vec![
            Cell::new(record.spilled_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&record.path),
            Cell::new(format!("{:?}", record.kind).to_lowercase()),
            Cell::new(size),
            Cell::new(truncate(&record.error, 60)),
        ]);
    }
    eprintln!("\n{table}");
    eprintln!("{} payloads in {}", records.len(), dir.display());

    let untracked = files.len().saturating_sub(records.len());
    if untracked > 0 {
        log::warn!("{untracked} payload files have no manifest entry and cannot be replayed");
    }
    Ok(())
}

fn compact(dir: &Path) -> Result<()> {
    let store = FallbackStore::new(dir)?;
    let kept = store.compact_manifest()?;
    eprintln!("Manifest compacted: {kept} entries kept.");
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
