//! `harvest resolve` - assign stable identities to a file of records

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use comfy_table::{Cell, Color};
use harvest_identity::{EntityIdentity, EntityResolver, RawEntity};
use serde_json::Value;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// JSON array or JSON-lines file of records
    pub input: PathBuf,

    /// Rows shown in the identity table
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,

    /// Known identities as a JSON object of id → name
    #[arg(long)]
    pub known: Option<PathBuf>,
}

/// Accept either one JSON array or one JSON value per line.
fn read_records(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if text.trim_start().starts_with('[') {
        return serde_json::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()));
    }
    text.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(n, l)| {
            serde_json::from_str(l)
                .with_context(|| format!("{}:{}: invalid JSON", path.display(), n + 1))
        })
        .collect()
}

fn seed(resolver: &mut EntityResolver, path: &Path) -> Result<usize> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let known: serde_json::Map<String, Value> = serde_json::from_str(&text)
        .with_context(|| format!("{} must be a JSON object of id → name", path.display()))?;
    let mut n = 0;
    for (id, name) in &known {
        match name.as_str().map(|name| resolver.register_known(id, name)) {
            Some(Ok(())) => n += 1,
            Some(Err(e)) => log::warn!("skipping known identity {id}: {e}"),
            None => log::warn!("skipping known identity {id}: name is not a string"),
        }
    }
    Ok(n)
}

pub fn run(args: ResolveArgs, config: &Config) -> Result<()> {
    let mut resolver = EntityResolver::new(config.resolver.clone())?;
    if let Some(path) = &args.known {
        let n = seed(&mut resolver, path)?;
        log::info!("Seeded {n} known identities");
    }

    let records = read_records(&args.input)?;
    let mut identities: Vec<EntityIdentity> = Vec::with_capacity(records.len());
    let mut rejected = 0usize;
    for (i, record) in records.iter().enumerate() {
        match RawEntity::from_json(record) {
            Ok(entity) => identities.push(resolver.resolve_entity(&entity)),
            Err(e) => {
                rejected += 1;
                log::warn!("record {i}: {e}");
            }
        }
    }

    let mut table = super::table(&["Name", "Identity", "Strategy", "Confidence"]);
    for identity in identities.iter().take(args.limit) {
        let confidence = Cell::new(identity.confidence);
        let confidence = if identity.is_low_confidence() {
            confidence.fg(Color::Yellow)
        } else {
            confidence.fg(Color::Green)
        };
        table.add_row(vec![
            Cell::new(&identity.raw_name),
            Cell::new(&identity.id),
            Cell::new(identity.strategy),
            confidence,
        ]);
    }
    eprintln!("\n{table}");
    if identities.len() > args.limit {
        eprintln!("... {} more", identities.len() - args.limit);
    }
    eprintln!("{}", resolver.stats().format_table());
    resolver.stats().log();

    if identities.is_empty() && rejected > 0 {
        bail!("all {rejected} records were rejected");
    }
    Ok(())
}
