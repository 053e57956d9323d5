//! `harvest fetch` - download every page of an upstream endpoint

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use comfy_table::{Cell, Color};
use harvest_http::{
    FetchAllOptions, FullPageHeuristic, NextLinkOnly, PageErrorPolicy, PagedResult, Params,
    RateLimitedCachingClient, ShortPageOnly,
};
use serde_json::Value;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Endpoint path, joined with the configured base URL
    pub endpoint: String,

    /// Query parameter as key=value (repeatable)
    #[arg(short, long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Items requested per page
    #[arg(long, default_value_t = 100)]
    pub page_size: usize,

    /// Stop after this many pages
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Name of the page index parameter
    #[arg(long, default_value = "page")]
    pub page_param: String,

    /// Name of the page size parameter
    #[arg(long, default_value = "page_size")]
    pub size_param: String,

    /// JSON pointer to the items array in each page (default: top-level array)
    #[arg(long)]
    pub items: Option<String>,

    /// Rule deciding whether another page exists
    #[arg(long, value_enum, default_value = "full-page")]
    pub stop: StopRule,

    /// JSON pointer to the next-page link (used by full-page and next-link rules)
    #[arg(long)]
    pub next_link: Option<String>,

    /// Skip up to N consecutive failed pages instead of stopping at the first
    #[arg(long)]
    pub skip_failed: Option<u32>,

    /// Write items as JSON lines
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum StopRule {
    /// Stop on a short page, or when a present next link is empty
    FullPage,
    /// Stop only on a short page
    ShortPage,
    /// Stop only when the next link is absent
    NextLink,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if k.is_empty() {
        return Err(format!("empty parameter name in {s:?}"));
    }
    Ok((k.to_string(), v.to_string()))
}

fn options(args: &FetchArgs) -> Result<FetchAllOptions> {
    let mut opts = FetchAllOptions {
        page_param: args.page_param.clone(),
        size_param: args.size_param.clone(),
        ..Default::default()
    }
    .with_page_size(args.page_size);
    if let Some(pointer) = &args.items {
        opts = opts.with_items_pointer(pointer.clone());
    }
    if let Some(n) = args.max_pages {
        opts = opts.with_max_pages(n);
    }
    if let Some(n) = args.skip_failed {
        opts = opts.with_page_error_policy(PageErrorPolicy::Skip { max_consecutive: n });
    }
    opts = match args.stop {
        StopRule::FullPage => opts.with_policy(FullPageHeuristic {
            next_link_pointer: args.next_link.clone(),
        }),
        StopRule::ShortPage => opts.with_policy(ShortPageOnly),
        StopRule::NextLink => match &args.next_link {
            Some(pointer) => opts.with_policy(NextLinkOnly {
                pointer: pointer.clone(),
            }),
            None => bail!("--stop next-link requires --next-link"),
        },
    };
    opts.validate()?;
    Ok(opts)
}

fn write_jsonl(path: &Path, items: &[Value]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    log::info!("Wrote {} items to {}", items.len(), path.display());
    Ok(())
}

pub fn run(args: FetchArgs, config: &Config) -> Result<()> {
    if config.client.base_url.is_empty() {
        bail!("client.base_url is not configured");
    }
    let opts = options(&args)?;
    let params: Params = args.params.iter().cloned().collect();
    let client = RateLimitedCachingClient::from_config(config.client.clone())
        .context("failed to construct upstream client")?;

    // Single-threaded cooperative scheduling; all suspension is I/O or timers
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    let result = runtime.block_on(client.fetch_all(&args.endpoint, &params, &opts));

    print_summary(&args.endpoint, &result, &client);
    if let Some(path) = &args.output {
        write_jsonl(path, &result.items)?;
    }
    if result.failed_pages.is_empty() {
        Ok(())
    } else {
        bail!("{} page(s) failed", result.failed_pages.len())
    }
}

fn print_summary(endpoint: &str, result: &PagedResult, client: &RateLimitedCachingClient) {
    let stats = client.stats();
    let mut table = super::table(&["Fetch", "Value"]);
    let status = if result.complete {
        Cell::new("complete").fg(Color::Green)
    } else if result.hit_max_pages {
        Cell::new("stopped at max pages").fg(Color::Yellow)
    } else {
        Cell::new("incomplete").fg(Color::Red)
    };
    table.add_row(vec![Cell::new("Endpoint"), Cell::new(endpoint)]);
    table.add_row(vec![Cell::new("Status"), status]);
    table.add_row(vec![Cell::new("Items"), Cell::new(result.items.len())]);
    table.add_row(vec![Cell::new("Pages"), Cell::new(result.pages_fetched)]);
    table.add_row(vec![
        Cell::new("HTTP requests"),
        Cell::new(stats.physical_requests),
    ]);
    table.add_row(vec![
        Cell::new("Cache hits/misses"),
        Cell::new(format!("{}/{}", stats.cache_hits, stats.cache_misses)),
    ]);
    table.add_row(vec![
        Cell::new("Rate-limit waits"),
        Cell::new(stats.rate_limit_waits),
    ]);
    for (page, err) in &result.failed_pages {
        table.add_row(vec![
            Cell::new(format!("Page {page}")).fg(Color::Red),
            Cell::new(err),
        ]);
    }
    eprintln!("\n{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: FetchArgs,
    }

    fn parse(argv: &[&str]) -> FetchArgs {
        Wrapper::try_parse_from(std::iter::once("fetch").chain(argv.iter().copied()))
            .unwrap()
            .args
    }

    #[test]
    fn param_parsing() {
        assert_eq!(
            parse_param("uf=SP").unwrap(),
            ("uf".to_string(), "SP".to_string())
        );
        assert_eq!(
            parse_param("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn args_to_options() {
        let args = parse(&[
            "/suppliers",
            "-p",
            "uf=SP",
            "--page-size",
            "50",
            "--items",
            "/data",
            "--skip-failed",
            "2",
        ]);
        assert_eq!(args.params.len(), 1);
        let opts = options(&args).unwrap();
        assert_eq!(opts.page_size, 50);
        assert_eq!(opts.items_pointer.as_deref(), Some("/data"));
        assert_eq!(
            opts.on_page_error,
            PageErrorPolicy::Skip { max_consecutive: 2 }
        );
    }

    #[test]
    fn zero_page_size_rejected() {
        let args = parse(&["/suppliers", "--page-size", "0"]);
        assert!(options(&args).is_err());
    }

    #[test]
    fn next_link_rule_needs_pointer() {
        let args = parse(&["/suppliers", "--stop", "next-link"]);
        assert!(options(&args).is_err());
        let args = parse(&["/suppliers", "--stop", "next-link", "--next-link", "/next"]);
        assert!(options(&args).is_ok());
    }

    #[test]
    fn jsonl_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jsonl");
        write_jsonl(&path, &[serde_json::json!({"a": 1}), serde_json::json!(2)]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\"a\":1}\n2\n");
    }
}
