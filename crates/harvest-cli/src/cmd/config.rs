//! `harvest config` - show effective configuration

use anyhow::Result;

use crate::config::Config;

fn rows(config: &Config) -> Vec<(&'static str, String)> {
    let c = &config.client;
    let w = &config.writer;
    let t = &w.thresholds;
    let r = &config.resolver;
    vec![
        (
            "Base URL",
            if c.base_url.is_empty() {
                "(not set)".to_string()
            } else {
                c.base_url.clone()
            },
        ),
        (
            "API key",
            if c.api_key.is_some() {
                "configured"
            } else {
                "not set"
            }
            .to_string(),
        ),
        ("Requests/second", format!("{}", c.requests_per_second)),
        ("Request timeout", format!("{}ms", c.request_timeout_ms)),
        (
            "Retries",
            format!(
                "{} attempts, {}ms base, {}ms max",
                c.retry_attempts, c.retry_base_delay_ms, c.retry_max_delay_ms
            ),
        ),
        (
            "Cache",
            format!("{} entries, TTL {}ms", c.max_cache_entries, c.cache_ttl_ms),
        ),
        (
            "Batch size",
            format!(
                "{} (min {}, max {})",
                w.initial_batch_size(),
                w.min_batch_size,
                w.max_operations_per_batch
            ),
        ),
        (
            "Batch bytes",
            format!(
                "{} (document max {})",
                w.max_batch_bytes, w.max_document_bytes
            ),
        ),
        (
            "Concurrency",
            format!(
                "{} (min {}, max {})",
                w.initial_concurrency(),
                w.min_concurrency,
                w.max_concurrent_batches
            ),
        ),
        ("Commit timeout", format!("{}ms", w.commit_timeout_ms)),
        (
            "Adaptation",
            format!("every {} commits, history {}", w.adapt_every, w.history_len),
        ),
        (
            "Tier cut points",
            format!(
                "excellent >{:.0}%, good >{:.0}%/<{:.0}% timeouts, poor >{:.0}%/<{:.0}% timeouts",
                t.excellent_success_rate * 100.0,
                t.good_success_rate * 100.0,
                t.good_timeout_rate * 100.0,
                t.poor_success_rate * 100.0,
                t.poor_timeout_rate * 100.0
            ),
        ),
        ("Fallback dir", w.fallback_dir.display().to_string()),
        (
            "Resolver",
            format!(
                "id >= {} digits, similarity >= {}",
                r.min_id_digits, r.similarity_threshold
            ),
        ),
    ]
}

pub fn run(config: &Config) -> Result<()> {
    let mut table = super::table(&["Setting", "Value"]);
    for (name, value) in rows(config) {
        table.add_row(vec![name.to_string(), value]);
    }
    eprintln!("\n{table}");
    Ok(())
}
