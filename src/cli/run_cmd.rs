//! `taxprobe run` — extract tax data for a batch of properties.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cli::output;
use crate::driver::chromium::ChromiumDriver;
use crate::driver::fetch::HttpDriver;
use crate::driver::Driver;
use crate::events::{EventBus, RunEvent};
use crate::orchestrator::{Orchestrator, RunConfig, RunSummary};
use crate::sink::{self, JsonlSink, ResultSink};
use crate::strategy::{StrategyRegistry, Transport};

/// Plain-HTTP request timeout; browser strategies carry their own.
const HTTP_TIMEOUT_MS: u64 = 30_000;

pub struct RunArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub summary: Option<PathBuf>,
    pub jurisdiction: Option<String>,
    pub concurrency: usize,
    pub domain_interval_ms: u64,
    pub strategies: Option<PathBuf>,
    pub dry_run: bool,
    pub limit: Option<usize>,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let registry = match &args.strategies {
        Some(path) => StrategyRegistry::from_file(path)?,
        None => StrategyRegistry::builtin()?,
    };
    let records = sink::load_properties(&args.input)?;
    info!(
        records = records.len(),
        strategies = registry.len(),
        "loaded inputs"
    );

    if args.dry_run {
        return dry_run(&records, &registry, args.jurisdiction.as_deref());
    }

    // Launch Chromium only when a record actually resolves to a browser
    // strategy; HTTP-only batches run without it.
    let browser_needed = needs_browser(
        &records,
        &registry,
        args.jurisdiction.as_deref(),
        args.limit,
    );
    let http: Arc<dyn Driver> = Arc::new(HttpDriver::new(HTTP_TIMEOUT_MS));
    let browser: Arc<dyn Driver> = if browser_needed {
        Arc::new(ChromiumDriver::launch().await?)
    } else {
        Arc::clone(&http)
    };

    let sink: Arc<dyn ResultSink> = Arc::new(JsonlSink::create(&args.output)?);
    let bus = Arc::new(EventBus::default());
    let config = RunConfig {
        concurrency: args.concurrency,
        domain_interval: Duration::from_millis(args.domain_interval_ms),
        jurisdiction_filter: args.jurisdiction.clone(),
        limit: args.limit,
        ..Default::default()
    };

    let orchestrator = Orchestrator::new(browser, Arc::clone(&http), sink, Arc::clone(&bus), config);

    // Ctrl-C requests a cooperative stop; in-flight tasks finish and their
    // results are kept.
    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after in-flight tasks finish...");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let progress = spawn_progress(&bus);

    let summary = orchestrator.run(records, &registry).await?;
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    if let Some(path) = &args.summary {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    report(&summary, &args.output);
    Ok(())
}

/// Whether any record in the run's actual task set (after the jurisdiction
/// filter and limit are applied, matching the orchestrator's selection)
/// resolves to a browser-transport strategy.
fn needs_browser(
    records: &[crate::model::PropertyRecord],
    registry: &StrategyRegistry,
    filter: Option<&str>,
    limit: Option<usize>,
) -> bool {
    records
        .iter()
        .filter(|r| match filter {
            Some(f) => r.jurisdiction.to_lowercase().contains(&f.to_lowercase()),
            None => true,
        })
        .take(limit.unwrap_or(usize::MAX))
        .any(|r| {
            registry
                .lookup_record(r)
                .map(|s| s.transport == Transport::Browser)
                .unwrap_or(false)
        })
}

/// Resolve strategies without touching any site.
fn dry_run(
    records: &[crate::model::PropertyRecord],
    registry: &StrategyRegistry,
    filter: Option<&str>,
) -> Result<()> {
    let mut resolved = 0usize;
    let mut unresolved = 0usize;
    for record in records {
        if let Some(f) = filter {
            if !record
                .jurisdiction
                .to_lowercase()
                .contains(&f.to_lowercase())
            {
                continue;
            }
        }
        match registry.lookup_record(record) {
            Some(strategy) => {
                resolved += 1;
                if !output::is_quiet() {
                    println!(
                        "{:<24} {:<14} -> {} ({:?} transport)",
                        record.property_id,
                        record.jurisdiction,
                        strategy.jurisdiction,
                        strategy.transport
                    );
                }
            }
            None => {
                unresolved += 1;
                if !output::is_quiet() {
                    println!(
                        "{:<24} {:<14} -> NO STRATEGY (would be blocked)",
                        record.property_id, record.jurisdiction
                    );
                }
            }
        }
    }
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "dry_run": true,
            "resolved": resolved,
            "unresolved": unresolved,
        }));
    } else {
        println!("\n{resolved} resolved, {unresolved} without a strategy");
    }
    Ok(())
}

/// Progress bar driven off the event stream. Skipped in quiet/json modes.
fn spawn_progress(bus: &EventBus) -> Option<ProgressBar> {
    if output::is_quiet() || output::is_json() {
        return None;
    }
    let mut rx = bus.subscribe();
    let bar = ProgressBar::hidden();
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let bar_handle = bar.clone();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                RunEvent::RunStarted { total_tasks } => {
                    bar_handle.set_length(total_tasks as u64);
                    bar_handle.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                }
                RunEvent::TaskFinished {
                    property_id,
                    status,
                    ..
                } => {
                    bar_handle.inc(1);
                    bar_handle.set_message(format!("{property_id}: {status}"));
                }
                RunEvent::RunCompleted { .. } => break,
                _ => {}
            }
        }
    });
    Some(bar)
}

fn report(summary: &RunSummary, output_path: &std::path::Path) {
    if output::is_json() {
        if let Ok(value) = serde_json::to_value(summary) {
            output::print_json(&value);
        }
        return;
    }
    if output::is_quiet() {
        return;
    }
    println!("\nRun complete in {:.1}s", summary.duration_ms as f64 / 1000.0);
    println!("  success:     {}", summary.success);
    println!("  not_found:   {}", summary.not_found);
    println!("  parse_error: {}", summary.parse_error);
    println!("  timeout:     {}", summary.timeout);
    println!("  blocked:     {}", summary.blocked);
    if summary.cancelled {
        println!("  (run was cancelled before the worklist drained)");
    }
    if !summary.needs_review.is_empty() {
        println!("\nNeeds review:");
        for item in &summary.needs_review {
            println!(
                "  {:<24} {:<14} {}",
                item.property_id, item.jurisdiction, item.status
            );
        }
    }
    println!("\nResults written to {}", output_path.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyRecord;

    fn registry() -> StrategyRegistry {
        let json = r#"[
            {
                "jurisdiction": "Alpha",
                "navigation": { "kind": "direct_url" },
                "rules": [
                    { "field": "amount_due", "rules": [ { "type": "label_line", "label": "Due" } ] }
                ]
            },
            {
                "jurisdiction": "Beta",
                "transport": "http",
                "navigation": { "kind": "direct_url" },
                "rules": [
                    { "field": "amount_due", "rules": [ { "type": "label_line", "label": "Due" } ] }
                ]
            }
        ]"#;
        StrategyRegistry::from_json(json).unwrap()
    }

    fn record(id: &str, jurisdiction: &str) -> PropertyRecord {
        PropertyRecord {
            property_id: id.into(),
            property_name: String::new(),
            jurisdiction: jurisdiction.into(),
            state: String::new(),
            parcel_number: "1000".into(),
            lookup_url: format!("https://{}.example.gov/bill", jurisdiction.to_lowercase()),
        }
    }

    #[test]
    fn browser_launch_decision_honors_filter_and_limit() {
        let registry = registry();
        // Beta is http-transport, Alpha needs a browser.
        let records = vec![record("p1", "Beta"), record("p2", "Alpha")];

        assert!(needs_browser(&records, &registry, None, None));
        // Filtered down to the http-only jurisdiction: no browser.
        assert!(!needs_browser(&records, &registry, Some("beta"), None));
        // Limit cuts the batch before the browser record: no browser.
        assert!(!needs_browser(&records, &registry, None, Some(1)));
        assert!(needs_browser(&records, &registry, None, Some(2)));
    }

    #[test]
    fn unresolved_records_do_not_force_a_browser() {
        let registry = registry();
        let records = vec![record("p1", "Atlantis")];
        assert!(!needs_browser(&records, &registry, None, None));
    }
}
