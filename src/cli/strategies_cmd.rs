//! `taxprobe strategies` — list the registered jurisdiction strategies.

use anyhow::Result;
use std::path::Path;

use crate::cli::output;
use crate::strategy::{Navigation, StrategyRegistry, Transport};

pub fn run(file: Option<&Path>) -> Result<()> {
    let registry = match file {
        Some(path) => StrategyRegistry::from_file(path)?,
        None => StrategyRegistry::builtin()?,
    };

    if output::is_json() {
        let entries: Vec<_> = registry
            .all()
            .iter()
            .map(|s| serde_json::to_value(s.as_ref()).unwrap_or_default())
            .collect();
        output::print_json(&serde_json::Value::Array(entries));
        return Ok(());
    }

    println!("{:<14} {:<9} {:<12} {:<6} required", "jurisdiction", "transport", "navigation", "rules");
    for strategy in registry.all() {
        let transport = match strategy.transport {
            Transport::Browser => "browser",
            Transport::Http => "http",
        };
        let navigation = match &strategy.navigation {
            Navigation::FormSearch { .. } => "form_search",
            Navigation::DirectUrl { .. } => "direct_url",
        };
        let required: Vec<&str> = strategy.required.iter().map(|f| f.name()).collect();
        println!(
            "{:<14} {:<9} {:<12} {:<6} {}",
            strategy.jurisdiction,
            transport,
            navigation,
            strategy.rules.len(),
            required.join(",")
        );
    }
    println!("\n{} strategies registered", registry.len());
    Ok(())
}
