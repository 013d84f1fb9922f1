//! `eogate providers`: list providers in priority order.

use std::sync::Arc;

use eogate::progress::NoProgress;
use serde_json::json;

use super::common::OutputFormat;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Run the providers command.
///
/// Pruned providers (missing credentials, unusable plugins) are listed
/// separately with the reason.
pub fn run(
    product_type: Option<String>,
    format: OutputFormat,
    runner: CliRunner,
) -> Result<(), CliError> {
    runner.log_startup("providers");
    let gateway = runner.gateway(Arc::new(NoProgress))?;
    let names = gateway.available_providers(product_type.as_deref());
    let pruned = gateway.registry().pruned();
    let preferred = gateway.preferred_provider().map(|(name, _)| name);

    if format == OutputFormat::Json {
        let providers: Vec<_> = names
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "priority": gateway.registry().priority(name),
                    "preferred": preferred.as_deref() == Some(name.as_str()),
                })
            })
            .collect();
        let pruned: Vec<_> = pruned
            .iter()
            .map(|(name, reason)| json!({"name": name, "reason": reason}))
            .collect();
        let text = serde_json::to_string_pretty(&json!({"providers": providers, "pruned": pruned}))
            .map_err(|e| CliError::Output(std::io::Error::other(e)))?;
        println!("{}", text);
        return Ok(());
    }

    if names.is_empty() {
        match &product_type {
            Some(t) => println!("No provider offers {}.", t),
            None => println!("No providers configured. See `eogate config show`."),
        }
    }
    for name in &names {
        let priority = gateway.registry().priority(name).unwrap_or_default();
        let marker = if preferred.as_deref() == Some(name.as_str()) {
            " (preferred)"
        } else {
            ""
        };
        println!("{:<24} priority {}{}", name, priority, marker);
    }
    if !pruned.is_empty() {
        println!();
        println!("Unavailable:");
        for (name, reason) in pruned {
            println!("  {:<22} {}", name, reason);
        }
    }
    Ok(())
}
