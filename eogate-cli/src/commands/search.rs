//! `eogate search`: find products of one type across providers.

use std::sync::Arc;

use eogate::model::{ProviderFailure, TotalCount};
use eogate::{Gateway, Product, Query};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::common::{print_products, OutputFormat, SearchArgs, TerminalProgress};
use crate::error::CliError;
use crate::runner::CliRunner;

/// What a search returned, single-provider or merged.
#[derive(Debug, Default)]
pub struct Found {
    pub products: Vec<Product>,
    pub total: Option<TotalCount>,
    pub next_page: Option<String>,
    pub failures: Vec<ProviderFailure>,
}

/// Runs the query against the best provider, or every provider with `all`.
pub async fn find(
    gateway: &Gateway,
    query: &Query,
    all: bool,
    cancel: &CancellationToken,
) -> Result<Found, CliError> {
    if all {
        let merged = gateway.search_all(query, cancel).await?;
        for failure in &merged.failures {
            warn!(provider = %failure.provider, error = %failure.error, "Provider failed");
        }
        return Ok(Found {
            products: merged.products,
            total: None,
            next_page: None,
            failures: merged.failures,
        });
    }
    let result = gateway.search(query, cancel).await?;
    Ok(Found {
        products: result.products,
        total: Some(result.total),
        next_page: result.next_page,
        failures: Vec::new(),
    })
}

/// Run the search command.
pub fn run(args: SearchArgs, format: OutputFormat, runner: CliRunner) -> Result<(), CliError> {
    runner.log_startup("search");
    let query = args.to_query()?;
    let progress = Arc::new(TerminalProgress::new(format == OutputFormat::Json));
    let gateway = runner.gateway(progress.clone())?;
    let cancel = runner.interrupt_token()?;

    let found = runner
        .runtime()?
        .block_on(find(&gateway, &query, args.all, &cancel));
    progress.finish();
    let found = found?;
    info!(count = found.products.len(), "Search complete");

    match format {
        OutputFormat::Json => print_json(&found),
        OutputFormat::Table => {
            print_summary(&found);
            Ok(())
        }
    }
}

fn print_json(found: &Found) -> Result<(), CliError> {
    let failures: Vec<_> = found
        .failures
        .iter()
        .map(|f| json!({"provider": f.provider, "error": f.error.to_string()}))
        .collect();
    let document = json!({
        "products": found.products,
        "total": found.total,
        "next_page": found.next_page,
        "failures": failures,
    });
    let text = serde_json::to_string_pretty(&document)
        .map_err(|e| CliError::Output(std::io::Error::other(e)))?;
    println!("{}", text);
    Ok(())
}

fn print_summary(found: &Found) {
    print_products(&found.products);
    println!();
    match found.total {
        Some(TotalCount::Exact(n)) => println!("{} of {} products", found.products.len(), n),
        Some(TotalCount::Estimated(n)) => {
            println!("{} of about {} products", found.products.len(), n)
        }
        _ => println!("{} products", found.products.len()),
    }
    if let Some(token) = &found.next_page {
        println!("More results available; continue with:");
        println!("  --page-token {}", token);
    }
    for failure in &found.failures {
        eprintln!("Warning: {} failed: {}", failure.provider, failure.error);
    }
}
