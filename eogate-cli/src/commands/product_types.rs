//! `eogate product-types`: list the catalog, optionally refreshed from providers.

use std::sync::Arc;

use eogate::progress::NoProgress;
use eogate::ProductType;

use super::common::OutputFormat;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Run the product-types command.
pub fn run(
    provider: Option<String>,
    fetch: bool,
    format: OutputFormat,
    runner: CliRunner,
) -> Result<(), CliError> {
    runner.log_startup("product-types");
    let gateway = runner.gateway(Arc::new(NoProgress))?;
    let types = runner
        .runtime()?
        .block_on(gateway.list_product_types(provider.as_deref(), fetch))?;

    match format {
        OutputFormat::Json => {
            let text = serde_json::to_string_pretty(&types)
                .map_err(|e| CliError::Output(std::io::Error::other(e)))?;
            println!("{}", text);
        }
        OutputFormat::Table => print_table(&types),
    }
    Ok(())
}

fn print_table(types: &[ProductType]) {
    let width = types.iter().map(|t| t.id.len()).max().unwrap_or(2).max(2);
    for product_type in types {
        let title = if product_type.title.is_empty() {
            "-"
        } else {
            product_type.title.as_str()
        };
        println!("{:<width$}  {}", product_type.id, title, width = width);
    }
    println!();
    println!("{} product types", types.len());
}
