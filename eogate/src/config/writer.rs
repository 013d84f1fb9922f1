//! Serializes a `ConfigFile` to the commented INI written by `config init`.

use std::path::Path;

use super::settings::ConfigFile;

pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let max_items = config
        .search
        .max_items
        .map(|n| n.to_string())
        .unwrap_or_default();
    let external = config
        .discovery
        .external_product_types
        .as_deref()
        .unwrap_or("");
    let providers_file = config
        .providers
        .config_file
        .as_deref()
        .map(path_to_string)
        .unwrap_or_default();
    let preferred = config.providers.preferred.as_deref().unwrap_or("");

    format!(
        r#"[search]
; Products requested per provider page
items_per_page = {}
; Stop after this many products (empty = no limit); the result then carries a continuation token
max_items = {}
; Providers queried at once by merge-all searches
max_concurrency = {}

[download]
; Default destination directory
directory = {}
; Seconds between two status checks of an order or search job
wait_secs = {}
; Minutes before giving up on an order or search job (0 = check once, never wait)
timeout_mins = {}
; Products downloaded at once
max_concurrency = {}
; Attempts per transfer, first one included (1 = never retry)
retry_attempts = {}

[discovery]
; Published product type discovery document: http(s) URL, file:// URI or path
; If empty, every provider with a discovery endpoint is queried directly
external_product_types = {}

[providers]
; JSON array of provider configurations
config_file = {}
; Provider tried first when a query names none
preferred = {}

[logging]
; Log file, cleared at the start of each session
file = {}
"#,
        config.search.items_per_page,
        max_items,
        config.search.max_concurrency,
        path_to_string(&config.download.directory),
        config.download.wait_secs,
        config.download.timeout_mins,
        config.download.max_concurrency,
        config.download.retry_attempts,
        external,
        providers_file,
        preferred,
        path_to_string(&config.logging.file),
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
