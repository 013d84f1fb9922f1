//! INI parsing: the single place where key names map to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parses an `Ini` into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays the values found. Empty
/// values keep the default.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("search")) {
        if let Some(v) = positive(section, "search", "items_per_page")? {
            config.search.items_per_page = v;
        }
        if let Some(v) = positive(section, "search", "max_items")? {
            config.search.max_items = Some(v);
        }
        if let Some(v) = positive(section, "search", "max_concurrency")? {
            config.search.max_concurrency = v;
        }
    }

    if let Some(section) = ini.section(Some("download")) {
        if let Some(v) = non_empty(section, "directory") {
            config.download.directory = expand_tilde(v);
        }
        if let Some(v) = number(section, "download", "wait_secs", "must be a positive integer (seconds)")? {
            if v == 0 {
                return Err(invalid("download", "wait_secs", "0", "must be a positive integer (seconds)"));
            }
            config.download.wait_secs = v;
        }
        if let Some(v) = number(section, "download", "timeout_mins", "must be an integer (minutes)")? {
            config.download.timeout_mins = v;
        }
        if let Some(v) = positive(section, "download", "max_concurrency")? {
            config.download.max_concurrency = v;
        }
        if let Some(v) = positive(section, "download", "retry_attempts")? {
            config.download.retry_attempts = v;
        }
    }

    if let Some(section) = ini.section(Some("discovery")) {
        if let Some(v) = non_empty(section, "external_product_types") {
            config.discovery.external_product_types = Some(v.to_string());
        }
    }

    if let Some(section) = ini.section(Some("providers")) {
        if let Some(v) = non_empty(section, "config_file") {
            config.providers.config_file = Some(expand_tilde(v));
        }
        if let Some(v) = non_empty(section, "preferred") {
            config.providers.preferred = Some(v.to_string());
        }
    }

    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section, "file") {
            config.logging.file = expand_tilde(v);
        }
    }

    Ok(config)
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn number<T: FromStr>(
    section: &Properties,
    name: &str,
    key: &str,
    reason: &str,
) -> Result<Option<T>, ConfigFileError> {
    non_empty(section, key)
        .map(|v| v.parse().map_err(|_| invalid(name, key, v, reason)))
        .transpose()
}

fn positive<T: FromStr + PartialOrd + Default>(
    section: &Properties,
    name: &str,
    key: &str,
) -> Result<Option<T>, ConfigFileError> {
    const REASON: &str = "must be a positive integer";
    match number::<T>(section, name, key, REASON)? {
        Some(v) if v <= T::default() => Err(invalid(name, key, section.get(key).unwrap_or_default().trim(), REASON)),
        other => Ok(other),
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::DEFAULT_ITEMS_PER_PAGE;

    fn parse(text: &str) -> Result<ConfigFile, ConfigFileError> {
        parse_ini(&Ini::load_from_str(text).unwrap())
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_all_sections() {
        let config = parse(
            "[search]\nitems_per_page = 50\nmax_items = 200\nmax_concurrency = 2\n\
             [download]\ndirectory = /data/eo\nwait_secs = 10\ntimeout_mins = 0\nretry_attempts = 3\n\
             [discovery]\nexternal_product_types = https://example.com/ext.json\n\
             [providers]\nconfig_file = /etc/eogate/providers.json\npreferred = peps\n\
             [logging]\nfile = /var/log/eogate.log\n",
        )
        .unwrap();
        assert_eq!(config.search.items_per_page, 50);
        assert_eq!(config.search.max_items, Some(200));
        assert_eq!(config.search.max_concurrency, 2);
        assert_eq!(config.download.directory, PathBuf::from("/data/eo"));
        assert_eq!(config.download.wait_secs, 10);
        assert_eq!(config.download.timeout_mins, 0);
        assert_eq!(config.download.retry_attempts, 3);
        assert_eq!(
            config.discovery.external_product_types.as_deref(),
            Some("https://example.com/ext.json")
        );
        assert_eq!(
            config.providers.config_file,
            Some(PathBuf::from("/etc/eogate/providers.json"))
        );
        assert_eq!(config.providers.preferred.as_deref(), Some("peps"));
        assert_eq!(config.logging.file, PathBuf::from("/var/log/eogate.log"));
    }

    #[test]
    fn test_empty_values_keep_defaults() {
        let config = parse("[search]\nitems_per_page =\n[providers]\npreferred = \n").unwrap();
        assert_eq!(config.search.items_per_page, DEFAULT_ITEMS_PER_PAGE);
        assert!(config.providers.preferred.is_none());
    }

    #[test]
    fn test_invalid_values() {
        match parse("[search]\nitems_per_page = lots\n") {
            Err(ConfigFileError::InvalidValue { section, key, value, .. }) => {
                assert_eq!(section, "search");
                assert_eq!(key, "items_per_page");
                assert_eq!(value, "lots");
            }
            other => panic!("expected invalid value, got {:?}", other),
        }
        assert!(parse("[search]\nmax_concurrency = 0\n").is_err());
        assert!(parse("[download]\nwait_secs = 0\n").is_err());
        assert!(parse("[download]\ntimeout_mins = -1\n").is_err());
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/eo"), home.join("eo"));
        }
    }
}
