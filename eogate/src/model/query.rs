//! Abstract, provider-independent search query.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::geometry::Geometry;
use crate::error::{GatewayError, GatewayResult};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A normalized property to sort results by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub key: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            order: SortOrder::Descending,
        }
    }
}

impl FromStr for SortKey {
    type Err = GatewayError;

    /// Parses `key`, `key:asc` or `key:desc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, order) = match s.rsplit_once(':') {
            Some((key, "asc")) => (key, SortOrder::Ascending),
            Some((key, "desc")) => (key, SortOrder::Descending),
            Some((_, other)) => {
                return Err(GatewayError::Configuration(format!(
                    "invalid sort order '{}' (expected asc or desc)",
                    other
                )))
            }
            None => (s, SortOrder::Ascending),
        };
        if key.is_empty() {
            return Err(GatewayError::Configuration("empty sort key".to_string()));
        }
        Ok(Self {
            key: key.to_string(),
            order,
        })
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = match self.order {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        };
        write!(f, "{}:{}", self.key, order)
    }
}

/// A search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub product_type: String,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Provider-specific parameters passed through untouched.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub items_per_page: Option<usize>,
    #[serde(default)]
    pub max_items: Option<usize>,
    /// Continuation token from a previous truncated result.
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub sort: Option<SortKey>,
}

impl Query {
    pub fn new(product_type: impl Into<String>) -> Self {
        Self {
            product_type: product_type.into(),
            geometry: None,
            start: None,
            end: None,
            extra: BTreeMap::new(),
            provider: None,
            items_per_page: None,
            max_items: None,
            page_token: None,
            sort: None,
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_items_per_page(mut self, n: usize) -> Self {
        self.items_per_page = Some(n);
        self
    }

    pub fn with_max_items(mut self, n: usize) -> Self {
        self.max_items = Some(n);
        self
    }

    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }

    /// Rejects queries no provider could answer.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.product_type.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "query has no product type".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(GatewayError::Configuration(format!(
                    "query start {} is after end {}",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                )));
            }
        }
        if self.items_per_page == Some(0) {
            return Err(GatewayError::Configuration(
                "items_per_page must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Stable digest of the search criteria.
    ///
    /// Paging state (`page_token`, `max_items`) is excluded so that callers
    /// asking for the same data share one deferred search job.
    pub fn fingerprint(&self) -> String {
        let mut criteria = self.clone();
        criteria.page_token = None;
        criteria.max_items = None;
        let encoded = serde_json::to_vec(&criteria).unwrap_or_default();
        format!("{:x}", Sha256::digest(&encoded))
    }
}

/// Parses a user supplied date or timestamp.
///
/// Accepts RFC 3339 (`2021-01-01T10:00:00Z`) and plain dates (`2021-01-01`,
/// interpreted as midnight UTC).
pub fn parse_datetime(text: &str) -> GatewayResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| GatewayError::Configuration(format!("invalid date or timestamp '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_parse() {
        let key: SortKey = "startTimeFromAscendingNode:desc".parse().unwrap();
        assert_eq!(key, SortKey::descending("startTimeFromAscendingNode"));
        let key: SortKey = "cloudCover".parse().unwrap();
        assert_eq!(key.order, SortOrder::Ascending);
        assert!("x:sideways".parse::<SortKey>().is_err());
        assert_eq!(key.to_string(), "cloudCover:asc");
    }

    #[test]
    fn test_validate_rejects_inverted_interval() {
        let q = Query::new("S1_SAR_GRD")
            .with_start(parse_datetime("2021-02-01").unwrap())
            .with_end(parse_datetime("2021-01-01").unwrap());
        assert!(matches!(q.validate(), Err(GatewayError::Configuration(_))));
        assert!(Query::new("").validate().is_err());
        assert!(Query::new("X").validate().is_ok());
    }

    #[test]
    fn test_fingerprint_ignores_paging_state() {
        let a = Query::new("S1_SAR_GRD").with_geometry(Geometry::bbox(0.0, 0.0, 1.0, 1.0));
        let b = a.clone().with_max_items(10).with_page_token("abc");
        let c = a.clone().with_extra("polarization", "VV");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_parse_datetime_variants() {
        let d = parse_datetime("2020-05-01").unwrap();
        assert_eq!(d.to_rfc3339(), "2020-05-01T00:00:00+00:00");
        let t = parse_datetime("2020-05-01T10:30:00+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2020-05-01T08:30:00+00:00");
        assert!(parse_datetime("yesterday").is_err());
    }
}
