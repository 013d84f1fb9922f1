//! Normalized result model shared by every plugin.
//!
//! Whatever wire format a provider speaks, its answers end up as
//! [`Product`]s inside a [`SearchResult`], and every query a caller issues is
//! a provider-agnostic [`Query`].

mod geometry;
mod product;
mod product_type;
mod query;
mod search;

pub use geometry::{Bounds, Geometry};
pub use product::{
    Asset, AssetMap, DownloadState, Product, DOWNLOAD_LINK, ORDER_LINK, ORDER_STATUS_LINK,
    STORAGE_STATUS,
};
pub use product_type::ProductType;
pub use query::{parse_datetime, Query, SortKey, SortOrder};
pub use search::{
    sort_products, ContinuationToken, MergedSearchResult, ProviderFailure, ProviderOutcome,
    SearchResult, TotalCount,
};
