#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Remote collision data access.
//!
//! Each remote backend implements the [`CrashSource`] trait to define how a
//! validated [`Filter`] becomes one HTTP request and how the response is
//! decoded. [`query_features`] ties a source to the normalization step and
//! is the single entry point the server and CLI use.

pub mod binning;
pub mod ckan;
pub mod http;
pub mod normalize;
pub mod registry;
pub mod socrata;
pub mod soql;
pub mod sql;

use async_trait::async_trait;
use crash_map_crash_models::{BinRow, FeatureResult, Filter, QueryMode, QueryResult, RawRow};
use crash_map_source_models::FieldMapping;

/// Errors that can occur while querying a remote source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed before a response was read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error (reading a definition file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A dataset definition could not be parsed.
    #[error("Invalid source definition: {0}")]
    Definition(#[from] toml::de::Error),

    /// Required configuration is missing or unusable.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of what went wrong.
        message: String,
    },

    /// A query was requested with arguments the builder cannot use.
    #[error("Invalid query: {message}")]
    Usage {
        /// Description of what went wrong.
        message: String,
    },

    /// The remote service answered with an error.
    #[error("Upstream error: {message}")]
    Upstream {
        /// HTTP status of the response.
        status: u16,
        /// Description of what went wrong.
        message: String,
        /// Truncated response body, if any.
        body: Option<String>,
    },

    /// The remote service answered with something that is not the expected
    /// envelope.
    #[error("Malformed upstream response: {message}")]
    MalformedResponse {
        /// HTTP status of the response.
        status: u16,
        /// Description of what went wrong.
        message: String,
        /// Truncated response body, if any.
        body: Option<String>,
    },
}

impl SourceError {
    /// Whether the failure originated at the remote service rather than in
    /// local configuration or arguments.
    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Upstream { .. } | Self::MalformedResponse { .. }
        )
    }
}

/// Truncation heuristic: a result that fills its cap may have been cut off.
///
/// This gives a false positive when the true match count equals the cap
/// exactly. No `COUNT(*)` query is issued to rule that out.
#[must_use]
pub const fn is_truncated(returned: usize, limit: u32) -> bool {
    returned >= limit as usize
}

/// Trait that all remote collision backends implement.
#[async_trait]
pub trait CrashSource: Send + Sync {
    /// Returns the identifier of the dataset definition (e.g., `"ca_ccrs"`).
    fn id(&self) -> &str;

    /// Column mapping used to decode rows.
    fn fields(&self) -> &FieldMapping;

    /// Runs the row-fetch query.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if configuration is incomplete, the request
    /// fails, or the response is not the expected envelope.
    async fn fetch_points(&self, filter: &Filter) -> Result<QueryResult<RawRow>, SourceError>;

    /// Runs the spatial-bin query with the given cell size in degrees.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Usage`] if the filter has no bbox or the bin
    /// size is not positive, plus everything [`Self::fetch_points`] can
    /// return.
    async fn fetch_bins(&self, filter: &Filter, bin: f64)
    -> Result<QueryResult<BinRow>, SourceError>;
}

/// Runs the query shape selected by `filter` and normalizes the result.
///
/// # Errors
///
/// Returns [`SourceError::Usage`] if bin mode is selected without a bin
/// size, plus any error from the source.
pub async fn query_features(
    source: &dyn CrashSource,
    filter: &Filter,
) -> Result<FeatureResult, SourceError> {
    match filter.mode() {
        QueryMode::Points => {
            let result = source.fetch_points(filter).await?;
            let features = normalize::rows_to_features(&result.rows, source.fields());
            log::info!(
                "{}: {} rows -> {} features (truncated={})",
                source.id(),
                result.rows.len(),
                features.len(),
                result.truncated
            );
            Ok(FeatureResult {
                features,
                truncated: result.truncated,
            })
        }
        QueryMode::Bin => {
            let Some(bin) = filter.bin else {
                return Err(SourceError::Usage {
                    message: "bin size is required when mode=bin".to_string(),
                });
            };
            let result = source.fetch_bins(filter, bin).await?;
            log::info!(
                "{}: {} bins at {bin} (truncated={})",
                source.id(),
                result.rows.len(),
                result.truncated
            );
            Ok(FeatureResult {
                features: result.rows.iter().map(normalize::bin_to_feature).collect(),
                truncated: result.truncated,
            })
        }
    }
}
