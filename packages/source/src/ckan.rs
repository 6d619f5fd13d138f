//! CKAN `datastore_search_sql` client.
//!
//! Queries are compiled by [`crate::sql`] and sent as the `sql` query
//! parameter of a single GET. The endpoint wraps rows in an envelope of the
//! form `{"success": bool, "result": {"records": [...]}, "error": ...}`.

use crash_map_crash_models::{BinRow, Filter, QueryResult, RawRow};
use crash_map_source_models::FieldMapping;
use serde::Deserialize;
use serde_json::Value;

use crate::http::{self, RawResponse, non_empty_preview};
use crate::sql::{CompiledQuery, build_bin_query, build_points_query};
use crate::{CrashSource, SourceError, is_truncated, normalize};

/// Response envelope of `datastore_search_sql`.
#[derive(Debug, Deserialize)]
struct CkanEnvelope {
    #[serde(default)]
    success: bool,
    result: Option<CkanResult>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CkanResult {
    records: Option<Vec<Value>>,
}

/// Extracts the record list from a `datastore_search_sql` response.
///
/// A missing `result.records` on a successful envelope is treated as an
/// empty result.
///
/// # Errors
///
/// Returns [`SourceError::Upstream`] for non-2xx statuses or
/// `success: false`, and [`SourceError::MalformedResponse`] if the body is
/// not a JSON envelope.
pub fn parse_envelope(response: &RawResponse) -> Result<Vec<Value>, SourceError> {
    response.check_status("CKAN")?;

    let envelope: CkanEnvelope =
        serde_json::from_str(&response.body).map_err(|e| SourceError::MalformedResponse {
            status: response.status,
            message: format!("CKAN response is not a JSON envelope: {e}"),
            body: non_empty_preview(&response.body),
        })?;

    if !envelope.success {
        let detail = envelope
            .error
            .map_or_else(|| "no error detail".to_string(), |e| e.to_string());
        return Err(SourceError::Upstream {
            status: response.status,
            message: format!("CKAN query failed: {detail}"),
            body: non_empty_preview(&response.body),
        });
    }

    Ok(envelope
        .result
        .and_then(|r| r.records)
        .unwrap_or_default())
}

/// A CKAN-backed collision source.
pub struct CkanClient {
    id: String,
    client: reqwest::Client,
    api_url: String,
    resource_id: String,
    fields: FieldMapping,
}

impl CkanClient {
    /// Creates a client for one datastore resource.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        client: reqwest::Client,
        api_url: impl Into<String>,
        resource_id: impl Into<String>,
        fields: FieldMapping,
    ) -> Self {
        Self {
            id: id.into(),
            client,
            api_url: api_url.into(),
            resource_id: resource_id.into(),
            fields,
        }
    }

    /// The configured resource ID.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Configuration`] if no resource ID was
    /// configured.
    pub fn resource_id(&self) -> Result<&str, SourceError> {
        let id = self.resource_id.trim();
        if id.is_empty() {
            return Err(SourceError::Configuration {
                message: "CKAN resource ID is not configured (set CKAN_RESOURCE_ID)"
                    .to_string(),
            });
        }
        Ok(id)
    }

    /// Sends a compiled query and returns the envelope's records.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the request fails or the envelope reports
    /// an error.
    pub async fn execute(&self, query: &CompiledQuery) -> Result<Vec<Value>, SourceError> {
        log::debug!("{}: {}", self.id, query.text);
        let request = http::no_cache(
            self.client
                .get(&self.api_url)
                .query(&[("sql", query.text.as_str())]),
        );
        let response = http::send(request).await?;
        parse_envelope(&response)
    }
}

#[async_trait::async_trait]
impl CrashSource for CkanClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn fields(&self) -> &FieldMapping {
        &self.fields
    }

    async fn fetch_points(&self, filter: &Filter) -> Result<QueryResult<RawRow>, SourceError> {
        let query = build_points_query(self.resource_id()?, &self.fields, filter);
        let records = self.execute(&query).await?;
        let truncated = is_truncated(records.len(), query.limit);
        let rows = records
            .into_iter()
            .map(|record| normalize::decode_row(record, &self.fields))
            .collect();
        Ok(QueryResult { rows, truncated })
    }

    async fn fetch_bins(
        &self,
        filter: &Filter,
        bin: f64,
    ) -> Result<QueryResult<BinRow>, SourceError> {
        let query = build_bin_query(self.resource_id()?, &self.fields, filter, bin)?;
        let records = self.execute(&query).await?;
        let truncated = is_truncated(records.len(), query.limit);

        let rows: Vec<BinRow> = records.iter().filter_map(normalize::decode_bin_row).collect();
        if rows.len() < records.len() {
            log::warn!(
                "{}: skipped {} malformed bin rows",
                self.id,
                records.len() - rows.len()
            );
        }

        Ok(QueryResult { rows, truncated })
    }
}
