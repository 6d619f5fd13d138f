//! Socrata SODA client.
//!
//! Row fetches compile to `$select`/`$where`/`$limit` parameters on
//! `https://{domain}/resource/{dataset_id}.json`, which answers with a bare
//! JSON array. SODA has no portable rounding aggregate, so bins are built
//! locally from a capped point fetch.

use crash_map_crash_models::{Bbox, BinRow, Filter, MAX_LIMIT, QueryResult, RawRow};
use crash_map_source_models::FieldMapping;
use serde_json::Value;

use crate::binning::{BinSample, aggregate_bins};
use crate::http::{self, non_empty_preview};
use crate::soql::{CompiledSoql, build_bin_soql, build_points_soql};
use crate::{CrashSource, SourceError, is_truncated, normalize};

/// A Socrata-backed collision source.
pub struct SocrataClient {
    id: String,
    client: reqwest::Client,
    domain: String,
    dataset_id: String,
    app_token: Option<String>,
    has_location: bool,
    fields: FieldMapping,
}

impl SocrataClient {
    /// Creates a client for one dataset.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        client: reqwest::Client,
        domain: impl Into<String>,
        dataset_id: impl Into<String>,
        app_token: Option<String>,
        has_location: bool,
        fields: FieldMapping,
    ) -> Self {
        Self {
            id: id.into(),
            client,
            domain: domain.into(),
            dataset_id: dataset_id.into(),
            app_token,
            has_location,
            fields,
        }
    }

    /// The resource URL for the configured dataset.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Configuration`] if the domain or dataset ID is
    /// blank.
    pub fn resource_url(&self) -> Result<String, SourceError> {
        let domain = self.domain.trim().trim_end_matches('/');
        let dataset_id = self.dataset_id.trim();
        if domain.is_empty() || dataset_id.is_empty() {
            return Err(SourceError::Configuration {
                message: "Socrata domain and dataset ID must be configured \
                          (set SOCRATA_DOMAIN and SOCRATA_DATASET_ID)"
                    .to_string(),
            });
        }
        let domain = domain
            .strip_prefix("https://")
            .or_else(|| domain.strip_prefix("http://"))
            .unwrap_or(domain);
        Ok(format!("https://{domain}/resource/{dataset_id}.json"))
    }

    /// Sends compiled `SoQL` and returns the response records.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the request fails, the status is not 2xx,
    /// or the body is not a JSON array.
    pub async fn execute(&self, soql: &CompiledSoql) -> Result<Vec<Value>, SourceError> {
        let url = self.resource_url()?;
        log::debug!("{}: {url} {:?}", self.id, soql.params());

        let mut request = self.client.get(&url).query(&soql.params());
        if let Some(token) = &self.app_token {
            request = request.header("X-App-Token", token);
        }

        let response = http::send(http::no_cache(request))
            .await?
            .error_for_status("Socrata")?;

        serde_json::from_str(&response.body).map_err(|e| SourceError::MalformedResponse {
            status: response.status,
            message: format!("Socrata response is not a JSON array: {e}"),
            body: non_empty_preview(&response.body),
        })
    }

    async fn fetch_rows(&self, soql: &CompiledSoql) -> Result<(Vec<RawRow>, bool), SourceError> {
        let records = self.execute(soql).await?;
        let truncated = is_truncated(records.len(), soql.limit);
        let rows = records
            .into_iter()
            .map(|record| normalize::decode_row(record, &self.fields))
            .collect();
        Ok((rows, truncated))
    }
}

/// Located, dated samples from decoded rows. Rows without a usable
/// coordinate are skipped.
#[must_use]
pub fn bin_samples(rows: &[RawRow], fields: &FieldMapping) -> Vec<BinSample> {
    let date_chain = fields.date_chain();
    rows.iter()
        .filter_map(|row| {
            Some(BinSample {
                point: normalize::row_point(row)?,
                date: date_chain
                    .first_in(&row.attributes)
                    .and_then(Value::as_str)
                    .map(String::from),
            })
        })
        .collect()
}

/// Aggregates a point fetch into bins.
///
/// The result is truncated if the point fetch was, or if the bins fill
/// `limit`.
///
/// # Errors
///
/// Returns [`SourceError::Usage`] if `bin` is not a positive finite number.
pub fn local_bins(
    rows: &[RawRow],
    fields: &FieldMapping,
    bin: f64,
    bbox: &Bbox,
    limit: u32,
    points_truncated: bool,
) -> Result<QueryResult<BinRow>, SourceError> {
    let bins = aggregate_bins(&bin_samples(rows, fields), bin, bbox, limit)?;
    let truncated = points_truncated || is_truncated(bins.len(), limit);
    Ok(QueryResult {
        rows: bins,
        truncated,
    })
}

#[async_trait::async_trait]
impl CrashSource for SocrataClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn fields(&self) -> &FieldMapping {
        &self.fields
    }

    async fn fetch_points(&self, filter: &Filter) -> Result<QueryResult<RawRow>, SourceError> {
        let soql = build_points_soql(
            &self.fields,
            filter,
            self.has_location,
            filter.effective_limit(),
        )?;
        let (rows, truncated) = self.fetch_rows(&soql).await?;
        Ok(QueryResult { rows, truncated })
    }

    async fn fetch_bins(
        &self,
        filter: &Filter,
        bin: f64,
    ) -> Result<QueryResult<BinRow>, SourceError> {
        let Some(bbox) = &filter.bbox else {
            return Err(SourceError::Usage {
                message: "bbox is required for binning".to_string(),
            });
        };
        if !bin.is_finite() || bin <= 0.0 {
            return Err(SourceError::Usage {
                message: format!("bin size must be a positive number, got {bin}"),
            });
        }

        let soql = build_bin_soql(&self.fields, filter, self.has_location, MAX_LIMIT)?;
        let (rows, points_truncated) = self.fetch_rows(&soql).await?;
        local_bins(
            &rows,
            &self.fields,
            bin,
            bbox,
            filter.effective_limit(),
            points_truncated,
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn client(domain: &str, dataset_id: &str) -> SocrataClient {
        SocrataClient::new(
            "test",
            reqwest::Client::new(),
            domain,
            dataset_id,
            None,
            true,
            FieldMapping::default(),
        )
    }

    #[test]
    fn builds_resource_url() {
        assert_eq!(
            client("data.chhs.ca.gov", "abcd-1234").resource_url().unwrap(),
            "https://data.chhs.ca.gov/resource/abcd-1234.json"
        );
    }

    #[test]
    fn strips_scheme_and_trailing_slash() {
        assert_eq!(
            client("https://data.chhs.ca.gov/", "abcd-1234")
                .resource_url()
                .unwrap(),
            "https://data.chhs.ca.gov/resource/abcd-1234.json"
        );
    }

    #[test]
    fn missing_dataset_is_configuration_error() {
        let err = client("data.chhs.ca.gov", "").resource_url().unwrap_err();
        assert!(matches!(err, SourceError::Configuration { .. }));
    }

    #[tokio::test]
    async fn binning_requires_bbox() {
        let err = client("data.chhs.ca.gov", "abcd-1234")
            .fetch_bins(&Filter::default(), 0.1)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Usage { .. }));
    }

    fn decoded(records: Vec<Value>, fields: &FieldMapping) -> Vec<RawRow> {
        records
            .into_iter()
            .map(|record| normalize::decode_row(record, fields))
            .collect()
    }

    #[test]
    fn samples_use_date_fallbacks() {
        let fields = FieldMapping::default();
        let rows = decoded(
            vec![
                json!({"location": {"latitude": "36.71", "longitude": "-119.41"},
                       "collision_date": "2024-03-02T08:00:00"}),
                json!({"latitude": "36.72", "longitude": "-119.42", "crash_date": "2024-01-09"}),
                json!({"latitude": null, "longitude": "-119.42", "crash_date": "2024-01-10"}),
            ],
            &fields,
        );
        let samples = bin_samples(&rows, &fields);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].date.as_deref(), Some("2024-03-02T08:00:00"));
        assert_eq!(samples[1].date.as_deref(), Some("2024-01-09"));
    }

    #[test]
    fn local_bins_span_fallback_dates() {
        let fields = FieldMapping::default();
        let rows = decoded(
            vec![
                json!({"latitude": "36.65", "longitude": "-119.41", "crash_date": "2024-01-09"}),
                json!({"latitude": "36.71", "longitude": "-119.41",
                       "collision_date": "2024-03-02"}),
            ],
            &fields,
        );
        let bbox = Bbox::new(-119.5, 36.6, -119.3, 36.8);
        let result = local_bins(&rows, &fields, 0.1, &bbox, 10, false).unwrap();

        assert!(!result.truncated);
        assert_eq!(result.rows.len(), 1);
        let cell = &result.rows[0];
        assert_eq!(cell.n, 2);
        assert!((cell.lat_bin - 36.7).abs() < 1e-9);
        assert_eq!(cell.first_date.as_deref(), Some("2024-01-09"));
        assert_eq!(cell.last_date.as_deref(), Some("2024-03-02"));
    }

    #[test]
    fn local_bins_report_truncation() {
        let fields = FieldMapping::default();
        let rows = decoded(
            vec![
                json!({"latitude": "36.61", "longitude": "-119.41"}),
                json!({"latitude": "36.79", "longitude": "-119.41"}),
            ],
            &fields,
        );
        let bbox = Bbox::new(-119.5, 36.6, -119.3, 36.8);

        // capped point fetch
        assert!(local_bins(&rows, &fields, 0.1, &bbox, 10, true).unwrap().truncated);
        // bins fill the limit
        let capped = local_bins(&rows, &fields, 0.1, &bbox, 2, false).unwrap();
        assert!(capped.truncated);
        assert_eq!(capped.rows.len(), 2);
        // neither
        assert!(!local_bins(&rows, &fields, 0.1, &bbox, 3, false).unwrap().truncated);
    }
}
