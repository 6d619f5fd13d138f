#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Dataset definition types for the collision data service.
//!
//! A [`SourceDefinition`] says which remote backend holds the collision
//! table and what its columns are called. It is loaded once at process
//! start (embedded TOML plus environment overrides) and then passed by
//! reference into every component that needs it.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Default per-request timeout for the remote service, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A complete dataset definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Unique identifier (e.g., `"ca_ccrs"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Where and how to query the data.
    pub backend: BackendConfig,
    /// Column names used by this dataset.
    #[serde(default)]
    pub fields: FieldMapping,
    /// Per-request timeout for the remote service.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Remote service hosting the collision table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendConfig {
    /// CKAN `datastore_search_sql` endpoint (PostgreSQL dialect).
    Ckan {
        /// SQL endpoint URL.
        api_url: String,
        /// Datastore resource ID used as the table name. Must be supplied
        /// before any query runs.
        #[serde(default)]
        resource_id: String,
    },
    /// Socrata SODA endpoint (`SoQL`).
    Socrata {
        /// Portal domain (e.g., `"data.chhs.ca.gov"`).
        domain: String,
        /// Four-by-four dataset identifier.
        #[serde(default)]
        dataset_id: String,
        /// Optional application token sent as `X-App-Token`.
        #[serde(default)]
        app_token: Option<String>,
        /// Whether the dataset exposes a point `location` column usable with
        /// `within_box`.
        #[serde(default = "default_true")]
        has_location: bool,
    },
}

const fn default_true() -> bool {
    true
}

/// Maps logical collision properties to dataset column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    /// Latitude column.
    pub latitude: String,
    /// Longitude column.
    pub longitude: String,
    /// Collision timestamp column.
    pub date: String,
    /// County name column.
    pub county: String,
    /// Severity column.
    pub severity: String,
    /// Fatality count column.
    pub killed: String,
    /// Nested point column (`{"coordinates": [lon, lat]}` or
    /// `{"latitude": .., "longitude": ..}`).
    pub location: String,
    /// Alternate names seen across dataset variants.
    pub fallbacks: FieldFallbacks,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            latitude: "latitude".to_string(),
            longitude: "longitude".to_string(),
            date: "collision_date".to_string(),
            county: "county".to_string(),
            severity: "severity".to_string(),
            killed: "NumberKilled".to_string(),
            location: "location".to_string(),
            fallbacks: FieldFallbacks::default(),
        }
    }
}

/// Alternate column names tried after the canonical alias and the
/// configured column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldFallbacks {
    /// Alternates for the collision date.
    pub date: Vec<String>,
    /// Alternates for the county name.
    pub county: Vec<String>,
    /// Alternates for the severity.
    pub severity: Vec<String>,
}

impl Default for FieldFallbacks {
    fn default() -> Self {
        Self {
            date: vec!["crash_date".to_string()],
            county: vec!["county_name".to_string()],
            severity: Vec::new(),
        }
    }
}

/// Canonical aliases the row-fetch query projects columns onto.
pub mod alias {
    /// Latitude alias.
    pub const LATITUDE: &str = "latitude";
    /// Longitude alias.
    pub const LONGITUDE: &str = "longitude";
    /// Collision date alias.
    pub const DATE: &str = "collision_date";
    /// Severity alias.
    pub const SEVERITY: &str = "severity";
    /// County alias.
    pub const COUNTY: &str = "county";
    /// Fatality count alias.
    pub const KILLED: &str = "killed";
}

/// An ordered list of candidate field names for one logical property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChain(Vec<String>);

impl FieldChain {
    /// Builds a chain, dropping empty and repeated names while keeping the
    /// first occurrence's position.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut chain: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !name.is_empty() && !chain.contains(&name) {
                chain.push(name);
            }
        }
        Self(chain)
    }

    /// Candidate names in priority order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// The first present, non-null value.
    #[must_use]
    pub fn first_in<'a>(
        &self,
        record: &'a serde_json::Map<String, serde_json::Value>,
    ) -> Option<&'a serde_json::Value> {
        self.0
            .iter()
            .filter_map(|name| record.get(name))
            .find(|value| !value.is_null())
    }
}

impl FieldMapping {
    /// Severity lookup order.
    #[must_use]
    pub fn severity_chain(&self) -> FieldChain {
        FieldChain::new(
            [alias::SEVERITY, self.severity.as_str()]
                .into_iter()
                .chain(self.fallbacks.severity.iter().map(String::as_str)),
        )
    }

    /// Collision date lookup order.
    #[must_use]
    pub fn date_chain(&self) -> FieldChain {
        FieldChain::new(
            [alias::DATE, self.date.as_str()]
                .into_iter()
                .chain(self.fallbacks.date.iter().map(String::as_str)),
        )
    }

    /// County lookup order.
    #[must_use]
    pub fn county_chain(&self) -> FieldChain {
        FieldChain::new(
            [alias::COUNTY, self.county.as_str()]
                .into_iter()
                .chain(self.fallbacks.county.iter().map(String::as_str)),
        )
    }

    /// Flat latitude lookup order.
    #[must_use]
    pub fn latitude_chain(&self) -> FieldChain {
        FieldChain::new([alias::LATITUDE, self.latitude.as_str()])
    }

    /// Flat longitude lookup order.
    #[must_use]
    pub fn longitude_chain(&self) -> FieldChain {
        FieldChain::new([alias::LONGITUDE, self.longitude.as_str()])
    }
}

impl SourceDefinition {
    /// Applies overrides from a key lookup (normally the process
    /// environment). Empty values are ignored.
    ///
    /// Recognized keys: `CKAN_SQL_API_BASE`, `CKAN_RESOURCE_ID`,
    /// `SOCRATA_DOMAIN`, `SOCRATA_DATASET_ID`, `SOCRATA_APP_TOKEN`, and the
    /// column overrides `CKAN_LAT_FIELD`, `CKAN_LON_FIELD`,
    /// `CKAN_DATE_FIELD`, `CKAN_COUNTY_FIELD`, `CKAN_SEVERITY_FIELD`,
    /// `CKAN_KILLED_FIELD`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        match &mut self.backend {
            BackendConfig::Ckan {
                api_url,
                resource_id,
            } => {
                if let Some(v) = get("CKAN_SQL_API_BASE") {
                    *api_url = v;
                }
                if let Some(v) = get("CKAN_RESOURCE_ID") {
                    *resource_id = v;
                }
            }
            BackendConfig::Socrata {
                domain,
                dataset_id,
                app_token,
                ..
            } => {
                if let Some(v) = get("SOCRATA_DOMAIN") {
                    *domain = v;
                }
                if let Some(v) = get("SOCRATA_DATASET_ID") {
                    *dataset_id = v;
                }
                if let Some(v) = get("SOCRATA_APP_TOKEN") {
                    *app_token = Some(v);
                }
            }
        }

        let fields = &mut self.fields;
        for (key, slot) in [
            ("CKAN_LAT_FIELD", &mut fields.latitude),
            ("CKAN_LON_FIELD", &mut fields.longitude),
            ("CKAN_DATE_FIELD", &mut fields.date),
            ("CKAN_COUNTY_FIELD", &mut fields.county),
            ("CKAN_SEVERITY_FIELD", &mut fields.severity),
            ("CKAN_KILLED_FIELD", &mut fields.killed),
        ] {
            if let Some(v) = get(key) {
                *slot = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ckan_definition() -> SourceDefinition {
        SourceDefinition {
            id: "test".to_string(),
            name: "Test".to_string(),
            backend: BackendConfig::Ckan {
                api_url: "https://example.org/sql".to_string(),
                resource_id: String::new(),
            },
            fields: FieldMapping::default(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    #[test]
    fn chain_prefers_alias_then_configured_then_fallbacks() {
        let fields = FieldMapping {
            date: "crash_dt".to_string(),
            ..FieldMapping::default()
        };
        assert_eq!(
            fields.date_chain().names(),
            &["collision_date", "crash_dt", "crash_date"]
        );
    }

    #[test]
    fn chain_dedups_configured_name_equal_to_alias() {
        let fields = FieldMapping::default();
        assert_eq!(fields.county_chain().names(), &["county", "county_name"]);
    }

    #[test]
    fn chain_skips_null_values() {
        let record = serde_json::json!({"county": null, "county_name": "Fresno"});
        let record = record.as_object().unwrap();
        let chain = FieldMapping::default().county_chain();
        assert_eq!(chain.first_in(record), Some(&serde_json::json!("Fresno")));
    }

    #[test]
    fn overrides_apply_to_backend_and_fields() {
        let mut def = ckan_definition();
        def.apply_overrides(|key| match key {
            "CKAN_RESOURCE_ID" => Some("abc-123".to_string()),
            "CKAN_LAT_FIELD" => Some("Latitude".to_string()),
            "CKAN_LON_FIELD" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(
            def.backend,
            BackendConfig::Ckan {
                api_url: "https://example.org/sql".to_string(),
                resource_id: "abc-123".to_string(),
            }
        );
        assert_eq!(def.fields.latitude, "Latitude");
        assert_eq!(def.fields.longitude, "longitude");
    }

    #[test]
    fn backend_displays_as_snake_case() {
        assert_eq!(ckan_definition().backend.to_string(), "ckan");
    }
}
