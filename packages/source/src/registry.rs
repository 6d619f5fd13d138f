//! Source registry: loads dataset definitions from embedded TOML configs.
//!
//! Each `.toml` file in `packages/source/sources/` is baked into the binary
//! at compile time via [`include_str!`]. A definition file on disk may be
//! used instead, and environment variables override individual settings
//! of whichever definition is selected.

use std::path::Path;

use crash_map_source_models::{BackendConfig, SourceDefinition};

use crate::ckan::CkanClient;
use crate::socrata::SocrataClient;
use crate::{CrashSource, SourceError, http};

/// TOML configs embedded at compile time.
const SOURCE_TOMLS: &[(&str, &str)] = &[
    ("ca_ccrs", include_str!("../sources/ca_ccrs.toml")),
    ("ca_chhs", include_str!("../sources/ca_chhs.toml")),
];

/// Definition used when none is selected.
pub const DEFAULT_SOURCE: &str = "ca_ccrs";

/// Environment variable naming a definition file on disk.
pub const SOURCE_FILE_ENV: &str = "CRASH_MAP_SOURCE_FILE";

/// Environment variable selecting an embedded definition by ID.
pub const SOURCE_ID_ENV: &str = "CRASH_MAP_SOURCE";

/// Parses a TOML string into a [`SourceDefinition`].
///
/// # Errors
///
/// Returns [`SourceError::Definition`] if the TOML is malformed or missing
/// required fields.
pub fn parse_source_toml(toml_str: &str) -> Result<SourceDefinition, SourceError> {
    Ok(toml::de::from_str(toml_str)?)
}

/// Returns all embedded source definitions.
///
/// # Panics
///
/// Panics if any embedded TOML config is malformed.
#[must_use]
pub fn all_sources() -> Vec<SourceDefinition> {
    SOURCE_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_source_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Looks up an embedded definition by ID.
#[must_use]
pub fn find_source(id: &str) -> Option<SourceDefinition> {
    all_sources().into_iter().find(|s| s.id == id)
}

/// Resolves the active definition.
///
/// A definition file takes precedence over an embedded ID; with neither,
/// [`DEFAULT_SOURCE`] is used. Overrides from `lookup` are applied last.
///
/// # Errors
///
/// Returns [`SourceError`] if the file cannot be read or parsed, or the ID
/// names no embedded definition.
pub fn load<F>(file: Option<&Path>, id: Option<&str>, lookup: F) -> Result<SourceDefinition, SourceError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut definition = if let Some(path) = file {
        log::info!("Loading source definition from {}", path.display());
        parse_source_toml(&std::fs::read_to_string(path)?)?
    } else {
        let id = id.unwrap_or(DEFAULT_SOURCE);
        find_source(id).ok_or_else(|| SourceError::Configuration {
            message: format!("unknown source '{id}'"),
        })?
    };

    definition.apply_overrides(lookup);
    Ok(definition)
}

/// Resolves the active definition from the process environment.
///
/// # Errors
///
/// See [`load`].
pub fn load_from_env() -> Result<SourceDefinition, SourceError> {
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
    let file = env(SOURCE_FILE_ENV);
    let id = env(SOURCE_ID_ENV);
    load(file.as_deref().map(Path::new), id.as_deref(), env)
}

/// Describes what is still missing before the definition can be queried,
/// if anything.
#[must_use]
pub fn missing_configuration(definition: &SourceDefinition) -> Option<&'static str> {
    match &definition.backend {
        BackendConfig::Ckan { resource_id, .. } if resource_id.trim().is_empty() => {
            Some("CKAN_RESOURCE_ID")
        }
        BackendConfig::Socrata { dataset_id, .. } if dataset_id.trim().is_empty() => {
            Some("SOCRATA_DATASET_ID")
        }
        _ => None,
    }
}

/// Builds the client for a definition.
///
/// Missing resource or dataset IDs are not checked here; queries report
/// them as configuration errors before any request is made.
///
/// # Errors
///
/// Returns [`SourceError::Http`] if the HTTP client cannot be built.
pub fn connect(definition: &SourceDefinition) -> Result<Box<dyn CrashSource>, SourceError> {
    let client = http::build_client(definition.timeout_secs)?;
    let fields = definition.fields.clone();

    log::info!(
        "Using source '{}' ({}, backend={})",
        definition.id,
        definition.name,
        definition.backend
    );

    Ok(match &definition.backend {
        BackendConfig::Ckan {
            api_url,
            resource_id,
        } => Box::new(CkanClient::new(
            definition.id.clone(),
            client,
            api_url.clone(),
            resource_id.clone(),
            fields,
        )),
        BackendConfig::Socrata {
            domain,
            dataset_id,
            app_token,
            has_location,
        } => Box::new(SocrataClient::new(
            definition.id.clone(),
            client,
            domain.clone(),
            dataset_id.clone(),
            app_token.clone(),
            *has_location,
            fields,
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_all_sources() {
        let sources = all_sources();
        assert_eq!(sources.len(), SOURCE_TOMLS.len());
    }

    #[test]
    fn source_ids_match_file_names() {
        for ((name, _), source) in SOURCE_TOMLS.iter().zip(all_sources()) {
            assert_eq!(*name, source.id);
            assert!(!source.name.is_empty(), "{name}: name is empty");
        }
    }

    #[test]
    fn default_source_is_ckan() {
        let source = find_source(DEFAULT_SOURCE).unwrap();
        match source.backend {
            BackendConfig::Ckan { api_url, .. } => {
                assert_eq!(api_url, "https://data.ca.gov/api/3/action/datastore_search_sql");
            }
            other @ BackendConfig::Socrata { .. } => panic!("unexpected backend {other}"),
        }
        assert_eq!(source.fields.killed, "NumberKilled");
    }

    #[test]
    fn unknown_source_is_configuration_error() {
        let err = load(None, Some("nowhere"), |_| None).unwrap_err();
        assert!(matches!(err, SourceError::Configuration { .. }));
    }

    #[test]
    fn load_applies_overrides() {
        let def = load(None, None, |key| {
            (key == "CKAN_RESOURCE_ID").then(|| "res-1".to_string())
        })
        .unwrap();
        assert!(missing_configuration(&def).is_none());
    }

    #[test]
    fn reports_missing_resource_id() {
        let def = find_source(DEFAULT_SOURCE).unwrap();
        assert_eq!(missing_configuration(&def), Some("CKAN_RESOURCE_ID"));
    }

    #[test]
    fn malformed_definition_is_rejected() {
        let err = parse_source_toml("id = \"x\"").unwrap_err();
        assert!(matches!(err, SourceError::Definition(_)));
    }

    #[test]
    fn parses_socrata_definition() {
        let def = parse_source_toml(
            r#"
id = "local"
name = "Local"

[backend]
type = "socrata"
domain = "data.example.org"
dataset_id = "abcd-1234"
has_location = false

[fields]
latitude = "lat"
"#,
        )
        .unwrap();
        assert_eq!(def.fields.latitude, "lat");
        assert_eq!(def.fields.longitude, "longitude");
        assert!(matches!(
            def.backend,
            BackendConfig::Socrata {
                has_location: false,
                ..
            }
        ));
    }
}
