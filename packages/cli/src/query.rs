//! The `query` subcommand: one validated query, printed as `GeoJSON`.

use clap::Args;
use crash_map_crash_models::RawFilterParams;
use crash_map_filter::validate_filter;
use crash_map_server_models::feature_collection;
use crash_map_source::{query_features, registry};
use crash_map_source_models::SourceDefinition;

/// Filter options, accepted as text and validated exactly like the HTTP
/// query string.
#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Viewport as `minLon,minLat,maxLon,maxLat`
    #[arg(long, allow_hyphen_values = true)]
    bbox: Option<String>,
    /// First day, `YYYY-MM-DD`
    #[arg(long)]
    start: Option<String>,
    /// Last day, `YYYY-MM-DD`
    #[arg(long)]
    end: Option<String>,
    /// Severity to include (repeatable)
    #[arg(long)]
    severity: Vec<String>,
    /// County to include (repeatable)
    #[arg(long)]
    county: Vec<String>,
    /// Maximum rows or bins
    #[arg(long)]
    limit: Option<String>,
    /// `points` or `bin`
    #[arg(long)]
    mode: Option<String>,
    /// Bin size in degrees
    #[arg(long)]
    bin: Option<String>,
    /// Map zoom level used to pick mode, bin and limit
    #[arg(long)]
    zoom: Option<String>,
    /// Pretty-print the output
    #[arg(long)]
    pretty: bool,
}

impl QueryArgs {
    fn raw_filter(&self) -> RawFilterParams {
        RawFilterParams {
            bbox: self.bbox.clone(),
            start: self.start.clone(),
            end: self.end.clone(),
            severity: self.severity.clone(),
            county: self.county.clone(),
            limit: self.limit.clone(),
            mode: self.mode.clone(),
            bin: self.bin.clone(),
            zoom: self.zoom.clone(),
        }
    }
}

/// Runs the query and writes the `FeatureCollection` to stdout.
///
/// # Errors
///
/// Returns an error if the source cannot be reached or answers with an
/// error. Invalid filters exit the process with status 2.
pub async fn run(
    definition: &SourceDefinition,
    args: &QueryArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match validate_filter(&args.raw_filter()) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Invalid query:");
            for issue in &e.issues {
                eprintln!("  {}: {}", issue.field, issue.message);
            }
            std::process::exit(2);
        }
    };

    let source = registry::connect(definition)?;
    let result = query_features(source.as_ref(), &filter).await?;

    eprintln!(
        "{} feature(s), truncated={}",
        result.features.len(),
        result.truncated
    );

    let collection = feature_collection(result.features);
    let json = if args.pretty {
        serde_json::to_string_pretty(&collection)?
    } else {
        serde_json::to_string(&collection)?
    };
    println!("{json}");

    Ok(())
}
