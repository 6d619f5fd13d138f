#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the crash map toolchain.
//!
//! ```text
//! crash_map serve [--bind-addr 127.0.0.1] [--port 8080]
//! crash_map query --bbox -119.5,36.6,-119.3,36.8 [--severity Fatal] [--zoom 7]
//! crash_map sources
//! ```
//!
//! Every subcommand resolves the active dataset the same way the server
//! does: `--source-file`, then `--source`, then `CRASH_MAP_SOURCE_FILE` /
//! `CRASH_MAP_SOURCE`, then the default, with environment overrides applied
//! last.

mod query;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crash_map_server::ServerConfig;
use crash_map_source::registry;
use crash_map_source_models::{BackendConfig, SourceDefinition};

use crate::query::QueryArgs;

#[derive(Parser)]
#[command(name = "crash_map", about = "Query and serve collision density data")]
struct Cli {
    /// Embedded dataset definition to use (see `sources`)
    #[arg(long, global = true)]
    source: Option<String>,
    /// Dataset definition TOML file (overrides `--source`)
    #[arg(long, global = true)]
    source_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Interface to bind (defaults to `BIND_ADDR` or 127.0.0.1)
        #[arg(long)]
        bind_addr: Option<String>,
        /// Port to listen on (defaults to `PORT` or 8080)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one query and print the `GeoJSON` result
    Query(QueryArgs),
    /// List embedded dataset definitions and show the active one
    Sources,
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn resolve_definition(cli: &Cli) -> Result<SourceDefinition, crash_map_source::SourceError> {
    let file = cli
        .source_file
        .clone()
        .or_else(|| env_value(registry::SOURCE_FILE_ENV).map(PathBuf::from));
    let id = cli
        .source
        .clone()
        .or_else(|| env_value(registry::SOURCE_ID_ENV));
    registry::load(file.as_deref(), id.as_deref(), env_value)
}

fn describe(definition: &SourceDefinition) -> String {
    match &definition.backend {
        BackendConfig::Ckan {
            api_url,
            resource_id,
        } => format!("ckan {api_url} resource={resource_id:?}"),
        BackendConfig::Socrata {
            domain,
            dataset_id,
            has_location,
            ..
        } => format!("socrata {domain} dataset={dataset_id:?} location={has_location}"),
    }
}

fn print_sources(active: &SourceDefinition) {
    println!("{:<12} {:<10} NAME", "ID", "BACKEND");
    println!("{}", "-".repeat(60));
    for source in registry::all_sources() {
        let marker = if source.id == active.id { "*" } else { " " };
        println!(
            "{marker}{:<11} {:<10} {}",
            source.id,
            source.backend.as_ref(),
            source.name
        );
    }

    println!();
    println!("Active: {} ({})", active.id, describe(active));
    if let Some(var) = registry::missing_configuration(active) {
        println!("Not queryable until {var} is set.");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();
    let definition = resolve_definition(&cli)?;

    match cli.command {
        Commands::Serve { bind_addr, port } => {
            let defaults = ServerConfig::from_env();
            let config = ServerConfig {
                bind_addr: bind_addr.unwrap_or(defaults.bind_addr),
                port: port.unwrap_or(defaults.port),
            };
            // actix-web brings its own runtime, so it runs on a blocking
            // thread rather than nested inside this one.
            tokio::task::spawn_blocking(move || {
                actix_rt::System::new().block_on(crash_map_server::serve(&definition, config))
            })
            .await??;
        }
        Commands::Query(args) => query::run(&definition, &args).await?,
        Commands::Sources => print_sources(&definition),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_source_after_subcommand() {
        let cli = Cli::try_parse_from(["crash_map", "sources", "--source", "ca_chhs"]).unwrap();
        assert_eq!(cli.source.as_deref(), Some("ca_chhs"));
        assert!(matches!(cli.command, Commands::Sources));
    }

    #[test]
    fn parses_serve_options() {
        let cli = Cli::try_parse_from(["crash_map", "serve", "--port", "9000"]).unwrap();
        match cli.command {
            Commands::Serve { bind_addr, port } => {
                assert_eq!(bind_addr, None);
                assert_eq!(port, Some(9000));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn requires_a_subcommand() {
        assert!(Cli::try_parse_from(["crash_map"]).is_err());
    }

    #[test]
    fn describes_backends() {
        let definition = registry::find_source("ca_ccrs").unwrap();
        assert!(describe(&definition).starts_with("ckan https://data.ca.gov/"));
    }
}
