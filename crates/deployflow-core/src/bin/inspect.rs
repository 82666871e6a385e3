// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inspect the persisted context of action instances.
//!
//! Usage:
//!
//! ```text
//! deployflow-inspect [--instance <id>]
//! ```
//!
//! Without `--instance` the ids of all stored instances are listed. With it,
//! every variable of the instance is printed as one JSON object per line.

use std::process::ExitCode;

use deployflow_core::config::{ConfigError, EngineConfig};
use deployflow_core::persistence::{SqliteVariableStore, VariableStore};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!(
        r#"Usage: deployflow-inspect [OPTIONS]

Inspect the persisted context of deployflow action instances.

OPTIONS:
    --instance <id>      Print the variables of one instance
    --help               Show this help message

ENVIRONMENT:
    DEPLOYFLOW_DATABASE_URL    SQLite URL (sqlite:...) or file path (required)
"#
    );
}

enum Command {
    List,
    Show(String),
    Help,
}

fn parse_args() -> Result<Command, String> {
    let mut args = std::env::args().skip(1);
    let mut command = Command::List;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--instance" => {
                let id = args
                    .next()
                    .ok_or_else(|| "--instance requires a value".to_string())?;
                command = Command::Show(id);
            }
            "--help" | "-h" => return Ok(Command::Help),
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(command)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("deployflow_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let command = match parse_args() {
        Ok(Command::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}");
            print_usage();
            return ExitCode::from(2);
        }
    };

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let Some(database_url) = config.database_url else {
        error!("{}", ConfigError::Missing("DEPLOYFLOW_DATABASE_URL"));
        return ExitCode::FAILURE;
    };

    let store = if database_url.starts_with("sqlite:") {
        SqliteVariableStore::connect(&database_url).await
    } else {
        SqliteVariableStore::from_path(&database_url).await
    };
    let store = match store {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open variable store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match command {
        Command::List => store.list_instances().await.map(|ids| {
            for id in ids {
                println!("{id}");
            }
        }),
        Command::Show(instance_id) => store.load(&instance_id).await.map(|values| {
            let mut names: Vec<_> = values.keys().cloned().collect();
            names.sort();
            for name in names {
                let stored = &values[&name];
                println!(
                    "{}",
                    serde_json::json!({
                        "name": name,
                        "type": stored.type_tag,
                        "value": stored.value,
                    })
                );
            }
        }),
        Command::Help => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to read variable store: {}", e);
            ExitCode::FAILURE
        }
    }
}
