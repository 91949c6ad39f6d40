// `couchctl db`: list, create, delete and inspect databases.

use anyhow::Context;
use clap::{Args, Subcommand};
use serde_json::Value;

use super::{block_on, Session};
use crate::output::{self, pretty_json};

#[derive(Debug, Args)]
pub struct DbArgs {
    #[command(subcommand)]
    pub action: DbAction,
}

#[derive(Debug, Subcommand)]
pub enum DbAction {
    /// List all databases
    List,
    /// Create a database
    Create {
        name: String,
        /// Create a partitioned database
        #[arg(long)]
        partitioned: bool,
    },
    /// Delete a database and all of its documents
    Delete { name: String },
    /// Show document counts and sizes
    Info { name: String },
}

pub fn run(args: DbArgs, session: &Session) -> anyhow::Result<()> {
    let client = session.client()?;
    match args.action {
        DbAction::List => {
            let dbs = block_on(client.all_dbs())?.context("failed to list databases")?;
            output::print_output(session.format, &dbs, |dbs| format_list(dbs))?;
        }
        DbAction::Create { name, partitioned } => {
            let result = block_on(client.create_db(&name, partitioned))?
                .with_context(|| format!("failed to create database `{name}`"))?;
            output::print_output(session.format, &result, |_| format!("Created database {name}"))?;
        }
        DbAction::Delete { name } => {
            let result = block_on(client.delete_db(&name))?
                .with_context(|| format!("failed to delete database `{name}`"))?;
            output::print_output(session.format, &result, |_| format!("Deleted database {name}"))?;
        }
        DbAction::Info { name } => {
            let info = block_on(client.db_info(&name))?
                .with_context(|| format!("failed to read database `{name}`"))?;
            output::print_output(session.format, &info, format_info)?;
        }
    }
    Ok(())
}

fn format_list(dbs: &[String]) -> String {
    if dbs.is_empty() {
        return "No databases.".into();
    }
    dbs.join("\n")
}

fn format_info(info: &Value) -> String {
    let name = info["db_name"].as_str().unwrap_or("?");
    let mut lines = vec![name.to_string()];
    lines.push(format!("  documents: {}", info["doc_count"].as_u64().unwrap_or(0)));
    lines.push(format!("  deleted:   {}", info["doc_del_count"].as_u64().unwrap_or(0)));
    if let Some(active) = info["sizes"]["active"].as_u64() {
        lines.push(format!("  active size: {active} bytes"));
    }
    if info["props"]["partitioned"].as_bool() == Some(true) {
        lines.push("  partitioned".into());
    }
    if lines.len() == 1 {
        return pretty_json(info);
    }
    lines.join("\n")
}
