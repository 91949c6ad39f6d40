// `couchctl replicate`: one-shot replication and `_replicator` documents.

use anyhow::Context;
use clap::{Args, Subcommand};
use serde_json::{json, Value};

use super::{block_on, Session};
use crate::output::{self, pretty_json};

#[derive(Debug, Args)]
pub struct ReplicateArgs {
    #[command(subcommand)]
    pub action: ReplicateAction,
}

#[derive(Debug, Subcommand)]
pub enum ReplicateAction {
    /// Replicate now and wait for the result
    Run(ReplicationSpec),
    /// Store a replication in `_replicator` so the scheduler keeps it running
    Add {
        #[command(flatten)]
        spec: ReplicationSpec,
        /// Replication document id
        #[arg(long)]
        id: Option<String>,
    },
    /// List stored replications
    List,
    /// Remove a stored replication
    Remove { id: String },
    /// Show replication jobs known to the scheduler
    Jobs,
}

#[derive(Debug, Args)]
pub struct ReplicationSpec {
    /// Source database name or URL
    pub source: String,
    /// Target database name or URL
    pub target: String,
    /// Keep replicating new changes
    #[arg(long)]
    pub continuous: bool,
    /// Create the target database if it does not exist
    #[arg(long)]
    pub create_target: bool,
    /// Only replicate these document ids
    #[arg(long = "doc-id")]
    pub doc_ids: Vec<String>,
}

impl ReplicationSpec {
    fn to_json(&self) -> Value {
        let mut body = json!({ "source": self.source, "target": self.target });
        if self.continuous {
            body["continuous"] = json!(true);
        }
        if self.create_target {
            body["create_target"] = json!(true);
        }
        if !self.doc_ids.is_empty() {
            body["doc_ids"] = json!(self.doc_ids);
        }
        body
    }
}

pub fn run(args: ReplicateArgs, session: &Session) -> anyhow::Result<()> {
    let client = session.client()?;
    match args.action {
        ReplicateAction::Run(spec) => {
            let result = block_on(client.replicate(&spec.to_json()))?
                .with_context(|| format!("replication {} -> {} failed", spec.source, spec.target))?;
            output::print_output(session.format, &result, format_run)?;
        }
        ReplicateAction::Add { spec, id } => {
            let result = block_on(client.create_replication(id.as_deref(), &spec.to_json()))?
                .context("failed to store replication document")?;
            output::print_output(session.format, &result, |result| {
                format!("Added replication {}", result["id"].as_str().unwrap_or("?"))
            })?;
        }
        ReplicateAction::List => {
            let docs = block_on(client.list_replications())?.context("failed to list replications")?;
            output::print_output(session.format, &docs, |docs| format_list(docs))?;
        }
        ReplicateAction::Remove { id } => {
            let result = block_on(client.delete_replication(&id))?
                .with_context(|| format!("failed to remove replication `{id}`"))?;
            output::print_output(session.format, &result, |_| format!("Removed replication {id}"))?;
        }
        ReplicateAction::Jobs => {
            let jobs = block_on(client.scheduler_jobs())?.context("failed to read scheduler jobs")?;
            output::print_output(session.format, &jobs, format_jobs)?;
        }
    }
    Ok(())
}

/// Endpoint description for display; credentials embedded in URLs are dropped.
fn endpoint_label(endpoint: &Value) -> String {
    let raw = match endpoint {
        Value::String(raw) => raw.as_str(),
        Value::Object(fields) => fields.get("url").and_then(Value::as_str).unwrap_or("?"),
        _ => "?",
    };
    match url::Url::parse(raw) {
        Ok(mut url) if url.has_host() => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => raw.to_string(),
    }
}

fn format_run(result: &Value) -> String {
    if result["ok"].as_bool() != Some(true) {
        return pretty_json(result);
    }
    let Some(history) = result["history"].as_array().and_then(|history| history.first()) else {
        return "Replication started.".into();
    };
    format!(
        "Replication complete: {} docs written, {} failures",
        history["docs_written"].as_u64().unwrap_or(0),
        history["doc_write_failures"].as_u64().unwrap_or(0)
    )
}

fn format_list(docs: &[Value]) -> String {
    if docs.is_empty() {
        return "No stored replications.".into();
    }
    docs.iter()
        .map(|doc| {
            let state = doc["_replication_state"].as_str().unwrap_or("pending");
            let mode = if doc["continuous"].as_bool() == Some(true) { " continuous" } else { "" };
            format!(
                "{}  {} -> {}  [{state}{mode}]",
                doc["_id"].as_str().unwrap_or("?"),
                endpoint_label(&doc["source"]),
                endpoint_label(&doc["target"])
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_jobs(jobs: &Value) -> String {
    let entries = jobs["jobs"].as_array().map(Vec::as_slice).unwrap_or_default();
    if entries.is_empty() {
        return "No active replication jobs.".into();
    }
    entries
        .iter()
        .map(|job| {
            format!(
                "{}  {} -> {}  (node {})",
                job["doc_id"].as_str().or_else(|| job["id"].as_str()).unwrap_or("?"),
                endpoint_label(&job["source"]),
                endpoint_label(&job["target"]),
                job["node"].as_str().unwrap_or("?")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
