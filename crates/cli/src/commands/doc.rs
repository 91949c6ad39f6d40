// `couchctl doc`: document CRUD, listing, bulk writes and purge.

use anyhow::{bail, Context};
use clap::{Args, Subcommand};
use serde_json::{json, Value};

use super::{block_on, json_param, read_json_arg, Session};
use crate::client::Params;
use crate::output::{self, pretty_json};

#[derive(Debug, Args)]
pub struct DocArgs {
    #[command(subcommand)]
    pub action: DocAction,
}

#[derive(Debug, Subcommand)]
pub enum DocAction {
    /// Fetch a document
    Get {
        db: String,
        id: String,
        /// Specific revision
        #[arg(long)]
        rev: Option<String>,
        /// Include conflicting revisions
        #[arg(long)]
        conflicts: bool,
    },
    /// Create or update a document
    Put {
        db: String,
        /// Document id; omitted to let the server assign one
        id: Option<String>,
        /// Document body: inline JSON, @file, or - for stdin
        #[arg(long, short)]
        data: String,
        /// Revision being updated (overrides `_rev` in the body)
        #[arg(long)]
        rev: Option<String>,
    },
    /// Delete a document
    Delete {
        db: String,
        id: String,
        /// Revision to delete; the current one is looked up when omitted
        #[arg(long)]
        rev: Option<String>,
    },
    /// List documents
    List(ListArgs),
    /// Write many documents at once
    Bulk {
        db: String,
        /// JSON array of documents or `{"docs": [...]}`: inline, @file, or -
        #[arg(long, short)]
        data: String,
    },
    /// Permanently remove document revisions
    Purge {
        db: String,
        id: String,
        /// Revisions to purge
        #[arg(required = true)]
        revs: Vec<String>,
    },
}

#[derive(Debug, Args)]
pub struct ListArgs {
    pub db: String,
    /// Include document bodies
    #[arg(long)]
    pub include_docs: bool,
    #[arg(long)]
    pub limit: Option<u64>,
    #[arg(long)]
    pub skip: Option<u64>,
    /// First key (JSON)
    #[arg(long)]
    pub start_key: Option<String>,
    /// Last key (JSON)
    #[arg(long)]
    pub end_key: Option<String>,
    #[arg(long)]
    pub descending: bool,
    /// Restrict to one partition of a partitioned database
    #[arg(long)]
    pub partition: Option<String>,
}

impl ListArgs {
    fn params(&self) -> anyhow::Result<Params> {
        let mut params = Params::new();
        if self.include_docs {
            params.push(("include_docs", "true".into()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(skip) = self.skip {
            params.push(("skip", skip.to_string()));
        }
        if let Some(key) = &self.start_key {
            params.push(("startkey", json_param("start-key", key)?));
        }
        if let Some(key) = &self.end_key {
            params.push(("endkey", json_param("end-key", key)?));
        }
        if self.descending {
            params.push(("descending", "true".into()));
        }
        Ok(params)
    }
}

pub fn run(args: DocArgs, session: &Session) -> anyhow::Result<()> {
    let client = session.client()?;
    match args.action {
        DocAction::Get { db, id, rev, conflicts } => {
            let mut params = Params::new();
            if let Some(rev) = rev {
                params.push(("rev", rev));
            }
            if conflicts {
                params.push(("conflicts", "true".into()));
            }
            let doc = block_on(client.get_doc(&db, &id, &params))?
                .with_context(|| format!("failed to fetch document `{id}` from `{db}`"))?;
            output::print_output(session.format, &doc, pretty_json)?;
        }
        DocAction::Put { db, id, data, rev } => {
            let doc = prepare_doc(read_json_arg(&data)?, rev)?;
            let result = block_on(async {
                match &id {
                    Some(id) => client.put_doc(&db, id, &doc).await,
                    None => client.post_doc(&db, &doc).await,
                }
            })?
            .with_context(|| format!("failed to write document to `{db}`"))?;
            output::print_output(session.format, &result, format_write)?;
        }
        DocAction::Delete { db, id, rev } => {
            let result = block_on(async {
                let rev = match rev {
                    Some(rev) => rev,
                    None => client.current_rev(&db, &id).await?,
                };
                client.delete_doc(&db, &id, &rev).await
            })?
            .with_context(|| format!("failed to delete document `{id}` from `{db}`"))?;
            output::print_output(session.format, &result, |result| format!("Deleted {}", format_write(result)))?;
        }
        DocAction::List(list) => {
            let params = list.params()?;
            let listing = block_on(client.all_docs(&list.db, list.partition.as_deref(), &params))?
                .with_context(|| format!("failed to list documents in `{}`", list.db))?;
            output::print_output(session.format, &listing, format_rows)?;
        }
        DocAction::Bulk { db, data } => {
            let docs = bulk_documents(read_json_arg(&data)?)?;
            let results = block_on(client.bulk_docs(&db, docs))?
                .with_context(|| format!("bulk write to `{db}` failed"))?;
            output::print_output(session.format, &results, format_bulk)?;
        }
        DocAction::Purge { db, id, revs } => {
            let mut body = json!({});
            body[id.as_str()] = json!(revs);
            let result = block_on(client.purge(&db, &body))?
                .with_context(|| format!("failed to purge `{id}` from `{db}`"))?;
            output::print_output(session.format, &result, pretty_json)?;
        }
    }
    Ok(())
}

/// Apply an explicit `--rev` to the document body.
fn prepare_doc(doc: Value, rev: Option<String>) -> anyhow::Result<Value> {
    let Value::Object(mut fields) = doc else {
        bail!("a document must be a JSON object");
    };
    if let Some(rev) = rev {
        fields.insert("_rev".into(), Value::String(rev));
    }
    Ok(Value::Object(fields))
}

/// Accept either a bare array or a `{"docs": [...]}` wrapper.
fn bulk_documents(input: Value) -> anyhow::Result<Vec<Value>> {
    let docs = match input {
        Value::Array(docs) => docs,
        Value::Object(mut wrapper) => match wrapper.remove("docs") {
            Some(Value::Array(docs)) => docs,
            _ => bail!("expected a JSON array of documents or an object with a `docs` array"),
        },
        _ => bail!("expected a JSON array of documents or an object with a `docs` array"),
    };
    if let Some(position) = docs.iter().position(|doc| !doc.is_object()) {
        bail!("bulk entry {position} is not a JSON object");
    }
    Ok(docs)
}

fn format_write(result: &Value) -> String {
    format!(
        "{} rev {}",
        result["id"].as_str().unwrap_or("?"),
        result["rev"].as_str().unwrap_or("?")
    )
}

fn format_rows(listing: &Value) -> String {
    let rows = listing["rows"].as_array().map(Vec::as_slice).unwrap_or_default();
    if rows.is_empty() {
        return "No documents.".into();
    }
    let mut lines: Vec<String> = rows
        .iter()
        .map(|row| {
            let id = row["id"].as_str().unwrap_or("?");
            let rev = row["value"]["rev"].as_str().unwrap_or("");
            format!("{id}  {rev}")
        })
        .collect();
    if let Some(total) = listing["total_rows"].as_u64() {
        lines.push(format!("({} of {total} rows)", rows.len()));
    }
    lines.join("\n")
}

fn format_bulk(results: &Value) -> String {
    let Some(entries) = results.as_array() else {
        return pretty_json(results);
    };
    entries
        .iter()
        .map(|entry| match entry.get("error").and_then(Value::as_str) {
            Some(error) => format!(
                "{}  FAILED {error}: {}",
                entry["id"].as_str().unwrap_or("?"),
                entry["reason"].as_str().unwrap_or("")
            ),
            None => format_write(entry),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
