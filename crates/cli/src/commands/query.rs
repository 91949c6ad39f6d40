// `couchctl query`: views, Mango queries and full-text search.

use anyhow::{bail, Context};
use clap::{Args, Subcommand};
use serde_json::{json, Value};

use super::{block_on, json_param, read_json_arg, Session};
use crate::client::Params;
use crate::output::{self, pretty_json};

#[derive(Debug, Args)]
pub struct QueryArgs {
    #[command(subcommand)]
    pub action: QueryAction,
}

#[derive(Debug, Subcommand)]
pub enum QueryAction {
    /// Query a map/reduce view
    View(ViewArgs),
    /// Run a Mango query
    Find(FindArgs),
    /// Query a full-text search index
    Search(SearchArgs),
}

#[derive(Debug, Args)]
pub struct ViewArgs {
    pub db: String,
    /// Design document name, without the `_design/` prefix
    pub ddoc: String,
    pub view: String,
    /// Exact key (JSON)
    #[arg(long)]
    pub key: Option<String>,
    /// First key (JSON)
    #[arg(long)]
    pub start_key: Option<String>,
    /// Last key (JSON)
    #[arg(long)]
    pub end_key: Option<String>,
    #[arg(long)]
    pub limit: Option<u64>,
    #[arg(long)]
    pub skip: Option<u64>,
    /// Run (true) or skip (false) the reduce function
    #[arg(long)]
    pub reduce: Option<bool>,
    /// Group reduce results by key
    #[arg(long)]
    pub group: bool,
    /// Group by the first N elements of array keys
    #[arg(long)]
    pub group_level: Option<u32>,
    #[arg(long)]
    pub include_docs: bool,
    #[arg(long)]
    pub descending: bool,
    #[arg(long)]
    pub partition: Option<String>,
}

#[derive(Debug, Args)]
pub struct FindArgs {
    pub db: String,
    /// Selector object (JSON, @file, or -)
    #[arg(long, short, conflicts_with = "query")]
    pub selector: Option<String>,
    /// Complete query body (JSON, @file, or -)
    #[arg(long, short)]
    pub query: Option<String>,
    /// Fields to return, comma separated
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,
    #[arg(long)]
    pub limit: Option<u64>,
    #[arg(long)]
    pub partition: Option<String>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    pub db: String,
    pub ddoc: String,
    pub index: String,
    /// Lucene query string
    pub query: String,
    #[arg(long)]
    pub limit: Option<u64>,
    #[arg(long)]
    pub include_docs: bool,
}

impl ViewArgs {
    fn params(&self) -> anyhow::Result<Params> {
        let mut params = Params::new();
        if let Some(key) = &self.key {
            params.push(("key", json_param("key", key)?));
        }
        if let Some(key) = &self.start_key {
            params.push(("startkey", json_param("start-key", key)?));
        }
        if let Some(key) = &self.end_key {
            params.push(("endkey", json_param("end-key", key)?));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(skip) = self.skip {
            params.push(("skip", skip.to_string()));
        }
        if let Some(reduce) = self.reduce {
            params.push(("reduce", reduce.to_string()));
        }
        if self.group {
            params.push(("group", "true".into()));
        }
        if let Some(level) = self.group_level {
            params.push(("group_level", level.to_string()));
        }
        if self.include_docs {
            params.push(("include_docs", "true".into()));
        }
        if self.descending {
            params.push(("descending", "true".into()));
        }
        Ok(params)
    }
}

impl FindArgs {
    /// Build the `_find` body from either `--query` or `--selector` plus options.
    fn body(&self) -> anyhow::Result<Value> {
        let mut body = match (&self.query, &self.selector) {
            (Some(query), _) => read_json_arg(query)?,
            (None, Some(selector)) => json!({ "selector": read_json_arg(selector)? }),
            (None, None) => bail!("either --selector or --query is required"),
        };
        let Some(fields) = body.as_object_mut() else {
            bail!("a Mango query must be a JSON object");
        };
        if !fields.contains_key("selector") {
            bail!("a Mango query needs a `selector`");
        }
        if !self.fields.is_empty() {
            fields.insert("fields".into(), json!(self.fields));
        }
        if let Some(limit) = self.limit {
            fields.insert("limit".into(), json!(limit));
        }
        Ok(body)
    }
}

impl SearchArgs {
    fn params(&self) -> Params {
        let mut params: Params = vec![("q", self.query.clone())];
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if self.include_docs {
            params.push(("include_docs", "true".into()));
        }
        params
    }
}

pub fn run(args: QueryArgs, session: &Session) -> anyhow::Result<()> {
    let client = session.client()?;
    match args.action {
        QueryAction::View(view) => {
            let params = view.params()?;
            let result = block_on(client.view(&view.db, &view.ddoc, &view.view, view.partition.as_deref(), &params))?
                .with_context(|| format!("view `{}/{}` failed", view.ddoc, view.view))?;
            output::print_output(session.format, &result, format_view)?;
        }
        QueryAction::Find(find) => {
            let body = find.body()?;
            let result = block_on(client.find(&find.db, find.partition.as_deref(), &body))?
                .with_context(|| format!("query on `{}` failed", find.db))?;
            output::print_output(session.format, &result, format_find)?;
        }
        QueryAction::Search(search) => {
            let result = block_on(client.search(&search.db, &search.ddoc, &search.index, &search.params()))?
                .with_context(|| format!("search index `{}/{}` failed", search.ddoc, search.index))?;
            output::print_output(session.format, &result, format_search)?;
        }
    }
    Ok(())
}

fn format_view(result: &Value) -> String {
    let Some(rows) = result["rows"].as_array() else {
        return pretty_json(result);
    };
    if rows.is_empty() {
        return "No rows.".into();
    }
    rows.iter()
        .map(|row| {
            let mut line = format!("{} => {}", row["key"], row["value"]);
            if let Some(id) = row["id"].as_str() {
                line = format!("{id}  {line}");
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_find(result: &Value) -> String {
    let docs = result["docs"].as_array().map(Vec::as_slice).unwrap_or_default();
    let mut lines: Vec<String> = docs.iter().map(|doc| doc.to_string()).collect();
    if lines.is_empty() {
        lines.push("No documents matched.".into());
    }
    if let Some(warning) = result["warning"].as_str() {
        lines.push(format!("warning: {warning}"));
    }
    lines.join("\n")
}

fn format_search(result: &Value) -> String {
    let rows = result["rows"].as_array().map(Vec::as_slice).unwrap_or_default();
    let mut lines = vec![format!("{} hits", result["total_rows"].as_u64().unwrap_or(rows.len() as u64))];
    for row in rows {
        let id = row["id"].as_str().unwrap_or("?");
        let score = row["order"].get(0).and_then(Value::as_f64);
        match score {
            Some(score) => lines.push(format!("  {id}  ({score:.3})")),
            None => lines.push(format!("  {id}")),
        }
    }
    lines.join("\n")
}
