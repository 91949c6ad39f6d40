// `couchctl cluster`: membership and node statistics.

use anyhow::Context;
use clap::{Args, Subcommand};
use serde_json::Value;

use super::{block_on, Session};
use crate::output::{self, pretty_json};

#[derive(Debug, Args)]
pub struct ClusterArgs {
    #[command(subcommand)]
    pub action: ClusterAction,
}

#[derive(Debug, Subcommand)]
pub enum ClusterAction {
    /// Show known and connected nodes
    Membership,
    /// Show runtime statistics for a node
    Stats {
        /// Node name; `_local` is the node answering the request
        #[arg(long, default_value = "_local")]
        node: String,
    },
}

pub fn run(args: ClusterArgs, session: &Session) -> anyhow::Result<()> {
    let client = session.client()?;
    match args.action {
        ClusterAction::Membership => {
            let membership = block_on(client.membership())?.context("failed to read cluster membership")?;
            output::print_output(session.format, &membership, format_membership)?;
        }
        ClusterAction::Stats { node } => {
            let stats = block_on(client.node_stats(&node))?
                .with_context(|| format!("failed to read stats for node `{node}`"))?;
            output::print_output(session.format, &stats, pretty_json)?;
        }
    }
    Ok(())
}

fn node_names(value: &Value) -> Vec<&str> {
    value.as_array().map(|nodes| nodes.iter().filter_map(Value::as_str).collect()).unwrap_or_default()
}

fn format_membership(membership: &Value) -> String {
    let all = node_names(&membership["all_nodes"]);
    let cluster = node_names(&membership["cluster_nodes"]);

    let mut lines = vec![format!("Nodes ({} connected, {} configured)", all.len(), cluster.len())];
    for node in &cluster {
        let state = if all.contains(node) { "up" } else { "down" };
        lines.push(format!("  {node} [{state}]"));
    }
    lines.join("\n")
}
