// `couchctl info`: server version and readiness.

use clap::Args;
use serde::Serialize;
use serde_json::Value;

use super::{block_on, Session};
use crate::client::ServerInfo;
use crate::output;

#[derive(Debug, Args)]
pub struct InfoArgs {}

#[derive(Debug, Serialize)]
pub struct InfoResult {
    pub url: String,
    #[serde(flatten)]
    pub server: ServerInfo,
    /// `_up` body; absent when the endpoint is not served.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up: Option<Value>,
}

pub fn run(_args: InfoArgs, session: &Session) -> anyhow::Result<()> {
    let client = session.client()?;
    let result = block_on(async {
        let server = client.server_info().await?;
        let up = client.up().await.ok();
        anyhow::Ok(InfoResult { url: client.base_url().to_string(), server, up })
    })??;

    output::print_output(session.format, &result, format_human)?;
    Ok(())
}

fn format_human(result: &InfoResult) -> String {
    let mut lines = vec![format!("{} {} at {}", result.server.couchdb, result.server.version, result.url)];
    if let Some(uuid) = &result.server.uuid {
        lines.push(format!("  uuid: {uuid}"));
    }
    if !result.server.features.is_empty() {
        lines.push(format!("  features: {}", result.server.features.join(", ")));
    }
    let status = result
        .up
        .as_ref()
        .and_then(|up| up.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    lines.push(format!("  status: {status}"));
    lines.join("\n")
}
