//! Writes the signed-URL proxy's OpenAPI document.
//!
//! Usage: `openapi [OUTPUT]`, defaulting to `openapi.json`.

use anyhow::Context;
use facetalk_api::router::ApiDoc;
use utoipa::OpenApi;

const DEFAULT_OUTPUT: &str = "openapi.json";

fn main() -> anyhow::Result<()> {
    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_OUTPUT.to_string());
    let doc = ApiDoc::openapi();
    let json = doc
        .to_pretty_json()
        .context("Failed to serialize the OpenAPI document")?;
    std::fs::write(&output, json).with_context(|| format!("Failed to write {output}"))?;
    println!("Wrote {} route(s) to {}", doc.paths.paths.len(), output);
    Ok(())
}
