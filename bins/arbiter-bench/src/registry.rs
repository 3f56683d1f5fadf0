//! Test registry and response-file loading.
//!
//! The rubric lives in an external registry exchanged as a JSON array of
//! test cases; the core treats it as read-only. Response files may be a
//! bare id->code map or a `{metadata, responses}` wrapper as produced by
//! earlier runs.

use anyhow::{Context, Result};
use arbiter_common::types::TestCase;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Load the rubric from a JSON registry file.
pub fn load_tests(path: &Path) -> Result<Vec<TestCase>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read test registry: {}", path.display()))?;

    let tests: Vec<TestCase> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid test registry JSON in {}", path.display()))?;

    info!(tests = tests.len(), registry = %path.display(), "Loaded test registry");
    Ok(tests)
}

/// Load a response map from a JSON file, unwrapping the `{metadata,
/// responses}` envelope when present.
pub fn load_responses(path: &Path) -> Result<HashMap<String, String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read responses file: {}", path.display()))?;

    let data: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in responses file {}", path.display()))?;

    let responses_value = match data.get("responses") {
        Some(inner) if data.get("metadata").is_some() => inner.clone(),
        _ => data,
    };

    serde_json::from_value(responses_value)
        .with_context(|| format!("Responses in {} are not an id->code map", path.display()))
}
