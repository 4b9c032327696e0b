//! Where prompts come from: a literal `--prompt`, or a batch file.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Literal(String),
    File(PathBuf),
}

/// Prompts in file order, plus the 1-based item numbers that were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptBatch {
    pub prompts: Vec<String>,
    pub skipped: Vec<usize>,
}

impl PromptBatch {
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }
}

impl PromptSource {
    pub fn load(&self) -> Result<PromptBatch> {
        match self {
            PromptSource::Literal(prompt) => Ok(PromptBatch {
                prompts: vec![prompt.clone()],
                skipped: Vec::new(),
            }),
            PromptSource::File(path) => load_prompts(path),
        }
    }
}

/// Load a batch file, dispatching on its extension.
pub fn load_prompts(path: &Path) -> Result<PromptBatch> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("json") => load_json(path),
        Some("txt") => load_text(path),
        _ => Err(Error::UnsupportedPromptFileFormat(path.to_path_buf())),
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::PromptFileRead {
        path: path.to_path_buf(),
        source,
    })
}

/// A JSON array of objects; each object's `description` is one prompt.
fn load_json(path: &Path) -> Result<PromptBatch> {
    let content = read(path)?;
    let items: Vec<Value> =
        serde_json::from_str(&content).map_err(|source| Error::PromptFileParse {
            path: path.to_path_buf(),
            source,
        })?;

    let mut batch = PromptBatch::default();
    for (i, item) in items.iter().enumerate() {
        match item.get("description").and_then(Value::as_str) {
            Some(description) if !description.trim().is_empty() => {
                batch.prompts.push(description.to_string())
            }
            _ => {
                tracing::warn!("skipping item {} in {:?}: no description", i + 1, path);
                batch.skipped.push(i + 1);
            }
        }
    }
    Ok(batch)
}

/// One prompt per non-blank line.
fn load_text(path: &Path) -> Result<PromptBatch> {
    let content = read(path)?;
    Ok(PromptBatch {
        prompts: content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect(),
        skipped: Vec::new(),
    })
}
