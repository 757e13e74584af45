use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONTEXT_FILE: &str = "stack.context.json";

/// Results of earlier lookups, persisted as a flat JSON object.
///
/// Meant to be committed next to the stack settings so every synth of the same
/// commit sees the same VPC.
#[derive(Debug)]
pub struct ContextCache {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl ContextCache {
    /// Load the cache at `path`; a missing file is an empty cache
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            tracing::debug!("Context file {} not found, starting empty", path.display());
            return Ok(Self {
                path,
                entries: Map::new(),
            });
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read context file {}", path.display()))?;
        let entries: Map<String, Value> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse context file {}", path.display()))?;

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.entries
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .with_context(|| format!("Malformed context entry '{}'", key))
            })
            .transpose()
    }

    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("Failed to serialize context entry '{}'", key))?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the cache to disk.
    ///
    /// Goes through a temporary file in the same directory so an interrupted
    /// write never leaves a truncated cache.
    pub fn save(&self) -> Result<()> {
        let json =
            serde_json::to_string_pretty(&self.entries).context("Failed to serialize context")?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json + "\n")
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to write context file {}", self.path.display()))?;

        tracing::debug!("Saved {} context entries to {}", self.len(), self.path.display());
        Ok(())
    }

    /// Delete the cache file. Returns false if there was nothing to delete.
    pub fn reset(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)
            .with_context(|| format!("Failed to delete context file {}", path.display()))?;
        Ok(true)
    }
}
