use crate::domain::filters::FilterState;
use anyhow::Result;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Key under which the filter state is stored.
pub const FILTERS_KEY: &str = "callbook-filters";

/// Small key/value store backed by one JSON object on disk.
#[derive(Debug, Clone)]
pub struct FilterStore {
    path: PathBuf,
}

impl FilterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved filter state. Missing or unreadable data reads as `None`.
    pub fn load(&self) -> Option<FilterState> {
        let mut entries = self.read_entries();
        let value = entries.remove(FILTERS_KEY)?;
        match serde_json::from_value(value) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Ignoring corrupt saved filters");
                None
            }
        }
    }

    pub fn save(&self, state: &FilterState) -> Result<()> {
        let mut entries = self.read_entries();
        entries.insert(FILTERS_KEY.to_string(), serde_json::to_value(state)?);
        self.write_entries(&entries)
    }

    /// Remove the key entirely; other keys are left alone.
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.read_entries();
        if entries.remove(FILTERS_KEY).is_none() {
            return Ok(());
        }
        self.write_entries(&entries)
    }

    #[allow(dead_code)]
    pub fn contains(&self) -> bool {
        self.read_entries().contains_key(FILTERS_KEY)
    }

    fn read_entries(&self) -> Map<String, Value> {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return Map::new();
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "Local store is not a JSON object, starting empty");
                Map::new()
            }
        }
    }

    fn write_entries(&self, entries: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
