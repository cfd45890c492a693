//! Policy Store - persists the learned value table across restarts.
//!
//! The table is written as a JSON document next to a `.tmp` sibling and
//! renamed into place, so a crash mid-write leaves the previous policy intact.
//! Loading never fails from the caller's point of view: a missing or corrupt
//! file yields an empty table and a log line.

use crate::agent::ValueTable;
use crate::error::PolicyError;
use crate::types::StateKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const POLICY_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PolicyFile {
    version: u32,
    actions: usize,
    saved_at: DateTime<Utc>,
    entries: Vec<PolicyEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PolicyEntry {
    /// Bucket temperature in degrees
    state: f64,
    values: Vec<f64>,
}

/// Summary of one persisted state, for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRow {
    pub state: StateKey,
    pub values: Vec<f64>,
    pub best_action: usize,
}

pub struct PolicyStore {
    path: PathBuf,
    actions: usize,
}

impl PolicyStore {
    pub fn new(path: impl Into<PathBuf>, actions: usize) -> Self {
        Self {
            path: path.into(),
            actions,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the table, falling back to an empty one on any problem.
    pub fn load(&self) -> ValueTable {
        match self.try_load() {
            Ok(table) => {
                log::info!(
                    "Policy loaded from {}: {} thermal states remembered",
                    self.path.display(),
                    table.len()
                );
                table
            }
            Err(PolicyError::Missing(path)) => {
                log::info!("No policy at {}, starting with an empty table", path.display());
                ValueTable::new(self.actions)
            }
            Err(e) => {
                log::warn!("Policy unusable ({}), starting with an empty table", e);
                ValueTable::new(self.actions)
            }
        }
    }

    /// Load the table, reporting why it could not be read.
    pub fn try_load(&self) -> Result<ValueTable, PolicyError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PolicyError::Missing(self.path.clone())
            } else {
                PolicyError::Io {
                    path: self.path.clone(),
                    source: e,
                }
            }
        })?;

        let file: PolicyFile = serde_json::from_str(&content)?;

        let mut table = ValueTable::new(self.actions);
        for entry in file.entries {
            if entry.values.len() != self.actions {
                return Err(PolicyError::Shape {
                    state: entry.state,
                    found: entry.values.len(),
                    expected: self.actions,
                });
            }
            table.insert(StateKey::from_degrees(entry.state), entry.values);
        }

        Ok(table)
    }

    /// Persist the table. Failures are logged and returned, never panicked on.
    pub fn save(&self, table: &ValueTable) -> Result<(), PolicyError> {
        let result = self.write(table);
        if let Err(e) = &result {
            log::error!("Failed to save policy to {}: {}", self.path.display(), e);
        }
        result
    }

    fn write(&self, table: &ValueTable) -> Result<(), PolicyError> {
        let mut entries: Vec<PolicyEntry> = table
            .iter()
            .map(|(state, values)| PolicyEntry {
                state: state.degrees(),
                values: values.to_vec(),
            })
            .collect();
        entries.sort_by(|a, b| a.state.total_cmp(&b.state));

        let file = PolicyFile {
            version: POLICY_VERSION,
            actions: table.actions(),
            saved_at: Utc::now(),
            entries,
        };
        let json = serde_json::to_string_pretty(&file)?;

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| PolicyError::Io { path, source }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let tmp = self.tmp_path();
        std::fs::write(&tmp, json).map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;

        log::debug!("Policy saved to {} ({} states)", self.path.display(), table.len());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "policy".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Rows of the persisted table sorted by temperature.
    pub fn inspect(&self) -> Result<Vec<PolicyRow>, PolicyError> {
        let table = self.try_load()?;
        let mut rows: Vec<PolicyRow> = table
            .iter()
            .map(|(state, values)| PolicyRow {
                state: *state,
                values: values.to_vec(),
                best_action: crate::agent::argmax(values),
            })
            .collect();
        rows.sort_by_key(|r| r.state);
        Ok(rows)
    }
}
