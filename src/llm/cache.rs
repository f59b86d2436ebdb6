//! Response cache
//!
//! Stores model responses keyed by (model id, input hash), together with the
//! bookkeeping tables that record which model files have been created and
//! which procedure names map to each model id.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use super::keys::ModelKeys;
use super::Inputs;
use crate::db::{Database, DbError};
use crate::interpreter::ast::LlmProcedure;

pub trait ResponseStore {
    /// Create the cache tables if they are missing.
    fn prepare(&mut self) -> Result<(), DbError>;

    fn has_model_file(&mut self, model_file_id: &str) -> Result<bool, DbError>;

    fn record_model(&mut self, keys: &ModelKeys, procedure: &LlmProcedure) -> Result<(), DbError>;

    /// Remember that `name` refers to `model_id`. Idempotent.
    fn record_name(&mut self, model_id: &str, name: &str) -> Result<(), DbError>;

    fn lookup(&mut self, model_id: &str, input_hash: &str) -> Result<Option<String>, DbError>;

    fn save(
        &mut self,
        model_id: &str,
        input_hash: &str,
        inputs: &Inputs,
        response: &str,
    ) -> Result<(), DbError>;
}

/* ===================== SQLite ===================== */

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS responses (
    model_id TEXT,
    prompt_hash TEXT,
    data TEXT,
    response TEXT,
    deleted INTEGER DEFAULT 0,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS llm_models (
    id INTEGER PRIMARY KEY,
    model_id TEXT,
    model_file_id TEXT,
    model TEXT,
    system TEXT,
    prompt TEXT,
    history TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS llm_model_names (
    id INTEGER PRIMARY KEY,
    model_id TEXT,
    name TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS llm_model_names_idx ON llm_model_names (model_id, name);
";

pub struct SqliteResponseStore {
    db: Database,
}

impl SqliteResponseStore {
    pub fn new(db: Database) -> Self {
        SqliteResponseStore { db }
    }

    pub fn connect(url: &str) -> Result<Self, DbError> {
        Ok(Self::new(Database::connect(url)?))
    }
}

impl ResponseStore for SqliteResponseStore {
    fn prepare(&mut self) -> Result<(), DbError> {
        self.db.execute_script(SCHEMA)
    }

    fn has_model_file(&mut self, model_file_id: &str) -> Result<bool, DbError> {
        let rows = self.db.fetch_text(
            "SELECT COUNT(*) AS count FROM llm_models WHERE model_file_id = ?",
            &[model_file_id],
        )?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .map_or(false, |(_, count)| count != "0"))
    }

    fn record_model(&mut self, keys: &ModelKeys, procedure: &LlmProcedure) -> Result<(), DbError> {
        let history: Vec<(&str, &str)> = procedure
            .history
            .iter()
            .map(|m| (m.role.as_str(), m.text.as_str()))
            .collect();
        let history = serde_json::to_string(&history).unwrap_or_default();
        self.db.execute(
            "INSERT INTO llm_models (model_id, model_file_id, model, system, prompt, history)
             VALUES (?, ?, ?, ?, ?, ?)",
            &[
                keys.model_id.as_str(),
                keys.model_file_id.as_str(),
                procedure.model.as_str(),
                procedure.system.as_str(),
                procedure.prompt.source(),
                history.as_str(),
            ],
        )?;
        Ok(())
    }

    fn record_name(&mut self, model_id: &str, name: &str) -> Result<(), DbError> {
        self.db.execute(
            "INSERT INTO llm_model_names (model_id, name) VALUES (?, ?) ON CONFLICT DO NOTHING",
            &[model_id, name],
        )?;
        Ok(())
    }

    fn lookup(&mut self, model_id: &str, input_hash: &str) -> Result<Option<String>, DbError> {
        let rows = self.db.fetch_text(
            "SELECT response FROM responses
             WHERE model_id = ? AND prompt_hash = ? AND deleted = 0
             ORDER BY created_at DESC LIMIT 1",
            &[model_id, input_hash],
        )?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .map(|(_, response)| response))
    }

    fn save(
        &mut self,
        model_id: &str,
        input_hash: &str,
        inputs: &Inputs,
        response: &str,
    ) -> Result<(), DbError> {
        let data = serde_json::to_string(inputs).unwrap_or_default();
        self.db.execute(
            "INSERT INTO responses (model_id, prompt_hash, data, response) VALUES (?, ?, ?, ?)",
            &[model_id, input_hash, data.as_str(), response],
        )?;
        debug!(model_id, input_hash, "cached model response");
        Ok(())
    }
}

/* ===================== Memory ===================== */

/// Process-local cache, used when no cache database is configured.
#[derive(Debug, Default)]
pub struct MemoryResponseStore {
    model_files: HashSet<String>,
    names: BTreeSet<(String, String)>,
    responses: HashMap<(String, String), String>,
}

impl MemoryResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Procedure names recorded for `model_id`.
    #[cfg(test)]
    pub(crate) fn names_for(&self, model_id: &str) -> Vec<&str> {
        self.names
            .iter()
            .filter(|(id, _)| id == model_id)
            .map(|(_, name)| name.as_str())
            .collect()
    }
}

impl ResponseStore for MemoryResponseStore {
    fn prepare(&mut self) -> Result<(), DbError> {
        Ok(())
    }

    fn has_model_file(&mut self, model_file_id: &str) -> Result<bool, DbError> {
        Ok(self.model_files.contains(model_file_id))
    }

    fn record_model(&mut self, keys: &ModelKeys, _procedure: &LlmProcedure) -> Result<(), DbError> {
        self.model_files.insert(keys.model_file_id.clone());
        Ok(())
    }

    fn record_name(&mut self, model_id: &str, name: &str) -> Result<(), DbError> {
        self.names.insert((model_id.to_string(), name.to_string()));
        Ok(())
    }

    fn lookup(&mut self, model_id: &str, input_hash: &str) -> Result<Option<String>, DbError> {
        Ok(self
            .responses
            .get(&(model_id.to_string(), input_hash.to_string()))
            .cloned())
    }

    fn save(
        &mut self,
        model_id: &str,
        input_hash: &str,
        _inputs: &Inputs,
        response: &str,
    ) -> Result<(), DbError> {
        self.responses.insert(
            (model_id.to_string(), input_hash.to_string()),
            response.to_string(),
        );
        Ok(())
    }
}
