//! Language-model collaborator
//!
//! The VM hands an LLM procedure and its resolved prompt inputs to a
//! [`ModelRunner`]. The production runner, [`CachingRunner`], pairs a
//! [`ModelBackend`] (ollama, locally or over ssh) with a [`ResponseStore`] so
//! that identical inputs to an identical procedure only reach the model once.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::db::DbError;
use crate::interpreter::ast::LlmProcedure;

pub mod cache;
pub mod keys;
pub mod ollama;
pub mod runner;

pub use cache::{MemoryResponseStore, ResponseStore, SqliteResponseStore};
pub use ollama::{ModelBackend, OllamaBackend};
pub use runner::CachingRunner;

/// Prompt inputs, keyed by template variable name.
pub type Inputs = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("couldn't connect to model host {host}: {stderr}")]
    HostUnreachable { host: String, stderr: String },
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with an error: {stderr}")]
    Command { command: String, stderr: String },
    #[error("model for '{procedure}' returned an empty response to prompt: {prompt}")]
    EmptyResponse { procedure: String, prompt: String },
    #[error("response cache: {0}")]
    Cache(#[from] DbError),
}

pub trait ModelRunner {
    fn run(&mut self, procedure: &LlmProcedure, inputs: &Inputs) -> Result<String, ModelError>;
}
