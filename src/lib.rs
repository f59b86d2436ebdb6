pub mod cli;
pub mod config;
pub mod db;
pub mod interpreter;
pub mod llm;
pub mod prompter;
pub mod sql;

// Re-export main types
pub use config::Config;
pub use interpreter::{Machine, Program};
