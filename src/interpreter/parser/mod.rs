//! Parser for procedure programs
//!
//! Produces the procedure tree consumed by the semantic validator and the
//! compiler.

use thiserror::Error;

use super::ast::Procedure;

pub mod builder;
pub mod combinators;
pub mod grammar;


pub use combinators::SyntaxError;
pub use grammar::Grammar;

/* ===================== Error Types ===================== */

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("malformed parse tree: {0}")]
    Build(String),
}

/* ===================== Public API ===================== */

/// Parse a program into its procedures, in source order.
///
/// Line endings are normalized to `\n` and a final newline is added when
/// missing, so the last statement of a file needs no terminator.
pub fn parse_program(source: &str) -> Result<Vec<Procedure>, ParseError> {
    let mut source = source.replace("\r\n", "\n");
    if !source.ends_with('\n') {
        source.push('\n');
    }
    let tree = Grammar::new().parse_program(&source)?;
    builder::build_program(tree)
}
