//! AST builder
//!
//! Turns the generic parse tree into typed procedures. The grammar fixes the
//! shape of every node, so a mismatch here is a defect in the grammar/builder
//! pair rather than a user error; it is still reported as a
//! [`ParseError::Build`] instead of panicking.

use super::combinators::{Fields, ParseResult};
use super::grammar::Tag;
use super::ParseError;
use crate::interpreter::ast::{
    Block, Case, LlmProcedure, Message, Procedure, ProcedureBody, Question, Role, SqlLoop,
    SqlMode, Statement, Template,
};

type Node = ParseResult<Tag>;
type BuildResult<T> = Result<T, ParseError>;

/// The call name reserved for leaving the innermost loop.
const BREAK_KEYWORD: &str = "break";

/* ===================== Shape Helpers ===================== */

fn shape(expected: &str) -> ParseError {
    ParseError::Build(format!("expected {}", expected))
}

fn unexpected(tag: Tag, context: &str) -> ParseError {
    ParseError::Build(format!("unexpected {:?} in {}", tag, context))
}

fn as_fields(node: Node, what: &str) -> BuildResult<Fields<Tag>> {
    node.into_fields().ok_or_else(|| shape(what))
}

fn as_seq(node: Node, what: &str) -> BuildResult<Vec<Node>> {
    node.into_seq().ok_or_else(|| shape(what))
}

fn as_tagged(node: Node, what: &str) -> BuildResult<(Tag, Node)> {
    node.into_tagged().ok_or_else(|| shape(what))
}

fn field(fields: &mut Fields<Tag>, name: &str) -> BuildResult<Node> {
    fields
        .take(name)
        .ok_or_else(|| ParseError::Build(format!("missing field '{}'", name)))
}

fn text_field(fields: &mut Fields<Tag>, name: &str) -> BuildResult<String> {
    Ok(field(fields, name)?.as_text())
}

/* ===================== Procedures ===================== */

pub fn build_program(tree: Node) -> BuildResult<Vec<Procedure>> {
    as_seq(tree, "procedure list")?
        .into_iter()
        .map(build_procedure)
        .collect()
}

fn build_procedure(node: Node) -> BuildResult<Procedure> {
    let mut fields = as_fields(node, "procedure")?;
    let name = text_field(&mut fields, "name")?.trim().to_string();
    let (tag, body) = as_tagged(field(&mut fields, "body")?, "procedure body")?;
    let body = match tag {
        Tag::LlmBody => ProcedureBody::Llm(build_llm(&name, body)?),
        Tag::StatementBody => ProcedureBody::Statements(Block::new(build_statements(body)?)),
        other => return Err(unexpected(other, "procedure body")),
    };
    Ok(Procedure { name, body })
}

fn build_llm(name: &str, node: Node) -> BuildResult<LlmProcedure> {
    let mut fields = as_fields(node, "LLM procedure")?;
    let model = text_field(&mut fields, "model")?;
    let mut system = String::new();
    let mut prompt = String::new();
    let mut history = Vec::new();

    for section in as_seq(field(&mut fields, "sections")?, "LLM sections")? {
        let (tag, section) = as_tagged(section, "LLM section")?;
        match tag {
            Tag::SystemSection => system = text_field(&mut as_fields(section, "system")?, "text")?,
            Tag::PromptSection => prompt = text_field(&mut as_fields(section, "prompt")?, "text")?,
            Tag::HistorySection => {
                for message in as_seq(section, "history")? {
                    let (role, text) = as_tagged(message, "history line")?;
                    let role = match role {
                        Tag::User => Role::User,
                        Tag::Assistant => Role::Assistant,
                        Tag::Blank => continue,
                        other => return Err(unexpected(other, "history")),
                    };
                    history.push(Message {
                        role,
                        text: text.as_text(),
                    });
                }
            }
            other => return Err(unexpected(other, "LLM procedure")),
        }
    }

    Ok(LlmProcedure {
        name: name.to_string(),
        model,
        system,
        prompt: Template::parse(&prompt),
        history,
    })
}

/* ===================== Statements ===================== */

fn build_statements(node: Node) -> BuildResult<Vec<Statement>> {
    let mut statements = Vec::new();
    for item in as_seq(node, "statement list")? {
        let (tag, value) = as_tagged(item, "statement")?;
        if let Some(statement) = build_statement(tag, value)? {
            statements.push(statement);
        }
    }
    Ok(statements)
}

/// Statements inside `{ ... }`.
fn build_block(node: Node) -> BuildResult<Block> {
    let mut fields = as_fields(node, "code block")?;
    Ok(Block::new(build_statements(field(&mut fields, "statements")?)?))
}

/// A block held in the `block` field of a loop or branch.
fn block_field(fields: &mut Fields<Tag>) -> BuildResult<Block> {
    build_block(field(fields, "block")?)
}

fn optional_block(fields: &mut Fields<Tag>) -> BuildResult<Option<Block>> {
    match as_tagged(field(fields, "block")?, "optional block")? {
        (Tag::Block, block) => Ok(Some(build_block(block)?)),
        (Tag::NoBlock, _) => Ok(None),
        (other, _) => Err(unexpected(other, "optional block")),
    }
}

fn build_statement(tag: Tag, node: Node) -> BuildResult<Option<Statement>> {
    let statement = match tag {
        Tag::BlankLine => return Ok(None),

        Tag::Fetch => Statement::FetchVariable {
            name: text_field(&mut as_fields(node, "fetch")?, "var")?,
        },

        Tag::Store => Statement::SetVariable {
            name: text_field(&mut as_fields(node, "store")?, "var")?,
        },

        Tag::ForEachParagraph => Statement::ForEachParagraph {
            body: block_field(&mut as_fields(node, "for each para")?)?,
        },

        Tag::ForEachLine => Statement::ForEachLine {
            body: block_field(&mut as_fields(node, "for each")?)?,
        },

        Tag::Ask => {
            let mut fields = as_fields(node, "ask")?;
            let questions = as_seq(field(&mut fields, "questions")?, "question list")?
                .into_iter()
                .map(build_question)
                .collect::<BuildResult<Vec<_>>>()?;
            Statement::AskQuestions { questions }
        }

        Tag::SqlMutatingQuery | Tag::SqlReadOnlyQuery | Tag::SqlMutating | Tag::SqlReadOnly => {
            let mut fields = as_fields(node, "SQL statement")?;
            let mode = match tag {
                Tag::SqlMutatingQuery | Tag::SqlMutating => SqlMode::Mutating,
                _ => SqlMode::ReadOnly,
            };
            let query = match tag {
                Tag::SqlMutatingQuery | Tag::SqlReadOnlyQuery => {
                    Some(text_field(&mut fields, "query")?)
                }
                _ => None,
            };
            Statement::Sql(SqlLoop {
                mode,
                query,
                body: optional_block(&mut fields)?,
            })
        }

        Tag::Branch => {
            let mut fields = as_fields(node, "case")?;
            let cases = as_seq(field(&mut fields, "cases")?, "case list")?
                .into_iter()
                .map(|case| {
                    let mut case = as_fields(case, "case branch")?;
                    Ok(Case {
                        label: text_field(&mut case, "label")?,
                        body: block_field(&mut case)?,
                    })
                })
                .collect::<BuildResult<Vec<_>>>()?;
            let default = match as_tagged(field(&mut fields, "default")?, "default branch")? {
                (Tag::Default, node) => Some(block_field(&mut as_fields(node, "default")?)?),
                (Tag::NoDefault, _) => None,
                (other, _) => return Err(unexpected(other, "default branch")),
            };
            Statement::Branch { cases, default }
        }

        Tag::Format => Statement::FormatString {
            template: Template::parse(&text_field(&mut as_fields(node, "format")?, "template")?),
        },

        Tag::Call => {
            let name = text_field(&mut as_fields(node, "call")?, "name")?;
            let name = name.trim();
            if name == BREAK_KEYWORD {
                Statement::Break
            } else {
                Statement::Call {
                    name: name.to_string(),
                }
            }
        }

        other => return Err(unexpected(other, "statement list")),
    };
    Ok(Some(statement))
}

fn build_question(node: Node) -> BuildResult<Question> {
    let mut fields = as_fields(node, "question")?;
    let text = text_field(&mut fields, "question")?;
    let text = text.trim();
    let text = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);
    Ok(Question {
        variable: text_field(&mut fields, "var")?,
        text: text.trim().to_string(),
    })
}
