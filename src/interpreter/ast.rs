//! Procedure and statement tree
//!
//! Built once by the parser, walked by the semantic validator, and consumed by
//! the compiler. Loop and branch bodies own their nested [`Block`]; the tree
//! never shares nodes.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::text::escape;

/* ===================== Procedures ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub body: ProcedureBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcedureBody {
    Statements(Block),
    Llm(LlmProcedure),
}

/// A procedure answered by a language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmProcedure {
    pub name: String,
    pub model: String,
    pub system: String,
    pub prompt: Template,
    pub history: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/* ===================== Statements ===================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Statement>,
}

impl Block {
    pub fn new(statements: Vec<Statement>) -> Self {
        Block { statements }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Statement {
    /// `-> name`: copy the register into `name`
    SetVariable { name: String },
    /// `name ->`: copy `name` into the register
    FetchVariable { name: String },
    /// `"text {name}"`: render into the register
    FormatString { template: Template },
    AskQuestions { questions: Vec<Question> },
    ForEachLine { body: Block },
    ForEachParagraph { body: Block },
    Sql(SqlLoop),
    Branch { cases: Vec<Case>, default: Option<Block> },
    Call { name: String },
    Break,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub variable: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlMode {
    ReadOnly,
    Mutating,
}

/// A query whose rows drive an optional loop body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlLoop {
    pub mode: SqlMode,
    /// Literal query text; `None` runs the register's current value.
    pub query: Option<String>,
    pub body: Option<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub label: String,
    pub body: Block,
}

/* ===================== Templates ===================== */

/// Text with `{name}` interpolation. `{{` and `}}` produce literal braces; a
/// brace that does not close a simple name is kept as literal text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Var(String),
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = source;
        while let Some(c) = rest.chars().next() {
            if rest.starts_with("{{") || rest.starts_with("}}") {
                text.push(c);
                rest = &rest[2..];
                continue;
            }
            if c == '{' {
                if let Some(end) = rest.find('}') {
                    let name = &rest[1..end];
                    if is_placeholder_name(name) {
                        if !text.is_empty() {
                            segments.push(Segment::Text(std::mem::take(&mut text)));
                        }
                        segments.push(Segment::Var(name.to_string()));
                        rest = &rest[end + 1..];
                        continue;
                    }
                }
            }
            text.push(c);
            rest = &rest[c.len_utf8()..];
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Template {
            source: source.to_string(),
            segments,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Interpolated names, first occurrence order, without duplicates.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Var(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn render(&self, mut lookup: impl FnMut(&str) -> String) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(name) => out.push_str(&lookup(name)),
            }
        }
        out
    }
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || "_-.".contains(c))
}

impl From<String> for Template {
    fn from(source: String) -> Self {
        Template::parse(&source)
    }
}

impl From<Template> for String {
    fn from(template: Template) -> Self {
        template.source
    }
}

/* ===================== Source Rendering ===================== */

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# {}", self.name)?;
        writeln!(f)?;
        match &self.body {
            ProcedureBody::Statements(block) => write_statements(f, &block.statements, 0),
            ProcedureBody::Llm(llm) => {
                writeln!(f, "Model: {}", llm.model)?;
                writeln!(f)?;
                write_section(f, "System", &llm.system)?;
                write_section(f, "Prompt", llm.prompt.source())?;
                if !llm.history.is_empty() {
                    writeln!(f, "## History")?;
                    writeln!(f)?;
                    for message in &llm.history {
                        let prefix = match message.role {
                            Role::User => "U",
                            Role::Assistant => "A",
                        };
                        writeln!(f, "{}: {}", prefix, message.text)?;
                    }
                }
                Ok(())
            }
        }
    }
}

fn write_section(f: &mut fmt::Formatter<'_>, title: &str, text: &str) -> fmt::Result {
    if text.is_empty() {
        return Ok(());
    }
    writeln!(f, "## {}", title)?;
    writeln!(f)?;
    write!(f, "{}", text)?;
    if !text.ends_with('\n') {
        writeln!(f)?;
    }
    if !text.ends_with("\n\n") {
        writeln!(f)?;
    }
    Ok(())
}

fn write_statements(f: &mut fmt::Formatter<'_>, statements: &[Statement], depth: usize) -> fmt::Result {
    for statement in statements {
        write_statement(f, statement, depth)?;
    }
    Ok(())
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &Block, depth: usize) -> fmt::Result {
    writeln!(f, "{{")?;
    write_statements(f, &block.statements, depth + 1)?;
    write!(f, "{}}}", indent(depth))
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn write_statement(f: &mut fmt::Formatter<'_>, statement: &Statement, depth: usize) -> fmt::Result {
    let pad = indent(depth);
    match statement {
        Statement::SetVariable { name } => writeln!(f, "{}-> {}", pad, name),
        Statement::FetchVariable { name } => writeln!(f, "{}{} ->", pad, name),
        Statement::FormatString { template } => {
            writeln!(f, "{}\"{}\"", pad, escape(template.source()))
        }
        Statement::AskQuestions { questions } => {
            writeln!(f, "{}ask {{", pad)?;
            for question in questions {
                writeln!(
                    f,
                    "{}    \"{}\" -> {}",
                    pad, question.text, question.variable
                )?;
            }
            writeln!(f, "{}}}", pad)
        }
        Statement::ForEachLine { body } => {
            write!(f, "{}for each ", pad)?;
            write_block(f, body, depth)?;
            writeln!(f)
        }
        Statement::ForEachParagraph { body } => {
            write!(f, "{}for each para ", pad)?;
            write_block(f, body, depth)?;
            writeln!(f)
        }
        Statement::Sql(sql) => {
            let bang = match sql.mode {
                SqlMode::ReadOnly => "",
                SqlMode::Mutating => "!",
            };
            write!(f, "{}SQL{}", pad, bang)?;
            if let Some(query) = &sql.query {
                write!(f, "\"{}\"", escape(query))?;
            }
            if let Some(body) = &sql.body {
                write!(f, " ")?;
                write_block(f, body, depth)?;
            }
            writeln!(f)
        }
        Statement::Branch { cases, default } => {
            writeln!(f, "{}case {{", pad)?;
            for case in cases {
                write!(f, "{}    \"{}\" ", pad, escape(&case.label))?;
                write_block(f, &case.body, depth + 1)?;
                writeln!(f)?;
            }
            write!(f, "{}}}", pad)?;
            if let Some(default) = default {
                write!(f, " ")?;
                write_block(f, default, depth)?;
            }
            writeln!(f)
        }
        Statement::Call { name } => writeln!(f, "{}{}", pad, name),
        Statement::Break => writeln!(f, "{}break", pad),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_template_names_and_render() {
        let template = Template::parse("Hi {name}, {greeting} {name}!");
        assert_eq!(template.names(), vec!["name", "greeting"]);

        let vars: HashMap<&str, &str> = [("name", "Ada"), ("greeting", "welcome")].into();
        let rendered = template.render(|n| vars.get(n).unwrap_or(&"").to_string());
        assert_eq!(rendered, "Hi Ada, welcome Ada!");
    }

    #[test]
    fn test_template_literal_braces() {
        let template = Template::parse(r#"{{"json": {value}}} and { not a name } and {"#);
        assert_eq!(template.names(), vec!["value"]);
        assert_eq!(
            template.render(|_| "1".to_string()),
            r#"{"json": 1} and { not a name } and {"#
        );
    }

    #[test]
    fn test_template_serializes_as_source() {
        let template = Template::parse("x {y}");
        let json = serde_json::to_string(&template).unwrap();
        assert_eq!(json, "\"x {y}\"");
        let back: Template = serde_json::from_str(&json).unwrap();
        assert_eq!(back, template);
    }
}
