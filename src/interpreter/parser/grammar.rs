//! Program grammar
//!
//! The on-disk syntax, written as a fixed composition of combinators. A
//! program is a list of `# name` blocks; each block body is either an LLM
//! definition (`Model:` line plus `## System` / `## Prompt` / `## History`
//! sections) or a list of statements, one per line.
//!
//! Alternative order matters. `name ->` and `-> name` must be tried before
//! the procedure-call catch-all (which accepts any non-empty line), and the
//! SQL forms are listed longest prefix first so `SQL!"..."` is never read as
//! a bare `SQL` followed by garbage.

use super::combinators::{
    any_char_but, fields, flatten, include_exclude, list, literal, one_of, only_chars, prefixed,
    sequence, tagged, with_replacements, ParseResult, Pattern, Placeholder, SyntaxError,
};

/// Parse-tree tags, one per grammar alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    // Statements
    Fetch,
    Store,
    ForEachParagraph,
    ForEachLine,
    Ask,
    SqlMutatingQuery,
    SqlReadOnlyQuery,
    SqlMutating,
    SqlReadOnly,
    Branch,
    Format,
    Call,
    BlankLine,
    // Optional pieces
    Block,
    NoBlock,
    Default,
    NoDefault,
    // History lines
    User,
    Assistant,
    Blank,
    // LLM sections
    SystemSection,
    PromptSection,
    HistorySection,
    // Procedure bodies
    LlmBody,
    StatementBody,
}

const LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NAME_CHARS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-.";

/// The compiled grammar. Holds the strong handles that keep the recursive
/// statement rule alive.
pub struct Grammar {
    program: Pattern<Tag>,
    string_content: Pattern<Tag>,
}

impl Grammar {
    pub fn new() -> Self {
        let statements_slot = Placeholder::new();
        let code_block = fields(
            vec![
                literal("{"),
                spaces_or_newlines(),
                statements_slot.pattern(),
                spaces_or_newlines(),
                literal("}"),
            ],
            &[("statements", 2)],
        );
        let statements = statement_list(&code_block);
        // `statements` is owned by the program pattern below; the slot only
        // holds a weak link back to it.
        let _ = statements_slot.bind(&statements);

        let body = tagged(vec![
            (Tag::LlmBody, llm_body()),
            (Tag::StatementBody, statements),
        ]);
        let procedure = fields(
            vec![
                literal("# "),
                any_char_but("\n", false),
                literal("\n\n"),
                body,
                spaces_or_newlines(),
            ],
            &[("name", 1), ("body", 3)],
        );
        let program = prefixed(spaces_or_newlines(), list(procedure.clone(), procedure));

        Grammar {
            program,
            string_content: string_content(),
        }
    }

    /// Parse a complete program text.
    pub fn parse_program(&self, source: &str) -> Result<ParseResult<Tag>, SyntaxError> {
        self.program.parse_all(source)
    }

    /// Unescape the body of a quoted string (without the surrounding quotes).
    pub fn unescape(&self, content: &str) -> Result<String, SyntaxError> {
        Ok(self.string_content.parse_all(content)?.as_text())
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

/* ===================== Terminals ===================== */

fn maybe_spaces() -> Pattern<Tag> {
    only_chars(" ", true)
}

fn spaces() -> Pattern<Tag> {
    only_chars(" ", false)
}

fn spaces_or_newlines() -> Pattern<Tag> {
    only_chars(" \n", true)
}

/// Statement separator: optional trailing spaces, then a newline.
fn line_break() -> Pattern<Tag> {
    sequence(vec![maybe_spaces(), literal("\n")])
}

fn string_content() -> Pattern<Tag> {
    with_replacements(
        include_exclude("\"", &["\\\\", "\\\"", "\n"], true),
        &[("\\\"", "\""), ("\\\\", "\\")],
    )
}

fn quoted() -> Vec<Pattern<Tag>> {
    vec![literal("\""), string_content(), literal("\"")]
}

fn var_name() -> Pattern<Tag> {
    flatten(sequence(vec![
        only_chars(LETTERS, false),
        only_chars(NAME_CHARS, true),
    ]))
}

/* ===================== Statements ===================== */

fn statement_list(code_block: &Pattern<Tag>) -> Pattern<Tag> {
    let statement = statement(code_block);
    list(statement.clone(), prefixed(line_break(), statement))
}

fn statement(code_block: &Pattern<Tag>) -> Pattern<Tag> {
    let optional_block = tagged(vec![
        (Tag::Block, prefixed(spaces_or_newlines(), code_block.clone())),
        (Tag::NoBlock, literal("")),
    ]);

    let store = fields(
        vec![maybe_spaces(), literal("->"), spaces(), var_name()],
        &[("var", 3)],
    );
    let fetch = fields(
        vec![maybe_spaces(), var_name(), spaces(), literal("->")],
        &[("var", 1)],
    );
    let for_each_paragraph = fields(
        vec![
            maybe_spaces(),
            literal("for"),
            spaces(),
            literal("each"),
            spaces(),
            literal("para"),
            spaces_or_newlines(),
            code_block.clone(),
        ],
        &[("block", 7)],
    );
    let for_each_line = fields(
        vec![
            maybe_spaces(),
            literal("for"),
            spaces(),
            literal("each"),
            spaces_or_newlines(),
            code_block.clone(),
        ],
        &[("block", 5)],
    );

    let sql_query = |opening: &'static str| {
        fields(
            vec![
                maybe_spaces(),
                literal(opening),
                string_content(),
                literal("\""),
                optional_block.clone(),
            ],
            &[("query", 2), ("block", 4)],
        )
    };
    let sql_register = |keyword: &'static str| {
        fields(
            vec![maybe_spaces(), literal(keyword), optional_block.clone()],
            &[("block", 2)],
        )
    };

    tagged(vec![
        (Tag::Fetch, fetch),
        (Tag::Store, store),
        (Tag::ForEachParagraph, for_each_paragraph),
        (Tag::ForEachLine, for_each_line),
        (Tag::Ask, ask()),
        (Tag::SqlMutatingQuery, sql_query("SQL!\"")),
        (Tag::SqlReadOnlyQuery, sql_query("SQL\"")),
        (Tag::SqlMutating, sql_register("SQL!")),
        (Tag::SqlReadOnly, sql_register("SQL")),
        (Tag::Branch, branch(code_block)),
        (
            Tag::Format,
            fields([vec![maybe_spaces()], quoted()].concat(), &[("template", 2)]),
        ),
        (
            Tag::Call,
            fields(
                vec![maybe_spaces(), any_char_but("\n}{#", false)],
                &[("name", 1)],
            ),
        ),
        (Tag::BlankLine, literal("")),
    ])
}

fn ask() -> Pattern<Tag> {
    let question = fields(
        vec![
            maybe_spaces(),
            any_char_but("\n}{#->", false),
            literal("->"),
            spaces(),
            var_name(),
        ],
        &[("question", 1), ("var", 4)],
    );
    let questions = list(question.clone(), prefixed(line_break(), question));
    fields(
        vec![
            maybe_spaces(),
            literal("ask"),
            spaces(),
            literal("{"),
            spaces_or_newlines(),
            questions,
            spaces_or_newlines(),
            literal("}"),
        ],
        &[("questions", 5)],
    )
}

fn branch(code_block: &Pattern<Tag>) -> Pattern<Tag> {
    let case = fields(
        [
            vec![maybe_spaces()],
            quoted(),
            vec![spaces_or_newlines(), code_block.clone()],
        ]
        .concat(),
        &[("label", 2), ("block", 5)],
    );
    let cases = list(
        case.clone(),
        prefixed(only_chars(" \n", false), case),
    );
    let default = tagged(vec![
        (
            Tag::Default,
            fields(vec![spaces_or_newlines(), code_block.clone()], &[("block", 1)]),
        ),
        (Tag::NoDefault, literal("")),
    ]);
    fields(
        vec![
            maybe_spaces(),
            literal("case"),
            spaces(),
            literal("{"),
            spaces_or_newlines(),
            cases,
            spaces_or_newlines(),
            literal("}"),
            default,
        ],
        &[("cases", 5), ("default", 8)],
    )
}

/* ===================== LLM Procedures ===================== */

fn llm_body() -> Pattern<Tag> {
    // A section line: empty, or not starting with '#'; always newline-terminated
    let line = flatten(sequence(vec![
        one_of(vec![
            sequence(vec![any_char_but("#\n", false), any_char_but("\n", true)]),
            literal(""),
        ]),
        literal("\n"),
    ]));
    let section_text = flatten(list(line.clone(), line));

    let system = fields(
        vec![literal("## System\n\n"), section_text.clone()],
        &[("text", 1)],
    );
    let prompt = fields(vec![literal("## Prompt\n\n"), section_text], &[("text", 1)]);

    let message = tagged(vec![
        (Tag::User, prefixed(literal("U: "), any_char_but("\n", false))),
        (
            Tag::Assistant,
            prefixed(literal("A: "), any_char_but("\n", false)),
        ),
        (Tag::Blank, literal("")),
    ]);
    let history = prefixed(
        literal("## History\n\n"),
        list(message.clone(), prefixed(literal("\n"), message)),
    );

    let section = tagged(vec![
        (Tag::SystemSection, system),
        (Tag::PromptSection, prompt),
        (Tag::HistorySection, history),
    ]);

    fields(
        vec![
            literal("Model:"),
            maybe_spaces(),
            any_char_but("\n ", false),
            spaces_or_newlines(),
            list(section.clone(), section),
        ],
        &[("model", 2), ("sections", 4)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement_tags(grammar: &Grammar, body: &str) -> Vec<Tag> {
        let source = format!("# main\n\n{}\n", body);
        let parsed = grammar.parse_program(&source).expect("program should parse");
        let mut procs = parsed.into_seq().unwrap();
        let mut proc = procs.remove(0).into_fields().unwrap();
        let (tag, statements) = proc.take("body").unwrap().into_tagged().unwrap();
        assert_eq!(tag, Tag::StatementBody);
        statements
            .into_seq()
            .unwrap()
            .into_iter()
            .map(|s| s.into_tagged().unwrap().0)
            .filter(|t| *t != Tag::BlankLine)
            .collect()
    }

    #[test]
    fn test_fetch_and_store_win_over_call() {
        let g = Grammar::new();
        assert_eq!(statement_tags(&g, "x ->"), vec![Tag::Fetch]);
        assert_eq!(statement_tags(&g, "-> x"), vec![Tag::Store]);
        assert_eq!(statement_tags(&g, "summarize text"), vec![Tag::Call]);
    }

    #[test]
    fn test_sql_forms_longest_prefix_first() {
        let g = Grammar::new();
        assert_eq!(
            statement_tags(&g, "SQL!\"delete from t\"\nSQL\"select 1\"\nSQL!\nSQL"),
            vec![
                Tag::SqlMutatingQuery,
                Tag::SqlReadOnlyQuery,
                Tag::SqlMutating,
                Tag::SqlReadOnly
            ]
        );
    }

    #[test]
    fn test_for_each_para_before_for_each() {
        let g = Grammar::new();
        assert_eq!(
            statement_tags(&g, "for each para {\n}\nfor each {\n}"),
            vec![Tag::ForEachParagraph, Tag::ForEachLine]
        );
    }

    #[test]
    fn test_trailing_spaces_on_statement_lines() {
        let g = Grammar::new();
        assert_eq!(statement_tags(&g, "-> x   \nx ->  "), vec![Tag::Store, Tag::Fetch]);
    }

    #[test]
    fn test_unescape() {
        let g = Grammar::new();
        assert_eq!(g.unescape(r#"say \"hi\" \\ ok"#).unwrap(), r#"say "hi" \ ok"#);
        assert!(g.unescape("bare \" quote").is_err());
    }

    #[test]
    fn test_unescape_escape_round_trip() {
        let g = Grammar::new();
        for literal in [r#"plain"#, r#"a \"quoted\" word"#, r#"back\\slash"#, r#"\\\""#, "multi\nline"] {
            let semantic = g.unescape(literal).unwrap();
            let escaped = crate::interpreter::text::escape(&semantic);
            assert_eq!(g.unescape(&escaped).unwrap(), semantic, "literal {:?}", literal);
        }
    }

    #[test]
    fn test_syntax_error_position() {
        let g = Grammar::new();
        let err = g
            .parse_program("# main\n\nfor each {\n  -> x\n")
            .unwrap_err();
        // The unclosed block leaves `for each ` to the call catch-all; parsing
        // stops at the brace
        assert_eq!((err.line, err.column), (3, 10));
        assert_eq!(err.snippet, "{");
    }
}
