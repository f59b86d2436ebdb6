//! Parser combinators
//!
//! A small PEG-style combinator set over `&str` cursors. Every pattern either
//! matches a prefix of its input, returning a [`ParseResult`] and the
//! remainder, or reports absence and hands the input back untouched. Absence
//! is an ordinary outcome: it is what lets [`one_of`] and [`tagged`] try
//! their options in order without any error plumbing.
//!
//! There is no backtracking across a sequence. Once a piece of a sequence has
//! matched, a later failure fails the whole sequence; the caller's next
//! alternative then starts again from the original position. Alternatives are
//! never ranked, the first one that matches wins, so the order in which a
//! grammar lists them is part of its meaning.

use std::cell::OnceCell;
use std::rc::{Rc, Weak};
use thiserror::Error;

/* ===================== Parse Results ===================== */

/// Generic parse tree produced by the combinators.
///
/// `T` is the grammar's closed tag type, attached by [`tagged`] alternatives.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult<T> {
    Text(String),
    Seq(Vec<ParseResult<T>>),
    Fields(Fields<T>),
    Tagged(T, Box<ParseResult<T>>),
}

/// Named results exposed by a [`fields`] sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Fields<T>(Vec<(&'static str, ParseResult<T>)>);

impl<T> Fields<T> {
    /// Remove and return the named field.
    pub fn take(&mut self, name: &str) -> Option<ParseResult<T>> {
        let idx = self.0.iter().position(|(key, _)| *key == name)?;
        Some(self.0.remove(idx).1)
    }
}

impl<T> ParseResult<T> {
    /// Flatten to text. Sequences concatenate their parts; named fields and
    /// tagged nodes carry no text of their own.
    pub fn as_text(&self) -> String {
        match self {
            ParseResult::Text(text) => text.clone(),
            ParseResult::Seq(items) => items.iter().map(ParseResult::as_text).collect(),
            ParseResult::Fields(_) | ParseResult::Tagged(..) => String::new(),
        }
    }

    pub fn into_seq(self) -> Option<Vec<ParseResult<T>>> {
        match self {
            ParseResult::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_fields(self) -> Option<Fields<T>> {
        match self {
            ParseResult::Fields(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn into_tagged(self) -> Option<(T, ParseResult<T>)> {
        match self {
            ParseResult::Tagged(tag, inner) => Some((tag, *inner)),
            _ => None,
        }
    }
}

/* ===================== Errors ===================== */

/// Input that a pattern could not consume completely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error at line {line}, column {column}: unexpected {snippet:?}")]
pub struct SyntaxError {
    /// Byte offset of the first unconsumed character
    pub offset: usize,
    /// 1-based line
    pub line: usize,
    /// 1-based column, in characters
    pub column: usize,
    /// The rest of the offending line, shortened
    pub snippet: String,
}

impl SyntaxError {
    fn at(source: &str, offset: usize) -> Self {
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        let snippet = source[offset..]
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(40)
            .collect();
        SyntaxError {
            offset,
            line,
            column,
            snippet,
        }
    }
}

/// Misuse of a recursive placeholder while wiring a grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("recursive pattern is already bound")]
pub struct AlreadyBound;

/* ===================== Patterns ===================== */

/// An immutable, cheaply clonable parsing rule.
pub struct Pattern<T>(Rc<Rule<T>>);

impl<T> Clone for Pattern<T> {
    fn clone(&self) -> Self {
        Pattern(Rc::clone(&self.0))
    }
}

enum Rule<T> {
    Literal(&'static str),
    Class { class: CharClass, empty_ok: bool },
    Sequence(Vec<Pattern<T>>),
    Fields {
        pieces: Vec<Pattern<T>>,
        names: Vec<(&'static str, usize)>,
    },
    OneOf(Vec<Pattern<T>>),
    Tagged(Vec<(T, Pattern<T>)>),
    List { first: Pattern<T>, rest: Pattern<T> },
    Prefixed { prefix: Pattern<T>, pattern: Pattern<T> },
    Flatten {
        pattern: Pattern<T>,
        replacements: Vec<(&'static str, &'static str)>,
    },
    Recursive(Rc<OnceCell<Weak<Rule<T>>>>),
}

#[derive(Debug, Clone, Copy)]
enum CharClass {
    Only(&'static str),
    AnyBut(&'static str),
    /// Multi-character sequences are tried before the exclusion class.
    AnyButOr(&'static str, &'static [&'static str]),
}

impl CharClass {
    /// Byte length of the longest run of input this class accepts.
    fn run_len(self, text: &str) -> usize {
        let mut consumed = 0;
        'scan: loop {
            let rest = &text[consumed..];
            if let CharClass::AnyButOr(_, sequences) = self {
                for seq in sequences {
                    if !seq.is_empty() && rest.starts_with(seq) {
                        consumed += seq.len();
                        continue 'scan;
                    }
                }
            }
            let Some(c) = rest.chars().next() else {
                break;
            };
            let accepted = match self {
                CharClass::Only(chars) => chars.contains(c),
                CharClass::AnyBut(chars) | CharClass::AnyButOr(chars, _) => !chars.contains(c),
            };
            if !accepted {
                break;
            }
            consumed += c.len_utf8();
        }
        consumed
    }
}

impl<T: Copy> Pattern<T> {
    fn new(rule: Rule<T>) -> Self {
        Pattern(Rc::new(rule))
    }

    /// Parse the whole input. Trailing whitespace is ignored; anything else
    /// left over is reported at the position where parsing stopped.
    pub fn parse_all(&self, text: &str) -> Result<ParseResult<T>, SyntaxError> {
        let (result, rest) = self.parse_partial(text);
        match result {
            Some(result) if rest.trim().is_empty() => Ok(result),
            _ => Err(SyntaxError::at(text, text.len() - rest.len())),
        }
    }

    /// Parse a prefix of the input.
    ///
    /// Returns the result (or `None` when the pattern does not match) and the
    /// unconsumed remainder. On `None` the remainder is the original input.
    pub fn parse_partial<'a>(&self, text: &'a str) -> (Option<ParseResult<T>>, &'a str) {
        parse_rule(&self.0, text)
    }
}

fn parse_rule<'a, T: Copy>(rule: &Rule<T>, text: &'a str) -> (Option<ParseResult<T>>, &'a str) {
    match rule {
        Rule::Literal(search) => match text.strip_prefix(search) {
            Some(rest) => (Some(ParseResult::Text((*search).to_string())), rest),
            None => (None, text),
        },

        Rule::Class { class, empty_ok } => {
            let len = class.run_len(text);
            if len == 0 && !empty_ok {
                return (None, text);
            }
            (Some(ParseResult::Text(text[..len].to_string())), &text[len..])
        }

        Rule::Sequence(pieces) => match parse_pieces(pieces, text) {
            Some((results, rest)) => (Some(ParseResult::Seq(results)), rest),
            None => (None, text),
        },

        Rule::Fields { pieces, names } => match parse_pieces(pieces, text) {
            Some((results, rest)) => {
                let mut slots: Vec<Option<ParseResult<T>>> = results.into_iter().map(Some).collect();
                let fields = names
                    .iter()
                    .filter_map(|(name, idx)| Some((*name, slots.get_mut(*idx)?.take()?)))
                    .collect();
                (Some(ParseResult::Fields(Fields(fields))), rest)
            }
            None => (None, text),
        },

        Rule::OneOf(options) => {
            for option in options {
                if let (Some(result), rest) = option.parse_partial(text) {
                    return (Some(result), rest);
                }
            }
            (None, text)
        }

        Rule::Tagged(options) => {
            for (tag, option) in options {
                if let (Some(result), rest) = option.parse_partial(text) {
                    return (Some(ParseResult::Tagged(*tag, Box::new(result))), rest);
                }
            }
            (None, text)
        }

        Rule::List { first, rest } => {
            let (Some(head), mut remaining) = first.parse_partial(text) else {
                return (Some(ParseResult::Seq(Vec::new())), text);
            };
            let mut items = vec![head];
            loop {
                match rest.parse_partial(remaining) {
                    // A repeat that consumes nothing would match forever
                    (Some(item), after) if after.len() < remaining.len() => {
                        items.push(item);
                        remaining = after;
                    }
                    _ => return (Some(ParseResult::Seq(items)), remaining),
                }
            }
        }

        Rule::Prefixed { prefix, pattern } => {
            let (Some(_), after_prefix) = prefix.parse_partial(text) else {
                return (None, text);
            };
            match pattern.parse_partial(after_prefix) {
                (Some(result), rest) => (Some(result), rest),
                (None, _) => (None, text),
            }
        }

        Rule::Flatten {
            pattern,
            replacements,
        } => match pattern.parse_partial(text) {
            (Some(result), rest) => {
                let mut flat = result.as_text();
                for (from, to) in replacements {
                    flat = flat.replace(from, to);
                }
                (Some(ParseResult::Text(flat)), rest)
            }
            (None, _) => (None, text),
        },

        Rule::Recursive(cell) => match cell.get().and_then(Weak::upgrade) {
            Some(target) => parse_rule(&target, text),
            None => {
                debug_assert!(false, "recursive pattern used before it was bound");
                (None, text)
            }
        },
    }
}

fn parse_pieces<'a, T: Copy>(
    pieces: &[Pattern<T>],
    text: &'a str,
) -> Option<(Vec<ParseResult<T>>, &'a str)> {
    let mut results = Vec::with_capacity(pieces.len());
    let mut rest = text;
    for piece in pieces {
        let (result, after) = piece.parse_partial(rest);
        results.push(result?);
        rest = after;
    }
    Some((results, rest))
}

/* ===================== Constructors ===================== */

/// Match an exact string.
pub fn literal<T: Copy>(search: &'static str) -> Pattern<T> {
    Pattern::new(Rule::Literal(search))
}

/// Match a run of characters drawn from `chars` (`*` when `empty_ok`, else `+`).
pub fn only_chars<T: Copy>(chars: &'static str, empty_ok: bool) -> Pattern<T> {
    Pattern::new(Rule::Class {
        class: CharClass::Only(chars),
        empty_ok,
    })
}

/// Match a run of characters not in `chars`.
pub fn any_char_but<T: Copy>(chars: &'static str, empty_ok: bool) -> Pattern<T> {
    Pattern::new(Rule::Class {
        class: CharClass::AnyBut(chars),
        empty_ok,
    })
}

/// Match a run of characters not in `exclude`, also accepting any of the
/// `include` sequences (checked first, in order) even when they start with an
/// excluded character.
pub fn include_exclude<T: Copy>(
    exclude: &'static str,
    include: &'static [&'static str],
    empty_ok: bool,
) -> Pattern<T> {
    Pattern::new(Rule::Class {
        class: CharClass::AnyButOr(exclude, include),
        empty_ok,
    })
}

/// Match every piece in order, keeping all results.
pub fn sequence<T: Copy>(pieces: Vec<Pattern<T>>) -> Pattern<T> {
    Pattern::new(Rule::Sequence(pieces))
}

/// Match every piece in order, exposing only the named pieces by index.
pub fn fields<T: Copy>(pieces: Vec<Pattern<T>>, names: &[(&'static str, usize)]) -> Pattern<T> {
    Pattern::new(Rule::Fields {
        pieces,
        names: names.to_vec(),
    })
}

/// First matching option wins.
pub fn one_of<T: Copy>(options: Vec<Pattern<T>>) -> Pattern<T> {
    Pattern::new(Rule::OneOf(options))
}

/// First matching option wins; its result is wrapped with the option's tag.
pub fn tagged<T: Copy>(options: Vec<(T, Pattern<T>)>) -> Pattern<T> {
    Pattern::new(Rule::Tagged(options))
}

/// Zero or more items: `first`, then any number of `rest`. The separator, if
/// any, belongs in `rest` (usually via [`prefixed`]).
pub fn list<T: Copy>(first: Pattern<T>, rest: Pattern<T>) -> Pattern<T> {
    Pattern::new(Rule::List { first, rest })
}

/// Match `prefix`, drop its result, and return the result of `pattern`.
pub fn prefixed<T: Copy>(prefix: Pattern<T>, pattern: Pattern<T>) -> Pattern<T> {
    Pattern::new(Rule::Prefixed { prefix, pattern })
}

/// Flatten the result of `pattern` to text.
pub fn flatten<T: Copy>(pattern: Pattern<T>) -> Pattern<T> {
    with_replacements(pattern, &[])
}

/// Flatten to text, then apply the replacements in order.
pub fn with_replacements<T: Copy>(
    pattern: Pattern<T>,
    replacements: &[(&'static str, &'static str)],
) -> Pattern<T> {
    Pattern::new(Rule::Flatten {
        pattern,
        replacements: replacements.to_vec(),
    })
}

/* ===================== Recursion ===================== */

/// Forward reference to a pattern that is built later.
///
/// The placeholder holds a weak link, so a grammar that refers to itself
/// through it does not keep itself alive. Whoever binds it must keep a strong
/// handle to the target for as long as the grammar is used.
pub struct Placeholder<T> {
    cell: Rc<OnceCell<Weak<Rule<T>>>>,
}

impl<T: Copy> Placeholder<T> {
    pub fn new() -> Self {
        Placeholder {
            cell: Rc::new(OnceCell::new()),
        }
    }

    /// A pattern that parses with whatever this placeholder is bound to.
    pub fn pattern(&self) -> Pattern<T> {
        Pattern::new(Rule::Recursive(Rc::clone(&self.cell)))
    }

    /// Tie the knot. A placeholder can only be bound once.
    pub fn bind(&self, target: &Pattern<T>) -> Result<(), AlreadyBound> {
        self.cell
            .set(Rc::downgrade(&target.0))
            .map_err(|_| AlreadyBound)
    }
}

impl<T: Copy> Default for Placeholder<T> {
    fn default() -> Self {
        Self::new()
    }
}
