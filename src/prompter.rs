//! Interactive prompter for `ask` statements

use std::io::{self, BufRead, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("input closed while waiting for an answer to '{question}'")]
    Closed { question: String },
    #[error("expected {expected} answer(s), got {got}")]
    AnswerCount { expected: usize, got: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One question, with the variable's current value offered as the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuestion {
    pub variable: String,
    pub text: String,
    pub default: String,
}

pub trait Prompter {
    /// Ask every question in order and return the raw answers, one per
    /// question. Blank answers are returned as-is; the caller applies the
    /// default.
    fn ask(&mut self, questions: &[PendingQuestion]) -> Result<Vec<String>, PromptError>;
}

/// Line-oriented prompter: writes `question (default): ` and reads one line.
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        LinePrompter { input, output }
    }
}

impl LinePrompter<io::StdinLock<'static>, io::Stderr> {
    /// Read answers from stdin; questions go to stderr so stdout only carries
    /// the final result.
    pub fn stdio() -> Self {
        LinePrompter::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> Prompter for LinePrompter<R, W> {
    fn ask(&mut self, questions: &[PendingQuestion]) -> Result<Vec<String>, PromptError> {
        let mut answers = Vec::with_capacity(questions.len());
        for question in questions {
            if question.default.is_empty() {
                write!(self.output, "{}: ", question.text)?;
            } else {
                write!(self.output, "{} ({}): ", question.text, question.default)?;
            }
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(PromptError::Closed {
                    question: question.text.clone(),
                });
            }
            answers.push(line.trim().to_string());
        }
        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn question(text: &str, default: &str) -> PendingQuestion {
        PendingQuestion {
            variable: "v".into(),
            text: text.into(),
            default: default.into(),
        }
    }

    #[test]
    fn test_shows_default_and_trims_answers() {
        let mut out = Vec::new();
        let mut prompter = LinePrompter::new(Cursor::new("  Ada \n\n"), &mut out);
        let answers = prompter
            .ask(&[question("Name", ""), question("Town", "Paris")])
            .unwrap();
        assert_eq!(answers, vec!["Ada".to_string(), String::new()]);
        drop(prompter);
        assert_eq!(String::from_utf8(out).unwrap(), "Name: Town (Paris): ");
    }

    #[test]
    fn test_closed_input_is_an_error() {
        let mut prompter = LinePrompter::new(Cursor::new(""), Vec::new());
        let err = prompter.ask(&[question("Name", "")]).unwrap_err();
        assert!(matches!(err, PromptError::Closed { question } if question == "Name"));
    }
}
