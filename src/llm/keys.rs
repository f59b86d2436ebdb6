//! Cache keys and model files
//!
//! Keys are SHA-256 digests of collapsed text: every run of characters other
//! than ASCII letters, digits and `{}-_` becomes one space, so whitespace and
//! punctuation edits do not invalidate cached responses.

use sha2::{Digest, Sha256};

use super::Inputs;
use crate::interpreter::ast::LlmProcedure;
use crate::interpreter::text::collapse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelKeys {
    /// Identifies the whole procedure, prompt included
    pub model_id: String,
    /// Identifies the model file: model, system text and history
    pub model_file_id: String,
}

fn keep_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "{}-_".contains(c)
}

fn sha256_hex(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn flat_history(procedure: &LlmProcedure) -> String {
    procedure
        .history
        .iter()
        .map(|m| format!("{}:{}", m.role.as_str(), m.text))
        .collect::<Vec<_>>()
        .join(":")
}

pub fn model_keys(procedure: &LlmProcedure) -> ModelKeys {
    let history = flat_history(procedure);
    let full = format!(
        "{}{}{}{}",
        procedure.model,
        procedure.system,
        procedure.prompt.source(),
        history
    );
    let file = format!("{}{}{}", procedure.model, procedure.system, history);
    ModelKeys {
        model_id: sha256_hex(&collapse(&full, keep_key_char)),
        model_file_id: sha256_hex(&collapse(&file, keep_key_char)),
    }
}

/// Hash of the resolved prompt inputs: sorted `key:value` pairs with values
/// collapsed to alphanumeric words.
pub fn input_hash(inputs: &Inputs) -> String {
    let mut parts = Vec::with_capacity(inputs.len() * 2);
    for (key, value) in inputs {
        parts.push(key.clone());
        parts.push(collapse(value, |c| c.is_ascii_alphanumeric()));
    }
    sha256_hex(&parts.join(":"))
}

/// Ollama model file for the procedure's model, system text and history.
pub fn modelfile(procedure: &LlmProcedure) -> String {
    let messages: Vec<String> = procedure
        .history
        .iter()
        .map(|m| format!("MESSAGE {} {}", m.role.as_str(), m.text))
        .collect();
    format!(
        "FROM {}\nSYSTEM \"\"\"{}\"\"\"\n{}\n",
        procedure.model,
        procedure.system,
        messages.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::ast::{Message, Role, Template};
    use maplit::btreemap;

    fn procedure(prompt: &str, system: &str) -> LlmProcedure {
        LlmProcedure {
            name: "summarize".into(),
            model: "llama3.2".into(),
            system: system.into(),
            prompt: Template::parse(prompt),
            history: vec![Message {
                role: Role::User,
                text: "hi".into(),
            }],
        }
    }

    #[test]
    fn test_keys_ignore_punctuation_and_spacing() {
        let a = model_keys(&procedure("Summarize {prompt}", "Be brief."));
        let b = model_keys(&procedure("Summarize:   {prompt}", "Be brief!"));
        assert_eq!(a, b);
        assert_eq!(a.model_id.len(), 64);
    }

    #[test]
    fn test_model_file_id_ignores_prompt() {
        let a = model_keys(&procedure("one {prompt}", "sys"));
        let b = model_keys(&procedure("two {prompt}", "sys"));
        assert_ne!(a.model_id, b.model_id);
        assert_eq!(a.model_file_id, b.model_file_id);

        let c = model_keys(&procedure("one {prompt}", "other sys"));
        assert_ne!(a.model_file_id, c.model_file_id);
    }

    #[test]
    fn test_input_hash_is_order_independent_and_normalized() {
        let a = input_hash(&btreemap! {
            "b".to_string() => "Hello, world".to_string(),
            "a".to_string() => "x".to_string(),
        });
        let b = input_hash(&btreemap! {
            "a".to_string() => "x".to_string(),
            "b".to_string() => "Hello  world".to_string(),
        });
        assert_eq!(a, b);
        let c = input_hash(&btreemap! { "a".to_string() => "y".to_string() });
        assert_ne!(a, c);
    }

    #[test]
    fn test_modelfile_layout() {
        assert_eq!(
            modelfile(&procedure("{prompt}", "Be brief.")),
            "FROM llama3.2\nSYSTEM \"\"\"Be brief.\"\"\"\nMESSAGE user hi\n"
        );
    }
}
