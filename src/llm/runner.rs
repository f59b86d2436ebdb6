//! Cached model runner

use tracing::{debug, info};

use super::cache::ResponseStore;
use super::keys::{input_hash, model_keys, modelfile};
use super::ollama::ModelBackend;
use super::{Inputs, ModelError, ModelRunner};
use crate::interpreter::ast::LlmProcedure;

pub struct CachingRunner {
    backend: Box<dyn ModelBackend>,
    store: Box<dyn ResponseStore>,
    checked: bool,
}

impl CachingRunner {
    pub fn new(backend: Box<dyn ModelBackend>, store: Box<dyn ResponseStore>) -> Self {
        CachingRunner {
            backend,
            store,
            checked: false,
        }
    }

    /// Prepare the cache tables and verify the backend, once.
    fn check(&mut self) -> Result<(), ModelError> {
        if self.checked {
            return Ok(());
        }
        self.store.prepare()?;
        self.backend.check()?;
        self.checked = true;
        Ok(())
    }
}

impl ModelRunner for CachingRunner {
    fn run(&mut self, procedure: &LlmProcedure, inputs: &Inputs) -> Result<String, ModelError> {
        self.check()?;
        let hash = input_hash(inputs);
        let keys = model_keys(procedure);

        if !self.store.has_model_file(&keys.model_file_id)? {
            self.backend
                .ensure_model(&keys.model_file_id, &modelfile(procedure))?;
            self.store.record_model(&keys, procedure)?;
        }
        self.store.record_name(&keys.model_id, &procedure.name)?;

        if let Some(cached) = self.store.lookup(&keys.model_id, &hash)? {
            let cached = cached.trim();
            if !cached.is_empty() {
                debug!(procedure = %procedure.name, "cache hit");
                return Ok(cached.to_string());
            }
        }

        let prompt = procedure
            .prompt
            .render(|name| inputs.get(name).cloned().unwrap_or_default());
        info!(procedure = %procedure.name, model = %procedure.model, "running model");
        let response = self.backend.generate(&keys.model_file_id, &prompt)?;
        let response = response.trim();
        if response.is_empty() {
            return Err(ModelError::EmptyResponse {
                procedure: procedure.name.clone(),
                prompt,
            });
        }
        self.store.save(&keys.model_id, &hash, inputs, response)?;
        Ok(response.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::ast::Template;
    use crate::llm::cache::{MemoryResponseStore, SqliteResponseStore};
    use maplit::btreemap;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Calls {
        checks: usize,
        created: Vec<String>,
        prompts: Vec<String>,
    }

    /// Backend that answers with the prompt upper-cased and records calls.
    struct EchoBackend {
        calls: Rc<RefCell<Calls>>,
        reply: Option<String>,
    }

    impl ModelBackend for EchoBackend {
        fn check(&mut self) -> Result<(), ModelError> {
            self.calls.borrow_mut().checks += 1;
            Ok(())
        }

        fn ensure_model(&mut self, model_file_id: &str, _modelfile: &str) -> Result<(), ModelError> {
            self.calls.borrow_mut().created.push(model_file_id.to_string());
            Ok(())
        }

        fn generate(&mut self, _model_file_id: &str, prompt: &str) -> Result<String, ModelError> {
            self.calls.borrow_mut().prompts.push(prompt.to_string());
            Ok(self
                .reply
                .clone()
                .unwrap_or_else(|| format!("  {}\n", prompt.to_uppercase())))
        }
    }

    fn procedure() -> LlmProcedure {
        LlmProcedure {
            name: "shout".into(),
            model: "llama3.2".into(),
            system: "Shout.".into(),
            prompt: Template::parse("say {prompt}"),
            history: Vec::new(),
        }
    }

    fn runner(store: Box<dyn ResponseStore>, reply: Option<&str>) -> (CachingRunner, Rc<RefCell<Calls>>) {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let backend = EchoBackend {
            calls: Rc::clone(&calls),
            reply: reply.map(str::to_string),
        };
        (CachingRunner::new(Box::new(backend), store), calls)
    }

    #[test]
    fn test_identical_inputs_reach_the_model_once() {
        let (mut runner, calls) = runner(Box::new(MemoryResponseStore::new()), None);
        let inputs = btreemap! { "prompt".to_string() => "hi".to_string() };

        assert_eq!(runner.run(&procedure(), &inputs).unwrap(), "SAY HI");
        assert_eq!(runner.run(&procedure(), &inputs).unwrap(), "SAY HI");

        let calls = calls.borrow();
        assert_eq!(calls.prompts, vec!["say hi"]);
        assert_eq!(calls.checks, 1);
        assert_eq!(calls.created.len(), 1);
    }

    #[test]
    fn test_different_inputs_miss_the_cache() {
        let (mut runner, calls) = runner(Box::new(MemoryResponseStore::new()), None);
        runner
            .run(&procedure(), &btreemap! { "prompt".to_string() => "a".to_string() })
            .unwrap();
        runner
            .run(&procedure(), &btreemap! { "prompt".to_string() => "b".to_string() })
            .unwrap();
        assert_eq!(calls.borrow().prompts, vec!["say a", "say b"]);
        // Same model file both times
        assert_eq!(calls.borrow().created.len(), 1);
    }

    #[test]
    fn test_sqlite_cache_survives_runner() {
        let path = std::env::temp_dir().join(format!("procflow-cache-{}.db", std::process::id()));
        let url = format!("sqlite://{}", path.display());
        let inputs = btreemap! { "prompt".to_string() => "x".to_string() };

        {
            let store = SqliteResponseStore::connect(&url).unwrap();
            let (mut first, calls) = runner(Box::new(store), None);
            assert_eq!(first.run(&procedure(), &inputs).unwrap(), "SAY X");
            assert_eq!(calls.borrow().prompts.len(), 1);
        }

        let store = SqliteResponseStore::connect(&url).unwrap();
        let (mut second, calls) = runner(Box::new(store), None);
        assert_eq!(second.run(&procedure(), &inputs).unwrap(), "SAY X");
        drop(second);
        std::fs::remove_file(&path).unwrap();
        assert!(calls.borrow().prompts.is_empty());
    }

    #[test]
    fn test_empty_response_is_an_error() {
        let (mut runner, _) = runner(Box::new(MemoryResponseStore::new()), Some(" \n"));
        let err = runner
            .run(&procedure(), &btreemap! { "prompt".to_string() => "x".to_string() })
            .unwrap_err();
        assert!(matches!(err, ModelError::EmptyResponse { ref prompt, .. } if prompt == "say x"));
    }
}
