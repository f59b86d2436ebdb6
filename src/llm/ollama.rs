//! Ollama backend, run as a local subprocess or on a remote host over ssh

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use tracing::{debug, info};

use super::ModelError;

/// Where models are created and run.
pub trait ModelBackend {
    /// Verify the backend is reachable. Called once before first use.
    fn check(&mut self) -> Result<(), ModelError>;

    /// Create the model `model_file_id` from `modelfile` unless it already
    /// exists on the backend.
    fn ensure_model(&mut self, model_file_id: &str, modelfile: &str) -> Result<(), ModelError>;

    /// Run the model on `prompt` and return its raw output.
    fn generate(&mut self, model_file_id: &str, prompt: &str) -> Result<String, ModelError>;
}

#[derive(Debug, Clone)]
pub struct OllamaBackend {
    /// The ollama executable
    command: String,
    /// ssh destination; `None` runs locally
    host: Option<String>,
}

impl OllamaBackend {
    pub fn local(command: impl Into<String>) -> Self {
        OllamaBackend {
            command: command.into(),
            host: None,
        }
    }

    pub fn remote(command: impl Into<String>, host: impl Into<String>) -> Self {
        OllamaBackend {
            command: command.into(),
            host: Some(host.into()),
        }
    }

    /// Build the process for `args`, wrapping it in ssh for remote hosts.
    fn command(&self, args: &[&str]) -> (Command, String) {
        let line = std::iter::once(self.command.as_str())
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        match &self.host {
            Some(host) => {
                let mut cmd = Command::new("ssh");
                cmd.arg(host).arg(&line);
                (cmd, format!("ssh {} {}", host, line))
            }
            None => {
                let mut cmd = Command::new(&self.command);
                cmd.args(args);
                (cmd, line)
            }
        }
    }

    fn model_file_path(&self, model_file_id: &str) -> PathBuf {
        match self.host {
            Some(_) => PathBuf::from(format!("/tmp/{}.txt", model_file_id)),
            None => std::env::temp_dir().join(format!("{}.txt", model_file_id)),
        }
    }

    fn upload(&self, path: &Path, modelfile: &str) -> Result<(), ModelError> {
        match &self.host {
            Some(host) => {
                let remote = format!("cat > {}", path.display());
                let mut cmd = Command::new("ssh");
                cmd.arg(host).arg(&remote);
                let label = format!("ssh {} {}", host, remote);
                checked(run(cmd, &label, Some(modelfile))?, &label)?;
                Ok(())
            }
            None => std::fs::write(path, modelfile).map_err(|source| ModelError::Spawn {
                command: format!("write {}", path.display()),
                source,
            }),
        }
    }
}

impl ModelBackend for OllamaBackend {
    fn check(&mut self) -> Result<(), ModelError> {
        let Some(host) = &self.host else {
            return Ok(());
        };
        let mut cmd = Command::new("ssh");
        cmd.arg(host).arg("echo hi");
        let output = run(cmd, &format!("ssh {} echo hi", host), None)?;
        if !output.status.success() {
            return Err(ModelError::HostUnreachable {
                host: host.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!(%host, "model host reachable");
        Ok(())
    }

    fn ensure_model(&mut self, model_file_id: &str, modelfile: &str) -> Result<(), ModelError> {
        let (cmd, label) = self.command(&["show", model_file_id]);
        if run(cmd, &label, None)?.status.success() {
            debug!(model_file_id, "model already exists");
            return Ok(());
        }

        let path = self.model_file_path(model_file_id);
        self.upload(&path, modelfile)?;
        let path = path.display().to_string();
        let (cmd, label) = self.command(&["create", model_file_id, "-f", &path]);
        checked(run(cmd, &label, None)?, &label)?;
        info!(model_file_id, "created model");
        Ok(())
    }

    fn generate(&mut self, model_file_id: &str, prompt: &str) -> Result<String, ModelError> {
        let (cmd, label) = self.command(&["run", model_file_id, "--nowordwrap"]);
        let output = checked(run(cmd, &label, Some(prompt))?, &label)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/* ===================== Process Helpers ===================== */

/// Run a process to completion, feeding `input` on stdin.
fn run(mut cmd: Command, label: &str, input: Option<&str>) -> Result<Output, ModelError> {
    debug!(command = label, "spawning");
    let spawn_error = |source| ModelError::Spawn {
        command: label.to_string(),
        source,
    };
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;

    // Write stdin from another thread so a chatty child cannot fill its
    // stdout pipe while we are still blocked writing
    let writer = match (child.stdin.take(), input) {
        (Some(mut stdin), Some(input)) => {
            let input = input.to_string();
            Some(thread::spawn(move || stdin.write_all(input.as_bytes())))
        }
        _ => None,
    };

    let output = child.wait_with_output().map_err(spawn_error)?;
    if let Some(writer) = writer {
        // A child that exits without reading its input closes the pipe; that
        // shows up in its exit status, not here
        let _ = writer.join();
    }
    Ok(output)
}

fn checked(output: Output, label: &str) -> Result<Output, ModelError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(ModelError::Command {
            command: label.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
