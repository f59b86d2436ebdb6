use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::interpreter::executor::{disassemble, ByteCode, REGISTER};
use crate::interpreter::semantic_validator::stub_procedure;
use crate::interpreter::{Collaborators, CompiledProgram, Machine, Program};
use crate::llm::{CachingRunner, MemoryResponseStore, ModelRunner, OllamaBackend, ResponseStore, SqliteResponseStore};
use crate::prompter::LinePrompter;
use crate::sql::{NoDatabase, QueryExecutor, SqliteExecutor};

#[derive(Parser)]
#[command(name = "procflow")]
#[command(about = "Run text-file procedures that mix plain steps, SQL and language-model calls", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Query database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Response cache database URL
    #[arg(long, global = true)]
    pub cache_url: Option<String>,

    /// ssh host running the model
    #[arg(long, global = true)]
    pub llm_host: Option<String>,

    /// Log every variable access, call and query
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program and print the final prompt value
    Run(RunArgs),

    /// Report procedures that are called but never defined
    Check {
        /// Program file
        #[arg(default_value = "workflow.md")]
        program: PathBuf,

        /// Append stub LLM procedures for every undefined name
        #[arg(long)]
        add_undefined: bool,
    },

    /// Print the compiled bytecode of every procedure
    Disasm {
        /// Program file
        #[arg(default_value = "workflow.md")]
        program: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct RunArgs {
    /// Program file
    #[arg(default_value = "workflow.md")]
    pub program: PathBuf,

    /// Procedure to start at (default: the first one)
    #[arg(short, long)]
    pub procedure: Option<String>,

    /// Read the initial prompt from a file instead of stdin
    #[arg(short, long, conflicts_with = "no_input")]
    pub input_file: Option<PathBuf>,

    /// Start with an empty prompt
    #[arg(long)]
    pub no_input: bool,

    /// Write the machine state as JSON to this file when the run ends
    #[arg(long)]
    pub dump_state: Option<PathBuf>,
}

/// Run the CLI by parsing process arguments
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli)
}

/// Run the CLI with provided arguments
pub fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli)
}

fn run_cli_with_args(cli: Cli) -> Result<()> {
    init_tracing(cli.verbose);

    // Load configuration before touching any program so errors show first
    let config = Config::builder()
        .config_path(cli.config)
        .database_url(cli.database_url)
        .cache_url(cli.cache_url)
        .llm_host(cli.llm_host)
        .build()
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Run(args) => {
            let output = run_program(&config, args)?;
            println!("{}", output);
        }

        Commands::Check {
            program,
            add_undefined,
        } => {
            let loaded = load_program(&program)?;
            let undefined = loaded.undefined_procedures();
            if undefined.is_empty() {
                println!("All procedures are defined");
                return Ok(());
            }

            for name in &undefined {
                println!("{}", name);
            }
            if add_undefined {
                let stubs: String = undefined
                    .iter()
                    .map(|name| format!("\n{}", stub_procedure(name)))
                    .collect();
                append_to_program(&program, &stubs)?;
                eprintln!("Added {} stub procedure(s) to {}", undefined.len(), program.display());
            }
            std::process::exit(1);
        }

        Commands::Disasm { program } => {
            let loaded = load_program(&program)?;
            let compiled = loaded.compile().context("Failed to compile program")?;
            for name in &compiled.order {
                if let Some(code) = compiled.get(name) {
                    println!("# {}", name);
                    print!("{}", disassemble(code));
                    println!();
                }
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/* ===================== Run ===================== */

fn run_program(config: &Config, args: RunArgs) -> Result<String> {
    let program = load_program(&args.program)?;
    // Only fatal if such a call is reached
    if let Err(err) = program.validate() {
        warn!(%err, "program may fail");
    }
    let compiled = program.compile().context("Failed to compile program")?;

    let input = read_input(&args)?;
    let collaborators = collaborators(config, &compiled)?;

    let mut machine = Machine::new(compiled, collaborators);
    machine.set_var(REGISTER, input);
    info!(program = %args.program.display(), "running program");
    let result = machine.run(args.procedure.as_deref());

    if let Some(path) = &args.dump_state {
        if let Err(err) = write_state(&machine, path) {
            // The run's own error wins
            if result.is_ok() {
                return Err(err);
            }
            warn!("state dump failed: {:#}", err);
        }
    }

    Ok(result?)
}

fn write_state(machine: &Machine, path: &Path) -> Result<()> {
    let state = serde_json::to_string_pretty(&machine.snapshot())?;
    fs::write(path, state).with_context(|| format!("Failed to write state to {}", path.display()))
}

/// Real collaborators, opening each database only when the program can
/// reach it.
fn collaborators(config: &Config, compiled: &CompiledProgram) -> Result<Collaborators> {
    let uses = |pred: fn(&ByteCode) -> bool| {
        compiled.code.values().any(|code| code.iter().any(pred))
    };

    let queries: Box<dyn QueryExecutor> =
        if uses(|op| matches!(op, ByteCode::PushSqlIterator { .. })) {
            let executor = SqliteExecutor::connect(&config.database.url)
                .with_context(|| format!("Failed to open database {}", config.database.url))?;
            Box::new(executor)
        } else {
            Box::new(NoDatabase)
        };

    let models: Box<dyn ModelRunner> = {
        let store: Box<dyn ResponseStore> = if uses(|op| matches!(op, ByteCode::CallModel { .. })) {
            let store = SqliteResponseStore::connect(&config.cache.url)
                .with_context(|| format!("Failed to open response cache {}", config.cache.url))?;
            Box::new(store)
        } else {
            Box::new(MemoryResponseStore::new())
        };
        let backend = match &config.llm.host {
            Some(host) => OllamaBackend::remote(&config.llm.command, host),
            None => OllamaBackend::local(&config.llm.command),
        };
        Box::new(CachingRunner::new(Box::new(backend), store))
    };

    Ok(Collaborators {
        queries,
        models,
        prompter: Box::new(LinePrompter::stdio()),
    })
}

fn read_input(args: &RunArgs) -> Result<String> {
    if args.no_input {
        return Ok(String::new());
    }
    if let Some(path) = &args.input_file {
        return fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display()));
    }

    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        // Nothing piped in; keep the terminal free for `ask`
        return Ok(String::new());
    }
    let mut input = String::new();
    stdin
        .read_to_string(&mut input)
        .context("Failed to read input from stdin")?;
    Ok(input)
}

/* ===================== Helpers ===================== */

fn load_program(path: &Path) -> Result<Program> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read program {}", path.display()))?;
    Program::parse(&source).with_context(|| format!("Failed to load program {}", path.display()))
}

fn append_to_program(path: &Path, text: &str) -> Result<()> {
    let mut source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read program {}", path.display()))?;
    if !source.ends_with('\n') {
        source.push('\n');
    }
    source.push_str(text);
    fs::write(path, source).with_context(|| format!("Failed to write program {}", path.display()))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Logs go to stderr; stdout carries only the result
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
