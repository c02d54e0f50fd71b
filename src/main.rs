use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value as Json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use stencil::compiler::{self, Strategy, format_program};
use stencil::config::StencilConfig;
use stencil::registry::Bundle;
use stencil::vm::{Verifier, bytecode};

// Wrapper type for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    Lazy,
    Eager,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Lazy => Strategy::Lazy,
            StrategyArg::Eager => Strategy::Eager,
        }
    }
}

#[derive(Parser)]
#[command(name = "stencil")]
#[command(about = "A template compiler and rendering VM", long_about = None)]
struct Cli {
    /// Log filter (e.g. `debug`, `stencil::vm=trace`); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Config file (defaults to ./stencil.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a template bundle and verify the linked program
    Compile {
        /// The bundle file (JSON)
        bundle: PathBuf,

        /// Write the binary program to this file (eager strategy only)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Block resolution strategy (lazy, eager)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Print a disassembly of the program to stdout
        #[arg(long)]
        dump_bytecode: bool,
    },
    /// Compile a template bundle and render it to HTML
    Render {
        /// The bundle file (JSON)
        bundle: PathBuf,

        /// Input data bound to `this` (JSON, defaults to `{}`)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Block resolution strategy (lazy, eager)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },
    /// Disassemble a serialized program
    Dump {
        /// The program file written by `compile -o`
        program: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match StencilConfig::discover(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if cli.log_level.is_some() {
        config.log_level = cli.log_level;
    }
    init_logging(config.log_level.as_deref());

    let result = match cli.command {
        Commands::Compile {
            bundle,
            output,
            strategy,
            dump_bytecode,
        } => {
            if let Some(strategy) = strategy {
                config.compiler.strategy = strategy.into();
            }
            compile(&bundle, output.as_deref(), dump_bytecode, &config)
        }
        Commands::Render {
            bundle,
            data,
            strategy,
        } => {
            if let Some(strategy) = strategy {
                config.compiler.strategy = strategy.into();
            }
            render(&bundle, data.as_deref(), &config)
        }
        Commands::Dump { program } => dump(&program),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn compile(
    path: &Path,
    output: Option<&Path>,
    dump_bytecode: bool,
    config: &StencilConfig,
) -> Result<(), String> {
    let bundle = Bundle::load(path).map_err(|e| e.to_string())?;
    let compiled = compiler::compile_bundle(&bundle, &config.compiler)?;

    if dump_bytecode {
        print!("{}", format_program(&compiled.program));
    }

    match output {
        Some(output) => {
            let bytes = bytecode::serialize(&compiled.program).map_err(|e| e.to_string())?;
            fs::write(output, bytes)
                .map_err(|e| format!("cannot write {}: {}", output.display(), e))?;
        }
        None if !dump_bytecode => {
            println!(
                "{}: entry {}, {} blocks, {} words",
                path.display(),
                compiled.entry,
                compiled.program.heap.handles().count(),
                compiled.program.heap.words().len()
            );
        }
        None => {}
    }

    Ok(())
}

fn render(path: &Path, data: Option<&Path>, config: &StencilConfig) -> Result<(), String> {
    let bundle = Bundle::load(path).map_err(|e| e.to_string())?;
    let data = match data {
        Some(data) => {
            let source = fs::read_to_string(data)
                .map_err(|e| format!("cannot read {}: {}", data.display(), e))?;
            serde_json::from_str(&source)
                .map_err(|e| format!("invalid data {}: {}", data.display(), e))?
        }
        None => Json::Object(Default::default()),
    };

    let html = compiler::render_bundle(&bundle, data, config)?;
    println!("{}", html);
    Ok(())
}

fn dump(path: &Path) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let program = bytecode::deserialize(&bytes).map_err(|e| e.to_string())?;
    Verifier::new()
        .verify_all(&program)
        .map_err(|e| format!("verification failed: {}", e))?;
    print!("{}", format_program(&program));
    Ok(())
}
