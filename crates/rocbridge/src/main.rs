use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rocbridge::{retain_host_symbols, CallReport, ForeignLibrary};
use rocbridge_abi::{alloc_stats, RocBytes, RocStr};
use rocbridge_boundary::config::parse_max_result_bytes;
use rocbridge_boundary::{Boundary, BoundaryConfig, CallError, ConfigError};
use rocbridge_contracts::{
    DEFAULT_ENTRY_NAME, DEFAULT_ENTRY_SYMBOL, DEFAULT_MODULE_NAME, ENV_LOG,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rocbridge")]
#[command(about = "Calls a compiled Roc entry point without letting it crash the host.")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Call the entry point once and print a JSON report.
    Call(CallArgs),
}

#[derive(Args)]
struct CallArgs {
    /// Shared library holding the compiled entry point.
    #[arg(long)]
    lib: PathBuf,

    #[arg(long, default_value = DEFAULT_ENTRY_SYMBOL)]
    symbol: String,

    /// Entry point name used in failure messages.
    #[arg(long, default_value = DEFAULT_ENTRY_NAME)]
    entry_name: String,

    /// Module name used in failure messages.
    #[arg(long, default_value = DEFAULT_MODULE_NAME)]
    module: String,

    /// Pass and return a byte list instead of a string.
    #[arg(long)]
    bytes: bool,

    #[arg(long, value_name = "BYTES", value_parser = parse_cli_max_result_bytes)]
    max_result_bytes: Option<usize>,

    /// Read the argument from a file.
    #[arg(long, conflicts_with = "text")]
    input: Option<PathBuf>,

    /// The argument itself.
    text: Option<String>,
}

fn parse_cli_max_result_bytes(raw: &str) -> Result<usize, ConfigError> {
    parse_max_result_bytes("--max-result-bytes", raw)
}

fn main() -> ExitCode {
    init_tracing();
    run()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
}

fn run() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Call(args) => call(args),
    }
}

fn call(args: CallArgs) -> Result<ExitCode> {
    let mut config = BoundaryConfig::from_env()?;
    config.entry_name = args.entry_name;
    config.module_name = args.module;
    if let Some(max) = args.max_result_bytes {
        config.max_result_bytes = max;
    }

    let input = match (&args.input, args.text) {
        (Some(path), _) => {
            std::fs::read(path).with_context(|| format!("read input: {}", path.display()))?
        }
        (None, Some(text)) => text.into_bytes(),
        (None, None) => Vec::new(),
    };

    retain_host_symbols();
    let library = ForeignLibrary::open(&args.lib)?;

    let result: Result<Vec<u8>, CallError> = if args.bytes {
        // SAFETY: the symbol is the library's exported `List U8 -> List U8` entry point.
        let entry = unsafe { library.entry::<RocBytes>(&args.symbol)? };
        let mut boundary = unsafe { Boundary::new(entry, config) };
        boundary.call_host(&input)
    } else {
        let text = String::from_utf8(input).context("input is not valid UTF-8 (use --bytes)")?;
        // SAFETY: the symbol is the library's exported `Str -> Str` entry point.
        let entry = unsafe { library.entry::<RocStr>(&args.symbol)? };
        let mut boundary = unsafe { Boundary::new(entry, config) };
        boundary.call_host(&text).map(String::into_bytes)
    };

    let report = match &result {
        Ok(output) => CallReport::success(output),
        Err(err) => CallReport::failure(err),
    }
    .with_alloc_stats(alloc_stats());
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
