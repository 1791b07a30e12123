//! RegVM - command-line runner for .rvmc program images

use anyhow::Context;
use clap::{ArgAction, Parser};
use regvm_runtime::{Runtime, RuntimeConfig, VmConfig};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::thread;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "regvm")]
#[command(author = "Silvano Neto <dev@silvanoneto.com>")]
#[command(version = "2026.1.16")]
#[command(about = "RegVM - register bytecode VM with virtual cores", long_about = None)]
struct Cli {
    /// Program image (.rvmc)
    #[arg(value_name = "PROGRAM")]
    program: PathBuf,

    /// Preload a native module into the next free slot (repeatable)
    #[arg(short = 'M', long = "module", value_name = "PATH")]
    modules: Vec<String>,

    /// Number of virtual cores (0 = host CPUs)
    #[arg(long, value_name = "N")]
    max_cores: Option<usize>,

    /// Stack window per core, in bytes
    #[arg(long, value_name = "BYTES")]
    stack_size: Option<usize>,

    /// Division by zero yields 0 instead of ending the core
    #[arg(long)]
    no_division_check: bool,

    /// More logging on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Arguments passed to the program
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    install_break_handler();

    match run(cli) {
        Ok(code) => {
            let _ = io::stdout().flush();
            process::exit(code as i32);
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i64> {
    let mut vm = VmConfig::from_env();
    if let Some(cores) = cli.max_cores {
        vm = vm.with_max_cores(cores);
    }
    if let Some(bytes) = cli.stack_size {
        vm = vm.with_stack_size(bytes);
    }
    if cli.no_division_check {
        vm = vm.with_division_check(false);
    }

    let config = RuntimeConfig {
        vm,
        modules: cli.modules,
        args: cli.args,
    };
    let mut runtime = Runtime::new(config);
    let report = runtime
        .run_file(&cli.program)
        .with_context(|| format!("cannot run {}", cli.program.display()))?;

    if let Some(e) = &report.error {
        eprintln!("error: {}", e);
    }
    Ok(report.return_code)
}

/// Logs on stderr; RUST_LOG wins over -v
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Ctrl-C asks before ending the process
fn install_break_handler() {
    let spawned = thread::Builder::new()
        .name("regvm-break".into())
        .spawn(|| {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::warn!("break handler unavailable: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                loop {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::warn!("break handler unavailable: {}", e);
                        return;
                    }
                    eprint!("exit now (y/n)? ");
                    let _ = io::stderr().flush();

                    let mut answer = String::new();
                    if io::stdin().read_line(&mut answer).is_ok()
                        && matches!(answer.trim(), "y" | "Y")
                    {
                        process::exit(1);
                    }
                }
            });
        });

    if let Err(e) = spawned {
        tracing::warn!("break handler unavailable: {}", e);
    }
}
