//! Ad-hoc CLI for driving the state-management core outside the full test
//! harness: point it at a parameter file and an operation, mainly useful
//! for debugging a pool by hand.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vmstate_core::backend::Registry;
use vmstate_core::env::{Env, VmHandle};
use vmstate_core::error::Result;
use vmstate_core::orchestrator::Orchestrator;
use vmstate_core::params::Params;
use vmstate_core::sourced::SourcedBackend;
use vmstate_core::transfer::Dispatcher;

#[derive(Parser)]
#[command(name = "vmstate", about = "Drive the state-management core from a shell")]
struct Cli {
    /// Parameter file, `key = value` lines.
    #[arg(long, env = "VMSTATE_PARAMS")]
    params: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Show,
    Check,
    Get,
    Set,
    Unset,
    Push,
    Pop,
}

/// No VM runtime is wired up from the CLI; backends that require a live
/// object (`ramfile`, `qcow2vt`) will surface `ErrPrecondition`.
struct NoEnv;

#[async_trait]
impl Env for NoEnv {
    async fn get_vm(&self, _name: &str) -> Result<Option<Arc<dyn VmHandle>>> {
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    vmstate_core::logging::init(default_level);

    let text = match tokio::fs::read_to_string(&cli.params).await {
        Ok(text) => text,
        Err(e) => {
            eprintln!("reading {}: {e}", cli.params.display());
            return std::process::ExitCode::FAILURE;
        }
    };
    let params = Params::parse(&text);

    let registry = Arc::new(Registry::with_defaults());
    let dispatcher = Arc::new(Dispatcher::new(Duration::from_secs(300), false));
    let probe: Arc<dyn vmstate_core::chain::ImageProbe> = Arc::new(vmstate_core::chain::QemuImgProbe);
    let orchestrator = Orchestrator::new(
        registry,
        Arc::new(NoEnv),
        Box::new(move |local| SourcedBackend::new(local, dispatcher.clone(), probe.clone())),
    );

    let outcome = match cli.command {
        Command::Show => orchestrator.show(&params).await.map(|states| {
            for state in states {
                println!("{state}");
            }
        }),
        Command::Check => orchestrator.check(&params).await.map(|ok| {
            println!("{ok}");
        }),
        Command::Get => orchestrator.get(&params).await,
        Command::Set => orchestrator.set(&params).await,
        Command::Unset => orchestrator.unset(&params).await,
        Command::Push => orchestrator.push(&params).await,
        Command::Pop => orchestrator.pop(&params).await,
    };

    match outcome {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error ({:?}): {e}", e.kind());
            std::process::ExitCode::FAILURE
        }
    }
}
