//! jnibridge - query an embedded JVM through the bridge
//!
//! Bootstraps the bridge against libjvm (or the simulated runtime) and runs
//! one diagnostic call, printing the result as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use jnibridge_core::diagnostics::{MemoryMetricsRequest, ThreadsInfoRequest};
use jnibridge_core::ffi::jvm::JvmHost;
use jnibridge_core::ffi::simulated::SimulatedRuntime;
use jnibridge_core::{init_tracing, BridgeConfig, JniBridge, RuntimeHost};
use tracing::info;

#[derive(Debug, Clone, Copy)]
enum Command {
    Metrics,
    Threads,
    Jmx,
    PauseMonitor,
    Stats,
}

fn print_help() {
    println!("jnibridge - embedded JVM bridge v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  jnibridge [OPTIONS] <COMMAND>");
    println!();
    println!("COMMANDS:");
    println!("  metrics          JVM memory pools and GC totals");
    println!("  threads          JVM thread counts and per-thread details");
    println!("  jmx              All JMX beans as JSON");
    println!("  pause-monitor    Start the JVM pause monitor");
    println!("  stats            Run every diagnostic once and print call statistics");
    println!();
    println!("OPTIONS:");
    println!("  --simulated      Use the in-process simulated runtime instead of libjvm");
    println!("  --config PATH    Load bridge configuration from a JSON file");
    println!("  -h, --help       Print this help message");
    println!("  -v, --version    Print version information");
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut simulated = false;
    let mut config_path: Option<PathBuf> = None;
    let mut command = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                println!("jnibridge {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--simulated" => simulated = true,
            "--config" => {
                let path = args.next().context("--config requires a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "metrics" => command = Some(Command::Metrics),
            "threads" => command = Some(Command::Threads),
            "jmx" => command = Some(Command::Jmx),
            "pause-monitor" => command = Some(Command::PauseMonitor),
            "stats" => command = Some(Command::Stats),
            _ => {
                eprintln!("error: unrecognized argument '{}'", arg);
                eprintln!("Run 'jnibridge --help' for usage information.");
                std::process::exit(1);
            }
        }
    }
    let Some(command) = command else {
        print_help();
        std::process::exit(1);
    };

    init_tracing();

    let config = match &config_path {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BridgeConfig::from_env(),
    };

    if simulated {
        info!("Using the simulated runtime");
        let host = SimulatedRuntime::standard_for(&config);
        run(JniBridge::new(host, config), command).await
    } else {
        let host = JvmHost::load(&config).context("loading libjvm")?;
        run(JniBridge::new(host, config), command).await
    }
}

async fn run<H: RuntimeHost + 'static>(bridge: JniBridge<H>, command: Command) -> Result<()> {
    let bridge = Arc::new(bridge);

    // Foreign calls may block for as long as the VM likes; keep them off the
    // async workers.
    let b = Arc::clone(&bridge);
    tokio::task::spawn_blocking(move || b.bootstrap())
        .await?
        .context("bootstrapping the JNI bridge")?;

    let b = Arc::clone(&bridge);
    let output = tokio::task::spawn_blocking(move || execute(&b, command)).await??;
    if let Some(output) = output {
        println!("{}", output);
    }
    Ok(())
}

fn execute<H: RuntimeHost>(bridge: &JniBridge<H>, command: Command) -> Result<Option<String>> {
    let output = match command {
        Command::Metrics => {
            let metrics = bridge
                .jvm_memory_metrics(&MemoryMetricsRequest::default())
                .context("getJvmMemoryMetrics")?;
            serde_json::to_string_pretty(&metrics)?
        }
        Command::Threads => {
            let threads = bridge
                .jvm_threads_info(&ThreadsInfoRequest {
                    get_complete_info: true,
                })
                .context("getJvmThreadsInfo")?;
            serde_json::to_string_pretty(&threads)?
        }
        Command::Jmx => {
            let jmx = bridge.jmx_json().context("getJMXJson")?;
            serde_json::to_string_pretty(&jmx)?
        }
        Command::PauseMonitor => {
            bridge.init_pause_monitor().context("initPauseMonitor")?;
            info!("Pause monitor started");
            return Ok(None);
        }
        Command::Stats => {
            for command in [Command::Metrics, Command::Threads, Command::Jmx] {
                execute(bridge, command)?;
            }
            bridge.stats().snapshot().print_report();
            return Ok(None);
        }
    };
    Ok(Some(output))
}
