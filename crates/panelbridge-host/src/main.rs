//! panelbridge-host: serves the panel command set over stdin/stdout.
//!
//! Frames are length-prefixed JSON in both directions. Logs go to stderr.

mod local_host;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use panelbridge::{
    BridgeConfig, Endpoint, FramedTransport, StateStore, TransportAdapter, host_dispatcher,
    spawn_reader,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::local_host::{LocalHost, scaffold_command};

#[derive(Debug, Default, PartialEq)]
struct Options {
    state: Option<PathBuf>,
    folder: Option<PathBuf>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: panelbridge-host [--state <file>] [--folder <dir>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --state <file>   Persist panel state to this file [env: PANELBRIDGE_STATE_PATH]");
            eprintln!("  --folder <dir>   Folder returned by selectFolder");
            process::exit(2);
        }
    };

    init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(options)) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--state" => {
                i += 1;
                options.state = Some(PathBuf::from(
                    args.get(i).ok_or("--state requires a value")?,
                ));
            }
            "--folder" => {
                i += 1;
                options.folder = Some(PathBuf::from(
                    args.get(i).ok_or("--folder requires a value")?,
                ));
            }
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(options)
}

/// Filter directives: `RUST_LOG` verbatim, else `PANELBRIDGE_LOG` as a level
/// for both crates (default `info`).
fn log_directives(rust_log: Option<String>, level: Option<String>) -> String {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return directives;
    }
    let level = match level.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        Some(l @ ("trace" | "debug" | "warn" | "error")) => l.to_string(),
        Some("warning") => "warn".to_string(),
        _ => "info".to_string(),
    };
    format!("panelbridge={level},panelbridge_host={level}")
}

/// Logs go to stderr only: stdout carries the bridge frames.
fn init_tracing() {
    let filter = EnvFilter::new(log_directives(
        std::env::var("RUST_LOG").ok(),
        std::env::var("PANELBRIDGE_LOG").ok(),
    ));
    let json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .try_init();
}

async fn run(options: Options) -> anyhow::Result<()> {
    let mut config = BridgeConfig::from_env();
    if let Some(path) = options.state {
        config = config.with_state_path(path);
    }

    let state = match &config.state_path {
        Some(path) => StateStore::open(path)?,
        None => StateStore::in_memory(),
    };
    let scaffold = scaffold_command(std::env::var("PANELBRIDGE_SCAFFOLD").ok().as_deref());
    let host = Arc::new(LocalHost::new(state, options.folder, scaffold));

    let adapter = Arc::new(TransportAdapter::connected(Arc::new(FramedTransport::new(
        tokio::io::stdout(),
    ))));
    let inbound = spawn_reader(tokio::io::stdin(), config.inbound_capacity);
    let endpoint = Endpoint::spawn(
        adapter,
        inbound,
        Some(host_dispatcher(host).build()),
        &config,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        state = ?config.state_path,
        "panelbridge-host serving on stdio"
    );
    endpoint.join().await;
    info!("stdin closed, exiting");

    Ok(())
}
