//! Subprocess entry point wiring the host handshake, the bundle loader, and
//! either the command/response server or the REPL bridge into one process.

mod error;

use std::ffi::OsString;

use tracing::{error, info};

use bridge_loader::Bundle;
use bridge_runtime::{parse_argv, ChildConfig};

use crate::error::ChildError;

/// `KVPairs` key selecting the REPL bridge instead of the default
/// command/response server once the entry module has run.
const MODE_KEY: &str = "Mode";
const REPL_MODE: &str = "repl";

fn select_mode(bundle: &Bundle) -> &str {
    bundle
        .kv_pairs
        .get(MODE_KEY)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();

    if let Err(err) = run().await {
        error!("child exiting with fatal error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ChildError> {
    let args: Vec<OsString> = std::env::args_os().collect();
    let handshake = parse_argv(&args)?;
    info!(extra_fds = handshake.extra_fds.len(), "parsed host handshake");

    let bundle = read_bundle(handshake.bootstrap_fd, handshake.program_fd)?;
    let config = ChildConfig::from_env();

    #[cfg(unix)]
    {
        unix_main(bundle, config).await
    }
    #[cfg(not(unix))]
    {
        let _ = (bundle, config);
        Err(ChildError::Unsupported)
    }
}

#[cfg(unix)]
fn read_bundle(bootstrap_fd: i32, program_fd: i32) -> Result<Bundle, ChildError> {
    use std::io::Read;
    use std::os::fd::{FromRawFd, OwnedFd};

    // The bootstrap descriptor is part of the host contract but carries no
    // data the child needs; close it immediately once observed.
    drop(unsafe { OwnedFd::from_raw_fd(bootstrap_fd) });

    let mut file: std::fs::File = unsafe { OwnedFd::from_raw_fd(program_fd) }.into();
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(ChildError::ReadBundle)?;
    // `file` drops here, closing `program_fd` per the handshake contract.

    Bundle::from_json(&bytes).map_err(ChildError::from)
}

#[cfg(unix)]
async fn unix_main(bundle: Bundle, config: ChildConfig) -> Result<(), ChildError> {
    use std::os::fd::RawFd;
    use std::sync::Arc;

    use tokio::sync::Mutex as AsyncMutex;
    use tracing::{info, warn};

    use bridge_loader::{build_engine, load_and_run, warn_unused_kv, StatusSink};
    use bridge_repl::ReplBridge;
    use bridge_runtime::Watchdog;
    use bridge_rpc::CommandServer;
    use bridge_transport::unix::{raw_pipe_pair, status_sender_from_raw_fd};
    use bridge_transport::StatusRecord;

    warn_unused_kv(&bundle);

    // Owned for the whole process lifetime; every write borrows it through
    // `&mut`, since `StatusSink` and `ReplBridge::run` want different
    // wrapper shapes around the same underlying descriptor.
    let mut status_tx = status_sender_from_raw_fd(bundle.status_in as RawFd)?;

    let (engine, mut scope, resolver) = build_engine(&bundle)?;

    let ast = match load_and_run(&engine, &resolver, &mut scope, &bundle) {
        Ok(ast) => ast,
        Err(err) => {
            report_fatal_loader_error(&mut status_tx, &err).await;
            return Err(ChildError::from(err));
        }
    };

    let watchdog = Watchdog::spawn(config.watchdog_interval);

    let (pipe_in, pipe_out) = raw_pipe_pair(bundle.pipe_in as RawFd, bundle.pipe_out as RawFd)?;

    if select_mode(&bundle) == REPL_MODE {
        info!("running REPL bridge");
        let mut repl = ReplBridge::new();
        if let Err(err) = repl.run(pipe_in, pipe_out, &mut status_tx).await {
            warn!("REPL bridge ended with error: {err}");
        }
    } else {
        info!("running command/response server");
        let server = CommandServer::spawn(pipe_in, pipe_out, config.correlation_prefix, config.dispatch_poll_timeout);
        server
            .register_script_handlers(Arc::new(engine), Arc::new(ast), Arc::new(AsyncMutex::new(scope)))
            .await;
        server.wait_for_shutdown().await;
    }

    watchdog.abort();

    let mut sink = StatusSink::new(&mut status_tx);
    let _ = sink.send(&StatusRecord::exit()).await;
    Ok(())
}

#[cfg(unix)]
async fn report_fatal_loader_error(status_tx: &mut tokio::net::unix::pipe::Sender, err: &bridge_loader::LoaderError) {
    use bridge_loader::StatusSink;
    use bridge_transport::StatusRecord;

    let record = StatusRecord::Exception {
        exception: "LoaderError".to_string(),
        message: err.to_string(),
        traceback: describe_eval_error_if_eval(err),
    };
    let mut sink = StatusSink::new(status_tx);
    let _ = sink.send(&record).await;
    let _ = sink.send(&StatusRecord::exit()).await;
}

#[cfg(unix)]
fn describe_eval_error_if_eval(err: &bridge_loader::LoaderError) -> String {
    // `LoaderError::{Compile,Eval}` already carry a pre-formatted message
    // (see `bridge_loader::describe_eval_error`); everything else has no
    // separate traceback representation.
    match err {
        bridge_loader::LoaderError::Compile { message, .. }
        | bridge_loader::LoaderError::Eval { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
