//! `cyclone-controller`: the remote controller process (spec §1/§4.5/§4.6).

mod config;
mod error;
mod pull_loop;
mod worker;

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use cyclone_core::comm::ControllerEndpoint;
use cyclone_core::generator::ShutdownSignal;
use cyclone_core::pidfile::PidFile;
use cyclone_core::queue::Queue;
use cyclone_core::task::{Task, TaskDecoderTable, TaskId};
use cyclone_core::worker_table::WorkerTable;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::pull_loop::PullLoopConfig;
use crate::worker::WorkerPool;

/// Default location for the controller's configuration file (spec §6; the
/// master's own default is `/etc/cyclone/master.conf`, this is its sibling).
const DEFAULT_CONFIG_FILE: &str = "/etc/cyclone/controller.conf";

/// Bound on in-flight tasks/results the local queues will hold, the same
/// reasoning as `cyclone-master`'s `QUEUE_CAPACITY`.
const QUEUE_CAPACITY: usize = 10_000;

#[derive(Parser)]
#[command(author, version, about = "Cyclone distributed task-dispatch controller", disable_version_flag = true)]
struct Args {
    #[arg(short = 'f', long = "config-file", default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,
    #[arg(short = 'D', long, help = "enable debug logging")]
    debug: bool,
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: (),
}

fn main() {
    let args = Args::parse();
    match run(&args) {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("cyclone-controller: {e}");
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<i32> {
    let config = ControllerConfig::load(&args.config_file)?;
    init_logging(args.debug, config.log_filename.as_deref());

    let _pid_file = PidFile::acquire(&config.pid_file)?;

    let endpoint = ControllerEndpoint::new(&config.comm_target, config.comm_port, config.poll_timeout);
    let task_queue: Arc<Queue<Box<dyn Task>>> = Arc::new(Queue::bounded(QUEUE_CAPACITY));
    let result_queue: Arc<Queue<TaskId>> = Arc::new(Queue::bounded(QUEUE_CAPACITY));
    let worker_table = Arc::new(WorkerTable::new(config.worker_count));

    let mut decoders = TaskDecoderTable::new();
    decoders.register(cyclone_probe_task::decode_task);

    let worker_shutdown = ShutdownSignal::new();
    let worker_pool = WorkerPool::spawn(
        config.worker_count,
        task_queue.clone(),
        result_queue.clone(),
        worker_table,
        worker_shutdown.clone(),
    );

    let stop_requested = Arc::new(AtomicBool::new(false));
    spawn_signal_thread(stop_requested.clone())?;

    let sender_id = hostname();
    let pull_config = PullLoopConfig {
        sender_id: sender_id.clone(),
        worker_count: config.worker_count,
        request_retry_wait_duration: config.request_retry_wait_duration,
        max_num_request_retries: config.max_num_request_retries,
    };

    info!(
        sender = %sender_id,
        target = %config.comm_target,
        port = config.comm_port,
        worker_count = config.worker_count,
        "cyclone-controller pull-loop starting"
    );
    pull_loop::run(
        &pull_config,
        &endpoint,
        &task_queue,
        &result_queue,
        &decoders,
        &worker_shutdown,
        worker_pool,
        &stop_requested,
    )?;

    info!("cyclone-controller drained and exiting");
    Ok(0)
}

/// The `sender` identity a controller uses on every message (spec §4.1:
/// "a controller hostname or master identifier"). Falls back to the pid if
/// the hostname can't be read, so the controller never fails to start over
/// a cosmetic identity detail.
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| format!("controller-{}", std::process::id()))
}

fn spawn_signal_thread(stop_requested: Arc<AtomicBool>) -> Result<()> {
    let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM])
        .map_err(|e| cyclone_core::error::Error::resource(format!("failed to register signal handler: {e}")))?;
    thread::Builder::new()
        .name("cyclone-signals".into())
        .spawn(move || {
            for sig in signals.forever() {
                info!(signal = sig, "received shutdown signal");
                stop_requested.store(true, Ordering::SeqCst);
            }
        })
        .map_err(|e| cyclone_core::error::Error::resource(format!("failed to spawn signal thread: {e}")))?;
    Ok(())
}

fn init_logging(debug: bool, log_filename: Option<&std::path::Path>) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_filename {
        Some(path) => match File::options().create(true).append(true).open(path) {
            Ok(file) => builder.with_writer(move || file.try_clone().expect("clone log file handle")).init(),
            Err(e) => {
                builder.init();
                tracing::error!(error = %e, path = %path.display(), "failed to open log file, logging to stderr instead");
            }
        },
        None => builder.init(),
    }
}
