//! `cyclone-master`: the central dispatch process (spec §1/§4.7).

mod config;
mod dispatch;
mod error;
mod generator;

#[cfg(test)]
mod tests;

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use cyclone_core::comm::MasterEndpoint;
use cyclone_core::generator::{GeneratorContext, ShutdownSignal};
use cyclone_core::pidfile::PidFile;
use cyclone_core::queue::Queue;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::MasterConfig;
use crate::dispatch::{Dispatcher, DispatcherConfig};
use crate::error::Result;

/// Default location for the master's configuration file (spec §6).
const DEFAULT_CONFIG_FILE: &str = "/etc/cyclone/master.conf";

/// Bound on in-flight tasks/results the queues will hold. Not a spec.md §6
/// config key (only "bounded (configurable)" is specified); kept as a
/// generous constant here rather than adding an undocumented INI key.
const QUEUE_CAPACITY: usize = 10_000;

#[derive(Parser)]
#[command(author, version, about = "Cyclone distributed task-dispatch master", disable_version_flag = true)]
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
            eprintln!("cyclone-master: {e}");
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<i32> {
    let config = MasterConfig::load(&args.config_file)?;
    init_logging(args.debug, config.log_filename.as_deref());

    let _pid_file = PidFile::acquire(&config.pid_file)?;

    let endpoint = MasterEndpoint::bind(&config.comm_target, config.comm_port, config.poll_timeout)?;
    let task_queue = Arc::new(Queue::bounded(QUEUE_CAPACITY));
    let result_queue = Arc::new(Queue::bounded(QUEUE_CAPACITY));

    let generator_shutdown = ShutdownSignal::new();
    let generator = generator::default_registry().build(
        &config.generator_module,
        &config.generator_class,
        &config.generator_config_file,
    )?;
    let generator_ctx = GeneratorContext {
        task_queue: task_queue.clone(),
        result_queue: result_queue.clone(),
        config_file: config.generator_config_file.clone(),
        shutdown: generator_shutdown.clone(),
    };
    let generator_handle = thread::Builder::new()
        .name("cyclone-task-gen".into())
        .spawn(move || {
            if let Err(e) = generator.run(generator_ctx) {
                error!(error = %e, "task generator exited with error");
            }
        })
        .map_err(|e| cyclone_core::error::Error::resource(format!("failed to spawn generator thread: {e}")))?;

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    spawn_signal_thread(shutdown_requested.clone())?;

    let dispatcher_config = DispatcherConfig {
        controller_timeout: config.controller_timeout,
        controller_wait_duration: config.controller_wait_duration,
        task_resend_timeout: config.task_resend_timeout,
    };
    let mut dispatcher = Dispatcher::new(dispatcher_config);

    info!(
        target = %config.comm_target,
        port = config.comm_port,
        "cyclone-master dispatch loop starting"
    );
    dispatch::run(
        &mut dispatcher,
        &endpoint,
        &task_queue,
        &result_queue,
        config.poll_timeout,
        &shutdown_requested,
        &|| !generator_handle.is_finished(),
    );

    // spec §4.9 steps 5-6: signal the generator, give it up to 10s to exit
    // on its own. A still-alive thread is not forcibly killed (Rust has no
    // safe thread-kill primitive); the process exit below reclaims it, the
    // same practical outcome the original's hard-terminate-and-join gets.
    generator_shutdown.trigger();
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while !generator_handle.is_finished() && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(100));
    }
    if !generator_handle.is_finished() {
        tracing::warn!("task generator did not exit within 10s, proceeding with shutdown anyway");
    }

    let error_count = dispatcher.error_count();
    info!(error_count, "cyclone-master dispatch loop terminated");
    Ok(if error_count == 0 { 0 } else { 1 })
}

fn spawn_signal_thread(shutdown_requested: Arc<AtomicBool>) -> Result<()> {
    let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM])
        .map_err(|e| cyclone_core::error::Error::resource(format!("failed to register signal handler: {e}")))?;
    thread::Builder::new()
        .name("cyclone-signals".into())
        .spawn(move || {
            for sig in signals.forever() {
                info!(signal = sig, "received shutdown signal");
                shutdown_requested.store(true, Ordering::SeqCst);
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
                error!(error = %e, path = %path.display(), "failed to open log file, logging to stderr instead");
            }
        },
        None => builder.init(),
    }
}
