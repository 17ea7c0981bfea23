//! A filesystem write/read latency probe, the one concrete [`Task`]
//! implementation this workspace ships (spec §1 scopes the "concrete task
//! payload" out of the core; this crate is that payload, kept deliberately
//! small). Grounded in `examples/original_source/task/alert_io_task.py`
//! (write-then-read a temp file per storage target, time each half) and
//! `lfs/lfs_utils.py` (per-target naming); the original's SMTP threshold
//! alerting and ZeroMQ PUSH to a database proxy are the "alert e-mail" and
//! "optional database-proxy result sink" spec.md §1 explicitly scopes out
//! as external collaborators — this crate logs its measurement instead.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use cyclone_core::error::{Error, Result};
use cyclone_core::generator::{GeneratorContext, TaskGenerator};
use cyclone_core::task::{now_secs, validate_tid, EncodedTask, Task};
use tracing::{info, warn};

const BODY_TAG: &str = "fsprobe";
const BLOCK_SIZE_BYTES: usize = 64 * 1024;
const PROBE_FILE_NAME: &str = ".cyclone-probe.tmp";

/// One probe run against a single target directory: write a block, fsync,
/// measure; read it back, measure; remove the file.
pub struct FsProbeTask {
    tid: String,
    target: PathBuf,
}

impl FsProbeTask {
    pub fn new(tid: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            tid: tid.into(),
            target: target.into(),
        }
    }

    fn probe_path(&self) -> PathBuf {
        self.target.join(PROBE_FILE_NAME)
    }
}

impl Task for FsProbeTask {
    fn tid(&self) -> &str {
        &self.tid
    }

    fn encode_body(&self) -> String {
        format!("{BODY_TAG}:{}", self.target.display())
    }

    fn execute(&self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let path = self.probe_path();
        let block = vec![0xABu8; BLOCK_SIZE_BYTES];

        let write_started = Instant::now();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&block)?;
        file.sync_all()?;
        let write_latency = write_started.elapsed();

        let read_started = Instant::now();
        let mut file = std::fs::File::open(&path)?;
        let mut buf = Vec::with_capacity(BLOCK_SIZE_BYTES);
        file.read_to_end(&mut buf)?;
        let read_latency = read_started.elapsed();

        std::fs::remove_file(&path)?;

        info!(
            tid = %self.tid,
            target = %self.target.display(),
            write_ms = write_latency.as_secs_f64() * 1000.0,
            read_ms = read_latency.as_secs_f64() * 1000.0,
            "fs probe completed"
        );
        Ok(())
    }
}

/// Reconstructs an [`FsProbeTask`] from a wire-arrived [`EncodedTask`];
/// registerable as a [`cyclone_core::task::TaskDecoder`].
pub fn decode_task(encoded: &EncodedTask) -> Result<Box<dyn Task>> {
    let target = encoded
        .body
        .strip_prefix(&format!("{BODY_TAG}:"))
        .ok_or_else(|| Error::decode("not an fsprobe task body"))?;
    Ok(Box::new(FsProbeTask::new(encoded.tid.clone(), target)))
}

/// `[probe]` section of a generator config file: `targets` (comma-separated
/// directories) and `interval_seconds` between sweeps.
struct ProbeConfig {
    targets: Vec<PathBuf>,
    interval: Duration,
}

impl ProbeConfig {
    fn load(path: &Path) -> Result<Self> {
        let ini = ini::Ini::load_from_file(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let section = ini
            .section(Some("probe"))
            .ok_or_else(|| Error::config("missing [probe] section"))?;
        let targets_raw = section
            .get("targets")
            .ok_or_else(|| Error::config("missing [probe] targets"))?;
        let targets = targets_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect::<Vec<_>>();
        if targets.is_empty() {
            return Err(Error::config("[probe] targets is empty"));
        }
        let interval_secs: u64 = section
            .get("interval_seconds")
            .ok_or_else(|| Error::config("missing [probe] interval_seconds"))?
            .parse()
            .map_err(|_| Error::config("invalid [probe] interval_seconds"))?;
        Ok(Self {
            targets,
            interval: Duration::from_secs(interval_secs),
        })
    }
}

/// Pushes one [`FsProbeTask`] per configured target every `interval_seconds`,
/// draining the result queue to log completions, until told to stop.
pub struct FsProbeGenerator {
    config: ProbeConfig,
}

impl TaskGenerator for FsProbeGenerator {
    fn run(self: Box<Self>, ctx: GeneratorContext) -> Result<()> {
        let mut sweep = 0u64;
        while !ctx.shutdown.is_triggered() {
            sweep += 1;
            for target in &self.config.targets {
                let tid = format!("fsprobe-{sweep}-{}", sanitize(target));
                validate_tid(&tid)?;
                let task = FsProbeTask::new(tid, target.clone());
                let encoded = EncodedTask::new(task.tid().to_string(), task.encode_body());
                if let Err(e) = ctx.task_queue.push(encoded) {
                    warn!(error = %e, "fs probe generator: task queue full, dropping this sweep's task");
                }
            }
            while let Ok(Some(tid)) = ctx.result_queue.try_pop(Duration::from_millis(50)) {
                info!(tid = %tid, at = now_secs(), "fs probe generator: result acknowledged");
            }
            let deadline = Instant::now() + self.config.interval;
            while Instant::now() < deadline {
                if ctx.shutdown.is_triggered() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        }
        Ok(())
    }
}

fn sanitize(target: &Path) -> String {
    target
        .display()
        .to_string()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// The [`cyclone_core::generator::GeneratorFactory`] registered under
/// `(cyclone_probe_task, FsProbeGenerator)`.
pub fn factory(config_file: &Path) -> Result<Box<dyn TaskGenerator>> {
    let config = ProbeConfig::load(config_file)?;
    Ok(Box::new(FsProbeGenerator { config }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let task = FsProbeTask::new("T1", "/tmp/ost0");
        let encoded = EncodedTask::new(task.tid().to_string(), task.encode_body());
        let decoded = decode_task(&encoded).unwrap();
        assert_eq!(decoded.tid(), "T1");
    }

    #[test]
    fn decode_rejects_foreign_bodies() {
        let encoded = EncodedTask::new("T1", "othertask:payload");
        assert!(decode_task(&encoded).is_err());
    }

    #[test]
    fn execute_writes_and_reads_back_a_block() {
        let dir = std::env::temp_dir().join(format!("cyclone-fsprobe-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let task = FsProbeTask::new("T1", &dir);
        task.execute().unwrap();
        assert!(!dir.join(PROBE_FILE_NAME).exists());
    }

    #[test]
    fn config_rejects_empty_targets() {
        let dir = std::env::temp_dir().join(format!("cyclone-fsprobe-cfg-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("probe.conf");
        std::fs::write(&path, "[probe]\ntargets = \ninterval_seconds = 5\n").unwrap();
        assert!(ProbeConfig::load(&path).is_err());
    }
}
