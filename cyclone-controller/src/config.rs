//! INI configuration for `cyclone-controller` (spec §6), read with the
//! `ini` crate exactly as `cyclone-master`'s own `config.rs` does.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub pid_file: PathBuf,
    pub request_retry_wait_duration: Duration,
    pub max_num_request_retries: u32,

    pub comm_target: String,
    pub comm_port: u16,
    pub poll_timeout: Duration,

    pub log_filename: Option<PathBuf>,

    pub worker_count: usize,
}

impl ControllerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;

        let control = section(&ini, "control")?;
        let comm = section(&ini, "comm")?;
        let log = section(&ini, "log")?;
        let processing = section(&ini, "processing")?;

        let poll_timeout_secs: u64 = required_parse(comm, "comm", "poll_timeout")?;
        let retry_wait_secs: u64 = required_parse(control, "control", "request_retry_wait_duration")?;
        let worker_count: usize = required_parse(processing, "processing", "worker_count")?;
        if !(1..=1000).contains(&worker_count) {
            return Err(Error::config(format!(
                "[processing] worker_count must be 1..1000, got {worker_count}"
            )));
        }

        Ok(Self {
            pid_file: PathBuf::from(required(control, "control", "pid_file")?),
            request_retry_wait_duration: Duration::from_secs(retry_wait_secs),
            max_num_request_retries: required_parse(control, "control", "max_num_request_retries")?,

            comm_target: required(comm, "comm", "target")?.to_string(),
            comm_port: required_parse(comm, "comm", "port")?,
            poll_timeout: Duration::from_secs(poll_timeout_secs),

            log_filename: log
                .get("filename")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),

            worker_count,
        })
    }
}

fn section<'a>(ini: &'a Ini, name: &str) -> Result<&'a ini::Properties> {
    ini.section(Some(name))
        .ok_or_else(|| Error::config(format!("missing [{name}] section")))
}

fn required<'a>(props: &'a ini::Properties, section: &str, key: &str) -> Result<&'a str> {
    props
        .get(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::config(format!("missing [{section}] {key}")))
}

fn required_parse<T: std::str::FromStr>(props: &ini::Properties, section: &str, key: &str) -> Result<T> {
    let raw = required(props, section, key)?;
    raw.parse()
        .map_err(|_| Error::config(format!("invalid [{section}] {key}: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sample(dir: &std::path::Path, worker_count: u32) -> PathBuf {
        let path = dir.join("controller.conf");
        std::fs::write(
            &path,
            format!(
                "[control]\n\
                 pid_file = /tmp/cyclone-controller.pid\n\
                 request_retry_wait_duration = 2\n\
                 max_num_request_retries = 3\n\
                 \n\
                 [comm]\n\
                 target = master.local\n\
                 port = 7800\n\
                 poll_timeout = 1\n\
                 \n\
                 [log]\n\
                 filename =\n\
                 \n\
                 [processing]\n\
                 worker_count = {worker_count}\n"
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn loads_a_complete_config() {
        let dir = std::env::temp_dir().join(format!("cyclone-ctrl-cfg-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = write_sample(&dir, 8);
        let cfg = ControllerConfig::load(&path).unwrap();
        assert_eq!(cfg.worker_count, 8);
        assert_eq!(cfg.max_num_request_retries, 3);
    }

    #[test]
    fn rejects_worker_count_out_of_range() {
        let dir = std::env::temp_dir().join(format!("cyclone-ctrl-cfg-test-range-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = write_sample(&dir, 0);
        assert!(ControllerConfig::load(&path).is_err());

        let path = write_sample(&dir, 1001);
        assert!(ControllerConfig::load(&path).is_err());
    }
}
