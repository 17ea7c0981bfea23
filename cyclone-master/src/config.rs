//! INI configuration for `cyclone-master` (spec §6), read with the `ini`
//! crate the way `roboplc-cli`'s `config.rs` reads its own project TOML —
//! load, then pull typed fields out with a clear error per missing/invalid
//! key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;

use crate::error::{Error, Result};

/// Fully parsed and validated `[control]`/`[comm]`/`[log]`/`[task_generator]`
/// configuration for a master instance.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub pid_file: PathBuf,
    pub controller_timeout: u64,
    pub controller_wait_duration: u64,
    pub task_resend_timeout: u64,

    pub comm_target: String,
    pub comm_port: u16,
    pub poll_timeout: Duration,

    pub log_filename: Option<PathBuf>,

    pub generator_module: String,
    pub generator_class: String,
    pub generator_config_file: PathBuf,
}

impl MasterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;

        let control = section(&ini, "control")?;
        let comm = section(&ini, "comm")?;
        let log = section(&ini, "log")?;
        let task_generator = section(&ini, "task_generator")?;

        let poll_timeout_secs: u64 = required_parse(comm, "comm", "poll_timeout")?;

        Ok(Self {
            pid_file: PathBuf::from(required(control, "control", "pid_file")?),
            controller_timeout: required_parse(control, "control", "controller_timeout")?,
            controller_wait_duration: required_parse(control, "control", "controller_wait_duration")?,
            task_resend_timeout: required_parse(control, "control", "task_resend_timeout")?,

            comm_target: required(comm, "comm", "target")?.to_string(),
            comm_port: required_parse(comm, "comm", "port")?,
            poll_timeout: Duration::from_secs(poll_timeout_secs),

            log_filename: log
                .get("filename")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),

            generator_module: required(task_generator, "task_generator", "module")?.to_string(),
            generator_class: required(task_generator, "task_generator", "class")?.to_string(),
            generator_config_file: PathBuf::from(required(
                task_generator,
                "task_generator",
                "config_file",
            )?),
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
