//! The pluggable task generator (spec §4.4): a long-running producer that
//! fills the master's task queue and optionally drains its result queue.
//!
//! The original selects an implementation dynamically by `(module, class)`
//! name and runs it as a child process. §9 option (a) — a compile-time
//! name→factory registry — is what a statically linked binary can do
//! instead; the generator itself runs on a supervised thread rather than a
//! child process (see DESIGN.md), grounded in `roboplc::supervisor`'s
//! named, liveness-checkable task model. This type lives in `cyclone-core`
//! rather than `cyclone-master` so that concrete generator crates (e.g.
//! `demos/cyclone-probe-task`) can implement it without depending on the
//! master binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::queue::Queue;
use crate::task::{EncodedTask, TaskId};

/// Shared cooperative-shutdown flag, flipped on `SIGUSR1` (spec §4.4 "respond
/// to SIGUSR1 by finishing promptly").
#[derive(Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a generator needs to do its job, handed to it once at start.
pub struct GeneratorContext {
    pub task_queue: Arc<Queue<EncodedTask>>,
    pub result_queue: Arc<Queue<TaskId>>,
    pub config_file: PathBuf,
    pub shutdown: ShutdownSignal,
}

/// A pluggable task generator (spec §4.4). Runs to completion on its own
/// supervised thread; the dispatch loop treats the thread finishing as "the
/// generator is no longer alive".
pub trait TaskGenerator: Send {
    fn run(self: Box<Self>, ctx: GeneratorContext) -> Result<()>;
}

/// Constructs a boxed generator given its `config_file` (spec §4.4's
/// `(module, class, config_file)` triple, minus the two name fields which
/// select the factory itself).
pub type GeneratorFactory = fn(&Path) -> Result<Box<dyn TaskGenerator>>;

/// Compile-time `(module, class) -> factory` table standing in for dynamic
/// module loading (spec §9 option a).
#[derive(Default)]
pub struct Registry {
    factories: HashMap<(&'static str, &'static str), GeneratorFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: &'static str, class: &'static str, factory: GeneratorFactory) {
        self.factories.insert((module, class), factory);
    }

    pub fn build(&self, module: &str, class: &str, config_file: &Path) -> Result<Box<dyn TaskGenerator>> {
        let factory = self
            .factories
            .get(&(module, class))
            .ok_or_else(|| Error::config(format!("unknown task generator {module}.{class}")))?;
        factory(config_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_factory(_config_file: &Path) -> Result<Box<dyn TaskGenerator>> {
        struct Noop;
        impl TaskGenerator for Noop {
            fn run(self: Box<Self>, _ctx: GeneratorContext) -> Result<()> {
                Ok(())
            }
        }
        Ok(Box::new(Noop))
    }

    #[test]
    fn unregistered_name_is_a_config_error() {
        let registry = Registry::new();
        assert!(registry.build("nope", "Nope", Path::new("x.conf")).is_err());
    }

    #[test]
    fn registered_name_builds() {
        let mut registry = Registry::new();
        registry.register("demo", "Noop", fake_factory);
        assert!(registry.build("demo", "Noop", Path::new("x.conf")).is_ok());
    }
}
