//! The registry of task generators this binary ships with (spec §4.4, §9
//! option a). Currently just the filesystem probe demo
//! (`demos/cyclone-probe-task`), which is what makes `cyclone-master`
//! runnable end to end without any other integration.

use cyclone_core::generator::Registry;

pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(
        "cyclone_probe_task",
        "FsProbeGenerator",
        cyclone_probe_task::factory,
    );
    registry
}
