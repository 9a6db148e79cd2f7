//! Modules compiled into the crate

/// Name of the bundled cooperative scheduler
pub const SCHEDULER: &str = "host.sched";

const SCHEDULER_SOURCE: &str = include_str!("sched.lua");

/// Source of a bundled module
pub fn source(name: &str) -> Option<&'static str> {
    match name {
        SCHEDULER => Some(SCHEDULER_SOURCE),
        _ => None,
    }
}

/// Names of all bundled modules
pub fn names() -> &'static [&'static str] {
    &[SCHEDULER]
}
