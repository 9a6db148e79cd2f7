//! atmos-host
//!
//! Runs a Lua program inside an embedded interpreter whose cooperative
//! scheduler is driven by the host's periodic clock.
//!
//! A run goes through four pieces:
//!
//! - [`module`]: fetch module sources and place them in the module table
//! - [`engine`]: one interpreter session with host capabilities bound
//! - [`bootstrap`]: tier-specific startup up to a running entry point
//! - [`tick`]: periodic clock events until the program completes
//!
//! [`lifecycle`] reports the state of the run on the host's status channel.
//!
//! # Example
//!
//! ```no_run
//! use atmos_host::{run_program, BootPlan, RunOutcome};
//!
//! let report = run_program(BootPlan::default(), "print('hello')")?;
//! assert_eq!(report.outcome, RunOutcome::Done);
//! # Ok::<(), anyhow::Error>(())
//! ```

#![warn(rust_2018_idioms)]

pub mod bootstrap;
pub mod engine;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod module;
pub mod tick;

// Utility modules
pub mod util;

use std::sync::Arc;

pub use anyhow::{Context, Result};

pub use bootstrap::{BootPlan, RunOutcome, RunReport, Runner, Tier};
pub use engine::EngineSession;
pub use error::{CompileError, EvalError, RegistrationError, RunError, TransportError};
pub use host::{Clock, HostCapabilities, OutputSink};
pub use lifecycle::{RunState, StatusBoard, StatusSink, StderrStatus};
pub use module::{ModuleRegistry, ModuleSpec};
pub use tick::{StopHandle, TickDriver};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Binary name
pub const NAME: &str = "atmos-host";

/// Run `source` with console output on a fresh current-thread runtime.
///
/// The interpreter is not `Send`, so the tick loop needs a runtime that keeps
/// it on one thread.
pub fn run_program(
    plan: BootPlan,
    source: &str,
) -> Result<RunReport> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the tick runtime")?;
    let runner = Runner::new(plan, HostCapabilities::console(), Arc::new(StderrStatus));
    Ok(runtime.block_on(runner.run(Some(source))))
}
