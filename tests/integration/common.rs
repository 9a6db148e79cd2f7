//! Shared fixtures for the integration tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use atmos_host::bootstrap::{BootPlan, Runner, Tier};
use atmos_host::engine::{wrap_entry, EngineSession, HostBindings, SchedulerHandle, SchedulerNames};
use atmos_host::host::{Clock, HostCapabilities, ManualClock, OutputBuffer, SystemClock};
use atmos_host::lifecycle::{Lifecycle, Reporter, RunState, StatusBoard};
use atmos_host::module::{bundled, Fetch, FetchFailure, ModuleRegistry, ResolvedModule, ModuleOrigin};
use atmos_host::tick::{Registration, TickDriver};

/// Fetcher answering from a fixed URL table, 404 otherwise.
pub struct TableFetcher {
    pages: HashMap<String, String>,
}

impl TableFetcher {
    pub fn new(pages: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
        })
    }
}

impl Fetch for TableFetcher {
    fn fetch(
        &self,
        url: &str,
    ) -> Result<String, FetchFailure> {
        self.pages.get(url).cloned().ok_or(FetchFailure::Status(404))
    }
}

/// A runner with in-memory output and status, on the real clock.
pub struct Harness {
    pub runner: Runner,
    pub output: OutputBuffer,
    pub board: StatusBoard,
}

pub fn harness(plan: BootPlan) -> Harness {
    harness_with_clock(plan, Arc::new(SystemClock::new()))
}

pub fn harness_with_clock(
    mut plan: BootPlan,
    clock: Arc<dyn Clock>,
) -> Harness {
    plan.period = Duration::from_millis(1);
    let output = OutputBuffer::new();
    let board = StatusBoard::new();
    let caps = HostCapabilities::new(Arc::new(output.clone()), clock);
    let runner = Runner::new(plan, caps, Arc::new(board.clone())).with_fetcher(TableFetcher::new(&[]));
    Harness { runner, output, board }
}

pub fn plan(tier: Tier) -> BootPlan {
    BootPlan::bundled(tier)
}

/// A driver over a session whose entry already started.
pub struct Started {
    pub driver: TickDriver,
    pub output: OutputBuffer,
    pub board: StatusBoard,
    pub clock: ManualClock,
}

/// Start `program` on the bundled scheduler with a manual clock at `t0`.
pub fn start_bundled(
    program: &str,
    t0: i64,
) -> Started {
    let scheduler = ResolvedModule::new(
        bundled::SCHEDULER,
        bundled::source(bundled::SCHEDULER).unwrap(),
        ModuleOrigin::Bundled,
    );
    start_with(program, t0, scheduler, |_| {})
}

/// Start `program` with `scheduler` as the only module.
///
/// `setup` runs on the session before the scheduler module is required.
pub fn start_with(
    program: &str,
    t0: i64,
    scheduler: ResolvedModule,
    setup: impl FnOnce(&EngineSession),
) -> Started {
    let output = OutputBuffer::new();
    let board = StatusBoard::new();
    let clock = ManualClock::new(t0);
    let caps = HostCapabilities::new(Arc::new(output.clone()), Arc::new(clock.clone()));

    let mut session = EngineSession::create(caps, &HostBindings::default()).unwrap();
    ModuleRegistry::new(&mut session).register_module(&scheduler).unwrap();
    setup(&session);
    session.require(&scheduler.name).unwrap();

    let mut lifecycle = Lifecycle::new(Reporter::new(Arc::new(board.clone())));
    lifecycle.advance(RunState::Loading);
    lifecycle.advance(RunState::Running);

    let handle = SchedulerHandle::resolve(&session, &SchedulerNames::default()).unwrap();
    let body = session.load_function(program, "input.lua").unwrap();
    let entry = wrap_entry(&session, body, "_host_done_").unwrap();
    handle.start(entry).unwrap();

    let driver = TickDriver::new(
        session,
        handle,
        Arc::new(clock.clone()),
        "_host_done_",
        lifecycle,
        Registration::new(),
    );
    Started {
        driver,
        output,
        board,
        clock,
    }
}
