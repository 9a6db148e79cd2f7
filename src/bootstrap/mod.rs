//! Bootstrap sequencer: from program text to a running entry point
//!
//! One parameterized core covers the three tiers:
//!
//! - **Bare**: evaluate the program and finish; no scheduler, no ticks.
//! - **Direct**: the program is the body of the entry function.
//! - **Compiled**: the program goes through a compiler that is itself a set
//!   of script modules, and the compiled chunk becomes the entry body.
//!
//! The sequencer starts the entry and hands the session to the
//! [`TickDriver`]; it never polls for completion itself.

use std::sync::Arc;
use std::time::Duration;

use mlua::{Function, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{wrap_entry, EngineSession, HostBindings, SchedulerHandle, SchedulerNames};
use crate::error::{lua_message, CompileError, RunError};
use crate::host::HostCapabilities;
use crate::lifecycle::{Lifecycle, Reporter, RunState, StatusSink};
use crate::module::{bundled, Fetch, HttpFetcher, ModuleFeed, ModuleRegistry, ModuleSpec};
use crate::tick::{Registration, StopHandle, TickDriver, DEFAULT_PERIOD};

/// Default name of the completion signal global
pub const DEFAULT_COMPLETION_FLAG: &str = "_host_done_";

/// Execution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bare,
    #[default]
    Direct,
    Compiled,
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bare" => Ok(Tier::Bare),
            "direct" => Ok(Tier::Direct),
            "compiled" => Ok(Tier::Compiled),
            other => Err(format!("unknown tier `{other}` (expected bare, direct or compiled)")),
        }
    }
}

/// A `require` run after registration, optionally bound to a global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreludeRequire {
    pub module: String,
    pub global: Option<String>,
}

impl PreludeRequire {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            global: None,
        }
    }

    pub fn bound_to(
        mut self,
        global: impl Into<String>,
    ) -> Self {
        self.global = Some(global.into());
        self
    }
}

/// Where the compile function lives and how program text is presented to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerEntry {
    /// Module exporting either a table holding `function` or the compile
    /// function itself; `None` means `function` is a global
    pub module: Option<String>,
    pub function: String,
    /// Template applied to the program text, `{code}` is replaced
    pub wrap: Option<String>,
}

/// Everything a run needs to know, independent of where it came from.
#[derive(Debug, Clone)]
pub struct BootPlan {
    pub tier: Tier,
    pub source_name: String,
    pub completion_flag: String,
    pub modules: Vec<ModuleSpec>,
    pub prelude: Vec<PreludeRequire>,
    pub compiler: Option<CompilerEntry>,
    pub bindings: HostBindings,
    pub scheduler: SchedulerNames,
    pub period: Duration,
    pub fetch_timeout: Duration,
}

impl BootPlan {
    /// Plan for `tier` with the bundled scheduler.
    pub fn bundled(tier: Tier) -> Self {
        let (modules, prelude) = match tier {
            Tier::Bare => (Vec::new(), Vec::new()),
            Tier::Direct | Tier::Compiled => (
                vec![ModuleSpec::bundled(bundled::SCHEDULER)],
                vec![PreludeRequire::new(bundled::SCHEDULER)],
            ),
        };
        Self {
            tier,
            source_name: "input.lua".to_string(),
            completion_flag: DEFAULT_COMPLETION_FLAG.to_string(),
            modules,
            prelude,
            compiler: None,
            bindings: HostBindings::default(),
            scheduler: SchedulerNames::default(),
            period: DEFAULT_PERIOD,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for BootPlan {
    fn default() -> Self {
        Self::bundled(Tier::Direct)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No program text; nothing happened
    NoInput,
    Done,
    Errored,
    /// Stopped by the host or the script before completion
    Cancelled,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub state: RunState,
    /// Modules registered in the session, in order
    pub modules: Vec<String>,
    pub error: Option<RunError>,
}

impl RunReport {
    fn from_lifecycle(
        lifecycle: Lifecycle,
        modules: Vec<String>,
    ) -> Self {
        let state = lifecycle.state();
        let outcome = match state {
            RunState::Done => RunOutcome::Done,
            RunState::Errored => RunOutcome::Errored,
            _ => RunOutcome::Cancelled,
        };
        Self {
            outcome,
            state,
            modules,
            error: lifecycle.into_error(),
        }
    }
}

enum Booted {
    /// Bare tier: nothing left to drive
    Finished,
    /// Host stop arrived before the entry started
    Stopped,
    /// Entry started, waiting for ticks
    Started(EngineSession, SchedulerHandle),
}

/// Runs one program per call to [`Runner::run`].
pub struct Runner {
    plan: BootPlan,
    caps: HostCapabilities,
    status: Arc<dyn StatusSink>,
    feed: ModuleFeed,
    registration: Arc<Registration>,
}

impl Runner {
    pub fn new(
        plan: BootPlan,
        caps: HostCapabilities,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let feed = ModuleFeed::new(Arc::new(HttpFetcher::new(plan.fetch_timeout)));
        Self {
            plan,
            caps,
            status,
            feed,
            registration: Registration::new(),
        }
    }

    /// Replace the fetch capability used for remote modules
    pub fn with_fetcher(
        mut self,
        fetcher: Arc<dyn Fetch>,
    ) -> Self {
        self.feed = ModuleFeed::new(fetcher);
        self
    }

    pub fn plan(&self) -> &BootPlan {
        &self.plan
    }

    /// Handle for a host-level stop request
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(Arc::clone(&self.registration))
    }

    /// Run `program` to a terminal state.
    pub async fn run(
        self,
        program: Option<&str>,
    ) -> RunReport {
        let mut lifecycle = Lifecycle::new(Reporter::new(Arc::clone(&self.status)));

        let Some(program) = program.filter(|p| !p.trim().is_empty()) else {
            info!("no program given");
            lifecycle.reporter_mut().no_input();
            return RunReport {
                outcome: RunOutcome::NoInput,
                state: RunState::Idle,
                modules: Vec::new(),
                error: None,
            };
        };

        lifecycle.advance(RunState::Loading);
        let mut modules = Vec::new();
        let booted = self.boot(program, &mut lifecycle, &mut modules).await;

        match booted {
            Err(err) => {
                lifecycle.fail(err);
                RunReport::from_lifecycle(lifecycle, modules)
            }
            Ok(Booted::Finished) | Ok(Booted::Stopped) => RunReport::from_lifecycle(lifecycle, modules),
            Ok(Booted::Started(session, scheduler)) => {
                let driver = TickDriver::new(
                    session,
                    scheduler,
                    Arc::clone(&self.caps.clock),
                    self.plan.completion_flag.clone(),
                    lifecycle,
                    Arc::clone(&self.registration),
                )
                .with_period(self.plan.period);
                let lifecycle = driver.drive().await;
                RunReport::from_lifecycle(lifecycle, modules)
            }
        }
    }

    async fn boot(
        &self,
        program: &str,
        lifecycle: &mut Lifecycle,
        registered: &mut Vec<String>,
    ) -> Result<Booted, RunError> {
        let plan = &self.plan;
        let resolved = self.feed.resolve(&plan.modules).await?;

        let mut session = EngineSession::create(self.caps.clone(), &plan.bindings)?;
        let result = ModuleRegistry::new(&mut session).register_all(&resolved);
        *registered = session.module_names();
        result?;
        for name in registered.iter() {
            if let Some(origin) = session.module_origin(name) {
                debug!(module = %name, %origin, "module available");
            }
        }
        info!(modules = registered.len(), tier = ?plan.tier, "modules installed");

        if plan.tier == Tier::Bare {
            lifecycle.advance(RunState::Running);
            session.evaluate(program, &plan.source_name)?;
            lifecycle.advance(RunState::Done);
            return Ok(Booted::Finished);
        }

        if plan.tier == Tier::Compiled {
            lifecycle.advance(RunState::Compiling);
        }
        for require in &plan.prelude {
            let exports = session.require(&require.module)?;
            if let Some(global) = &require.global {
                session.set_global(global, exports)?;
            }
        }

        let body = match plan.tier {
            Tier::Compiled => {
                let entry = plan.compiler.as_ref().ok_or_else(|| CompileError {
                    source_name: plan.source_name.clone(),
                    message: "compiled tier without a compiler entry".to_string(),
                })?;
                compile(&session, entry, program, &plan.source_name)?
            }
            _ => session.load_function(program, &plan.source_name)?,
        };

        if !self.registration.is_active() {
            info!("stopped before the entry point started");
            return Ok(Booted::Stopped);
        }

        lifecycle.advance(RunState::Running);
        let scheduler = SchedulerHandle::resolve(&session, &plan.scheduler)?;
        let entry = wrap_entry(&session, body, &plan.completion_flag)?;
        scheduler.start(entry)?;
        debug!("entry point started");
        Ok(Booted::Started(session, scheduler))
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("plan", &self.plan)
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}

/// Call the compiler pipeline on `program`.
///
/// The compile function follows the `load` convention: a chunk on success,
/// `nil, message` on failure. Raising is treated the same as `nil, message`.
pub fn compile(
    session: &EngineSession,
    entry: &CompilerEntry,
    program: &str,
    source_name: &str,
) -> Result<Function, CompileError> {
    let compile_error = |message: String| CompileError {
        source_name: source_name.to_string(),
        message,
    };

    let exports = match &entry.module {
        Some(module) => match session.require(module).map_err(|e| compile_error(e.message))? {
            Value::Table(table) => table
                .get::<Value>(entry.function.as_str())
                .map_err(|e| compile_error(lua_message(&e)))?,
            function @ Value::Function(_) => function,
            _ => Value::Nil,
        },
        None => session
            .get_global::<Value>(&entry.function)
            .map_err(|e| compile_error(e.message))?,
    };
    let Value::Function(compile_fn) = exports else {
        return Err(compile_error(format!(
            "compile function `{}` is not defined",
            entry.function
        )));
    };

    let text = match &entry.wrap {
        Some(template) => template.replace("{code}", program),
        None => program.to_string(),
    };
    let (chunk, message) = compile_fn
        .call::<(Value, Value)>((text, source_name))
        .map_err(|e| compile_error(lua_message(&e)))?;

    match chunk {
        Value::Function(chunk) => Ok(chunk),
        _ => {
            let message = match message {
                Value::String(s) => s.to_string_lossy().to_string(),
                Value::Nil => "compiler returned no chunk".to_string(),
                other => format!("compiler returned {}", other.type_name()),
            };
            Err(compile_error(message))
        }
    }
}
