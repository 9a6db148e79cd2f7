//! Host side of the cooperative scheduler protocol
//!
//! The interpreter's scheduler exposes `start`, `emit` and `stop` as globals.
//! The host only ever calls these three; suspension and wake-up happen inside
//! the interpreter.

use mlua::{Function, Value};
use tracing::debug;

use super::EngineSession;
use crate::error::EvalError;

/// Global names of the scheduler entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerNames {
    pub start: String,
    pub emit: String,
    pub stop: String,
    /// Event name used for clock ticks
    pub clock_event: String,
}

impl Default for SchedulerNames {
    fn default() -> Self {
        Self {
            start: "start".to_string(),
            emit: "emit".to_string(),
            stop: "stop".to_string(),
            clock_event: "clock".to_string(),
        }
    }
}

/// Resolved scheduler functions of one session.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    start: Function,
    emit: Function,
    stop: Function,
    clock_event: String,
}

impl SchedulerHandle {
    /// Look the scheduler functions up after the prelude ran.
    pub fn resolve(
        session: &EngineSession,
        names: &SchedulerNames,
    ) -> Result<Self, EvalError> {
        Ok(Self {
            start: lookup(session, &names.start)?,
            emit: lookup(session, &names.emit)?,
            stop: lookup(session, &names.stop)?,
            clock_event: names.clock_event.clone(),
        })
    }

    /// Hand the entry function to the scheduler.
    ///
    /// Returns once the entry finished or parked itself on a wait.
    pub fn start(
        &self,
        entry: Function,
    ) -> Result<(), EvalError> {
        self.start
            .call::<()>(entry)
            .map_err(|e| EvalError::from_lua(&e, "start"))
    }

    /// Forward one clock event `(dt, now)`.
    pub fn emit_clock(
        &self,
        dt: i64,
        now: i64,
    ) -> Result<(), EvalError> {
        debug!(dt, now, "emit clock");
        self.emit
            .call::<()>((self.clock_event.as_str(), dt, now))
            .map_err(|e| EvalError::from_lua(&e, "emit"))
    }

    /// Release whatever is still suspended.
    pub fn stop(&self) -> Result<(), EvalError> {
        self.stop
            .call::<()>(())
            .map_err(|e| EvalError::from_lua(&e, "stop"))
    }
}

fn lookup(
    session: &EngineSession,
    name: &str,
) -> Result<Function, EvalError> {
    match session.get_global::<Value>(name)? {
        Value::Function(function) => Ok(function),
        _ => Err(EvalError {
            message: format!("scheduler function `{name}` is not defined"),
            source_name: name.to_string(),
        }),
    }
}

/// Completion wrapper around the user entry.
///
/// Must stay in Lua: a native frame between the coroutine and user code
/// would make every wait inside user code fail to yield.
const ENTRY_WRAPPER: &str = r#"
local body, flag = ...
return function(...)
    local ok, err = pcall(body, ...)
    rawset(_G, flag, true)
    if not ok then
        error(err, 0)
    end
end
"#;

/// Wrap `body` so that returning (or raising) sets the global `flag`.
pub fn wrap_entry(
    session: &EngineSession,
    body: Function,
    flag: &str,
) -> Result<Function, EvalError> {
    session.set_global(flag, false)?;
    session
        .lua()
        .load(ENTRY_WRAPPER)
        .set_name("=entry")
        .call::<Function>((body, flag))
        .map_err(|e| EvalError::from_lua(&e, "entry"))
}
