//! Run lifecycle and status reporting
//!
//! [`Lifecycle`] holds the one authoritative [`RunState`] of a run and is the
//! only path to the status channel, so status text can neither move backwards
//! nor interleave.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::RunError;

/// State of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    #[default]
    Idle,
    Loading,
    Compiling,
    Running,
    Done,
    Errored,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Errored)
    }

    /// Transition table of a run
    pub fn can_transition_to(
        self,
        next: RunState,
    ) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, Compiling)
                | (Loading, Running)
                | (Compiling, Running)
                | (Running, Done)
                | (Loading, Errored)
                | (Compiling, Errored)
                | (Running, Errored)
        )
    }

    /// User-visible status text; `Idle` shows nothing
    pub fn status_text(self) -> Option<&'static str> {
        match self {
            RunState::Idle => None,
            RunState::Loading => Some("Loading..."),
            RunState::Compiling => Some("Compiling..."),
            RunState::Running => Some("Running..."),
            RunState::Done => Some("Done."),
            RunState::Errored => Some("Error."),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Loading => "loading",
            RunState::Compiling => "compiling",
            RunState::Running => "running",
            RunState::Done => "done",
            RunState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Status text shown when there is no program to run
pub const NO_PROGRAM: &str = "No program.";

/// The host's status channel.
pub trait StatusSink: Send + Sync {
    /// Replace the status line
    fn set_status(
        &self,
        text: &str,
    );

    /// Append to the error buffer
    fn append_error(
        &self,
        text: &str,
    );
}

#[derive(Debug, Default)]
struct Board {
    status: String,
    errors: String,
    history: Vec<String>,
}

/// In-memory status channel, cloneable so the host can read it back.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    board: Arc<Mutex<Board>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status line
    pub fn status(&self) -> String {
        self.board.lock().status.clone()
    }

    /// Everything appended to the error buffer
    pub fn errors(&self) -> String {
        self.board.lock().errors.clone()
    }

    /// Every status line ever shown, oldest first
    pub fn history(&self) -> Vec<String> {
        self.board.lock().history.clone()
    }
}

impl StatusSink for StatusBoard {
    fn set_status(
        &self,
        text: &str,
    ) {
        let mut board = self.board.lock();
        board.status = text.to_string();
        board.history.push(text.to_string());
    }

    fn append_error(
        &self,
        text: &str,
    ) {
        self.board.lock().errors.push_str(text);
    }
}

/// Status channel on stderr, for terminal use.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrStatus;

impl StatusSink for StderrStatus {
    fn set_status(
        &self,
        text: &str,
    ) {
        eprintln!("[status] {text}");
    }

    fn append_error(
        &self,
        text: &str,
    ) {
        eprint!("{text}");
    }
}

/// Projects state transitions onto a [`StatusSink`].
pub struct Reporter {
    sink: Arc<dyn StatusSink>,
    shown: RunState,
}

impl Reporter {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self {
            sink,
            shown: RunState::Idle,
        }
    }

    fn show(
        &mut self,
        state: RunState,
    ) {
        self.shown = state;
        if let Some(text) = state.status_text() {
            self.sink.set_status(text);
        }
    }

    fn error(
        &mut self,
        err: &RunError,
    ) {
        self.sink.append_error(&format!("ERROR: {err}\n"));
    }

    /// Report that there was nothing to run
    pub fn no_input(&mut self) {
        if self.shown == RunState::Idle {
            self.sink.set_status(NO_PROGRAM);
        }
    }
}

impl fmt::Debug for Reporter {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("shown", &self.shown)
            .finish_non_exhaustive()
    }
}

/// Authoritative state of one run plus its reporter.
#[derive(Debug)]
pub struct Lifecycle {
    state: RunState,
    reporter: Reporter,
    error: Option<RunError>,
}

impl Lifecycle {
    pub fn new(reporter: Reporter) -> Self {
        Self {
            state: RunState::Idle,
            reporter,
            error: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Error that ended the run, if it ended in `Errored`
    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    pub fn reporter_mut(&mut self) -> &mut Reporter {
        &mut self.reporter
    }

    /// Move to `next`; illegal transitions are refused and reported `false`.
    pub fn advance(
        &mut self,
        next: RunState,
    ) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "refused run state transition");
            return false;
        }
        info!(from = %self.state, to = %next, "run state");
        self.state = next;
        self.reporter.show(next);
        true
    }

    /// Move to `Errored`, recording and reporting `err`.
    pub fn fail(
        &mut self,
        err: RunError,
    ) -> bool {
        if !self.state.can_transition_to(RunState::Errored) {
            warn!(state = %self.state, error = %err, "error after run ended");
            return false;
        }
        self.reporter.error(&err);
        self.error = Some(err);
        self.advance(RunState::Errored)
    }

    pub fn into_error(self) -> Option<RunError> {
        self.error
    }
}
