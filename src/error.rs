//! Error taxonomy for a host run
//!
//! Every failure that can end a run is one of four kinds. None of them is
//! retried; all of them move the run to `Errored`.

use std::fmt;

use thiserror::Error;

/// Module could not be placed into the interpreter's module table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Module name is empty
    #[error("invalid module name: empty")]
    EmptyName,

    /// The module was already required, so its preload slot is frozen
    #[error("module already instantiated: {name}")]
    AlreadyInstantiated { name: String },

    /// Module source does not load
    #[error("invalid module {name}: {message}")]
    Invalid { name: String, message: String },

    /// Session was discarded after an earlier registration failure
    #[error("session discarded, cannot register {name}")]
    Discarded { name: String },
}

impl RegistrationError {
    /// Name of the module that failed, if any
    pub fn module_name(&self) -> Option<&str> {
        match self {
            RegistrationError::EmptyName => None,
            RegistrationError::AlreadyInstantiated { name }
            | RegistrationError::Invalid { name, .. }
            | RegistrationError::Discarded { name } => Some(name),
        }
    }
}

/// Fetching a module source failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct TransportError {
    /// Module whose source failed to arrive
    pub module: String,
    /// Location that was requested
    pub url: String,
    /// HTTP-like status, `None` when the request never got a response
    pub status: Option<u16>,
    /// Transport detail
    pub message: String,
}

impl fmt::Display for TransportError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "fetch {}: {}", self.module, code),
            None => write!(f, "fetch {}: {}", self.module, self.message),
        }
    }
}

/// Compiler pipeline rejected the program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source_name}: {message}")]
pub struct CompileError {
    pub source_name: String,
    pub message: String,
}

/// Interpreter raised an error while running code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
    pub source_name: String,
}

impl EvalError {
    /// Wrap an interpreter error raised while running `source_name`
    pub fn from_lua(
        err: &mlua::Error,
        source_name: &str,
    ) -> Self {
        Self {
            message: lua_message(err),
            source_name: source_name.to_string(),
        }
    }
}

/// Any error that terminates a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Message text of an interpreter error without the Rust-side wrapping.
///
/// Callback errors carry the interesting part in their cause chain.
pub(crate) fn lua_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => lua_message(cause),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::ExternalError(inner) => inner.to_string(),
        other => other.to_string(),
    }
}
