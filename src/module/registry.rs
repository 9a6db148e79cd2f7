//! Module registry: places resolved modules into a session's module table
//!
//! Registration is fail-fast and not transactional. `register_all` stops at
//! the first failing module; every module before it stays registered and the
//! session is discarded.

use tracing::{debug, warn};

use super::{ModuleOrigin, ResolvedModule};
use crate::engine::EngineSession;
use crate::error::RegistrationError;

/// Registration front of one session.
#[derive(Debug)]
pub struct ModuleRegistry<'s> {
    session: &'s mut EngineSession,
}

impl<'s> ModuleRegistry<'s> {
    pub fn new(session: &'s mut EngineSession) -> Self {
        Self { session }
    }

    /// Register an in-memory module.
    pub fn register(
        &mut self,
        name: &str,
        source: &str,
    ) -> Result<(), RegistrationError> {
        self.install(name, source, ModuleOrigin::Static)
    }

    /// Register one resolved module, keeping its origin.
    pub fn register_module(
        &mut self,
        module: &ResolvedModule,
    ) -> Result<(), RegistrationError> {
        self.install(&module.name, &module.source, module.origin.clone())
    }

    /// Register `modules` in order; returns how many were registered.
    pub fn register_all(
        &mut self,
        modules: &[ResolvedModule],
    ) -> Result<usize, RegistrationError> {
        for module in modules {
            self.register_module(module)?;
        }
        debug!(count = modules.len(), "module batch registered");
        Ok(modules.len())
    }

    fn install(
        &mut self,
        name: &str,
        source: &str,
        origin: ModuleOrigin,
    ) -> Result<(), RegistrationError> {
        match self.session.preload(name, source, origin.clone()) {
            Ok(()) => {
                debug!(module = name, %origin, "module registered");
                Ok(())
            }
            Err(err) => {
                warn!(module = name, error = %err, "module registration failed, discarding session");
                self.session.discard();
                Err(err)
            }
        }
    }
}
