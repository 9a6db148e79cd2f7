//! Engine session: one Lua interpreter per run
//!
//! The session owns the interpreter, binds the host capabilities at
//! construction and keeps the view of the module table the registry fills.

pub mod scheduler;

pub use scheduler::{wrap_entry, SchedulerHandle, SchedulerNames};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use mlua::{FromLua, FromLuaMulti, Function, IntoLua, IntoLuaMulti, Lua, MultiValue, Table, Value, Variadic};
use tracing::debug;

use crate::error::{lua_message, EvalError, RegistrationError};
use crate::host::HostCapabilities;
use crate::module::ModuleOrigin;

/// Global names under which host functions are installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBindings {
    /// Returns the host clock in milliseconds
    pub now: String,
    /// Asks the host to drop its periodic callback
    pub close: String,
}

impl Default for HostBindings {
    fn default() -> Self {
        Self {
            now: "host_now".to_string(),
            close: "host_close".to_string(),
        }
    }
}

/// A single interpreter instance and the host state attached to it.
pub struct EngineSession {
    lua: Lua,
    /// Registered modules in registration order
    modules: IndexMap<String, ModuleOrigin>,
    close_requested: Arc<AtomicBool>,
    discarded: bool,
}

impl EngineSession {
    /// Create a session with `print`, the clock and the close request bound.
    pub fn create(
        caps: HostCapabilities,
        bindings: &HostBindings,
    ) -> Result<Self, EvalError> {
        let session = Self {
            lua: Lua::new(),
            modules: IndexMap::new(),
            close_requested: Arc::new(AtomicBool::new(false)),
            discarded: false,
        };

        let output = Arc::clone(&caps.output);
        let tostring: Function = session.get_global("tostring")?;
        session.define_host_function("print", move |_, args: Variadic<Value>| {
            let mut values = Vec::with_capacity(args.len());
            for value in args.iter().cloned() {
                values.push(tostring.call::<String>(value)?);
            }
            output.print(&values);
            Ok(())
        })?;

        let clock = Arc::clone(&caps.clock);
        session.define_host_function(&bindings.now, move |_, ()| Ok(clock.now()))?;

        let close = Arc::clone(&session.close_requested);
        session.define_host_function(&bindings.close, move |_, ()| {
            close.store(true, Ordering::SeqCst);
            Ok(())
        })?;

        debug!("engine session created");
        Ok(session)
    }

    /// Install a native function as a global.
    pub fn define_host_function<A, R, F>(
        &self,
        name: &str,
        func: F,
    ) -> Result<(), EvalError>
    where
        A: FromLuaMulti,
        R: IntoLuaMulti,
        F: Fn(&Lua, A) -> mlua::Result<R> + mlua::MaybeSend + 'static,
    {
        let function = self
            .lua
            .create_function(func)
            .map_err(|e| EvalError::from_lua(&e, name))?;
        self.set_global(name, function)
    }

    pub fn set_global<V: IntoLua>(
        &self,
        name: &str,
        value: V,
    ) -> Result<(), EvalError> {
        self.lua
            .globals()
            .set(name, value)
            .map_err(|e| EvalError::from_lua(&e, name))
    }

    pub fn get_global<V: FromLua>(
        &self,
        name: &str,
    ) -> Result<V, EvalError> {
        self.lua
            .globals()
            .get(name)
            .map_err(|e| EvalError::from_lua(&e, name))
    }

    /// Whether a global holds a value other than `nil` and `false`
    pub fn global_is_truthy(
        &self,
        name: &str,
    ) -> Result<bool, EvalError> {
        let value: Value = self.get_global(name)?;
        Ok(!matches!(value, Value::Nil | Value::Boolean(false)))
    }

    /// Run `source` to completion and return its first result.
    ///
    /// Code that suspends inside the scheduler returns as soon as the top-level
    /// chunk does; the suspended continuation stays with the scheduler.
    pub fn evaluate(
        &self,
        source: &str,
        source_name: &str,
    ) -> Result<Value, EvalError> {
        self.ensure_live(source_name)?;
        let results: MultiValue = self
            .lua
            .load(source)
            .set_name(format!("@{source_name}"))
            .call(())
            .map_err(|e| EvalError::from_lua(&e, source_name))?;
        Ok(results.into_iter().next().unwrap_or(Value::Nil))
    }

    /// Compile `source` into a chunk function without running it.
    pub fn load_function(
        &self,
        source: &str,
        source_name: &str,
    ) -> Result<Function, EvalError> {
        self.ensure_live(source_name)?;
        self.lua
            .load(source)
            .set_name(format!("@{source_name}"))
            .into_function()
            .map_err(|e| EvalError::from_lua(&e, source_name))
    }

    /// `require(module)` through the interpreter's own import mechanism.
    pub fn require(
        &self,
        module: &str,
    ) -> Result<Value, EvalError> {
        self.ensure_live(module)?;
        let require: Function = self.get_global("require")?;
        require
            .call::<Value>(module)
            .map_err(|e| EvalError::from_lua(&e, module))
    }

    /// Install `source` as a lazy loader in `package.preload[name]`.
    ///
    /// Overwrites an earlier registration until the module is first required;
    /// after that the slot is frozen.
    pub fn preload(
        &mut self,
        name: &str,
        source: &str,
        origin: ModuleOrigin,
    ) -> Result<(), RegistrationError> {
        if self.discarded {
            return Err(RegistrationError::Discarded {
                name: name.to_string(),
            });
        }
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if self.is_instantiated(name)? {
            return Err(RegistrationError::AlreadyInstantiated {
                name: name.to_string(),
            });
        }

        let invalid = |e: mlua::Error| RegistrationError::Invalid {
            name: name.to_string(),
            message: lua_message(&e),
        };
        let loader = self
            .lua
            .load(source)
            .set_name(format!("@{name}"))
            .into_function()
            .map_err(invalid)?;
        self.package_table("preload")
            .map_err(invalid)?
            .set(name, loader)
            .map_err(invalid)?;

        if self.modules.insert(name.to_string(), origin).is_some() {
            debug!(module = name, "module re-registered before first use");
        }
        Ok(())
    }

    /// Whether `require(name)` already ran
    pub fn is_instantiated(
        &self,
        name: &str,
    ) -> Result<bool, RegistrationError> {
        let invalid = |e: mlua::Error| RegistrationError::Invalid {
            name: name.to_string(),
            message: lua_message(&e),
        };
        let loaded: Value = self
            .package_table("loaded")
            .map_err(invalid)?
            .get(name)
            .map_err(invalid)?;
        Ok(!loaded.is_nil())
    }

    /// Registered module names in registration order
    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn module_origin(
        &self,
        name: &str,
    ) -> Option<&ModuleOrigin> {
        self.modules.get(name)
    }

    /// Mark the session unusable after a failed registration
    pub fn discard(&mut self) {
        self.discarded = true;
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    /// Consume a pending close request raised by the script
    pub fn take_close_request(&self) -> bool {
        self.close_requested.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn lua(&self) -> &Lua {
        &self.lua
    }

    fn package_table(
        &self,
        field: &str,
    ) -> mlua::Result<Table> {
        let package: Table = self.lua.globals().get("package")?;
        package.get(field)
    }

    fn ensure_live(
        &self,
        source_name: &str,
    ) -> Result<(), EvalError> {
        if self.discarded {
            return Err(EvalError {
                message: "session discarded after a failed module registration".to_string(),
                source_name: source_name.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for EngineSession {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("modules", &self.modules)
            .field("discarded", &self.discarded)
            .finish_non_exhaustive()
    }
}
