//! Host capabilities handed to an engine session
//!
//! The interpreter never discovers host functionality by name at runtime; a
//! session is built from a [`HostCapabilities`] value and binds what it needs.

use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Monotonic millisecond clock owned by the host.
pub trait Clock: Send + Sync {
    /// Current host time in milliseconds, never decreasing
    fn now(&self) -> i64;
}

/// Wall-clock aligned monotonic clock.
///
/// Starts at the Unix time of construction and advances with `Instant`, so it
/// keeps epoch-like values without jumping when the system clock is adjusted.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
    base_ms: i64,
}

impl SystemClock {
    pub fn new() -> Self {
        let base_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            origin: Instant::now(),
            base_ms,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        self.base_ms + self.origin.elapsed().as_millis() as i64
    }
}

/// Clock moved by hand, for deterministic drivers.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock reading `start`
    pub fn new(start: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Jump to an absolute time (may go backwards to simulate skew)
    pub fn set(
        &self,
        now: i64,
    ) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `ms`
    pub fn advance(
        &self,
        ms: i64,
    ) -> i64 {
        self.now.fetch_add(ms, Ordering::SeqCst) + ms
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Destination of the interpreter's `print`.
pub trait OutputSink: Send + Sync {
    /// Receive one `print` call worth of already-stringified values
    fn print(
        &self,
        values: &[String],
    );
}

/// Join print values the way every sink renders them.
pub fn render_line(values: &[String]) -> String {
    let mut line = values.join("\t");
    line.push('\n');
    line
}

/// Writes printed lines to the process stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn print(
        &self,
        values: &[String],
    ) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(render_line(values).as_bytes());
        let _ = out.flush();
    }
}

/// In-memory output, shared between the session and whoever inspects it.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    text: Arc<Mutex<String>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything printed so far
    pub fn contents(&self) -> String {
        self.text.lock().clone()
    }
}

impl OutputSink for OutputBuffer {
    fn print(
        &self,
        values: &[String],
    ) {
        self.text.lock().push_str(&render_line(values));
    }
}

/// Capability set injected into an engine session at construction.
#[derive(Clone)]
pub struct HostCapabilities {
    pub output: Arc<dyn OutputSink>,
    pub clock: Arc<dyn Clock>,
}

impl HostCapabilities {
    pub fn new(
        output: Arc<dyn OutputSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { output, clock }
    }

    /// Stdout and the system clock
    pub fn console() -> Self {
        Self::new(Arc::new(StdoutSink), Arc::new(SystemClock::new()))
    }
}

impl std::fmt::Debug for HostCapabilities {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HostCapabilities")
            .field("now", &self.clock.now())
            .finish_non_exhaustive()
    }
}
