//! Client session
//!
//! A [`Session`] owns exactly one interface handle and drives it through its
//! lifecycle:
//!
//! ```text
//! Unopened ──create──► Created ──configure──► Connected ──destroy──► Freed
//!                         └──────────────destroy──────────────────────┘
//! ```
//!
//! On top of the handle it provides the control state machine
//! (`request_control` / `release_control` / `server_state`), the script
//! execution engine and the per-session status callback wiring.
//!
//! ## Local busy gate
//!
//! Independently of the server's Idle/Active state, a session refuses
//! control transitions, state queries and script operations while it is
//! itself busy: either another thread is inside a blocking operation on the
//! same session, or a script started without waiting may still be running.
//! In the latter case the gate asks the server once whether the script is
//! still running before refusing with [`MrcError::ClientBusy`].
//!
//! All methods take `&self`; the session is `Sync` so a second thread can
//! poll or wait on it while the owning thread is blocked in [`Session::run`].

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codes::*;
use crate::error::{ErrorCode, ErrorKind, MrcError, MrcResult};
use crate::normalizer::ErrorNormalizer;
use crate::status::{self, CallbackState, StatusKind, StatusMask, Subscriber, SubscriberTable};
use crate::transport::{RawHandle, RemoteInterface};

// =============================================================================
// Public value types
// =============================================================================

/// Where a session handle is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// No handle has been created yet.
    Unopened,
    /// Handle allocated, transport parameters not yet bound.
    Created,
    /// Transport parameters bound. Reachability is checked by the next call.
    Connected,
    /// Handle released. Terminal.
    Freed,
}

/// Server control state as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// The server could not determine its own state.
    Unknown,
    /// MetroPro is not running.
    Stopped,
    /// Accepts operator and remote input.
    Idle,
    /// Ignores operator input except the cancel key.
    Active,
}

impl ServerState {
    /// Decode a raw state code. Unrecognised codes read as `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            MRC_SERVER_STATE_STOPPED => ServerState::Stopped,
            MRC_SERVER_STATE_IDLE => ServerState::Idle,
            MRC_SERVER_STATE_ACTIVE => ServerState::Active,
            _ => ServerState::Unknown,
        }
    }

    /// Raw state code.
    pub fn code(self) -> i32 {
        match self {
            ServerState::Unknown => MRC_SERVER_STATE_UNKNOWN,
            ServerState::Stopped => MRC_SERVER_STATE_STOPPED,
            ServerState::Idle => MRC_SERVER_STATE_IDLE,
            ServerState::Active => MRC_SERVER_STATE_ACTIVE,
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Unknown => "unknown",
            ServerState::Stopped => "stopped",
            ServerState::Idle => "idle",
            ServerState::Active => "active",
        };
        f.write_str(name)
    }
}

/// Which frame a script runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScriptContext {
    /// The MetroPro desktop itself.
    #[serde(rename = "desktop")]
    ServerDesktop,
    /// The front-most open application.
    #[default]
    #[serde(rename = "frontmost_app")]
    FrontmostApplication,
}

impl ScriptContext {
    /// Raw context code.
    pub fn code(self) -> i32 {
        match self {
            ScriptContext::ServerDesktop => MRC_SCRIPT_CONTEXT_DESKTOP,
            ScriptContext::FrontmostApplication => MRC_SCRIPT_CONTEXT_FRONTMOST_APP,
        }
    }
}

/// A script to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptRequest {
    /// Path of a script file on the server computer.
    FileReference(String),
    /// Script source text.
    InlineText(String),
}

/// Result of a completed script run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptResult {
    /// Exit code reported by the script (always success here; failures are
    /// surfaced as [`MrcError::ScriptExecution`]).
    pub error_code: ErrorCode,
    /// Text output, truncated to the session's buffer capacity.
    pub output: String,
}

/// What [`Session::run`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The script ran to completion.
    Completed(ScriptResult),
    /// The script was started and may still be running.
    Started,
}

/// Which representation of the stop value to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopValueKind {
    /// The numeric stop value.
    Numeric,
    /// The string stop value.
    Text,
}

/// The value a script passed to its `stop` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StopValue {
    /// Numeric form.
    Numeric(f64),
    /// String form.
    Text(String),
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Default)]
struct ScriptSlots {
    filename: String,
    text: String,
}

impl ScriptSlots {
    fn has_source(&self) -> bool {
        !self.filename.is_empty() || !self.text.is_empty()
    }
}

#[derive(Debug)]
struct Lifecycle {
    handle: RawHandle,
    state: HandleState,
    script: ScriptSlots,
    mask: StatusMask,
    correlation_id: Option<i32>,
}

#[derive(Debug, Default)]
struct Activity {
    // A thread is inside a gated operation
    busy: bool,
    // A script was started without waiting and has not been seen to finish
    script_pending: bool,
}

/// One logical connection to a MetroPro server.
pub struct Session {
    normalizer: ErrorNormalizer,
    lifecycle: Mutex<Lifecycle>,
    activity: Mutex<Activity>,
    became_idle: Condvar,
    subscribers: Arc<SubscriberTable>,
    output_capacity: usize,
}

/// Clears the busy flag when a gated operation ends.
struct BusyGuard<'a> {
    session: &'a Session,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.session.activity().busy = false;
        self.session.became_idle.notify_all();
    }
}

impl Session {
    /// A session with no handle yet. Call [`create`](Self::create) next.
    pub fn new(remote: Arc<dyn RemoteInterface>) -> Self {
        Self {
            normalizer: ErrorNormalizer::new(remote),
            lifecycle: Mutex::new(Lifecycle {
                handle: MRC_INVALID_HANDLE,
                state: HandleState::Unopened,
                script: ScriptSlots::default(),
                mask: StatusMask::NONE,
                correlation_id: None,
            }),
            activity: Mutex::new(Activity::default()),
            became_idle: Condvar::new(),
            subscribers: Arc::new(SubscriberTable::new()),
            output_capacity: MRC_SCRIPT_OUTPUT_BUFSIZ,
        }
    }

    /// Create a session and allocate its handle in one step.
    pub fn open(remote: Arc<dyn RemoteInterface>) -> MrcResult<Self> {
        let session = Self::new(remote);
        session.create()?;
        Ok(session)
    }

    /// Set the buffer size used to fetch script output and stop strings.
    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn activity(&self) -> MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // Handle lifecycle
    // -------------------------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> HandleState {
        self.lifecycle().state
    }

    /// The raw handle value; [`MRC_INVALID_HANDLE`] unless the handle is live.
    pub fn raw_handle(&self) -> RawHandle {
        self.lifecycle().handle
    }

    /// The live handle, or the error an operation on it should fail with.
    pub fn handle(&self) -> MrcResult<RawHandle> {
        let lifecycle = self.lifecycle();
        match lifecycle.state {
            HandleState::Unopened => Err(MrcError::NotInitialized),
            HandleState::Freed => Err(MrcError::InvalidHandle),
            HandleState::Created | HandleState::Connected => Ok(lifecycle.handle),
        }
    }

    /// Allocate the interface handle.
    pub fn create(&self) -> MrcResult<()> {
        let mut lifecycle = self.lifecycle();
        match lifecycle.state {
            HandleState::Unopened => {}
            HandleState::Freed => return Err(MrcError::InvalidHandle),
            HandleState::Created | HandleState::Connected => {
                return Err(MrcError::InvalidArgument(
                    "session already owns a handle".to_string(),
                ))
            }
        }
        let handle = self
            .normalizer
            .call("new_interface", |r| r.new_interface())?;
        lifecycle.handle = handle;
        lifecycle.state = HandleState::Created;
        debug!(handle, "Created interface");
        Ok(())
    }

    /// Bind transport parameters. No network I/O happens here.
    pub fn configure(&self, protocol: &str, network_address: &str, end_point: &str) -> MrcResult<()> {
        let handle = self.handle()?;
        if protocol.is_empty() {
            return Err(MrcError::InvalidArgument("protocol must not be empty".to_string()));
        }
        if end_point.is_empty() {
            return Err(MrcError::InvalidArgument("end point must not be empty".to_string()));
        }
        self.normalizer.call("set_interface_params", |r| {
            r.set_interface_params(handle, protocol, network_address, end_point)
        })?;

        let mut lifecycle = self.lifecycle();
        if lifecycle.handle == handle {
            lifecycle.state = HandleState::Connected;
        }
        debug!(handle, protocol, network_address, end_point, "Configured interface");
        Ok(())
    }

    /// Round trip to the server to verify it is reachable.
    pub fn ping(&self) -> MrcResult<()> {
        let handle = self.handle()?;
        self.normalizer.call("ping_server", |r| r.ping_server(handle))
    }

    /// Release the handle. Every later operation fails with `InvalidHandle`.
    pub fn destroy(&self) -> MrcResult<()> {
        let mut lifecycle = self.lifecycle();
        if !matches!(lifecycle.state, HandleState::Created | HandleState::Connected) {
            return Err(MrcError::InvalidHandle);
        }
        let handle = lifecycle.handle;
        self.normalizer
            .call("free_interface", |r| r.free_interface(handle))?;

        if let Some(id) = lifecycle.correlation_id.take() {
            status::unregister(id, &self.subscribers);
        }
        lifecycle.handle = MRC_INVALID_HANDLE;
        lifecycle.state = HandleState::Freed;
        lifecycle.mask = StatusMask::NONE;
        drop(lifecycle);

        let mut activity = self.activity();
        activity.script_pending = false;
        drop(activity);
        self.became_idle.notify_all();

        debug!(handle, "Freed interface");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Local busy gate
    // -------------------------------------------------------------------------

    /// Enter a gated operation, or fail with `ClientBusy`.
    fn enter(&self, handle: RawHandle) -> MrcResult<BusyGuard<'_>> {
        self.refresh_pending(handle)?;
        let mut activity = self.activity();
        if activity.busy || activity.script_pending {
            return Err(MrcError::ClientBusy);
        }
        activity.busy = true;
        Ok(BusyGuard { session: self })
    }

    /// Clear the pending flag once the server says the script is done.
    fn refresh_pending(&self, handle: RawHandle) -> MrcResult<()> {
        if !self.activity().script_pending {
            return Ok(());
        }
        if self.query_running(handle)? {
            return Ok(());
        }
        self.activity().script_pending = false;
        self.became_idle.notify_all();
        Ok(())
    }

    fn query_running(&self, handle: RawHandle) -> MrcResult<bool> {
        self.normalizer
            .call("get_script_running", |r| r.get_script_running(handle))
    }

    /// Whether this session is neither inside an operation nor running a script.
    pub fn is_idle(&self) -> MrcResult<bool> {
        let handle = self.handle()?;
        self.refresh_pending(handle)?;
        let activity = self.activity();
        Ok(!activity.busy && !activity.script_pending)
    }

    // -------------------------------------------------------------------------
    // Control state machine
    // -------------------------------------------------------------------------

    /// Ask the server to enter the active state. No-op if already active.
    pub fn request_control(&self) -> MrcResult<()> {
        let handle = self.handle()?;
        let _busy = self.enter(handle)?;
        self.normalizer
            .call("request_control", |r| r.request_control(handle))?;
        info!(handle, "Server control requested");
        Ok(())
    }

    /// Return the server to the idle state. No-op if already idle.
    pub fn release_control(&self) -> MrcResult<()> {
        let handle = self.handle()?;
        let _busy = self.enter(handle)?;
        self.normalizer
            .call("release_control", |r| r.release_control(handle))?;
        info!(handle, "Server control released");
        Ok(())
    }

    /// Query the server's control state. Never cached.
    pub fn server_state(&self) -> MrcResult<ServerState> {
        let handle = self.handle()?;
        let _busy = self.enter(handle)?;
        let code = self
            .normalizer
            .call("get_server_state", |r| r.get_server_state(handle))?;
        Ok(ServerState::from_code(code))
    }

    // -------------------------------------------------------------------------
    // Script execution
    // -------------------------------------------------------------------------

    /// Set the file reference or the inline text. An empty value clears it.
    ///
    /// The other source is left alone: when both are set the file reference
    /// is what runs.
    pub fn set_script_source(&self, request: &ScriptRequest) -> MrcResult<()> {
        let handle = self.handle()?;
        let _busy = self.enter(handle)?;
        match request {
            ScriptRequest::FileReference(path) => {
                self.normalizer
                    .call("set_script_filename", |r| r.set_script_filename(handle, path))?;
                self.lifecycle().script.filename = path.clone();
            }
            ScriptRequest::InlineText(text) => {
                self.normalizer
                    .call("set_script_text", |r| r.set_script_text(handle, text))?;
                self.lifecycle().script.text = text.clone();
            }
        }
        Ok(())
    }

    /// Select the frame scripts run in.
    pub fn set_script_context(&self, context: ScriptContext) -> MrcResult<()> {
        let handle = self.handle()?;
        let _busy = self.enter(handle)?;
        self.normalizer.call("set_script_context", |r| {
            r.set_script_context(handle, context.code())
        })
    }

    /// Run the configured script.
    ///
    /// With `wait_for_completion` the calling thread blocks until the server
    /// reports completion and the result is fetched. Without it the script is
    /// started and the call returns at once; observe completion with
    /// [`is_running`](Self::is_running), a `ScriptEnd` subscriber or
    /// [`wait_idle`](Self::wait_idle), then call [`result`](Self::result).
    ///
    /// Fails with `NoScriptSource` without contacting the server when neither
    /// a file reference nor inline text is set.
    pub fn run(&self, wait_for_completion: bool) -> MrcResult<RunOutcome> {
        let handle = self.handle()?;
        if !self.lifecycle().script.has_source() {
            return Err(MrcError::NoScriptSource);
        }
        let _busy = self.enter(handle)?;

        debug!(handle, wait_for_completion, "Running script");
        self.normalizer
            .call("run_script", |r| r.run_script(handle, wait_for_completion))
            .map_err(into_script_failure)?;

        if wait_for_completion {
            self.finish_run(handle).map(RunOutcome::Completed)
        } else {
            self.activity().script_pending = true;
            Ok(RunOutcome::Started)
        }
    }

    /// Start the script without waiting. Same as `run(false)`.
    pub fn start(&self) -> MrcResult<()> {
        self.run(false).map(|_| ())
    }

    /// Start the script, then poll every `interval` until it is done.
    ///
    /// Equivalent to a blocking run, but the calling thread sleeps between
    /// polls instead of blocking inside the library.
    pub fn run_polling(&self, interval: Duration) -> MrcResult<ScriptResult> {
        self.start()?;
        while self.is_running()? {
            thread::sleep(interval);
        }
        self.result()
    }

    /// Async form of [`run_polling`](Self::run_polling).
    ///
    /// Yields to the runtime between polls. Dropping the future stops polling;
    /// the script keeps running on the server and the session stays busy
    /// until it is seen to finish.
    pub async fn run_polled(&self, interval: Duration) -> MrcResult<ScriptResult> {
        self.start()?;
        while self.is_running()? {
            tokio::time::sleep(interval).await;
        }
        self.result()
    }

    /// Whether a script is running for this session.
    pub fn is_running(&self) -> MrcResult<bool> {
        let handle = self.handle()?;
        self.query_running(handle)
    }

    /// Fetch the result of the last completed run.
    ///
    /// Fails with `ClientBusy` while the script is still running and with
    /// `ScriptExecution` if the script reported an error.
    pub fn result(&self) -> MrcResult<ScriptResult> {
        let handle = self.handle()?;
        let _busy = self.enter(handle)?;
        self.finish_run(handle)
    }

    fn finish_run(&self, handle: RawHandle) -> MrcResult<ScriptResult> {
        let code = ErrorCode(
            self.normalizer
                .call("get_script_error", |r| r.get_script_error(handle))?,
        );
        let output = self.fetch_output(handle)?;
        if !code.is_success() {
            let message = self.normalizer.message_for(code);
            debug!(handle, code = %code, message = %message, "Script reported an error");
            return Err(MrcError::ScriptExecution {
                code,
                message,
                output,
            });
        }
        Ok(ScriptResult {
            error_code: code,
            output,
        })
    }

    fn fetch_output(&self, handle: RawHandle) -> MrcResult<String> {
        let capacity = self.output_capacity;
        self.normalizer
            .call("get_script_output", |r| r.get_script_output(handle, capacity))
    }

    /// Exit code of the last run, without turning it into an error.
    pub fn script_error(&self) -> MrcResult<ErrorCode> {
        let handle = self.handle()?;
        let _busy = self.enter(handle)?;
        self.normalizer
            .call("get_script_error", |r| r.get_script_error(handle))
            .map(ErrorCode)
    }

    /// Text output of the last run.
    pub fn script_output(&self) -> MrcResult<String> {
        let handle = self.handle()?;
        let _busy = self.enter(handle)?;
        self.fetch_output(handle)
    }

    /// Stop value of the last run.
    pub fn stop_value(&self, kind: StopValueKind) -> MrcResult<StopValue> {
        let handle = self.handle()?;
        let _busy = self.enter(handle)?;
        match kind {
            StopValueKind::Numeric => self
                .normalizer
                .call("get_script_stop_num_val", |r| r.get_script_stop_num_val(handle))
                .map(StopValue::Numeric),
            StopValueKind::Text => {
                let capacity = self.output_capacity;
                self.normalizer
                    .call("get_script_stop_str_val", |r| {
                        r.get_script_stop_str_val(handle, capacity)
                    })
                    .map(StopValue::Text)
            }
        }
    }

    /// Block until the session is idle, for at most `timeout` (`None` waits
    /// indefinitely, as does a timeout too large to represent as a deadline).
    pub fn wait_idle(&self, timeout: Option<Duration>) -> MrcResult<()> {
        let handle = self.handle()?;
        let limit = timeout
            .and_then(|t| Instant::now().checked_add(t).map(|deadline| (deadline, t)));

        {
            let mut activity = self.activity();
            while activity.busy {
                activity = match limit {
                    Some((deadline, timeout)) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(MrcError::Timeout(timeout));
                        }
                        self.became_idle
                            .wait_timeout(activity, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                    None => self
                        .became_idle
                        .wait(activity)
                        .unwrap_or_else(PoisonError::into_inner),
                };
            }
        }

        // The library reads <= 0 as "no timeout"
        let timeout_ms = limit.map_or(0, |(deadline, _)| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            i32::try_from(remaining.as_millis()).unwrap_or(i32::MAX).max(1)
        });
        self.normalizer
            .call("wait_idle", |r| r.wait_idle(handle, timeout_ms))?;

        self.activity().script_pending = false;
        self.became_idle.notify_all();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Status callbacks
    // -------------------------------------------------------------------------

    /// Select which status kinds the server emits for this session.
    ///
    /// Fails with `ClientBusy` while a script is running.
    pub fn set_callback_mask(&self, mask: StatusMask) -> MrcResult<()> {
        let handle = self.handle()?;
        let _busy = self.enter(handle)?;
        self.normalizer.call("set_status_callback_mask", |r| {
            r.set_status_callback_mask(handle, mask.bits())
        })?;
        self.lifecycle().mask = mask;
        debug!(handle, mask = mask.bits(), "Status callback mask set");
        Ok(())
    }

    /// Install the process-wide entry point for this session under
    /// `correlation_id`.
    ///
    /// The id must not be in use by another live session. Re-registering
    /// under a new id releases the old one. Fails with `ClientBusy` while a
    /// script is running.
    pub fn register_entry_point(&self, correlation_id: i32) -> MrcResult<()> {
        let handle = self.handle()?;
        let _busy = self.enter(handle)?;
        // Route first so no notification arrives before the table is reachable
        status::register(correlation_id, &self.subscribers)?;

        let installed = self
            .normalizer
            .call("set_status_callback_function", |r| {
                r.set_status_callback_function(handle, Some(status::status_entry_point))
            })
            .and_then(|()| {
                self.normalizer.call("set_status_callback_id", |r| {
                    r.set_status_callback_id(handle, correlation_id)
                })
            });

        let mut lifecycle = self.lifecycle();
        if let Err(err) = installed {
            if lifecycle.correlation_id != Some(correlation_id) {
                status::unregister(correlation_id, &self.subscribers);
            }
            return Err(err);
        }
        if let Some(previous) = lifecycle.correlation_id.replace(correlation_id) {
            if previous != correlation_id {
                status::unregister(previous, &self.subscribers);
            }
        }
        debug!(handle, correlation_id, "Status entry point registered");
        Ok(())
    }

    /// Correlation id the entry point is registered under, if any.
    pub fn correlation_id(&self) -> Option<i32> {
        self.lifecycle().correlation_id
    }

    /// Mask last set on the server.
    pub fn callback_mask(&self) -> StatusMask {
        self.lifecycle().mask
    }

    /// `Enabled` once the entry point is registered and the mask is non-empty.
    pub fn callback_state(&self) -> CallbackState {
        let lifecycle = self.lifecycle();
        if lifecycle.correlation_id.is_some() && !lifecycle.mask.is_empty() {
            CallbackState::Enabled
        } else {
            CallbackState::Disabled
        }
    }

    /// The session's subscriber table.
    pub fn subscribers(&self) -> &Arc<SubscriberTable> {
        &self.subscribers
    }

    /// Subscribe to `kind`. Returns false if already subscribed.
    pub fn add_subscriber(&self, kind: StatusKind, subscriber: Subscriber) -> bool {
        self.subscribers.add(kind, subscriber)
    }

    /// Unsubscribe from `kind`. Returns false if not subscribed.
    pub fn remove_subscriber(&self, kind: StatusKind, subscriber: &Subscriber) -> bool {
        self.subscribers.remove(kind, subscriber)
    }

    /// Drop every subscriber for `kind`.
    pub fn clear_subscribers(&self, kind: StatusKind) {
        self.subscribers.clear(kind);
    }

    // -------------------------------------------------------------------------
    // Passthroughs
    // -------------------------------------------------------------------------

    /// GUID of the RPC interface the library was built against.
    pub fn interface_guid(&self) -> String {
        self.normalizer
            .remote()
            .get_interface_guid(self.output_capacity)
    }

    /// Open (truncating) the library's diagnostic log file.
    pub fn open_log_file(&self, path: impl AsRef<Path>) -> MrcResult<()> {
        let path = path.as_ref().to_string_lossy();
        self.normalizer
            .call("open_log_file", |r| r.open_log_file(&path))
    }

    /// Write a line to the diagnostic log file.
    pub fn log_message(&self, message: &str) {
        self.normalizer.remote().log_message(message);
    }

    /// Close the diagnostic log file.
    pub fn close_log_file(&self) {
        self.normalizer.remote().close_log_file();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if !matches!(lifecycle.state, HandleState::Created | HandleState::Connected) {
            return;
        }
        let handle = lifecycle.handle;
        warn!(handle, "Session dropped without destroy; freeing interface");
        if let Some(id) = lifecycle.correlation_id.take() {
            status::unregister(id, &self.subscribers);
        }
        if let Err(code) = self.normalizer.remote().free_interface(handle) {
            warn!(handle, code = %code, "Failed to free interface on drop");
        }
        lifecycle.handle = MRC_INVALID_HANDLE;
        lifecycle.state = HandleState::Freed;
    }
}

/// A script failure reported by `run_script` itself (e.g. no app open).
fn into_script_failure(err: MrcError) -> MrcError {
    match err {
        MrcError::Remote {
            kind: ErrorKind::ScriptExecution,
            code,
            message,
        } => MrcError::ScriptExecution {
            code,
            message,
            output: String::new(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedServer;
    use tracing_test::traced_test;

    fn connected() -> (Arc<SimulatedServer>, Session) {
        let server = Arc::new(SimulatedServer::new());
        let session = Session::open(server.clone()).unwrap();
        session.configure("local", "", "localhost").unwrap();
        (server, session)
    }

    #[test]
    fn test_lifecycle_states() {
        let server = Arc::new(SimulatedServer::new());
        let session = Session::new(server.clone());
        assert_eq!(session.state(), HandleState::Unopened);
        assert!(matches!(session.ping(), Err(MrcError::NotInitialized)));

        session.create().unwrap();
        assert_eq!(session.state(), HandleState::Created);
        assert_ne!(session.raw_handle(), MRC_INVALID_HANDLE);

        session.configure("ncalrpc", "", "localhost").unwrap();
        assert_eq!(session.state(), HandleState::Connected);

        session.destroy().unwrap();
        assert_eq!(session.state(), HandleState::Freed);
        assert_eq!(session.raw_handle(), MRC_INVALID_HANDLE);
        assert_eq!(server.interface_count(), 0);
    }

    #[test]
    fn test_operations_after_destroy_fail() {
        let (_server, session) = connected();
        session.destroy().unwrap();

        assert_eq!(session.destroy().unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(session.ping().unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(session.run(true).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(session.create().unwrap_err().kind(), ErrorKind::InvalidHandle);
    }

    #[test]
    fn test_configure_rejects_empty_fields_locally() {
        let server = Arc::new(SimulatedServer::new());
        let session = Session::open(server.clone()).unwrap();
        server.clear_calls();

        let err = session.configure("", "", "localhost").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = session.configure("local", "", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(server.calls().is_empty());
        assert_eq!(session.state(), HandleState::Created);
    }

    #[test]
    fn test_configure_rejects_inconsistent_address() {
        let server = Arc::new(SimulatedServer::new());
        let session = Session::open(server).unwrap();
        let err = session
            .configure("ncalrpc", "metropro-01", "localhost")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.code().is_some());
    }

    #[test]
    fn test_unconfigured_ping_is_not_initialized() {
        let server = Arc::new(SimulatedServer::new());
        let session = Session::open(server).unwrap();
        assert_eq!(session.ping().unwrap_err().kind(), ErrorKind::NotInitialized);
    }

    #[test]
    fn test_create_twice_is_rejected() {
        let (_server, session) = connected();
        assert_eq!(session.create().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_control_transitions() {
        let (server, session) = connected();
        assert_eq!(session.server_state().unwrap(), ServerState::Idle);

        session.request_control().unwrap();
        session.request_control().unwrap();
        assert_eq!(session.server_state().unwrap(), ServerState::Active);

        session.release_control().unwrap();
        session.release_control().unwrap();
        assert_eq!(server.server_state_code(), MRC_SERVER_STATE_IDLE);
    }

    #[test]
    fn test_refused_transition() {
        let (server, session) = connected();
        server.refuse_control(true);
        let err = session.request_control().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransitionRefused);
        assert_eq!(session.server_state().unwrap(), ServerState::Idle);
    }

    #[test]
    fn test_unreachable_server_is_transport_error() {
        let (server, session) = connected();
        server.set_reachable(false);
        let err = session.ping().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.code(), Some(ErrorCode(RPC_S_SERVER_UNAVAILABLE)));
    }

    #[test]
    fn test_blocking_run_returns_output() {
        let (_server, session) = connected();
        session
            .set_script_source(&ScriptRequest::InlineText("print 1+1".into()))
            .unwrap();

        let outcome = session.run(true).unwrap();
        let RunOutcome::Completed(result) = outcome else {
            panic!("expected a completed run");
        };
        assert!(result.error_code.is_success());
        assert!(result.output.contains('2'));
        assert!(!session.is_running().unwrap());
    }

    #[test]
    fn test_script_error_is_distinct_from_transport() {
        let (_server, session) = connected();
        session
            .set_script_source(&ScriptRequest::InlineText("print 1\nprint nope".into()))
            .unwrap();

        let err = session.run(true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ScriptExecution);
        let MrcError::ScriptExecution { code, output, .. } = err else {
            panic!("expected a script error");
        };
        assert_eq!(code, ErrorCode(MRC_ERR_RUN_SCRIPT_FAILED));
        assert!(output.starts_with("1\n"));
        assert_eq!(
            session.script_error().unwrap(),
            ErrorCode(MRC_ERR_RUN_SCRIPT_FAILED)
        );
    }

    #[test]
    fn test_output_respects_capacity() {
        let server = Arc::new(SimulatedServer::new());
        let session = Session::open(server).unwrap().with_output_capacity(4);
        session.configure("local", "", "localhost").unwrap();
        session
            .set_script_source(&ScriptRequest::InlineText("print \"abcdef\"".into()))
            .unwrap();
        assert_eq!(session.run_polling(Duration::from_millis(5)).unwrap().output, "abc");
    }

    #[test]
    fn test_stop_values() {
        let (_server, session) = connected();
        session
            .set_script_source(&ScriptRequest::InlineText("stop 2.5".into()))
            .unwrap();
        session.run(true).unwrap();

        assert_eq!(
            session.stop_value(StopValueKind::Numeric).unwrap(),
            StopValue::Numeric(2.5)
        );
        assert_eq!(
            session.stop_value(StopValueKind::Text).unwrap(),
            StopValue::Text("2.5".into())
        );
    }

    #[test]
    fn test_empty_source_clears_it() {
        let (server, session) = connected();
        session
            .set_script_source(&ScriptRequest::InlineText("print 1".into()))
            .unwrap();
        session
            .set_script_source(&ScriptRequest::InlineText(String::new()))
            .unwrap();
        server.clear_calls();

        assert_eq!(session.run(true).unwrap_err().kind(), ErrorKind::NoScriptSource);
        assert!(server.calls().is_empty());
    }

    #[test]
    fn test_detached_run_keeps_session_busy() {
        let (server, session) = connected();
        server.set_script_duration(Duration::from_millis(300));
        session
            .set_script_source(&ScriptRequest::InlineText("print 1".into()))
            .unwrap();

        assert_eq!(session.run(false).unwrap(), RunOutcome::Started);
        assert!(!session.is_idle().unwrap());
        assert_eq!(session.result().unwrap_err().kind(), ErrorKind::ClientBusy);

        session.wait_idle(None).unwrap();
        assert!(session.is_idle().unwrap());
        assert_eq!(session.result().unwrap().output, "1\n");
    }

    #[test]
    fn test_wait_idle_with_unrepresentable_timeout() {
        let (_server, session) = connected();
        session.wait_idle(Some(Duration::MAX)).unwrap();
        assert!(session.is_idle().unwrap());
    }

    #[test]
    fn test_destroy_before_create_is_invalid_handle() {
        let server = Arc::new(SimulatedServer::new());
        let session = Session::new(server.clone());
        assert_eq!(session.destroy().unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert!(server.calls().is_empty());
        assert_eq!(session.state(), HandleState::Unopened);
    }

    #[test]
    fn test_pending_script_blocks_release_and_callback_wiring() {
        let (server, session) = connected();
        session.request_control().unwrap();
        server.set_script_duration(Duration::from_millis(300));
        session
            .set_script_source(&ScriptRequest::InlineText("print 1".into()))
            .unwrap();
        session.start().unwrap();

        assert_eq!(session.release_control().unwrap_err().kind(), ErrorKind::ClientBusy);
        assert_eq!(server.server_state_code(), MRC_SERVER_STATE_ACTIVE);
        assert_eq!(
            session.set_callback_mask(StatusMask::ALL).unwrap_err().kind(),
            ErrorKind::ClientBusy
        );
        assert_eq!(
            session
                .register_entry_point(session.raw_handle())
                .unwrap_err()
                .kind(),
            ErrorKind::ClientBusy
        );
        assert_eq!(session.callback_state(), CallbackState::Disabled);

        session.wait_idle(None).unwrap();
        session.release_control().unwrap();
        assert_eq!(server.server_state_code(), MRC_SERVER_STATE_IDLE);
    }

    #[test]
    fn test_async_polled_run() {
        let (server, session) = connected();
        server.set_script_duration(Duration::from_millis(40));
        session
            .set_script_source(&ScriptRequest::InlineText("print \"polled\"".into()))
            .unwrap();

        let result = tokio_test::block_on(session.run_polled(Duration::from_millis(5))).unwrap();
        assert_eq!(result.output, "polled\n");
        assert!(session.is_idle().unwrap());
    }

    #[test]
    fn test_callback_state_needs_mask_and_entry_point() {
        let (_server, session) = connected();
        assert_eq!(session.callback_state(), CallbackState::Disabled);

        session.set_callback_mask(StatusMask::ALL).unwrap();
        assert_eq!(session.callback_state(), CallbackState::Disabled);

        session.register_entry_point(session.raw_handle()).unwrap();
        assert_eq!(session.callback_state(), CallbackState::Enabled);

        session.set_callback_mask(StatusMask::NONE).unwrap();
        assert_eq!(session.callback_state(), CallbackState::Disabled);
    }

    #[test]
    fn test_destroy_unregisters_correlation_id() {
        let (_server, session) = connected();
        let id = session.raw_handle();
        session.register_entry_point(id).unwrap();
        assert!(status::is_registered(id));

        session.destroy().unwrap();
        assert!(!status::is_registered(id));
        assert_eq!(session.correlation_id(), None);
    }

    #[test]
    fn test_reregistering_moves_correlation_id() {
        let (_server, session) = connected();
        let first = session.raw_handle();
        let second = first.wrapping_neg();
        session.register_entry_point(first).unwrap();
        session.register_entry_point(second).unwrap();

        assert!(!status::is_registered(first));
        assert!(status::is_registered(second));
        session.destroy().unwrap();
    }

    #[test]
    #[traced_test]
    fn test_drop_frees_live_handle() {
        let (server, session) = connected();
        drop(session);
        assert_eq!(server.interface_count(), 0);
        assert!(logs_contain("dropped without destroy"));
    }
}
