//! In-process simulated MetroPro server.
//!
//! `SimulatedServer` implements [`RemoteInterface`] without any RPC: it keeps
//! its own interface table, control state and script results, and runs each
//! script on a worker thread so that completion and status notifications
//! arrive concurrently with the caller, the way the real server behaves.
//!
//! Knobs for tests: [`set_reachable`](SimulatedServer::set_reachable),
//! [`refuse_control`](SimulatedServer::refuse_control),
//! [`set_script_duration`](SimulatedServer::set_script_duration),
//! [`install_script`](SimulatedServer::install_script),
//! [`notify`](SimulatedServer::notify) and [`calls`](SimulatedServer::calls).

mod evaluator;

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::codes::*;
use crate::error::ErrorCode;
use crate::status::StatusKind;
use crate::transport::{
    truncate_to_capacity, RawHandle, RemoteInterface, RemoteResult, StatusCallbackFn,
};

use evaluator::{Evaluation, ScriptEvaluator};

/// GUID reported by the simulated RPC interface.
pub const SIMULATED_INTERFACE_GUID: &str = "{6B29FC40-CA47-1067-B31D-00DD010662DA}";

/// Protocol sequences the simulator accepts.
const PROTOCOLS: [&str; 3] = ["ncalrpc", "ncacn_ip_tcp", "local"];

// Handles are unique across every simulator in the process, because the
// default correlation id of a session is its handle value.
static NEXT_HANDLE: AtomicI32 = AtomicI32::new(1);

#[derive(Debug, Clone)]
struct CallbackBinding {
    function: StatusCallbackFn,
    callback_id: i32,
    mask: i32,
}

impl CallbackBinding {
    fn emit(&self, kind: StatusKind) {
        if self.mask & kind.mask_bit() != 0 {
            trace!(callback_id = self.callback_id, %kind, "simulator emitting status");
            (self.function)(self.callback_id, kind.code());
        }
    }
}

#[derive(Debug, Default)]
struct SimInterface {
    configured: bool,
    filename: String,
    text: String,
    context: i32,
    callback: Option<StatusCallbackFn>,
    callback_mask: i32,
    callback_id: i32,
    running: bool,
    last_error: i32,
    last: Evaluation,
}

impl SimInterface {
    fn binding(&self) -> Option<CallbackBinding> {
        self.callback.map(|function| CallbackBinding {
            function,
            callback_id: self.callback_id,
            mask: self.callback_mask,
        })
    }
}

#[derive(Debug)]
struct ServerState {
    interfaces: HashMap<RawHandle, SimInterface>,
    control: i32,
    reachable: bool,
    refuse_control: bool,
    app_open: bool,
    script_duration: Duration,
    files: HashMap<String, String>,
    log_file: Option<File>,
}

struct ServerInner {
    state: Mutex<ServerState>,
    script_done: Condvar,
    calls: Mutex<Vec<&'static str>>,
    evaluator: ScriptEvaluator,
}

impl ServerInner {
    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, operation: &'static str) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(operation);
    }
}

/// A simulated MetroPro server living in the client process.
#[derive(Clone)]
pub struct SimulatedServer {
    inner: Arc<ServerInner>,
}

impl Default for SimulatedServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedServer {
    /// A reachable server in the idle state with an app open.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                state: Mutex::new(ServerState {
                    interfaces: HashMap::new(),
                    control: MRC_SERVER_STATE_IDLE,
                    reachable: true,
                    refuse_control: false,
                    app_open: true,
                    script_duration: Duration::ZERO,
                    files: HashMap::new(),
                    log_file: None,
                }),
                script_done: Condvar::new(),
                calls: Mutex::new(Vec::new()),
                evaluator: ScriptEvaluator::new(),
            }),
        }
    }

    /// Builder form of [`set_script_duration`](Self::set_script_duration).
    pub fn with_script_duration(self, duration: Duration) -> Self {
        self.set_script_duration(duration);
        self
    }

    /// Minimum wall time of every script run.
    pub fn set_script_duration(&self, duration: Duration) {
        self.inner.lock().script_duration = duration;
    }

    /// Simulate the server going away (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().reachable = reachable;
    }

    /// Make `request_control` fail as if MetroPro could not go active.
    pub fn refuse_control(&self, refuse: bool) {
        self.inner.lock().refuse_control = refuse;
    }

    /// Whether an app is open for front-most-app scripts.
    pub fn set_app_open(&self, open: bool) {
        self.inner.lock().app_open = open;
    }

    /// Make a script file available on the "server computer".
    pub fn install_script(&self, name: impl Into<String>, text: impl Into<String>) {
        self.inner.lock().files.insert(name.into(), text.into());
    }

    /// Current raw control state code.
    pub fn server_state_code(&self) -> i32 {
        self.inner.lock().control
    }

    /// Number of live interfaces.
    pub fn interface_count(&self) -> usize {
        self.inner.lock().interfaces.len()
    }

    /// Operations received so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget the recorded operations.
    pub fn clear_calls(&self) {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Deliver `kind` for `handle` from a separate thread, honouring the
    /// interface's mask. Returns true if the entry point was invoked.
    pub fn notify(&self, handle: RawHandle, kind: StatusKind) -> bool {
        let binding = self
            .inner
            .lock()
            .interfaces
            .get(&handle)
            .and_then(SimInterface::binding);
        let Some(binding) = binding else {
            return false;
        };
        if binding.mask & kind.mask_bit() == 0 {
            return false;
        }
        thread::spawn(move || binding.emit(kind)).join().is_ok()
    }

    fn with_interface<T>(
        &self,
        operation: &'static str,
        handle: RawHandle,
        contacts_server: bool,
        f: impl FnOnce(&mut ServerState, RawHandle) -> RemoteResult<T>,
    ) -> RemoteResult<T> {
        self.inner.record(operation);
        let mut state = self.inner.lock();
        let interface = state
            .interfaces
            .get(&handle)
            .ok_or(ErrorCode(MRC_ERR_INVALID_HANDLE))?;
        if contacts_server {
            if !interface.configured {
                return Err(ErrorCode(MRC_ERR_CLIENT_INTERFACE_NOT_OPEN));
            }
            if !state.reachable {
                return Err(ErrorCode(RPC_S_SERVER_UNAVAILABLE));
            }
        }
        f(&mut *state, handle)
    }

    fn start_script(&self, handle: RawHandle) -> RemoteResult<()> {
        let mut state = self.inner.lock();
        let (source, binding, context) = {
            let interface = state
                .interfaces
                .get(&handle)
                .ok_or(ErrorCode(MRC_ERR_INVALID_HANDLE))?;
            if interface.running {
                return Err(ErrorCode(MRC_ERR_CLIENT_INTERFACE_BUSY));
            }
            let source = if !interface.filename.is_empty() {
                ScriptSource::File(interface.filename.clone())
            } else if !interface.text.is_empty() {
                ScriptSource::Text(interface.text.clone())
            } else {
                return Err(ErrorCode(MRC_ERR_NO_SCRIPT_FILENAME_OR_TEXT));
            };
            (source, interface.binding(), interface.context)
        };

        let script = match source {
            ScriptSource::File(name) => state.files.get(&name).cloned().ok_or(name),
            ScriptSource::Text(text) => Ok(text),
        };
        let no_app = context == MRC_SCRIPT_CONTEXT_FRONTMOST_APP && !state.app_open;
        let duration = state.script_duration;

        if let Some(interface) = state.interfaces.get_mut(&handle) {
            interface.running = true;
        }
        drop(state);

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(format!("mrc-sim-{handle}"))
            .spawn(move || run_worker(inner, handle, script, no_app, binding, duration));

        if spawned.is_err() {
            if let Some(interface) = self.inner.lock().interfaces.get_mut(&handle) {
                interface.running = false;
            }
            return Err(ErrorCode(MRC_ERR_NO_MEM));
        }
        Ok(())
    }

    fn wait_not_running(&self, handle: RawHandle, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.lock();
        loop {
            let running = state
                .interfaces
                .get(&handle)
                .map_or(false, |interface| interface.running);
            if !running {
                return true;
            }
            match deadline {
                None => {
                    state = self
                        .inner
                        .script_done
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    state = self
                        .inner
                        .script_done
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}

enum ScriptSource {
    File(String),
    Text(String),
}

fn run_worker(
    inner: Arc<ServerInner>,
    handle: RawHandle,
    script: Result<String, String>,
    no_app: bool,
    binding: Option<CallbackBinding>,
    duration: Duration,
) {
    let started = Instant::now();
    debug!(handle, "simulated script started");

    let (error, evaluation) = match script {
        _ if no_app => (
            MRC_ERR_SCRIPT_CONTEXT_NO_APP,
            Evaluation {
                output: "No app is open".to_string(),
                ..Evaluation::default()
            },
        ),
        Ok(text) => {
            let mut emit = |kind: StatusKind| {
                if let Some(binding) = &binding {
                    binding.emit(kind);
                }
            };
            let evaluation = inner.evaluator.evaluate(&text, &mut emit);
            let error = if evaluation.error.is_some() {
                MRC_ERR_RUN_SCRIPT_FAILED
            } else {
                MRC_ERR_NONE
            };
            (error, evaluation)
        }
        Err(name) => (
            MRC_ERR_RUN_SCRIPT_FAILED,
            Evaluation {
                output: format!("Cannot open script file '{name}'"),
                ..Evaluation::default()
            },
        ),
    };

    if let Some(remaining) = duration.checked_sub(started.elapsed()) {
        thread::sleep(remaining);
    }

    {
        let mut state = inner.lock();
        if let Some(interface) = state.interfaces.get_mut(&handle) {
            interface.last_error = error;
            interface.last = evaluation;
            interface.running = false;
        }
    }
    inner.script_done.notify_all();
    debug!(handle, error, "simulated script finished");

    if let Some(binding) = &binding {
        binding.emit(StatusKind::ScriptEnd);
    }
}

impl RemoteInterface for SimulatedServer {
    fn new_interface(&self) -> RemoteResult<RawHandle> {
        self.inner.record("new_interface");
        let handle = NEXT_HANDLE.fetch_add(1, Ordering::SeqCst);
        let interface = SimInterface {
            context: MRC_SCRIPT_CONTEXT_FRONTMOST_APP,
            callback_id: handle,
            ..SimInterface::default()
        };
        self.inner.lock().interfaces.insert(handle, interface);
        Ok(handle)
    }

    fn free_interface(&self, handle: RawHandle) -> RemoteResult<()> {
        self.inner.record("free_interface");
        match self.inner.lock().interfaces.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(ErrorCode(MRC_ERR_INVALID_HANDLE)),
        }
    }

    fn set_interface_params(
        &self,
        handle: RawHandle,
        protocol: &str,
        network_address: &str,
        end_point: &str,
    ) -> RemoteResult<()> {
        self.with_interface("set_interface_params", handle, false, |state, handle| {
            let valid = PROTOCOLS.contains(&protocol)
                && !end_point.is_empty()
                && match protocol {
                    "ncacn_ip_tcp" => end_point.parse::<u16>().is_ok(),
                    _ => network_address.is_empty(),
                };
            if !valid {
                return Err(ErrorCode(MRC_ERR_INVALID_PARAM));
            }
            if let Some(interface) = state.interfaces.get_mut(&handle) {
                interface.configured = true;
            }
            Ok(())
        })
    }

    fn ping_server(&self, handle: RawHandle) -> RemoteResult<()> {
        self.with_interface("ping_server", handle, true, |_, _| Ok(()))
    }

    fn request_control(&self, handle: RawHandle) -> RemoteResult<()> {
        self.with_interface("request_control", handle, true, |state, _| {
            if state.control == MRC_SERVER_STATE_ACTIVE {
                return Ok(());
            }
            if state.refuse_control {
                return Err(ErrorCode(MRC_ERR_REQUEST_CONTROL_FAILED));
            }
            state.control = MRC_SERVER_STATE_ACTIVE;
            Ok(())
        })
    }

    fn release_control(&self, handle: RawHandle) -> RemoteResult<()> {
        self.with_interface("release_control", handle, true, |state, _| {
            state.control = MRC_SERVER_STATE_IDLE;
            Ok(())
        })
    }

    fn get_server_state(&self, handle: RawHandle) -> RemoteResult<i32> {
        self.with_interface("get_server_state", handle, true, |state, _| {
            Ok(state.control)
        })
    }

    fn wait_idle(&self, handle: RawHandle, timeout_ms: i32) -> RemoteResult<()> {
        self.with_interface("wait_idle", handle, false, |_, _| Ok(()))?;
        let timeout = u64::try_from(timeout_ms)
            .ok()
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis);
        if self.wait_not_running(handle, timeout) {
            Ok(())
        } else {
            Err(ErrorCode(MRC_ERR_TIMEOUT_WAITING_FOR_IDLE))
        }
    }

    fn set_script_filename(&self, handle: RawHandle, filename: &str) -> RemoteResult<()> {
        self.with_interface("set_script_filename", handle, false, |state, handle| {
            if let Some(interface) = state.interfaces.get_mut(&handle) {
                interface.filename = filename.to_string();
            }
            Ok(())
        })
    }

    fn set_script_text(&self, handle: RawHandle, text: &str) -> RemoteResult<()> {
        self.with_interface("set_script_text", handle, false, |state, handle| {
            if let Some(interface) = state.interfaces.get_mut(&handle) {
                interface.text = text.to_string();
            }
            Ok(())
        })
    }

    fn set_script_context(&self, handle: RawHandle, context: i32) -> RemoteResult<()> {
        self.with_interface("set_script_context", handle, false, |state, handle| {
            if context != MRC_SCRIPT_CONTEXT_DESKTOP && context != MRC_SCRIPT_CONTEXT_FRONTMOST_APP
            {
                return Err(ErrorCode(MRC_ERR_INVALID_PARAM));
            }
            if let Some(interface) = state.interfaces.get_mut(&handle) {
                interface.context = context;
            }
            Ok(())
        })
    }

    fn run_script(&self, handle: RawHandle, wait_done: bool) -> RemoteResult<()> {
        self.with_interface("run_script", handle, true, |_, _| Ok(()))?;
        self.start_script(handle)?;
        if wait_done {
            self.wait_not_running(handle, None);
        }
        Ok(())
    }

    fn get_script_running(&self, handle: RawHandle) -> RemoteResult<bool> {
        self.with_interface("get_script_running", handle, false, |state, handle| {
            Ok(state
                .interfaces
                .get(&handle)
                .map_or(false, |interface| interface.running))
        })
    }

    fn get_script_error(&self, handle: RawHandle) -> RemoteResult<i32> {
        self.with_interface("get_script_error", handle, false, |state, handle| {
            Ok(state
                .interfaces
                .get(&handle)
                .map_or(MRC_ERR_NONE, |interface| interface.last_error))
        })
    }

    fn get_script_output(&self, handle: RawHandle, capacity: usize) -> RemoteResult<String> {
        self.with_interface("get_script_output", handle, false, |state, handle| {
            Ok(state
                .interfaces
                .get(&handle)
                .map(|interface| truncate_to_capacity(&interface.last.output, capacity))
                .unwrap_or_default())
        })
    }

    fn get_script_stop_str_val(&self, handle: RawHandle, capacity: usize) -> RemoteResult<String> {
        self.with_interface("get_script_stop_str_val", handle, false, |state, handle| {
            Ok(state
                .interfaces
                .get(&handle)
                .map(|interface| truncate_to_capacity(&interface.last.stop.text, capacity))
                .unwrap_or_default())
        })
    }

    fn get_script_stop_num_val(&self, handle: RawHandle) -> RemoteResult<f64> {
        self.with_interface("get_script_stop_num_val", handle, false, |state, handle| {
            Ok(state
                .interfaces
                .get(&handle)
                .map_or(0.0, |interface| interface.last.stop.number))
        })
    }

    fn set_status_callback_function(
        &self,
        handle: RawHandle,
        function: Option<StatusCallbackFn>,
    ) -> RemoteResult<()> {
        self.with_interface("set_status_callback_function", handle, false, |state, handle| {
            if let Some(interface) = state.interfaces.get_mut(&handle) {
                interface.callback = function;
            }
            Ok(())
        })
    }

    fn set_status_callback_mask(&self, handle: RawHandle, mask: i32) -> RemoteResult<()> {
        self.with_interface("set_status_callback_mask", handle, false, |state, handle| {
            if let Some(interface) = state.interfaces.get_mut(&handle) {
                interface.callback_mask = mask;
            }
            Ok(())
        })
    }

    fn set_status_callback_id(&self, handle: RawHandle, callback_id: i32) -> RemoteResult<()> {
        self.with_interface("set_status_callback_id", handle, false, |state, handle| {
            if let Some(interface) = state.interfaces.get_mut(&handle) {
                interface.callback_id = callback_id;
            }
            Ok(())
        })
    }

    fn get_error_message(&self, code: ErrorCode, capacity: usize) -> String {
        self.inner.record("get_error_message");
        truncate_to_capacity(&error_message(code), capacity)
    }

    fn get_interface_guid(&self, capacity: usize) -> String {
        self.inner.record("get_interface_guid");
        truncate_to_capacity(SIMULATED_INTERFACE_GUID, capacity)
    }

    fn open_log_file(&self, path: &str) -> RemoteResult<()> {
        self.inner.record("open_log_file");
        let file = File::create(path).map_err(|_| ErrorCode(MRC_ERR_CANT_CREATE_LOG_FILE))?;
        self.inner.lock().log_file = Some(file);
        Ok(())
    }

    fn log_message(&self, message: &str) {
        self.inner.record("log_message");
        if let Some(file) = self.inner.lock().log_file.as_mut() {
            // The library ignores write failures on the diagnostic log
            let _ = writeln!(file, "{message}");
        }
    }

    fn close_log_file(&self) {
        self.inner.record("close_log_file");
        self.inner.lock().log_file = None;
    }
}

/// Display strings for the MRC error taxonomy.
fn error_message(code: ErrorCode) -> String {
    let text = match code.value() {
        MRC_ERR_NONE => "No error occurred.",
        MRC_ERR_RUN_SCRIPT_FAILED => "A run-script command failed.",
        MRC_ERR_SERVER_BUSY => "MetroPro is busy executing a remote command.",
        MRC_ERR_COMMAND_TIMEOUT => "MetroPro could not accept a command within a time limit.",
        MRC_ERR_REQUEST_CONTROL_FAILED => "MetroPro could not transition to the active state.",
        MRC_ERR_RELEASE_CONTROL_FAILED => "MetroPro could not transition to the idle state.",
        MRC_ERR_SCRIPT_CONTEXT_NO_APP => "MetroPro could not run a script because there is no open app.",
        MRC_ERR_INVALID_PARAM => "A passed parameter value is invalid.",
        MRC_ERR_CANT_WRITE_TEMP_FILE => "MetroPro could not write a required temporary file.",
        MRC_ERR_INVALID_HANDLE => "The passed handle value is invalid.",
        MRC_ERR_RPC_BINDING_CREATE => "The client RPC binding could not be created.",
        MRC_ERR_RPC_BINDING_FREE => "The client RPC binding could not be freed.",
        MRC_ERR_NO_MEM => "A memory allocation failed.",
        MRC_ERR_CLIENT_INTERFACE_BUSY => "The client interface is busy.",
        MRC_ERR_CLIENT_INTERFACE_OPEN => "The client interface is already open.",
        MRC_ERR_CLIENT_INTERFACE_NOT_OPEN => "The client interface is not open.",
        MRC_ERR_NO_SCRIPT_FILENAME_OR_TEXT => "No script filename or text was specified.",
        MRC_ERR_CANT_CREATE_LOG_FILE => "A log file could not be created.",
        MRC_ERR_TIMEOUT_WAITING_FOR_IDLE => "Timeout waiting for the interface to become idle.",
        MRC_ERR_TIMEOUT_WAITING_FOR_SCRIPT => "Timeout waiting for script done.",
        RPC_S_SERVER_UNAVAILABLE => "The RPC server is unavailable.",
        _ => return format!("Unknown error {code}"),
    };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> (SimulatedServer, RawHandle) {
        let server = SimulatedServer::new();
        let handle = server.new_interface().unwrap();
        server
            .set_interface_params(handle, "ncalrpc", "", "localhost")
            .unwrap();
        (server, handle)
    }

    #[test]
    fn test_handles_are_never_the_sentinel() {
        let server = SimulatedServer::new();
        let a = server.new_interface().unwrap();
        let b = server.new_interface().unwrap();
        assert_ne!(a, MRC_INVALID_HANDLE);
        assert_ne!(a, b);
        assert_eq!(server.interface_count(), 2);
    }

    #[test]
    fn test_interface_params_validation() {
        let server = SimulatedServer::new();
        let handle = server.new_interface().unwrap();
        let invalid = Err(ErrorCode(MRC_ERR_INVALID_PARAM));

        assert_eq!(server.set_interface_params(handle, "ncalrpc", "host", "localhost"), invalid);
        assert_eq!(server.set_interface_params(handle, "ncacn_ip_tcp", "host", "http"), invalid);
        assert_eq!(server.set_interface_params(handle, "carrier_pigeon", "", "x"), invalid);
        assert!(server
            .set_interface_params(handle, "ncacn_ip_tcp", "metropro-01", "5000")
            .is_ok());
    }

    #[test]
    fn test_unconfigured_interface_is_not_open() {
        let server = SimulatedServer::new();
        let handle = server.new_interface().unwrap();
        assert_eq!(
            server.ping_server(handle),
            Err(ErrorCode(MRC_ERR_CLIENT_INTERFACE_NOT_OPEN))
        );
    }

    #[test]
    fn test_unreachable_server() {
        let (server, handle) = connected();
        server.set_reachable(false);
        assert_eq!(
            server.ping_server(handle),
            Err(ErrorCode(RPC_S_SERVER_UNAVAILABLE))
        );
    }

    #[test]
    fn test_filename_takes_precedence() {
        let (server, handle) = connected();
        server.install_script("answer.scr", "print 42");
        server.set_script_text(handle, "print 1").unwrap();
        server.set_script_filename(handle, "answer.scr").unwrap();

        server.run_script(handle, true).unwrap();
        assert_eq!(server.get_script_output(handle, 512).unwrap(), "42\n");
    }

    #[test]
    fn test_missing_script_file_fails_the_script() {
        let (server, handle) = connected();
        server.set_script_filename(handle, "missing.scr").unwrap();
        server.run_script(handle, true).unwrap();
        assert_eq!(
            server.get_script_error(handle).unwrap(),
            MRC_ERR_RUN_SCRIPT_FAILED
        );
    }

    #[test]
    fn test_no_app_open() {
        let (server, handle) = connected();
        server.set_app_open(false);
        server.set_script_text(handle, "print 1").unwrap();
        server.run_script(handle, true).unwrap();
        assert_eq!(
            server.get_script_error(handle).unwrap(),
            MRC_ERR_SCRIPT_CONTEXT_NO_APP
        );

        server
            .set_script_context(handle, MRC_SCRIPT_CONTEXT_DESKTOP)
            .unwrap();
        server.run_script(handle, true).unwrap();
        assert_eq!(server.get_script_error(handle).unwrap(), MRC_ERR_NONE);
    }

    #[test]
    fn test_wait_idle_times_out() {
        let (server, handle) = connected();
        server.set_script_duration(Duration::from_millis(300));
        server.set_script_text(handle, "print 1").unwrap();
        server.run_script(handle, false).unwrap();

        assert_eq!(
            server.wait_idle(handle, 20),
            Err(ErrorCode(MRC_ERR_TIMEOUT_WAITING_FOR_IDLE))
        );
        assert!(server.wait_idle(handle, 0).is_ok());
        assert!(!server.get_script_running(handle).unwrap());
    }

    #[test]
    fn test_second_run_while_running_is_busy() {
        let (server, handle) = connected();
        server.set_script_duration(Duration::from_millis(200));
        server.set_script_text(handle, "print 1").unwrap();
        server.run_script(handle, false).unwrap();
        assert_eq!(
            server.run_script(handle, false),
            Err(ErrorCode(MRC_ERR_CLIENT_INTERFACE_BUSY))
        );
        server.wait_idle(handle, 0).unwrap();
    }

    #[test]
    fn test_log_file_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mrc.log");
        let server = SimulatedServer::new();

        server.open_log_file(path.to_str().unwrap()).unwrap();
        server.log_message("hello");
        server.close_log_file();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn test_error_messages() {
        let server = SimulatedServer::new();
        assert_eq!(
            server.get_error_message(ErrorCode(MRC_ERR_NO_MEM), 512),
            "A memory allocation failed."
        );
        assert!(server
            .get_error_message(ErrorCode(42), 512)
            .starts_with("Unknown error"));
    }
}
