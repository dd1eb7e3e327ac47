//! Status callback subsystem
//!
//! While a script runs, the server can notify the client about acquisition,
//! focus drive and script progress. The library accepts a single native
//! function pointer per interface and calls it on a thread it owns, passing a
//! correlation id and a raw status code.
//!
//! # Design
//!
//! ```text
//! server thread ──► status_entry_point(id, status)
//!                        │
//!                        ▼
//!             REGISTRY: id ──► Weak<SubscriberTable>   (mutex, held briefly)
//!                        │
//!                        ▼
//!             SubscriberTable::dispatch(status, id)
//!               1. lock, clone subscriber list for the kind, unlock
//!               2. invoke each subscriber in registration order
//!               3. failures and panics are logged and collected
//! ```
//!
//! Subscribers are never invoked with a lock held, so a subscriber may add or
//! remove subscribers (or register another session) without deadlocking.
//! Nothing a subscriber does can unwind into the native caller.

use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::codes::*;
use crate::error::{MrcError, MrcResult};

// =============================================================================
// Status kinds and masks
// =============================================================================

/// Fixed set of events the server may notify about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Acquisition started.
    BeginAcquire,
    /// Acquisition finished.
    EndAcquire,
    /// Focus drive (FDA) started.
    BeginFocusDrive,
    /// Focus drive (FDA) finished.
    EndFocusDrive,
    /// Raised by the running script itself.
    ScriptStart,
    /// The script is done executing.
    ScriptEnd,
    /// Scan offset report.
    ScanOffset,
}

impl StatusKind {
    /// Every status kind, in enable-bit order.
    pub const ALL: [StatusKind; 7] = [
        StatusKind::BeginAcquire,
        StatusKind::EndAcquire,
        StatusKind::BeginFocusDrive,
        StatusKind::EndFocusDrive,
        StatusKind::ScriptStart,
        StatusKind::ScriptEnd,
        StatusKind::ScanOffset,
    ];

    /// Status code delivered to the entry point for this kind.
    pub fn code(self) -> i32 {
        match self {
            StatusKind::BeginAcquire => MRC_CALLBACK_STATUS_BEGIN_ACQUIRE,
            StatusKind::EndAcquire => MRC_CALLBACK_STATUS_END_ACQUIRE,
            StatusKind::BeginFocusDrive => MRC_CALLBACK_STATUS_BEGIN_FDA,
            StatusKind::EndFocusDrive => MRC_CALLBACK_STATUS_END_FDA,
            StatusKind::ScriptStart => MRC_CALLBACK_STATUS_SCRIPT,
            StatusKind::ScriptEnd => MRC_CALLBACK_STATUS_END_SCRIPT,
            StatusKind::ScanOffset => MRC_CALLBACK_STATUS_SCAN_OFFSET,
        }
    }

    /// Decode a status code received from the server.
    pub fn from_code(code: i32) -> MrcResult<Self> {
        StatusKind::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or(MrcError::UnknownStatusKind(code))
    }

    /// Enable bit for this kind in the callback mask.
    pub fn mask_bit(self) -> i32 {
        match self {
            StatusKind::BeginAcquire => MRC_ENABLE_STATUS_CALLBACK_BEGIN_ACQUIRE,
            StatusKind::EndAcquire => MRC_ENABLE_STATUS_CALLBACK_END_ACQUIRE,
            StatusKind::BeginFocusDrive => MRC_ENABLE_STATUS_CALLBACK_BEGIN_FDA,
            StatusKind::EndFocusDrive => MRC_ENABLE_STATUS_CALLBACK_END_FDA,
            StatusKind::ScriptStart => MRC_ENABLE_STATUS_CALLBACK_SCRIPT,
            StatusKind::ScriptEnd => MRC_ENABLE_STATUS_CALLBACK_END_SCRIPT,
            StatusKind::ScanOffset => MRC_ENABLE_STATUS_CALLBACK_SCAN_OFFSET,
        }
    }

    /// Stable snake_case name, as used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            StatusKind::BeginAcquire => "begin_acquire",
            StatusKind::EndAcquire => "end_acquire",
            StatusKind::BeginFocusDrive => "begin_focus_drive",
            StatusKind::EndFocusDrive => "end_focus_drive",
            StatusKind::ScriptStart => "script_start",
            StatusKind::ScriptEnd => "script_end",
            StatusKind::ScanOffset => "scan_offset",
        }
    }

    /// Look a kind up by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        StatusKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitmask of the status kinds the server should emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusMask(i32);

impl StatusMask {
    /// No notifications.
    pub const NONE: StatusMask = StatusMask(MRC_ENABLE_STATUS_CALLBACK_NONE);
    /// Every notification the server knows about.
    pub const ALL: StatusMask = StatusMask(MRC_ENABLE_STATUS_CALLBACK_ALL);

    /// Build a mask from raw bits.
    pub fn from_bits(bits: i32) -> Self {
        StatusMask(bits)
    }

    /// Build a mask enabling exactly the given kinds.
    pub fn from_kinds<I: IntoIterator<Item = StatusKind>>(kinds: I) -> Self {
        kinds
            .into_iter()
            .fold(StatusMask::NONE, |mask, kind| mask | kind)
    }

    /// Raw bits, as passed to the server.
    pub fn bits(self) -> i32 {
        self.0
    }

    /// Whether notifications for `kind` are enabled.
    pub fn contains(self, kind: StatusKind) -> bool {
        self.0 & kind.mask_bit() != 0
    }

    /// Whether no notification is enabled.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for StatusMask {
    type Output = StatusMask;

    fn bitor(self, rhs: StatusMask) -> StatusMask {
        StatusMask(self.0 | rhs.0)
    }
}

impl BitOr<StatusKind> for StatusMask {
    type Output = StatusMask;

    fn bitor(self, rhs: StatusKind) -> StatusMask {
        StatusMask(self.0 | rhs.mask_bit())
    }
}

impl From<StatusKind> for StatusMask {
    fn from(kind: StatusKind) -> Self {
        StatusMask(kind.mask_bit())
    }
}

/// Whether notifications can currently be delivered for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackState {
    /// Entry point not registered, or the mask is empty.
    Disabled,
    /// Entry point registered and at least one kind enabled.
    Enabled,
}

// =============================================================================
// Subscribers
// =============================================================================

/// A notification as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    /// Which event occurred.
    pub kind: StatusKind,
    /// Correlation id the session registered with the server.
    pub correlation_id: i32,
    /// When the notification reached the client.
    pub received_at: DateTime<Utc>,
}

type SubscriberFn = dyn Fn(&StatusEvent) -> anyhow::Result<()> + Send + Sync;

/// A subscriber callable.
///
/// Identity is the allocation: clones of one `Subscriber` compare equal, two
/// subscribers built from identical closures do not. Keep a clone around to
/// remove the subscriber later.
#[derive(Clone)]
pub struct Subscriber {
    callback: Arc<SubscriberFn>,
}

impl Subscriber {
    /// Wrap a fallible callable.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&StatusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Wrap a callable that cannot fail.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        Self::new(move |event| {
            callback(event);
            Ok(())
        })
    }

    /// A subscriber that forwards every event into a tokio channel.
    ///
    /// Sending never blocks the dispatching thread; once the receiver is
    /// dropped the subscriber starts failing, which dispatch tolerates.
    pub fn forward_to(tx: tokio::sync::mpsc::UnboundedSender<StatusEvent>) -> Self {
        Self::new(move |event| {
            tx.send(event.clone())
                .map_err(|_| anyhow::anyhow!("status event receiver dropped"))
        })
    }

    fn invoke(&self, event: &StatusEvent) -> anyhow::Result<()> {
        (self.callback)(event)
    }

    fn ptr(&self) -> *const () {
        Arc::as_ptr(&self.callback) as *const ()
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.ptr() == other.ptr()
    }
}

impl Eq for Subscriber {}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("ptr", &self.ptr()).finish()
    }
}

/// Outcome of one dispatch, mostly useful for tests and diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Decoded kind, `None` when the status code was not recognised.
    pub kind: Option<StatusKind>,
    /// Number of subscribers invoked.
    pub invoked: usize,
    /// Messages of the subscribers that failed or panicked.
    pub failures: Vec<String>,
}

/// Per-session registration table: status kind → ordered subscribers.
#[derive(Default)]
pub struct SubscriberTable {
    subscribers: Mutex<HashMap<StatusKind, Vec<Subscriber>>>,
}

impl SubscriberTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StatusKind, Vec<Subscriber>>> {
        // Subscribers never run under this lock, so a poisoned guard still
        // holds a consistent table.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a subscriber for `kind`. Returns false if it was already registered.
    pub fn add(&self, kind: StatusKind, subscriber: Subscriber) -> bool {
        let mut table = self.lock();
        let list = table.entry(kind).or_default();
        if list.contains(&subscriber) {
            return false;
        }
        list.push(subscriber);
        true
    }

    /// Remove a subscriber for `kind`. Returns false if it was not registered.
    pub fn remove(&self, kind: StatusKind, subscriber: &Subscriber) -> bool {
        let mut table = self.lock();
        match table.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|s| s != subscriber);
                list.len() != before
            }
            None => false,
        }
    }

    /// Remove every subscriber for `kind`.
    pub fn clear(&self, kind: StatusKind) {
        self.lock().remove(&kind);
    }

    /// Number of subscribers registered for `kind`.
    pub fn len(&self, kind: StatusKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Whether no subscriber is registered for any kind.
    pub fn is_empty(&self) -> bool {
        self.lock().values().all(Vec::is_empty)
    }

    /// Fan a raw notification out to the subscribers of its kind.
    ///
    /// Never panics and never returns an error: unknown codes are ignored and
    /// subscriber failures are logged and collected in the report.
    pub fn dispatch(&self, status: i32, correlation_id: i32) -> DispatchReport {
        let kind = match StatusKind::from_code(status) {
            Ok(kind) => kind,
            Err(_) => {
                debug!(status, correlation_id, "Unhandled status notification");
                return DispatchReport::default();
            }
        };

        let subscribers = self.lock().get(&kind).cloned().unwrap_or_default();
        trace!(%kind, correlation_id, count = subscribers.len(), "dispatching status");

        let event = StatusEvent {
            kind,
            correlation_id,
            received_at: Utc::now(),
        };
        let mut report = DispatchReport {
            kind: Some(kind),
            invoked: 0,
            failures: Vec::new(),
        };

        for subscriber in subscribers {
            report.invoked += 1;
            let failure = match catch_unwind(AssertUnwindSafe(|| subscriber.invoke(&event))) {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            if let Some(message) = failure {
                warn!(%kind, correlation_id, error = %message, "Status subscriber failed");
                report.failures.push(message);
            }
        }

        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

// =============================================================================
// Process-wide dispatch registry
// =============================================================================

/// Correlation id → subscriber table of the live session that owns it.
static REGISTRY: Lazy<Mutex<HashMap<i32, Weak<SubscriberTable>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn registry() -> MutexGuard<'static, HashMap<i32, Weak<SubscriberTable>>> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Route notifications carrying `correlation_id` to `table`.
///
/// Fails if another live session already owns the id.
pub(crate) fn register(correlation_id: i32, table: &Arc<SubscriberTable>) -> MrcResult<()> {
    let mut registry = registry();
    if let Some(existing) = registry.get(&correlation_id).and_then(Weak::upgrade) {
        if !Arc::ptr_eq(&existing, table) {
            return Err(MrcError::InvalidArgument(format!(
                "correlation id {correlation_id} is already used by another session"
            )));
        }
    }
    registry.insert(correlation_id, Arc::downgrade(table));
    debug!(correlation_id, "Registered status subscriber table");
    Ok(())
}

/// Stop routing `correlation_id`, if it still points at `table`.
pub(crate) fn unregister(correlation_id: i32, table: &Arc<SubscriberTable>) {
    let mut registry = registry();
    let owned = registry
        .get(&correlation_id)
        .map_or(false, |weak| weak.as_ptr() == Arc::as_ptr(table));
    if owned {
        registry.remove(&correlation_id);
        debug!(correlation_id, "Unregistered status subscriber table");
    }
}

/// Whether a live session currently owns `correlation_id`.
pub fn is_registered(correlation_id: i32) -> bool {
    registry()
        .get(&correlation_id)
        .and_then(Weak::upgrade)
        .is_some()
}

/// The native entry point handed to the server.
///
/// Runs on whatever thread the server uses. The registry lock is released
/// before any subscriber runs.
pub extern "system" fn status_entry_point(callback_id: i32, status: i32) {
    let outcome = catch_unwind(|| {
        let table = registry().get(&callback_id).and_then(Weak::upgrade);
        match table {
            Some(table) => {
                table.dispatch(status, callback_id);
            }
            None => debug!(callback_id, status, "Status notification for unknown session"),
        }
    });
    if outcome.is_err() {
        warn!(callback_id, status, "Status dispatch panicked");
    }
}
