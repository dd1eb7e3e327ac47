//! Remote interface abstraction
//!
//! [`RemoteInterface`] is the seam between the session logic and whatever
//! actually talks to MetroPro. Each method corresponds to one entry point of
//! the `mrc3_client` library and reports the library's raw status code as the
//! `Err` side of a [`RemoteResult`]. No translation or retrying happens here;
//! that is the job of the [`ErrorNormalizer`](crate::normalizer::ErrorNormalizer).
//!
//! Implementations:
//! - [`NativeInterface`](crate::native::NativeInterface) (feature `native`)
//! - [`SimulatedServer`](crate::simulator::SimulatedServer)

use crate::error::ErrorCode;

/// Raw handle value as the library sees it.
pub type RawHandle = i32;

/// Result of a single remote call: the value, or the non-zero status code.
pub type RemoteResult<T> = std::result::Result<T, ErrorCode>;

/// Signature of the single process-wide status entry point.
///
/// The server invokes it on a thread of its own choosing with the correlation
/// id registered for the session and the raw status code.
pub type StatusCallbackFn = extern "system" fn(callback_id: i32, status: i32);

/// One method per remote operation of the client library.
///
/// Implementations must be callable from several threads at once: the owning
/// thread drives the session while a status notification may be in flight.
pub trait RemoteInterface: Send + Sync {
    /// Allocate a new interface. No server communication.
    fn new_interface(&self) -> RemoteResult<RawHandle>;

    /// Close and free an interface.
    fn free_interface(&self, handle: RawHandle) -> RemoteResult<()>;

    /// Bind transport parameters. No server communication.
    fn set_interface_params(
        &self,
        handle: RawHandle,
        protocol: &str,
        network_address: &str,
        end_point: &str,
    ) -> RemoteResult<()>;

    /// Do-nothing round trip.
    fn ping_server(&self, handle: RawHandle) -> RemoteResult<()>;

    /// Ask the server to enter the active state.
    fn request_control(&self, handle: RawHandle) -> RemoteResult<()>;

    /// Ask the server to return to the idle state.
    fn release_control(&self, handle: RawHandle) -> RemoteResult<()>;

    /// Current raw server state code.
    fn get_server_state(&self, handle: RawHandle) -> RemoteResult<i32>;

    /// Block up to `timeout_ms` (forever when `<= 0`) until the interface is idle.
    fn wait_idle(&self, handle: RawHandle, timeout_ms: i32) -> RemoteResult<()>;

    /// Set (or clear, with an empty string) the script filename.
    fn set_script_filename(&self, handle: RawHandle, filename: &str) -> RemoteResult<()>;

    /// Set (or clear, with an empty string) the script text.
    fn set_script_text(&self, handle: RawHandle, text: &str) -> RemoteResult<()>;

    /// Set the raw script context code.
    fn set_script_context(&self, handle: RawHandle, context: i32) -> RemoteResult<()>;

    /// Run the configured script, optionally blocking until it is done.
    fn run_script(&self, handle: RawHandle, wait_done: bool) -> RemoteResult<()>;

    /// Whether a script is currently running for this interface.
    fn get_script_running(&self, handle: RawHandle) -> RemoteResult<bool>;

    /// Result code of the last script run.
    fn get_script_error(&self, handle: RawHandle) -> RemoteResult<i32>;

    /// Text output of the last script run, truncated to fit `capacity` bytes
    /// including the terminator.
    fn get_script_output(&self, handle: RawHandle, capacity: usize) -> RemoteResult<String>;

    /// Stop string of the last script run, truncated like the output.
    fn get_script_stop_str_val(&self, handle: RawHandle, capacity: usize)
        -> RemoteResult<String>;

    /// Stop number of the last script run.
    fn get_script_stop_num_val(&self, handle: RawHandle) -> RemoteResult<f64>;

    /// Install (or remove) the status entry point.
    fn set_status_callback_function(
        &self,
        handle: RawHandle,
        function: Option<StatusCallbackFn>,
    ) -> RemoteResult<()>;

    /// Select which status kinds the server emits.
    fn set_status_callback_mask(&self, handle: RawHandle, mask: i32) -> RemoteResult<()>;

    /// Set the id echoed back on every notification.
    fn set_status_callback_id(&self, handle: RawHandle, callback_id: i32) -> RemoteResult<()>;

    /// Display string for a status code. Cannot fail.
    fn get_error_message(&self, code: ErrorCode, capacity: usize) -> String;

    /// GUID of the RPC interface, for version compatibility checks. Cannot fail.
    fn get_interface_guid(&self, capacity: usize) -> String;

    /// Open (truncating) the diagnostic log file.
    fn open_log_file(&self, path: &str) -> RemoteResult<()>;

    /// Write a line to the diagnostic log file, if open.
    fn log_message(&self, message: &str);

    /// Close the diagnostic log file.
    fn close_log_file(&self);
}

/// Truncate `text` so that it fits a C buffer of `capacity` bytes
/// (one byte is reserved for the terminator), on a character boundary.
pub(crate) fn truncate_to_capacity(text: &str, capacity: usize) -> String {
    let limit = capacity.saturating_sub(1);
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_reserves_terminator() {
        assert_eq!(truncate_to_capacity("abcdef", 4), "abc");
        assert_eq!(truncate_to_capacity("abc", 4), "abc");
        assert_eq!(truncate_to_capacity("abc", 0), "");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        // "é" is two bytes; cutting after one byte would split it
        assert_eq!(truncate_to_capacity("aé", 3), "a");
    }
}
