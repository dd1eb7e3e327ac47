//! `RemoteInterface` backed by the vendor `mrc3_client` library.
//!
//! Thin and mechanical: every method converts its arguments to C types, makes
//! exactly one library call and hands the raw status code back. String results
//! come back through caller-owned buffers of the requested capacity.

#![allow(unsafe_code)]

use std::ffi::{c_char, c_int, CStr, CString};

use mrc3_sys::*;

use crate::codes::{MRC_ERR_INVALID_PARAM, MRC_ERR_NONE};
use crate::error::ErrorCode;
use crate::transport::{RawHandle, RemoteInterface, RemoteResult, StatusCallbackFn};

/// The real client library. Stateless; all state lives behind the handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeInterface;

impl NativeInterface {
    /// Create the binding.
    pub fn new() -> Self {
        Self
    }
}

fn check(code: c_int) -> RemoteResult<()> {
    if code == MRC_ERR_NONE {
        Ok(())
    } else {
        Err(ErrorCode(code))
    }
}

// A Rust string with an interior NUL cannot cross the boundary
fn c_string(value: &str) -> RemoteResult<CString> {
    CString::new(value).map_err(|_| ErrorCode(MRC_ERR_INVALID_PARAM))
}

fn buffer_size(capacity: usize) -> c_int {
    c_int::try_from(capacity).unwrap_or(c_int::MAX)
}

/// Run `fill` against a zeroed buffer and read back the terminated string.
fn read_string(capacity: usize, fill: impl FnOnce(*mut c_char, c_int) -> c_int) -> RemoteResult<String> {
    if capacity == 0 {
        return Ok(String::new());
    }
    let mut buffer = vec![0u8; capacity];
    check(fill(buffer.as_mut_ptr().cast::<c_char>(), buffer_size(capacity)))?;
    // Guarantee a terminator even if the library filled the whole buffer
    if let Some(last) = buffer.last_mut() {
        *last = 0;
    }
    Ok(CStr::from_bytes_until_nul(&buffer)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default())
}

impl RemoteInterface for NativeInterface {
    fn new_interface(&self) -> RemoteResult<RawHandle> {
        let mut handle: c_int = crate::codes::MRC_INVALID_HANDLE;
        check(unsafe { mrc3_new_interface(&mut handle) })?;
        Ok(handle)
    }

    fn free_interface(&self, handle: RawHandle) -> RemoteResult<()> {
        let mut handle = handle;
        check(unsafe { mrc3_free_interface(&mut handle) })
    }

    fn set_interface_params(
        &self,
        handle: RawHandle,
        protocol: &str,
        network_address: &str,
        end_point: &str,
    ) -> RemoteResult<()> {
        let protocol = c_string(protocol)?;
        let network_address = c_string(network_address)?;
        let end_point = c_string(end_point)?;
        check(unsafe {
            mrc3_set_interface_params(
                handle,
                protocol.as_ptr(),
                network_address.as_ptr(),
                end_point.as_ptr(),
            )
        })
    }

    fn ping_server(&self, handle: RawHandle) -> RemoteResult<()> {
        check(unsafe { mrc3_ping_server(handle) })
    }

    fn request_control(&self, handle: RawHandle) -> RemoteResult<()> {
        check(unsafe { mrc3_request_control(handle) })
    }

    fn release_control(&self, handle: RawHandle) -> RemoteResult<()> {
        check(unsafe { mrc3_release_control(handle) })
    }

    fn get_server_state(&self, handle: RawHandle) -> RemoteResult<i32> {
        let mut state: c_int = 0;
        check(unsafe { mrc3_get_server_state(handle, &mut state) })?;
        Ok(state)
    }

    fn wait_idle(&self, handle: RawHandle, timeout_ms: i32) -> RemoteResult<()> {
        check(unsafe { mrc3_wait_idle(handle, timeout_ms) })
    }

    fn set_script_filename(&self, handle: RawHandle, filename: &str) -> RemoteResult<()> {
        let filename = c_string(filename)?;
        check(unsafe { mrc3_set_script_filename(handle, filename.as_ptr()) })
    }

    fn set_script_text(&self, handle: RawHandle, text: &str) -> RemoteResult<()> {
        let text = c_string(text)?;
        check(unsafe { mrc3_set_script_text(handle, text.as_ptr()) })
    }

    fn set_script_context(&self, handle: RawHandle, context: i32) -> RemoteResult<()> {
        check(unsafe { mrc3_set_script_context(handle, context) })
    }

    fn run_script(&self, handle: RawHandle, wait_done: bool) -> RemoteResult<()> {
        if wait_done {
            check(unsafe { mrc3_run_script(handle, true) })
        } else {
            check(unsafe { mrc3_start_script(handle) })
        }
    }

    fn get_script_running(&self, handle: RawHandle) -> RemoteResult<bool> {
        let mut running: c_int = 0;
        check(unsafe { mrc3_get_script_running(handle, &mut running) })?;
        Ok(running != 0)
    }

    fn get_script_error(&self, handle: RawHandle) -> RemoteResult<i32> {
        let mut error: c_int = 0;
        check(unsafe { mrc3_get_script_error(handle, &mut error) })?;
        Ok(error)
    }

    fn get_script_output(&self, handle: RawHandle, capacity: usize) -> RemoteResult<String> {
        read_string(capacity, |buffer, size| unsafe {
            mrc3_get_script_output(handle, buffer, size)
        })
    }

    fn get_script_stop_str_val(&self, handle: RawHandle, capacity: usize) -> RemoteResult<String> {
        read_string(capacity, |buffer, size| unsafe {
            mrc3_get_script_stop_str_val(handle, buffer, size)
        })
    }

    fn get_script_stop_num_val(&self, handle: RawHandle) -> RemoteResult<f64> {
        let mut value: f64 = 0.0;
        check(unsafe { mrc3_get_script_stop_num_val(handle, &mut value) })?;
        Ok(value)
    }

    fn set_status_callback_function(
        &self,
        handle: RawHandle,
        function: Option<StatusCallbackFn>,
    ) -> RemoteResult<()> {
        check(unsafe { mrc3_set_status_callback_function(handle, function) })
    }

    fn set_status_callback_mask(&self, handle: RawHandle, mask: i32) -> RemoteResult<()> {
        check(unsafe { mrc3_set_status_callback_mask(handle, mask) })
    }

    fn set_status_callback_id(&self, handle: RawHandle, callback_id: i32) -> RemoteResult<()> {
        check(unsafe { mrc3_set_status_callback_id(handle, callback_id) })
    }

    fn get_error_message(&self, code: ErrorCode, capacity: usize) -> String {
        read_string(capacity, |buffer, size| {
            unsafe { mrc3_get_error_message(code.value(), buffer, size) };
            MRC_ERR_NONE
        })
        .unwrap_or_default()
    }

    fn get_interface_guid(&self, capacity: usize) -> String {
        read_string(capacity, |buffer, size| {
            unsafe { mrc3_get_interface_guid(buffer, size) };
            MRC_ERR_NONE
        })
        .unwrap_or_default()
    }

    fn open_log_file(&self, path: &str) -> RemoteResult<()> {
        let path = c_string(path)?;
        check(unsafe { mrc3_open_log_file(path.as_ptr()) })
    }

    fn log_message(&self, message: &str) {
        if let Ok(message) = c_string(message) {
            unsafe { mrc3_log_message(message.as_ptr()) };
        }
    }

    fn close_log_file(&self) {
        unsafe { mrc3_close_log_file() };
    }
}
