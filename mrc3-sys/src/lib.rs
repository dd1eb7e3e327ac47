//! Raw FFI declarations for the MetroPro Remote Control client library
//! (`mrc3_client`).
//!
//! Every function returns `0` on success or a non-zero error code, except the
//! log-file helpers and the two string lookups, which cannot fail. String
//! outputs are written into caller-provided buffers and truncated to `size`.
//!
//! The declarations are only linked when the `mrc3-sdk` feature is enabled.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_double, c_int};

/// Status callback invoked by the library on a thread it owns.
pub type mrc3_status_callback_func_t = extern "system" fn(callback_id: c_int, status: c_int);

#[cfg(feature = "mrc3-sdk")]
extern "system" {
    pub fn mrc3_open_log_file(pathname: *const c_char) -> c_int;
    pub fn mrc3_close_log_file();
    pub fn mrc3_log_message(message: *const c_char);
    pub fn mrc3_get_interface_guid(result: *mut c_char, size: c_int);

    pub fn mrc3_new_interface(handle: *mut c_int) -> c_int;
    pub fn mrc3_free_interface(handle: *mut c_int) -> c_int;
    pub fn mrc3_set_interface_params(
        handle: c_int,
        protocol_sequence: *const c_char,
        network_address: *const c_char,
        end_point: *const c_char,
    ) -> c_int;
    pub fn mrc3_ping_server(handle: c_int) -> c_int;

    pub fn mrc3_request_control(handle: c_int) -> c_int;
    pub fn mrc3_release_control(handle: c_int) -> c_int;
    pub fn mrc3_get_server_state(handle: c_int, result: *mut c_int) -> c_int;
    pub fn mrc3_wait_idle(handle: c_int, timeout_millisecs: c_int) -> c_int;

    pub fn mrc3_set_script_filename(handle: c_int, filename: *const c_char) -> c_int;
    pub fn mrc3_set_script_text(handle: c_int, text: *const c_char) -> c_int;
    pub fn mrc3_set_script_context(handle: c_int, context: c_int) -> c_int;
    pub fn mrc3_run_script(handle: c_int, wait_done: bool) -> c_int;
    pub fn mrc3_start_script(handle: c_int) -> c_int;
    pub fn mrc3_get_script_running(handle: c_int, result: *mut c_int) -> c_int;
    pub fn mrc3_get_script_error(handle: c_int, result: *mut c_int) -> c_int;
    pub fn mrc3_get_script_output(handle: c_int, result: *mut c_char, size: c_int) -> c_int;
    pub fn mrc3_get_script_stop_str_val(handle: c_int, result: *mut c_char, size: c_int)
        -> c_int;
    pub fn mrc3_get_script_stop_num_val(handle: c_int, result: *mut c_double) -> c_int;

    pub fn mrc3_set_status_callback_function(
        handle: c_int,
        function: Option<mrc3_status_callback_func_t>,
    ) -> c_int;
    pub fn mrc3_set_status_callback_mask(handle: c_int, bitmask: c_int) -> c_int;
    pub fn mrc3_set_status_callback_id(handle: c_int, callback_id: c_int) -> c_int;

    pub fn mrc3_get_error_message(err: c_int, result: *mut c_char, size: c_int);
}
