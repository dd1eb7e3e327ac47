//! Numeric constants shared by MRC clients and the MetroPro server.
//!
//! These values are part of the server contract and must not change.

// Names mirror the server header.
#![allow(missing_docs)]

/// Invalid handle value. Distinct from every handle the library hands out.
pub const MRC_INVALID_HANDLE: i32 = -1;

/// Default size of the buffers that receive script output and stop strings.
pub const MRC_SCRIPT_OUTPUT_BUFSIZ: usize = 512;

// Server state codes
pub const MRC_SERVER_STATE_UNKNOWN: i32 = -1;
pub const MRC_SERVER_STATE_STOPPED: i32 = 0;
pub const MRC_SERVER_STATE_IDLE: i32 = 1;
pub const MRC_SERVER_STATE_ACTIVE: i32 = 2;

// Script context codes
pub const MRC_SCRIPT_CONTEXT_DESKTOP: i32 = 0;
pub const MRC_SCRIPT_CONTEXT_FRONTMOST_APP: i32 = 1;

// Error codes. Values below MRC_ERR_BASE come from the OS / RPC runtime.
pub const MRC_ERR_NONE: i32 = 0;
pub const MRC_ERR_BASE: i32 = 0x2000_0000;
pub const MRC_ERR_RUN_SCRIPT_FAILED: i32 = 0x2000_0000;
pub const MRC_ERR_SERVER_BUSY: i32 = 0x2000_0001;
pub const MRC_ERR_COMMAND_TIMEOUT: i32 = 0x2000_0002;
pub const MRC_ERR_REQUEST_CONTROL_FAILED: i32 = 0x2000_0003;
pub const MRC_ERR_RELEASE_CONTROL_FAILED: i32 = 0x2000_0004;
pub const MRC_ERR_SCRIPT_CONTEXT_NO_APP: i32 = 0x2000_0005;
pub const MRC_ERR_INVALID_PARAM: i32 = 0x2000_0006;
pub const MRC_ERR_CANT_WRITE_TEMP_FILE: i32 = 0x2000_0007;
pub const MRC_ERR_INVALID_HANDLE: i32 = 0x2000_0008;
pub const MRC_ERR_RPC_BINDING_CREATE: i32 = 0x2000_0009;
pub const MRC_ERR_RPC_BINDING_FREE: i32 = 0x2000_000A;
pub const MRC_ERR_NO_MEM: i32 = 0x2000_000B;
pub const MRC_ERR_CLIENT_INTERFACE_BUSY: i32 = 0x2000_000C;
pub const MRC_ERR_CLIENT_INTERFACE_OPEN: i32 = 0x2000_000D;
pub const MRC_ERR_CLIENT_INTERFACE_NOT_OPEN: i32 = 0x2000_000E;
pub const MRC_ERR_NO_SCRIPT_FILENAME_OR_TEXT: i32 = 0x2000_000F;
pub const MRC_ERR_CANT_CREATE_LOG_FILE: i32 = 0x2000_0010;
pub const MRC_ERR_TIMEOUT_WAITING_FOR_IDLE: i32 = 0x2000_0011;
pub const MRC_ERR_TIMEOUT_WAITING_FOR_SCRIPT: i32 = 0x2000_0012;

/// RPC_S_SERVER_UNAVAILABLE from the RPC runtime.
pub const RPC_S_SERVER_UNAVAILABLE: i32 = 1722;

// Enable-status-callback bitmasks
pub const MRC_ENABLE_STATUS_CALLBACK_BEGIN_ACQUIRE: i32 = 0x0001;
pub const MRC_ENABLE_STATUS_CALLBACK_END_ACQUIRE: i32 = 0x0002;
pub const MRC_ENABLE_STATUS_CALLBACK_BEGIN_FDA: i32 = 0x0004;
pub const MRC_ENABLE_STATUS_CALLBACK_END_FDA: i32 = 0x0008;
pub const MRC_ENABLE_STATUS_CALLBACK_SCRIPT: i32 = 0x0010;
pub const MRC_ENABLE_STATUS_CALLBACK_END_SCRIPT: i32 = 0x0020;
pub const MRC_ENABLE_STATUS_CALLBACK_SCAN_OFFSET: i32 = 0x0040;
pub const MRC_ENABLE_STATUS_CALLBACK_ALL: i32 = 0xFFFF;
pub const MRC_ENABLE_STATUS_CALLBACK_NONE: i32 = 0x0000;

// Callback status codes passed to the status entry point.
// The server header numbers 1..=5; script-start and scan-offset follow on.
pub const MRC_CALLBACK_STATUS_BEGIN_ACQUIRE: i32 = 1;
pub const MRC_CALLBACK_STATUS_END_ACQUIRE: i32 = 2;
pub const MRC_CALLBACK_STATUS_BEGIN_FDA: i32 = 3;
pub const MRC_CALLBACK_STATUS_END_FDA: i32 = 4;
pub const MRC_CALLBACK_STATUS_END_SCRIPT: i32 = 5;
pub const MRC_CALLBACK_STATUS_SCRIPT: i32 = 6;
pub const MRC_CALLBACK_STATUS_SCAN_OFFSET: i32 = 7;
