use crate::Transport::{Client, SendConfig, SendError};
use log::error;
use std::ffi::{c_char, CStr};
use std::ptr;

// Error codes
pub const DMXP_SUCCESS: i32 = 0;
pub const DMXP_ERROR_NULL_POINTER: i32 = -1;
pub const DMXP_ERROR_INVALID_ARG: i32 = -2;
pub const DMXP_ERROR_TOO_LARGE: i32 = -3;
pub const DMXP_ERROR_BAD_TYPE: i32 = -4;
pub const DMXP_ERROR_QUEUE_ALLOC_FAILED: i32 = -5;
pub const DMXP_ERROR_QUEUE_FULL: i32 = -6;
pub const DMXP_ERROR_INTERNAL: i32 = -7;

/// Handle to a client instance (opaque pointer)
pub struct ClientHandle {
    inner: Client,
}

/// Create a client attached to a running send service.
///
/// # Arguments
/// * `config_path` - NUL-terminated path of the send service's TOML config.
/// * `index` - Client instance number.
///
/// # Returns
/// * Pointer to `ClientHandle`, or NULL on failure.
///
/// # Safety
/// `config_path` must be NULL or point to a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn dmxp_client_new(config_path: *const c_char, index: u32) -> *mut ClientHandle {
    if config_path.is_null() {
        return ptr::null_mut();
    }
    let Ok(path) = CStr::from_ptr(config_path).to_str() else {
        error!("FFI Error: config path is not valid UTF-8");
        return ptr::null_mut();
    };

    let conf = match SendConfig::from_file(path) {
        Ok(conf) => conf,
        Err(e) => {
            error!("FFI Error: failed to load {}: {}", path, e);
            return ptr::null_mut();
        }
    };
    match Client::init(&conf, index as usize) {
        Ok(client) => Box::into_raw(Box::new(ClientHandle { inner: client })),
        Err(e) => {
            error!("FFI Error: failed to attach client: {}", e);
            ptr::null_mut()
        }
    }
}

/// Send a message.
///
/// # Arguments
/// * `handle` - Pointer to `ClientHandle`.
/// * `msg_type` - Application message type, below 255.
/// * `data` - Pointer to the body; may be NULL when `len` is 0.
/// * `len` - Length of the body.
///
/// # Returns
/// * 0 on success, negative error code otherwise.
///
/// # Safety
/// `handle` must come from `dmxp_client_new` and `data` must be readable
/// for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn dmxp_client_send(
    handle: *mut ClientHandle,
    msg_type: u32,
    data: *const u8,
    len: usize,
) -> i32 {
    if handle.is_null() {
        return DMXP_ERROR_NULL_POINTER;
    }
    let body: &[u8] = if len == 0 {
        &[]
    } else if data.is_null() {
        return DMXP_ERROR_INVALID_ARG;
    } else {
        std::slice::from_raw_parts(data, len)
    };

    let client = &mut (*handle).inner;
    match client.send(msg_type, body) {
        Ok(()) => DMXP_SUCCESS,
        Err(SendError::TooLarge { .. }) => DMXP_ERROR_TOO_LARGE,
        Err(SendError::BadType(_)) => DMXP_ERROR_BAD_TYPE,
        Err(SendError::QueueAllocFailed) => DMXP_ERROR_QUEUE_ALLOC_FAILED,
        Err(SendError::QueueFull) => DMXP_ERROR_QUEUE_FULL,
        Err(SendError::Io(_)) => DMXP_ERROR_INTERNAL,
    }
}

/// Free a client handle.
///
/// # Safety
/// `handle` must be NULL or come from `dmxp_client_new`, and is invalid
/// afterwards.
#[no_mangle]
pub unsafe extern "C" fn dmxp_client_free(handle: *mut ClientHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}
