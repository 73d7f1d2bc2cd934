//! FFI bindings for cpap-flux
//!
//! C-compatible functions for calling the importer from other languages.
//! All functions take null-terminated C strings and return allocated memory
//! that must be freed by the caller using `cpap_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::Path;
use std::ptr;

use crate::adapters::prs1::inspect_file;
use crate::config::PipelineConfig;
use crate::encoder::ReportEncoder;
use crate::error::ImportError;
use crate::pipeline::ImportProcessor;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Hand a result to C: the JSON string on success, NULL plus the last error
/// otherwise.
fn into_c_result(result: Result<String, ImportError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Config from an optional TOML path, layered over defaults and environment
unsafe fn load_config(config_path: *const c_char) -> Result<PipelineConfig, ImportError> {
    let path = cstr_to_string(config_path);
    Ok(PipelineConfig::load_from(path.as_deref().map(Path::new))?)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Import a card directory and return the JSON report envelope.
///
/// # Safety
/// - `root` must be a valid null-terminated C string.
/// - `config_path` may be NULL; otherwise it must be a valid C string naming a TOML file.
/// - Returns a newly allocated string that must be freed with `cpap_free_string`.
/// - Returns NULL on error; call `cpap_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn cpap_import_directory(
    root: *const c_char,
    config_path: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let root = match cstr_to_string(root) {
        Some(s) => s,
        None => {
            set_last_error("Invalid root path pointer");
            return ptr::null_mut();
        }
    };

    into_c_result(load_config(config_path).and_then(|config| {
        let outcome = ImportProcessor::new(config).import_directory(Path::new(&root))?;
        ReportEncoder::new().encode_to_json(&outcome, false)
    }))
}

/// Decode the chunk headers of one PRS1 file as a JSON array.
///
/// # Safety
/// - `path` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `cpap_free_string`.
/// - Returns NULL on error; call `cpap_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn cpap_inspect_file(path: *const c_char) -> *mut c_char {
    clear_last_error();

    let path = match cstr_to_string(path) {
        Some(s) => s,
        None => {
            set_last_error("Invalid file path pointer");
            return ptr::null_mut();
        }
    };

    into_c_result(
        inspect_file(Path::new(&path))
            .and_then(|headers| serde_json::to_string(&headers).map_err(ImportError::from)),
    )
}

// ============================================================================
// Stateful API
// ============================================================================

/// Opaque handle to an importer that can be cancelled from another thread
pub struct CpapProcessorHandle {
    inner: ImportProcessor,
}

/// Create an importer.
///
/// # Safety
/// - `config_path` may be NULL; otherwise it must be a valid C string.
/// - Returns NULL on configuration errors.
/// - The handle must be freed with `cpap_processor_free`.
#[no_mangle]
pub unsafe extern "C" fn cpap_processor_new(config_path: *const c_char) -> *mut CpapProcessorHandle {
    clear_last_error();
    match load_config(config_path) {
        Ok(config) => Box::into_raw(Box::new(CpapProcessorHandle {
            inner: ImportProcessor::new(config),
        })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an importer.
///
/// # Safety
/// - `processor` must be a handle from `cpap_processor_new`, or NULL.
/// - The handle must not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn cpap_processor_free(processor: *mut CpapProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Import a card directory with this importer.
///
/// # Safety
/// - `processor` must be a valid handle; `root` a valid C string.
/// - Returns a newly allocated string that must be freed with `cpap_free_string`.
/// - Returns NULL on error, including cancellation.
#[no_mangle]
pub unsafe extern "C" fn cpap_processor_import(
    processor: *const CpapProcessorHandle,
    root: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(processor) = processor.as_ref() else {
        set_last_error("Null processor handle");
        return ptr::null_mut();
    };
    let Some(root) = cstr_to_string(root) else {
        set_last_error("Invalid root path pointer");
        return ptr::null_mut();
    };

    into_c_result(
        processor
            .inner
            .import_directory(Path::new(&root))
            .and_then(|outcome| ReportEncoder::new().encode_to_json(&outcome, false)),
    )
}

/// Request cancellation of any import running on this importer.
///
/// # Safety
/// - `processor` must be a valid handle or NULL.
#[no_mangle]
pub unsafe extern "C" fn cpap_processor_cancel(processor: *const CpapProcessorHandle) {
    if let Some(processor) = processor.as_ref() {
        processor.inner.cancellation_token().cancel();
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by this library.
///
/// # Safety
/// - `ptr` must come from a cpap-flux function, or be NULL.
/// - The pointer must not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn cpap_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next cpap-flux call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn cpap_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn cpap_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::prs1::{DataChunk, FileKind, HeaderKind, HeaderRecord};
    use chrono::{TimeZone, Utc};

    fn c_path(path: &Path) -> CString {
        CString::new(path.to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_ffi_import_unrecognized_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = c_path(dir.path());
        unsafe {
            let result = cpap_import_directory(root.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error = CStr::from_ptr(cpap_last_error()).to_str().unwrap();
            assert!(error.contains("no supported device card"));
        }
    }

    #[test]
    fn test_ffi_null_arguments() {
        unsafe {
            assert!(cpap_import_directory(ptr::null(), ptr::null()).is_null());
            assert!(!cpap_last_error().is_null());
            assert!(cpap_inspect_file(ptr::null()).is_null());
            assert!(cpap_processor_import(ptr::null(), ptr::null()).is_null());
            cpap_free_string(ptr::null_mut());
            cpap_processor_free(ptr::null_mut());
        }
    }

    #[test]
    fn test_ffi_inspect_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0000000042.002");
        let header = HeaderRecord {
            format_version: 2,
            block_length: 0,
            kind: HeaderKind::Standard,
            family: 0,
            family_version: 4,
            file_kind: FileKind::Events,
            session_number: 42,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            layout: None,
        };
        std::fs::write(&path, DataChunk::encode(header, &[0x0D, 0x00, 0x00])).unwrap();

        let c = c_path(&path);
        unsafe {
            let result = cpap_inspect_file(c.as_ptr());
            assert!(!result.is_null());
            let json = CStr::from_ptr(result).to_str().unwrap();
            let headers: serde_json::Value = serde_json::from_str(json).unwrap();
            assert_eq!(headers[0]["session_number"], 42);
            assert_eq!(headers[0]["file_kind"], "Events");
            cpap_free_string(result);
        }
    }

    #[test]
    fn test_ffi_processor_cancel() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("PROP.TXT"), "SerialNumber=P1\nModelNumber=560P\n").unwrap();
        let root = c_path(dir.path());
        unsafe {
            let processor = cpap_processor_new(ptr::null());
            assert!(!processor.is_null());
            cpap_processor_cancel(processor);
            let result = cpap_processor_import(processor, root.as_ptr());
            assert!(result.is_null());
            let error = CStr::from_ptr(cpap_last_error()).to_str().unwrap();
            assert!(error.contains("cancelled"));
            cpap_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = CStr::from_ptr(cpap_version()).to_str().unwrap();
            assert_eq!(version, env!("CARGO_PKG_VERSION"));
        }
    }
}
