//! FFI bindings for Synheart Sense
//!
//! This module provides C-compatible functions for driving a processor from
//! firmware glue or other languages. Results come back as JSON strings that
//! must be freed by the caller using `sense_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use serde::Serialize;

use crate::config::SenseConfig;
use crate::error::ComputeError;
use crate::pipeline::SenseProcessor;
use crate::signal::StageConfig;
use crate::types::{SignalBuffer, SignalKind, SleepRecord, VitalsRecord};

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

/// Serialize `value`, or record the error and return NULL
fn json_or_null<T: Serialize>(value: Result<T, ComputeError>) -> *mut c_char {
    match value.and_then(|v| Ok(serde_json::to_string(&v)?)) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Borrow `len` values; NULL is only accepted for an empty slice
unsafe fn slice_from<'a>(data: *const f64, len: usize) -> Option<&'a [f64]> {
    if len == 0 {
        return Some(&[]);
    }
    if data.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts(data, len))
}

fn parse_signal(name: &str) -> Result<SignalKind, ComputeError> {
    match name.to_ascii_lowercase().as_str() {
        "ppg" => Ok(SignalKind::Ppg),
        "imu" => Ok(SignalKind::Imu),
        other => Err(ComputeError::config(format!("unknown signal '{}'", other))),
    }
}

// ============================================================================
// Processor lifecycle
// ============================================================================

/// Opaque handle to a SenseProcessor
pub struct SenseProcessorHandle {
    processor: SenseProcessor,
}

/// Create a processor from a JSON configuration, or defaults when NULL.
///
/// # Safety
/// - `config_json` must be NULL or a valid null-terminated C string.
/// - Must be freed with `sense_processor_free`.
/// - Returns NULL on error; call `sense_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sense_processor_new(config_json: *const c_char) -> *mut SenseProcessorHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        Ok(SenseConfig::default())
    } else {
        match cstr_to_string(config_json) {
            Some(json) => SenseConfig::from_json(&json),
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        }
    };

    match config.and_then(SenseProcessor::new) {
        Ok(processor) => Box::into_raw(Box::new(SenseProcessorHandle { processor })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a processor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `sense_processor_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sense_processor_free(processor: *mut SenseProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

// ============================================================================
// Signal input
// ============================================================================

/// Feed raw single-channel PPG counts; returns the heart rate result as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `sense_processor_new`.
/// - `samples` must point to `len` readable doubles (may be NULL when `len` is 0).
/// - Returns a newly allocated string that must be freed with `sense_free_string`.
#[no_mangle]
pub unsafe extern "C" fn sense_processor_process_ppg(
    processor: *mut SenseProcessorHandle,
    samples: *const f64,
    len: usize,
    sample_rate_hz: f64,
    start_timestamp_ms: u64,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    let Some(values) = slice_from(samples, len) else {
        set_last_error("Null sample pointer");
        return ptr::null_mut();
    };

    let buffer = SignalBuffer::mono(values.to_vec(), sample_rate_hz, start_timestamp_ms);
    json_or_null(Ok(handle.processor.process_ppg(buffer)))
}

/// Feed interleaved x/y/z acceleration (m/s²); returns activity info as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `sense_processor_new`.
/// - `accel_xyz` must point to `3 * frames` readable doubles (may be NULL when `frames` is 0).
/// - Returns a newly allocated string that must be freed with `sense_free_string`.
#[no_mangle]
pub unsafe extern "C" fn sense_processor_process_imu(
    processor: *mut SenseProcessorHandle,
    accel_xyz: *const f64,
    frames: usize,
    sample_rate_hz: f64,
    start_timestamp_ms: u64,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    let Some(values) = frames
        .checked_mul(3)
        .and_then(|n| slice_from(accel_xyz, n))
    else {
        set_last_error("Null or oversized acceleration pointer");
        return ptr::null_mut();
    };

    let buffer = SignalBuffer::new(values.to_vec(), 3, sample_rate_hz, start_timestamp_ms);
    json_or_null(handle.processor.process_imu(buffer))
}

// ============================================================================
// Health input
// ============================================================================

/// Apply a day's vitals (JSON `VitalsRecord`); returns the health status as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `sense_processor_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `sense_free_string`.
#[no_mangle]
pub unsafe extern "C" fn sense_processor_update_vitals(
    processor: *mut SenseProcessorHandle,
    json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    let Some(json_str) = cstr_to_string(json) else {
        set_last_error("Invalid JSON string pointer");
        return ptr::null_mut();
    };

    let status = serde_json::from_str::<VitalsRecord>(&json_str)
        .map_err(ComputeError::from)
        .map(|vitals| handle.processor.update_vitals(&vitals));
    json_or_null(status)
}

/// Apply a night's sleep (JSON `SleepRecord`); returns the health status as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `sense_processor_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `sense_free_string`.
#[no_mangle]
pub unsafe extern "C" fn sense_processor_update_sleep(
    processor: *mut SenseProcessorHandle,
    json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    let Some(json_str) = cstr_to_string(json) else {
        set_last_error("Invalid JSON string pointer");
        return ptr::null_mut();
    };

    let status = serde_json::from_str::<SleepRecord>(&json_str)
        .map_err(ComputeError::from)
        .and_then(|sleep| handle.processor.update_sleep(&sleep));
    json_or_null(status)
}

/// Replace one stage's configuration (JSON `StageConfig`).
///
/// # Safety
/// - `processor` must be a valid pointer returned by `sense_processor_new`.
/// - `signal` ("ppg" or "imu"), `stage` and `config_json` must be valid null-terminated C strings.
/// - Returns 0 on success, -1 on error; call `sense_last_error` for the message.
#[no_mangle]
pub unsafe extern "C" fn sense_processor_update_stage(
    processor: *mut SenseProcessorHandle,
    signal: *const c_char,
    stage: *const c_char,
    config_json: *const c_char,
) -> i32 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }
    let handle = &mut *processor;

    let (Some(signal), Some(stage), Some(json)) = (
        cstr_to_string(signal),
        cstr_to_string(stage),
        cstr_to_string(config_json),
    ) else {
        set_last_error("Invalid string pointer");
        return -1;
    };

    let result = parse_signal(&signal).and_then(|kind| {
        let config: StageConfig = serde_json::from_str(&json)?;
        handle.processor.update_config(kind, &stage, config)
    });
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Latest heart rate, HRV, activity and health status as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `sense_processor_new`.
/// - Returns a newly allocated string that must be freed with `sense_free_string`.
#[no_mangle]
pub unsafe extern "C" fn sense_processor_snapshot(processor: *const SenseProcessorHandle) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &*processor;
    json_or_null(Ok(handle.processor.snapshot()))
}

/// Pipeline and extractor counters as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `sense_processor_new`.
/// - Returns a newly allocated string that must be freed with `sense_free_string`.
#[no_mangle]
pub unsafe extern "C" fn sense_processor_metrics(processor: *const SenseProcessorHandle) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &*processor;
    json_or_null(Ok(handle.processor.metrics()))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Sense functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Sense function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sense_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Sense function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn sense_last_error() -> *const c_char {
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
pub unsafe extern "C" fn sense_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityInfo, HealthStatus, HrResult};
    use std::ffi::CString;

    unsafe fn take_json<T: serde::de::DeserializeOwned>(ptr: *mut c_char) -> T {
        assert!(!ptr.is_null());
        let value = serde_json::from_str(CStr::from_ptr(ptr).to_str().unwrap()).unwrap();
        sense_free_string(ptr);
        value
    }

    #[test]
    fn test_ffi_processor_lifecycle() {
        unsafe {
            let processor = sense_processor_new(ptr::null());
            assert!(!processor.is_null());

            let pulse: Vec<f64> = (0..500)
                .map(|i| 2000.0 + 500.0 * (2.0 * std::f64::consts::PI * 1.2 * i as f64 / 100.0).sin())
                .collect();
            let hr: HrResult = take_json(sense_processor_process_ppg(
                processor,
                pulse.as_ptr(),
                pulse.len(),
                100.0,
                0,
            ));
            assert!(hr.count <= 6);

            let accel: Vec<f64> = (0..100).flat_map(|_| [0.0, 0.0, 9.81]).collect();
            let info: ActivityInfo = take_json(sense_processor_process_imu(
                processor,
                accel.as_ptr(),
                100,
                100.0,
                0,
            ));
            assert_eq!(info.step_count, 0);

            let vitals = CString::new(
                r#"{"hrv_ms":50.0,"resting_hr_bpm":60.0,"temperature_c":36.5,
                    "respiratory_rate":16.0,"spo2_percentage":98.0,"timestamp_ms":0}"#,
            )
            .unwrap();
            let status: HealthStatus =
                take_json(sense_processor_update_vitals(processor, vitals.as_ptr()));
            assert_eq!(status.overall_score, 85.0);

            let snapshot: serde_json::Value = take_json(sense_processor_snapshot(processor));
            assert!(snapshot.get("health").is_some());
            let metrics: serde_json::Value = take_json(sense_processor_metrics(processor));
            assert_eq!(metrics["imu"]["cycles"], 1);

            sense_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_update_stage() {
        unsafe {
            let processor = sense_processor_new(ptr::null());
            let signal = CString::new("imu").unwrap();
            let stage = CString::new("lowpass").unwrap();
            let good = CString::new(
                r#"{"name":"lowpass","kind":"filter","algorithm":"lowpass","enabled":true,
                    "params":[10.0],"buffer_size":0}"#,
            )
            .unwrap();
            assert_eq!(
                sense_processor_update_stage(processor, signal.as_ptr(), stage.as_ptr(), good.as_ptr()),
                0
            );

            let bad = CString::new(
                r#"{"name":"lowpass","kind":"filter","algorithm":"lowpass","enabled":true,
                    "params":[-1.0],"buffer_size":0}"#,
            )
            .unwrap();
            assert_eq!(
                sense_processor_update_stage(processor, signal.as_ptr(), stage.as_ptr(), bad.as_ptr()),
                -1
            );
            assert!(!sense_last_error().is_null());
            sense_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let bad_config = CString::new("{\"ppg_channel\": 9}").unwrap();
            assert!(sense_processor_new(bad_config.as_ptr()).is_null());
            let error = CStr::from_ptr(sense_last_error()).to_str().unwrap();
            assert!(error.contains("channel"));

            let processor = sense_processor_new(ptr::null());
            assert!(sense_last_error().is_null());
            let not_json = CString::new("not json").unwrap();
            assert!(sense_processor_update_sleep(processor, not_json.as_ptr()).is_null());
            assert!(!sense_last_error().is_null());

            assert!(sense_processor_process_ppg(processor, ptr::null(), 10, 100.0, 0).is_null());
            assert!(sense_processor_snapshot(ptr::null()).is_null());
            sense_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = CStr::from_ptr(sense_version()).to_str().unwrap();
            assert_eq!(version, env!("CARGO_PKG_VERSION"));
        }
    }
}
