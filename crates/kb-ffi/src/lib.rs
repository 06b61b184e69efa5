mod context;
mod error;
mod types;

pub use context::*;
pub use error::*;
pub use types::*;

use std::ffi::CString;
use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;

use kb_bench::run_benchmark_at;

/// Execute a closure that returns a `KBStatus`, catching any panics
/// and converting them into `KBStatus::ErrorInternal`.
fn catch_panic<F: FnOnce() -> KBStatus>(f: F) -> KBStatus {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "internal panic".to_string());
            set_last_error(msg);
            KBStatus::ErrorInternal
        }
    }
}

/// Create a new benchmark context with the default native and reference
/// backends.
///
/// On success, writes a heap-allocated `KBContext` pointer into `*ctx_out`
/// and returns `KBStatus::Ok`. The caller must later call
/// `kb_context_destroy` to free the context.
#[no_mangle]
pub extern "C" fn kb_context_create(ctx_out: *mut *mut KBContext) -> KBStatus {
    catch_panic(|| {
        if ctx_out.is_null() {
            set_last_error("ctx_out is null".to_string());
            return KBStatus::ErrorInvalidArgument;
        }
        let ctx = Box::new(KBContext::new());
        unsafe {
            *ctx_out = Box::into_raw(ctx);
        }
        KBStatus::Ok
    })
}

/// Destroy a context previously created by `kb_context_create`.
///
/// Passing a null pointer is a no-op and returns `KBStatus::Ok`.
#[no_mangle]
pub unsafe extern "C" fn kb_context_destroy(ctx: *mut KBContext) -> KBStatus {
    if ctx.is_null() {
        return KBStatus::Ok;
    }
    drop(Box::from_raw(ctx));
    KBStatus::Ok
}

/// Run the checks for `operation` on `dtype` up to `speed`.
///
/// On success, writes a heap-allocated `KBResults` pointer into
/// `*results_out`. Only `VeryLong` runs produce extraction records; other
/// speeds yield an empty result set. The caller must later call
/// `kb_results_destroy`.
///
/// A divergence from the reference backend returns
/// `KBStatus::ErrorDivergence` with the distance and tolerance available
/// from `kb_last_error`.
#[no_mangle]
pub unsafe extern "C" fn kb_run_benchmark(
    ctx: *mut KBContext,
    operation: KBOperation,
    dtype: KBDataType,
    speed: KBTestSpeed,
    results_out: *mut *mut KBResults,
) -> KBStatus {
    catch_panic(|| {
        if ctx.is_null() || results_out.is_null() {
            set_last_error("null argument".to_string());
            return KBStatus::ErrorInvalidArgument;
        }
        let ctx = unsafe { &mut *ctx };
        match run_benchmark_at(
            operation.into(),
            dtype.into(),
            speed.into(),
            &mut ctx.execution,
        ) {
            Ok(extractions) => {
                let results = Box::new(KBResults::new(extractions));
                unsafe { *results_out = Box::into_raw(results) };
                KBStatus::Ok
            }
            Err(e) => report(e),
        }
    })
}

/// Number of extraction records in `results`. Null yields zero.
#[no_mangle]
pub unsafe extern "C" fn kb_results_count(results: *const KBResults) -> usize {
    if results.is_null() {
        return 0;
    }
    (*results).len()
}

/// Borrow the extraction record at `index`.
///
/// The pointers written into `*extraction_out` stay valid until
/// `kb_results_destroy` is called on `results`.
#[no_mangle]
pub unsafe extern "C" fn kb_results_get(
    results: *const KBResults,
    index: usize,
    extraction_out: *mut KBExtraction,
) -> KBStatus {
    if results.is_null() || extraction_out.is_null() {
        set_last_error("null argument".to_string());
        return KBStatus::ErrorInvalidArgument;
    }
    let results = &*results;
    match results.get(index) {
        Some(extraction) => {
            *extraction_out = extraction;
            KBStatus::Ok
        }
        None => {
            set_last_error(format!(
                "index {} out of range for {} results",
                index,
                results.len()
            ));
            KBStatus::ErrorInvalidArgument
        }
    }
}

/// Destroy results previously returned by `kb_run_benchmark`.
///
/// Passing a null pointer is a no-op.
#[no_mangle]
pub unsafe extern "C" fn kb_results_destroy(results: *mut KBResults) {
    if !results.is_null() {
        drop(Box::from_raw(results));
    }
}

/// Retrieve the last error message.
///
/// Returns a pointer to a C string describing the most recent error, or
/// null if no error has occurred. The caller must free the returned string
/// with `kb_free_string`.
#[no_mangle]
pub extern "C" fn kb_last_error() -> *const c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null(),
    }
}

/// Free a string previously returned by `kb_last_error`.
#[no_mangle]
pub unsafe extern "C" fn kb_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
