use std::cell::RefCell;
use std::ffi::CString;

use kb_bench::BenchError;
use kb_tensor::TensorError;

use crate::types::KBStatus;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for later retrieval via `kb_last_error`.
pub fn set_last_error(msg: String) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Take the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Record `err` and map it to the status reported across the boundary.
pub fn report(err: BenchError) -> KBStatus {
    let status = match &err {
        BenchError::Divergence { .. } | BenchError::NanDistance { .. } => {
            KBStatus::ErrorDivergence
        }
        BenchError::TensorError(TensorError::AllocationFailed { .. }) => KBStatus::ErrorOutOfMemory,
        BenchError::UnknownOperation(_)
        | BenchError::InvalidGranularity(_)
        | BenchError::InvalidSegment(_) => KBStatus::ErrorInvalidArgument,
        _ => KBStatus::ErrorBenchmark,
    };
    set_last_error(err.to_string());
    status
}
