//! Lifecycle hook invocation and failure-isolated teardown.
//!
//! # Responsibility
//! - Invoke `load()`/`unload()` with panics converted into errors.
//! - Release load records in the only safe order: instance first, then context.
//! - Aggregate teardown failures instead of aborting on the first one.
//!
//! # Invariants
//! - Teardown always attempts every record.
//! - Errors raised by extension code are detached (rendered to owned text)
//!   before the code that produced them may be unmapped.

use crate::extension::capability::{BoxError, Extension};
use crate::extension::error::ExtensionError;
use crate::extension::kernel::LoadRecord;
use log::{error, info, warn};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

const MAX_PANIC_MESSAGE_CHARS: usize = 200;
const STILL_REFERENCED: &str = "instance still referenced; native code retained";

/// One teardown step that failed.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Package path of the failing record; `None` for host-supplied instances.
    pub source_path: Option<PathBuf>,
    pub error: ExtensionError,
}

/// Outcome of closing the registry.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Records whose `unload()` was attempted.
    pub attempted: usize,
    /// Records whose `unload()` returned successfully.
    pub unloaded: usize,
    /// Load contexts released without error.
    pub contexts_released: usize,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs the extension's `load()` hook.
pub(crate) fn invoke_load(instance: &Arc<dyn Extension>) -> Result<(), BoxError> {
    run_hook("load", || instance.load())
}

/// Runs the extension's `unload()` hook.
pub(crate) fn invoke_unload(instance: &Arc<dyn Extension>) -> Result<(), BoxError> {
    run_hook("unload", || instance.unload())
}

/// Runs extension code, turning a panic into an error.
pub(crate) fn run_hook<T>(
    hook: &str,
    call: impl FnOnce() -> Result<T, BoxError>,
) -> Result<T, BoxError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(format!("{hook} panicked: {}", panic_message(payload.as_ref())).into()),
    }
}

/// Replaces an extension-provided error with an owned copy of its message.
///
/// The original error's drop and display code may live in a native library
/// that is about to be closed.
pub(crate) fn detach(err: BoxError) -> BoxError {
    err.to_string().into()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    };
    let mut truncated: String = message.chars().take(MAX_PANIC_MESSAGE_CHARS).collect();
    if message.chars().count() > MAX_PANIC_MESSAGE_CHARS {
        truncated.push_str("...");
    }
    truncated
}

/// Drops a record's instance and releases its context, if any.
///
/// Returns `Ok(true)` when a context was released, `Ok(false)` for
/// host-supplied records. An instance still referenced elsewhere keeps its
/// native code mapped; its scratch files are removed and the release is
/// reported as a `ContextRelease` failure.
pub(crate) fn release_record(record: LoadRecord) -> Result<bool, ExtensionError> {
    let (instance, origin) = record.into_parts();
    let Some((context, path)) = origin else {
        return Ok(false);
    };

    let still_shared = Arc::strong_count(&instance) > 1;
    drop(instance);
    if !still_shared {
        return context
            .release()
            .map(|()| true)
            .map_err(ExtensionError::ContextRelease);
    }

    warn!(
        "event=context_release module=lifecycle status=error context_id={} path={} error_code=instance_still_referenced",
        context.id(),
        path.display()
    );
    let mut details = STILL_REFERENCED.to_string();
    if let Err(err) = context.release_keeping_code() {
        details.push_str("; ");
        details.push_str(&err);
    }
    Err(ExtensionError::ContextRelease(details))
}

/// Unloads and releases every record, collecting failures.
pub(crate) fn teardown(records: Vec<LoadRecord>) -> TeardownReport {
    let mut report = TeardownReport::default();
    for record in records {
        let source_path = record.source_path().map(|path| path.to_path_buf());
        let path_label = source_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<host>".to_string());

        report.attempted += 1;
        match invoke_unload(record.instance()) {
            Ok(()) => {
                report.unloaded += 1;
                info!(
                    "event=extension_unload module=lifecycle status=ok path={}",
                    path_label
                );
            }
            Err(err) => {
                let err = detach(err);
                error!(
                    "event=extension_unload module=lifecycle status=error error_code=unload_failure path={} error={}",
                    path_label, err
                );
                report.failures.push(TeardownFailure {
                    source_path: source_path.clone(),
                    error: ExtensionError::UnloadFailure(err),
                });
            }
        }

        match release_record(record) {
            Ok(true) => report.contexts_released += 1,
            Ok(false) => {}
            Err(err) => {
                error!(
                    "event=context_release module=lifecycle status=error error_code={} path={} error={}",
                    err.code(),
                    path_label,
                    err
                );
                report.failures.push(TeardownFailure {
                    source_path,
                    error: err,
                });
            }
        }
    }
    report
}
