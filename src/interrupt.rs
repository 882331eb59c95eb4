//! User interrupt tracking.
//!
//! Ctrl-C is delivered to the whole foreground process group, so the running
//! child receives it as well. The handler installed here only records that it
//! happened; runners report it once the child has exited and refuse to start
//! new commands afterwards.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install the Ctrl-C handler. Call once from `main`.
pub fn install_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::SeqCst);
    })
}

/// Whether Ctrl-C has been received since the handler was installed.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// The process-wide flag the handler sets.
pub(crate) fn flag() -> &'static AtomicBool {
    &INTERRUPTED
}
