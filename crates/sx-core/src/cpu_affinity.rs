//! CPU affinity utilities for binding threads to specific cores.
//!
//! The runner can pin its strategy thread (signal dispatch, trade processing)
//! to a dedicated core so tick handling is not disturbed by scheduler jitter.

use tracing::{info, warn};

/// Bind the current thread to the specified CPU core.
///
/// Returns `true` if the binding succeeded, `false` if the core ID is invalid
/// or the OS rejected the request.
pub fn bind_to_core(core_id: usize) -> bool {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core_id) {
        Some(core) if core_affinity::set_for_current(*core) => {
            info!("bound thread to CPU core {core_id}");
            true
        }
        Some(_) => {
            warn!("failed to bind thread to CPU core {core_id}");
            false
        }
        None => {
            warn!("CPU core {core_id} not available (system has {} cores)", core_ids.len());
            false
        }
    }
}

/// Bind the current thread to the specified core, if `core_id` is `Some`.
pub fn maybe_bind(core_id: Option<usize>) {
    if let Some(id) = core_id {
        bind_to_core(id);
    }
}
