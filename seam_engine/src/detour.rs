//! Detour installation.
//!
//! A detour re-points a method's entry slot at a replacement so every
//! future call dispatched through the target executes the replacement
//! body. This is the only place that mutates live dispatch state; the
//! synthesis pipeline up to here is pure value production.
//!
//! Installation is idempotent: re-detouring the same target replaces the
//! previous redirection, it does not chain. A target that cannot be
//! redirected produces a [`PatchError::DetourRefused`] with a descriptive
//! reason; callers can recover (for example by keeping the original).

use crate::method_table::MethodTable;
use seam_core::{MethodId, PatchError, PatchResult};
use tracing::debug;

/// Redirect every future call of `target` to `replacement`.
pub fn install(table: &MethodTable, target: MethodId, replacement: MethodId) -> PatchResult<()> {
    let entry = table.lookup(target).ok_or_else(|| {
        PatchError::detour_refused(PatchError::method_name(target), "target method is not registered")
    })?;

    let repl = table.lookup(replacement).ok_or_else(|| {
        PatchError::detour_refused(entry.name().clone(), "replacement method is not registered")
    })?;

    if repl.is_stub() {
        return Err(PatchError::detour_refused(
            entry.name().clone(),
            "replacement has no executable body",
        ));
    }

    if entry.is_pinned() {
        return Err(PatchError::detour_refused(
            entry.name().clone(),
            "method is pinned and cannot be redirected",
        ));
    }

    table.retarget(target, replacement);
    debug!(target = %target, replacement = %replacement, "detour installed");
    Ok(())
}

/// Restore `target`'s entry slot to its own body.
pub fn uninstall(table: &MethodTable, target: MethodId) -> PatchResult<()> {
    if !table.retarget(target, target) {
        return Err(PatchError::detour_refused(
            PatchError::method_name(target),
            "target method is not registered",
        ));
    }
    debug!(target = %target, "detour removed");
    Ok(())
}
