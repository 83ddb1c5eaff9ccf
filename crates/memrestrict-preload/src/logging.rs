//! Diagnostics for the preloaded library.
//!
//! Runs inside the facade with the reentrancy guard raised, so everything the
//! subscriber allocates bypasses the ledger.

use memrestrict_core::config::RestrictConfig;

/// Install a stderr subscriber when `MR_DEBUG` asks for diagnostics.
///
/// Lines look like `DEBUG alloc address=0x5581e0 size=100`.
pub fn install(config: &RestrictConfig) {
    if !config.debug_enabled() {
        return;
    }
    let installed = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .try_init();
    if installed.is_ok() {
        tracing::info!(threshold = config.threshold_bytes, "memrestrict active");
    }
}
