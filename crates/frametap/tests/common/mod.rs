//! Common test utilities for integration tests.

use std::time::Duration;

/// How long to wait for frames to start flowing.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(3);

/// Returns true if a display server is available.
///
/// Used to skip capture tests in headless CI environments; on macOS and
/// Windows a user session always has one.
pub fn has_display() -> bool {
    if cfg!(any(target_os = "macos", target_os = "windows")) {
        return true;
    }
    std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some()
}

/// Whether streaming tests can run unattended.
///
/// The Wayland path pops an interactive portal picker, which no CI can
/// click through; only the X11 path streams without interaction.
pub fn has_noninteractive_display() -> bool {
    if cfg!(any(target_os = "macos", target_os = "windows")) {
        return true;
    }
    std::env::var_os("WAYLAND_DISPLAY").is_none() && std::env::var_os("DISPLAY").is_some()
}

/// Initialize test logging with appropriate filters.
///
/// Safe to call multiple times (subsequent calls are no-ops).
#[allow(dead_code)]
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("frametap=debug")),
        )
        .with_test_writer()
        .try_init();
}
