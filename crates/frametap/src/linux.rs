//! Linux runtime dispatch: pick the Wayland or X11 backend from the
//! process environment, and route enumeration and permission diagnostics
//! the same way.
//!
//! When both display variables are set the Wayland path wins: it avoids
//! XWayland and captures at native resolution with correct scaling.

use std::process::{Command, Stdio};

use tracing::debug;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{Monitor, PermissionCheck, PermissionStatus, Rect, Window};
use crate::wayland::WaylandBackend;
use crate::x11::X11Backend;

const NO_DISPLAY_MSG: &str = "no display server found. Set $WAYLAND_DISPLAY or $DISPLAY \
     and run from within a graphical session (GNOME, KDE, Sway, X11, etc.)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionKind {
    Wayland,
    X11,
}

fn session_kind(wayland: bool, x11: bool) -> Option<SessionKind> {
    if wayland {
        Some(SessionKind::Wayland)
    } else if x11 {
        Some(SessionKind::X11)
    } else {
        None
    }
}

fn detect_session() -> Option<SessionKind> {
    session_kind(
        std::env::var_os("WAYLAND_DISPLAY").is_some(),
        std::env::var_os("DISPLAY").is_some(),
    )
}

// ---------------------------------------------------------------------------
// Backend construction
// ---------------------------------------------------------------------------

pub(crate) fn make_backend() -> Result<Box<dyn Backend>> {
    match detect_session() {
        Some(SessionKind::Wayland) => Ok(Box::new(WaylandBackend::new()?)),
        Some(SessionKind::X11) => Ok(Box::new(X11Backend::new()?)),
        None => Err(Error::capture(NO_DISPLAY_MSG)),
    }
}

pub(crate) fn make_backend_region(region: Rect) -> Result<Box<dyn Backend>> {
    match detect_session() {
        Some(SessionKind::Wayland) => Ok(Box::new(WaylandBackend::with_region(region)?)),
        Some(SessionKind::X11) => Ok(Box::new(X11Backend::with_region(region)?)),
        None => Err(Error::capture(NO_DISPLAY_MSG)),
    }
}

pub(crate) fn make_backend_monitor(monitor: Monitor) -> Result<Box<dyn Backend>> {
    match detect_session() {
        Some(SessionKind::Wayland) => Ok(Box::new(WaylandBackend::with_monitor(&monitor)?)),
        Some(SessionKind::X11) => Ok(Box::new(X11Backend::with_monitor(&monitor)?)),
        None => Err(Error::capture(NO_DISPLAY_MSG)),
    }
}

pub(crate) fn make_backend_window(window: Window) -> Result<Box<dyn Backend>> {
    match detect_session() {
        Some(SessionKind::Wayland) => Ok(Box::new(WaylandBackend::with_window(&window)?)),
        Some(SessionKind::X11) => Ok(Box::new(X11Backend::with_window(&window)?)),
        None => Err(Error::capture(NO_DISPLAY_MSG)),
    }
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

pub(crate) fn enumerate_monitors() -> Vec<Monitor> {
    match detect_session() {
        Some(SessionKind::Wayland) => crate::wayland::enumerate_monitors(),
        Some(SessionKind::X11) => crate::x11::enumerate_monitors(),
        None => Vec::new(),
    }
}

pub(crate) fn enumerate_windows() -> Vec<Window> {
    match detect_session() {
        Some(SessionKind::Wayland) => crate::wayland::enumerate_windows(),
        Some(SessionKind::X11) => crate::x11::enumerate_windows(),
        None => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Permission diagnostics
// ---------------------------------------------------------------------------

/// Run a probe command with an explicit argument vector (no shell), with
/// stdout and stderr discarded. Success means exit status zero.
fn exec_check(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn check_pipewire_running() -> bool {
    exec_check("pidof", &["pipewire"])
}

fn check_dbus_portal() -> bool {
    exec_check(
        "busctl",
        &[
            "--user",
            "--no-pager",
            "introspect",
            "org.freedesktop.portal.Desktop",
            "/org/freedesktop/portal/desktop",
            "org.freedesktop.portal.ScreenCast",
        ],
    )
}

pub(crate) fn check_platform_permissions() -> PermissionCheck {
    let mut result = PermissionCheck::default();

    let Some(kind) = detect_session() else {
        result.status = PermissionStatus::Error;
        result.summary = "No display server detected".into();
        result
            .details
            .push("Neither $WAYLAND_DISPLAY nor $DISPLAY is set.".into());
        result
            .details
            .push("Run from within a graphical session (GNOME, KDE, Sway, X11, etc.).".into());
        return result;
    };

    match kind {
        SessionKind::Wayland => {
            result.summary = "Wayland session detected".into();

            if !check_pipewire_running() {
                result.status = PermissionStatus::Error;
                result
                    .details
                    .push("PipeWire is not running. Screen capture requires PipeWire.".into());
                result.details.push(
                    "Install and start PipeWire: sudo apt install pipewire && \
                     systemctl --user start pipewire"
                        .into(),
                );
            }

            if !check_dbus_portal() {
                result.status = PermissionStatus::Error;
                result
                    .details
                    .push("xdg-desktop-portal ScreenCast interface not available.".into());
                result.details.push(
                    "Install xdg-desktop-portal and your compositor's portal backend:".into(),
                );
                result
                    .details
                    .push("  GNOME: sudo apt install xdg-desktop-portal-gnome".into());
                result
                    .details
                    .push("  KDE:   sudo apt install xdg-desktop-portal-kde".into());
                result
                    .details
                    .push("  Sway/wlroots: sudo apt install xdg-desktop-portal-wlr".into());
                result
                    .details
                    .push("  Hyprland: install xdg-desktop-portal-hyprland".into());
            }

            if result.details.is_empty() {
                result.details.push("Wayland + PipeWire + portal ready.".into());
            }
        }
        SessionKind::X11 => {
            result.summary = "X11 session detected".into();

            if !crate::x11::can_connect() {
                result.status = PermissionStatus::Error;
                result
                    .details
                    .push("Cannot connect to X11 display. Check $DISPLAY and X11 auth.".into());
            } else {
                result.details.push("X11 connection OK.".into());
            }
        }
    }

    debug!("permission check: {:?} ({})", result.status, result.summary);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wayland_preferred_when_both_present() {
        assert_eq!(session_kind(true, true), Some(SessionKind::Wayland));
        assert_eq!(session_kind(true, false), Some(SessionKind::Wayland));
        assert_eq!(session_kind(false, true), Some(SessionKind::X11));
        assert_eq!(session_kind(false, false), None);
    }

    #[test]
    fn no_display_error_names_both_variables() {
        assert!(NO_DISPLAY_MSG.contains("WAYLAND_DISPLAY"));
        assert!(NO_DISPLAY_MSG.contains("DISPLAY"));
    }

    #[test]
    fn missing_probe_binary_is_a_clean_failure() {
        assert!(!exec_check("frametap-no-such-binary", &["--version"]));
    }

    #[test]
    fn headless_diagnostic_names_portal_packages() {
        // Only meaningful where a Wayland session exists without a portal;
        // here we just pin the report shape on a headless environment.
        if std::env::var_os("WAYLAND_DISPLAY").is_none()
            && std::env::var_os("DISPLAY").is_none()
        {
            let report = check_platform_permissions();
            assert_eq!(report.status, PermissionStatus::Error);
            assert!(!report.details.is_empty());
        }
    }
}
