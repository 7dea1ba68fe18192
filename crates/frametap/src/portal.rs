//! XDG Desktop Portal clients: the ScreenCast session used by the Wayland
//! backend and the one-shot Screenshot portal.
//!
//! The ScreenCast flow is four calls against the portal object on the
//! session bus: CreateSession -> SelectSources -> Start ->
//! OpenPipeWireRemote. Each call is answered asynchronously through a
//! Response signal on a request object whose path is derived from our
//! unique bus name; we subscribe to that exact path *before* issuing the
//! call so the response cannot race past us.

use std::collections::HashMap;
use std::os::fd::{AsFd, OwnedFd};
use std::time::Duration;

use futures_util::StreamExt;
use tracing::{debug, info};
use zbus::zvariant::{ObjectPath, OwnedValue, Value};
use zbus::{proxy::SignalStream, Connection, Proxy};

use crate::error::{Error, Result};

const PORTAL_DEST: &str = "org.freedesktop.portal.Desktop";
const PORTAL_PATH: &str = "/org/freedesktop/portal/desktop";
const SCREENCAST_IFACE: &str = "org.freedesktop.portal.ScreenCast";
const SCREENSHOT_IFACE: &str = "org.freedesktop.portal.Screenshot";
const REQUEST_IFACE: &str = "org.freedesktop.portal.Request";

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);
// User interaction happens at the Start step (the picker dialog).
const PICKER_TIMEOUT: Duration = Duration::from_secs(120);
const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// An open ScreenCast portal session.
///
/// Owns the duplicated PipeWire file descriptor, the stream's node id and
/// the bus connection itself. The connection must outlive any PipeWire
/// stream created from the fd; dropping the session closes the fd and
/// releases the connection, invalidating the portal session.
pub(crate) struct PortalSession {
    /// PipeWire remote fd, duplicated into our ownership
    pub fd: OwnedFd,
    /// PipeWire node id of the selected stream
    pub node_id: u32,
    /// The portal's object path for this session
    pub session_handle: String,
    _connection: Connection,
}

/// Open a ScreenCast portal session.
///
/// The Start step shows the compositor's interactive picker; a non-zero
/// response status there means the user cancelled.
pub(crate) fn open_screencast_session(capture_window: bool) -> Result<PortalSession> {
    let conn = zbus::block_on(Connection::session()).map_err(|e| {
        Error::capture(format!(
            "failed to open D-Bus session bus: {e}. Is the session bus running?"
        ))
    })?;

    // ---- Step 1: CreateSession ----
    let mut signal = subscribe_response(&conn, request_path(&conn, "frametap_cs")?)?;
    zbus::block_on(conn.call_method(
        Some(PORTAL_DEST),
        PORTAL_PATH,
        Some(SCREENCAST_IFACE),
        "CreateSession",
        &(options(&[
            ("handle_token", Value::from("frametap_cs")),
            ("session_handle_token", Value::from("frametap_session")),
        ]),),
    ))
    .map_err(|e| {
        Error::capture(format!(
            "CreateSession failed: {e}. Is xdg-desktop-portal installed?"
        ))
    })?;

    let (status, results) = wait_response(&mut signal, RESPONSE_TIMEOUT)?;
    if status != 0 {
        return Err(Error::capture(format!("create session denied (status={status})")));
    }
    let session_handle = string_result(&results, "session_handle")
        .ok_or_else(|| Error::capture("CreateSession returned empty session handle"))?;
    let session_path = ObjectPath::try_from(session_handle.as_str())
        .map_err(|e| Error::capture(format!("CreateSession returned invalid session handle: {e}")))?;
    debug!("portal session created: {session_handle}");

    // ---- Step 2: SelectSources ----
    // source types: 1 = monitor, 2 = window; cursor mode 2 = embedded
    // (cursor composited into the frames).
    let source_types: u32 = if capture_window { 2 } else { 1 };
    let mut signal = subscribe_response(&conn, request_path(&conn, "frametap_ss")?)?;
    zbus::block_on(conn.call_method(
        Some(PORTAL_DEST),
        PORTAL_PATH,
        Some(SCREENCAST_IFACE),
        "SelectSources",
        &(
            &session_path,
            options(&[
                ("handle_token", Value::from("frametap_ss")),
                ("types", Value::from(source_types)),
                ("cursor_mode", Value::from(2u32)),
            ]),
        ),
    ))
    .map_err(|e| Error::capture(format!("SelectSources failed: {e}")))?;

    let (status, _) = wait_response(&mut signal, RESPONSE_TIMEOUT)?;
    if status != 0 {
        return Err(Error::capture(format!("select sources denied (status={status})")));
    }

    // ---- Step 3: Start (shows the interactive picker dialog) ----
    let mut signal = subscribe_response(&conn, request_path(&conn, "frametap_st")?)?;
    zbus::block_on(conn.call_method(
        Some(PORTAL_DEST),
        PORTAL_PATH,
        Some(SCREENCAST_IFACE),
        "Start",
        &(
            &session_path,
            "",
            options(&[("handle_token", Value::from("frametap_st"))]),
        ),
    ))
    .map_err(|e| Error::capture(format!("Start failed: {e}")))?;

    let (status, results) = wait_response(&mut signal, PICKER_TIMEOUT)?;
    if status != 0 {
        return Err(Error::capture(format!(
            "user cancelled screen capture (status={status})"
        )));
    }
    let node_id = first_stream_node(&results)
        .ok_or_else(|| Error::capture("portal returned no PipeWire stream"))?;

    // ---- Step 4: OpenPipeWireRemote ----
    let reply = zbus::block_on(conn.call_method(
        Some(PORTAL_DEST),
        PORTAL_PATH,
        Some(SCREENCAST_IFACE),
        "OpenPipeWireRemote",
        &(&session_path, options(&[])),
    ))
    .map_err(|e| Error::capture(format!("OpenPipeWireRemote failed: {e}")))?;
    let transport_fd: zbus::zvariant::OwnedFd = reply
        .body()
        .deserialize()
        .map_err(|e| Error::capture(format!("failed to receive PipeWire file descriptor: {e}")))?;

    // Duplicate out of the transport's ownership; the original is closed
    // when the reply message drops.
    let fd = transport_fd
        .as_fd()
        .try_clone_to_owned()
        .map_err(|e| Error::capture(format!("failed to duplicate PipeWire fd: {e}")))?;

    info!("portal ScreenCast session ready (node {node_id})");
    Ok(PortalSession {
        fd,
        node_id,
        session_handle,
        _connection: conn,
    })
}

/// Take a one-shot screenshot through the Screenshot portal.
///
/// Returns the filesystem path of the temporary image file named by the
/// portal's reply URI; decoding the file is up to the caller. Useful on
/// compositors where the ScreenCast path is unavailable.
pub fn portal_screenshot() -> Result<String> {
    let conn = zbus::block_on(Connection::session()).map_err(|e| {
        Error::capture(format!(
            "failed to open D-Bus session bus: {e}. Is the session bus running?"
        ))
    })?;

    let mut signal = subscribe_response(&conn, request_path(&conn, "frametap_scr")?)?;
    zbus::block_on(conn.call_method(
        Some(PORTAL_DEST),
        PORTAL_PATH,
        Some(SCREENSHOT_IFACE),
        "Screenshot",
        &(
            "",
            options(&[
                ("handle_token", Value::from("frametap_scr")),
                ("interactive", Value::from(false)),
            ]),
        ),
    ))
    .map_err(|e| Error::capture(format!("Screenshot portal failed: {e}")))?;

    let (status, results) = wait_response(&mut signal, SCREENSHOT_TIMEOUT)?;
    if status != 0 {
        return Err(Error::capture(format!("screenshot was denied (status={status})")));
    }
    let uri = string_result(&results, "uri")
        .ok_or_else(|| Error::capture("Screenshot portal returned no URI"))?;

    uri_to_path(&uri)
}

// ---------------------------------------------------------------------------
// Request/Response plumbing
// ---------------------------------------------------------------------------

/// The portal answers each request on a request object whose path embeds
/// the caller's unique bus name with ':' and '.' replaced by '_'.
fn request_path(conn: &Connection, token: &str) -> Result<String> {
    let unique = conn
        .unique_name()
        .ok_or_else(|| Error::capture("session bus connection has no unique name"))?;
    Ok(format!(
        "/org/freedesktop/portal/desktop/request/{}/{token}",
        sanitize_sender(unique.as_str())
    ))
}

fn sanitize_sender(unique_name: &str) -> String {
    unique_name.replace([':', '.'], "_")
}

fn subscribe_response(conn: &Connection, path: String) -> Result<SignalStream<'static>> {
    zbus::block_on(async {
        let proxy = Proxy::new(conn, PORTAL_DEST, path, REQUEST_IFACE).await?;
        proxy.receive_signal("Response").await
    })
    .map_err(|e| Error::capture(format!("failed to subscribe to portal Response signal: {e}")))
}

/// Block on the next Response signal, bounded by `timeout`.
fn wait_response(
    signal: &mut SignalStream<'static>,
    timeout: Duration,
) -> Result<(u32, HashMap<String, OwnedValue>)> {
    use futures_util::future::{select, Either};

    let msg = zbus::block_on(async {
        let next = signal.next();
        futures_util::pin_mut!(next);
        let timer = async_io::Timer::after(timeout);
        futures_util::pin_mut!(timer);
        match select(next, timer).await {
            Either::Left((msg, _)) => Ok(msg),
            Either::Right(_) => Err(Error::capture("portal response timed out")),
        }
    })?
    .ok_or_else(|| Error::capture("portal response signal stream closed"))?;

    msg.body()
        .deserialize::<(u32, HashMap<String, OwnedValue>)>()
        .map_err(|e| Error::capture(format!("malformed portal response: {e}")))
}

fn string_result(results: &HashMap<String, OwnedValue>, key: &str) -> Option<String> {
    match results.get(key).map(|v| &**v) {
        Some(Value::Str(s)) => Some(s.as_str().to_owned()),
        _ => None,
    }
}

/// Pull the first stream's node id out of the Start response
/// (`streams: a(ua{sv})`).
fn first_stream_node(results: &HashMap<String, OwnedValue>) -> Option<u32> {
    let Some(Value::Array(streams)) = results.get("streams").map(|v| &**v) else {
        return None;
    };
    for item in streams.iter() {
        if let Value::Structure(fields) = item {
            if let Some(Value::U32(node)) = fields.fields().first() {
                return Some(*node);
            }
        }
    }
    None
}

fn options<'a>(entries: &[(&'a str, Value<'a>)]) -> HashMap<&'a str, Value<'a>> {
    entries.iter().map(|(k, v)| (*k, v.clone())).collect()
}

/// Convert a `file://` URI from the Screenshot portal into a validated
/// absolute path.
fn uri_to_path(uri: &str) -> Result<String> {
    let path = uri.strip_prefix("file://").unwrap_or(uri);
    if path.is_empty() || !path.starts_with('/') {
        return Err(Error::capture(format!(
            "screenshot portal returned invalid path: {path}"
        )));
    }
    if path.contains("/../") || path.contains("/./") {
        return Err(Error::capture(format!(
            "screenshot portal returned suspicious path: {path}"
        )));
    }
    Ok(path.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_substitution_follows_portal_rule() {
        assert_eq!(sanitize_sender(":1.42"), "_1_42");
        assert_eq!(sanitize_sender(":1.105"), "_1_105");
    }

    #[test]
    fn request_path_shape() {
        let path = format!(
            "/org/freedesktop/portal/desktop/request/{}/{}",
            sanitize_sender(":1.42"),
            "frametap_cs"
        );
        assert_eq!(path, "/org/freedesktop/portal/desktop/request/_1_42/frametap_cs");
    }

    #[test]
    fn uri_to_path_strips_file_scheme() {
        assert_eq!(
            uri_to_path("file:///tmp/shot.png").unwrap(),
            "/tmp/shot.png"
        );
    }

    #[test]
    fn uri_to_path_accepts_bare_absolute_path() {
        assert_eq!(uri_to_path("/tmp/shot.png").unwrap(), "/tmp/shot.png");
    }

    #[test]
    fn uri_to_path_rejects_relative() {
        assert!(uri_to_path("file://tmp/shot.png").is_err());
        assert!(uri_to_path("shot.png").is_err());
        assert!(uri_to_path("").is_err());
    }

    #[test]
    fn uri_to_path_rejects_traversal() {
        assert!(uri_to_path("file:///tmp/../etc/passwd").is_err());
        assert!(uri_to_path("file:///tmp/./shot.png").is_err());
    }
}
