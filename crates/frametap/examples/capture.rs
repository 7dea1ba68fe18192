//! Walk through the whole capture surface: permission diagnostics,
//! enumeration, one-shot screenshot, streaming, pause/resume.
//!
//! ```bash
//! cargo run -p frametap --example capture
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use frametap::{check_permissions, get_monitors, get_windows, Frame, FrameQueue, FrameTap, PermissionStatus};

fn main() -> frametap::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("frametap=info")),
        )
        .init();

    // --- Permission check ---
    let perms = check_permissions();
    println!("Platform: {}", perms.summary);
    for detail in &perms.details {
        println!("  {detail}");
    }
    if perms.status == PermissionStatus::Error {
        eprintln!("Cannot proceed, fix the issues above.");
        std::process::exit(1);
    }

    // --- Monitor and window enumeration ---
    let monitors = get_monitors();
    println!("\nMonitors ({}):", monitors.len());
    for m in &monitors {
        println!(
            "  [{}] {}  {}x{}+{}+{}  scale={:.1}",
            m.id, m.name, m.width, m.height, m.x, m.y, m.scale
        );
    }

    let windows = get_windows();
    println!("\nWindows ({}):", windows.len());
    for w in &windows {
        println!("  [{}] {}  {}x{}+{}+{}", w.id, w.name, w.width, w.height, w.x, w.y);
    }

    // --- Screenshot ---
    println!("\nTaking screenshot...");
    let mut tap = FrameTap::new()?;
    let image = tap.screenshot()?;
    println!(
        "Screenshot: {}x{} ({} bytes RGBA)",
        image.width,
        image.height,
        image.data.len()
    );

    // --- Streaming capture ---
    println!("\nStreaming for 1 second...");
    let queue: Arc<FrameQueue<Frame>> = Arc::new(FrameQueue::new());
    let producer_queue = queue.clone();
    tap.on_frame(move |frame| producer_queue.push(frame.clone()));
    tap.start_async()?;

    let mut count = 0;
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        match queue.try_pop() {
            Some(frame) => {
                count += 1;
                if count <= 5 || count % 10 == 0 {
                    println!(
                        "  Frame {count}: {}x{}  {:.1} ms",
                        frame.image.width, frame.image.height, frame.duration_ms
                    );
                }
            }
            None => thread::sleep(Duration::from_millis(5)),
        }
    }

    // --- Pause / resume ---
    println!("\nPausing capture...");
    tap.pause();
    println!("  is_paused = {}", tap.is_paused());

    thread::sleep(Duration::from_millis(500));
    let mut drained = 0;
    while queue.try_pop().is_some() {
        drained += 1;
    }

    println!("Resuming capture...");
    tap.resume();

    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        match queue.try_pop() {
            Some(_) => count += 1,
            None => thread::sleep(Duration::from_millis(5)),
        }
    }

    tap.stop();
    println!("Captured {count} total frames (drained {drained} during pause)");

    println!("\nDone.");
    Ok(())
}
