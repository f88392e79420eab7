use std::path::Path;

use anyhow::Result;

const MAX_NOTIFICATION_LEN: usize = 256;
const NOTIFICATION_TIMEOUT_MS: u32 = 5000;

/// Runs when the user clicks a notification.
pub type ClickAction = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget user notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str, on_click: Option<ClickAction>);
}

/// Desktop toasts through notify-rust.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str, on_click: Option<ClickAction>) {
        let title = sanitize_notification_text(title);
        let body = sanitize_notification_text(body);
        // Waiting for a click blocks, so the toast gets its own thread.
        std::thread::spawn(move || {
            if let Err(e) = show_notification(&title, &body, on_click) {
                tracing::warn!("Failed to show notification: {e}");
            }
        });
    }
}

fn sanitize_notification_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .take(MAX_NOTIFICATION_LEN)
        .collect()
}

#[cfg(all(unix, not(target_os = "macos")))]
fn show_notification(title: &str, body: &str, on_click: Option<ClickAction>) -> Result<()> {
    let mut notification = notify_rust::Notification::new();
    notification.summary(title).body(body).appname("lapse");
    match on_click {
        Some(action) => {
            let handle = notification.action("default", "Open").show()?;
            handle.wait_for_action(move |key| {
                if key == "default" {
                    action();
                }
            });
        }
        None => {
            notification
                .timeout(notify_rust::Timeout::Milliseconds(NOTIFICATION_TIMEOUT_MS))
                .show()?;
        }
    }
    Ok(())
}

// Click actions are only delivered by the freedesktop backend.
#[cfg(not(all(unix, not(target_os = "macos"))))]
fn show_notification(title: &str, body: &str, _on_click: Option<ClickAction>) -> Result<()> {
    let mut notification = notify_rust::Notification::new();
    notification.summary(title).body(body);
    #[cfg(not(target_os = "macos"))]
    notification.timeout(notify_rust::Timeout::Milliseconds(NOTIFICATION_TIMEOUT_MS));
    notification.show()?;
    Ok(())
}

/// Opens `path` with the platform's default handler.
pub fn open_path(path: &Path) -> Result<()> {
    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(target_os = "windows")]
    let opener = "explorer";
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let opener = "xdg-open";

    std::process::Command::new(opener).arg(path).spawn()?;
    Ok(())
}

/// A click action that opens `path`, logging instead of failing.
pub fn open_on_click(path: &Path) -> ClickAction {
    let path = path.to_path_buf();
    Box::new(move || {
        if let Err(e) = open_path(&path) {
            tracing::warn!(path = ?path, "Failed to open rendered video: {e}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_control_characters() {
        assert_eq!(
            sanitize_notification_text("Saved\u{7}\tclip\nok"),
            "Savedclip\nok"
        );
    }

    #[test]
    fn test_sanitize_truncates_long_text() {
        let long = "x".repeat(MAX_NOTIFICATION_LEN * 2);
        assert_eq!(
            sanitize_notification_text(&long).chars().count(),
            MAX_NOTIFICATION_LEN
        );
    }
}
