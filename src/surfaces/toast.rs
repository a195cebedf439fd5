use std::future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::notifier::{CrossSurfaceNotifier, SurfaceEvent, SurfaceLabel, TOAST_EVENT};

/// Small transient message window. Shows the latest toast and hides itself
/// after `duration`; a newer toast restarts the timer.
pub struct ToastSurface {
    message: watch::Receiver<Option<String>>,
    task: JoinHandle<()>,
}

impl ToastSurface {
    /// Start listening. Must be called from within a tokio runtime.
    pub fn open(notifier: &CrossSurfaceNotifier, duration: Duration) -> Self {
        let mut subscription = notifier.subscribe(&SurfaceLabel::toast(), TOAST_EVENT);
        let (sender, message) = watch::channel(None);

        let task = tokio::spawn(async move {
            let mut hide_at: Option<Instant> = None;
            loop {
                let hide = async move {
                    match hide_at {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    envelope = subscription.recv() => {
                        let Some(envelope) = envelope else { break };
                        if let SurfaceEvent::Toast { message } = envelope.event {
                            log::info!("[toast] {}", message);
                            sender.send_replace(Some(message));
                            hide_at = Some(Instant::now() + duration);
                        }
                    }
                    _ = hide => {
                        sender.send_replace(None);
                        hide_at = None;
                    }
                }
            }
        });

        Self { message, task }
    }

    /// Message currently on screen.
    pub fn current(&self) -> Option<String> {
        self.message.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<String>> {
        self.message.clone()
    }
}

impl Drop for ToastSurface {
    fn drop(&mut self) {
        self.task.abort();
    }
}
