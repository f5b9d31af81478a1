//! Host notifications about device running state.
//!
//! The engine decides which notifications a control operation triggers while
//! it holds the engine mutex, then hands them to a serial background worker
//! so the host callback never runs under the lock. Ordering relative to the
//! triggering mutations is preserved: sends happen under the mutex and the
//! worker drains a single FIFO channel.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};

use crate::engine::DeviceId;

/// Notifications the engine publishes to the host.
///
/// Each carries the id of the owning device so a host managing several
/// virtual devices can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineNotification {
    /// The device transitioned between idle and active: some client
    /// started IO while none were running, or the last one stopped.
    DeviceIsRunningChanged {
        /// The owning device.
        device_id: DeviceId,
    },

    /// IO started or stopped for clients other than the control app.
    RunningSomewhereElseChanged {
        /// The owning device.
        device_id: DeviceId,
    },
}

/// Callback type for receiving engine notifications.
///
/// Register a callback via
/// [`EngineBuilder::on_notification()`](crate::EngineBuilder::on_notification).
/// The callback runs on a dedicated background thread, one notification at a
/// time, in the order the triggering control operations ran.
pub type NotificationCallback = Arc<dyn Fn(EngineNotification) + Send + Sync>;

/// Creates a [`NotificationCallback`] from a closure.
///
/// # Example
///
/// ```
/// use appmix::notification_callback;
///
/// let callback = notification_callback(|n| {
///     println!("notification: {:?}", n);
/// });
/// ```
pub fn notification_callback<F>(f: F) -> NotificationCallback
where
    F: Fn(EngineNotification) + Send + Sync + 'static,
{
    Arc::new(f)
}

enum QueueMessage {
    Notify(EngineNotification),
    Shutdown,
}

/// Serial dispatch queue backing the engine's outbound notifications.
///
/// Without a registered callback the queue is inert and dispatch is a no-op.
pub(crate) struct NotificationQueue {
    tx: Option<Sender<QueueMessage>>,
    worker: Option<JoinHandle<()>>,
}

impl NotificationQueue {
    /// Creates a queue that drops every notification.
    pub(crate) fn disabled() -> Self {
        Self {
            tx: None,
            worker: None,
        }
    }

    /// Spawns the worker thread that feeds `callback`.
    ///
    /// If the thread cannot be spawned the queue degrades to dropping
    /// notifications rather than failing engine construction.
    pub(crate) fn spawn(callback: NotificationCallback) -> Self {
        let (tx, rx) = unbounded::<QueueMessage>();
        let worker = std::thread::Builder::new()
            .name("appmix-notify".to_string())
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    match message {
                        QueueMessage::Notify(notification) => callback(notification),
                        QueueMessage::Shutdown => break,
                    }
                }
            });

        match worker {
            Ok(worker) => Self {
                tx: Some(tx),
                worker: Some(worker),
            },
            Err(error) => {
                tracing::warn!(%error, "could not spawn notification worker; notifications disabled");
                Self::disabled()
            }
        }
    }

    /// Enqueues a notification. Never blocks.
    pub(crate) fn dispatch(&self, notification: EngineNotification) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(QueueMessage::Notify(notification));
        }
    }
}

impl Drop for NotificationQueue {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(QueueMessage::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("notification worker panicked during shutdown");
            }
        }
    }
}
