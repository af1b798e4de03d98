use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use exam_core::session::SessionProgress;

use crate::controller::{SessionController, SessionEvent};
use crate::error::SessionError;

const EVENT_QUEUE_CAPACITY: usize = 64;
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Drives a `SessionController` on its own task.
///
/// Timer ticks and user events meet in one loop, so every mutation is
/// applied in a single serialized order. Events that queue up between two
/// wakeups are handed over as one batch.
pub struct SessionRunner;

impl SessionRunner {
    /// Spawn the loop on the current tokio runtime.
    ///
    /// The loop ends when the session reaches `submitted` or every
    /// `SessionHandle` sender is gone. Pending drafts are flushed on the way
    /// out; a session closed early resumes from that draft on the next open.
    #[must_use]
    pub fn spawn(controller: SessionController, tick_interval: Duration) -> SessionHandle {
        let tick_interval = tick_interval.max(MIN_TICK_INTERVAL);
        let controller = controller.with_tick_interval(tick_interval);
        let (events, inbox) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (progress_tx, progress) = watch::channel(controller.progress());
        let task = tokio::spawn(run(controller, tick_interval, inbox, progress_tx));
        SessionHandle {
            events,
            progress,
            task,
        }
    }
}

async fn run(
    mut controller: SessionController,
    tick_interval: Duration,
    mut inbox: mpsc::Receiver<SessionEvent>,
    progress: watch::Sender<SessionProgress>,
) -> SessionController {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let mut batch = Vec::new();
        tokio::select! {
            event = inbox.recv() => match event {
                Some(event) => batch.push(event),
                None => break,
            },
            _ = ticker.tick() => batch.push(SessionEvent::Tick),
        }
        while let Ok(event) = inbox.try_recv() {
            batch.push(event);
        }

        controller.dispatch_batch(batch).await;
        progress.send_replace(controller.progress());

        if controller.status().is_terminal() {
            break;
        }
    }

    controller.flush().await;
    progress.send_replace(controller.progress());
    tracing::debug!(
        test_id = %controller.state().test_id(),
        status = %controller.status(),
        "session runner stopped"
    );
    controller
}

/// Caller side of a running session.
pub struct SessionHandle {
    events: mpsc::Sender<SessionEvent>,
    progress: watch::Receiver<SessionProgress>,
    task: JoinHandle<SessionController>,
}

impl SessionHandle {
    /// Queue an event for the session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::RunnerStopped` once the loop has ended.
    pub async fn send(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.events
            .send(event)
            .await
            .map_err(|_| SessionError::RunnerStopped("event queue closed".into()))
    }

    /// Subscribe to progress updates published after every batch.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<SessionProgress> {
        self.progress.clone()
    }

    #[must_use]
    pub fn latest(&self) -> SessionProgress {
        self.progress.borrow().clone()
    }

    /// Stop accepting events and wait for the loop to hand the controller back.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::RunnerStopped` if the loop task panicked or was
    /// cancelled.
    pub async fn join(self) -> Result<SessionController, SessionError> {
        let Self { events, task, .. } = self;
        drop(events);
        task.await
            .map_err(|e| SessionError::RunnerStopped(e.to_string()))
    }
}
