use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Instant, Sleep};

/// Trailing-edge debounce timer.
///
/// Every [`Debouncer::schedule`] pushes the deadline out by the full window;
/// [`Debouncer::elapsed`] resolves once, after the last schedule went quiet.
pub struct Debouncer {
    window: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Start the window, or restart it if one is already running
    pub fn schedule(&mut self) {
        let at = Instant::now() + self.window;
        match &mut self.deadline {
            Some(timer) => timer.as_mut().reset(at),
            None => self.deadline = Some(Box::pin(sleep(self.window))),
        }
    }

    /// Drop a pending window without firing
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Resolves when the pending window ends; never resolves when idle.
    /// Cancel safe.
    pub async fn elapsed(&mut self) {
        match &mut self.deadline {
            Some(timer) => {
                timer.as_mut().await;
                self.deadline = None;
            }
            None => pending().await,
        }
    }
}
