use crate::error::{Result, ThunkError};
use tokio::sync::oneshot;

/// Completion handle for one `execute` call.
///
/// An event is either already resolved (the thunk failed or finished
/// synchronously) or pending on an [`EventPromise`] held by the task running
/// the collective. Dropping a pending event does not cancel that task: an
/// exchange in flight always runs to completion or to its timeout.
#[derive(Debug)]
pub struct ExecuteEvent {
    state: EventState,
}

#[derive(Debug)]
enum EventState {
    Ready(Result<()>),
    Pending(oneshot::Receiver<Result<()>>),
}

impl ExecuteEvent {
    /// An event that has already completed successfully.
    pub fn ready() -> Self {
        Self {
            state: EventState::Ready(Ok(())),
        }
    }

    /// An event that has already failed.
    pub fn failed(err: ThunkError) -> Self {
        Self {
            state: EventState::Ready(Err(err)),
        }
    }

    /// A pending event and the promise that resolves it.
    pub fn pending() -> (EventPromise, Self) {
        let (tx, rx) = oneshot::channel();
        (
            EventPromise { tx },
            Self {
                state: EventState::Pending(rx),
            },
        )
    }

    /// Poll without blocking. Returns the outcome once it is known.
    pub fn try_result(&mut self) -> Option<&Result<()>> {
        if let EventState::Pending(rx) = &mut self.state {
            let outcome = match rx.try_recv() {
                Ok(outcome) => outcome,
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => Err(ThunkError::EventAbandoned),
            };
            self.state = EventState::Ready(outcome);
        }
        match &self.state {
            EventState::Ready(outcome) => Some(outcome),
            EventState::Pending(_) => None,
        }
    }

    /// True once the outcome is known.
    pub fn is_available(&mut self) -> bool {
        self.try_result().is_some()
    }

    /// Wait for the outcome.
    pub async fn wait(self) -> Result<()> {
        match self.state {
            EventState::Ready(outcome) => outcome,
            EventState::Pending(rx) => rx.await.unwrap_or(Err(ThunkError::EventAbandoned)),
        }
    }

    /// Block the current thread until the outcome is known.
    ///
    /// Must not be called from within an async execution context.
    pub fn blocking_wait(self) -> Result<()> {
        match self.state {
            EventState::Ready(outcome) => outcome,
            EventState::Pending(rx) => rx
                .blocking_recv()
                .unwrap_or(Err(ThunkError::EventAbandoned)),
        }
    }
}

/// Write side of a pending [`ExecuteEvent`]. Consumed by `set`, so an event
/// is populated at most once. Dropping it unset abandons the event.
#[derive(Debug)]
pub struct EventPromise {
    tx: oneshot::Sender<Result<()>>,
}

impl EventPromise {
    pub fn set(self, outcome: Result<()>) {
        // The event may already be gone; nobody is left to observe the outcome.
        let _ = self.tx.send(outcome);
    }
}
