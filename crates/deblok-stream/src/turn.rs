use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::delta::StreamPhase;
use crate::errors::{DeblokError, StreamError};

/// Identity of one turn (user message plus streamed assistant reply).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TurnId(uuid::Uuid);

impl TurnId {
    /// Creates a fresh random turn id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a turn ended. Every variant keeps the text accumulated so far.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream reached its terminal `done` event.
    Completed { text: String },
    /// The caller aborted the turn. Not an error.
    Cancelled { text: String },
    /// Transport, decode or upstream failure.
    Failed { error: StreamError, text: String },
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Completed { text } | Self::Cancelled { text } | Self::Failed { text, .. } => text,
        }
    }

    /// Terminal phase matching this outcome.
    pub fn phase(&self) -> StreamPhase {
        match self {
            Self::Completed { .. } => StreamPhase::Done,
            Self::Cancelled { .. } => StreamPhase::Cancelled,
            Self::Failed { .. } => StreamPhase::Errored,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Converts into the completed text, or the matching API error.
    pub fn into_result(self) -> Result<String, DeblokError> {
        match self {
            Self::Completed { text } => Ok(text),
            Self::Cancelled { .. } => Err(DeblokError::Cancelled),
            Self::Failed { error, .. } => Err(DeblokError::Stream(error)),
        }
    }
}

/// Notification emitted while a turn streams.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnEvent {
    /// One accepted text fragment; `seq` starts at 0 and increases by one.
    Delta {
        turn_id: TurnId,
        seq: u64,
        text: String,
    },
    /// Exactly one per turn, always last.
    Finished {
        turn_id: TurnId,
        outcome: TurnOutcome,
    },
}

impl TurnEvent {
    pub fn turn_id(&self) -> TurnId {
        match self {
            Self::Delta { turn_id, .. } | Self::Finished { turn_id, .. } => *turn_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// Receives turn notifications so a surface can re-render.
pub trait TurnObserver {
    fn on_event(&mut self, event: &TurnEvent);
}

impl<F> TurnObserver for F
where
    F: FnMut(&TurnEvent),
{
    fn on_event(&mut self, event: &TurnEvent) {
        self(event)
    }
}

/// Handle used to request cancellation of a running turn.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The read loop stops at its next suspension point and reports
    /// `TurnOutcome::Cancelled`.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving side of an [`AbortHandle`].
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once abort is requested. Pends forever if every handle was
    /// dropped without aborting.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                if *self.rx.borrow() {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Creates a connected abort handle and signal.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx: Arc::new(tx) }, AbortSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn outcome_into_result_maps_terminal_kinds() {
        let done = TurnOutcome::Completed { text: "hi".into() };
        assert_eq!(done.phase(), StreamPhase::Done);
        assert_eq!(done.into_result(), Ok("hi".to_string()));

        let cancelled = TurnOutcome::Cancelled { text: "h".into() };
        assert_eq!(cancelled.text(), "h");
        assert_eq!(cancelled.into_result(), Err(DeblokError::Cancelled));

        let failed = TurnOutcome::Failed {
            error: StreamError::upstream("boom"),
            text: String::new(),
        };
        assert_eq!(failed.phase(), StreamPhase::Errored);
        assert!(matches!(failed.into_result(), Err(DeblokError::Stream(_))));
    }

    #[test]
    fn closures_are_observers() {
        let mut seen = Vec::new();
        {
            let mut observer = |event: &TurnEvent| seen.push(event.is_terminal());
            let turn_id = TurnId::new();
            observer.on_event(&TurnEvent::Delta {
                turn_id,
                seq: 0,
                text: "a".into(),
            });
            observer.on_event(&TurnEvent::Finished {
                turn_id,
                outcome: TurnOutcome::Completed { text: "a".into() },
            });
        }
        assert_eq!(seen, vec![false, true]);
    }

    #[tokio::test]
    async fn abort_signal_resolves_after_abort() {
        let (handle, mut signal) = abort_pair();
        assert!(!signal.is_aborted());
        let waiter = tokio::spawn(async move {
            signal.aborted().await;
        });
        handle.abort();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("abort observed")
            .expect("join");
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn never_signal_stays_pending() {
        let mut signal = AbortSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(waited.is_err());
    }
}
