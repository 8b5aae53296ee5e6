use std::fmt;

use futures::{Stream, StreamExt as _};
use tracing::{debug, warn};

use crate::delta::{Applied, DeltaAccumulator, DeltaMapping, StreamPhase};
use crate::errors::StreamError;
use crate::sse::{FrameSplitter, Utf8Decoder, parse_event};
use crate::turn::{AbortSignal, TurnEvent, TurnId, TurnObserver, TurnOutcome};

/// Synchronous core of the read loop: decode, split, parse, accumulate.
///
/// `TurnReader` never emits `Finished`; whoever drives it decides when the
/// turn is over and reports the outcome once.
#[derive(Debug)]
pub struct TurnReader {
    turn_id: TurnId,
    decoder: Utf8Decoder,
    splitter: FrameSplitter,
    accumulator: DeltaAccumulator,
    seq: u64,
    failure: Option<StreamError>,
    abort: Option<AbortSignal>,
}

impl TurnReader {
    pub fn new(turn_id: TurnId, mapping: DeltaMapping) -> Self {
        let mut accumulator = DeltaAccumulator::new(mapping);
        accumulator.begin();
        Self {
            turn_id,
            decoder: Utf8Decoder::default(),
            splitter: FrameSplitter::default(),
            accumulator,
            seq: 0,
            failure: None,
            abort: None,
        }
    }

    /// Checks `signal` before every frame, so an abort raised while a chunk
    /// is being handled stops delivery at the next frame.
    pub fn abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    pub fn phase(&self) -> StreamPhase {
        self.accumulator.phase()
    }

    pub fn text(&self) -> &str {
        self.accumulator.text()
    }

    pub fn is_finished(&self) -> bool {
        self.accumulator.is_terminal()
    }

    /// Feeds one chunk of the body. Empty chunks are a no-op.
    pub fn feed<O>(&mut self, chunk: &[u8], observer: &mut O)
    where
        O: TurnObserver + ?Sized,
    {
        if chunk.is_empty() || self.is_finished() {
            return;
        }
        let text = match self.decoder.decode(chunk) {
            Ok(text) => text,
            Err(err) => {
                self.fail(err);
                return;
            }
        };
        for frame in self.splitter.push(&text) {
            if self.cancel_if_aborted() {
                return;
            }
            self.handle_frame(&frame, observer);
            if self.is_finished() {
                break;
            }
        }
    }

    /// Handles end of body: flushes a trailing undelimited frame, then fails
    /// the turn if no terminal event was seen.
    pub fn end<O>(&mut self, observer: &mut O)
    where
        O: TurnObserver + ?Sized,
    {
        if self.is_finished() {
            return;
        }
        if let Err(err) = self.decoder.finish() {
            self.fail(err);
            return;
        }
        for frame in self.splitter.finish() {
            if self.cancel_if_aborted() {
                return;
            }
            self.handle_frame(&frame, observer);
            if self.is_finished() {
                return;
            }
        }
        if !self.is_finished() {
            self.fail(StreamError::transport(
                "stream ended without a terminal event",
                None,
            ));
        }
    }

    /// Ends the turn with `error` unless it already ended.
    pub fn fail(&mut self, error: StreamError) {
        if self.accumulator.fail() {
            warn!(turn_id = %self.turn_id, error = %error, "turn failed");
            self.failure = Some(error);
        }
    }

    /// Ends the turn as cancelled unless it already ended.
    pub fn cancel(&mut self) {
        if self.accumulator.cancel() {
            debug!(turn_id = %self.turn_id, "turn cancelled");
        }
    }

    fn cancel_if_aborted(&mut self) -> bool {
        if self.abort.as_ref().is_some_and(AbortSignal::is_aborted) {
            self.cancel();
        }
        self.is_finished()
    }

    /// Outcome once the turn is terminal.
    pub fn outcome(&self) -> Option<TurnOutcome> {
        let text = self.text().to_string();
        match self.phase() {
            StreamPhase::Done => Some(TurnOutcome::Completed { text }),
            StreamPhase::Cancelled => Some(TurnOutcome::Cancelled { text }),
            StreamPhase::Errored => Some(TurnOutcome::Failed {
                error: self.failure.clone().unwrap_or_else(|| {
                    StreamError::transport("turn failed without a recorded error", None)
                }),
                text,
            }),
            StreamPhase::Idle | StreamPhase::Streaming => None,
        }
    }

    /// Final outcome; a turn that never reached a terminal phase is a
    /// transport failure.
    pub fn into_outcome(mut self) -> TurnOutcome {
        if !self.is_finished() {
            self.fail(StreamError::transport(
                "turn ended before a terminal event",
                None,
            ));
        }
        match self.outcome() {
            Some(outcome) => outcome,
            None => TurnOutcome::Failed {
                error: StreamError::transport("turn ended before a terminal event", None),
                text: self.accumulator.into_text(),
            },
        }
    }

    fn handle_frame<O>(&mut self, frame: &str, observer: &mut O)
    where
        O: TurnObserver + ?Sized,
    {
        let Some(event) = parse_event(frame) else {
            return;
        };
        match self.accumulator.apply(&event) {
            Ok(Applied::Appended(text)) => {
                debug!(turn_id = %self.turn_id, seq = self.seq, bytes = text.len(), "delta");
                observer.on_event(&TurnEvent::Delta {
                    turn_id: self.turn_id,
                    seq: self.seq,
                    text,
                });
                self.seq = self.seq.saturating_add(1);
            }
            Ok(Applied::Completed) => {
                debug!(turn_id = %self.turn_id, deltas = self.seq, "stream completed");
            }
            Ok(Applied::Ignored | Applied::Skipped(_)) => {}
            Err(err) => {
                warn!(turn_id = %self.turn_id, error = %err, "upstream error event");
                self.failure = Some(err);
            }
        }
    }
}

/// Reads `body` to a terminal state and reports progress to `observer`.
///
/// Every accepted delta produces one `TurnEvent::Delta`; the turn always ends
/// with exactly one `TurnEvent::Finished`, after which the observer is never
/// called again. Abort is checked before every read and before every frame;
/// once observed, no further delta is delivered and the outcome is `Cancelled` with the
/// partial text kept.
pub async fn drive_turn<S, E, O>(
    turn_id: TurnId,
    body: S,
    mapping: DeltaMapping,
    mut abort: AbortSignal,
    observer: &mut O,
) -> TurnOutcome
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: fmt::Display,
    O: TurnObserver + ?Sized,
{
    let mut body = body;
    let mut reader = TurnReader::new(turn_id, mapping).abort_signal(abort.clone());

    if abort.is_aborted() {
        reader.cancel();
    }
    while !reader.is_finished() {
        tokio::select! {
            biased;
            _ = abort.aborted() => reader.cancel(),
            next = body.next() => match next {
                Some(Ok(chunk)) => reader.feed(&chunk, observer),
                Some(Err(err)) => reader.fail(StreamError::transport(
                    format!("stream read failed: {err}"),
                    None,
                )),
                None => reader.end(observer),
            },
        }
    }

    let outcome = reader.into_outcome();
    observer.on_event(&TurnEvent::Finished {
        turn_id,
        outcome: outcome.clone(),
    });
    outcome
}
