//! Client frame reader.
//!
//! Reassembles frames from byte chunks whose boundaries are arbitrary: a
//! chunk may hold several frames, half a frame, or half a UTF-8 character.
//! Only complete lines are decoded; the unterminated tail waits for more
//! bytes.
//!
//! State machine: `Receiving → {Receiving, Completed, Failed}`. Exactly one
//! of `on_complete` / `on_error` fires per stream, and no `on_chunk` after it.

use tracing::debug;

use crate::relay::codec::{decode, LogicalEvent};

/// Receiver of decoded stream events.
pub trait FrameHandler {
    fn on_chunk(&mut self, text: &str);
    fn on_complete(&mut self);
    fn on_error(&mut self, message: &str);
}

/// Closure-backed [`FrameHandler`].
pub struct Callbacks<C, D, E> {
    pub on_chunk: C,
    pub on_complete: D,
    pub on_error: E,
}

impl<C, D, E> Callbacks<C, D, E>
where
    C: FnMut(&str),
    D: FnMut(),
    E: FnMut(&str),
{
    pub fn new(on_chunk: C, on_complete: D, on_error: E) -> Self {
        Self {
            on_chunk,
            on_complete,
            on_error,
        }
    }
}

impl<C, D, E> FrameHandler for Callbacks<C, D, E>
where
    C: FnMut(&str),
    D: FnMut(),
    E: FnMut(&str),
{
    fn on_chunk(&mut self, text: &str) {
        (self.on_chunk)(text)
    }

    fn on_complete(&mut self) {
        (self.on_complete)()
    }

    fn on_error(&mut self, message: &str) {
        (self.on_error)(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Receiving,
    Completed,
    Failed,
}

/// Message passed to `on_error` when the transport closes before `[DONE]`.
pub const INCOMPLETE_STREAM: &str = "Stream ended before completion";

pub struct FrameReader<H> {
    buffer: Vec<u8>,
    state: ReaderState,
    handler: H,
}

impl<H: FrameHandler> FrameReader<H> {
    pub fn new(handler: H) -> Self {
        Self {
            buffer: Vec::new(),
            state: ReaderState::Receiving,
            handler,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Undecoded tail currently held.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Feed one received chunk. Ignored once the stream has terminated.
    pub fn push(&mut self, chunk: &[u8]) -> ReaderState {
        if self.state != ReaderState::Receiving {
            return self.state;
        }
        self.buffer.extend_from_slice(chunk);

        let Some(last_break) = self.buffer.iter().rposition(|&b| is_line_break(b)) else {
            return self.state;
        };
        let tail = self.buffer.split_off(last_break + 1);
        let complete = std::mem::replace(&mut self.buffer, tail);

        for line in complete.split(|&b| is_line_break(b)) {
            if line.is_empty() {
                continue;
            }
            match decode(&String::from_utf8_lossy(line)) {
                Some(LogicalEvent::Delta { text }) => self.handler.on_chunk(&text),
                Some(LogicalEvent::Completion { .. }) => {
                    self.state = ReaderState::Completed;
                    self.buffer.clear();
                    self.handler.on_complete();
                    break;
                }
                Some(LogicalEvent::Failure { .. }) | None => {
                    debug!(len = line.len(), "Skipping non-frame line");
                }
            }
        }
        self.state
    }

    /// The transport reported an error or an abrupt close.
    pub fn fail(&mut self, message: &str) {
        if self.state != ReaderState::Receiving {
            return;
        }
        self.state = ReaderState::Failed;
        self.buffer.clear();
        self.handler.on_error(message);
    }

    /// The transport closed cleanly. Without a prior `[DONE]` this is an
    /// incomplete stream; any unterminated tail is discarded.
    pub fn close(&mut self) {
        self.fail(INCOMPLETE_STREAM);
    }
}

fn is_line_break(b: u8) -> bool {
    b == b'\n' || b == b'\r'
}
