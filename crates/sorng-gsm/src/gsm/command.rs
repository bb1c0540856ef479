//! Queued AT commands.
//!
//! A [`Command`] is created by the caller, handed to the modem and shared
//! from then on as `Arc<Command>`.  It completes exactly once: the response
//! is shaped, the completion flag is set, the callback (if any) runs, and
//! finally every waiter is released.

use crate::gsm::response::{ModemResponse, Response, ResponseShape};
use crate::gsm::responses::ResponseKind;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::sync::watch;

/// Ctrl-Z, ends text entry.
pub const CTRL_Z: u8 = 0x1A;
pub const ESC: char = '\x1b';

type Callback = Box<dyn FnOnce(&Response) + Send + 'static>;

/// Parts of a command that is written in several steps, each gated by the
/// modem's `>` prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multipart {
    parts: Vec<String>,
    part_terminator: String,
    final_terminator: u8,
}

impl Multipart {
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn part_terminator(&self) -> &str {
        &self.part_terminator
    }

    pub fn final_terminator(&self) -> u8 {
        self.final_terminator
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Plain,
    Multipart(Multipart),
    /// Stand-in owner for a response whose echo matched no queued command.
    Unsolicited,
}

pub struct Command {
    text: String,
    kind: CommandKind,
    shape: Box<dyn ResponseShape>,
    callback: Mutex<Option<Callback>>,
    next: Mutex<Option<Arc<Command>>>,
    timeout: Option<Duration>,
    complete: AtomicBool,
    claimed: AtomicBool,
    response: OnceLock<Response>,
    done: watch::Sender<bool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl Command {
    fn with_kind(text: String, kind: CommandKind) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            text,
            kind,
            shape: Box::new(ResponseKind::Generic),
            callback: Mutex::new(None),
            next: Mutex::new(None),
            timeout: None,
            complete: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
            response: OnceLock::new(),
            done,
        }
    }

    pub fn new(text: impl Into<String>) -> Self {
        Self::with_kind(text.into(), CommandKind::Plain)
    }

    /// A command written as `parts`, each but the last followed by CR and
    /// a wait for the prompt, the last followed by Ctrl-Z.  Its identity
    /// is the first part.
    pub fn multipart<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        let text = parts.first().cloned().unwrap_or_default();
        if parts.len() < 2 {
            return Self::new(text);
        }
        Self::with_kind(
            text,
            CommandKind::Multipart(Multipart {
                parts,
                part_terminator: "\r".to_string(),
                final_terminator: CTRL_Z,
            }),
        )
    }

    pub fn unsolicited(echo: impl Into<String>) -> Self {
        Self::with_kind(echo.into(), CommandKind::Unsolicited)
    }

    pub fn with_shape(mut self, shape: impl ResponseShape + 'static) -> Self {
        self.shape = Box::new(shape);
        self
    }

    /// Run `f` with the shaped response when the command completes.  A
    /// panic inside `f` is caught and logged.
    pub fn on_response<F>(self, f: F) -> Self
    where
        F: FnOnce(&Response) + Send + 'static,
    {
        *lock(&self.callback) = Some(Box::new(f));
        self
    }

    /// Queue `next` immediately after this command once it completes.
    pub fn then(self, next: Command) -> Self {
        *lock(&self.next) = Some(Arc::new(next));
        self
    }

    /// Give up on the command if no terminal line arrives within `timeout`
    /// of it being written.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Chain a follow-up at runtime, typically from inside a callback.
    pub fn set_next(&self, next: Command) {
        *lock(&self.next) = Some(Arc::new(next));
    }

    pub(crate) fn take_next(&self) -> Option<Arc<Command>> {
        lock(&self.next).take()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn multipart_parts(&self) -> Option<&Multipart> {
        match &self.kind {
            CommandKind::Multipart(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.kind, CommandKind::Multipart(_))
    }

    pub fn is_unsolicited(&self) -> bool {
        matches!(self.kind, CommandKind::Unsolicited)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.get()
    }

    /// Bytes to put on the wire for a plain command.
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut bytes = encode(&self.text);
        bytes.push(b'\r');
        bytes
    }

    /// Reserve the right to complete this command.  Only the first caller
    /// gets `true`.
    pub(crate) fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn complete(&self, base: ModemResponse) {
        let shaped = catch_unwind(AssertUnwindSafe(|| self.shape.shape(base.clone())))
            .unwrap_or_else(|_| {
                log::warn!("decoding the response to {:?} panicked", self.text);
                Response::Generic(base)
            });
        if self.response.set(shaped).is_err() {
            log::warn!("command {:?} completed twice", self.text);
            return;
        }
        self.complete.store(true, Ordering::SeqCst);

        let callback = lock(&self.callback).take();
        if let (Some(cb), Some(response)) = (callback, self.response.get()) {
            if catch_unwind(AssertUnwindSafe(|| cb(response))).is_err() {
                log::warn!("response callback for {:?} panicked", self.text);
            }
        }
        self.done.send_replace(true);
    }

    /// Wait until the command completes and return its response.
    pub async fn wait(&self) -> Response {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
        self.response
            .get()
            .cloned()
            .unwrap_or_else(|| Response::Generic(ModemResponse::new(self.text.clone())))
    }

    /// Wait up to `timeout`.  Returns whether the command completed; the
    /// command stays queued either way.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("text", &self.text)
            .field("kind", &self.kind)
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Single-byte encoding matching the receive side: code points up to 0xFF
/// map to the byte of the same value, anything else becomes `?`.
pub fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}
