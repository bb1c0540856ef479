//! Command queue and the dispatcher state machine.
//!
//! [`Dispatcher`] is plain synchronous state: the framer, the queue, the
//! response currently being collected and the [`ModemState`].  Every
//! operation returns the [`Effect`]s the runtime has to carry out (writes,
//! completions, events), so the dispatcher lock is never held while user
//! code runs or while a task awaits.

use crate::gsm::command::{Command, ESC};
use crate::gsm::framer::{Frame, LineFramer};
use crate::gsm::response::ModemResponse;
use crate::gsm::types::ModemState;
use std::collections::VecDeque;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pending commands.  The head is the one on the wire.
#[derive(Debug, Default)]
pub struct CommandQueue {
    items: VecDeque<Arc<Command>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, cmd: Arc<Command>) {
        self.items.push_back(cmd);
    }

    /// Insert right behind the head, or at the front of an empty queue.
    pub fn splice_after_head(&mut self, cmd: Arc<Command>) {
        let at = self.items.len().min(1);
        self.items.insert(at, cmd);
    }

    pub fn peek_head(&self) -> Option<&Arc<Command>> {
        self.items.front()
    }

    pub fn pop_head(&mut self) -> Option<Arc<Command>> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Work produced by the dispatcher for the runtime.
#[derive(Debug)]
pub enum Effect {
    /// Put the command on the wire (plain) or start its part writer
    /// (multipart).
    Send(Arc<Command>),
    /// A line that belongs to no response.
    Unsolicited(String),
    /// The command's terminal line arrived.  The command is already
    /// claimed; the runtime must complete it.
    Complete {
        command: Arc<Command>,
        response: ModemResponse,
    },
    /// The `>` prompt arrived for the multipart command in flight.
    PromptReady,
    /// First response after connecting.
    Connected,
}

pub struct Dispatcher {
    framer: LineFramer,
    queue: CommandQueue,
    open: Option<(Arc<Command>, ModemResponse)>,
    state: ModemState,
}

impl Dispatcher {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            framer: LineFramer::new(max_line_length),
            queue: CommandQueue::new(),
            open: None,
            state: ModemState::Unknown,
        }
    }

    pub fn state(&self) -> ModemState {
        self.state
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn head(&self) -> Option<&Arc<Command>> {
        self.queue.peek_head()
    }

    fn is_head(&self, cmd: &Arc<Command>) -> bool {
        self.queue
            .peek_head()
            .map_or(false, |head| Arc::ptr_eq(head, cmd))
    }

    /// The transport is open.  Anything queued beforehand goes out now.
    pub fn connect(&mut self) -> Vec<Effect> {
        self.framer.reset();
        self.open = None;
        self.state = ModemState::Connected;
        self.dispatch_head()
    }

    pub fn enqueue(&mut self, cmd: Arc<Command>) -> Vec<Effect> {
        let was_empty = self.queue.is_empty();
        self.queue.enqueue(cmd);
        if was_empty {
            self.open = None;
            self.dispatch_head()
        } else {
            Vec::new()
        }
    }

    fn dispatch_head(&mut self) -> Vec<Effect> {
        if self.state == ModemState::Unknown {
            return Vec::new();
        }
        match self.queue.peek_head() {
            Some(head) => {
                if !head.is_multipart() && self.state == ModemState::Idle {
                    self.state = ModemState::Busy;
                }
                log::trace!("dispatching {:?}", head.text());
                vec![Effect::Send(Arc::clone(head))]
            }
            None => Vec::new(),
        }
    }

    pub fn on_bytes(&mut self, chunk: &[u8]) -> Vec<Effect> {
        let mut effects = Vec::new();
        for frame in self.framer.feed(chunk) {
            match frame {
                Frame::Prompt => {
                    if self.state == ModemState::MultipartCmdWait {
                        self.state = ModemState::MultipartCmdReady;
                        effects.push(Effect::PromptReady);
                    }
                }
                Frame::Line(line) => self.on_line(line, &mut effects),
            }
        }
        effects
    }

    fn on_line(&mut self, line: String, effects: &mut Vec<Effect>) {
        log::debug!("<< {}", line);
        if let Some((_, response)) = self.open.as_mut() {
            if response.accept(&line) {
                self.finish(effects);
            }
            return;
        }

        let head_match = self
            .queue
            .peek_head()
            .filter(|head| head.text().eq_ignore_ascii_case(&line))
            .cloned();
        if head_match.is_some() || looks_like_echo(&line) {
            let owner = head_match.unwrap_or_else(|| Arc::new(Command::unsolicited(line)));
            let response = ModemResponse::new(owner.text());
            self.open = Some((owner, response));
        } else {
            effects.push(Effect::Unsolicited(line));
        }
    }

    fn finish(&mut self, effects: &mut Vec<Effect>) {
        let Some((command, response)) = self.open.take() else {
            return;
        };
        if self.state == ModemState::Connected {
            self.state = ModemState::Idle;
            effects.push(Effect::Connected);
        } else if self.state == ModemState::Busy && self.is_head(&command) {
            self.state = ModemState::Idle;
        }
        if command.claim() {
            effects.push(Effect::Complete { command, response });
        }
    }

    /// Move a completed command's chained follow-up in behind it.
    pub fn splice_chain(&mut self, completed: &Arc<Command>) {
        if let Some(next) = completed.take_next() {
            self.queue.splice_after_head(next);
        }
    }

    /// Called once the settle delay after `completed` has passed.  Pops it
    /// if it is still the head and sends whatever is next.
    pub fn advance(&mut self, completed: &Arc<Command>) -> Vec<Effect> {
        if !self.is_head(completed) {
            return Vec::new();
        }
        self.queue.pop_head();
        self.dispatch_head()
    }

    /// Give up on an in-flight command that never produced a terminal line.
    /// It completes with whatever lines arrived and an `Unknown` result.
    pub fn abandon(&mut self, cmd: &Arc<Command>) -> Vec<Effect> {
        if !self.is_head(cmd) || cmd.is_complete() {
            return Vec::new();
        }
        let response = match self.open.take() {
            Some((owner, response)) if Arc::ptr_eq(&owner, cmd) => response,
            other => {
                self.open = other;
                ModemResponse::new(cmd.text())
            }
        };
        self.framer.cancel_prompt();
        if matches!(
            self.state,
            ModemState::Busy | ModemState::MultipartCmdWait | ModemState::MultipartCmdReady
        ) {
            self.state = ModemState::Idle;
        }
        if cmd.claim() {
            log::warn!("no result for {:?}, giving up", cmd.text());
            vec![Effect::Complete {
                command: Arc::clone(cmd),
                response,
            }]
        } else {
            Vec::new()
        }
    }

    /// Arm the prompt wait before writing a non-final part.  `false` if
    /// `cmd` is no longer in flight.
    pub fn begin_part(&mut self, cmd: &Arc<Command>) -> bool {
        if !self.is_head(cmd) || cmd.is_complete() {
            return false;
        }
        self.state = ModemState::MultipartCmdWait;
        self.framer.await_prompt();
        true
    }

    /// Open the response before the final part goes out.
    pub fn begin_final_part(&mut self, cmd: &Arc<Command>, first_part: &str) -> bool {
        if !self.is_head(cmd) || cmd.is_complete() {
            return false;
        }
        let owner = if cmd.text().eq_ignore_ascii_case(first_part) {
            Arc::clone(cmd)
        } else {
            Arc::new(Command::unsolicited(first_part))
        };
        let response = ModemResponse::new(owner.text());
        self.open = Some((owner, response));
        self.framer.cancel_prompt();
        self.state = ModemState::Idle;
        true
    }

    /// Drop everything.  Returns the queued commands, each claimed, with an
    /// empty response to complete them with.
    pub fn shutdown(&mut self) -> Vec<(Arc<Command>, ModemResponse)> {
        self.framer.reset();
        self.open = None;
        self.state = ModemState::Unknown;
        let mut abandoned = Vec::new();
        while let Some(cmd) = self.queue.pop_head() {
            if cmd.claim() {
                let response = ModemResponse::new(cmd.text());
                abandoned.push((cmd, response));
            }
        }
        abandoned
    }
}

/// Lines that start a response even when no queued command matches them.
fn looks_like_echo(line: &str) -> bool {
    if line.starts_with(ESC) || line.starts_with("+++") {
        return true;
    }
    line.get(..2).map_or(false, |p| {
        p.eq_ignore_ascii_case("AT") || p.eq_ignore_ascii_case("A/")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gsm::result_code::ResultCode;

    fn cmd(text: &str) -> Arc<Command> {
        Arc::new(Command::new(text))
    }

    fn idle_dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new(4096);
        d.connect();
        d.state = ModemState::Idle;
        d
    }

    fn sent(effects: &[Effect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(c) => Some(c.text().to_string()),
                _ => None,
            })
            .collect()
    }

    fn completed(effects: Vec<Effect>) -> Vec<(Arc<Command>, ModemResponse)> {
        effects
            .into_iter()
            .filter_map(|e| match e {
                Effect::Complete { command, response } => Some((command, response)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn queue_operations() {
        let mut q = CommandQueue::new();
        q.splice_after_head(cmd("A"));
        q.enqueue(cmd("B"));
        q.enqueue(cmd("C"));
        q.splice_after_head(cmd("X"));
        let order: Vec<_> = std::iter::from_fn(|| q.pop_head())
            .map(|c| c.text().to_string())
            .collect();
        assert_eq!(order, vec!["A", "X", "B", "C"]);
        assert!(q.peek_head().is_none());
    }

    #[test]
    fn nothing_is_sent_before_connect() {
        let mut d = Dispatcher::new(4096);
        assert!(d.enqueue(cmd("AT")).is_empty());
        assert_eq!(d.state(), ModemState::Unknown);
        let effects = d.connect();
        assert_eq!(sent(&effects), vec!["AT"]);
        assert_eq!(d.state(), ModemState::Connected);
    }

    #[test]
    fn only_head_is_in_flight() {
        let mut d = idle_dispatcher();
        assert_eq!(sent(&d.enqueue(cmd("AT+CSQ"))), vec!["AT+CSQ"]);
        assert_eq!(d.state(), ModemState::Busy);
        assert!(d.enqueue(cmd("AT+CIND?")).is_empty());
        assert_eq!(d.pending(), 2);
    }

    #[test]
    fn echoed_head_collects_response() {
        let mut d = idle_dispatcher();
        let c = cmd("AT+CSQ");
        d.enqueue(Arc::clone(&c));

        let done = completed(d.on_bytes(b"at+csq\r\r\n+CSQ: 18,99\r\n\r\nOK\r\n"));
        assert_eq!(done.len(), 1);
        let (owner, response) = &done[0];
        assert!(Arc::ptr_eq(owner, &c));
        assert_eq!(response.lines(), ["+CSQ: 18,99".to_string()]);
        assert_eq!(response.result(), &ResultCode::Ok);
        assert_eq!(d.state(), ModemState::Idle);
    }

    #[test]
    fn connected_transition_on_first_completion() {
        let mut d = Dispatcher::new(4096);
        d.connect();
        d.enqueue(cmd("ATE1"));
        let effects = d.on_bytes(b"ATE1\r\r\nOK\r\n");
        assert!(matches!(effects[0], Effect::Connected));
        assert!(matches!(effects[1], Effect::Complete { .. }));
        assert_eq!(d.state(), ModemState::Idle);
    }

    #[test]
    fn stray_lines_are_unsolicited() {
        let mut d = idle_dispatcher();
        let effects = d.on_bytes(b"\r\nRING\r\n+CMTI: \"ME\",3\r\n");
        let lines: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::Unsolicited(l) => Some(l.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec!["RING", "+CMTI: \"ME\",3"]);
    }

    #[test]
    fn unknown_echo_binds_to_pseudo_command() {
        let mut d = idle_dispatcher();
        let head = cmd("AT+CSQ");
        d.enqueue(Arc::clone(&head));

        let done = completed(d.on_bytes(b"AT+CGMI\r\r\nSIMCOM\r\n\r\nOK\r\n"));
        assert_eq!(done.len(), 1);
        let (owner, response) = &done[0];
        assert!(owner.is_unsolicited());
        assert_eq!(owner.text(), "AT+CGMI");
        assert_eq!(response.lines(), ["SIMCOM".to_string()]);

        // The real head is untouched and still in flight.
        assert!(!head.is_complete());
        assert_eq!(d.state(), ModemState::Busy);
        assert!(d.advance(owner).is_empty());
        assert_eq!(d.pending(), 1);
    }

    #[test]
    fn escape_and_repeat_prefixes_open_responses() {
        for echo in ["\x1bAT", "+++", "a/", "At+CFUN=1"] {
            let mut d = idle_dispatcher();
            let mut bytes = echo.as_bytes().to_vec();
            bytes.extend_from_slice(b"\r\nOK\r\n");
            let done = completed(d.on_bytes(&bytes));
            assert_eq!(done.len(), 1, "{echo:?}");
        }
    }

    #[test]
    fn advance_pops_and_dispatches_next() {
        let mut d = idle_dispatcher();
        let first = cmd("AT");
        d.enqueue(Arc::clone(&first));
        d.enqueue(cmd("AT+CSQ"));
        d.on_bytes(b"AT\rOK\r");

        let effects = d.advance(&first);
        assert_eq!(sent(&effects), vec!["AT+CSQ"]);
        assert_eq!(d.pending(), 1);
        assert_eq!(d.state(), ModemState::Busy);
        // A second advance for the same command is a no-op.
        assert!(d.advance(&first).is_empty());
    }

    #[test]
    fn chained_command_runs_next() {
        let mut d = idle_dispatcher();
        let first = Arc::new(Command::new("AT+CMGR=1").then(Command::new("AT+CMGD=1")));
        d.enqueue(Arc::clone(&first));
        d.enqueue(cmd("AT+CSQ"));
        d.on_bytes(b"AT+CMGR=1\rOK\r");
        d.splice_chain(&first);
        assert_eq!(sent(&d.advance(&first)), vec!["AT+CMGD=1"]);
    }

    #[test]
    fn cme_error_is_terminal() {
        let mut d = idle_dispatcher();
        d.enqueue(cmd("AT+CIMI"));
        let done = completed(d.on_bytes(b"AT+CIMI\r\r\n+CME ERROR: 10\r\n"));
        assert_eq!(done[0].1.result().description(), "SIM Not Inserted");
    }

    #[test]
    fn abandon_completes_with_partial_lines() {
        let mut d = idle_dispatcher();
        let c = cmd("AT+COPS=?");
        d.enqueue(Arc::clone(&c));
        d.on_bytes(b"AT+COPS=?\r\r\n+COPS: (2,\"Op\")\r\n");

        let done = completed(d.abandon(&c));
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].1.result(), &ResultCode::Unknown);
        assert_eq!(done[0].1.line_count(), 1);
        assert_eq!(d.state(), ModemState::Idle);

        // A late terminal line no longer belongs to anything.
        let late = d.on_bytes(b"OK\r");
        assert!(matches!(late.as_slice(), [Effect::Unsolicited(l)] if l == "OK"));
        assert!(d.abandon(&c).is_empty());
    }

    #[test]
    fn multipart_prompt_flow() {
        let mut d = idle_dispatcher();
        let c = Arc::new(Command::multipart(["AT+CMGS=\"+1555\"", "hi"]));
        let effects = d.enqueue(Arc::clone(&c));
        assert_eq!(sent(&effects), vec!["AT+CMGS=\"+1555\""]);
        assert_eq!(d.state(), ModemState::Idle);

        assert!(d.begin_part(&c));
        assert_eq!(d.state(), ModemState::MultipartCmdWait);
        let effects = d.on_bytes(b"AT+CMGS=\"+1555\"\r\r\n> ");
        assert!(matches!(effects.as_slice(), [Effect::PromptReady]));
        assert_eq!(d.state(), ModemState::MultipartCmdReady);

        assert!(d.begin_final_part(&c, "AT+CMGS=\"+1555\""));
        assert_eq!(d.state(), ModemState::Idle);
        let done = completed(d.on_bytes(b"hi\x1a\r\n+CMGS: 12\r\n\r\nOK\r\n"));
        assert_eq!(done.len(), 1);
        assert!(Arc::ptr_eq(&done[0].0, &c));
        assert!(done[0].1.lines().iter().any(|l| l == "+CMGS: 12"));
    }

    #[test]
    fn prompt_ignored_outside_multipart_wait() {
        let mut d = idle_dispatcher();
        let effects = d.on_bytes(b">");
        assert!(effects.is_empty());
    }

    #[test]
    fn shutdown_returns_queued_commands() {
        let mut d = idle_dispatcher();
        d.enqueue(cmd("AT"));
        d.enqueue(cmd("AT+CSQ"));
        let abandoned = d.shutdown();
        assert_eq!(abandoned.len(), 2);
        assert_eq!(d.state(), ModemState::Unknown);
        assert_eq!(d.pending(), 0);
    }
}
