//! GSM modem runtime.
//!
//! [`Modem`] owns the transport and three background tasks: a receive loop
//! that feeds the [`Dispatcher`], a writer that serialises everything put on
//! the wire, and the periodic health probe.  The dispatcher lives behind a
//! single `std::sync::Mutex` that is only ever held for synchronous state
//! changes; the [`Effect`]s it returns are applied after the lock is gone.

use crate::gsm::command::{encode, Command};
use crate::gsm::commands::{self, DeleteMode, ListMode};
use crate::gsm::error::{GsmError, GsmResult};
use crate::gsm::queue::{Dispatcher, Effect};
use crate::gsm::response::{ModemResponse, Response};
use crate::gsm::responses::*;
use crate::gsm::transport::SerialTransport;
use crate::gsm::types::*;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Health bookkeeping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Health {
    indicators: Option<Indicators>,
    indicators_raised_at: Option<Instant>,
    signal: Option<SignalQuality>,
    imei: Option<String>,
    imsi: Option<String>,
    imsi_pending: bool,
    probe_outstanding: bool,
    missed_probes: u32,
    lost_raised: bool,
}

impl Health {
    fn missed(&mut self, limit: u32) -> bool {
        self.missed_probes = self.missed_probes.saturating_add(1);
        if self.missed_probes >= limit && !self.lost_raised {
            self.lost_raised = true;
            return true;
        }
        false
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ModemInner {
    config: ModemConfig,
    transport: Arc<dyn SerialTransport>,
    dispatcher: Mutex<Dispatcher>,
    health: Mutex<Health>,
    events: broadcast::Sender<ModemEvent>,
    writer: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    runtime: Mutex<Option<Handle>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Bumped on every `>` prompt for the multipart command in flight.
    prompt: watch::Sender<u64>,
    running: AtomicBool,
}

impl ModemInner {
    fn dispatcher(&self) -> MutexGuard<'_, Dispatcher> {
        lock(&self.dispatcher)
    }

    fn emit(&self, event: ModemEvent) {
        log::debug!("event: {:?}", event);
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match lock(&self.runtime).as_ref() {
            Some(handle) => {
                handle.spawn(fut);
            }
            None => log::warn!("modem runtime not started, dropping background work"),
        }
    }

    fn write(&self, bytes: Vec<u8>) {
        match lock(&self.writer).as_ref() {
            Some(tx) => {
                if tx.send(bytes).is_err() {
                    log::warn!("writer for {} has stopped", self.transport.port_name());
                }
            }
            None => log::warn!("write while {} is closed", self.transport.port_name()),
        }
    }

    fn enqueue(self: &Arc<Self>, cmd: Command) -> Arc<Command> {
        let cmd = Arc::new(cmd);
        let effects = self.dispatcher().enqueue(Arc::clone(&cmd));
        self.apply(effects);
        cmd
    }

    fn apply(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(cmd) => self.send(cmd),
                Effect::Unsolicited(line) => self.emit(ModemEvent::UnsolicitedNotification(line)),
                Effect::PromptReady => self.prompt.send_modify(|n| *n = n.wrapping_add(1)),
                Effect::Connected => self.emit(ModemEvent::Connected),
                Effect::Complete { command, response } => self.finish(command, response),
            }
        }
    }

    fn send(self: &Arc<Self>, cmd: Arc<Command>) {
        let timeout = cmd
            .timeout()
            .or(self.config.command_timeout_ms.map(Duration::from_millis));
        if let Some(timeout) = timeout {
            let weak = Arc::downgrade(self);
            let watched = Arc::clone(&cmd);
            self.spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = weak.upgrade() {
                    let effects = inner.dispatcher().abandon(&watched);
                    inner.apply(effects);
                }
            });
        }

        if cmd.is_multipart() {
            let inner = Arc::clone(self);
            self.spawn(async move { inner.write_multipart(cmd).await });
        } else {
            log::debug!(">> {}", cmd.text());
            self.write(cmd.wire_bytes());
        }
    }

    /// Write each part of a multipart command, waiting for the prompt in
    /// between.  Bails out quietly if the command completes underneath it.
    async fn write_multipart(self: Arc<Self>, cmd: Arc<Command>) {
        let Some(mp) = cmd.multipart_parts() else {
            return;
        };
        let Some((last, leading)) = mp.parts().split_last() else {
            return;
        };

        for part in leading {
            if !self.dispatcher().begin_part(&cmd) {
                return;
            }
            // Prompts raised before this part was armed are not ours.
            let mut prompt = self.prompt.subscribe();
            log::debug!(">> {}", part);
            let mut bytes = encode(part);
            bytes.extend(encode(mp.part_terminator()));
            self.write(bytes);

            tokio::select! {
                _ = prompt.changed() => {}
                _ = cmd.wait() => return,
            }
        }

        let first = mp.parts()[0].as_str();
        if !self.dispatcher().begin_final_part(&cmd, first) {
            return;
        }
        log::debug!(">> {} <ctrl-z>", last);
        let mut bytes = encode(last);
        bytes.push(mp.final_terminator());
        self.write(bytes);
    }

    fn finish(self: &Arc<Self>, cmd: Arc<Command>, response: ModemResponse) {
        log::debug!("{:?} -> {}", cmd.text(), response.result());
        cmd.complete(response);
        self.dispatcher().splice_chain(&cmd);

        if cmd.is_unsolicited() {
            if let Some(r) = cmd.response() {
                self.emit(ModemEvent::ResponseReceived(r.clone()));
            }
            return;
        }

        let weak = Arc::downgrade(self);
        let settle = Duration::from_millis(self.config.settle_delay_ms);
        self.spawn(async move {
            tokio::time::sleep(settle).await;
            if let Some(inner) = weak.upgrade() {
                let effects = inner.dispatcher().advance(&cmd);
                inner.apply(effects);
            }
        });
    }

    // ── Modem-level handlers ─────────────────────────────────────────

    /// Wrap a handler so the command does not keep the modem alive.
    fn handler<F>(self: &Arc<Self>, f: F) -> impl FnOnce(&Response) + Send + 'static
    where
        F: FnOnce(&Arc<ModemInner>, &Response) + Send + 'static,
    {
        let weak: Weak<ModemInner> = Arc::downgrade(self);
        move |response: &Response| {
            if let Some(inner) = weak.upgrade() {
                f(&inner, response)
            }
        }
    }

    fn queue_sim_identity(self: &Arc<Self>) {
        let cmd = commands::sim_identity()
            .on_response(self.handler(|inner, r| inner.on_sim_identity(r)));
        self.enqueue(cmd);
    }

    fn on_probe_indicators(self: &Arc<Self>, response: &Response) {
        let notify_lost = {
            let mut h = lock(&self.health);
            h.probe_outstanding = false;
            if response.is_ok() {
                h.missed_probes = 0;
                h.lost_raised = false;
                false
            } else {
                h.missed(self.config.missed_probe_limit)
            }
        };
        if notify_lost {
            self.emit(ModemEvent::CommunicationLost);
        }
        self.on_indicators(response);
    }

    fn on_indicators(self: &Arc<Self>, response: &Response) {
        let Response::Indicators(r) = response else {
            return;
        };
        let Some(indicators) = r.indicators() else {
            return;
        };
        let refresh = Duration::from_secs(self.config.indicators_refresh_secs);
        let (raise, query_imsi) = {
            let mut h = lock(&self.health);
            let stale = h
                .indicators_raised_at
                .map_or(true, |at| at.elapsed() >= refresh);
            let raise = h.indicators != Some(indicators) || stale;
            if raise {
                h.indicators = Some(indicators);
                h.indicators_raised_at = Some(Instant::now());
            }
            let query_imsi = h.imsi.is_none() && indicators.in_service && !h.imsi_pending;
            if query_imsi {
                h.imsi_pending = true;
            }
            (raise, query_imsi)
        };
        if raise {
            self.emit(ModemEvent::IndicatorsChanged(indicators));
        }
        if query_imsi {
            self.queue_sim_identity();
        }
    }

    fn on_signal_quality(self: &Arc<Self>, response: &Response) {
        let Response::SignalQuality(r) = response else {
            return;
        };
        let Some(signal) = r.signal_quality() else {
            return;
        };
        let (changed, query_imsi) = {
            let mut h = lock(&self.health);
            let changed = h.signal != Some(signal);
            if changed {
                h.signal = Some(signal);
            }
            let query_imsi = h.imsi.is_none() && !h.imsi_pending;
            if query_imsi {
                h.imsi_pending = true;
            }
            (changed, query_imsi)
        };
        if changed {
            self.emit(ModemEvent::SignalQualityChanged(signal));
        }
        if query_imsi {
            self.queue_sim_identity();
        }
    }

    fn on_imei(&self, response: &Response) {
        if let Response::Imei(r) = response {
            if let Some(imei) = r.value() {
                log::info!("modem IMEI {}", imei);
                lock(&self.health).imei = Some(imei.to_string());
            }
        }
    }

    fn on_sim_identity(&self, response: &Response) {
        let mut h = lock(&self.health);
        h.imsi_pending = false;
        if let Response::SimIdentity(r) = response {
            if let Some(imsi) = r.value() {
                log::info!("SIM IMSI {}", imsi);
                h.imsi = Some(imsi.to_string());
            }
        }
    }

    fn on_clock(&self, response: &Response) {
        let Response::Clock(r) = response else {
            return;
        };
        let Some(modem_time) = r.time() else {
            return;
        };
        let host_time = chrono::Local::now().naive_local();
        let drift = (host_time - modem_time).num_seconds().abs();
        if drift > self.config.clock_drift_warn_secs {
            log::warn!(
                "modem clock {} is {}s off host clock {}",
                modem_time,
                drift,
                host_time.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    fn probe_tick(self: &Arc<Self>) {
        let notify_lost = {
            let mut h = lock(&self.health);
            if h.probe_outstanding {
                Some(h.missed(self.config.missed_probe_limit))
            } else {
                h.probe_outstanding = true;
                None
            }
        };
        match notify_lost {
            Some(true) => self.emit(ModemEvent::CommunicationLost),
            Some(false) => {}
            None => {
                let ind = commands::indicators()
                    .on_response(self.handler(|inner, r| inner.on_probe_indicators(r)));
                let csq = commands::signal_quality()
                    .on_response(self.handler(|inner, r| inner.on_signal_quality(r)));
                self.enqueue(ind);
                self.enqueue(csq);
            }
        }
    }

    fn bootstrap(self: &Arc<Self>) {
        for cmd in commands::bootstrap() {
            let text = cmd.text().to_string();
            let cmd = match text.as_str() {
                commands::AtCommands::SIGNAL_QUALITY => {
                    cmd.on_response(self.handler(|inner, r| inner.on_signal_quality(r)))
                }
                commands::AtCommands::CLOCK => {
                    cmd.on_response(self.handler(|inner, r| inner.on_clock(r)))
                }
                commands::AtCommands::IMEI => {
                    cmd.on_response(self.handler(|inner, r| inner.on_imei(r)))
                }
                _ => cmd,
            };
            self.enqueue(cmd);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Background tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn receive_loop(
    weak: Weak<ModemInner>,
    transport: Arc<dyn SerialTransport>,
    mut shutdown: watch::Receiver<bool>,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        if weak.strong_count() == 0 {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            result = transport.read(&mut buf) => match result {
                Ok(0) => {}
                Ok(n) => {
                    let Some(inner) = weak.upgrade() else { break };
                    log::trace!("rx {} bytes", n);
                    let effects = inner.dispatcher().on_bytes(&buf[..n]);
                    inner.apply(effects);
                }
                Err(e) => {
                    if !transport.is_open() {
                        break;
                    }
                    log::warn!("read from {} failed: {}", transport.port_name(), e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    log::debug!("receive loop for {} stopped", transport.port_name());
}

async fn write_loop(transport: Arc<dyn SerialTransport>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = transport.write(&bytes).await {
            log::warn!("write to {} failed: {}", transport.port_name(), e);
            continue;
        }
        if let Err(e) = transport.flush().await {
            log::warn!("flush of {} failed: {}", transport.port_name(), e);
        }
    }
}

async fn probe_loop(weak: Weak<ModemInner>, mut shutdown: watch::Receiver<bool>, initial: Duration, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + initial, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let Some(inner) = weak.upgrade() else { break };
                inner.probe_tick();
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Public handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A GSM modem attached through a [`SerialTransport`].
///
/// Cheap to clone; all clones drive the same modem.
#[derive(Clone)]
pub struct Modem {
    inner: Arc<ModemInner>,
}

impl Modem {
    pub fn new(transport: Arc<dyn SerialTransport>, config: ModemConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let dispatcher = Dispatcher::new(config.max_line_length);
        Self {
            inner: Arc::new(ModemInner {
                config,
                transport,
                dispatcher: Mutex::new(dispatcher),
                health: Mutex::new(Health::default()),
                events,
                writer: Mutex::new(None),
                runtime: Mutex::new(None),
                shutdown: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                prompt: watch::channel(0).0,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Open the port, start the background tasks and queue the bootstrap
    /// sequence.  Must be called from within a tokio runtime.
    pub async fn connect(&self) -> GsmResult<()> {
        let inner = &self.inner;
        inner.config.validate()?;
        if inner.running.swap(true, Ordering::SeqCst) {
            return Err(GsmError::AlreadyConnected);
        }
        if let Err(e) = inner.transport.open(&inner.config.serial).await {
            inner.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        log::info!(
            "connected to {} ({})",
            inner.transport.port_name(),
            inner.config.serial.shorthand()
        );

        let handle = Handle::current();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *lock(&inner.runtime) = Some(handle.clone());
        *lock(&inner.writer) = Some(write_tx);
        *lock(&inner.shutdown) = Some(shutdown_tx);
        *lock(&inner.health) = Health::default();

        let mut tasks = vec![
            handle.spawn(write_loop(Arc::clone(&inner.transport), write_rx)),
            handle.spawn(receive_loop(
                Arc::downgrade(inner),
                Arc::clone(&inner.transport),
                shutdown_rx.clone(),
                inner.config.read_buffer_size,
            )),
        ];
        if inner.config.health_probe {
            tasks.push(handle.spawn(probe_loop(
                Arc::downgrade(inner),
                shutdown_rx,
                Duration::from_millis(inner.config.probe_initial_delay_ms),
                Duration::from_millis(inner.config.probe_interval_ms),
            )));
        }
        lock(&inner.tasks).extend(tasks);

        let effects = inner.dispatcher().connect();
        inner.apply(effects);
        if inner.config.bootstrap {
            inner.bootstrap();
        }
        Ok(())
    }

    /// Stop the background tasks, complete every queued command with an
    /// `Unknown` result and close the port.
    pub async fn disconnect(&self) -> GsmResult<()> {
        let inner = &self.inner;
        if !inner.running.swap(false, Ordering::SeqCst) {
            return Err(GsmError::NotConnected);
        }
        if let Some(tx) = lock(&inner.shutdown).take() {
            let _ = tx.send(true);
        }
        lock(&inner.writer).take();

        let abandoned = inner.dispatcher().shutdown();
        for (cmd, response) in abandoned {
            cmd.complete(response);
        }

        let tasks: Vec<JoinHandle<()>> = lock(&inner.tasks).drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        lock(&inner.runtime).take();
        inner.transport.close().await?;
        log::info!("disconnected from {}", inner.transport.port_name());
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Queue a command.  It goes out once everything ahead of it is done.
    pub fn enqueue(&self, cmd: Command) -> Arc<Command> {
        self.inner.enqueue(cmd)
    }

    /// Queue a command and wait for its response.
    pub async fn execute(&self, cmd: Command) -> GsmResult<Response> {
        if !self.is_connected() {
            return Err(GsmError::NotConnected);
        }
        Ok(self.enqueue(cmd).wait().await)
    }

    /// Like [`execute`](Self::execute) but gives up waiting after
    /// `timeout`.  The command itself stays queued.
    pub async fn execute_timeout(&self, cmd: Command, timeout: Duration) -> GsmResult<Response> {
        if !self.is_connected() {
            return Err(GsmError::NotConnected);
        }
        let cmd = self.enqueue(cmd);
        if cmd.wait_timeout(timeout).await {
            Ok(cmd.wait().await)
        } else {
            Err(GsmError::Timeout(cmd.text().to_string()))
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> ModemState {
        self.inner.dispatcher().state()
    }

    pub fn pending_commands(&self) -> usize {
        self.inner.dispatcher().pending()
    }

    pub fn config(&self) -> &ModemConfig {
        &self.inner.config
    }

    pub fn port_name(&self) -> &str {
        self.inner.transport.port_name()
    }

    pub fn imei(&self) -> Option<String> {
        lock(&self.inner.health).imei.clone()
    }

    pub fn imsi(&self) -> Option<String> {
        lock(&self.inner.health).imsi.clone()
    }

    /// Last indicators seen by the health probe.
    pub fn indicators(&self) -> Option<Indicators> {
        lock(&self.inner.health).indicators
    }

    pub fn signal_quality(&self) -> Option<SignalQuality> {
        lock(&self.inner.health).signal
    }

    // ── Message helpers ──────────────────────────────────────────────

    pub async fn query_signal_quality(&self) -> GsmResult<Option<SignalQuality>> {
        match self.execute(commands::signal_quality()).await? {
            Response::SignalQuality(r) => Ok(r.signal_quality()),
            _ => Ok(None),
        }
    }

    pub async fn message_storage(&self) -> GsmResult<MessageStorageResponse> {
        let response = self.execute(commands::preferred_storage()).await?;
        match response {
            Response::MessageStorage(r) => Ok(r),
            other => Ok(MessageStorageResponse::from_base(other.base().clone())),
        }
    }

    pub async fn list_messages(&self, mode: ListMode) -> GsmResult<Vec<SmsMessage>> {
        match self.execute(commands::list_messages(mode)).await? {
            Response::ListMessages(r) => Ok(r.messages().to_vec()),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn read_message(&self, index: i32) -> GsmResult<Option<SmsMessage>> {
        match self.execute(commands::read_message(index)).await? {
            Response::ReadMessage(r) => Ok(r.message().cloned()),
            _ => Ok(None),
        }
    }

    pub async fn delete_messages(&self, index: i32, mode: DeleteMode) -> GsmResult<Response> {
        self.execute(commands::delete_messages(index, mode)).await
    }

    pub async fn send_message(&self, number: &str, text: &str) -> GsmResult<Response> {
        self.execute(commands::send_message(number, text)).await
    }
}
