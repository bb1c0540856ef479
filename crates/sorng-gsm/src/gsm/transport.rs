//! Serial transport abstraction.
//!
//! The modem engine only talks to a [`SerialTransport`].  Two back-ends are
//! provided: [`SimulatedTransport`], an in-memory port for tests, and
//! [`SerialPortTransport`], which drives a real device through the
//! `serialport` crate with its blocking calls moved onto the blocking pool.

use crate::gsm::error::{GsmError, GsmResult};
use crate::gsm::types::*;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Platform-agnostic serial transport.
///
/// Implementations must be `Send + Sync`: the modem reads from one task and
/// writes from another through a shared `Arc`.
#[async_trait::async_trait]
pub trait SerialTransport: Send + Sync {
    /// Open the port with the given configuration.
    async fn open(&self, config: &SerialConfig) -> GsmResult<()>;

    /// Close the port.
    async fn close(&self) -> GsmResult<()>;

    /// Read up to `buf.len()` bytes.  `Ok(0)` means nothing arrived within
    /// the port's read timeout.
    async fn read(&self, buf: &mut [u8]) -> GsmResult<usize>;

    /// Write all bytes in `buf`.
    async fn write(&self, buf: &[u8]) -> GsmResult<usize>;

    /// Flush pending output.
    async fn flush(&self) -> GsmResult<()>;

    /// Set DTR (Data Terminal Ready).
    async fn set_dtr(&self, state: bool) -> GsmResult<()>;

    /// Set RTS (Request To Send).
    async fn set_rts(&self, state: bool) -> GsmResult<()>;

    /// Apply new line settings to an open port.
    async fn reconfigure(&self, config: &SerialConfig) -> GsmResult<()>;

    fn is_open(&self) -> bool;

    fn port_name(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Simulated transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully in-memory transport.  Tests push modem output with
/// [`inject_rx`](Self::inject_rx) and inspect what the host wrote with
/// [`drain_tx`](Self::drain_tx).
pub struct SimulatedTransport {
    name: String,
    open: AtomicBool,
    config: Mutex<SerialConfig>,
    rx_buf: Mutex<VecDeque<u8>>,
    tx_buf: Mutex<VecDeque<u8>>,
    control_lines: Mutex<ControlLines>,
    rx_notify: Notify,
    tx_notify: Notify,
    loopback: AtomicBool,
}

impl SimulatedTransport {
    pub fn new(port_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: port_name.into(),
            open: AtomicBool::new(false),
            config: Mutex::new(SerialConfig::default()),
            rx_buf: Mutex::new(VecDeque::with_capacity(4096)),
            tx_buf: Mutex::new(VecDeque::with_capacity(4096)),
            control_lines: Mutex::new(ControlLines::default()),
            rx_notify: Notify::new(),
            tx_notify: Notify::new(),
            loopback: AtomicBool::new(false),
        })
    }

    /// Echo everything written straight back, the way a modem in `ATE1`
    /// mode does.
    pub fn set_loopback(&self, enabled: bool) {
        self.loopback.store(enabled, Ordering::SeqCst);
    }

    /// Simulate bytes arriving from the modem.
    pub async fn inject_rx(&self, data: &[u8]) {
        let mut buf = self.rx_buf.lock().await;
        buf.extend(data);
        self.rx_notify.notify_waiters();
    }

    /// Take everything the host has written so far.
    pub async fn drain_tx(&self) -> Vec<u8> {
        let mut buf = self.tx_buf.lock().await;
        buf.drain(..).collect()
    }

    pub async fn peek_tx(&self) -> Vec<u8> {
        let buf = self.tx_buf.lock().await;
        buf.iter().copied().collect()
    }

    pub async fn control_lines(&self) -> ControlLines {
        *self.control_lines.lock().await
    }

    pub async fn current_config(&self) -> SerialConfig {
        self.config.lock().await.clone()
    }

    /// Wait until the undrained transmit buffer contains `needle`.
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_tx(&self, needle: &[u8], timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.tx_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if contains(&self.peek_tx().await, needle) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }

    fn ensure_open(&self) -> GsmResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GsmError::PortNotOpen(self.name.clone()))
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

#[async_trait::async_trait]
impl SerialTransport for SimulatedTransport {
    async fn open(&self, config: &SerialConfig) -> GsmResult<()> {
        if self.open.load(Ordering::SeqCst) {
            return Err(GsmError::PortAlreadyOpen(self.name.clone()));
        }
        *self.config.lock().await = config.clone();
        self.open.store(true, Ordering::SeqCst);

        let mut cl = self.control_lines.lock().await;
        cl.dtr = config.dtr_on_open;
        cl.rts = config.rts_on_open;
        Ok(())
    }

    async fn close(&self) -> GsmResult<()> {
        self.open.store(false, Ordering::SeqCst);
        *self.control_lines.lock().await = ControlLines::default();
        self.rx_notify.notify_waiters();
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> GsmResult<usize> {
        self.ensure_open()?;
        let mut rx = self.rx_buf.lock().await;
        if rx.is_empty() {
            drop(rx);
            tokio::select! {
                _ = self.rx_notify.notified() => {},
                _ = tokio::time::sleep(Duration::from_millis(50)) => {},
            }
            rx = self.rx_buf.lock().await;
        }
        let count = buf.len().min(rx.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    async fn write(&self, buf: &[u8]) -> GsmResult<usize> {
        self.ensure_open()?;
        self.tx_buf.lock().await.extend(buf);
        self.tx_notify.notify_waiters();

        if self.loopback.load(Ordering::SeqCst) {
            self.inject_rx(buf).await;
        }
        Ok(buf.len())
    }

    async fn flush(&self) -> GsmResult<()> {
        Ok(())
    }

    async fn set_dtr(&self, state: bool) -> GsmResult<()> {
        self.control_lines.lock().await.dtr = state;
        Ok(())
    }

    async fn set_rts(&self, state: bool) -> GsmResult<()> {
        self.control_lines.lock().await.rts = state;
        Ok(())
    }

    async fn reconfigure(&self, config: &SerialConfig) -> GsmResult<()> {
        self.ensure_open()?;
        *self.config.lock().await = config.clone();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Hardware transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type PortSlot = Arc<std::sync::Mutex<Option<Box<dyn serialport::SerialPort>>>>;

/// A real serial device opened through the `serialport` crate.
///
/// The device handle is cloned on open so that a read blocked in the
/// driver never holds up a write.
pub struct SerialPortTransport {
    name: String,
    open: AtomicBool,
    reader: PortSlot,
    writer: PortSlot,
}

impl SerialPortTransport {
    pub fn new(port_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: port_name.into(),
            open: AtomicBool::new(false),
            reader: Arc::new(std::sync::Mutex::new(None)),
            writer: Arc::new(std::sync::Mutex::new(None)),
        })
    }

    /// Run `f` against the write handle on the blocking pool.
    async fn with_writer<T, F>(&self, f: F) -> GsmResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn serialport::SerialPort) -> GsmResult<T> + Send + 'static,
    {
        let slot = Arc::clone(&self.writer);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| GsmError::SerialPort("write handle poisoned".into()))?;
            let port = guard.as_mut().ok_or(GsmError::PortNotOpen(name))?;
            f(port.as_mut())
        })
        .await
        .map_err(join_error)?
    }
}

fn join_error(e: tokio::task::JoinError) -> GsmError {
    GsmError::Io(std::io::Error::new(ErrorKind::Other, e))
}

fn map_data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn map_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn map_stop_bits(stop: StopBits) -> serialport::StopBits {
    match stop {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn map_flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::XonXoff => serialport::FlowControl::Software,
        FlowControl::RtsCts => serialport::FlowControl::Hardware,
    }
}

#[async_trait::async_trait]
impl SerialTransport for SerialPortTransport {
    async fn open(&self, config: &SerialConfig) -> GsmResult<()> {
        if self.open.load(Ordering::SeqCst) {
            return Err(GsmError::PortAlreadyOpen(self.name.clone()));
        }
        let builder = serialport::new(self.name.clone(), config.baud_rate)
            .data_bits(map_data_bits(config.data_bits))
            .parity(map_parity(config.parity))
            .stop_bits(map_stop_bits(config.stop_bits))
            .flow_control(map_flow_control(config.flow_control))
            .timeout(Duration::from_millis(config.read_timeout_ms));
        let (dtr, rts) = (config.dtr_on_open, config.rts_on_open);

        let (reader, writer) = tokio::task::spawn_blocking(move || -> GsmResult<_> {
            let mut port = builder.open()?;
            port.write_data_terminal_ready(dtr)?;
            port.write_request_to_send(rts)?;
            let writer = port.try_clone()?;
            Ok((port, writer))
        })
        .await
        .map_err(join_error)??;

        *self
            .reader
            .lock()
            .map_err(|_| GsmError::SerialPort("read handle poisoned".into()))? = Some(reader);
        *self
            .writer
            .lock()
            .map_err(|_| GsmError::SerialPort("write handle poisoned".into()))? = Some(writer);
        self.open.store(true, Ordering::SeqCst);
        log::debug!("opened {} at {}", self.name, config.shorthand());
        Ok(())
    }

    async fn close(&self) -> GsmResult<()> {
        self.open.store(false, Ordering::SeqCst);
        let reader = Arc::clone(&self.reader);
        let writer = Arc::clone(&self.writer);
        // A blocked read releases its handle within one read timeout.
        tokio::task::spawn_blocking(move || {
            if let Ok(mut w) = writer.lock() {
                w.take();
            }
            if let Ok(mut r) = reader.lock() {
                r.take();
            }
        })
        .await
        .map_err(join_error)?;
        log::debug!("closed {}", self.name);
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> GsmResult<usize> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(GsmError::PortNotOpen(self.name.clone()));
        }
        let slot = Arc::clone(&self.reader);
        let name = self.name.clone();
        let len = buf.len();
        let chunk = tokio::task::spawn_blocking(move || -> GsmResult<Vec<u8>> {
            let mut guard = slot
                .lock()
                .map_err(|_| GsmError::SerialPort("read handle poisoned".into()))?;
            let port = guard.as_mut().ok_or(GsmError::PortNotOpen(name))?;
            let mut tmp = vec![0u8; len];
            match port.read(&mut tmp) {
                Ok(n) => {
                    tmp.truncate(n);
                    Ok(tmp)
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(join_error)??;

        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    async fn write(&self, buf: &[u8]) -> GsmResult<usize> {
        let data = buf.to_vec();
        self.with_writer(move |port| {
            port.write_all(&data)?;
            Ok(data.len())
        })
        .await
    }

    async fn flush(&self) -> GsmResult<()> {
        self.with_writer(|port| Ok(port.flush()?)).await
    }

    async fn set_dtr(&self, state: bool) -> GsmResult<()> {
        self.with_writer(move |port| Ok(port.write_data_terminal_ready(state)?))
            .await
    }

    async fn set_rts(&self, state: bool) -> GsmResult<()> {
        self.with_writer(move |port| Ok(port.write_request_to_send(state)?))
            .await
    }

    async fn reconfigure(&self, config: &SerialConfig) -> GsmResult<()> {
        let config = config.clone();
        self.with_writer(move |port| {
            port.set_baud_rate(config.baud_rate)?;
            port.set_data_bits(map_data_bits(config.data_bits))?;
            port.set_parity(map_parity(config.parity))?;
            port.set_stop_bits(map_stop_bits(config.stop_bits))?;
            port.set_flow_control(map_flow_control(config.flow_control))?;
            Ok(())
        })
        .await
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}
