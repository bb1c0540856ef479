//! # SortOfRemote NG – GSM Modem
//!
//! AT-command control of GSM modems attached over a serial line:
//!
//! - **Transport** – async serial transport trait with an in-memory simulator
//!   and a `serialport`-backed implementation (38400 8N1 by default)
//! - **Framing** – CR-delimited line framing with `>` prompt detection
//! - **Command Queue** – one command in flight, chained follow-ups,
//!   multipart text entry, optional dispatch timeouts
//! - **Result Codes** – primitive codes plus interned `+CME`/`+CMS` failures
//! - **Typed Responses** – signal quality, indicators, storage, SMS read/list,
//!   identity, clock
//! - **Health Probe** – periodic indicators / signal polling with change and
//!   communication-lost events

pub mod gsm;
