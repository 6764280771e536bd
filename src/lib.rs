//! # Plant DAQ Core Library
//!
//! Records one run of a microcontroller-driven motor/sensor plant. The host
//! opens a serial connection, sends `START`, waits for the device's started
//! marker, then timestamps each `<angle>,<distance>` line relative to that
//! marker and appends it to a CSV file until the device prints its end marker.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: line classification, the session state machine and the
//!   data record parser.
//! - **`timeline`**: the session's reference instant and the `Clock` seam.
//! - **`transport`**: the `LineSource` trait with serial and mock backends.
//! - **`storage`**: the `SampleSink` trait and the CSV writer.
//! - **`session`**: ties transport, interpreter and sink together for one run.
//! - **`config`**: Figment-based configuration and its validation.
//! - **`error`**: the `DaqError` enum.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`validation`**: small validators used by `config`.

pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod timeline;
pub mod transport;
pub mod validation;

pub use config::AcquisitionConfig;
pub use error::{DaqError, DaqResult, MalformedReason, MalformedRecord};
pub use protocol::{LineEvent, ProtocolInterpreter, ProtocolTokens, Sample, SessionPhase};
pub use session::{run_session, Session, SessionOutcome, SessionReport};
pub use storage::{CsvSink, SampleSink};
pub use transport::{LineSource, MockLineSource, SerialLineSource};
