//! Line protocol spoken by the plant controller.
//!
//! The device prints human-readable console output over serial. Three kinds
//! of line matter:
//!
//! - a line containing the **started** marker (default `STARTED`), printed
//!   when the motion/measurement run begins,
//! - a line containing the **end** marker (default `END`), printed when the
//!   run is over,
//! - data lines of the form `<integer>,<real>` between the two.
//!
//! Everything else is console noise. The host drives the run with a single
//! command line (`START\n`) and may ask the device to stop early with the stop
//! command (`END\n`).

pub mod interpreter;
pub mod record;

pub use interpreter::{LineEvent, ProtocolInterpreter, SessionPhase, SkipReason};
pub use record::{parse_record, Sample};

use serde::{Deserialize, Serialize};

/// Command and marker tokens for one device firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolTokens {
    /// Command sent once to begin the run.
    pub start_command: String,
    /// Command sent on operator interrupt.
    pub stop_command: String,
    /// Substring that marks the start of measurement.
    pub started_marker: String,
    /// Substring that marks the end of the run.
    pub end_marker: String,
}

impl Default for ProtocolTokens {
    fn default() -> Self {
        Self {
            start_command: "START".to_string(),
            stop_command: "END".to_string(),
            started_marker: "STARTED".to_string(),
            end_marker: "END".to_string(),
        }
    }
}

impl ProtocolTokens {
    /// Wire bytes of the start command.
    pub fn start_frame(&self) -> Vec<u8> {
        frame(&self.start_command)
    }

    /// Wire bytes of the stop command.
    pub fn stop_frame(&self) -> Vec<u8> {
        frame(&self.stop_command)
    }
}

fn frame(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + 1);
    bytes.extend_from_slice(command.as_bytes());
    bytes.push(b'\n');
    bytes
}
