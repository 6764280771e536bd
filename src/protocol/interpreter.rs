//! Session state machine.
//!
//! Each trimmed line from the device is classified and may move the session
//! forward. Rules are checked in this order:
//!
//! 1. empty line: ignored in every phase,
//! 2. started marker: `Init -> Running`, starts the timeline; repeated while
//!    running it is ignored and the timeline is left alone,
//! 3. end marker: `Init | Running -> Ended`,
//! 4. any other line while running: parsed as a data record,
//! 5. any other line before the started marker: console noise.
//!
//! Once the phase is terminal every line is ignored.

use super::record::{parse_record, Sample};
use super::ProtocolTokens;
use crate::error::MalformedRecord;
use crate::timeline::{Clock, MonotonicClock, Timeline};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Lifecycle phase of an acquisition session.
///
/// # State Machine
///
/// ```text
/// Init ──started──> Running ──end/interrupt──> Ended
///   │                  │
///   └──────end─────────┼──────────────────────> Ended
///                      │
///   transport failure  └──────────────────────> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Waiting for the started marker.
    Init,
    /// Timeline running, data lines accepted.
    Running,
    /// Run finished normally or by interrupt.
    Ended,
    /// Transport or resource failure.
    Failed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Init => write!(f, "INIT"),
            SessionPhase::Running => write!(f, "RUNNING"),
            SessionPhase::Ended => write!(f, "ENDED"),
            SessionPhase::Failed => write!(f, "FAILED"),
        }
    }
}

impl SessionPhase {
    /// Whether the session is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Ended | SessionPhase::Failed)
    }

    /// Whether data lines are accepted.
    pub fn accepts_data(&self) -> bool {
        matches!(self, SessionPhase::Running)
    }
}

/// Why a line produced no sample and no transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Blank after trimming.
    Empty,
    /// Non-protocol output before synchronization.
    Noise,
    /// Started marker seen while already running.
    DuplicateStart,
    /// The session already reached a terminal phase.
    SessionClosed,
}

/// Result of feeding one line to the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// Nothing happened.
    Skipped(SkipReason),
    /// The timeline started.
    Started,
    /// The device reported the end of the run.
    Finished,
    /// A data line was accepted.
    Sample(Sample),
    /// A data line was dropped.
    Malformed(MalformedRecord),
}

/// Classifies device lines and tracks the session phase.
#[derive(Debug)]
pub struct ProtocolInterpreter<C: Clock = MonotonicClock> {
    tokens: ProtocolTokens,
    phase: SessionPhase,
    timeline: Timeline<C>,
}

impl ProtocolInterpreter<MonotonicClock> {
    /// Creates an interpreter on the process monotonic clock.
    pub fn new(tokens: ProtocolTokens) -> Self {
        Self::with_clock(tokens, MonotonicClock)
    }
}

impl<C: Clock> ProtocolInterpreter<C> {
    /// Creates an interpreter reading time from `clock`.
    pub fn with_clock(tokens: ProtocolTokens, clock: C) -> Self {
        Self {
            tokens,
            phase: SessionPhase::Init,
            timeline: Timeline::new(clock),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Tokens this interpreter matches against.
    pub fn tokens(&self) -> &ProtocolTokens {
        &self.tokens
    }

    /// Feeds one line. The line is trimmed here.
    pub fn feed(&mut self, raw: &str) -> LineEvent {
        let line = raw.trim();
        if line.is_empty() {
            return LineEvent::Skipped(SkipReason::Empty);
        }
        if self.phase.is_terminal() {
            trace!(line, "ignoring line after session close");
            return LineEvent::Skipped(SkipReason::SessionClosed);
        }

        if line.contains(self.tokens.started_marker.as_str()) {
            return self.on_started();
        }
        if line.contains(self.tokens.end_marker.as_str()) {
            self.phase = SessionPhase::Ended;
            return LineEvent::Finished;
        }

        match self.phase {
            SessionPhase::Running => self.on_data(line),
            _ => {
                trace!(line, "device console output");
                LineEvent::Skipped(SkipReason::Noise)
            }
        }
    }

    /// Ends the session on operator request.
    ///
    /// Returns false if the session was already terminal.
    pub fn interrupt(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = SessionPhase::Ended;
        true
    }

    /// Marks the session failed. A session that already ended stays ended.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = SessionPhase::Failed;
        }
    }

    fn on_started(&mut self) -> LineEvent {
        match self.phase {
            SessionPhase::Init => {
                self.timeline.mark_start();
                self.phase = SessionPhase::Running;
                LineEvent::Started
            }
            _ => {
                debug!("started marker repeated, timeline kept");
                LineEvent::Skipped(SkipReason::DuplicateStart)
            }
        }
    }

    fn on_data(&mut self, line: &str) -> LineEvent {
        let (input, output) = match parse_record(line) {
            Ok(pair) => pair,
            Err(err) => return LineEvent::Malformed(err),
        };
        match self.timeline.elapsed() {
            Some(elapsed) => LineEvent::Sample(Sample::new(elapsed, input, output)),
            // Running is only entered through mark_start.
            None => LineEvent::Skipped(SkipReason::Noise),
        }
    }
}
