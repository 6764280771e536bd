//! Acquisition session runner.
//!
//! A [`Session`] owns one transport, one sink and one interpreter and pumps
//! lines between them until the device reports the end of the run, the
//! operator interrupts, or something fails:
//!
//! ```text
//! LineSource ──line──> ProtocolInterpreter ──Sample──> SampleSink
//! ```
//!
//! Startup matches the plant firmware: clear both serial buffers, give the
//! controller `settle_delay` to come up, then send `START`.
//!
//! Every exit path closes the sink before returning. The transport and sink
//! are owned by the session and released when [`Session::run`] returns.

use crate::config::AcquisitionConfig;
use crate::error::{DaqError, DaqResult};
use crate::protocol::{LineEvent, ProtocolInterpreter, SessionPhase, SkipReason};
use crate::storage::{create_session_file, CsvSink, SampleSink};
use crate::timeline::{Clock, MonotonicClock};
use crate::transport::{LineSource, SerialLineSource};
use chrono::Local;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

const STOP_POLL: Duration = Duration::from_millis(50);

/// How a session that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The device sent its end marker.
    Completed,
    /// The operator asked to stop.
    Interrupted,
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::Completed => write!(f, "completed"),
            SessionOutcome::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// How the session ended.
    pub outcome: SessionOutcome,
    /// Final interpreter phase.
    pub phase: SessionPhase,
    /// Non-timeout reads, including empty lines.
    pub lines_read: usize,
    /// Rows written to the sink.
    pub samples_written: usize,
    /// Data lines dropped as malformed.
    pub malformed_records: usize,
    /// Console lines ignored before synchronization.
    pub noise_lines: usize,
    /// Wall time from `run` to close.
    pub duration: Duration,
    /// Record file, when the session wrote to one.
    pub output: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Counters {
    lines_read: usize,
    malformed_records: usize,
    noise_lines: usize,
}

/// One acquisition run.
pub struct Session<S: LineSource, K: SampleSink, C: Clock = MonotonicClock> {
    source: S,
    sink: K,
    interpreter: ProtocolInterpreter<C>,
    settle_delay: Duration,
    counters: Counters,
}

impl<S: LineSource, K: SampleSink> Session<S, K, MonotonicClock> {
    /// Creates a session using `tokens` on the monotonic clock.
    pub fn new(source: S, sink: K, tokens: crate::protocol::ProtocolTokens) -> Self {
        Self::with_interpreter(source, sink, ProtocolInterpreter::new(tokens))
    }
}

impl<S: LineSource, K: SampleSink, C: Clock> Session<S, K, C> {
    /// Creates a session around an existing interpreter.
    pub fn with_interpreter(source: S, sink: K, interpreter: ProtocolInterpreter<C>) -> Self {
        Self {
            source,
            sink,
            interpreter,
            settle_delay: Duration::ZERO,
            counters: Counters::default(),
        }
    }

    /// Pause between clearing buffers and sending the start command.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Runs to completion, interruption or failure.
    ///
    /// `stop` is polled between reads; raising it sends the stop command and
    /// ends the session. Failures are returned after the sink is closed and
    /// are logged here, once. A sink that fails to close after a normal end
    /// is an error too, but the phase stays `Ended`.
    pub fn run(mut self, stop: &AtomicBool) -> DaqResult<SessionReport> {
        let span = info_span!("session", port = %self.source.name());
        let _enter = span.enter();
        let started = Instant::now();

        let acquired = self.acquire(stop);
        if acquired.is_err() {
            self.interpreter.fail();
        }
        let closed = self.sink.close();

        let outcome = match (acquired, closed) {
            (Ok(outcome), Ok(())) => outcome,
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("Sink close after failure also failed: {}", close_err);
                }
                error!(
                    phase = %self.interpreter.phase(),
                    samples = self.sink.samples_written(),
                    "Session failed: {}",
                    e
                );
                return Err(e);
            }
            // The run itself finished, so the phase stays ENDED; only the
            // record is in doubt.
            (Ok(outcome), Err(e)) => {
                error!(
                    phase = %self.interpreter.phase(),
                    samples = self.sink.samples_written(),
                    "Session {} but the record could not be closed: {}",
                    outcome,
                    e
                );
                return Err(e);
            }
        };

        let report = SessionReport {
            outcome,
            phase: self.interpreter.phase(),
            lines_read: self.counters.lines_read,
            samples_written: self.sink.samples_written(),
            malformed_records: self.counters.malformed_records,
            noise_lines: self.counters.noise_lines,
            duration: started.elapsed(),
            output: None,
        };
        info!(
            samples = report.samples_written,
            malformed = report.malformed_records,
            "Session {}. Record closed.",
            outcome
        );
        Ok(report)
    }

    fn acquire(&mut self, stop: &AtomicBool) -> DaqResult<SessionOutcome> {
        self.source.reset_buffers()?;
        if !self.settle(stop) {
            return Ok(self.interrupt());
        }

        info!("Sending '{}' command...", self.interpreter.tokens().start_command);
        let start = self.interpreter.tokens().start_frame();
        self.source.write_all(&start)?;

        loop {
            if stop.load(Ordering::SeqCst) {
                return Ok(self.interrupt());
            }
            let Some(line) = self.source.read_line()? else {
                continue;
            };
            self.counters.lines_read += 1;

            match self.interpreter.feed(&line) {
                LineEvent::Skipped(SkipReason::Empty) => {}
                LineEvent::Skipped(SkipReason::Noise) => {
                    self.counters.noise_lines += 1;
                    debug!(line = %line, "device console");
                }
                LineEvent::Skipped(SkipReason::DuplicateStart) => {
                    warn!("Repeated start marker ignored; timeline unchanged");
                }
                LineEvent::Skipped(SkipReason::SessionClosed) => {
                    return Err(DaqError::UnexpectedFailure(
                        "line delivered after session close".into(),
                    ));
                }
                LineEvent::Started => {
                    info!("Device started. Recording...");
                }
                LineEvent::Finished => {
                    info!("Device reported end of run.");
                    return Ok(SessionOutcome::Completed);
                }
                LineEvent::Sample(sample) => {
                    self.sink.write_sample(&sample)?;
                    info!(
                        "t = {:.2}s  u = {}°  v = {:.2} mm",
                        sample.elapsed_seconds, sample.input_value, sample.output_value
                    );
                }
                LineEvent::Malformed(err) => {
                    self.counters.malformed_records += 1;
                    warn!("Dropping {}", err);
                }
            }
        }
    }

    /// Sleeps for the settle delay. Returns false if `stop` was raised.
    fn settle(&self, stop: &AtomicBool) -> bool {
        let deadline = Instant::now() + self.settle_delay;
        loop {
            if stop.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(STOP_POLL.min(deadline - now));
        }
    }

    fn interrupt(&mut self) -> SessionOutcome {
        warn!("Acquisition interrupted by operator.");
        let stop_frame = self.interpreter.tokens().stop_frame();
        if let Err(e) = self.source.write_all(&stop_frame) {
            warn!("Could not send stop command: {}", e);
        }
        self.interpreter.interrupt();
        SessionOutcome::Interrupted
    }
}

/// Opens the configured serial port and session file, then runs one session.
///
/// Every failure is logged before it is returned, including a port or file
/// that cannot be opened.
pub fn run_session(config: &AcquisitionConfig, stop: &AtomicBool) -> DaqResult<SessionReport> {
    let (source, path, sink) = match open_resources(config) {
        Ok(resources) => resources,
        Err(e) => {
            error!(port = %config.port, "Session failed: {}", e);
            return Err(e);
        }
    };
    info!("Recording to '{}'. Waiting for device...", path.display());

    let mut report = Session::new(source, sink, config.protocol.clone())
        .settle_delay(config.settle_delay)
        .run(stop)?;
    report.output = Some(path);
    Ok(report)
}

// The port is opened first so a missing device leaves no empty record behind.
fn open_resources(
    config: &AcquisitionConfig,
) -> DaqResult<(SerialLineSource, PathBuf, CsvSink<File>)> {
    let source = SerialLineSource::from_config(config)?;
    let (path, sink) = create_session_file(&config.output_dir, &config.file_prefix, Local::now())?;
    Ok((source, path, sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolTokens;
    use crate::storage::CsvSink;
    use crate::timeline::ManualClock;
    use crate::transport::mock::{MockLineSource, MockStep};
    use std::io::{ErrorKind, Write};
    use std::sync::{Arc, Mutex};
    use tracing_test::traced_test;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn rows(&self) -> Vec<String> {
            let text = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            text.lines().skip(1).map(str::to_string).collect()
        }
    }

    /// Lets a fixed number of writes and flushes through, then fails them
    /// as a full disk would.
    struct FlakyBuf {
        buf: SharedBuf,
        writes_left: usize,
        flushes_left: usize,
    }

    impl Write for FlakyBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.writes_left == 0 {
                return Err(std::io::Error::other("disk full"));
            }
            self.writes_left -= 1;
            self.buf.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            if self.flushes_left == 0 {
                return Err(std::io::Error::other("disk full"));
            }
            self.flushes_left -= 1;
            Ok(())
        }
    }

    fn flaky_session(
        source: MockLineSource,
        writes: usize,
        flushes: usize,
    ) -> (Session<MockLineSource, CsvSink<FlakyBuf>, ManualClock>, SharedBuf) {
        let buf = SharedBuf::default();
        let flaky = FlakyBuf {
            buf: buf.clone(),
            writes_left: writes,
            flushes_left: flushes,
        };
        let sink = CsvSink::from_writer(flaky).unwrap();
        let interp = ProtocolInterpreter::with_clock(ProtocolTokens::default(), ManualClock::new());
        (Session::with_interpreter(source, sink, interp), buf)
    }

    fn session(
        source: MockLineSource,
    ) -> (Session<MockLineSource, CsvSink<SharedBuf>, ManualClock>, SharedBuf) {
        let buf = SharedBuf::default();
        let sink = CsvSink::from_writer(buf.clone()).unwrap();
        let interp = ProtocolInterpreter::with_clock(ProtocolTokens::default(), ManualClock::new());
        (Session::with_interpreter(source, sink, interp), buf)
    }

    #[test]
    fn sends_start_after_resetting_buffers() {
        let source = MockLineSource::with_lines(["STARTED", "END"]);
        let (session, _) = session(source.clone());
        let report = session.run(&AtomicBool::new(false)).unwrap();

        assert_eq!(source.resets(), 1);
        assert_eq!(source.written(), "START\n");
        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.phase, SessionPhase::Ended);
    }

    #[test]
    fn timeouts_are_not_lines() {
        let source = MockLineSource::new();
        source.push(MockStep::Timeout);
        source.push(MockStep::Line("STARTED".into()));
        source.push(MockStep::Timeout);
        source.push(MockStep::Line("1,1.0".into()));
        source.push(MockStep::Line("END".into()));
        let (session, buf) = session(source);

        let report = session.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(report.lines_read, 3);
        assert_eq!(report.samples_written, 1);
        assert_eq!(buf.rows(), vec!["0.0000,1,1.00"]);
    }

    #[test]
    #[traced_test]
    fn malformed_record_is_reported_and_skipped() {
        let source = MockLineSource::with_lines(["...STARTED...", "10,abc", "20,50.0", "...END..."]);
        let (session, buf) = session(source);

        let report = session.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(report.malformed_records, 1);
        assert_eq!(report.samples_written, 1);
        assert_eq!(buf.rows(), vec!["0.0000,20,50.00"]);
        assert!(logs_contain("10,abc"));
    }

    #[test]
    fn noise_before_sync_is_counted() {
        let source = MockLineSource::with_lines(["", "noise", "10,5", "STARTED", "END"]);
        let (session, buf) = session(source);

        let report = session.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(report.noise_lines, 2);
        assert_eq!(report.samples_written, 0);
        assert!(buf.rows().is_empty());
    }

    #[test]
    fn interrupt_sends_stop_and_keeps_rows() {
        let stop = Arc::new(AtomicBool::new(false));
        let source = MockLineSource::with_lines(["STARTED", "1,2.5", "2,3.5"]);
        source.set_stop_flag(stop.clone());
        source.push(MockStep::Interrupt);
        source.push(MockStep::Line("3,4.5".into()));
        let (session, buf) = session(source.clone());

        let report = session.run(&stop).unwrap();
        assert_eq!(report.outcome, SessionOutcome::Interrupted);
        assert_eq!(report.phase, SessionPhase::Ended);
        assert_eq!(report.samples_written, 2);
        assert_eq!(source.written(), "START\nEND\n");
        assert_eq!(buf.rows().len(), 2);
    }

    #[test]
    fn stop_during_settle_skips_start_command() {
        let source = MockLineSource::new();
        let (session, _) = session(source.clone());
        let stop = AtomicBool::new(true);

        let report = session
            .settle_delay(Duration::from_secs(30))
            .run(&stop)
            .unwrap();
        assert_eq!(report.outcome, SessionOutcome::Interrupted);
        assert_eq!(source.written(), "END\n");
        assert_eq!(source.reads(), 0);
    }

    #[test]
    fn failed_stop_command_still_ends_session() {
        let stop = Arc::new(AtomicBool::new(false));
        let source = MockLineSource::with_lines(["STARTED", "7,0.25"]);
        source.set_stop_flag(stop.clone());
        source.push(MockStep::Interrupt);
        source.fail_writes_after(1);
        let (session, buf) = session(source.clone());

        let report = session.run(&stop).unwrap();
        assert_eq!(report.outcome, SessionOutcome::Interrupted);
        assert_eq!(source.written(), "START\n");
        assert_eq!(buf.rows(), vec!["0.0000,7,0.25"]);
    }

    #[test]
    fn transport_failure_fails_session_and_closes_sink() {
        let source = MockLineSource::with_lines(["STARTED", "1,1.0"]);
        source.push(MockStep::Fail(ErrorKind::BrokenPipe));
        let (session, buf) = session(source);

        let err = session.run(&AtomicBool::new(false)).unwrap_err();
        match err {
            DaqError::TransportUnavailable { source, .. } => {
                assert_eq!(source.kind(), ErrorKind::BrokenPipe)
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(buf.rows(), vec!["0.0000,1,1.00"]);
    }

    #[test]
    #[traced_test]
    fn storage_failure_fails_session_and_keeps_earlier_rows() {
        let source = MockLineSource::with_lines(["STARTED", "1,1.0", "2,2.0", "3,3.0", "END"]);
        // Header and first row get through, the second row hits a full disk.
        let (session, buf) = flaky_session(source.clone(), 2, usize::MAX);

        let err = session.run(&AtomicBool::new(false)).unwrap_err();
        assert!(
            matches!(err, DaqError::Io(_) | DaqError::Storage(_)),
            "unexpected error: {:?}",
            err
        );
        assert_eq!(buf.rows(), vec!["0.0000,1,1.00"]);
        // Nothing is read after the failed write.
        assert_eq!(source.reads(), 3);
        assert!(logs_contain("phase=FAILED"));
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|l| l.contains("Session failed")).count() {
                1 => Ok(()),
                n => Err(format!("expected one failure report, found {}", n)),
            }
        });
    }

    #[test]
    #[traced_test]
    fn close_failure_after_end_is_reported_separately() {
        let source = MockLineSource::with_lines(["STARTED", "1,1.0", "END"]);
        // Flushes: header, one row, then the final close fails.
        let (session, buf) = flaky_session(source, usize::MAX, 2);

        let err = session.run(&AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, DaqError::Io(_)), "unexpected error: {:?}", err);
        assert_eq!(buf.rows(), vec!["0.0000,1,1.00"]);
        assert!(logs_contain("could not be closed"));
        assert!(logs_contain("phase=ENDED"));
        assert!(!logs_contain("Session failed"));
    }

    #[test]
    #[traced_test]
    fn missing_port_is_logged_and_creates_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = AcquisitionConfig {
            port: "/dev/plant-daq-does-not-exist".to_string(),
            output_dir: dir.path().join("runs"),
            ..AcquisitionConfig::default()
        };

        let err = run_session(&config, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, DaqError::TransportUnavailable { .. }));
        assert!(!config.output_dir.exists());
        assert!(logs_contain("Session failed"));
    }
}
