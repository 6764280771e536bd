//! Scripted line source for tests and dry runs.

use super::{decode_line, LineSource};
use crate::error::{DaqError, DaqResult};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One scripted transport action.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Deliver a line (raw, before trimming).
    Line(String),
    /// Behave as if the read timeout expired.
    Timeout,
    /// Fail the read with this error kind.
    Fail(ErrorKind),
    /// Raise the interrupt flag, then time out.
    Interrupt,
}

/// Mock transport that replays a script.
///
/// Clones share state, so a test can keep a handle to inspect what the
/// session wrote after handing the source over. When the script is exhausted
/// reads fail with `UnexpectedEof`.
#[derive(Clone)]
pub struct MockLineSource {
    inner: Arc<Mutex<MockInner>>,
}

struct MockInner {
    steps: VecDeque<MockStep>,
    written: Vec<u8>,
    resets: usize,
    reads: usize,
    stop: Option<Arc<AtomicBool>>,
    writes_allowed: Option<usize>,
}

impl MockLineSource {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockInner {
                steps: VecDeque::new(),
                written: Vec::new(),
                resets: 0,
                reads: 0,
                stop: None,
                writes_allowed: None,
            })),
        }
    }

    /// Creates a script delivering `lines` in order.
    pub fn with_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let source = Self::new();
        for line in lines {
            source.push(MockStep::Line(line.into()));
        }
        source
    }

    /// Appends a step.
    pub fn push(&self, step: MockStep) {
        self.lock().steps.push_back(step);
    }

    /// Flag raised by [`MockStep::Interrupt`].
    pub fn set_stop_flag(&self, stop: Arc<AtomicBool>) {
        self.lock().stop = Some(stop);
    }

    /// Lets `count` more writes through, then fails every write with
    /// `BrokenPipe`.
    pub fn fail_writes_after(&self, count: usize) {
        self.lock().writes_allowed = Some(count);
    }

    /// Everything written so far, lossily decoded.
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.lock().written).into_owned()
    }

    /// Number of `reset_buffers` calls.
    pub fn resets(&self) -> usize {
        self.lock().resets
    }

    /// Number of `read_line` calls.
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockLineSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSource for MockLineSource {
    fn read_line(&mut self) -> DaqResult<Option<String>> {
        let mut inner = self.lock();
        inner.reads += 1;
        match inner.steps.pop_front() {
            Some(MockStep::Line(line)) => Ok(Some(decode_line(line.as_bytes()))),
            Some(MockStep::Timeout) => Ok(None),
            Some(MockStep::Fail(kind)) => Err(DaqError::transport("mock", kind)),
            Some(MockStep::Interrupt) => {
                if let Some(stop) = &inner.stop {
                    stop.store(true, Ordering::SeqCst);
                }
                Ok(None)
            }
            None => Err(DaqError::transport("mock", ErrorKind::UnexpectedEof)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> DaqResult<()> {
        let mut inner = self.lock();
        match inner.writes_allowed {
            Some(0) => return Err(DaqError::transport("mock", ErrorKind::BrokenPipe)),
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        inner.written.extend_from_slice(bytes);
        Ok(())
    }

    fn reset_buffers(&mut self) -> DaqResult<()> {
        self.lock().resets += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
