//! `serialport`-backed line source.

use super::{decode_line, LineSource};
use crate::config::AcquisitionConfig;
use crate::error::{DaqError, DaqResult};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 256;

/// Longest line kept while waiting for `\n`. The plant prints short lines;
/// anything longer is line noise, usually a baud rate mismatch.
pub const MAX_LINE_LEN: usize = 4096;

/// Serial port yielding newline-terminated lines.
///
/// Bytes are buffered until `\n`. A partial line that straddles a read
/// timeout is kept and completed by the next call. The port timeout bounds
/// the whole `read_line` call, not each underlying read, so a device that
/// streams bytes without newlines still hands control back to the session.
pub struct SerialLineSource {
    port_name: String,
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
    // Set after an overlong line was dropped; bytes up to the next `\n`
    // belong to it and are dropped too.
    discarding: bool,
}

impl SerialLineSource {
    /// Opens `port_name` at `baud_rate` with 8N1 framing and no flow control.
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> DaqResult<Self> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| DaqError::transport(port_name, e))?;

        debug!(port = port_name, baud_rate, ?timeout, "serial port opened");
        Ok(Self::from_port(port_name, port))
    }

    /// Opens the port described by `config`.
    pub fn from_config(config: &AcquisitionConfig) -> DaqResult<Self> {
        Self::open(&config.port, config.baud_rate, config.read_timeout)
    }

    /// Wraps an already opened port.
    pub fn from_port(port_name: &str, port: Box<dyn SerialPort>) -> Self {
        Self {
            port_name: port_name.to_string(),
            port,
            pending: Vec::new(),
            discarding: false,
        }
    }

    fn take_line(&mut self) -> Option<String> {
        loop {
            let end = self.pending.iter().position(|&b| b == b'\n')?;
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            return Some(decode_line(&raw));
        }
    }

    fn enforce_line_limit(&mut self) {
        if self.pending.len() <= MAX_LINE_LEN {
            return;
        }
        if !self.discarding {
            warn!(
                port = %self.port_name,
                bytes = self.pending.len(),
                "Dropping line longer than {} bytes (check the baud rate)",
                MAX_LINE_LEN
            );
        }
        self.pending.clear();
        self.discarding = true;
    }
}

impl LineSource for SerialLineSource {
    fn read_line(&mut self) -> DaqResult<Option<String>> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        let deadline = Instant::now() + self.port.timeout();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.port.read(&mut chunk) {
                Ok(0) => {
                    return Err(DaqError::transport(
                        &self.port_name,
                        std::io::Error::from(ErrorKind::UnexpectedEof),
                    ))
                }
                Ok(n) => {
                    trace!(port = %self.port_name, bytes = n, "serial read");
                    self.pending.extend_from_slice(&chunk[..n]);
                    if let Some(line) = self.take_line() {
                        return Ok(Some(line));
                    }
                    self.enforce_line_limit();
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    return Ok(None)
                }
                Err(e) => return Err(DaqError::transport(&self.port_name, e)),
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> DaqResult<()> {
        trace!(
            port = %self.port_name,
            command = %String::from_utf8_lossy(bytes).escape_default(),
            "serial write"
        );
        self.port
            .write_all(bytes)
            .and_then(|_| self.port.flush())
            .map_err(|e| DaqError::transport(&self.port_name, e))
    }

    fn reset_buffers(&mut self) -> DaqResult<()> {
        self.pending.clear();
        self.discarding = false;
        self.port
            .clear(ClearBuffer::All)
            .map_err(|e| DaqError::transport(&self.port_name, e))
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

/// Serial ports visible to the operating system.
pub fn list_ports() -> DaqResult<Vec<serialport::SerialPortInfo>> {
    serialport::available_ports().map_err(|e| DaqError::transport("<enumerate>", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{mpsc, Arc, Mutex};

    /// In-memory port. Queued bytes are returned as they are available, an
    /// empty queue times out. With `chatter` set it never runs dry and keeps
    /// returning that byte every millisecond.
    struct FakePort {
        queued: Arc<Mutex<VecDeque<u8>>>,
        chatter: Option<u8>,
        timeout: Duration,
    }

    impl FakePort {
        fn boxed(queued: &Arc<Mutex<VecDeque<u8>>>, timeout: Duration) -> Box<dyn SerialPort> {
            Box::new(FakePort {
                queued: queued.clone(),
                chatter: None,
                timeout,
            })
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(byte) = self.chatter {
                std::thread::sleep(Duration::from_millis(1));
                buf[0] = byte;
                return Ok(1);
            }
            let mut queued = self.queued.lock().unwrap();
            if queued.is_empty() {
                return Err(ErrorKind::TimedOut.into());
            }
            let n = buf.len().min(queued.len());
            for (slot, byte) in buf.iter_mut().zip(queued.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SerialPort for FakePort {
        fn name(&self) -> Option<String> {
            Some("fake".to_string())
        }
        fn baud_rate(&self) -> serialport::Result<u32> {
            Ok(115_200)
        }
        fn data_bits(&self) -> serialport::Result<DataBits> {
            Ok(DataBits::Eight)
        }
        fn flow_control(&self) -> serialport::Result<FlowControl> {
            Ok(FlowControl::None)
        }
        fn parity(&self) -> serialport::Result<Parity> {
            Ok(Parity::None)
        }
        fn stop_bits(&self) -> serialport::Result<StopBits> {
            Ok(StopBits::One)
        }
        fn timeout(&self) -> Duration {
            self.timeout
        }
        fn set_baud_rate(&mut self, _: u32) -> serialport::Result<()> {
            Ok(())
        }
        fn set_data_bits(&mut self, _: DataBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_flow_control(&mut self, _: FlowControl) -> serialport::Result<()> {
            Ok(())
        }
        fn set_parity(&mut self, _: Parity) -> serialport::Result<()> {
            Ok(())
        }
        fn set_stop_bits(&mut self, _: StopBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()> {
            self.timeout = timeout;
            Ok(())
        }
        fn write_request_to_send(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn write_data_terminal_ready(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn bytes_to_read(&self) -> serialport::Result<u32> {
            Ok(self.queued.lock().unwrap().len() as u32)
        }
        fn bytes_to_write(&self) -> serialport::Result<u32> {
            Ok(0)
        }
        fn clear(&self, _: ClearBuffer) -> serialport::Result<()> {
            self.queued.lock().unwrap().clear();
            Ok(())
        }
        fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
            Err(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "fake port cannot be cloned",
            ))
        }
        fn set_break(&self) -> serialport::Result<()> {
            Ok(())
        }
        fn clear_break(&self) -> serialport::Result<()> {
            Ok(())
        }
    }

    fn queue(bytes: &[u8]) -> Arc<Mutex<VecDeque<u8>>> {
        Arc::new(Mutex::new(bytes.iter().copied().collect()))
    }

    #[test]
    fn endless_bytes_without_newline_still_time_out() {
        let port = Box::new(FakePort {
            queued: queue(b""),
            chatter: Some(b'x'),
            timeout: Duration::from_millis(10),
        });
        let mut source = SerialLineSource::from_port("fake", port);

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = source.read_line().map_err(|e| e.to_string());
            let _ = tx.send((result, source.pending.len()));
        });

        let (result, pending) = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("read_line must return once the port timeout has passed");
        assert_eq!(result, Ok(None));
        assert!(pending > 0 && pending <= MAX_LINE_LEN);
    }

    #[test]
    fn partial_line_survives_a_timeout() {
        let queued = queue(b"STAR");
        let mut source =
            SerialLineSource::from_port("fake", FakePort::boxed(&queued, Duration::from_millis(10)));

        assert_eq!(source.read_line().unwrap(), None);
        queued.lock().unwrap().extend(b"TED\r\n10,1.5\n");
        assert_eq!(source.read_line().unwrap().as_deref(), Some("STARTED"));
        assert_eq!(source.read_line().unwrap().as_deref(), Some("10,1.5"));
        assert_eq!(source.read_line().unwrap(), None);
    }

    #[test]
    fn overlong_line_is_dropped_up_to_its_newline() {
        let mut bytes = vec![b'x'; MAX_LINE_LEN + 1000];
        bytes.extend_from_slice(b"yyy\n20,98.70\n");
        let queued = queue(&bytes);
        let mut source =
            SerialLineSource::from_port("fake", FakePort::boxed(&queued, Duration::from_secs(1)));

        assert_eq!(source.read_line().unwrap().as_deref(), Some("20,98.70"));
        assert!(source.pending.is_empty());
        assert!(!source.discarding);
    }

    #[test]
    fn reset_clears_partial_line() {
        let queued = queue(b"garbage");
        let mut source =
            SerialLineSource::from_port("fake", FakePort::boxed(&queued, Duration::from_millis(10)));

        assert_eq!(source.read_line().unwrap(), None);
        source.reset_buffers().unwrap();
        queued.lock().unwrap().extend(b"END\n");
        assert_eq!(source.read_line().unwrap().as_deref(), Some("END"));
    }

    #[test]
    fn opening_a_missing_port_is_transport_unavailable() {
        let err = SerialLineSource::open(
            "/dev/plant-daq-does-not-exist",
            115_200,
            Duration::from_millis(10),
        )
        .err()
        .unwrap();
        match err {
            DaqError::TransportUnavailable { port, .. } => {
                assert_eq!(port, "/dev/plant-daq-does-not-exist")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
