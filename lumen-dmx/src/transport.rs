//! Byte transports for the DMX driver
//!
//! `SerialTransport` talks to real hardware, `MemoryTransport` records
//! everything in memory for dry runs and tests.

use crate::frame::{PARAMETER_REPLY_LEN, START_OF_MESSAGE, GET_PARAMETERS_LABEL, END_OF_MESSAGE};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// A duplex byte link to a DMX interface
pub trait Transport: Send {
    /// Write the whole buffer
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read until `buf` is full or the link times out. Returns the number of
    /// bytes read; a timeout is not an error.
    fn read_reply(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()>;

    /// Human readable port name
    fn name(&self) -> &str;
}

impl Transport for Box<dyn Transport> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn read_reply(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_reply(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Serial port link (8N1)
pub struct SerialTransport {
    name: String,
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(name: &str, baud_rate: u32, timeout: Duration) -> io::Result<Self> {
        let port = serialport::new(name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(timeout)
            .open()
            .map_err(io::Error::from)?;
        tracing::info!(port = name, baud_rate, "serial port opened");
        Ok(Self {
            name: name.to_string(),
            port,
        })
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, bytes)
    }

    fn read_reply(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(&mut self.port)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Canned widget parameter reply (firmware 1.44, break 9, MAB 1, 40 Hz)
pub fn canned_parameter_reply() -> Vec<u8> {
    let mut reply = vec![0u8; PARAMETER_REPLY_LEN];
    reply[0] = START_OF_MESSAGE;
    reply[1] = GET_PARAMETERS_LABEL;
    reply[2] = 0x05;
    reply[4] = 44;
    reply[5] = 1;
    reply[6] = 9;
    reply[7] = 1;
    reply[8] = 40;
    reply[PARAMETER_REPLY_LEN - 1] = END_OF_MESSAGE;
    reply
}

#[derive(Debug, Default)]
struct MemoryLog {
    writes: Vec<Vec<u8>>,
    reply: Vec<u8>,
    fail_writes: bool,
    flushes: usize,
}

/// Shared view into a [`MemoryTransport`], usable after the transport has
/// been moved into a driver
#[derive(Clone, Debug)]
pub struct MemoryHandle {
    log: Arc<Mutex<MemoryLog>>,
}

impl MemoryHandle {
    /// Every write, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.log.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.log.lock().writes.len()
    }

    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.log.lock().writes.last().cloned()
    }

    pub fn flush_count(&self) -> usize {
        self.log.lock().flushes
    }

    /// Make subsequent writes fail with a broken pipe
    pub fn set_failing(&self, failing: bool) {
        self.log.lock().fail_writes = failing;
    }

    pub fn clear(&self) {
        self.log.lock().writes.clear();
    }
}

/// In-memory transport for dry runs and tests
pub struct MemoryTransport {
    name: String,
    log: Arc<Mutex<MemoryLog>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryTransport {
    /// Transport that answers the handshake with a valid parameter reply
    pub fn new(name: &str) -> Self {
        Self::with_reply(name, canned_parameter_reply())
    }

    /// Transport that answers the handshake with `reply`
    pub fn with_reply(name: &str, reply: Vec<u8>) -> Self {
        let log = MemoryLog {
            reply,
            ..MemoryLog::default()
        };
        Self {
            name: name.to_string(),
            log: Arc::new(Mutex::new(log)),
        }
    }

    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            log: self.log.clone(),
        }
    }
}

impl Transport for MemoryTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut log = self.log.lock();
        if log.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory transport failing"));
        }
        log.writes.push(bytes.to_vec());
        Ok(())
    }

    fn read_reply(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut log = self.log.lock();
        let n = log.reply.len().min(buf.len());
        buf[..n].copy_from_slice(&log.reply[..n]);
        log.reply.drain(..n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.log.lock().flushes += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
