//! Enttec Pro compatible DMX driver
//!
//! Owns one universe buffer and a transport. Individual channel setters
//! transmit immediately; the render loop instead edits the buffer through
//! [`DmxDriver::frame_mut`] and calls [`DmxDriver::flush`] once per tick.

use crate::frame::{DmxFrame, PACKET_LEN, PARAMETER_REPLY_LEN, PARAMETER_REQUEST, START_OF_MESSAGE, GET_PARAMETERS_LABEL};
use crate::transport::Transport;
use thiserror::Error;

/// Errors raised by the DMX layer
#[derive(Error, Debug)]
pub enum DmxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No DMX interface found (available ports: {})", format_ports(.ports))]
    DeviceNotFound { ports: Vec<String> },
    #[error("DMX connection failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("Channel and value counts differ ({channels} vs {values})")]
    LengthMismatch { channels: usize, values: usize },
    #[error("DMX driver is closed")]
    Closed,
}

fn format_ports(ports: &[String]) -> String {
    if ports.is_empty() {
        "none".to_string()
    } else {
        ports.join(", ")
    }
}

/// Parameters reported by the widget during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidgetParameters {
    pub firmware: (u8, u8),
    pub break_time: u8,
    pub mab_time: u8,
    pub output_rate: u8,
}

impl WidgetParameters {
    /// Parse a parameter reply, `None` when it is short or mislabelled
    pub fn parse(reply: &[u8]) -> Option<Self> {
        if reply.len() < PARAMETER_REPLY_LEN
            || reply[0] != START_OF_MESSAGE
            || reply[1] != GET_PARAMETERS_LABEL
        {
            return None;
        }
        Some(Self {
            firmware: (reply[5], reply[4]),
            break_time: reply[6],
            mab_time: reply[7],
            output_rate: reply[8],
        })
    }
}

pub struct DmxDriver {
    transport: Option<Box<dyn Transport>>,
    port_name: String,
    frame: DmxFrame,
    parameters: Option<WidgetParameters>,
    packet: [u8; PACKET_LEN],
    frames_sent: u64,
}

impl std::fmt::Debug for DmxDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmxDriver")
            .field("port", &self.port_name)
            .field("open", &self.transport.is_some())
            .field("frames_sent", &self.frames_sent)
            .finish()
    }
}

impl DmxDriver {
    /// Take ownership of a transport and run the parameter handshake
    ///
    /// A missing or malformed reply is logged; only transport errors fail.
    pub fn open(mut transport: Box<dyn Transport>) -> Result<Self, DmxError> {
        let port_name = transport.name().to_string();

        transport.write_all(&PARAMETER_REQUEST)?;
        transport.flush()?;
        let mut reply = [0u8; PARAMETER_REPLY_LEN];
        let read = transport.read_reply(&mut reply)?;

        let parameters = if read == PARAMETER_REPLY_LEN {
            WidgetParameters::parse(&reply)
        } else {
            None
        };
        match parameters {
            Some(p) => tracing::info!(
                port = %port_name,
                firmware = %format!("{}.{}", p.firmware.0, p.firmware.1),
                break_us = p.break_time,
                mab_us = p.mab_time,
                "DMX widget parameters received"
            ),
            None => tracing::warn!(
                port = %port_name,
                bytes = read,
                "could not read widget parameters, continuing"
            ),
        }

        Ok(Self {
            transport: Some(transport),
            port_name,
            frame: DmxFrame::new(),
            parameters,
            packet: [0; PACKET_LEN],
            frames_sent: 0,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Parameters from the handshake, when the widget answered
    pub fn parameters(&self) -> Option<WidgetParameters> {
        self.parameters
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frame(&self) -> &DmxFrame {
        &self.frame
    }

    /// Mutable access to the universe buffer without transmitting
    pub fn frame_mut(&mut self) -> &mut DmxFrame {
        &mut self.frame
    }

    /// Set one 1-based channel (clamped) and transmit
    pub fn set_channel(&mut self, channel: usize, value: i32) -> Result<(), DmxError> {
        if !self.frame.set_level(channel, value) {
            tracing::debug!(channel, "ignoring out-of-range DMX channel");
        }
        self.flush()
    }

    /// Set several 1-based channels (clamped) and transmit one frame
    pub fn set_channels(&mut self, channels: &[usize], values: &[i32]) -> Result<(), DmxError> {
        if channels.len() != values.len() {
            return Err(DmxError::LengthMismatch {
                channels: channels.len(),
                values: values.len(),
            });
        }
        for (&channel, &value) in channels.iter().zip(values) {
            self.frame.set_level(channel, value);
        }
        self.flush()
    }

    /// Zero the universe and transmit
    pub fn blackout(&mut self) -> Result<(), DmxError> {
        self.frame.blackout();
        self.flush()
    }

    /// Encode the current buffer and transmit one packet
    pub fn flush(&mut self) -> Result<(), DmxError> {
        let transport = self.transport.as_mut().ok_or(DmxError::Closed)?;
        self.frame.encode_into(&mut self.packet);
        transport.write_all(&self.packet)?;
        transport.flush()?;
        self.frames_sent += 1;
        Ok(())
    }

    /// Black out, transmit once, release the transport. Idempotent.
    pub fn close(&mut self) -> Result<(), DmxError> {
        if self.transport.is_none() {
            return Ok(());
        }
        let result = self.blackout();
        self.transport = None;
        tracing::info!(port = %self.port_name, "DMX interface closed");
        result
    }

    /// Release the port without sending anything further. Ports opened
    /// only to look for an interface leave through here.
    pub fn abandon(mut self) {
        self.transport = None;
        tracing::debug!(port = %self.port_name, "port released");
    }
}

impl Drop for DmxDriver {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(port = %self.port_name, "blackout on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{END_OF_MESSAGE, PACKET_LEN};
    use crate::transport::MemoryTransport;

    fn open_memory() -> (DmxDriver, crate::transport::MemoryHandle) {
        let transport = MemoryTransport::default();
        let handle = transport.handle();
        let driver = DmxDriver::open(Box::new(transport)).unwrap();
        (driver, handle)
    }

    #[test]
    fn test_handshake_sends_parameter_request() {
        let (driver, handle) = open_memory();
        assert_eq!(handle.writes()[0], PARAMETER_REQUEST.to_vec());
        let params = driver.parameters().unwrap();
        assert_eq!(params.firmware, (1, 44));
        assert_eq!(params.output_rate, 40);
    }

    #[test]
    fn test_short_reply_is_not_fatal() {
        let transport = MemoryTransport::with_reply("short", vec![0x7E, 0x03]);
        let driver = DmxDriver::open(Box::new(transport)).unwrap();
        assert!(driver.parameters().is_none());
        assert!(driver.is_open());
    }

    #[test]
    fn test_set_channel_transmits_full_packet() {
        let (mut driver, handle) = open_memory();
        driver.set_channel(1, 128).unwrap();
        let packet = handle.last_write().unwrap();
        assert_eq!(packet.len(), PACKET_LEN);
        assert_eq!(&packet[..6], &[0x7E, 0x06, 0x01, 0x02, 0x00, 0x80]);
        assert_eq!(packet[PACKET_LEN - 1], END_OF_MESSAGE);
        assert_eq!(driver.frames_sent(), 1);
    }

    #[test]
    fn test_set_channels_clamps_and_sends_once() {
        let (mut driver, handle) = open_memory();
        let before = handle.write_count();
        driver.set_channels(&[1, 2, 3], &[-10, 128, 999]).unwrap();
        assert_eq!(handle.write_count(), before + 1);
        assert_eq!(driver.frame().get(1), Some(0));
        assert_eq!(driver.frame().get(2), Some(128));
        assert_eq!(driver.frame().get(3), Some(255));
    }

    #[test]
    fn test_set_channels_length_mismatch() {
        let (mut driver, _handle) = open_memory();
        let err = driver.set_channels(&[1, 2], &[1]).unwrap_err();
        assert!(matches!(err, DmxError::LengthMismatch { .. }));
    }

    #[test]
    fn test_batched_writes_send_one_frame() {
        let (mut driver, handle) = open_memory();
        let before = handle.write_count();
        for ch in 1..=10 {
            driver.frame_mut().set(ch, ch as u8);
        }
        driver.flush().unwrap();
        assert_eq!(handle.write_count(), before + 1);
    }

    #[test]
    fn test_close_blacks_out_once_and_releases() {
        let (mut driver, handle) = open_memory();
        driver.set_channel(5, 200).unwrap();
        driver.close().unwrap();
        let last = handle.last_write().unwrap();
        assert!(last[5..PACKET_LEN - 1].iter().all(|&b| b == 0));
        assert!(!driver.is_open());

        let count = handle.write_count();
        driver.close().unwrap();
        assert_eq!(handle.write_count(), count);
        assert!(matches!(driver.flush(), Err(DmxError::Closed)));
    }

    #[test]
    fn test_abandon_sends_nothing() {
        let (driver, handle) = open_memory();
        let count = handle.write_count();
        driver.abandon();
        assert_eq!(handle.write_count(), count);
    }

    #[test]
    fn test_transport_failure_surfaces_as_io() {
        let (mut driver, handle) = open_memory();
        handle.set_failing(true);
        assert!(matches!(driver.set_channel(1, 1), Err(DmxError::Io(_))));
        handle.set_failing(false);
    }

    #[test]
    fn test_device_not_found_lists_ports() {
        let err = DmxError::DeviceNotFound {
            ports: vec!["/dev/ttyUSB0".into(), "/dev/ttyS0".into()],
        };
        assert!(err.to_string().contains("/dev/ttyUSB0, /dev/ttyS0"));
        let err = DmxError::DeviceNotFound { ports: vec![] };
        assert!(err.to_string().contains("none"));
    }
}
