//! DMX universe buffer and Enttec Pro "send DMX" packet encoding

/// Number of addressable channels in one universe
pub const DMX_CHANNELS: usize = 512;

/// Payload length: start code plus 512 channels
pub const PAYLOAD_LEN: usize = DMX_CHANNELS + 1;

/// Encoded packet length: 4 header bytes, payload, end byte
pub const PACKET_LEN: usize = PAYLOAD_LEN + 5;

pub const START_OF_MESSAGE: u8 = 0x7E;
pub const END_OF_MESSAGE: u8 = 0xE7;
pub const SEND_DMX_LABEL: u8 = 0x06;
pub const GET_PARAMETERS_LABEL: u8 = 0x03;

/// Widget parameter request sent during the handshake
pub const PARAMETER_REQUEST: [u8; 5] = [START_OF_MESSAGE, GET_PARAMETERS_LABEL, 0x00, 0x00, END_OF_MESSAGE];

/// Expected length of the widget parameter reply
pub const PARAMETER_REPLY_LEN: usize = 14;

/// Clamp any numeric level into a channel value
pub fn clamp_level(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

/// One DMX universe: byte 0 is the start code, bytes 1..=512 the channels
#[derive(Clone, PartialEq, Eq)]
pub struct DmxFrame {
    data: [u8; PAYLOAD_LEN],
}

impl Default for DmxFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DmxFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = self.data[1..].iter().filter(|&&v| v != 0).count();
        f.debug_struct("DmxFrame").field("lit_channels", &lit).finish()
    }
}

impl DmxFrame {
    pub fn new() -> Self {
        Self { data: [0; PAYLOAD_LEN] }
    }

    /// Set a 1-based channel. Out-of-range channels are ignored and reported
    /// as `false`.
    pub fn set(&mut self, channel: usize, value: u8) -> bool {
        if (1..=DMX_CHANNELS).contains(&channel) {
            self.data[channel] = value;
            true
        } else {
            false
        }
    }

    /// Set a 1-based channel from an unclamped integer level
    pub fn set_level(&mut self, channel: usize, value: i32) -> bool {
        self.set(channel, value.clamp(0, 255) as u8)
    }

    pub fn get(&self, channel: usize) -> Option<u8> {
        if (1..=DMX_CHANNELS).contains(&channel) {
            Some(self.data[channel])
        } else {
            None
        }
    }

    /// Copy `values` starting at 1-based `start`, truncating at channel 512.
    /// Returns the number of channels written.
    pub fn write_slice(&mut self, start: usize, values: &[u8]) -> usize {
        if !(1..=DMX_CHANNELS).contains(&start) {
            return 0;
        }
        let count = values.len().min(DMX_CHANNELS + 1 - start);
        self.data[start..start + count].copy_from_slice(&values[..count]);
        count
    }

    /// Zero `len` channels from 1-based `start`
    pub fn clear_range(&mut self, start: usize, len: usize) {
        if !(1..=DMX_CHANNELS).contains(&start) {
            return;
        }
        let end = (start + len).min(PAYLOAD_LEN);
        self.data[start..end].fill(0);
    }

    /// Zero every channel, keeping the start code
    pub fn blackout(&mut self) {
        self.data = [0; PAYLOAD_LEN];
    }

    pub fn is_dark(&self) -> bool {
        self.data[1..].iter().all(|&v| v == 0)
    }

    /// Start code plus channels
    pub fn payload(&self) -> &[u8; PAYLOAD_LEN] {
        &self.data
    }

    /// Encode into a caller-owned packet buffer
    pub fn encode_into(&self, out: &mut [u8; PACKET_LEN]) {
        let len = PAYLOAD_LEN as u16;
        out[0] = START_OF_MESSAGE;
        out[1] = SEND_DMX_LABEL;
        out[2] = (len & 0xFF) as u8;
        out[3] = (len >> 8) as u8;
        out[4..4 + PAYLOAD_LEN].copy_from_slice(&self.data);
        out[PACKET_LEN - 1] = END_OF_MESSAGE;
    }

    /// Encode into a freshly allocated packet
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut out = [0u8; PACKET_LEN];
        self.encode_into(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_single_channel() {
        let mut frame = DmxFrame::new();
        frame.set(1, 128);
        let packet = frame.encode();

        assert_eq!(packet.len(), 518);
        assert_eq!(&packet[..6], &[0x7E, 0x06, 0x01, 0x02, 0x00, 0x80]);
        assert!(packet[6..517].iter().all(|&b| b == 0));
        assert_eq!(packet[6..517].len(), 511);
        assert_eq!(packet[517], 0xE7);
    }

    #[test]
    fn test_out_of_range_channels_ignored() {
        let mut frame = DmxFrame::new();
        assert!(!frame.set(0, 10));
        assert!(!frame.set(513, 10));
        assert!(frame.set(512, 10));
        assert_eq!(frame.get(512), Some(10));
        assert_eq!(frame.get(0), None);
        assert_eq!(frame.payload()[0], 0);
    }

    #[test]
    fn test_levels_are_clamped() {
        let mut frame = DmxFrame::new();
        frame.set_level(1, 300);
        frame.set_level(2, -5);
        assert_eq!(frame.get(1), Some(255));
        assert_eq!(frame.get(2), Some(0));

        assert_eq!(clamp_level(-1.0), 0);
        assert_eq!(clamp_level(127.6), 128);
        assert_eq!(clamp_level(1e9), 255);
        assert_eq!(clamp_level(f32::NAN), 0);
    }

    #[test]
    fn test_write_slice_truncates_at_universe_end() {
        let mut frame = DmxFrame::new();
        assert_eq!(frame.write_slice(510, &[1, 2, 3, 4, 5]), 3);
        assert_eq!(frame.get(510), Some(1));
        assert_eq!(frame.get(512), Some(3));
        assert_eq!(frame.write_slice(0, &[1]), 0);
    }

    #[test]
    fn test_blackout_and_clear_range() {
        let mut frame = DmxFrame::new();
        frame.write_slice(1, &[9; 10]);
        frame.clear_range(3, 2);
        assert_eq!(frame.get(2), Some(9));
        assert_eq!(frame.get(3), Some(0));
        assert_eq!(frame.get(4), Some(0));
        assert_eq!(frame.get(5), Some(9));
        frame.blackout();
        assert!(frame.is_dark());
    }
}
