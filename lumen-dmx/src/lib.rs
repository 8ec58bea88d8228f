//! DMX output for Lumen
//!
//! - Frame: 512-channel universe buffer and Enttec Pro packet encoding
//! - Transport: serial and in-memory byte links
//! - Driver: handshake, batched transmit, blackout on close
//! - Port: discovery, cached port, retry with rescan

mod driver;
mod frame;
mod port;
mod transport;

pub use driver::{DmxDriver, DmxError, WidgetParameters};
pub use frame::{clamp_level, DmxFrame, DMX_CHANNELS, PACKET_LEN, PARAMETER_REQUEST, PAYLOAD_LEN};
pub use port::{Connector, DmxConfig, PortOpener, SerialOpener};
pub use transport::{canned_parameter_reply, MemoryHandle, MemoryTransport, SerialTransport, Transport};
