//! Definitions of the abstract packet interface

use arrayvec::ArrayVec;

use crate::datastructures::messages::MAX_DATA_LEN;
use crate::time::Timestamp;

/// A frame received from the network, together with the auxiliary data the
/// packet layer must deliver to the protocol engine.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    /// The port (1..N, in interface enumeration order) the frame arrived on
    pub port_number: u16,
    /// The raw frame contents
    pub data: ArrayVec<u8, MAX_DATA_LEN>,
    /// When the frame arrived, with nanosecond precision if the platform
    /// provides it
    pub timestamp: Timestamp,
}

impl ReceivedFrame {
    /// Package up a received frame. Returns `None` when the frame does not
    /// fit [`MAX_DATA_LEN`]; PTP frames never get that big, so such a frame
    /// is junk and should be dropped.
    pub fn new(port_number: u16, data: &[u8], timestamp: Timestamp) -> Option<Self> {
        let mut buffer = ArrayVec::new();
        buffer.try_extend_from_slice(data).ok()?;

        Some(Self {
            port_number,
            data: buffer,
            timestamp,
        })
    }
}

/// Abstraction for sending and receiving PTP frames
///
/// An implementation covers all ports of the clock at once: frames carry the
/// number of the port they belong to. Event messages travel over UDP port
/// 319, everything else over port 320; multicast loopback must be enabled so
/// that the engine sees its own transmissions back (that loopback drives the
/// send-timestamp path). An implementation for Linux UDP/IPv4 lives in the
/// sundial-linux crate.
pub trait PacketInterface {
    /// Type of the error the methods of this interface may return
    type Error: core::fmt::Debug;

    /// Send a frame out through the given port, to the event port when
    /// `event` is set and to the general port otherwise.
    fn send(&mut self, port_number: u16, event: bool, frame: &[u8]) -> Result<(), Self::Error>;

    /// Wait up to `timeout_micros` for a frame.
    ///
    /// Returns `Ok(None)` when the timeout lapses without traffic; that is
    /// the normal idle path, not an error. Errors indicate a broken socket
    /// and make the event loop rebuild the packet interface.
    fn recv(&mut self, timeout_micros: u32) -> Result<Option<ReceivedFrame>, Self::Error>;
}
