//! Frame-level data model: addresses, outbound frames and received frames.
//!
//! Frames are plain value types sized for a single radio datagram. Copying a
//! frame into a queue slot fully isolates it from the caller's buffer; no
//! frame is ever shared between contexts.

use crate::{ADDRESS_LENGTH, MAX_PAYLOAD_LEN};

/// A link-layer destination or source address (six octets, MAC-style).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MacAddress([u8; ADDRESS_LENGTH]);

impl MacAddress {
    /// The reserved "deliver to all reachable peers" address. Never requires
    /// peer registration.
    pub const BROADCAST: MacAddress = MacAddress([0xFF; ADDRESS_LENGTH]);

    pub const fn new(octets: [u8; ADDRESS_LENGTH]) -> Self {
        MacAddress(octets)
    }

    pub const fn octets(&self) -> [u8; ADDRESS_LENGTH] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST.0
    }
}

impl core::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Delivery status of one transmission, as reported by the radio device's
/// asynchronous completion path.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SendStatus {
    Success,
    Failure,
    /// The device never reported completion within the bounded wait; the
    /// scheduler forced itself back to ready.
    Timeout,
}

/// One queued outbound datagram. Owned exclusively by the queue slot it
/// occupies; handed to the radio device by value.
#[derive(Clone, Debug)]
pub(crate) struct OutboundFrame {
    pub(crate) destination: MacAddress,
    pub(crate) payload: [u8; MAX_PAYLOAD_LEN],
    pub(crate) length: usize,
}

impl OutboundFrame {
    /// Copies `payload` into a fresh frame. Caller has already validated
    /// `payload.len() <= MAX_PAYLOAD_LEN`.
    pub(crate) fn new(destination: MacAddress, payload: &[u8]) -> Self {
        let mut frame = OutboundFrame {
            destination,
            payload: [0; MAX_PAYLOAD_LEN],
            length: payload.len(),
        };
        frame.payload[..payload.len()].copy_from_slice(payload);
        frame
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.payload[..self.length]
    }
}

/// One received datagram as captured from the radio device, before
/// classification and dispatch.
#[derive(Clone)]
pub(crate) struct ReceivedFrame {
    pub(crate) source: MacAddress,
    pub(crate) destination: MacAddress,
    pub(crate) payload: [u8; MAX_PAYLOAD_LEN],
    pub(crate) length: usize,
    pub(crate) rssi: i16,
    pub(crate) channel: u8,
}

impl ReceivedFrame {
    pub(crate) fn new(source: MacAddress, destination: MacAddress, payload: &[u8], rssi: i16, channel: u8) -> Self {
        let mut frame = ReceivedFrame {
            source,
            destination,
            payload: [0; MAX_PAYLOAD_LEN],
            length: payload.len(),
            rssi,
            channel,
        };
        frame.payload[..payload.len()].copy_from_slice(payload);
        frame
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.payload[..self.length]
    }

    pub(crate) fn is_broadcast(&self) -> bool {
        self.destination.is_broadcast()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn broadcast_address_is_classified_as_broadcast() {
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert!(!MacAddress::new([0x08, 0x3a, 0xf2, 0x69, 0xc4, 0x04]).is_broadcast());
    }

    #[test]
    fn mac_address_display_is_colon_separated_hex() {
        let addr = MacAddress::new([0x08, 0x3a, 0xf2, 0x69, 0xc4, 0x04]);
        assert_eq!(format!("{}", addr), "08:3a:f2:69:c4:04");
    }

    #[test]
    fn outbound_frame_round_trips_address_payload_and_length() {
        let addr = MacAddress::new([1, 2, 3, 4, 5, 6]);
        let payload: Vec<u8> = (0..123u8).collect();
        let frame = OutboundFrame::new(addr, &payload);
        assert_eq!(frame.destination, addr);
        assert_eq!(frame.length, 123);
        assert_eq!(frame.payload(), payload.as_slice());
    }

    #[test]
    fn received_frame_classifies_by_destination() {
        let src = MacAddress::new([1, 1, 1, 1, 1, 1]);
        let unicast = ReceivedFrame::new(src, MacAddress::new([2, 2, 2, 2, 2, 2]), b"hi", -50, 6);
        assert!(!unicast.is_broadcast());
        let broadcast = ReceivedFrame::new(src, MacAddress::BROADCAST, b"hi", -50, 6);
        assert!(broadcast.is_broadcast());
        assert_eq!(broadcast.payload(), b"hi");
        assert_eq!(broadcast.rssi, -50);
        assert_eq!(broadcast.channel, 6);
    }
}
