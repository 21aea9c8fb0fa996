//! Mock radio device: several endpoints joined by an in-process medium.
//!
//! The mock reproduces the vendor driver contract the link layer is built
//! around, so the whole stack can run host-side: unicast delivery requires
//! the destination to have been registered on the sending endpoint (with the
//! same hard ceiling the real driver has), broadcast reaches every other
//! endpoint without registration, and every transmission is answered by
//! exactly one asynchronous completion report.

use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use log::{log, Level};
use rand_core::{RngCore, SeedableRng};
use rand_wyrand::WyRand;

use crate::frames::{MacAddress, OutboundFrame, ReceivedFrame, SendStatus};
use crate::rx_dispatcher::RxCapture;
use crate::{RadioCommand, RadioCommandReceiver, TxReport, TxReportSender, DEFAULT_CHANNEL, MAX_PAYLOAD_LEN, MAX_PEERS};

const AIR_QUEUE_SIZE: usize = 8;

/// One datagram in flight between endpoints.
#[derive(Clone)]
struct AirFrame {
    source: MacAddress,
    destination: MacAddress,
    payload: [u8; MAX_PAYLOAD_LEN],
    length: usize,
}

type AirQueue = Channel<CriticalSectionRawMutex, AirFrame, AIR_QUEUE_SIZE>;
type AirSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, AirFrame, AIR_QUEUE_SIZE>;
type AirReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, AirFrame, AIR_QUEUE_SIZE>;

struct EndpointHandle {
    address: MacAddress,
    delivery: AirSender,
}

/// The shared "air" connecting every endpoint created from it.
pub struct MockMedium {
    endpoints: Mutex<CriticalSectionRawMutex, RefCell<Vec<EndpointHandle>>>,
}

impl MockMedium {
    pub fn new() -> &'static MockMedium {
        Box::leak(Box::new(MockMedium {
            endpoints: Mutex::new(RefCell::new(Vec::new())),
        }))
    }

    /// Attaches a new endpoint with the given address to the medium.
    pub fn endpoint(&'static self, address: MacAddress) -> RadioDevice {
        let air: &'static AirQueue = Box::leak(Box::new(Channel::new()));
        self.endpoints.lock(|endpoints| {
            endpoints.borrow_mut().push(EndpointHandle {
                address,
                delivery: air.sender(),
            })
        });
        let octets = address.octets();
        let seed = u64::from_le_bytes([octets[0], octets[1], octets[2], octets[3], octets[4], octets[5], 0x4C, 0x51]);
        RadioDevice {
            medium: self,
            address,
            delivery: air.receiver(),
            channel: DEFAULT_CHANNEL,
            peers: [None; MAX_PEERS],
            rng: WyRand::seed_from_u64(seed),
        }
    }

    fn deliver(&self, frame: &AirFrame) -> SendStatus {
        let mut delivered = false;
        self.endpoints.lock(|endpoints| {
            for endpoint in endpoints.borrow().iter() {
                if endpoint.address == frame.source {
                    continue;
                }
                if !frame.destination.is_broadcast() && endpoint.address != frame.destination {
                    continue;
                }
                match endpoint.delivery.try_send(frame.clone()) {
                    Ok(()) => delivered = true,
                    Err(_) => {
                        log!(Level::Warn, "Endpoint {} backlogged, frame from {} lost", endpoint.address, frame.source);
                    }
                }
            }
        });
        // Broadcast carries no acknowledgement; unicast fails when the
        // destination endpoint did not take the frame.
        if frame.destination.is_broadcast() || delivered {
            SendStatus::Success
        } else {
            SendStatus::Failure
        }
    }
}

pub struct RadioDevice {
    medium: &'static MockMedium,
    address: MacAddress,
    delivery: AirReceiver,
    channel: u8,
    peers: [Option<MacAddress>; MAX_PEERS],
    rng: WyRand,
}

impl RadioDevice {
    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn current_channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    fn peer_registered(&self, address: MacAddress) -> bool {
        self.peers.iter().any(|slot| *slot == Some(address))
    }

    fn add_peer(&mut self, address: MacAddress) {
        if self.peer_registered(address) {
            return;
        }
        for slot in self.peers.iter_mut() {
            if slot.is_none() {
                *slot = Some(address);
                return;
            }
        }
        log!(Level::Error, "Device peer table full, cannot register {}", address);
    }

    fn remove_peer(&mut self, address: MacAddress) {
        for slot in self.peers.iter_mut() {
            if *slot == Some(address) {
                *slot = None;
                return;
            }
        }
    }

    fn transmit(&mut self, frame: &OutboundFrame) -> SendStatus {
        if !frame.destination.is_broadcast() && !self.peer_registered(frame.destination) {
            log!(Level::Warn, "Transmit to unregistered peer {}", frame.destination);
            return SendStatus::Failure;
        }
        self.medium.deliver(&AirFrame {
            source: self.address,
            destination: frame.destination,
            payload: frame.payload,
            length: frame.length,
        })
    }

    fn synthesize_rssi(&mut self) -> i16 {
        -(40 + (self.rng.next_u32() % 40) as i16)
    }

    /// Services one command or one delivery. Returns false on `Stop`.
    pub(crate) async fn step(&mut self, commands: RadioCommandReceiver, capture: RxCapture, reports: TxReportSender) -> bool {
        // Bind the event first so the select's borrow of the delivery
        // receiver ends before the arms touch the device mutably.
        let event = select(commands.receive(), self.delivery.receive()).await;
        match event {
            Either::First(command) => match command {
                RadioCommand::Transmit(frame) => {
                    let status = self.transmit(&frame);
                    reports
                        .send(TxReport {
                            destination: frame.destination,
                            status,
                        })
                        .await;
                    true
                }
                RadioCommand::AddPeer { address, interface } => {
                    log!(Level::Debug, "Registering peer {} on channel {} ({:?})", address, self.channel, interface);
                    self.add_peer(address);
                    true
                }
                RadioCommand::RemovePeer(address) => {
                    self.remove_peer(address);
                    true
                }
                RadioCommand::SetChannel(channel) => {
                    self.channel = channel;
                    true
                }
                RadioCommand::Stop => false,
            },
            Either::Second(air) => {
                let rssi = self.synthesize_rssi();
                capture.push(ReceivedFrame::new(
                    air.source,
                    air.destination,
                    &air.payload[..air.length],
                    rssi,
                    self.channel,
                ));
                true
            }
        }
    }

    async fn run(&mut self, commands: RadioCommandReceiver, capture: RxCapture, reports: TxReportSender) {
        while self.step(commands, capture, reports).await {}
        log!(Level::Info, "Mock radio device {} stopped", self.address);
    }
}

#[embassy_executor::task(pool_size = 8)]
pub(crate) async fn radio_device_task(
    mut device: RadioDevice,
    commands: RadioCommandReceiver,
    capture: RxCapture,
    reports: TxReportSender,
) {
    log!(Level::Info, "Mock radio device {} task started", device.address);
    device.run(commands, capture, reports).await
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::frame_queue::SharedFrameQueue;
    use crate::throughput::LinkCounters;
    use crate::{InboundQueue, RadioCommandQueue, TxReportQueue, WifiInterface};
    use futures::executor::block_on;

    struct Endpoint {
        device: RadioDevice,
        commands: &'static RadioCommandQueue,
        reports: &'static TxReportQueue,
        inbound: &'static InboundQueue,
        capture: RxCapture,
    }

    fn endpoint(medium: &'static MockMedium, tag: u8) -> Endpoint {
        let inbound: &'static InboundQueue = Box::leak(Box::new(SharedFrameQueue::new()));
        let counters: &'static LinkCounters = Box::leak(Box::new(LinkCounters::new()));
        Endpoint {
            device: medium.endpoint(MacAddress::new([tag; 6])),
            commands: Box::leak(Box::new(RadioCommandQueue::new())),
            reports: Box::leak(Box::new(TxReportQueue::new())),
            inbound,
            capture: RxCapture::new(inbound, counters),
        }
    }

    fn step(ep: &mut Endpoint) -> bool {
        block_on(ep.device.step(ep.commands.receiver(), ep.capture, ep.reports.sender()))
    }

    fn addr(tag: u8) -> MacAddress {
        MacAddress::new([tag; 6])
    }

    #[test]
    fn unicast_reaches_the_registered_destination() {
        let medium = MockMedium::new();
        let mut a = endpoint(medium, 1);
        let mut b = endpoint(medium, 2);

        a.commands
            .sender()
            .try_send(RadioCommand::AddPeer {
                address: addr(2),
                interface: WifiInterface::Station,
            })
            .unwrap();
        a.commands
            .sender()
            .try_send(RadioCommand::Transmit(OutboundFrame::new(addr(2), b"unicast payload")))
            .unwrap();
        assert!(step(&mut a));
        assert!(step(&mut a));

        let report = a.reports.receiver().try_receive().unwrap();
        assert_eq!(report.status, SendStatus::Success);
        assert_eq!(report.destination, addr(2));

        // B sees the frame once its own task runs.
        assert!(step(&mut b));
        let frame = b.inbound.pop().unwrap();
        assert_eq!(frame.source, addr(1));
        assert_eq!(frame.payload(), b"unicast payload");
        assert!(!frame.is_broadcast());
        assert!(frame.rssi < 0);
    }

    #[test]
    fn unicast_to_unregistered_peer_fails() {
        let medium = MockMedium::new();
        let mut a = endpoint(medium, 1);
        let b = endpoint(medium, 2);

        a.commands
            .sender()
            .try_send(RadioCommand::Transmit(OutboundFrame::new(addr(2), b"no peer")))
            .unwrap();
        assert!(step(&mut a));

        assert_eq!(a.reports.receiver().try_receive().unwrap().status, SendStatus::Failure);
        assert_eq!(b.inbound.len(), 0);
    }

    #[test]
    fn broadcast_reaches_every_other_endpoint_without_registration() {
        let medium = MockMedium::new();
        let mut a = endpoint(medium, 1);
        let mut b = endpoint(medium, 2);
        let mut c = endpoint(medium, 3);

        a.commands
            .sender()
            .try_send(RadioCommand::Transmit(OutboundFrame::new(MacAddress::BROADCAST, b"to all")))
            .unwrap();
        assert!(step(&mut a));
        assert_eq!(a.reports.receiver().try_receive().unwrap().status, SendStatus::Success);

        for ep in [&mut b, &mut c] {
            assert!(step(ep));
            let frame = ep.inbound.pop().unwrap();
            assert!(frame.is_broadcast());
            assert_eq!(frame.source, addr(1));
            assert_eq!(frame.payload(), b"to all");
        }
        assert_eq!(a.inbound.len(), 0);
    }

    #[test]
    fn removed_peer_can_no_longer_be_reached() {
        let medium = MockMedium::new();
        let mut a = endpoint(medium, 1);
        let _b = endpoint(medium, 2);

        a.commands
            .sender()
            .try_send(RadioCommand::AddPeer {
                address: addr(2),
                interface: WifiInterface::Station,
            })
            .unwrap();
        a.commands.sender().try_send(RadioCommand::RemovePeer(addr(2))).unwrap();
        a.commands
            .sender()
            .try_send(RadioCommand::Transmit(OutboundFrame::new(addr(2), b"gone")))
            .unwrap();
        for _ in 0..3 {
            assert!(step(&mut a));
        }
        assert_eq!(a.reports.receiver().try_receive().unwrap().status, SendStatus::Failure);
    }

    #[test]
    fn stop_command_ends_the_device_loop() {
        let medium = MockMedium::new();
        let mut a = endpoint(medium, 1);
        a.commands.sender().try_send(RadioCommand::Stop).unwrap();
        assert!(!step(&mut a));
    }

    #[test]
    fn set_channel_is_reflected_in_received_frames() {
        let medium = MockMedium::new();
        let mut a = endpoint(medium, 1);
        let mut b = endpoint(medium, 2);

        b.commands.sender().try_send(RadioCommand::SetChannel(11)).unwrap();
        assert!(step(&mut b));
        assert_eq!(b.device.current_channel(), 11);

        a.commands
            .sender()
            .try_send(RadioCommand::Transmit(OutboundFrame::new(MacAddress::BROADCAST, b"ping")))
            .unwrap();
        assert!(step(&mut a));
        assert!(step(&mut b));
        assert_eq!(b.inbound.pop().unwrap().channel, 11);
    }
}
