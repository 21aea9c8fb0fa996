//! Echo radio device: every transmitted frame comes straight back as a
//! reception from the addressed peer. No second node required.

use log::{log, Level};

use crate::frames::{MacAddress, ReceivedFrame, SendStatus};
use crate::rx_dispatcher::RxCapture;
use crate::{RadioCommand, RadioCommandReceiver, TxReport, TxReportSender, DEFAULT_CHANNEL};

const ECHO_RSSI: i16 = -30;

pub struct RadioDevice {
    address: MacAddress,
    channel: u8,
}

impl RadioDevice {
    pub const fn new(address: MacAddress) -> Self {
        RadioDevice {
            address,
            channel: DEFAULT_CHANNEL,
        }
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn current_channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    /// Services one command. Returns false on `Stop`.
    pub(crate) async fn step(&mut self, commands: RadioCommandReceiver, capture: RxCapture, reports: TxReportSender) -> bool {
        match commands.receive().await {
            RadioCommand::Transmit(frame) => {
                // The echoed frame appears to come from the addressed peer;
                // a broadcast comes back as a broadcast.
                let destination = if frame.destination.is_broadcast() {
                    MacAddress::BROADCAST
                } else {
                    self.address
                };
                capture.push(ReceivedFrame::new(
                    frame.destination,
                    destination,
                    frame.payload(),
                    ECHO_RSSI,
                    self.channel,
                ));
                reports
                    .send(TxReport {
                        destination: frame.destination,
                        status: SendStatus::Success,
                    })
                    .await;
                true
            }
            RadioCommand::AddPeer { address, interface } => {
                log!(Level::Debug, "Registering peer {} on channel {} ({:?})", address, self.channel, interface);
                true
            }
            RadioCommand::RemovePeer(_) => true,
            RadioCommand::SetChannel(channel) => {
                self.channel = channel;
                true
            }
            RadioCommand::Stop => false,
        }
    }

    async fn run(&mut self, commands: RadioCommandReceiver, capture: RxCapture, reports: TxReportSender) {
        while self.step(commands, capture, reports).await {}
        log!(Level::Info, "Echo radio device stopped");
    }
}

#[cfg_attr(feature = "std", embassy_executor::task(pool_size = 8))]
#[cfg_attr(feature = "embedded", embassy_executor::task(pool_size = 1))]
pub(crate) async fn radio_device_task(
    mut device: RadioDevice,
    commands: RadioCommandReceiver,
    capture: RxCapture,
    reports: TxReportSender,
) {
    log!(Level::Info, "Echo radio device task started");
    device.run(commands, capture, reports).await
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::frame_queue::SharedFrameQueue;
    use crate::frames::OutboundFrame;
    use crate::throughput::LinkCounters;
    use crate::{InboundQueue, RadioCommandQueue, TxReportQueue};
    use futures::executor::block_on;

    #[test]
    fn transmissions_echo_back_from_the_addressed_peer() {
        let inbound: &'static InboundQueue = Box::leak(Box::new(SharedFrameQueue::new()));
        let counters: &'static LinkCounters = Box::leak(Box::new(LinkCounters::new()));
        let commands: &'static RadioCommandQueue = Box::leak(Box::new(RadioCommandQueue::new()));
        let reports: &'static TxReportQueue = Box::leak(Box::new(TxReportQueue::new()));
        let capture = RxCapture::new(inbound, counters);
        let mut device = RadioDevice::new(MacAddress::new([1; 6]));

        let peer = MacAddress::new([2; 6]);
        commands
            .sender()
            .try_send(RadioCommand::Transmit(OutboundFrame::new(peer, b"echo me")))
            .unwrap();
        assert!(block_on(device.step(commands.receiver(), capture, reports.sender())));

        assert_eq!(reports.receiver().try_receive().unwrap().status, SendStatus::Success);
        let frame = inbound.pop().unwrap();
        assert_eq!(frame.source, peer);
        assert_eq!(frame.destination, MacAddress::new([1; 6]));
        assert_eq!(frame.payload(), b"echo me");
        assert!(!frame.is_broadcast());
    }

    #[test]
    fn broadcast_comes_back_as_broadcast() {
        let inbound: &'static InboundQueue = Box::leak(Box::new(SharedFrameQueue::new()));
        let counters: &'static LinkCounters = Box::leak(Box::new(LinkCounters::new()));
        let commands: &'static RadioCommandQueue = Box::leak(Box::new(RadioCommandQueue::new()));
        let reports: &'static TxReportQueue = Box::leak(Box::new(TxReportQueue::new()));
        let capture = RxCapture::new(inbound, counters);
        let mut device = RadioDevice::new(MacAddress::new([1; 6]));

        commands
            .sender()
            .try_send(RadioCommand::Transmit(OutboundFrame::new(MacAddress::BROADCAST, b"everyone")))
            .unwrap();
        assert!(block_on(device.step(commands.receiver(), capture, reports.sender())));
        assert!(inbound.pop().unwrap().is_broadcast());
    }
}
