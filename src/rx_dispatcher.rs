//! Receive path: capture and dispatch.
//!
//! Capture runs in the radio device's context and must stay minimal: it
//! counts the received bytes and copies the frame into an inbound queue
//! slot, dropping the oldest queued frame on overflow. Classification and
//! the application callback run later, on the dispatcher's own task.

use log::{log, Level};

use crate::frames::ReceivedFrame;
use crate::throughput::LinkCounters;
use crate::{HandlerRegistry, InboundQueue, StopSignal};
use embassy_futures::select::{select, Either};

/// Device-side handle for delivering captured frames. Copyable so each
/// radio device task owns its own.
#[derive(Clone, Copy)]
pub(crate) struct RxCapture {
    queue: &'static InboundQueue,
    counters: &'static LinkCounters,
}

impl RxCapture {
    pub(crate) fn new(queue: &'static InboundQueue, counters: &'static LinkCounters) -> Self {
        RxCapture { queue, counters }
    }

    /// Enqueues one received frame, drop-oldest on overflow. Nothing else
    /// happens in the device context.
    pub(crate) fn push(&self, frame: ReceivedFrame) {
        self.counters.add_rx(frame.length);
        if let Some(dropped) = self.queue.push_evicting(frame) {
            log!(
                Level::Debug,
                "Inbound queue full, dropping oldest frame from {}",
                dropped.source
            );
        }
    }
}

/// Classifies one frame and hands it to the registered receive handler.
/// Frames arriving while no handler is registered are discarded.
pub(crate) fn dispatch_frame(frame: &ReceivedFrame, handlers: &HandlerRegistry) {
    match handlers.receive_handler() {
        Some(handler) => {
            handler(frame.source, frame.payload(), frame.rssi, frame.is_broadcast(), frame.channel);
        }
        None => {
            log!(Level::Trace, "No receive handler registered, discarding frame from {}", frame.source);
        }
    }
}

#[cfg_attr(feature = "std", embassy_executor::task(pool_size = 8))]
#[cfg_attr(feature = "embedded", embassy_executor::task(pool_size = 1))]
pub(crate) async fn rx_dispatcher_task(
    inbound: &'static InboundQueue,
    handlers: &'static HandlerRegistry,
    stop: &'static StopSignal,
) {
    log!(Level::Debug, "RX dispatcher task started");
    loop {
        match select(inbound.receive(), stop.wait()).await {
            Either::First(frame) => dispatch_frame(&frame, handlers),
            Either::Second(()) => {
                log!(Level::Debug, "RX dispatcher task stopped");
                return;
            }
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::frame_queue::SharedFrameQueue;
    use crate::frames::MacAddress;
    use std::sync::Mutex as StdMutex;

    // Handler state lives in statics because handlers are plain fn pointers.
    static SEEN: StdMutex<Vec<(MacAddress, Vec<u8>, i16, bool, u8)>> = StdMutex::new(Vec::new());

    fn recording_handler(source: MacAddress, payload: &[u8], rssi: i16, broadcast: bool, channel: u8) {
        SEEN.lock().unwrap().push((source, payload.to_vec(), rssi, broadcast, channel));
    }

    fn frame(destination: MacAddress) -> ReceivedFrame {
        ReceivedFrame::new(MacAddress::new([9, 9, 9, 9, 9, 9]), destination, b"telemetry", -61, 11)
    }

    #[test]
    fn dispatch_forwards_classified_frames_to_the_handler() {
        SEEN.lock().unwrap().clear();
        let handlers = HandlerRegistry::new();
        handlers.set_receive_handler(recording_handler);

        dispatch_frame(&frame(MacAddress::BROADCAST), &handlers);
        dispatch_frame(&frame(MacAddress::new([2, 2, 2, 2, 2, 2])), &handlers);

        let seen = SEEN.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let (source, payload, rssi, broadcast, channel) = &seen[0];
        assert_eq!(*source, MacAddress::new([9, 9, 9, 9, 9, 9]));
        assert_eq!(payload.as_slice(), b"telemetry");
        assert_eq!(*rssi, -61);
        assert!(*broadcast);
        assert_eq!(*channel, 11);
        assert!(!seen[1].3);
    }

    #[test]
    fn dispatch_without_a_handler_discards_the_frame() {
        let handlers = HandlerRegistry::new();
        dispatch_frame(&frame(MacAddress::BROADCAST), &handlers);
    }

    #[test]
    fn capture_counts_bytes_and_drops_oldest_on_overflow() {
        let inbound: &'static InboundQueue = Box::leak(Box::new(SharedFrameQueue::new()));
        let counters: &'static LinkCounters = Box::leak(Box::new(LinkCounters::new()));
        let capture = RxCapture::new(inbound, counters);

        for tag in 1..=5u8 {
            let payload = [tag; 10];
            capture.push(ReceivedFrame::new(
                MacAddress::new([tag; 6]),
                MacAddress::BROADCAST,
                &payload,
                -70,
                1,
            ));
        }

        // Capacity 3: the three newest frames survive, all five were counted.
        assert_eq!(inbound.len(), crate::INBOUND_QUEUE_SIZE);
        assert_eq!(counters.take_snapshot().rx_bytes, 50);
        assert_eq!(inbound.pop().unwrap().source, MacAddress::new([3; 6]));
        assert_eq!(inbound.pop().unwrap().source, MacAddress::new([4; 6]));
        assert_eq!(inbound.pop().unwrap().source, MacAddress::new([5; 6]));
    }
}
