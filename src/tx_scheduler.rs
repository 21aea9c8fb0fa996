//! TX scheduler task.
//!
//! Drains the outbound queue one frame at a time and enforces the
//! single-flight contract of ESP-NOW-style radios: at most one transmission
//! outstanding, the next one issued only after the device's asynchronous
//! completion report. The scheduler owns the peer directory, so unicast
//! destinations are registered with the device (evicting the
//! least-recently-used peer when the table is full) before the frame is
//! handed over. Broadcast frames bypass registration entirely.
//!
//! A transmission whose completion never arrives would leave the link busy
//! forever; the scheduler bounds that wait and reports `Timeout` through
//! the send-result handler instead.

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Timer};
use log::{log, Level};

use crate::frames::{MacAddress, SendStatus};
use crate::peer_directory::PeerDirectory;
use crate::throughput::LinkCounters;
use crate::{
    ControlReceiver, HandlerRegistry, OutboundQueue, RadioCommand, RadioCommandSender, SchedulerControl,
    TxReportReceiver, WifiInterface, MAX_PEERS, TX_COMPLETION_TIMEOUT_MS,
};

/// Send-readiness of the scheduler. `Busy` from the instant a transmission
/// is issued to the device until its completion report (or the bounded
/// timeout); the sole admission gate for the next transmission.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum TxState {
    Ready,
    Busy,
}

fn apply_control(control: SchedulerControl, transmit_enabled: &mut bool) -> bool {
    match control {
        SchedulerControl::SetTransmitEnabled(enabled) => {
            log!(Level::Debug, "Transmit {}", if enabled { "enabled" } else { "disabled" });
            *transmit_enabled = enabled;
            true
        }
        SchedulerControl::Stop => false,
    }
}

/// Makes sure `destination` is registered with the radio device, evicting
/// the least-recently-used peer if the directory is full. A hit refreshes
/// the entry's recency.
async fn register_destination<const P: usize>(
    peers: &mut PeerDirectory<P>,
    destination: MacAddress,
    interface: WifiInterface,
    command_sender: RadioCommandSender,
) {
    if destination.is_broadcast() {
        return;
    }
    if peers.exists(destination) {
        return;
    }
    if peers.is_full() {
        match peers.evict_oldest() {
            Some(evicted) => {
                log!(Level::Debug, "Peer directory full, evicting {}", evicted);
                command_sender.send(RadioCommand::RemovePeer(evicted)).await;
            }
            None => {
                log!(
                    Level::Error,
                    "Peer directory inconsistent: {} active peers but none evictable",
                    peers.count()
                );
                return;
            }
        }
    }
    if peers.add(destination) {
        log!(Level::Debug, "Peer {} registered, {} active", destination, peers.count());
        command_sender
            .send(RadioCommand::AddPeer {
                address: destination,
                interface,
            })
            .await;
    }
}

/// One pass of the scheduler loop. Returns false once a stop request has
/// been processed.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn scheduler_iteration<const P: usize>(
    peers: &mut PeerDirectory<P>,
    state: &mut TxState,
    transmit_enabled: &mut bool,
    outbound: &'static OutboundQueue,
    control_receiver: ControlReceiver,
    command_sender: RadioCommandSender,
    report_receiver: TxReportReceiver,
    counters: &'static LinkCounters,
    handlers: &'static HandlerRegistry,
    interface: WifiInterface,
    completion_timeout: Duration,
) -> bool {
    // Apply control messages that arrived since the last pass.
    while let Ok(control) = control_receiver.try_receive() {
        if !apply_control(control, transmit_enabled) {
            return false;
        }
    }

    // While transmission is paused, queued frames are retained and only
    // control messages are serviced.
    if !*transmit_enabled {
        return apply_control(control_receiver.receive().await, transmit_enabled);
    }

    let frame = match select(outbound.receive(), control_receiver.receive()).await {
        Either::First(frame) => frame,
        Either::Second(control) => return apply_control(control, transmit_enabled),
    };
    let destination = frame.destination;
    let length = frame.length;

    register_destination(peers, destination, interface, command_sender).await;

    // A completion arriving after its bounded wait expired belongs to a
    // transmission already reported as timed out.
    while let Ok(stale) = report_receiver.try_receive() {
        log!(Level::Warn, "Discarding stale completion report for {}", stale.destination);
    }

    *state = TxState::Busy;
    log!(Level::Debug, "Issuing {} byte frame to {}, scheduler {:?}", length, destination, *state);
    command_sender.send(RadioCommand::Transmit(frame)).await;
    counters.add_tx_radio(length);

    let status = match select(report_receiver.receive(), Timer::after(completion_timeout)).await {
        Either::First(report) => report.status,
        Either::Second(()) => {
            log!(
                Level::Error,
                "No completion report for {} within {} ms, forcing ready",
                destination,
                completion_timeout.as_millis()
            );
            SendStatus::Timeout
        }
    };
    *state = TxState::Ready;
    log!(Level::Debug, "Completion for {}: {:?}, scheduler {:?}", destination, status, *state);

    if let Some(handler) = handlers.send_result_handler() {
        handler(destination, status);
    }
    true
}

#[cfg_attr(feature = "std", embassy_executor::task(pool_size = 8))]
#[cfg_attr(feature = "embedded", embassy_executor::task(pool_size = 1))]
pub(crate) async fn tx_scheduler_task(
    outbound: &'static OutboundQueue,
    control_receiver: ControlReceiver,
    command_sender: RadioCommandSender,
    report_receiver: TxReportReceiver,
    counters: &'static LinkCounters,
    handlers: &'static HandlerRegistry,
    channel: u8,
    interface: WifiInterface,
) {
    let mut peers: PeerDirectory<MAX_PEERS> = PeerDirectory::new();
    let mut state = TxState::Ready;
    let mut transmit_enabled = true;
    log!(Level::Info, "TX scheduler task started on channel {}", channel);
    while scheduler_iteration(
        &mut peers,
        &mut state,
        &mut transmit_enabled,
        outbound,
        control_receiver,
        command_sender,
        report_receiver,
        counters,
        handlers,
        interface,
        Duration::from_millis(TX_COMPLETION_TIMEOUT_MS),
    )
    .await
    {}
    log!(Level::Info, "TX scheduler task stopped");
}
