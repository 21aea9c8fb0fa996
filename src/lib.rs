#![cfg_attr(not(feature = "std"), no_std)]

//! Asynchronous link layer over ESP-NOW-style packet radios.
//!
//! The underlying transport is connectionless and datagram oriented, allows
//! a single outstanding transmission at a time, limits how many unicast
//! destinations can be registered concurrently, and reports completion and
//! reception from its own asynchronous context. This crate absorbs those
//! constraints behind a non-blocking `send` / `on_receive` surface: frames
//! are queued (drop-oldest on overflow), a scheduler task issues them one
//! at a time and keeps an LRU directory of registered peers, and a
//! dispatcher task classifies received frames and forwards them to the
//! application handler.

#[cfg(all(
    feature = "radio-device-mock",
    feature = "radio-device-echo"
))]
compile_error!("Only one radio implementation feature can be enabled at a time");

#[cfg(all(not(test), not(any(feature = "radio-device-mock", feature = "radio-device-echo"))))]
compile_error!("At least one radio implementation feature must be enabled");

#[cfg(not(any(feature = "std", feature = "embedded")))]
compile_error!("Either the `std` or the `embedded` feature must be enabled");

#[cfg(all(feature = "std", feature = "embedded"))]
compile_error!("The `std` and `embedded` features are mutually exclusive");

pub mod radio_devices;

mod frame_queue;
mod frames;
mod peer_directory;
mod rx_dispatcher;
mod throughput;
mod tx_scheduler;

use core::cell::Cell;

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use log::{log, Level};

use crate::frame_queue::SharedFrameQueue;
use crate::frames::{OutboundFrame, ReceivedFrame};
use crate::throughput::{LinkCounters, ThroughputCell};

#[cfg(any(feature = "radio-device-mock", feature = "radio-device-echo"))]
use crate::radio_devices::{radio_device_task, RadioDevice};
#[cfg(any(feature = "radio-device-mock", feature = "radio-device-echo"))]
use crate::rx_dispatcher::RxCapture;

pub use crate::frames::{MacAddress, SendStatus};
pub use crate::throughput::ThroughputReport;

/// Number of octets in a link-layer address.
pub const ADDRESS_LENGTH: usize = 6;
/// Largest payload the transport carries in one frame.
pub const MAX_PAYLOAD_LEN: usize = 250;
/// Lowest valid radio channel.
pub const MIN_CHANNEL: u8 = 0;
/// Highest valid radio channel.
pub const MAX_CHANNEL: u8 = 14;
/// Sentinel channel meaning "keep whatever channel is already active".
pub const CURRENT_CHANNEL: u8 = 255;

pub(crate) const DEFAULT_CHANNEL: u8 = 1;
pub(crate) const OUTBOUND_QUEUE_SIZE: usize = 3;
pub(crate) const INBOUND_QUEUE_SIZE: usize = 3;
pub(crate) const MAX_PEERS: usize = 20;
pub(crate) const TX_COMPLETION_TIMEOUT_MS: u64 = 5000;
pub(crate) const THROUGHPUT_MEAS_INTERVAL_MS: u64 = 15_000;

const RADIO_COMMAND_QUEUE_SIZE: usize = 8;
const TX_REPORT_QUEUE_SIZE: usize = 2;
const CONTROL_QUEUE_SIZE: usize = 4;

pub(crate) type OutboundQueue = SharedFrameQueue<OutboundFrame, OUTBOUND_QUEUE_SIZE>;
pub(crate) type InboundQueue = SharedFrameQueue<ReceivedFrame, INBOUND_QUEUE_SIZE>;

pub(crate) type RadioCommandQueue = Channel<CriticalSectionRawMutex, RadioCommand, RADIO_COMMAND_QUEUE_SIZE>;
pub(crate) type RadioCommandSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RadioCommand, RADIO_COMMAND_QUEUE_SIZE>;
pub(crate) type RadioCommandReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RadioCommand, RADIO_COMMAND_QUEUE_SIZE>;

pub(crate) type TxReportQueue = Channel<CriticalSectionRawMutex, TxReport, TX_REPORT_QUEUE_SIZE>;
pub(crate) type TxReportSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, TxReport, TX_REPORT_QUEUE_SIZE>;
pub(crate) type TxReportReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, TxReport, TX_REPORT_QUEUE_SIZE>;

pub(crate) type ControlQueue = Channel<CriticalSectionRawMutex, SchedulerControl, CONTROL_QUEUE_SIZE>;
pub(crate) type ControlSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, SchedulerControl, CONTROL_QUEUE_SIZE>;
pub(crate) type ControlReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, SchedulerControl, CONTROL_QUEUE_SIZE>;

pub(crate) type StopSignal = Signal<CriticalSectionRawMutex, ()>;

#[cfg(feature = "embedded")]
static OUTBOUND_QUEUE: OutboundQueue = SharedFrameQueue::new();
#[cfg(feature = "embedded")]
static INBOUND_QUEUE: InboundQueue = SharedFrameQueue::new();
#[cfg(feature = "embedded")]
static RADIO_COMMAND_QUEUE: RadioCommandQueue = Channel::new();
#[cfg(feature = "embedded")]
static TX_REPORT_QUEUE: TxReportQueue = Channel::new();
#[cfg(feature = "embedded")]
static CONTROL_QUEUE: ControlQueue = Channel::new();
#[cfg(feature = "embedded")]
static COUNTERS: LinkCounters = LinkCounters::new();
#[cfg(feature = "embedded")]
static HANDLERS: HandlerRegistry = HandlerRegistry::new();
#[cfg(feature = "embedded")]
static THROUGHPUT_REPORT: ThroughputCell = ThroughputCell::new();
#[cfg(feature = "embedded")]
static DISPATCHER_STOP: StopSignal = Signal::new();
#[cfg(feature = "embedded")]
static THROUGHPUT_STOP: StopSignal = Signal::new();

/// Which interface role the radio is bound to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WifiInterface {
    Station,
    AccessPoint,
}

/// Link bring-up parameters passed to [`LinkManager::begin`].
#[derive(Clone, Copy, Debug)]
pub struct LinkConfiguration {
    /// Radio channel, `MIN_CHANNEL..=MAX_CHANNEL`, or [`CURRENT_CHANNEL`]
    /// to keep the channel the device is already on.
    pub channel: u8,
    pub interface: WifiInterface,
}

impl LinkConfiguration {
    pub const fn new(channel: u8, interface: WifiInterface) -> Self {
        LinkConfiguration { channel, interface }
    }
}

impl Default for LinkConfiguration {
    fn default() -> Self {
        LinkConfiguration::new(CURRENT_CHANNEL, WifiInterface::Station)
    }
}

/// Commands handed to the radio device task.
#[derive(Debug)]
pub(crate) enum RadioCommand {
    Transmit(OutboundFrame),
    AddPeer { address: MacAddress, interface: WifiInterface },
    RemovePeer(MacAddress),
    SetChannel(u8),
    Stop,
}

/// Asynchronous completion report for one transmission.
pub(crate) struct TxReport {
    pub(crate) destination: MacAddress,
    pub(crate) status: SendStatus,
}

#[derive(Debug)]
pub(crate) enum SchedulerControl {
    SetTransmitEnabled(bool),
    Stop,
}

/// Receive callback: `(source, payload, rssi, broadcast, channel)`.
pub type ReceiveHandler = fn(source: MacAddress, payload: &[u8], rssi: i16, broadcast: bool, channel: u8);
/// Send-result callback: `(destination, status)`.
pub type SendResultHandler = fn(destination: MacAddress, status: SendStatus);

/// Holds the application callbacks. One handler per event category; the
/// last registration wins. Read from the scheduler and dispatcher tasks.
pub(crate) struct HandlerRegistry {
    receive: Mutex<CriticalSectionRawMutex, Cell<Option<ReceiveHandler>>>,
    send_result: Mutex<CriticalSectionRawMutex, Cell<Option<SendResultHandler>>>,
}

impl HandlerRegistry {
    pub(crate) const fn new() -> Self {
        HandlerRegistry {
            receive: Mutex::new(Cell::new(None)),
            send_result: Mutex::new(Cell::new(None)),
        }
    }

    pub(crate) fn set_receive_handler(&self, handler: ReceiveHandler) {
        self.receive.lock(|cell| cell.set(Some(handler)));
    }

    pub(crate) fn set_send_result_handler(&self, handler: SendResultHandler) {
        self.send_result.lock(|cell| cell.set(Some(handler)));
    }

    pub(crate) fn receive_handler(&self) -> Option<ReceiveHandler> {
        self.receive.lock(|cell| cell.get())
    }

    pub(crate) fn send_result_handler(&self) -> Option<SendResultHandler> {
        self.send_result.lock(|cell| cell.get())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SendError {
    NotInited,
    EmptyPayload,
    PayloadTooLarge,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BeginError {
    AlreadyRunning,
    InvalidChannel(u8),
    /// Radio device bring-up failed. There is no software-level recovery;
    /// callers escalate (typically by restarting the process/device).
    Driver,
    Spawn,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SetChannelError {
    NotInited,
    InvalidChannel(u8),
}

/// Capability surface shared by all link transports, one implementation per
/// radio family. Bring-up is not part of the trait: its parameters (device
/// handle, executor) are implementation-specific.
pub trait LinkTransport {
    /// Queues one datagram for asynchronous transmission. `Ok` means
    /// accepted, not delivered; the outcome arrives at the send-result
    /// handler. On a full queue the oldest queued frame is silently
    /// discarded in favor of the new one.
    fn send(&self, destination: MacAddress, payload: &[u8]) -> Result<(), SendError>;
    fn on_receive(&self, handler: ReceiveHandler);
    fn on_send_result(&self, handler: SendResultHandler);
    fn enable_transmit(&self, enable: bool);
    fn stop(&mut self);
    fn address_length(&self) -> usize {
        ADDRESS_LENGTH
    }
    fn max_payload_length(&self) -> usize {
        MAX_PAYLOAD_LEN
    }
}

enum LinkManagerState {
    Uninitialized,
    Initialized {
        outbound: &'static OutboundQueue,
        control_sender: ControlSender,
        command_sender: RadioCommandSender,
        counters: &'static LinkCounters,
        handlers: &'static HandlerRegistry,
        report_cell: &'static ThroughputCell,
        dispatcher_stop: &'static StopSignal,
        throughput_stop: &'static StopSignal,
    },
}

pub struct LinkManager {
    state: LinkManagerState,
}

fn resolve_channel(requested: u8, device_current: u8) -> Result<u8, BeginError> {
    if requested == CURRENT_CHANNEL {
        return Ok(device_current);
    }
    if (MIN_CHANNEL..=MAX_CHANNEL).contains(&requested) {
        return Ok(requested);
    }
    Err(BeginError::InvalidChannel(requested))
}

impl LinkManager {
    pub const fn new() -> Self {
        LinkManager {
            state: LinkManagerState::Uninitialized,
        }
    }

    #[cfg(all(feature = "embedded", any(feature = "radio-device-mock", feature = "radio-device-echo")))]
    pub fn begin(&mut self, config: LinkConfiguration, spawner: Spawner, device: RadioDevice) -> Result<(), BeginError> {
        self.begin_common(
            config,
            spawner,
            device,
            &OUTBOUND_QUEUE,
            &INBOUND_QUEUE,
            &RADIO_COMMAND_QUEUE,
            &TX_REPORT_QUEUE,
            &CONTROL_QUEUE,
            &COUNTERS,
            &HANDLERS,
            &THROUGHPUT_REPORT,
            &DISPATCHER_STOP,
            &THROUGHPUT_STOP,
        )
    }

    #[cfg(all(feature = "std", any(feature = "radio-device-mock", feature = "radio-device-echo")))]
    pub fn begin(&mut self, config: LinkConfiguration, spawner: Spawner, device: RadioDevice) -> Result<(), BeginError> {
        let outbound: &'static OutboundQueue = Box::leak(Box::new(SharedFrameQueue::new()));
        let inbound: &'static InboundQueue = Box::leak(Box::new(SharedFrameQueue::new()));
        let commands: &'static RadioCommandQueue = Box::leak(Box::new(Channel::new()));
        let reports: &'static TxReportQueue = Box::leak(Box::new(Channel::new()));
        let control: &'static ControlQueue = Box::leak(Box::new(Channel::new()));
        let counters: &'static LinkCounters = Box::leak(Box::new(LinkCounters::new()));
        let handlers: &'static HandlerRegistry = Box::leak(Box::new(HandlerRegistry::new()));
        let report_cell: &'static ThroughputCell = Box::leak(Box::new(ThroughputCell::new()));
        let dispatcher_stop: &'static StopSignal = Box::leak(Box::new(Signal::new()));
        let throughput_stop: &'static StopSignal = Box::leak(Box::new(Signal::new()));
        self.begin_common(
            config,
            spawner,
            device,
            outbound,
            inbound,
            commands,
            reports,
            control,
            counters,
            handlers,
            report_cell,
            dispatcher_stop,
            throughput_stop,
        )
    }

    #[cfg(any(feature = "radio-device-mock", feature = "radio-device-echo"))]
    #[allow(clippy::too_many_arguments)]
    fn begin_common(
        &mut self,
        config: LinkConfiguration,
        spawner: Spawner,
        mut device: RadioDevice,
        outbound: &'static OutboundQueue,
        inbound: &'static InboundQueue,
        commands: &'static RadioCommandQueue,
        reports: &'static TxReportQueue,
        control: &'static ControlQueue,
        counters: &'static LinkCounters,
        handlers: &'static HandlerRegistry,
        report_cell: &'static ThroughputCell,
        dispatcher_stop: &'static StopSignal,
        throughput_stop: &'static StopSignal,
    ) -> Result<(), BeginError> {
        if matches!(self.state, LinkManagerState::Initialized { .. }) {
            return Err(BeginError::AlreadyRunning);
        }
        let channel = resolve_channel(config.channel, device.current_channel())?;
        device.set_channel(channel);
        log!(Level::Info, "Starting link on channel {} ({:?})", channel, config.interface);

        spawner
            .spawn(radio_device_task(
                device,
                commands.receiver(),
                RxCapture::new(inbound, counters),
                reports.sender(),
            ))
            .map_err(|_| BeginError::Spawn)?;
        spawner
            .spawn(tx_scheduler::tx_scheduler_task(
                outbound,
                control.receiver(),
                commands.sender(),
                reports.receiver(),
                counters,
                handlers,
                channel,
                config.interface,
            ))
            .map_err(|_| BeginError::Spawn)?;
        spawner
            .spawn(rx_dispatcher::rx_dispatcher_task(inbound, handlers, dispatcher_stop))
            .map_err(|_| BeginError::Spawn)?;
        spawner
            .spawn(throughput::throughput_task(counters, report_cell, throughput_stop))
            .map_err(|_| BeginError::Spawn)?;
        log!(Level::Info, "Link tasks spawned");

        self.state = LinkManagerState::Initialized {
            outbound,
            control_sender: control.sender(),
            command_sender: commands.sender(),
            counters,
            handlers,
            report_cell,
            dispatcher_stop,
            throughput_stop,
        };
        Ok(())
    }

    /// Queues one datagram for asynchronous transmission; see
    /// [`LinkTransport::send`].
    pub fn send(&self, destination: MacAddress, payload: &[u8]) -> Result<(), SendError> {
        let (outbound, counters) = match &self.state {
            LinkManagerState::Uninitialized => return Err(SendError::NotInited),
            LinkManagerState::Initialized { outbound, counters, .. } => (outbound, counters),
        };
        if payload.is_empty() {
            return Err(SendError::EmptyPayload);
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(SendError::PayloadTooLarge);
        }
        if let Some(dropped) = outbound.push_evicting(OutboundFrame::new(destination, payload)) {
            counters.add_tx_dropped(dropped.length);
            log!(Level::Debug, "Outbound queue full, dropped {} byte frame to {}", dropped.length, dropped.destination);
        }
        counters.add_tx_queued(payload.len());
        log!(Level::Debug, "{} frames queued, newest to {}", outbound.len(), destination);
        Ok(())
    }

    /// Registers the receive callback. Only one is retained; the last
    /// registration wins. Without a registered handler received frames are
    /// discarded.
    pub fn on_receive(&self, handler: ReceiveHandler) {
        match &self.state {
            LinkManagerState::Initialized { handlers, .. } => handlers.set_receive_handler(handler),
            LinkManagerState::Uninitialized => {
                log!(Level::Warn, "on_receive before begin, handler dropped");
            }
        }
    }

    /// Registers the send-result callback; last registration wins.
    pub fn on_send_result(&self, handler: SendResultHandler) {
        match &self.state {
            LinkManagerState::Initialized { handlers, .. } => handlers.set_send_result_handler(handler),
            LinkManagerState::Uninitialized => {
                log!(Level::Warn, "on_send_result before begin, handler dropped");
            }
        }
    }

    /// Pauses or resumes draining of the outbound queue. Queued frames are
    /// retained while transmission is disabled.
    pub fn enable_transmit(&self, enable: bool) {
        if let LinkManagerState::Initialized { control_sender, .. } = &self.state {
            if control_sender.try_send(SchedulerControl::SetTransmitEnabled(enable)).is_err() {
                log!(Level::Warn, "Scheduler control queue full, enable_transmit({}) dropped", enable);
            }
        }
    }

    /// Moves the radio to another channel. Frames already queued are sent
    /// on the new channel.
    pub fn set_channel(&self, channel: u8) -> Result<(), SetChannelError> {
        let command_sender = match &self.state {
            LinkManagerState::Uninitialized => return Err(SetChannelError::NotInited),
            LinkManagerState::Initialized { command_sender, .. } => command_sender,
        };
        if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
            return Err(SetChannelError::InvalidChannel(channel));
        }
        if command_sender.try_send(RadioCommand::SetChannel(channel)).is_err() {
            log!(Level::Warn, "Radio command queue full, channel change dropped");
        }
        Ok(())
    }

    /// Rates measured over the last completed interval.
    pub fn throughput(&self) -> ThroughputReport {
        match &self.state {
            LinkManagerState::Initialized { report_cell, .. } => report_cell.load(),
            LinkManagerState::Uninitialized => ThroughputReport::default(),
        }
    }

    /// Tears the background tasks down. Queued frames are not flushed; an
    /// in-flight transmission still completes inside the device.
    pub fn stop(&mut self) {
        if let LinkManagerState::Initialized {
            control_sender,
            command_sender,
            dispatcher_stop,
            throughput_stop,
            ..
        } = &self.state
        {
            if control_sender.try_send(SchedulerControl::Stop).is_err() {
                log!(Level::Warn, "Scheduler control queue full, stop delayed");
            }
            if command_sender.try_send(RadioCommand::Stop).is_err() {
                log!(Level::Warn, "Radio command queue full, device stop delayed");
            }
            dispatcher_stop.signal(());
            throughput_stop.signal(());
            log!(Level::Info, "Link stopped");
            self.state = LinkManagerState::Uninitialized;
        }
    }
}

impl LinkTransport for LinkManager {
    fn send(&self, destination: MacAddress, payload: &[u8]) -> Result<(), SendError> {
        LinkManager::send(self, destination, payload)
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        LinkManager::on_receive(self, handler)
    }

    fn on_send_result(&self, handler: SendResultHandler) {
        LinkManager::on_send_result(self, handler)
    }

    fn enable_transmit(&self, enable: bool) {
        LinkManager::enable_transmit(self, enable)
    }

    fn stop(&mut self) {
        LinkManager::stop(self)
    }
}

#[cfg(all(test, feature = "std"))]
pub(crate) struct TestWiring {
    pub(crate) outbound: &'static OutboundQueue,
    pub(crate) inbound: &'static InboundQueue,
    pub(crate) control: &'static ControlQueue,
    pub(crate) commands: &'static RadioCommandQueue,
    pub(crate) reports: &'static TxReportQueue,
    pub(crate) counters: &'static LinkCounters,
    pub(crate) handlers: &'static HandlerRegistry,
}

#[cfg(all(test, feature = "std"))]
impl LinkManager {
    /// Puts the manager into the initialized state without spawning any
    /// task, so the synchronous surface can be exercised directly.
    pub(crate) fn begin_for_tests(&mut self) -> TestWiring {
        let outbound: &'static OutboundQueue = Box::leak(Box::new(SharedFrameQueue::new()));
        let inbound: &'static InboundQueue = Box::leak(Box::new(SharedFrameQueue::new()));
        let control: &'static ControlQueue = Box::leak(Box::new(Channel::new()));
        let commands: &'static RadioCommandQueue = Box::leak(Box::new(Channel::new()));
        let reports: &'static TxReportQueue = Box::leak(Box::new(Channel::new()));
        let counters: &'static LinkCounters = Box::leak(Box::new(LinkCounters::new()));
        let handlers: &'static HandlerRegistry = Box::leak(Box::new(HandlerRegistry::new()));
        self.state = LinkManagerState::Initialized {
            outbound,
            control_sender: control.sender(),
            command_sender: commands.sender(),
            counters,
            handlers,
            report_cell: Box::leak(Box::new(ThroughputCell::new())),
            dispatcher_stop: Box::leak(Box::new(Signal::new())),
            throughput_stop: Box::leak(Box::new(Signal::new())),
        };
        TestWiring {
            outbound,
            inbound,
            control,
            commands,
            reports,
            counters,
            handlers,
        }
    }
}
