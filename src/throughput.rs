//! Interval byte counters and the periodic throughput measurement task.
//!
//! Counting happens inline on the data paths (enqueue, hand-off to the
//! radio, overflow drop, capture); the numbers are folded into rates on a
//! timer and exposed as a snapshot. Everything here is observational; a
//! stalled or stopped measurement task has no effect on scheduling.

use core::cell::Cell;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant, Timer};
use log::log;

use crate::{StopSignal, THROUGHPUT_MEAS_INTERVAL_MS};

type CounterCell = Mutex<CriticalSectionRawMutex, Cell<u32>>;

pub(crate) struct LinkCounters {
    tx_queued_bytes: CounterCell,
    tx_radio_bytes: CounterCell,
    tx_dropped_bytes: CounterCell,
    rx_bytes: CounterCell,
}

#[derive(Clone, Copy, Default)]
pub(crate) struct CountersSnapshot {
    pub(crate) tx_queued_bytes: u32,
    pub(crate) tx_radio_bytes: u32,
    pub(crate) tx_dropped_bytes: u32,
    pub(crate) rx_bytes: u32,
}

fn bump(cell: &CounterCell, amount: usize) {
    cell.lock(|c| c.set(c.get().saturating_add(amount as u32)));
}

fn take(cell: &CounterCell) -> u32 {
    cell.lock(|c| c.replace(0))
}

impl LinkCounters {
    pub(crate) const fn new() -> Self {
        LinkCounters {
            tx_queued_bytes: Mutex::new(Cell::new(0)),
            tx_radio_bytes: Mutex::new(Cell::new(0)),
            tx_dropped_bytes: Mutex::new(Cell::new(0)),
            rx_bytes: Mutex::new(Cell::new(0)),
        }
    }

    pub(crate) fn add_tx_queued(&self, bytes: usize) {
        bump(&self.tx_queued_bytes, bytes);
    }

    pub(crate) fn add_tx_radio(&self, bytes: usize) {
        bump(&self.tx_radio_bytes, bytes);
    }

    pub(crate) fn add_tx_dropped(&self, bytes: usize) {
        bump(&self.tx_dropped_bytes, bytes);
    }

    pub(crate) fn add_rx(&self, bytes: usize) {
        bump(&self.rx_bytes, bytes);
    }

    /// Reads and resets all counters, starting a fresh interval.
    pub(crate) fn take_snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            tx_queued_bytes: take(&self.tx_queued_bytes),
            tx_radio_bytes: take(&self.tx_radio_bytes),
            tx_dropped_bytes: take(&self.tx_dropped_bytes),
            rx_bytes: take(&self.rx_bytes),
        }
    }
}

/// Rates over the last completed measurement interval.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ThroughputReport {
    /// Bytes per second accepted into the outbound queue.
    pub tx_rate: u32,
    /// Bytes per second actually handed to the radio device.
    pub tx_radio_rate: u32,
    /// Bytes per second received over the air.
    pub rx_rate: u32,
    /// Overflow-dropped bytes over queued bytes; 0 when nothing was queued.
    pub drop_ratio: f32,
}

pub(crate) struct ThroughputCell(Mutex<CriticalSectionRawMutex, Cell<ThroughputReport>>);

impl ThroughputCell {
    pub(crate) const fn new() -> Self {
        ThroughputCell(Mutex::new(Cell::new(ThroughputReport {
            tx_rate: 0,
            tx_radio_rate: 0,
            rx_rate: 0,
            drop_ratio: 0.0,
        })))
    }

    pub(crate) fn store(&self, report: ThroughputReport) {
        self.0.lock(|c| c.set(report));
    }

    pub(crate) fn load(&self) -> ThroughputReport {
        self.0.lock(|c| c.get())
    }
}

fn rate(bytes: u32, elapsed_ms: u64) -> u32 {
    (bytes as u64 * 1000 / elapsed_ms) as u32
}

pub(crate) fn compute_report(snapshot: CountersSnapshot, elapsed_ms: u64) -> ThroughputReport {
    let elapsed_ms = elapsed_ms.max(1);
    if snapshot.tx_queued_bytes == 0 && snapshot.rx_bytes == 0 {
        return ThroughputReport::default();
    }
    let drop_ratio = if snapshot.tx_queued_bytes == 0 {
        0.0
    } else {
        snapshot.tx_dropped_bytes as f32 / snapshot.tx_queued_bytes as f32
    };
    ThroughputReport {
        tx_rate: rate(snapshot.tx_queued_bytes, elapsed_ms),
        tx_radio_rate: rate(snapshot.tx_radio_bytes, elapsed_ms),
        rx_rate: rate(snapshot.rx_bytes, elapsed_ms),
        drop_ratio,
    }
}

#[cfg_attr(feature = "std", embassy_executor::task(pool_size = 8))]
#[cfg_attr(feature = "embedded", embassy_executor::task(pool_size = 1))]
pub(crate) async fn throughput_task(
    counters: &'static LinkCounters,
    report_cell: &'static ThroughputCell,
    stop: &'static StopSignal,
) {
    let mut last_meas = Instant::now();
    log!(log::Level::Debug, "Throughput task started");
    loop {
        match select(Timer::after(Duration::from_millis(THROUGHPUT_MEAS_INTERVAL_MS)), stop.wait()).await {
            Either::First(()) => {
                let elapsed_ms = last_meas.elapsed().as_millis();
                last_meas = Instant::now();
                let report = compute_report(counters.take_snapshot(), elapsed_ms);
                report_cell.store(report);
                log!(
                    log::Level::Debug,
                    "tx: {:.1} kbps, drop ratio: {:.2} %, rx: {:.1} kbps",
                    report.tx_rate as f32 * 8.0 / 1000.0,
                    report.drop_ratio * 100.0,
                    report.rx_rate as f32 * 8.0 / 1000.0
                );
            }
            Either::Second(()) => {
                log!(log::Level::Debug, "Throughput task stopped");
                return;
            }
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn rates_scale_bytes_to_per_second() {
        let snapshot = CountersSnapshot {
            tx_queued_bytes: 1500,
            tx_radio_bytes: 1000,
            tx_dropped_bytes: 500,
            rx_bytes: 3000,
        };
        let report = compute_report(snapshot, 500);
        assert_eq!(report.tx_rate, 3000);
        assert_eq!(report.tx_radio_rate, 2000);
        assert_eq!(report.rx_rate, 6000);
        assert!((report.drop_ratio - 500.0 / 1500.0).abs() < f32::EPSILON);
    }

    #[test]
    fn idle_interval_reports_zeros() {
        let report = compute_report(CountersSnapshot::default(), 15_000);
        assert_eq!(report, ThroughputReport::default());
    }

    #[test]
    fn drop_ratio_is_zero_when_nothing_was_queued() {
        let snapshot = CountersSnapshot {
            rx_bytes: 100,
            ..CountersSnapshot::default()
        };
        let report = compute_report(snapshot, 1000);
        assert_eq!(report.drop_ratio, 0.0);
        assert_eq!(report.rx_rate, 100);
        assert_eq!(report.tx_rate, 0);
    }

    #[test]
    fn take_snapshot_resets_the_interval() {
        let counters = LinkCounters::new();
        counters.add_tx_queued(10);
        counters.add_tx_dropped(4);
        counters.add_tx_radio(6);
        counters.add_rx(20);
        let first = counters.take_snapshot();
        assert_eq!(first.tx_queued_bytes, 10);
        assert_eq!(first.tx_dropped_bytes, 4);
        assert_eq!(first.tx_radio_bytes, 6);
        assert_eq!(first.rx_bytes, 20);
        let second = counters.take_snapshot();
        assert_eq!(second.tx_queued_bytes, 0);
        assert_eq!(second.rx_bytes, 0);
    }
}
