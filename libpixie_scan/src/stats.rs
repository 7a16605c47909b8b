use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::channel_hit::ChannelHit;
use super::error::StatsError;
use super::spill::SpillSummary;

/// Statistics shared between the run loop and whoever wants to look at them
pub type SharedStats = Arc<Mutex<StatsHandler>>;

/// Lock the shared statistics
pub fn lock_stats(stats: &SharedStats) -> Result<MutexGuard<'_, StatsHandler>, StatsError> {
    stats.lock().map_err(|_| StatsError::Poisoned)
}

/// A point-in-time copy of the run statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub spills: u64,
    pub bad_spills: u64,
    pub dropped_spills: u64,
    pub words: u64,
    pub hits: u64,
    pub decode_errors: u64,
    pub events: u64,
    pub elapsed_seconds: f64,
    /// Hits per flattened module
    pub module_hits: BTreeMap<u32, u64>,
}

impl StatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.hits as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// One line summary for logs and the status command
    pub fn summary(&self) -> String {
        format!(
            "{} spills ({} bad, {} dropped), {} read, {} hits ({:.1} Hz), {} events, {} decode errors",
            self.spills,
            self.bad_spills,
            self.dropped_spills,
            human_bytes::human_bytes((self.words * 4) as f64),
            self.hits,
            self.hit_rate(),
            self.events,
            self.decode_errors,
        )
    }
}

/// Accumulates run statistics and periodically sends them out over UDP
#[derive(Debug)]
pub struct StatsHandler {
    spills: u64,
    bad_spills: u64,
    dropped_spills: u64,
    words: u64,
    hits: u64,
    decode_errors: u64,
    events: u64,
    module_hits: FxHashMap<u32, u64>,
    started: Instant,
    last_flush: Instant,
    interval: Duration,
    socket: Option<UdpSocket>,
}

impl StatsHandler {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            spills: 0,
            bad_spills: 0,
            dropped_spills: 0,
            words: 0,
            hits: 0,
            decode_errors: 0,
            events: 0,
            module_hits: FxHashMap::default(),
            started: now,
            last_flush: now,
            interval,
            socket: None,
        }
    }

    /// Send snapshots to the given host:port on every flush
    pub fn with_target(mut self, address: &str) -> Result<Self, StatsError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(address)?;
        spdlog::info!("Sending statistics to {address}");
        self.socket = Some(socket);
        Ok(self)
    }

    pub fn into_shared(self) -> SharedStats {
        Arc::new(Mutex::new(self))
    }

    pub fn record_spill(&mut self, summary: &SpillSummary, hits: &[ChannelHit]) {
        self.spills += 1;
        self.words += summary.words as u64;
        self.hits += summary.hits as u64;
        self.decode_errors += summary.decode_errors as u64;
        for hit in hits {
            *self.module_hits.entry(hit.module).or_insert(0) += 1;
        }
    }

    pub fn record_bad_spill(&mut self, words: usize) {
        self.bad_spills += 1;
        self.words += words as u64;
    }

    pub fn record_dropped_spill(&mut self) {
        self.dropped_spills += 1;
    }

    pub fn record_events(&mut self, events: usize) {
        self.events += events as u64;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            spills: self.spills,
            bad_spills: self.bad_spills,
            dropped_spills: self.dropped_spills,
            words: self.words,
            hits: self.hits,
            decode_errors: self.decode_errors,
            events: self.events,
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
            module_hits: self.module_hits.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }

    /// Zero every counter, for a new file or run
    pub fn reset(&mut self) {
        let interval = self.interval;
        let socket = self.socket.take();
        *self = Self::new(interval);
        self.socket = socket;
    }

    /// Flush if the interval has passed. Returns true if a flush happened.
    pub fn maybe_flush(&mut self) -> bool {
        if self.last_flush.elapsed() < self.interval {
            return false;
        }
        self.flush();
        true
    }

    /// Log the current snapshot and send it to the target, if any.
    ///
    /// A failed send is logged and otherwise ignored; the collector may come and go.
    pub fn flush(&mut self) {
        self.last_flush = Instant::now();
        let snapshot = self.snapshot();
        spdlog::info!("{}", snapshot.summary());
        let Some(socket) = &self.socket else {
            return;
        };
        match serde_yaml::to_string(&snapshot) {
            Ok(yaml) => {
                if let Err(e) = socket.send(yaml.as_bytes()) {
                    spdlog::warn!("Could not send statistics: {e}");
                }
            }
            Err(e) => spdlog::warn!("Could not serialize statistics: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(module: u32) -> ChannelHit {
        ChannelHit {
            module,
            ..Default::default()
        }
    }

    #[test]
    fn counters_accumulate_and_reset() {
        let mut stats = StatsHandler::new(Duration::from_secs(60));
        let hits = vec![hit(0), hit(0), hit(3)];
        let summary = SpillSummary {
            words: 40,
            modules: 2,
            hits: 3,
            decode_errors: 1,
        };
        stats.record_spill(&summary, &hits);
        stats.record_bad_spill(10);
        stats.record_dropped_spill();
        stats.record_events(2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.spills, 1);
        assert_eq!(snapshot.bad_spills, 1);
        assert_eq!(snapshot.dropped_spills, 1);
        assert_eq!(snapshot.words, 50);
        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.events, 2);
        assert_eq!(snapshot.module_hits.get(&0), Some(&2));
        assert_eq!(snapshot.module_hits.get(&3), Some(&1));
        assert!(!stats.maybe_flush());

        stats.reset();
        assert_eq!(stats.snapshot().spills, 0);
        assert!(stats.snapshot().module_hits.is_empty());
    }

    #[test]
    fn flush_sends_yaml_snapshot() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let address = receiver.local_addr().unwrap().to_string();
        let stats = StatsHandler::new(Duration::ZERO)
            .with_target(&address)
            .unwrap()
            .into_shared();
        {
            let mut handler = lock_stats(&stats).unwrap();
            handler.record_events(7);
            assert!(handler.maybe_flush());
        }
        let mut buffer = [0u8; 4096];
        let size = receiver.recv(&mut buffer).unwrap();
        let snapshot: StatsSnapshot = serde_yaml::from_slice(&buffer[..size]).unwrap();
        assert_eq!(snapshot.events, 7);
    }

    #[test]
    fn missing_collector_does_not_stop_flushing() {
        let closed = UdpSocket::bind("127.0.0.1:0").unwrap();
        let address = closed.local_addr().unwrap().to_string();
        drop(closed);
        let mut stats = StatsHandler::new(Duration::ZERO)
            .with_target(&address)
            .unwrap();
        for spills in 1..=5 {
            stats.record_bad_spill(4);
            assert!(stats.maybe_flush());
            assert_eq!(stats.snapshot().bad_spills, spills);
        }
    }
}
