use std::collections::BTreeMap;

use fxhash::FxHashMap;

use super::channel_hit::ChannelHit;

/// (flattened module, channel)
pub type ChannelKey = (u32, u8);

/// A group of hits that fell inside one correlation window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Time of the earliest hit; the window is [anchor, anchor + width)
    pub anchor: u64,
    pub hits: Vec<ChannelHit>,
}

impl RawEvent {
    pub fn multiplicity(&self) -> usize {
        self.hits.len()
    }

    /// Time between the first and last hit
    pub fn span(&self) -> u64 {
        self.hits
            .last()
            .map_or(0, |h| h.coarse_time.saturating_sub(self.anchor))
    }
}

/// EventCorrelator groups hits from every channel into time-windowed RawEvents.
///
/// Hits wait in per-channel queues (the event list) until drained. Draining merges the
/// queues into one time-ordered list, ties broken by (module, channel), and cuts it into
/// windows. Each window is anchored at its earliest hit and does not slide as hits join.
/// A window is only emitted once a later hit proves it closed; the last open window is the
/// unconsumed tail, which close() or clear() throw away.
#[derive(Debug, Default)]
pub struct EventCorrelator {
    queues: BTreeMap<ChannelKey, Vec<ChannelHit>>,
    counts: FxHashMap<ChannelKey, u64>,
    discarded_hits: u64,
}

impl EventCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add hits to their channel queues
    pub fn ingest<I: IntoIterator<Item = ChannelHit>>(&mut self, hits: I) {
        for hit in hits {
            let key = (hit.module, hit.channel);
            *self.counts.entry(key).or_insert(0) += 1;
            self.queues.entry(key).or_default().push(hit);
        }
    }

    /// Number of hits waiting in the event list
    pub fn pending(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    /// Hits ever ingested on a channel
    pub fn count(&self, module: u32, channel: u8) -> u64 {
        self.counts.get(&(module, channel)).copied().unwrap_or(0)
    }

    pub fn channel_counts(&self) -> &FxHashMap<ChannelKey, u64> {
        &self.counts
    }

    /// Hits thrown away by close() or clear()
    pub fn discarded_hits(&self) -> u64 {
        self.discarded_hits
    }

    /// Emit every closed window. The still-open tail stays in the event list.
    pub fn drain_events(&mut self, width: u64) -> Vec<RawEvent> {
        let (events, tail) = Self::build_events(self.take_sorted(), width, false);
        for hit in tail {
            self.queues
                .entry((hit.module, hit.channel))
                .or_default()
                .push(hit);
        }
        events
    }

    /// Emit every window, including the open tail
    pub fn flush(&mut self, width: u64) -> Vec<RawEvent> {
        let (events, _) = Self::build_events(self.take_sorted(), width, true);
        events
    }

    /// Throw away the unconsumed tail. Returns how many hits were dropped.
    pub fn close(&mut self) -> usize {
        let dropped = self.pending();
        if dropped > 0 {
            spdlog::debug!("Discarding {} unconsumed hits", dropped);
        }
        self.discarded_hits += dropped as u64;
        self.queues.clear();
        dropped
    }

    /// Throw away the tail and reset the channel counters
    pub fn clear(&mut self) -> usize {
        let dropped = self.close();
        self.counts.clear();
        dropped
    }

    /// Merge every queue into a single list ordered by (time, module, channel)
    fn take_sorted(&mut self) -> Vec<ChannelHit> {
        let mut merged: Vec<ChannelHit> = Vec::with_capacity(self.pending());
        for (_, queue) in std::mem::take(&mut self.queues) {
            merged.extend(queue);
        }
        merged.sort_by_key(|h| (h.coarse_time, h.module, h.channel));
        merged
    }

    /// Cut a sorted list into fixed-anchor windows. Returns the events and the open tail
    /// (empty when `include_tail` is set).
    fn build_events(
        sorted: Vec<ChannelHit>,
        width: u64,
        include_tail: bool,
    ) -> (Vec<RawEvent>, Vec<ChannelHit>) {
        let width = width.max(1);
        let mut bounds = Vec::new();
        let mut start = 0;
        while start < sorted.len() {
            let anchor = sorted[start].coarse_time;
            let end = anchor.saturating_add(width);
            let stop = start + sorted[start..].partition_point(|h| h.coarse_time < end);
            if stop == sorted.len() && !include_tail {
                break;
            }
            bounds.push((anchor, stop - start));
            start = stop;
        }

        let mut hits = sorted.into_iter();
        let events = bounds
            .into_iter()
            .map(|(anchor, len)| RawEvent {
                anchor,
                hits: hits.by_ref().take(len).collect(),
            })
            .collect();
        (events, hits.collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(module: u32, channel: u8, time: u64) -> ChannelHit {
        ChannelHit {
            module,
            channel,
            coarse_time: time,
            ..Default::default()
        }
    }

    /// Small deterministic generator so the checks below cover many orderings
    fn pseudo_random_hits(n: usize, seed: u64) -> Vec<ChannelHit> {
        let mut state = seed;
        let mut next = move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            state >> 33
        };
        (0..n)
            .map(|_| hit((next() % 4) as u32, (next() % 16) as u8, next() % 5000))
            .collect()
    }

    #[test]
    fn window_anchor_does_not_slide() {
        let mut correlator = EventCorrelator::new();
        correlator.ingest(vec![hit(0, 0, 0), hit(0, 1, 60), hit(0, 2, 120)]);
        let events = correlator.drain_events(100);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].anchor, 0);
        assert_eq!(events[0].multiplicity(), 2);
        // 120 is within 100 of 60 but outside the window anchored at 0
        assert_eq!(correlator.pending(), 1);
        assert_eq!(correlator.close(), 1);
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn ties_break_by_module_then_channel() {
        let mut correlator = EventCorrelator::new();
        correlator.ingest(vec![hit(2, 1, 50), hit(1, 3, 50), hit(1, 0, 50), hit(0, 0, 500)]);
        let events = correlator.drain_events(10);
        let order: Vec<(u32, u8)> = events[0]
            .hits
            .iter()
            .map(|h| (h.module, h.channel))
            .collect();
        assert_eq!(order, vec![(1, 0), (1, 3), (2, 1)]);
    }

    #[test]
    fn members_stay_inside_window_and_appear_once() {
        for seed in 1..20 {
            let hits = pseudo_random_hits(300, seed);
            let width = 1 + seed * 7;
            let mut correlator = EventCorrelator::new();
            // Ingest in two batches to exercise the carried tail
            correlator.ingest(hits[..150].to_vec());
            let mut events = correlator.drain_events(width);
            correlator.ingest(hits[150..].to_vec());
            events.extend(correlator.drain_events(width));
            let discarded = correlator.close();

            let mut seen = 0;
            for event in events.iter() {
                assert!(!event.hits.is_empty());
                assert_eq!(event.hits[0].coarse_time, event.anchor);
                for h in event.hits.iter() {
                    assert!(h.coarse_time >= event.anchor);
                    assert!(h.coarse_time < event.anchor + width);
                }
                seen += event.multiplicity();
            }
            assert_eq!(seen + discarded, hits.len());
        }
    }

    #[test]
    fn events_are_time_ordered_across_drains() {
        let mut correlator = EventCorrelator::new();
        correlator.ingest(vec![hit(0, 0, 1000), hit(0, 0, 10)]);
        let first = correlator.drain_events(100);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].anchor, 10);
        // A late hit joins the carried tail window
        correlator.ingest(vec![hit(1, 0, 1050), hit(1, 0, 5000)]);
        let second = correlator.drain_events(100);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].anchor, 1000);
        assert_eq!(second[0].multiplicity(), 2);
        assert_eq!(second[0].span(), 50);
    }

    #[test]
    fn flush_emits_the_tail() {
        let mut correlator = EventCorrelator::new();
        correlator.ingest(vec![hit(0, 0, 0), hit(0, 0, 500), hit(0, 1, 510)]);
        let events = correlator.flush(100);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].multiplicity(), 2);
        assert_eq!(correlator.pending(), 0);
        assert_eq!(correlator.close(), 0);
    }

    #[test]
    fn counters_track_ingest_until_cleared() {
        let mut correlator = EventCorrelator::new();
        correlator.ingest(vec![hit(3, 4, 0), hit(3, 4, 1), hit(3, 5, 2)]);
        assert_eq!(correlator.count(3, 4), 2);
        assert_eq!(correlator.count(3, 5), 1);
        assert_eq!(correlator.count(9, 9), 0);
        correlator.drain_events(1);
        assert_eq!(correlator.count(3, 4), 2);
        assert_eq!(correlator.clear(), 1);
        assert_eq!(correlator.count(3, 4), 0);
        assert_eq!(correlator.discarded_hits(), 1);
    }
}
