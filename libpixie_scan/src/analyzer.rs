use std::collections::BTreeMap;

use fxhash::FxHashMap;

use super::event_correlator::RawEvent;

/// The boundary where correlated events leave the pipeline.
///
/// Detector maps, calibration and physics processing live on the other side.
pub trait Analyzer {
    fn analyze(&mut self, event: &RawEvent);

    /// Called when a new file or run starts
    fn begin_run(&mut self) {}

    /// Called once the last event of a file or run has been handed over
    fn end_run(&mut self) {}
}

/// Counts events by multiplicity and module. Used when nothing else is attached.
#[derive(Debug, Default, Clone)]
pub struct EventTally {
    events: u64,
    hits: u64,
    multiplicity: FxHashMap<usize, u64>,
    module_events: FxHashMap<u32, u64>,
}

impl EventTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of events seen for each multiplicity, in order
    pub fn multiplicity(&self) -> BTreeMap<usize, u64> {
        self.multiplicity.iter().map(|(k, v)| (*k, *v)).collect()
    }

    /// Number of events each module took part in
    pub fn module_events(&self, module: u32) -> u64 {
        self.module_events.get(&module).copied().unwrap_or(0)
    }
}

impl Analyzer for EventTally {
    fn analyze(&mut self, event: &RawEvent) {
        self.events += 1;
        self.hits += event.multiplicity() as u64;
        *self.multiplicity.entry(event.multiplicity()).or_insert(0) += 1;
        let mut modules: Vec<u32> = event.hits.iter().map(|h| h.module).collect();
        modules.sort_unstable();
        modules.dedup();
        for module in modules {
            *self.module_events.entry(module).or_insert(0) += 1;
        }
    }

    fn begin_run(&mut self) {
        *self = Self::default();
    }

    fn end_run(&mut self) {
        spdlog::info!(
            "Analyzed {} events ({} hits); multiplicity {:?}",
            self.events,
            self.hits,
            self.multiplicity()
        );
    }
}
