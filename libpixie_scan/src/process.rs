use std::io::{Read, Seek};
use std::sync::mpsc::Sender;

use super::analyzer::{Analyzer, EventTally};
use super::channel_hit::ChannelHit;
use super::config::Config;
use super::error::{ChunkError, ConfigError, ProcessorError};
use super::event_correlator::{EventCorrelator, RawEvent};
use super::output_file::OutputFile;
use super::spill::{SpillReader, SpillVerdict};
use super::stats::{lock_stats, SharedStats, StatsHandler, StatsSnapshot};
use super::transport::{FileTransport, Transport, TransportEvent};
use super::word_decoder::WordDecoder;
use super::worker_status::{BarColor, WorkerStatus};

/// Build the statistics object described by the config
pub fn create_stats(config: &Config) -> Result<SharedStats, ProcessorError> {
    let mut handler = StatsHandler::new(config.stats_interval());
    if let Some(address) = &config.stats_address {
        handler = handler.with_target(address)?;
    }
    Ok(handler.into_shared())
}

/// Everything between a Transport and the Analyzer: spill framing, decoding, correlation,
/// the optional copy to an output file, and statistics.
pub struct Pipeline {
    reader: SpillReader,
    correlator: EventCorrelator,
    hits: Vec<ChannelHit>,
    output: Option<OutputFile>,
    analyzer: Box<dyn Analyzer + Send>,
    stats: SharedStats,
    event_width: u64,
    carry_tail: bool,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        analyzer: Box<dyn Analyzer + Send>,
        stats: SharedStats,
    ) -> Result<Self, ProcessorError> {
        let output = match &config.output_path {
            Some(path) => Some(OutputFile::create(
                path,
                config.output_format,
                &config.run_title,
                config.run_number,
            )?),
            None => None,
        };
        if config.dry_run {
            spdlog::info!("Dry run; events will not be analyzed");
        }
        Ok(Self {
            reader: SpillReader::new(WordDecoder::new(config.decoder_config())),
            correlator: EventCorrelator::new(),
            hits: Vec::new(),
            output,
            analyzer,
            stats,
            event_width: config.event_width,
            carry_tail: config.carry_tail,
            dry_run: config.dry_run,
        })
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    pub fn correlator(&self) -> &EventCorrelator {
        &self.correlator
    }

    /// Frame, decode and correlate one spill, handing closed events to the analyzer.
    ///
    /// Unless the tail is carried, hits left in the open window at the end of the spill are
    /// discarded.
    pub fn handle_spill(&mut self, spill: &[u32]) -> Result<SpillVerdict, ProcessorError> {
        self.hits.clear();
        let verdict = self.reader.read_spill(spill, &mut self.hits);
        match &verdict {
            SpillVerdict::Full(summary) => {
                if let Some(output) = self.output.as_mut() {
                    output.write_spill(spill)?;
                }
                lock_stats(&self.stats)?.record_spill(summary, &self.hits);
                self.correlator.ingest(self.hits.drain(..));
                let events = self.correlator.drain_events(self.event_width);
                self.dispatch(events)?;
                if !self.carry_tail {
                    self.correlator.close();
                }
            }
            SpillVerdict::Bad(_) => lock_stats(&self.stats)?.record_bad_spill(spill.len()),
        }
        Ok(verdict)
    }

    pub fn handle_dropped(&mut self, reason: &ChunkError) -> Result<(), ProcessorError> {
        spdlog::warn!("Spill lost in transport: {reason}");
        lock_stats(&self.stats)?.record_dropped_spill();
        Ok(())
    }

    /// Start a new file: forget pending hits and counters
    pub fn begin_file(&mut self) -> Result<(), ProcessorError> {
        self.correlator.clear();
        lock_stats(&self.stats)?.reset();
        self.analyzer.begin_run();
        Ok(())
    }

    /// Finish a file: pending hits form the final events. Returns the number of events.
    pub fn end_file(&mut self) -> Result<usize, ProcessorError> {
        let events = self.correlator.flush(self.event_width);
        let count = self.dispatch(events)?;
        self.analyzer.end_run();
        lock_stats(&self.stats)?.flush();
        Ok(count)
    }

    /// Finish the file and close the output
    pub fn close(mut self) -> Result<StatsSnapshot, ProcessorError> {
        self.end_file()?;
        if let Some(output) = self.output.take() {
            output.close()?;
        }
        Ok(lock_stats(&self.stats)?.snapshot())
    }

    fn dispatch(&mut self, events: Vec<RawEvent>) -> Result<usize, ProcessorError> {
        if !self.dry_run {
            for event in events.iter() {
                self.analyzer.analyze(event);
            }
        }
        lock_stats(&self.stats)?.record_events(events.len());
        Ok(events.len())
    }
}

/// Run a whole file through the pipeline.
///
/// Progress is reported over the channel in steps of 1% of the file. The pipeline is closed
/// (output finalized, analyzer told the run ended) even when the scan stops on an error.
pub fn process_file(
    config: &Config,
    analyzer: Box<dyn Analyzer + Send>,
    tx: &Sender<WorkerStatus>,
) -> Result<StatsSnapshot, ProcessorError> {
    let path = config
        .input_path
        .as_deref()
        .ok_or_else(|| ConfigError::MissingInput(format!("{:?}", config.input_format)))?;
    let mut transport = FileTransport::open(path, config.input_format.file_format())?;
    let mut pipeline = Pipeline::new(config, analyzer, create_stats(config)?)?;

    let mut progress = ScanProgress {
        run_number: config.run_number,
        spills: 0,
    };
    let scanned = scan_file(&mut transport, &mut pipeline, tx, &mut progress);
    let closed = pipeline.close();
    if let Err(e) = &scanned {
        if let Err(close_error) = &closed {
            spdlog::error!("Could not close pipeline after scan error: {close_error}");
        }
        spdlog::error!("Scan of {} stopped: {e}", path.display());
    }
    scanned?;
    let snapshot = closed?;

    tx.send(WorkerStatus::new(
        1.0,
        progress.run_number,
        progress.spills,
        BarColor::GREEN,
    ))?;
    spdlog::info!("Done with {}: {}", path.display(), snapshot.summary());
    Ok(snapshot)
}

#[derive(Debug, Clone, Copy)]
struct ScanProgress {
    run_number: u32,
    spills: u64,
}

fn scan_file<R: Read + Seek>(
    transport: &mut FileTransport<R>,
    pipeline: &mut Pipeline,
    tx: &Sender<WorkerStatus>,
    progress: &mut ScanProgress,
) -> Result<(), ProcessorError> {
    pipeline.begin_file()?;
    let flush_frac: f32 = 0.01;
    let mut next_report = flush_frac;
    tx.send(WorkerStatus::new(
        0.0,
        progress.run_number,
        progress.spills,
        BarColor::CYAN,
    ))?;
    loop {
        match transport.next_spill()? {
            TransportEvent::Spill(words) => {
                pipeline.handle_spill(&words)?;
                progress.spills += 1;
            }
            TransportEvent::Dropped(reason) => pipeline.handle_dropped(&reason)?,
            TransportEvent::Control(_) | TransportEvent::Timeout => (),
            TransportEvent::Exhausted => break,
        }
        if let Some(number) = transport.run_number() {
            progress.run_number = number;
        }
        if let Some(fraction) = transport.progress() {
            if fraction >= next_report {
                next_report = fraction + flush_frac;
                tx.send(WorkerStatus::new(
                    fraction,
                    progress.run_number,
                    progress.spills,
                    BarColor::CYAN,
                ))?;
            }
        }
        lock_stats(pipeline.stats())?.maybe_flush();
    }
    Ok(())
}

/// The function to be called by a separate thread (typically the CLI).
/// Events are counted with an [EventTally].
pub fn process(config: Config, tx: Sender<WorkerStatus>) -> Result<StatsSnapshot, ProcessorError> {
    process_file(&config, Box::new(EventTally::new()), &tx)
}
