//! Live acquisition.
//!
//! The run-control thread owns the Transport and the Pipeline. It receives with a timeout,
//! so the flags below are checked at least once per timeout period. The command side only
//! touches the flags and reads statistics through their mutex.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::error::ProcessorError;
use super::process::Pipeline;
use super::stats::{lock_stats, SharedStats, StatsSnapshot};
use super::transport::{ControlMessage, Transport, TransportEvent};

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct RunFlags {
    kill: AtomicBool,
    exited: AtomicBool,
    acquire: AtomicBool,
}

/// Handle to a running run-control thread
#[derive(Debug)]
pub struct RunControl {
    flags: Arc<RunFlags>,
    stats: SharedStats,
    handle: Option<JoinHandle<Result<(), ProcessorError>>>,
}

impl RunControl {
    /// Start the run-control thread. Acquisition starts enabled.
    pub fn spawn(transport: Box<dyn Transport + Send>, pipeline: Pipeline) -> Self {
        let flags = Arc::new(RunFlags::default());
        flags.acquire.store(true, Ordering::Relaxed);
        let stats = pipeline.stats().clone();
        let thread_flags = flags.clone();
        let handle = std::thread::spawn(move || {
            let result = run_loop(transport, pipeline, &thread_flags);
            if let Err(e) = &result {
                spdlog::error!("Run control stopped with error: {e}");
            }
            thread_flags.exited.store(true, Ordering::Release);
            result
        });
        Self {
            flags,
            stats,
            handle: Some(handle),
        }
    }

    /// Resume handing spills to the pipeline
    pub fn start(&self) {
        self.flags.acquire.store(true, Ordering::Relaxed);
        spdlog::info!("Acquisition started");
    }

    /// Keep receiving, but ignore spills
    pub fn stop(&self) {
        self.flags.acquire.store(false, Ordering::Relaxed);
        spdlog::info!("Acquisition stopped");
    }

    pub fn is_acquiring(&self) -> bool {
        self.flags.acquire.load(Ordering::Relaxed)
    }

    pub fn has_exited(&self) -> bool {
        self.flags.exited.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Result<StatsSnapshot, ProcessorError> {
        Ok(lock_stats(&self.stats)?.snapshot())
    }

    /// Ask the thread to stop and wait up to `timeout` for it to do so
    pub fn shutdown(mut self, timeout: Duration) -> Result<(), ProcessorError> {
        self.flags.kill.store(true, Ordering::Relaxed);
        let started = Instant::now();
        while !self.has_exited() {
            if started.elapsed() > timeout {
                spdlog::warn!("Run control did not exit within {timeout:?}; leaving it behind");
                return Ok(());
            }
            std::thread::sleep(SHUTDOWN_POLL);
        }
        match self.handle.take().map(|h| h.join()) {
            Some(Ok(result)) => result,
            Some(Err(_)) => {
                spdlog::error!("Run control thread panicked");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// The pipeline is closed however the loop ends, so the output file is always finalized
fn run_loop(
    mut transport: Box<dyn Transport + Send>,
    mut pipeline: Pipeline,
    flags: &RunFlags,
) -> Result<(), ProcessorError> {
    let received = receive_loop(transport.as_mut(), &mut pipeline, flags);
    let closed = pipeline.close();
    if let (Err(_), Err(close_error)) = (&received, &closed) {
        spdlog::error!("Could not close pipeline after run control error: {close_error}");
    }
    received?;
    spdlog::info!("Run control finished: {}", closed?.summary());
    Ok(())
}

fn receive_loop(
    transport: &mut dyn Transport,
    pipeline: &mut Pipeline,
    flags: &RunFlags,
) -> Result<(), ProcessorError> {
    pipeline.begin_file()?;
    while !flags.kill.load(Ordering::Relaxed) {
        match transport.next_spill()? {
            TransportEvent::Spill(words) => {
                if flags.acquire.load(Ordering::Relaxed) {
                    pipeline.handle_spill(&words)?;
                }
            }
            TransportEvent::Dropped(reason) => pipeline.handle_dropped(&reason)?,
            TransportEvent::Control(ControlMessage::OpenFile) => pipeline.begin_file()?,
            TransportEvent::Control(ControlMessage::CloseFile) => {
                pipeline.end_file()?;
            }
            TransportEvent::Control(ControlMessage::KillSocket) => {
                spdlog::info!("Kill message received; stopping run control");
                break;
            }
            TransportEvent::Timeout => (),
            TransportEvent::Exhausted => {
                spdlog::info!("Input exhausted; stopping run control");
                break;
            }
        }
        lock_stats(pipeline.stats())?.maybe_flush();
    }
    Ok(())
}
