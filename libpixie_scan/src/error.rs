use std::path::PathBuf;
use thiserror::Error;

use super::buffer::tag_name;
use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Failed to read or write buffer: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Found buffer tag {} where {} was expected", tag_name(*.found), tag_name(*.expected))]
    FormatMismatch { expected: u32, found: u32 },
    #[error("Buffer was truncated while reading {0} words")]
    Truncated(usize),
    #[error("Buffer declared {0} words which exceeds the allowed size of {1} words")]
    BadDeclaredLength(u32, usize),
    #[error("Reached end of stream")]
    EndOfStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Unknown header length code {code} at word {offset}")]
    UnknownHeaderCode { code: u8, offset: usize },
    #[error("Event length {event_length} at word {offset} does not match header length {header_length} + trace length {trace_length}/2")]
    Length {
        offset: usize,
        header_length: usize,
        event_length: usize,
        trace_length: usize,
    },
    #[error("Hit at word {offset} needs {needed} words but only {available} remain")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Hit field {field} value {value} does not fit; the maximum is {max}")]
    FieldOutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpillError {
    #[error("Spill trailer was {0:#010x}, {1:#010x}; expected end-of-spill sentinel")]
    BadTrailer(u32, u32),
    #[error("Spill of {0} words is too short to hold a trailer")]
    TooShort(usize),
    #[error("Module block at word {offset} declares {length} words but only {remaining} remain")]
    BadModuleBlock {
        offset: usize,
        length: usize,
        remaining: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("Chunk sequence gap; expected chunk {expected} but received {received}")]
    Gap { expected: u32, received: u32 },
    #[error("Received chunk {received} without a preceding chunk 1; waiting for the next spill")]
    Resync { received: u32 },
    #[error("Chunk train changed its total from {expected} to {received}")]
    TotalMismatch { expected: u32, received: u32 },
    #[error("Invalid chunk header; current chunk {current} of {total}")]
    InvalidHeader { current: u32, total: u32 },
    #[error("Chunk payload of {0} bytes is not a whole number of words")]
    Malformed(usize),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Transport failed due to buffer error: {0}")]
    BufferError(#[from] BufferError),
    #[error("Could not open input because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Could not bind UDP socket on port {0}: {1}")]
    BindError(u16, std::io::Error),
    #[error("Input stream did not start with a recognized buffer; found {}", tag_name(*.0))]
    UnknownFormat(u32),
}

#[derive(Debug, Error)]
pub enum OutputFileError {
    #[error("OutputFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("OutputFile failed due to buffer error: {0}")]
    BufferError(#[from] BufferError),
    #[error("OutputFile spill of {0} words exceeds the allowed chunk count")]
    SpillTooLarge(usize),
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Statistics failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Statistics lock was poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config requires an input file for {0} mode")]
    MissingInput(String),
    #[error("Config has an invalid event width of {0} ticks")]
    BadEventWidth(u64),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Transport error: {0}")]
    TransportError(#[from] TransportError),
    #[error("Processor failed due to OutputFile error: {0}")]
    OutputFileError(#[from] OutputFileError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Statistics error: {0}")]
    StatsError(#[from] StatsError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
