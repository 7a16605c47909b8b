//! Spill sources.
//!
//! A Transport hands out whole spills, one per call, along with anything else worth telling
//! the run loop about (dropped spills, control messages, receive timeouts). Files are read
//! through [FileTransport]; live data arrives as chunked UDP datagrams through
//! [UdpTransport].
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek};
use std::net::{SocketAddr, UdpSocket};
use std::path::Path;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};

use super::buffer::peek_tag;
use super::chunk_assembler::{split_into_chunks, ChunkAssembler, ChunkStatus};
use super::config::FileFormat;
use super::constants::*;
use super::error::{BufferError, ChunkError, TransportError};
use super::ldf::{LdfItem, LdfReader};
use super::pld::PldReader;

/// Out-of-band messages sent by the acquisition over the live socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// A new output file was opened; start from a clean slate
    OpenFile,
    /// The output file was closed; flush what is pending
    CloseFile,
    /// Stop listening
    KillSocket,
}

impl ControlMessage {
    /// Check a datagram for a control sentinel. Must be done before any binary decode.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        if datagram.starts_with(OPEN_FILE_MESSAGE) {
            Some(Self::OpenFile)
        } else if datagram.starts_with(CLOSE_FILE_MESSAGE) {
            Some(Self::CloseFile)
        } else if datagram.starts_with(KILL_SOCKET_MESSAGE) {
            Some(Self::KillSocket)
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::OpenFile => OPEN_FILE_MESSAGE,
            Self::CloseFile => CLOSE_FILE_MESSAGE,
            Self::KillSocket => KILL_SOCKET_MESSAGE,
        }
    }
}

/// What a Transport produced on one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Spill(Vec<u32>),
    /// A spill was lost in reassembly
    Dropped(ChunkError),
    Control(ControlMessage),
    /// Nothing arrived before the receive timeout
    Timeout,
    /// The source has no more data
    Exhausted,
}

pub trait Transport {
    fn next_spill(&mut self) -> Result<TransportEvent, TransportError>;

    /// Fraction of the source consumed, when the source has a known size
    fn progress(&mut self) -> Option<f32> {
        None
    }
}

#[derive(Debug)]
enum FileReader<R: Read + Seek> {
    Ldf(LdfReader<R>),
    Pld(PldReader<R>),
}

/// Reads spills from a legacy (LDF) or PLD file
#[derive(Debug)]
pub struct FileTransport<R: Read + Seek> {
    reader: FileReader<R>,
    total_bytes: u64,
}

impl FileTransport<BufReader<File>> {
    /// Open a file. With no format given, the format is detected from the first buffer.
    pub fn open(path: &Path, format: Option<FileFormat>) -> Result<Self, TransportError> {
        if !path.exists() {
            return Err(TransportError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let total_bytes = file.metadata()?.len();
        spdlog::info!(
            "Opened {} ({})",
            path.display(),
            human_bytes::human_bytes(total_bytes as f64)
        );
        Self::from_reader(BufReader::new(file), format, total_bytes)
    }
}

impl<R: Read + Seek> FileTransport<R> {
    pub fn from_reader(
        mut reader: R,
        format: Option<FileFormat>,
        total_bytes: u64,
    ) -> Result<Self, TransportError> {
        let format = match format {
            Some(format) => format,
            None => Self::detect(&mut reader)?,
        };
        spdlog::info!("Reading input as {format:?}");
        let reader = match format {
            FileFormat::Ldf => FileReader::Ldf(LdfReader::new(reader)),
            FileFormat::Pld => match PldReader::new(reader) {
                Ok(pld) => FileReader::Pld(pld),
                Err(BufferError::FormatMismatch { found, .. }) => {
                    return Err(TransportError::UnknownFormat(found))
                }
                Err(e) => return Err(e.into()),
            },
        };
        Ok(Self {
            reader,
            total_bytes,
        })
    }

    /// A legacy stream opens with a DIR buffer, a PLD stream with a variable HEAD buffer.
    /// The stream is left at its starting position.
    fn detect(reader: &mut R) -> Result<FileFormat, TransportError> {
        match peek_tag(reader)? {
            DIR_TAG => Ok(FileFormat::Ldf),
            HEAD_TAG => Ok(FileFormat::Pld),
            found => Err(TransportError::UnknownFormat(found)),
        }
    }

    pub fn format(&self) -> FileFormat {
        match self.reader {
            FileReader::Ldf(_) => FileFormat::Ldf,
            FileReader::Pld(_) => FileFormat::Pld,
        }
    }

    /// Run number from the file header, if one has been read
    pub fn run_number(&self) -> Option<u32> {
        match &self.reader {
            FileReader::Ldf(ldf) => ldf.header().map(|h| h.run_number),
            FileReader::Pld(pld) => Some(pld.header().run_number),
        }
    }

    /// Spills lost to chunk reassembly
    pub fn lost_spills(&self) -> u64 {
        match &self.reader {
            FileReader::Ldf(ldf) => ldf.lost_spills(),
            FileReader::Pld(_) => 0,
        }
    }
}

impl<R: Read + Seek> Transport for FileTransport<R> {
    fn next_spill(&mut self) -> Result<TransportEvent, TransportError> {
        match &mut self.reader {
            FileReader::Ldf(ldf) => Ok(match ldf.next_item()? {
                LdfItem::Spill(words) => TransportEvent::Spill(words),
                LdfItem::Dropped(e) => TransportEvent::Dropped(e),
                LdfItem::Exhausted => TransportEvent::Exhausted,
            }),
            FileReader::Pld(pld) => Ok(match pld.next_spill()? {
                Some(words) => TransportEvent::Spill(words),
                None => TransportEvent::Exhausted,
            }),
        }
    }

    fn progress(&mut self) -> Option<f32> {
        if self.total_bytes == 0 {
            return None;
        }
        let position = match &mut self.reader {
            FileReader::Ldf(ldf) => ldf.stream_position(),
            FileReader::Pld(pld) => pld.stream_position(),
        }
        .ok()?;
        Some((position as f64 / self.total_bytes as f64).min(1.0) as f32)
    }
}

/// Split a datagram into its chunk header and payload words
pub fn parse_datagram(datagram: &[u8]) -> Result<(u32, u32, Vec<u32>), ChunkError> {
    if datagram.len() < SHM_CHUNK_HEADER_BYTES
        || (datagram.len() - SHM_CHUNK_HEADER_BYTES) % 4 != 0
    {
        return Err(ChunkError::Malformed(datagram.len()));
    }
    let current = LittleEndian::read_u32(&datagram[0..4]);
    let total = LittleEndian::read_u32(&datagram[4..8]);
    let body = &datagram[SHM_CHUNK_HEADER_BYTES..];
    let mut words = vec![0u32; body.len() / 4];
    LittleEndian::read_u32_into(body, &mut words);
    Ok((current, total, words))
}

/// Build one datagram: current chunk, total chunks, payload words
pub fn encode_datagram(current: u32, total: u32, words: &[u32]) -> Vec<u8> {
    let mut datagram = vec![0u8; SHM_CHUNK_HEADER_BYTES + words.len() * 4];
    let (header, body) = datagram.split_at_mut(SHM_CHUNK_HEADER_BYTES);
    LittleEndian::write_u32_into(&[current, total], header);
    LittleEndian::write_u32_into(words, body);
    datagram
}

/// The datagram train that delivers a spill
pub fn spill_datagrams(spill: &[u32]) -> Vec<Vec<u8>> {
    split_into_chunks(spill, SHM_CHUNK_PAYLOAD_WORDS)
        .into_iter()
        .map(|(current, total, words)| encode_datagram(current, total, words))
        .collect()
}

/// Receives chunked spills over UDP
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    assembler: ChunkAssembler,
    datagram: Vec<u8>,
    datagrams_received: u64,
}

impl UdpTransport {
    /// Bind on all interfaces. Port 0 picks a free port.
    pub fn bind(port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let socket =
            UdpSocket::bind(("0.0.0.0", port)).map_err(|e| TransportError::BindError(port, e))?;
        socket.set_read_timeout(Some(timeout))?;
        spdlog::info!("Listening for spills on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            assembler: ChunkAssembler::new(),
            datagram: vec![0u8; SHM_MAX_DATAGRAM_BYTES],
            datagrams_received: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn datagrams_received(&self) -> u64 {
        self.datagrams_received
    }

    pub fn lost_spills(&self) -> u64 {
        self.assembler.lost_spills()
    }
}

impl Transport for UdpTransport {
    /// Receive until a spill completes, something goes wrong, or the socket times out
    fn next_spill(&mut self) -> Result<TransportEvent, TransportError> {
        loop {
            let size = match self.socket.recv(&mut self.datagram) {
                Ok(size) => size,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(TransportEvent::Timeout)
                }
                Err(e) => return Err(e.into()),
            };
            self.datagrams_received += 1;
            let datagram = &self.datagram[..size];

            if let Some(message) = ControlMessage::parse(datagram) {
                spdlog::info!("Received control message {message:?}");
                if message != ControlMessage::CloseFile {
                    self.assembler.reset();
                }
                return Ok(TransportEvent::Control(message));
            }

            let (current, total, words) = match parse_datagram(datagram) {
                Ok(parsed) => parsed,
                Err(e) => return Ok(TransportEvent::Dropped(e)),
            };
            match self.assembler.push(current, total, &words) {
                Ok(ChunkStatus::Complete(spill)) => return Ok(TransportEvent::Spill(spill)),
                Ok(ChunkStatus::Pending) => continue,
                Err(e) => return Ok(TransportEvent::Dropped(e)),
            }
        }
    }
}
