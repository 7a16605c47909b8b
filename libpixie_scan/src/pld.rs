//! PLD (Pixie list data) buffers.
//!
//! A PLD file is a variable-length HEAD buffer followed by one DATA buffer per spill and a
//! single EOF buffer. Every buffer is a tag word, a word count, and that many words.
use std::io::{Read, Seek};

use byteorder::{ByteOrder, LittleEndian};

use super::buffer::{pack_str, read_buffer, read_buffer_into, unpack_str, BufferType, Framing};
use super::constants::*;
use super::error::BufferError;
use super::word_cursor::WordCursor;

const PLD_FACILITY: &str = "XIA";
const PLD_FORMAT: &str = "PIXIE";

/// Format the current time the way PLD headers store dates
pub fn pld_date_now() -> String {
    time::OffsetDateTime::now_utc()
        .format(time::macros::format_description!(
            "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] [year]"
        ))
        .unwrap_or_default()
}

/// PLD run header. All fields but the title have a fixed width, so the header can be
/// rewritten in place when the file is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct PldHeader {
    pub facility: String,
    pub format: String,
    pub start_date: String,
    pub end_date: String,
    pub title: String,
    pub run_number: u32,
    pub max_spill_words: u32,
    pub run_time: f32,
}

impl PldHeader {
    pub fn new(title: &str, run_number: u32) -> Self {
        Self {
            facility: String::from(PLD_FACILITY),
            format: String::from(PLD_FORMAT),
            start_date: pld_date_now(),
            end_date: String::from("N/A"),
            title: String::from(title),
            run_number,
            max_spill_words: 0,
            run_time: 0.0,
        }
    }

    pub fn to_words(&self) -> Vec<u32> {
        let title_bytes = self.title.len();
        let mut words = pack_str(&self.facility, PLD_FACILITY_LEN);
        words.extend(pack_str(&self.format, PLD_FORMAT_LEN));
        words.extend(pack_str(&self.start_date, PLD_DATE_LEN));
        words.extend(pack_str(&self.end_date, PLD_DATE_LEN));
        words.push(title_bytes as u32);
        words.extend(pack_str(&self.title, title_bytes.div_ceil(4) * 4));
        words.push(self.run_number);
        words.push(self.max_spill_words);
        words.push(self.run_time.to_bits());
        words
    }

    pub fn from_payload(payload: &[u32]) -> Result<Self, BufferError> {
        let mut cursor = WordCursor::new(payload);
        let mut field = |len: usize| {
            cursor
                .take(len / 4)
                .map(unpack_str)
                .ok_or(BufferError::Truncated(len / 4))
        };
        let facility = field(PLD_FACILITY_LEN)?;
        let format = field(PLD_FORMAT_LEN)?;
        let start_date = field(PLD_DATE_LEN)?;
        let end_date = field(PLD_DATE_LEN)?;
        let title_bytes = cursor.read().ok_or(BufferError::Truncated(1))? as usize;
        let title_words = cursor
            .take(title_bytes.div_ceil(4))
            .ok_or(BufferError::Truncated(title_bytes.div_ceil(4)))?;
        let mut bytes = vec![0u8; title_words.len() * 4];
        LittleEndian::write_u32_into(title_words, &mut bytes);
        bytes.truncate(title_bytes);
        let title = String::from_utf8_lossy(&bytes).to_string();
        let tail = cursor.take(3).ok_or(BufferError::Truncated(3))?;
        Ok(Self {
            facility,
            format,
            start_date,
            end_date,
            title,
            run_number: tail[0],
            max_spill_words: tail[1],
            run_time: f32::from_bits(tail[2]),
        })
    }
}

/// Reads spills out of a PLD stream
#[derive(Debug)]
pub struct PldReader<R: Read + Seek> {
    reader: R,
    header: PldHeader,
    scratch: Vec<u32>,
    is_ended: bool,
}

impl<R: Read + Seek> PldReader<R> {
    /// Read the HEAD buffer. A FormatMismatch leaves the stream where it was.
    pub fn new(mut reader: R) -> Result<Self, BufferError> {
        let head = read_buffer(&mut reader, BufferType::Head, Framing::Variable)?;
        let header = PldHeader::from_payload(&head.payload)?;
        spdlog::info!(
            "Run {} header -- title: {} started: {}",
            header.run_number,
            header.title,
            header.start_date
        );
        Ok(Self {
            reader,
            header,
            scratch: Vec::new(),
            is_ended: false,
        })
    }

    pub fn header(&self) -> &PldHeader {
        &self.header
    }

    pub fn stream_position(&mut self) -> Result<u64, BufferError> {
        Ok(self.reader.stream_position()?)
    }

    /// Get the next spill. None means the stream is exhausted.
    ///
    /// A single EOF buffer ends a PLD stream. A truncated final spill, a corrupt length or an
    /// unrecognized buffer tag is logged and also ends the stream, since variable framing leaves nothing
    /// to resynchronize on.
    pub fn next_spill(&mut self) -> Result<Option<Vec<u32>>, BufferError> {
        if self.is_ended {
            return Ok(None);
        }
        match read_buffer_into(
            &mut self.reader,
            BufferType::Data,
            Framing::Variable,
            &mut self.scratch,
        ) {
            Ok(_) => Ok(Some(self.scratch.clone())),
            Err(BufferError::FormatMismatch { found: EOF_TAG, .. }) => {
                read_buffer(&mut self.reader, BufferType::Eof, Framing::Variable)?;
                spdlog::info!("Found PLD EOF buffer");
                self.is_ended = true;
                Ok(None)
            }
            Err(BufferError::EndOfStream) => {
                spdlog::warn!("PLD stream ended without an EOF buffer");
                self.is_ended = true;
                Ok(None)
            }
            Err(BufferError::Truncated(n)) => {
                spdlog::warn!("PLD stream ended inside a spill ({n} words missing); spill dropped");
                self.is_ended = true;
                Ok(None)
            }
            Err(e @ (BufferError::FormatMismatch { .. } | BufferError::BadDeclaredLength(..))) => {
                spdlog::error!("Stopping PLD read: {e}");
                self.is_ended = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
