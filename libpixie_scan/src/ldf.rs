//! Legacy (HRIBF .ldf) list-data buffers.
//!
//! Every buffer is exactly 8194 words: a tag, a declared word count and 8192 payload words
//! padded with `0xFFFFFFFF`. A file is laid out as
//!
//! ```text
//! DIR  - buffer size, number of buffers (patched on close), run number
//! HEAD - facility, format, type, date, title, run number
//! DATA - chunks: [chunk size (bytes), total chunks, current chunk], payload...
//! ...
//! EOF
//! EOF
//! ```
//!
//! A single EOF separates runs inside a file; two in a row end the file.
use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use super::buffer::{
    pack_str, read_buffer_into, tag_name, unpack_str, write_buffer, BufferType, Framing,
};
use super::chunk_assembler::{ChunkAssembler, ChunkStatus};
use super::constants::*;
use super::error::{BufferError, ChunkError};
use super::word_cursor::WordCursor;

const LDF_FACILITY: &str = "HHIRF";
const LDF_FORMAT: &str = "L003";
const LDF_TYPE: &str = "LIST DATA";
// Offset of the buffer count inside the DIR buffer: tag, declared, total buffer size
const DIR_COUNT_OFFSET_BYTES: u64 = 12;

/// The directory buffer; the only legacy buffer rewritten after it is first written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirBuffer {
    pub number_of_buffers: u32,
    pub run_number: u32,
}

impl DirBuffer {
    pub fn new(run_number: u32) -> Self {
        Self {
            number_of_buffers: 0,
            run_number,
        }
    }

    pub fn to_words(&self) -> Vec<u32> {
        vec![
            LDF_BUFFER_WORDS as u32,
            self.number_of_buffers,
            0,
            1,
            self.run_number,
        ]
    }

    pub fn from_payload(payload: &[u32]) -> Result<Self, BufferError> {
        if payload.len() < 5 {
            return Err(BufferError::Truncated(5));
        }
        Ok(Self {
            number_of_buffers: payload[1],
            run_number: payload[4],
        })
    }

    /// Overwrite the buffer count of a DIR buffer that starts at `dir_start`, then return to
    /// the current stream position
    pub fn patch_count<W: Write + Seek>(
        writer: &mut W,
        dir_start: u64,
        number_of_buffers: u32,
    ) -> Result<(), BufferError> {
        let position = writer.stream_position()?;
        writer.seek(SeekFrom::Start(dir_start + DIR_COUNT_OFFSET_BYTES))?;
        writer.write_u32::<LittleEndian>(number_of_buffers)?;
        writer.seek(SeekFrom::Start(position))?;
        Ok(())
    }
}

/// Legacy run header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdfHeader {
    pub facility: String,
    pub format: String,
    pub kind: String,
    pub date: String,
    pub title: String,
    pub run_number: u32,
}

impl LdfHeader {
    pub fn new(title: &str, run_number: u32) -> Self {
        let date = time::OffsetDateTime::now_utc()
            .format(time::macros::format_description!(
                "[year]-[month]-[day] [hour]:[minute]"
            ))
            .unwrap_or_default();
        Self {
            facility: String::from(LDF_FACILITY),
            format: String::from(LDF_FORMAT),
            kind: String::from(LDF_TYPE),
            date,
            title: String::from(title),
            run_number,
        }
    }

    pub fn to_words(&self) -> Vec<u32> {
        let mut words = pack_str(&self.facility, LDF_FACILITY_LEN);
        words.extend(pack_str(&self.format, LDF_FORMAT_LEN));
        words.extend(pack_str(&self.kind, LDF_TYPE_LEN));
        words.extend(pack_str(&self.date, LDF_DATE_LEN));
        words.extend(pack_str(&self.title, LDF_TITLE_LEN));
        words.push(self.run_number);
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
        let facility = field(LDF_FACILITY_LEN)?;
        let format = field(LDF_FORMAT_LEN)?;
        let kind = field(LDF_TYPE_LEN)?;
        let date = field(LDF_DATE_LEN)?;
        let title = field(LDF_TITLE_LEN)?;
        let run_number = cursor.read().ok_or(BufferError::Truncated(1))?;
        Ok(Self {
            facility,
            format,
            kind,
            date,
            title,
            run_number,
        })
    }
}

/// One chunk of a spill inside a DATA buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdfChunk<'a> {
    pub total: u32,
    pub current: u32,
    pub words: &'a [u32],
}

/// Walks the chunks of a DATA buffer payload, stopping at the filler or the end.
///
/// A malformed chunk size ends the walk with an error; the rest of that buffer is skipped.
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    cursor: WordCursor<'a>,
    failed: bool,
}

impl<'a> ChunkIter<'a> {
    pub fn new(payload: &'a [u32]) -> Self {
        Self {
            cursor: WordCursor::new(payload),
            failed: false,
        }
    }

    /// Words of the payload consumed so far
    pub fn position(&self) -> usize {
        self.cursor.position()
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Result<LdfChunk<'a>, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let size_bytes = self.cursor.peek()?;
        if size_bytes == BUFFER_FILLER {
            return None;
        }
        let size_words = size_bytes as usize / 4;
        if size_bytes % 4 != 0
            || size_words < LDF_CHUNK_HEADER_WORDS
            || size_words > self.cursor.remaining()
        {
            self.failed = true;
            return Some(Err(ChunkError::Malformed(size_bytes as usize)));
        }
        let chunk = self.cursor.take(size_words)?;
        Some(Ok(LdfChunk {
            total: chunk[1],
            current: chunk[2],
            words: &chunk[LDF_CHUNK_HEADER_WORDS..],
        }))
    }
}

/// Plan the payload sizes of the chunks needed to store a spill of `spill_words` words, when
/// the current DATA buffer has `used_words` payload words already filled.
///
/// The first entry of each returned pair is true if the chunk must start a fresh buffer.
pub fn plan_chunks(spill_words: usize, used_words: usize) -> Vec<(bool, usize)> {
    let max_chunk = LDF_PAYLOAD_WORDS - LDF_CHUNK_HEADER_WORDS;
    let mut plan = Vec::new();
    let mut remaining = spill_words;
    let mut used = used_words;
    loop {
        let mut fresh = false;
        // Need room for a header plus at least one data word (or the header alone if empty)
        let needed = LDF_CHUNK_HEADER_WORDS + remaining.min(1);
        if used + needed > LDF_PAYLOAD_WORDS {
            fresh = true;
            used = 0;
        }
        let size = remaining.min(max_chunk.min(LDF_PAYLOAD_WORDS - used - LDF_CHUNK_HEADER_WORDS));
        plan.push((fresh, size));
        used += LDF_CHUNK_HEADER_WORDS + size;
        remaining -= size;
        if remaining == 0 {
            break;
        }
    }
    plan
}

/// Something the LdfReader found in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdfItem {
    Spill(Vec<u32>),
    Dropped(ChunkError),
    Exhausted,
}

/// Reads spills out of a legacy buffer stream.
///
/// Two fixed-capacity payload buffers are reused for the life of the reader: the one being
/// walked and a look-ahead that is only filled after an EOF buffer, to tell a run boundary
/// (single EOF) from the end of the file (double EOF).
#[derive(Debug)]
pub struct LdfReader<R: Read + Seek> {
    reader: R,
    buffers: [Vec<u32>; 2],
    current: usize,
    loaded: Option<BufferType>,
    offset: usize,
    assembler: ChunkAssembler,
    header: Option<LdfHeader>,
    dir: Option<DirBuffer>,
    buffers_read: u64,
    is_ended: bool,
}

impl<R: Read + Seek> LdfReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffers: [
                Vec::with_capacity(LDF_PAYLOAD_WORDS),
                Vec::with_capacity(LDF_PAYLOAD_WORDS),
            ],
            current: 0,
            loaded: None,
            offset: 0,
            assembler: ChunkAssembler::new(),
            header: None,
            dir: None,
            buffers_read: 0,
            is_ended: false,
        }
    }

    /// The most recent run header seen
    pub fn header(&self) -> Option<&LdfHeader> {
        self.header.as_ref()
    }

    /// The directory buffer, if the stream started with one
    pub fn dir(&self) -> Option<&DirBuffer> {
        self.dir.as_ref()
    }

    pub fn buffers_read(&self) -> u64 {
        self.buffers_read
    }

    pub fn lost_spills(&self) -> u64 {
        self.assembler.lost_spills()
    }

    /// Byte position in the underlying stream
    pub fn stream_position(&mut self) -> Result<u64, BufferError> {
        Ok(self.reader.stream_position()?)
    }

    /// Get the next spill from the stream.
    ///
    /// A spill split over several DATA buffers is continued across reads until its last
    /// chunk arrives.
    pub fn next_item(&mut self) -> Result<LdfItem, BufferError> {
        loop {
            if self.is_ended {
                return Ok(LdfItem::Exhausted);
            }

            if self.loaded == Some(BufferType::Data) {
                let payload = &self.buffers[self.current];
                let mut chunks = ChunkIter::new(&payload[self.offset..]);
                let next = chunks.next();
                self.offset += chunks.position();
                match next {
                    Some(Ok(chunk)) => {
                        match self.assembler.push(chunk.current, chunk.total, chunk.words) {
                            Ok(ChunkStatus::Complete(spill)) => return Ok(LdfItem::Spill(spill)),
                            Ok(ChunkStatus::Pending) => continue,
                            Err(e) => return Ok(LdfItem::Dropped(e)),
                        }
                    }
                    Some(Err(e)) => {
                        self.loaded = None;
                        self.assembler.reset();
                        return Ok(LdfItem::Dropped(e));
                    }
                    None => self.loaded = None,
                }
            }

            match self.read_next(self.current)? {
                None => self.finish(),
                Some(BufferType::Eof) => self.handle_eof()?,
                Some(_) => (),
            }
        }
    }

    fn finish(&mut self) {
        if self.assembler.in_progress() {
            spdlog::warn!("Stream ended in the middle of a spill; discarding partial spill");
            self.assembler.reset();
        }
        self.is_ended = true;
    }

    /// Look past an EOF buffer using the spare buffer
    fn handle_eof(&mut self) -> Result<(), BufferError> {
        if self.assembler.in_progress() {
            spdlog::warn!("EOF buffer found in the middle of a spill; discarding partial spill");
            self.assembler.reset();
        }
        let spare = 1 - self.current;
        match self.read_next(spare)? {
            None | Some(BufferType::Eof) => {
                spdlog::info!("Found double EOF buffer after {} buffers", self.buffers_read);
                self.is_ended = true;
            }
            Some(_) => {
                spdlog::info!("Found single EOF buffer; continuing with the next run");
                self.current = spare;
            }
        }
        Ok(())
    }

    /// Read the next buffer of any type into the given slot.
    ///
    /// Returns None at the end of the stream, or where the stream is cut short or corrupt
    /// (the partial spill is dropped). Buffers with an unknown tag are skipped.
    fn read_next(&mut self, slot: usize) -> Result<Option<BufferType>, BufferError> {
        const ORDER: [BufferType; 4] = [
            BufferType::Data,
            BufferType::Eof,
            BufferType::Head,
            BufferType::Dir,
        ];
        loop {
            let mut found_type = None;
            let mut unknown_tag = 0;
            for buffer_type in ORDER {
                match read_buffer_into(
                    &mut self.reader,
                    buffer_type,
                    Framing::Fixed,
                    &mut self.buffers[slot],
                ) {
                    Ok(_) => {
                        found_type = Some(buffer_type);
                        break;
                    }
                    Err(BufferError::FormatMismatch { found, .. }) => unknown_tag = found,
                    Err(BufferError::EndOfStream) => return Ok(None),
                    Err(e @ (BufferError::Truncated(_) | BufferError::BadDeclaredLength(..))) => {
                        spdlog::error!(
                            "Stopping legacy read after {} buffers: {e}",
                            self.buffers_read
                        );
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                }
            }

            let Some(buffer_type) = found_type else {
                spdlog::error!(
                    "Skipping legacy buffer with unknown tag {}",
                    tag_name(unknown_tag)
                );
                self.reader
                    .seek(SeekFrom::Current((LDF_BUFFER_WORDS * 4) as i64))?;
                continue;
            };
            self.buffers_read += 1;
            self.loaded = Some(buffer_type);
            self.offset = 0;

            match buffer_type {
                BufferType::Head => match LdfHeader::from_payload(&self.buffers[slot]) {
                    Ok(header) => {
                        spdlog::info!(
                            "Run {} header -- title: {} date: {}",
                            header.run_number,
                            header.title,
                            header.date
                        );
                        self.header = Some(header);
                    }
                    Err(e) => spdlog::warn!("Could not parse HEAD buffer: {e}"),
                },
                BufferType::Dir => match DirBuffer::from_payload(&self.buffers[slot]) {
                    Ok(dir) => self.dir = Some(dir),
                    Err(e) => spdlog::warn!("Could not parse DIR buffer: {e}"),
                },
                _ => (),
            }
            return Ok(Some(buffer_type));
        }
    }
}

/// Assemble a DATA buffer payload from chunks
#[derive(Debug, Default, Clone)]
pub struct DataBufferBuilder {
    words: Vec<u32>,
}

impl DataBufferBuilder {
    pub fn new() -> Self {
        Self {
            words: Vec::with_capacity(LDF_PAYLOAD_WORDS),
        }
    }

    pub fn used_words(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Append a chunk. The caller is responsible for planning chunks that fit.
    pub fn push_chunk(&mut self, current: u32, total: u32, data: &[u32]) {
        let size_bytes = ((LDF_CHUNK_HEADER_WORDS + data.len()) * 4) as u32;
        self.words.extend_from_slice(&[size_bytes, total, current]);
        self.words.extend_from_slice(data);
    }

    /// Write the buffer (padded with filler) and start over
    pub fn flush<W: Write>(&mut self, writer: &mut W) -> Result<usize, BufferError> {
        let written = write_buffer(writer, BufferType::Data, &self.words, Framing::Fixed)?;
        self.words.clear();
        Ok(written)
    }
}
