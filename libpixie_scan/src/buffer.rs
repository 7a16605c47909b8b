use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use super::constants::*;
use super::error::BufferError;

/// The named buffer types found in both the legacy and PLD formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    Dir,
    Head,
    Data,
    Eof,
}

impl BufferType {
    pub fn tag(&self) -> u32 {
        match self {
            Self::Dir => DIR_TAG,
            Self::Head => HEAD_TAG,
            Self::Data => DATA_TAG,
            Self::Eof => EOF_TAG,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            DIR_TAG => Some(Self::Dir),
            HEAD_TAG => Some(Self::Head),
            DATA_TAG => Some(Self::Data),
            EOF_TAG => Some(Self::Eof),
            _ => None,
        }
    }

    /// The word count a legacy buffer of this type declares in its second word
    fn legacy_declared_words(&self) -> u32 {
        match self {
            Self::Head => LDF_HEAD_DECLARED_WORDS,
            _ => LDF_PAYLOAD_WORDS as u32,
        }
    }
}

/// How a buffer is framed on the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Legacy buffers: always LDF_BUFFER_WORDS long, unused space filled with BUFFER_FILLER
    Fixed,
    /// PLD buffers: exactly the declared number of words follow the header
    Variable,
}

/// One framed buffer: its type, the word count it declared, and its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    pub buffer_type: BufferType,
    pub declared_word_count: u32,
    pub payload: Vec<u32>,
}

/// Render a tag as its ASCII name when printable, otherwise as hex
pub fn tag_name(tag: u32) -> String {
    let bytes = tag.to_le_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        format!("\"{}\"", String::from_utf8_lossy(&bytes))
    } else {
        format!("{tag:#010x}")
    }
}

/// Read the leading tag word, telling a clean end of stream apart from a partial word
fn read_tag<R: Read>(reader: &mut R) -> Result<u32, BufferError> {
    let mut bytes = [0u8; 4];
    let mut filled = 0;
    while filled < bytes.len() {
        match reader.read(&mut bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(BufferError::IOError(e)),
        }
    }
    match filled {
        0 => Err(BufferError::EndOfStream),
        4 => Ok(LittleEndian::read_u32(&bytes)),
        _ => Err(BufferError::Truncated(1)),
    }
}

fn read_words<R: Read>(reader: &mut R, words: &mut [u32]) -> Result<(), BufferError> {
    reader
        .read_u32_into::<LittleEndian>(words)
        .map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => BufferError::Truncated(words.len()),
            _ => BufferError::IOError(e),
        })
}

/// Read the tag word and seek back over it
pub fn peek_tag<R: Read + Seek>(reader: &mut R) -> Result<u32, BufferError> {
    let tag = read_tag(reader)?;
    reader.seek(SeekFrom::Current(-4))?;
    Ok(tag)
}

/// Read a buffer of the expected type.
///
/// If the tag does not match, the stream is rewound to the start of the tag and a
/// FormatMismatch is returned so that the caller can try another reader.
pub fn read_buffer<R: Read + Seek>(
    reader: &mut R,
    expected: BufferType,
    framing: Framing,
) -> Result<Buffer, BufferError> {
    let mut payload = Vec::new();
    let declared_word_count = read_buffer_into(reader, expected, framing, &mut payload)?;
    Ok(Buffer {
        buffer_type: expected,
        declared_word_count,
        payload,
    })
}

/// Same as [read_buffer], but reuses the given payload storage.
///
/// Returns the declared word count. For fixed framing the payload holds the declared number
/// of words; the rest of the fixed frame is consumed and discarded.
pub fn read_buffer_into<R: Read + Seek>(
    reader: &mut R,
    expected: BufferType,
    framing: Framing,
    payload: &mut Vec<u32>,
) -> Result<u32, BufferError> {
    let tag = read_tag(reader)?;
    if tag != expected.tag() {
        reader.seek(SeekFrom::Current(-4))?;
        return Err(BufferError::FormatMismatch {
            expected: expected.tag(),
            found: tag,
        });
    }
    let mut declared = [0u32; 1];
    read_words(reader, &mut declared)?;
    let declared = declared[0];

    match framing {
        Framing::Fixed => {
            if declared as usize > LDF_PAYLOAD_WORDS {
                return Err(BufferError::BadDeclaredLength(declared, LDF_PAYLOAD_WORDS));
            }
            payload.resize(LDF_PAYLOAD_WORDS, 0);
            read_words(reader, payload)?;
            payload.truncate(declared as usize);
        }
        Framing::Variable => {
            if declared as usize > PLD_MAX_BUFFER_WORDS {
                return Err(BufferError::BadDeclaredLength(declared, PLD_MAX_BUFFER_WORDS));
            }
            payload.resize(declared as usize, 0);
            read_words(reader, payload)?;
        }
    }
    Ok(declared)
}

/// Write a buffer with the given tag and payload. Returns the number of words written.
///
/// Fixed buffers are padded with BUFFER_FILLER out to LDF_BUFFER_WORDS.
pub fn write_buffer<W: Write>(
    writer: &mut W,
    buffer_type: BufferType,
    payload: &[u32],
    framing: Framing,
) -> Result<usize, BufferError> {
    match framing {
        Framing::Fixed => {
            if payload.len() > LDF_PAYLOAD_WORDS {
                return Err(BufferError::BadDeclaredLength(
                    payload.len() as u32,
                    LDF_PAYLOAD_WORDS,
                ));
            }
            writer.write_u32::<LittleEndian>(buffer_type.tag())?;
            writer.write_u32::<LittleEndian>(buffer_type.legacy_declared_words())?;
            write_words(writer, payload)?;
            for _ in payload.len()..LDF_PAYLOAD_WORDS {
                writer.write_u32::<LittleEndian>(BUFFER_FILLER)?;
            }
            Ok(LDF_BUFFER_WORDS)
        }
        Framing::Variable => {
            if payload.len() > PLD_MAX_BUFFER_WORDS {
                return Err(BufferError::BadDeclaredLength(
                    payload.len() as u32,
                    PLD_MAX_BUFFER_WORDS,
                ));
            }
            writer.write_u32::<LittleEndian>(buffer_type.tag())?;
            writer.write_u32::<LittleEndian>(payload.len() as u32)?;
            write_words(writer, payload)?;
            Ok(payload.len() + 2)
        }
    }
}

pub fn write_words<W: Write>(writer: &mut W, words: &[u32]) -> Result<(), BufferError> {
    let mut bytes = vec![0u8; words.len() * 4];
    LittleEndian::write_u32_into(words, &mut bytes);
    writer.write_all(&bytes)?;
    Ok(())
}

/// Pack a string into a fixed number of bytes (space padded, truncated if too long) and
/// return them as little-endian words. `width` must be a multiple of 4.
pub fn pack_str(value: &str, width: usize) -> Vec<u32> {
    let mut bytes = vec![b' '; width];
    for (dst, src) in bytes.iter_mut().zip(value.bytes()) {
        *dst = src;
    }
    let mut words = vec![0u32; width / 4];
    LittleEndian::read_u32_into(&bytes, &mut words);
    words
}

/// Inverse of [pack_str]; trailing padding is trimmed
pub fn unpack_str(words: &[u32]) -> String {
    let mut bytes = vec![0u8; words.len() * 4];
    LittleEndian::write_u32_into(words, &mut bytes);
    String::from_utf8_lossy(&bytes)
        .trim_end_matches([' ', '\0'])
        .to_string()
}
