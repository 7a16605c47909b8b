// Buffer tags. Four ASCII characters read as a little-endian u32
pub const DIR_TAG: u32 = u32::from_le_bytes(*b"DIR ");
pub const HEAD_TAG: u32 = u32::from_le_bytes(*b"HEAD");
pub const DATA_TAG: u32 = u32::from_le_bytes(*b"DATA");
pub const EOF_TAG: u32 = u32::from_le_bytes(*b"EOF ");

// Legacy (LDF) buffer geometry
pub const LDF_BUFFER_WORDS: usize = 8194; // total, tag + declared count + payload
pub const LDF_PAYLOAD_WORDS: usize = 8192;
pub const LDF_HEAD_DECLARED_WORDS: u32 = 64;
pub const BUFFER_FILLER: u32 = 0xFFFFFFFF;
pub const LDF_CHUNK_HEADER_WORDS: usize = 3; // chunk size (bytes), total chunks, current chunk

// Legacy HEAD field widths (bytes)
pub const LDF_FACILITY_LEN: usize = 8;
pub const LDF_FORMAT_LEN: usize = 8;
pub const LDF_TYPE_LEN: usize = 16;
pub const LDF_DATE_LEN: usize = 16;
pub const LDF_TITLE_LEN: usize = 80;

// PLD HEAD field widths (bytes)
pub const PLD_FACILITY_LEN: usize = 16;
pub const PLD_FORMAT_LEN: usize = 16;
pub const PLD_DATE_LEN: usize = 24;

// Spill framing
pub const END_OF_SPILL: [u32; 2] = [0xFFFFFFFF, 0xFFFFFFFF];
pub const MODULE_BLOCK_HEADER_WORDS: usize = 2; // block word count, module number

// List-mode header
pub const STATS_BLOCK_CODE: u8 = 1;
pub const BASE_HEADER_WORDS: usize = 4;
pub const ENERGY_SUM_WORDS: usize = 4;
pub const QDC_SUM_WORDS: usize = 8;
pub const EXTERNAL_TS_WORDS: usize = 2;
pub const MAX_EVENT_LENGTH: u32 = 0x1FFF; // 13 bits
pub const MAX_TRACE_LENGTH: u32 = 0x7FFF; // 15 bits
pub const DEFAULT_SATURATION_ENERGY: u32 = 32767;
pub const DEFAULT_FIRST_SLOT: u8 = 2;
pub const MODULES_PER_CRATE: u32 = 100;

// Shared-memory (UDP) delivery
pub const SHM_CHUNK_HEADER_BYTES: usize = 8; // current chunk, total chunks
pub const SHM_MAX_DATAGRAM_BYTES: usize = 65_507;
pub const SHM_CHUNK_PAYLOAD_WORDS: usize = 1010; // keeps a datagram under a typical 4 KiB page
pub const DEFAULT_SHM_PORT: u16 = 5555;
pub const OPEN_FILE_MESSAGE: &[u8] = b"$OPEN_FILE";
pub const CLOSE_FILE_MESSAGE: &[u8] = b"$CLOSE_FILE";
pub const KILL_SOCKET_MESSAGE: &[u8] = b"$KILL_SOCKET";

// Correlation
pub const DEFAULT_EVENT_WIDTH: u64 = 100; // clock ticks
pub const CLOCK_TICKS_PER_SECOND: u64 = 100_000_000; // 100 MHz timestamp clock

// PLD variable buffers
pub const PLD_MAX_BUFFER_WORDS: usize = 16 * 1024 * 1024;
