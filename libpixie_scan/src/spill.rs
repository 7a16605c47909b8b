use super::channel_hit::ChannelHit;
use super::constants::*;
use super::error::SpillError;
use super::word_cursor::WordCursor;
use super::word_decoder::WordDecoder;

/// Where the framing walk is within a spill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpillState {
    #[default]
    Idle,
    InModule,
    EndOfSpill,
}

/// The list-mode words of one module inside a spill
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBlock<'a> {
    pub module_number: u32,
    pub words: &'a [u32],
}

/// Walks the module blocks of a spill.
///
/// Layout: `[block word count, module number, words...]` repeated, then the end-of-spill
/// sentinel pair. The trailer is checked when the walk is created, before any block is
/// handed out.
#[derive(Debug, Clone)]
pub struct ModuleBlocks<'a> {
    cursor: WordCursor<'a>,
    state: SpillState,
}

impl<'a> ModuleBlocks<'a> {
    pub fn new(spill: &'a [u32]) -> Result<Self, SpillError> {
        if spill.len() < END_OF_SPILL.len() {
            return Err(SpillError::TooShort(spill.len()));
        }
        let (body, trailer) = spill.split_at(spill.len() - END_OF_SPILL.len());
        if trailer != END_OF_SPILL {
            return Err(SpillError::BadTrailer(trailer[0], trailer[1]));
        }
        Ok(Self {
            cursor: WordCursor::new(body),
            state: SpillState::Idle,
        })
    }

    pub fn state(&self) -> SpillState {
        self.state
    }
}

impl<'a> Iterator for ModuleBlocks<'a> {
    type Item = Result<ModuleBlock<'a>, SpillError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == SpillState::EndOfSpill {
            return None;
        }
        if self.cursor.is_empty() {
            self.state = SpillState::EndOfSpill;
            return None;
        }
        self.state = SpillState::InModule;
        let offset = self.cursor.position();
        let remaining = self.cursor.remaining();
        let length = self.cursor.peek().unwrap_or_default() as usize;
        let Some(block) = self
            .cursor
            .take(length)
            .filter(|_| length >= MODULE_BLOCK_HEADER_WORDS)
        else {
            self.state = SpillState::EndOfSpill;
            return Some(Err(SpillError::BadModuleBlock {
                offset,
                length,
                remaining,
            }));
        };
        Some(Ok(ModuleBlock {
            module_number: block[1],
            words: &block[MODULE_BLOCK_HEADER_WORDS..],
        }))
    }
}

/// Outcome of reading one spill
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpillVerdict {
    /// The trailer matched; hits were handed out
    Full(SpillSummary),
    /// The spill was corrupt and nothing was handed out
    Bad(SpillError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpillSummary {
    pub words: usize,
    pub modules: usize,
    pub hits: usize,
    pub decode_errors: usize,
}

/// SpillReader checks the framing of a spill and decodes each module block.
///
/// Decode errors stay local to their module block: the hits decoded before the error are
/// kept and the next block is read as normal. A spill with bad framing is rejected whole.
#[derive(Debug, Default)]
pub struct SpillReader {
    decoder: WordDecoder,
    full_spills: u64,
    bad_spills: u64,
}

impl SpillReader {
    pub fn new(decoder: WordDecoder) -> Self {
        Self {
            decoder,
            full_spills: 0,
            bad_spills: 0,
        }
    }

    pub fn full_spills(&self) -> u64 {
        self.full_spills
    }

    pub fn bad_spills(&self) -> u64 {
        self.bad_spills
    }

    /// Read a spill, appending its hits. Hits are only appended for a full spill.
    pub fn read_spill(&mut self, spill: &[u32], hits: &mut Vec<ChannelHit>) -> SpillVerdict {
        let blocks = match ModuleBlocks::new(spill).and_then(|b| b.collect::<Result<Vec<_>, _>>())
        {
            Ok(blocks) => blocks,
            Err(e) => {
                self.bad_spills += 1;
                spdlog::warn!("Dropping bad spill {}: {e}", self.spill_number());
                return SpillVerdict::Bad(e);
            }
        };

        let start = hits.len();
        let mut summary = SpillSummary {
            words: spill.len(),
            modules: blocks.len(),
            ..Default::default()
        };
        for block in blocks.iter() {
            if let Err((consumed, e)) = self.decoder.decode_into(block.words, hits) {
                summary.decode_errors += 1;
                spdlog::warn!(
                    "Spill {}, module {}: {e}; skipping last {} words of module data",
                    self.spill_number(),
                    block.module_number,
                    block.words.len() - consumed
                );
            }
        }
        summary.hits = hits.len() - start;
        self.full_spills += 1;
        SpillVerdict::Full(summary)
    }

    fn spill_number(&self) -> u64 {
        self.full_spills + self.bad_spills
    }
}

/// Frame module data into a spill, adding block headers and the trailer
pub fn encode_spill(modules: &[(u32, Vec<u32>)]) -> Vec<u32> {
    let mut spill = Vec::new();
    for (module_number, words) in modules {
        spill.push((words.len() + MODULE_BLOCK_HEADER_WORDS) as u32);
        spill.push(*module_number);
        spill.extend_from_slice(words);
    }
    spill.extend_from_slice(&END_OF_SPILL);
    spill
}
