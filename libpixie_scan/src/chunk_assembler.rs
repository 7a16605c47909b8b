use super::error::ChunkError;

/// Result of handing one chunk to the assembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkStatus {
    /// More chunks are needed before the spill is complete
    Pending,
    /// The final chunk arrived; contains the full spill
    Complete(Vec<u32>),
}

/// Reassembles spills delivered as numbered chunk trains.
///
/// Chunks are numbered from 1 to total. The chunk number must increase by exactly one
/// within a train. Any gap throws away the partial spill, and a train that is joined
/// part-way through (first chunk seen is not 1) is ignored until the next chunk 1.
/// Used both for legacy DATA buffer chunks and for UDP datagrams.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    expected: Option<u32>,
    total: u32,
    words: Vec<u32>,
    lost_spills: u64,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk. Errors mean the chunk (and any partial spill) was discarded.
    pub fn push(
        &mut self,
        current: u32,
        total: u32,
        payload: &[u32],
    ) -> Result<ChunkStatus, ChunkError> {
        if current == 0 || total == 0 || current > total {
            self.discard();
            return Err(ChunkError::InvalidHeader { current, total });
        }

        if current == 1 {
            if let Some(expected) = self.expected {
                // A new train started before the old one finished
                spdlog::warn!(
                    "Spill lost: expected chunk {} of {} but a new spill started",
                    expected,
                    self.total
                );
                self.discard();
            }
            self.words.clear();
            self.total = total;
        } else {
            match self.expected {
                None => return Err(ChunkError::Resync { received: current }),
                Some(_) if total != self.total => {
                    let expected = self.total;
                    self.discard();
                    return Err(ChunkError::TotalMismatch {
                        expected,
                        received: total,
                    });
                }
                Some(expected) if expected != current => {
                    self.discard();
                    return Err(ChunkError::Gap {
                        expected,
                        received: current,
                    });
                }
                Some(_) => (),
            }
        }

        self.words.extend_from_slice(payload);
        if current == total {
            self.expected = None;
            Ok(ChunkStatus::Complete(std::mem::take(&mut self.words)))
        } else {
            self.expected = Some(current + 1);
            Ok(ChunkStatus::Pending)
        }
    }

    /// True while part of a spill has been received
    pub fn in_progress(&self) -> bool {
        self.expected.is_some()
    }

    /// Throw away any partial spill and wait for the next chunk 1
    pub fn reset(&mut self) {
        if self.in_progress() {
            self.discard();
        }
    }

    /// Number of partial spills thrown away so far
    pub fn lost_spills(&self) -> u64 {
        self.lost_spills
    }

    fn discard(&mut self) {
        if self.expected.is_some() {
            self.lost_spills += 1;
        }
        self.expected = None;
        self.words.clear();
    }
}

/// Split a spill into a numbered chunk train of at most `max_payload_words` words per chunk.
///
/// Returns `(current, total, payload)` triples numbered from 1.
pub fn split_into_chunks(spill: &[u32], max_payload_words: usize) -> Vec<(u32, u32, &[u32])> {
    let max_payload_words = max_payload_words.max(1);
    if spill.is_empty() {
        return vec![(1, 1, spill)];
    }
    let total = spill.len().div_ceil(max_payload_words) as u32;
    spill
        .chunks(max_payload_words)
        .enumerate()
        .map(|(idx, chunk)| (idx as u32 + 1, total, chunk))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_train_reassembles() {
        let mut assembler = ChunkAssembler::new();
        assert_eq!(assembler.push(1, 3, &[1, 2]), Ok(ChunkStatus::Pending));
        assert_eq!(assembler.push(2, 3, &[3]), Ok(ChunkStatus::Pending));
        assert_eq!(
            assembler.push(3, 3, &[4, 5]),
            Ok(ChunkStatus::Complete(vec![1, 2, 3, 4, 5]))
        );
        assert!(!assembler.in_progress());
        assert_eq!(assembler.lost_spills(), 0);
    }

    #[test]
    fn gap_discards_the_spill() {
        let mut assembler = ChunkAssembler::new();
        assert_eq!(assembler.push(1, 3, &[1]), Ok(ChunkStatus::Pending));
        assert_eq!(
            assembler.push(3, 3, &[3]),
            Err(ChunkError::Gap {
                expected: 2,
                received: 3
            })
        );
        assert!(!assembler.in_progress());
        assert_eq!(assembler.lost_spills(), 1);
        // The next train is unaffected
        assert_eq!(
            assembler.push(1, 1, &[9]),
            Ok(ChunkStatus::Complete(vec![9]))
        );
    }

    #[test]
    fn joining_mid_train_is_discarded_until_chunk_one() {
        let mut assembler = ChunkAssembler::new();
        assert_eq!(
            assembler.push(2, 3, &[2]),
            Err(ChunkError::Resync { received: 2 })
        );
        assert_eq!(
            assembler.push(3, 3, &[3]),
            Err(ChunkError::Resync { received: 3 })
        );
        assert_eq!(assembler.push(1, 2, &[1]), Ok(ChunkStatus::Pending));
        assert_eq!(
            assembler.push(2, 2, &[2]),
            Ok(ChunkStatus::Complete(vec![1, 2]))
        );
        assert_eq!(assembler.lost_spills(), 0);
    }

    #[test]
    fn new_train_replaces_unfinished_one() {
        let mut assembler = ChunkAssembler::new();
        assert_eq!(assembler.push(1, 3, &[1]), Ok(ChunkStatus::Pending));
        assert_eq!(assembler.push(1, 2, &[7]), Ok(ChunkStatus::Pending));
        assert_eq!(
            assembler.push(2, 2, &[8]),
            Ok(ChunkStatus::Complete(vec![7, 8]))
        );
        assert_eq!(assembler.lost_spills(), 1);
    }

    #[test]
    fn invalid_headers_are_rejected() {
        let mut assembler = ChunkAssembler::new();
        assert!(matches!(
            assembler.push(0, 3, &[]),
            Err(ChunkError::InvalidHeader { .. })
        ));
        assert!(matches!(
            assembler.push(4, 3, &[]),
            Err(ChunkError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn split_numbers_chunks_from_one() {
        let spill: Vec<u32> = (0..10).collect();
        let chunks = split_into_chunks(&spill, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], (1, 3, &spill[0..4]));
        assert_eq!(chunks[2], (3, 3, &spill[8..10]));
    }
}
