use std::ops::Range;

use bitvec::prelude::*;

use super::channel_hit::{ChannelHit, HeaderLength, HitFlags};
use super::constants::*;
use super::error::{DecodeError, EncodeError};
use super::word_cursor::WordCursor;

// Word 0
const CHANNEL_BITS: Range<usize> = 0..4;
const SLOT_BITS: Range<usize> = 4..8;
const CRATE_BITS: Range<usize> = 8..12;
const HEADER_LENGTH_BITS: Range<usize> = 12..17;
const EVENT_LENGTH_BITS: Range<usize> = 17..30;
const VIRTUAL_BIT: usize = 30;
const PILEUP_BIT: usize = 31;
// Word 2
const TIME_HIGH_BITS: Range<usize> = 0..16;
const CFD_BITS: Range<usize> = 16..32;
// Word 3
const ENERGY_BITS: Range<usize> = 0..16;
const TRACE_LENGTH_BITS: Range<usize> = 16..31;
const SATURATED_BIT: usize = 31;

/// Settings for the word decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Slot holding module 0 of each crate
    pub first_slot: u8,
    /// Energy reported for hits whose ADC went out of range
    pub saturation_energy: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            first_slot: DEFAULT_FIRST_SLOT,
            saturation_energy: DEFAULT_SATURATION_ENERGY,
        }
    }
}

/// Decodes list-mode data from a single module into ChannelHits.
#[derive(Debug, Clone, Default)]
pub struct WordDecoder {
    config: DecoderConfig,
}

impl WordDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode a whole block of list-mode words.
    ///
    /// This is all-or-nothing; use [WordDecoder::decode_into] to keep the hits decoded
    /// before an error.
    pub fn decode(&self, words: &[u32]) -> Result<Vec<ChannelHit>, DecodeError> {
        let mut hits = Vec::new();
        self.decode_into(words, &mut hits).map_err(|(_, error)| error)?;
        Ok(hits)
    }

    /// Decode a block of list-mode words, appending hits as they are decoded.
    ///
    /// Returns the number of words consumed. On error the remainder of the block is
    /// abandoned, but every hit decoded before the bad one has already been appended; the
    /// error comes with the number of words consumed up to that point.
    pub fn decode_into(
        &self,
        words: &[u32],
        hits: &mut Vec<ChannelHit>,
    ) -> Result<usize, (usize, DecodeError)> {
        let mut cursor = WordCursor::new(words);
        while !cursor.is_empty() {
            match self.decode_hit(&mut cursor) {
                Ok(Some(hit)) => hits.push(hit),
                Ok(None) => (),
                Err(e) => return Err((cursor.position(), e)),
            }
        }
        Ok(cursor.position())
    }

    /// Decode the hit at the cursor. Statistics blocks are skipped and give None.
    fn decode_hit(&self, cursor: &mut WordCursor) -> Result<Option<ChannelHit>, DecodeError> {
        let offset = cursor.position();
        let truncated = |needed: usize, cursor: &WordCursor| DecodeError::Truncated {
            offset,
            needed,
            available: cursor.remaining(),
        };

        let Some(header) = cursor.peek() else {
            return Err(truncated(1, cursor));
        };
        let bits = header.view_bits::<Lsb0>();
        let code: u8 = bits[HEADER_LENGTH_BITS].load_le();
        let event_length = bits[EVENT_LENGTH_BITS].load_le::<u16>() as usize;

        if code == STATS_BLOCK_CODE {
            if event_length == 0 {
                return Err(DecodeError::Length {
                    offset,
                    header_length: 1,
                    event_length,
                    trace_length: 0,
                });
            }
            cursor
                .skip(event_length)
                .ok_or_else(|| truncated(event_length, cursor))?;
            return Ok(None);
        }

        let header_length =
            HeaderLength::from_code(code).ok_or(DecodeError::UnknownHeaderCode { code, offset })?;
        let header_words = header_length.words();

        let base = cursor
            .take(BASE_HEADER_WORDS)
            .ok_or_else(|| truncated(header_words, cursor))?;
        let time_word = base[2].view_bits::<Lsb0>();
        let energy_word = base[3].view_bits::<Lsb0>();
        let trace_length = energy_word[TRACE_LENGTH_BITS].load_le::<u16>() as usize;

        if trace_length / 2 + header_words != event_length {
            return Err(DecodeError::Length {
                offset,
                header_length: header_words,
                event_length,
                trace_length,
            });
        }

        let slot: u8 = bits[SLOT_BITS].load_le();
        let crate_number: u8 = bits[CRATE_BITS].load_le();
        let flags = HitFlags {
            pileup: bits[PILEUP_BIT],
            saturated: energy_word[SATURATED_BIT],
            virtual_channel: bits[VIRTUAL_BIT],
        };
        let energy = if flags.saturated {
            self.config.saturation_energy
        } else {
            energy_word[ENERGY_BITS].load_le::<u32>()
        };

        let mut hit = ChannelHit {
            module: slot.saturating_sub(self.config.first_slot) as u32
                + MODULES_PER_CRATE * crate_number as u32,
            channel: bits[CHANNEL_BITS].load_le(),
            slot,
            crate_number,
            energy,
            coarse_time: base[1] as u64
                | (time_word[TIME_HIGH_BITS].load_le::<u64>() << 32),
            cfd_fraction: time_word[CFD_BITS].load_le(),
            flags,
            ..Default::default()
        };

        let optional = cursor
            .take(header_words - BASE_HEADER_WORDS)
            .ok_or_else(|| truncated(header_words - BASE_HEADER_WORDS, cursor))?;
        let mut sections = WordCursor::new(optional);
        if header_length.has_energy_sums() {
            hit.energy_sums = sections
                .take(ENERGY_SUM_WORDS)
                .and_then(|sums| sums.try_into().ok());
        }
        if header_length.has_qdc_sums() {
            hit.qdc_sums = sections
                .take(QDC_SUM_WORDS)
                .and_then(|sums| sums.try_into().ok());
        }
        if header_length.has_external_timestamp() {
            hit.external_time = sections
                .take(EXTERNAL_TS_WORDS)
                .map(|ts| ts[0] as u64 | ((ts[1] as u64) << 32));
        }

        if trace_length > 0 {
            let packed = cursor
                .take(trace_length / 2)
                .ok_or_else(|| truncated(trace_length / 2, cursor))?;
            let mut trace = Vec::with_capacity(packed.len() * 2);
            for word in packed {
                trace.push((word & 0xFFFF) as u16);
                trace.push((word >> 16) as u16);
            }
            hit.trace = Some(trace);
        }

        Ok(Some(hit))
    }
}

/// Check that a value fits in a field of `width` bits
fn check_field(field: &'static str, value: u64, width: usize) -> Result<(), EncodeError> {
    let max = (1u64 << width) - 1;
    if value > max {
        return Err(EncodeError::FieldOutOfRange { field, value, max });
    }
    Ok(())
}

/// Encode a hit into list-mode words. This is the inverse of [WordDecoder::decode].
///
/// Odd-length traces lose their last sample, since samples are packed two per word. Hits
/// with a value too wide for its field are rejected.
pub fn encode(hit: &ChannelHit) -> Result<Vec<u32>, EncodeError> {
    let header_length = hit.header_length();
    let trace_words = hit.trace_length() / 2;
    let event_length = header_length.words() + trace_words;
    check_field("channel", hit.channel as u64, CHANNEL_BITS.len())?;
    check_field("slot", hit.slot as u64, SLOT_BITS.len())?;
    check_field("crate", hit.crate_number as u64, CRATE_BITS.len())?;
    check_field("energy", hit.energy as u64, ENERGY_BITS.len())?;
    check_field("coarse_time", hit.coarse_time, 32 + TIME_HIGH_BITS.len())?;
    // Also bounds the trace length field, which is wider than twice this
    check_field("event_length", event_length as u64, EVENT_LENGTH_BITS.len())?;

    let mut words = vec![0u32; header_length.words()];
    {
        let bits = words[0].view_bits_mut::<Lsb0>();
        bits[CHANNEL_BITS].store_le(hit.channel);
        bits[SLOT_BITS].store_le(hit.slot);
        bits[CRATE_BITS].store_le(hit.crate_number);
        bits[HEADER_LENGTH_BITS].store_le(header_length.words() as u8);
        bits[EVENT_LENGTH_BITS].store_le(event_length as u16);
        bits.set(VIRTUAL_BIT, hit.flags.virtual_channel);
        bits.set(PILEUP_BIT, hit.flags.pileup);
    }
    words[1] = hit.coarse_time as u32;
    {
        let bits = words[2].view_bits_mut::<Lsb0>();
        bits[TIME_HIGH_BITS].store_le((hit.coarse_time >> 32) as u16);
        bits[CFD_BITS].store_le(hit.cfd_fraction);
    }
    {
        let bits = words[3].view_bits_mut::<Lsb0>();
        bits[ENERGY_BITS].store_le(hit.energy as u16);
        bits[TRACE_LENGTH_BITS].store_le((trace_words * 2) as u16);
        bits.set(SATURATED_BIT, hit.flags.saturated);
    }

    let mut idx = BASE_HEADER_WORDS;
    if let Some(sums) = &hit.energy_sums {
        words[idx..idx + ENERGY_SUM_WORDS].copy_from_slice(sums);
        idx += ENERGY_SUM_WORDS;
    }
    if let Some(sums) = &hit.qdc_sums {
        words[idx..idx + QDC_SUM_WORDS].copy_from_slice(sums);
        idx += QDC_SUM_WORDS;
    }
    if let Some(ts) = hit.external_time {
        words[idx] = ts as u32;
        words[idx + 1] = (ts >> 32) as u32;
    }

    if let Some(trace) = &hit.trace {
        for pair in trace.chunks_exact(2) {
            words.push(pair[0] as u32 | ((pair[1] as u32) << 16));
        }
    }
    Ok(words)
}

/// Encode a statistics block holding the given body words
pub fn encode_stats_block(body: &[u32]) -> Result<Vec<u32>, EncodeError> {
    let event_length = body.len() + 1;
    check_field("event_length", event_length as u64, EVENT_LENGTH_BITS.len())?;
    let mut header = 0u32;
    {
        let bits = header.view_bits_mut::<Lsb0>();
        bits[HEADER_LENGTH_BITS].store_le(STATS_BLOCK_CODE);
        bits[EVENT_LENGTH_BITS].store_le(event_length as u16);
    }
    let mut words = vec![header];
    words.extend_from_slice(body);
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hit(header_length: HeaderLength, trace: Option<Vec<u16>>) -> ChannelHit {
        ChannelHit {
            module: 3 + 100,
            channel: 11,
            slot: 5,
            crate_number: 1,
            energy: 1234,
            coarse_time: 0x0000_ABCD_1234_5678,
            cfd_fraction: 0x3FF0,
            flags: HitFlags {
                pileup: true,
                saturated: false,
                virtual_channel: true,
            },
            external_time: header_length
                .has_external_timestamp()
                .then_some(0x0001_0002_0003_0004),
            energy_sums: header_length
                .has_energy_sums()
                .then_some([10, 20, 30, 40]),
            qdc_sums: header_length
                .has_qdc_sums()
                .then_some([1, 2, 3, 4, 5, 6, 7, 8]),
            trace,
        }
    }

    #[test]
    fn every_header_code_round_trips() {
        let decoder = WordDecoder::default();
        for header_length in HeaderLength::ALL {
            for trace in [None, Some(vec![100, 200, 300, 400, 65535, 0])] {
                let hit = make_hit(header_length, trace);
                let words = encode(&hit).unwrap();
                assert_eq!(words.len(), hit.event_length());
                let decoded = decoder.decode(&words).unwrap();
                assert_eq!(decoded, vec![hit]);
            }
        }
    }

    #[test]
    fn saturated_energy_is_clamped() {
        let decoder = WordDecoder::default();
        let mut hit = make_hit(HeaderLength::Base, None);
        hit.flags.saturated = true;
        hit.energy = 0xFFFF; // wrapped raw value
        let decoded = decoder.decode(&encode(&hit).unwrap()).unwrap();
        assert_eq!(decoded[0].energy, DEFAULT_SATURATION_ENERGY);
        assert!(decoded[0].flags.saturated);
    }

    #[test]
    fn module_is_flattened_with_crate() {
        let decoder = WordDecoder::default();
        let mut hit = make_hit(HeaderLength::Base, None);
        hit.slot = 2;
        hit.crate_number = 3;
        let decoded = decoder.decode(&encode(&hit).unwrap()).unwrap();
        assert_eq!(decoded[0].module, 300);
    }

    #[test]
    fn length_mismatch_stops_without_overread() {
        let decoder = WordDecoder::default();
        let good = make_hit(HeaderLength::Base, None);
        let mut bad =
            encode(&make_hit(HeaderLength::EnergySums, Some(vec![1, 2, 3, 4]))).unwrap();
        // Claim two fewer trace samples than are present
        bad[3] = (bad[3] & !(0x7FFF << 16)) | (2 << 16);
        let mut words = encode(&good).unwrap();
        let bad_offset = words.len();
        words.extend(&bad);
        words.extend(encode(&good).unwrap());

        let mut hits = Vec::new();
        let (consumed, err) = decoder.decode_into(&words, &mut hits).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Length {
                offset: bad_offset,
                header_length: 8,
                event_length: 10,
                trace_length: 2,
            }
        );
        assert!(consumed > bad_offset);
        assert!(consumed <= bad_offset + 8);
        assert_eq!(hits, vec![good]);
    }

    #[test]
    fn unknown_header_code_keeps_earlier_hits() {
        let decoder = WordDecoder::default();
        let good = make_hit(HeaderLength::QdcSums, None);
        let mut words = encode(&good).unwrap();
        words.push(7 << 12 | 7 << 17);
        words.extend(encode(&good).unwrap());
        let mut hits = Vec::new();
        let (consumed, err) = decoder.decode_into(&words, &mut hits).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownHeaderCode {
                code: 7,
                offset: good.event_length()
            }
        );
        assert_eq!(consumed, good.event_length());
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn stats_block_is_skipped() {
        let decoder = WordDecoder::default();
        let hit = make_hit(HeaderLength::Base, None);
        let mut words = encode_stats_block(&[0xDEAD; 9]).unwrap();
        assert_eq!(words.len(), 10);
        words.extend(encode(&hit).unwrap());
        assert_eq!(decoder.decode(&words).unwrap(), vec![hit]);

        let mut hits = Vec::new();
        let block = encode_stats_block(&[0; 9]).unwrap();
        assert_eq!(decoder.decode_into(&block, &mut hits), Ok(10));
        assert!(hits.is_empty());
    }

    #[test]
    fn values_too_wide_for_their_field_are_rejected() {
        let decoder = WordDecoder::default();
        let mut hit = make_hit(HeaderLength::Base, None);
        hit.energy = 0x1_0000;
        assert_eq!(
            encode(&hit),
            Err(EncodeError::FieldOutOfRange {
                field: "energy",
                value: 0x1_0000,
                max: 0xFFFF
            })
        );

        // The longest trace that still fits the 13-bit event length
        let mut hit = make_hit(HeaderLength::EnergyQdcSumsExternalTimestamp, None);
        hit.trace = Some(vec![7; 2 * (8191 - 18)]);
        let words = encode(&hit).unwrap();
        assert_eq!(decoder.decode(&words).unwrap(), vec![hit.clone()]);
        hit.trace = Some(vec![7; 2 * (8191 - 18) + 2]);
        assert!(matches!(
            encode(&hit),
            Err(EncodeError::FieldOutOfRange {
                field: "event_length",
                ..
            })
        ));

        let mut hit = make_hit(HeaderLength::Base, None);
        hit.slot = 16;
        assert!(encode(&hit).is_err());
        hit.slot = 2;
        hit.coarse_time = 1 << 48;
        assert!(encode(&hit).is_err());
        assert!(encode_stats_block(&[0; 8191]).is_err());
    }

    #[test]
    fn short_block_is_truncated() {
        let decoder = WordDecoder::default();
        let words = encode(&make_hit(HeaderLength::QdcSums, Some(vec![1, 2]))).unwrap();
        assert!(matches!(
            decoder.decode(&words[..words.len() - 1]),
            Err(DecodeError::Truncated { offset: 0, .. })
        ));
    }
}
