use super::constants::*;

/// The closed set of header lengths a Pixie16 module can emit.
///
/// Each code selects which optional word groups follow the four base header words. The
/// groups always appear in the order energy sums, QDC sums, external timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderLength {
    Base,
    ExternalTimestamp,
    EnergySums,
    EnergySumsExternalTimestamp,
    QdcSums,
    QdcSumsExternalTimestamp,
    EnergyQdcSums,
    EnergyQdcSumsExternalTimestamp,
}

impl HeaderLength {
    pub const ALL: [HeaderLength; 8] = [
        Self::Base,
        Self::ExternalTimestamp,
        Self::EnergySums,
        Self::EnergySumsExternalTimestamp,
        Self::QdcSums,
        Self::QdcSumsExternalTimestamp,
        Self::EnergyQdcSums,
        Self::EnergyQdcSumsExternalTimestamp,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.words() == code as usize)
    }

    pub fn from_sections(energy_sums: bool, qdc_sums: bool, external_timestamp: bool) -> Self {
        match (energy_sums, qdc_sums, external_timestamp) {
            (false, false, false) => Self::Base,
            (false, false, true) => Self::ExternalTimestamp,
            (true, false, false) => Self::EnergySums,
            (true, false, true) => Self::EnergySumsExternalTimestamp,
            (false, true, false) => Self::QdcSums,
            (false, true, true) => Self::QdcSumsExternalTimestamp,
            (true, true, false) => Self::EnergyQdcSums,
            (true, true, true) => Self::EnergyQdcSumsExternalTimestamp,
        }
    }

    pub fn has_energy_sums(&self) -> bool {
        matches!(
            self,
            Self::EnergySums
                | Self::EnergySumsExternalTimestamp
                | Self::EnergyQdcSums
                | Self::EnergyQdcSumsExternalTimestamp
        )
    }

    pub fn has_qdc_sums(&self) -> bool {
        matches!(
            self,
            Self::QdcSums
                | Self::QdcSumsExternalTimestamp
                | Self::EnergyQdcSums
                | Self::EnergyQdcSumsExternalTimestamp
        )
    }

    pub fn has_external_timestamp(&self) -> bool {
        matches!(
            self,
            Self::ExternalTimestamp
                | Self::EnergySumsExternalTimestamp
                | Self::QdcSumsExternalTimestamp
                | Self::EnergyQdcSumsExternalTimestamp
        )
    }

    /// Number of header words, which is also the code written in the header
    pub fn words(&self) -> usize {
        let mut words = BASE_HEADER_WORDS;
        if self.has_energy_sums() {
            words += ENERGY_SUM_WORDS;
        }
        if self.has_qdc_sums() {
            words += QDC_SUM_WORDS;
        }
        if self.has_external_timestamp() {
            words += EXTERNAL_TS_WORDS;
        }
        words
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HitFlags {
    pub pileup: bool,
    pub saturated: bool,
    pub virtual_channel: bool,
}

/// One digitized pulse from one channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelHit {
    /// Flattened module index: module + 100 * crate
    pub module: u32,
    pub channel: u8,
    pub slot: u8,
    pub crate_number: u8,
    pub energy: u32,
    /// 48-bit timestamp in clock ticks
    pub coarse_time: u64,
    pub cfd_fraction: u16,
    pub flags: HitFlags,
    pub external_time: Option<u64>,
    pub energy_sums: Option<[u32; ENERGY_SUM_WORDS]>,
    pub qdc_sums: Option<[u32; QDC_SUM_WORDS]>,
    pub trace: Option<Vec<u16>>,
}

impl ChannelHit {
    pub fn header_length(&self) -> HeaderLength {
        HeaderLength::from_sections(
            self.energy_sums.is_some(),
            self.qdc_sums.is_some(),
            self.external_time.is_some(),
        )
    }

    pub fn trace_length(&self) -> usize {
        self.trace.as_ref().map_or(0, |t| t.len())
    }

    /// Total words this hit occupies in a list-mode stream
    pub fn event_length(&self) -> usize {
        self.header_length().words() + self.trace_length() / 2
    }

    /// Clock ticks as seconds
    pub fn time_seconds(&self) -> f64 {
        self.coarse_time as f64 / CLOCK_TICKS_PER_SECOND as f64
    }
}
