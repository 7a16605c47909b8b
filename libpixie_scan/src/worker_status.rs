#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BarColor {
    /// Scanning
    #[default]
    CYAN,
    /// Finished
    GREEN,
}

impl BarColor {
    /// Color name as used by progress bar templates
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CYAN => "cyan",
            Self::GREEN => "green",
        }
    }
}

/// Progress report sent from a processing thread to whoever is displaying it
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub run_number: u32,
    pub spills: u64,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, run_number: u32, spills: u64, color: BarColor) -> Self {
        Self {
            progress,
            run_number,
            spills,
            color,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.progress >= 1.0
    }
}
