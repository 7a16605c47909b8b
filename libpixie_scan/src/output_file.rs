use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Instant;

use super::buffer::{write_buffer, BufferType, Framing};
use super::config::FileFormat;
use super::constants::*;
use super::error::OutputFileError;
use super::ldf::{plan_chunks, DataBufferBuilder, DirBuffer, LdfHeader};
use super::pld::{pld_date_now, PldHeader};

/// Writes spills as a legacy buffer stream.
///
/// The DIR buffer is written first as a placeholder. Its buffer count is only known once the
/// file is closed, at which point it is patched in place.
#[derive(Debug)]
pub struct LdfWriter<W: Write + Seek> {
    writer: W,
    dir_start: u64,
    data: DataBufferBuilder,
    buffers_written: u32,
    spills_written: u64,
}

impl<W: Write + Seek> LdfWriter<W> {
    pub fn new(mut writer: W, title: &str, run_number: u32) -> Result<Self, OutputFileError> {
        let dir_start = writer.stream_position()?;
        write_buffer(
            &mut writer,
            BufferType::Dir,
            &DirBuffer::new(run_number).to_words(),
            Framing::Fixed,
        )?;
        write_buffer(
            &mut writer,
            BufferType::Head,
            &LdfHeader::new(title, run_number).to_words(),
            Framing::Fixed,
        )?;
        Ok(Self {
            writer,
            dir_start,
            data: DataBufferBuilder::new(),
            buffers_written: 2,
            spills_written: 0,
        })
    }

    pub fn spills_written(&self) -> u64 {
        self.spills_written
    }

    /// Append a spill, splitting it into chunks where it does not fit the current buffer
    pub fn write_spill(&mut self, spill: &[u32]) -> Result<(), OutputFileError> {
        let plan = plan_chunks(spill.len(), self.data.used_words());
        let total = u32::try_from(plan.len())
            .map_err(|_| OutputFileError::SpillTooLarge(spill.len()))?;
        let mut offset = 0;
        for (idx, (fresh, size)) in plan.into_iter().enumerate() {
            if fresh && !self.data.is_empty() {
                self.flush_data()?;
            }
            self.data
                .push_chunk(idx as u32 + 1, total, &spill[offset..offset + size]);
            offset += size;
        }
        self.spills_written += 1;
        Ok(())
    }

    fn flush_data(&mut self) -> Result<(), OutputFileError> {
        self.data.flush(&mut self.writer)?;
        self.buffers_written += 1;
        Ok(())
    }

    /// Write the last DATA buffer and the closing double EOF, then patch the DIR count
    pub fn close(mut self) -> Result<W, OutputFileError> {
        if !self.data.is_empty() {
            self.flush_data()?;
        }
        for _ in 0..2 {
            write_buffer(&mut self.writer, BufferType::Eof, &[], Framing::Fixed)?;
            self.buffers_written += 1;
        }
        DirBuffer::patch_count(&mut self.writer, self.dir_start, self.buffers_written)?;
        self.writer.flush()?;
        spdlog::info!(
            "Closed legacy output with {} spills in {} buffers",
            self.spills_written,
            self.buffers_written
        );
        Ok(self.writer)
    }
}

/// Writes spills as a PLD stream.
///
/// The header is rewritten at close with the end date, the largest spill and the run time.
#[derive(Debug)]
pub struct PldWriter<W: Write + Seek> {
    writer: W,
    header_start: u64,
    header: PldHeader,
    started: Instant,
    spills_written: u64,
}

impl<W: Write + Seek> PldWriter<W> {
    pub fn new(mut writer: W, title: &str, run_number: u32) -> Result<Self, OutputFileError> {
        let header_start = writer.stream_position()?;
        let header = PldHeader::new(title, run_number);
        write_buffer(&mut writer, BufferType::Head, &header.to_words(), Framing::Variable)?;
        Ok(Self {
            writer,
            header_start,
            header,
            started: Instant::now(),
            spills_written: 0,
        })
    }

    pub fn spills_written(&self) -> u64 {
        self.spills_written
    }

    pub fn write_spill(&mut self, spill: &[u32]) -> Result<(), OutputFileError> {
        if spill.len() > PLD_MAX_BUFFER_WORDS {
            return Err(OutputFileError::SpillTooLarge(spill.len()));
        }
        write_buffer(&mut self.writer, BufferType::Data, spill, Framing::Variable)?;
        self.header.max_spill_words = self.header.max_spill_words.max(spill.len() as u32);
        self.spills_written += 1;
        Ok(())
    }

    pub fn close(mut self) -> Result<W, OutputFileError> {
        write_buffer(&mut self.writer, BufferType::Eof, &[], Framing::Variable)?;
        self.header.end_date = pld_date_now();
        self.header.run_time = self.started.elapsed().as_secs_f32();

        let end = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(self.header_start))?;
        write_buffer(
            &mut self.writer,
            BufferType::Head,
            &self.header.to_words(),
            Framing::Variable,
        )?;
        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;
        spdlog::info!(
            "Closed PLD output with {} spills; largest spill {} words",
            self.spills_written,
            self.header.max_spill_words
        );
        Ok(self.writer)
    }
}

/// An output file that is open for writing. Closing consumes it.
#[derive(Debug)]
pub enum OutputFile {
    Ldf(LdfWriter<BufWriter<File>>),
    Pld(PldWriter<BufWriter<File>>),
}

impl OutputFile {
    pub fn create(
        path: &Path,
        format: FileFormat,
        title: &str,
        run_number: u32,
    ) -> Result<Self, OutputFileError> {
        let writer = BufWriter::new(File::create(path)?);
        spdlog::info!("Writing {format:?} output to {}", path.display());
        Ok(match format {
            FileFormat::Ldf => Self::Ldf(LdfWriter::new(writer, title, run_number)?),
            FileFormat::Pld => Self::Pld(PldWriter::new(writer, title, run_number)?),
        })
    }

    pub fn write_spill(&mut self, spill: &[u32]) -> Result<(), OutputFileError> {
        match self {
            Self::Ldf(ldf) => ldf.write_spill(spill),
            Self::Pld(pld) => pld.write_spill(spill),
        }
    }

    pub fn close(self) -> Result<(), OutputFileError> {
        match self {
            Self::Ldf(ldf) => ldf.close().map(|_| ()),
            Self::Pld(pld) => pld.close().map(|_| ()),
        }
    }
}
