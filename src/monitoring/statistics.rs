use crate::error::{SimError, SimResult};
use crate::shared_data::TickStatistics;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Receives the statistics of every finished tick.
pub trait StatisticsSink: Send {
    fn record(&mut self, stats: &TickStatistics) -> SimResult<()>;

    fn flush(&mut self) -> SimResult<()> {
        Ok(())
    }
}

/// Writes one CSV row per tick.
pub struct StatisticsLog<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl StatisticsLog<File> {
    /// Creates (or truncates) `path` and writes the header on the first row.
    pub fn create(path: &Path) -> SimResult<Self> {
        let file = File::create(path)?;
        log::info!("Writing tick statistics to {}", path.display());
        Ok(Self::from_writer(file))
    }
}

impl<W: Write> StatisticsLog<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(true)
                .from_writer(writer),
            rows: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> SimResult<W> {
        self.writer
            .into_inner()
            .map_err(|e| SimError::Io(e.into_error()))
    }
}

impl<W: Write + Send> StatisticsSink for StatisticsLog<W> {
    fn record(&mut self, stats: &TickStatistics) -> SimResult<()> {
        self.writer.serialize(stats)?;
        self.rows += 1;
        Ok(())
    }

    fn flush(&mut self) -> SimResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads back a file written by `StatisticsLog`.
pub fn read_statistics(path: &Path) -> SimResult<Vec<TickStatistics>> {
    let file = File::open(path)?;
    let mut reader = csv::Reader::from_reader(file);
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}
