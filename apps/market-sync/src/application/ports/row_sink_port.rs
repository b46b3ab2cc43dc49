//! Row Sink Port (Driven Port)
//!
//! Destination for aligned export rows.

/// Row sink error.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Underlying I/O failed.
    #[error("row sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be written as CSV.
    #[error("row sink CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Accepts a header and then rows, in order.
pub trait RowSink: Send {
    /// Write the header row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_header(&mut self, header: &[String]) -> Result<(), SinkError>;

    /// Append one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_row(&mut self, row: &[String]) -> Result<(), SinkError>;

    /// Flush buffered rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> Result<(), SinkError>;
}

/// In-memory sink, useful for tests and previews.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemorySink {
    /// Header, once written.
    pub header: Option<Vec<String>>,
    /// Rows in write order.
    pub rows: Vec<Vec<String>>,
    /// Number of flushes.
    pub flushes: usize,
}

impl RowSink for MemorySink {
    fn write_header(&mut self, header: &[String]) -> Result<(), SinkError> {
        self.header = Some(header.to_vec());
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> Result<(), SinkError> {
        self.rows.push(row.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.flushes += 1;
        Ok(())
    }
}
