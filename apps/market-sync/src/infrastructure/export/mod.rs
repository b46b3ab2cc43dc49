//! Export Sinks
//!
//! [`CsvFileSink`] appends aligned rows to a CSV file. The file is opened in
//! append mode, so rerunning an export into the same path adds to it.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{Writer, WriterBuilder};

use crate::application::ports::{RowSink, SinkError};
use crate::infrastructure::metrics;

/// CSV file sink.
#[derive(Debug)]
pub struct CsvFileSink {
    path: PathBuf,
    writer: Writer<File>,
    pending_rows: u64,
}

impl CsvFileSink {
    /// Open `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "Opened CSV sink");
        Ok(Self {
            path,
            writer: WriterBuilder::new().has_headers(false).from_writer(file),
            pending_rows: 0,
        })
    }

    /// Path being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RowSink for CsvFileSink {
    fn write_header(&mut self, header: &[String]) -> Result<(), SinkError> {
        self.writer.write_record(header)?;
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> Result<(), SinkError> {
        self.writer.write_record(row)?;
        self.pending_rows += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        if self.pending_rows > 0 {
            metrics::record_rows_exported(self.pending_rows);
            self.pending_rows = 0;
        }
        Ok(())
    }
}
