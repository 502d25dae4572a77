use std::io::{BufWriter, Write};

use crate::error::{Error, Result};
use crate::executor::RowSink;
use crate::validation::validate_delimiter;

/// Writes delimited lines terminated by `\n`. Values are emitted verbatim, in
/// the order given; nothing is quoted, so a line holding one empty value is
/// just the terminator.
pub struct DelimitedWriter<W: Write> {
    inner: BufWriter<W>,
    delimiter: u8,
    rows_written: u64,
}

impl<W: Write> DelimitedWriter<W> {
    pub fn new(sink: W, delimiter: char) -> Result<Self> {
        let delimiter = validate_delimiter(delimiter)?;
        Ok(Self {
            inner: BufWriter::new(sink),
            delimiter,
            rows_written: 0,
        })
    }

    pub fn write_header<S: AsRef<str>>(&mut self, columns: &[S]) -> Result<()> {
        self.write_line(columns)
    }

    pub fn write_row<S: AsRef<str>>(&mut self, values: &[S]) -> Result<()> {
        self.write_line(values)?;
        self.rows_written += 1;
        Ok(())
    }

    fn write_line<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<()> {
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.inner.write_all(&[self.delimiter])?;
            }
            self.inner.write_all(field.as_ref().as_bytes())?;
        }
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    /// Data rows written so far, excluding the header.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flushes and hands back the underlying sink.
    pub fn into_inner(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))
    }
}

impl<W: Write> RowSink for DelimitedWriter<W> {
    fn write_row(&mut self, row: &[String]) -> Result<()> {
        DelimitedWriter::write_row(self, row)
    }
}
