use std::io::Read;

use csv::{ReaderBuilder, StringRecord};

use crate::error::{Error, Result};
use crate::validation::validate_delimiter;

/// One data line split on the delimiter. `line` is 1-based; the header is line 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimitedRow {
    pub line: u64,
    pub fields: Vec<String>,
}

/// Single-pass reader over a delimited source. The header is read eagerly,
/// data rows lazily as the iterator advances.
///
/// Fields are split on the delimiter only: quotes are ordinary characters and
/// there is no escaping. A row whose field count differs from the header is
/// yielded as `Err(MalformedRow)` and iteration continues with the next line.
/// Blank lines are skipped entirely: they are neither rows nor malformed, and
/// the line numbers of later rows still count them.
pub struct DelimitedReader<R: Read> {
    inner: csv::Reader<R>,
    header: Vec<String>,
    record: StringRecord,
    done: bool,
}

impl<R: Read> DelimitedReader<R> {
    pub fn new(source: R, delimiter: char) -> Result<Self> {
        let delimiter = validate_delimiter(delimiter)?;
        let mut inner = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .quoting(false)
            .flexible(true)
            .from_reader(source);

        let mut record = StringRecord::new();
        if !inner.read_record(&mut record)? {
            return Err(Error::InvalidRequest("source is empty".to_string()));
        }
        let header = record.iter().map(str::to_string).collect();

        Ok(Self {
            inner,
            header,
            record,
            done: false,
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn field_count(&self) -> usize {
        self.header.len()
    }
}

impl<R: Read> Iterator for DelimitedReader<R> {
    type Item = Result<DelimitedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.read_record(&mut self.record) {
            Ok(true) => {
                let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                if self.record.len() != self.header.len() {
                    return Some(Err(Error::MalformedRow {
                        line,
                        expected: self.header.len(),
                        found: self.record.len(),
                    }));
                }
                Some(Ok(DelimitedRow {
                    line,
                    fields: self.record.iter().map(str::to_string).collect(),
                }))
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                // A read failure leaves the underlying stream in an unknown state.
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}
