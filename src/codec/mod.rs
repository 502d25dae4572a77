mod reader;
mod writer;

pub use reader::{DelimitedReader, DelimitedRow};
pub use writer::DelimitedWriter;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::Result;

pub const DEFAULT_DELIMITER: char = ',';

/// Header fields of a delimited file.
pub fn read_header(path: impl AsRef<Path>, delimiter: char) -> Result<Vec<String>> {
    let file = File::open(path.as_ref())?;
    let reader = DelimitedReader::new(BufReader::new(file), delimiter)?;
    Ok(reader.header().to_vec())
}

/// Non-empty lines after the header. Used as the progress total for an ingest.
pub fn count_data_rows(path: impl AsRef<Path>) -> Result<u64> {
    let file = BufReader::new(File::open(path.as_ref())?);
    let mut count = 0u64;
    for (i, line) in file.lines().enumerate() {
        let line = line?;
        if i > 0 && !line.trim_end_matches('\r').is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Reads every data row of a file and fails on the first one that is
/// malformed or unreadable.
pub fn check_rows(path: impl AsRef<Path>, delimiter: char) -> Result<()> {
    let file = File::open(path.as_ref())?;
    for row in DelimitedReader::new(BufReader::new(file), delimiter)? {
        row?;
    }
    Ok(())
}
