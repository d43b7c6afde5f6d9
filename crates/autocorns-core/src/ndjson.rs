//! Newline-delimited JSON helpers
//!
//! Result streams, error streams, and stage output files all use one JSON
//! object per line with no envelope.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

/// Write each item as one JSON line
pub fn write_lines<'a, W, T, I>(mut writer: W, items: I) -> Result<()>
where
    W: Write,
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read every non-blank line, failing on the first malformed one
pub fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut items = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let item = serde_json::from_str(trimmed).map_err(|source| Error::MalformedLine {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        items.push(item);
    }

    Ok(items)
}
