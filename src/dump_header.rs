use std::io::{Read, Seek, Write};

use crate::error::{FilterError, Result};
use crate::reader::FramedReader;
use crate::record::{DUMP_FORMAT_VERSION, UUID};

pub const VALID_DUMP_FORMAT_VERSIONS: [i64; 2] = [2, 3];

/// The two-field dump preamble (spec.md §3): a format version and the
/// repository UUID, each followed by a blank line.
#[derive(Debug, Clone)]
pub struct DumpHeader {
    pub version: i64,
    pub uuid: String,
}

impl DumpHeader {
    pub fn extract<R: Read + Seek>(reader: &mut FramedReader<R>) -> Result<Self> {
        let version_line = reader.readline()?;
        let version = parse_kv_line(&version_line, DUMP_FORMAT_VERSION)?
            .parse::<i64>()
            .map_err(|_| FilterError::MalformedRecord(format!("bad dump version: {version_line:?}")))?;
        reader.readline()?; // blank line

        let uuid_line = reader.readline()?;
        let uuid = parse_kv_line(&uuid_line, UUID)?.to_string();
        reader.readline()?; // blank line

        if !VALID_DUMP_FORMAT_VERSIONS.contains(&version) {
            return Err(FilterError::UnsupportedDumpVersion { found: version });
        }

        Ok(Self { version, uuid })
    }

    pub fn emit<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "{DUMP_FORMAT_VERSION}: {}", self.version)?;
        writeln!(w)?;
        writeln!(w, "{UUID}: {}", self.uuid)?;
        writeln!(w)?;
        Ok(())
    }
}

fn parse_kv_line<'a>(line: &'a str, expected_key: &str) -> Result<&'a str> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let (key, value) = line
        .split_once(": ")
        .ok_or_else(|| FilterError::MalformedRecord(format!("malformed dump header line: {line:?}")))?;
    if key != expected_key {
        return Err(FilterError::MalformedRecord(format!(
            "expected header {expected_key:?}, found {key:?}"
        )));
    }
    Ok(value)
}
