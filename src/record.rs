use std::io::{Read, Seek, Write};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{FilterError, Result};
use crate::headers::{HeaderValue, Headers};
use crate::reader::FramedReader;

pub const DUMP_FORMAT_VERSION: &str = "SVN-fs-dump-format-version";
pub const UUID: &str = "UUID";
pub const REV_NUM: &str = "Revision-number";
pub const CONTENT_LEN: &str = "Content-length";
pub const PROP_CONTENT_LEN: &str = "Prop-content-length";
pub const TEXT_CONTENT_LEN: &str = "Text-content-length";
pub const TEXT_COPY_SOURCE_MD5: &str = "Text-copy-source-md5";
pub const TEXT_COPY_SOURCE_SHA1: &str = "Text-copy-source-sha1";
pub const TEXT_DELTA: &str = "Text-delta";
pub const TEXT_DELTA_BASE_MD5: &str = "Text-delta-base-md5";
pub const TEXT_DELTA_BASE_SHA1: &str = "Text-delta-base-sha1";
pub const NODE_PATH: &str = "Node-path";
pub const NODE_KIND: &str = "Node-kind";
pub const NODE_ACTION: &str = "Node-action";
pub const NODE_COPYFROM_PATH: &str = "Node-copyfrom-path";
pub const NODE_COPYFROM_REV: &str = "Node-copyfrom-rev";

const PROPS_END: &[u8] = b"PROPS-END";
pub const SVN_MERGEINFO: &str = "svn:mergeinfo\n";

/// Number of bytes occupied by the filter's self-generated property
/// section (`K 23\nsvndumpfilter:generated\nV 4\nTrue\nPROPS-END\n`).
pub const GENERATED_PROPERTY_BYTES: i64 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Revision,
    Node,
}

/// One dump record: a revision record or a node record (spec.md §3).
#[derive(Debug, Clone)]
pub struct Record {
    pub kind: RecordKind,
    pub headers: Headers,
    pub properties: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Record {
    pub fn is_delete_action(&self) -> bool {
        matches!(self.headers.get(NODE_ACTION), Some(HeaderValue::Text(s)) if s == "delete")
    }

    pub fn path(&self) -> Option<&str> {
        self.headers.get(NODE_PATH).and_then(HeaderValue::as_str)
    }

    pub fn copyfrom_rev(&self) -> Option<i64> {
        self.headers.get(NODE_COPYFROM_REV).and_then(HeaderValue::as_int)
    }

    pub fn copyfrom_path(&self) -> Option<&str> {
        self.headers
            .get(NODE_COPYFROM_PATH)
            .and_then(HeaderValue::as_str)
    }

    pub fn revision_number(&self) -> Option<i64> {
        self.headers.get(REV_NUM).and_then(HeaderValue::as_int)
    }

    /// Builds the synthetic `add` node-record template used by the
    /// untangler and the dependent builder (spec.md §4.6).
    pub fn synthetic_add(path: &str, kind: &str, body: Option<Vec<u8>>) -> Record {
        let mut headers = Headers::new();
        headers.push(NODE_PATH, path);
        headers.push(NODE_ACTION, "add");
        headers.push(NODE_KIND, kind);
        headers.push(PROP_CONTENT_LEN, GENERATED_PROPERTY_BYTES);
        if let Some(body) = &body {
            headers.push(TEXT_CONTENT_LEN, body.len() as i64);
            headers.push(CONTENT_LEN, GENERATED_PROPERTY_BYTES + body.len() as i64);
        }
        Record {
            kind: RecordKind::Node,
            headers,
            properties: vec![
                ("K 23\n".to_string(), "svndumpfilter:generated\n".to_string()),
                ("V 4\n".to_string(), "True\n".to_string()),
            ],
            body,
        }
    }

    /// Removes the `svn:mergeinfo` property pair (key entry + value entry)
    /// and recomputes `Prop-content-length`/`Content-length`.
    pub fn strip_mergeinfo(&mut self) -> bool {
        let idx = self
            .properties
            .iter()
            .position(|(_, value)| value == SVN_MERGEINFO);
        let Some(idx) = idx else { return false };
        self.properties.drain(idx..idx + 2);
        self.recompute_prop_length();
        true
    }

    fn recompute_prop_length(&mut self) {
        let mut length = PROPS_END.len() as i64 + 1; // "PROPS-END\n"
        for (k, v) in &self.properties {
            length += k.len() as i64 + v.len() as i64;
        }
        self.headers.update_head(PROP_CONTENT_LEN, length);
        if let Some(text_len) = self.headers.get(TEXT_CONTENT_LEN).and_then(HeaderValue::as_int) {
            self.headers.update_head(CONTENT_LEN, text_len + length);
        } else {
            self.headers.update_head(CONTENT_LEN, length);
        }
    }

    /// Strips copy-source headers when a dangling copy turns out to be
    /// self-contained (spec.md §4.5 step 4).
    pub fn strip_copy_headers(&mut self, dump_version: u32) {
        self.headers.remove(NODE_COPYFROM_REV);
        self.headers.remove(NODE_COPYFROM_PATH);
        self.headers.remove(TEXT_COPY_SOURCE_MD5);
        self.headers.remove(TEXT_COPY_SOURCE_SHA1);
        if dump_version == 3 {
            self.headers.remove(TEXT_DELTA);
            self.headers.remove(TEXT_DELTA_BASE_MD5);
            self.headers.remove(TEXT_DELTA_BASE_SHA1);
        }
    }

    pub fn emit<W: Write>(&self, w: &mut W) -> Result<()> {
        self.write_headers(w)?;
        self.write_properties(w)?;
        if let Some(body) = &self.body {
            let expected = self
                .headers
                .get(TEXT_CONTENT_LEN)
                .and_then(HeaderValue::as_int);
            if expected != Some(body.len() as i64) {
                return Err(FilterError::MalformedRecord(format!(
                    "Text-content-length {:?} does not match body of {} bytes",
                    expected,
                    body.len()
                )));
            }
            w.write_all(body)?;
            w.write_all(b"\n\n")?;
        }
        Ok(())
    }

    fn write_headers<W: Write>(&self, w: &mut W) -> Result<()> {
        for (name, value) in self.headers.iter() {
            writeln!(w, "{name}: {value}")?;
        }
        writeln!(w)?;
        Ok(())
    }

    fn write_properties<W: Write>(&self, w: &mut W) -> Result<()> {
        if !self.headers.contains(PROP_CONTENT_LEN) {
            if self.body.is_none() {
                writeln!(w)?;
            }
            return Ok(());
        }
        if self.kind == RecordKind::Node && self.is_delete_action() {
            writeln!(w)?;
            return Ok(());
        }
        for (key, value) in &self.properties {
            write!(w, "{key}{value}")?;
        }
        w.write_all(PROPS_END)?;
        writeln!(w)?;
        match self.kind {
            RecordKind::Node => {
                if self.body.is_none() {
                    writeln!(w)?;
                    if self.properties.is_empty() {
                        writeln!(w)?;
                    }
                }
            }
            RecordKind::Revision => {
                writeln!(w)?;
            }
        }
        Ok(())
    }
}

fn property_key_pattern(dump_version: u32) -> &'static Regex {
    static V2: OnceLock<Regex> = OnceLock::new();
    static V3: OnceLock<Regex> = OnceLock::new();
    if dump_version == 2 {
        V2.get_or_init(|| Regex::new(r"^[KV] \d+$").unwrap())
    } else {
        V3.get_or_init(|| Regex::new(r"^[KVD] \d+$").unwrap())
    }
}

/// Parses and emits one record at a time from the framed stream
/// (spec.md §4.2).
pub struct RecordCodec;

impl RecordCodec {
    /// Parses the next record. Returns `Ok(None)` when the stream holds no
    /// further records (swallowing blank lines and `* Dumped revision `
    /// trailers along the way).
    pub fn parse<R: Read + Seek>(
        reader: &mut FramedReader<R>,
        dump_version: u32,
    ) -> Result<Option<Record>> {
        if !Self::swallow_separators(reader)? {
            return Ok(None);
        }

        let headers = Self::parse_headers(reader)?;
        let kind = if headers.contains(REV_NUM) {
            RecordKind::Revision
        } else {
            RecordKind::Node
        };
        let properties = Self::parse_properties(reader, &headers, dump_version)?;
        let body = Self::parse_body(reader, &headers)?;

        Ok(Some(Record {
            kind,
            headers,
            properties,
            body,
        }))
    }

    fn swallow_separators<R: Read + Seek>(reader: &mut FramedReader<R>) -> Result<bool> {
        loop {
            let pos = reader.tell()?;
            let line = reader.readline()?;
            if line.is_empty() {
                return Ok(false);
            }
            if line == "\n" || line.starts_with("* Dumped revision ") {
                continue;
            }
            reader.seek(pos)?;
            return Ok(true);
        }
    }

    fn parse_headers<R: Read + Seek>(reader: &mut FramedReader<R>) -> Result<Headers> {
        let mut headers = Headers::new();
        loop {
            let line = reader.readline()?;
            if line.is_empty() {
                return Err(FilterError::MalformedRecord(
                    "unexpected end of stream while reading headers".to_string(),
                ));
            }
            if line == "\n" {
                break;
            }
            let line = line.strip_suffix('\n').unwrap_or(&line);
            let (name, value) = line.split_once(": ").ok_or_else(|| {
                FilterError::MalformedRecord(format!("header line missing ': ': {line:?}"))
            })?;
            headers.push(name, HeaderValue::parse(value));
        }
        Ok(headers)
    }

    fn parse_properties<R: Read + Seek>(
        reader: &mut FramedReader<R>,
        headers: &Headers,
        dump_version: u32,
    ) -> Result<Vec<(String, String)>> {
        let mut props = Vec::new();
        let Some(len) = headers.get(PROP_CONTENT_LEN).and_then(HeaderValue::as_int) else {
            return Ok(props);
        };
        let raw = reader.read_exact(len as usize)?;
        let mut lines: Vec<&[u8]> = raw.split(|&b| b == b'\n').collect();
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        if let Some(pos) = lines.iter().position(|l| *l == PROPS_END) {
            lines.remove(pos);
        }

        let key_pattern = property_key_pattern(dump_version);
        let mut symbol: Option<String> = None;
        let mut content = String::new();
        for line in lines {
            let decoded = String::from_utf8_lossy(line).into_owned();
            match &symbol {
                None => symbol = Some(format!("{decoded}\n")),
                Some(sym) => {
                    if key_pattern.is_match(&decoded) {
                        props.push((sym.clone(), content.clone()));
                        content.clear();
                        symbol = Some(format!("{decoded}\n"));
                    } else {
                        content.push_str(&decoded);
                        content.push('\n');
                    }
                }
            }
        }
        if let Some(sym) = symbol {
            props.push((sym, content));
        }

        Ok(props)
    }

    fn parse_body<R: Read + Seek>(
        reader: &mut FramedReader<R>,
        headers: &Headers,
    ) -> Result<Option<Vec<u8>>> {
        if let Some(n) = headers.get(TEXT_CONTENT_LEN).and_then(HeaderValue::as_int) {
            if n > 10 {
                return Ok(Some(reader.read_exact(n as usize)?));
            }
        }
        Ok(None)
    }
}
