use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::dependents::build_dependents;
use crate::dump_header::DumpHeader;
use crate::error::{FilterError, Result};
use crate::headers::HeaderValue;
use crate::matcher::PathMatcher;
use crate::reader::FramedReader;
use crate::record::{
    Record, RecordCodec, RecordKind, NODE_COPYFROM_REV, NODE_KIND, REV_NUM, TEXT_CONTENT_LEN,
    TEXT_DELTA,
};
use crate::repo_query::RepoQuery;
use crate::untangle::Untangler;

/// Tunables for one filtering run (spec.md §4.5 / SPEC_FULL.md §4.9). Mirrors
/// the flags a caller threads through the whole pipeline in the original.
#[derive(Debug, Clone)]
pub struct Options {
    pub drop_empty: bool,
    pub renumber_revs: bool,
    pub strip_merge: bool,
    pub quiet: bool,
    pub debug: bool,
    pub start_revision: Option<i64>,
    pub scan: bool,
    pub repo: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            drop_empty: true,
            renumber_revs: true,
            strip_merge: false,
            quiet: false,
            debug: false,
            start_revision: None,
            scan: false,
            repo: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FilterOutcome {
    /// False when an included node had to be reconstructed from a dangling
    /// copy source — the scan-only report in SPEC_FULL.md §4.10.
    pub safe: bool,
}

struct Flags {
    can_write: bool,
    safe: bool,
    warning_given: bool,
    untangled: bool,
    orig_rev: i64,
    renum_rev: i64,
    next_rev: Option<Record>,
    did_increment: bool,
    to_write: Vec<Record>,
    included: bool,
}

fn write_segments<W: Write>(w: &mut W, segments: &[Record]) -> Result<()> {
    for s in segments {
        s.emit(w)?;
    }
    Ok(())
}

/// Streams `reader` through the filter and into `writer` under `matcher`,
/// synthesizing ancestor directories and untangling dangling copies as
/// needed (spec.md §4.5). Returns whether the run stayed untangle-free.
///
/// Writes happen unconditionally, scan mode included — pass `io::sink()`
/// as `writer` for a `--scan-only` run so the segments are produced and
/// discarded rather than special-cased out of the driver.
pub fn filter_dump<R, W>(
    reader: &mut FramedReader<R>,
    writer: &mut W,
    matcher: &PathMatcher,
    include: bool,
    opts: &Options,
    query: &dyn RepoQuery,
) -> Result<FilterOutcome>
where
    R: Read + Seek,
    W: Write,
{
    let header = DumpHeader::extract(reader)?;
    let dump_version = header.version as u32;
    header.emit(writer)?;

    let empty_repo = PathBuf::new();
    let repo = opts.repo.as_deref().unwrap_or(&empty_repo);

    let mut rev_map: HashMap<i64, i64> = HashMap::new();
    let mut empty_revs: HashSet<i64> = HashSet::new();

    let mut flags = Flags {
        can_write: opts.start_revision.is_none(),
        safe: true,
        warning_given: false,
        untangled: false,
        orig_rev: 0,
        renum_rev: 0,
        next_rev: None,
        did_increment: false,
        to_write: Vec::new(),
        included: false,
    };

    log::info!("starting to filter dump stream");

    loop {
        flags.to_write.clear();
        flags.included = false;

        if !opts.quiet {
            log::debug!(
                "working on input revision {} (renumbered {})",
                flags.orig_rev,
                flags.renum_rev
            );
        }

        let rev_seg = if flags.next_rev.is_none() {
            match RecordCodec::parse(reader, dump_version)? {
                Some(r) => {
                    flags.to_write.push(r.clone());
                    r
                }
                None => break,
            }
        } else {
            process_revision_record(&mut rev_map, matcher, include, &mut flags, opts)
        };

        let mut eof = false;
        loop {
            flags.did_increment = false;
            let node_seg = match RecordCodec::parse(reader, dump_version)? {
                Some(r) => r,
                None => {
                    eof = true;
                    break;
                }
            };
            if node_seg.kind == RecordKind::Revision {
                flags.next_rev = Some(node_seg);
                break;
            }
            if flags.can_write {
                let stop = handle_node(
                    node_seg,
                    writer,
                    &mut rev_map,
                    &empty_revs,
                    &mut flags,
                    matcher,
                    opts,
                    dump_version,
                    query,
                    repo,
                )?;
                if stop {
                    // Scan mode detected a tangle: stop immediately, the
                    // way the rest of this revision's bookkeeping never
                    // runs once untangling would otherwise be required.
                    eof = true;
                    break;
                }
            }
        }

        if eof {
            break;
        }

        if flags.can_write && !flags.included {
            if flags.untangled {
                flags.untangled = false;
            } else {
                log::debug!("adding revision {} to the skipped revisions list", flags.orig_rev);
                empty_revs.insert(flags.orig_rev);
            }
        }
        if !opts.drop_empty || flags.included {
            if flags.can_write {
                write_segments(writer, &flags.to_write)?;
            }
            if opts.renumber_revs && !flags.did_increment {
                flags.renum_rev += 1;
            }
        }
        if (opts.drop_empty || !flags.can_write) && rev_seg.revision_number() == Some(0) {
            write_segments(writer, &flags.to_write)?;
            flags.renum_rev += 1;
        }
        flags.orig_rev += 1;
    }

    write_segments(writer, &flags.to_write)?;

    Ok(FilterOutcome { safe: flags.safe })
}

fn process_revision_record(
    rev_map: &mut HashMap<i64, i64>,
    matcher: &PathMatcher,
    include: bool,
    flags: &mut Flags,
    opts: &Options,
) -> Record {
    let mut rev_seg = flags.next_rev.take().expect("next_rev populated by caller");
    if opts.renumber_revs {
        rev_seg.headers.update_head(REV_NUM, flags.renum_rev);
    }
    if let Some(start) = opts.start_revision {
        if start <= flags.orig_rev {
            flags.can_write = true;
        }
    }
    flags.to_write.push(rev_seg.clone());
    rev_map.insert(flags.orig_rev, flags.renum_rev);

    // Revision 0 never carries node records, so dependent ancestor
    // directories only need synthesizing once, at the first real revision.
    if include && rev_seg.revision_number() == Some(1) {
        let deps = build_dependents(matcher);
        if !deps.is_empty() {
            flags.to_write.extend(deps);
            flags.included = true;
        }
    }

    rev_seg
}

#[allow(clippy::too_many_arguments)]
fn handle_node<W: Write>(
    mut node_seg: Record,
    writer: &mut W,
    rev_map: &mut HashMap<i64, i64>,
    empty_revs: &HashSet<i64>,
    flags: &mut Flags,
    matcher: &PathMatcher,
    opts: &Options,
    dump_version: u32,
    query: &dyn RepoQuery,
    repo: &Path,
) -> Result<bool> {
    let path = node_seg.path().unwrap_or("").to_string();
    if !matcher.is_included(&path) {
        return Ok(false);
    }

    if opts.strip_merge && node_seg.strip_mergeinfo() {
        log::debug!("stripping svn:mergeinfo from {path}");
    }

    let Some(copyfrom_rev) = node_seg.copyfrom_rev() else {
        write_included(rev_map, node_seg, flags, opts, false)?;
        return Ok(false);
    };

    let copyfrom_path = node_seg.copyfrom_path().unwrap_or("").to_string();
    let dangling = empty_revs.contains(&copyfrom_rev)
        || opts.start_revision.is_some_and(|s| copyfrom_rev < s)
        || !matcher.is_included(&copyfrom_path);

    if !dangling {
        write_included(rev_map, node_seg, flags, opts, false)?;
        return Ok(false);
    }

    let self_contained = node_seg.headers.contains(TEXT_CONTENT_LEN)
        && !(dump_version == 3 && node_seg.headers.contains(TEXT_DELTA));

    if self_contained {
        log::debug!("{path} carries its own full text, no untangling necessary");
        node_seg.strip_copy_headers(dump_version);
        write_included(rev_map, node_seg, flags, opts, true)?;
        return Ok(false);
    }

    log::debug!("{copyfrom_rev}@{copyfrom_path} is excluded, untangling {path}");
    handle_exclude_to_include(
        node_seg,
        writer,
        flags,
        opts,
        query,
        repo,
        copyfrom_rev,
        &copyfrom_path,
    )
}

fn write_included(
    rev_map: &HashMap<i64, i64>,
    mut node_seg: Record,
    flags: &mut Flags,
    opts: &Options,
    untangled: bool,
) -> Result<()> {
    if opts.renumber_revs && !untangled {
        if let Some(orig_copy_rev) = node_seg.copyfrom_rev() {
            let new_copy_rev = *rev_map.get(&orig_copy_rev).ok_or_else(|| {
                FilterError::MalformedRecord(format!(
                    "copyfrom-rev {orig_copy_rev} was never renumbered"
                ))
            })?;
            let next = orig_copy_rev + 1;
            let collides = new_copy_rev == flags.renum_rev
                || rev_map.get(&next).is_some_and(|&n| new_copy_rev == n);
            let adjusted = if collides { new_copy_rev - 1 } else { new_copy_rev };
            node_seg.headers.update_head(NODE_COPYFROM_REV, adjusted);
        }
    }
    flags.to_write.push(node_seg);
    flags.included = true;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_exclude_to_include<W: Write>(
    node_seg: Record,
    writer: &mut W,
    flags: &mut Flags,
    opts: &Options,
    query: &dyn RepoQuery,
    repo: &Path,
    copyfrom_rev: i64,
    copyfrom_path: &str,
) -> Result<bool> {
    if opts.scan {
        flags.safe = false;
        return Ok(true);
    }
    if !flags.warning_given {
        log::warn!("svnlook is required to pull missing files");
        flags.warning_given = true;
    }
    write_segments(writer, &flags.to_write)?;
    if opts.renumber_revs && !flags.did_increment {
        flags.renum_rev += 1;
        flags.did_increment = true;
    }
    flags.to_write.clear();
    flags.untangled = true;
    flags.included = false;

    let dest_path = node_seg.path().unwrap_or("").to_string();
    let is_file = node_seg
        .headers
        .get(NODE_KIND)
        .and_then(HeaderValue::as_str)
        == Some("file");

    let untangler = Untangler::new(query, repo);
    let synthesized = if is_file {
        vec![untangler.untangle_file(&dest_path, flags.orig_rev, &dest_path)?]
    } else {
        untangler.untangle_dir(&dest_path, copyfrom_rev, copyfrom_path)?
    };
    write_segments(writer, &synthesized)?;
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Polarity;
    use crate::repo_query::FakeRepoQuery;
    use std::io::Cursor;

    fn make_dump(body: &str) -> Vec<u8> {
        format!("SVN-fs-dump-format-version: 2\n\nUUID: test-uuid\n\n{body}").into_bytes()
    }

    fn rev_record(n: i64) -> String {
        let props = "K 7\nsvn:log\nV 0\n\nPROPS-END\n";
        format!(
            "Revision-number: {n}\nProp-content-length: {}\nContent-length: {}\n\n{props}\n",
            props.len(),
            props.len(),
        )
    }

    fn add_dir(path: &str) -> String {
        format!("Node-path: {path}\nNode-kind: dir\nNode-action: add\n\n\n")
    }

    #[test]
    fn drops_empty_revisions_and_renumbers() {
        let body = format!(
            "{}{}{}{}",
            rev_record(0),
            rev_record(1),
            add_dir("excluded"),
            rev_record(2)
        ) + &add_dir("included");
        let raw = make_dump(&body);

        let mut reader = FramedReader::new(Cursor::new(raw));
        let mut matcher = PathMatcher::new(Polarity::Include);
        matcher.add_to_matches("included");
        let opts = Options::default();
        let fake = FakeRepoQuery::default();

        let mut out = Vec::new();
        let outcome = filter_dump(&mut reader, &mut out, &matcher, true, &opts, &fake).unwrap();
        assert!(outcome.safe);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Revision-number: 0"));
        assert!(text.contains("Revision-number: 1"));
        assert!(!text.contains("Revision-number: 2"));
        assert!(text.contains("Node-path: included"));
        assert!(!text.contains("Node-path: excluded"));
    }

    #[test]
    fn scan_mode_detects_tangling() {
        let body = format!(
            "{}{}{}",
            rev_record(0),
            rev_record(1),
            "Node-path: dest\nNode-kind: file\nNode-action: add\nNode-copyfrom-rev: 0\nNode-copyfrom-path: src\n\n\n"
        );
        let raw = make_dump(&body);
        let mut reader = FramedReader::new(Cursor::new(raw));
        let mut matcher = PathMatcher::new(Polarity::Exclude);
        matcher.add_to_matches("src");
        let mut opts = Options::default();
        opts.scan = true;
        let fake = FakeRepoQuery::default();

        let outcome = filter_dump(&mut reader, &mut std::io::sink(), &matcher, true, &opts, &fake).unwrap();
        assert!(!outcome.safe);
    }

    #[test]
    fn strips_mergeinfo_without_renumbering() {
        let props = "K 13\nsvn:mergeinfo\nV 8\n/trunk:1\nK 10\nsvn:author\nV 5\nalice\nPROPS-END\n";
        let body = b"hello world";
        let node = format!(
            "Node-path: trunk/f\nNode-kind: file\nNode-action: change\nProp-content-length: {}\nText-content-length: {}\nContent-length: {}\n\n{props}hello world\n\n",
            props.len(),
            body.len(),
            props.len() + body.len(),
        );
        let raw = make_dump(&(rev_record(0) + &rev_record(1) + &node));
        let mut reader = FramedReader::new(Cursor::new(raw));
        let mut matcher = PathMatcher::new(Polarity::Include);
        matcher.add_to_matches("trunk");
        let mut opts = Options::default();
        opts.strip_merge = true;
        opts.renumber_revs = false;
        let fake = FakeRepoQuery::default();

        let mut out = Vec::new();
        filter_dump(&mut reader, &mut out, &matcher, true, &opts, &fake).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Revision-number: 1"));
        assert!(!text.contains("svn:mergeinfo"));
        assert!(text.contains("svn:author"));
    }

    #[test]
    fn large_body_spans_read_buffer() {
        let body = vec![b'x'; 5000];
        let node = format!(
            "Node-path: trunk/big.bin\nNode-kind: file\nNode-action: add\nProp-content-length: 10\nText-content-length: {}\nContent-length: {}\n\nPROPS-END\n",
            body.len(),
            10 + body.len(),
        );
        let mut raw = make_dump(&(rev_record(0) + &rev_record(1) + &node)).to_vec();
        raw.extend_from_slice(&body);
        raw.extend_from_slice(b"\n\n");

        let mut reader = FramedReader::with_chunk_size(Cursor::new(raw), 37);
        let mut matcher = PathMatcher::new(Polarity::Include);
        matcher.add_to_matches("trunk");
        let opts = Options::default();
        let fake = FakeRepoQuery::default();

        let mut out = Vec::new();
        filter_dump(&mut reader, &mut out, &matcher, true, &opts, &fake).unwrap();
        assert_eq!(out.windows(5000).filter(|w| w.iter().all(|&b| b == b'x')).count() >= 1, true);
    }

    #[test]
    fn preserves_empty_revisions_unrenumbered() {
        let body = format!(
            "{}{}{}{}",
            rev_record(0),
            rev_record(1),
            rev_record(2),
            add_dir("included")
        );
        let raw = make_dump(&body);
        let mut reader = FramedReader::new(Cursor::new(raw));
        let mut matcher = PathMatcher::new(Polarity::Include);
        matcher.add_to_matches("included");
        let mut opts = Options::default();
        opts.drop_empty = false;
        opts.renumber_revs = false;
        let fake = FakeRepoQuery::default();

        let mut out = Vec::new();
        filter_dump(&mut reader, &mut out, &matcher, true, &opts, &fake).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Revision-number: 0"));
        assert!(text.contains("Revision-number: 1"));
        assert!(text.contains("Revision-number: 2"));
        assert!(text.contains("Node-path: included"));
    }

    #[test]
    fn synthesizes_multi_level_ancestor_directories() {
        let body = format!("{}{}{}", rev_record(0), rev_record(1), add_dir("trunk/sub/deep"));
        let raw = make_dump(&body);
        let mut reader = FramedReader::new(Cursor::new(raw));
        let mut matcher = PathMatcher::new(Polarity::Include);
        matcher.add_to_matches("trunk/sub/deep");
        let opts = Options::default();
        let fake = FakeRepoQuery::default();

        let mut out = Vec::new();
        filter_dump(&mut reader, &mut out, &matcher, true, &opts, &fake).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Node-path: trunk\n"));
        assert!(text.contains("Node-path: trunk/sub\n"));
        assert!(text.contains("Node-path: trunk/sub/deep"));
    }

    #[test]
    fn untangles_dangling_copy_into_synthesized_add() {
        let node = "Node-path: dst\nNode-kind: file\nNode-action: add\nNode-copyfrom-rev: 0\nNode-copyfrom-path: src\n\n\n";
        let body = format!("{}{}{}", rev_record(0), rev_record(1), node);
        let raw = make_dump(&body);
        let mut reader = FramedReader::new(Cursor::new(raw));
        let mut matcher = PathMatcher::new(Polarity::Exclude);
        matcher.add_to_matches("src");
        let opts = Options::default();
        let mut fake = FakeRepoQuery::default();
        fake.files.insert((1, "dst".to_string()), b"payload".to_vec());

        let mut out = Vec::new();
        let outcome = filter_dump(&mut reader, &mut out, &matcher, true, &opts, &fake).unwrap();
        // `safe` only turns false under `--scan-only`; a real run that
        // completes untangling successfully still counts as a clean result.
        assert!(outcome.safe);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Node-path: dst"));
        assert!(text.contains("payload"));
        assert!(!text.contains("Node-copyfrom-path: src"));
    }

    #[test]
    fn copyfrom_rev_decrements_on_renumbering_collision() {
        let mut rev_map = HashMap::new();
        rev_map.insert(0i64, 0i64);
        rev_map.insert(1i64, 1i64);
        // Revision 2 collapsed onto the same renumbered value as revision 1
        // (it carried no included content of its own).
        rev_map.insert(2i64, 1i64);

        let mut node_seg = Record {
            kind: RecordKind::Node,
            headers: crate::headers::Headers::new(),
            properties: Vec::new(),
            body: None,
        };
        node_seg.headers.push(crate::record::NODE_PATH, "dst");
        node_seg.headers.push(NODE_COPYFROM_REV, 1i64);

        let mut flags = Flags {
            can_write: true,
            safe: true,
            warning_given: false,
            untangled: false,
            orig_rev: 3,
            renum_rev: 3,
            next_rev: None,
            did_increment: false,
            to_write: Vec::new(),
            included: false,
        };
        let opts = Options::default();

        write_included(&rev_map, node_seg, &mut flags, &opts, false).unwrap();
        let written = flags.to_write.last().unwrap();
        assert_eq!(written.copyfrom_rev(), Some(0));
    }
}
