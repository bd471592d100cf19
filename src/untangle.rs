use std::path::Path;

use crate::error::Result;
use crate::record::Record;
use crate::repo_query::RepoQuery;

/// Rebuilds referential integrity when an included node copies from a
/// path the matcher would otherwise have dropped (spec.md §4.6): the copy
/// is replaced by a synthetic `add` carrying the source's actual content,
/// fetched straight from the repository rather than from the dump stream.
///
/// Once a node is judged dangling, the whole source subtree is pulled in
/// unconditionally — untangling does not re-run the matcher over what it
/// fetches, since the point is to restore exactly what the copy referenced.
pub struct Untangler<'a> {
    query: &'a dyn RepoQuery,
    repo: &'a Path,
}

impl<'a> Untangler<'a> {
    pub fn new(query: &'a dyn RepoQuery, repo: &'a Path) -> Self {
        Self { query, repo }
    }

    /// Synthesizes a single `add file` record carrying the full contents
    /// of `source_path` at `source_rev`.
    pub fn untangle_file(&self, dest_path: &str, source_rev: i64, source_path: &str) -> Result<Record> {
        let content = self.query.cat(self.repo, source_rev, source_path)?;
        Ok(Record::synthetic_add(dest_path, "file", Some(content)))
    }

    /// Walks `source_path` at `source_rev` via `tree` and re-creates it
    /// rooted at `dest_path`: one `add dir` per directory entry, one
    /// `add file` (content fetched via `cat`) per file entry.
    pub fn untangle_dir(&self, dest_path: &str, source_rev: i64, source_path: &str) -> Result<Vec<Record>> {
        let entries = self.query.tree(self.repo, source_rev, source_path)?;
        let source_prefix = source_path.trim_end_matches('/');
        let mut out = Vec::new();
        for entry in entries {
            let is_dir = entry.ends_with('/');
            let trimmed = entry.trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == source_prefix {
                out.push(Record::synthetic_add(dest_path, "dir", None));
                continue;
            }
            let relative = trimmed
                .strip_prefix(source_prefix)
                .unwrap_or(trimmed)
                .trim_start_matches('/');
            let dest_entry = format!("{dest_path}/{relative}");
            if is_dir {
                out.push(Record::synthetic_add(&dest_entry, "dir", None));
            } else {
                out.push(self.untangle_file(&dest_entry, source_rev, trimmed)?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_query::FakeRepoQuery;

    #[test]
    fn untangle_file_fetches_content() {
        let mut fake = FakeRepoQuery::default();
        fake.files.insert((3, "trunk/a.txt".to_string()), b"data".to_vec());
        let repo = Path::new("/repo");
        let untangler = Untangler::new(&fake, repo);
        let record = untangler.untangle_file("trunk/a.txt", 3, "trunk/a.txt").unwrap();
        assert_eq!(record.path(), Some("trunk/a.txt"));
        assert_eq!(record.body.as_deref(), Some(&b"data"[..]));
    }

    #[test]
    fn untangle_dir_walks_full_tree() {
        let mut fake = FakeRepoQuery::default();
        fake.trees.insert(
            (4, "src".to_string()),
            vec![
                "src/".to_string(),
                "src/sub/".to_string(),
                "src/sub/file.txt".to_string(),
            ],
        );
        fake.files
            .insert((4, "src/sub/file.txt".to_string()), b"contents".to_vec());

        let repo = Path::new("/repo");
        let untangler = Untangler::new(&fake, repo);
        let records = untangler.untangle_dir("dst", 4, "src").unwrap();
        let paths: Vec<&str> = records.iter().filter_map(|r| r.path()).collect();
        assert_eq!(paths, vec!["dst", "dst/sub", "dst/sub/file.txt"]);
        assert_eq!(
            records.last().unwrap().body.as_deref(),
            Some(&b"contents"[..])
        );
    }
}
