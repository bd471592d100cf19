pub mod dependents;
pub mod driver;
pub mod dump_header;
pub mod error;
pub mod headers;
pub mod matcher;
pub mod reader;
pub mod record;
pub mod repo_query;
pub mod untangle;

pub use driver::{filter_dump, FilterOutcome, Options};
pub use error::{FilterError, Result};
pub use matcher::{PathMatcher, Polarity};
pub use reader::FramedReader;
pub use repo_query::{RepoQuery, SvnlookQuery};
