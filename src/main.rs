use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use svndumpfilter_rs::driver::{filter_dump, Options};
use svndumpfilter_rs::matcher::{PathMatcher, Polarity};
use svndumpfilter_rs::reader::FramedReader;
use svndumpfilter_rs::repo_query::SvnlookQuery;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Subcommand {
    Include,
    Exclude,
}

/// Carves a subset of paths out of an svn dump stream, renumbering and
/// untangling as needed to keep the result loadable.
#[derive(Debug, Parser)]
#[command(name = "svndumpfilter-rs", version)]
struct Cli {
    /// Keep revisions that filtering leaves empty, instead of dropping them.
    #[arg(short = 'k', long = "keep-empty-revs")]
    keep_empty_revs: bool,

    /// Don't renumber revisions that remain after filtering.
    #[arg(short = 's', long = "stop-renumber-revs")]
    stop_renumber_revs: bool,

    /// Remove svn:mergeinfo properties from the output.
    #[arg(short = 'x', long = "strip-mergeinfo")]
    strip_mergeinfo: bool,

    /// Suppress per-revision progress output.
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Start filtering at this revision; earlier revisions pass through headers only.
    #[arg(short = 'n', long = "revisions")]
    start_revision: Option<i64>,

    /// Only report whether untangling would be necessary; writes nothing.
    #[arg(short = 'c', long = "scan-only")]
    scan: bool,

    /// Read additional paths to match, one per line, from this file.
    #[arg(short = 'f', long = "paths-file")]
    paths_file: Option<PathBuf>,

    /// Repository to consult via svnlook when untangling dangling copies.
    #[arg(short = 'r', long = "repo")]
    repo: Option<PathBuf>,

    /// Turn on verbose (debug-level) logging.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Destination for the filtered dump. Required unless --scan-only.
    #[arg(short = 'o', long = "output-dump")]
    output_dump: Option<PathBuf>,

    /// Input dump file to filter.
    input_dump: PathBuf,

    /// Whether the listed paths should be kept or dropped.
    subcommand: Subcommand,

    /// Paths to match, in addition to any supplied via --paths-file.
    matches: Vec<String>,
}

fn run(cli: Cli) -> svndumpfilter_rs::Result<bool> {
    if !cli.scan {
        if cli.repo.is_none() {
            eprintln!("when not scanning, you must specify a path to the dump file's repository");
            std::process::exit(2);
        }
        if cli.output_dump.is_none() {
            eprintln!("when not scanning, you must specify a path to the output dump file");
            std::process::exit(2);
        }
    }

    let include = matches!(cli.subcommand, Subcommand::Include);
    let mut matcher = PathMatcher::new(if include { Polarity::Include } else { Polarity::Exclude });
    for m in &cli.matches {
        matcher.add_to_matches(m);
    }
    if let Some(file) = &cli.paths_file {
        matcher.read_matches_from_file(file)?;
    }

    let input = File::open(&cli.input_dump)?;
    let mut reader = FramedReader::new(input);

    let mut writer: Box<dyn Write> = if cli.scan {
        Box::new(io::sink())
    } else {
        Box::new(File::create(cli.output_dump.as_ref().unwrap())?)
    };

    let opts = Options {
        drop_empty: !cli.keep_empty_revs,
        renumber_revs: !cli.stop_renumber_revs,
        strip_merge: cli.strip_mergeinfo,
        quiet: cli.quiet,
        debug: cli.debug,
        start_revision: cli.start_revision,
        scan: cli.scan,
        repo: cli.repo.clone(),
    };

    let query = SvnlookQuery::new();
    let outcome = filter_dump(&mut reader, &mut writer, &matcher, include, &opts, &query)?;
    writer.flush()?;
    Ok(outcome.safe)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let debug = cli.debug;
    env_logger::Builder::from_default_env()
        .filter_level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let scan = cli.scan;
    match run(cli) {
        Ok(safe) => {
            if scan {
                if safe {
                    println!("Safe: no untangling is necessary to carve these paths.");
                } else {
                    println!("Unsafe: untangling is necessary to carve these paths.");
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("svndumpfilter-rs: {err}");
            ExitCode::FAILURE
        }
    }
}
