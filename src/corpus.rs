//! Session corpus discovery and streaming.
//!
//! Files are resolved up front, so a missing directory or a pattern that
//! matches nothing fails before any record is produced. Records are then read
//! lazily, in pattern order, sorted file order and line order. A record that
//! cannot be parsed or shaped into a turn is reported and skipped; the stream
//! carries on.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use crate::error::{LabError, Result};
use crate::session::SessionTurn;
use crate::transform::{TrainingExample, TransformOptions, TurnTransformer};

/// Resolve `pattern` against `data_dir`, sorted lexicographically.
///
/// # Errors
///
/// Returns [`LabError::DataDirectoryMissing`] if `data_dir` does not exist,
/// [`LabError::NoFilesMatched`] if no file matches, and
/// [`LabError::Pattern`] if the pattern is not a valid glob.
pub fn discover_session_files(data_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !data_dir.is_dir() {
        return Err(LabError::DataDirectoryMissing {
            path: data_dir.to_path_buf(),
        });
    }

    let full_pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&data_dir.to_string_lossy()),
        pattern
    );
    let mut files: Vec<PathBuf> = glob::glob(&full_pattern)?
        .filter_map(std::result::Result::ok)
        .filter(|path| path.is_file())
        .collect();

    if files.is_empty() {
        return Err(LabError::NoFilesMatched {
            pattern: pattern.to_string(),
            dir: data_dir.to_path_buf(),
        });
    }

    files.sort();
    Ok(files)
}

/// Resolve every pattern, keeping pattern order.
///
/// A file matched by several patterns appears once per pattern.
///
/// # Errors
///
/// See [`discover_session_files`].
pub fn discover_corpus_files<S: AsRef<str>>(data_dir: &Path, patterns: &[S]) -> Result<Vec<PathBuf>> {
    if !data_dir.is_dir() {
        return Err(LabError::DataDirectoryMissing {
            path: data_dir.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    for pattern in patterns {
        files.extend(discover_session_files(data_dir, pattern.as_ref())?);
    }
    Ok(files)
}

/// A record the loader could not use.
#[derive(Debug)]
pub struct SkippedRecord {
    /// File the record came from.
    pub path: PathBuf,
    /// 1-based line number.
    pub line: usize,
    /// Why it was skipped.
    pub error: LabError,
}

impl SkippedRecord {
    fn log(&self) {
        tracing::warn!("Skipping record at {}", self);
    }
}

impl fmt::Display for SkippedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.path.display(), self.line, self.error)
    }
}

/// Result of reading one non-blank line.
#[derive(Debug)]
pub enum RecordOutcome {
    /// The line became a training example.
    Example(TrainingExample),
    /// The line was skipped.
    Skipped(SkippedRecord),
}

/// Session files bound to the transformer that turns them into examples.
#[derive(Debug, Clone)]
pub struct SessionCorpus {
    files: Vec<PathBuf>,
    transformer: TurnTransformer,
}

impl SessionCorpus {
    /// Corpus over already-resolved files.
    #[must_use]
    pub fn new(files: Vec<PathBuf>, transformer: TurnTransformer) -> Self {
        Self { files, transformer }
    }

    /// Resolve `patterns` under `data_dir` and bind them to `transformer`.
    ///
    /// # Errors
    ///
    /// See [`discover_session_files`].
    pub fn open<S: AsRef<str>>(
        data_dir: impl AsRef<Path>,
        patterns: &[S],
        transformer: TurnTransformer,
    ) -> Result<Self> {
        let files = discover_corpus_files(data_dir.as_ref(), patterns)?;
        Ok(Self::new(files, transformer))
    }

    /// Files in read order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Every record outcome, skipped ones included.
    ///
    /// Yields `Err` only for I/O failures that stop a file from being read.
    #[must_use]
    pub fn records(&self) -> Records<'_> {
        Records {
            files: self.files.iter(),
            current: None,
            transformer: &self.transformer,
        }
    }

    /// Training examples, logging a warning for each skipped record.
    pub fn examples(&self) -> impl Iterator<Item = Result<TrainingExample>> + '_ {
        self.records().filter_map(|outcome| match outcome {
            Ok(RecordOutcome::Example(example)) => Some(Ok(example)),
            Ok(RecordOutcome::Skipped(skipped)) => {
                skipped.log();
                None
            }
            Err(e) => Some(Err(e)),
        })
    }

    /// Read the whole corpus into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read.
    pub fn load(&self) -> Result<Vec<TrainingExample>> {
        let mut examples = Vec::new();
        let mut skipped = 0usize;

        for outcome in self.records() {
            match outcome? {
                RecordOutcome::Example(example) => examples.push(example),
                RecordOutcome::Skipped(record) => {
                    record.log();
                    skipped += 1;
                }
            }
        }

        tracing::info!(
            "Loaded {} examples from {} files ({} skipped)",
            examples.len(),
            self.files.len(),
            skipped
        );
        Ok(examples)
    }
}

/// Lazy stream of [`RecordOutcome`]s over a corpus.
pub struct Records<'a> {
    files: std::slice::Iter<'a, PathBuf>,
    current: Option<FileCursor<'a>>,
    transformer: &'a TurnTransformer,
}

struct FileCursor<'a> {
    path: &'a Path,
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl Iterator for Records<'_> {
    type Item = Result<RecordOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(cursor) = self.current.as_mut() else {
                let path = self.files.next()?;
                match File::open(path) {
                    Ok(file) => {
                        tracing::debug!("Reading session file {}", path.display());
                        self.current = Some(FileCursor {
                            path,
                            lines: BufReader::new(file).lines(),
                            line: 0,
                        });
                        continue;
                    }
                    Err(e) => return Some(Err(e.into())),
                }
            };

            match cursor.lines.next() {
                None => self.current = None,
                Some(Ok(line)) => {
                    cursor.line += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(process_line(self.transformer, cursor.path, cursor.line, &line));
                }
                Some(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    cursor.line += 1;
                    return Some(Ok(RecordOutcome::Skipped(SkippedRecord {
                        path: cursor.path.to_path_buf(),
                        line: cursor.line,
                        error: LabError::MalformedRecord(e.to_string()),
                    })));
                }
                Some(Err(e)) => {
                    self.current = None;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

fn process_line(
    transformer: &TurnTransformer,
    path: &Path,
    line: usize,
    text: &str,
) -> Result<RecordOutcome> {
    match SessionTurn::parse_line(text).and_then(|turn| transformer.transform(&turn)) {
        Ok(example) => Ok(RecordOutcome::Example(example)),
        Err(error) if error.is_record_level() => Ok(RecordOutcome::Skipped(SkippedRecord {
            path: path.to_path_buf(),
            line,
            error,
        })),
        Err(error) => Err(error),
    }
}

/// Load every example matched by `patterns` under `data_dir`.
///
/// The data directory and patterns are checked before the catalog is loaded.
///
/// # Errors
///
/// Returns [`LabError::DataDirectoryMissing`], [`LabError::NoFilesMatched`]
/// or [`LabError::CatalogUnavailable`] for configuration problems, or an I/O
/// error if a file cannot be read. Malformed records are skipped.
pub fn load_training_data<S: AsRef<str>>(
    data_dir: impl AsRef<Path>,
    patterns: &[S],
    options: TransformOptions,
    catalog_path: impl AsRef<Path>,
) -> Result<Vec<TrainingExample>> {
    let files = discover_corpus_files(data_dir.as_ref(), patterns)?;
    let transformer = TurnTransformer::from_options(options, catalog_path)?;
    SessionCorpus::new(files, transformer).load()
}
