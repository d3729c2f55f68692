use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::logging::{LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink};

pub const OUTPUT_DIR_NAME: &str = "output";
pub const DESCRIPTION_FILE_NAME: &str = "description.txt";
pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const PARTIAL_SUFFIX: &str = ".partial";

static CHAPTER_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(chapter|chapteroutline|chapterfull)_(\d+)\.txt$")
        .unwrap_or_else(|err| panic!("invalid chapter file pattern: {err}"))
});

static TITLE_NUMBERING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\d+\s*[.)]\s*")
        .unwrap_or_else(|err| panic!("invalid title numbering pattern: {err}"))
});

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("book directory `{0}` does not exist")]
    MissingBookDir(PathBuf),
    #[error("book description `{0}` does not exist")]
    MissingDescription(PathBuf),
    #[error("failed to prepare output directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to write `{path}`: {source}")]
    Write {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to list `{path}`: {source}")]
    List {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to parse manifest `{path}`: {source}")]
    ParseManifest {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize manifest `{path}`: {source}")]
    SerializeManifest {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("`{0}` contains no book title")]
    EmptyTitle(PathBuf),
}

impl ArtifactError {
    /// True when the error is a read of a file that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Read { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// The per-chapter artifact families.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChapterKind {
    Summary,
    Outline,
    Full,
}

impl ChapterKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Summary => "chapter",
            Self::Outline => "chapteroutline",
            Self::Full => "chapterfull",
        }
    }

    pub fn artifact(self, number: u32) -> Artifact {
        match self {
            Self::Summary => Artifact::ChapterSummary(number),
            Self::Outline => Artifact::ChapterOutline(number),
            Self::Full => Artifact::ChapterFull(number),
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "chapter" => Some(Self::Summary),
            "chapteroutline" => Some(Self::Outline),
            "chapterfull" => Some(Self::Full),
            _ => None,
        }
    }
}

/// A generated file under `output/`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Artifact {
    BookTitles,
    TableOfContents,
    Plot,
    ChapterSummary(u32),
    ChapterOutline(u32),
    ChapterFull(u32),
    FullBook,
    RunSummary,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        match self {
            Self::BookTitles => "book_titles.txt".to_string(),
            Self::TableOfContents => "toc.txt".to_string(),
            Self::Plot => "plot.txt".to_string(),
            Self::ChapterSummary(n) | Self::ChapterOutline(n) | Self::ChapterFull(n) => {
                let kind = self.chapter_kind().unwrap_or(ChapterKind::Summary);
                format!("{}_{n}.txt", kind.prefix())
            }
            Self::FullBook => "fullbook.md".to_string(),
            Self::RunSummary => "summary.txt".to_string(),
        }
    }

    pub fn chapter_kind(&self) -> Option<ChapterKind> {
        match self {
            Self::ChapterSummary(_) => Some(ChapterKind::Summary),
            Self::ChapterOutline(_) => Some(ChapterKind::Outline),
            Self::ChapterFull(_) => Some(ChapterKind::Full),
            _ => None,
        }
    }

    pub fn chapter_number(&self) -> Option<u32> {
        match self {
            Self::ChapterSummary(n) | Self::ChapterOutline(n) | Self::ChapterFull(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub bytes: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    artifacts: BTreeMap<String, ManifestEntry>,
}

/// The book's working directory: `description.txt` plus everything under `output/`.
pub struct ArtifactStore {
    book_dir: PathBuf,
    output_dir: PathBuf,
    manifest_path: PathBuf,
    manifest: Mutex<Manifest>,
    sink: SharedLogSink,
}

impl fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("book_dir", &self.book_dir)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl ArtifactStore {
    pub fn open(book_dir: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        Self::open_with_sink(book_dir, Arc::new(NullLogSink))
    }

    pub fn open_with_sink(
        book_dir: impl AsRef<Path>,
        sink: SharedLogSink,
    ) -> Result<Self, ArtifactError> {
        let book_dir = book_dir.as_ref().to_path_buf();
        if !book_dir.is_dir() {
            return Err(ArtifactError::MissingBookDir(book_dir));
        }
        let description = book_dir.join(DESCRIPTION_FILE_NAME);
        if !description.is_file() {
            return Err(ArtifactError::MissingDescription(description));
        }

        let output_dir = book_dir.join(OUTPUT_DIR_NAME);
        fs::create_dir_all(&output_dir).map_err(|source| ArtifactError::CreateDir {
            path: output_dir.clone(),
            source,
        })?;

        let manifest_path = output_dir.join(MANIFEST_FILE_NAME);
        let manifest = load_manifest(&manifest_path)?;

        Ok(Self {
            book_dir,
            output_dir,
            manifest_path,
            manifest: Mutex::new(manifest),
            sink,
        })
    }

    pub fn book_dir(&self) -> &Path {
        &self.book_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.output_dir.join(artifact.file_name())
    }

    pub fn read_description(&self) -> Result<String, ArtifactError> {
        read_file(&self.book_dir.join(DESCRIPTION_FILE_NAME))
    }

    pub fn read(&self, artifact: Artifact) -> Result<String, ArtifactError> {
        read_file(&self.path(artifact))
    }

    /// Writes the artifact in one go through a temporary file in `output/`.
    pub fn write(&self, artifact: Artifact, text: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.path(artifact);
        let write_err = |source| ArtifactError::Write {
            path: path.clone(),
            source,
        };

        let mut temp = NamedTempFile::new_in(&self.output_dir).map_err(write_err)?;
        temp.write_all(text.as_bytes()).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(&path).map_err(|err| write_err(err.error))?;

        self.record(artifact, text.len() as u64)?;
        Ok(path)
    }

    /// Starts an incremental write. Nothing appears under the final name until
    /// [`ArtifactWriter::commit`].
    pub fn begin(&self, artifact: Artifact) -> Result<ArtifactWriter<'_>, ArtifactError> {
        let final_path = self.path(artifact);
        let partial_path = partial_path_for(&final_path);
        let file = File::create(&partial_path).map_err(|source| ArtifactError::Write {
            path: partial_path.clone(),
            source,
        })?;

        Ok(ArtifactWriter {
            store: self,
            artifact,
            final_path,
            partial_path,
            file,
            bytes: 0,
        })
    }

    pub fn is_produced(&self, artifact: Artifact) -> Result<bool, ArtifactError> {
        let path = self.path(artifact);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(ArtifactError::Read { path, source }),
        };
        let size = metadata.len();
        let name = artifact.file_name();

        let recorded = self.lock_manifest().artifacts.get(&name).cloned();
        match recorded {
            Some(entry) if entry.bytes == size => Ok(true),
            Some(entry) if size > 0 => {
                self.sink.log(LogRecord::new(
                    LogLevel::Warn,
                    format!(
                        "{} changed from {} to {} bytes since it was written; keeping the edited file",
                        path.display(),
                        entry.bytes,
                        size
                    ),
                ));
                self.record(artifact, size)?;
                Ok(true)
            }
            Some(_) => {
                self.sink.log(LogRecord::new(
                    LogLevel::Warn,
                    format!("{} is empty; it will be regenerated", path.display()),
                ));
                Ok(false)
            }
            None if size > 0 => {
                self.sink.log(LogRecord::new(
                    LogLevel::Info,
                    format!("adopting existing {}", path.display()),
                ));
                self.record(artifact, size)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn manifest_entry(&self, artifact: Artifact) -> Option<ManifestEntry> {
        self.lock_manifest()
            .artifacts
            .get(&artifact.file_name())
            .cloned()
    }

    /// Manifest entries keyed by file name.
    pub fn manifest_entries(&self) -> Vec<(String, ManifestEntry)> {
        self.lock_manifest()
            .artifacts
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect()
    }

    /// Chapter numbers present on disk for `kind`, in ascending numeric order.
    pub fn chapter_numbers(&self, kind: ChapterKind) -> Result<Vec<u32>, ArtifactError> {
        let read_dir = fs::read_dir(&self.output_dir).map_err(|source| ArtifactError::List {
            path: self.output_dir.clone(),
            source,
        })?;

        let mut numbers = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| ArtifactError::List {
                path: self.output_dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some((found, number)) = parse_chapter_file_name(name) {
                if found == kind {
                    numbers.push(number);
                }
            }
        }

        numbers.sort_unstable();
        numbers.dedup();
        Ok(numbers)
    }

    /// First non-empty line of `book_titles.txt`, without list numbering or quotes.
    pub fn book_title(&self) -> Result<String, ArtifactError> {
        let titles = self.read(Artifact::BookTitles)?;
        parse_book_title(&titles)
            .ok_or_else(|| ArtifactError::EmptyTitle(self.path(Artifact::BookTitles)))
    }

    fn record(&self, artifact: Artifact, bytes: u64) -> Result<(), ArtifactError> {
        let mut manifest = self.lock_manifest();
        manifest.artifacts.insert(
            artifact.file_name(),
            ManifestEntry {
                bytes,
                completed_at: Utc::now(),
            },
        );
        save_manifest(&self.manifest_path, &self.output_dir, &manifest)
    }

    fn lock_manifest(&self) -> MutexGuard<'_, Manifest> {
        self.manifest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Incremental writer for one artifact. Each append is flushed to the
/// `.partial` file so progress survives a crash.
pub struct ArtifactWriter<'a> {
    store: &'a ArtifactStore,
    artifact: Artifact,
    final_path: PathBuf,
    partial_path: PathBuf,
    file: File,
    bytes: u64,
}

impl fmt::Debug for ArtifactWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactWriter")
            .field("artifact", &self.artifact)
            .field("partial_path", &self.partial_path)
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl ArtifactWriter<'_> {
    pub fn artifact(&self) -> Artifact {
        self.artifact
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    pub fn append(&mut self, text: &str) -> Result<(), ArtifactError> {
        let write_err = |source| ArtifactError::Write {
            path: self.partial_path.clone(),
            source,
        };
        self.file.write_all(text.as_bytes()).map_err(write_err)?;
        self.file.flush().map_err(write_err)?;
        self.bytes += text.len() as u64;
        Ok(())
    }

    /// Moves the partial file to its final name and records it in the manifest.
    pub fn commit(self) -> Result<PathBuf, ArtifactError> {
        self.file
            .sync_all()
            .map_err(|source| ArtifactError::Write {
                path: self.partial_path.clone(),
                source,
            })?;
        fs::rename(&self.partial_path, &self.final_path).map_err(|source| {
            ArtifactError::Write {
                path: self.final_path.clone(),
                source,
            }
        })?;
        self.store.record(self.artifact, self.bytes)?;
        Ok(self.final_path)
    }
}

pub fn parse_chapter_file_name(name: &str) -> Option<(ChapterKind, u32)> {
    let captures = CHAPTER_FILE.captures(name)?;
    let kind = ChapterKind::from_prefix(captures.get(1)?.as_str())?;
    let number = captures.get(2)?.as_str().parse().ok()?;
    Some((kind, number))
}

pub fn parse_book_title(titles: &str) -> Option<String> {
    let line = titles.lines().map(str::trim).find(|line| !line.is_empty())?;
    let stripped = TITLE_NUMBERING.replace(line, "");
    let title = stripped
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '*'))
        .trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

fn partial_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn read_file(path: &Path) -> Result<String, ArtifactError> {
    fs::read_to_string(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn load_manifest(path: &Path) -> Result<Manifest, ArtifactError> {
    match fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(Manifest::default()),
        Ok(contents) => {
            serde_json::from_str(&contents).map_err(|source| ArtifactError::ParseManifest {
                path: path.to_path_buf(),
                source,
            })
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Manifest::default()),
        Err(source) => Err(ArtifactError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn save_manifest(path: &Path, dir: &Path, manifest: &Manifest) -> Result<(), ArtifactError> {
    let serialized =
        serde_json::to_vec_pretty(manifest).map_err(|source| ArtifactError::SerializeManifest {
            path: path.to_path_buf(),
            source,
        })?;
    let write_err = |source| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
    temp.write_all(&serialized).map_err(write_err)?;
    temp.persist(path).map_err(|err| write_err(err.error))?;
    Ok(())
}
