//! File events from directory watching.

use std::path::{Path, PathBuf};

/// A file system event.
#[derive(Debug, Clone)]
pub struct FileEvent {
    /// The kind of event.
    pub kind: FileEventKind,

    /// Path to the affected file or directory.
    pub path: PathBuf,

    /// Attributes sampled when the event was observed.
    pub attributes: FileAttributes,
}

impl FileEvent {
    /// Create a new file event.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            attributes: FileAttributes::default(),
        }
    }

    /// Create an event and sample the path's attributes from disk.
    pub fn observed(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let attributes = FileAttributes::from_path(&path);
        Self::new(kind, path).with_attributes(attributes)
    }

    /// Add attributes to the event.
    pub fn with_attributes(mut self, attributes: FileAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Check if this is a creation event.
    pub fn is_creation(&self) -> bool {
        self.kind == FileEventKind::Created
    }

    /// Check if this is a file event (not directory).
    pub fn is_file(&self) -> bool {
        self.attributes.is_file
    }

    /// Check if this is a directory event.
    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory
    }
}

/// What happened to a path.
///
/// Only [`FileEventKind::Created`] is dispatched; the other kinds exist so a
/// subscriber can report what it saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// A new entry appeared in the directory.
    Created,
    /// Contents or metadata changed.
    Modified,
    /// The entry was removed.
    Removed,
    /// The entry was renamed, either side of the rename.
    Renamed,
    /// Access notifications and anything the backend could not classify.
    Other,
}

impl From<notify::EventKind> for FileEventKind {
    fn from(kind: notify::EventKind) -> Self {
        use notify::EventKind;
        use notify::event::ModifyKind;

        match kind {
            EventKind::Create(_) => Self::Created,
            EventKind::Modify(ModifyKind::Name(_)) => Self::Renamed,
            EventKind::Modify(_) => Self::Modified,
            EventKind::Remove(_) => Self::Removed,
            _ => Self::Other,
        }
    }
}

/// Additional file attributes.
///
/// A path that vanished before it could be sampled is neither a file nor a
/// directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// Whether the path is a file.
    pub is_file: bool,

    /// Whether the path is a directory.
    pub is_directory: bool,

    /// File size in bytes (if known).
    pub size: Option<u64>,
}

impl FileAttributes {
    /// Create attributes from a path.
    pub fn from_path(path: &Path) -> Self {
        match path.metadata() {
            Ok(metadata) => Self {
                is_file: metadata.is_file(),
                is_directory: metadata.is_dir(),
                size: metadata.is_file().then(|| metadata.len()),
            },
            Err(_) => Self::default(),
        }
    }

    /// Attributes of a regular file with the given size.
    pub fn file(size: u64) -> Self {
        Self {
            is_file: true,
            is_directory: false,
            size: Some(size),
        }
    }

    /// Attributes of a directory.
    pub fn directory() -> Self {
        Self {
            is_file: false,
            is_directory: true,
            size: None,
        }
    }
}
