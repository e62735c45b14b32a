//! Access to the storage holding source directories.
//!
//! The engine never touches [`std::fs`] directly. Everything is read through a
//! [`FileSystem`], which is either the local disk ([`DiskFileSystem`]) or an
//! in-memory tree ([`MemoryFileSystem`], mostly useful for tests and embedding).
use std::{
    collections::BTreeMap,
    io,
    path::{Component, Path, PathBuf},
};

/// Read-only access to files and directories.
pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn is_file(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;
}

impl<F: FileSystem + ?Sized> FileSystem for &F {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        (**self).read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        (**self).is_file(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        (**self).is_dir(path)
    }
}

/// The local file system.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiskFileSystem;

impl FileSystem for DiskFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// A file system kept entirely in memory.
///
/// Directories exist implicitly as soon as a file below them exists. All paths
/// are [normalized](normalize) on insertion and lookup.
///
/// ```
/// # use std::path::Path;
/// # use stackable_overlay::fs::{FileSystem, MemoryFileSystem};
/// let fs = MemoryFileSystem::default().with_file("overlays/prod/kustomization.yaml", "");
///
/// assert!(fs.is_dir(Path::new("overlays")));
/// assert!(fs.is_file(Path::new("overlays/./prod/../prod/kustomization.yaml")));
/// assert!(!fs.is_dir(Path::new("overlays/staging")));
/// ```
#[derive(Clone, Debug, Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<PathBuf, String>,
}

impl MemoryFileSystem {
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, contents: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), contents.into());
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(&normalize(path)).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )
        })
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let path = normalize(path);
        if path == Path::new(".") {
            return self.files.keys().any(|file| file.is_relative());
        }
        self.files
            .keys()
            .any(|file| file != &path && file.starts_with(&path))
    }
}

/// Lexically normalizes `path`: `.` components are dropped and `..` removes
/// the preceding component where there is one.
///
/// The file system is not consulted, so symlinks are not resolved. An empty
/// result is returned as `.`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                Some(Component::ParentDir | Component::CurDir) | None => {
                    normalized.push("..");
                }
            },
            other => normalized.push(other.as_os_str()),
        }
    }

    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}
