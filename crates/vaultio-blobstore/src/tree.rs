//! Hashed-path file tree for large objects
//!
//! The object id's base58 form is split into `depth` directory components of
//! `width` characters each; the remainder names the file. One file per
//! object, whole-frame writes via a temp file + rename.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;
use vaultio_core::{Address, Error, Object, Result};

const FRAME_EXT: &str = "vlt";

/// Depth/width hashed directory tree.
pub struct FileTree {
    root: PathBuf,
    depth: usize,
    width: usize,
}

impl FileTree {
    /// Open (or create) the tree rooted at `root`.
    pub fn open(root: &Path, depth: usize, width: usize) -> Result<Self> {
        if depth * width >= 32 {
            // base58 of a 32-byte id is at least 32 chars
            return Err(Error::invalid_argument(
                "tree depth * width must stay below the id length",
            ));
        }
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            depth,
            width,
        })
    }

    fn path_of(&self, addr: &Address) -> PathBuf {
        let oid = addr.object.to_string();
        let mut path = self.root.clone();
        for i in 0..self.depth {
            path.push(&oid[i * self.width..(i + 1) * self.width]);
        }
        path.push(format!("{}.{}.{FRAME_EXT}", addr.container, addr.object));
        path
    }

    /// Persist a frame for `addr`.
    pub fn put(&self, addr: &Address, frame: &[u8]) -> Result<()> {
        let path = self.path_of(addr);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(map_space)?;
        }

        // Write to a temp name first so readers never observe a partial frame.
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).map_err(map_space)?;
        file.write_all(frame).map_err(map_space)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read the frame for `addr`.
    pub fn get(&self, addr: &Address) -> Result<Vec<u8>> {
        match fs::read(self.path_of(addr)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the frame for `addr`. Returns `NotFound` if absent.
    pub fn delete(&self, addr: &Address) -> Result<()> {
        match fs::remove_file(self.path_of(addr)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a frame for `addr` is present.
    pub fn exists(&self, addr: &Address) -> Result<bool> {
        Ok(self.path_of(addr).exists())
    }

    /// Visit every stored object. Corrupt frames are logged and skipped.
    pub fn iterate<F>(&self, f: &mut F) -> Result<()>
    where
        F: FnMut(Object) -> Result<()>,
    {
        self.walk(&self.root, f)
    }

    fn walk<F>(&self, dir: &Path, f: &mut F) -> Result<()>
    where
        F: FnMut(Object) -> Result<()>,
    {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.walk(&path, f)?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(FRAME_EXT) {
                continue;
            }
            let data = fs::read(&path)?;
            match Object::from_frame(&data) {
                Ok(obj) => f(obj)?,
                Err(e) => {
                    warn!(path = %path.display(), %e, "skipping corrupt tree file");
                }
            }
        }
        Ok(())
    }
}

/// Map out-of-space I/O failures to the dedicated error.
fn map_space(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::StorageFull {
        Error::InsufficientSpace
    } else {
        e.into()
    }
}
