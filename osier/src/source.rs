//! Source reader: owns source buffers and resolves source ids to locations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use osier_syntax::SourceId;

/// Index of a loaded source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SourceFileId(u32);

impl SourceFileId {
    /// The raw index.
    pub const fn to_raw(self) -> u32 {
        self.0
    }
}

/// A resolved source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Path of the containing file.
    pub filepath: PathBuf,
    /// 1-based line.
    pub line: u32,
    /// 1-based column (byte-based).
    pub column: u32,
}

impl core::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}:{}", self.filepath.display(), self.line, self.column)
    }
}

struct SourceFile {
    path: PathBuf,
    bytes: Vec<u8>,
    /// First global source offset of this file.
    base: u32,
}

/// Owns every loaded source buffer.
///
/// Each file occupies a disjoint range of the global source-offset space, so
/// a bare [`SourceId`] pins down both the file and the byte within it.
#[derive(Default)]
pub struct SourceReader {
    files: Vec<SourceFile>,
    next_base: u32,
}

impl SourceReader {
    /// Creates an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the file at `path`.
    pub fn add_file(&mut self, path: &Path) -> io::Result<SourceFileId> {
        let bytes = fs::read(path)?;

        Ok(self.add_bytes(path.to_owned(), bytes))
    }

    /// Registers an in-memory buffer under `path`.
    pub fn add_bytes(&mut self, path: PathBuf, bytes: Vec<u8>) -> SourceFileId {
        let id = SourceFileId(self.files.len() as u32);
        let base = self.next_base;

        self.next_base = base
            .checked_add(bytes.len() as u32)
            .and_then(|b| b.checked_add(1))
            .unwrap_or_else(|| panic!("source offset space exhausted loading {}", path.display()));

        self.files.push(SourceFile { path, bytes, base });

        id
    }

    /// Bytes of a loaded file.
    pub fn bytes(&self, file: SourceFileId) -> &[u8] {
        &self.files[file.0 as usize].bytes
    }

    /// Path of a loaded file.
    pub fn path(&self, file: SourceFileId) -> &Path {
        &self.files[file.0 as usize].path
    }

    /// First global source offset of a file; token byte offsets are relative
    /// to it.
    pub fn base(&self, file: SourceFileId) -> u32 {
        self.files[file.0 as usize].base
    }

    /// Resolves a source id to `(filepath, line, column)`.
    ///
    /// Returns `None` for [`SourceId::INVALID`] or offsets outside any
    /// loaded file.
    pub fn resolve(&self, source: SourceId) -> Option<SourceLocation> {
        if source.is_invalid() {
            return None;
        }

        let offset = source.to_raw();

        let file = self
            .files
            .iter()
            .take_while(|f| f.base <= offset)
            .last()
            .filter(|f| offset - f.base <= f.bytes.len() as u32)?;

        let local = (offset - file.base) as usize;

        let mut line = 1u32;
        let mut line_start = 0usize;

        for (i, &b) in file.bytes[..local].iter().enumerate() {
            if b == b'\n' {
                line += 1;
                line_start = i + 1;
            }
        }

        Some(SourceLocation {
            filepath: file.path.clone(),
            line,
            column: (local - line_start) as u32 + 1,
        })
    }
}

impl core::fmt::Debug for SourceReader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SourceReader")
            .field("files", &self.files.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use osier_syntax::SourceId;

    use super::SourceReader;

    #[test]
    fn resolve_walks_lines_and_columns() {
        let mut reader = SourceReader::new();

        let file = reader.add_bytes(PathBuf::from("a.osi"), b"one\ntwo\nthree".to_vec());
        let base = reader.base(file);

        let loc = reader.resolve(SourceId::new(base + 5)).expect("resolves");

        assert_eq!(loc.line, 2);
        assert_eq!(loc.column, 2);
        assert_eq!(loc.filepath, PathBuf::from("a.osi"));
    }

    #[test]
    fn files_occupy_disjoint_ranges() {
        let mut reader = SourceReader::new();

        let a = reader.add_bytes(PathBuf::from("a.osi"), b"aaa".to_vec());
        let b = reader.add_bytes(PathBuf::from("b.osi"), b"b".to_vec());

        assert_ne!(reader.base(a), reader.base(b));

        let loc = reader
            .resolve(SourceId::new(reader.base(b)))
            .expect("resolves");

        assert_eq!(loc.filepath, PathBuf::from("b.osi"));
        assert_eq!(loc.line, 1);
        assert_eq!(loc.column, 1);
    }

    #[test]
    fn invalid_source_does_not_resolve() {
        let reader = SourceReader::new();

        assert!(reader.resolve(SourceId::INVALID).is_none());
    }
}
