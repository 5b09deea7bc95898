//! Reserve-then-commit growable byte buffer.

/// Growable byte buffer with a fixed up-front reservation.
///
/// The full reservation is claimed at construction and never exceeded, so the
/// buffer's storage is never reallocated: an offset handed out once stays
/// dereferenceable for the lifetime of the vector. The committed watermark
/// grows in fixed increments as data is appended, mirroring a virtual-memory
/// reserve/commit scheme.
///
/// Exceeding the reservation is a fatal error (panic): callers size their
/// reservations to the largest input the pipeline accepts.
#[derive(Debug)]
pub struct ReservedVec {
    buf: Vec<u8>,
    committed: usize,
    reserve_bytes: usize,
    commit_increment: usize,
}

impl ReservedVec {
    /// Reserves `reserve_bytes` of storage and commits the first increment.
    pub fn new(reserve_bytes: usize, commit_increment: usize) -> Self {
        assert!(
            commit_increment != 0 && commit_increment <= reserve_bytes,
            "ReservedVec commit increment {commit_increment} incompatible with reservation {reserve_bytes}"
        );

        Self {
            buf: Vec::with_capacity(reserve_bytes),
            committed: commit_increment,
            reserve_bytes,
            commit_increment,
        }
    }

    fn grow_commit(&mut self, required: usize) {
        if required > self.reserve_bytes {
            panic!(
                "ReservedVec reservation of {} bytes exceeded by {} bytes",
                self.reserve_bytes,
                required - self.reserve_bytes
            );
        }

        while self.committed < required {
            self.committed = (self.committed + self.commit_increment).min(self.reserve_bytes);
        }
    }

    /// Appends `src` verbatim, returning the byte offset it begins at.
    pub fn append_exact(&mut self, src: &[u8]) -> usize {
        let offset = self.buf.len();
        let required = offset + src.len();

        if required > self.committed {
            self.grow_commit(required);
        }

        self.buf.extend_from_slice(src);

        offset
    }

    /// Appends `bytes` zeroed bytes, returning the byte offset they begin at.
    pub fn reserve_exact(&mut self, bytes: usize) -> usize {
        let offset = self.buf.len();
        let required = offset + bytes;

        if required > self.committed {
            self.grow_commit(required);
        }

        self.buf.resize(required, 0);

        offset
    }

    /// Discards the trailing `bytes` bytes.
    pub fn pop_by(&mut self, bytes: usize) {
        assert!(bytes <= self.buf.len(), "ReservedVec pop past beginning");

        self.buf.truncate(self.buf.len() - bytes);
    }

    /// Number of bytes appended so far.
    pub fn used(&self) -> usize {
        self.buf.len()
    }

    /// Committed watermark in bytes.
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// All bytes appended so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Shared view of `len` bytes beginning at `offset`.
    pub fn bytes_at(&self, offset: usize, len: usize) -> &[u8] {
        &self.buf[offset..offset + len]
    }

    /// Mutable view of `len` bytes beginning at `offset`.
    pub fn bytes_at_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.buf[offset..offset + len]
    }
}
