//! The identity of a single cached block.

/// Size, in bytes, of a single cached block. The final block of a file may be
/// shorter than this.
pub const BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Identifies one block of one file.
///
/// Deliberately excludes the file's path: the same file reached through two
/// names shares cache entries, while a file replaced at the same name (new
/// inode) does not alias the old one's blocks. See [`crate::fs::identity`]
/// for how the file identity half of this key is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    /// Stable identity of the underlying file object.
    pub file_identity: u64,
    /// Zero-based index of the block within the file.
    pub block_index: u64,
}

impl BlockKey {
    /// Builds a key for `block_index` of the file identified by `file_identity`.
    pub fn new(file_identity: u64, block_index: u64) -> Self {
        Self { file_identity, block_index }
    }
}

/// Computes the block index that contains byte offset `pos`.
pub fn block_index_for(pos: u64) -> u64 {
    pos / BLOCK_SIZE
}

/// Computes the byte offset within its block of byte offset `pos`.
pub fn offset_in_block(pos: u64) -> u64 {
    pos % BLOCK_SIZE
}

/// Computes the starting byte offset of `block_index`.
pub fn block_start(block_index: u64) -> u64 {
    block_index * BLOCK_SIZE
}

/// Computes the nominal length of `block_index` given the file's total
/// length, i.e. `BLOCK_SIZE` unless this is the final, short block.
pub fn block_len(block_index: u64, file_length: u64) -> u64 {
    let start = block_start(block_index);
    BLOCK_SIZE.min(file_length.saturating_sub(start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_equality_is_structural() {
        assert_eq!(BlockKey::new(7, 2), BlockKey::new(7, 2));
        assert_ne!(BlockKey::new(7, 2), BlockKey::new(7, 3));
        assert_ne!(BlockKey::new(7, 2), BlockKey::new(8, 2));
    }

    #[test]
    fn block_math_is_consistent() {
        assert_eq!(block_index_for(0), 0);
        assert_eq!(block_index_for(BLOCK_SIZE), 1);
        assert_eq!(block_index_for(BLOCK_SIZE + 10), 1);
        assert_eq!(offset_in_block(BLOCK_SIZE + 10), 10);
        assert_eq!(block_start(2), BLOCK_SIZE * 2);
    }

    #[test]
    fn block_len_is_short_at_eof() {
        let file_length = BLOCK_SIZE + 100;
        assert_eq!(block_len(0, file_length), BLOCK_SIZE);
        assert_eq!(block_len(1, file_length), 100);
        assert_eq!(block_len(2, file_length), 0);
    }
}
