//! Extraction of a stable, hashable file identity from OS metadata.

/// Derives a stable identity for a file from its metadata.
///
/// On Unix this combines `st_dev` and `st_ino`: the inode alone is unique
/// per volume but not across volumes, and [`crate::cache::BlockKey`] must
/// not alias two files on different filesystems that happen to share an
/// inode number. The combination is folded into a single `u64` with a
/// cheap mixing step so the result still hashes well.
///
/// Returns `None` on platforms that expose no stable per-file identifier
/// through this crate's dependency stack; callers should treat that as
/// [`crate::cache::FillError::IdentityUnavailable`] or the open-time
/// equivalent.
#[cfg(unix)]
pub fn file_identity(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    let dev = metadata.dev();
    let ino = metadata.ino();
    Some(mix(dev, ino))
}

#[cfg(not(unix))]
pub fn file_identity(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

/// Folds two 64-bit values into one, avoiding the trivial collisions a plain
/// XOR or sum would produce for small, common `(dev, ino)` pairs.
fn mix(dev: u64, ino: u64) -> u64 {
    const GOLDEN_RATIO: u64 = 0x9E37_79B9_7F4A_7C15;
    let salted_dev = dev.wrapping_mul(GOLDEN_RATIO).rotate_left(31);
    salted_dev ^ ino
}
