//! Chunk planning for split uploads
//!
//! Degenerate chunk sizes are part of the contract: a zero chunk size yields
//! no chunks and a negative one treats the whole file as a single chunk.

use uptred_types::Chunk;

/// Number of chunks a file of `file_size` bytes divides into.
pub fn chunk_count(file_size: i64, chunk_size: i64) -> i64 {
    if chunk_size < 0 {
        return 1;
    }
    if chunk_size == 0 {
        return 0;
    }
    file_size / chunk_size + i64::from(file_size % chunk_size != 0)
}

/// Offset and size of chunk `index`.
///
/// The last chunk is clamped to the end of the file. An out-of-range index
/// produces a non-positive size; callers must stay below [`chunk_count`].
pub fn chunk_byte_range(file_size: i64, index: i64, chunk_size: i64) -> (i64, i64) {
    let offset = index.saturating_mul(chunk_size);
    if chunk_size <= 0 {
        return (offset, file_size);
    }
    let remaining = file_size.saturating_sub(offset);
    if chunk_size > remaining {
        (offset, remaining)
    } else {
        (offset, chunk_size)
    }
}

/// Every chunk of a file, in offset order
pub fn plan(file_size: i64, chunk_size: i64) -> Vec<Chunk> {
    (0..chunk_count(file_size, chunk_size))
        .map(|index| {
            let (offset, size) = chunk_byte_range(file_size, index, chunk_size);
            Chunk::new(index, offset, size)
        })
        .collect()
}
