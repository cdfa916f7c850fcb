//! Block and chunk cursor arithmetic
//!
//! The image is split into blocks of at most `block_size` bytes; each block is
//! announced with its length and then written as chunks of at most
//! `chunk_size` bytes. Blocks partition `[0, total)` and chunks partition a
//! block the same way, so the boundaries depend only on
//! `(total, block_size, chunk_size)`.

pub fn is_last_block(offset: usize, length: usize, total: usize) -> bool {
    offset + length == total
}

/// Advance to the following block; the last block stays where it is.
/// Starting from `(0, 0)` yields the first block.
pub fn next_block(offset: usize, length: usize, total: usize, block_size: usize) -> (usize, usize) {
    if is_last_block(offset, length, total) {
        return (offset, length);
    }
    let offset = offset + length;
    (offset, block_size.min(total - offset))
}

pub fn is_last_chunk(offset: usize, length: usize, block_length: usize) -> bool {
    offset + length == block_length
}

/// Same as [`next_block`], scoped to one block
pub fn next_chunk(offset: usize, length: usize, block_length: usize, chunk_size: usize) -> (usize, usize) {
    if is_last_chunk(offset, length, block_length) {
        return (offset, length);
    }
    let offset = offset + length;
    (offset, chunk_size.min(block_length - offset))
}

/// Byte range of the image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Block {
    pub offset: usize,
    pub length: usize,
}

impl Block {
    pub fn first(total: usize, block_size: usize) -> Self {
        Self::default().next(total, block_size)
    }

    pub fn is_last(&self, total: usize) -> bool {
        is_last_block(self.offset, self.length, total)
    }

    pub fn next(&self, total: usize, block_size: usize) -> Self {
        let (offset, length) = next_block(self.offset, self.length, total, block_size);
        Self { offset, length }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Byte range relative to the start of the current block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chunk {
    pub offset: usize,
    pub length: usize,
}

impl Chunk {
    pub fn first(block_length: usize, chunk_size: usize) -> Self {
        Self::default().next(block_length, chunk_size)
    }

    pub fn is_last(&self, block_length: usize) -> bool {
        is_last_chunk(self.offset, self.length, block_length)
    }

    pub fn next(&self, block_length: usize, chunk_size: usize) -> Self {
        let (offset, length) = next_chunk(self.offset, self.length, block_length, chunk_size);
        Self { offset, length }
    }
}

/// Position of a transfer: current block and the chunk within it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferCursor {
    pub block: Block,
    pub chunk: Chunk,
}

impl TransferCursor {
    /// Image offset of the current chunk
    pub fn image_offset(&self) -> usize {
        self.block.offset + self.chunk.offset
    }
}

/// Every block of an image of `total` bytes, in order
pub fn blocks(total: usize, block_size: usize) -> impl Iterator<Item = Block> {
    let mut next = (total > 0 && block_size > 0).then(|| Block::first(total, block_size));
    std::iter::from_fn(move || {
        let block = next?;
        next = (!block.is_last(total)).then(|| block.next(total, block_size));
        Some(block)
    })
}

/// Every chunk of a block of `block_length` bytes, in order
pub fn chunks(block_length: usize, chunk_size: usize) -> impl Iterator<Item = Chunk> {
    let mut next = (block_length > 0 && chunk_size > 0).then(|| Chunk::first(block_length, chunk_size));
    std::iter::from_fn(move || {
        let chunk = next?;
        next = (!chunk.is_last(block_length)).then(|| chunk.next(block_length, chunk_size));
        Some(chunk)
    })
}
