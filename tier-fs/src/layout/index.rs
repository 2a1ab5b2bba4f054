//! 索引块：整个扇区连续存储小端序的**扇区编号**。
//!
//! 索引块内有效编号的个数由 inode 的长度推算，不依赖哨兵值。

use crate::block_cache::BlockCache;
use crate::SECTOR_SIZE;

/// 索引块的编号容量
pub const SECTORS_PER_ARRAY: usize = SECTOR_SIZE / 4;

pub type IndexBlock = [u32; SECTORS_PER_ARRAY];

pub fn load(cache: &BlockCache, sector: u32) -> IndexBlock {
    cache.map(sector, |data| {
        let mut block = [0; SECTORS_PER_ARRAY];
        for (entry, bytes) in block.iter_mut().zip(data.chunks_exact(4)) {
            *entry = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        block
    })
}

pub fn store(cache: &BlockCache, sector: u32, block: &IndexBlock) {
    cache.map_mut(sector, |data| {
        for (bytes, entry) in data.chunks_exact_mut(4).zip(block) {
            bytes.copy_from_slice(&entry.to_le_bytes());
        }
    });
}

/// 读取索引块中的单个编号
pub fn entry(cache: &BlockCache, sector: u32, index: usize) -> u32 {
    assert!(index < SECTORS_PER_ARRAY);
    cache.map(sector, |data| {
        let bytes = &data[index * 4..index * 4 + 4];
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    })
}
