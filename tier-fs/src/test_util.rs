use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use block_dev::BlockDevice;
use spin::Mutex;

use crate::{Config, DataBlock, FreeMap, SECTOR_SIZE, TierFileSystem};

/// 内存中的块设备，记录写入次数
#[derive(Debug)]
pub struct MemDisk {
    blocks: Mutex<Vec<DataBlock>>,
    writes: AtomicUsize,
}

impl MemDisk {
    pub fn new(blocks: usize) -> Self {
        Self {
            blocks: Mutex::new(vec![[0; SECTOR_SIZE]; blocks]),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self, block_id: usize) -> DataBlock {
        self.blocks.lock()[block_id]
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.blocks.lock()[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.blocks.lock()[block_id].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn num_blocks(&self) -> usize {
        self.blocks.lock().len()
    }
}

/// 在 `blocks` 个扇区的内存盘上格式化出文件系统
pub fn format(blocks: usize) -> (Arc<TierFileSystem>, Arc<FreeMap>) {
    let disk = Arc::new(MemDisk::new(blocks));
    let free_map = Arc::new(FreeMap::new(blocks));
    let fs = TierFileSystem::format(disk, free_map.clone(), Config::default())
        .expect("format in-memory disk");
    (fs, free_map)
}
