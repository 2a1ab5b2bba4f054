//! 分级索引
//! - Small：`start` 指向一段连续的数据扇区，最多 [`SMALL_SECTORS`] 个
//! - Large：`start` 指向一个索引块，块内每个编号指向一个数据扇区
//! - Huge：`start` 指向顶层索引块，块内每个编号指向一个 Large 式的二级索引块
//!
//! 目录的空间用于存放目录项；
//! 文件的空间用于存放它的数据。
//!
//! ## 块索引编码
//!
//! Huge 层级下，数据扇区的逻辑索引除以 [`SECTORS_PER_ARRAY`] 得二级索引块在顶层的位置，
//! 取模得数据扇区在二级索引块内的位置。

use alloc::vec::Vec;
use core::{mem, ptr};

use super::index::{self, IndexBlock, SECTORS_PER_ARRAY};
use crate::block_cache::BlockCache;
use crate::free_map::{Reservation, SectorAllocator};
use crate::{DataBlock, INODE_MAGIC, SECTOR_SIZE};

/// Small 层级可容纳的扇区数
pub const SMALL_SECTORS: usize = 64;
/// Large 层级可容纳的扇区数
pub const LARGE_SECTORS: usize = SECTORS_PER_ARRAY;
/// Huge 层级可容纳的扇区数
pub const HUGE_SECTORS: usize = SECTORS_PER_ARRAY * SECTORS_PER_ARRAY;

/// 磁盘上的 inode 描述符，恰好占满一个扇区
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DiskInode {
    /// 含义取决于层级，见模块文档
    pub start: u32,
    /// 父目录 inode 所在扇区
    pub parent: u32,
    /// 字节长度
    // 不用usize是为了严控布局
    pub length: u32,
    tier: u8,
    kind: u8,
    _reserved: u16,
    magic: u32,
    _unused: [u32; 123],
}

const _: () = assert!(mem::size_of::<DiskInode>() == SECTOR_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Tier {
    Small = 1,
    Large = 2,
    Huge = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InodeKind {
    File = 1,
    Directory = 2,
}

impl Tier {
    /// 该层级可容纳的数据扇区数
    #[inline]
    pub const fn capacity(self) -> usize {
        match self {
            Self::Small => SMALL_SECTORS,
            Self::Large => LARGE_SECTORS,
            Self::Huge => HUGE_SECTORS,
        }
    }

    #[inline]
    pub const fn max_bytes(self) -> usize {
        self.capacity() * SECTOR_SIZE
    }

    /// 能容纳 `sectors` 个数据扇区的最小层级
    pub fn fitting(sectors: usize) -> Option<Self> {
        [Self::Small, Self::Large, Self::Huge]
            .into_iter()
            .find(|tier| sectors <= tier.capacity())
    }

    /// 该层级下 `sectors` 个数据扇区连同索引块一共占用的扇区数
    pub fn total_sectors(self, sectors: usize) -> usize {
        match self {
            Self::Small => sectors,
            Self::Large => sectors + 1,
            Self::Huge => sectors + sectors.div_ceil(SECTORS_PER_ARRAY) + 1,
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(Self::Small),
            2 => Ok(Self::Large),
            3 => Ok(Self::Huge),
            raw => Err(raw),
        }
    }
}

impl TryFrom<u8> for InodeKind {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(Self::File),
            2 => Ok(Self::Directory),
            raw => Err(raw),
        }
    }
}

impl DiskInode {
    fn new(tier: Tier, kind: InodeKind, length: u32, parent: u32, start: u32) -> Self {
        Self {
            start,
            parent,
            length,
            tier: tier as u8,
            kind: kind as u8,
            _reserved: 0,
            magic: INODE_MAGIC,
            _unused: [0; 123],
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }

    pub fn tier(&self) -> Tier {
        Tier::try_from(self.tier).expect("corrupted inode tier")
    }

    pub fn kind(&self) -> InodeKind {
        InodeKind::try_from(self.kind).expect("corrupted inode kind")
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == InodeKind::Directory
    }

    /// 容纳当前长度所需的数据扇区数
    #[inline]
    pub fn sectors(&self) -> usize {
        (self.length as usize).div_ceil(SECTOR_SIZE)
    }

    #[inline]
    pub fn as_block(&self) -> &DataBlock {
        // DiskInode 只含整数字段且恰为一个扇区大小
        unsafe { &*ptr::from_ref(self).cast::<DataBlock>() }
    }

    #[inline]
    pub fn from_block(block: &DataBlock) -> Self {
        unsafe { ptr::read_unaligned(block.as_ptr().cast()) }
    }

    /// 在 `tier` 层级下分配容纳 `length` 字节所需的全部扇区并清零，
    /// 返回指向它们的描述符。
    pub fn build(
        tier: Tier,
        kind: InodeKind,
        length: usize,
        parent: u32,
        cache: &BlockCache,
        reservation: &mut Reservation,
    ) -> vfs::Result<Self> {
        let sectors = length.div_ceil(SECTOR_SIZE);
        assert!(sectors <= tier.capacity());

        let start = Self::build_tier(tier, sectors, cache, reservation)?;
        Ok(Self::new(tier, kind, length as u32, parent, start))
    }

    /// 逻辑上 inode 指向一系列数据扇区，此处传入的是这些扇区的索引（逻辑索引），
    /// 然后返回给**块缓存层**使用的扇区号
    pub fn sector_of(&self, index: usize, cache: &BlockCache) -> u32 {
        debug_assert!(index < self.sectors());

        match self.tier() {
            Tier::Small => self.start + index as u32,
            Tier::Large => index::entry(cache, self.start, index),
            Tier::Huge => {
                let second = index::entry(cache, self.start, index / SECTORS_PER_ARRAY);
                index::entry(cache, second, index % SECTORS_PER_ARRAY)
            }
        }
    }

    /// 在当前层级内原地扩展到 `length` 字节，只分配新增的扇区。
    ///
    /// 失败时描述符保持原样。
    pub fn extend(
        &mut self,
        length: usize,
        cache: &BlockCache,
        reservation: &mut Reservation,
    ) -> vfs::Result<()> {
        let old_sectors = self.sectors();
        let new_sectors = length.div_ceil(SECTOR_SIZE);
        assert!(length >= self.length as usize);
        assert!(new_sectors <= self.tier().capacity());

        match self.tier() {
            // 平铺的扇区段无法原地延长
            Tier::Small => assert_eq!(old_sectors, new_sectors),
            Tier::Large => {
                Self::fill_index(self.start, old_sectors, new_sectors, cache, reservation)?;
            }
            Tier::Huge => {
                let mut top = index::load(cache, self.start);
                let mut current = old_sectors;
                while current < new_sectors {
                    let nth = current / SECTORS_PER_ARRAY;
                    let from = current % SECTORS_PER_ARRAY;
                    let to = (new_sectors - nth * SECTORS_PER_ARRAY).min(SECTORS_PER_ARRAY);

                    // 索引为0表示进入新的二级索引块
                    if from == 0 {
                        top[nth] = Self::build_tier(Tier::Large, to, cache, reservation)?;
                    } else {
                        Self::fill_index(top[nth], from, to, cache, reservation)?;
                    }
                    current = nth * SECTORS_PER_ARRAY + to;
                }
                index::store(cache, self.start, &top);
            }
        }

        self.length = length as u32;
        Ok(())
    }

    /// 全部扇区：数据扇区在前，索引块在后
    pub fn all_sectors(&self, cache: &BlockCache) -> Vec<u32> {
        let sectors = self.sectors();
        let mut all = Vec::with_capacity(self.tier().total_sectors(sectors));

        match self.tier() {
            Tier::Small => all.extend((0..sectors as u32).map(|i| self.start + i)),
            Tier::Large => {
                all.extend_from_slice(&index::load(cache, self.start)[..sectors]);
                all.push(self.start);
            }
            Tier::Huge => {
                let top = index::load(cache, self.start);
                let arrays = sectors.div_ceil(SECTORS_PER_ARRAY);
                for (nth, &second) in top.iter().take(arrays).enumerate() {
                    let count = (sectors - nth * SECTORS_PER_ARRAY).min(SECTORS_PER_ARRAY);
                    all.extend_from_slice(&index::load(cache, second)[..count]);
                }
                all.extend_from_slice(&top[..arrays]);
                all.push(self.start);
            }
        }

        all
    }

    /// 归还全部数据扇区与索引块，描述符所在扇区由调用者负责
    pub fn release(&self, cache: &BlockCache, allocator: &dyn SectorAllocator) {
        if self.tier() == Tier::Small {
            let sectors = self.sectors();
            if sectors > 0 {
                allocator.release(self.start, sectors);
            }
            return;
        }

        for sector in self.all_sectors(cache) {
            allocator.release(sector, 1);
        }
    }
}

impl DiskInode {
    fn build_tier(
        tier: Tier,
        sectors: usize,
        cache: &BlockCache,
        reservation: &mut Reservation,
    ) -> vfs::Result<u32> {
        match tier {
            Tier::Small => {
                if sectors == 0 {
                    return Ok(0);
                }
                let start = reservation.take(sectors)?;
                for sector in start..start + sectors as u32 {
                    cache.zeroize(sector);
                }
                Ok(start)
            }
            Tier::Large => {
                let array = reservation.take(1)?;
                cache.zeroize(array);
                Self::fill_index(array, 0, sectors, cache, reservation)?;
                Ok(array)
            }
            Tier::Huge => {
                let top = reservation.take(1)?;
                let mut block: IndexBlock = [0; SECTORS_PER_ARRAY];
                for (nth, entry) in block
                    .iter_mut()
                    .take(sectors.div_ceil(SECTORS_PER_ARRAY))
                    .enumerate()
                {
                    let count = (sectors - nth * SECTORS_PER_ARRAY).min(SECTORS_PER_ARRAY);
                    *entry = Self::build_tier(Tier::Large, count, cache, reservation)?;
                }
                index::store(cache, top, &block);
                Ok(top)
            }
        }
    }

    /// 为索引块的 `from..to` 项分配清零的数据扇区
    fn fill_index(
        array: u32,
        from: usize,
        to: usize,
        cache: &BlockCache,
        reservation: &mut Reservation,
    ) -> vfs::Result<()> {
        if from >= to {
            return Ok(());
        }

        let mut block = index::load(cache, array);
        for entry in &mut block[from..to] {
            *entry = reservation.take(1)?;
            cache.zeroize(*entry);
        }
        index::store(cache, array, &block);
        Ok(())
    }
}
