//! # 空闲扇区分配
//!
//! 存储引擎只通过 [`SectorAllocator`] 申请与归还扇区；
//! 持久化的空闲位图不属于引擎本身。
//! [`FreeMap`] 是一个仅存在于内存中的位图实现，供格式化工具与测试使用。

use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Debug;

use spin::Mutex;

use crate::{FREE_MAP_SECTOR, ROOT_DIR_SECTOR};

/// 空闲扇区分配器
pub trait SectorAllocator: Debug + Send + Sync {
    /// 分配 `count` 个**连续**扇区，返回首个扇区号；空间不足则返回空
    fn allocate(&self, count: usize) -> Option<u32>;

    /// 归还从 `sector` 起的 `count` 个扇区
    fn release(&self, sector: u32, count: usize);
}

/// 一次多扇区操作所申请的全部扇区。
///
/// 未提交即被丢弃时归还已申请的扇区，创建或扩容中途失败不会泄漏空间。
pub(crate) struct Reservation<'a> {
    allocator: &'a dyn SectorAllocator,
    /// `(首扇区, 个数)`
    runs: Vec<(u32, usize)>,
}

impl<'a> Reservation<'a> {
    pub fn new(allocator: &'a dyn SectorAllocator) -> Self {
        Self {
            allocator,
            runs: Vec::new(),
        }
    }

    pub fn take(&mut self, count: usize) -> vfs::Result<u32> {
        let Some(sector) = self.allocator.allocate(count) else {
            log::warn!("out of free sectors while allocating {count}");
            return Err(vfs::Error::NoSpace);
        };
        self.runs.push((sector, count));
        Ok(sector)
    }

    pub fn commit(mut self) {
        self.runs.clear();
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.runs.is_empty() {
            log::debug!("roll back {} sector runs", self.runs.len());
        }
        for (sector, count) in self.runs.drain(..) {
            self.allocator.release(sector, count);
        }
    }
}

/// 位图中的一组
type BitGroup = u64;
const GROUP_BITS: usize = BitGroup::BITS as usize;

/// 内存位图，每一位指示一个扇区是否已被占用
#[derive(Debug)]
pub struct FreeMap {
    groups: Mutex<Vec<BitGroup>>,
    /// 位图所指示区域的总扇区数
    total: usize,
}

impl FreeMap {
    /// 除空闲位图与根目录的 inode 扇区外全部空闲
    pub fn new(total: usize) -> Self {
        let map = Self {
            groups: Mutex::new(vec![0; total.div_ceil(GROUP_BITS)]),
            total,
        };
        {
            let mut groups = map.groups.lock();
            for sector in [FREE_MAP_SECTOR, ROOT_DIR_SECTOR] {
                if (sector as usize) < total {
                    set(&mut groups, sector as usize, true);
                }
            }
        }
        map
    }

    /// 拒绝一切分配，用于只读挂载已有镜像
    pub fn exhausted(total: usize) -> Self {
        Self {
            groups: Mutex::new(vec![BitGroup::MAX; total.div_ceil(GROUP_BITS)]),
            total,
        }
    }

    /// 剩余空闲扇区数
    pub fn free_sectors(&self) -> usize {
        let groups = self.groups.lock();
        (0..self.total).filter(|&bit| !get(&groups, bit)).count()
    }

    pub fn is_allocated(&self, sector: u32) -> bool {
        get(&self.groups.lock(), sector as usize)
    }
}

impl SectorAllocator for FreeMap {
    fn allocate(&self, count: usize) -> Option<u32> {
        if count == 0 {
            return None;
        }

        let mut groups = self.groups.lock();

        // 单个扇区：直接找还有 0 位的组
        let start = if count == 1 {
            groups
                .iter()
                .enumerate()
                .find_map(|(group_index, &bits)| {
                    (bits != BitGroup::MAX)
                        .then_some(group_index * GROUP_BITS + bits.trailing_ones() as usize)
                })
                .filter(|&bit| bit < self.total)?
        } else {
            let mut run = 0;
            (0..self.total).find(|&bit| {
                if get(&groups, bit) {
                    run = 0;
                    false
                } else {
                    run += 1;
                    run == count
                }
            })? + 1
                - count
        };

        for bit in start..start + count {
            set(&mut groups, bit, true);
        }
        Some(start as u32)
    }

    fn release(&self, sector: u32, count: usize) {
        let mut groups = self.groups.lock();
        for bit in sector as usize..sector as usize + count {
            // 归还的扇区一定处于占用状态
            assert!(get(&groups, bit), "double release of sector {bit}");
            set(&mut groups, bit, false);
        }
    }
}

#[inline]
fn get(groups: &[BitGroup], bit: usize) -> bool {
    groups[bit / GROUP_BITS] & (1 << (bit % GROUP_BITS)) != 0
}

#[inline]
fn set(groups: &mut [BitGroup], bit: usize, used: bool) {
    let mask = 1 << (bit % GROUP_BITS);
    if used {
        groups[bit / GROUP_BITS] |= mask;
    } else {
        groups[bit / GROUP_BITS] &= !mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_system_sectors() {
        let map = FreeMap::new(100);
        assert!(map.is_allocated(FREE_MAP_SECTOR));
        assert!(map.is_allocated(ROOT_DIR_SECTOR));
        assert_eq!(map.free_sectors(), 98);
        assert_eq!(map.allocate(1), Some(2));
    }

    #[test]
    fn contiguous_runs_skip_holes() {
        let map = FreeMap::new(100);
        let a = map.allocate(3).unwrap();
        let b = map.allocate(1).unwrap();
        assert_eq!((a, b), (2, 5));

        map.release(a, 3);
        // 3 个空闲扇区的空洞放不下 4 个
        assert_eq!(map.allocate(4), Some(6));
        assert_eq!(map.allocate(3), Some(2));
    }

    #[test]
    fn runs_out_of_space() {
        let map = FreeMap::new(10);
        assert_eq!(map.allocate(9), None);
        assert_eq!(map.allocate(8), Some(2));
        assert_eq!(map.allocate(1), None);
        assert_eq!(map.free_sectors(), 0);

        let exhausted = FreeMap::exhausted(10);
        assert_eq!(exhausted.allocate(1), None);
    }
}
