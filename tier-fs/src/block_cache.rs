//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟固定数量的槽位，
//! 把即将操作的扇区复制到槽位中，提高对块设备的操作效率。
//!
//! - 每个槽位各自上锁，命中时只锁住该槽位；
//! - 未命中时优先使用空槽位，否则踢走最久未使用(LRU)的槽位；
//! - 写回式：被修改过的槽位在被踢走或 [`BlockCache::sync`] 时才写回块设备。
//!
//! 选择牺牲槽位并换入新扇区的全过程持有驱逐锁，
//! 因此并发未命中的线程不会把同一扇区缓存进两个槽位。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use block_dev::BlockDevice;
use spin::{Mutex, MutexGuard, Once};

use crate::{DataBlock, SECTOR_SIZE};

pub struct BlockCache {
    slots: Box<[Mutex<Slot>]>,
    /// 逻辑时钟，充当槽位的最近使用时间戳
    clock: AtomicU64,
    /// 未命中时从重新扫描到换入完成期间持有
    evict_lock: Mutex<()>,
    device: Arc<dyn BlockDevice>,
    read_ahead: Once<ReadAhead>,
}

/// 内存中的扇区槽位
struct Slot {
    occupied: bool,
    sector: u32,
    last_use: u64,
    /// 是否为脏块
    modified: bool,
    data: Box<DataBlock>,
}

/// 预读信箱：只容纳一个请求，新请求覆盖未被取走的旧请求
struct ReadAhead {
    pending: Mutex<Option<u32>>,
    notify: Box<dyn Fn() + Send + Sync>,
}

impl BlockCache {
    pub fn new(device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        assert!(capacity > 0, "block cache needs at least one slot");

        let slots: Vec<_> = (0..capacity).map(|_| Mutex::new(Slot::new())).collect();
        Self {
            slots: slots.into_boxed_slice(),
            clock: AtomicU64::new(0),
            evict_lock: Mutex::new(()),
            device,
            read_ahead: Once::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    /// 以只读方式访问扇区的缓存
    pub fn map<V>(&self, sector: u32, f: impl FnOnce(&DataBlock) -> V) -> V {
        let slot = self.access(sector);
        f(&slot.data)
    }

    /// 以某种方式修改扇区的缓存，槽位随之变脏
    pub fn map_mut<V>(&self, sector: u32, f: impl FnOnce(&mut DataBlock) -> V) -> V {
        let mut slot = self.access(sector);
        slot.modified = true;
        f(&mut slot.data)
    }

    pub fn read(&self, sector: u32) -> DataBlock {
        self.map(sector, |data| *data)
    }

    /// 从扇区内 `offset` 处读出数据填满 `buf`
    pub fn read_at(&self, sector: u32, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= SECTOR_SIZE);
        self.map(sector, |data| buf.copy_from_slice(&data[offset..offset + buf.len()]));
    }

    /// 同 [`BlockCache::read_at`]，若开启了预读则顺带请求下一扇区
    pub fn read_ahead_at(&self, sector: u32, offset: usize, buf: &mut [u8]) {
        self.read_at(sector, offset, buf);

        if let Some(read_ahead) = self.read_ahead.get() {
            let next = sector + 1;
            if (next as usize) < self.device.num_blocks() {
                read_ahead.post(next);
            }
        }
    }

    pub fn write(&self, sector: u32, data: &DataBlock) {
        self.map_mut(sector, |block| block.copy_from_slice(data));
    }

    /// 从扇区内 `offset` 处写入 `bytes`，其余字节保持不变
    pub fn write_at(&self, sector: u32, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= SECTOR_SIZE);
        self.map_mut(sector, |data| {
            data[offset..offset + bytes.len()].copy_from_slice(bytes)
        });
    }

    #[inline]
    pub fn zeroize(&self, sector: u32) {
        self.map_mut(sector, |data| data.fill(0));
    }

    /// 把所有脏槽位写回块设备，槽位仍保留在缓存中。
    ///
    /// 只在关闭或定时同步时调用，调用者保证此时没有并发写者。
    pub fn sync(&self) {
        for slot in self.slots.iter() {
            slot.lock().sync(&self.device);
        }
    }

    /// 已占用的槽位数
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.lock().occupied).count()
    }

    pub fn contains(&self, sector: u32) -> bool {
        self.slots.iter().any(|slot| {
            let slot = slot.lock();
            slot.occupied && slot.sector == sector
        })
    }

    /// 安装预读信箱；`notify` 在每次投递请求后被调用，用于唤醒预读线程
    pub fn enable_read_ahead(&self, notify: impl Fn() + Send + Sync + 'static) {
        self.read_ahead.call_once(|| ReadAhead {
            pending: Mutex::new(None),
            notify: Box::new(notify),
        });
    }

    /// 预读线程的工作内容：取出信箱中的请求并把扇区读进缓存。
    ///
    /// 信箱为空时返回 `false`。
    pub fn pump_read_ahead(&self) -> bool {
        let Some(sector) = self
            .read_ahead
            .get()
            .and_then(|read_ahead| read_ahead.pending.lock().take())
        else {
            return false;
        };

        log::trace!("read ahead sector {sector}");
        self.map(sector, |_| ());
        true
    }
}

impl BlockCache {
    /// 取得已装入 `sector` 的槽位，并刷新其使用时间
    fn access(&self, sector: u32) -> MutexGuard<'_, Slot> {
        let mut slot = match self.lookup(sector) {
            Some(slot) => slot,
            None => self.fill(sector),
        };
        slot.last_use = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        slot
    }

    fn lookup(&self, sector: u32) -> Option<MutexGuard<'_, Slot>> {
        self.slots
            .iter()
            .map(|slot| slot.lock())
            .find(|slot| slot.occupied && slot.sector == sector)
    }

    // 块缓存调度策略：优先空槽位，否则踢走最久未使用的槽位
    fn fill(&self, sector: u32) -> MutexGuard<'_, Slot> {
        let _evicting = self.evict_lock.lock();

        let mut free = None;
        let mut lru: Option<(usize, u64)> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            let slot = slot.lock();
            if !slot.occupied {
                free.get_or_insert(index);
                continue;
            }
            // 等待驱逐锁期间已被别的线程换入
            if slot.sector == sector {
                return slot;
            }
            if lru.map_or(true, |(_, last_use)| slot.last_use < last_use) {
                lru = Some((index, slot.last_use));
            }
        }

        let index = free
            .or(lru.map(|(index, _)| index))
            .expect("block cache without slots");
        let mut slot = self.slots[index].lock();

        if slot.occupied {
            log::trace!("evict sector {} from slot {index}", slot.sector);
            slot.sync(&self.device);
        }
        self.device.read_block(sector as usize, &mut slot.data[..]);
        slot.occupied = true;
        slot.sector = sector;
        slot.modified = false;

        slot
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        self.sync();
    }
}

impl fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCache")
            .field("capacity", &self.capacity())
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl Slot {
    fn new() -> Self {
        Self {
            occupied: false,
            sector: 0,
            last_use: 0,
            modified: false,
            data: Box::new([0; SECTOR_SIZE]),
        }
    }

    fn sync(&mut self, device: &Arc<dyn BlockDevice>) {
        if self.occupied && self.modified {
            self.modified = false;
            device.write_block(self.sector as usize, &self.data[..]);
        }
    }
}

impl ReadAhead {
    fn post(&self, sector: u32) {
        *self.pending.lock() = Some(sector);
        (self.notify)();
    }
}
