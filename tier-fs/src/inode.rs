//! # 索引节点层
//!
//! 同一扇区上的 inode 在内存中只有一份 [`OpenInode`]，
//! 由打开表以弱引用登记，各句柄 [`Inode`] 共享它。
//! 最后一个句柄关闭时注销；若已被删除，则一并归还它的全部扇区。

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::{Mutex, RwLock};
use vfs::{DirEntryType, Stat, StatKind};

use crate::free_map::Reservation;
use crate::layout::{DiskInode, InodeKind, Tier};
use crate::{SECTOR_SIZE, TierFileSystem};

/// 已打开的 inode，以扇区号为键
#[derive(Debug, Default)]
pub(crate) struct InodeTable(Mutex<BTreeMap<u32, Weak<OpenInode>>>);

/// 内存中的 inode
pub(crate) struct OpenInode {
    sector: u32,
    fs: Arc<TierFileSystem>,
    /// 描述符在内存中的副本，与磁盘上的保持一致
    disk: Mutex<DiskInode>,
    /// 扩容锁
    grow: Mutex<()>,
    /// 读写数据扇区时共享持有，层级迁移时独占持有
    layout: RwLock<()>,
    removed: AtomicBool,
    deny_write: AtomicU32,
}

/// inode 句柄，克隆即重新打开
#[derive(Clone)]
pub struct Inode(Arc<OpenInode>);

impl InodeTable {
    pub const fn new() -> Self {
        Self(Mutex::new(BTreeMap::new()))
    }

    /// 仍处于打开状态的 inode 数
    pub fn len(&self) -> usize {
        self.0
            .lock()
            .values()
            .filter(|open| open.strong_count() > 0)
            .count()
    }
}

impl Inode {
    /// 在 `sector` 上写入新 inode 的描述符，并按 `length` 分配清零的数据扇区。
    ///
    /// `sector` 本身由调用者分配。
    pub fn create(
        fs: &TierFileSystem,
        sector: u32,
        length: usize,
        kind: InodeKind,
        parent: u32,
    ) -> vfs::Result<()> {
        let sectors = length.div_ceil(SECTOR_SIZE);
        let tier = Tier::fitting(sectors).ok_or(vfs::Error::TooLarge)?;

        let cache = fs.cache();
        let mut reservation = Reservation::new(fs.allocator());
        let disk = DiskInode::build(tier, kind, length, parent, cache, &mut reservation)?;
        cache.write(sector, disk.as_block());
        reservation.commit();

        log::debug!("create {kind:?} inode {sector} ({tier:?}, {length} bytes)");
        Ok(())
    }

    /// 已打开则共享同一 inode，否则从磁盘读出描述符
    pub fn open(fs: &Arc<TierFileSystem>, sector: u32) -> Self {
        let mut table = fs.inodes().0.lock();
        if let Some(open) = table.get(&sector).and_then(Weak::upgrade) {
            return Self(open);
        }

        let disk = DiskInode::from_block(&fs.cache().read(sector));
        assert!(disk.is_valid(), "bad inode magic at sector {sector}");

        let open = Arc::new(OpenInode {
            sector,
            fs: fs.clone(),
            disk: Mutex::new(disk),
            grow: Mutex::new(()),
            layout: RwLock::new(()),
            removed: AtomicBool::new(false),
            deny_write: AtomicU32::new(0),
        });
        table.insert(sector, Arc::downgrade(&open));
        Self(open)
    }

    #[inline]
    pub fn reopen(&self) -> Self {
        self.clone()
    }

    #[inline]
    pub fn close(self) {}

    /// inode 号即描述符所在扇区
    #[inline]
    pub fn inumber(&self) -> u32 {
        self.0.sector
    }

    /// 共享此 inode 的句柄数
    #[inline]
    pub fn open_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// 标记删除，最后一个句柄关闭时回收
    pub fn remove(&self) {
        self.0.removed.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.0.removed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.disk.lock().length as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> InodeKind {
        self.0.disk.lock().kind()
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == InodeKind::Directory
    }

    pub fn tier(&self) -> Tier {
        self.0.disk.lock().tier()
    }

    /// 父目录的 inode 号
    pub fn parent(&self) -> u32 {
        self.0.disk.lock().parent
    }

    #[inline]
    pub fn fs(&self) -> &Arc<TierFileSystem> {
        &self.0.fs
    }

    /// 从 `offset` 处读取，文件末尾之后的部分不读，返回读出的字节数
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let _layout = self.0.layout.read();
        let disk = *self.0.disk.lock();
        let cache = self.0.fs.cache();
        let length = disk.length as usize;

        let mut done = 0;
        let mut pos = offset;
        while done < buf.len() && pos < length {
            let inner = pos % SECTOR_SIZE;
            let chunk = (length - pos)
                .min(SECTOR_SIZE - inner)
                .min(buf.len() - done);
            let sector = disk.sector_of(pos / SECTOR_SIZE, cache);
            cache.read_ahead_at(sector, inner, &mut buf[done..done + chunk]);

            done += chunk;
            pos += chunk;
        }
        done
    }

    /// 从 `offset` 处写入，必要时先扩容，返回写入的字节数。
    ///
    /// 禁止写入期间或扩容失败时返回 0。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        if buf.is_empty() || self.0.deny_write.load(Ordering::Acquire) > 0 {
            return 0;
        }

        let Some(end) = offset.checked_add(buf.len()) else {
            log::warn!(
                "inode {} cannot grow past {offset}: {}",
                self.inumber(),
                vfs::Error::TooLarge
            );
            return 0;
        };
        // 写完之前不放开扩容锁，读者不会看到尚未写入的新长度
        let _growing = if end > self.len() {
            let guard = self.0.grow.lock();
            if end > self.len() {
                if let Err(err) = self.expand(end) {
                    log::warn!("inode {} cannot grow to {end} bytes: {err}", self.inumber());
                    return 0;
                }
            }
            Some(guard)
        } else {
            None
        };

        let _layout = self.0.layout.read();
        let disk = *self.0.disk.lock();
        let cache = self.0.fs.cache();
        let length = disk.length as usize;

        let mut done = 0;
        let mut pos = offset;
        while done < buf.len() && pos < length {
            let inner = pos % SECTOR_SIZE;
            let chunk = (length - pos)
                .min(SECTOR_SIZE - inner)
                .min(buf.len() - done);
            let sector = disk.sector_of(pos / SECTOR_SIZE, cache);
            cache.write_at(sector, inner, &buf[done..done + chunk]);

            done += chunk;
            pos += chunk;
        }
        done
    }

    pub fn deny_write(&self) {
        self.0.deny_write.fetch_add(1, Ordering::AcqRel);
    }

    pub fn allow_write(&self) {
        let prev = self.0.deny_write.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "allow_write without deny_write");
    }

    pub fn stat(&self) -> Stat {
        let disk = *self.0.disk.lock();
        let mode = match disk.kind() {
            InodeKind::Directory => DirEntryType::Directory,
            InodeKind::File => DirEntryType::Regular,
        };

        Stat {
            mode,
            kind: StatKind::from(mode),
            inode: self.0.sector as u64,
            block_size: SECTOR_SIZE as u64,
            blocks: disk.tier().total_sectors(disk.sectors()) as u64,
            size: disk.length as u64,
        }
    }
}

impl Inode {
    /// 扩容到 `length` 字节，调用者持有扩容锁。
    ///
    /// 当前层级装得下就原地扩展；否则建好新层级的完整结构，
    /// 逐扇区拷贝旧内容，换上新描述符后归还旧结构。
    /// 拷贝到归还期间独占迁移锁，其他读写者不会再经旧结构访问扇区。
    fn expand(&self, length: usize) -> vfs::Result<()> {
        let fs = &self.0.fs;
        let cache = fs.cache();
        let old = *self.0.disk.lock();

        let new_sectors = length.div_ceil(SECTOR_SIZE);
        let fitting = Tier::fitting(new_sectors).ok_or(vfs::Error::TooLarge)?;
        let current = old.tier();
        // Small 的连续扇区段无法原地延长
        let target = if current == Tier::Small && new_sectors > old.sectors() {
            fitting.max(Tier::Large)
        } else {
            fitting.max(current)
        };

        let mut reservation = Reservation::new(fs.allocator());
        if target == current {
            let mut disk = old;
            disk.extend(length, cache, &mut reservation)?;
            cache.write(self.0.sector, disk.as_block());
            reservation.commit();
            *self.0.disk.lock() = disk;
            return Ok(());
        }

        let disk = DiskInode::build(target, old.kind(), length, old.parent, cache, &mut reservation)?;
        let _layout = self.0.layout.write();
        for index in 0..old.sectors() {
            let data = cache.read(old.sector_of(index, cache));
            cache.write(disk.sector_of(index, cache), &data);
        }
        cache.write(self.0.sector, disk.as_block());
        reservation.commit();
        *self.0.disk.lock() = disk;
        old.release(cache, fs.allocator());

        log::debug!(
            "inode {} moved from {current:?} to {target:?} ({length} bytes)",
            self.0.sector
        );
        Ok(())
    }
}

impl Drop for OpenInode {
    fn drop(&mut self) {
        {
            let mut table = self.fs.inodes().0.lock();
            // 同一扇区可能已被重新打开并登记了新的 inode
            if table
                .get(&self.sector)
                .is_some_and(|open| open.strong_count() == 0)
            {
                table.remove(&self.sector);
            }
        }

        if self.removed.load(Ordering::Acquire) {
            let disk = self.disk.get_mut();
            disk.release(self.fs.cache(), self.fs.allocator());
            self.fs.allocator().release(self.sector, 1);
            log::debug!("reclaimed inode {}", self.sector);
        }
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let disk = *self.0.disk.lock();
        f.debug_struct("Inode")
            .field("sector", &self.0.sector)
            .field("kind", &disk.kind())
            .field("tier", &disk.tier())
            .field("length", &disk.length)
            .field("open_count", &self.open_count())
            .finish()
    }
}
