//! # 文件系统门面
//!
//! 持有块缓存、扇区分配器、打开表与目录锁，
//! 并提供按路径创建、打开、删除的操作。

use alloc::sync::Arc;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::dentry::{DentryCache, DentryStats};
use crate::dir::{self, Directory};
use crate::inode::InodeTable;
use crate::layout::{DiskInode, InodeKind};
use crate::{BlockCache, CanonPath, Config, File, Inode, SectorAllocator};
use crate::{FREE_MAP_SECTOR, ROOT_DIR_SECTOR};

/// 根目录初始可容纳的目录项数
const ROOT_DIR_ENTRIES: usize = 16;
/// 新建目录初始可容纳的目录项数
const DIR_ENTRIES: usize = 10;

#[derive(Debug)]
pub struct TierFileSystem {
    cache: BlockCache,
    allocator: Arc<dyn SectorAllocator>,
    inodes: InodeTable,
    /// 目录锁
    dirs: Mutex<DentryCache>,
}

/// 按路径打开的结果
#[derive(Debug)]
pub enum Node {
    File(File),
    Dir(Directory),
}

impl TierFileSystem {
    fn new(
        device: Arc<dyn BlockDevice>,
        allocator: Arc<dyn SectorAllocator>,
        config: Config,
    ) -> Self {
        Self {
            cache: BlockCache::new(device, config.cache_capacity),
            allocator,
            inodes: InodeTable::new(),
            dirs: Mutex::new(DentryCache::new()),
        }
    }

    /// 在设备上建立空文件系统。
    ///
    /// `allocator` 须已把空闲位图与根目录的扇区视为占用。
    pub fn format(
        device: Arc<dyn BlockDevice>,
        allocator: Arc<dyn SectorAllocator>,
        config: Config,
    ) -> vfs::Result<Arc<Self>> {
        let fs = Self::new(device, allocator, config);

        Inode::create(&fs, FREE_MAP_SECTOR, 0, InodeKind::File, ROOT_DIR_SECTOR)?;
        Directory::create(&fs, ROOT_DIR_SECTOR, ROOT_DIR_ENTRIES, ROOT_DIR_SECTOR)?;
        fs.cache.sync();

        log::info!(
            "formatted {} sectors",
            fs.cache.device().num_blocks()
        );
        Ok(Arc::new(fs))
    }

    /// 挂载已有的文件系统，根目录描述符无效时拒绝
    pub fn mount(
        device: Arc<dyn BlockDevice>,
        allocator: Arc<dyn SectorAllocator>,
        config: Config,
    ) -> vfs::Result<Arc<Self>> {
        let fs = Self::new(device, allocator, config);

        let root = DiskInode::from_block(&fs.cache.read(ROOT_DIR_SECTOR));
        if !root.is_valid() || !root.is_dir() {
            log::error!("sector {ROOT_DIR_SECTOR} holds no root directory");
            return Err(vfs::Error::Unsupported);
        }

        Ok(Arc::new(fs))
    }

    /// 按路径创建文件或目录，`length` 对目录无效
    pub fn create(
        self: &Arc<Self>,
        path: &str,
        length: usize,
        is_dir: bool,
        cwd: Option<&Directory>,
    ) -> vfs::Result<()> {
        let cpath = CanonPath::parse(path)?;
        // `/`、`.`、`..` 等
        let name = cpath.leaf().ok_or(vfs::Error::AlreadyExists)?;
        dir::validate_name(name)?;

        let parent = Directory::open_path(self, &cpath, false, cwd)?;
        let sector = self.allocator.allocate(1).ok_or(vfs::Error::NoSpace)?;

        let created = if is_dir {
            Directory::create(self, sector, DIR_ENTRIES, parent.inumber())
        } else {
            Inode::create(self, sector, length, InodeKind::File, parent.inumber())
        };
        if let Err(err) = created {
            self.allocator.release(sector, 1);
            return Err(err);
        }

        if let Err(err) = parent.add(Some(&cpath), name, sector, is_dir) {
            // 经删除流程归还描述符与数据扇区
            let orphan = Inode::open(self, sector);
            orphan.remove();
            return Err(err);
        }

        log::debug!("created {cpath}");
        Ok(())
    }

    /// 按路径打开。`allow_dir` 为假时拒绝打开目录。
    pub fn open(
        self: &Arc<Self>,
        path: &str,
        allow_dir: bool,
        cwd: Option<&Directory>,
    ) -> vfs::Result<Node> {
        let cpath = CanonPath::parse(path)?;

        let inode = match cpath.leaf() {
            None if cpath.is_absolute() => self.root().into_inode(),
            None => cwd
                .map_or_else(|| self.root(), Directory::reopen)
                .into_inode(),
            Some("..") => Directory::open_path(self, &cpath, true, cwd)?.into_inode(),
            Some(name) => Directory::open_path(self, &cpath, false, cwd)?.open_entry(name)?,
        };

        if !inode.is_dir() {
            return Ok(Node::File(File::new(inode)));
        }
        if !allow_dir {
            return Err(vfs::Error::IsADirectory);
        }
        Directory::open(inode).map(Node::Dir)
    }

    /// 按路径删除，inode 在最后一个句柄关闭时回收
    pub fn remove(self: &Arc<Self>, path: &str, cwd: Option<&Directory>) -> vfs::Result<()> {
        let cpath = CanonPath::parse(path)?;
        let name = match cpath.leaf() {
            None if cpath.is_absolute() => return Err(vfs::Error::Busy),
            None | Some("..") => return Err(vfs::Error::InvalidName),
            Some(name) => name,
        };

        let parent = Directory::open_path(self, &cpath, false, cwd)?;
        parent.remove(name)?;

        log::debug!("removed {cpath}");
        Ok(())
    }

    #[inline]
    pub fn root(self: &Arc<Self>) -> Directory {
        Directory::open_root(self)
    }

    /// 把块缓存中的脏扇区全部写回
    pub fn sync(&self) {
        self.cache.sync();
    }

    #[inline]
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn dentry_stats(&self) -> DentryStats {
        self.dirs.lock().stats()
    }

    /// 处于打开状态的 inode 数
    pub fn open_inodes(&self) -> usize {
        self.inodes.len()
    }
}

impl TierFileSystem {
    #[inline]
    pub(crate) fn allocator(&self) -> &dyn SectorAllocator {
        self.allocator.as_ref()
    }

    #[inline]
    pub(crate) fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    #[inline]
    pub(crate) fn dirs(&self) -> &Mutex<DentryCache> {
        &self.dirs
    }
}
