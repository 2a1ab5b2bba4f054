//! # 目录层
//!
//! 目录是内容为 [`DirEntry`] 数组的 inode。删除目录项只清除其使用标记，
//! 留下的空位供之后的新增复用。
//!
//! 目录层的一切操作都在文件系统唯一的目录锁下进行，
//! 路径缓存也由这把锁保护。

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use vfs::DirEntryType;

use crate::dentry::DentryCache;
use crate::layout::{DirEntry, InodeKind};
use crate::{CanonPath, Inode, NAME_MAX, ROOT_DIR_SECTOR, TierFileSystem};

#[derive(Debug)]
pub struct Directory {
    inode: Inode,
    /// readdir 游标，为目录文件内的字节偏移
    pos: usize,
}

impl Directory {
    /// 在 `sector` 上创建可容纳 `entries` 个目录项的空目录
    pub fn create(
        fs: &TierFileSystem,
        sector: u32,
        entries: usize,
        parent: u32,
    ) -> vfs::Result<()> {
        Inode::create(
            fs,
            sector,
            entries * DirEntry::SIZE,
            InodeKind::Directory,
            parent,
        )
    }

    pub fn open(inode: Inode) -> vfs::Result<Self> {
        if !inode.is_dir() {
            return Err(vfs::Error::NotADirectory);
        }
        Ok(Self { inode, pos: 0 })
    }

    pub fn open_root(fs: &Arc<TierFileSystem>) -> Self {
        Self {
            inode: Inode::open(fs, ROOT_DIR_SECTOR),
            pos: 0,
        }
    }

    /// 同一目录的新句柄，游标从头开始
    pub fn reopen(&self) -> Self {
        Self {
            inode: self.inode.reopen(),
            pos: 0,
        }
    }

    #[inline]
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    #[inline]
    pub fn into_inode(self) -> Inode {
        self.inode
    }

    #[inline]
    pub fn inumber(&self) -> u32 {
        self.inode.inumber()
    }

    /// 经父目录指针打开父目录，根目录的父目录是它自己
    pub fn parent(&self) -> Self {
        Self {
            inode: Inode::open(self.inode.fs(), self.inode.parent()),
            pos: 0,
        }
    }

    /// 按名字查找目录项，返回其 inode 号。
    ///
    /// 返回后目录项可能随即被删除，需要打开时用 [`Directory::open_entry`]。
    pub fn lookup(&self, name: &str) -> Option<u32> {
        let _dentries = self.lock();
        find(&self.inode, name).map(|(entry, _)| entry.inode_sector())
    }

    /// 查找并打开目录项。
    ///
    /// 打开与查找在同一把目录锁下完成，目录项不会在两者之间被删除回收。
    pub fn open_entry(&self, name: &str) -> vfs::Result<Inode> {
        let _dentries = self.lock();
        let (entry, _) = find(&self.inode, name).ok_or(vfs::Error::NotFound)?;
        Ok(Inode::open(self.inode.fs(), entry.inode_sector()))
    }

    /// 新增目录项 `name -> sector`，优先复用空位，否则追加到末尾。
    ///
    /// `path` 为新项的绝对路径时顺带登记路径缓存。
    pub fn add(
        &self,
        path: Option<&CanonPath>,
        name: &str,
        sector: u32,
        is_dir: bool,
    ) -> vfs::Result<()> {
        validate_name(name)?;

        let mut dentries = self.lock();
        if find(&self.inode, name).is_some() {
            return Err(vfs::Error::AlreadyExists);
        }

        let mut offset = 0;
        while let Some(entry) = read_entry(&self.inode, offset) {
            if !entry.in_use() {
                break;
            }
            offset += DirEntry::SIZE;
        }

        let entry = DirEntry::new(name, sector);
        if self.inode.write_at(offset, entry.as_bytes()) != DirEntry::SIZE {
            return Err(vfs::Error::NoSpace);
        }

        if let Some(path) = path {
            if is_dir {
                dentries.append(path, 0, sector);
            }
            dentries.append(path, 1, self.inumber());
        }
        Ok(())
    }

    /// 删除目录项并把目标 inode 标记为已删除。
    ///
    /// 根目录、非空目录以及仍被别处打开的目录不可删除。
    pub fn remove(&self, name: &str) -> vfs::Result<()> {
        let mut dentries = self.lock();
        let (mut entry, offset) = find(&self.inode, name).ok_or(vfs::Error::NotFound)?;

        let inode = Inode::open(self.inode.fs(), entry.inode_sector());
        if inode.is_dir() {
            if inode.inumber() == ROOT_DIR_SECTOR {
                return Err(vfs::Error::Busy);
            }
            if any_in_use(&inode) {
                return Err(vfs::Error::DirectoryNotEmpty);
            }
            // 除了这里刚打开的一份
            if inode.open_count() > 1 {
                return Err(vfs::Error::Busy);
            }
        }

        let stale = dentries.invalidate(inode.inumber());
        log::trace!("remove {name}, {stale} dentries dropped");

        entry.set_unused();
        assert_eq!(
            self.inode.write_at(offset, entry.as_bytes()),
            DirEntry::SIZE
        );
        inode.remove();
        Ok(())
    }

    /// 返回下一个在用目录项的名字，读完返回`None`
    pub fn readdir(&mut self) -> Option<String> {
        let _dentries = self.inode.fs().dirs().lock();
        while let Some(entry) = read_entry(&self.inode, self.pos) {
            self.pos += DirEntry::SIZE;
            if entry.in_use() {
                return Some(entry.name().to_string());
            }
        }
        None
    }

    /// 全部在用目录项，不影响 readdir 游标
    pub fn entries(&self) -> Vec<vfs::DirEntry> {
        let _dentries = self.lock();
        let fs = self.inode.fs();

        let mut entries = Vec::new();
        let mut offset = 0;
        while let Some(entry) = read_entry(&self.inode, offset) {
            offset += DirEntry::SIZE;
            if !entry.in_use() {
                continue;
            }
            let ty = if Inode::open(fs, entry.inode_sector()).is_dir() {
                DirEntryType::Directory
            } else {
                DirEntryType::Regular
            };
            entries.push(vfs::DirEntry {
                inode: entry.inode_sector() as u64,
                ty,
                name: entry.name().to_string(),
            });
        }
        entries
    }

    pub fn is_empty(&self) -> bool {
        let _dentries = self.lock();
        !any_in_use(&self.inode)
    }

    /// 打开路径所在的目录：`leaf_is_dir` 为真时打开末项本身，否则打开末项的父目录。
    ///
    /// 绝对路径从根目录出发并利用路径缓存，相对路径从 `cwd`
    /// （缺省为根目录）出发。
    pub fn open_path(
        fs: &Arc<TierFileSystem>,
        path: &CanonPath,
        leaf_is_dir: bool,
        cwd: Option<&Directory>,
    ) -> vfs::Result<Self> {
        let walk = match (leaf_is_dir, path.len()) {
            (true, len) => len,
            (false, 0) => return Err(vfs::Error::InvalidPath),
            (false, len) => len - 1,
        };

        let mut dentries = fs.dirs().lock();

        let (mut current, start) = if path.is_absolute() {
            if leaf_is_dir {
                if let Some(inumber) = dentries.query(path, 0) {
                    return Self::open(Inode::open(fs, inumber));
                }
            }
            match dentries.query(path, 1) {
                Some(inumber) => (Self::open(Inode::open(fs, inumber))?, path.len() - 1),
                None => (Self::open_root(fs), 0),
            }
        } else {
            let cwd = cwd.map_or_else(|| Self::open_root(fs), Self::reopen);
            (cwd, 0)
        };

        for token in path.tokens().take(walk).skip(start) {
            current = if token == ".." {
                current.parent()
            } else {
                let (entry, _) = find(&current.inode, token).ok_or(vfs::Error::NotFound)?;
                Self::open(Inode::open(fs, entry.inode_sector()))?
            };
        }

        if path.is_absolute() {
            cache_resolved(&mut dentries, path, leaf_is_dir, &current);
        }
        Ok(current)
    }
}

impl Directory {
    #[inline]
    fn lock(&self) -> spin::MutexGuard<'_, DentryCache> {
        self.inode.fs().dirs().lock()
    }
}

/// 名字不能为空、不能超长、不能含`/`或`\0`，也不能是`.`或`..`
pub(crate) fn validate_name(name: &str) -> vfs::Result<()> {
    if name.is_empty()
        || name.len() > NAME_MAX
        || name.contains(['/', '\0'])
        || name == "."
        || name == ".."
    {
        return Err(vfs::Error::InvalidName);
    }
    Ok(())
}

fn read_entry(inode: &Inode, offset: usize) -> Option<DirEntry> {
    let mut entry = DirEntry::default();
    (inode.read_at(offset, entry.as_bytes_mut()) == DirEntry::SIZE).then_some(entry)
}

/// 在目录中查找在用的同名项，返回该项及其偏移
fn find(dir: &Inode, name: &str) -> Option<(DirEntry, usize)> {
    let mut offset = 0;
    while let Some(entry) = read_entry(dir, offset) {
        if entry.in_use() && entry.name() == name {
            return Some((entry, offset));
        }
        offset += DirEntry::SIZE;
    }
    None
}

fn any_in_use(dir: &Inode) -> bool {
    let mut offset = 0;
    while let Some(entry) = read_entry(dir, offset) {
        if entry.in_use() {
            return true;
        }
        offset += DirEntry::SIZE;
    }
    false
}

fn cache_resolved(
    dentries: &mut DentryCache,
    path: &CanonPath,
    leaf_is_dir: bool,
    resolved: &Directory,
) {
    if leaf_is_dir {
        dentries.append(path, 0, resolved.inumber());
        dentries.append(path, 1, resolved.inode.parent());
    } else {
        dentries.append(path, 1, resolved.inumber());
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::test_util;
    use crate::{FreeMap, SectorAllocator};

    fn mkdir(fs: &Arc<TierFileSystem>, map: &FreeMap, parent: &Directory, name: &str) -> Directory {
        let sector = map.allocate(1).unwrap();
        Directory::create(fs, sector, 4, parent.inumber()).unwrap();
        parent.add(None, name, sector, true).unwrap();
        Directory::open(Inode::open(fs, sector)).unwrap()
    }

    fn touch(fs: &Arc<TierFileSystem>, map: &FreeMap, parent: &Directory, name: &str) -> u32 {
        let sector = map.allocate(1).unwrap();
        Inode::create(fs, sector, 0, InodeKind::File, parent.inumber()).unwrap();
        parent.add(None, name, sector, false).unwrap();
        sector
    }

    #[test]
    fn add_then_lookup() {
        let (fs, map) = test_util::format(256);
        let root = Directory::open_root(&fs);
        let sector = touch(&fs, &map, &root, "a");

        assert_eq!(root.lookup("a"), Some(sector));
        assert_eq!(root.lookup("b"), None);
        assert_eq!(
            root.add(None, "a", sector, false),
            Err(vfs::Error::AlreadyExists)
        );
    }

    #[test]
    fn bad_names_are_rejected() {
        let (fs, _) = test_util::format(256);
        let root = Directory::open_root(&fs);
        for name in ["", ".", "..", "a/b", "a\0b", "fifteen-chars!!"] {
            assert_eq!(root.add(None, name, 9, false), Err(vfs::Error::InvalidName));
        }
        assert!(root.is_empty());
    }

    #[test]
    fn opened_entry_outlives_removal() {
        let (fs, map) = test_util::format(256);
        let root = Directory::open_root(&fs);
        let sector = touch(&fs, &map, &root, "f");

        let inode = root.open_entry("f").unwrap();
        assert_eq!(inode.write_at(0, b"old"), 3);
        root.remove("f").unwrap();
        assert_eq!(root.open_entry("f").unwrap_err(), vfs::Error::NotFound);

        // 仍被打开的描述符扇区不会分给新文件
        let other = touch(&fs, &map, &root, "g");
        assert_ne!(other, sector);
        assert!(map.is_allocated(sector));
        let mut buf = [0; 3];
        assert_eq!(inode.read_at(0, &mut buf), 3);
        assert_eq!(&buf, b"old");

        drop(inode);
        assert!(!map.is_allocated(sector));
        assert_eq!(Inode::open(&fs, other).len(), 0);
    }

    #[test]
    fn tombstones_are_reused() {
        let (fs, map) = test_util::format(256);
        let root = Directory::open_root(&fs);
        touch(&fs, &map, &root, "a");
        touch(&fs, &map, &root, "b");
        let length = root.inode().len();

        root.remove("a").unwrap();
        assert_eq!(root.lookup("a"), None);
        touch(&fs, &map, &root, "c");
        assert_eq!(root.inode().len(), length);

        let mut root = root;
        assert_eq!(root.readdir().as_deref(), Some("c"));
        assert_eq!(root.readdir().as_deref(), Some("b"));
        assert_eq!(root.readdir(), None);
    }

    #[test]
    fn directory_grows_past_initial_capacity() {
        let (fs, map) = test_util::format(512);
        let root = Directory::open_root(&fs);
        let dir = mkdir(&fs, &map, &root, "d");

        let names: Vec<_> = (0..40).map(|i| alloc::format!("f{i}")).collect();
        for name in &names {
            touch(&fs, &map, &dir, name);
        }

        let mut listed: Vec<_> = dir.entries().into_iter().map(|e| e.name).collect();
        listed.sort();
        let mut expected = names.clone();
        expected.sort();
        assert_eq!(listed, expected);
        assert!(dir.inode().len() >= 40 * DirEntry::SIZE);
    }

    #[test]
    fn removal_rules_for_directories() {
        let (fs, map) = test_util::format(256);
        let root = Directory::open_root(&fs);
        let dir = mkdir(&fs, &map, &root, "d");
        touch(&fs, &map, &dir, "f");

        assert_eq!(root.remove("d"), Err(vfs::Error::DirectoryNotEmpty));
        dir.remove("f").unwrap();

        // 仍被打开
        assert_eq!(root.remove("d"), Err(vfs::Error::Busy));
        drop(dir);
        root.remove("d").unwrap();
        assert_eq!(root.lookup("d"), None);
        assert_eq!(root.remove("d"), Err(vfs::Error::NotFound));
    }

    #[test]
    fn root_cannot_be_removed() {
        let (fs, _) = test_util::format(256);
        let root = Directory::open_root(&fs);
        // 根目录以自身名义挂在自己下面
        root.add(None, "self", ROOT_DIR_SECTOR, true).unwrap();
        assert_eq!(root.remove("self"), Err(vfs::Error::Busy));
    }

    #[test]
    fn entries_report_kinds() {
        let (fs, map) = test_util::format(256);
        let root = Directory::open_root(&fs);
        let file = touch(&fs, &map, &root, "file");
        let dir = mkdir(&fs, &map, &root, "dir");

        let entries = root.entries();
        assert_eq!(
            entries,
            vec![
                vfs::DirEntry {
                    inode: file as u64,
                    ty: DirEntryType::Regular,
                    name: "file".to_string(),
                },
                vfs::DirEntry {
                    inode: dir.inumber() as u64,
                    ty: DirEntryType::Directory,
                    name: "dir".to_string(),
                },
            ]
        );
    }

    #[test]
    fn walk_follows_parent_pointers() {
        let (fs, map) = test_util::format(256);
        let root = Directory::open_root(&fs);
        let a = mkdir(&fs, &map, &root, "a");
        let b = mkdir(&fs, &map, &a, "b");

        let path = CanonPath::parse("/a/b").unwrap();
        let found = Directory::open_path(&fs, &path, true, None).unwrap();
        assert_eq!(found.inumber(), b.inumber());

        let parent = Directory::open_path(&fs, &path, false, None).unwrap();
        assert_eq!(parent.inumber(), a.inumber());

        // 相对路径开头的 .. 从当前目录沿父目录指针上行
        let up = CanonPath::parse("../..").unwrap();
        let top = Directory::open_path(&fs, &up, true, Some(&b)).unwrap();
        assert_eq!(top.inumber(), ROOT_DIR_SECTOR);

        let sibling = CanonPath::parse("../b").unwrap();
        let found = Directory::open_path(&fs, &sibling, true, Some(&b)).unwrap();
        assert_eq!(found.inumber(), b.inumber());

        let missing = CanonPath::parse("/a/x/y").unwrap();
        assert_eq!(
            Directory::open_path(&fs, &missing, false, None).unwrap_err(),
            vfs::Error::NotFound
        );
    }

    #[test]
    fn file_in_the_middle_of_a_path() {
        let (fs, map) = test_util::format(256);
        let root = Directory::open_root(&fs);
        touch(&fs, &map, &root, "f");

        let path = CanonPath::parse("/f/x").unwrap();
        assert_eq!(
            Directory::open_path(&fs, &path, false, None).unwrap_err(),
            vfs::Error::NotADirectory
        );
    }

    #[test]
    fn absolute_walks_fill_the_dentry_cache() {
        let (fs, map) = test_util::format(256);
        let root = Directory::open_root(&fs);
        let a = mkdir(&fs, &map, &root, "a");
        let b = mkdir(&fs, &map, &a, "b");

        let path = CanonPath::parse("/a/b").unwrap();
        Directory::open_path(&fs, &path, true, None).unwrap();
        let misses = fs.dentry_stats().misses;

        let again = Directory::open_path(&fs, &path, true, None).unwrap();
        assert_eq!(again.inumber(), b.inumber());
        let stats = fs.dentry_stats();
        assert_eq!(stats.misses, misses);
        assert_eq!(stats.hits, 1);

        // 父目录命中后仍要走完末项
        fs.dirs().lock().invalidate(b.inumber());
        let found = Directory::open_path(&fs, &path, true, None).unwrap();
        assert_eq!(found.inumber(), b.inumber());

        drop((found, again, b));
        a.remove("b").unwrap();
        assert_eq!(fs.dirs().lock().query(&path, 0), None);
    }
}
