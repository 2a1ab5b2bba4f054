use vfs::Stat;

use crate::Inode;

/// 带读写位置的文件句柄
#[derive(Debug)]
pub struct File {
    inode: Inode,
    pos: usize,
    /// 本句柄是否禁止了写入
    denied: bool,
}

impl File {
    pub fn new(inode: Inode) -> Self {
        Self {
            inode,
            pos: 0,
            denied: false,
        }
    }

    /// 同一 inode 的新句柄，位置从头开始
    pub fn reopen(&self) -> Self {
        Self::new(self.inode.reopen())
    }

    #[inline]
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// 从当前位置读取并前移
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let read = self.inode.read_at(self.pos, buf);
        self.pos += read;
        read
    }

    /// 在当前位置写入并前移
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let written = self.inode.write_at(self.pos, buf);
        self.pos += written;
        written
    }

    #[inline]
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.inode.read_at(offset, buf)
    }

    #[inline]
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        self.inode.write_at(offset, buf)
    }

    /// 位置可以越过文件末尾，之后的写入会扩容
    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inode.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inode.is_empty()
    }

    /// 禁止一切句柄写入此文件，直到本句柄允许或关闭
    pub fn deny_write(&mut self) {
        if !self.denied {
            self.denied = true;
            self.inode.deny_write();
        }
    }

    pub fn allow_write(&mut self) {
        if self.denied {
            self.denied = false;
            self.inode.allow_write();
        }
    }

    #[inline]
    pub fn stat(&self) -> Stat {
        self.inode.stat()
    }

    #[inline]
    pub fn inumber(&self) -> u32 {
        self.inode.inumber()
    }
}

impl Drop for File {
    fn drop(&mut self) {
        self.allow_write();
    }
}

#[cfg(test)]
mod tests {
    use vfs::StatKind;

    use crate::test_util;
    use crate::{Node, SECTOR_SIZE};

    fn open(fs: &alloc::sync::Arc<crate::TierFileSystem>, path: &str) -> super::File {
        match fs.open(path, false, None).unwrap() {
            Node::File(file) => file,
            Node::Dir(_) => panic!("{path} is a directory"),
        }
    }

    #[test]
    fn position_advances() {
        let (fs, _) = test_util::format(256);
        fs.create("/f", 0, false, None).unwrap();
        let mut file = open(&fs, "/f");

        assert_eq!(file.write(b"hello "), 6);
        assert_eq!(file.write(b"world"), 5);
        assert_eq!(file.tell(), 11);

        file.seek(6);
        let mut buf = [0; 16];
        assert_eq!(file.read(&mut buf), 5);
        assert_eq!(&buf[..5], b"world");
        assert_eq!(file.read(&mut buf), 0);
    }

    #[test]
    fn seek_past_end_then_write_grows() {
        let (fs, _) = test_util::format(256);
        fs.create("/f", 0, false, None).unwrap();
        let mut file = open(&fs, "/f");

        file.seek(3 * SECTOR_SIZE);
        assert_eq!(file.write(b"x"), 1);
        assert_eq!(file.len(), 3 * SECTOR_SIZE + 1);

        let mut buf = [0xff; 8];
        assert_eq!(file.read_at(SECTOR_SIZE, &mut buf), 8);
        assert_eq!(buf, [0; 8]);
    }

    #[test]
    fn write_at_the_far_end_of_the_offset_range() {
        let (fs, _) = test_util::format(256);
        fs.create("/f", 0, false, None).unwrap();
        let mut file = open(&fs, "/f");

        file.seek(usize::MAX - 1);
        assert_eq!(file.write(b"abc"), 0);
        assert_eq!(file.tell(), usize::MAX - 1);
        assert!(file.is_empty());
    }

    #[test]
    fn deny_write_is_per_handle() {
        let (fs, _) = test_util::format(256);
        fs.create("/exe", 16, false, None).unwrap();
        let mut running = open(&fs, "/exe");
        let mut other = open(&fs, "/exe");

        running.deny_write();
        running.deny_write();
        assert_eq!(other.write(b"patch"), 0);

        other.deny_write();
        running.allow_write();
        assert_eq!(running.write_at(0, b"patch"), 0);

        drop(other);
        assert_eq!(running.write_at(0, b"patch"), 5);
    }

    #[test]
    fn stat_of_file() {
        let (fs, _) = test_util::format(256);
        fs.create("/f", 1000, false, None).unwrap();
        let file = open(&fs, "/f");

        let stat = file.stat();
        assert_eq!(stat.kind, StatKind::FILE);
        assert_eq!(stat.size, 1000);
        assert_eq!(stat.inode, file.inumber() as u64);
        assert_eq!(stat.blocks, 2);
        assert!(!file.is_empty());
    }
}
