//! # 路径缓存
//!
//! 绝对路径（或去掉末尾若干项后的前缀）到 inode 扇区号的映射。
//! 自身不加锁，由目录层的全局锁保护。

use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::CanonPath;

#[derive(Debug, Default)]
pub struct DentryCache {
    entries: BTreeMap<String, u32>,
    hits: u64,
    misses: u64,
}

/// 路径缓存的统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DentryStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl DentryCache {
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// 查询 `path` 去掉末尾 `outer` 项之后的前缀
    pub fn query(&mut self, path: &CanonPath, outer: usize) -> Option<u32> {
        let found = path
            .serialize(outer)
            .and_then(|key| self.entries.get(&key).copied());
        match found {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        found
    }

    pub fn append(&mut self, path: &CanonPath, outer: usize, inumber: u32) {
        if let Some(key) = path.serialize(outer) {
            log::trace!("dentry {key} -> {inumber}");
            self.entries.insert(key, inumber);
        }
    }

    /// 删除指向 `inumber` 的所有键，返回删除的条数
    pub fn invalidate(&mut self, inumber: u32) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, &mut sector| sector != inumber);
        before - self.entries.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> DentryStats {
        DentryStats {
            entries: self.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_and_parent_keys() {
        let mut cache = DentryCache::new();
        let path = CanonPath::parse("/a/b/c").unwrap();
        cache.append(&path, 0, 30);
        cache.append(&path, 1, 20);

        assert_eq!(cache.query(&path, 0), Some(30));
        assert_eq!(cache.query(&path, 1), Some(20));
        assert_eq!(cache.query(&path, 2), None);
        assert_eq!(
            cache.stats(),
            DentryStats {
                entries: 2,
                hits: 2,
                misses: 1
            }
        );
    }

    #[test]
    fn invalidate_removes_every_key_of_an_inode() {
        let mut cache = DentryCache::new();
        let deep = CanonPath::parse("/x/y").unwrap();
        let other = CanonPath::parse("/x/../z/y").unwrap();
        cache.append(&deep, 0, 9);
        cache.append(&other, 0, 9);
        cache.append(&deep, 1, 4);

        assert_eq!(cache.invalidate(9), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.query(&deep, 0), None);
        assert_eq!(cache.query(&deep, 1), Some(4));
    }

    #[test]
    fn relative_paths_are_never_cached() {
        let mut cache = DentryCache::new();
        let path = CanonPath::parse("a/b").unwrap();
        cache.append(&path, 0, 5);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.query(&path, 0), None);
    }
}
