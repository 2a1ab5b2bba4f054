use core::{ptr, slice};

use crate::NAME_MAX;

/// 目录文件中的一条记录
#[derive(Debug, Default, Clone)]
#[repr(C)]
pub struct DirEntry {
    inode_sector: u32,
    // 最后一字节留给 \0
    name: [u8; NAME_MAX + 1],
    in_use: u8,
}

impl DirEntry {
    /// 记录大小恒为20字节
    pub const SIZE: usize = 20;

    /// 调用者保证 `name` 不超过 [`NAME_MAX`] 字节
    #[inline]
    pub fn new(name: &str, inode_sector: u32) -> Self {
        let bytes = name.as_bytes();
        let mut raw = [0; NAME_MAX + 1];
        raw[..bytes.len()].copy_from_slice(bytes);

        Self {
            inode_sector,
            name: raw,
            in_use: 1,
        }
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_MAX);
        // 名字只会由 &str 写入
        core::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    #[inline]
    pub fn inode_sector(&self) -> u32 {
        self.inode_sector
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.in_use != 0
    }

    #[inline]
    pub fn set_unused(&mut self) {
        self.in_use = 0;
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}

const _: () = assert!(core::mem::size_of::<DirEntry>() == DirEntry::SIZE);
