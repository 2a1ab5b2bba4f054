#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

/* tier-fs 的整体架构，自上而下 */

// 文件系统门面：按路径创建、打开、删除
mod fs;
mod file;

// 目录层：目录项、路径遍历以及路径缓存
mod dir;
mod dentry;
mod path;

// 索引节点层：分级索引的文件读写与扩容
mod inode;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;

// 空闲扇区分配接口
mod free_map;

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;

mod config;

#[cfg(test)]
mod test_util;

pub use self::{
    block_cache::BlockCache,
    config::Config,
    dentry::DentryStats,
    dir::Directory,
    file::File,
    free_map::{FreeMap, SectorAllocator},
    fs::{Node, TierFileSystem},
    inode::Inode,
    layout::{InodeKind, Tier},
    path::CanonPath,
};
pub use block_dev::BlockDevice;

/// 扇区大小，I/O 的基本单位
pub const SECTOR_SIZE: usize = 512;
/// inode 描述符的魔数
pub const INODE_MAGIC: u32 = 0x494e_4f44;
/// 空闲位图文件的 inode 所在扇区
pub const FREE_MAP_SECTOR: u32 = 0;
/// 根目录的 inode 所在扇区
pub const ROOT_DIR_SECTOR: u32 = 1;
/// 文件名最大长度（不含结尾的 `\0`）
pub const NAME_MAX: usize = 14;

type DataBlock = [u8; SECTOR_SIZE];
