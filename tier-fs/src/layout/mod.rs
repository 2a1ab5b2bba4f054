//! # 磁盘数据结构层
//!
//! tier-fs 的磁盘布局：
//! 空闲位图 inode(扇区 0) | 根目录 inode(扇区 1) | 由分配器管理的其余扇区
//!
//! 每个 inode 描述符独占一个扇区，按 [`Tier`] 以三种方式索引数据扇区。

mod index;

mod inode;
pub use inode::{DiskInode, InodeKind, Tier};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::DirEntry;
