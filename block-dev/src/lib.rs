//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 设备读写总是同步完成，驱动自身无法恢复的I/O错误直接 panic。

#![no_std]

use core::any::Any;
use core::fmt::Debug;

/// 块设备驱动特质
pub trait BlockDevice: Debug + Send + Sync + Any {
    /// 读出一整块到 `buf`，`buf` 的长度即块大小
    fn read_block(&self, block_id: usize, buf: &mut [u8]);

    /// 把 `buf` 写入一整块
    fn write_block(&self, block_id: usize, buf: &[u8]);

    /// 设备总块数
    fn num_blocks(&self) -> usize;
}
