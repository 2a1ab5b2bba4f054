use derive_more::Display;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[display(fmt = "no such file or directory")]
    NotFound,
    #[display(fmt = "entry already exists")]
    AlreadyExists,
    #[display(fmt = "not a directory")]
    NotADirectory,
    #[display(fmt = "is a directory")]
    IsADirectory,
    #[display(fmt = "directory not empty")]
    DirectoryNotEmpty,
    /// 根目录，或仍被他人打开的目录
    #[display(fmt = "resource busy")]
    Busy,
    #[display(fmt = "invalid file name")]
    InvalidName,
    #[display(fmt = "invalid path")]
    InvalidPath,
    /// 空闲扇区不足
    #[display(fmt = "no space left on device")]
    NoSpace,
    /// 超出最大层级所能容纳的大小
    #[display(fmt = "file too large")]
    TooLarge,
    #[display(fmt = "operation not supported")]
    Unsupported,
}
