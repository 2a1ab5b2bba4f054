use enumflags2::bitflags;

use crate::DirEntryType;

#[derive(Debug)]
#[repr(C, align(32))]
pub struct Stat {
    pub mode: DirEntryType,
    pub kind: StatKind,
    /// Inode number
    pub inode: u64,
    /// Optimal I/O block size
    pub block_size: u64,
    /// Occupying blocks
    pub blocks: u64,
    /// File size
    pub size: u64,
}

#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatKind {
    DIR = 0o040000,
    #[default]
    FILE = 0o100000,
}

impl From<DirEntryType> for StatKind {
    #[inline]
    fn from(ty: DirEntryType) -> Self {
        match ty {
            DirEntryType::Directory => Self::DIR,
            _ => Self::FILE,
        }
    }
}
