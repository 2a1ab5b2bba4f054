/// 存储引擎的运行参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// 块缓存的槽位数
    pub cache_capacity: usize,
}

impl Config {
    pub const DEFAULT_CACHE_CAPACITY: usize = 64;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_capacity: Self::DEFAULT_CACHE_CAPACITY,
        }
    }
}
