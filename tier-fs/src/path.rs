use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

/// 规范化后的路径：不含空项与`.`，`..`已尽可能与前项抵消。
///
/// 相对路径中无法抵消的`..`保留在开头，留待从当前目录出发时
/// 经父目录指针解析。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonPath {
    tokens: Vec<String>,
    absolute: bool,
}

impl CanonPath {
    /// 空字符串不是合法路径。
    pub fn parse(text: &str) -> vfs::Result<Self> {
        if text.is_empty() {
            return Err(vfs::Error::InvalidPath);
        }

        let absolute = text.starts_with('/');
        let mut tokens: Vec<String> = Vec::new();

        for cmp in text.split('/') {
            match cmp {
                "" | "." => (),
                ".." => match tokens.last().map(String::as_str) {
                    Some("..") | None if !absolute => tokens.push("..".to_string()),
                    Some(_) => {
                        tokens.pop();
                    }
                    // 根目录的父目录还是根目录
                    None => (),
                },
                s => tokens.push(s.to_string()),
            }
        }

        Ok(Self { tokens, absolute })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// 空的绝对路径即根目录，空的相对路径即当前目录
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[inline]
    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    /// 最后一项
    #[inline]
    pub fn leaf(&self) -> Option<&str> {
        self.tokens.last().map(String::as_str)
    }

    #[inline]
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// 去掉末尾 `outer` 项后拼成绝对路径字符串，作为路径缓存的键。
    ///
    /// 相对路径以及剩余部分为根目录时返回`None`。
    pub fn serialize(&self, outer: usize) -> Option<String> {
        if !self.absolute || self.tokens.len() <= outer {
            return None;
        }

        let mut key = String::new();
        for token in &self.tokens[..self.tokens.len() - outer] {
            key.push('/');
            key.push_str(token);
        }
        Some(key)
    }
}

impl fmt::Display for CanonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.absolute, self.tokens.is_empty()) {
            (true, true) => f.write_str("/"),
            (false, true) => f.write_str("."),
            (absolute, false) => {
                for (i, token) in self.tokens.iter().enumerate() {
                    if absolute || i > 0 {
                        f.write_str("/")?;
                    }
                    f.write_str(token)?;
                }
                Ok(())
            }
        }
    }
}
