//! 枚举与持久化整数编码之间的双向映射。
//!
//! 每个枚举的编码表在首次使用时构建一次：
//! - 两个枚举值映射到同一编码时构建失败（fail fast）
//! - 解码未知编码返回错误，不做任何兜底转换

use std::collections::HashMap;
use std::fmt;

use crate::action::{ActionStatus, ActionType};
use crate::target::TargetUpdateStatus;

/// 领域值解析错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("duplicate {kind} code {code}: {first} and {second}")]
    DuplicateCode {
        kind: &'static str,
        code: i32,
        first: String,
        second: String,
    },
    #[error("unknown {kind} code: {code}")]
    UnknownCode { kind: &'static str, code: i32 },
    #[error("unknown {kind} name: {name}")]
    UnknownName { kind: &'static str, name: String },
}

/// 编码 → 枚举值的反向表。
#[derive(Debug, Clone)]
pub struct CodeMap<T> {
    kind: &'static str,
    by_code: HashMap<i32, T>,
}

impl<T: Copy + fmt::Debug> CodeMap<T> {
    /// 由全部枚举值及其编码函数构建映射，检测重复编码。
    pub fn build(
        kind: &'static str,
        values: &[T],
        code_of: impl Fn(T) -> i32,
    ) -> Result<Self, DomainError> {
        let mut by_code = HashMap::with_capacity(values.len());
        for value in values {
            let code = code_of(*value);
            if let Some(existing) = by_code.insert(code, *value) {
                return Err(DomainError::DuplicateCode {
                    kind,
                    code,
                    first: format!("{:?}", existing),
                    second: format!("{:?}", value),
                });
            }
        }
        Ok(Self { kind, by_code })
    }

    pub fn decode(&self, code: i32) -> Result<T, DomainError> {
        self.by_code
            .get(&code)
            .copied()
            .ok_or(DomainError::UnknownCode {
                kind: self.kind,
                code,
            })
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

/// 启动时校验所有编码表（任一重复即返回错误）。
pub fn validate_code_maps() -> Result<(), DomainError> {
    ActionStatus::code_map()?;
    ActionType::code_map()?;
    TargetUpdateStatus::code_map()?;
    Ok(())
}

/// 名称规范化：大小写不敏感，`-` 与空格视作 `_`。
pub(crate) fn normalize_name(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Color {
        Red,
        Green,
    }

    #[test]
    fn duplicate_codes_fail_fast() {
        let err = CodeMap::build("color", &[Color::Red, Color::Green], |_| 7)
            .expect_err("duplicate");
        assert!(matches!(err, DomainError::DuplicateCode { code: 7, .. }));
    }

    #[test]
    fn unknown_code_is_rejected() {
        let map = CodeMap::build("color", &[Color::Red, Color::Green], |c| match c {
            Color::Red => 0,
            Color::Green => 1,
        })
        .expect("map");
        assert_eq!(map.decode(1).expect("green"), Color::Green);
        assert_eq!(
            map.decode(2).expect_err("unknown"),
            DomainError::UnknownCode {
                kind: "color",
                code: 2
            }
        );
    }

    #[test]
    fn builtin_code_maps_are_bijective() {
        validate_code_maps().expect("valid");
    }
}
