//! 存储层错误类型
//!
//! 统一封装底层错误，并区分调用方需要分别处理的几类：
//! - Conflict：乐观锁版本冲突 / 唯一键冲突
//! - NotFound：引用的实体不存在
//! - Invalid：数据不一致或非法参数
//! - Backend：连接、SQL 执行等基础设施错误

use domain::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Conflict,
    NotFound,
    Invalid,
    Backend,
}

#[derive(Debug, Clone)]
pub struct StorageError {
    kind: StorageErrorKind,
    message: String,
}

impl StorageError {
    /// 基础设施错误。
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(StorageErrorKind::Backend, message)
    }

    pub fn with_kind(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::with_kind(StorageErrorKind::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_kind(StorageErrorKind::NotFound, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::with_kind(StorageErrorKind::Invalid, message)
    }

    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == StorageErrorKind::Conflict
    }

    /// 仅影响单个 Target 的错误（批量处理时不应中断其余 Target）。
    pub fn is_target_scoped(&self) -> bool {
        self.kind != StorageErrorKind::Backend
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StorageError {}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::conflict(db_err.message().to_string());
            }
            if db_err.is_foreign_key_violation() {
                return Self::not_found(db_err.message().to_string());
            }
        }
        Self::new(err.to_string())
    }
}

impl From<DomainError> for StorageError {
    fn from(err: DomainError) -> Self {
        Self::invalid(err.to_string())
    }
}
