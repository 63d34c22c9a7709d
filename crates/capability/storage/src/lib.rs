//! # FOTA Storage 模块
//!
//! 部署引擎的仓储抽象层，支持内存与 PostgreSQL 两种后端。
//!
//! ## 架构设计
//!
//! 1. **接口抽象层** (`traits.rs`)：TargetStore / DistributionSetStore / ActionStore
//! 2. **数据模型层** (`models.rs`)：实体记录与单 Target 原子变更（`TargetChange`）
//! 3. **错误处理层** (`error.rs`)：带分类的 `StorageError`
//! 4. **验证辅助层** (`validation.rs`)：租户校验
//! 5. **连接管理层** (`connection.rs`)：数据库连接池
//! 6. **实现层**：
//!    - `in_memory/`：共享一把 `RwLock` 的内存仓储（测试、无数据库部署）
//!    - `postgres/`：PostgreSQL 仓储（每个 Target 一个 savepoint）
//!
//! ## 并发约束
//!
//! Target 与 Action 都带 `revision`。所有生命周期写入都经由
//! `ActionStore::apply_target_changes` 按 Target 提交：版本不一致返回
//! `StorageErrorKind::Conflict`，不会覆盖并发写入。调用方决定是否重试。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use fota_storage::{InMemoryRepository, NewTarget, TargetStore};
//! use domain::TenantContext;
//!
//! let repository = InMemoryRepository::new();
//! let ctx = TenantContext::new("tenant-1", "admin");
//! let target = repository.create_target(&ctx, NewTarget::new("4712")).await?;
//! ```

pub mod connection;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod traits;
pub mod validation;

pub use connection::*;
pub use error::*;
pub use models::*;
pub use traits::*;
pub use validation::*;

pub use in_memory::InMemoryRepository;
pub use postgres::PgRepository;
