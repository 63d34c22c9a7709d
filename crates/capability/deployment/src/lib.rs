//! # FOTA Deployment 模块
//!
//! 分发集到 Target 的分配、Action 生命周期状态机与维护窗口。
//!
//! ## 组成
//!
//! - `maintenance`：维护窗口计算（cron + 时长 + 固定时区偏移）
//! - `state_machine`：纯函数的状态流转规划，输出单 Target 原子变更
//! - `status`：Target 派生状态（assigned / installed / update_status）
//! - `coordinator`：批量分配（分块、取代旧 Action、逐 Target 失败隔离）
//! - `management`：管理侧门面（分配、取消、强制退出、强制类型、查询）
//! - `controller`：设备侧门面（状态回报、取消回报、确认 / 拒绝）
//! - `events`：部署事件与事件出口
//! - `bootstrap`：按配置装配运行时
//!
//! ## 并发约束
//!
//! 所有写入都经由 `ActionStore::apply_target_changes`，按 Target 版本号做乐观校验。
//! 冲突以 `DeploymentError::ConcurrentModification` 返回，核心内部不自动重试。
//! 事件只在提交成功后发布。

pub mod bootstrap;
pub mod controller;
pub mod coordinator;
pub mod events;
pub mod maintenance;
pub mod management;
pub mod state_machine;
pub mod status;

mod transition;

use domain::{ActionStatus, DomainError};
use fota_config::DeploymentSettings;
use fota_storage::{StorageError, StorageErrorKind};

pub use bootstrap::{DeploymentRuntime, RepositoryBackend};
pub use controller::{ActionStatusReport, ControllerManagement};
pub use coordinator::{
    AssignmentFailure, AssignmentRequest, AssignmentResult, FailedTarget,
    TargetAssignmentCoordinator,
};
pub use events::{
    BroadcastEventSink, DeploymentEvent, EventSink, InMemoryEventSink, NoopEventSink,
    TracingEventSink,
};
pub use fota_config::SupersedeMode;
pub use maintenance::{MaintenanceError, MaintenanceSchedule, MaintenanceWindow};
pub use management::{ActionDetails, DeploymentManagement};

/// 权重允许的范围。
pub const WEIGHT_MIN: i32 = 0;
pub const WEIGHT_MAX: i32 = 1000;

/// 部署引擎错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeploymentError {
    #[error("distribution set {0} is incomplete")]
    IncompleteDistributionSet(i64),
    #[error("distribution set {0} is deleted")]
    DistributionSetDeleted(i64),
    #[error("action {action_id} cannot be force quit in status {status}")]
    ForceQuitActionNotAllowed { action_id: i64, status: ActionStatus },
    #[error("action {action_id} cannot be canceled: {reason}")]
    CancelActionNotAllowed { action_id: i64, reason: String },
    #[error("action {action_id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        action_id: i64,
        from: ActionStatus,
        to: ActionStatus,
    },
    #[error("action {0} is not active")]
    ActionNotActive(i64),
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: &'static str, id: String },
    #[error("invalid maintenance schedule: {0}")]
    InvalidMaintenanceSchedule(String),
    #[error("invalid weight: {0}")]
    InvalidWeight(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl DeploymentError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DeploymentError::EntityNotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DeploymentError::ConcurrentModification(_))
    }
}

impl From<StorageError> for DeploymentError {
    fn from(err: StorageError) -> Self {
        match err.kind() {
            StorageErrorKind::Conflict => DeploymentError::ConcurrentModification(err.message().to_string()),
            StorageErrorKind::NotFound => DeploymentError::EntityNotFound {
                entity: "record",
                id: err.message().to_string(),
            },
            StorageErrorKind::Invalid | StorageErrorKind::Backend => {
                DeploymentError::Storage(err.to_string())
            }
        }
    }
}

impl From<MaintenanceError> for DeploymentError {
    fn from(err: MaintenanceError) -> Self {
        DeploymentError::InvalidMaintenanceSchedule(err.to_string())
    }
}

impl From<DomainError> for DeploymentError {
    fn from(err: DomainError) -> Self {
        DeploymentError::Configuration(err.to_string())
    }
}

/// 部署引擎运行参数。
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    /// 单个子事务处理的最大 Target 数。
    pub max_entries_in_statement: usize,
    /// 每个 Target 的 Action 总数上限，0 表示不限制。
    pub max_actions_per_target: u64,
    pub supersede_mode: SupersedeMode,
    pub weight_required: bool,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self::from(&DeploymentSettings::default())
    }
}

impl From<&DeploymentSettings> for DeploymentConfig {
    fn from(settings: &DeploymentSettings) -> Self {
        Self {
            max_entries_in_statement: settings.max_entries_in_statement.max(1),
            max_actions_per_target: settings.max_actions_per_target,
            supersede_mode: settings.supersede_mode,
            weight_required: settings.weight_required,
        }
    }
}
