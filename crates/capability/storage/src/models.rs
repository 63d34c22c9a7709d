//! 数据模型
//!
//! 定义所有存储相关的数据模型和写入结构：
//! - Target：TargetRecord, NewTarget, TargetMetadataUpdate
//! - 分发集：DistributionSetRecord, NewDistributionSet, DistributionSetDeletion
//! - Action：ActionRecord, ActionStatusRecord, ActionWithStatusCount, MaintenanceWindowSpec
//! - 单 Target 原子变更：TargetChange 及其组成部分，提交结果 CommittedChange

use domain::{ActionStatus, ActionType, AuditMetadata, TargetUpdateStatus};
use serde::{Deserialize, Serialize};

/// Target 记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub tenant_id: String,
    /// 租户内唯一的设备标识。
    pub controller_id: String,
    pub name: String,
    pub description: Option<String>,
    /// 当前期望状态（驱动中的分发集）。
    pub assigned_ds_id: Option<i64>,
    /// 最近一次确认安装成功的分发集。
    pub installed_ds_id: Option<i64>,
    pub install_date_ms: Option<i64>,
    pub update_status: TargetUpdateStatus,
    /// 设备最近一次联系服务端的时间。
    pub last_target_query_ms: Option<i64>,
    /// 乐观锁版本号（每次生命周期变更 +1）。
    pub revision: i64,
    pub audit: AuditMetadata,
}

/// Target 注册输入。
#[derive(Debug, Clone)]
pub struct NewTarget {
    pub controller_id: String,
    pub name: String,
    pub description: Option<String>,
}

impl NewTarget {
    pub fn new(controller_id: impl Into<String>) -> Self {
        let controller_id = controller_id.into();
        Self {
            name: controller_id.clone(),
            controller_id,
            description: None,
        }
    }
}

/// Target 元数据更新（不影响生命周期字段）。
#[derive(Debug, Clone, Default)]
pub struct TargetMetadataUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// 分发集记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSetRecord {
    pub tenant_id: String,
    pub ds_id: i64,
    pub name: String,
    pub version: String,
    pub type_key: String,
    /// 分发集类型要求的模块类型。
    pub required_module_types: Vec<String>,
    /// 已填充的模块类型。
    pub module_types: Vec<String>,
    pub complete: bool,
    pub deleted: bool,
    pub revision: i64,
    pub audit: AuditMetadata,
}

/// 分发集创建输入。
#[derive(Debug, Clone)]
pub struct NewDistributionSet {
    pub name: String,
    pub version: String,
    pub type_key: String,
    pub required_module_types: Vec<String>,
    pub module_types: Vec<String>,
}

/// 分发集删除方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionSetDeletion {
    /// 未被任何 Action 引用，物理删除。
    Hard,
    /// 已被 Action 引用，仅标记 deleted。
    Soft,
}

/// 所有要求的模块类型均已填充。
pub fn is_complete(required_module_types: &[String], module_types: &[String]) -> bool {
    required_module_types
        .iter()
        .all(|required| module_types.iter().any(|module| module == required))
}

/// 维护窗口定义（创建后不可变）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindowSpec {
    /// cron 表达式（含秒字段，可选年份字段）。
    pub schedule: String,
    /// `HH:mm:ss`
    pub duration: String,
    /// `±HH:mm` 或 `Z`
    pub timezone: String,
}

/// Action 记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub tenant_id: String,
    pub action_id: i64,
    pub controller_id: String,
    pub ds_id: i64,
    pub active: bool,
    pub status: ActionStatus,
    pub action_type: ActionType,
    pub forced_time_ms: Option<i64>,
    pub weight: Option<i32>,
    pub maintenance: Option<MaintenanceWindowSpec>,
    pub last_status_code: Option<i32>,
    pub rollout_id: Option<i64>,
    pub rollout_group_id: Option<i64>,
    pub initiated_by: String,
    pub revision: i64,
    pub audit: AuditMetadata,
}

/// Action 状态历史（只追加）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStatusRecord {
    pub tenant_id: String,
    pub status_id: i64,
    pub action_id: i64,
    pub status: ActionStatus,
    pub ts_ms: i64,
    pub messages: Vec<String>,
    pub code: Option<i32>,
}

/// Action 及其状态历史条数（管理面列表）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionWithStatusCount {
    pub action: ActionRecord,
    pub ds_name: String,
    pub ds_version: String,
    pub status_count: i64,
}

/// 新建 Action（ID 由存储分配）。
#[derive(Debug, Clone)]
pub struct NewAction {
    pub ds_id: i64,
    pub status: ActionStatus,
    pub action_type: ActionType,
    pub forced_time_ms: Option<i64>,
    pub weight: Option<i32>,
    pub maintenance: Option<MaintenanceWindowSpec>,
    pub rollout_id: Option<i64>,
    pub rollout_group_id: Option<i64>,
    pub initiated_by: String,
}

/// 对已有 Action 的整行状态写入（带版本校验）。
#[derive(Debug, Clone)]
pub struct ActionUpdate {
    pub action_id: i64,
    pub expected_revision: i64,
    pub status: ActionStatus,
    pub active: bool,
    pub action_type: ActionType,
    pub last_status_code: Option<i32>,
}

/// 状态历史条目指向的 Action。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRef {
    Existing(i64),
    /// 同一 TargetChange 中 `new_actions` 的下标。
    New(usize),
}

/// 待追加的状态历史条目。
#[derive(Debug, Clone)]
pub struct NewActionStatus {
    pub action_ref: ActionRef,
    pub status: ActionStatus,
    pub ts_ms: i64,
    pub messages: Vec<String>,
    pub code: Option<i32>,
}

/// Target 生命周期字段写入。
#[derive(Debug, Clone, PartialEq)]
pub struct TargetStateUpdate {
    pub assigned_ds_id: Option<i64>,
    pub installed_ds_id: Option<i64>,
    pub install_date_ms: Option<i64>,
    pub update_status: TargetUpdateStatus,
}

impl TargetStateUpdate {
    /// 以当前 Target 状态为基础。
    pub fn from_target(target: &TargetRecord) -> Self {
        Self {
            assigned_ds_id: target.assigned_ds_id,
            installed_ds_id: target.installed_ds_id,
            install_date_ms: target.install_date_ms,
            update_status: target.update_status,
        }
    }
}

/// 单个 Target 的原子变更。
///
/// Target 版本号总会被校验并 +1，即使 `target_update` 为空，
/// 以此串行化同一 Target 上的并发写入。
#[derive(Debug, Clone)]
pub struct TargetChange {
    pub controller_id: String,
    pub expected_revision: i64,
    pub target_update: Option<TargetStateUpdate>,
    pub new_actions: Vec<NewAction>,
    pub action_updates: Vec<ActionUpdate>,
    pub status_entries: Vec<NewActionStatus>,
}

impl TargetChange {
    pub fn new(target: &TargetRecord) -> Self {
        Self {
            controller_id: target.controller_id.clone(),
            expected_revision: target.revision,
            target_update: None,
            new_actions: Vec::new(),
            action_updates: Vec::new(),
            status_entries: Vec::new(),
        }
    }
}

/// 已提交的变更结果。
#[derive(Debug, Clone)]
pub struct CommittedChange {
    pub target: TargetRecord,
    /// 与 `new_actions` 同序。
    pub created_actions: Vec<ActionRecord>,
    /// 与 `action_updates` 同序。
    pub updated_actions: Vec<ActionRecord>,
}

impl CommittedChange {
    pub fn action(&self, action_id: i64) -> Option<&ActionRecord> {
        self.created_actions
            .iter()
            .chain(self.updated_actions.iter())
            .find(|action| action.action_id == action_id)
    }
}
