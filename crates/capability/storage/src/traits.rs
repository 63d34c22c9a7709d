//! 存储接口 Trait 定义
//!
//! - TargetStore：Target 注册、查询、删除（级联）
//! - DistributionSetStore：分发集
//! - ActionStore：Action、状态历史，以及按 Target 原子提交的变更
//! - DeploymentRepository：以上三者的组合，部署引擎只依赖它
//!
//! 设计原则：
//! - 所有接口显式接收 TenantContext
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发

use std::collections::HashMap;

use crate::error::StorageError;
use crate::models::{
    ActionRecord, ActionStatusRecord, ActionWithStatusCount, CommittedChange,
    DistributionSetDeletion, DistributionSetRecord, NewDistributionSet, NewTarget, TargetChange,
    TargetMetadataUpdate, TargetRecord,
};
use async_trait::async_trait;
use domain::TenantContext;

/// Target 存储接口
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// 注册 Target（controller_id 重复返回 Conflict）
    async fn create_target(
        &self,
        ctx: &TenantContext,
        target: NewTarget,
    ) -> Result<TargetRecord, StorageError>;

    async fn find_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Option<TargetRecord>, StorageError>;

    /// 批量查找（调用方负责控制 IN 子句大小）
    async fn find_targets(
        &self,
        ctx: &TenantContext,
        controller_ids: &[String],
    ) -> Result<Vec<TargetRecord>, StorageError>;

    async fn update_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
        update: TargetMetadataUpdate,
    ) -> Result<Option<TargetRecord>, StorageError>;

    /// 记录设备联系时间（UNKNOWN 目标转为 REGISTERED），不改变版本号
    async fn mark_target_contacted(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
        at_ms: i64,
    ) -> Result<Option<TargetRecord>, StorageError>;

    /// 删除 Target 及其全部 Action 和状态历史
    async fn delete_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<bool, StorageError>;
}

/// 分发集存储接口
#[async_trait]
pub trait DistributionSetStore: Send + Sync {
    async fn create_distribution_set(
        &self,
        ctx: &TenantContext,
        record: NewDistributionSet,
    ) -> Result<DistributionSetRecord, StorageError>;

    async fn find_distribution_set(
        &self,
        ctx: &TenantContext,
        ds_id: i64,
    ) -> Result<Option<DistributionSetRecord>, StorageError>;

    async fn find_distribution_sets(
        &self,
        ctx: &TenantContext,
        ds_ids: &[i64],
    ) -> Result<Vec<DistributionSetRecord>, StorageError>;

    /// 替换模块类型并重新计算 complete（已被引用的分发集不可修改）
    async fn set_modules(
        &self,
        ctx: &TenantContext,
        ds_id: i64,
        module_types: Vec<String>,
    ) -> Result<Option<DistributionSetRecord>, StorageError>;

    /// 删除分发集（被 Action 引用时软删除）
    async fn delete_distribution_set(
        &self,
        ctx: &TenantContext,
        ds_id: i64,
    ) -> Result<Option<DistributionSetDeletion>, StorageError>;
}

/// Action 存储接口
#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn find_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
    ) -> Result<Option<ActionRecord>, StorageError>;

    /// 按 action_id 倒序
    async fn find_actions_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionRecord>, StorageError>;

    /// 按 action_id 正序
    async fn find_active_actions_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionRecord>, StorageError>;

    async fn find_active_actions_by_targets(
        &self,
        ctx: &TenantContext,
        controller_ids: &[String],
    ) -> Result<Vec<ActionRecord>, StorageError>;

    /// 每个 Target 的 Action 总数（无 Action 的 Target 不出现在结果中）
    async fn count_actions_by_targets(
        &self,
        ctx: &TenantContext,
        controller_ids: &[String],
    ) -> Result<HashMap<String, u64>, StorageError>;

    /// 按 action_id 倒序
    async fn find_actions_with_status_count_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionWithStatusCount>, StorageError>;

    /// 按 status_id 正序
    async fn find_action_status_by_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
    ) -> Result<Vec<ActionStatusRecord>, StorageError>;

    /// 最近一次结束的 Action
    async fn find_last_terminated_action(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Option<ActionRecord>, StorageError>;

    /// 按 Target 原子提交变更。
    ///
    /// 外层 Err 表示基础设施故障，本次调用不提交任何变更；
    /// 内层 Err 仅影响对应 Target（版本冲突、Target 不存在等），其余 Target 照常提交。
    async fn apply_target_changes(
        &self,
        ctx: &TenantContext,
        changes: Vec<TargetChange>,
    ) -> Result<Vec<Result<CommittedChange, StorageError>>, StorageError>;
}

/// 部署引擎使用的组合仓储
pub trait DeploymentRepository: TargetStore + DistributionSetStore + ActionStore {}

impl<T> DeploymentRepository for T where T: TargetStore + DistributionSetStore + ActionStore {}
