//! 管理侧门面：分配、取消、强制退出、强制类型与查询。
//!
//! 查询直接读取仓储，不做缓存。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domain::{ActionStatus, TenantContext, now_epoch_ms};
use fota_storage::{
    ActionRecord, ActionStatusRecord, ActionWithStatusCount, DeploymentRepository,
    DistributionSetRecord, TargetChange, TargetRecord, TargetStateUpdate,
};
use fota_telemetry::{record_action_canceled, record_cancel_requested, record_force_quit};
use tracing::info;

use crate::coordinator::{AssignmentRequest, AssignmentResult, TargetAssignmentCoordinator};
use crate::events::EventSink;
use crate::maintenance::{MaintenanceSchedule, MaintenanceWindow, is_window_available};
use crate::state_machine::{
    TransitionPlan, plan_cancel, plan_force_quit, plan_force_type,
};
use crate::status::derive_update_status;
use crate::transition::{commit, committed_action, load_action, load_view};
use crate::{DeploymentConfig, DeploymentError};

/// Action 及其关联实体（一次性加载）。
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDetails {
    pub action: ActionRecord,
    pub distribution_set: DistributionSetRecord,
    pub target: TargetRecord,
    pub assigned_distribution_set: Option<DistributionSetRecord>,
}

#[derive(Clone)]
pub struct DeploymentManagement {
    repository: Arc<dyn DeploymentRepository>,
    events: Arc<dyn EventSink>,
    coordinator: TargetAssignmentCoordinator,
}

impl DeploymentManagement {
    pub fn new(repository: Arc<dyn DeploymentRepository>, events: Arc<dyn EventSink>) -> Self {
        Self::new_with_config(repository, events, DeploymentConfig::default())
    }

    pub fn new_with_config(
        repository: Arc<dyn DeploymentRepository>,
        events: Arc<dyn EventSink>,
        config: DeploymentConfig,
    ) -> Self {
        let coordinator =
            TargetAssignmentCoordinator::new_with_config(repository.clone(), events.clone(), config);
        Self {
            repository,
            events,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &TargetAssignmentCoordinator {
        &self.coordinator
    }

    pub async fn assign_distribution_set(
        &self,
        ctx: &TenantContext,
        request: AssignmentRequest,
    ) -> Result<AssignmentResult, DeploymentError> {
        self.coordinator.assign(ctx, request).await
    }

    /// 取消 Action：未下发立即 CANCELED，否则进入 CANCELING。
    pub async fn cancel_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
    ) -> Result<ActionRecord, DeploymentError> {
        let action = load_action(self.repository.as_ref(), ctx, action_id).await?;
        let view = load_view(self.repository.as_ref(), ctx, &action.controller_id).await?;
        let plan = plan_cancel(&view, &action, now_epoch_ms())?;
        let updated = self.commit_action(ctx, plan, action_id).await?;
        if updated.status == ActionStatus::Canceled {
            record_action_canceled();
        } else {
            record_cancel_requested();
        }
        info!(
            target: "fota.deployment",
            tenant_id = %ctx.tenant_id,
            controller_id = %updated.controller_id,
            action_id = action_id,
            status = %updated.status,
            actor = %ctx.user_id,
            "action_canceled"
        );
        Ok(updated)
    }

    /// 强制退出 CANCELING 中的 Action。
    pub async fn force_quit_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
    ) -> Result<ActionRecord, DeploymentError> {
        let action = load_action(self.repository.as_ref(), ctx, action_id).await?;
        let view = load_view(self.repository.as_ref(), ctx, &action.controller_id).await?;
        let plan = plan_force_quit(&view, &action, now_epoch_ms())?;
        let updated = self.commit_action(ctx, plan, action_id).await?;
        record_force_quit();
        record_action_canceled();
        info!(
            target: "fota.deployment",
            tenant_id = %ctx.tenant_id,
            controller_id = %updated.controller_id,
            action_id = action_id,
            actor = %ctx.user_id,
            "action_force_quit"
        );
        Ok(updated)
    }

    /// SOFT → FORCED；其他情况原样返回。
    pub async fn force_target_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
    ) -> Result<ActionRecord, DeploymentError> {
        let action = load_action(self.repository.as_ref(), ctx, action_id).await?;
        let view = load_view(self.repository.as_ref(), ctx, &action.controller_id).await?;
        let Some(plan) = plan_force_type(&view, &action) else {
            return Ok(action);
        };
        let updated = self.commit_action(ctx, plan, action_id).await?;
        info!(
            target: "fota.deployment",
            tenant_id = %ctx.tenant_id,
            controller_id = %updated.controller_id,
            action_id = action_id,
            "action_forced"
        );
        Ok(updated)
    }

    pub async fn find_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
    ) -> Result<Option<ActionRecord>, DeploymentError> {
        Ok(self.repository.find_action(ctx, action_id).await?)
    }

    /// 按 action_id 倒序。
    pub async fn find_actions_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionRecord>, DeploymentError> {
        Ok(self.repository.find_actions_by_target(ctx, controller_id).await?)
    }

    pub async fn find_active_actions_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionRecord>, DeploymentError> {
        Ok(self
            .repository
            .find_active_actions_by_target(ctx, controller_id)
            .await?)
    }

    pub async fn find_inactive_actions_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionRecord>, DeploymentError> {
        let mut actions = self.find_actions_by_target(ctx, controller_id).await?;
        actions.retain(|action| !action.active);
        Ok(actions)
    }

    pub async fn find_actions_with_status_count_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionWithStatusCount>, DeploymentError> {
        Ok(self
            .repository
            .find_actions_with_status_count_by_target(ctx, controller_id)
            .await?)
    }

    /// 状态历史（正序）；Action 不存在时返回 EntityNotFound。
    pub async fn find_action_status_by_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
    ) -> Result<Vec<ActionStatusRecord>, DeploymentError> {
        load_action(self.repository.as_ref(), ctx, action_id).await?;
        Ok(self
            .repository
            .find_action_status_by_action(ctx, action_id)
            .await?)
    }

    pub async fn find_action_with_details(
        &self,
        ctx: &TenantContext,
        action_id: i64,
    ) -> Result<ActionDetails, DeploymentError> {
        let action = load_action(self.repository.as_ref(), ctx, action_id).await?;
        let target = self
            .repository
            .find_target(ctx, &action.controller_id)
            .await?
            .ok_or_else(|| DeploymentError::not_found("target", &action.controller_id))?;

        let mut ds_ids = vec![action.ds_id];
        ds_ids.extend(target.assigned_ds_id);
        let sets = self.repository.find_distribution_sets(ctx, &ds_ids).await?;
        let find = |ds_id: i64| sets.iter().find(|ds| ds.ds_id == ds_id).cloned();

        let distribution_set = find(action.ds_id)
            .ok_or_else(|| DeploymentError::not_found("distribution set", action.ds_id))?;
        let assigned_distribution_set = target.assigned_ds_id.and_then(find);
        Ok(ActionDetails {
            action,
            distribution_set,
            target,
            assigned_distribution_set,
        })
    }

    /// Action 当前是否可以执行（无维护窗口时总是可以）。
    pub async fn is_maintenance_window_available(
        &self,
        ctx: &TenantContext,
        action_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, DeploymentError> {
        let action = load_action(self.repository.as_ref(), ctx, action_id).await?;
        Ok(is_window_available(action.maintenance.as_ref(), now)?)
    }

    /// 当前或下一个维护窗口；无窗口定义或已过期时为 None。
    pub async fn maintenance_window(
        &self,
        ctx: &TenantContext,
        action_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<MaintenanceWindow>, DeploymentError> {
        let action = load_action(self.repository.as_ref(), ctx, action_id).await?;
        let Some(spec) = action.maintenance.as_ref() else {
            return Ok(None);
        };
        Ok(MaintenanceSchedule::from_spec(spec)?.current_or_next_window(now))
    }

    /// 按 Action 历史重新计算 Target 更新状态，结果不同时写回。
    pub async fn recalculate_target_status(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<TargetRecord, DeploymentError> {
        let view = load_view(self.repository.as_ref(), ctx, controller_id).await?;
        let last_terminated = self
            .repository
            .find_last_terminated_action(ctx, controller_id)
            .await?;
        let target = &view.target;
        let status = derive_update_status(
            !view.active_actions.is_empty(),
            last_terminated.as_ref(),
            target.assigned_ds_id,
            target.installed_ds_id,
            target.last_target_query_ms.is_some(),
        );
        if status == target.update_status {
            return Ok(view.target);
        }

        let mut change = TargetChange::new(target);
        let mut state = TargetStateUpdate::from_target(target);
        state.update_status = status;
        change.target_update = Some(state);
        let plan = TransitionPlan {
            change,
            events: Vec::new(),
        };
        let committed = commit(self.repository.as_ref(), self.events.as_ref(), ctx, plan).await?;
        info!(
            target: "fota.deployment",
            tenant_id = %ctx.tenant_id,
            controller_id = %controller_id,
            update_status = %status,
            "target_status_recalculated"
        );
        Ok(committed.target)
    }

    async fn commit_action(
        &self,
        ctx: &TenantContext,
        plan: TransitionPlan,
        action_id: i64,
    ) -> Result<ActionRecord, DeploymentError> {
        let committed = commit(self.repository.as_ref(), self.events.as_ref(), ctx, plan).await?;
        committed_action(&committed, action_id)
    }
}
