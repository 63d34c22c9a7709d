//! 设备侧门面：注册 / 联系、状态回报、取消回报、确认与拒绝。

use std::sync::Arc;

use domain::{ActionStatus, TenantContext, now_epoch_ms};
use fota_storage::{ActionRecord, ActionStatusRecord, DeploymentRepository, NewTarget, TargetRecord};
use fota_telemetry::{record_action_canceled, record_status_update};
use tracing::{debug, info};

use crate::DeploymentError;
use crate::events::EventSink;
use crate::state_machine::{
    StatusReport, TransitionPlan, plan_cancel_feedback, plan_confirm, plan_deny, plan_status_update,
};
use crate::transition::{commit, committed_action, load_action, load_view};

/// 设备回报。`ts_ms` 为空时使用服务端当前时间。
#[derive(Debug, Clone)]
pub struct ActionStatusReport {
    pub status: ActionStatus,
    pub messages: Vec<String>,
    pub code: Option<i32>,
    pub ts_ms: Option<i64>,
}

impl ActionStatusReport {
    pub fn new(status: ActionStatus) -> Self {
        Self {
            status,
            messages: Vec::new(),
            code: None,
            ts_ms: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    fn into_report(self) -> StatusReport {
        StatusReport {
            status: self.status,
            messages: self.messages,
            code: self.code,
            ts_ms: self.ts_ms.unwrap_or_else(now_epoch_ms),
        }
    }
}

#[derive(Clone)]
pub struct ControllerManagement {
    repository: Arc<dyn DeploymentRepository>,
    events: Arc<dyn EventSink>,
}

impl ControllerManagement {
    pub fn new(repository: Arc<dyn DeploymentRepository>, events: Arc<dyn EventSink>) -> Self {
        Self { repository, events }
    }

    /// 查找 Target，不存在时注册；记录本次联系时间。
    pub async fn find_or_register_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<TargetRecord, DeploymentError> {
        if self.repository.find_target(ctx, controller_id).await?.is_none() {
            match self
                .repository
                .create_target(ctx, NewTarget::new(controller_id))
                .await
            {
                Ok(_) => info!(
                    target: "fota.deployment",
                    tenant_id = %ctx.tenant_id,
                    controller_id = %controller_id,
                    "target_registered"
                ),
                // 并发注册：另一方已创建
                Err(err) if err.is_conflict() => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.repository
            .mark_target_contacted(ctx, controller_id, now_epoch_ms())
            .await?
            .ok_or_else(|| DeploymentError::not_found("target", controller_id))
    }

    /// 设备应处理的活跃 Action（最早创建的）。
    pub async fn find_oldest_active_action(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Option<ActionRecord>, DeploymentError> {
        let actions = self
            .repository
            .find_active_actions_by_target(ctx, controller_id)
            .await?;
        Ok(actions.into_iter().min_by_key(|action| action.action_id))
    }

    pub async fn add_update_action_status(
        &self,
        ctx: &TenantContext,
        action_id: i64,
        report: ActionStatusReport,
    ) -> Result<ActionRecord, DeploymentError> {
        let action = load_action(self.repository.as_ref(), ctx, action_id).await?;
        let view = load_view(self.repository.as_ref(), ctx, &action.controller_id).await?;
        let history = self.history_if_canceling(ctx, &action).await?;
        let report = report.into_report();
        let plan = plan_status_update(&view, &action, &report, &history)?;
        let updated = self.commit_action(ctx, plan, action_id).await?;
        record_status_update();
        if updated.status == ActionStatus::Canceled && !updated.active {
            record_action_canceled();
        }
        debug!(
            target: "fota.deployment",
            tenant_id = %ctx.tenant_id,
            controller_id = %updated.controller_id,
            action_id = action_id,
            reported = %report.status,
            status = %updated.status,
            active = updated.active,
            "action_status_updated"
        );
        Ok(updated)
    }

    pub async fn add_cancel_action_status(
        &self,
        ctx: &TenantContext,
        action_id: i64,
        report: ActionStatusReport,
    ) -> Result<ActionRecord, DeploymentError> {
        let action = load_action(self.repository.as_ref(), ctx, action_id).await?;
        let view = load_view(self.repository.as_ref(), ctx, &action.controller_id).await?;
        let history = self.history_if_canceling(ctx, &action).await?;
        let report = report.into_report();
        let plan = plan_cancel_feedback(&view, &action, &report, &history)?;
        let updated = self.commit_action(ctx, plan, action_id).await?;
        record_status_update();
        if !updated.active {
            record_action_canceled();
        }
        info!(
            target: "fota.deployment",
            tenant_id = %ctx.tenant_id,
            controller_id = %updated.controller_id,
            action_id = action_id,
            reported = %report.status,
            status = %updated.status,
            "action_cancel_feedback"
        );
        Ok(updated)
    }

    pub async fn confirm_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
        messages: Vec<String>,
    ) -> Result<ActionRecord, DeploymentError> {
        let action = load_action(self.repository.as_ref(), ctx, action_id).await?;
        let view = load_view(self.repository.as_ref(), ctx, &action.controller_id).await?;
        let plan = plan_confirm(&view, &action, messages, now_epoch_ms())?;
        let updated = self.commit_action(ctx, plan, action_id).await?;
        info!(
            target: "fota.deployment",
            tenant_id = %ctx.tenant_id,
            controller_id = %updated.controller_id,
            action_id = action_id,
            actor = %ctx.user_id,
            "action_confirmed"
        );
        Ok(updated)
    }

    pub async fn deny_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
        messages: Vec<String>,
    ) -> Result<ActionRecord, DeploymentError> {
        let action = load_action(self.repository.as_ref(), ctx, action_id).await?;
        let view = load_view(self.repository.as_ref(), ctx, &action.controller_id).await?;
        let plan = plan_deny(&view, &action, messages, now_epoch_ms())?;
        let updated = self.commit_action(ctx, plan, action_id).await?;
        info!(
            target: "fota.deployment",
            tenant_id = %ctx.tenant_id,
            controller_id = %updated.controller_id,
            action_id = action_id,
            actor = %ctx.user_id,
            "action_denied"
        );
        Ok(updated)
    }

    async fn history_if_canceling(
        &self,
        ctx: &TenantContext,
        action: &ActionRecord,
    ) -> Result<Vec<ActionStatusRecord>, DeploymentError> {
        if action.status != ActionStatus::Canceling {
            return Ok(Vec::new());
        }
        Ok(self
            .repository
            .find_action_status_by_action(ctx, action.action_id)
            .await?)
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
