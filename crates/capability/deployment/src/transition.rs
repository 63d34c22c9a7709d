//! 单 Target 状态流转的加载与提交（管理侧与设备侧共用）。

use domain::TenantContext;
use fota_storage::{ActionRecord, CommittedChange, DeploymentRepository, StorageError};
use fota_telemetry::record_optimistic_conflict;
use tracing::warn;

use crate::DeploymentError;
use crate::events::{EventSink, publish_all, resolve_events};
use crate::state_machine::{TargetView, TransitionPlan};

pub(crate) async fn load_action(
    repository: &dyn DeploymentRepository,
    ctx: &TenantContext,
    action_id: i64,
) -> Result<ActionRecord, DeploymentError> {
    repository
        .find_action(ctx, action_id)
        .await?
        .ok_or_else(|| DeploymentError::not_found("action", action_id))
}

pub(crate) async fn load_view(
    repository: &dyn DeploymentRepository,
    ctx: &TenantContext,
    controller_id: &str,
) -> Result<TargetView, DeploymentError> {
    let target = repository
        .find_target(ctx, controller_id)
        .await?
        .ok_or_else(|| DeploymentError::not_found("target", controller_id))?;
    let active_actions = repository
        .find_active_actions_by_target(ctx, controller_id)
        .await?;
    Ok(TargetView::new(target, active_actions))
}

/// 提交单 Target 变更；成功后发布事件。
pub(crate) async fn commit(
    repository: &dyn DeploymentRepository,
    sink: &dyn EventSink,
    ctx: &TenantContext,
    plan: TransitionPlan,
) -> Result<CommittedChange, DeploymentError> {
    let TransitionPlan { change, events } = plan;
    let controller_id = change.controller_id.clone();
    let committed = repository
        .apply_target_changes(ctx, vec![change])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::new("empty commit result"))?;
    let committed = match committed {
        Ok(committed) => committed,
        Err(err) => {
            if err.is_conflict() {
                record_optimistic_conflict();
                warn!(
                    target: "fota.deployment",
                    tenant_id = %ctx.tenant_id,
                    controller_id = %controller_id,
                    error = %err,
                    "target_change_conflict"
                );
            }
            return Err(err.into());
        }
    };
    publish_all(sink, &resolve_events(&committed, &events));
    Ok(committed)
}

/// 提交结果中指定 Action 的最新状态。
pub(crate) fn committed_action(
    committed: &CommittedChange,
    action_id: i64,
) -> Result<ActionRecord, DeploymentError> {
    committed
        .action(action_id)
        .cloned()
        .ok_or_else(|| DeploymentError::not_found("action", action_id))
}
