//! Action 状态机。
//!
//! 每个规划函数只读取某个 Target 的当前快照，输出一个 `TargetChange`
//! 和提交后要发布的事件，本身不做任何 IO。提交由调用方经
//! `ActionStore::apply_target_changes` 完成，版本号冲突时整个变更不生效。
//!
//! 规则概要：
//! - 设备回报只能追加到活跃 Action；SCHEDULED / CANCELING / WAIT_FOR_CONFIRMATION
//!   不能由设备回报，等待确认的 Action 只能经确认 / 拒绝流转
//! - FINISHED / ERROR 结束 Action；DOWNLOAD_ONLY 的 DOWNLOADED 也结束 Action
//! - CANCELED / CANCEL_REJECTED 只在 CANCELING 时有效
//! - 未下发的 Action 取消立即生效，已下发的进入 CANCELING 等待设备确认
//! - 强制退出只允许在 CANCELING 时执行

use domain::{ActionStatus, ActionType, TargetUpdateStatus};
use fota_config::SupersedeMode;
use fota_storage::{
    ActionRecord, ActionRef, ActionStatusRecord, ActionUpdate, NewAction, NewActionStatus,
    TargetChange, TargetRecord, TargetStateUpdate,
};

use crate::DeploymentError;
use crate::events::PlannedEvent;
use crate::status::{Termination, state_after_termination};

pub const MSG_SUPERSEDED: &str = "canceled by new assignment";
pub const MSG_SUPERSEDE_REQUESTED: &str = "cancel requested by new assignment";
pub const MSG_CANCELED_BEFORE_DISPATCH: &str = "canceled before dispatch";
pub const MSG_CANCEL_REQUESTED: &str = "cancel requested";
pub const MSG_FORCE_QUIT: &str = "canceled by force quit";
pub const MSG_CONFIRMED: &str = "assignment confirmed";
pub const MSG_DENIED: &str = "assignment denied";

/// 某个 Target 的当前快照。
#[derive(Debug, Clone)]
pub struct TargetView {
    pub target: TargetRecord,
    /// 按 action_id 正序。
    pub active_actions: Vec<ActionRecord>,
}

impl TargetView {
    pub fn new(target: TargetRecord, mut active_actions: Vec<ActionRecord>) -> Self {
        active_actions.retain(|action| action.active);
        active_actions.sort_by_key(|action| action.action_id);
        Self {
            target,
            active_actions,
        }
    }

    /// 除指定 Action 外仍活跃的 Action。
    fn remaining_active(&self, action_id: i64) -> Vec<&ActionRecord> {
        self.active_actions
            .iter()
            .filter(|action| action.action_id != action_id)
            .collect()
    }
}

/// 待提交的单 Target 变更与提交后发布的事件。
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub change: TargetChange,
    pub events: Vec<PlannedEvent>,
}

impl TransitionPlan {
    fn new(target: &TargetRecord) -> Self {
        Self {
            change: TargetChange::new(target),
            events: Vec::new(),
        }
    }

    fn update_action(&mut self, action: &ActionRecord, status: ActionStatus, active: bool) {
        self.update_action_with(action, status, active, action.action_type, action.last_status_code);
    }

    fn update_action_with(
        &mut self,
        action: &ActionRecord,
        status: ActionStatus,
        active: bool,
        action_type: ActionType,
        last_status_code: Option<i32>,
    ) {
        self.change.action_updates.push(ActionUpdate {
            action_id: action.action_id,
            expected_revision: action.revision,
            status,
            active,
            action_type,
            last_status_code,
        });
        self.events.push(PlannedEvent::Updated(action.action_id));
    }

    fn append_status(
        &mut self,
        action_ref: ActionRef,
        status: ActionStatus,
        ts_ms: i64,
        messages: Vec<String>,
        code: Option<i32>,
    ) {
        self.change.status_entries.push(NewActionStatus {
            action_ref,
            status,
            ts_ms,
            messages,
            code,
        });
    }

    /// 本次变更取代（或请求取消）的旧 Action 数。
    pub fn superseded_count(&self) -> usize {
        self.change.action_updates.len()
    }
}

/// 设备状态回报。
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: ActionStatus,
    pub messages: Vec<String>,
    pub code: Option<i32>,
    pub ts_ms: i64,
}

/// 新建 Action 的初始状态。
pub fn initial_status(confirmation_required: bool) -> ActionStatus {
    if confirmation_required {
        ActionStatus::WaitForConfirmation
    } else {
        ActionStatus::Scheduled
    }
}

/// 分配：新建 Action，并取代该 Target 上所有其他活跃 Action。
pub fn plan_assignment(
    view: &TargetView,
    new_action: NewAction,
    mode: SupersedeMode,
    now_ms: i64,
) -> TransitionPlan {
    let mut plan = TransitionPlan::new(&view.target);

    for old in &view.active_actions {
        let cancel_now = mode == SupersedeMode::Immediate || old.status.is_undispatched();
        if cancel_now {
            plan.update_action(old, ActionStatus::Canceled, false);
            plan.append_status(
                ActionRef::Existing(old.action_id),
                ActionStatus::Canceled,
                now_ms,
                vec![MSG_SUPERSEDED.to_string()],
                None,
            );
        } else if old.status != ActionStatus::Canceling {
            plan.update_action(old, ActionStatus::Canceling, true);
            plan.append_status(
                ActionRef::Existing(old.action_id),
                ActionStatus::Canceling,
                now_ms,
                vec![MSG_SUPERSEDE_REQUESTED.to_string()],
                None,
            );
        } else {
            continue;
        }
        plan.events.push(PlannedEvent::CancelRequested(old.action_id));
    }

    plan.append_status(ActionRef::New(0), new_action.status, now_ms, Vec::new(), None);
    let mut state = TargetStateUpdate::from_target(&view.target);
    state.assigned_ds_id = Some(new_action.ds_id);
    state.update_status = TargetUpdateStatus::Pending;
    plan.change.target_update = Some(state);
    plan.change.new_actions.push(new_action);
    plan.events.push(PlannedEvent::Assigned(0));
    plan
}

/// 用户取消。
pub fn plan_cancel(
    view: &TargetView,
    action: &ActionRecord,
    now_ms: i64,
) -> Result<TransitionPlan, DeploymentError> {
    if !action.active {
        return Err(DeploymentError::CancelActionNotAllowed {
            action_id: action.action_id,
            reason: "action is not active".to_string(),
        });
    }
    if action.status == ActionStatus::Canceling {
        return Err(DeploymentError::CancelActionNotAllowed {
            action_id: action.action_id,
            reason: "cancellation already requested".to_string(),
        });
    }

    let mut plan = TransitionPlan::new(&view.target);
    if action.status.is_undispatched() {
        plan.update_action(action, ActionStatus::Canceled, false);
        plan.append_status(
            ActionRef::Existing(action.action_id),
            ActionStatus::Canceled,
            now_ms,
            vec![MSG_CANCELED_BEFORE_DISPATCH.to_string()],
            None,
        );
        release_target(&mut plan, view, action, ActionStatus::Canceled);
    } else {
        plan.update_action(action, ActionStatus::Canceling, true);
        plan.append_status(
            ActionRef::Existing(action.action_id),
            ActionStatus::Canceling,
            now_ms,
            vec![MSG_CANCEL_REQUESTED.to_string()],
            None,
        );
        plan.events.push(PlannedEvent::CancelRequested(action.action_id));
    }
    Ok(plan)
}

/// 强制退出：跳过设备确认直接完成取消。
pub fn plan_force_quit(
    view: &TargetView,
    action: &ActionRecord,
    now_ms: i64,
) -> Result<TransitionPlan, DeploymentError> {
    if !action.active || action.status != ActionStatus::Canceling {
        return Err(DeploymentError::ForceQuitActionNotAllowed {
            action_id: action.action_id,
            status: action.status,
        });
    }
    let mut plan = TransitionPlan::new(&view.target);
    plan.update_action(action, ActionStatus::Canceled, false);
    plan.append_status(
        ActionRef::Existing(action.action_id),
        ActionStatus::Canceled,
        now_ms,
        vec![MSG_FORCE_QUIT.to_string()],
        None,
    );
    release_target(&mut plan, view, action, ActionStatus::Canceled);
    Ok(plan)
}

/// SOFT → FORCED。其他类型或非活跃 Action 返回 None（不写入）。
pub fn plan_force_type(view: &TargetView, action: &ActionRecord) -> Option<TransitionPlan> {
    if !action.active || action.action_type != ActionType::Soft {
        return None;
    }
    let mut plan = TransitionPlan::new(&view.target);
    plan.update_action_with(
        action,
        action.status,
        true,
        ActionType::Forced,
        action.last_status_code,
    );
    Some(plan)
}

/// 设备状态回报。
///
/// `history` 仅在 Action 处于 CANCELING 时需要（用于恢复取消前的状态）。
pub fn plan_status_update(
    view: &TargetView,
    action: &ActionRecord,
    report: &StatusReport,
    history: &[ActionStatusRecord],
) -> Result<TransitionPlan, DeploymentError> {
    let invalid = || DeploymentError::InvalidStatusTransition {
        action_id: action.action_id,
        from: action.status,
        to: report.status,
    };
    if !action.active
        || action.status == ActionStatus::WaitForConfirmation
        || !report.status.is_device_reportable()
    {
        return Err(invalid());
    }
    if matches!(
        report.status,
        ActionStatus::Canceled | ActionStatus::CancelRejected
    ) {
        if action.status != ActionStatus::Canceling {
            return Err(invalid());
        }
        return plan_cancel_feedback(view, action, report, history);
    }

    let mut plan = TransitionPlan::new(&view.target);
    let code = report.code.or(action.last_status_code);
    match report.status {
        ActionStatus::Finished => {
            plan.update_action_with(action, ActionStatus::Finished, false, action.action_type, code);
            terminate_target(
                &mut plan,
                view,
                action,
                ActionStatus::Finished,
                Termination::Finished {
                    at_ms: report.ts_ms,
                },
            );
        }
        ActionStatus::Error => {
            plan.update_action_with(action, ActionStatus::Error, false, action.action_type, code);
            terminate_target(&mut plan, view, action, ActionStatus::Error, Termination::Failed);
        }
        ActionStatus::Downloaded if action.action_type == ActionType::DownloadOnly => {
            plan.update_action_with(action, ActionStatus::Downloaded, false, action.action_type, code);
            terminate_target(
                &mut plan,
                view,
                action,
                ActionStatus::Downloaded,
                Termination::Released,
            );
        }
        reported => {
            // 取消进行中，设备的中间状态只进入历史
            let status = if action.status == ActionStatus::Canceling {
                ActionStatus::Canceling
            } else {
                reported
            };
            plan.update_action_with(action, status, true, action.action_type, code);
        }
    }
    plan.append_status(
        ActionRef::Existing(action.action_id),
        report.status,
        report.ts_ms,
        report.messages.clone(),
        report.code,
    );
    Ok(plan)
}

/// 设备取消回报。
pub fn plan_cancel_feedback(
    view: &TargetView,
    action: &ActionRecord,
    report: &StatusReport,
    history: &[ActionStatusRecord],
) -> Result<TransitionPlan, DeploymentError> {
    if !action.active || action.status != ActionStatus::Canceling {
        return Err(DeploymentError::InvalidStatusTransition {
            action_id: action.action_id,
            from: action.status,
            to: report.status,
        });
    }

    let mut plan = TransitionPlan::new(&view.target);
    let code = report.code.or(action.last_status_code);
    match report.status {
        ActionStatus::Canceled => {
            plan.update_action_with(action, ActionStatus::Canceled, false, action.action_type, code);
            terminate_target(
                &mut plan,
                view,
                action,
                ActionStatus::Canceled,
                Termination::Released,
            );
        }
        ActionStatus::CancelRejected | ActionStatus::Error => {
            let restored = status_before_canceling(history);
            plan.update_action_with(action, restored, true, action.action_type, code);
        }
        _ => {
            plan.update_action_with(action, ActionStatus::Canceling, true, action.action_type, code);
        }
    }
    plan.append_status(
        ActionRef::Existing(action.action_id),
        report.status,
        report.ts_ms,
        report.messages.clone(),
        report.code,
    );
    Ok(plan)
}

/// 用户确认分配：WAIT_FOR_CONFIRMATION → RUNNING。
pub fn plan_confirm(
    view: &TargetView,
    action: &ActionRecord,
    messages: Vec<String>,
    now_ms: i64,
) -> Result<TransitionPlan, DeploymentError> {
    ensure_waiting_for_confirmation(action, ActionStatus::Running)?;
    let mut plan = TransitionPlan::new(&view.target);
    plan.update_action(action, ActionStatus::Running, true);
    plan.append_status(
        ActionRef::Existing(action.action_id),
        ActionStatus::Running,
        now_ms,
        with_message(MSG_CONFIRMED, messages),
        None,
    );
    Ok(plan)
}

/// 用户拒绝分配：状态不变，只追加历史。
pub fn plan_deny(
    view: &TargetView,
    action: &ActionRecord,
    messages: Vec<String>,
    now_ms: i64,
) -> Result<TransitionPlan, DeploymentError> {
    ensure_waiting_for_confirmation(action, ActionStatus::WaitForConfirmation)?;
    let mut plan = TransitionPlan::new(&view.target);
    plan.update_action(action, ActionStatus::WaitForConfirmation, true);
    plan.append_status(
        ActionRef::Existing(action.action_id),
        ActionStatus::WaitForConfirmation,
        now_ms,
        with_message(MSG_DENIED, messages),
        None,
    );
    Ok(plan)
}

fn ensure_waiting_for_confirmation(
    action: &ActionRecord,
    to: ActionStatus,
) -> Result<(), DeploymentError> {
    if !action.active {
        return Err(DeploymentError::ActionNotActive(action.action_id));
    }
    if action.status != ActionStatus::WaitForConfirmation {
        return Err(DeploymentError::InvalidStatusTransition {
            action_id: action.action_id,
            from: action.status,
            to,
        });
    }
    Ok(())
}

fn with_message(first: &str, mut rest: Vec<String>) -> Vec<String> {
    rest.insert(0, first.to_string());
    rest
}

/// 取消前最后一个有效状态（默认 RUNNING）。
fn status_before_canceling(history: &[ActionStatusRecord]) -> ActionStatus {
    history
        .iter()
        .rev()
        .map(|entry| entry.status)
        .find(|status| {
            !matches!(
                status,
                ActionStatus::Canceling
                    | ActionStatus::CancelRejected
                    | ActionStatus::Warning
                    | ActionStatus::Canceled
            )
        })
        .unwrap_or(ActionStatus::Running)
}

fn release_target(
    plan: &mut TransitionPlan,
    view: &TargetView,
    action: &ActionRecord,
    final_status: ActionStatus,
) {
    terminate_target(plan, view, action, final_status, Termination::Released);
}

fn terminate_target(
    plan: &mut TransitionPlan,
    view: &TargetView,
    action: &ActionRecord,
    final_status: ActionStatus,
    termination: Termination,
) {
    let mut terminated = action.clone();
    terminated.status = final_status;
    terminated.active = false;
    let remaining = view.remaining_active(action.action_id);
    plan.change.target_update = Some(state_after_termination(
        &view.target,
        &terminated,
        &remaining,
        termination,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::AuditMetadata;

    fn target(assigned: Option<i64>, installed: Option<i64>) -> TargetRecord {
        TargetRecord {
            tenant_id: "tenant-1".to_string(),
            controller_id: "4712".to_string(),
            name: "4712".to_string(),
            description: None,
            assigned_ds_id: assigned,
            installed_ds_id: installed,
            install_date_ms: None,
            update_status: TargetUpdateStatus::Pending,
            last_target_query_ms: Some(1),
            revision: 7,
            audit: AuditMetadata::created("user-1", 0),
        }
    }

    fn action(action_id: i64, ds_id: i64, status: ActionStatus) -> ActionRecord {
        ActionRecord {
            tenant_id: "tenant-1".to_string(),
            action_id,
            controller_id: "4712".to_string(),
            ds_id,
            active: true,
            status,
            action_type: ActionType::Forced,
            forced_time_ms: None,
            weight: None,
            maintenance: None,
            last_status_code: None,
            rollout_id: None,
            rollout_group_id: None,
            initiated_by: "user-1".to_string(),
            revision: 2,
            audit: AuditMetadata::created("user-1", 0),
        }
    }

    fn new_action(ds_id: i64) -> NewAction {
        NewAction {
            ds_id,
            status: initial_status(false),
            action_type: ActionType::Forced,
            forced_time_ms: None,
            weight: None,
            maintenance: None,
            rollout_id: None,
            rollout_group_id: None,
            initiated_by: "user-1".to_string(),
        }
    }

    fn history(statuses: &[ActionStatus]) -> Vec<ActionStatusRecord> {
        statuses
            .iter()
            .enumerate()
            .map(|(index, status)| ActionStatusRecord {
                tenant_id: "tenant-1".to_string(),
                status_id: index as i64 + 1,
                action_id: 1,
                status: *status,
                ts_ms: index as i64,
                messages: Vec::new(),
                code: None,
            })
            .collect()
    }

    fn report(status: ActionStatus) -> StatusReport {
        StatusReport {
            status,
            messages: Vec::new(),
            code: None,
            ts_ms: 50,
        }
    }

    #[test]
    fn assignment_supersedes_every_active_action_immediately() {
        let view = TargetView::new(
            target(Some(1), None),
            vec![action(1, 1, ActionStatus::Running), action(2, 1, ActionStatus::Scheduled)],
        );
        let plan = plan_assignment(&view, new_action(2), SupersedeMode::Immediate, 10);
        assert_eq!(plan.change.expected_revision, 7);
        assert_eq!(plan.superseded_count(), 2);
        assert!(plan
            .change
            .action_updates
            .iter()
            .all(|update| update.status == ActionStatus::Canceled && !update.active));
        let state = plan.change.target_update.expect("target update");
        assert_eq!(state.assigned_ds_id, Some(2));
        assert_eq!(state.update_status, TargetUpdateStatus::Pending);
        assert_eq!(plan.change.new_actions.len(), 1);
        assert_eq!(plan.change.status_entries.len(), 3);
        assert!(plan.events.contains(&PlannedEvent::Assigned(0)));
        assert!(plan.events.contains(&PlannedEvent::CancelRequested(1)));
    }

    #[test]
    fn graceful_assignment_waits_for_dispatched_actions() {
        let view = TargetView::new(
            target(Some(1), None),
            vec![
                action(1, 1, ActionStatus::Running),
                action(2, 3, ActionStatus::Canceling),
                action(3, 4, ActionStatus::Scheduled),
            ],
        );
        let plan = plan_assignment(&view, new_action(2), SupersedeMode::Graceful, 10);
        let updates = &plan.change.action_updates;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].action_id, 1);
        assert_eq!(updates[0].status, ActionStatus::Canceling);
        assert!(updates[0].active);
        assert_eq!(updates[1].action_id, 3);
        assert_eq!(updates[1].status, ActionStatus::Canceled);
        assert!(!updates[1].active);
    }

    #[test]
    fn cancel_is_immediate_before_dispatch() {
        let scheduled = action(1, 1, ActionStatus::Scheduled);
        let view = TargetView::new(target(Some(1), None), vec![scheduled.clone()]);
        let plan = plan_cancel(&view, &scheduled, 10).expect("cancel");
        assert_eq!(plan.change.action_updates[0].status, ActionStatus::Canceled);
        let state = plan.change.target_update.expect("target update");
        assert_eq!(state.assigned_ds_id, None);
        assert_eq!(state.update_status, TargetUpdateStatus::Registered);
        assert_eq!(plan.events, vec![PlannedEvent::Updated(1)]);
    }

    #[test]
    fn cancel_of_dispatched_action_requests_device_confirmation() {
        let running = action(1, 1, ActionStatus::Running);
        let view = TargetView::new(target(Some(1), None), vec![running.clone()]);
        let plan = plan_cancel(&view, &running, 10).expect("cancel");
        assert_eq!(plan.change.action_updates[0].status, ActionStatus::Canceling);
        assert!(plan.change.action_updates[0].active);
        assert!(plan.change.target_update.is_none());
        assert!(plan.events.contains(&PlannedEvent::CancelRequested(1)));

        let mut canceling = running;
        canceling.status = ActionStatus::Canceling;
        let err = plan_cancel(&view, &canceling, 11).expect_err("double cancel");
        assert!(matches!(err, DeploymentError::CancelActionNotAllowed { .. }));
    }

    #[test]
    fn force_quit_requires_canceling() {
        let running = action(1, 1, ActionStatus::Running);
        let view = TargetView::new(target(Some(1), Some(9)), vec![running.clone()]);
        let err = plan_force_quit(&view, &running, 10).expect_err("not canceling");
        assert_eq!(
            err,
            DeploymentError::ForceQuitActionNotAllowed {
                action_id: 1,
                status: ActionStatus::Running
            }
        );

        let mut canceling = running;
        canceling.status = ActionStatus::Canceling;
        let plan = plan_force_quit(&view, &canceling, 10).expect("force quit");
        let state = plan.change.target_update.expect("target update");
        assert_eq!(state.assigned_ds_id, Some(9));
        assert_eq!(state.update_status, TargetUpdateStatus::InSync);
    }

    #[test]
    fn only_soft_actions_are_forced() {
        let mut soft = action(1, 1, ActionStatus::Running);
        soft.action_type = ActionType::Soft;
        let view = TargetView::new(target(Some(1), None), vec![soft.clone()]);
        let plan = plan_force_type(&view, &soft).expect("soft becomes forced");
        assert_eq!(plan.change.action_updates[0].action_type, ActionType::Forced);
        assert!(plan.change.status_entries.is_empty());

        for kind in [ActionType::Forced, ActionType::TimeForced, ActionType::DownloadOnly] {
            let mut other = soft.clone();
            other.action_type = kind;
            assert!(plan_force_type(&view, &other).is_none());
        }
        soft.active = false;
        assert!(plan_force_type(&view, &soft).is_none());
    }

    #[test]
    fn device_cannot_report_management_statuses() {
        let running = action(1, 1, ActionStatus::Running);
        let view = TargetView::new(target(Some(1), None), vec![running.clone()]);
        for status in [
            ActionStatus::Scheduled,
            ActionStatus::Canceling,
            ActionStatus::WaitForConfirmation,
            ActionStatus::Canceled,
            ActionStatus::CancelRejected,
        ] {
            assert!(plan_status_update(&view, &running, &report(status), &[]).is_err());
        }
        let mut finished = running;
        finished.active = false;
        finished.status = ActionStatus::Finished;
        let err = plan_status_update(&view, &finished, &report(ActionStatus::Running), &[])
            .expect_err("inactive");
        assert!(matches!(err, DeploymentError::InvalidStatusTransition { .. }));
    }

    #[test]
    fn waiting_action_ignores_device_reports() {
        let waiting = action(1, 1, ActionStatus::WaitForConfirmation);
        let view = TargetView::new(target(Some(1), None), vec![waiting.clone()]);
        for status in [ActionStatus::Running, ActionStatus::Finished, ActionStatus::Retrieved] {
            let err = plan_status_update(&view, &waiting, &report(status), &[])
                .expect_err("needs confirmation");
            assert_eq!(
                err,
                DeploymentError::InvalidStatusTransition {
                    action_id: 1,
                    from: ActionStatus::WaitForConfirmation,
                    to: status
                }
            );
        }
    }

    #[test]
    fn intermediate_reports_keep_canceling() {
        let mut canceling = action(1, 1, ActionStatus::Canceling);
        canceling.last_status_code = Some(3);
        let view = TargetView::new(target(Some(1), None), vec![canceling.clone()]);
        let plan = plan_status_update(&view, &canceling, &report(ActionStatus::Download), &[])
            .expect("report");
        let update = &plan.change.action_updates[0];
        assert_eq!(update.status, ActionStatus::Canceling);
        assert_eq!(update.last_status_code, Some(3));
        assert_eq!(plan.change.status_entries[0].status, ActionStatus::Download);
    }

    #[test]
    fn cancel_rejected_restores_previous_status() {
        let canceling = action(1, 1, ActionStatus::Canceling);
        let view = TargetView::new(target(Some(1), None), vec![canceling.clone()]);
        let log = history(&[
            ActionStatus::Scheduled,
            ActionStatus::Retrieved,
            ActionStatus::Download,
            ActionStatus::Warning,
            ActionStatus::Canceling,
        ]);
        let plan = plan_status_update(
            &view,
            &canceling,
            &report(ActionStatus::CancelRejected),
            &log,
        )
        .expect("rejected");
        assert_eq!(plan.change.action_updates[0].status, ActionStatus::Download);
        assert!(plan.change.action_updates[0].active);
        assert!(plan.change.target_update.is_none());

        let plan = plan_cancel_feedback(&view, &canceling, &report(ActionStatus::Error), &[])
            .expect("error feedback");
        assert_eq!(plan.change.action_updates[0].status, ActionStatus::Running);
    }

    #[test]
    fn confirm_and_deny_need_waiting_action() {
        let waiting = action(1, 1, ActionStatus::WaitForConfirmation);
        let view = TargetView::new(target(Some(1), None), vec![waiting.clone()]);
        let plan = plan_confirm(&view, &waiting, vec!["ok".to_string()], 10).expect("confirm");
        assert_eq!(plan.change.action_updates[0].status, ActionStatus::Running);
        assert_eq!(
            plan.change.status_entries[0].messages,
            vec![MSG_CONFIRMED.to_string(), "ok".to_string()]
        );

        let plan = plan_deny(&view, &waiting, Vec::new(), 10).expect("deny");
        assert_eq!(
            plan.change.action_updates[0].status,
            ActionStatus::WaitForConfirmation
        );

        let running = action(1, 1, ActionStatus::Running);
        assert!(matches!(
            plan_confirm(&view, &running, Vec::new(), 10),
            Err(DeploymentError::InvalidStatusTransition { .. })
        ));
        let mut inactive = waiting;
        inactive.active = false;
        assert_eq!(
            plan_deny(&view, &inactive, Vec::new(), 10).expect_err("inactive"),
            DeploymentError::ActionNotActive(1)
        );
    }
}
