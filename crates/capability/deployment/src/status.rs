//! Target 派生状态。
//!
//! Target 的 assigned / installed 分发集与更新状态完全由 Action 历史决定，
//! 每次状态流转都在同一个 `TargetChange` 中显式重算，不依赖懒加载。

use domain::{ActionStatus, ActionType, TargetUpdateStatus};
use fota_storage::{ActionRecord, TargetRecord, TargetStateUpdate};

/// 计算 Target 更新状态。
///
/// 顺序：存在活跃 Action → PENDING；最近结束的 Action 为 ERROR → ERROR；
/// 最近结束的是仅下载完成的 Action，或 assigned == installed → IN_SYNC；
/// 设备联系过 → REGISTERED；否则 UNKNOWN。
pub fn derive_update_status(
    has_active_actions: bool,
    last_terminated: Option<&ActionRecord>,
    assigned_ds_id: Option<i64>,
    installed_ds_id: Option<i64>,
    contacted: bool,
) -> TargetUpdateStatus {
    if has_active_actions {
        return TargetUpdateStatus::Pending;
    }
    if let Some(action) = last_terminated {
        if action.status == ActionStatus::Error {
            return TargetUpdateStatus::Error;
        }
        if is_download_only_completion(action) {
            return TargetUpdateStatus::InSync;
        }
    }
    if assigned_ds_id.is_some() && assigned_ds_id == installed_ds_id {
        return TargetUpdateStatus::InSync;
    }
    if contacted {
        TargetUpdateStatus::Registered
    } else {
        TargetUpdateStatus::Unknown
    }
}

fn is_download_only_completion(action: &ActionRecord) -> bool {
    action.action_type == ActionType::DownloadOnly && action.status == ActionStatus::Downloaded
}

/// 剩余活跃 Action 中 ID 最大者的分发集，否则回退到已安装分发集。
pub fn fallback_assigned_ds(remaining_active: &[&ActionRecord], installed_ds_id: Option<i64>) -> Option<i64> {
    remaining_active
        .iter()
        .max_by_key(|action| action.action_id)
        .map(|action| action.ds_id)
        .or(installed_ds_id)
}

/// Action 结束方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// 安装成功：installed := action 分发集，assigned 保持不变
    Finished { at_ms: i64 },
    /// 失败：assigned 保持不变
    Failed,
    /// 取消完成 / 强制退出 / 仅下载完成：assigned 回退
    Released,
}

/// Action 结束后重算 Target 生命周期字段。
///
/// `terminated` 为写入后的 Action 状态，`remaining_active` 不含它。
pub fn state_after_termination(
    target: &TargetRecord,
    terminated: &ActionRecord,
    remaining_active: &[&ActionRecord],
    termination: Termination,
) -> TargetStateUpdate {
    let mut state = TargetStateUpdate::from_target(target);
    match termination {
        Termination::Finished { at_ms } => {
            state.installed_ds_id = Some(terminated.ds_id);
            state.install_date_ms = Some(at_ms);
        }
        Termination::Failed => {}
        Termination::Released => {
            state.assigned_ds_id = fallback_assigned_ds(remaining_active, state.installed_ds_id);
        }
    }
    state.update_status = derive_update_status(
        !remaining_active.is_empty(),
        Some(terminated),
        state.assigned_ds_id,
        state.installed_ds_id,
        target.last_target_query_ms.is_some(),
    );
    state
}
