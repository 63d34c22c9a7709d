//! 批量分配协调器。
//!
//! 一次分配请求按 `max_entries_in_statement` 切成若干块，每块一次
//! `apply_target_changes` 调用，块内每个 Target 独立提交：
//! - 整个请求的前置校验（分发集、权重、维护窗口）失败时不触碰任何 Target
//! - 单个 Target 的冲突、缺失、配额超限只记录在结果中，不影响其他 Target
//! - 已提交的块不回滚；基础设施错误会中止剩余的块
//!
//! 每个 Target 的取代决策只依赖该 Target 自身的快照，与切块方式无关。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use domain::{ActionType, TenantContext, now_epoch_ms};
use fota_storage::{
    ActionRecord, DeploymentRepository, MaintenanceWindowSpec, NewAction, StorageErrorKind,
    TargetRecord,
};
use fota_telemetry::{
    new_operation_id, record_actions_created, record_actions_superseded,
    record_assignment_latency_ms, record_assignment_requested, record_optimistic_conflict,
    record_targets_already_assigned, record_targets_failed,
};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::events::{EventSink, publish_all, resolve_events};
use crate::maintenance::validate_window;
use crate::state_machine::{TargetView, TransitionPlan, initial_status, plan_assignment};
use crate::{DeploymentConfig, DeploymentError, WEIGHT_MAX, WEIGHT_MIN};

/// 分配请求。
#[derive(Debug, Clone)]
pub struct AssignmentRequest {
    pub ds_id: i64,
    pub action_type: ActionType,
    /// 仅 TIMEFORCED 使用。
    pub forced_time_ms: Option<i64>,
    pub weight: Option<i32>,
    pub maintenance_window: Option<MaintenanceWindowSpec>,
    /// 新 Action 以 WAIT_FOR_CONFIRMATION 开始。
    pub confirmation_required: bool,
    pub rollout_id: Option<i64>,
    pub rollout_group_id: Option<i64>,
    pub controller_ids: Vec<String>,
}

impl AssignmentRequest {
    /// FORCED 分配，无权重、无维护窗口。
    pub fn new<I, S>(ds_id: i64, controller_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ds_id,
            action_type: ActionType::Forced,
            forced_time_ms: None,
            weight: None,
            maintenance_window: None,
            confirmation_required: false,
            rollout_id: None,
            rollout_group_id: None,
            controller_ids: controller_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// 单个 Target 分配失败原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentFailure {
    NotFound,
    QuotaExceeded,
    /// 乐观锁冲突，调用方可重新提交该 Target。
    Conflict,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTarget {
    pub controller_id: String,
    pub reason: AssignmentFailure,
}

/// 分配结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentResult {
    /// 新建了 Action 的 Target 数。
    pub assigned: usize,
    /// 已经分配了该分发集而跳过的 Target 数。
    pub already_assigned: usize,
    pub action_ids: Vec<i64>,
    pub assigned_targets: Vec<String>,
    pub already_assigned_targets: Vec<String>,
    pub failed: Vec<FailedTarget>,
    /// 去重后的 Target 数。
    pub total: usize,
}

impl AssignmentResult {
    fn fail(&mut self, controller_id: &str, reason: AssignmentFailure) {
        self.failed.push(FailedTarget {
            controller_id: controller_id.to_string(),
            reason,
        });
    }
}

/// 批量分配协调器。
#[derive(Clone)]
pub struct TargetAssignmentCoordinator {
    repository: Arc<dyn DeploymentRepository>,
    events: Arc<dyn EventSink>,
    config: DeploymentConfig,
}

impl TargetAssignmentCoordinator {
    pub fn new(repository: Arc<dyn DeploymentRepository>, events: Arc<dyn EventSink>) -> Self {
        Self::new_with_config(repository, events, DeploymentConfig::default())
    }

    pub fn new_with_config(
        repository: Arc<dyn DeploymentRepository>,
        events: Arc<dyn EventSink>,
        config: DeploymentConfig,
    ) -> Self {
        Self {
            repository,
            events,
            config,
        }
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    pub async fn assign(
        &self,
        ctx: &TenantContext,
        request: AssignmentRequest,
    ) -> Result<AssignmentResult, DeploymentError> {
        let operation_id = new_operation_id();
        let span = info_span!(
            target: "fota.deployment",
            "assign_distribution_set",
            operation_id = %operation_id,
            tenant_id = %ctx.tenant_id,
            ds_id = request.ds_id,
        );
        self.assign_inner(ctx, request).instrument(span).await
    }

    async fn assign_inner(
        &self,
        ctx: &TenantContext,
        request: AssignmentRequest,
    ) -> Result<AssignmentResult, DeploymentError> {
        record_assignment_requested();
        let started_at = Instant::now();
        self.validate(ctx, &request).await?;

        let controller_ids = dedup_preserving_order(&request.controller_ids);
        let mut result = AssignmentResult {
            total: controller_ids.len(),
            ..AssignmentResult::default()
        };
        info!(
            target: "fota.deployment",
            tenant_id = %ctx.tenant_id,
            ds_id = request.ds_id,
            action_type = %request.action_type,
            targets = controller_ids.len(),
            "assignment_requested"
        );

        for (index, chunk) in controller_ids
            .chunks(self.config.max_entries_in_statement.max(1))
            .enumerate()
        {
            self.assign_chunk(ctx, &request, chunk, &mut result).await?;
            debug!(
                target: "fota.deployment",
                chunk = index,
                chunk_size = chunk.len(),
                assigned = result.assigned,
                "assignment_batch_committed"
            );
        }

        record_actions_created(result.assigned as u64);
        record_targets_already_assigned(result.already_assigned as u64);
        record_targets_failed(result.failed.len() as u64);
        record_assignment_latency_ms(started_at.elapsed().as_millis() as u64);
        info!(
            target: "fota.deployment",
            tenant_id = %ctx.tenant_id,
            ds_id = request.ds_id,
            assigned = result.assigned,
            already_assigned = result.already_assigned,
            failed = result.failed.len(),
            "assignment_completed"
        );
        Ok(result)
    }

    /// 整个请求的前置校验，失败时不产生任何副作用。
    async fn validate(
        &self,
        ctx: &TenantContext,
        request: &AssignmentRequest,
    ) -> Result<(), DeploymentError> {
        let ds = self
            .repository
            .find_distribution_set(ctx, request.ds_id)
            .await?
            .ok_or_else(|| DeploymentError::not_found("distribution set", request.ds_id))?;
        if ds.deleted {
            return Err(DeploymentError::DistributionSetDeleted(ds.ds_id));
        }
        if !ds.complete {
            warn!(
                target: "fota.deployment",
                tenant_id = %ctx.tenant_id,
                ds_id = ds.ds_id,
                "assignment_rejected_incomplete_distribution_set"
            );
            return Err(DeploymentError::IncompleteDistributionSet(ds.ds_id));
        }

        match request.weight {
            Some(weight) if !(WEIGHT_MIN..=WEIGHT_MAX).contains(&weight) => {
                return Err(DeploymentError::InvalidWeight(format!(
                    "{} is outside [{}, {}]",
                    weight, WEIGHT_MIN, WEIGHT_MAX
                )));
            }
            None if self.config.weight_required => {
                return Err(DeploymentError::InvalidWeight(
                    "weight is required".to_string(),
                ));
            }
            _ => {}
        }

        if request.action_type == ActionType::TimeForced
            && request.forced_time_ms.is_none_or(|forced| forced <= 0)
        {
            return Err(DeploymentError::InvalidRequest(
                "TIMEFORCED assignment requires a forced time".to_string(),
            ));
        }

        if let Some(window) = &request.maintenance_window {
            validate_window(window, Utc::now())?;
        }
        Ok(())
    }

    async fn assign_chunk(
        &self,
        ctx: &TenantContext,
        request: &AssignmentRequest,
        chunk: &[String],
        result: &mut AssignmentResult,
    ) -> Result<(), DeploymentError> {
        let targets: HashMap<String, TargetRecord> = self
            .repository
            .find_targets(ctx, chunk)
            .await?
            .into_iter()
            .map(|target| (target.controller_id.clone(), target))
            .collect();
        let mut active_by_target: HashMap<String, Vec<ActionRecord>> = HashMap::new();
        for action in self
            .repository
            .find_active_actions_by_targets(ctx, chunk)
            .await?
        {
            active_by_target
                .entry(action.controller_id.clone())
                .or_default()
                .push(action);
        }
        let counts = if self.config.max_actions_per_target > 0 {
            self.repository.count_actions_by_targets(ctx, chunk).await?
        } else {
            HashMap::new()
        };

        let now_ms = now_epoch_ms();
        let mut plans: Vec<TransitionPlan> = Vec::new();
        for controller_id in chunk {
            let Some(target) = targets.get(controller_id) else {
                result.fail(controller_id, AssignmentFailure::NotFound);
                continue;
            };
            if target.assigned_ds_id == Some(request.ds_id) {
                result.already_assigned += 1;
                result.already_assigned_targets.push(controller_id.clone());
                continue;
            }
            let quota = self.config.max_actions_per_target;
            if quota > 0 && counts.get(controller_id).copied().unwrap_or(0) + 1 > quota {
                result.fail(controller_id, AssignmentFailure::QuotaExceeded);
                continue;
            }
            let view = TargetView::new(
                target.clone(),
                active_by_target.remove(controller_id).unwrap_or_default(),
            );
            plans.push(plan_assignment(
                &view,
                new_action(ctx, request),
                self.config.supersede_mode,
                now_ms,
            ));
        }
        if plans.is_empty() {
            return Ok(());
        }

        let (changes, planned_events): (Vec<_>, Vec<_>) = plans
            .into_iter()
            .map(|plan| {
                let superseded = plan.superseded_count();
                (plan.change, (plan.events, superseded))
            })
            .unzip();
        let controller_ids: Vec<String> = changes
            .iter()
            .map(|change| change.controller_id.clone())
            .collect();

        let outcomes = self.repository.apply_target_changes(ctx, changes).await?;
        for ((controller_id, (events, superseded)), outcome) in controller_ids
            .iter()
            .zip(planned_events)
            .zip(outcomes)
        {
            match outcome {
                Ok(committed) => {
                    result.assigned += 1;
                    result.assigned_targets.push(controller_id.clone());
                    result
                        .action_ids
                        .extend(committed.created_actions.iter().map(|action| action.action_id));
                    record_actions_superseded(superseded as u64);
                    publish_all(self.events.as_ref(), &resolve_events(&committed, &events));
                }
                Err(err) => {
                    let reason = match err.kind() {
                        StorageErrorKind::Conflict => {
                            record_optimistic_conflict();
                            AssignmentFailure::Conflict
                        }
                        StorageErrorKind::NotFound => AssignmentFailure::NotFound,
                        StorageErrorKind::Invalid | StorageErrorKind::Backend => {
                            AssignmentFailure::Rejected(err.to_string())
                        }
                    };
                    warn!(
                        target: "fota.deployment",
                        tenant_id = %ctx.tenant_id,
                        controller_id = %controller_id,
                        ds_id = request.ds_id,
                        error = %err,
                        "target_assignment_failed"
                    );
                    result.fail(controller_id, reason);
                }
            }
        }
        Ok(())
    }
}

fn new_action(ctx: &TenantContext, request: &AssignmentRequest) -> NewAction {
    NewAction {
        ds_id: request.ds_id,
        status: initial_status(request.confirmation_required),
        action_type: request.action_type,
        forced_time_ms: request.forced_time_ms,
        weight: request.weight,
        maintenance: request.maintenance_window.clone(),
        rollout_id: request.rollout_id,
        rollout_group_id: request.rollout_group_id,
        initiated_by: ctx.user_id.clone(),
    }
}

fn dedup_preserving_order(controller_ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(controller_ids.len());
    controller_ids
        .iter()
        .filter(|controller_id| seen.insert(controller_id.as_str()))
        .cloned()
        .collect()
}
