//! Action 内存存储实现
//!
//! `apply_target_changes` 在同一把写锁内逐个 Target 先校验后写入：
//! 校验失败的 Target 不留下任何痕迹，其余 Target 照常提交。

use std::collections::HashMap;

use crate::error::StorageError;
use crate::in_memory::{InMemoryRepository, RepositoryState};
use crate::models::{
    ActionRecord, ActionRef, ActionStatusRecord, ActionWithStatusCount, CommittedChange,
    TargetChange,
};
use crate::traits::ActionStore;
use crate::validation::ensure_tenant;
use domain::{AuditMetadata, TenantContext, now_epoch_ms};

#[async_trait::async_trait]
impl ActionStore for InMemoryRepository {
    async fn find_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
    ) -> Result<Option<ActionRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        Ok(state.tenant_action(&ctx.tenant_id, action_id).cloned())
    }

    async fn find_actions_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        Ok(state
            .actions
            .values()
            .rev()
            .filter(|action| action.tenant_id == ctx.tenant_id && action.controller_id == controller_id)
            .cloned()
            .collect())
    }

    async fn find_active_actions_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        Ok(state
            .actions
            .values()
            .filter(|action| {
                action.active
                    && action.tenant_id == ctx.tenant_id
                    && action.controller_id == controller_id
            })
            .cloned()
            .collect())
    }

    async fn find_active_actions_by_targets(
        &self,
        ctx: &TenantContext,
        controller_ids: &[String],
    ) -> Result<Vec<ActionRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        Ok(state
            .actions
            .values()
            .filter(|action| {
                action.active
                    && action.tenant_id == ctx.tenant_id
                    && controller_ids.contains(&action.controller_id)
            })
            .cloned()
            .collect())
    }

    async fn count_actions_by_targets(
        &self,
        ctx: &TenantContext,
        controller_ids: &[String],
    ) -> Result<HashMap<String, u64>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        let mut counts = HashMap::new();
        for action in state.actions.values() {
            if action.tenant_id == ctx.tenant_id && controller_ids.contains(&action.controller_id) {
                *counts.entry(action.controller_id.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn find_actions_with_status_count_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionWithStatusCount>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        let mut items = Vec::new();
        for action in state.actions.values().rev() {
            if action.tenant_id != ctx.tenant_id || action.controller_id != controller_id {
                continue;
            }
            let (ds_name, ds_version) = state
                .distribution_sets
                .get(&action.ds_id)
                .map(|ds| (ds.name.clone(), ds.version.clone()))
                .unwrap_or_default();
            let status_count = state
                .statuses
                .get(&action.action_id)
                .map_or(0, |entries| entries.len() as i64);
            items.push(ActionWithStatusCount {
                action: action.clone(),
                ds_name,
                ds_version,
                status_count,
            });
        }
        Ok(items)
    }

    async fn find_action_status_by_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
    ) -> Result<Vec<ActionStatusRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        if state.tenant_action(&ctx.tenant_id, action_id).is_none() {
            return Ok(Vec::new());
        }
        Ok(state.statuses.get(&action_id).cloned().unwrap_or_default())
    }

    async fn find_last_terminated_action(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Option<ActionRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        Ok(state
            .actions
            .values()
            .filter(|action| {
                !action.active
                    && action.tenant_id == ctx.tenant_id
                    && action.controller_id == controller_id
            })
            .max_by_key(|action| (action.audit.last_modified_at_ms, action.action_id))
            .cloned())
    }

    async fn apply_target_changes(
        &self,
        ctx: &TenantContext,
        changes: Vec<TargetChange>,
    ) -> Result<Vec<Result<CommittedChange, StorageError>>, StorageError> {
        ensure_tenant(ctx)?;
        let now_ms = now_epoch_ms();
        let mut state = self.write()?;
        let results = changes
            .into_iter()
            .map(|change| {
                validate_change(&state, ctx, &change)?;
                apply_change(&mut state, ctx, change, now_ms)
            })
            .collect();
        Ok(results)
    }
}

fn validate_change(
    state: &RepositoryState,
    ctx: &TenantContext,
    change: &TargetChange,
) -> Result<(), StorageError> {
    let target = state
        .target(&ctx.tenant_id, &change.controller_id)
        .ok_or_else(|| StorageError::not_found(format!("target {} not found", change.controller_id)))?;
    if target.revision != change.expected_revision {
        return Err(StorageError::conflict(format!(
            "target {} was modified concurrently (expected revision {}, found {})",
            change.controller_id, change.expected_revision, target.revision
        )));
    }
    for new_action in &change.new_actions {
        let ds_found = state
            .distribution_sets
            .get(&new_action.ds_id)
            .is_some_and(|ds| ds.tenant_id == ctx.tenant_id);
        if !ds_found {
            return Err(StorageError::not_found(format!(
                "distribution set {} not found",
                new_action.ds_id
            )));
        }
    }
    for update in &change.action_updates {
        let action = owned_action(state, ctx, &change.controller_id, update.action_id)?;
        if action.revision != update.expected_revision {
            return Err(StorageError::conflict(format!(
                "action {} was modified concurrently (expected revision {}, found {})",
                update.action_id, update.expected_revision, action.revision
            )));
        }
    }
    for entry in &change.status_entries {
        match entry.action_ref {
            ActionRef::Existing(action_id) => {
                owned_action(state, ctx, &change.controller_id, action_id)?;
            }
            ActionRef::New(index) if index >= change.new_actions.len() => {
                return Err(StorageError::invalid(format!(
                    "status entry refers to unknown new action #{}",
                    index
                )));
            }
            ActionRef::New(_) => {}
        }
    }
    Ok(())
}

fn owned_action<'a>(
    state: &'a RepositoryState,
    ctx: &TenantContext,
    controller_id: &str,
    action_id: i64,
) -> Result<&'a ActionRecord, StorageError> {
    state
        .tenant_action(&ctx.tenant_id, action_id)
        .filter(|action| action.controller_id == controller_id)
        .ok_or_else(|| {
            StorageError::not_found(format!(
                "action {} not found for target {}",
                action_id, controller_id
            ))
        })
}

fn apply_change(
    state: &mut RepositoryState,
    ctx: &TenantContext,
    change: TargetChange,
    now_ms: i64,
) -> Result<CommittedChange, StorageError> {
    let mut created_actions = Vec::with_capacity(change.new_actions.len());
    for new_action in change.new_actions {
        let action_id = state.next_action_id();
        let record = ActionRecord {
            tenant_id: ctx.tenant_id.clone(),
            action_id,
            controller_id: change.controller_id.clone(),
            ds_id: new_action.ds_id,
            active: true,
            status: new_action.status,
            action_type: new_action.action_type,
            forced_time_ms: new_action.forced_time_ms,
            weight: new_action.weight,
            maintenance: new_action.maintenance,
            last_status_code: None,
            rollout_id: new_action.rollout_id,
            rollout_group_id: new_action.rollout_group_id,
            initiated_by: new_action.initiated_by,
            revision: 1,
            audit: AuditMetadata::created(ctx.user_id.clone(), now_ms),
        };
        state.actions.insert(action_id, record.clone());
        created_actions.push(record);
    }

    let mut updated_actions = Vec::with_capacity(change.action_updates.len());
    for update in change.action_updates {
        let action = state
            .actions
            .get_mut(&update.action_id)
            .ok_or_else(|| StorageError::not_found(format!("action {} not found", update.action_id)))?;
        action.status = update.status;
        action.active = update.active;
        action.action_type = update.action_type;
        action.last_status_code = update.last_status_code;
        action.revision += 1;
        action.audit.touch(&ctx.user_id, now_ms);
        updated_actions.push(action.clone());
    }

    for entry in change.status_entries {
        let action_id = match entry.action_ref {
            ActionRef::Existing(action_id) => action_id,
            ActionRef::New(index) => created_actions
                .get(index)
                .map(|action| action.action_id)
                .ok_or_else(|| StorageError::invalid("status entry refers to unknown new action"))?,
        };
        let status_id = state.next_status_id();
        state
            .statuses
            .entry(action_id)
            .or_default()
            .push(ActionStatusRecord {
                tenant_id: ctx.tenant_id.clone(),
                status_id,
                action_id,
                status: entry.status,
                ts_ms: entry.ts_ms,
                messages: entry.messages,
                code: entry.code,
            });
    }

    let key = (ctx.tenant_id.clone(), change.controller_id.clone());
    let target = state
        .targets
        .get_mut(&key)
        .ok_or_else(|| StorageError::not_found(format!("target {} not found", change.controller_id)))?;
    if let Some(update) = change.target_update {
        target.assigned_ds_id = update.assigned_ds_id;
        target.installed_ds_id = update.installed_ds_id;
        target.install_date_ms = update.install_date_ms;
        target.update_status = update.update_status;
    }
    target.revision += 1;
    target.audit.touch(&ctx.user_id, now_ms);

    Ok(CommittedChange {
        target: target.clone(),
        created_actions,
        updated_actions,
    })
}
