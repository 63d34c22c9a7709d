//! Target 内存存储实现
//!
//! 功能：
//! - 注册（controller_id 租户内唯一）
//! - 查询、元数据更新、联系时间记录
//! - 级联删除 Action 和状态历史

use crate::error::StorageError;
use crate::in_memory::InMemoryRepository;
use crate::models::{NewTarget, TargetMetadataUpdate, TargetRecord};
use crate::traits::TargetStore;
use crate::validation::ensure_tenant;
use domain::{AuditMetadata, TargetUpdateStatus, TenantContext, now_epoch_ms};

#[async_trait::async_trait]
impl TargetStore for InMemoryRepository {
    async fn create_target(
        &self,
        ctx: &TenantContext,
        target: NewTarget,
    ) -> Result<TargetRecord, StorageError> {
        ensure_tenant(ctx)?;
        if target.controller_id.trim().is_empty() {
            return Err(StorageError::invalid("controller_id required"));
        }
        let mut state = self.write()?;
        let key = (ctx.tenant_id.clone(), target.controller_id.clone());
        if state.targets.contains_key(&key) {
            return Err(StorageError::conflict(format!(
                "target {} already exists",
                target.controller_id
            )));
        }
        let record = TargetRecord {
            tenant_id: ctx.tenant_id.clone(),
            controller_id: target.controller_id,
            name: target.name,
            description: target.description,
            assigned_ds_id: None,
            installed_ds_id: None,
            install_date_ms: None,
            update_status: TargetUpdateStatus::Unknown,
            last_target_query_ms: None,
            revision: 1,
            audit: AuditMetadata::created(ctx.user_id.clone(), now_epoch_ms()),
        };
        state.targets.insert(key, record.clone());
        Ok(record)
    }

    async fn find_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Option<TargetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        Ok(state.target(&ctx.tenant_id, controller_id).cloned())
    }

    async fn find_targets(
        &self,
        ctx: &TenantContext,
        controller_ids: &[String],
    ) -> Result<Vec<TargetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        Ok(controller_ids
            .iter()
            .filter_map(|id| state.target(&ctx.tenant_id, id).cloned())
            .collect())
    }

    async fn update_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
        update: TargetMetadataUpdate,
    ) -> Result<Option<TargetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let mut state = self.write()?;
        let key = (ctx.tenant_id.clone(), controller_id.to_string());
        let Some(target) = state.targets.get_mut(&key) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            target.name = name;
        }
        if let Some(description) = update.description {
            target.description = Some(description);
        }
        target.audit.touch(&ctx.user_id, now_epoch_ms());
        Ok(Some(target.clone()))
    }

    async fn mark_target_contacted(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
        at_ms: i64,
    ) -> Result<Option<TargetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let mut state = self.write()?;
        let key = (ctx.tenant_id.clone(), controller_id.to_string());
        let Some(target) = state.targets.get_mut(&key) else {
            return Ok(None);
        };
        target.last_target_query_ms = Some(at_ms);
        if target.update_status == TargetUpdateStatus::Unknown {
            target.update_status = TargetUpdateStatus::Registered;
        }
        Ok(Some(target.clone()))
    }

    async fn delete_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<bool, StorageError> {
        ensure_tenant(ctx)?;
        let mut state = self.write()?;
        let key = (ctx.tenant_id.clone(), controller_id.to_string());
        if state.targets.remove(&key).is_none() {
            return Ok(false);
        }
        let action_ids: Vec<i64> = state
            .actions
            .values()
            .filter(|action| action.tenant_id == ctx.tenant_id && action.controller_id == controller_id)
            .map(|action| action.action_id)
            .collect();
        for action_id in action_ids {
            state.actions.remove(&action_id);
            state.statuses.remove(&action_id);
        }
        Ok(true)
    }
}
