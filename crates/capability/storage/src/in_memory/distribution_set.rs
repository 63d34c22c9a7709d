//! 分发集内存存储实现

use crate::error::StorageError;
use crate::in_memory::InMemoryRepository;
use crate::models::{
    DistributionSetDeletion, DistributionSetRecord, NewDistributionSet, is_complete,
};
use crate::traits::DistributionSetStore;
use crate::validation::ensure_tenant;
use domain::{AuditMetadata, TenantContext, now_epoch_ms};

#[async_trait::async_trait]
impl DistributionSetStore for InMemoryRepository {
    async fn create_distribution_set(
        &self,
        ctx: &TenantContext,
        record: NewDistributionSet,
    ) -> Result<DistributionSetRecord, StorageError> {
        ensure_tenant(ctx)?;
        let mut state = self.write()?;
        let duplicate = state.distribution_sets.values().any(|ds| {
            ds.tenant_id == ctx.tenant_id && ds.name == record.name && ds.version == record.version
        });
        if duplicate {
            return Err(StorageError::conflict(format!(
                "distribution set {}:{} already exists",
                record.name, record.version
            )));
        }
        let ds_id = state.next_ds_id();
        let created = DistributionSetRecord {
            tenant_id: ctx.tenant_id.clone(),
            ds_id,
            complete: is_complete(&record.required_module_types, &record.module_types),
            name: record.name,
            version: record.version,
            type_key: record.type_key,
            required_module_types: record.required_module_types,
            module_types: record.module_types,
            deleted: false,
            revision: 1,
            audit: AuditMetadata::created(ctx.user_id.clone(), now_epoch_ms()),
        };
        state.distribution_sets.insert(ds_id, created.clone());
        Ok(created)
    }

    async fn find_distribution_set(
        &self,
        ctx: &TenantContext,
        ds_id: i64,
    ) -> Result<Option<DistributionSetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        Ok(state
            .distribution_sets
            .get(&ds_id)
            .filter(|ds| ds.tenant_id == ctx.tenant_id)
            .cloned())
    }

    async fn find_distribution_sets(
        &self,
        ctx: &TenantContext,
        ds_ids: &[i64],
    ) -> Result<Vec<DistributionSetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let state = self.read()?;
        Ok(ds_ids
            .iter()
            .filter_map(|id| state.distribution_sets.get(id))
            .filter(|ds| ds.tenant_id == ctx.tenant_id)
            .cloned()
            .collect())
    }

    async fn set_modules(
        &self,
        ctx: &TenantContext,
        ds_id: i64,
        module_types: Vec<String>,
    ) -> Result<Option<DistributionSetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let mut state = self.write()?;
        let referenced = state.ds_referenced(ds_id);
        let Some(ds) = state
            .distribution_sets
            .get_mut(&ds_id)
            .filter(|ds| ds.tenant_id == ctx.tenant_id)
        else {
            return Ok(None);
        };
        if ds.deleted || referenced {
            return Err(StorageError::invalid(format!(
                "distribution set {} is in use and cannot be modified",
                ds_id
            )));
        }
        ds.complete = is_complete(&ds.required_module_types, &module_types);
        ds.module_types = module_types;
        ds.revision += 1;
        ds.audit.touch(&ctx.user_id, now_epoch_ms());
        Ok(Some(ds.clone()))
    }

    async fn delete_distribution_set(
        &self,
        ctx: &TenantContext,
        ds_id: i64,
    ) -> Result<Option<DistributionSetDeletion>, StorageError> {
        ensure_tenant(ctx)?;
        let mut state = self.write()?;
        let exists = state
            .distribution_sets
            .get(&ds_id)
            .is_some_and(|ds| ds.tenant_id == ctx.tenant_id);
        if !exists {
            return Ok(None);
        }
        if !state.ds_referenced(ds_id) {
            state.distribution_sets.remove(&ds_id);
            return Ok(Some(DistributionSetDeletion::Hard));
        }
        if let Some(ds) = state.distribution_sets.get_mut(&ds_id) {
            ds.deleted = true;
            ds.revision += 1;
            ds.audit.touch(&ctx.user_id, now_epoch_ms());
        }
        Ok(Some(DistributionSetDeletion::Soft))
    }
}
