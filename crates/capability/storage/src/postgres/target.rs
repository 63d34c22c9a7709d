//! Postgres Target 存储实现

use crate::error::StorageError;
use crate::models::{NewTarget, TargetMetadataUpdate, TargetRecord};
use crate::postgres::{PgRepository, TARGET_COLUMNS, target_from_row};
use crate::traits::TargetStore;
use crate::validation::ensure_tenant;
use domain::{TargetUpdateStatus, TenantContext, now_epoch_ms};

#[async_trait::async_trait]
impl TargetStore for PgRepository {
    async fn create_target(
        &self,
        ctx: &TenantContext,
        target: NewTarget,
    ) -> Result<TargetRecord, StorageError> {
        ensure_tenant(ctx)?;
        if target.controller_id.trim().is_empty() {
            return Err(StorageError::invalid("controller_id required"));
        }
        let now_ms = now_epoch_ms();
        let sql = format!(
            "insert into fota_targets \
             (tenant_id, controller_id, name, description, update_status, revision, \
             created_by, created_at_ms, last_modified_by, last_modified_at_ms) \
             values ($1, $2, $3, $4, $5, 1, $6, $7, $6, $7) \
             returning {TARGET_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(&target.controller_id)
            .bind(&target.name)
            .bind(&target.description)
            .bind(TargetUpdateStatus::Unknown.code())
            .bind(&ctx.user_id)
            .bind(now_ms)
            .fetch_one(&self.pool)
            .await?;
        target_from_row(&row)
    }

    async fn find_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Option<TargetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let sql = format!(
            "select {TARGET_COLUMNS} from fota_targets \
             where tenant_id = $1 and controller_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(controller_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(target_from_row).transpose()
    }

    async fn find_targets(
        &self,
        ctx: &TenantContext,
        controller_ids: &[String],
    ) -> Result<Vec<TargetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        if controller_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select {TARGET_COLUMNS} from fota_targets \
             where tenant_id = $1 and controller_id = any($2)"
        );
        let rows = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(controller_ids)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(target_from_row).collect()
    }

    async fn update_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
        update: TargetMetadataUpdate,
    ) -> Result<Option<TargetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let sql = format!(
            "update fota_targets set \
             name = coalesce($3, name), \
             description = coalesce($4, description), \
             last_modified_by = $5, last_modified_at_ms = $6 \
             where tenant_id = $1 and controller_id = $2 \
             returning {TARGET_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(controller_id)
            .bind(update.name)
            .bind(update.description)
            .bind(&ctx.user_id)
            .bind(now_epoch_ms())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(target_from_row).transpose()
    }

    async fn mark_target_contacted(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
        at_ms: i64,
    ) -> Result<Option<TargetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let sql = format!(
            "update fota_targets set \
             last_target_query_ms = $3, \
             update_status = case when update_status = $4 then $5 else update_status end \
             where tenant_id = $1 and controller_id = $2 \
             returning {TARGET_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(controller_id)
            .bind(at_ms)
            .bind(TargetUpdateStatus::Unknown.code())
            .bind(TargetUpdateStatus::Registered.code())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(target_from_row).transpose()
    }

    async fn delete_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<bool, StorageError> {
        ensure_tenant(ctx)?;
        // Action 与状态历史通过外键级联删除
        let result = sqlx::query("delete from fota_targets where tenant_id = $1 and controller_id = $2")
            .bind(&ctx.tenant_id)
            .bind(controller_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
