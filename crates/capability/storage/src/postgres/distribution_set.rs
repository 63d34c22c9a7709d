//! Postgres 分发集存储实现

use crate::error::StorageError;
use crate::models::{
    DistributionSetDeletion, DistributionSetRecord, NewDistributionSet, is_complete,
};
use crate::postgres::{DS_COLUMNS, PgRepository, distribution_set_from_row};
use crate::traits::DistributionSetStore;
use crate::validation::ensure_tenant;
use domain::{TenantContext, now_epoch_ms};

#[async_trait::async_trait]
impl DistributionSetStore for PgRepository {
    async fn create_distribution_set(
        &self,
        ctx: &TenantContext,
        record: NewDistributionSet,
    ) -> Result<DistributionSetRecord, StorageError> {
        ensure_tenant(ctx)?;
        let complete = is_complete(&record.required_module_types, &record.module_types);
        let sql = format!(
            "insert into fota_distribution_sets \
             (tenant_id, name, version, type_key, required_module_types, module_types, \
             complete, deleted, revision, created_by, created_at_ms, last_modified_by, \
             last_modified_at_ms) \
             values ($1, $2, $3, $4, $5, $6, $7, false, 1, $8, $9, $8, $9) \
             returning {DS_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(&record.name)
            .bind(&record.version)
            .bind(&record.type_key)
            .bind(&record.required_module_types)
            .bind(&record.module_types)
            .bind(complete)
            .bind(&ctx.user_id)
            .bind(now_epoch_ms())
            .fetch_one(&self.pool)
            .await?;
        distribution_set_from_row(&row)
    }

    async fn find_distribution_set(
        &self,
        ctx: &TenantContext,
        ds_id: i64,
    ) -> Result<Option<DistributionSetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let sql = format!(
            "select {DS_COLUMNS} from fota_distribution_sets where tenant_id = $1 and ds_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(ds_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(distribution_set_from_row).transpose()
    }

    async fn find_distribution_sets(
        &self,
        ctx: &TenantContext,
        ds_ids: &[i64],
    ) -> Result<Vec<DistributionSetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        if ds_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select {DS_COLUMNS} from fota_distribution_sets \
             where tenant_id = $1 and ds_id = any($2) order by ds_id"
        );
        let rows = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(ds_ids)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(distribution_set_from_row).collect()
    }

    async fn set_modules(
        &self,
        ctx: &TenantContext,
        ds_id: i64,
        module_types: Vec<String>,
    ) -> Result<Option<DistributionSetRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "select {DS_COLUMNS} from fota_distribution_sets \
             where tenant_id = $1 and ds_id = $2 for update"
        );
        let row = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(ds_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let current = distribution_set_from_row(&row)?;
        let referenced: bool =
            sqlx::query_scalar("select exists(select 1 from fota_actions where ds_id = $1)")
                .bind(ds_id)
                .fetch_one(&mut *tx)
                .await?;
        if current.deleted || referenced {
            return Err(StorageError::invalid(format!(
                "distribution set {} is in use and cannot be modified",
                ds_id
            )));
        }
        let complete = is_complete(&current.required_module_types, &module_types);
        let sql = format!(
            "update fota_distribution_sets set \
             module_types = $3, complete = $4, revision = revision + 1, \
             last_modified_by = $5, last_modified_at_ms = $6 \
             where tenant_id = $1 and ds_id = $2 \
             returning {DS_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(ds_id)
            .bind(&module_types)
            .bind(complete)
            .bind(&ctx.user_id)
            .bind(now_epoch_ms())
            .fetch_one(&mut *tx)
            .await?;
        let updated = distribution_set_from_row(&row)?;
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn delete_distribution_set(
        &self,
        ctx: &TenantContext,
        ds_id: i64,
    ) -> Result<Option<DistributionSetDeletion>, StorageError> {
        ensure_tenant(ctx)?;
        let mut tx = self.pool.begin().await?;
        let exists: Option<i64> = sqlx::query_scalar(
            "select ds_id from fota_distribution_sets where tenant_id = $1 and ds_id = $2 for update",
        )
        .bind(&ctx.tenant_id)
        .bind(ds_id)
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Ok(None);
        }
        let referenced: bool =
            sqlx::query_scalar("select exists(select 1 from fota_actions where ds_id = $1)")
                .bind(ds_id)
                .fetch_one(&mut *tx)
                .await?;
        let deletion = if referenced {
            sqlx::query(
                "update fota_distribution_sets set deleted = true, revision = revision + 1, \
                 last_modified_by = $3, last_modified_at_ms = $4 \
                 where tenant_id = $1 and ds_id = $2",
            )
            .bind(&ctx.tenant_id)
            .bind(ds_id)
            .bind(&ctx.user_id)
            .bind(now_epoch_ms())
            .execute(&mut *tx)
            .await?;
            DistributionSetDeletion::Soft
        } else {
            sqlx::query("delete from fota_distribution_sets where tenant_id = $1 and ds_id = $2")
                .bind(&ctx.tenant_id)
                .bind(ds_id)
                .execute(&mut *tx)
                .await?;
            DistributionSetDeletion::Hard
        };
        tx.commit().await?;
        Ok(Some(deletion))
    }
}
