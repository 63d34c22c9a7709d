//! Postgres Action 存储实现

use std::collections::HashMap;

use crate::error::StorageError;
use crate::models::{
    ActionRecord, ActionRef, ActionStatusRecord, ActionWithStatusCount, CommittedChange,
    TargetChange,
};
use crate::postgres::{
    ACTION_COLUMNS, PgRepository, TARGET_COLUMNS, action_from_row, target_from_row,
};
use crate::traits::ActionStore;
use crate::validation::ensure_tenant;
use domain::{ActionStatus, TenantContext, now_epoch_ms};
use sqlx::{Connection, PgConnection, Row};
use tracing::debug;

#[async_trait::async_trait]
impl ActionStore for PgRepository {
    async fn find_action(
        &self,
        ctx: &TenantContext,
        action_id: i64,
    ) -> Result<Option<ActionRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let sql = format!(
            "select {ACTION_COLUMNS} from fota_actions where tenant_id = $1 and action_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(action_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(action_from_row).transpose()
    }

    async fn find_actions_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let sql = format!(
            "select {ACTION_COLUMNS} from fota_actions \
             where tenant_id = $1 and controller_id = $2 \
             order by action_id desc"
        );
        let rows = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(controller_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(action_from_row).collect()
    }

    async fn find_active_actions_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let sql = format!(
            "select {ACTION_COLUMNS} from fota_actions \
             where tenant_id = $1 and controller_id = $2 and active \
             order by action_id"
        );
        let rows = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(controller_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(action_from_row).collect()
    }

    async fn find_active_actions_by_targets(
        &self,
        ctx: &TenantContext,
        controller_ids: &[String],
    ) -> Result<Vec<ActionRecord>, StorageError> {
        ensure_tenant(ctx)?;
        if controller_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select {ACTION_COLUMNS} from fota_actions \
             where tenant_id = $1 and controller_id = any($2) and active \
             order by action_id"
        );
        let rows = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(controller_ids)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(action_from_row).collect()
    }

    async fn count_actions_by_targets(
        &self,
        ctx: &TenantContext,
        controller_ids: &[String],
    ) -> Result<HashMap<String, u64>, StorageError> {
        ensure_tenant(ctx)?;
        if controller_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "select controller_id, count(*) as total from fota_actions \
             where tenant_id = $1 and controller_id = any($2) \
             group by controller_id",
        )
        .bind(&ctx.tenant_id)
        .bind(controller_ids)
        .fetch_all(&self.pool)
        .await?;
        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let controller_id: String = row.try_get("controller_id")?;
            let total: i64 = row.try_get("total")?;
            counts.insert(controller_id, total.max(0) as u64);
        }
        Ok(counts)
    }

    async fn find_actions_with_status_count_by_target(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Vec<ActionWithStatusCount>, StorageError> {
        ensure_tenant(ctx)?;
        let rows = sqlx::query(
            "select a.*, d.name as ds_name, d.version as ds_version, \
             (select count(*) from fota_action_status s where s.action_id = a.action_id) \
             as status_count \
             from fota_actions a \
             join fota_distribution_sets d on d.ds_id = a.ds_id \
             where a.tenant_id = $1 and a.controller_id = $2 \
             order by a.action_id desc",
        )
        .bind(&ctx.tenant_id)
        .bind(controller_id)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(ActionWithStatusCount {
                action: action_from_row(&row)?,
                ds_name: row.try_get("ds_name")?,
                ds_version: row.try_get("ds_version")?,
                status_count: row.try_get("status_count")?,
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
        let rows = sqlx::query(
            "select status_id, tenant_id, action_id, status, ts_ms, messages, code \
             from fota_action_status \
             where tenant_id = $1 and action_id = $2 \
             order by status_id",
        )
        .bind(&ctx.tenant_id)
        .bind(action_id)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let status: i32 = row.try_get("status")?;
            items.push(ActionStatusRecord {
                tenant_id: row.try_get("tenant_id")?,
                status_id: row.try_get("status_id")?,
                action_id: row.try_get("action_id")?,
                status: ActionStatus::from_code(status)?,
                ts_ms: row.try_get("ts_ms")?,
                messages: row.try_get("messages")?,
                code: row.try_get("code")?,
            });
        }
        Ok(items)
    }

    async fn find_last_terminated_action(
        &self,
        ctx: &TenantContext,
        controller_id: &str,
    ) -> Result<Option<ActionRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let sql = format!(
            "select {ACTION_COLUMNS} from fota_actions \
             where tenant_id = $1 and controller_id = $2 and not active \
             order by last_modified_at_ms desc, action_id desc \
             limit 1"
        );
        let row = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(controller_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(action_from_row).transpose()
    }

    async fn apply_target_changes(
        &self,
        ctx: &TenantContext,
        changes: Vec<TargetChange>,
    ) -> Result<Vec<Result<CommittedChange, StorageError>>, StorageError> {
        ensure_tenant(ctx)?;
        let now_ms = now_epoch_ms();
        let total = changes.len();
        let mut results = Vec::with_capacity(total);
        let mut tx = self.pool.begin().await?;
        for change in changes {
            let mut savepoint = Connection::begin(&mut *tx).await?;
            match apply_change(&mut savepoint, ctx, change, now_ms).await {
                Ok(committed) => {
                    savepoint.commit().await?;
                    results.push(Ok(committed));
                }
                Err(err) if err.is_target_scoped() => {
                    savepoint.rollback().await?;
                    results.push(Err(err));
                }
                Err(err) => return Err(err),
            }
        }
        tx.commit().await?;
        let committed = results.iter().filter(|result| result.is_ok()).count();
        debug!(
            target: "fota.storage",
            tenant_id = %ctx.tenant_id,
            total = total,
            committed = committed,
            "target_changes_applied"
        );
        Ok(results)
    }
}

async fn apply_change(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    change: TargetChange,
    now_ms: i64,
) -> Result<CommittedChange, StorageError> {
    let current: Option<i64> = sqlx::query_scalar(
        "select revision from fota_targets \
         where tenant_id = $1 and controller_id = $2 for update",
    )
    .bind(&ctx.tenant_id)
    .bind(&change.controller_id)
    .fetch_optional(&mut *conn)
    .await?;
    match current {
        None => {
            return Err(StorageError::not_found(format!(
                "target {} not found",
                change.controller_id
            )));
        }
        Some(revision) if revision != change.expected_revision => {
            return Err(StorageError::conflict(format!(
                "target {} was modified concurrently (expected revision {}, found {})",
                change.controller_id, change.expected_revision, revision
            )));
        }
        Some(_) => {}
    }

    let insert_action = format!(
        "insert into fota_actions \
         (tenant_id, controller_id, ds_id, active, status, action_type, forced_time_ms, weight, \
         maintenance_schedule, maintenance_duration, maintenance_timezone, last_status_code, \
         rollout_id, rollout_group_id, initiated_by, revision, \
         created_by, created_at_ms, last_modified_by, last_modified_at_ms) \
         values ($1, $2, $3, true, $4, $5, $6, $7, $8, $9, $10, null, $11, $12, $13, 1, \
         $14, $15, $14, $15) \
         returning {ACTION_COLUMNS}"
    );
    let mut created_actions = Vec::with_capacity(change.new_actions.len());
    for new_action in change.new_actions {
        let maintenance = new_action.maintenance.as_ref();
        let row = sqlx::query(&insert_action)
            .bind(&ctx.tenant_id)
            .bind(&change.controller_id)
            .bind(new_action.ds_id)
            .bind(new_action.status.code())
            .bind(new_action.action_type.code())
            .bind(new_action.forced_time_ms)
            .bind(new_action.weight)
            .bind(maintenance.map(|window| window.schedule.as_str()))
            .bind(maintenance.map(|window| window.duration.as_str()))
            .bind(maintenance.map(|window| window.timezone.as_str()))
            .bind(new_action.rollout_id)
            .bind(new_action.rollout_group_id)
            .bind(&new_action.initiated_by)
            .bind(&ctx.user_id)
            .bind(now_ms)
            .fetch_one(&mut *conn)
            .await?;
        created_actions.push(action_from_row(&row)?);
    }

    let update_action = format!(
        "update fota_actions set \
         status = $5, active = $6, action_type = $7, last_status_code = $8, \
         revision = revision + 1, last_modified_by = $9, last_modified_at_ms = $10 \
         where tenant_id = $1 and controller_id = $2 and action_id = $3 and revision = $4 \
         returning {ACTION_COLUMNS}"
    );
    let mut updated_actions = Vec::with_capacity(change.action_updates.len());
    for update in change.action_updates {
        let row = sqlx::query(&update_action)
            .bind(&ctx.tenant_id)
            .bind(&change.controller_id)
            .bind(update.action_id)
            .bind(update.expected_revision)
            .bind(update.status.code())
            .bind(update.active)
            .bind(update.action_type.code())
            .bind(update.last_status_code)
            .bind(&ctx.user_id)
            .bind(now_ms)
            .fetch_optional(&mut *conn)
            .await?;
        let Some(row) = row else {
            return Err(StorageError::conflict(format!(
                "action {} was modified concurrently or does not belong to target {}",
                update.action_id, change.controller_id
            )));
        };
        updated_actions.push(action_from_row(&row)?);
    }

    for entry in change.status_entries {
        let action_id = match entry.action_ref {
            ActionRef::Existing(action_id) => action_id,
            ActionRef::New(index) => created_actions
                .get(index)
                .map(|action| action.action_id)
                .ok_or_else(|| StorageError::invalid("status entry refers to unknown new action"))?,
        };
        let owned: bool = sqlx::query_scalar(
            "select exists(select 1 from fota_actions \
             where tenant_id = $1 and controller_id = $2 and action_id = $3)",
        )
        .bind(&ctx.tenant_id)
        .bind(&change.controller_id)
        .bind(action_id)
        .fetch_one(&mut *conn)
        .await?;
        if !owned {
            return Err(StorageError::not_found(format!(
                "action {} not found for target {}",
                action_id, change.controller_id
            )));
        }
        sqlx::query(
            "insert into fota_action_status (tenant_id, action_id, status, ts_ms, messages, code) \
             values ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&ctx.tenant_id)
        .bind(action_id)
        .bind(entry.status.code())
        .bind(entry.ts_ms)
        .bind(&entry.messages)
        .bind(entry.code)
        .execute(&mut *conn)
        .await?;
    }

    let row = match change.target_update {
        Some(update) => {
            let sql = format!(
                "update fota_targets set \
                 assigned_ds_id = $3, installed_ds_id = $4, install_date_ms = $5, \
                 update_status = $6, revision = revision + 1, \
                 last_modified_by = $7, last_modified_at_ms = $8 \
                 where tenant_id = $1 and controller_id = $2 \
                 returning {TARGET_COLUMNS}"
            );
            sqlx::query(&sql)
                .bind(&ctx.tenant_id)
                .bind(&change.controller_id)
                .bind(update.assigned_ds_id)
                .bind(update.installed_ds_id)
                .bind(update.install_date_ms)
                .bind(update.update_status.code())
                .bind(&ctx.user_id)
                .bind(now_ms)
                .fetch_one(&mut *conn)
                .await?
        }
        None => {
            let sql = format!(
                "update fota_targets set \
                 revision = revision + 1, last_modified_by = $3, last_modified_at_ms = $4 \
                 where tenant_id = $1 and controller_id = $2 \
                 returning {TARGET_COLUMNS}"
            );
            sqlx::query(&sql)
                .bind(&ctx.tenant_id)
                .bind(&change.controller_id)
                .bind(&ctx.user_id)
                .bind(now_ms)
                .fetch_one(&mut *conn)
                .await?
        }
    };

    Ok(CommittedChange {
        target: target_from_row(&row)?,
        created_actions,
        updated_actions,
    })
}
