//! # PostgreSQL 存储实现模块
//!
//! `PgRepository` 实现 TargetStore / DistributionSetStore / ActionStore。
//!
//! ## 表结构
//!
//! 见 `migrations/0001_deployment.sql`：
//! - `fota_targets`：主键 (tenant_id, controller_id)，`revision` 为乐观锁版本
//! - `fota_distribution_sets`：(tenant_id, name, version) 唯一
//! - `fota_actions`：外键级联到 Target，`(tenant_id, controller_id, active)` 索引
//! - `fota_action_status`：外键级联到 Action，只追加
//!
//! 枚举以整数编码持久化（见 `domain` 中的编码表），读取时未知编码直接报错。
//!
//! ## 事务
//!
//! `apply_target_changes` 在一个事务内为每个 Target 开一个 savepoint：
//! 单个 Target 的冲突只回滚它自己的 savepoint。

pub mod action;
pub mod distribution_set;
pub mod target;

use crate::error::StorageError;
use crate::models::{ActionRecord, DistributionSetRecord, MaintenanceWindowSpec, TargetRecord};
use domain::{ActionStatus, ActionType, AuditMetadata, TargetUpdateStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;

const SCHEMA: &str = include_str!("../../migrations/0001_deployment.sql");

pub(crate) const TARGET_COLUMNS: &str = "tenant_id, controller_id, name, description, \
     assigned_ds_id, installed_ds_id, install_date_ms, update_status, last_target_query_ms, \
     revision, created_by, created_at_ms, last_modified_by, last_modified_at_ms";

pub(crate) const DS_COLUMNS: &str = "ds_id, tenant_id, name, version, type_key, \
     required_module_types, module_types, complete, deleted, \
     revision, created_by, created_at_ms, last_modified_by, last_modified_at_ms";

pub(crate) const ACTION_COLUMNS: &str = "action_id, tenant_id, controller_id, ds_id, active, \
     status, action_type, forced_time_ms, weight, maintenance_schedule, maintenance_duration, \
     maintenance_timezone, last_status_code, rollout_id, rollout_group_id, initiated_by, \
     revision, created_by, created_at_ms, last_modified_by, last_modified_at_ms";

/// PostgreSQL 仓储
#[derive(Clone)]
pub struct PgRepository {
    pub pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 建表（可重复执行）
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!(target: "fota.storage", "schema_migrated");
        Ok(())
    }
}

pub(crate) fn audit_from_row(row: &PgRow) -> Result<AuditMetadata, StorageError> {
    Ok(AuditMetadata {
        created_by: row.try_get("created_by")?,
        created_at_ms: row.try_get("created_at_ms")?,
        last_modified_by: row.try_get("last_modified_by")?,
        last_modified_at_ms: row.try_get("last_modified_at_ms")?,
    })
}

pub(crate) fn target_from_row(row: &PgRow) -> Result<TargetRecord, StorageError> {
    let update_status: i32 = row.try_get("update_status")?;
    Ok(TargetRecord {
        tenant_id: row.try_get("tenant_id")?,
        controller_id: row.try_get("controller_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        assigned_ds_id: row.try_get("assigned_ds_id")?,
        installed_ds_id: row.try_get("installed_ds_id")?,
        install_date_ms: row.try_get("install_date_ms")?,
        update_status: TargetUpdateStatus::from_code(update_status)?,
        last_target_query_ms: row.try_get("last_target_query_ms")?,
        revision: row.try_get("revision")?,
        audit: audit_from_row(row)?,
    })
}

pub(crate) fn distribution_set_from_row(row: &PgRow) -> Result<DistributionSetRecord, StorageError> {
    Ok(DistributionSetRecord {
        tenant_id: row.try_get("tenant_id")?,
        ds_id: row.try_get("ds_id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        type_key: row.try_get("type_key")?,
        required_module_types: row.try_get("required_module_types")?,
        module_types: row.try_get("module_types")?,
        complete: row.try_get("complete")?,
        deleted: row.try_get("deleted")?,
        revision: row.try_get("revision")?,
        audit: audit_from_row(row)?,
    })
}

pub(crate) fn action_from_row(row: &PgRow) -> Result<ActionRecord, StorageError> {
    let status: i32 = row.try_get("status")?;
    let action_type: i32 = row.try_get("action_type")?;
    let schedule: Option<String> = row.try_get("maintenance_schedule")?;
    let duration: Option<String> = row.try_get("maintenance_duration")?;
    let timezone: Option<String> = row.try_get("maintenance_timezone")?;
    let maintenance = match (schedule, duration, timezone) {
        (Some(schedule), Some(duration), Some(timezone)) => Some(MaintenanceWindowSpec {
            schedule,
            duration,
            timezone,
        }),
        _ => None,
    };
    Ok(ActionRecord {
        tenant_id: row.try_get("tenant_id")?,
        action_id: row.try_get("action_id")?,
        controller_id: row.try_get("controller_id")?,
        ds_id: row.try_get("ds_id")?,
        active: row.try_get("active")?,
        status: ActionStatus::from_code(status)?,
        action_type: ActionType::from_code(action_type)?,
        forced_time_ms: row.try_get("forced_time_ms")?,
        weight: row.try_get("weight")?,
        maintenance,
        last_status_code: row.try_get("last_status_code")?,
        rollout_id: row.try_get("rollout_id")?,
        rollout_group_id: row.try_get("rollout_group_id")?,
        initiated_by: row.try_get("initiated_by")?,
        revision: row.try_get("revision")?,
        audit: audit_from_row(row)?,
    })
}
