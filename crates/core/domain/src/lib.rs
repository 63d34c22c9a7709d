pub mod action;
pub mod codes;
pub mod target;

pub use action::{ActionStatus, ActionType};
pub use codes::{CodeMap, DomainError, validate_code_maps};
pub use target::TargetUpdateStatus;

/// 租户上下文：所有模块共享的执行上下文。
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub user_id: String,
}

impl TenantContext {
    /// 构造显式租户与操作者的上下文。
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
        }
    }

    /// 设备侧回报使用的系统上下文。
    pub fn system(tenant_id: impl Into<String>) -> Self {
        Self::new(tenant_id, "system")
    }
}

impl Default for TenantContext {
    /// 空上下文（仅用于测试或占位）。
    fn default() -> Self {
        Self {
            tenant_id: "".to_string(),
            user_id: "".to_string(),
        }
    }
}

/// 审计元数据：以值的方式嵌入每个实体。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AuditMetadata {
    pub created_by: String,
    pub created_at_ms: i64,
    pub last_modified_by: String,
    pub last_modified_at_ms: i64,
}

impl AuditMetadata {
    pub fn created(user_id: impl Into<String>, now_ms: i64) -> Self {
        let user_id = user_id.into();
        Self {
            created_by: user_id.clone(),
            created_at_ms: now_ms,
            last_modified_by: user_id,
            last_modified_at_ms: now_ms,
        }
    }

    /// 记录一次修改。
    pub fn touch(&mut self, user_id: &str, now_ms: i64) {
        self.last_modified_by = user_id.to_string();
        self.last_modified_at_ms = now_ms;
    }
}

/// 当前时间（epoch 毫秒）。
pub fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
