//! 验证辅助函数
//!
//! - ensure_tenant：验证租户 ID 非空

use crate::error::StorageError;
use domain::TenantContext;

/// 验证租户 ID 非空
///
/// 确保所有数据访问都有有效的租户上下文。
pub fn ensure_tenant(ctx: &TenantContext) -> Result<(), StorageError> {
    if ctx.tenant_id.is_empty() {
        return Err(StorageError::invalid("tenant_id required"));
    }
    Ok(())
}
