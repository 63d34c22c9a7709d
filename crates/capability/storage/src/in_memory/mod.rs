//! 内存存储实现模块
//!
//! 用于本地测试和无数据库部署。
//!
//! 所有实体共享一个 `RwLock<RepositoryState>`，
//! 因此 `apply_target_changes` 可在一次写锁内先校验再写入，
//! 与 PostgreSQL 的 savepoint 语义一致。
//!
//! - TargetStore: target.rs
//! - DistributionSetStore: distribution_set.rs
//! - ActionStore: action.rs

pub mod action;
pub mod distribution_set;
pub mod target;

use crate::error::StorageError;
use crate::models::{ActionRecord, ActionStatusRecord, DistributionSetRecord, TargetRecord};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// 内存仓储（可 Clone，克隆共享同一份数据）。
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<RwLock<RepositoryState>>,
}

#[derive(Default)]
pub(crate) struct RepositoryState {
    /// (tenant_id, controller_id) -> Target
    pub(crate) targets: HashMap<(String, String), TargetRecord>,
    pub(crate) distribution_sets: BTreeMap<i64, DistributionSetRecord>,
    pub(crate) actions: BTreeMap<i64, ActionRecord>,
    /// action_id -> 状态历史（追加顺序）
    pub(crate) statuses: HashMap<i64, Vec<ActionStatusRecord>>,
    next_ds_id: i64,
    next_action_id: i64,
    next_status_id: i64,
}

impl RepositoryState {
    pub(crate) fn next_ds_id(&mut self) -> i64 {
        self.next_ds_id += 1;
        self.next_ds_id
    }

    pub(crate) fn next_action_id(&mut self) -> i64 {
        self.next_action_id += 1;
        self.next_action_id
    }

    pub(crate) fn next_status_id(&mut self) -> i64 {
        self.next_status_id += 1;
        self.next_status_id
    }

    pub(crate) fn target(&self, tenant_id: &str, controller_id: &str) -> Option<&TargetRecord> {
        self.targets
            .get(&(tenant_id.to_string(), controller_id.to_string()))
    }

    pub(crate) fn tenant_action(&self, tenant_id: &str, action_id: i64) -> Option<&ActionRecord> {
        self.actions
            .get(&action_id)
            .filter(|action| action.tenant_id == tenant_id)
    }

    pub(crate) fn ds_referenced(&self, ds_id: i64) -> bool {
        self.actions.values().any(|action| action.ds_id == ds_id)
    }
}

impl InMemoryRepository {
    /// 创建空仓储
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, RepositoryState>, StorageError> {
        self.state
            .read()
            .map_err(|_| StorageError::new("lock failed"))
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, RepositoryState>, StorageError> {
        self.state
            .write()
            .map_err(|_| StorageError::new("lock failed"))
    }
}
