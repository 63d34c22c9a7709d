//! 追踪初始化、操作 ID 与部署指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 部署指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub assignments_requested: u64,
    pub actions_created: u64,
    pub targets_already_assigned: u64,
    pub targets_failed: u64,
    pub actions_superseded: u64,
    pub actions_canceled: u64,
    pub cancel_requests: u64,
    pub force_quits: u64,
    pub status_updates: u64,
    pub optimistic_conflicts: u64,
    pub assignment_latency_ms_total: u64,
    pub assignment_latency_ms_count: u64,
}

/// 部署指标（进程内原子计数）。
pub struct DeploymentMetrics {
    assignments_requested: AtomicU64,
    actions_created: AtomicU64,
    targets_already_assigned: AtomicU64,
    targets_failed: AtomicU64,
    actions_superseded: AtomicU64,
    actions_canceled: AtomicU64,
    cancel_requests: AtomicU64,
    force_quits: AtomicU64,
    status_updates: AtomicU64,
    optimistic_conflicts: AtomicU64,
    assignment_latency_ms_total: AtomicU64,
    assignment_latency_ms_count: AtomicU64,
}

impl DeploymentMetrics {
    pub fn new() -> Self {
        Self {
            assignments_requested: AtomicU64::new(0),
            actions_created: AtomicU64::new(0),
            targets_already_assigned: AtomicU64::new(0),
            targets_failed: AtomicU64::new(0),
            actions_superseded: AtomicU64::new(0),
            actions_canceled: AtomicU64::new(0),
            cancel_requests: AtomicU64::new(0),
            force_quits: AtomicU64::new(0),
            status_updates: AtomicU64::new(0),
            optimistic_conflicts: AtomicU64::new(0),
            assignment_latency_ms_total: AtomicU64::new(0),
            assignment_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            assignments_requested: self.assignments_requested.load(Ordering::Relaxed),
            actions_created: self.actions_created.load(Ordering::Relaxed),
            targets_already_assigned: self.targets_already_assigned.load(Ordering::Relaxed),
            targets_failed: self.targets_failed.load(Ordering::Relaxed),
            actions_superseded: self.actions_superseded.load(Ordering::Relaxed),
            actions_canceled: self.actions_canceled.load(Ordering::Relaxed),
            cancel_requests: self.cancel_requests.load(Ordering::Relaxed),
            force_quits: self.force_quits.load(Ordering::Relaxed),
            status_updates: self.status_updates.load(Ordering::Relaxed),
            optimistic_conflicts: self.optimistic_conflicts.load(Ordering::Relaxed),
            assignment_latency_ms_total: self.assignment_latency_ms_total.load(Ordering::Relaxed),
            assignment_latency_ms_count: self.assignment_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for DeploymentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<DeploymentMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static DeploymentMetrics {
    METRICS.get_or_init(DeploymentMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 operation_id（用于串联一次批量分配的多个子事务）。
pub fn new_operation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录分配请求次数。
pub fn record_assignment_requested() {
    metrics()
        .assignments_requested
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录新建 Action 数。
pub fn record_actions_created(count: u64) {
    metrics().actions_created.fetch_add(count, Ordering::Relaxed);
}

/// 记录已是目标分发集而跳过的 Target 数。
pub fn record_targets_already_assigned(count: u64) {
    metrics()
        .targets_already_assigned
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录分配失败的 Target 数。
pub fn record_targets_failed(count: u64) {
    metrics().targets_failed.fetch_add(count, Ordering::Relaxed);
}

/// 记录被新分配取代的 Action 数。
pub fn record_actions_superseded(count: u64) {
    metrics()
        .actions_superseded
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录进入 CANCELED 的 Action 数。
pub fn record_action_canceled() {
    metrics().actions_canceled.fetch_add(1, Ordering::Relaxed);
}

/// 记录进入 CANCELING 的取消请求数。
pub fn record_cancel_requested() {
    metrics().cancel_requests.fetch_add(1, Ordering::Relaxed);
}

/// 记录强制退出次数。
pub fn record_force_quit() {
    metrics().force_quits.fetch_add(1, Ordering::Relaxed);
}

/// 记录设备状态回报次数。
pub fn record_status_update() {
    metrics().status_updates.fetch_add(1, Ordering::Relaxed);
}

/// 记录乐观锁冲突次数。
pub fn record_optimistic_conflict() {
    metrics()
        .optimistic_conflicts
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录一次批量分配耗时（毫秒）。
pub fn record_assignment_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .assignment_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .assignment_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}
