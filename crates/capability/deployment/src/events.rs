//! 部署事件与事件出口。
//!
//! 事件只在对应存储提交成功后发布；投递可靠性由外部总线负责。

use std::sync::{Arc, Mutex};

use domain::{ActionStatus, ActionType};
use fota_storage::{ActionRecord, CommittedChange};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Action 快照载荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionEvent {
    pub tenant_id: String,
    pub action_id: i64,
    pub controller_id: String,
    pub ds_id: i64,
    pub status: ActionStatus,
    pub action_type: ActionType,
    pub active: bool,
    pub rollout_id: Option<i64>,
    pub rollout_group_id: Option<i64>,
}

impl From<&ActionRecord> for ActionEvent {
    fn from(action: &ActionRecord) -> Self {
        Self {
            tenant_id: action.tenant_id.clone(),
            action_id: action.action_id,
            controller_id: action.controller_id.clone(),
            ds_id: action.ds_id,
            status: action.status,
            action_type: action.action_type,
            active: action.active,
            rollout_id: action.rollout_id,
            rollout_group_id: action.rollout_group_id,
        }
    }
}

/// 面向设备的分配 / 取消通知载荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentEvent {
    pub tenant_id: String,
    pub controller_id: String,
    pub action_id: i64,
    pub ds_id: i64,
    pub action_type: ActionType,
}

impl From<&ActionRecord> for AssignmentEvent {
    fn from(action: &ActionRecord) -> Self {
        Self {
            tenant_id: action.tenant_id.clone(),
            controller_id: action.controller_id.clone(),
            action_id: action.action_id,
            ds_id: action.ds_id,
            action_type: action.action_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum DeploymentEvent {
    ActionCreated(ActionEvent),
    ActionUpdated(ActionEvent),
    TargetAssigned(AssignmentEvent),
    CancelTargetAssignment(AssignmentEvent),
}

impl DeploymentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DeploymentEvent::ActionCreated(_) => "action_created",
            DeploymentEvent::ActionUpdated(_) => "action_updated",
            DeploymentEvent::TargetAssigned(_) => "target_assigned",
            DeploymentEvent::CancelTargetAssignment(_) => "cancel_target_assignment",
        }
    }

    pub fn action_id(&self) -> i64 {
        match self {
            DeploymentEvent::ActionCreated(event) | DeploymentEvent::ActionUpdated(event) => {
                event.action_id
            }
            DeploymentEvent::TargetAssigned(event)
            | DeploymentEvent::CancelTargetAssignment(event) => event.action_id,
        }
    }

    pub fn controller_id(&self) -> &str {
        match self {
            DeploymentEvent::ActionCreated(event) | DeploymentEvent::ActionUpdated(event) => {
                &event.controller_id
            }
            DeploymentEvent::TargetAssigned(event)
            | DeploymentEvent::CancelTargetAssignment(event) => &event.controller_id,
        }
    }
}

/// 提交前规划的事件（提交后才知道新 Action 的 ID）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedEvent {
    /// 新 Action（`new_actions` 下标）：ActionCreated + TargetAssigned
    Assigned(usize),
    /// 已有 Action 被更新：ActionUpdated
    Updated(i64),
    /// 需要通知设备取消：CancelTargetAssignment
    CancelRequested(i64),
}

/// 将规划事件解析为提交后的具体事件。
pub fn resolve_events(committed: &CommittedChange, planned: &[PlannedEvent]) -> Vec<DeploymentEvent> {
    let mut events = Vec::with_capacity(planned.len() + 1);
    for intent in planned {
        match *intent {
            PlannedEvent::Assigned(index) => {
                if let Some(action) = committed.created_actions.get(index) {
                    events.push(DeploymentEvent::ActionCreated(action.into()));
                    events.push(DeploymentEvent::TargetAssigned(action.into()));
                }
            }
            PlannedEvent::Updated(action_id) => {
                if let Some(action) = committed.action(action_id) {
                    events.push(DeploymentEvent::ActionUpdated(action.into()));
                }
            }
            PlannedEvent::CancelRequested(action_id) => {
                if let Some(action) = committed.action(action_id) {
                    events.push(DeploymentEvent::CancelTargetAssignment(action.into()));
                }
            }
        }
    }
    events
}

/// 事件出口（fire-and-forget）。
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &DeploymentEvent);
}

/// 丢弃所有事件。
#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: &DeploymentEvent) {}
}

/// 记录事件（测试用）。
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<DeploymentEvent>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DeploymentEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_of(&self, event_type: &str) -> Vec<DeploymentEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type() == event_type)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for InMemoryEventSink {
    fn publish(&self, event: &DeploymentEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// 通过 tokio broadcast 分发给进程内订阅者。
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<DeploymentEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: &DeploymentEvent) {
        // 没有订阅者时 send 返回 Err，事件直接丢弃
        let _ = self.sender.send(event.clone());
    }
}

/// 以结构化日志输出事件。
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &DeploymentEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => info!(
                target: "fota.deployment",
                event_type = event.event_type(),
                action_id = event.action_id(),
                controller_id = %event.controller_id(),
                payload = %payload,
                "deployment_event"
            ),
            Err(err) => warn!(
                target: "fota.deployment",
                event_type = event.event_type(),
                error = %err,
                "deployment_event_encode_failed"
            ),
        }
    }
}

pub(crate) fn publish_all(sink: &dyn EventSink, events: &[DeploymentEvent]) {
    for event in events {
        sink.publish(event);
    }
}
