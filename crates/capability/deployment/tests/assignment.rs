use std::sync::Arc;

use chrono::{TimeZone, Utc};
use domain::{ActionStatus, ActionType, TargetUpdateStatus, TenantContext};
use fota_deployment::state_machine::{TargetView, initial_status, plan_assignment};
use fota_deployment::{
    ActionStatusReport, AssignmentFailure, AssignmentRequest, AssignmentResult,
    ControllerManagement, DeploymentConfig, DeploymentError, DeploymentManagement,
    InMemoryEventSink, SupersedeMode,
};
use fota_storage::{
    ActionStore, DeploymentRepository, DistributionSetStore, InMemoryRepository,
    MaintenanceWindowSpec, NewAction, NewDistributionSet, NewTarget, StorageErrorKind,
    TargetRecord, TargetStore,
};

struct Fixture {
    ctx: TenantContext,
    repository: Arc<InMemoryRepository>,
    events: InMemoryEventSink,
    management: DeploymentManagement,
    controller: ControllerManagement,
}

fn fixture_with(config: DeploymentConfig) -> Fixture {
    let repository = Arc::new(InMemoryRepository::new());
    let events = InMemoryEventSink::new();
    let shared: Arc<dyn DeploymentRepository> = repository.clone();
    let management =
        DeploymentManagement::new_with_config(shared.clone(), Arc::new(events.clone()), config);
    let controller = ControllerManagement::new(shared, Arc::new(events.clone()));
    Fixture {
        ctx: TenantContext::new("tenant-1", "admin"),
        repository,
        events,
        management,
        controller,
    }
}

fn fixture() -> Fixture {
    fixture_with(DeploymentConfig::default())
}

fn os_app_set(name: &str, module_types: &[&str]) -> NewDistributionSet {
    NewDistributionSet {
        name: name.to_string(),
        version: "1.0".to_string(),
        type_key: "os_app".to_string(),
        required_module_types: vec!["os".to_string(), "app".to_string()],
        module_types: module_types.iter().map(|module| module.to_string()).collect(),
    }
}

fn ids(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|index| format!("{}-{:05}", prefix, index)).collect()
}

impl Fixture {
    async fn distribution_set(&self, name: &str) -> i64 {
        self.repository
            .create_distribution_set(&self.ctx, os_app_set(name, &["os", "app"]))
            .await
            .expect("create ds")
            .ds_id
    }

    async fn targets(&self, controller_ids: &[String]) {
        for controller_id in controller_ids {
            self.repository
                .create_target(&self.ctx, NewTarget::new(controller_id.as_str()))
                .await
                .expect("create target");
        }
    }

    async fn target(&self, controller_id: &str) -> TargetRecord {
        self.repository
            .find_target(&self.ctx, controller_id)
            .await
            .expect("find target")
            .expect("target exists")
    }

    async fn assign(&self, ds_id: i64, controller_id: &str) -> AssignmentResult {
        self.management
            .assign_distribution_set(&self.ctx, AssignmentRequest::new(ds_id, [controller_id]))
            .await
            .expect("assign")
    }

    async fn total_actions(&self, controller_ids: &[String]) -> u64 {
        self.repository
            .count_actions_by_targets(&self.ctx, controller_ids)
            .await
            .expect("count")
            .values()
            .sum()
    }
}

#[tokio::test]
async fn assigned_action_finishes_in_sync() {
    let fx = fixture();
    let ds_a = fx.distribution_set("A").await;
    fx.targets(&["4712".to_string()]).await;

    let result = fx.assign(ds_a, "4712").await;
    assert_eq!(result.assigned, 1);
    assert_eq!(result.assigned_targets, vec!["4712"]);
    assert_eq!(result.action_ids.len(), 1);

    let actions = fx
        .management
        .find_active_actions_by_target(&fx.ctx, "4712")
        .await
        .expect("active");
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].status, ActionStatus::Scheduled);
    assert_eq!(actions[0].ds_id, ds_a);
    let target = fx.target("4712").await;
    assert_eq!(target.update_status, TargetUpdateStatus::Pending);
    assert_eq!(target.assigned_ds_id, Some(ds_a));

    let finished = fx
        .controller
        .add_update_action_status(
            &fx.ctx,
            result.action_ids[0],
            ActionStatusReport::new(ActionStatus::Finished).with_message("installed"),
        )
        .await
        .expect("finish");
    assert!(!finished.active);
    assert_eq!(finished.status, ActionStatus::Finished);

    let target = fx.target("4712").await;
    assert_eq!(target.update_status, TargetUpdateStatus::InSync);
    assert_eq!(target.installed_ds_id, Some(ds_a));
    assert_eq!(target.assigned_ds_id, Some(ds_a));
    assert!(target.install_date_ms.is_some());
}

#[tokio::test]
async fn second_assignment_supersedes_first() {
    let fx = fixture();
    let ds_a = fx.distribution_set("A").await;
    let ds_b = fx.distribution_set("B").await;
    fx.targets(&["4712".to_string()]).await;

    let first = fx.assign(ds_a, "4712").await;
    fx.events.clear();
    let second = fx.assign(ds_b, "4712").await;

    let actions = fx
        .management
        .find_actions_by_target(&fx.ctx, "4712")
        .await
        .expect("actions");
    assert_eq!(actions.len(), 2);
    let old = actions
        .iter()
        .find(|action| action.action_id == first.action_ids[0])
        .expect("old action");
    let new = actions
        .iter()
        .find(|action| action.action_id == second.action_ids[0])
        .expect("new action");
    assert!(!old.active);
    assert_eq!(old.status, ActionStatus::Canceled);
    assert!(new.active);
    assert_eq!(fx.target("4712").await.assigned_ds_id, Some(ds_b));

    let types: Vec<&str> = fx
        .events
        .events()
        .iter()
        .map(|event| event.event_type())
        .collect();
    assert_eq!(
        types,
        vec![
            "action_updated",
            "cancel_target_assignment",
            "action_created",
            "target_assigned"
        ]
    );
}

#[tokio::test]
async fn graceful_supersede_waits_for_device() {
    let fx = fixture_with(DeploymentConfig {
        supersede_mode: SupersedeMode::Graceful,
        ..DeploymentConfig::default()
    });
    let ds_a = fx.distribution_set("A").await;
    let ds_b = fx.distribution_set("B").await;
    fx.targets(&["4712".to_string()]).await;

    let first = fx.assign(ds_a, "4712").await.action_ids[0];
    fx.controller
        .add_update_action_status(&fx.ctx, first, ActionStatusReport::new(ActionStatus::Retrieved))
        .await
        .expect("retrieved");
    let second = fx.assign(ds_b, "4712").await.action_ids[0];

    let active = fx
        .management
        .find_active_actions_by_target(&fx.ctx, "4712")
        .await
        .expect("active");
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].action_id, first);
    assert_eq!(active[0].status, ActionStatus::Canceling);
    let target = fx.target("4712").await;
    assert_eq!(target.assigned_ds_id, Some(ds_b));
    let driving = active
        .iter()
        .filter(|action| Some(action.ds_id) == target.assigned_ds_id)
        .count();
    assert_eq!(driving, 1);

    let canceled = fx
        .controller
        .add_cancel_action_status(&fx.ctx, first, ActionStatusReport::new(ActionStatus::Canceled))
        .await
        .expect("cancel confirmed");
    assert!(!canceled.active);
    assert_eq!(canceled.status, ActionStatus::Canceled);

    let target = fx.target("4712").await;
    assert_eq!(target.assigned_ds_id, Some(ds_b));
    assert_eq!(target.update_status, TargetUpdateStatus::Pending);
    let remaining = fx
        .management
        .find_active_actions_by_target(&fx.ctx, "4712")
        .await
        .expect("active");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].action_id, second);
}

#[tokio::test]
async fn graceful_finish_keeps_new_assignment() {
    let fx = fixture_with(DeploymentConfig {
        supersede_mode: SupersedeMode::Graceful,
        ..DeploymentConfig::default()
    });
    let ds_a = fx.distribution_set("A").await;
    let ds_b = fx.distribution_set("B").await;
    fx.targets(&["4712".to_string()]).await;

    let first = fx.assign(ds_a, "4712").await.action_ids[0];
    fx.controller
        .add_update_action_status(&fx.ctx, first, ActionStatusReport::new(ActionStatus::Running))
        .await
        .expect("running");
    let second = fx.assign(ds_b, "4712").await.action_ids[0];
    fx.controller
        .add_update_action_status(&fx.ctx, second, ActionStatusReport::new(ActionStatus::Finished))
        .await
        .expect("finished");

    let target = fx.target("4712").await;
    assert_eq!(target.assigned_ds_id, Some(ds_b));
    assert_eq!(target.installed_ds_id, Some(ds_b));
    assert_eq!(target.update_status, TargetUpdateStatus::Pending);

    fx.controller
        .add_cancel_action_status(&fx.ctx, first, ActionStatusReport::new(ActionStatus::Canceled))
        .await
        .expect("cancel confirmed");
    let target = fx.target("4712").await;
    assert_eq!(target.assigned_ds_id, Some(ds_b));
    assert_eq!(target.update_status, TargetUpdateStatus::InSync);
}

#[tokio::test]
async fn zero_batch_size_still_assigns() {
    let fx = fixture_with(DeploymentConfig {
        max_entries_in_statement: 0,
        ..DeploymentConfig::default()
    });
    let ds = fx.distribution_set("A").await;
    let controller_ids = ids("zero", 3);
    fx.targets(&controller_ids).await;

    let result = fx
        .management
        .assign_distribution_set(&fx.ctx, AssignmentRequest::new(ds, controller_ids.clone()))
        .await
        .expect("assign");
    assert_eq!(result.assigned, 3);
    assert_eq!(result.assigned_targets, controller_ids);
}

#[tokio::test]
async fn large_assignment_is_split_into_batches() {
    let fx = fixture_with(DeploymentConfig {
        max_entries_in_statement: 500,
        ..DeploymentConfig::default()
    });
    let ds = fx.distribution_set("fleet").await;
    let controller_ids = ids("dev", 5000);
    fx.targets(&controller_ids).await;

    let result = fx
        .management
        .assign_distribution_set(&fx.ctx, AssignmentRequest::new(ds, controller_ids.clone()))
        .await
        .expect("assign");
    assert_eq!(result.total, 5000);
    assert_eq!(result.assigned, 5000);
    assert_eq!(result.action_ids.len(), 5000);
    assert!(result.failed.is_empty());

    for chunk in controller_ids.chunks(999) {
        let active = fx
            .repository
            .find_active_actions_by_targets(&fx.ctx, chunk)
            .await
            .expect("active");
        assert_eq!(active.len(), chunk.len());
        assert!(active.iter().all(|action| action.ds_id == ds));
    }
    assert_eq!(fx.events.events_of("target_assigned").len(), 5000);
}

#[tokio::test]
async fn reassigning_same_distribution_set_is_skipped() {
    let fx = fixture();
    let ds = fx.distribution_set("A").await;
    fx.targets(&["4712".to_string(), "4713".to_string()]).await;
    fx.assign(ds, "4712").await;
    fx.events.clear();

    let result = fx
        .management
        .assign_distribution_set(&fx.ctx, AssignmentRequest::new(ds, ["4712", "4713", "4712"]))
        .await
        .expect("assign");
    assert_eq!(result.total, 2);
    assert_eq!(result.assigned, 1);
    assert_eq!(result.assigned_targets, vec!["4713"]);
    assert_eq!(result.already_assigned, 1);
    assert_eq!(result.already_assigned_targets, vec!["4712"]);
    assert_eq!(
        fx.total_actions(&["4712".to_string(), "4713".to_string()]).await,
        2
    );
    assert!(
        fx.events
            .events()
            .iter()
            .all(|event| event.controller_id() == "4713")
    );
}

#[tokio::test]
async fn incomplete_distribution_set_rejects_whole_batch() {
    let fx = fixture();
    let incomplete = fx
        .repository
        .create_distribution_set(&fx.ctx, os_app_set("partial", &["os"]))
        .await
        .expect("create ds");
    assert!(!incomplete.complete);
    let controller_ids = ids("dev", 3);
    fx.targets(&controller_ids).await;

    let err = fx
        .management
        .assign_distribution_set(
            &fx.ctx,
            AssignmentRequest::new(incomplete.ds_id, controller_ids.clone()),
        )
        .await
        .expect_err("incomplete");
    assert_eq!(err, DeploymentError::IncompleteDistributionSet(incomplete.ds_id));
    assert_eq!(fx.total_actions(&controller_ids).await, 0);
    assert!(fx.events.events().is_empty());

    let missing = fx
        .management
        .assign_distribution_set(&fx.ctx, AssignmentRequest::new(9_999, controller_ids))
        .await
        .expect_err("missing ds");
    assert!(matches!(missing, DeploymentError::EntityNotFound { .. }));
}

#[tokio::test]
async fn soft_deleted_distribution_set_cannot_be_assigned() {
    let fx = fixture();
    let ds = fx.distribution_set("A").await;
    fx.targets(&["4712".to_string(), "4713".to_string()]).await;
    fx.assign(ds, "4712").await;
    fx.repository
        .delete_distribution_set(&fx.ctx, ds)
        .await
        .expect("delete")
        .expect("deleted");

    let err = fx
        .management
        .assign_distribution_set(&fx.ctx, AssignmentRequest::new(ds, ["4713"]))
        .await
        .expect_err("deleted");
    assert_eq!(err, DeploymentError::DistributionSetDeleted(ds));
}

#[tokio::test]
async fn per_target_failures_do_not_abort_batch() {
    let fx = fixture_with(DeploymentConfig {
        max_actions_per_target: 2,
        ..DeploymentConfig::default()
    });
    let ds_a = fx.distribution_set("A").await;
    let ds_b = fx.distribution_set("B").await;
    let ds_c = fx.distribution_set("C").await;
    fx.targets(&["full".to_string(), "fresh".to_string()]).await;
    fx.assign(ds_a, "full").await;
    fx.assign(ds_b, "full").await;

    let result = fx
        .management
        .assign_distribution_set(&fx.ctx, AssignmentRequest::new(ds_c, ["full", "ghost", "fresh"]))
        .await
        .expect("assign");
    assert_eq!(result.total, 3);
    assert_eq!(result.assigned_targets, vec!["fresh"]);
    assert_eq!(result.failed.len(), 2);
    assert_eq!(result.failed[0].controller_id, "full");
    assert_eq!(result.failed[0].reason, AssignmentFailure::QuotaExceeded);
    assert_eq!(result.failed[1].controller_id, "ghost");
    assert_eq!(result.failed[1].reason, AssignmentFailure::NotFound);
    assert_eq!(fx.target("full").await.assigned_ds_id, Some(ds_b));
}

#[tokio::test]
async fn request_level_validation() {
    let fx = fixture();
    let ds = fx.distribution_set("A").await;
    fx.targets(&["4712".to_string()]).await;

    let heavy = AssignmentRequest {
        weight: Some(1001),
        ..AssignmentRequest::new(ds, ["4712"])
    };
    assert!(matches!(
        fx.management.assign_distribution_set(&fx.ctx, heavy).await,
        Err(DeploymentError::InvalidWeight(_))
    ));

    let untimed = AssignmentRequest {
        action_type: ActionType::TimeForced,
        ..AssignmentRequest::new(ds, ["4712"])
    };
    assert!(matches!(
        fx.management.assign_distribution_set(&fx.ctx, untimed).await,
        Err(DeploymentError::InvalidRequest(_))
    ));

    let lapsed = AssignmentRequest {
        maintenance_window: Some(MaintenanceWindowSpec {
            schedule: "0 0 2 1 1 ? 2020".to_string(),
            duration: "01:00:00".to_string(),
            timezone: "+00:00".to_string(),
        }),
        ..AssignmentRequest::new(ds, ["4712"])
    };
    assert!(matches!(
        fx.management.assign_distribution_set(&fx.ctx, lapsed).await,
        Err(DeploymentError::InvalidMaintenanceSchedule(_))
    ));
    assert_eq!(fx.total_actions(&["4712".to_string()]).await, 0);

    let strict = fixture_with(DeploymentConfig {
        weight_required: true,
        ..DeploymentConfig::default()
    });
    let ds = strict.distribution_set("A").await;
    strict.targets(&["4712".to_string()]).await;
    assert!(matches!(
        strict
            .management
            .assign_distribution_set(&strict.ctx, AssignmentRequest::new(ds, ["4712"]))
            .await,
        Err(DeploymentError::InvalidWeight(_))
    ));
    let weighted = AssignmentRequest {
        weight: Some(500),
        ..AssignmentRequest::new(ds, ["4712"])
    };
    let result = strict
        .management
        .assign_distribution_set(&strict.ctx, weighted)
        .await
        .expect("weighted");
    assert_eq!(result.assigned, 1);
}

#[tokio::test]
async fn maintenance_window_is_stored_and_evaluated() {
    let fx = fixture();
    let ds = fx.distribution_set("A").await;
    fx.targets(&["4712".to_string()]).await;
    let request = AssignmentRequest {
        action_type: ActionType::TimeForced,
        forced_time_ms: Some(1_900_000_000_000),
        maintenance_window: Some(MaintenanceWindowSpec {
            schedule: "0 0 2 * * ?".to_string(),
            duration: "01:00:00".to_string(),
            timezone: "+00:00".to_string(),
        }),
        ..AssignmentRequest::new(ds, ["4712"])
    };
    let action_id = fx
        .management
        .assign_distribution_set(&fx.ctx, request)
        .await
        .expect("assign")
        .action_ids[0];

    let inside = Utc
        .with_ymd_and_hms(2026, 3, 10, 2, 30, 0)
        .single()
        .expect("time");
    let outside = Utc
        .with_ymd_and_hms(2026, 3, 10, 4, 0, 0)
        .single()
        .expect("time");
    assert!(
        fx.management
            .is_maintenance_window_available(&fx.ctx, action_id, inside)
            .await
            .expect("available")
    );
    assert!(
        !fx.management
            .is_maintenance_window_available(&fx.ctx, action_id, outside)
            .await
            .expect("available")
    );
    let window = fx
        .management
        .maintenance_window(&fx.ctx, action_id, outside)
        .await
        .expect("window")
        .expect("next window");
    assert_eq!(
        window.start.with_timezone(&Utc),
        Utc.with_ymd_and_hms(2026, 3, 11, 2, 0, 0)
            .single()
            .expect("time")
    );
}

#[tokio::test]
async fn confirmation_required_starts_waiting() {
    let fx = fixture();
    let ds = fx.distribution_set("A").await;
    fx.targets(&["4712".to_string()]).await;
    let request = AssignmentRequest {
        confirmation_required: true,
        ..AssignmentRequest::new(ds, ["4712"])
    };
    let action_id = fx
        .management
        .assign_distribution_set(&fx.ctx, request)
        .await
        .expect("assign")
        .action_ids[0];
    let action = fx
        .management
        .find_action(&fx.ctx, action_id)
        .await
        .expect("find")
        .expect("action");
    assert_eq!(action.status, ActionStatus::WaitForConfirmation);
    let history = fx
        .management
        .find_action_status_by_action(&fx.ctx, action_id)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ActionStatus::WaitForConfirmation);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assignments_keep_single_driving_action() {
    let fx = Arc::new(fixture());
    fx.targets(&["4712".to_string()]).await;
    let mut sets = Vec::new();
    for index in 0..8 {
        sets.push(fx.distribution_set(&format!("ds-{}", index)).await);
    }

    let mut handles = Vec::new();
    for ds in sets {
        let fx = fx.clone();
        handles.push(tokio::spawn(async move {
            fx.management
                .assign_distribution_set(&fx.ctx, AssignmentRequest::new(ds, ["4712"]))
                .await
                .expect("assign")
        }));
    }
    let mut assigned = 0;
    let mut conflicts = 0;
    for handle in handles {
        let result = handle.await.expect("join");
        assigned += result.assigned;
        conflicts += result
            .failed
            .iter()
            .filter(|failed| failed.reason == AssignmentFailure::Conflict)
            .count();
    }
    assert!(assigned >= 1);
    assert_eq!(assigned + conflicts, 8);

    let target = fx.target("4712").await;
    let active = fx
        .management
        .find_active_actions_by_target(&fx.ctx, "4712")
        .await
        .expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(Some(active[0].ds_id), target.assigned_ds_id);
}

#[tokio::test]
async fn stale_plan_is_rejected_as_conflict() {
    let fx = fixture();
    let ds_a = fx.distribution_set("A").await;
    let ds_b = fx.distribution_set("B").await;
    fx.targets(&["4712".to_string()]).await;
    let snapshot = TargetView::new(fx.target("4712").await, Vec::new());

    let new_action = |ds_id: i64| NewAction {
        ds_id,
        status: initial_status(false),
        action_type: ActionType::Forced,
        forced_time_ms: None,
        weight: None,
        maintenance: None,
        rollout_id: None,
        rollout_group_id: None,
        initiated_by: "admin".to_string(),
    };
    let first = plan_assignment(&snapshot, new_action(ds_a), SupersedeMode::Immediate, 1);
    let second = plan_assignment(&snapshot, new_action(ds_b), SupersedeMode::Immediate, 2);

    let results = fx
        .repository
        .apply_target_changes(&fx.ctx, vec![first.change, second.change])
        .await
        .expect("apply");
    assert!(results[0].is_ok());
    let err = results[1].clone().expect_err("stale");
    assert_eq!(err.kind(), StorageErrorKind::Conflict);
    assert!(DeploymentError::from(err).is_conflict());

    let active = fx
        .repository
        .find_active_actions_by_target(&fx.ctx, "4712")
        .await
        .expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].ds_id, ds_a);
}
