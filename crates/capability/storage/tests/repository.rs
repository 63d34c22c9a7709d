use domain::{ActionStatus, ActionType, TargetUpdateStatus, TenantContext};
use fota_storage::{
    ActionRef, ActionStore, ActionUpdate, DistributionSetDeletion, DistributionSetStore,
    InMemoryRepository, NewAction, NewActionStatus, NewDistributionSet, NewTarget,
    StorageErrorKind, TargetChange, TargetMetadataUpdate, TargetStateUpdate, TargetStore,
};

fn ctx() -> TenantContext {
    TenantContext::new("tenant-1", "user-1")
}

fn os_app_set(name: &str) -> NewDistributionSet {
    NewDistributionSet {
        name: name.to_string(),
        version: "1.0".to_string(),
        type_key: "os_app".to_string(),
        required_module_types: vec!["os".to_string(), "app".to_string()],
        module_types: vec!["os".to_string(), "app".to_string()],
    }
}

fn scheduled_action(ds_id: i64) -> NewAction {
    NewAction {
        ds_id,
        status: ActionStatus::Scheduled,
        action_type: ActionType::Forced,
        forced_time_ms: None,
        weight: None,
        maintenance: None,
        rollout_id: None,
        rollout_group_id: None,
        initiated_by: "user-1".to_string(),
    }
}

#[tokio::test]
async fn target_registration_rejects_duplicate() {
    let repository = InMemoryRepository::new();
    let ctx = ctx();
    let created = repository
        .create_target(&ctx, NewTarget::new("4712"))
        .await
        .expect("create");
    assert_eq!(created.update_status, TargetUpdateStatus::Unknown);
    assert_eq!(created.revision, 1);

    let err = repository
        .create_target(&ctx, NewTarget::new("4712"))
        .await
        .expect_err("duplicate");
    assert_eq!(err.kind(), StorageErrorKind::Conflict);

    let other_tenant = TenantContext::new("tenant-2", "user-1");
    assert!(
        repository
            .find_target(&other_tenant, "4712")
            .await
            .expect("find")
            .is_none()
    );
}

#[tokio::test]
async fn contact_and_metadata_do_not_bump_revision() {
    let repository = InMemoryRepository::new();
    let ctx = ctx();
    repository
        .create_target(&ctx, NewTarget::new("dev-1"))
        .await
        .expect("create");

    let contacted = repository
        .mark_target_contacted(&ctx, "dev-1", 5_000)
        .await
        .expect("contact")
        .expect("target");
    assert_eq!(contacted.update_status, TargetUpdateStatus::Registered);
    assert_eq!(contacted.last_target_query_ms, Some(5_000));

    let renamed = repository
        .update_target(
            &ctx,
            "dev-1",
            TargetMetadataUpdate {
                name: Some("Gateway".to_string()),
                description: Some("lab".to_string()),
            },
        )
        .await
        .expect("update")
        .expect("target");
    assert_eq!(renamed.name, "Gateway");
    assert_eq!(renamed.revision, 1);
}

#[tokio::test]
async fn distribution_set_completeness_tracks_modules() {
    let repository = InMemoryRepository::new();
    let ctx = ctx();
    let mut incomplete = os_app_set("partial");
    incomplete.module_types = vec!["os".to_string()];
    let ds = repository
        .create_distribution_set(&ctx, incomplete)
        .await
        .expect("create");
    assert!(!ds.complete);

    let ds = repository
        .set_modules(&ctx, ds.ds_id, vec!["os".to_string(), "app".to_string()])
        .await
        .expect("set modules")
        .expect("ds");
    assert!(ds.complete);
    assert_eq!(ds.revision, 2);

    let duplicate = repository
        .create_distribution_set(&ctx, os_app_set("partial"))
        .await
        .expect_err("duplicate name/version");
    assert!(duplicate.is_conflict());
}

#[tokio::test]
async fn referenced_distribution_set_is_soft_deleted() {
    let repository = InMemoryRepository::new();
    let ctx = ctx();
    let target = repository
        .create_target(&ctx, NewTarget::new("dev-1"))
        .await
        .expect("target");
    let used = repository
        .create_distribution_set(&ctx, os_app_set("used"))
        .await
        .expect("ds");
    let unused = repository
        .create_distribution_set(&ctx, os_app_set("unused"))
        .await
        .expect("ds");

    let mut change = TargetChange::new(&target);
    change.new_actions.push(scheduled_action(used.ds_id));
    let results = repository
        .apply_target_changes(&ctx, vec![change])
        .await
        .expect("apply");
    assert!(results[0].is_ok());

    let soft = repository
        .delete_distribution_set(&ctx, used.ds_id)
        .await
        .expect("delete");
    assert_eq!(soft, Some(DistributionSetDeletion::Soft));
    let kept = repository
        .find_distribution_set(&ctx, used.ds_id)
        .await
        .expect("find")
        .expect("still stored");
    assert!(kept.deleted);
    assert!(
        repository
            .set_modules(&ctx, used.ds_id, vec![])
            .await
            .is_err()
    );

    let hard = repository
        .delete_distribution_set(&ctx, unused.ds_id)
        .await
        .expect("delete");
    assert_eq!(hard, Some(DistributionSetDeletion::Hard));
    assert!(
        repository
            .find_distribution_set(&ctx, unused.ds_id)
            .await
            .expect("find")
            .is_none()
    );
}

#[tokio::test]
async fn apply_target_changes_isolates_conflicting_target() {
    let repository = InMemoryRepository::new();
    let ctx = ctx();
    let ds = repository
        .create_distribution_set(&ctx, os_app_set("fw"))
        .await
        .expect("ds");
    let first = repository
        .create_target(&ctx, NewTarget::new("dev-1"))
        .await
        .expect("target");
    let second = repository
        .create_target(&ctx, NewTarget::new("dev-2"))
        .await
        .expect("target");

    let mut ok_change = TargetChange::new(&first);
    ok_change.new_actions.push(scheduled_action(ds.ds_id));
    ok_change.status_entries.push(NewActionStatus {
        action_ref: ActionRef::New(0),
        status: ActionStatus::Scheduled,
        ts_ms: 1_000,
        messages: vec!["assigned".to_string()],
        code: None,
    });
    ok_change.target_update = Some(TargetStateUpdate {
        assigned_ds_id: Some(ds.ds_id),
        installed_ds_id: None,
        install_date_ms: None,
        update_status: TargetUpdateStatus::Pending,
    });

    let mut stale_change = TargetChange::new(&second);
    stale_change.expected_revision = second.revision + 7;
    stale_change.new_actions.push(scheduled_action(ds.ds_id));

    let results = repository
        .apply_target_changes(&ctx, vec![ok_change, stale_change])
        .await
        .expect("apply");
    let committed = results[0].as_ref().expect("first committed");
    assert_eq!(committed.target.revision, first.revision + 1);
    assert_eq!(committed.target.assigned_ds_id, Some(ds.ds_id));
    assert_eq!(committed.created_actions.len(), 1);
    let err = results[1].as_ref().expect_err("second conflicts");
    assert!(err.is_conflict());

    let untouched = repository
        .find_actions_by_target(&ctx, "dev-2")
        .await
        .expect("actions");
    assert!(untouched.is_empty());

    let action_id = committed.created_actions[0].action_id;
    let history = repository
        .find_action_status_by_action(&ctx, action_id)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].messages, vec!["assigned".to_string()]);
}

#[tokio::test]
async fn stale_action_revision_is_rejected() {
    let repository = InMemoryRepository::new();
    let ctx = ctx();
    let ds = repository
        .create_distribution_set(&ctx, os_app_set("fw"))
        .await
        .expect("ds");
    let target = repository
        .create_target(&ctx, NewTarget::new("dev-1"))
        .await
        .expect("target");
    let mut change = TargetChange::new(&target);
    change.new_actions.push(scheduled_action(ds.ds_id));
    let committed = repository
        .apply_target_changes(&ctx, vec![change])
        .await
        .expect("apply")
        .remove(0)
        .expect("committed");
    let action = committed.created_actions[0].clone();

    let mut stale = TargetChange::new(&committed.target);
    stale.action_updates.push(ActionUpdate {
        action_id: action.action_id,
        expected_revision: action.revision + 1,
        status: ActionStatus::Running,
        active: true,
        action_type: action.action_type,
        last_status_code: None,
    });
    let result = repository
        .apply_target_changes(&ctx, vec![stale])
        .await
        .expect("apply")
        .remove(0);
    assert!(result.expect_err("stale action").is_conflict());

    let stored = repository
        .find_action(&ctx, action.action_id)
        .await
        .expect("find")
        .expect("action");
    assert_eq!(stored.status, ActionStatus::Scheduled);
    let target = repository
        .find_target(&ctx, "dev-1")
        .await
        .expect("find")
        .expect("target");
    assert_eq!(target.revision, committed.target.revision);
}

#[tokio::test]
async fn delete_target_cascades_actions_and_history() {
    let repository = InMemoryRepository::new();
    let ctx = ctx();
    let ds = repository
        .create_distribution_set(&ctx, os_app_set("fw"))
        .await
        .expect("ds");
    let target = repository
        .create_target(&ctx, NewTarget::new("dev-1"))
        .await
        .expect("target");
    let mut change = TargetChange::new(&target);
    change.new_actions.push(scheduled_action(ds.ds_id));
    change.status_entries.push(NewActionStatus {
        action_ref: ActionRef::New(0),
        status: ActionStatus::Scheduled,
        ts_ms: 1,
        messages: vec![],
        code: None,
    });
    let committed = repository
        .apply_target_changes(&ctx, vec![change])
        .await
        .expect("apply")
        .remove(0)
        .expect("committed");
    let action_id = committed.created_actions[0].action_id;

    assert!(repository.delete_target(&ctx, "dev-1").await.expect("delete"));
    assert!(
        repository
            .find_action(&ctx, action_id)
            .await
            .expect("find")
            .is_none()
    );
    assert!(
        repository
            .find_action_status_by_action(&ctx, action_id)
            .await
            .expect("history")
            .is_empty()
    );
    assert!(!repository.delete_target(&ctx, "dev-1").await.expect("delete again"));
}

#[tokio::test]
async fn status_counts_and_last_terminated_action() {
    let repository = InMemoryRepository::new();
    let ctx = ctx();
    let ds = repository
        .create_distribution_set(&ctx, os_app_set("fw"))
        .await
        .expect("ds");
    let target = repository
        .create_target(&ctx, NewTarget::new("dev-1"))
        .await
        .expect("target");
    let mut change = TargetChange::new(&target);
    change.new_actions.push(scheduled_action(ds.ds_id));
    change.new_actions.push(scheduled_action(ds.ds_id));
    for index in 0..2 {
        change.status_entries.push(NewActionStatus {
            action_ref: ActionRef::New(index),
            status: ActionStatus::Scheduled,
            ts_ms: 1,
            messages: vec![],
            code: None,
        });
    }
    let committed = repository
        .apply_target_changes(&ctx, vec![change])
        .await
        .expect("apply")
        .remove(0)
        .expect("committed");
    let older = committed.created_actions[0].clone();

    let mut finish = TargetChange::new(&committed.target);
    finish.action_updates.push(ActionUpdate {
        action_id: older.action_id,
        expected_revision: older.revision,
        status: ActionStatus::Error,
        active: false,
        action_type: older.action_type,
        last_status_code: Some(42),
    });
    finish.status_entries.push(NewActionStatus {
        action_ref: ActionRef::Existing(older.action_id),
        status: ActionStatus::Error,
        ts_ms: 2,
        messages: vec!["flash failed".to_string()],
        code: Some(42),
    });
    repository
        .apply_target_changes(&ctx, vec![finish])
        .await
        .expect("apply")
        .remove(0)
        .expect("committed");

    let with_counts = repository
        .find_actions_with_status_count_by_target(&ctx, "dev-1")
        .await
        .expect("counts");
    assert_eq!(with_counts.len(), 2);
    assert_eq!(with_counts[1].action.action_id, older.action_id);
    assert_eq!(with_counts[1].status_count, 2);
    assert_eq!(with_counts[0].status_count, 1);
    assert_eq!(with_counts[0].ds_name, "fw");

    let last = repository
        .find_last_terminated_action(&ctx, "dev-1")
        .await
        .expect("last")
        .expect("terminated");
    assert_eq!(last.action_id, older.action_id);
    assert_eq!(last.status, ActionStatus::Error);
    assert_eq!(last.last_status_code, Some(42));

    let counts = repository
        .count_actions_by_targets(&ctx, &["dev-1".to_string(), "dev-2".to_string()])
        .await
        .expect("count");
    assert_eq!(counts.get("dev-1"), Some(&2));
    assert!(!counts.contains_key("dev-2"));

    let active = repository
        .find_active_actions_by_targets(&ctx, &["dev-1".to_string()])
        .await
        .expect("active");
    assert_eq!(active.len(), 1);
}
