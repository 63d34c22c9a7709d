use fota_telemetry::{
    metrics, new_operation_id, record_action_canceled, record_actions_created,
    record_assignment_latency_ms,
};

#[test]
fn operation_ids_are_unique() {
    let first = new_operation_id();
    let second = new_operation_id();
    assert!(!first.is_empty());
    assert_ne!(first, second);
}

#[test]
fn counters_only_grow() {
    let before = metrics().snapshot();
    record_actions_created(3);
    record_action_canceled();
    record_assignment_latency_ms(12);
    let after = metrics().snapshot();

    assert!(after.actions_created >= before.actions_created + 3);
    assert!(after.actions_canceled >= before.actions_canceled + 1);
    assert!(after.assignment_latency_ms_total >= before.assignment_latency_ms_total + 12);
    assert!(after.assignment_latency_ms_count >= before.assignment_latency_ms_count + 1);
}
