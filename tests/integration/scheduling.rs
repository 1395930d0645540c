//! Placement across ticks: dependency affinity, slots and resource loss.

use wfengine::core::resource::{Resource, ResourceId};
use wfengine::core::task::TaskState;
use wfengine::worker::MockWorker;
use wfengine::workflow::WorkflowStatus;

use crate::fixtures::{diamond_spec, fan_out_spec, workflow_spec, Harness};

/// A runs alone in slot 0; once it completes, B and C follow it onto the
/// same two-node resource in slots 0 and 1.
#[tokio::test]
async fn test_fan_out_slots_on_two_node_resource() {
    let mut harness = Harness::new(fan_out_spec(), MockWorker::new(), vec![Resource::new("r1", 2)]);
    let (a, b, c) = (harness.task_id("A"), harness.task_id("B"), harness.task_id("C"));
    harness.manager.start().unwrap();

    let first = harness.tick().await;
    assert_eq!(first.submitted, vec![a]);

    // A's job reaches COMPLETED on the second poll
    harness.tick().await;
    assert_eq!(harness.state("A"), TaskState::Completed);

    let third = harness.tick().await;
    assert_eq!(third.submitted.len(), 2);

    let schedules = &harness.manager.profiler().profile().schedules;
    assert_eq!(schedules.len(), 2);

    let a_alloc = schedules[0].allocations.iter().find(|x| x.task_id == a).unwrap();
    assert_eq!(a_alloc.resource_id, ResourceId::from("r1"));
    assert_eq!(a_alloc.slot, 0);

    let b_alloc = schedules[1].allocations.iter().find(|x| x.task_id == b).unwrap();
    let c_alloc = schedules[1].allocations.iter().find(|x| x.task_id == c).unwrap();
    assert_eq!(b_alloc.resource_id, ResourceId::from("r1"));
    assert_eq!(c_alloc.resource_id, ResourceId::from("r1"));
    assert_eq!(b_alloc.slot, 0);
    assert_eq!(c_alloc.slot, 1);
}

#[tokio::test]
async fn test_dependents_follow_upstream_resource() {
    let resources = vec![
        Resource::new("east", 4),
        Resource::new("north", 4),
        Resource::new("west", 4),
    ];
    let mut harness = Harness::new(diamond_spec(), MockWorker::new(), resources);
    harness.manager.start().unwrap();
    harness.run_to_end(20).await;
    assert_eq!(harness.status(), WorkflowStatus::Completed);

    let schedules = &harness.manager.profiler().profile().schedules;
    let root_home = schedules[0].allocations[0].resource_id.clone();
    for record in schedules {
        for allocation in &record.allocations {
            assert_eq!(allocation.resource_id, root_home);
        }
    }
}

#[tokio::test]
async fn test_no_resources_keeps_tasks_pending() {
    let mut harness = Harness::new(
        workflow_spec("stalled", &[("only", &[])]),
        MockWorker::new(),
        Vec::new(),
    );
    harness.manager.start().unwrap();

    for _ in 0..3 {
        let report = harness.tick().await;
        assert!(report.scheduling_failure.is_some());
        assert!(report.submitted.is_empty());
    }
    assert_eq!(harness.state("only"), TaskState::Pending);
    assert_eq!(harness.status(), WorkflowStatus::Running);
    assert_eq!(harness.worker.submit_attempts().await, 0);
}

#[tokio::test]
async fn test_independent_tasks_fill_slots_by_capacity() {
    let names: Vec<String> = (0..6).map(|i| format!("t{}", i)).collect();
    let tasks: Vec<(&str, &[&str])> = names.iter().map(|n| (n.as_str(), &[][..])).collect();
    let mut harness = Harness::new(
        workflow_spec("wide", &tasks),
        MockWorker::new(),
        vec![Resource::new("only", 3)],
    );
    harness.manager.start().unwrap();

    let report = harness.tick().await;
    assert_eq!(report.submitted.len(), 6);

    let allocations = &harness.manager.profiler().profile().schedules[0].allocations;
    let mut slots: Vec<u32> = allocations.iter().map(|a| a.slot).collect();
    slots.sort();
    // counts 1..=6 over 3 nodes
    assert_eq!(slots, vec![0, 0, 1, 1, 1, 2]);
}
