//! Store + scheduler working together across reloads

use crew_foundation::JsonStore;
use crew_task::scheduler::{is_complete, progress, ready_ids, validate_dependencies};
use crew_task::{ProjectStore, Sprint, SprintStatus, Task, TaskPatch, TaskStatus};

fn two_step_sprint() -> Sprint {
    Sprint {
        id: "sprint-1".into(),
        goal: "build a calculator".into(),
        tasks: vec![
            Task::new("T1", "Write add()").assigned_to("member-dev"),
            Task::new("T2", "Test add()")
                .assigned_to("member-qa")
                .depends_on("T1"),
        ],
        status: SprintStatus::Planning,
    }
}

#[test]
fn test_ready_set_follows_persisted_progress() {
    let dir = tempfile::tempdir().unwrap();
    let projects = ProjectStore::open(JsonStore::new(dir.path())).unwrap();
    let project = projects.create("calc", "a calculator", "ws-1").unwrap();

    let sprint = two_step_sprint();
    validate_dependencies(&sprint.tasks).unwrap();
    projects.add_sprint(&project.id, sprint).unwrap();

    let sprint = projects.get_sprint(&project.id, "sprint-1").unwrap();
    assert_eq!(ready_ids(&sprint), vec!["T1"]);

    projects
        .update_task(
            &project.id,
            "sprint-1",
            "T1",
            TaskPatch::finished(TaskStatus::Done, "added"),
        )
        .unwrap();

    // a fresh store sees the same state
    let reopened = ProjectStore::open(JsonStore::new(dir.path())).unwrap();
    let sprint = reopened.get_sprint(&project.id, "sprint-1").unwrap();
    assert_eq!(ready_ids(&sprint), vec!["T2"]);
    assert!(!is_complete(&sprint));

    reopened
        .update_task(
            &project.id,
            "sprint-1",
            "T2",
            TaskPatch::finished(TaskStatus::Failed, "tests failed"),
        )
        .unwrap();
    let sprint = reopened.get_sprint(&project.id, "sprint-1").unwrap();
    assert!(is_complete(&sprint));
    assert!(ready_ids(&sprint).is_empty());

    let p = progress(&sprint);
    assert_eq!((p.done, p.failed, p.percent), (1, 1, 50));
}

#[test]
fn test_empty_dependencies_always_ready_while_pending() {
    let sprint = Sprint {
        id: "s".into(),
        goal: "g".into(),
        tasks: (0..5).map(|i| Task::new(format!("t{}", i), "x")).collect(),
        status: SprintStatus::Active,
    };
    assert_eq!(ready_ids(&sprint).len(), 5);
}
