//! Sprint Scheduler
//!
//! Pure functions over a [`Sprint`]; nothing here suspends or persists.
//!
//! A task is ready when it is pending and every dependency names a task in
//! the same sprint that is done. A dependency id that matches no task can
//! never be satisfied.

use crate::model::{Sprint, Task, TaskStatus};
use crew_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Pending tasks whose dependencies are all done, in sprint order
pub fn ready_set(sprint: &Sprint) -> Vec<&Task> {
    sprint
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .filter(|t| unmet_dependencies(sprint, t).is_empty())
        .collect()
}

pub fn ready_ids(sprint: &Sprint) -> Vec<String> {
    ready_set(sprint).into_iter().map(|t| t.id.clone()).collect()
}

/// Dependencies of `task` that are not done (dangling ids included)
pub fn unmet_dependencies<'a>(sprint: &Sprint, task: &'a Task) -> Vec<&'a str> {
    task.dependencies
        .iter()
        .filter(|dep| {
            !sprint
                .tasks
                .iter()
                .any(|t| &t.id == *dep && t.status == TaskStatus::Done)
        })
        .map(String::as_str)
        .collect()
}

/// Every task is done or failed
pub fn is_complete(sprint: &Sprint) -> bool {
    sprint.tasks.iter().all(|t| t.status.is_finished())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintProgress {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub pending: usize,
    /// done / total, rounded down
    pub percent: u8,
}

pub fn progress(sprint: &Sprint) -> SprintProgress {
    let mut p = SprintProgress {
        total: sprint.tasks.len(),
        ..Default::default()
    };
    for task in &sprint.tasks {
        match task.status {
            TaskStatus::Done => p.done += 1,
            TaskStatus::Failed => p.failed += 1,
            TaskStatus::InProgress => p.in_progress += 1,
            TaskStatus::Pending => p.pending += 1,
        }
    }
    if p.total > 0 {
        p.percent = (p.done * 100 / p.total) as u8;
    }
    p
}

// ============================================================================
// Graph validation
// ============================================================================

/// Reject task graphs that could never finish
///
/// Checks, in order: duplicate task ids, self-dependencies, dangling
/// dependency ids, cycles (Kahn's algorithm).
pub fn validate_dependencies(tasks: &[Task]) -> Result<()> {
    let mut seen = HashSet::new();
    let duplicates: Vec<&str> = tasks
        .iter()
        .filter(|t| !seen.insert(t.id.as_str()))
        .map(|t| t.id.as_str())
        .collect();
    if !duplicates.is_empty() {
        return Err(Error::Validation(format!(
            "Duplicate task ids: {}",
            duplicates.join(", ")
        )));
    }

    let self_deps: Vec<&str> = tasks
        .iter()
        .filter(|t| t.dependencies.contains(&t.id))
        .map(|t| t.id.as_str())
        .collect();
    if !self_deps.is_empty() {
        return Err(Error::Validation(format!(
            "Tasks depend on themselves: {}",
            self_deps.join(", ")
        )));
    }

    let dangling: Vec<String> = tasks
        .iter()
        .flat_map(|t| {
            t.dependencies
                .iter()
                .filter(|d| !seen.contains(d.as_str()))
                .map(move |d| format!("{} -> {}", t.id, d))
        })
        .collect();
    if !dangling.is_empty() {
        return Err(Error::Validation(format!(
            "Unknown dependencies: {}",
            dangling.join(", ")
        )));
    }

    let order = topological_order(tasks);
    if order.len() < tasks.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let cyclic: Vec<&str> = tasks
            .iter()
            .map(|t| t.id.as_str())
            .filter(|id| !ordered.contains(id))
            .collect();
        return Err(Error::Validation(format!(
            "Dependency cycle among tasks: {}",
            cyclic.join(", ")
        )));
    }

    Ok(())
}

/// Kahn's algorithm; tasks on or behind a cycle are left out
pub fn topological_order(tasks: &[Task]) -> Vec<String> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        let deps: HashSet<&str> = task
            .dependencies
            .iter()
            .map(String::as_str)
            .filter(|d| ids.contains(d))
            .collect();
        in_degree.insert(task.id.as_str(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(task.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = tasks
        .iter()
        .map(|t| t.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(tasks.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for next in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SprintStatus;

    fn sprint(tasks: Vec<Task>) -> Sprint {
        Sprint {
            id: "sprint-1".into(),
            goal: "ship".into(),
            tasks,
            status: SprintStatus::Active,
        }
    }

    fn set_status(sprint: &mut Sprint, id: &str, status: TaskStatus) {
        sprint.task_mut(id).unwrap().status = status;
    }

    #[test]
    fn test_chain_becomes_ready_in_order() {
        let mut s = sprint(vec![
            Task::new("T1", "first"),
            Task::new("T2", "second").depends_on("T1"),
        ]);
        assert_eq!(ready_ids(&s), vec!["T1"]);

        set_status(&mut s, "T1", TaskStatus::Done);
        assert_eq!(ready_ids(&s), vec!["T2"]);
    }

    #[test]
    fn test_ready_set_is_stable() {
        let s = sprint(vec![
            Task::new("a", "a"),
            Task::new("b", "b"),
            Task::new("c", "c").depends_on("a"),
        ]);
        assert_eq!(ready_ids(&s), ready_ids(&s));
        assert_eq!(ready_ids(&s), vec!["a", "b"]);
    }

    #[test]
    fn test_dangling_dependency_never_ready() {
        let mut s = sprint(vec![
            Task::new("a", "a"),
            Task::new("b", "b").depends_on("ghost"),
        ]);
        set_status(&mut s, "a", TaskStatus::Done);
        assert!(ready_ids(&s).is_empty());
        assert_eq!(unmet_dependencies(&s, s.task("b").unwrap()), vec!["ghost"]);
    }

    #[test]
    fn test_failed_dependency_blocks() {
        let mut s = sprint(vec![
            Task::new("a", "a"),
            Task::new("b", "b").depends_on("a"),
        ]);
        set_status(&mut s, "a", TaskStatus::Failed);
        assert!(ready_ids(&s).is_empty());
        assert!(!is_complete(&s));

        set_status(&mut s, "b", TaskStatus::Failed);
        assert!(is_complete(&s));
    }

    #[test]
    fn test_in_progress_not_ready() {
        let mut s = sprint(vec![Task::new("a", "a")]);
        set_status(&mut s, "a", TaskStatus::InProgress);
        assert!(ready_ids(&s).is_empty());
    }

    #[test]
    fn test_progress() {
        let mut s = sprint(vec![
            Task::new("a", "a"),
            Task::new("b", "b"),
            Task::new("c", "c"),
        ]);
        set_status(&mut s, "a", TaskStatus::Done);
        set_status(&mut s, "b", TaskStatus::Failed);
        let p = progress(&s);
        assert_eq!((p.total, p.done, p.failed, p.pending), (3, 1, 1, 1));
        assert_eq!(p.percent, 33);
    }

    #[test]
    fn test_validate_accepts_dag() {
        let tasks = vec![
            Task::new("a", "a"),
            Task::new("b", "b").depends_on("a"),
            Task::new("c", "c").depends_on("a").depends_on("b"),
        ];
        validate_dependencies(&tasks).unwrap();
        assert_eq!(topological_order(&tasks), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_validate_rejects_bad_graphs() {
        let dup = vec![Task::new("a", "a"), Task::new("a", "again")];
        assert!(validate_dependencies(&dup)
            .unwrap_err()
            .to_string()
            .contains("Duplicate"));

        let selfish = vec![Task::new("a", "a").depends_on("a")];
        assert!(validate_dependencies(&selfish)
            .unwrap_err()
            .to_string()
            .contains("themselves"));

        let dangling = vec![Task::new("a", "a").depends_on("zz")];
        assert!(validate_dependencies(&dangling)
            .unwrap_err()
            .to_string()
            .contains("a -> zz"));

        let cycle = vec![
            Task::new("a", "a").depends_on("c"),
            Task::new("b", "b").depends_on("a"),
            Task::new("c", "c").depends_on("b"),
            Task::new("d", "d"),
        ];
        let err = validate_dependencies(&cycle).unwrap_err().to_string();
        assert!(err.contains("cycle"));
        assert!(err.contains("a, b, c"));
        assert!(!err.contains(", d"));
    }
}
