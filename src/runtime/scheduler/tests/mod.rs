//! Scheduler 单元测试
//!
//! 测试任务标识、生命周期状态、优先级与调度行为


use crate::runtime::scheduler::{TaskId, TaskOptions, TaskPriority, TaskState, PRIORITY_COUNT};

#[cfg(test)]
mod task_id_tests {
    use super::*;

    #[test]
    fn test_task_id_inner() {
        let id = TaskId(1);
        assert_eq!(id.inner(), 1);
        assert_eq!(usize::from(id), 1);
        assert_eq!(TaskId::from(9), TaskId(9));
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId(3).to_string(), "Task(3)");
    }

    #[test]
    fn test_task_id_ordering() {
        assert!(TaskId(1) < TaskId(2));
        assert_ne!(TaskId(1), TaskId(2));
    }
}

#[cfg(test)]
mod task_state_tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Created.is_terminal());
        assert!(!TaskState::Scheduled.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Errored.is_terminal());
    }

    #[test]
    fn test_lifecycle_edges() {
        use TaskState::*;
        assert!(Created.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Errored));
        for from in [Created, Scheduled, Running] {
            assert!(from.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn test_rejected_edges() {
        use TaskState::*;
        assert!(!Created.can_transition_to(Running));
        assert!(!Scheduled.can_transition_to(Completed));
        assert!(!Scheduled.can_transition_to(Errored));
        assert!(!Running.can_transition_to(Scheduled));
        for terminal in [Completed, Cancelled, Errored] {
            for to in [Created, Scheduled, Running, Completed, Cancelled, Errored] {
                assert!(!terminal.can_transition_to(to), "{} -> {}", terminal, to);
            }
        }
    }
}

#[cfg(test)]
mod task_priority_tests {
    use super::*;

    #[test]
    fn test_default_priority() {
        assert_eq!(TaskPriority::default(), TaskPriority::Normal);
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(TaskPriority::ALL.len(), PRIORITY_COUNT);
        for (index, priority) in TaskPriority::ALL.iter().enumerate() {
            assert_eq!(priority.index(), index);
        }
        assert!(TaskPriority::Highest < TaskPriority::Lowest);
    }
}

#[cfg(test)]
mod task_options_tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = TaskOptions::new()
            .with_name("render")
            .with_priority(TaskPriority::Low)
            .with_parent(TaskId(4));
        assert_eq!(options.name.as_deref(), Some("render"));
        assert_eq!(options.priority, TaskPriority::Low);
        assert_eq!(options.parent, Some(TaskId(4)));
    }

    #[test]
    fn test_options_default() {
        let options = TaskOptions::default();
        assert!(options.name.is_none());
        assert_eq!(options.priority, TaskPriority::Normal);
        assert!(options.parent.is_none());
    }
}
