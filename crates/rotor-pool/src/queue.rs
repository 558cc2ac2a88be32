use std::collections::VecDeque;

use rotor_core::Task;

/// In-memory buffer of pending tasks: one FIFO lane per priority.
///
/// `pop` always serves the highest non-empty lane, and enqueue order within a
/// lane is preserved, so dispatch order is stable by construction.
#[derive(Default)]
pub struct PriorityQueue {
    lanes: [VecDeque<Task>; 3],
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task) {
        self.lanes[task.priority.lane()].push_back(task);
    }

    /// Put a task back at the head of its lane. Used when an assignment
    /// fails after the task was already popped.
    pub fn requeue_front(&mut self, task: Task) {
        self.lanes[task.priority.lane()].push_front(task);
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.lanes.iter_mut().find_map(|lane| lane.pop_front())
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    /// Remove and return everything still queued, highest priority first.
    pub fn drain(&mut self) -> Vec<Task> {
        let mut out = Vec::with_capacity(self.len());
        for lane in &mut self.lanes {
            out.extend(lane.drain(..));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotor_core::{Priority, TaskKind};

    fn task(priority: Priority, marker: &str) -> Task {
        Task::new(TaskKind::Collect, serde_json::json!({ "marker": marker }))
            .with_priority(priority)
    }

    fn marker(task: &Task) -> String {
        task.payload["marker"].as_str().unwrap().to_owned()
    }

    #[test]
    fn pops_high_before_normal_before_low() {
        let mut queue = PriorityQueue::new();
        queue.push(task(Priority::Low, "a"));
        queue.push(task(Priority::High, "b"));
        queue.push(task(Priority::Normal, "c"));

        assert_eq!(marker(&queue.pop().unwrap()), "b");
        assert_eq!(marker(&queue.pop().unwrap()), "c");
        assert_eq!(marker(&queue.pop().unwrap()), "a");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn fifo_within_one_priority() {
        let mut queue = PriorityQueue::new();
        for m in ["first", "second", "third"] {
            queue.push(task(Priority::Normal, m));
        }
        assert_eq!(marker(&queue.pop().unwrap()), "first");
        assert_eq!(marker(&queue.pop().unwrap()), "second");
        assert_eq!(marker(&queue.pop().unwrap()), "third");
    }

    #[test]
    fn requeue_front_preserves_head_position() {
        let mut queue = PriorityQueue::new();
        queue.push(task(Priority::Normal, "a"));
        queue.push(task(Priority::Normal, "b"));

        let popped = queue.pop().unwrap();
        assert_eq!(marker(&popped), "a");
        queue.requeue_front(popped);
        assert_eq!(marker(&queue.pop().unwrap()), "a");
        assert_eq!(marker(&queue.pop().unwrap()), "b");
    }

    #[test]
    fn len_and_drain() {
        let mut queue = PriorityQueue::new();
        queue.push(task(Priority::High, "h"));
        queue.push(task(Priority::Low, "l"));
        queue.push(task(Priority::Normal, "n"));
        assert_eq!(queue.len(), 3);

        let drained = queue.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(marker(&drained[0]), "h");
        assert_eq!(marker(&drained[2]), "l");
        assert!(queue.is_empty());
    }
}
