//! FIFO of pending block fetches driving the backward chain walk.

use std::collections::VecDeque;

/// A block hash waiting to be fetched, with its failure count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub block_hash: String,
    pub error_count: u32,
}

impl FetchTask {
    pub fn new(block_hash: impl Into<String>) -> Self {
        Self {
            block_hash: block_hash.into(),
            error_count: 0,
        }
    }
}

/// What happened to a task after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put back at the tail with the given error count.
    Requeued { error_count: u32 },
    /// Retry ceiling exceeded; the task is gone.
    Dropped { error_count: u32 },
}

/// FIFO of fetch tasks.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<FetchTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a fresh task for `block_hash` at the tail.
    pub fn push(&mut self, block_hash: impl Into<String>) {
        self.tasks.push_back(FetchTask::new(block_hash));
    }

    /// Take the task at the head.
    pub fn pop(&mut self) -> Option<FetchTask> {
        self.tasks.pop_front()
    }

    /// Record a failed attempt. The task is requeued at the tail while its
    /// error count stays within `ceiling`, and dropped otherwise.
    pub fn fail(&mut self, mut task: FetchTask, ceiling: u32) -> RetryDecision {
        task.error_count += 1;
        let error_count = task.error_count;
        if error_count <= ceiling {
            self.tasks.push_back(task);
            RetryDecision::Requeued { error_count }
        } else {
            RetryDecision::Dropped { error_count }
        }
    }

    pub fn contains(&self, block_hash: &str) -> bool {
        self.tasks.iter().any(|t| t.block_hash == block_hash)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = TaskQueue::new();
        q.push("a");
        q.push("b");
        assert_eq!(q.pop().unwrap().block_hash, "a");
        assert_eq!(q.pop().unwrap().block_hash, "b");
        assert!(q.pop().is_none());
    }

    #[test]
    fn failed_task_goes_to_tail() {
        let mut q = TaskQueue::new();
        q.push("a");
        q.push("b");
        let a = q.pop().unwrap();
        assert_eq!(q.fail(a, 8), RetryDecision::Requeued { error_count: 1 });
        assert_eq!(q.pop().unwrap().block_hash, "b");
        let a = q.pop().unwrap();
        assert_eq!(a.error_count, 1);
    }

    #[test]
    fn ninth_failure_drops() {
        let mut q = TaskQueue::new();
        q.push("dead");
        for attempt in 1..=8 {
            let t = q.pop().unwrap();
            assert_eq!(q.fail(t, 8), RetryDecision::Requeued { error_count: attempt });
        }
        let t = q.pop().unwrap();
        assert_eq!(q.fail(t, 8), RetryDecision::Dropped { error_count: 9 });
        assert!(q.is_empty());
        assert!(!q.contains("dead"));
    }
}
