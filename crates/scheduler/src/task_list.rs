//! Index-tracked binary min-heap of tasks ordered by due key.
//!
//! Each task stores its own position in the backing vector so that
//! [`TaskList::update`] and [`TaskList::remove`] can locate it in O(1) and
//! repair the heap in O(log n). The list is the only writer of that position.
//! Equal due keys pop in unspecified order.

use std::sync::Arc;

use serde_json::Value;

use timedtask_core::{DueKey, TimedTaskError};

use crate::task::{Task, TaskFn};

pub struct TaskList<K: DueKey> {
    items: Vec<Arc<Task<K>>>,
}

impl<K: DueKey> TaskList<K> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The task with the smallest due key.
    pub fn peek(&self) -> Option<&Arc<Task<K>>> {
        self.items.first()
    }

    /// Pending tasks in storage (not due) order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Task<K>>> {
        self.items.iter()
    }

    /// Insert a task. Fails if the task already sits in a queue.
    pub fn push(&mut self, task: Arc<Task<K>>) -> Result<(), TimedTaskError> {
        let n = self.items.len();
        if !task.claim_heap_index(n) {
            return Err(TimedTaskError::AlreadyEnqueued(task.to_string()));
        }
        self.items.push(task);
        self.up(n);
        Ok(())
    }

    /// Remove and return the task with the smallest due key.
    pub fn pop(&mut self) -> Option<Arc<Task<K>>> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.remove_at(0))
    }

    /// Replace a pending task's argument, due key and function, repositioning
    /// it when the due key changed.
    pub fn update(
        &mut self,
        task: &Arc<Task<K>>,
        argument: Value,
        due: K,
        func: TaskFn<K>,
    ) -> Result<(), TimedTaskError> {
        let i = self.position(task)?;
        let old = task.replace(argument, due, func);
        if old != due {
            self.fix(i);
        }
        Ok(())
    }

    /// Remove a pending task from anywhere in the heap.
    pub fn remove(&mut self, task: &Arc<Task<K>>) -> Result<(), TimedTaskError> {
        let i = self.position(task)?;
        self.remove_at(i);
        Ok(())
    }

    /// Re-establish heap order at the root.
    pub fn fix_root(&mut self) {
        if !self.items.is_empty() {
            self.fix(0);
        }
    }

    /// Where `task` sits in this list; a task enqueued elsewhere is not found.
    fn position(&self, task: &Arc<Task<K>>) -> Result<usize, TimedTaskError> {
        task.heap_index()
            .filter(|&i| i < self.items.len() && Arc::ptr_eq(&self.items[i], task))
            .ok_or_else(|| TimedTaskError::NotFound(task.to_string()))
    }

    fn remove_at(&mut self, i: usize) -> Arc<Task<K>> {
        let last = self.items.len() - 1;
        self.swap(i, last);
        let task = self.items.swap_remove(last);
        task.clear_heap_index();
        if i < self.items.len() {
            self.fix(i);
        }
        task
    }

    fn fix(&mut self, i: usize) {
        let n = self.items.len();
        if !self.down(i, n) {
            self.up(i);
        }
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.items[i].due() < self.items[j].due()
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.items.swap(i, j);
        self.items[i].set_heap_index(i);
        self.items[j].set_heap_index(j);
    }

    fn up(&mut self, mut j: usize) {
        while j > 0 {
            let parent = (j - 1) / 2;
            if !self.less(j, parent) {
                break;
            }
            self.swap(parent, j);
            j = parent;
        }
    }

    /// Sift down within the first `n` items; returns whether the item moved.
    fn down(&mut self, i0: usize, n: usize) -> bool {
        let mut i = i0;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut j = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                j = right;
            }
            if !self.less(j, i) {
                break;
            }
            self.swap(i, j);
            i = j;
        }
        i > i0
    }
}

impl<K: DueKey> Default for TaskList<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: DueKey> Drop for TaskList<K> {
    fn drop(&mut self) {
        // Tasks outliving the list must be pushable again.
        for task in &self.items {
            task.clear_heap_index();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use timedtask_core::GameTick;

    use super::*;

    fn task(due: i64) -> Arc<Task<GameTick>> {
        Task::new(format!("t{due}"), GameTick(due), json!(due), |_| Ok(()))
    }

    fn noop() -> TaskFn<GameTick> {
        Arc::new(|_: &Task<GameTick>| -> anyhow::Result<()> { Ok(()) })
    }

    fn assert_invariants(list: &TaskList<GameTick>) {
        for (i, t) in list.items.iter().enumerate() {
            assert_eq!(t.heap_index(), Some(i), "index mismatch at {i}");
            if i > 0 {
                let parent = (i - 1) / 2;
                assert!(
                    list.items[parent].due() <= t.due(),
                    "heap violated at {i}: parent {} > child {}",
                    list.items[parent].due(),
                    t.due()
                );
            }
        }
    }

    fn drain_dues(list: &mut TaskList<GameTick>) -> Vec<i64> {
        std::iter::from_fn(|| list.pop()).map(|t| t.due().get()).collect()
    }

    #[test]
    fn pops_in_due_order() {
        let mut list = TaskList::new();
        for due in [5, 1, 3] {
            list.push(task(due)).unwrap();
        }
        assert_invariants(&list);
        assert_eq!(drain_dues(&mut list), vec![1, 3, 5]);
    }

    #[test]
    fn empty_pop_and_peek() {
        let mut list: TaskList<GameTick> = TaskList::new();
        assert!(list.peek().is_none());
        assert!(list.pop().is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn popped_task_is_detached() {
        let mut list = TaskList::new();
        let t = task(1);
        list.push(t.clone()).unwrap();
        assert!(t.is_enqueued());

        let popped = list.pop().unwrap();
        assert!(Arc::ptr_eq(&popped, &t));
        assert!(!t.is_enqueued());
        list.push(t).unwrap();
    }

    #[test]
    fn double_push_rejected() {
        let mut list = TaskList::new();
        let t = task(1);
        list.push(t.clone()).unwrap();
        let err = list.push(t).unwrap_err();
        assert!(matches!(err, TimedTaskError::AlreadyEnqueued(_)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn racing_lists_enqueue_a_task_once() {
        for _ in 0..200 {
            let t = task(1);
            let barrier = Barrier::new(2);
            let accepted: usize = thread::scope(|s| {
                let racers: Vec<_> = (0..2)
                    .map(|_| {
                        s.spawn(|| {
                            let mut list = TaskList::new();
                            barrier.wait();
                            let ok = list.push(t.clone()).is_ok();
                            // Keep the slot claimed until both racers are done.
                            barrier.wait();
                            ok
                        })
                    })
                    .collect();
                racers.into_iter().map(|r| usize::from(r.join().unwrap())).sum()
            });
            assert_eq!(accepted, 1);
            assert!(!t.is_enqueued());
        }
    }

    #[test]
    fn update_to_new_minimum_moves_to_root() {
        let mut list = TaskList::new();
        let tasks: Vec<_> = [10, 20, 30, 40].into_iter().map(task).collect();
        for t in &tasks {
            list.push(t.clone()).unwrap();
        }

        list.update(&tasks[3], json!("moved"), GameTick(1), noop()).unwrap();
        assert_invariants(&list);
        assert!(Arc::ptr_eq(list.peek().unwrap(), &tasks[3]));
        assert_eq!(tasks[3].argument(), json!("moved"));
    }

    #[test]
    fn update_root_to_later_sifts_down() {
        let mut list = TaskList::new();
        let tasks: Vec<_> = [1, 2, 3, 4, 5].into_iter().map(task).collect();
        for t in &tasks {
            list.push(t.clone()).unwrap();
        }

        list.update(&tasks[0], json!(null), GameTick(100), noop()).unwrap();
        assert_invariants(&list);
        assert_eq!(drain_dues(&mut list), vec![2, 3, 4, 5, 100]);
    }

    #[test]
    fn update_same_due_only_replaces_fields() {
        let mut list = TaskList::new();
        let a = task(5);
        let b = task(7);
        list.push(a.clone()).unwrap();
        list.push(b.clone()).unwrap();

        list.update(&b, json!("x"), GameTick(7), noop()).unwrap();
        assert_eq!(b.heap_index(), Some(1));
        assert_eq!(b.argument(), json!("x"));
    }

    #[test]
    fn update_missing_is_not_found() {
        let mut list = TaskList::new();
        list.push(task(1)).unwrap();
        let stray = task(2);
        let err = list.update(&stray, json!(null), GameTick(0), noop()).unwrap_err();
        assert!(matches!(err, TimedTaskError::NotFound(_)));
        assert_eq!(stray.due(), GameTick(2));
    }

    #[test]
    fn remove_missing_leaves_length_unchanged() {
        let mut list = TaskList::new();
        list.push(task(1)).unwrap();
        list.push(task(2)).unwrap();

        let err = list.remove(&task(3)).unwrap_err();
        assert!(matches!(err, TimedTaskError::NotFound(_)));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn remove_twice_is_not_found() {
        let mut list = TaskList::new();
        let t = task(4);
        list.push(t.clone()).unwrap();
        list.push(task(9)).unwrap();

        list.remove(&t).unwrap();
        assert!(!t.is_enqueued());
        assert!(matches!(list.remove(&t), Err(TimedTaskError::NotFound(_))));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn task_from_other_list_is_not_found() {
        let mut first = TaskList::new();
        let mut second = TaskList::new();
        let t = task(1);
        first.push(t.clone()).unwrap();
        second.push(task(1)).unwrap();

        assert!(matches!(second.remove(&t), Err(TimedTaskError::NotFound(_))));
        assert_eq!(second.len(), 1);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn remove_middle_keeps_order() {
        let mut list = TaskList::new();
        let tasks: Vec<_> = [8, 3, 6, 1, 9, 2, 7].into_iter().map(task).collect();
        for t in &tasks {
            list.push(t.clone()).unwrap();
        }

        list.remove(&tasks[2]).unwrap();
        list.remove(&tasks[3]).unwrap();
        assert_invariants(&list);
        assert_eq!(drain_dues(&mut list), vec![2, 3, 7, 8, 9]);
    }

    #[test]
    fn dropping_list_detaches_tasks() {
        let t = task(1);
        {
            let mut list = TaskList::new();
            list.push(t.clone()).unwrap();
        }
        assert!(!t.is_enqueued());
    }

    #[test]
    fn mixed_operations_preserve_invariants() {
        let mut rng = StdRng::seed_from_u64(0x2545_F491_4F6C_DD1D);
        let mut list = TaskList::new();
        let mut live: Vec<Arc<Task<GameTick>>> = Vec::new();

        for _ in 0..2000 {
            match rng.gen_range(0..4) {
                0 | 1 => {
                    let t = task(rng.gen_range(0..500));
                    list.push(t.clone()).unwrap();
                    live.push(t);
                }
                2 if !live.is_empty() => {
                    let t = &live[rng.gen_range(0..live.len())];
                    if t.is_enqueued() {
                        let due = GameTick(rng.gen_range(0..500));
                        list.update(t, json!(null), due, noop()).unwrap();
                    }
                }
                3 if !live.is_empty() => {
                    let t = live.swap_remove(rng.gen_range(0..live.len()));
                    if t.is_enqueued() {
                        list.remove(&t).unwrap();
                    }
                }
                _ => {
                    if let Some(t) = list.pop() {
                        live.retain(|l| !Arc::ptr_eq(l, &t));
                    }
                }
            }
            assert_invariants(&list);
        }

        let dues = drain_dues(&mut list);
        assert!(dues.windows(2).all(|w| w[0] <= w[1]), "not sorted: {dues:?}");
    }
}
