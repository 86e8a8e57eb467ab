// ABOUTME: Category-based mutual exclusion expressed as dependency edges
// ABOUTME: FIFO per category: each registrant depends on the previous tail

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::trace;

use crate::task::{TaskHandle, TaskId};

/// Serializes tasks that declare the same category.
///
/// Registration returns the previous tail of each category so the caller can
/// add it as an ordinary dependency; the normal finish-before mechanism then
/// guarantees at-most-one-active and FIFO admission without any further
/// synchronization primitive.
///
/// Constructed by the queue (or shared between queues via `Arc`); never a
/// process-wide singleton.
pub struct ExclusivityManager {
    categories: Mutex<HashMap<String, Vec<TaskHandle>>>,
}

impl ExclusivityManager {
    pub fn new() -> Self {
        Self {
            categories: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `task` under each category, returning the tasks it must now
    /// depend on (the previous tail of each category, if any).
    pub(crate) fn register(&self, task: &TaskHandle, categories: &[String]) -> Vec<TaskHandle> {
        let mut registry = self.categories.lock().expect("exclusivity registry poisoned");
        let mut previous = Vec::new();
        for category in categories {
            trace!("task `{}` >>> category `{}`", task.name(), category);
            let registered = registry.entry(category.clone()).or_default();
            if let Some(last) = registered.last() {
                previous.push(last.clone());
            }
            registered.push(task.clone());
        }
        previous
    }

    /// Removes `task` from each category once it has finished.
    pub(crate) fn deregister(&self, task: TaskId, categories: &[String]) {
        let mut registry = self.categories.lock().expect("exclusivity registry poisoned");
        for category in categories {
            if let Some(registered) = registry.get_mut(category) {
                registered.retain(|handle| handle.id() != task);
                trace!("task {task} <<< category `{category}`");
                if registered.is_empty() {
                    registry.remove(category);
                }
            }
        }
    }

    /// Number of tasks currently registered in `category`.
    pub fn registered(&self, category: &str) -> usize {
        self.categories
            .lock()
            .expect("exclusivity registry poisoned")
            .get(category)
            .map(|registered| registered.len())
            .unwrap_or(0)
    }
}

impl Default for ExclusivityManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn handle(name: &str) -> TaskHandle {
        Task::block(name, |_ctx| async { Ok(()) }).handle()
    }

    #[test]
    fn test_first_registrant_has_no_predecessor() {
        let manager = ExclusivityManager::new();
        let first = handle("first");
        let previous = manager.register(&first, &["sync".to_string()]);
        assert!(previous.is_empty());
        assert_eq!(manager.registered("sync"), 1);
    }

    #[test]
    fn test_later_registrants_depend_on_previous_tail() {
        let manager = ExclusivityManager::new();
        let first = handle("first");
        let second = handle("second");
        let third = handle("third");
        let category = vec!["sync".to_string()];

        manager.register(&first, &category);
        let previous = manager.register(&second, &category);
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].id(), first.id());

        let previous = manager.register(&third, &category);
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].id(), second.id());
        assert_eq!(manager.registered("sync"), 3);
    }

    #[test]
    fn test_multiple_categories_collect_each_tail() {
        let manager = ExclusivityManager::new();
        let a = handle("a");
        let b = handle("b");
        manager.register(&a, &["one".to_string()]);
        manager.register(&b, &["two".to_string()]);

        let c = handle("c");
        let previous = manager.register(&c, &["one".to_string(), "two".to_string()]);
        let ids: Vec<_> = previous.iter().map(|handle| handle.id()).collect();
        assert!(ids.contains(&a.id()));
        assert!(ids.contains(&b.id()));
    }

    #[test]
    fn test_deregister_removes_and_drops_empty_category() {
        let manager = ExclusivityManager::new();
        let first = handle("first");
        let second = handle("second");
        let category = vec!["sync".to_string()];
        manager.register(&first, &category);
        manager.register(&second, &category);

        manager.deregister(first.id(), &category);
        assert_eq!(manager.registered("sync"), 1);

        // New registrant now depends on the surviving tail.
        let third = handle("third");
        let previous = manager.register(&third, &category);
        assert_eq!(previous[0].id(), second.id());

        manager.deregister(second.id(), &category);
        manager.deregister(third.id(), &category);
        assert_eq!(manager.registered("sync"), 0);
    }
}
