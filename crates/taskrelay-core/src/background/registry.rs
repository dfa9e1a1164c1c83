//! Task registry with a per-session index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::task::{BackgroundTask, TaskStatus};

#[derive(Default)]
struct RegistryInner {
    tasks: HashMap<String, Arc<BackgroundTask>>,
    by_session: HashMap<String, HashSet<String>>,
}

impl RegistryInner {
    fn remove(&mut self, task_id: &str) -> Option<Arc<BackgroundTask>> {
        let task = self.tasks.remove(task_id)?;
        if let Some(ids) = self.by_session.get_mut(task.session_id()) {
            ids.remove(task_id);
            if ids.is_empty() {
                self.by_session.remove(task.session_id());
            }
        }
        Some(task)
    }
}

/// Owner of every background task in the process.
///
/// Readers share the lock; writers are exclusive. `parking_lot`'s lock is
/// eventually fair, so a stream of readers cannot starve a writer.
#[derive(Default)]
pub struct TaskRegistry {
    inner: RwLock<RegistryInner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task and index it by session. Returns its id.
    pub fn register(&self, task: Arc<BackgroundTask>) -> String {
        let task_id = task.task_id().to_string();
        let mut inner = self.inner.write();
        if inner.remove(&task_id).is_some() {
            tracing::warn!(task_id = %task_id, "Replacing task with duplicate id");
        }
        inner
            .by_session
            .entry(task.session_id().to_string())
            .or_default()
            .insert(task_id.clone());
        inner.tasks.insert(task_id.clone(), task);
        task_id
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<BackgroundTask>> {
        self.inner.read().tasks.get(task_id).cloned()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.inner.read().tasks.contains_key(task_id)
    }

    pub fn get_by_session(&self, session_id: &str) -> Vec<Arc<BackgroundTask>> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_session.get(session_id) else {
            return Vec::new();
        };
        let mut tasks: Vec<_> = ids
            .iter()
            .filter_map(|id| inner.tasks.get(id).cloned())
            .collect();
        tasks.sort_by_key(|t| t.created_at_ms());
        tasks
    }

    /// Tasks of a session that are pending or running.
    pub fn get_running_tasks(&self, session_id: &str) -> Vec<Arc<BackgroundTask>> {
        self.get_by_session(session_id)
            .into_iter()
            .filter(|t| !t.is_finished())
            .collect()
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.inner.read().by_session.contains_key(session_id)
    }

    pub fn remove(&self, task_id: &str) -> bool {
        self.inner.write().remove(task_id).is_some()
    }

    /// Remove finished tasks whose completion is at least `max_age` old.
    /// Pending and running tasks are never removed.
    pub fn cleanup_finished_tasks(&self, max_age: Duration) -> usize {
        let expired: Vec<String> = {
            let inner = self.inner.read();
            inner
                .tasks
                .values()
                .filter(|t| t.finished_age().is_some_and(|age| age >= max_age))
                .map(|t| t.task_id().to_string())
                .collect()
        };
        if expired.is_empty() {
            return 0;
        }

        let mut inner = self.inner.write();
        expired
            .iter()
            .filter(|id| inner.remove(id).is_some())
            .count()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.tasks.clear();
        inner.by_session.clear();
    }

    pub fn count(&self) -> usize {
        self.inner.read().tasks.len()
    }

    pub fn count_by_status(&self) -> HashMap<TaskStatus, usize> {
        let inner = self.inner.read();
        let mut counts = HashMap::new();
        for task in inner.tasks.values() {
            *counts.entry(task.status()).or_insert(0) += 1;
        }
        counts
    }

    pub fn task_ids(&self) -> HashSet<String> {
        self.inner.read().tasks.keys().cloned().collect()
    }

    pub fn session_ids(&self) -> HashSet<String> {
        self.inner.read().by_session.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskrelay_traits::ToolArgs;

    fn task(id: &str, session: &str) -> Arc<BackgroundTask> {
        Arc::new(BackgroundTask::with_id(id, "tool", ToolArgs::new(), session))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = TaskRegistry::new();
        assert_eq!(registry.register(task("a", "s1")), "a");
        registry.register(task("b", "s1"));
        registry.register(task("c", "s2"));

        assert!(registry.get("a").is_some());
        assert!(registry.get("zzz").is_none());
        assert_eq!(registry.get_by_session("s1").len(), 2);
        assert_eq!(registry.get_by_session("s2").len(), 1);
        assert!(registry.get_by_session("s3").is_empty());
        assert_eq!(registry.count(), 3);
    }

    #[test]
    fn test_running_tasks_excludes_finished() {
        let registry = TaskRegistry::new();
        let done = task("done", "s1");
        done.start();
        done.complete("ok");
        registry.register(done);
        registry.register(task("pending", "s1"));

        let running = registry.get_running_tasks("s1");
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].task_id(), "pending");
    }

    #[test]
    fn test_remove_drops_empty_session() {
        let registry = TaskRegistry::new();
        registry.register(task("a", "s1"));
        assert!(registry.has_session("s1"));
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(!registry.has_session("s1"));
    }

    #[test]
    fn test_cleanup_zero_age_keeps_unfinished() {
        let registry = TaskRegistry::new();
        let finished = task("finished", "s1");
        finished.start();
        finished.fail("err");
        registry.register(finished);

        let running = task("running", "s1");
        running.start();
        registry.register(running);
        registry.register(task("pending", "s2"));

        assert_eq!(registry.cleanup_finished_tasks(Duration::ZERO), 1);
        assert!(registry.get("finished").is_none());
        assert!(registry.get("running").is_some());
        assert!(registry.get("pending").is_some());
        assert_eq!(registry.get_by_session("s1").len(), 1);
    }

    #[test]
    fn test_cleanup_respects_retention() {
        let registry = TaskRegistry::new();
        let finished = task("finished", "s1");
        finished.start();
        finished.complete("ok");
        registry.register(finished);

        assert_eq!(
            registry.cleanup_finished_tasks(Duration::from_secs(3600)),
            0
        );
        assert!(registry.contains("finished"));
    }

    #[test]
    fn test_count_by_status() {
        let registry = TaskRegistry::new();
        registry.register(task("a", "s1"));
        let b = task("b", "s1");
        b.start();
        registry.register(b);
        let c = task("c", "s1");
        c.cancel();
        registry.register(c);

        let counts = registry.count_by_status();
        assert_eq!(counts.get(&TaskStatus::Pending), Some(&1));
        assert_eq!(counts.get(&TaskStatus::Running), Some(&1));
        assert_eq!(counts.get(&TaskStatus::Cancelled), Some(&1));
        assert_eq!(counts.get(&TaskStatus::Completed), None);
    }

    #[test]
    fn test_clear() {
        let registry = TaskRegistry::new();
        registry.register(task("a", "s1"));
        registry.clear();
        assert_eq!(registry.count(), 0);
        assert!(registry.session_ids().is_empty());
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let registry = Arc::new(TaskRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let id = format!("t{i}_{j}");
                        registry.register(task(&id, &format!("s{i}")));
                        assert!(registry.get(&id).is_some());
                        let _ = registry.get_by_session(&format!("s{}", (i + 1) % 8));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread should not panic");
        }
        assert_eq!(registry.count(), 400);
    }
}
