use crate::types::{Task, TaskStatus};
use chrono::Utc;
use maestro_core::{MaestroError, MaestroResult};
use std::collections::{HashMap, HashSet};

/// All tasks of one run plus the dependency-aware scheduling rules.
///
/// Dependency integrity is not validated on insert; a dangling dependency
/// simply never becomes satisfied and surfaces as a deadlock.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: HashMap<String, Task>,
    /// Insertion order, used for stable iteration and tie-breaking.
    order: Vec<String>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single task. Ids must be unique within the graph.
    pub fn add(&mut self, task: Task) -> MaestroResult<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(MaestroError::Validation(format!(
                "duplicate task id '{}'",
                task.id
            )));
        }
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Register a batch of tasks. Nothing is inserted if any id collides.
    pub fn add_tasks(&mut self, tasks: Vec<Task>) -> MaestroResult<()> {
        let mut seen = HashSet::new();
        for task in &tasks {
            if self.tasks.contains_key(&task.id) || !seen.insert(task.id.as_str()) {
                return Err(MaestroError::Validation(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }
        for task in tasks {
            self.add(task)?;
        }
        Ok(())
    }

    /// Pending tasks whose dependencies are satisfied and that do not
    /// conflict with a running task, highest priority first.
    ///
    /// While anything is running, a ready task is only eligible if its own
    /// `parallel_with` list names every running task. The running tasks'
    /// lists are not consulted.
    pub fn next_executable(&self) -> Vec<&Task> {
        let running: Vec<&str> = self
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.id.as_str())
            .collect();

        let mut ready: Vec<&Task> = self
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && self.dependencies_met(t))
            .filter(|t| running.iter().all(|r| t.may_run_alongside(r)))
            .collect();
        // Stable sort keeps insertion order among equal priorities.
        ready.sort_by(|a, b| b.priority.cmp(&a.priority));
        ready
    }

    fn dependencies_met(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.tasks
                .get(dep)
                .is_some_and(|d| d.status.satisfies_dependents())
        })
    }

    /// Transition a task. Stamps `started_at` on entry to `running` and
    /// `completed_at` on entry to `completed` or `failed`. Re-applying the
    /// current status is a no-op and leaves the stamps untouched.
    pub fn update_status(&mut self, id: &str, status: TaskStatus) -> MaestroResult<()> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| MaestroError::TaskNotFound(id.to_string()))?;

        if task.status == status {
            return Ok(());
        }
        if !task.status.can_transition_to(status) {
            return Err(MaestroError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status.to_string(),
                to: status.to_string(),
            });
        }

        task.status = status;
        match status {
            TaskStatus::Running => task.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed => task.completed_at = Some(Utc::now()),
            TaskStatus::Pending | TaskStatus::Skipped => {}
        }
        Ok(())
    }

    /// True iff every task is completed or skipped.
    pub fn is_complete(&self) -> bool {
        self.tasks.values().all(|t| t.status.satisfies_dependents())
    }

    /// True iff any task failed.
    pub fn has_failed(&self) -> bool {
        self.tasks.values().any(|t| t.status == TaskStatus::Failed)
    }

    /// Depth-first search over dependency edges. Returns true on the first
    /// back edge to a node still on the recursion stack.
    pub fn detect_cycle(&self) -> bool {
        let mut visited: HashMap<&str, u8> = HashMap::new();
        self.order
            .iter()
            .any(|id| self.dfs_cycle(id.as_str(), &mut visited))
    }

    fn dfs_cycle<'a>(&'a self, id: &'a str, visited: &mut HashMap<&'a str, u8>) -> bool {
        match visited.get(id) {
            Some(1) => return true,  // back edge = cycle
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(task) = self.tasks.get(id) {
            for dep in &task.dependencies {
                if self.dfs_cycle(dep.as_str(), visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }

    /// Longest chain of dependency edges by task count, root first.
    ///
    /// Each task's longest chain is computed once per call. A dependency that
    /// is still on the recursion stack is treated as a leaf so a cyclic graph
    /// terminates.
    pub fn critical_path(&self) -> Vec<String> {
        let mut memo: HashMap<&str, Vec<String>> = HashMap::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        let mut best: Vec<String> = Vec::new();
        for id in &self.order {
            let chain = self.longest_chain_to(id.as_str(), &mut memo, &mut on_stack);
            if chain.len() > best.len() {
                best = chain;
            }
        }
        best
    }

    fn longest_chain_to<'a>(
        &'a self,
        id: &'a str,
        memo: &mut HashMap<&'a str, Vec<String>>,
        on_stack: &mut HashSet<&'a str>,
    ) -> Vec<String> {
        if let Some(chain) = memo.get(id) {
            return chain.clone();
        }
        let Some(task) = self.tasks.get(id) else {
            return Vec::new();
        };
        if !on_stack.insert(task.id.as_str()) {
            return Vec::new();
        }
        let mut best: Vec<String> = Vec::new();
        for dep in &task.dependencies {
            let chain = self.longest_chain_to(dep.as_str(), memo, on_stack);
            if chain.len() > best.len() {
                best = chain;
            }
        }
        best.push(task.id.clone());
        on_stack.remove(task.id.as_str());
        memo.insert(task.id.as_str(), best.clone());
        best
    }

    /// Number of tasks that transitively depend on `id`.
    pub fn downstream_count(&self, id: &str) -> usize {
        let mut reached: HashSet<&str> = HashSet::new();
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            for task in self.iter() {
                if task.depends_on(current) && reached.insert(task.id.as_str()) {
                    frontier.push(task.id.as_str());
                }
            }
        }
        reached.len()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Cloned snapshot of all tasks in insertion order.
    pub fn snapshot(&self) -> Vec<Task> {
        self.iter().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.count(TaskStatus::Pending)
    }

    pub fn running_count(&self) -> usize {
        self.count(TaskStatus::Running)
    }

    /// Count of tasks in a terminal state.
    pub fn finished_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .count()
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
