//! Tasks and the scheduling queue.
//!
//! The queue is a min-heap ordered by `(priority, insertion_sequence)` --
//! FIFO within a priority level. Two side structures keep scheduling cheap:
//! a hash set of completed task ids for O(1) dependency checks, and a map of
//! blocked tasks tagged with their blocking cause. Dependency checks against
//! the completed-id set replace any scan over completed task lists.

use crate::id::{ModuleTypeId, RecipeId, ResourceId, TaskId};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Why a task is parked in the blocked map instead of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCause {
    Dependencies,
    Module,
    Resources,
    Energy,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Active,
    Completed,
    Blocked(BlockCause),
}

/// A scheduled instance of a recipe for a specific quantity.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Human-readable id: monotonic counter plus output name.
    pub label: String,
    pub output: ResourceId,
    pub quantity: f64,
    /// Lower runs sooner. Children sit one level below their parent.
    pub priority: u32,
    pub status: TaskStatus,
    /// Tasks that must complete before this one may start.
    pub dependencies: Vec<TaskId>,
    /// Module type holding this task's slot while Active.
    pub assigned_module: Option<ModuleTypeId>,
    /// Work left, in simulated hours, while Active.
    pub remaining_hours: f64,
    /// Average electrical draw while Active, in kW.
    pub power_kw: f64,
    /// Recipe backing this task. None for goals with no declared recipe.
    pub recipe: Option<RecipeId>,
}

impl Task {
    pub fn new(
        id: TaskId,
        output: ResourceId,
        output_name: &str,
        quantity: f64,
        priority: u32,
        dependencies: Vec<TaskId>,
        recipe: Option<RecipeId>,
    ) -> Self {
        Self {
            id,
            label: format!("{}:{output_name}", id.0),
            output,
            quantity,
            priority,
            status: TaskStatus::Queued,
            dependencies,
            assigned_module: None,
            remaining_hours: 0.0,
            power_kw: 0.0,
            recipe,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Heap entry: min-ordered by (priority, insertion sequence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapKey {
    priority: u32,
    seq: u64,
    id: TaskId,
}

/// The task graph: owns every live task plus the queue/blocked/active/
/// completed index structures.
#[derive(Debug, Default)]
pub struct TaskQueue {
    /// All live (non-archived) tasks by id.
    tasks: HashMap<TaskId, Task>,
    /// Min-heap of queued tasks. Entries may be stale; validated on pop.
    heap: BinaryHeap<Reverse<HeapKey>>,
    /// Blocked tasks by id, tagged with the blocking cause. Ordered so
    /// rescans re-enqueue in task-id order.
    blocked: BTreeMap<TaskId, BlockCause>,
    /// Active task ids, ordered for deterministic per-tick iteration.
    active: BTreeSet<TaskId>,
    /// Completed task ids. Retained for the life of the run.
    completed_ids: HashSet<TaskId>,
    /// Completions per output resource, for the learning curve.
    completions_by_output: HashMap<ResourceId, u32>,
    next_id: u64,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next task id.
    pub fn allocate_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert a task and push it onto the heap.
    pub fn enqueue(&mut self, mut task: Task) {
        task.status = TaskStatus::Queued;
        let key = HeapKey {
            priority: task.priority,
            seq: self.next_seq,
            id: task.id,
        };
        self.next_seq += 1;
        self.heap.push(Reverse(key));
        self.tasks.insert(task.id, task);
    }

    /// Pop heap entries until one with all dependencies completed is found.
    /// Tasks popped with unmet dependencies are parked as
    /// [`BlockCause::Dependencies`]. Returns `None` when the heap drains.
    pub fn pop_ready(&mut self) -> Option<TaskId> {
        while let Some(Reverse(key)) = self.heap.pop() {
            let Some(task) = self.tasks.get_mut(&key.id) else {
                continue; // stale entry for an archived task
            };
            if task.status != TaskStatus::Queued {
                continue; // stale entry; task moved since it was pushed
            }
            let ready = task
                .dependencies
                .iter()
                .all(|dep| self.completed_ids.contains(dep));
            if ready {
                return Some(key.id);
            }
            task.status = TaskStatus::Blocked(BlockCause::Dependencies);
            self.blocked.insert(key.id, BlockCause::Dependencies);
        }
        None
    }

    /// Park a task with the given blocking cause.
    pub fn block(&mut self, id: TaskId, cause: BlockCause) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.status = TaskStatus::Blocked(cause);
            self.blocked.insert(id, cause);
        }
    }

    /// Mark a task Active with its module assignment and remaining work.
    pub fn activate(&mut self, id: TaskId, module: ModuleTypeId, remaining_hours: f64) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.status = TaskStatus::Active;
            task.assigned_module = Some(module);
            task.remaining_hours = remaining_hours;
            self.active.insert(id);
        }
    }

    /// Return an active task to the queue at its original priority.
    /// The slot release and input refund are the caller's business.
    pub fn requeue(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        task.assigned_module = None;
        task.remaining_hours = 0.0;
        task.power_kw = 0.0;
        task.status = TaskStatus::Queued;
        self.active.remove(&id);
        let key = HeapKey {
            priority: task.priority,
            seq: self.next_seq,
            id,
        };
        self.next_seq += 1;
        self.heap.push(Reverse(key));
    }

    /// Complete a task: add its id to the completed set, bump the per-output
    /// completion counter, and archive it out of the live map. Returns the
    /// archived task.
    pub fn complete(&mut self, id: TaskId) -> Option<Task> {
        let mut task = self.tasks.remove(&id)?;
        task.status = TaskStatus::Completed;
        task.assigned_module = None;
        self.active.remove(&id);
        self.completed_ids.insert(id);
        *self.completions_by_output.entry(task.output).or_insert(0) += 1;
        Some(task)
    }

    /// Re-evaluate every blocked task. `still_blocked` decides, per task and
    /// recorded cause, whether the cause still holds; dependency causes are
    /// settled internally against the completed set. Cleared tasks re-enter
    /// the heap at their original priority. Idempotent when nothing else
    /// mutates between calls.
    pub fn rescan_blocked(&mut self, mut still_blocked: impl FnMut(&Task, BlockCause) -> bool) {
        let ids: Vec<TaskId> = self.blocked.keys().copied().collect();
        for id in ids {
            let cause = self.blocked[&id];
            let Some(task) = self.tasks.get(&id) else {
                self.blocked.remove(&id);
                continue;
            };
            let holds = match cause {
                BlockCause::Dependencies => !task
                    .dependencies
                    .iter()
                    .all(|dep| self.completed_ids.contains(dep)),
                other => still_blocked(task, other),
            };
            if !holds {
                self.blocked.remove(&id);
                let task = self.tasks.get_mut(&id).unwrap();
                task.status = TaskStatus::Queued;
                let key = HeapKey {
                    priority: task.priority,
                    seq: self.next_seq,
                    id,
                };
                self.next_seq += 1;
                self.heap.push(Reverse(key));
            }
        }
    }

    // -- Accessors --

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn is_completed(&self, id: TaskId) -> bool {
        self.completed_ids.contains(&id)
    }

    pub fn completed_ids(&self) -> &HashSet<TaskId> {
        &self.completed_ids
    }

    pub fn completions_of(&self, output: ResourceId) -> u32 {
        self.completions_by_output.get(&output).copied().unwrap_or(0)
    }

    /// Per-output completion counts, cloned for use while the queue is
    /// mutably borrowed elsewhere (rescan closures).
    pub fn completions_map(&self) -> HashMap<ResourceId, u32> {
        self.completions_by_output.clone()
    }

    pub fn active_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.active.iter().copied()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    /// Blocked-task counts broken out by cause.
    pub fn blocked_by_cause(&self) -> HashMap<BlockCause, usize> {
        let mut counts = HashMap::new();
        for cause in self.blocked.values() {
            *counts.entry(*cause).or_insert(0) += 1;
        }
        counts
    }

    /// Queued tasks still waiting in the heap (live entries only).
    pub fn queued_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .count()
    }

    /// Ids of every live task, for snapshots.
    pub fn live_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.keys().copied()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty() && self.blocked.is_empty() && self.queued_count() == 0
    }
}
