use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use foreman_core::{Config, ForemanError, SchedulerConfig, StorageConfig};

use super::state::{JobOffer, PendingItem};
use super::*;
use crate::coordinator::Coordinator;
use crate::error::{QueueError, TaskError};
use crate::event::OneShotEvent;
use crate::executor::Executor;
use crate::node::{Mode, Node};
use crate::resource::{Resource, ResourceList};
use crate::task::{Executable, ExecutionContext};

// ── Fixtures ────────────────────────────────────────────────────────

#[derive(Clone)]
struct Job {
    name: String,
    label: Option<Label>,
    blocked: Arc<AtomicBool>,
    resources: ResourceList,
    estimate: Option<Duration>,
    runs: Arc<AtomicUsize>,
    gate: Option<Arc<OneShotEvent>>,
    panics: bool,
}

impl Job {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            label: None,
            blocked: Arc::new(AtomicBool::new(false)),
            resources: ResourceList::new(),
            estimate: None,
            runs: Arc::new(AtomicUsize::new(0)),
            gate: None,
            panics: false,
        }
    }

    fn labeled(mut self, label: &str) -> Self {
        self.label = Some(Label::new(label));
        self
    }

    fn writes(mut self, resource: &str) -> Self {
        self.resources = self.resources.w(Resource::new(resource));
        self
    }

    fn estimate(mut self, d: Duration) -> Self {
        self.estimate = Some(d);
        self
    }

    fn gated(mut self, gate: &Arc<OneShotEvent>) -> Self {
        self.gate = Some(Arc::clone(gate));
        self
    }

    fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    fn arc(&self) -> Arc<dyn Task> {
        Arc::new(self.clone())
    }
}

impl Task for Job {
    fn name(&self) -> &str {
        &self.name
    }
    fn assigned_label(&self) -> Option<Label> {
        self.label.clone()
    }
    fn is_build_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }
    fn why_blocked(&self) -> Option<String> {
        Some("held by test".into())
    }
    fn estimated_duration(&self) -> Option<Duration> {
        self.estimate
    }
    fn resource_list(&self) -> ResourceList {
        self.resources.clone()
    }
    fn create_executable(&self) -> Result<Box<dyn Executable>, TaskError> {
        Ok(Box::new(JobRun {
            name: self.name.clone(),
            runs: Arc::clone(&self.runs),
            gate: self.gate.clone(),
            panics: self.panics,
        }))
    }
}

struct JobRun {
    name: String,
    runs: Arc<AtomicUsize>,
    gate: Option<Arc<OneShotEvent>>,
    panics: bool,
}

impl Executable for JobRun {
    fn parent(&self) -> &str {
        &self.name
    }
    fn run(&mut self, _ctx: &ExecutionContext) -> Result<(), TaskError> {
        if let Some(gate) = &self.gate {
            gate.block_timeout(Duration::from_secs(10));
        }
        if self.panics {
            panic!("job {} exploded", self.name);
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        min_park_timeout_ms: 10,
        default_quiet_period_secs: 0,
        maintenance_interval_secs: 1,
        ..SchedulerConfig::default()
    }
}

fn new_queue() -> Arc<Queue> {
    Queue::new(test_config())
}

/// Register a computer whose executors are driven by the test, not by threads.
fn manual_computer(queue: &Arc<Queue>, node: Node) -> Arc<Computer> {
    let computer = Computer::new(node, queue);
    queue.register_computer(Arc::clone(&computer));
    computer
}

fn executor_on(queue: &Queue, computer: &Computer) -> Arc<Executor> {
    Arc::new(Executor::new(queue.next_executor_id(), 0, computer.name()))
}

type PopResult = Result<Arc<dyn Task>, QueueError>;

fn spawn_pop(
    queue: &Arc<Queue>,
    computer: &Arc<Computer>,
    executor: &Arc<Executor>,
) -> JoinHandle<PopResult> {
    let (queue, computer, executor) = (
        Arc::clone(queue),
        Arc::clone(computer),
        Arc::clone(executor),
    );
    thread::spawn(move || queue.pop(&computer, &executor))
}

/// Pop on a thread and report (executor id, result) on `tx`.
fn spawn_pop_to(
    queue: &Arc<Queue>,
    computer: &Arc<Computer>,
    executor: &Arc<Executor>,
    tx: &mpsc::Sender<(u64, PopResult)>,
) {
    let (queue, computer, executor, tx) = (
        Arc::clone(queue),
        Arc::clone(computer),
        Arc::clone(executor),
        tx.clone(),
    );
    thread::spawn(move || {
        let result = queue.pop(&computer, &executor);
        let _ = tx.send((executor.id(), result));
    });
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn wait_parked(queue: &Queue, n: usize) {
    assert!(
        wait_until(Duration::from_secs(5), || queue.snapshot().parked == n),
        "expected {n} parked executors, got {}",
        queue.snapshot().parked
    );
}

const LONG: Duration = Duration::from_secs(3600);

// ── Admission ───────────────────────────────────────────────────────

#[test]
fn add_creates_one_entry_per_task() {
    let queue = new_queue();
    let t = Job::new("t");
    assert!(queue.add(t.arc(), LONG));
    assert!(!queue.add(t.arc(), LONG));
    assert_eq!(queue.len(), 1);
    assert!(queue.contains("t"));
    assert!(queue.get_item("t").unwrap().is_waiting());
}

#[test]
fn collapse_only_pulls_due_time_in() {
    let queue = new_queue();
    let t = Job::new("t");
    assert!(queue.add(t.arc(), Duration::from_secs(10)));
    let first = queue.get_item("t").unwrap();

    assert!(!queue.add(t.arc(), Duration::from_secs(5)));
    let pulled = queue.get_item("t").unwrap();
    assert!(pulled.due < first.due);
    assert_eq!(pulled.id, first.id);

    assert!(!queue.add(t.arc(), Duration::from_secs(20)));
    assert_eq!(queue.get_item("t").unwrap().due, pulled.due);
    assert_eq!(queue.len(), 1);
}

#[test]
fn add_while_blocked_or_buildable_is_noop() {
    let queue = new_queue();
    let blocked = Job::new("blocked");
    blocked.blocked.store(true, Ordering::SeqCst);
    let ready = Job::new("ready");

    queue.add(blocked.arc(), Duration::ZERO);
    queue.add(ready.arc(), Duration::ZERO);
    queue.maintain();
    assert!(queue.get_item("blocked").unwrap().is_blocked());
    assert!(queue.get_item("ready").unwrap().is_buildable());

    assert!(!queue.add(blocked.arc(), Duration::ZERO));
    assert!(!queue.add(ready.arc(), Duration::ZERO));
    assert_eq!(queue.len(), 2);
}

#[test]
fn huge_quiet_period_saturates() {
    let queue = new_queue();
    assert!(queue.add(Job::new("never").arc(), Duration::MAX));
    queue.maintain();
    assert!(queue.get_item("never").unwrap().is_waiting());
}

#[test]
fn schedule_uses_default_quiet_period() {
    let queue = Queue::new(SchedulerConfig {
        default_quiet_period_secs: 60,
        ..test_config()
    });
    let before = Utc::now();
    queue.schedule(Job::new("t").arc());
    let due = queue.get_item("t").unwrap().due;
    assert!(due >= before + chrono::Duration::seconds(60));
}

#[test]
fn cancel_removes_from_any_partition() {
    let queue = new_queue();
    let blocked = Job::new("b");
    blocked.blocked.store(true, Ordering::SeqCst);
    queue.add(Job::new("w").arc(), LONG);
    queue.add(blocked.arc(), Duration::ZERO);
    queue.add(Job::new("r").arc(), Duration::ZERO);
    queue.maintain();

    assert!(queue.cancel("w"));
    assert!(queue.cancel("b"));
    assert!(queue.cancel("r"));
    assert!(!queue.cancel("r"));
    assert!(!queue.cancel("unknown"));
    assert!(queue.is_empty());
}

#[test]
fn clear_drops_everything() {
    let queue = new_queue();
    queue.add(Job::new("a").arc(), LONG);
    queue.add(Job::new("b").arc(), Duration::ZERO);
    queue.maintain();
    queue.clear();
    assert!(queue.is_empty());
    assert!(queue.items().is_empty());
}

// ── Maintenance ─────────────────────────────────────────────────────

#[test]
fn maintain_moves_only_due_items() {
    let queue = new_queue();
    queue.add(Job::new("now").arc(), Duration::ZERO);
    queue.add(Job::new("later").arc(), LONG);
    queue.maintain();

    assert!(queue.get_item("now").unwrap().is_buildable());
    let later = queue.get_item("later").unwrap();
    assert!(later.is_waiting());
    assert!(later.buildable_since.is_none());
    assert!(later.why.starts_with("In the quiet period"), "got: {}", later.why);
}

#[test]
fn equal_due_times_become_buildable_in_id_order() {
    let queue = new_queue();
    let due = Utc::now() - chrono::Duration::seconds(1);
    {
        let mut st = queue.lock_state();
        for name in ["z", "m", "a"] {
            let id = st.next_id();
            st.insert_waiting(
                (due, id),
                super::state::WaitingItem {
                    id,
                    enqueued_at: due,
                    task: Job::new(name).arc(),
                },
            );
        }
    }
    queue.maintain();
    let order: Vec<String> = queue
        .buildable_items()
        .into_iter()
        .map(|i| i.task_name)
        .collect();
    assert_eq!(order, vec!["z", "m", "a"]);
    let ids: Vec<u64> = queue.buildable_items().into_iter().map(|i| i.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids out of order: {ids:?}");
}

#[test]
fn blocked_item_becomes_buildable_when_released() {
    let queue = new_queue();
    let job = Job::new("t");
    job.blocked.store(true, Ordering::SeqCst);
    queue.add(job.arc(), Duration::ZERO);
    queue.maintain();
    let item = queue.get_item("t").unwrap();
    assert!(item.is_blocked());
    assert_eq!(item.why, "held by test");
    let since = item.buildable_since;

    job.blocked.store(false, Ordering::SeqCst);
    queue.maintain();
    let item = queue.get_item("t").unwrap();
    assert!(item.is_buildable());
    assert_eq!(item.buildable_since, since);
}

#[test]
fn resource_conflict_blocks_and_explains() {
    let queue = new_queue();
    queue
        .resources()
        .reserve("other", ResourceList::new().w(Resource::new("db")));
    queue
        .resources()
        .reserve("self", ResourceList::new().w(Resource::new("cache")));

    queue.add(Job::new("t").writes("db").arc(), Duration::ZERO);
    queue.add(Job::new("self").writes("cache").arc(), Duration::ZERO);
    queue.maintain();

    assert_eq!(queue.get_item("t").unwrap().why, "Blocked by other");
    assert_eq!(
        queue.get_item("self").unwrap().why,
        "A previous run of self is already in progress"
    );

    queue.resources().release("other");
    queue.maintain();
    assert!(queue.get_item("t").unwrap().is_buildable());
    assert!(queue.get_item("self").unwrap().is_blocked());
}

#[test]
fn maintenance_timer_moves_due_items() {
    let queue = new_queue();
    queue.add(Job::new("t").arc(), Duration::ZERO);
    let timer = crate::timer::MaintenanceTimer::start(&queue, Duration::from_millis(20)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || queue
        .get_item("t")
        .is_some_and(|i| i.is_buildable())));
    timer.stop();
}

// ── Views ───────────────────────────────────────────────────────────

#[test]
fn label_views_and_why_text() {
    let queue = new_queue();
    let linux = manual_computer(&queue, Node::agent("linux-1", 0).with_label("linux"));
    let mac = manual_computer(&queue, Node::agent("mac-1", 0).with_label("mac"));

    queue.add(Job::new("l").labeled("linux").arc(), Duration::ZERO);
    queue.add(Job::new("any").arc(), Duration::ZERO);
    queue.maintain();

    assert_eq!(queue.count_buildable_for(&Label::new("linux")), 1);
    assert_eq!(queue.count_buildable_for(&Label::new("mac")), 0);
    assert_eq!(queue.buildable_items_for(&linux).len(), 2);
    let for_mac: Vec<String> = queue
        .buildable_items_for(&mac)
        .into_iter()
        .map(|i| i.task_name)
        .collect();
    assert_eq!(for_mac, vec!["any"]);

    assert_eq!(
        queue.get_item("l").unwrap().why,
        "Waiting for next available executor on linux"
    );
    assert_eq!(
        queue.get_item("any").unwrap().why,
        "Waiting for next available executor"
    );

    linux.set_temporarily_offline(true);
    assert_eq!(queue.get_item("l").unwrap().why, "linux is offline");
}

#[test]
fn stuck_detection_uses_estimate() {
    let queue = new_queue();
    let now = Utc::now();
    {
        let mut st = queue.lock_state();
        for (name, job, age) in [
            ("old", Job::new("old"), chrono::Duration::hours(25)),
            (
                "recent",
                Job::new("recent").estimate(Duration::from_secs(10)),
                chrono::Duration::minutes(5),
            ),
            (
                "overdue",
                Job::new("overdue").estimate(Duration::from_secs(10)),
                chrono::Duration::minutes(11),
            ),
        ] {
            st.buildable.insert(
                name.to_string(),
                PendingItem {
                    id: 0,
                    due: now - age,
                    enqueued_at: now - age,
                    buildable_since: now - age,
                    task: job.arc(),
                },
            );
        }
    }
    assert!(queue.get_item("old").unwrap().stuck);
    assert!(!queue.get_item("recent").unwrap().stuck);
    assert!(queue.get_item("overdue").unwrap().stuck);
}

#[test]
fn item_is_stuck_when_its_label_is_offline() {
    let queue = new_queue();
    manual_computer(&queue, Node::coordinator(0));
    let linux = manual_computer(&queue, Node::agent("linux-1", 0).with_label("linux"));
    queue.add(Job::new("t").labeled("linux").arc(), Duration::ZERO);
    queue.maintain();
    assert!(!queue.get_item("t").unwrap().stuck);

    linux.set_online(false);
    let item = queue.get_item("t").unwrap();
    assert!(item.is_buildable());
    assert_eq!(item.why, "linux is offline");
    assert!(item.stuck);
}

#[test]
fn huge_estimate_does_not_break_item_views() {
    let queue = new_queue();
    let job = Job::new("forever").estimate(Duration::from_secs(i64::MAX as u64));
    queue.add(job.arc(), Duration::ZERO);
    queue.maintain();
    let items = queue.items();
    assert_eq!(items.len(), 1);
    assert!(items[0].is_buildable());
    assert!(!items[0].stuck);
}

#[test]
fn quieting_down_is_explained() {
    let queue = new_queue();
    queue.set_quieting_down(true);
    queue.add(Job::new("t").arc(), Duration::ZERO);
    queue.maintain();
    assert_eq!(
        queue.get_item("t").unwrap().why,
        "The coordinator is about to shut down"
    );
}

// ── pop ─────────────────────────────────────────────────────────────

#[test]
fn parked_executor_receives_new_task() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    let handle = spawn_pop(&queue, &computer, &executor);
    wait_parked(&queue, 1);

    queue.add(Job::new("t").arc(), Duration::ZERO);
    let task = handle.join().unwrap().unwrap();
    assert_eq!(task.name(), "t");
    assert!(queue.is_empty());
    assert_eq!(queue.snapshot().parked, 0);
    assert_eq!(queue.metrics().tasks_dispatched["t"], 1);
}

#[test]
fn timed_park_honours_quiet_period() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    let handle = spawn_pop(&queue, &computer, &executor);
    wait_parked(&queue, 1);

    let start = Instant::now();
    queue.add(Job::new("t").arc(), Duration::from_millis(300));
    let task = handle.join().unwrap().unwrap();
    assert_eq!(task.name(), "t");
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(250), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn hard_label_reaches_exclusive_node_only() {
    let queue = new_queue();
    let coordinator = manual_computer(&queue, Node::coordinator(0));
    let special = manual_computer(&queue, Node::agent("n", 0).with_mode(Mode::Exclusive));
    let on_coordinator = executor_on(&queue, &coordinator);
    let on_special = executor_on(&queue, &special);

    let (tx, rx) = mpsc::channel();
    spawn_pop_to(&queue, &coordinator, &on_coordinator, &tx);
    spawn_pop_to(&queue, &special, &on_special, &tx);
    wait_parked(&queue, 2);

    queue.add(Job::new("pinned").labeled("n").arc(), Duration::ZERO);
    let (id, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(id, on_special.id());
    assert_eq!(result.unwrap().name(), "pinned");

    // Unlabeled work never lands on the exclusive node.
    let on_special_again = executor_on(&queue, &special);
    spawn_pop_to(&queue, &special, &on_special_again, &tx);
    wait_parked(&queue, 2);
    queue.add(Job::new("free").arc(), Duration::ZERO);
    let (id, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(id, on_coordinator.id());
    assert_eq!(result.unwrap().name(), "free");

    queue.shutdown();
    let (_, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(result.unwrap_err(), QueueError::ShuttingDown);
}

#[test]
fn blocked_task_is_never_handed_out() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    let job = Job::new("t");
    job.blocked.store(true, Ordering::SeqCst);
    queue.add(job.arc(), Duration::ZERO);

    let handle = spawn_pop(&queue, &computer, &executor);
    wait_parked(&queue, 1);
    thread::sleep(Duration::from_millis(100));
    assert!(!handle.is_finished());
    assert!(queue.get_item("t").unwrap().is_blocked());

    job.blocked.store(false, Ordering::SeqCst);
    queue.maintain();
    assert_eq!(handle.join().unwrap().unwrap().name(), "t");
}

#[test]
fn conflicting_resources_are_handed_out_one_at_a_time() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let e1 = executor_on(&queue, &computer);
    let e2 = executor_on(&queue, &computer);
    let (tx, rx) = mpsc::channel();
    spawn_pop_to(&queue, &computer, &e1, &tx);
    spawn_pop_to(&queue, &computer, &e2, &tx);
    wait_parked(&queue, 2);

    queue.add(Job::new("a").writes("db").arc(), Duration::ZERO);
    queue.add(Job::new("b").writes("db").arc(), Duration::ZERO);

    let (_, first) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let first = first.unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    let other = if first.name() == "a" { "b" } else { "a" };
    assert!(queue.get_item(other).unwrap().is_blocked());

    queue.execution_finished(first.name(), Duration::from_millis(1), true);
    let (_, second) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(second.unwrap().name(), other);
}

#[test]
fn interrupt_wakes_parked_executor() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    let handle = spawn_pop(&queue, &computer, &executor);
    wait_parked(&queue, 1);

    executor.interrupt();
    assert_eq!(handle.join().unwrap().unwrap_err(), QueueError::Interrupted);
    assert_eq!(queue.snapshot().parked, 0);
}

#[test]
fn interrupt_before_park_is_not_lost() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    executor.interrupt();
    let result = queue.pop(&computer, &executor);
    assert_eq!(result.unwrap_err(), QueueError::Interrupted);
}

#[test]
fn shutdown_releases_parked_and_future_pops() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    let handle = spawn_pop(&queue, &computer, &executor);
    wait_parked(&queue, 1);

    queue.shutdown();
    assert_eq!(handle.join().unwrap().unwrap_err(), QueueError::ShuttingDown);
    assert_eq!(
        queue.pop(&computer, &executor).unwrap_err(),
        QueueError::ShuttingDown
    );
}

#[test]
fn quieting_down_holds_work_until_resumed() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    queue.set_quieting_down(true);
    let handle = spawn_pop(&queue, &computer, &executor);
    wait_parked(&queue, 1);

    queue.add(Job::new("t").arc(), Duration::ZERO);
    thread::sleep(Duration::from_millis(100));
    assert!(!handle.is_finished());
    assert!(queue.get_item("t").unwrap().is_buildable());

    queue.set_quieting_down(false);
    assert_eq!(handle.join().unwrap().unwrap().name(), "t");
}

#[test]
fn offline_computer_gets_nothing() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    computer.set_online(false);
    let executor = executor_on(&queue, &computer);
    let handle = spawn_pop(&queue, &computer, &executor);
    wait_parked(&queue, 1);

    queue.add(Job::new("t").arc(), Duration::ZERO);
    thread::sleep(Duration::from_millis(100));
    assert!(!handle.is_finished());

    computer.set_online(true);
    assert_eq!(handle.join().unwrap().unwrap().name(), "t");
}

#[test]
fn cancel_after_hand_off_does_not_recall() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    let handle = spawn_pop(&queue, &computer, &executor);
    wait_parked(&queue, 1);

    queue.add(Job::new("t").arc(), Duration::ZERO);
    let task = handle.join().unwrap().unwrap();
    assert!(!queue.cancel("t"));
    assert_eq!(task.name(), "t");
}

#[test]
fn queue_wait_is_measured_from_admission() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    let now = Utc::now();
    {
        let mut st = queue.lock_state();
        let id = st.next_id();
        st.insert_waiting(
            (now, id),
            super::state::WaitingItem {
                id,
                enqueued_at: now - chrono::Duration::seconds(30),
                task: Job::new("t").arc(),
            },
        );
    }
    let handle = spawn_pop(&queue, &computer, &executor);
    assert_eq!(handle.join().unwrap().unwrap().name(), "t");

    let metrics = queue.metrics();
    assert_eq!(metrics.total_dispatched, 1);
    assert!(metrics.avg_queue_wait >= Duration::from_secs(30));
}

#[test]
fn cancel_racing_dispatch_either_removes_or_hands_off() {
    let (mut cancelled, mut popped) = (0, 0);
    for _ in 0..200 {
        let queue = new_queue();
        let computer = manual_computer(&queue, Node::coordinator(0));
        let executor = executor_on(&queue, &computer);
        let (tx, rx) = mpsc::channel();
        spawn_pop_to(&queue, &computer, &executor, &tx);
        wait_parked(&queue, 1);

        // The add wakes the parked executor, which dispatches while we cancel.
        queue.add(Job::new("t").arc(), Duration::ZERO);
        let removed = queue.cancel("t");
        if removed {
            executor.interrupt();
        }

        let (_, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match result {
            Ok(task) => {
                assert!(!removed, "task was both cancelled and handed off");
                assert_eq!(task.name(), "t");
                popped += 1;
            }
            Err(QueueError::Interrupted) => {
                assert!(removed, "task was neither cancelled nor handed off");
                cancelled += 1;
            }
            Err(e) => panic!("unexpected pop result: {e}"),
        }
        assert!(!queue.contains("t"));
        assert!(queue.is_empty());
    }
    assert_eq!(cancelled + popped, 200);
}

#[test]
fn reclaim_returns_unconsumed_item() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    let job = Job::new("t").writes("db");
    let now = Utc::now();

    let mut offer = JobOffer::new(
        Arc::clone(&computer),
        Arc::clone(&executor),
        Arc::new(OneShotEvent::new()),
    );
    queue.resources().reserve("t", job.resource_list());
    offer.assign(PendingItem {
        id: 1,
        due: now,
        enqueued_at: now,
        buildable_since: now,
        task: job.arc(),
    });
    assert!(offer.event.is_signaled());

    let mut st = queue.lock_state();
    queue.reclaim(&mut st, offer);
    assert!(st.buildable.contains_key("t"));
    drop(st);
    assert!(queue.resources().in_progress().is_empty());
}

#[test]
fn reclaim_defers_to_newer_entry() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    let job = Job::new("t");
    let now = Utc::now();
    queue.add(job.arc(), LONG);

    let mut offer = JobOffer::new(computer, executor, Arc::new(OneShotEvent::new()));
    offer.assign(PendingItem {
        id: 1,
        due: now,
        enqueued_at: now,
        buildable_since: now,
        task: job.arc(),
    });
    let mut st = queue.lock_state();
    queue.reclaim(&mut st, offer);
    assert!(st.buildable.is_empty());
    assert_eq!(st.len(), 1);
}

#[test]
#[should_panic(expected = "already holds")]
fn double_assignment_panics() {
    let queue = new_queue();
    let computer = manual_computer(&queue, Node::coordinator(0));
    let executor = executor_on(&queue, &computer);
    let now = Utc::now();
    let item = PendingItem {
        id: 1,
        due: now,
        enqueued_at: now,
        buildable_since: now,
        task: Job::new("t").arc(),
    };
    let mut offer = JobOffer::new(computer, executor, Arc::new(OneShotEvent::new()));
    offer.assign(item.clone());
    offer.assign(item);
}

// ── Executors and coordinator ───────────────────────────────────────

fn coordinator_in(dir: &std::path::Path) -> Coordinator {
    Coordinator::new(Config {
        profile: String::new(),
        storage: StorageConfig {
            data_dir: dir.to_path_buf(),
            queue_file: "queue.json".into(),
        },
        scheduler: test_config(),
    })
    .unwrap()
}

#[test]
fn coordinator_rejects_zero_maintenance_interval() {
    let tmp = tempfile::tempdir().unwrap();
    let result = Coordinator::new(Config {
        profile: String::new(),
        storage: StorageConfig {
            data_dir: tmp.path().to_path_buf(),
            queue_file: "queue.json".into(),
        },
        scheduler: SchedulerConfig {
            maintenance_interval_secs: 0,
            ..test_config()
        },
    });
    assert!(matches!(
        result,
        Err(ForemanError::InvalidConfig { ref key, .. }) if key == "maintenance_interval_secs"
    ));
}

#[test]
fn executors_run_scheduled_tasks() {
    let tmp = tempfile::tempdir().unwrap();
    let mut coordinator = coordinator_in(tmp.path());
    coordinator.add_node(Node::coordinator(2));
    coordinator.start().unwrap();

    let jobs: Vec<Job> = ["a", "b", "c"].iter().map(|n| Job::new(n)).collect();
    for job in &jobs {
        coordinator.queue().schedule(job.arc());
    }
    assert!(wait_until(Duration::from_secs(10), || jobs
        .iter()
        .all(|j| j.runs.load(Ordering::SeqCst) == 1)));

    let queue = Arc::clone(coordinator.queue());
    assert!(wait_until(Duration::from_secs(5), || queue.metrics().tasks_completed.len() == 3));
    assert!(queue.resources().in_progress().is_empty());
    coordinator.shutdown();
    assert!(queue.computers().iter().all(|c| c.is_idle()));
}

#[test]
fn executor_survives_panicking_task() {
    let tmp = tempfile::tempdir().unwrap();
    let mut coordinator = coordinator_in(tmp.path());
    coordinator.add_node(Node::coordinator(1));

    let queue = Arc::clone(coordinator.queue());
    queue.add(Job::new("boom").panicking().arc(), Duration::ZERO);
    assert!(wait_until(Duration::from_secs(10), || queue
        .metrics()
        .tasks_failed
        .get("boom")
        == Some(&1)));

    let after = Job::new("after");
    queue.add(after.arc(), Duration::ZERO);
    assert!(wait_until(Duration::from_secs(10), || after
        .runs
        .load(Ordering::SeqCst)
        == 1));
    let computer = queue.computer("coordinator").unwrap();
    assert!(computer.executors().iter().all(|e| e.cause_of_death().is_none()));
    coordinator.shutdown();
}

#[test]
fn running_executor_reports_progress() {
    let tmp = tempfile::tempdir().unwrap();
    let mut coordinator = coordinator_in(tmp.path());
    let computer = coordinator.add_node(Node::coordinator(1));
    let gate = Arc::new(OneShotEvent::new());
    let job = Job::new("slow")
        .estimate(Duration::from_secs(100))
        .gated(&gate);
    coordinator.queue().add(job.arc(), Duration::ZERO);

    assert!(wait_until(Duration::from_secs(10), || computer.count_busy() == 1));
    let executors = computer.executors();
    let executor = &executors[0];
    assert_eq!(executor.current_task().as_deref(), Some("slow"));
    assert!(executor.progress().unwrap() < 10);
    assert!(executor.estimated_remaining().unwrap() > Duration::from_secs(90));

    gate.signal();
    assert!(wait_until(Duration::from_secs(10), || job.runs.load(Ordering::SeqCst) == 1));
    assert!(wait_until(Duration::from_secs(5), || computer.count_idle() == 1));
    coordinator.shutdown();
}

#[test]
fn shrinking_pool_retires_executors() {
    let tmp = tempfile::tempdir().unwrap();
    let mut coordinator = coordinator_in(tmp.path());
    let computer = coordinator.add_node(Node::coordinator(3));
    assert_eq!(computer.count_executors(), 3);

    computer.set_num_executors(1);
    assert!(wait_until(Duration::from_secs(5), || computer.count_executors() == 1));

    // The survivor still works.
    let job = Job::new("t");
    coordinator.queue().add(job.arc(), Duration::ZERO);
    assert!(wait_until(Duration::from_secs(10), || job.runs.load(Ordering::SeqCst) == 1));
    coordinator.shutdown();
}

#[test]
fn queue_persists_across_restarts() {
    let tmp = tempfile::tempdir().unwrap();
    let pending = Job::new("pending");
    {
        let mut coordinator = coordinator_in(tmp.path());
        coordinator.queue().add(pending.arc(), LONG);
        coordinator.queue().add(Job::new("gone").arc(), LONG);
        coordinator.shutdown();
    }
    assert!(tmp.path().join("queue.json").exists());

    let coordinator = coordinator_in(tmp.path());
    let restored = coordinator.restore(|name| (name == "pending").then(|| pending.arc()));
    assert_eq!(restored, 1);
    let item = coordinator.queue().get_item("pending").unwrap();
    assert!(item.due <= Utc::now());
    assert!(!coordinator.queue().contains("gone"));
    assert!(tmp.path().join("queue.json.bak").exists());
}
