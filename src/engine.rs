//! Concurrent check-and-reconcile engine.
//!
//! One probe task is spawned per target. Results come back over a channel and
//! are reconciled one at a time on the calling task, which is the only place
//! the [`RecordStore`] is touched.
//!
//! In strict mode a finished result is held back until no probe that is still
//! running (or still waiting for a concurrency permit) could finish with a
//! smaller elapsed time. The collector wakes exactly when the youngest running
//! probe passes the candidate's elapsed time, plus [`STRICT_TICK`], and never
//! sleeps longer than [`RunOptions::poll_interval`] between checks.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet, VecDeque},
    future,
    sync::Arc,
    time::Duration,
};
use tokio::{
    select,
    sync::{
        Semaphore,
        mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError},
    },
    task::JoinSet,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;

use crate::notify::{self, Notifier};
use crate::probe::Prober;
use crate::record::{Outcome, ProbeResult, Reconciled, State, TargetRecord};
use crate::store::RecordStore;
use crate::trigger::Trigger;

/// Granularity added to strict-ordering wake-ups so "elapsed exceeds" holds strictly.
pub const STRICT_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Release results in non-decreasing probe elapsed time.
    pub strict: bool,
    pub timeout: Duration,
    pub tries: u32,
    /// 0 means one task per target with no bound.
    pub max_concurrency: usize,
    /// Longest single wait of the strict-ordering collector.
    pub poll_interval: Duration,
    /// Hard cap on the run; probes still outstanding are counted as unreachable.
    pub deadline: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            strict: false,
            timeout: Duration::from_secs(20),
            tries: 3,
            max_concurrency: 0,
            poll_interval: Duration::from_millis(10),
            deadline: None,
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    /// Epoch seconds used for every timestamp written by this run.
    pub time: i64,
    /// One entry per distinct target, in the order they were reconciled.
    pub results: Vec<Reconciled>,
}

impl RunReport {
    pub fn transitions(&self) -> usize {
        self.results.iter().filter(|r| r.is_transition()).count()
    }
}

enum ProbeEvent {
    Started { index: usize, at: Instant },
    Finished { index: usize, result: ProbeResult },
}

enum Stop {
    Drained,
    Deadline,
    Cancelled,
}

pub struct CheckEngine {
    prober: Arc<dyn Prober>,
    trigger: Arc<dyn Trigger>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl CheckEngine {
    pub fn new(prober: Arc<dyn Prober>, trigger: Arc<dyn Trigger>) -> Self {
        Self {
            prober,
            trigger,
            notifier: None,
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Probes every target concurrently and reconciles the results into `store`.
    ///
    /// Side effects fire at most once per target. Cancelling `token` stops the
    /// run; targets not yet reconciled are reported as [`Outcome::Abandoned`]
    /// and their records are left untouched.
    pub async fn run(
        &self,
        targets: &[String],
        store: &mut RecordStore,
        options: &RunOptions,
        token: &CancellationToken,
    ) -> RunReport {
        let now = Utc::now().timestamp();
        let targets = unique(targets);
        if targets.is_empty() {
            return RunReport {
                time: now,
                results: Vec::new(),
            };
        }

        let mut records: Vec<Option<TargetRecord>> = targets
            .iter()
            .map(|target| Some(store.record(target, now)))
            .collect();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = self.dispatch(&targets, options, &tx);
        drop(tx);

        let mut collector = Collector::new(options.strict, options.poll_interval, targets.len());
        let deadline = options.deadline.map(|d| Instant::now() + d);
        let mut results = Vec::with_capacity(targets.len());

        let stop = loop {
            // Events that queued up while a reconcile was awaiting side effects
            collector.drain(&mut rx);
            while let Some((index, result)) = collector.pop_ready(Instant::now()) {
                if let Some(record) = records[index].take() {
                    results.push(self.reconcile(store, record, &result, now).await);
                }
                collector.drain(&mut rx);
            }

            if collector.is_closed() {
                break Stop::Drained;
            }

            let wake = collector.wake_at(Instant::now());
            select! {
                biased;
                () = token.cancelled() => break Stop::Cancelled,
                () = sleep_until_some(deadline) => break Stop::Deadline,
                event = rx.recv() => match event {
                    Some(event) => collector.push(event),
                    None => collector.close(),
                },
                () = sleep_until_some(wake) => {}
            }
        };

        if let Stop::Cancelled = stop {
            tasks.abort_all();
            warn!("Run cancelled, leaving unchecked targets as they were");
            for record in records.iter_mut().filter_map(Option::take) {
                results.push(Reconciled {
                    record,
                    reachable: false,
                    elapsed: Duration::ZERO,
                    outcome: Outcome::Abandoned,
                });
            }
        } else {
            if let Stop::Deadline = stop {
                warn!("Run deadline reached, outstanding probes count as unreachable");
            }

            // Probes that finished in the same tick as the deadline still count
            collector.drain(&mut rx);
            tasks.abort_all();
            collector.close();
            while let Some((index, result)) = collector.pop_ready(Instant::now()) {
                if let Some(record) = records[index].take() {
                    results.push(self.reconcile(store, record, &result, now).await);
                }
            }

            // Probes that never reported, through the deadline or a panicking prober
            for (index, slot) in records.iter_mut().enumerate() {
                if let Some(record) = slot.take() {
                    let result = collector.outstanding(index, &record.id, Instant::now());
                    results.push(self.reconcile(store, record, &result, now).await);
                }
            }
        }

        RunReport { time: now, results }
    }

    fn dispatch(
        &self,
        targets: &[String],
        options: &RunOptions,
        tx: &UnboundedSender<ProbeEvent>,
    ) -> JoinSet<()> {
        let limiter = (options.max_concurrency > 0)
            .then(|| Arc::new(Semaphore::new(options.max_concurrency)));
        let mut tasks = JoinSet::new();

        for (index, target) in targets.iter().enumerate() {
            let prober = Arc::clone(&self.prober);
            let limiter = limiter.clone();
            let tx = tx.clone();
            let target = target.clone();
            let (timeout, tries) = (options.timeout, options.tries);

            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };

                let started_at = Instant::now();
                let _ = tx.send(ProbeEvent::Started {
                    index,
                    at: started_at,
                });

                let outcome = prober.probe(&target, timeout, tries).await;
                let _ = tx.send(ProbeEvent::Finished {
                    index,
                    result: ProbeResult {
                        target_id: target,
                        reachable: outcome.reachable,
                        elapsed: outcome.elapsed,
                        started_at,
                    },
                });
            });
        }

        tasks
    }

    async fn reconcile(
        &self,
        store: &mut RecordStore,
        mut record: TargetRecord,
        result: &ProbeResult,
        now: i64,
    ) -> Reconciled {
        let observed = State::from_down(!result.reachable);
        let known_earlier = observed == record.state();

        let outcome = if record.is_new {
            info!("{}: new target, {observed}", record.id);
            record.last_change = now;
            Outcome::New
        } else if known_earlier {
            debug!("{}: {observed}, state already known", record.id);
            Outcome::Unchanged
        } else {
            info!("{}: {} -> {observed}", record.id, record.state());

            if let Some(notifier) = &self.notifier {
                let subject = notify::subject(&record.id, observed);
                if let Err(e) = notifier.notify(&subject, &notify::body(observed, now)).await {
                    error!(
                        "Notification for {} failed, keeping previous state: {e}",
                        record.id
                    );
                    return Reconciled {
                        record,
                        reachable: result.reachable,
                        elapsed: result.elapsed,
                        outcome: Outcome::NotifyFailed,
                    };
                }
            }

            if let Some(command) = record.trigger_for(observed) {
                if !self.trigger.run(command).await {
                    warn!("{} trigger for {} failed", observed, record.id);
                }
            }

            record.last_change = now;
            Outcome::Transition
        };

        record.down = observed.is_down();
        store.put_record(&record);

        Reconciled {
            record,
            reachable: result.reachable,
            elapsed: result.elapsed,
            outcome,
        }
    }
}

/// Drops repeated targets, keeping first occurrences in order.
fn unique(targets: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .filter(|target| {
            let first = seen.insert(target.as_str());
            if !first {
                debug!("Ignoring duplicate target {target}");
            }
            first
        })
        .cloned()
        .collect()
}

async fn sleep_until_some(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => future::pending().await,
    }
}

/// Orders finished probes for release.
struct Collector {
    strict: bool,
    poll_interval: Duration,
    unstarted: usize,
    in_flight: HashMap<usize, Instant>,
    by_elapsed: BinaryHeap<Reverse<(Duration, usize)>>,
    by_arrival: VecDeque<usize>,
    finished: HashMap<usize, ProbeResult>,
    closed: bool,
}

impl Collector {
    fn new(strict: bool, poll_interval: Duration, probes: usize) -> Self {
        Self {
            strict,
            poll_interval: poll_interval.max(STRICT_TICK),
            unstarted: probes,
            in_flight: HashMap::new(),
            by_elapsed: BinaryHeap::new(),
            by_arrival: VecDeque::new(),
            finished: HashMap::new(),
            closed: false,
        }
    }

    fn push(&mut self, event: ProbeEvent) {
        match event {
            ProbeEvent::Started { index, at } => {
                self.unstarted = self.unstarted.saturating_sub(1);
                self.in_flight.insert(index, at);
            }
            ProbeEvent::Finished { index, result } => {
                self.in_flight.remove(&index);
                if self.strict {
                    self.by_elapsed.push(Reverse((result.elapsed, index)));
                } else {
                    self.by_arrival.push_back(index);
                }
                self.finished.insert(index, result);
            }
        }
    }

    /// Takes every event already queued without waiting for more.
    fn drain(&mut self, rx: &mut UnboundedReceiver<ProbeEvent>) {
        loop {
            match rx.try_recv() {
                Ok(event) => self.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.close();
                    break;
                }
            }
        }
    }

    /// No more events will arrive; everything held can be released.
    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn pop_ready(&mut self, now: Instant) -> Option<(usize, ProbeResult)> {
        let index = if self.strict {
            let Reverse((elapsed, index)) = *self.by_elapsed.peek()?;
            if !self.closed && !self.can_release(elapsed, now) {
                return None;
            }
            self.by_elapsed.pop();
            index
        } else {
            self.by_arrival.pop_front()?
        };

        self.finished.remove(&index).map(|result| (index, result))
    }

    /// True when no unfinished probe could still report a smaller elapsed time.
    fn can_release(&self, elapsed: Duration, now: Instant) -> bool {
        self.unstarted == 0
            && self
                .in_flight
                .values()
                .all(|&started| now.saturating_duration_since(started) > elapsed)
    }

    /// When the held strict candidate should be re-examined, if a timer is needed.
    fn wake_at(&self, now: Instant) -> Option<Instant> {
        if !self.strict || self.unstarted > 0 {
            // Relaxed mode and unstarted probes only wait on the channel
            return None;
        }

        let Reverse((elapsed, _)) = *self.by_elapsed.peek()?;
        let youngest = self.in_flight.values().max()?;
        let eligible = *youngest + elapsed + STRICT_TICK;
        Some(eligible.min(now + self.poll_interval))
    }

    /// An unreachable result for a probe that never reported.
    fn outstanding(&self, index: usize, target: &str, now: Instant) -> ProbeResult {
        let started_at = self.in_flight.get(&index).copied().unwrap_or(now);
        ProbeResult {
            target_id: target.to_string(),
            reachable: false,
            elapsed: now.saturating_duration_since(started_at),
            started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::record::ProbeOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Per target: how long the probe takes, the elapsed time it reports, and the verdict.
    #[derive(Default)]
    struct StubProber {
        plans: HashMap<String, (Duration, Duration, bool)>,
        calls: Mutex<Vec<String>>,
    }

    impl StubProber {
        fn verdicts(verdicts: &[(&str, bool)]) -> Self {
            Self::plans(
                &verdicts
                    .iter()
                    .map(|&(target, reachable)| (target, 1, 1, reachable))
                    .collect::<Vec<_>>(),
            )
        }

        fn plans(plans: &[(&str, u64, u64, bool)]) -> Self {
            Self {
                plans: plans
                    .iter()
                    .map(|&(target, takes, reports, reachable)| {
                        (
                            target.to_string(),
                            (
                                Duration::from_millis(takes),
                                Duration::from_millis(reports),
                                reachable,
                            ),
                        )
                    })
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Prober for StubProber {
        async fn probe(&self, target: &str, _timeout: Duration, _tries: u32) -> ProbeOutcome {
            self.calls.lock().unwrap().push(target.to_string());
            let (takes, reports, reachable) = self.plans[target];
            tokio::time::sleep(takes).await;
            ProbeOutcome {
                reachable,
                elapsed: reports,
            }
        }
    }

    #[derive(Default)]
    struct StubNotifier {
        fail: bool,
        delay: Duration,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for StubNotifier {
        async fn notify(&self, subject: &str, body: &str) -> Result<(), Error> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                Err(Error::Notify("stub failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct StubTrigger {
        fail: bool,
        ran: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Trigger for StubTrigger {
        async fn run(&self, command_line: &str) -> bool {
            self.ran.lock().unwrap().push(command_line.to_string());
            !self.fail
        }
    }

    struct Harness {
        prober: Arc<StubProber>,
        notifier: Arc<StubNotifier>,
        trigger: Arc<StubTrigger>,
        engine: CheckEngine,
    }

    fn harness(prober: StubProber, notifier: StubNotifier, trigger: StubTrigger) -> Harness {
        let prober = Arc::new(prober);
        let notifier = Arc::new(notifier);
        let trigger = Arc::new(trigger);
        let engine =
            CheckEngine::new(prober.clone(), trigger.clone()).with_notifier(notifier.clone());
        Harness {
            prober,
            notifier,
            trigger,
            engine,
        }
    }

    fn targets(ids: &[&str]) -> Vec<String> {
        ids.iter().map(ToString::to_string).collect()
    }

    fn known(store: &mut RecordStore, id: &str, down: bool, time: i64) {
        let mut record = TargetRecord::new(id, time);
        record.down = down;
        store.put_record(&record);
    }

    async fn run(h: &Harness, ids: &[&str], store: &mut RecordStore, strict: bool) -> RunReport {
        let options = RunOptions {
            strict,
            ..RunOptions::default()
        };
        h.engine
            .run(&targets(ids), store, &options, &CancellationToken::new())
            .await
    }

    fn order(report: &RunReport) -> Vec<&str> {
        report
            .results
            .iter()
            .map(|r| r.record.id.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_empty_target_list() {
        let h = harness(StubProber::default(), StubNotifier::default(), StubTrigger::default());
        let mut store = RecordStore::default();
        let report = run(&h, &[], &mut store, false).await;
        assert!(report.results.is_empty());
        assert!(store.sections().is_empty());
    }

    #[tokio::test]
    async fn test_new_target_has_no_side_effects() {
        let h = harness(
            StubProber::verdicts(&[("up.example", true), ("down.example", false)]),
            StubNotifier::default(),
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        let report = run(&h, &["up.example", "down.example"], &mut store, false).await;

        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| r.outcome == Outcome::New));
        assert!(h.notifier.sent.lock().unwrap().is_empty());
        assert!(h.trigger.ran.lock().unwrap().is_empty());

        let up = store.record("up.example", 0);
        let down = store.record("down.example", 0);
        assert!(!up.is_new && !down.is_new);
        assert!(!up.down);
        assert!(down.down);
        assert_eq!(down.last_change, report.time);
    }

    #[tokio::test]
    async fn test_transition_notifies_and_triggers_once() {
        let h = harness(
            StubProber::verdicts(&[("site.example", false)]),
            StubNotifier::default(),
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        known(&mut store, "site.example", false, 1500);
        store.set("site.example", "down_trigger", "restart-proxy");
        store.set("site.example", "up_trigger", "celebrate");

        let report = run(&h, &["site.example"], &mut store, false).await;

        assert_eq!(report.transitions(), 1);
        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "site.example Down");
        assert!(sent[0].1.starts_with("Site is down at "));
        assert_eq!(*h.trigger.ran.lock().unwrap(), vec!["restart-proxy"]);

        let record = store.record("site.example", 0);
        assert!(record.down);
        assert_eq!(record.last_change, report.time);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let h = harness(
            StubProber::verdicts(&[("a.example", true), ("b.example", false)]),
            StubNotifier::default(),
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        known(&mut store, "a.example", true, 10);
        known(&mut store, "b.example", false, 10);
        store.set("a.example", "up_trigger", "up");
        store.set("b.example", "down_trigger", "down");

        let first = run(&h, &["a.example", "b.example"], &mut store, false).await;
        assert_eq!(first.transitions(), 2);
        let calls_after_first = h.notifier.sent.lock().unwrap().len();

        let second = run(&h, &["a.example", "b.example"], &mut store, false).await;
        assert_eq!(second.transitions(), 0);
        assert!(second.results.iter().all(|r| r.outcome == Outcome::Unchanged));
        assert_eq!(h.notifier.sent.lock().unwrap().len(), calls_after_first);
        assert_eq!(h.trigger.ran.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_notify_failure_keeps_previous_state() {
        let h = harness(
            StubProber::verdicts(&[("flaky.example", false), ("other.example", true)]),
            StubNotifier {
                fail: true,
                ..StubNotifier::default()
            },
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        known(&mut store, "flaky.example", false, 1500);
        known(&mut store, "other.example", false, 1500);
        store.set("flaky.example", "down_trigger", "never");

        let report = run(&h, &["flaky.example", "other.example"], &mut store, false).await;

        let flaky = report
            .results
            .iter()
            .find(|r| r.record.id == "flaky.example")
            .unwrap();
        assert_eq!(flaky.outcome, Outcome::NotifyFailed);
        assert!(h.trigger.ran.lock().unwrap().is_empty());

        let record = store.record("flaky.example", 0);
        assert!(!record.down);
        assert_eq!(record.last_change, 1500);

        let other = store.record("other.example", 0);
        assert!(!other.down);
    }

    #[tokio::test]
    async fn test_trigger_failure_still_advances_state() {
        let h = harness(
            StubProber::verdicts(&[("site.example", true)]),
            StubNotifier::default(),
            StubTrigger {
                fail: true,
                ..StubTrigger::default()
            },
        );
        let mut store = RecordStore::default();
        known(&mut store, "site.example", true, 1500);
        store.set("site.example", "up_trigger", "false");

        let report = run(&h, &["site.example"], &mut store, false).await;

        assert_eq!(report.transitions(), 1);
        let record = store.record("site.example", 0);
        assert!(!record.down);
        assert_eq!(record.last_change, report.time);
    }

    #[tokio::test]
    async fn test_transition_without_notifier() {
        let prober = Arc::new(StubProber::verdicts(&[("site.example", false)]));
        let trigger = Arc::new(StubTrigger::default());
        let engine = CheckEngine::new(prober, trigger.clone());
        let mut store = RecordStore::default();
        known(&mut store, "site.example", false, 1500);
        store.set("site.example", "down_trigger", "page-oncall");

        let report = engine
            .run(
                &targets(&["site.example"]),
                &mut store,
                &RunOptions::default(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.transitions(), 1);
        assert_eq!(*trigger.ran.lock().unwrap(), vec!["page-oncall"]);
        assert!(store.record("site.example", 0).down);
    }

    #[tokio::test]
    async fn test_duplicate_targets_probe_once() {
        let h = harness(
            StubProber::verdicts(&[("site.example", false)]),
            StubNotifier::default(),
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        known(&mut store, "site.example", false, 1500);

        let report = run(&h, &["site.example", "site.example"], &mut store, false).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(h.prober.calls.lock().unwrap().len(), 1);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_mode_orders_by_elapsed() {
        let plans = [
            ("a", 10, 10, true),
            ("b", 50, 50, true),
            ("c", 30, 30, true),
        ];
        let h = harness(
            StubProber::plans(&plans),
            StubNotifier::default(),
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();

        let report = run(&h, &["a", "b", "c"], &mut store, true).await;
        assert_eq!(order(&report), vec!["a", "c", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_mode_ignores_arrival_order() {
        // b arrives first but reports the longest elapsed time
        let plans = [("a", 10, 10, true), ("b", 5, 50, true), ("c", 30, 30, true)];

        let h = harness(
            StubProber::plans(&plans),
            StubNotifier::default(),
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        let relaxed = run(&h, &["a", "b", "c"], &mut store, false).await;
        assert_eq!(order(&relaxed), vec!["b", "a", "c"]);

        let h = harness(
            StubProber::plans(&plans),
            StubNotifier::default(),
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        let strict = run(&h, &["a", "b", "c"], &mut store, true).await;
        assert_eq!(order(&strict), vec!["a", "c", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_mode_with_bounded_concurrency() {
        let plans = [
            ("a", 40, 40, true),
            ("b", 10, 10, true),
            ("c", 20, 20, true),
            ("d", 5, 5, true),
        ];
        let h = harness(
            StubProber::plans(&plans),
            StubNotifier::default(),
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        let options = RunOptions {
            strict: true,
            max_concurrency: 2,
            ..RunOptions::default()
        };

        let report = h
            .engine
            .run(
                &targets(&["a", "b", "c", "d"]),
                &mut store,
                &options,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(order(&report), vec!["d", "b", "c", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_mode_holds_order_while_notifying() {
        // x only starts once slowp frees its permit, and finishes while slowp is
        // still being notified about
        let plans = [
            ("slowp", 10, 10, false),
            ("c", 50, 50, true),
            ("x", 45, 45, true),
        ];
        let h = harness(
            StubProber::plans(&plans),
            StubNotifier {
                delay: Duration::from_millis(100),
                ..StubNotifier::default()
            },
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        known(&mut store, "slowp", false, 1500);
        let options = RunOptions {
            strict: true,
            max_concurrency: 2,
            ..RunOptions::default()
        };

        let report = h
            .engine
            .run(
                &targets(&["slowp", "c", "x"]),
                &mut store,
                &options,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(order(&report), vec!["slowp", "x", "c"]);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_results_that_arrived_in_time() {
        // "site" reports up at 500ms while "flaky" is still being notified about,
        // and the notification runs past the deadline
        let h = harness(
            StubProber::plans(&[("flaky", 10, 10, false), ("site", 500, 500, true)]),
            StubNotifier {
                delay: Duration::from_secs(2),
                ..StubNotifier::default()
            },
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        known(&mut store, "flaky", false, 1500);
        known(&mut store, "site", false, 1500);
        store.set("site", "down_trigger", "alert");
        let options = RunOptions {
            deadline: Some(Duration::from_secs(1)),
            ..RunOptions::default()
        };

        let report = h
            .engine
            .run(
                &targets(&["flaky", "site"]),
                &mut store,
                &options,
                &CancellationToken::new(),
            )
            .await;

        let site = report
            .results
            .iter()
            .find(|r| r.record.id == "site")
            .unwrap();
        assert!(site.reachable);
        assert_eq!(site.outcome, Outcome::Unchanged);
        assert!(!store.record("site", 0).down);
        assert!(h.trigger.ran.lock().unwrap().is_empty());
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_outstanding_unreachable() {
        let h = harness(
            StubProber::plans(&[("fast", 10, 10, true), ("slow", 60_000, 60_000, true)]),
            StubNotifier::default(),
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        known(&mut store, "fast", false, 1500);
        known(&mut store, "slow", false, 1500);
        store.set("slow", "down_trigger", "alert");
        let options = RunOptions {
            deadline: Some(Duration::from_secs(1)),
            ..RunOptions::default()
        };

        let report = h
            .engine
            .run(
                &targets(&["fast", "slow"]),
                &mut store,
                &options,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(order(&report), vec!["fast", "slow"]);
        assert!(!report.results[1].reachable);
        assert!(store.record("slow", 0).down);
        assert_eq!(*h.trigger.ran.lock().unwrap(), vec!["alert"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_leaves_records_alone() {
        let h = harness(
            StubProber::plans(&[("slow", 60_000, 60_000, false)]),
            StubNotifier::default(),
            StubTrigger::default(),
        );
        let mut store = RecordStore::default();
        known(&mut store, "slow", false, 1500);
        let token = CancellationToken::new();
        token.cancel();

        let report = h
            .engine
            .run(&targets(&["slow"]), &mut store, &RunOptions::default(), &token)
            .await;

        assert_eq!(report.results[0].outcome, Outcome::Abandoned);
        let record = store.record("slow", 0);
        assert!(!record.down);
        assert_eq!(record.last_change, 1500);
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }
}
