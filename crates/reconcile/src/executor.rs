//! Execution engine - drives check/apply per resource, sequentially or
//! layer by layer, and rolls back on layer failure

use crate::context::{
    ApplyContext, CancelToken, NoProgress, NoState, ProgressCallback, StateHook, System,
};
use crate::error::{Error, Result};
use crate::planner::{ExecutionPlan, Layer};
use crate::resource::PlannedResource;
use crate::rollback::rollback;
use crate::transaction::{
    Transaction, TransactionChange, TransactionStatus, TransactionStore, new_transaction_id,
};
use crate::types::{
    Action, ApplyResult, Change, ExecuteOptions, ExecutionMode, ItemOutcome, ItemStatus,
    RunSummary, StateStatus,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

/// Reconciliation engine for one run against one target
///
/// The engine owns the run's AppliedHistory (resources that changed, oldest
/// first) and the journal that becomes the persisted [`Transaction`].
pub struct Engine<'a> {
    system: &'a System,
    opts: ExecuteOptions,
    hook: &'a dyn StateHook,
    progress: &'a dyn ProgressCallback,
    cancel: CancelToken,
    transaction_id: String,
    history: Vec<PlannedResource>,
    journal: Vec<TransactionChange>,
    summary: RunSummary,
}

/// Result of one item, produced on a worker thread
struct Completed {
    /// Position of the item in its layer
    index: usize,
    changed: bool,
    change: Option<Change>,
    outcome: ItemOutcome,
    error: Option<Error>,
}

impl<'a> Engine<'a> {
    pub fn new(system: &'a System, opts: ExecuteOptions) -> Self {
        Self {
            system,
            opts,
            hook: &NoState,
            progress: &NoProgress,
            cancel: CancelToken::new(),
            transaction_id: new_transaction_id(),
            history: Vec::new(),
            journal: Vec::new(),
            summary: RunSummary::default(),
        }
    }

    /// Inject the state-persistence hook
    pub fn with_hook(mut self, hook: &'a dyn StateHook) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use a pre-allocated id (e.g. the one keying the backup directory)
    pub fn with_transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = id.into();
        self
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.opts
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Ids in AppliedHistory, oldest first
    pub fn applied_history(&self) -> Vec<&str> {
        self.history.iter().map(|p| p.id.as_str()).collect()
    }

    /// Changes recorded so far, in application order
    pub fn changes(&self) -> &[TransactionChange] {
        &self.journal
    }

    /// Apply a flat, already ordered list, continuing past failures.
    ///
    /// No rollback happens in this mode; failures are aggregated.
    pub fn apply_sequential(&mut self, resources: Vec<PlannedResource>) -> Result<()> {
        let cancel = self.cancel.clone();
        let ctx = ApplyContext::new(self.system, &cancel, self.opts.dry_run);
        let total = resources.len();
        let mut errors = Vec::new();

        for (index, mut planned) in resources.into_iter().enumerate() {
            let done = run_guarded(index, &mut planned, &ctx, self.hook, self.progress);
            self.summary.add_outcome(done.outcome);

            if let Some(err) = done.error {
                errors.push(err);
                continue;
            }
            if done.changed && !self.opts.dry_run {
                self.journal.push(journal_entry(&planned, done.change));
                self.history.push(planned);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate {
                failed: errors.len(),
                total,
                errors,
            })
        }
    }

    /// Apply one layer: one task per member, then a barrier.
    ///
    /// Siblings of a failing member always run to completion. If any member
    /// failed, this layer's changed members are reverted (reverse completion
    /// order), then the AppliedHistory of earlier layers (back to front), and
    /// the layer error is returned. On success the changed members join the
    /// AppliedHistory in completion order.
    pub fn apply_layer(&mut self, layer: Layer) -> Result<()> {
        let Layer { index, mut members } = layer;
        if members.is_empty() {
            return Ok(());
        }

        self.progress.on_layer_start(index, members.len());
        log::info!("Applying layer {} ({} resources)", index, members.len());

        let threads = worker_count(self.opts.jobs, members.len());
        let pool = match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool,
            Err(e) => {
                let error = Error::Io(std::io::Error::other(format!(
                    "Failed to create apply thread pool for layer {index}: {e}"
                )));
                self.summary.skipped += members.len();
                return Err(self.fail_layer(index, Vec::new(), vec![error]));
            }
        };

        let completed: Mutex<Vec<Completed>> = Mutex::new(Vec::with_capacity(members.len()));
        let cancel = self.cancel.clone();
        let system = self.system;
        let hook = self.hook;
        let progress = self.progress;
        let dry_run = self.opts.dry_run;

        pool.scope(|s| {
            for (i, planned) in members.iter_mut().enumerate() {
                let completed = &completed;
                let cancel = &cancel;
                s.spawn(move |_| {
                    let ctx = ApplyContext::new(system, cancel, dry_run);
                    let done = run_guarded(i, planned, &ctx, hook, progress);
                    push_completed(completed, done);
                });
            }
        });

        let completed = match completed.into_inner() {
            Ok(collected) => collected,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut slots: Vec<Option<PlannedResource>> = members.into_iter().map(Some).collect();
        let mut changed_in_layer = Vec::new();
        let mut errors = Vec::new();

        for done in completed {
            self.summary.add_outcome(done.outcome);
            if let Some(err) = done.error {
                errors.push(err);
                continue;
            }
            if done.changed
                && !dry_run
                && let Some(planned) = slots[done.index].take()
            {
                self.journal.push(journal_entry(&planned, done.change));
                changed_in_layer.push(planned);
            }
        }

        if errors.is_empty() {
            self.history.extend(changed_in_layer);
            return Ok(());
        }

        log::warn!(
            "Layer {} failed ({} of {} resources), rolling back",
            index,
            errors.len(),
            slots.len()
        );
        Err(self.fail_layer(index, changed_in_layer, errors))
    }

    /// Revert this layer's changed members, then the whole AppliedHistory,
    /// and wrap `errors` with the rollback report.
    fn fail_layer(
        &mut self,
        index: usize,
        mut changed_in_layer: Vec<PlannedResource>,
        errors: Vec<Error>,
    ) -> Error {
        let ctx = ApplyContext::new(self.system, &self.cancel, self.opts.dry_run);
        let mut report = rollback(&mut changed_in_layer, &ctx, self.hook, self.progress);
        let mut previous = std::mem::take(&mut self.history);
        report.merge(rollback(&mut previous, &ctx, self.hook, self.progress));

        self.summary.reverted += report.reverted.len();
        self.summary.revert_failed += report.failed.len();

        Error::LayerFailed {
            layer: index,
            errors,
            rollback: report,
        }
    }

    /// Count resources that were never started
    pub fn mark_skipped(&mut self, count: usize) {
        self.summary.skipped += count;
    }

    /// Build the durable record of this run
    pub fn transaction(&self, failed: bool) -> Transaction {
        let status = if failed {
            TransactionStatus::Failed
        } else {
            TransactionStatus::Success
        };
        let mut tx = Transaction::new(self.transaction_id.clone(), status);
        tx.changes = self.journal.clone();
        tx
    }
}

/// Upper bound on workers when `jobs` is 0
const MAX_AUTO_WORKERS: usize = 64;

/// Threads for a layer of `members`: `jobs` if set, else one per member up
/// to [`MAX_AUTO_WORKERS`]
fn worker_count(jobs: usize, members: usize) -> usize {
    let wanted = match jobs {
        0 => members.min(MAX_AUTO_WORKERS),
        jobs => jobs.min(members),
    };
    wanted.max(1)
}

/// [`run_item`], with an adapter panic turned into an apply failure
fn run_guarded(
    index: usize,
    planned: &mut PlannedResource,
    ctx: &ApplyContext,
    hook: &dyn StateHook,
    progress: &dyn ProgressCallback,
) -> Completed {
    let id = planned.id.clone();
    let resource_type = planned.resource_type();
    let name = planned.resource.id();
    let state = planned.state.clone();

    let payload = match panic::catch_unwind(AssertUnwindSafe(|| {
        run_item(index, planned, ctx, hook, progress)
    })) {
        Ok(done) => return done,
        Err(payload) => payload,
    };

    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    let error = Error::Apply {
        resource: id.clone(),
        source: anyhow::anyhow!("panicked: {reason}"),
    };
    let message = format!("{error:#}");
    log::error!("{}", message);

    let outcome = ItemOutcome {
        id,
        resource_type: resource_type.to_string(),
        status: ItemStatus::Failed {
            error: message.clone(),
        },
        message,
    };
    progress.on_resource_complete(&outcome);

    if !ctx.dry_run
        && let Err(e) = hook.update_resource(resource_type, &name, &state, StateStatus::Failed)
    {
        log::warn!("Could not record state of {}: {:#}", outcome.id, e);
    }

    Completed {
        index,
        changed: false,
        change: None,
        outcome,
        error: Some(error),
    }
}

/// Check then (if drifted) apply one resource, reporting as it completes.
fn run_item(
    index: usize,
    planned: &mut PlannedResource,
    ctx: &ApplyContext,
    hook: &dyn StateHook,
    progress: &dyn ProgressCallback,
) -> Completed {
    let resource = &mut planned.resource;
    let result = match resource.check(ctx) {
        Err(source) => Err(Error::Check {
            resource: planned.id.clone(),
            source,
        }),
        Ok(false) => Ok(ApplyResult::unchanged("already in desired state")),
        Ok(true) => resource.apply(ctx).map_err(|source| Error::Apply {
            resource: planned.id.clone(),
            source,
        }),
    };

    let (status, message, changed, error) = match result {
        Ok(r) if r.changed => {
            log::info!("{} changed: {}", planned.id, r.message);
            (ItemStatus::Changed, r.message, true, None)
        }
        Ok(r) => {
            log::debug!("{} unchanged: {}", planned.id, r.message);
            (ItemStatus::NoChange, r.message, false, None)
        }
        Err(e) => {
            let message = format!("{e:#}");
            log::error!("{}", message);
            (
                ItemStatus::Failed {
                    error: message.clone(),
                },
                message,
                false,
                Some(e),
            )
        }
    };

    let outcome = ItemOutcome {
        id: planned.id.clone(),
        resource_type: resource.resource_type().to_string(),
        status,
        message,
    };
    progress.on_resource_complete(&outcome);

    if !ctx.dry_run {
        let status = if error.is_some() {
            StateStatus::Failed
        } else {
            StateStatus::Success
        };
        if let Err(e) = hook.update_resource(
            resource.resource_type(),
            &resource.id(),
            &planned.state,
            status,
        ) {
            log::warn!("Could not record state of {}: {:#}", planned.id, e);
        }
    }

    let change = if changed && !ctx.dry_run {
        resource.last_change()
    } else {
        None
    };

    Completed {
        index,
        changed,
        change,
        outcome,
        error,
    }
}

fn push_completed(completed: &Mutex<Vec<Completed>>, done: Completed) {
    match completed.lock() {
        Ok(mut locked) => locked.push(done),
        Err(poisoned) => poisoned.into_inner().push(done),
    }
}

fn journal_entry(planned: &PlannedResource, change: Option<Change>) -> TransactionChange {
    let name = planned.resource.id();
    let change = change.unwrap_or_else(|| Change::new(Action::Modified, name.clone()));
    TransactionChange::from_change(planned.resource_type(), &name, change)
}

/// Outcome of a whole run
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Id of the persisted transaction, if one was written
    pub transaction_id: Option<String>,
    /// The error that ended the run (rollback already attempted)
    pub error: Option<Error>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<RunSummary> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.summary),
        }
    }
}

/// Run a whole plan: iterate layers (or the flattened list), then persist
/// the transaction.
///
/// A history write failure is logged and leaves `transaction_id` empty; it
/// never changes the run outcome. Dry runs are never recorded.
pub fn execute(
    plan: ExecutionPlan,
    mut engine: Engine<'_>,
    store: Option<&TransactionStore>,
) -> RunReport {
    let result = match engine.options().mode {
        ExecutionMode::Sequential => engine.apply_sequential(plan.into_sequence()),
        ExecutionMode::Layered => {
            let mut result = Ok(());
            let mut layers = plan.layers.into_iter();
            for layer in layers.by_ref() {
                if let Err(e) = engine.apply_layer(layer) {
                    result = Err(e);
                    break;
                }
            }
            let remaining: usize = layers.map(|l| l.len()).sum();
            if remaining > 0 {
                log::warn!("{} resources not started after layer failure", remaining);
                engine.mark_skipped(remaining);
            }
            result
        }
    };

    let mut transaction_id = None;
    if !engine.options().dry_run
        && let Some(store) = store
    {
        let tx = engine.transaction(result.is_err());
        match store.append(&tx) {
            Ok(()) => transaction_id = Some(tx.id),
            Err(e) => log::warn!("Could not record transaction {}: {}", tx.id, e),
        }
    }

    RunReport {
        summary: engine.summary,
        transaction_id,
        error: result.err(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use anyhow::bail;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct Counters {
        checks: AtomicUsize,
        mutations: AtomicUsize,
        reverts: AtomicUsize,
    }

    impl Counters {
        fn mutations(&self) -> usize {
            self.mutations.load(Ordering::SeqCst)
        }

        fn reverts(&self) -> usize {
            self.reverts.load(Ordering::SeqCst)
        }

        fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug)]
    struct Probe {
        name: String,
        drift: bool,
        fail_check: bool,
        fail_apply: bool,
        fail_revert: bool,
        panic_apply: bool,
        applied: bool,
        counters: Arc<Counters>,
        reverts: Arc<Mutex<Vec<String>>>,
    }

    impl Probe {
        fn new(name: &str, reverts: &Arc<Mutex<Vec<String>>>) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let probe = Self {
                name: name.into(),
                drift: true,
                fail_check: false,
                fail_apply: false,
                fail_revert: false,
                panic_apply: false,
                applied: false,
                counters: Arc::clone(&counters),
                reverts: Arc::clone(reverts),
            };
            (probe, counters)
        }

        fn planned(self) -> PlannedResource {
            PlannedResource::new(self.name.clone(), "present", Box::new(self))
        }
    }

    impl crate::resource::Resource for Probe {
        fn id(&self) -> String {
            self.name.clone()
        }
        fn description(&self) -> String {
            format!("Probe {}", self.name)
        }
        fn resource_type(&self) -> &'static str {
            "probe"
        }
        fn desired_state(&self) -> String {
            "present".into()
        }
        fn check(&self, _ctx: &ApplyContext) -> anyhow::Result<bool> {
            self.counters.checks.fetch_add(1, Ordering::SeqCst);
            if self.fail_check {
                bail!("cannot inspect {}", self.name);
            }
            Ok(self.drift && !self.applied)
        }
        fn apply(&mut self, ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
            if !self.check(ctx)? {
                return Ok(ApplyResult::unchanged("in sync"));
            }
            if ctx.dry_run {
                return Ok(ApplyResult::would(format!("create {}", self.name)));
            }
            if self.fail_apply {
                bail!("{} exploded", self.name);
            }
            if self.panic_apply {
                panic!("{} lost its mind", self.name);
            }
            self.counters.mutations.fetch_add(1, Ordering::SeqCst);
            self.applied = true;
            Ok(ApplyResult::changed("created"))
        }
        fn can_revert(&self) -> bool {
            true
        }
        fn revert(&mut self, _ctx: &ApplyContext) -> anyhow::Result<()> {
            self.counters.reverts.fetch_add(1, Ordering::SeqCst);
            self.reverts.lock().unwrap().push(self.name.clone());
            if self.fail_revert {
                bail!("{} is stuck", self.name);
            }
            self.applied = false;
            Ok(())
        }
        fn last_change(&self) -> Option<Change> {
            self.applied
                .then(|| Change::new(Action::Created, format!("/tmp/{}", self.name)))
        }
    }

    fn system() -> System {
        System::new(Arc::new(LocalTransport))
    }

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn layer(index: usize, members: Vec<PlannedResource>) -> Layer {
        Layer { index, members }
    }

    #[test]
    fn test_panicking_member_rolls_back_and_records_failed_transaction() {
        let reverts = log();
        let (pkg, cpkg) = Probe::new("pkg", &reverts);
        let (mut svc, _) = Probe::new("svc", &reverts);
        svc.panic_apply = true;

        let dir = TempDir::new().unwrap();
        let store = TransactionStore::new(dir.path().join("history.json"));
        let system = system();
        let engine = Engine::new(&system, ExecuteOptions::default()).with_transaction_id("tx-7");

        let mut plan = ExecutionPlan::new();
        plan.push_layer(vec![pkg.planned()]);
        plan.push_layer(vec![svc.planned()]);
        let report = execute(plan, engine, Some(&store));

        match &report.error {
            Some(Error::LayerFailed { layer, errors, .. }) => {
                assert_eq!(*layer, 1);
                assert_eq!(errors[0].resource(), Some("svc"));
                assert!(format!("{:#}", errors[0]).contains("panicked: svc lost its mind"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(cpkg.reverts(), 1);
        assert_eq!(report.summary.failed, 1);

        let tx = store.find("tx-7").unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.changes[0].name, "pkg");
    }

    #[test]
    fn test_failed_layer_setup_reverts_history() {
        let reverts = log();
        let (first, c1) = Probe::new("first", &reverts);
        let (second, c2) = Probe::new("second", &reverts);

        let system = system();
        let mut engine = Engine::new(&system, ExecuteOptions::default());
        engine
            .apply_layer(layer(0, vec![first.planned(), second.planned()]))
            .unwrap();

        let setup = Error::Io(std::io::Error::other("no threads"));
        let err = engine.fail_layer(1, Vec::new(), vec![setup]);

        assert!(matches!(err, Error::LayerFailed { layer: 1, .. }));
        assert_eq!((c1.reverts(), c2.reverts()), (1, 1));
        assert!(engine.applied_history().is_empty());
        assert_eq!(engine.summary().reverted, 2);
    }

    #[test]
    fn test_worker_count_is_bounded() {
        assert_eq!(worker_count(0, 3), 3);
        assert_eq!(worker_count(0, 10_000), MAX_AUTO_WORKERS);
        assert_eq!(worker_count(4, 2), 2);
        assert_eq!(worker_count(4, 9), 4);
        assert_eq!(worker_count(0, 0), 1);
    }

    #[test]
    fn test_converged_resource_never_mutates() {
        let reverts = log();
        let (mut probe, counters) = Probe::new("motd", &reverts);
        probe.drift = false;

        let system = system();
        let mut engine = Engine::new(&system, ExecuteOptions::default());
        engine.apply_layer(layer(0, vec![probe.planned()])).unwrap();

        assert_eq!(counters.mutations(), 0);
        assert_eq!(engine.summary().no_change, 1);
        assert_eq!(engine.summary().outcomes[0].status, ItemStatus::NoChange);
        assert!(engine.applied_history().is_empty());
    }

    #[test]
    fn test_dry_run_reports_without_mutating_or_recording() {
        let reverts = log();
        let (drifted, c1) = Probe::new("drifted", &reverts);
        let (mut in_sync, c2) = Probe::new("in-sync", &reverts);
        in_sync.drift = false;

        let hook_calls = AtomicUsize::new(0);
        let hook = |_: &str, _: &str, _: &str, _: StateStatus| -> anyhow::Result<()> {
            hook_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        let dir = TempDir::new().unwrap();
        let store = TransactionStore::new(dir.path().join("history.json"));
        let system = system();
        let opts = ExecuteOptions {
            dry_run: true,
            ..Default::default()
        };
        let engine = Engine::new(&system, opts).with_hook(&hook);

        let mut plan = ExecutionPlan::new();
        plan.push_layer(vec![drifted.planned(), in_sync.planned()]);
        let report = execute(plan, engine, Some(&store));

        assert!(report.is_success());
        assert_eq!(c1.mutations() + c2.mutations(), 0);
        let by_id = |id: &str| {
            report
                .summary
                .outcomes
                .iter()
                .find(|o| o.id == id)
                .cloned()
                .unwrap()
        };
        assert_eq!(by_id("drifted").status, ItemStatus::Changed);
        assert_eq!(by_id("drifted").message, "would create drifted");
        assert_eq!(by_id("in-sync").status, ItemStatus::NoChange);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
        assert!(report.transaction_id.is_none());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_sibling_success_reverted_once_when_layer_fails() {
        let reverts = log();
        let (a, ca) = Probe::new("a", &reverts);
        let (mut b, cb) = Probe::new("b", &reverts);
        b.fail_apply = true;

        let system = system();
        let mut engine = Engine::new(&system, ExecuteOptions::default());
        let err = engine
            .apply_layer(layer(0, vec![a.planned(), b.planned()]))
            .unwrap_err();

        assert_eq!(ca.mutations(), 1);
        assert_eq!(ca.reverts(), 1);
        assert_eq!(cb.reverts(), 0);
        match err {
            Error::LayerFailed {
                layer,
                errors,
                rollback,
            } => {
                assert_eq!(layer, 0);
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].resource(), Some("b"));
                assert_eq!(rollback.reverted, ["a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(engine.applied_history().is_empty());
    }

    #[test]
    fn test_earlier_layers_reverted_once_after_current_layer() {
        let reverts = log();
        let (p1, c1) = Probe::new("p1", &reverts);
        let (p2, c2) = Probe::new("p2", &reverts);
        let (x, cx) = Probe::new("x", &reverts);
        let (mut y, _) = Probe::new("y", &reverts);
        y.fail_apply = true;

        let system = system();
        let mut engine = Engine::new(&system, ExecuteOptions::default());
        engine
            .apply_layer(layer(0, vec![p1.planned(), p2.planned()]))
            .unwrap();
        assert_eq!(engine.applied_history().len(), 2);

        engine
            .apply_layer(layer(1, vec![x.planned(), y.planned()]))
            .unwrap_err();

        assert_eq!((c1.reverts(), c2.reverts(), cx.reverts()), (1, 1, 1));
        let order = reverts.lock().unwrap().clone();
        // Current layer first, then earlier layers
        assert_eq!(order[0], "x");
        let mut rest = order[1..].to_vec();
        rest.sort();
        assert_eq!(rest, ["p1", "p2"]);
        assert!(engine.applied_history().is_empty());
        assert_eq!(engine.summary().reverted, 3);
    }

    #[test]
    fn test_history_reverted_back_to_front() {
        let reverts = log();
        let (first, _) = Probe::new("first", &reverts);
        let (second, _) = Probe::new("second", &reverts);
        let (mut bad, _) = Probe::new("bad", &reverts);
        bad.fail_apply = true;

        let system = system();
        let mut engine = Engine::new(&system, ExecuteOptions::default());
        engine.apply_layer(layer(0, vec![first.planned()])).unwrap();
        engine.apply_layer(layer(1, vec![second.planned()])).unwrap();
        engine.apply_layer(layer(2, vec![bad.planned()])).unwrap_err();

        assert_eq!(reverts.lock().unwrap().as_slice(), ["second", "first"]);
    }

    #[test]
    fn test_failed_service_reverts_package_and_records_failed_transaction() {
        let reverts = log();
        let (pkg, cpkg) = Probe::new("pkg", &reverts);
        let (mut svc, csvc) = Probe::new("svc", &reverts);
        svc.fail_apply = true;

        let dir = TempDir::new().unwrap();
        let store = TransactionStore::new(dir.path().join("history.json"));
        let system = system();
        let engine = Engine::new(&system, ExecuteOptions::default()).with_transaction_id("tx-42");

        let mut plan = ExecutionPlan::new();
        plan.push_layer(vec![pkg.planned()]);
        plan.push_layer(vec![svc.planned()]);
        let report = execute(plan, engine, Some(&store));

        assert!(matches!(report.error, Some(Error::LayerFailed { layer: 1, .. })));
        assert_eq!(cpkg.reverts(), 1);
        assert_eq!(csvc.reverts(), 0);
        assert_eq!(report.transaction_id.as_deref(), Some("tx-42"));

        let tx = store.find("tx-42").unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.changes.len(), 1);
        assert_eq!(tx.changes[0].name, "pkg");
        assert_eq!(tx.changes[0].action, Action::Created);
    }

    #[test]
    fn test_no_layer_starts_after_failure() {
        let reverts = log();
        let (mut bad, _) = Probe::new("bad", &reverts);
        bad.fail_apply = true;
        let (later, clater) = Probe::new("later", &reverts);

        let system = system();
        let engine = Engine::new(&system, ExecuteOptions::default());
        let mut plan = ExecutionPlan::new();
        plan.push_layer(vec![bad.planned()]);
        plan.push_layer(vec![later.planned()]);
        let report = execute(plan, engine, None);

        assert!(!report.is_success());
        assert_eq!(clater.checks(), 0);
        assert_eq!(report.summary.skipped, 1);
    }

    #[test]
    fn test_rollback_failure_keeps_original_error() {
        let reverts = log();
        let (mut stuck, _) = Probe::new("stuck", &reverts);
        stuck.fail_revert = true;
        let (ok, cok) = Probe::new("ok", &reverts);
        let (mut bad, _) = Probe::new("bad", &reverts);
        bad.fail_apply = true;

        let system = system();
        let mut engine = Engine::new(&system, ExecuteOptions::default());
        engine
            .apply_layer(layer(0, vec![ok.planned(), stuck.planned()]))
            .unwrap();
        let err = engine.apply_layer(layer(1, vec![bad.planned()])).unwrap_err();

        assert_eq!(cok.reverts(), 1);
        match &err {
            Error::LayerFailed {
                errors, rollback, ..
            } => {
                assert!(matches!(errors[0], Error::Apply { .. }));
                assert!(!rollback.is_complete());
                assert_eq!(rollback.failed[0].0, "stuck");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.summary().revert_failed, 1);
    }

    #[test]
    fn test_check_error_counts_as_failure() {
        let reverts = log();
        let (mut blind, counters) = Probe::new("blind", &reverts);
        blind.fail_check = true;

        let system = system();
        let mut engine = Engine::new(&system, ExecuteOptions::default());
        let err = engine.apply_layer(layer(0, vec![blind.planned()])).unwrap_err();

        assert_eq!(counters.mutations(), 0);
        match err {
            Error::LayerFailed { errors, .. } => {
                assert!(matches!(errors[0], Error::Check { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sequential_continues_past_failures() {
        let reverts = log();
        let (a, ca) = Probe::new("a", &reverts);
        let (mut b, _) = Probe::new("b", &reverts);
        b.fail_apply = true;
        let (c, cc) = Probe::new("c", &reverts);

        let system = system();
        let opts = ExecuteOptions {
            mode: ExecutionMode::Sequential,
            ..Default::default()
        };
        let mut engine = Engine::new(&system, opts);
        let err = engine
            .apply_sequential(vec![a.planned(), b.planned(), c.planned()])
            .unwrap_err();

        assert!(matches!(err, Error::Aggregate { failed: 1, total: 3, .. }));
        assert_eq!((ca.mutations(), cc.mutations()), (1, 1));
        assert_eq!(ca.reverts() + cc.reverts(), 0);
        let order: Vec<_> = engine.summary().outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(order, ["a", "b", "c"]);
        assert_eq!(engine.applied_history(), ["a", "c"]);
    }

    #[test]
    fn test_state_hook_statuses_and_failures_are_non_fatal() {
        let reverts = log();
        let (ok, _) = Probe::new("ok", &reverts);
        let (mut bad, _) = Probe::new("bad", &reverts);
        bad.fail_apply = true;

        let seen = Mutex::new(Vec::new());
        let hook = |_: &str, name: &str, state: &str, status: StateStatus| -> anyhow::Result<()> {
            seen.lock()
                .unwrap()
                .push((name.to_string(), state.to_string(), status));
            bail!("state store is read-only")
        };

        let system = system();
        let opts = ExecuteOptions {
            mode: ExecutionMode::Sequential,
            ..Default::default()
        };
        let mut engine = Engine::new(&system, opts).with_hook(&hook);
        let err = engine
            .apply_sequential(vec![ok.planned(), bad.planned()])
            .unwrap_err();

        // The hook error never replaced the apply error
        assert!(matches!(err, Error::Aggregate { failed: 1, .. }));
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            [
                ("ok".to_string(), "present".to_string(), StateStatus::Success),
                ("bad".to_string(), "present".to_string(), StateStatus::Failed),
            ]
        );
    }

    #[test]
    fn test_bounded_jobs_still_run_every_member() {
        let reverts = log();
        let mut counters = Vec::new();
        let mut members = Vec::new();
        for i in 0..8 {
            let (p, c) = Probe::new(&format!("r{i}"), &reverts);
            counters.push(c);
            members.push(p.planned());
        }

        let system = system();
        let opts = ExecuteOptions {
            jobs: 2,
            ..Default::default()
        };
        let mut engine = Engine::new(&system, opts);
        engine.apply_layer(layer(0, members)).unwrap();

        assert!(counters.iter().all(|c| c.mutations() == 1));
        assert_eq!(engine.summary().changed, 8);
        assert_eq!(engine.changes().len(), 8);
        assert_eq!(engine.applied_history().len(), 8);
    }
}
