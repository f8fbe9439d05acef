//! Versioned, shareable plot state.
//!
//! [`PlotState`] owns one plot behind a read/write lock. Every call to
//! [`PlotState::mutate`] bumps the version by exactly one, records which
//! fields changed, and publishes the new version on a `watch` channel so
//! push subscribers wake without polling.
//!
//! Change records are kept in a log so that a client holding an older
//! version can be sent a patch instead of the whole plot. The log is pruned
//! up to the oldest version any live [`Subscription`] still needs; with no
//! subscribers it grows until [`PlotState::flush`] or until the configured
//! capacity drops the oldest entries. A request that falls before the
//! retained window is answered with a full snapshot.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tracing::debug;

use super::model::Plot;
use super::update::{FieldPath, PlotPatch, UpdateEvent, UpdatePayload, diff};

/// Default number of change records kept per plot.
pub const DEFAULT_LOG_CAPACITY: usize = 256;

/// Fields touched by one mutation.
struct ChangeRecord {
    version: u64,
    paths: BTreeSet<FieldPath>,
}

struct Inner {
    plot: Plot,
    version: u64,
    log: VecDeque<ChangeRecord>,
    /// Versions below this are no longer covered by `log`.
    log_floor: u64,
    log_capacity: usize,
    /// Last version delivered to each live subscription.
    cursors: HashMap<u64, u64>,
    next_cursor: u64,
}

impl Inner {
    fn record(&mut self, version: u64, paths: BTreeSet<FieldPath>) {
        self.log.push_back(ChangeRecord { version, paths });
        self.trim();
    }

    fn trim(&mut self) {
        while self.log.len() > self.log_capacity {
            if let Some(dropped) = self.log.pop_front() {
                self.log_floor = dropped.version;
            }
        }
    }

    fn prune(&mut self) {
        let Some(&oldest) = self.cursors.values().min() else {
            return;
        };
        while self.log.front().is_some_and(|r| r.version <= oldest) {
            self.log.pop_front();
        }
        self.log_floor = self.log_floor.max(oldest);
    }

    fn snapshot_event(&self, plot_id: &str, since: u64) -> UpdateEvent {
        let mut changed_paths: BTreeSet<FieldPath> =
            (0..self.plot.data.len()).map(FieldPath::Trace).collect();
        changed_paths.extend(
            self.plot
                .layout
                .entries()
                .keys()
                .map(|k| FieldPath::Layout(k.clone())),
        );
        UpdateEvent {
            plot_id: plot_id.to_owned(),
            since_version: since,
            to_version: self.version,
            changed_paths,
            update: UpdatePayload::Snapshot(self.plot.clone()),
        }
    }

    fn event_since(&self, plot_id: &str, since: u64) -> Option<UpdateEvent> {
        if since == self.version {
            return None;
        }
        if since > self.version || since < self.log_floor {
            return Some(self.snapshot_event(plot_id, since));
        }
        let changed_paths: BTreeSet<FieldPath> = self
            .log
            .iter()
            .filter(|r| r.version > since)
            .flat_map(|r| r.paths.iter().cloned())
            .collect();
        let patch = PlotPatch::from_paths(&self.plot, &changed_paths);
        Some(UpdateEvent {
            plot_id: plot_id.to_owned(),
            since_version: since,
            to_version: self.version,
            changed_paths,
            update: UpdatePayload::Patch(patch),
        })
    }
}

/// State container for one logical plot.
pub struct PlotState {
    id: String,
    inner: RwLock<Inner>,
    version_tx: watch::Sender<u64>,
}

impl PlotState {
    /// Create a container with a generated identifier.
    pub fn new(plot: Plot) -> Self {
        Self::with_id(generate_plot_id(), plot)
    }

    /// Create a container with a caller-supplied identifier.
    pub fn with_id(id: impl Into<String>, plot: Plot) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            id: id.into(),
            inner: RwLock::new(Inner {
                plot,
                version: 0,
                log: VecDeque::new(),
                log_floor: 0,
                log_capacity: DEFAULT_LOG_CAPACITY,
                cursors: HashMap::new(),
                next_cursor: 0,
            }),
            version_tx,
        }
    }

    /// Override the change log capacity (minimum 1).
    pub fn with_log_capacity(self, capacity: usize) -> Self {
        self.set_log_capacity(capacity);
        self
    }

    /// Change the log capacity in place, dropping the oldest records if the
    /// log is now over it. Clients behind the new floor get a snapshot.
    pub fn set_log_capacity(&self, capacity: usize) {
        let mut inner = self.write_inner();
        inner.log_capacity = capacity.max(1);
        inner.trim();
    }

    /// Wrap in an [`Arc`] for sharing with routes and subscribers.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// The plot identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current version.
    pub fn current_version(&self) -> u64 {
        self.read_inner().version
    }

    /// A copy of the current plot.
    pub fn plot(&self) -> Plot {
        self.read_inner().plot.clone()
    }

    /// Read the current plot without copying it.
    pub fn read<R>(&self, f: impl FnOnce(&Plot) -> R) -> R {
        f(&self.read_inner().plot)
    }

    /// The current plot and its version, read atomically.
    pub fn versioned_plot(&self) -> (u64, Plot) {
        let inner = self.read_inner();
        (inner.version, inner.plot.clone())
    }

    /// Canonical JSON of the current plot.
    ///
    /// Two calls with no mutation in between return identical strings.
    ///
    /// # Errors
    ///
    /// Returns an error if the plot cannot be serialized.
    pub fn snapshot(&self) -> crate::error::Result<String> {
        self.read_inner().plot.to_json_string()
    }

    /// Apply `f` to the plot and bump the version.
    ///
    /// `f` runs on a copy that replaces the plot only when `f` returns, so
    /// readers never see a half-applied change. The version increases by one
    /// even when `f` leaves the plot unchanged.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Plot) -> R) -> R {
        let (result, version, changed) = {
            let mut inner = self.write_inner();
            let mut next = inner.plot.clone();
            let result = f(&mut next);
            let paths = diff(&inner.plot, &next);
            let changed = paths.len();
            inner.plot = next;
            inner.version += 1;
            let version = inner.version;
            inner.record(version, paths);
            (result, version, changed)
        };
        self.version_tx.send_replace(version);
        debug!(plot_id = %self.id, version, changed, "plot mutated");
        result
    }

    /// The delta a client holding `version` needs, or `None` if it is current.
    ///
    /// A `version` ahead of the current one is treated as stale client state
    /// and answered with a full snapshot.
    pub fn changes_since(&self, version: u64) -> Option<UpdateEvent> {
        self.read_inner().event_since(&self.id, version)
    }

    /// A full snapshot event for a client holding `since`.
    pub fn snapshot_event(&self, since: u64) -> UpdateEvent {
        self.read_inner().snapshot_event(&self.id, since)
    }

    /// Drop change records no live subscriber needs.
    ///
    /// With no subscribers this clears the log, so the next request from an
    /// older version gets a full snapshot.
    pub fn flush(&self) {
        let mut inner = self.write_inner();
        if inner.cursors.is_empty() {
            inner.log.clear();
            inner.log_floor = inner.version;
        } else {
            inner.prune();
        }
    }

    /// Number of change records currently retained.
    pub fn pending_changes(&self) -> usize {
        self.read_inner().log.len()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.read_inner().cursors.len()
    }

    /// A receiver that observes every version bump.
    pub fn watch_version(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Start tracking a client that holds `from_version`.
    ///
    /// The subscription keeps change records it has not consumed yet alive
    /// and releases them when dropped.
    pub fn subscribe(self: &Arc<Self>, from_version: u64) -> Subscription {
        // Subscribe to the channel before registering the cursor so a
        // mutation in between still wakes the subscriber.
        let version_rx = self.version_tx.subscribe();
        let cursor = {
            let mut inner = self.write_inner();
            let cursor = inner.next_cursor;
            inner.next_cursor += 1;
            let held = from_version.min(inner.version);
            inner.cursors.insert(cursor, held);
            inner.prune();
            cursor
        };
        debug!(plot_id = %self.id, cursor, from_version, "subscription opened");
        Subscription {
            state: Arc::clone(self),
            cursor,
            position: from_version,
            version_rx,
        }
    }

    fn advance(&self, cursor: u64, from: u64, full: bool) -> Option<UpdateEvent> {
        let mut inner = self.write_inner();
        let event = if full {
            (from != inner.version).then(|| inner.snapshot_event(&self.id, from))
        } else {
            inner.event_since(&self.id, from)
        };
        if let Some(ev) = &event {
            inner.cursors.insert(cursor, ev.to_version);
            inner.prune();
        }
        event
    }

    fn release(&self, cursor: u64) {
        let mut inner = self.write_inner();
        inner.cursors.remove(&cursor);
        inner.prune();
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for PlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlotState")
            .field("id", &self.id)
            .field("version", &self.current_version())
            .finish_non_exhaustive()
    }
}

/// Generate a fresh plot identifier.
pub fn generate_plot_id() -> String {
    format!("plot-{}", uuid::Uuid::new_v4().simple())
}

/// A single subscriber's position in a plot's version history.
pub struct Subscription {
    state: Arc<PlotState>,
    cursor: u64,
    position: u64,
    version_rx: watch::Receiver<u64>,
}

impl Subscription {
    /// The plot this subscription follows.
    pub fn state(&self) -> &Arc<PlotState> {
        &self.state
    }

    /// The last version delivered (or the starting version).
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The next delta if the plot moved past [`position`](Self::position).
    pub fn poll_update(&mut self) -> Option<UpdateEvent> {
        let event = self.state.advance(self.cursor, self.position, false)?;
        self.position = event.to_version;
        Some(event)
    }

    /// A full snapshot if the plot moved past [`position`](Self::position).
    pub fn poll_snapshot(&mut self) -> Option<UpdateEvent> {
        let event = self.state.advance(self.cursor, self.position, true)?;
        self.position = event.to_version;
        Some(event)
    }

    /// Wait for the next delta.
    ///
    /// Suspends until a mutation produces a new version. Mutations that land
    /// while the caller is busy are folded into one event, so nothing is
    /// skipped and nothing is delivered twice.
    pub async fn next_update(&mut self) -> Option<UpdateEvent> {
        loop {
            self.version_rx.borrow_and_update();
            if let Some(event) = self.poll_update() {
                return Some(event);
            }
            if self.version_rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.release(self.cursor);
        debug!(plot_id = %self.state.id(), cursor = self.cursor, "subscription released");
    }
}
