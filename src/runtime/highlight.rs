//! Turns a noisy execution-event stream into one stable "currently running
//! node" highlight.
//!
//! Rules:
//! - a node stays highlighted for at least `min_visible` before another node
//!   (or nothing) replaces it; early switches are deferred, not dropped;
//! - a node shown within the last `cooldown` is not shown again;
//! - terminal statuses forget the running node at once but clear the
//!   highlight only once `min_visible` has elapsed.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::graph_utils::graph::NodeId;
use crate::persistence::settings::EditorSettings;

use super::events::ExecutionEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HighlightTiming {
    pub min_visible: Duration,
    pub cooldown: Duration,
}

impl From<&EditorSettings> for HighlightTiming {
    fn from(s: &EditorSettings) -> Self {
        Self { min_visible: s.highlight_min_visible(), cooldown: s.highlight_cooldown() }
    }
}

impl Default for HighlightTiming {
    fn default() -> Self {
        Self::from(&EditorSettings::default())
    }
}

/// Change of the externally visible highlight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Highlight {
    Show(NodeId),
    Clear,
}

impl Highlight {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Highlight::Show(id) => Some(*id),
            Highlight::Clear => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pending {
    Switch { node: NodeId, due: Instant },
    Clear { due: Instant },
}

impl Pending {
    fn due(&self) -> Instant {
        match self {
            Pending::Switch { due, .. } | Pending::Clear { due } => *due,
        }
    }
}

#[derive(Debug, Default)]
pub struct HighlightSynchronizer {
    timing: HighlightTiming,
    run_id: Option<String>,
    /// Node the run is currently on, as far as the highlight is concerned.
    showing: Option<NodeId>,
    /// Node currently highlighted on screen.
    displayed: Option<NodeId>,
    shown_at: Option<Instant>,
    recently_shown: HashMap<NodeId, Instant>,
    pending: Option<Pending>,
}

impl HighlightSynchronizer {
    pub fn new(timing: HighlightTiming) -> Self {
        Self { timing, ..Self::default() }
    }

    pub fn current(&self) -> Option<NodeId> {
        self.displayed
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.due())
    }

    pub fn recently_shown(&self) -> &HashMap<NodeId, Instant> {
        &self.recently_shown
    }

    /// Feed one event. Returns the highlight change it causes right away, if any.
    pub fn handle_event(&mut self, event: &ExecutionEvent, now: Instant) -> Option<Highlight> {
        if let Some(run) = &event.run_id {
            if self.run_id.as_ref() != Some(run) {
                if self.run_id.is_some() {
                    debug!("new run {}, resetting highlight history", run);
                }
                self.run_id = Some(run.clone());
                self.showing = None;
                self.recently_shown.clear();
                self.pending = None;
            }
        }

        if event.status.is_terminal() {
            return self.finish(now);
        }

        let node = event.current_node?;
        if event.status.is_halt() {
            return self.show(node, now);
        }
        if self.showing == Some(node) {
            trace!("{} already showing", node);
            return None;
        }
        if self.in_cooldown(node, now) {
            trace!("{} shown recently, skipping", node);
            return None;
        }
        if let Some(due) = self.min_visible_until(now) {
            self.pending = Some(Pending::Switch { node, due });
            return None;
        }
        self.show(node, now)
    }

    /// Fire a pending timer whose deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<Highlight> {
        let pending = self.pending.filter(|p| p.due() <= now)?;
        self.pending = None;
        match pending {
            Pending::Switch { node, .. } => {
                if self.showing == Some(node) || self.in_cooldown(node, now) {
                    debug!("deferred switch to {} is stale, dropping", node);
                    return None;
                }
                self.show(node, now)
            }
            Pending::Clear { .. } => self.clear(),
        }
    }

    fn finish(&mut self, now: Instant) -> Option<Highlight> {
        self.showing = None;
        self.pending = None;
        self.displayed?;
        match self.min_visible_until(now) {
            Some(due) => {
                self.pending = Some(Pending::Clear { due });
                None
            }
            None => self.clear(),
        }
    }

    fn show(&mut self, node: NodeId, now: Instant) -> Option<Highlight> {
        self.pending = None;
        self.showing = Some(node);
        self.shown_at = Some(now);
        self.recently_shown.insert(node, now);
        if self.displayed == Some(node) {
            return None;
        }
        self.displayed = Some(node);
        Some(Highlight::Show(node))
    }

    fn clear(&mut self) -> Option<Highlight> {
        self.displayed.take()?;
        self.shown_at = None;
        Some(Highlight::Clear)
    }

    fn in_cooldown(&self, node: NodeId, now: Instant) -> bool {
        self.recently_shown
            .get(&node)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.timing.cooldown)
    }

    /// Deadline before which the displayed node must stay up, if not yet reached.
    fn min_visible_until(&self, now: Instant) -> Option<Instant> {
        self.displayed?;
        let due = self.shown_at? + self.timing.min_visible;
        (due > now).then_some(due)
    }
}

/// Runs a [`HighlightSynchronizer`] against an event bus and publishes the
/// highlight on a watch channel.
pub struct HighlightDriver {
    machine: HighlightSynchronizer,
    tx: watch::Sender<Option<NodeId>>,
}

impl HighlightDriver {
    pub fn new(timing: HighlightTiming) -> (Self, watch::Receiver<Option<NodeId>>) {
        let (tx, rx) = watch::channel(None);
        (Self { machine: HighlightSynchronizer::new(timing), tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<NodeId>> {
        self.tx.subscribe()
    }

    /// Consume events until the bus closes, then let pending timers run out.
    pub async fn run(mut self, mut events: broadcast::Receiver<ExecutionEvent>) {
        loop {
            let deadline = self.machine.next_deadline();
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        let change = self.machine.handle_event(&event, Instant::now());
                        self.publish(change);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("highlight driver lagged, skipped {} execution events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = sleep_until(deadline) => {
                    let change = self.machine.poll(Instant::now());
                    self.publish(change);
                }
            }
        }
        while let Some(deadline) = self.machine.next_deadline() {
            tokio::time::sleep_until(deadline).await;
            let change = self.machine.poll(Instant::now());
            self.publish(change);
        }
    }

    fn publish(&self, change: Option<Highlight>) {
        let Some(change) = change else { return };
        let next = change.node();
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
