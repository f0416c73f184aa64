//! Process-wide cell registry and subscription graph.
//!
//! The registry owns every cell of one environment together with a
//! bidirectional adjacency record per id:
//!
//! ```text
//! id ──► (Cell, subscriptions: ids this cell receives from,
//!               subscribers:   ids this cell emits to)
//! ```
//!
//! A single write lock guards all structural mutations (start/stop/
//! subscribe/unsubscribe); existence reads take the read side. Subscriber
//! snapshots are *pushed* to the affected emitter's control slot after each
//! mutation; the cells themselves never touch the adjacency maps.
//!
//! ## Rules
//! - An id cannot subscribe to itself.
//! - Every referenced id must exist; validation happens before any
//!   mutation, so a failed call changes nothing.
//! - Removing a cell removes every edge touching it, on both sides, and
//!   refreshes the snapshots of all affected cells.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cells::behavior::Behavior;
use crate::cells::cell::{Cell, CellHandle};
use crate::error::CellError;

struct Entry {
    cell: Cell,
    /// Ids this cell has subscribed to (upstream emitters).
    subscriptions: HashSet<String>,
    /// Ids subscribed to this cell (downstream receivers).
    subscribers: HashSet<String>,
}

/// Registry of one environment's cells and their subscription graph.
pub(crate) struct Registry {
    environment_id: Arc<str>,
    cells: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub(crate) fn new(environment_id: Arc<str>) -> Registry {
        Registry {
            environment_id,
            cells: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a cell and inserts it with empty edge sets.
    pub(crate) async fn start_cell(
        &self,
        id: &str,
        behavior: Box<dyn Behavior>,
    ) -> Result<(), CellError> {
        let mut cells = self.cells.write().await;
        if cells.contains_key(id) {
            return Err(CellError::DuplicateId { id: id.to_string() });
        }
        let cell = Cell::start(
            Arc::clone(&self.environment_id),
            Arc::from(id),
            behavior,
        )
        .await;
        cells.insert(
            id.to_string(),
            Entry {
                cell,
                subscriptions: HashSet::new(),
                subscribers: HashSet::new(),
            },
        );
        debug!(environment = %self.environment_id, cell = id, "cell started");
        Ok(())
    }

    /// Removes a cell: drops every edge touching it, refreshes affected
    /// snapshots, then stops its worker (running `terminate`).
    pub(crate) async fn stop_cell(&self, id: &str) -> Result<(), CellError> {
        let mut cells = self.cells.write().await;
        let entry = cells
            .remove(id)
            .ok_or_else(|| CellError::UnknownId { id: id.to_string() })?;

        for upstream in &entry.subscriptions {
            if let Some(e) = cells.get_mut(upstream) {
                e.subscribers.remove(id);
            }
        }
        for downstream in &entry.subscribers {
            if let Some(e) = cells.get_mut(downstream) {
                e.subscriptions.remove(id);
            }
        }
        // Every emitter that was fanning out to `id` gets a fresh snapshot.
        for upstream in &entry.subscriptions {
            if let Err(err) = self.refresh_snapshot(&cells, upstream).await {
                warn!(
                    environment = %self.environment_id,
                    cell = %upstream,
                    error = %err,
                    "snapshot refresh failed during stop"
                );
            }
        }
        drop(cells);

        debug!(environment = %self.environment_id, cell = id, "cell stopping");
        entry.cell.stop().await
    }

    /// Returns `true` when a cell with this id exists.
    pub(crate) async fn has_cell(&self, id: &str) -> bool {
        self.cells.read().await.contains_key(id)
    }

    /// Returns a delivery handle for a cell.
    pub(crate) async fn handle(&self, id: &str) -> Result<CellHandle, CellError> {
        let cells = self.cells.read().await;
        cells
            .get(id)
            .map(|entry| entry.cell.handle())
            .ok_or_else(|| CellError::UnknownId { id: id.to_string() })
    }

    /// Adds `subscriber_ids` to the emitter's subscriber set.
    pub(crate) async fn subscribe(
        &self,
        emitter_id: &str,
        subscriber_ids: &[&str],
    ) -> Result<(), CellError> {
        let mut cells = self.cells.write().await;
        Self::validate(&cells, emitter_id, subscriber_ids)?;

        if let Some(entry) = cells.get_mut(emitter_id) {
            for sid in subscriber_ids {
                entry.subscribers.insert(sid.to_string());
            }
        }
        for sid in subscriber_ids {
            if let Some(entry) = cells.get_mut(*sid) {
                entry.subscriptions.insert(emitter_id.to_string());
            }
        }
        self.refresh_snapshot(&cells, emitter_id).await
    }

    /// Removes `subscriber_ids` from the emitter's subscriber set.
    pub(crate) async fn unsubscribe(
        &self,
        emitter_id: &str,
        subscriber_ids: &[&str],
    ) -> Result<(), CellError> {
        let mut cells = self.cells.write().await;
        Self::validate(&cells, emitter_id, subscriber_ids)?;

        if let Some(entry) = cells.get_mut(emitter_id) {
            for sid in subscriber_ids {
                entry.subscribers.remove(*sid);
            }
        }
        for sid in subscriber_ids {
            if let Some(entry) = cells.get_mut(*sid) {
                entry.subscriptions.remove(emitter_id);
            }
        }
        self.refresh_snapshot(&cells, emitter_id).await
    }

    /// Returns the emitter's subscriber ids, sorted.
    pub(crate) async fn subscribers(&self, id: &str) -> Result<Vec<String>, CellError> {
        let cells = self.cells.read().await;
        let entry = cells
            .get(id)
            .ok_or_else(|| CellError::UnknownId { id: id.to_string() })?;
        let mut ids: Vec<String> = entry.subscribers.iter().cloned().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Stops every cell; the first stop error is returned after all cells
    /// were attempted.
    pub(crate) async fn stop_all(&self) -> Result<(), CellError> {
        let entries: Vec<(String, Entry)> = {
            let mut cells = self.cells.write().await;
            cells.drain().collect()
        };
        let mut first_err = None;
        for (id, entry) in entries {
            if let Err(err) = entry.cell.stop().await {
                warn!(
                    environment = %self.environment_id,
                    cell = %id,
                    error = %err,
                    "cell stopped with error"
                );
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn validate(
        cells: &HashMap<String, Entry>,
        emitter_id: &str,
        subscriber_ids: &[&str],
    ) -> Result<(), CellError> {
        if !cells.contains_key(emitter_id) {
            return Err(CellError::UnknownId {
                id: emitter_id.to_string(),
            });
        }
        for sid in subscriber_ids {
            if *sid == emitter_id {
                return Err(CellError::SelfSubscription {
                    id: emitter_id.to_string(),
                });
            }
            if !cells.contains_key(*sid) {
                return Err(CellError::UnknownId {
                    id: sid.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Rebuilds the emitter's subscriber snapshot (id order) and pushes it
    /// through the cell's control slot.
    async fn refresh_snapshot(
        &self,
        cells: &HashMap<String, Entry>,
        emitter_id: &str,
    ) -> Result<(), CellError> {
        let entry = match cells.get(emitter_id) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let mut ids: Vec<&String> = entry.subscribers.iter().collect();
        ids.sort_unstable();
        let snapshot: Vec<CellHandle> = ids
            .iter()
            .filter_map(|sid| cells.get(*sid).map(|e| e.cell.handle()))
            .collect();
        entry.cell.push_subscribers(snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::behavior::Context;
    use crate::cells::event::Event;
    use async_trait::async_trait;

    struct NoopBehavior;

    #[async_trait]
    impl Behavior for NoopBehavior {
        async fn init(&mut self, _ctx: &Context<'_>) -> Result<(), CellError> {
            Ok(())
        }

        async fn terminate(&mut self) -> Result<(), CellError> {
            Ok(())
        }

        async fn process_event(
            &mut self,
            _event: Event,
            _ctx: &Context<'_>,
        ) -> Result<(), CellError> {
            Ok(())
        }

        async fn recover(&mut self, _reason: &CellError) -> Result<(), CellError> {
            Ok(())
        }
    }

    fn registry() -> Registry {
        Registry::new(Arc::from("test-env"))
    }

    async fn start(reg: &Registry, id: &str) {
        reg.start_cell(id, Box::new(NoopBehavior))
            .await
            .expect("start cell");
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let reg = registry();
        start(&reg, "a").await;
        let err = reg
            .start_cell("a", Box::new(NoopBehavior))
            .await
            .expect_err("duplicate");
        assert_eq!(err, CellError::DuplicateId { id: "a".into() });
        reg.stop_all().await.expect("stop all");
    }

    #[tokio::test]
    async fn test_stop_unknown_id_rejected() {
        let reg = registry();
        let err = reg.stop_cell("ghost").await.expect_err("unknown");
        assert_eq!(err, CellError::UnknownId { id: "ghost".into() });
    }

    #[tokio::test]
    async fn test_self_subscription_rejected() {
        let reg = registry();
        start(&reg, "a").await;
        let err = reg.subscribe("a", &["a"]).await.expect_err("self-sub");
        assert_eq!(err, CellError::SelfSubscription { id: "a".into() });
        reg.stop_all().await.expect("stop all");
    }

    #[tokio::test]
    async fn test_subscribe_validates_all_ids() {
        let reg = registry();
        start(&reg, "a").await;
        let err = reg.subscribe("a", &["ghost"]).await.expect_err("unknown");
        assert_eq!(err, CellError::UnknownId { id: "ghost".into() });
        // The failed call changed nothing.
        assert_eq!(reg.subscribers("a").await.expect("subscribers"), Vec::<String>::new());
        reg.stop_all().await.expect("stop all");
    }

    #[tokio::test]
    async fn test_graph_round_trip() {
        let reg = registry();
        start(&reg, "a").await;
        start(&reg, "b").await;

        let before = reg.subscribers("a").await.expect("before");
        reg.subscribe("a", &["b"]).await.expect("subscribe");
        assert_eq!(
            reg.subscribers("a").await.expect("subscribed"),
            vec!["b".to_string()]
        );
        reg.unsubscribe("a", &["b"]).await.expect("unsubscribe");
        let after = reg.subscribers("a").await.expect("after");
        assert_eq!(before, after);

        reg.stop_all().await.expect("stop all");
    }

    #[tokio::test]
    async fn test_subscribers_sorted() {
        let reg = registry();
        for id in ["hub", "zeta", "alpha", "mid"] {
            start(&reg, id).await;
        }
        reg.subscribe("hub", &["zeta", "alpha", "mid"])
            .await
            .expect("subscribe");
        assert_eq!(
            reg.subscribers("hub").await.expect("subscribers"),
            vec!["alpha".to_string(), "mid".to_string(), "zeta".to_string()]
        );
        reg.stop_all().await.expect("stop all");
    }

    #[tokio::test]
    async fn test_stop_cell_removes_edges_both_sides() {
        let reg = registry();
        start(&reg, "a").await;
        start(&reg, "b").await;
        start(&reg, "c").await;
        reg.subscribe("a", &["b"]).await.expect("a to b");
        reg.subscribe("b", &["c"]).await.expect("b to c");

        reg.stop_cell("b").await.expect("stop b");

        assert!(!reg.has_cell("b").await);
        // The emitter that fanned out to b no longer lists it.
        assert_eq!(
            reg.subscribers("a").await.expect("subscribers"),
            Vec::<String>::new()
        );
        // And c no longer records b upstream: re-adding b works cleanly.
        start(&reg, "b").await;
        reg.subscribe("b", &["c"]).await.expect("fresh edges");
        reg.stop_all().await.expect("stop all");
    }
}
