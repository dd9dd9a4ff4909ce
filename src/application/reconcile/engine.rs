use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::application::events::{Event, ReconcileCompletedEvent, SharedEventBus};
use crate::application::ports::SharedRegistry;
use crate::domain::entity::{entities_for, render, CatalogContext, EntitySpec};
use crate::domain::{ReconcileState, SharedNode};

/// Outcome of one reconciliation pass, including the passes of the
/// children it recursed into.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub device_id: String,
    pub added: usize,
    pub removed: usize,
    pub refreshed: usize,
    pub failed: usize,
    /// Devices of retired subtrees removed from the registry.
    pub purged_devices: usize,
    /// The request was satisfied by a pass that started after it was made.
    pub coalesced: bool,
    pub children: Vec<ReconcileReport>,
}

impl ReconcileReport {
    fn new(device_id: String) -> Self {
        Self {
            device_id,
            ..Self::default()
        }
    }

    pub fn total_added(&self) -> usize {
        self.added + self.children.iter().map(Self::total_added).sum::<usize>()
    }

    pub fn total_removed(&self) -> usize {
        self.removed + self.children.iter().map(Self::total_removed).sum::<usize>()
    }

    pub fn total_failed(&self) -> usize {
        self.failed + self.children.iter().map(Self::total_failed).sum::<usize>()
    }

    pub fn is_clean(&self) -> bool {
        self.total_failed() == 0
    }
}

/// Keeps each node's registered entities equal to what the catalog
/// intends for it.
///
/// Passes on one node are serialized through the node's gate and never
/// interleave. Requests that queue while another pass is waiting are
/// coalesced into the first pass that starts after them.
pub struct Reconciler {
    registry: SharedRegistry,
    catalog: CatalogContext,
    event_bus: SharedEventBus,
}

impl Reconciler {
    pub fn new(registry: SharedRegistry, catalog: CatalogContext, event_bus: SharedEventBus) -> Self {
        Self {
            registry,
            catalog,
            event_bus,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Reconcile `node` and then, recursively, its children.
    pub fn reconcile(&self, node: SharedNode) -> BoxFuture<'_, ReconcileReport> {
        async move {
            let device_id = node.device_id();
            let ticket = node.reconcile_requested.fetch_add(1, Ordering::SeqCst) + 1;

            let _gate = match node.reconcile_gate.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    trace!(%device_id, state = ?node.reconcile_state(), "Reconcile pass in progress, waiting");
                    node.reconcile_gate.lock().await
                }
            };

            if node.reconcile_started.load(Ordering::SeqCst) >= ticket {
                trace!(%device_id, "Reconcile request coalesced into a later pass");
                let mut report = ReconcileReport::new(device_id);
                report.coalesced = true;
                return report;
            }
            if node.is_detached() {
                debug!(%device_id, "Node retired, skipping reconcile pass");
                return ReconcileReport::new(device_id);
            }
            let latest = node.reconcile_requested.load(Ordering::SeqCst);
            node.reconcile_started.store(latest, Ordering::SeqCst);
            // Children attached after this point wait for the next pass.
            let children = node.children();

            let mut report = self.reconcile_own(&node, device_id).await;

            for child in children.into_iter().filter(|c| !c.is_detached()) {
                report.children.push(self.reconcile(child).await);
            }

            node.set_reconcile_state(ReconcileState::Idle);
            report
        }
        .boxed()
    }

    /// Steps 2-5 for a single node, plus purging of retired children.
    async fn reconcile_own(&self, node: &SharedNode, device_id: String) -> ReconcileReport {
        let mut report = ReconcileReport::new(device_id.clone());

        let specs: BTreeMap<String, EntitySpec> = entities_for(node, &self.catalog)
            .into_iter()
            .map(|spec| (spec.unique_id.clone(), spec))
            .collect();
        let intended: BTreeSet<String> = specs.keys().cloned().collect();
        node.replace_registered_entity_ids(intended);

        let existing: BTreeSet<String> = match self.registry.list_entities_for_device(&device_id).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(%device_id, error = %e, "Cannot list entities, skipping own pass");
                report.failed += 1;
                self.purge_retired(node, &mut report).await;
                return report;
            }
        };

        node.set_reconcile_state(ReconcileState::Adding);
        for (id, spec) in specs.iter().filter(|(id, _)| !existing.contains(*id)) {
            match self.registry.add_entity(&device_id, spec, render(spec, &**node)).await {
                Ok(()) => report.added += 1,
                Err(e) => {
                    warn!(%device_id, entity_id = %id, error = %e, "Failed to add entity");
                    report.failed += 1;
                }
            }
        }

        node.set_reconcile_state(ReconcileState::Updating);
        let registered = node.registered_entity_ids();
        for id in &existing {
            if !registered.contains(id) {
                match self.registry.remove_entity(id).await {
                    Ok(()) => {
                        debug!(%device_id, entity_id = %id, "Removed orphan entity");
                        report.removed += 1;
                    }
                    Err(e) => {
                        warn!(%device_id, entity_id = %id, error = %e, "Failed to remove orphan");
                        report.failed += 1;
                    }
                }
                continue;
            }
            let Some(spec) = specs.get(id) else { continue };
            match self.registry.refresh_entity(id, render(spec, &**node)).await {
                Ok(()) => report.refreshed += 1,
                Err(e) => {
                    warn!(%device_id, entity_id = %id, error = %e, "Failed to refresh entity");
                    report.failed += 1;
                }
            }
        }

        self.purge_retired(node, &mut report).await;

        if report.removed > 0 || report.purged_devices > 0 {
            info!(
                %device_id,
                added = report.added,
                removed = report.removed,
                purged_devices = report.purged_devices,
                "Entities reconciled"
            );
        } else {
            debug!(%device_id, added = report.added, refreshed = report.refreshed, "Entities reconciled");
        }

        self.event_bus.publish(Event::ReconcileCompleted(ReconcileCompletedEvent {
            device_id,
            added: report.added,
            removed: report.removed,
            refreshed: report.refreshed,
            failed: report.failed,
            timestamp: Utc::now(),
        }));

        report
    }

    async fn purge_retired(&self, node: &SharedNode, report: &mut ReconcileReport) {
        for retired in node.take_retired() {
            let (removed, devices, failed) = self.purge(retired).await;
            report.removed += removed;
            report.purged_devices += devices;
            report.failed += failed;
        }
    }

    /// Remove every entity and device of a retired subtree, leaves first.
    fn purge(&self, node: SharedNode) -> BoxFuture<'_, (usize, usize, usize)> {
        async move {
            let (mut removed, mut devices, mut failed) = (0, 0, 0);
            for child in node.children() {
                let (r, d, f) = self.purge(child).await;
                removed += r;
                devices += d;
                failed += f;
            }

            // An in-flight pass on the retired node finishes first.
            let _gate = node.reconcile_gate.lock().await;
            let device_id = node.device_id();
            node.replace_registered_entity_ids(BTreeSet::new());

            match self.registry.list_entities_for_device(&device_id).await {
                Ok(ids) => {
                    for id in ids {
                        match self.registry.remove_entity(&id).await {
                            Ok(()) => removed += 1,
                            Err(e) => {
                                warn!(%device_id, entity_id = %id, error = %e, "Failed to purge entity");
                                failed += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(%device_id, error = %e, "Cannot list entities of retired node");
                    failed += 1;
                }
            }

            match self.registry.remove_device(&device_id).await {
                Ok(()) => devices += 1,
                Err(e) => {
                    warn!(%device_id, error = %e, "Failed to remove retired device");
                    failed += 1;
                }
            }
            (removed, devices, failed)
        }
        .boxed()
    }
}

pub type SharedReconciler = Arc<Reconciler>;
