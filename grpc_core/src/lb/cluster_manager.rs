// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Child-balancer registry with deferred deletion. See SPEC_FULL §4.6.
//!
//! Grounded on `execution::server::{Workers, Actions}`: a `parking_lot::Mutex`-guarded map
//! mutated only from one place (there, the expiration task and `poll`; here, the
//! [`SyncContext`](crate::lb::sync_context::SyncContext)), with a background timer that removes
//! entries past their deadline. Cycle avoidance follows the same "a fired timer that finds its
//! child already removed is a no-op" rule, implemented here with an explicit per-child
//! generation counter rather than `Weak` + `retain`, since deletion is per-key and
//! deadline-scheduled rather than a single shared sweep.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tonic::Status;

use crate::lb::sync_context::SyncContext;

/// How long a deactivated child survives before it is deleted, absent reactivation.
pub const DEACTIVATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15 * 60);

/// A stand-in for a real child LB policy: this crate implements only the registry's lifecycle
/// machinery, not load balancing algorithms (SPEC_FULL §1 Non-goals).
pub trait ChildPolicy: Send + Sync + 'static {
    /// Applies an updated config to this running child, in place.
    fn update_config(&self, policy_config: serde_json::Value);

    /// Forwards a name-resolution error to this child.
    fn handle_name_resolution_error(&self, status: Status);

    /// Shuts the child down. Called at most once, when the deletion timer fires.
    fn shutdown(&self);
}

enum ChildState {
    Active,
    /// Carries the generation token captured when the deactivation timer was scheduled.
    Deactivated { generation: u64 },
}

struct ChildLb {
    policy: Arc<dyn ChildPolicy>,
    state: ChildState,
}

struct Registry {
    children: BTreeMap<String, ChildLb>,
}

/// Keeps named child balancers alive across resolver updates, deactivating (rather than
/// immediately destroying) children dropped from an update so a child readvertised moments
/// later is reactivated instead of rebuilt from scratch.
///
/// All mutating methods enqueue their work onto a [`SyncContext`]; nothing here is called
/// directly from more than one logical caller at a time — SPEC_FULL §4.8's synchronization
/// context is what serializes them.
pub struct ClusterManager {
    sync_context: Arc<SyncContext>,
    registry: Arc<Mutex<Registry>>,
    next_generation: Arc<AtomicU64>,
    deactivation_timeout: std::time::Duration,
}

impl ClusterManager {
    pub fn new(sync_context: Arc<SyncContext>) -> Self {
        Self::with_deactivation_timeout(sync_context, DEACTIVATION_TIMEOUT)
    }

    /// As [`Self::new`], but with an overridden deletion-timer duration. Exists so tests can
    /// observe deferred deletion without waiting the real 15 minutes.
    pub fn with_deactivation_timeout(
        sync_context: Arc<SyncContext>,
        deactivation_timeout: std::time::Duration,
    ) -> Self {
        ClusterManager {
            sync_context,
            registry: Arc::new(Mutex::new(Registry {
                children: BTreeMap::new(),
            })),
            next_generation: Arc::new(AtomicU64::new(0)),
            deactivation_timeout,
        }
    }

    /// Applies a resolved-addresses update: `update` maps cluster name to the child's policy
    /// factory and its initial/updated config.
    ///
    /// `make_policy` constructs a fresh `ChildPolicy` for clusters that don't yet exist (or were
    /// deleted); it is not called for clusters being updated or reactivated in place.
    pub fn accept_resolved_addresses<F>(
        &self,
        update: BTreeMap<String, serde_json::Value>,
        make_policy: F,
    ) where
        F: Fn(&str) -> Arc<dyn ChildPolicy> + Send + 'static,
    {
        let registry = self.registry.clone();
        let sync_context = self.sync_context.clone();
        let next_generation = self.next_generation.clone();
        let deactivation_timeout = self.deactivation_timeout;

        self.sync_context.execute(move || {
            let mut reg = registry.lock();

            let removed: Vec<String> = reg
                .children
                .keys()
                .filter(|name| !update.contains_key(*name))
                .cloned()
                .collect();

            for name in removed {
                let generation = next_generation.fetch_add(1, Ordering::Relaxed);
                if let Some(child) = reg.children.get_mut(&name) {
                    child.state = ChildState::Deactivated { generation };
                }
                log::info!(
                    "cluster_manager: deactivating child '{name}', deletion in {:?} absent reactivation",
                    deactivation_timeout
                );
                schedule_deletion_timer(
                    sync_context.clone(),
                    registry.clone(),
                    name,
                    generation,
                    deactivation_timeout,
                );
            }

            for (name, policy_config) in update {
                match reg.children.get_mut(&name) {
                    Some(child) => {
                        // Reactivation (cancels any pending deletion timer by bumping the
                        // generation counter so the timer's captured token goes stale) or an
                        // in-place update of an already-active child.
                        if matches!(child.state, ChildState::Deactivated { .. }) {
                            log::info!("cluster_manager: reactivating child '{name}'");
                        }
                        child.state = ChildState::Active;
                        child.policy.update_config(policy_config);
                    }
                    None => {
                        log::debug!("cluster_manager: creating child '{name}'");
                        let policy = make_policy(&name);
                        policy.update_config(policy_config);
                        reg.children.insert(
                            name,
                            ChildLb {
                                policy,
                                state: ChildState::Active,
                            },
                        );
                    }
                }
            }
        });
    }

    /// Forwards `status` to every non-deactivated child. If every child is deactivated (or the
    /// registry is empty), the caller is expected to publish a `TRANSIENT_FAILURE` picker itself
    /// (SPEC_FULL §4.6); this method only reports whether that condition held.
    pub fn handle_name_resolution_error(&self, status: Status) {
        let registry = self.registry.clone();
        self.sync_context.execute(move || {
            let reg = registry.lock();
            log::warn!("cluster_manager: name resolution error: {status}");
            for child in reg.children.values() {
                if matches!(child.state, ChildState::Active) {
                    child.policy.handle_name_resolution_error(status.clone());
                }
            }
        });
    }

    /// True if every registered child is deactivated, or there are no children at all.
    pub fn all_children_deactivated(&self) -> bool {
        let reg = self.registry.lock();
        reg.children
            .values()
            .all(|child| matches!(child.state, ChildState::Deactivated { .. }))
    }

    pub fn child_count(&self) -> usize {
        self.registry.lock().children.len()
    }

    pub fn is_deactivated(&self, name: &str) -> Option<bool> {
        let reg = self.registry.lock();
        reg.children
            .get(name)
            .map(|child| matches!(child.state, ChildState::Deactivated { .. }))
    }
}

fn schedule_deletion_timer(
    sync_context: Arc<SyncContext>,
    registry: Arc<Mutex<Registry>>,
    name: String,
    generation: u64,
    deactivation_timeout: std::time::Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(deactivation_timeout).await;
        sync_context.execute(move || {
            let mut reg = registry.lock();
            let still_current = matches!(
                reg.children.get(&name),
                Some(ChildLb {
                    state: ChildState::Deactivated { generation: g },
                    ..
                }) if *g == generation
            );
            if !still_current {
                // Either the child was reactivated (generation bumped), re-deactivated under a
                // newer generation, or already removed. Either way this timer is stale.
                return;
            }
            if let Some(child) = reg.children.remove(&name) {
                log::info!("cluster_manager: deletion timer fired, removing child '{name}'");
                child.policy.shutdown();
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct RecordingPolicy {
        shut_down: Arc<AtomicBool>,
    }

    impl ChildPolicy for RecordingPolicy {
        fn update_config(&self, _policy_config: serde_json::Value) {}
        fn handle_name_resolution_error(&self, _status: Status) {}
        fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    fn manager() -> ClusterManager {
        ClusterManager::new(Arc::new(SyncContext::new()))
    }

    /// A manager whose deletion timer fires almost immediately, for tests that need to observe
    /// an actual firing rather than just the immediately-after-removal deactivated state.
    fn short_timeout_manager() -> ClusterManager {
        ClusterManager::with_deactivation_timeout(Arc::new(SyncContext::new()), Duration::from_millis(20))
    }

    async fn flush(manager: &ClusterManager) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        manager.sync_context.execute(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
    }

    fn update_with(names: &[&str]) -> BTreeMap<String, serde_json::Value> {
        names
            .iter()
            .map(|n| (n.to_string(), serde_json::json!({})))
            .collect()
    }

    #[tokio::test]
    async fn creates_children_on_first_mention() {
        let manager = manager();
        manager.accept_resolved_addresses(update_with(&["west"]), |_| {
            Arc::new(RecordingPolicy {
                shut_down: Arc::new(AtomicBool::new(false)),
            })
        });
        flush(&manager).await;
        assert_eq!(manager.child_count(), 1);
        assert_eq!(manager.is_deactivated("west"), Some(false));
    }

    #[tokio::test]
    async fn removed_child_is_deactivated_not_destroyed_immediately() {
        let manager = manager();
        let shut_down = Arc::new(AtomicBool::new(false));
        let shut_down2 = shut_down.clone();
        manager.accept_resolved_addresses(update_with(&["west"]), move |_| {
            Arc::new(RecordingPolicy {
                shut_down: shut_down2.clone(),
            })
        });
        flush(&manager).await;

        manager.accept_resolved_addresses(BTreeMap::new(), |_| unreachable!());
        flush(&manager).await;

        assert_eq!(manager.child_count(), 1);
        assert_eq!(manager.is_deactivated("west"), Some(true));
        assert!(!shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn reactivated_child_cancels_pending_deletion() {
        let manager = short_timeout_manager();
        let shut_down = Arc::new(AtomicBool::new(false));
        let shut_down2 = shut_down.clone();
        manager.accept_resolved_addresses(update_with(&["west"]), move |_| {
            Arc::new(RecordingPolicy {
                shut_down: shut_down2.clone(),
            })
        });
        flush(&manager).await;

        manager.accept_resolved_addresses(BTreeMap::new(), |_| unreachable!());
        flush(&manager).await;
        assert_eq!(manager.is_deactivated("west"), Some(true));

        manager.accept_resolved_addresses(update_with(&["west"]), |_| unreachable!());
        flush(&manager).await;
        assert_eq!(manager.is_deactivated("west"), Some(false));

        // Let the (now-stale) timer fire; it must observe the generation mismatch and leave the
        // reactivated child alone rather than deleting it.
        tokio::time::sleep(Duration::from_millis(60)).await;
        flush(&manager).await;
        assert_eq!(manager.child_count(), 1);
        assert!(!shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn deletion_timer_fires_and_removes_deactivated_child() {
        let manager = short_timeout_manager();
        let shut_down = Arc::new(AtomicBool::new(false));
        let shut_down2 = shut_down.clone();
        manager.accept_resolved_addresses(update_with(&["west"]), move |_| {
            Arc::new(RecordingPolicy {
                shut_down: shut_down2.clone(),
            })
        });
        flush(&manager).await;

        manager.accept_resolved_addresses(BTreeMap::new(), |_| unreachable!());
        flush(&manager).await;
        assert_eq!(manager.child_count(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        flush(&manager).await;
        assert_eq!(manager.child_count(), 0);
        assert!(shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn all_children_deactivated_reports_transient_failure_condition() {
        let manager = manager();
        assert!(manager.all_children_deactivated());

        manager.accept_resolved_addresses(update_with(&["west"]), |_| {
            Arc::new(RecordingPolicy {
                shut_down: Arc::new(AtomicBool::new(false)),
            })
        });
        flush(&manager).await;
        assert!(!manager.all_children_deactivated());

        manager.accept_resolved_addresses(BTreeMap::new(), |_| unreachable!());
        flush(&manager).await;
        assert!(manager.all_children_deactivated());
    }
}
