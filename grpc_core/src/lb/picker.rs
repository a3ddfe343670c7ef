// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Cluster-dispatch picker.
//!
//! Stateless wrapper over a snapshot of child pickers, published as an `arc_swap::ArcSwap` so
//! that picks racing with an update observe either the pre- or post-update snapshot, never a
//! torn mix.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::PickError;

/// The call-options key consulted by the cluster-dispatch picker.
pub const CLUSTER_SELECTION_KEY: &str = "cluster-selection";

/// A child balancer's own pick decision. Opaque to this crate's picker; real child policies
/// (out of scope here, see `lb::cluster_manager::ChildPolicy`) would return something richer
/// than a bare subchannel identifier.
pub type ChildPickResult = String;

/// A child picker delegated to once the cluster-dispatch picker has resolved a cluster name.
pub trait ChildPicker: Send + Sync {
    fn pick(&self) -> ChildPickResult;
}

/// Routes each pick to the child picker named by the call's `cluster-selection` attribute.
pub struct ClusterDispatchPicker {
    snapshot: ArcSwap<HashMap<String, Arc<dyn ChildPicker>>>,
}

impl ClusterDispatchPicker {
    pub fn new() -> Self {
        ClusterDispatchPicker {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Atomically replaces the entire set of child pickers. Readers racing with this call see
    /// either the old or new map in full, never a mix of the two.
    pub fn update(&self, children: HashMap<String, Arc<dyn ChildPicker>>) {
        self.snapshot.store(Arc::new(children));
    }

    /// Looks up `cluster_name` in the current snapshot and delegates to it, or returns
    /// [`PickError::ChildAbsent`] if no child picker is registered under that name.
    pub fn pick(&self, cluster_name: &str) -> Result<ChildPickResult, PickError> {
        let snapshot = self.snapshot.load();
        match snapshot.get(cluster_name) {
            Some(child) => Ok(child.pick()),
            None => Err(PickError::ChildAbsent {
                cluster_name: cluster_name.to_owned(),
            }),
        }
    }
}

impl Default for ClusterDispatchPicker {
    fn default() -> Self {
        Self::new()
    }
}
