// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Cluster-manager load balancer: a child-balancer registry with deferred deletion, a
//! cluster-dispatch picker over the registry's current pickers, and the serial executor both
//! run on. See SPEC_FULL.md §4.6-4.8, §4.10.

pub mod cluster_manager;
pub mod config;
pub mod picker;
pub mod sync_context;

pub use cluster_manager::{ChildPolicy, ClusterManager, DEACTIVATION_TIMEOUT};
pub use config::{new_pick_first_enabled, ChildPolicyConfig, ClusterManagerConfig, PickFirstConfig};
pub use picker::{ChildPickResult, ChildPicker, ClusterDispatchPicker, CLUSTER_SELECTION_KEY};
pub use sync_context::SyncContext;
