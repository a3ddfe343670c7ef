// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! JSON-shaped balancer configuration. See SPEC_FULL §4.10, §6.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigParseError;

/// `{policyProvider, policyConfig}` for a single cluster-manager child, per §6's
/// `{clusterName: string → {policyProvider, policyConfig}}` schema. `policy_config` is left
/// opaque (`serde_json::Value`) since its shape is defined by whichever child policy
/// `policy_provider` names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChildPolicyConfig {
    pub policy_provider: String,
    #[serde(default)]
    pub policy_config: Value,
}

/// The cluster-manager balancer's own configuration payload, published on every
/// `accept_resolved_addresses` update.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterManagerConfig {
    pub children: BTreeMap<String, ChildPolicyConfig>,
}

impl ClusterManagerConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigParseError> {
        serde_json::from_str(raw).map_err(ConfigParseError::from)
    }

    pub fn to_json(&self) -> Result<String, ConfigParseError> {
        serde_json::to_string(self).map_err(ConfigParseError::from)
    }
}

/// The pick-first child policy's own (optional) configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PickFirstConfig {
    #[serde(default)]
    pub shuffle_address_list: bool,
}

impl PickFirstConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigParseError> {
        serde_json::from_str(raw).map_err(ConfigParseError::from)
    }
}

const NEW_PICK_FIRST_ENV_VAR: &str = "GRPC_EXPERIMENTAL_ENABLE_NEW_PICK_FIRST";

/// Reads `GRPC_EXPERIMENTAL_ENABLE_NEW_PICK_FIRST` case-insensitively, defaulting to `false`
/// when unset or unparseable.
pub fn new_pick_first_enabled() -> bool {
    std::env::var(NEW_PICK_FIRST_ENV_VAR)
        .map(|val| val.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
