// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

//! Runtime core for gRPC clients and servers: per-attempt and per-call metrics recorders, a
//! cluster-manager load balancer with deferred child deletion, and a bidirectional handshaker
//! adapter. See `SPEC_FULL.md` for the full component contracts.

pub mod clock;
pub mod error;
pub mod handshaker;
pub mod lb;
pub mod logging;
pub mod metrics;
pub mod status;
