// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A serial executor that load-balancer state mutations run on, so that cluster-manager
//! registrations, deactivations, and deletions never interleave.
//!
//! Modeled as a single actor task draining an unbounded queue of boxed closures: callers hand
//! work to the queue and move on, while a lone task applies it serially.

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queues closures onto a single background task, guaranteeing they run one at a time and in
/// the order they were submitted.
pub struct SyncContext {
    sender: UnboundedSender<Job>,
    _actor: JoinHandle<()>,
}

impl SyncContext {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let actor = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job();
            }
        });
        SyncContext { sender, _actor: actor }
    }

    /// Schedules `job` to run on the serial executor. Never blocks the caller.
    ///
    /// A send failure means the executor task has already shut down (the `SyncContext` was
    /// dropped); this is silently ignored.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.sender.send(Box::new(job));
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new()
    }
}
