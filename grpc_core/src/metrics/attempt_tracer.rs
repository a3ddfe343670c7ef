// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;

use crate::clock::Clock;
use crate::metrics::instruments::InstrumentSet;
use crate::status::GrpcStatusCode;

/// Per-attempt metadata supplied by the transport at attempt creation.
#[derive(Clone, Debug, Default)]
pub struct StreamInfo {
    /// True when this attempt is a transparent retry: one performed before any response headers
    /// were observed on the prior attempt. Transparent retries still count as attempts for the
    /// `grpc.client.attempt.started` counter.
    pub is_transparent_retry: bool,

    /// Delay incurred by name resolution before this attempt could start, if any. Carried
    /// through for completeness but does not currently feed a distinct metric.
    pub name_resolution_delay: Option<Duration>,
}

/// Records byte counters and the terminal status of a single network attempt.
///
/// Accumulators are plain atomics — no per-tracer mutex — since `outbound_wire_size` and
/// `inbound_wire_size` are expected to be called from a transport's stream thread while
/// `stream_closed` finalizes from that same thread; the `closed` flag is the single atomic
/// state machine that makes `stream_closed` idempotent.
pub struct AttemptTracer {
    method: Arc<str>,
    instruments: Arc<InstrumentSet>,
    clock: Arc<dyn Clock>,
    start: std::time::Instant,
    sent_bytes: AtomicU64,
    rcvd_bytes: AtomicU64,
    headers_sent: Arc<AtomicBool>,
    closed: AtomicBool,
    #[allow(dead_code)]
    stream_info: StreamInfo,
}

impl AttemptTracer {
    pub(crate) fn new(
        method: Arc<str>,
        stream_info: StreamInfo,
        instruments: Arc<InstrumentSet>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let start = clock.now();
        AttemptTracer {
            method,
            instruments,
            clock,
            start,
            sent_bytes: AtomicU64::new(0),
            rcvd_bytes: AtomicU64::new(0),
            headers_sent: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            stream_info,
        }
    }

    /// A clone of the headers-sent flag, retained by the call factory so it can decide whether
    /// to synthesize a zero-sized attempt record at `callEnded`.
    pub(crate) fn headers_sent_flag(&self) -> Arc<AtomicBool> {
        self.headers_sent.clone()
    }

    /// Marks that outbound headers were sent for this attempt. No direct metric emission; it
    /// exists so the parent call factory can observe whether the attempt ever "started" for
    /// purposes of the zero-stream synthesis.
    pub fn outbound_headers(&self) {
        self.headers_sent.store(true, Ordering::Relaxed);
    }

    /// Message-count events carry no metric weight; only wire sizes are accumulated.
    pub fn outbound_message(&self, _seq: u64) {}

    /// Message-count events carry no metric weight; only wire sizes are accumulated.
    pub fn inbound_message(&self, _seq: u64) {}

    pub fn outbound_wire_size(&self, bytes: u64) {
        self.sent_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inbound_wire_size(&self, bytes: u64) {
        self.rcvd_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Finalizes the attempt, recording exactly three histogram points. A second call (and any
    /// call after the first) is a no-op.
    pub fn stream_closed(&self, status: GrpcStatusCode) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let duration = self.clock.now().saturating_duration_since(self.start);
        let sent = self.sent_bytes.load(Ordering::Relaxed);
        let rcvd = self.rcvd_bytes.load(Ordering::Relaxed);
        record_attempt_points(
            &self.instruments,
            &self.method,
            status,
            duration.as_secs_f64(),
            sent,
            rcvd,
        );
    }
}

/// Shared by both the real attempt path (`stream_closed`) and the call factory's zero-stream
/// synthesis, so both routes produce identically-shaped points.
pub(crate) fn record_attempt_points(
    instruments: &InstrumentSet,
    method: &str,
    status: GrpcStatusCode,
    duration_secs: f64,
    sent_bytes: u64,
    rcvd_bytes: u64,
) {
    let attrs = [
        KeyValue::new("grpc.method", method.to_owned()),
        KeyValue::new("grpc.status", status.as_str()),
    ];
    instruments.attempt_duration.record(duration_secs, &attrs);
    instruments.attempt_sent.record(sent_bytes, &attrs);
    instruments.attempt_rcvd.record(rcvd_bytes, &attrs);
}
