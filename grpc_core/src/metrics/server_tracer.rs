// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use opentelemetry::KeyValue;

use crate::clock::Clock;
use crate::metrics::instruments::InstrumentSet;
use crate::status::GrpcStatusCode;

/// One tracer per server call; unlike the client side there are no retries, so this combines
/// what the client needs two collaborating types (factory + attempt tracer) for.
pub struct ServerCallTracer {
    method: Arc<str>,
    instruments: Arc<InstrumentSet>,
    clock: Arc<dyn Clock>,
    start: std::time::Instant,
    sent_bytes: AtomicU64,
    rcvd_bytes: AtomicU64,
    closed: AtomicBool,
}

impl ServerCallTracer {
    /// Construction alone increments `grpc.server.call.started`.
    pub fn new(method: impl Into<Arc<str>>, instruments: Arc<InstrumentSet>, clock: Arc<dyn Clock>) -> Self {
        let method = method.into();
        let start = clock.now();
        instruments
            .server_call_started
            .add(1, &[KeyValue::new("grpc.method", method.to_string())]);
        ServerCallTracer {
            method,
            instruments,
            clock,
            start,
            sent_bytes: AtomicU64::new(0),
            rcvd_bytes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Binds the method for the call. Redundant with the name given to [`Self::new`]; kept as a
    /// distinct call because the server transport observes call info slightly later than
    /// tracer construction, mirroring the source's double-bookkeeping.
    pub fn server_call_started(&self, method: &str) {
        debug_assert_eq!(method, &*self.method);
    }

    pub fn outbound_message(&self, _seq: u64) {}

    pub fn inbound_message(&self, _seq: u64) {}

    pub fn outbound_wire_size(&self, bytes: u64) {
        self.sent_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inbound_wire_size(&self, bytes: u64) {
        self.rcvd_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Finalizes the call, recording `call.duration`, `sent`, and `rcvd`. A second call is a
    /// no-op.
    pub fn stream_closed(&self, status: GrpcStatusCode) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let duration = self.clock.now().saturating_duration_since(self.start);
        let attrs = [
            KeyValue::new("grpc.method", self.method.to_string()),
            KeyValue::new("grpc.status", status.as_str()),
        ];
        self.instruments
            .server_call_duration
            .record(duration.as_secs_f64(), &attrs);
        self.instruments
            .server_sent
            .record(self.sent_bytes.load(Ordering::Relaxed), &attrs);
        self.instruments
            .server_rcvd
            .record(self.rcvd_bytes.load(Ordering::Relaxed), &attrs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn instruments() -> Arc<InstrumentSet> {
        let meter = opentelemetry::global::meter(crate::metrics::instruments::INSTRUMENTATION_SCOPE);
        Arc::new(InstrumentSet::new(&meter))
    }

    #[test]
    fn server_call_cancelled_mid_stream() {
        let clock = Arc::new(FakeClock::new());
        let tracer = ServerCallTracer::new("pkg.Service/Method", instruments(), clock.clone());
        tracer.server_call_started("pkg.Service/Method");

        tracer.inbound_message(0);
        tracer.inbound_wire_size(34);
        clock.advance_millis(100);
        tracer.outbound_message(0);
        tracer.outbound_wire_size(1028);
        clock.advance_millis(16);
        tracer.inbound_wire_size(154);
        tracer.outbound_wire_size(99);
        clock.advance_millis(24);
        tracer.stream_closed(GrpcStatusCode::Cancelled);

        assert_eq!(tracer.sent_bytes.load(Ordering::Relaxed), 1127);
        assert_eq!(tracer.rcvd_bytes.load(Ordering::Relaxed), 188);

        // Idempotent.
        tracer.stream_closed(GrpcStatusCode::Cancelled);
    }
}
