// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use opentelemetry::KeyValue;
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::metrics::attempt_tracer::{record_attempt_points, AttemptTracer, StreamInfo};
use crate::metrics::instruments::InstrumentSet;
use crate::status::GrpcStatusCode;

/// Per-logical-call aggregator: creates [`AttemptTracer`]s, counts attempts (including
/// transparent retries), and emits the call-level duration exactly once on completion.
///
/// One `CallAttemptsTracerFactory` is constructed per client call, at the same moment the
/// call's own clock starts; `call_ended` records `grpc.client.call.duration` relative to that
/// moment.
pub struct CallAttemptsTracerFactory {
    method: Arc<str>,
    instruments: Arc<InstrumentSet>,
    clock: Arc<dyn Clock>,
    start: std::time::Instant,
    attempt_count: AtomicU32,
    ended: AtomicBool,
    // Retained only while exactly one attempt has been created; cleared (set to `None`) as soon
    // as a second attempt starts, since the zero-stream synthesis in `call_ended` only applies
    // to the "no attempts" or "the single attempt never sent headers" cases.
    sole_attempt_headers_sent: Mutex<Option<Arc<AtomicBool>>>,
}

impl CallAttemptsTracerFactory {
    pub fn new(method: impl Into<Arc<str>>, instruments: Arc<InstrumentSet>, clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        CallAttemptsTracerFactory {
            method: method.into(),
            instruments,
            clock,
            start,
            attempt_count: AtomicU32::new(0),
            ended: AtomicBool::new(false),
            sole_attempt_headers_sent: Mutex::new(None),
        }
    }

    /// Creates a new attempt tracer and increments `grpc.client.attempt.started`, regardless of
    /// whether this is the first attempt, a regular retry, or a transparent retry.
    pub fn new_attempt(&self, stream_info: StreamInfo) -> AttemptTracer {
        let count = self.attempt_count.fetch_add(1, Ordering::AcqRel) + 1;

        self.instruments.attempt_started.add(
            1,
            &[KeyValue::new("grpc.method", self.method.to_string())],
        );

        let tracer = AttemptTracer::new(
            self.method.clone(),
            stream_info,
            self.instruments.clone(),
            self.clock.clone(),
        );

        let mut sole = self.sole_attempt_headers_sent.lock();
        *sole = if count == 1 {
            Some(tracer.headers_sent_flag())
        } else {
            None
        };

        tracer
    }

    /// Records exactly one `grpc.client.call.duration` point. A second call is a no-op.
    ///
    /// If no attempt was ever created, or the single attempt created never reached
    /// `outbound_headers`, this also synthesizes a zero-sized attempt record
    /// (`sent=0, rcvd=0, duration=0`) with the call's terminal status.
    pub fn call_ended(&self, status: GrpcStatusCode) {
        if self
            .ended
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let duration = self.clock.now().saturating_duration_since(self.start);
        self.instruments.call_duration.record(
            duration.as_secs_f64(),
            &[
                KeyValue::new("grpc.method", self.method.to_string()),
                KeyValue::new("grpc.status", status.as_str()),
            ],
        );

        let attempt_count = self.attempt_count.load(Ordering::Acquire);
        let no_attempt_ever_created = attempt_count == 0;
        let sole_attempt_never_sent_headers = attempt_count == 1 && {
            let sole = self.sole_attempt_headers_sent.lock();
            match sole.as_ref() {
                Some(flag) => !flag.load(Ordering::Acquire),
                None => false,
            }
        };

        if no_attempt_ever_created || sole_attempt_never_sent_headers {
            if no_attempt_ever_created {
                // `new_attempt` was never called, so `attempt.started` was never incremented for
                // this call; the synthetic record covers that too.
                self.instruments
                    .attempt_started
                    .add(1, &[KeyValue::new("grpc.method", self.method.to_string())]);
            }
            record_attempt_points(&self.instruments, &self.method, status, 0.0, 0, 0);
        }
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
    fn zero_stream_call_synthesizes_attempt_record() {
        let clock = Arc::new(FakeClock::new());
        let factory = CallAttemptsTracerFactory::new("pkg.Service/Method", instruments(), clock.clone());
        clock.advance_millis(3000);
        factory.call_ended(GrpcStatusCode::DeadlineExceeded);
        // Idempotent.
        factory.call_ended(GrpcStatusCode::DeadlineExceeded);
    }

    #[test]
    fn attempt_that_never_sends_headers_still_synthesizes() {
        let clock = Arc::new(FakeClock::new());
        let factory = CallAttemptsTracerFactory::new("pkg.Service/Method", instruments(), clock.clone());
        let _tracer = factory.new_attempt(StreamInfo::default());
        clock.advance_millis(50);
        factory.call_ended(GrpcStatusCode::Unavailable);
    }

    #[test]
    fn attempt_that_sends_headers_suppresses_synthesis() {
        let clock = Arc::new(FakeClock::new());
        let factory = CallAttemptsTracerFactory::new("pkg.Service/Method", instruments(), clock.clone());
        let tracer = factory.new_attempt(StreamInfo::default());
        tracer.outbound_headers();
        tracer.stream_closed(GrpcStatusCode::Ok);
        factory.call_ended(GrpcStatusCode::Ok);
    }

    #[test]
    fn multiple_attempts_each_count_toward_started() {
        let clock = Arc::new(FakeClock::new());
        let factory = CallAttemptsTracerFactory::new("pkg.Service/Method", instruments(), clock.clone());

        let statuses = [
            GrpcStatusCode::Unavailable,
            GrpcStatusCode::NotFound,
            GrpcStatusCode::Unavailable,
            GrpcStatusCode::Ok,
        ];
        for (i, status) in statuses.iter().enumerate() {
            let stream_info = StreamInfo {
                is_transparent_retry: i >= 1,
                name_resolution_delay: None,
            };
            let tracer = factory.new_attempt(stream_info);
            tracer.outbound_headers();
            clock.advance_millis(10);
            tracer.stream_closed(*status);
        }
        assert_eq!(factory.attempt_count.load(Ordering::Relaxed), 4);
        factory.call_ended(GrpcStatusCode::Ok);
    }
}
