// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use opentelemetry::metrics::{Counter, Histogram, Meter, Unit};

/// The fixed instrumentation-scope identifier that every `InstrumentSet` is built from.
pub const INSTRUMENTATION_SCOPE: &str = "grpc-core";

pub const ATTEMPT_STARTED_NAME: &str = "grpc.client.attempt.started";
pub const ATTEMPT_DURATION_NAME: &str = "grpc.client.attempt.duration";
pub const ATTEMPT_SENT_NAME: &str = "grpc.client.attempt.sent_total_compressed_message_size";
pub const ATTEMPT_RCVD_NAME: &str = "grpc.client.attempt.rcvd_total_compressed_message_size";
pub const CALL_DURATION_NAME: &str = "grpc.client.call.duration";
pub const SERVER_CALL_STARTED_NAME: &str = "grpc.server.call.started";
pub const SERVER_CALL_DURATION_NAME: &str = "grpc.server.call.duration";
pub const SERVER_SENT_NAME: &str = "grpc.server.call.sent_total_compressed_message_size";
pub const SERVER_RCVD_NAME: &str = "grpc.server.call.rcvd_total_compressed_message_size";

/// The fixed bundle of client- and server-side gRPC metric instruments.
///
/// Built once per process from a `Meter` bound to [`INSTRUMENTATION_SCOPE`] and shared (by
/// reference or `Arc`) with every attempt/call/server tracer. Construction is infallible: the
/// stable `opentelemetry` metrics API used here cannot fail when building an instrument.
pub struct InstrumentSet {
    pub(crate) attempt_started: Counter<u64>,
    pub(crate) attempt_duration: Histogram<f64>,
    pub(crate) attempt_sent: Histogram<u64>,
    pub(crate) attempt_rcvd: Histogram<u64>,
    pub(crate) call_duration: Histogram<f64>,
    pub(crate) server_call_started: Counter<u64>,
    pub(crate) server_call_duration: Histogram<f64>,
    pub(crate) server_sent: Histogram<u64>,
    pub(crate) server_rcvd: Histogram<u64>,
}

impl InstrumentSet {
    /// Build the fixed instrument bundle against the given `Meter`.
    ///
    /// Callers should obtain `meter` via `opentelemetry::global::meter(INSTRUMENTATION_SCOPE)`
    /// (or an explicit `MeterProvider`), and build exactly one `InstrumentSet` per process.
    pub fn new(meter: &Meter) -> Self {
        InstrumentSet {
            attempt_started: meter
                .u64_counter(ATTEMPT_STARTED_NAME)
                .with_description("Number of client call attempts started")
                .with_unit(Unit::new("{attempt}"))
                .init(),
            attempt_duration: meter
                .f64_histogram(ATTEMPT_DURATION_NAME)
                .with_description("End-to-end time taken to complete a client call attempt")
                .with_unit(Unit::new("s"))
                .init(),
            attempt_sent: meter
                .u64_histogram(ATTEMPT_SENT_NAME)
                .with_description("Compressed message bytes sent per client call attempt")
                .with_unit(Unit::new("By"))
                .init(),
            attempt_rcvd: meter
                .u64_histogram(ATTEMPT_RCVD_NAME)
                .with_description("Compressed message bytes received per client call attempt")
                .with_unit(Unit::new("By"))
                .init(),
            call_duration: meter
                .f64_histogram(CALL_DURATION_NAME)
                .with_description("Time taken by a client call, including all attempts")
                .with_unit(Unit::new("s"))
                .init(),
            server_call_started: meter
                .u64_counter(SERVER_CALL_STARTED_NAME)
                .with_description("Number of server calls started")
                .with_unit(Unit::new("{call}"))
                .init(),
            server_call_duration: meter
                .f64_histogram(SERVER_CALL_DURATION_NAME)
                .with_description("Time taken to complete a server call")
                .with_unit(Unit::new("s"))
                .init(),
            server_sent: meter
                .u64_histogram(SERVER_SENT_NAME)
                .with_description("Compressed message bytes sent per server call")
                .with_unit(Unit::new("By"))
                .init(),
            server_rcvd: meter
                .u64_histogram(SERVER_RCVD_NAME)
                .with_description("Compressed message bytes received per server call")
                .with_unit(Unit::new("By"))
                .init(),
        }
    }
}
