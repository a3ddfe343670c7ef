// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! OpenTelemetry-shaped per-attempt and per-call metrics recorders for client and server RPCs.
//!
//! [`InstrumentSet`] is built once per process; [`CallAttemptsTracerFactory`] owns one client
//! call's attempts (including retries); [`ServerCallTracer`] is the simpler no-retries
//! server-side mirror.

mod attempt_tracer;
mod call_tracer;
mod instruments;
mod server_tracer;

pub use attempt_tracer::{AttemptTracer, StreamInfo};
pub use call_tracer::CallAttemptsTracerFactory;
pub use instruments::{InstrumentSet, INSTRUMENTATION_SCOPE};
pub use server_tracer::ServerCallTracer;
