// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Adapts a long-lived bidirectional stream into a blocking (awaited) one-request-one-response
//! `send` primitive, used to talk to an external handshaker service. See SPEC_FULL §4.5, §9.
//!
//! The wire protocol and transport are out of scope (SPEC_FULL §1): callers provide a
//! [`HandshakeTransport`] that lazily opens the stream's write half, and drive [`HandshakerStub`]
//! by forwarding the transport's `onNext`/`onError`/`onCompleted` events into
//! [`HandshakerStub::on_next`], [`HandshakerStub::on_error`], and [`HandshakerStub::on_completed`].

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tonic::Status;

use crate::error::HandshakerError;

/// The deadline applied to the handshaker RPC at stream creation.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(20);

/// The write half of the bidirectional stream, opened lazily by [`HandshakerStub`].
#[async_trait]
pub trait HandshakeWriter<Req>: Send {
    /// Writes one request onto the stream.
    async fn send(&mut self, req: Req) -> Result<(), Status>;

    /// Half-closes the writer. Called at most once per writer.
    async fn close(&mut self);
}

/// Opens the bidirectional stream on demand, applying the given deadline to the RPC.
#[async_trait]
pub trait HandshakeTransport: Send + Sync {
    type Req: Send;
    type Resp: Send;
    type Writer: HandshakeWriter<Self::Req>;

    async fn open(&self, deadline: Duration) -> Result<Self::Writer, Status>;
}

enum Slot<Resp> {
    Empty,
    Response(Resp),
    /// A `None` sentinel was pushed by `on_error`/`on_completed`: the stream has ended.
    Ended,
}

/// One-in-flight-request adapter over a bidirectional handshaker stream.
///
/// `send` is serialized per instance by an async mutex (caller-serial, per SPEC_FULL §5); the
/// capacity-1 response slot plus the single terminal-error slot form the "minimal two-state
/// rendezvous" SPEC_FULL §9 calls out — it is not a queue, and a second unread response is a
/// protocol violation rather than something to buffer.
pub struct HandshakerStub<T: HandshakeTransport> {
    transport: T,
    writer: AsyncMutex<Option<T::Writer>>,
    send_lock: AsyncMutex<()>,
    slot: Mutex<Slot<T::Resp>>,
    notify: Notify,
    terminal_error: Mutex<Option<HandshakerError>>,
}

impl<T: HandshakeTransport> HandshakerStub<T> {
    pub fn new(transport: T) -> Self {
        HandshakerStub {
            transport,
            writer: AsyncMutex::new(None),
            send_lock: AsyncMutex::new(()),
            slot: Mutex::new(Slot::Empty),
            notify: Notify::new(),
            terminal_error: Mutex::new(None),
        }
    }

    /// Latches `err` as the terminal error, unless one is already latched (first error wins).
    fn latch_error(&self, err: HandshakerError) {
        let mut guard = self.terminal_error.lock();
        if guard.is_none() {
            log::warn!("handshaker: latching terminal error: {err}");
            *guard = Some(err);
        }
    }

    /// Sends `req` and awaits the single matching response.
    ///
    /// Fails immediately, without writing to the stream, if a terminal error is already latched
    /// or if a prior response sits unread in the response slot.
    pub async fn send(&self, req: T::Req) -> Result<T::Resp, HandshakerError> {
        // Serializes callers: at most one `send` proceeds past this point at a time.
        let _guard = self.send_lock.lock().await;

        if let Some(err) = self.terminal_error.lock().clone() {
            return Err(err);
        }

        {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Response(_) => {
                    let err = HandshakerError::UnexpectedResponse;
                    self.latch_error(err.clone());
                    return Err(err);
                }
                Slot::Ended => {
                    // `on_error`/`on_completed` raced with this `send` past the earlier
                    // `terminal_error` check. The slot must not be reset to `Empty` here: doing
                    // so would discard the terminal condition and this call would go on to write
                    // to (or wait on) a stream that has already ended, deadlocking on a
                    // `notify_waiters()` permit no one will ever send again.
                    drop(slot);
                    let err = self.terminal_error.lock().clone().unwrap_or_else(|| {
                        HandshakerError::StreamTerminated("response stream closed".to_owned())
                    });
                    return Err(err);
                }
                Slot::Empty => {}
            }
            *slot = Slot::Empty;
        }

        // Lazily open the stream, applying the fixed deadline to the RPC.
        {
            let mut writer_guard = self.writer.lock().await;
            if writer_guard.is_none() {
                match tokio::time::timeout(HANDSHAKE_DEADLINE, self.transport.open(HANDSHAKE_DEADLINE)).await {
                    Ok(Ok(writer)) => *writer_guard = Some(writer),
                    Ok(Err(status)) => {
                        let err = HandshakerError::StreamTerminated(status.to_string());
                        self.latch_error(err.clone());
                        return Err(err);
                    }
                    Err(_elapsed) => {
                        let err = HandshakerError::StreamTerminated(
                            "deadline exceeded opening handshaker stream".to_owned(),
                        );
                        self.latch_error(err.clone());
                        return Err(err);
                    }
                }
            }

            let writer = writer_guard.as_mut().expect("writer just populated");
            if let Err(status) = writer.send(req).await {
                let err = HandshakerError::StreamTerminated(status.to_string());
                self.latch_error(err.clone());
                return Err(err);
            }
        }

        // Await the response slot being filled, or a `None` sentinel from on_error/on_completed.
        loop {
            {
                let mut slot = self.slot.lock();
                match std::mem::replace(&mut *slot, Slot::Empty) {
                    Slot::Response(resp) => return Ok(resp),
                    Slot::Ended => {
                        let err = self
                            .terminal_error
                            .lock()
                            .clone()
                            .unwrap_or_else(|| {
                                HandshakerError::StreamTerminated("response stream closed".to_owned())
                            });
                        return Err(err);
                    }
                    Slot::Empty => {
                        // Put it back empty and wait for a notification.
                        *slot = Slot::Empty;
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    /// Places `resp` in the response slot. If the slot was already full (an unsolicited second
    /// response), latches [`HandshakerError::UnexpectedResponse`] and closes the writer instead.
    pub async fn on_next(&self, resp: T::Resp) {
        let overflowed = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Response(_) => true,
                _ => {
                    *slot = Slot::Response(resp);
                    false
                }
            }
        };

        if overflowed {
            self.latch_error(HandshakerError::UnexpectedResponse);
            self.close().await;
        }
        self.notify.notify_waiters();
    }

    /// Latches a terminating error and pushes a `None` sentinel to unblock any waiting `send`.
    pub fn on_error(&self, cause: impl std::fmt::Display) {
        self.latch_error(HandshakerError::StreamTerminated(cause.to_string()));
        *self.slot.lock() = Slot::Ended;
        self.notify.notify_waiters();
    }

    /// Latches "response stream closed" and pushes a `None` sentinel to unblock any waiting
    /// `send`.
    pub fn on_completed(&self) {
        self.latch_error(HandshakerError::StreamTerminated(
            "response stream closed".to_owned(),
        ));
        *self.slot.lock() = Slot::Ended;
        self.notify.notify_waiters();
    }

    /// Idempotently half-closes the writer, if one has been opened.
    pub async fn close(&self) {
        let mut writer_guard = self.writer.lock().await;
        if let Some(mut writer) = writer_guard.take() {
            writer.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Req(u32);
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Resp(u32);

    struct FakeWriter {
        sent: mpsc::UnboundedSender<Req>,
        closed: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl HandshakeWriter<Req> for FakeWriter {
        async fn send(&mut self, req: Req) -> Result<(), Status> {
            self.sent.send(req).map_err(|_| Status::unavailable("closed"))
        }

        async fn close(&mut self) {
            self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    struct FakeTransport {
        sent: mpsc::UnboundedSender<Req>,
        closed: Arc<std::sync::atomic::AtomicBool>,
        fail_open: bool,
    }

    #[async_trait]
    impl HandshakeTransport for FakeTransport {
        type Req = Req;
        type Resp = Resp;
        type Writer = FakeWriter;

        async fn open(&self, _deadline: Duration) -> Result<Self::Writer, Status> {
            if self.fail_open {
                return Err(Status::unavailable("no route to handshaker"));
            }
            Ok(FakeWriter {
                sent: self.sent.clone(),
                closed: self.closed.clone(),
            })
        }
    }

    fn stub() -> (HandshakerStub<FakeTransport>, mpsc::UnboundedReceiver<Req>, Arc<std::sync::atomic::AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stub = HandshakerStub::new(FakeTransport {
            sent: tx,
            closed: closed.clone(),
            fail_open: false,
        });
        (stub, rx, closed)
    }

    #[tokio::test]
    async fn send_then_on_next_completes_the_request() {
        let (stub, mut rx, _closed) = stub();
        let stub = Arc::new(stub);

        let stub2 = stub.clone();
        let send_fut = tokio::spawn(async move { stub2.send(Req(1)).await });

        let sent_req = rx.recv().await.unwrap();
        assert_eq!(sent_req, Req(1));
        stub.on_next(Resp(42)).await;

        let resp = send_fut.await.unwrap().unwrap();
        assert_eq!(resp, Resp(42));
    }

    #[tokio::test]
    async fn second_send_fails_while_response_unread() {
        let (stub, mut rx, _closed) = stub();

        // Bypass the normal request/response rhythm by manually stuffing the slot full, as if
        // `on_next` fired twice without an intervening `send` draining it.
        stub.on_next(Resp(1)).await;
        stub.on_next(Resp(2)).await;
        let _ = rx.try_recv();

        let err = stub.send(Req(1)).await.unwrap_err();
        assert_eq!(err, HandshakerError::UnexpectedResponse);
    }

    #[tokio::test]
    async fn on_error_unblocks_waiting_send_with_terminal_error() {
        let (stub, mut rx, _closed) = stub();
        let stub = Arc::new(stub);

        let stub2 = stub.clone();
        let send_fut = tokio::spawn(async move { stub2.send(Req(7)).await });
        let _ = rx.recv().await.unwrap();
        stub.on_error("upstream reset");

        let err = send_fut.await.unwrap().unwrap_err();
        assert!(matches!(err, HandshakerError::StreamTerminated(_)));

        // Subsequent sends observe the same latched error without writing to the stream.
        let err2 = stub.send(Req(8)).await.unwrap_err();
        assert_eq!(err, err2);
    }

    #[tokio::test]
    async fn on_completed_unblocks_waiting_send() {
        let (stub, mut rx, _closed) = stub();
        let stub = Arc::new(stub);

        let stub2 = stub.clone();
        let send_fut = tokio::spawn(async move { stub2.send(Req(3)).await });
        let _ = rx.recv().await.unwrap();
        stub.on_completed();

        let err = send_fut.await.unwrap().unwrap_err();
        assert!(matches!(err, HandshakerError::StreamTerminated(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_half_closes_writer() {
        let (stub, mut rx, closed) = stub();
        let stub = Arc::new(stub);

        let stub2 = stub.clone();
        let send_fut = tokio::spawn(async move { stub2.send(Req(5)).await });
        let _ = rx.recv().await.unwrap();
        stub.on_next(Resp(5)).await;
        send_fut.await.unwrap().unwrap();

        stub.close().await;
        stub.close().await;
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_stream_open_latches_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stub = HandshakerStub::new(FakeTransport {
            sent: tx,
            closed,
            fail_open: true,
        });

        let err = stub.send(Req(1)).await.unwrap_err();
        assert!(matches!(err, HandshakerError::StreamTerminated(_)));
    }

    /// Reproduces the race from SPEC_FULL §5: `on_error`/`on_completed` can push the `Ended`
    /// sentinel in the window between a `send`'s own (passing) `terminal_error` check and its
    /// slot check — so `send` reaches the slot match with `terminal_error` still unset. `send`
    /// must observe `Ended` and return an error rather than resetting the slot to `Empty` and
    /// proceeding to await a `notify_waiters()` permit nobody will ever send again.
    #[tokio::test]
    async fn send_observing_ended_slot_returns_error_instead_of_hanging() {
        let (stub, _rx, _closed) = stub();

        // Simulate the state left behind by `on_completed`/`on_error` having run in that window,
        // without going through `latch_error` first — this is exactly the state `send`'s earlier
        // `terminal_error` check would have missed.
        *stub.slot.lock() = Slot::Ended;

        let result = tokio::time::timeout(Duration::from_millis(200), stub.send(Req(1))).await;
        let err = result
            .expect("send must return promptly instead of hanging on a stale Ended slot")
            .unwrap_err();
        assert!(matches!(err, HandshakerError::StreamTerminated(_)));
    }
}
