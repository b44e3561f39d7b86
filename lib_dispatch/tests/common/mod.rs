//! Shared fixtures for the dispatcher integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lib_dispatch::core::clock::ManualClock;
use lib_dispatch::{
    Dispatcher, MemoryStore, Settings, TransportAdapter, TransportError, TransportRequest, TransportResponse,
};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

/// Transport that replays scripted outcomes and records every request.
///
/// When gated, each call blocks until [`ScriptedTransport::open`] hands out a permit.
/// Once the script is empty every call answers `200 {"code": 0, "data": <url>}`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    seen: Mutex<Vec<TransportRequest>>,
    gate: Option<Semaphore>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self::build(Some(Semaphore::new(0))))
    }

    fn build(gate: Option<Semaphore>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
            gate,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, outcome: Result<TransportResponse, TransportError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn push_status(&self, status: u16, body: Value) {
        self.push(Ok(TransportResponse::new(status, body)));
    }

    /// Lets `n` blocked calls complete.
    pub fn open(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<TransportRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn last(&self) -> TransportRequest {
        self.seen.lock().unwrap().last().cloned().expect("no request was sent")
    }

    pub fn started_urls(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|r| r.url.clone()).collect()
    }

    /// Highest number of calls observed executing at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportAdapter for ScriptedTransport {
    async fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        self.seen.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(TransportResponse::new(200, json!({"code": 0, "data": request.url}))))
    }
}

/// Builds a dispatcher over `transport` with a manual clock and an in-memory store.
pub fn dispatcher(transport: Arc<ScriptedTransport>, clock: ManualClock, settings: Settings) -> Dispatcher {
    Dispatcher::builder(transport)
        .settings(settings)
        .clock(Arc::new(clock))
        .store(Arc::new(MemoryStore::new()))
        .build()
        .expect("valid settings")
}

/// Yields to the runtime until `cond` holds.
pub async fn settle_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// 32-byte payload key in hex.
pub const TEST_KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
