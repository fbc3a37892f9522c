//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use chrono::{DateTime, Utc};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

use admission_guard::blocking::types::{IpBlockInfo, IpViolation};
use admission_guard::clock::{Clock, ManualClock};
use admission_guard::config::schema::GuardConfig;
use admission_guard::pipeline::{AdmissionPipeline, Stores};
use admission_guard::ratelimit::{RateLimitConfig, Scope, Strategy};
use admission_guard::store::{
    BlockRegistry, BucketSpec, BucketState, CounterHit, CounterStore, MemoryBlockRegistry, MemoryCounterStore,
    MemoryViolationLog, StoreError, StoreResult, ViolationLog,
};

pub const START_MILLIS: i64 = 1_700_000_000_000;

/// A store whose every call fails.
#[derive(Debug, Default)]
pub struct FailingStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("connection refused".into()))
}

#[async_trait]
impl CounterStore for FailingStore {
    async fn incr(&self, _key: &str, _ttl: Duration) -> StoreResult<CounterHit> {
        down()
    }

    async fn get(&self, _key: &str) -> StoreResult<Option<u64>> {
        down()
    }

    async fn delete(&self, _key: &str) -> StoreResult<()> {
        down()
    }

    async fn take_token(&self, _key: &str, _spec: BucketSpec, _now_ms: i64) -> StoreResult<BucketState> {
        down()
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}

#[async_trait]
impl ViolationLog for FailingStore {
    async fn append(&self, _violation: &IpViolation, _retention: Duration) -> StoreResult<()> {
        down()
    }

    async fn since(&self, _ip: IpAddr, _since: DateTime<Utc>) -> StoreResult<Vec<IpViolation>> {
        down()
    }
}

#[async_trait]
impl BlockRegistry for FailingStore {
    async fn get(&self, _ip: IpAddr) -> StoreResult<Option<IpBlockInfo>> {
        down()
    }

    async fn put(&self, _info: &IpBlockInfo, _ttl: Duration) -> StoreResult<Option<IpBlockInfo>> {
        down()
    }

    async fn remove(&self, _ip: IpAddr) -> StoreResult<Option<IpBlockInfo>> {
        down()
    }

    async fn list(&self) -> StoreResult<Vec<IpBlockInfo>> {
        down()
    }
}

/// A counter store that never answers within any sane deadline.
#[derive(Debug, Default)]
pub struct SlowStore;

#[async_trait]
impl CounterStore for SlowStore {
    async fn incr(&self, _key: &str, _ttl: Duration) -> StoreResult<CounterHit> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        down()
    }

    async fn get(&self, _key: &str) -> StoreResult<Option<u64>> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        down()
    }

    async fn delete(&self, _key: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn take_token(&self, _key: &str, _spec: BucketSpec, _now_ms: i64) -> StoreResult<BucketState> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        down()
    }

    fn backend(&self) -> &'static str {
        "slow"
    }
}

/// Pipeline on in-memory stores with a hand-driven clock.
pub struct Harness {
    pub pipeline: Arc<AdmissionPipeline>,
    pub clock: Arc<ManualClock>,
}

pub fn memory_stores(clock: Arc<ManualClock>) -> Stores {
    Stores {
        counters: Arc::new(MemoryCounterStore::new(clock.clone())),
        violations: Arc::new(MemoryViolationLog::new()),
        blocks: Arc::new(MemoryBlockRegistry::new(clock)),
    }
}

pub fn harness(config: &GuardConfig) -> Harness {
    let clock = Arc::new(ManualClock::at_millis(START_MILLIS));
    let stores = memory_stores(clock.clone());
    harness_with(config, stores, clock)
}

pub fn harness_with(config: &GuardConfig, stores: Stores, clock: Arc<ManualClock>) -> Harness {
    let pipeline = AdmissionPipeline::new(config, stores, clock.clone() as Arc<dyn Clock>)
        .expect("valid test config");
    Harness {
        pipeline: Arc::new(pipeline),
        clock,
    }
}

/// Config with a single anonymous policy and no endpoint overrides.
pub fn config_with(limit: RateLimitConfig) -> GuardConfig {
    let mut config = GuardConfig::default();
    config.rate_limit.roles.insert("anonymous".into(), limit);
    config.rate_limit.endpoints.clear();
    config
}

pub fn fixed_window(window_ms: u64, max: u64) -> GuardConfig {
    config_with(RateLimitConfig::new(window_ms, max, Strategy::FixedWindow, Scope::Ip))
}

pub fn ip(last: u8) -> IpAddr {
    IpAddr::from([203, 0, 113, last])
}

/// An HTTP request as it would arrive from `peer`.
pub fn request_from(peer: IpAddr, uri: &str) -> Request<Body> {
    let mut request = Request::builder().uri(uri).body(Body::empty()).expect("request");
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::new(peer, 40_000)));
    request
}

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Install as the thread-default subscriber for the returned guard's lifetime.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
