//! Test doubles for the core ports. Enabled with the `testing` feature so the
//! infra and server crates can reuse them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;

use crate::domain::RateLimitKey;
use crate::ports::{
    Clock, FragmentStream, Incident, IncidentReporter, InferenceError, InferenceProvider,
    InferenceRequest, WindowStore, WindowStoreError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock that only moves when told to. Starts at 2025-01-01T00:00:00Z.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Unsorted in-memory event log relying on the trait's default
/// `check_and_record`. An optional latency widens race windows.
#[derive(Debug, Default)]
pub struct VecWindowStore {
    events: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    latency: Option<Duration>,
}

impl VecWindowStore {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn len(&self, key: &RateLimitKey) -> usize {
        lock(&self.events).get(key.as_str()).map_or(0, Vec::len)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl WindowStore for VecWindowStore {
    async fn count(&self, key: &RateLimitKey, since: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        self.delay().await;
        let events = lock(&self.events);
        Ok(events
            .get(key.as_str())
            .map_or(0, |log| log.iter().filter(|at| **at >= since).count() as u64))
    }

    async fn oldest(
        &self,
        key: &RateLimitKey,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, WindowStoreError> {
        let events = lock(&self.events);
        Ok(events
            .get(key.as_str())
            .and_then(|log| log.iter().filter(|at| **at >= since).min().copied()))
    }

    async fn record(&self, key: &RateLimitKey, at: DateTime<Utc>) -> Result<(), WindowStoreError> {
        self.delay().await;
        lock(&self.events)
            .entry(key.as_str().to_string())
            .or_default()
            .push(at);
        Ok(())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        let mut events = lock(&self.events);
        let mut removed = 0;
        events.retain(|_, log| {
            let len = log.len();
            log.retain(|at| *at >= before);
            removed += (len - log.len()) as u64;
            !log.is_empty()
        });
        Ok(removed)
    }
}

/// Store whose every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingWindowStore;

#[async_trait]
impl WindowStore for FailingWindowStore {
    async fn count(&self, _: &RateLimitKey, _: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        Err(WindowStoreError::Unavailable("connection refused".into()))
    }

    async fn oldest(
        &self,
        _: &RateLimitKey,
        _: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, WindowStoreError> {
        Err(WindowStoreError::Unavailable("connection refused".into()))
    }

    async fn record(&self, _: &RateLimitKey, _: DateTime<Utc>) -> Result<(), WindowStoreError> {
        Err(WindowStoreError::Unavailable("connection refused".into()))
    }

    async fn prune(&self, _: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        Err(WindowStoreError::Unavailable("connection refused".into()))
    }
}

/// Which call a [`FlakyWindowStore`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Oldest,
    Record,
}

/// Wraps a [`VecWindowStore`] and fails one kind of call, so the count
/// succeeds against whatever history the inner store holds.
#[derive(Debug)]
pub struct FlakyWindowStore {
    inner: VecWindowStore,
    fail_at: FailAt,
}

impl FlakyWindowStore {
    pub fn new(inner: VecWindowStore, fail_at: FailAt) -> Self {
        Self { inner, fail_at }
    }

    pub fn inner(&self) -> &VecWindowStore {
        &self.inner
    }

    fn fail(&self, at: FailAt) -> Result<(), WindowStoreError> {
        if self.fail_at == at {
            return Err(WindowStoreError::Unavailable("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl WindowStore for FlakyWindowStore {
    async fn count(&self, key: &RateLimitKey, since: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        self.inner.count(key, since).await
    }

    async fn oldest(
        &self,
        key: &RateLimitKey,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, WindowStoreError> {
        self.fail(FailAt::Oldest)?;
        self.inner.oldest(key, since).await
    }

    async fn record(&self, key: &RateLimitKey, at: DateTime<Utc>) -> Result<(), WindowStoreError> {
        self.fail(FailAt::Record)?;
        self.inner.record(key, at).await
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        self.inner.prune(before).await
    }
}

/// Keeps every reported incident.
#[derive(Debug, Default)]
pub struct RecordingIncidents {
    seen: Mutex<Vec<Incident>>,
}

impl RecordingIncidents {
    pub fn take(&self) -> Vec<Incident> {
        std::mem::take(&mut *lock(&self.seen))
    }
}

impl IncidentReporter for RecordingIncidents {
    fn report(&self, incident: Incident) {
        lock(&self.seen).push(incident);
    }
}

/// One scripted upstream event.
#[derive(Debug, Clone)]
pub enum Step {
    Fragment(String),
    Fail(InferenceError),
    Pause(Duration),
    /// Never yields again.
    Hang,
}

impl Step {
    pub fn fragment(text: &str) -> Self {
        Step::Fragment(text.to_string())
    }
}

/// Provider that replays a fixed script for every call.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Vec<Step>,
    open_error: Option<InferenceError>,
    completion: Option<String>,
    calls: AtomicUsize,
    pulled: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn fragments(fragments: &[&str]) -> Self {
        Self::with_script(fragments.iter().map(|f| Step::fragment(f)).collect())
    }

    pub fn with_script(script: Vec<Step>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn failing_open(error: InferenceError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::default()
        }
    }

    /// Text returned by `complete` instead of the concatenated script.
    pub fn with_completion(mut self, text: &str) -> Self {
        self.completion = Some(text.to_string());
        self
    }

    /// Calls to `stream` or `complete`, including failed opens.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fragments pulled off the upstream so far.
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    /// Whether the last opened upstream has been dropped.
    pub fn upstream_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct CloseFlag(Arc<AtomicBool>);

impl Drop for CloseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct Upstream {
    steps: VecDeque<Step>,
    pulled: Arc<AtomicUsize>,
    _closed: CloseFlag,
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    async fn complete(&self, _request: &InferenceRequest) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }
        if let Some(text) = &self.completion {
            return Ok(text.clone());
        }

        let mut text = String::new();
        for step in &self.script {
            match step {
                Step::Fragment(fragment) => text.push_str(fragment),
                Step::Fail(error) => return Err(error.clone()),
                Step::Pause(_) | Step::Hang => {}
            }
        }
        Ok(text)
    }

    async fn stream(&self, _request: &InferenceRequest) -> Result<FragmentStream, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }

        self.closed.store(false, Ordering::SeqCst);
        let upstream = Upstream {
            steps: self.script.iter().cloned().collect(),
            pulled: self.pulled.clone(),
            _closed: CloseFlag(self.closed.clone()),
        };

        Ok(futures::stream::unfold(upstream, |mut upstream| async move {
            loop {
                match upstream.steps.pop_front()? {
                    Step::Fragment(text) => {
                        upstream.pulled.fetch_add(1, Ordering::SeqCst);
                        return Some((Ok(text), upstream));
                    }
                    Step::Fail(error) => return Some((Err(error), upstream)),
                    Step::Pause(pause) => tokio::time::sleep(pause).await,
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
        })
        .boxed())
    }
}
