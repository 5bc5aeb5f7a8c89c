//! In-memory fakes for the issuer, exchanger and event bus.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::credentials::{CredentialExchanger, CredentialSet, IdentityIssuer, IssuedToken};
use crate::delivery::{BusEntry, ClientFactory, EventPublisher};
use crate::error::{RelayError, Result};

pub struct FakeIssuer {
    lifetime: Duration,
    delay: Option<std::time::Duration>,
    calls: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeIssuer {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            delay: None,
            calls: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityIssuer for FakeIssuer {
    async fn issue(&self, _audience: &str) -> Result<IssuedToken> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RelayError::IdentityProvider("metadata server unavailable".to_string()));
        }
        Ok(IssuedToken {
            value: format!("token-{n}"),
            lifetime: self.lifetime,
        })
    }
}

pub struct FakeExchanger {
    lifetime: Duration,
    delay: Option<std::time::Duration>,
    calls: AtomicUsize,
    fail_next: AtomicBool,
    last_request: Mutex<Option<(String, String, String)>>,
}

impl FakeExchanger {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            delay: None,
            calls: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn last_request(&self) -> Option<(String, String, String)> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialExchanger for FakeExchanger {
    async fn exchange(&self, token: &str, role_arn: &str, session_name: &str) -> Result<CredentialSet> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_request.lock().unwrap() =
            Some((token.to_string(), role_arn.to_string(), session_name.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RelayError::Federation("AccessDenied".to_string()));
        }
        Ok(CredentialSet::new(
            format!("ASIA{n}"),
            format!("secret-{n}"),
            format!("session-{n}"),
            Utc::now() + self.lifetime,
        ))
    }
}

/// Publisher that records what it was asked to send
#[derive(Default)]
pub struct FakePublisher {
    sent: Mutex<Vec<(String, BusEntry)>>,
    fail: AtomicBool,
}

impl FakePublisher {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    pub fn sent(&self) -> Vec<(String, BusEntry)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for FakePublisher {
    async fn put_event(&self, bus_name: &str, entry: BusEntry) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Dispatch("ThrottlingException: Rate exceeded".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((bus_name.to_string(), entry));
        Ok(format!("event-{}", sent.len()))
    }
}

/// Factory handing out a fresh publisher per build, or a shared one
#[derive(Default)]
pub struct FakeClientFactory {
    shared: Option<Arc<FakePublisher>>,
    builds: AtomicUsize,
}

impl FakeClientFactory {
    pub fn sharing(publisher: Arc<FakePublisher>) -> Self {
        Self {
            shared: Some(publisher),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ClientFactory for FakeClientFactory {
    fn build(&self, _region: &str, _credentials: &CredentialSet) -> Arc<dyn EventPublisher> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        match &self.shared {
            Some(publisher) => publisher.clone() as Arc<dyn EventPublisher>,
            None => Arc::new(FakePublisher::default()),
        }
    }
}
