// Readiness polling against the server's `/_up` endpoint.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::LocalError;

pub const READINESS_PATH: &str = "/_up";
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    NotReady { status: u16 },
    Unreachable { reason: String },
}

/// One readiness check. Implementations never fail; anything but `Ready` means "try again".
///
/// `host` is already in URL form: IPv6 literals arrive bracketed.
pub trait ReadinessProbe: Send + Sync {
    fn probe(&self, host: &str, port: u16) -> impl Future<Output = ProbeOutcome> + Send;
}

impl<P: ReadinessProbe> ReadinessProbe for Arc<P> {
    fn probe(&self, host: &str, port: u16) -> impl Future<Output = ProbeOutcome> + Send {
        (**self).probe(host, port)
    }
}

#[derive(Debug, Clone)]
pub struct HttpReadinessProbe {
    client: reqwest::Client,
}

impl HttpReadinessProbe {
    pub fn new() -> Result<Self, LocalError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }

    pub fn url_for(host: &str, port: u16) -> String {
        format!("http://{host}:{port}{READINESS_PATH}")
    }
}

impl ReadinessProbe for HttpReadinessProbe {
    fn probe(&self, host: &str, port: u16) -> impl Future<Output = ProbeOutcome> + Send {
        let request = self.client.get(Self::url_for(host, port));
        async move {
            match request.send().await {
                Ok(response) if response.status() == StatusCode::OK => ProbeOutcome::Ready,
                Ok(response) => ProbeOutcome::NotReady { status: response.status().as_u16() },
                Err(error) => ProbeOutcome::Unreachable { reason: error.to_string() },
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthPoller<P = HttpReadinessProbe> {
    probe: P,
    interval: Duration,
}

impl<P: ReadinessProbe> HealthPoller<P> {
    pub fn new(probe: P) -> Self {
        Self { probe, interval: POLL_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Number of probes that fit in `timeout_secs` at the poll interval (at least one).
    pub fn max_attempts(&self, timeout_secs: u64) -> u64 {
        let interval_ms = (self.interval.as_millis() as u64).max(1);
        let budget_ms = timeout_secs.saturating_mul(1000);
        budget_ms.div_ceil(interval_ms).max(1)
    }

    /// Block until the endpoint answers 200 or the attempt budget runs out.
    ///
    /// Every failed attempt is followed by one interval of sleep, so a
    /// never-ready server fails once the full timeout has elapsed.
    pub async fn wait_until_ready(&self, host: &str, port: u16, timeout_secs: u64) -> Result<(), LocalError> {
        let started = Instant::now();
        let max_attempts = self.max_attempts(timeout_secs);

        for attempt in 1..=max_attempts {
            match self.probe.probe(host, port).await {
                ProbeOutcome::Ready => {
                    info!(host, port, attempt, elapsed_ms = started.elapsed().as_millis() as u64, "server ready");
                    return Ok(());
                }
                outcome => debug!(host, port, attempt, ?outcome, "server not ready yet"),
            }
            sleep(self.interval).await;
        }

        Err(LocalError::HealthTimeout { port, elapsed_secs: started.elapsed().as_secs() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports not-ready for the first `ready_after` probes.
    struct ScriptedProbe {
        calls: AtomicUsize,
        ready_after: Option<usize>,
    }

    impl ScriptedProbe {
        fn ready_after(polls: usize) -> Self {
            Self { calls: AtomicUsize::new(0), ready_after: Some(polls) }
        }

        fn never_ready() -> Self {
            Self { calls: AtomicUsize::new(0), ready_after: None }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ReadinessProbe for ScriptedProbe {
        fn probe(&self, host: &str, port: u16) -> impl Future<Output = ProbeOutcome> + Send {
            assert_eq!((host, port), ("127.0.0.1", 5984));
            let seen = self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = match self.ready_after {
                Some(k) if seen >= k => ProbeOutcome::Ready,
                Some(_) => ProbeOutcome::NotReady { status: 503 },
                None => ProbeOutcome::Unreachable { reason: "connection refused".into() },
            };
            async move { outcome }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_ready_response_and_not_before() {
        let poller = HealthPoller::new(ScriptedProbe::ready_after(3));
        let started = Instant::now();

        poller.wait_until_ready("127.0.0.1", 5984, 60).await.expect("should become ready");

        assert_eq!(poller.probe().calls(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_ready_does_not_sleep() {
        let poller = HealthPoller::new(ScriptedProbe::ready_after(0));
        let started = Instant::now();

        poller.wait_until_ready("127.0.0.1", 5984, 60).await.unwrap();

        assert_eq!(poller.probe().calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_exactly_at_the_configured_budget() {
        let poller = HealthPoller::new(ScriptedProbe::never_ready());
        let started = Instant::now();

        let error = poller.wait_until_ready("127.0.0.1", 5984, 5).await.expect_err("should time out");

        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(poller.probe().calls(), 5);
        assert!(matches!(error, LocalError::HealthTimeout { port: 5984, elapsed_secs: 5 }));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_last_attempt_still_succeeds() {
        let poller = HealthPoller::new(ScriptedProbe::ready_after(4));
        poller.wait_until_ready("127.0.0.1", 5984, 5).await.expect("fifth probe is within budget");
        assert_eq!(poller.probe().calls(), 5);
    }

    #[test]
    fn attempt_budget_rounds_up() {
        let poller = HealthPoller::new(ScriptedProbe::never_ready());
        assert_eq!(poller.max_attempts(60), 60);
        assert_eq!(poller.max_attempts(0), 1);

        let fast = HealthPoller::new(ScriptedProbe::never_ready()).with_interval(Duration::from_millis(400));
        assert_eq!(fast.max_attempts(1), 3);
    }

    #[test]
    fn readiness_url_uses_given_host() {
        assert_eq!(HttpReadinessProbe::url_for("127.0.0.1", 5984), "http://127.0.0.1:5984/_up");
        assert_eq!(HttpReadinessProbe::url_for("[::1]", 15984), "http://[::1]:15984/_up");
    }
}
