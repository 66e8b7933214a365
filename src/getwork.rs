//! HTTP work source speaking the `/miner/header` getwork protocol.
//!
//! `GET` returns a 32 byte big-endian target followed by an 80 byte header;
//! `POST` with the solved 80 byte header submits it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::blocking::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::SourceError;
use crate::source::{
    DeprecationCallback, DeprecationHub, DeprecationSignal, DeprecationSubscription, FetchedWork,
    WorkSource,
};
use crate::types::HEADER_LEN;

const TARGET_LEN: usize = 32;
const REFRESH_TICK: Duration = Duration::from_millis(50);

pub struct GetworkClient {
    client: Client,
    endpoint: String,
    refresh_interval: Duration,
    hub: DeprecationHub,
    current: Arc<Mutex<DeprecationSignal>>,
    sequence: AtomicU64,
    started: AtomicBool,
    stop: CancellationToken,
}

impl GetworkClient {
    pub fn new(
        base_url: &str,
        user_agent: &str,
        refresh_interval: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/miner/header", base_url.trim_end_matches('/')),
            refresh_interval,
            hub: DeprecationHub::new(),
            current: Arc::new(Mutex::new(DeprecationSignal::new())),
            sequence: AtomicU64::new(0),
            started: AtomicBool::new(false),
            stop: CancellationToken::new(),
        })
    }

    fn spawn_refresher(&self) -> std::io::Result<()> {
        let hub = self.hub.clone();
        let current = self.current.clone();
        let stop = self.stop.clone();
        let interval = self.refresh_interval;
        thread::Builder::new().name("work-refresh".into()).spawn(move || {
            loop {
                let mut waited = Duration::ZERO;
                while waited < interval {
                    if stop.is_cancelled() {
                        return;
                    }
                    thread::sleep(REFRESH_TICK);
                    waited += REFRESH_TICK;
                }
                current.lock().fire();
                debug!("work template expired");
                hub.notify();
            }
        })?;
        Ok(())
    }
}

impl Drop for GetworkClient {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl WorkSource for GetworkClient {
    /// Fetch sequence number.
    type Job = u64;

    fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.spawn_refresher() {
            error!(error = %e, "failed to start work refresher");
        }
    }

    fn subscribe_deprecation(&self, callback: DeprecationCallback) -> DeprecationSubscription {
        self.hub.subscribe(callback)
    }

    fn fetch_work(&self) -> Result<FetchedWork<u64>, SourceError> {
        let response = self.client.get(&self.endpoint).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Rejected {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let body = response.bytes()?;
        if body.len() < TARGET_LEN + HEADER_LEN {
            return Err(SourceError::Malformed(format!(
                "work response is {} bytes, expected {}",
                body.len(),
                TARGET_LEN + HEADER_LEN
            )));
        }

        let deprecation = DeprecationSignal::new();
        *self.current.lock() = deprecation.clone();
        Ok(FetchedWork {
            target: body[..TARGET_LEN].to_vec(),
            header: body[TARGET_LEN..TARGET_LEN + HEADER_LEN].to_vec(),
            deprecation,
            job: self.sequence.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn submit_header(&self, header: &[u8], job: &u64) -> Result<(), SourceError> {
        debug!(job, "posting header");
        let response = self.client.post(&self.endpoint).body(header.to_vec()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Rejected {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn client(server: &mockito::Server, refresh_interval: Duration) -> GetworkClient {
        GetworkClient::new(&server.url(), "Sia-Agent", refresh_interval).unwrap()
    }

    fn work_body() -> Vec<u8> {
        let mut body = vec![0u8; TARGET_LEN];
        body[4] = 0xff;
        body.extend((0..HEADER_LEN).map(|i| i as u8));
        body
    }

    #[test]
    fn fetch_splits_target_and_header() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/miner/header")
            .match_header("user-agent", "Sia-Agent")
            .with_status(200)
            .with_body(work_body())
            .expect(2)
            .create();

        let client = client(&server, Duration::from_secs(60));
        let work = client.fetch_work().unwrap();
        assert_eq!(work.target.len(), TARGET_LEN);
        assert_eq!(work.target[4], 0xff);
        assert_eq!(work.header, (0..HEADER_LEN).map(|i| i as u8).collect::<Vec<_>>());
        assert_eq!(work.job, 0);

        let next = client.fetch_work().unwrap();
        assert_eq!(next.job, 1);
        mock.assert();
    }

    #[test]
    fn short_response_is_malformed() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/miner/header")
            .with_status(200)
            .with_body(vec![0u8; 40])
            .create();

        let client = client(&server, Duration::from_secs(60));
        assert!(matches!(client.fetch_work(), Err(SourceError::Malformed(_))));
    }

    #[test]
    fn rejected_submission_reports_status() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/miner/header")
            .with_status(400)
            .with_body("block is stale")
            .create();

        let client = client(&server, Duration::from_secs(60));
        match client.submit_header(&[0u8; HEADER_LEN], &3) {
            Err(SourceError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "block is stale");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn accepted_submission() {
        let mut server = mockito::Server::new();
        let mock = server.mock("POST", "/miner/header").with_status(204).create();

        let client = client(&server, Duration::from_secs(60));
        client.submit_header(&[0u8; HEADER_LEN], &0).unwrap();
        mock.assert();
    }

    #[test]
    fn refresher_fires_current_template_and_notifies() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/miner/header")
            .with_status(200)
            .with_body(work_body())
            .create();

        let client = client(&server, Duration::from_millis(100));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _subscription = client.subscribe_deprecation(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let work = client.fetch_work().unwrap();
        client.start();
        client.start();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !work.deprecation.is_fired() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(work.deprecation.is_fired());
        while calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
