use std::time::Duration;

use reqwest::Client;
use stove_common::{ControllerStatus, DesiredState, ObservedReport, RemoteConfig};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};
use tracing::{info, warn};

use crate::control::ControlEvent;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("server sent non-finite setpoint {0}")]
    InvalidSetpoint(f64),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Source of the operator-desired setpoint and master switch.
#[allow(async_fn_in_trait)]
pub trait RemoteStateFetcher {
    async fn fetch(&self, report: &ObservedReport) -> Result<DesiredState, FetchError>;
}

enum Auth {
    None,
    Basic { username: String, password: Option<String> },
    Bearer(String),
}

/// POSTs the believed state as JSON and reads back `desired_temperature` / `on`.
pub struct HttpStateFetcher {
    client: Client,
    url: String,
    auth: Auth,
}

impl HttpStateFetcher {
    pub fn new(config: &RemoteConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        let auth = match (&config.bearer_token, &config.username) {
            (Some(token), _) => Auth::Bearer(token.clone()),
            (None, Some(username)) => Auth::Basic {
                username: username.clone(),
                password: config.password.clone(),
            },
            (None, None) => Auth::None,
        };

        Ok(Self {
            client,
            url: config.url.clone(),
            auth,
        })
    }
}

impl RemoteStateFetcher for HttpStateFetcher {
    async fn fetch(&self, report: &ObservedReport) -> Result<DesiredState, FetchError> {
        let request = self.client.post(&self.url).json(report);
        let request = match &self.auth {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, password.as_ref()),
            Auth::Bearer(token) => request.bearer_auth(token),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let desired: DesiredState = serde_json::from_slice(&body)?;
        if !desired.setpoint.is_finite() {
            return Err(FetchError::InvalidSetpoint(desired.setpoint));
        }
        Ok(desired)
    }
}

/// Periodically pulls the desired state and feeds it to the control loop.
///
/// The fetch runs on this task, never inside the control loop, so a slow
/// server cannot hold up bus events. A failed fetch sends nothing: the last
/// good setpoint and master switch stay in force.
pub struct Resynchronizer<F> {
    fetcher: F,
    interval: Duration,
    timeout: Duration,
    status: watch::Receiver<ControllerStatus>,
    events: mpsc::Sender<ControlEvent>,
}

impl<F: RemoteStateFetcher> Resynchronizer<F> {
    pub fn new(
        fetcher: F,
        interval: Duration,
        timeout: Duration,
        status: watch::Receiver<ControllerStatus>,
        events: mpsc::Sender<ControlEvent>,
    ) -> Self {
        Self {
            fetcher,
            interval,
            timeout,
            status,
            events,
        }
    }

    pub async fn run(self) {
        // First tick completes immediately, so the initial fetch happens at startup.
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.sync_once().await {
                info!("resynchronizer stopped: control loop is gone");
                return;
            }
        }
    }

    /// One fetch-and-forward cycle. Returns false once the control loop has shut down.
    pub async fn sync_once(&self) -> bool {
        match self.fetch_desired_state().await {
            Ok(desired) => self
                .events
                .send(ControlEvent::DesiredState(desired))
                .await
                .is_ok(),
            Err(err) => {
                warn!("error fetching desired state: {err}");
                !self.events.is_closed()
            }
        }
    }

    pub async fn fetch_desired_state(&self) -> Result<DesiredState, FetchError> {
        let report = self.status.borrow().observed_report();
        match tokio::time::timeout(self.timeout, self.fetcher.fetch(&report)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}
