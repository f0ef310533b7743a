//! HTTP client for the relay server.
//!
//! The relay is a stateless coordination service: parties register under a
//! session, the leader publishes the setup message and starts the session,
//! and every party polls its own inbox for protocol messages. Failures on
//! the register/start/setup paths are fatal for a run; inbox fetch and
//! acknowledgement failures are soft and retried on the next pump tick.

use std::time::Duration;

use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

/// How long a follower sleeps between `GET /start/{session}` polls.
const START_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long the leader sleeps between registration-barrier polls.
const BARRIER_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation}: relay responded {status}")]
    UnexpectedStatus {
        operation: &'static str,
        status: StatusCode,
    },

    #[error("message body is empty")]
    EmptyBody,
}

/// One entry of a party's relay inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Clone)]
pub struct RelayClient {
    base_url: String,
    client: Client,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register the local party for a session. `POST {base}/{session}` with
    /// a one-element JSON array; the relay answers 201 Created.
    pub async fn register_session(&self, session: &str, party: &str) -> Result<(), RelayError> {
        let url = format!("{}/{}", self.base_url, session);
        let response = self.client.post(&url).json(&[party]).send().await?;
        expect_status(response.status(), StatusCode::CREATED, "register session")
    }

    /// Kick off the session for the given committee. Leader only, issued
    /// once the registration barrier is satisfied.
    pub async fn start_session(&self, session: &str, parties: &[String]) -> Result<(), RelayError> {
        let url = format!("{}/start/{}", self.base_url, session);
        let response = self.client.post(&url).json(&parties).send().await?;
        expect_status(response.status(), StatusCode::OK, "start session")
    }

    /// Poll until the leader has started the session, returning the
    /// committee it announced. There is no internal deadline; the caller
    /// bounds the wait through the driver timeout.
    pub async fn wait_for_start(&self, session: &str) -> Result<Vec<String>, RelayError> {
        let url = format!("{}/start/{}", self.base_url, session);
        loop {
            let response = self.client.get(&url).send().await?;
            expect_status(response.status(), StatusCode::OK, "wait for session start")?;
            let parties: Vec<String> = response.json().await?;
            if !parties.is_empty() {
                return Ok(parties);
            }
            sleep(START_POLL_INTERVAL).await;
        }
    }

    /// Registration barrier: poll the session roster until every expected
    /// committee member has registered. Leader only.
    pub async fn wait_all_parties(
        &self,
        session: &str,
        committee: &[String],
    ) -> Result<(), RelayError> {
        let url = format!("{}/{}", self.base_url, session);
        loop {
            let response = self.client.get(&url).send().await?;
            if response.status() == StatusCode::OK {
                let registered: Vec<String> = response.json().await?;
                if committee.iter().all(|p| registered.contains(p)) {
                    return Ok(());
                }
                debug!(
                    "waiting for committee: {}/{} registered",
                    registered.len(),
                    committee.len()
                );
            } else {
                debug!("session roster not ready: {}", response.status());
            }
            sleep(BARRIER_POLL_INTERVAL).await;
        }
    }

    /// Publish the base64-encoded setup message. Leader only; the payload
    /// is stored verbatim and handed to every follower.
    pub async fn upload_setup(&self, session: &str, payload: &str) -> Result<(), RelayError> {
        let url = format!("{}/setup-message/{}", self.base_url, session);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await?;
        expect_status(response.status(), StatusCode::CREATED, "upload setup message")
    }

    /// Fetch the setup message the leader published.
    pub async fn fetch_setup(&self, session: &str) -> Result<String, RelayError> {
        let url = format!("{}/setup-message/{}", self.base_url, session);
        let response = self.client.get(&url).send().await?;
        expect_status(response.status(), StatusCode::OK, "fetch setup message")?;
        Ok(response.text().await?)
    }

    /// Fetch the local party's inbox. A non-200 response is a soft failure:
    /// it is reported as an error for the pump to log, and the pump retries
    /// on its next tick.
    pub async fn fetch_messages(
        &self,
        session: &str,
        party: &str,
    ) -> Result<Vec<RelayEnvelope>, RelayError> {
        let url = format!("{}/message/{}/{}", self.base_url, session, party);
        let response = self.client.get(&url).send().await?;
        expect_status(response.status(), StatusCode::OK, "fetch messages")?;
        Ok(response.json().await?)
    }

    /// Acknowledge one inbox message by the hex MD5 of its body. The pump
    /// acknowledges *before* marking the body seen, so an ACK failure
    /// leaves the message not-yet-consumed.
    pub async fn ack_message(
        &self,
        session: &str,
        party: &str,
        hash: &str,
    ) -> Result<(), RelayError> {
        let url = format!("{}/message/{}/{}/{}", self.base_url, session, party, hash);
        let response = self.client.delete(&url).send().await?;
        expect_status(response.status(), StatusCode::OK, "ack message")
    }
}

fn expect_status(
    actual: StatusCode,
    expected: StatusCode,
    operation: &'static str,
) -> Result<(), RelayError> {
    if actual == expected {
        Ok(())
    } else {
        Err(RelayError::UnexpectedStatus {
            operation,
            status: actual,
        })
    }
}
