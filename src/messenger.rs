//! Point-to-point sender: wraps an engine output message in the relay's
//! envelope and posts it to the named peer's inbox.

use log::debug;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::common::body_hash;
use crate::relay::RelayError;

#[derive(Serialize)]
struct Envelope<'a> {
    session_id: &'a str,
    from: &'a str,
    to: [&'a str; 1],
    body: &'a str,
    hash: &'a str,
}

#[derive(Clone)]
pub struct Messenger {
    server: String,
    session_id: String,
    client: Client,
}

impl Messenger {
    pub fn new(server: &str, session_id: &str) -> Self {
        Self {
            server: server.trim_end_matches('/').to_string(),
            session_id: session_id.to_string(),
            client: Client::new(),
        }
    }

    /// Send `body` (a base64-encoded engine message) to one peer. The relay
    /// answers 202 Accepted and fans the envelope out to the recipient's
    /// inbox. The `hash` field is the hex MD5 of the body string, which the
    /// recipient uses for acknowledgement and deduplication.
    pub async fn send(&self, from: &str, to: &str, body: &str) -> Result<(), RelayError> {
        if body.is_empty() {
            return Err(RelayError::EmptyBody);
        }
        let hash = body_hash(body);
        let envelope = Envelope {
            session_id: &self.session_id,
            from,
            to: [to],
            body,
            hash: &hash,
        };

        let url = format!("{}/message/{}", self.server, self.session_id);
        let response = self.client.post(&url).json(&envelope).send().await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(RelayError::UnexpectedStatus {
                operation: "send message",
                status: response.status(),
            });
        }
        debug!("sent message {} -> {} ({})", from, to, hash);
        Ok(())
    }
}
