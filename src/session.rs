//! Session driver: runs an engine session to completion over the relay.
//!
//! Two cooperative pumps share the session. The outbound pump polls the
//! engine for messages and dispatches them to each enumerated receiver;
//! the inbound pump polls the relay inbox, acknowledges, deduplicates and
//! feeds messages into the engine until it reports completion or the
//! deadline fires. A shared completion flag lets the outbound pump drain
//! the engine's final messages before both pumps are joined.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, error, info, warn};
use tokio::time::{sleep, Instant};

use crate::common::body_hash;
use crate::engine::{EngineError, EngineSession, SessionOutput};
use crate::error::Error;
use crate::messenger::Messenger;
use crate::relay::RelayClient;

/// Idle tick for both pumps.
const TICK: Duration = Duration::from_millis(100);

/// Default completion deadline, measured from driver entry.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

type SharedSession = Arc<Mutex<Option<Box<dyn EngineSession>>>>;

pub struct SessionDriver {
    relay: RelayClient,
    messenger: Messenger,
    session_id: String,
    local_party: String,
    timeout: Duration,
}

impl SessionDriver {
    pub fn new(relay: RelayClient, session_id: &str, local_party: &str) -> Self {
        let messenger = Messenger::new(relay.base_url(), session_id);
        Self {
            relay,
            messenger,
            session_id: session_id.to_string(),
            local_party: local_party.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drive the session until the engine reports completion or the
    /// deadline fires. The session is owned by the driver for the whole
    /// run and released on every exit path; both pumps are joined before
    /// returning.
    pub async fn run(&self, session: Box<dyn EngineSession>) -> Result<SessionOutput, Error> {
        let shared: SharedSession = Arc::new(Mutex::new(Some(session)));
        let finished = Arc::new(AtomicBool::new(false));

        let (_, result) = tokio::join!(
            self.outbound_pump(shared.clone(), finished.clone()),
            self.inbound_pump(shared.clone(), finished.clone()),
        );
        result
    }

    /// Poll the engine for outbound messages and send each one to every
    /// enumerated receiver. Send failures are logged and do not stop the
    /// pump; it exits once the engine is drained and the completion flag
    /// is set.
    async fn outbound_pump(&self, shared: SharedSession, finished: Arc<AtomicBool>) {
        loop {
            // Guard scope must end before any await.
            let output = {
                let mut guard = lock_session(&shared);
                guard.as_mut().map(|session| session.output_message())
            };

            let message = match output {
                Some(Ok(Some(message))) => message,
                // Engine idle, or the inbound pump already consumed the
                // session: exit once the completion flag is up.
                Some(Ok(None)) | None => {
                    if finished.load(Ordering::SeqCst) {
                        return;
                    }
                    sleep(TICK).await;
                    continue;
                }
                Some(Err(e)) => {
                    error!("{}: failed to poll outbound message: {}", self.session_id, e);
                    sleep(TICK).await;
                    continue;
                }
            };

            let encoded = BASE64.encode(&message);
            let mut index = 0;
            loop {
                let receiver = {
                    let mut guard = lock_session(&shared);
                    guard
                        .as_mut()
                        .map(|session| session.message_receiver(&message, index))
                };
                match receiver {
                    Some(Ok(Some(to))) => {
                        debug!("{}: sending message to {}", self.session_id, to);
                        if let Err(e) = self.messenger.send(&self.local_party, &to, &encoded).await
                        {
                            error!(
                                "{}: failed to send message to {}: {}",
                                self.session_id, to, e
                            );
                        }
                        index += 1;
                    }
                    Some(Ok(None)) | None => break,
                    Some(Err(e)) => {
                        error!("{}: failed to enumerate receivers: {}", self.session_id, e);
                        break;
                    }
                }
            }
        }
    }

    /// Poll the inbox, acknowledge and apply messages, and finish the
    /// session once the engine reports completion. Acknowledgement comes
    /// before the dedup check so an unacknowledged message stays
    /// consumable; a message already in the cache is never re-applied.
    async fn inbound_pump(
        &self,
        shared: SharedSession,
        finished: Arc<AtomicBool>,
    ) -> Result<SessionOutput, Error> {
        let deadline = Instant::now() + self.timeout;
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            if Instant::now() >= deadline {
                finished.store(true, Ordering::SeqCst);
                return Err(Error::Timeout(self.timeout));
            }
            sleep(TICK).await;

            let messages = match self
                .relay
                .fetch_messages(&self.session_id, &self.local_party)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    debug!("{}: failed to fetch inbox: {}", self.session_id, e);
                    continue;
                }
            };

            for message in messages {
                if message.from == self.local_party {
                    continue;
                }
                let hash = body_hash(&message.body);

                if let Err(e) = self
                    .relay
                    .ack_message(&self.session_id, &self.local_party, &hash)
                    .await
                {
                    error!("{}: failed to ack message {}: {}", self.session_id, hash, e);
                    continue;
                }
                if seen.contains(&hash) {
                    continue;
                }
                seen.insert(hash);

                let decoded = match BASE64.decode(message.body.as_bytes()) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        error!(
                            "{}: message from {} is not base64: {}",
                            self.session_id, message.from, e
                        );
                        continue;
                    }
                };

                debug!("{}: received message from {}", self.session_id, message.from);
                let done = {
                    let mut guard = lock_session(&shared);
                    guard.as_mut().map(|session| session.input_message(&decoded))
                };
                match done {
                    Some(Ok(false)) => {}
                    Some(Ok(true)) => {
                        info!("{}: protocol round complete", self.session_id);
                        let session = lock_session(&shared).take();
                        let output = session
                            .ok_or_else(|| {
                                EngineError::Rejected(
                                    "session was released before finish".to_string(),
                                )
                                .into()
                            })
                            .and_then(|session| session.finish().map_err(Error::from));
                        finished.store(true, Ordering::SeqCst);
                        return output;
                    }
                    Some(Err(e)) => {
                        // The message stays in the dedup cache: a message
                        // the engine rejected once is never re-applied.
                        warn!(
                            "{}: engine rejected message from {}: {}",
                            self.session_id, message.from, e
                        );
                        continue;
                    }
                    None => break,
                }
            }
        }
    }
}

fn lock_session(shared: &SharedSession) -> MutexGuard<'_, Option<Box<dyn EngineSession>>> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
