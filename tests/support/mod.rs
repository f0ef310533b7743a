//! In-process relay server for committee tests.
//!
//! Implements the relay contract the client speaks: session registration,
//! start signalling, setup-message storage and per-party message inboxes
//! with DELETE acknowledgement. A "sticky acks" mode ignores the first
//! DELETE for each message so tests can exercise duplicate delivery.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use threshold_party::common::body_hash;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub hash: String,
}

#[derive(Default)]
struct SessionState {
    registered: Vec<String>,
    started: Vec<String>,
    setup: Option<String>,
    inboxes: HashMap<String, Vec<StoredMessage>>,
    ignored_acks: HashSet<(String, String)>,
}

struct RelayState {
    sessions: Mutex<HashMap<String, SessionState>>,
    sticky_acks: bool,
}

/// Spawn a relay on an ephemeral port and return its base URL.
pub async fn spawn_relay() -> String {
    spawn_relay_with(false).await
}

/// Spawn a relay; with `sticky_acks` the first DELETE of every message is
/// ignored, so the message is redelivered on the next poll.
pub async fn spawn_relay_with(sticky_acks: bool) -> String {
    let state = Arc::new(RelayState {
        sessions: Mutex::new(HashMap::new()),
        sticky_acks,
    });

    let app = Router::new()
        .route("/start/{session}", post(start_session).get(started_parties))
        .route("/setup-message/{session}", post(upload_setup).get(fetch_setup))
        .route("/message/{session}", post(post_message))
        .route("/message/{session}/{party}", get(fetch_messages))
        .route("/message/{session}/{party}/{hash}", delete(ack_message))
        .route("/{session}", post(register).get(roster))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", address)
}

async fn register(
    State(state): State<Arc<RelayState>>,
    Path(session): Path<String>,
    Json(parties): Json<Vec<String>>,
) -> StatusCode {
    let mut sessions = state.sessions.lock().await;
    let entry = sessions.entry(session).or_default();
    for party in parties {
        if !entry.registered.contains(&party) {
            entry.registered.push(party);
        }
    }
    StatusCode::CREATED
}

async fn roster(
    State(state): State<Arc<RelayState>>,
    Path(session): Path<String>,
) -> Json<Vec<String>> {
    let mut sessions = state.sessions.lock().await;
    Json(sessions.entry(session).or_default().registered.clone())
}

async fn start_session(
    State(state): State<Arc<RelayState>>,
    Path(session): Path<String>,
    Json(parties): Json<Vec<String>>,
) -> StatusCode {
    let mut sessions = state.sessions.lock().await;
    sessions.entry(session).or_default().started = parties;
    StatusCode::OK
}

async fn started_parties(
    State(state): State<Arc<RelayState>>,
    Path(session): Path<String>,
) -> Json<Vec<String>> {
    let mut sessions = state.sessions.lock().await;
    Json(sessions.entry(session).or_default().started.clone())
}

async fn upload_setup(
    State(state): State<Arc<RelayState>>,
    Path(session): Path<String>,
    payload: String,
) -> StatusCode {
    let mut sessions = state.sessions.lock().await;
    sessions.entry(session).or_default().setup = Some(payload);
    StatusCode::CREATED
}

async fn fetch_setup(
    State(state): State<Arc<RelayState>>,
    Path(session): Path<String>,
) -> Result<String, StatusCode> {
    let mut sessions = state.sessions.lock().await;
    sessions
        .entry(session)
        .or_default()
        .setup
        .clone()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn post_message(
    State(state): State<Arc<RelayState>>,
    Path(session): Path<String>,
    Json(message): Json<StoredMessage>,
) -> StatusCode {
    let mut sessions = state.sessions.lock().await;
    let entry = sessions.entry(session).or_default();
    for recipient in &message.to {
        entry
            .inboxes
            .entry(recipient.clone())
            .or_default()
            .push(message.clone());
    }
    StatusCode::ACCEPTED
}

async fn fetch_messages(
    State(state): State<Arc<RelayState>>,
    Path((session, party)): Path<(String, String)>,
) -> Json<Vec<StoredMessage>> {
    let mut sessions = state.sessions.lock().await;
    let entry = sessions.entry(session).or_default();
    Json(entry.inboxes.get(&party).cloned().unwrap_or_default())
}

async fn ack_message(
    State(state): State<Arc<RelayState>>,
    Path((session, party, hash)): Path<(String, String, String)>,
) -> StatusCode {
    let mut sessions = state.sessions.lock().await;
    let sticky = state.sticky_acks;
    let entry = sessions.entry(session).or_default();

    let key = (party.clone(), hash.clone());
    if sticky && !entry.ignored_acks.contains(&key) {
        entry.ignored_acks.insert(key);
        return StatusCode::OK;
    }
    if let Some(inbox) = entry.inboxes.get_mut(&party) {
        inbox.retain(|message| body_hash(&message.body) != hash);
    }
    StatusCode::OK
}
