// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::token::{bearer_token, TokenError, TokenSigner};
use crate::mcp::WsConnection;

/// User id assigned to sessions created for unauthenticated HTTP calls.
pub const ANONYMOUS_USER: &str = "anonymous";

/// User id assigned to sessions created on WebSocket connect.
pub const WEBSOCKET_USER: &str = "websocket-user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Http,
    Websocket,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Http => write!(f, "http"),
            Transport::Websocket => write!(f, "websocket"),
        }
    }
}

/// A logical client context spanning one or more requests.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub transport: Transport,
    /// backend id -> instance id currently held for this session
    pub backend_connections: HashMap<String, String>,
    pub connection: Option<WsConnection>,
}

impl Session {
    fn new(user_id: &str, transport: Transport) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_activity: now,
            transport,
            backend_connections: HashMap::new(),
            connection: None,
        }
    }

    fn touch(&mut self) {
        self.last_activity = self.last_activity.max(Utc::now());
    }

    fn has_live_connection(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| !c.is_closed())
    }

    /// Idle past `timeout`. Sessions bound to an open socket never expire.
    fn is_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        !self.has_live_connection() && now - self.last_activity > timeout
    }
}

/// Session manager settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub jwt_secret: String,
    pub session_timeout: Duration,
    pub max_concurrent_sessions: usize,
    pub token_ttl: Duration,
}

/// Owns every live session and the token signer.
///
/// Expired sessions are dropped lazily on lookup and actively by the
/// reaper task started with [`SessionManager::start_reaper`].
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    signer: TokenSigner,
    session_timeout: chrono::Duration,
    max_concurrent_sessions: usize,
    shutdown_tx: broadcast::Sender<()>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            sessions: RwLock::new(HashMap::new()),
            signer: TokenSigner::new(&config.jwt_secret, config.token_ttl),
            session_timeout: chrono::Duration::from_std(config.session_timeout)
                .unwrap_or(chrono::Duration::MAX),
            max_concurrent_sessions: config.max_concurrent_sessions,
            shutdown_tx,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn create_session(&self, user_id: &str, transport: Transport) -> Session {
        let session = Session::new(user_id, transport);
        self.write().insert(session.id.clone(), session.clone());
        debug!(
            session_id = %session.id,
            user_id = %session.user_id,
            transport = %transport,
            "session created"
        );
        session
    }

    /// Create a session only if the live count is under the cap.
    ///
    /// The count and the insert happen under one write guard, so concurrent
    /// callers can never push the store past `max_concurrent_sessions`.
    pub fn try_create_session(&self, user_id: &str, transport: Transport) -> Option<Session> {
        let now = Utc::now();
        let mut sessions = self.write();
        let live = sessions
            .values()
            .filter(|s| !s.is_expired(now, self.session_timeout))
            .count();
        if live >= self.max_concurrent_sessions {
            return None;
        }
        let session = Session::new(user_id, transport);
        sessions.insert(session.id.clone(), session.clone());
        drop(sessions);
        debug!(
            session_id = %session.id,
            user_id = %session.user_id,
            transport = %transport,
            "session created"
        );
        Some(session)
    }

    /// Look up a session and refresh its activity timestamp.
    ///
    /// Returns `None` for unknown ids and for sessions past their timeout,
    /// which are removed on the spot.
    pub fn get_session(&self, id: &str) -> Option<Session> {
        let mut sessions = self.write();
        let expired = sessions
            .get(id)?
            .is_expired(Utc::now(), self.session_timeout);
        if expired {
            sessions.remove(id);
            debug!(session_id = %id, "session expired on lookup");
            return None;
        }
        let session = sessions.get_mut(id)?;
        session.touch();
        Some(session.clone())
    }

    pub fn generate_token(&self, session_id: &str) -> Result<String, TokenError> {
        self.signer.sign(session_id)
    }

    pub fn validate_token(&self, token: &str) -> Option<String> {
        self.signer.verify(token)
    }

    /// Resolve a session from an `Authorization: Bearer <token>` header.
    pub fn get_session_from_auth_header(&self, header: Option<&str>) -> Option<Session> {
        let token = bearer_token(header?)?;
        let session_id = self.validate_token(token)?;
        self.get_session(&session_id)
    }

    pub fn can_create_new_session(&self) -> bool {
        self.live_session_count() < self.max_concurrent_sessions
    }

    /// Sessions that have not yet expired.
    pub fn live_session_count(&self) -> usize {
        let now = Utc::now();
        self.read()
            .values()
            .filter(|s| !s.is_expired(now, self.session_timeout))
            .count()
    }

    pub fn remove_session(&self, id: &str) {
        if self.write().remove(id).is_some() {
            debug!(session_id = %id, "session removed");
        }
    }

    /// Bind a live connection to a session and switch it to WebSocket.
    pub fn attach_websocket(&self, session_id: &str, connection: WsConnection) -> bool {
        match self.write().get_mut(session_id) {
            Some(session) => {
                session.connection = Some(connection);
                session.transport = Transport::Websocket;
                true
            }
            None => false,
        }
    }

    /// Record the instance a session is currently using for `backend_id`.
    pub fn bind_backend(&self, session_id: &str, backend_id: &str, instance_id: &str) {
        if let Some(session) = self.write().get_mut(session_id) {
            session
                .backend_connections
                .insert(backend_id.to_string(), instance_id.to_string());
        }
    }

    pub fn unbind_backend(&self, session_id: &str, backend_id: &str) {
        if let Some(session) = self.write().get_mut(session_id) {
            session.backend_connections.remove(backend_id);
        }
    }

    /// Remove every expired session, returning how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now, self.session_timeout));
        before - sessions.len()
    }

    /// Spawn the periodic reaper. It stops on [`SessionManager::shutdown`].
    pub fn start_reaper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = manager.sweep_expired();
                        if removed > 0 {
                            info!(removed, remaining = manager.session_count(), "expired sessions reaped");
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("session reaper received shutdown signal");
                        break;
                    }
                }
            }
        })
    }

    /// All stored sessions, expired or not.
    pub fn session_count(&self) -> usize {
        self.read().len()
    }

    /// Stop the reaper and drop every session. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let mut sessions = self.write();
        if !sessions.is_empty() {
            info!(count = sessions.len(), "releasing sessions");
        }
        sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max: usize, timeout: Duration) -> SessionManager {
        SessionManager::new(SessionConfig {
            jwt_secret: "test-secret".to_string(),
            session_timeout: timeout,
            max_concurrent_sessions: max,
            token_ttl: Duration::from_secs(60),
        })
    }

    #[test]
    fn test_create_session_defaults() {
        let sessions = manager(10, Duration::from_secs(60));
        let session = sessions.create_session(ANONYMOUS_USER, Transport::Http);

        assert!(!session.id.is_empty());
        assert_eq!(session.user_id, "anonymous");
        assert_eq!(session.transport, Transport::Http);
        assert_eq!(session.created_at, session.last_activity);
        assert!(session.backend_connections.is_empty());
    }

    #[test]
    fn test_get_session_touches_activity() {
        let sessions = manager(10, Duration::from_secs(60));
        let created = sessions.create_session(ANONYMOUS_USER, Transport::Http);
        std::thread::sleep(Duration::from_millis(5));

        let fetched = sessions.get_session(&created.id).unwrap();
        assert!(fetched.last_activity > created.last_activity);
        assert!(sessions.get_session("missing").is_none());
    }

    #[test]
    fn test_token_round_trip() {
        let sessions = manager(10, Duration::from_secs(60));
        let session = sessions.create_session(ANONYMOUS_USER, Transport::Http);
        let token = sessions.generate_token(&session.id).unwrap();

        assert_eq!(sessions.validate_token(&token), Some(session.id.clone()));

        let header = format!("Bearer {}", token);
        let resolved = sessions.get_session_from_auth_header(Some(&header)).unwrap();
        assert_eq!(resolved.id, session.id);
    }

    #[test]
    fn test_auth_header_failures() {
        let sessions = manager(10, Duration::from_secs(60));
        let other = manager(10, Duration::from_secs(60));
        let session = sessions.create_session(ANONYMOUS_USER, Transport::Http);
        let token = sessions.generate_token(&session.id).unwrap();

        assert!(sessions.get_session_from_auth_header(None).is_none());
        assert!(sessions.get_session_from_auth_header(Some(&token)).is_none());
        assert!(sessions
            .get_session_from_auth_header(Some("Bearer garbage"))
            .is_none());

        // Valid signature, but the session lives in another manager.
        let foreign = format!("Bearer {}", other.generate_token("nope").unwrap());
        assert!(sessions.get_session_from_auth_header(Some(&foreign)).is_none());
    }

    #[test]
    fn test_session_capacity() {
        let sessions = manager(2, Duration::from_secs(60));
        let first = sessions.create_session(ANONYMOUS_USER, Transport::Http);
        assert!(sessions.can_create_new_session());
        sessions.create_session(ANONYMOUS_USER, Transport::Http);
        assert!(!sessions.can_create_new_session());

        sessions.remove_session(&first.id);
        assert!(sessions.can_create_new_session());
    }

    #[test]
    fn test_try_create_session_respects_cap() {
        let sessions = manager(1, Duration::from_secs(60));
        let first = sessions
            .try_create_session(ANONYMOUS_USER, Transport::Http)
            .unwrap();
        assert!(sessions
            .try_create_session(ANONYMOUS_USER, Transport::Http)
            .is_none());
        assert_eq!(sessions.session_count(), 1);

        sessions.remove_session(&first.id);
        assert!(sessions
            .try_create_session(ANONYMOUS_USER, Transport::Http)
            .is_some());
    }

    #[test]
    fn test_try_create_session_ignores_expired() {
        let sessions = manager(1, Duration::from_millis(1));
        sessions.create_session(ANONYMOUS_USER, Transport::Http);
        std::thread::sleep(Duration::from_millis(10));

        assert!(sessions
            .try_create_session(ANONYMOUS_USER, Transport::Http)
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_try_create_session_concurrent_never_exceeds_cap() {
        let cap = 3;
        let sessions = Arc::new(manager(cap, Duration::from_secs(60)));

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let sessions = Arc::clone(&sessions);
                tokio::spawn(async move {
                    sessions
                        .try_create_session(ANONYMOUS_USER, Transport::Http)
                        .is_some()
                })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, cap);
        assert_eq!(sessions.session_count(), cap);
    }

    #[test]
    fn test_remove_session_idempotent() {
        let sessions = manager(10, Duration::from_secs(60));
        let session = sessions.create_session(ANONYMOUS_USER, Transport::Http);

        sessions.remove_session(&session.id);
        sessions.remove_session(&session.id);
        assert_eq!(sessions.session_count(), 0);
    }

    #[test]
    fn test_expired_session_dropped_on_lookup() {
        let sessions = manager(1, Duration::from_millis(1));
        let session = sessions.create_session(ANONYMOUS_USER, Transport::Http);
        std::thread::sleep(Duration::from_millis(10));

        assert!(sessions.can_create_new_session());
        assert!(sessions.get_session(&session.id).is_none());
        assert_eq!(sessions.session_count(), 0);
    }

    #[test]
    fn test_sweep_keeps_live_websocket_sessions() {
        let sessions = manager(10, Duration::from_millis(1));
        let idle = sessions.create_session(ANONYMOUS_USER, Transport::Http);
        let ws = sessions.create_session(WEBSOCKET_USER, Transport::Websocket);
        let (conn, _rx) = WsConnection::new();
        assert!(sessions.attach_websocket(&ws.id, conn));
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(sessions.sweep_expired(), 1);
        assert!(sessions.get_session(&idle.id).is_none());
        assert!(sessions.get_session(&ws.id).is_some());
    }

    #[test]
    fn test_attach_websocket() {
        let sessions = manager(10, Duration::from_secs(60));
        let session = sessions.create_session(WEBSOCKET_USER, Transport::Http);
        let (conn, _rx) = WsConnection::new();

        assert!(!sessions.attach_websocket("missing", conn.clone()));
        assert!(sessions.attach_websocket(&session.id, conn));

        let attached = sessions.get_session(&session.id).unwrap();
        assert_eq!(attached.transport, Transport::Websocket);
        assert!(attached.connection.is_some());
    }

    #[test]
    fn test_backend_bindings() {
        let sessions = manager(10, Duration::from_secs(60));
        let session = sessions.create_session(ANONYMOUS_USER, Transport::Http);

        sessions.bind_backend(&session.id, "fs", "fs-0");
        let bound = sessions.get_session(&session.id).unwrap();
        assert_eq!(bound.backend_connections.get("fs").map(String::as_str), Some("fs-0"));

        sessions.unbind_backend(&session.id, "fs");
        assert!(sessions
            .get_session(&session.id)
            .unwrap()
            .backend_connections
            .is_empty());
    }

    #[tokio::test]
    async fn test_reaper_stops_on_shutdown() {
        let sessions = Arc::new(manager(10, Duration::from_millis(1)));
        sessions.create_session(ANONYMOUS_USER, Transport::Http);
        let handle = sessions.start_reaper(Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sessions.session_count(), 0);

        sessions.shutdown();
        sessions.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper did not stop")
            .unwrap();
    }
}
