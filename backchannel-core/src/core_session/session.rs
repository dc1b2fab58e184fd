//! Per-connection state machine
//!
//! A session starts UNAUTHENTICATED and accepts only `authenticate` and
//! `register`; once authenticated it never transitions back, it can only be
//! torn down with its connection. All protocol-visible failures are `error`
//! reply frames; only malformed input and internal hash/store failures
//! escape as [`SessionError`], which the dispatcher treats as fatal for the
//! connection.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core_auth::CredentialHasher;
use crate::core_store::{Account, AccountStore};

use super::error::SessionError;
use super::protocol::{AuthenticateContents, ClientMessage, RegisterContents, ServerMessage};
use super::registry::SessionRegistry;

const ERR_NOT_LOGGED_IN: &str = "You are not logged in.";
const ERR_ALREADY_LOGGED_IN: &str = "You are already logged in on another device.";
const ERR_NO_SUCH_USER: &str = "That user doesn't exist.";
const ERR_BAD_CREDENTIALS: &str = "Invalid credentials.";
const ERR_NAME_TAKEN: &str = "A user with that name already exists.";
const ERR_UNRECOGNIZED: &str = "Command not recognized.";

const AUTHENTICATED_GREETING: &str = "You have been authenticated.";

/// Shared collaborators handed to every session.
#[derive(Clone)]
pub struct SessionContext {
    pub store: Arc<dyn AccountStore>,
    pub hasher: Arc<CredentialHasher>,
    pub registry: SessionRegistry,
}

impl SessionContext {
    pub fn new(store: Arc<dyn AccountStore>, hasher: Arc<CredentialHasher>) -> Self {
        Self {
            store,
            hasher,
            registry: SessionRegistry::new(),
        }
    }
}

/// One session per live connection.
pub struct ConnectionSession {
    ctx: SessionContext,
    authenticated: bool,
    account: Option<String>,
}

impl ConnectionSession {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            authenticated: false,
            account: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Dispatch one inbound text frame.
    ///
    /// `Ok` carries the reply frames to send; `Err` is fatal for the
    /// connection and the caller must tear it down.
    pub async fn handle_frame(&mut self, text: &str) -> Result<Vec<ServerMessage>, SessionError> {
        let message = ClientMessage::parse(text)?;
        if self.authenticated {
            self.handle_authenticated(message).await
        } else {
            self.handle_unauthenticated(message).await
        }
    }

    /// Release the bound account name. Idempotent; called by the dispatcher
    /// on every teardown path (close, fatal error, heartbeat reap).
    pub fn teardown(&mut self) {
        if let Some(name) = self.account.take() {
            self.ctx.registry.remove(&name);
            info!(account = %name, "Session deregistered");
        }
    }

    async fn handle_unauthenticated(
        &mut self,
        message: ClientMessage,
    ) -> Result<Vec<ServerMessage>, SessionError> {
        match message {
            ClientMessage::Authenticate(contents) => self.authenticate(contents).await,
            ClientMessage::Register(contents) => self.register(contents).await,
            _ => Ok(vec![ServerMessage::Error(ERR_NOT_LOGGED_IN.to_string())]),
        }
    }

    async fn handle_authenticated(
        &mut self,
        message: ClientMessage,
    ) -> Result<Vec<ServerMessage>, SessionError> {
        match message {
            ClientMessage::RetrieveState => self.retrieve_state().await,
            _ => Ok(vec![ServerMessage::Error(ERR_UNRECOGNIZED.to_string())]),
        }
    }

    async fn authenticate(
        &mut self,
        contents: AuthenticateContents,
    ) -> Result<Vec<ServerMessage>, SessionError> {
        let AuthenticateContents { name, password } = contents;

        // cheap pre-check so we don't burn a verify on an obvious duplicate
        if self.ctx.registry.contains(&name) {
            return Ok(vec![ServerMessage::Error(ERR_ALREADY_LOGGED_IN.to_string())]);
        }

        let Some(account) = self.ctx.store.find_by_name(&name).await? else {
            return Ok(vec![ServerMessage::Error(ERR_NO_SUCH_USER.to_string())]);
        };

        // suspension point: other connections may progress while we verify
        if !self
            .ctx
            .hasher
            .verify(account.password_hash, password)
            .await?
        {
            debug!(account = %name, "Password verification failed");
            return Ok(vec![ServerMessage::Error(ERR_BAD_CREDENTIALS.to_string())]);
        }

        // the commit point: whoever gets the registry slot wins the race
        if !self.ctx.registry.add(&name) {
            return Ok(vec![ServerMessage::Error(ERR_ALREADY_LOGGED_IN.to_string())]);
        }

        self.bind(name);
        Ok(vec![ServerMessage::Authenticated(
            AUTHENTICATED_GREETING.to_string(),
        )])
    }

    async fn register(
        &mut self,
        contents: RegisterContents,
    ) -> Result<Vec<ServerMessage>, SessionError> {
        let RegisterContents {
            name,
            password,
            identity_key,
            handshake_keys,
        } = contents;

        if self.ctx.store.find_by_name(&name).await?.is_some() {
            return Ok(vec![ServerMessage::Error(ERR_NAME_TAKEN.to_string())]);
        }

        // suspension point: the uniqueness check above is stale once the
        // hash completes
        let password_hash = self.ctx.hasher.hash(password).await?;

        // reserve the name before touching the store so a concurrent
        // registration can't insert the same record twice
        if !self.ctx.registry.add(&name) {
            return Ok(vec![ServerMessage::Error(ERR_ALREADY_LOGGED_IN.to_string())]);
        }
        if self.ctx.store.find_by_name(&name).await?.is_some() {
            self.ctx.registry.remove(&name);
            return Ok(vec![ServerMessage::Error(ERR_NAME_TAKEN.to_string())]);
        }

        let account = Account::new(name.clone(), password_hash, identity_key, handshake_keys);
        self.ctx.store.insert(account).await?;
        // persistence is best-effort; the reply does not wait on durability
        if let Err(e) = self.ctx.store.save().await {
            warn!(account = %name, "Failed to persist account collection: {}", e);
        }

        self.bind(name);
        Ok(vec![ServerMessage::Authenticated(
            AUTHENTICATED_GREETING.to_string(),
        )])
    }

    async fn retrieve_state(&mut self) -> Result<Vec<ServerMessage>, SessionError> {
        let Some(name) = self.account.as_deref() else {
            // authenticated without a bound name cannot happen; answer
            // softly rather than killing the connection
            return Ok(vec![ServerMessage::Error(ERR_NOT_LOGGED_IN.to_string())]);
        };

        match self.ctx.store.find_by_name(name).await? {
            Some(account) => Ok(vec![ServerMessage::State(account.state_view())]),
            None => Ok(vec![ServerMessage::Error(ERR_NO_SUCH_USER.to_string())]),
        }
    }

    fn bind(&mut self, name: String) {
        info!(account = %name, "Session authenticated");
        self.authenticated = true;
        self.account = Some(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::MemoryAccountStore;
    use argon2::Params;
    use serde_json::json;

    fn test_context() -> SessionContext {
        let hasher = CredentialHasher::with_params(
            Params::new(1024, 1, 1, Some(32)).expect("test params are valid"),
        );
        SessionContext::new(Arc::new(MemoryAccountStore::new()), Arc::new(hasher))
    }

    fn register_frame(name: &str, password: &str) -> String {
        json!({
            "message": {
                "type": "register",
                "contents": {
                    "name": name,
                    "password": password,
                    "identityKey": {"publicKey": "pk"},
                    "handshakeKeys": [{"publicKey": "hk"}]
                }
            }
        })
        .to_string()
    }

    fn authenticate_frame(name: &str, password: &str) -> String {
        json!({
            "message": {
                "type": "authenticate",
                "contents": {"name": name, "password": password}
            }
        })
        .to_string()
    }

    fn retrieve_state_frame() -> String {
        json!({"message": {"type": "retrieve-state"}}).to_string()
    }

    async fn registered_session(ctx: &SessionContext, name: &str, password: &str) {
        let mut session = ConnectionSession::new(ctx.clone());
        let replies = session
            .handle_frame(&register_frame(name, password))
            .await
            .expect("register");
        assert!(matches!(replies[0], ServerMessage::Authenticated(_)));
        session.teardown();
    }

    fn expect_error(replies: &[ServerMessage], needle: &str) {
        match &replies[0] {
            ServerMessage::Error(msg) => assert!(
                msg.contains(needle),
                "expected error containing {needle:?}, got {msg:?}"
            ),
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_binds_and_persists() {
        let ctx = test_context();
        let mut session = ConnectionSession::new(ctx.clone());

        let replies = session
            .handle_frame(&register_frame("alice", "p"))
            .await
            .expect("register");

        assert!(matches!(replies[0], ServerMessage::Authenticated(_)));
        assert!(session.is_authenticated());
        assert_eq!(session.account(), Some("alice"));
        assert!(ctx.registry.contains("alice"));

        let stored = ctx
            .store
            .find_by_name("alice")
            .await
            .expect("find")
            .expect("stored");
        assert!(stored.friends.is_empty());
        assert!(stored.password_hash.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn test_register_rejects_existing_name() {
        let ctx = test_context();
        registered_session(&ctx, "alice", "p").await;

        let mut session = ConnectionSession::new(ctx.clone());
        let replies = session
            .handle_frame(&register_frame("alice", "other"))
            .await
            .expect("dispatch");

        expect_error(&replies, "already exists");
        assert!(!session.is_authenticated());

        // the original record is untouched
        let stored = ctx
            .store
            .find_by_name("alice")
            .await
            .expect("find")
            .expect("stored");
        let hasher = &ctx.hasher;
        assert!(hasher
            .verify(stored.password_hash, "p".to_string())
            .await
            .expect("verify"));
    }

    #[tokio::test]
    async fn test_authenticate_success_after_teardown() {
        let ctx = test_context();
        registered_session(&ctx, "alice", "p").await;
        assert!(!ctx.registry.contains("alice"));

        let mut session = ConnectionSession::new(ctx.clone());
        let replies = session
            .handle_frame(&authenticate_frame("alice", "p"))
            .await
            .expect("authenticate");

        assert!(matches!(replies[0], ServerMessage::Authenticated(_)));
        assert!(ctx.registry.contains("alice"));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_wrong_password() {
        let ctx = test_context();
        registered_session(&ctx, "alice", "p").await;

        let mut session = ConnectionSession::new(ctx.clone());
        let replies = session
            .handle_frame(&authenticate_frame("alice", "wrong"))
            .await
            .expect("dispatch");

        expect_error(&replies, "Invalid credentials");
        assert!(!session.is_authenticated());
        assert!(!ctx.registry.contains("alice"));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_unknown_user() {
        let ctx = test_context();
        let mut session = ConnectionSession::new(ctx);
        let replies = session
            .handle_frame(&authenticate_frame("nobody", "p"))
            .await
            .expect("dispatch");
        expect_error(&replies, "doesn't exist");
    }

    #[tokio::test]
    async fn test_second_session_for_same_name_is_rejected() {
        let ctx = test_context();
        registered_session(&ctx, "alice", "p").await;

        let mut first = ConnectionSession::new(ctx.clone());
        let replies = first
            .handle_frame(&authenticate_frame("alice", "p"))
            .await
            .expect("authenticate");
        assert!(matches!(replies[0], ServerMessage::Authenticated(_)));

        let mut second = ConnectionSession::new(ctx.clone());
        let replies = second
            .handle_frame(&authenticate_frame("alice", "p"))
            .await
            .expect("dispatch");
        expect_error(&replies, "already logged in");
        assert!(!second.is_authenticated());

        // the first session stays bound
        assert!(first.is_authenticated());
        assert!(ctx.registry.contains("alice"));
    }

    #[tokio::test]
    async fn test_teardown_frees_the_name_exactly_once() {
        let ctx = test_context();
        let mut session = ConnectionSession::new(ctx.clone());
        session
            .handle_frame(&register_frame("alice", "p"))
            .await
            .expect("register");

        session.teardown();
        assert!(!ctx.registry.contains("alice"));

        // a second teardown must not disturb a fresh session's binding
        let mut fresh = ConnectionSession::new(ctx.clone());
        fresh
            .handle_frame(&authenticate_frame("alice", "p"))
            .await
            .expect("authenticate");
        session.teardown();
        assert!(ctx.registry.contains("alice"));
    }

    #[tokio::test]
    async fn test_unauthenticated_commands_get_not_logged_in() {
        let ctx = test_context();
        let mut session = ConnectionSession::new(ctx);
        let replies = session
            .handle_frame(&retrieve_state_frame())
            .await
            .expect("dispatch");
        expect_error(&replies, "not logged in");
        // the session survives
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_retrieve_state_returns_record_without_hash() {
        let ctx = test_context();
        let mut session = ConnectionSession::new(ctx);
        session
            .handle_frame(&register_frame("alice", "p"))
            .await
            .expect("register");

        let replies = session
            .handle_frame(&retrieve_state_frame())
            .await
            .expect("retrieve-state");

        match &replies[0] {
            ServerMessage::State(state) => {
                assert_eq!(state["name"], "alice");
                assert_eq!(state["identityKey"]["publicKey"], "pk");
                assert_eq!(state["friends"], json!([]));
                assert!(state.get("passwordHash").is_none());
            }
            other => panic!("expected state frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_command_while_authenticated() {
        let ctx = test_context();
        let mut session = ConnectionSession::new(ctx);
        session
            .handle_frame(&register_frame("alice", "p"))
            .await
            .expect("register");

        let unknown = json!({"message": {"type": "send-message", "contents": {}}}).to_string();
        let replies = session.handle_frame(&unknown).await.expect("dispatch");
        expect_error(&replies, "not recognized");
        // still authenticated, still bound
        assert!(session.is_authenticated());
        assert_eq!(session.account(), Some("alice"));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_fatal() {
        let ctx = test_context();
        let mut session = ConnectionSession::new(ctx);
        assert!(matches!(
            session.handle_frame("not json").await,
            Err(SessionError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_register_shape_mismatch_is_fatal() {
        let ctx = test_context();
        let mut session = ConnectionSession::new(ctx.clone());
        let bad = json!({
            "message": {
                "type": "register",
                "contents": {
                    "name": "alice",
                    "password": "p",
                    "identityKey": "not an object",
                    "handshakeKeys": []
                }
            }
        })
        .to_string();

        assert!(matches!(
            session.handle_frame(&bad).await,
            Err(SessionError::Malformed(_))
        ));
        // nothing was created or bound
        assert!(ctx
            .store
            .find_by_name("alice")
            .await
            .expect("find")
            .is_none());
        assert!(!ctx.registry.contains("alice"));
    }

    #[tokio::test]
    async fn test_concurrent_authenticate_single_winner() {
        let ctx = test_context();
        registered_session(&ctx, "alice", "p").await;

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                let mut session = ConnectionSession::new(ctx);
                let replies = session
                    .handle_frame(&authenticate_frame("alice", "p"))
                    .await
                    .expect("dispatch");
                matches!(replies[0], ServerMessage::Authenticated(_))
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.expect("join") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(ctx.registry.contains("alice"));
    }
}
