//! Auth gate in front of the task manager.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::backend::{AuthEvent, AuthEventKind, AuthProvider, Session};
use super::error::{AuthError, AuthErrorKind};
use super::feed::AuthSubscription;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated(Session),
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Anonymous => None,
            SessionState::Authenticated(session) => Some(session),
        }
    }
}

/// What the view layer should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    AuthForm,
    TaskManager(Session),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    Authenticated(Session),
    /// The provider created the account but wants the email confirmed first.
    ConfirmationPending,
}

pub struct SessionController {
    auth: Arc<dyn AuthProvider>,
    state: watch::Sender<SessionState>,
    subscription: Option<AuthSubscription>,
}

impl SessionController {
    /// Subscribe to auth changes, then read the current session. Subscribing
    /// first means a change racing with the initial read is still observed.
    pub async fn mount(auth: Arc<dyn AuthProvider>) -> Result<Self, AuthError> {
        let subscription = auth.on_auth_state_change();
        let initial = match auth.get_session().await? {
            Some(session) => SessionState::Authenticated(session),
            None => SessionState::Anonymous,
        };
        debug!("Session controller mounted (authenticated={})", initial.session().is_some());

        let (state, _) = watch::channel(initial);
        Ok(Self { auth, state, subscription: Some(subscription) })
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().session().is_some()
    }

    /// Read-only view of the state for other components.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn screen(&self) -> Screen {
        match self.session() {
            Some(session) => Screen::TaskManager(session),
            None => Screen::AuthForm,
        }
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<Session, AuthError> {
        validate_credentials(email, password)?;
        let session = self.auth.sign_in_with_password(email.trim(), password).await?;
        info!("Signed in {}", session.user.email);
        self.set(SessionState::Authenticated(session.clone()));
        Ok(session)
    }

    pub async fn sign_up(&mut self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError> {
        validate_credentials(email, password)?;
        match self.auth.sign_up(email.trim(), password).await? {
            Some(session) => {
                info!("Signed up {}", session.user.email);
                self.set(SessionState::Authenticated(session.clone()));
                Ok(SignUpOutcome::Authenticated(session))
            }
            None => {
                info!("Sign-up for {} awaits email confirmation", email.trim());
                Ok(SignUpOutcome::ConfirmationPending)
            }
        }
    }

    /// Sign out; on failure the current session is kept.
    pub async fn sign_out(&mut self) -> Result<(), AuthError> {
        self.auth.sign_out().await?;
        info!("Signed out");
        self.set(SessionState::Anonymous);
        Ok(())
    }

    /// Apply every auth notification already delivered. Returns how many.
    pub fn process_events(&mut self) -> usize {
        let mut events = Vec::new();
        if let Some(subscription) = self.subscription.as_mut() {
            while let Some(event) = subscription.try_recv() {
                events.push(event);
            }
        }
        let count = events.len();
        for event in events {
            self.apply(event);
        }
        count
    }

    /// Wait for one auth notification and apply it. `None` once unsubscribed
    /// or the provider has gone away.
    pub async fn next_change(&mut self) -> Option<SessionState> {
        let event = self.subscription.as_mut()?.recv().await?;
        self.apply(event);
        Some(self.state())
    }

    /// Ask the provider for the current session, which refreshes or clears an
    /// expired one, and publish the result.
    pub async fn revalidate(&mut self) -> Result<SessionState, AuthError> {
        let next = match self.auth.get_session().await? {
            Some(session) => SessionState::Authenticated(session),
            None => SessionState::Anonymous,
        };
        self.set(next);
        Ok(self.state())
    }

    /// Drop a session whose token has expired. Returns whether it did.
    pub fn expire_if_stale(&mut self, now: DateTime<Utc>) -> bool {
        let stale = self.state.borrow().session().map_or(false, |s| s.is_expired(now));
        if stale {
            warn!("Session expired, returning to sign-in");
            self.set(SessionState::Anonymous);
        }
        stale
    }

    /// Release the auth subscription. State is frozen from here on.
    pub fn unmount(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            debug!("Session controller unmounted");
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_some()
    }

    fn apply(&mut self, event: AuthEvent) {
        debug!("Auth event {:?}", event.kind);
        let next = match (event.kind, event.session) {
            (AuthEventKind::SignedOut, _) | (_, None) => SessionState::Anonymous,
            (_, Some(session)) => SessionState::Authenticated(session),
        };
        self.set(next);
    }

    fn set(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AuthError::new(AuthErrorKind::InvalidInput, "A valid email address is required"));
    }
    if password.is_empty() {
        return Err(AuthError::new(AuthErrorKind::InvalidInput, "Password is required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryBackend;

    async fn mounted() -> (Arc<MemoryBackend>, SessionController) {
        let backend = Arc::new(MemoryBackend::new());
        let controller = SessionController::mount(backend.clone()).await.unwrap();
        (backend, controller)
    }

    #[tokio::test]
    async fn starts_anonymous() {
        let (_, controller) = mounted().await;
        assert_eq!(controller.state(), SessionState::Anonymous);
        assert_eq!(controller.screen(), Screen::AuthForm);
    }

    #[tokio::test]
    async fn sign_up_then_task_manager() {
        let (_, mut controller) = mounted().await;
        let outcome = controller.sign_up("harry@hogwarts", "secret").await.unwrap();
        let session = match outcome {
            SignUpOutcome::Authenticated(session) => session,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(controller.screen(), Screen::TaskManager(session));
    }

    #[tokio::test]
    async fn rejects_blank_input_without_calling_provider() {
        let (_, mut controller) = mounted().await;
        let err = controller.sign_in("", "secret").await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::InvalidInput);
        let err = controller.sign_in("harry@hogwarts", "").await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn watchers_see_transitions() {
        let (_, mut controller) = mounted().await;
        let mut rx = controller.watch();
        controller.sign_up("harry@hogwarts", "secret").await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().session().is_some());
    }

    #[tokio::test]
    async fn stale_session_expires() {
        let (_, mut controller) = mounted().await;
        controller.sign_up("harry@hogwarts", "secret").await.unwrap();
        assert!(!controller.expire_if_stale(Utc::now()));
        assert!(controller.expire_if_stale(Utc::now() + chrono::Duration::days(365)));
        assert_eq!(controller.screen(), Screen::AuthForm);
    }
}
