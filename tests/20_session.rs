use anyhow::Result;
use std::sync::Arc;

use crudsync::client::{
    AuthErrorKind, AuthProvider, MemoryBackend, Screen, SessionController, SessionState, SignUpOutcome,
};

async fn controller(backend: &Arc<MemoryBackend>) -> Result<SessionController> {
    Ok(SessionController::mount(backend.clone()).await?)
}

#[tokio::test]
async fn duplicate_sign_up_keeps_anonymous() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    backend.sign_up("harry@hogwarts", "secret").await?;

    let mut session = controller(&backend).await?;
    session.sign_out().await?;
    session.process_events();
    assert_eq!(session.state(), SessionState::Anonymous);

    let err = session.sign_up("harry@hogwarts", "secret").await.unwrap_err();
    assert_eq!(err.kind, AuthErrorKind::AlreadyRegistered);
    assert_eq!(err.to_string(), "User already registered");
    assert_eq!(session.screen(), Screen::AuthForm);
    Ok(())
}

#[tokio::test]
async fn mount_picks_up_existing_session() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    backend.sign_up("harry@hogwarts", "secret").await?;

    let session = controller(&backend).await?;
    assert!(session.is_authenticated());
    assert!(matches!(session.screen(), Screen::TaskManager(_)));
    Ok(())
}

#[tokio::test]
async fn external_expiry_returns_to_auth_form() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = controller(&backend).await?;
    session.sign_up("hermione@hogwarts", "secret").await?;
    session.process_events();
    assert!(session.is_authenticated());

    backend.expire_session();
    let state = session.next_change().await;
    assert_eq!(state, Some(SessionState::Anonymous));
    assert_eq!(session.screen(), Screen::AuthForm);
    Ok(())
}

#[tokio::test]
async fn token_refresh_keeps_user() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = controller(&backend).await?;
    session.sign_up("ron@hogwarts", "secret").await?;
    session.process_events();

    let refreshed = backend.refresh_session()?;
    session.process_events();
    assert_eq!(session.session(), Some(refreshed));
    Ok(())
}

#[tokio::test]
async fn failed_sign_in_leaves_state_unchanged() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = controller(&backend).await?;
    session.sign_up("ron@hogwarts", "secret").await?;
    let before = session.state();

    let err = session.sign_in("ron@hogwarts", "wrong-password").await.unwrap_err();
    assert_eq!(err.kind, AuthErrorKind::InvalidCredentials);
    assert_eq!(session.state(), before);
    Ok(())
}

#[tokio::test]
async fn failed_sign_out_keeps_session() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = controller(&backend).await?;
    session.sign_up("ron@hogwarts", "secret").await?;

    backend.set_offline(true);
    let err = session.sign_out().await.unwrap_err();
    assert_eq!(err.kind, AuthErrorKind::Network);
    assert!(session.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn pending_confirmation_stays_anonymous() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new().require_email_confirmation(true));
    let mut session = controller(&backend).await?;

    let outcome = session.sign_up("neville@hogwarts", "secret").await?;
    assert_eq!(outcome, SignUpOutcome::ConfirmationPending);
    assert_eq!(session.state(), SessionState::Anonymous);

    backend.confirm_email("neville@hogwarts");
    session.sign_in("neville@hogwarts", "secret").await?;
    assert!(session.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn unmounted_controller_ignores_events() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = controller(&backend).await?;
    session.sign_up("draco@hogwarts", "secret").await?;

    session.unmount();
    assert!(!session.is_mounted());
    backend.expire_session();
    assert_eq!(session.process_events(), 0);
    assert!(session.next_change().await.is_none());
    assert!(session.is_authenticated());
    Ok(())
}
