//! crates/plantai_core/src/account.rs
//!
//! Sign-up and sign-in rules layered over the [`AuthService`] port.

use crate::domain::AuthSession;
use crate::ports::{AuthService, PortError, PortResult};
use tracing::info;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Guidance shown when the provider still requires email confirmation.
pub const EMAIL_NOT_CONFIRMED_GUIDANCE: &str = "Acesse o painel do Supabase > Auth > Providers > Email e desative 'Confirm email' para pular a verificação.";

const GENERIC_AUTH_FAILURE: &str = "Ocorreu um erro. Tente novamente.";

/// Rejects obviously malformed credentials before calling the provider.
pub fn validate_credentials(email: &str, password: &str) -> PortResult<()> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(PortError::InvalidInput("Informe um email válido.".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PortError::InvalidInput(format!(
            "A senha deve ter pelo menos {} caracteres.",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Creates an account and returns a usable session.
///
/// When the provider holds the session back pending email confirmation, a
/// direct sign-in is attempted so accounts work as soon as confirmation is
/// switched off.
pub async fn register(auth: &dyn AuthService, email: &str, password: &str) -> PortResult<AuthSession> {
    validate_credentials(email, password)?;

    if let Some(session) = auth.sign_up(email, password).await? {
        return Ok(session);
    }

    info!("Sign-up for {} returned no session, trying password sign-in", email);
    auth.sign_in(email, password).await
}

pub async fn login(auth: &dyn AuthService, email: &str, password: &str) -> PortResult<AuthSession> {
    validate_credentials(email, password)?;
    auth.sign_in(email, password).await
}

/// Inline text for a failed sign-up or sign-in.
pub fn auth_failure_message(err: &PortError) -> String {
    match err {
        PortError::EmailNotConfirmed => EMAIL_NOT_CONFIRMED_GUIDANCE.to_string(),
        PortError::Rejected(message) | PortError::InvalidInput(message) if !message.is_empty() => {
            message.clone()
        }
        _ => GENERIC_AUTH_FAILURE.to_string(),
    }
}
