//! Login state machine.
//!
//! `advance` walks an account from its current state toward a target label,
//! one network-backed step at a time:
//!
//! | from       | action            | success                | failure                                   |
//! |------------|-------------------|------------------------|-------------------------------------------|
//! | Engaged    | fetch keys        | Cohabiting             | Separated / Doghouse / stay               |
//! | Cohabiting | sign certificate  | Married                | Separated / Doghouse / stay               |
//! | Married    | check certificate | stays Married if valid | Cohabiting when the certificate expired   |
//!
//! Separated and Doghouse have no outgoing edges. Every step is reported to
//! the delegate, and the delegate's `handle_final` fires exactly once per
//! `advance`, even when no step was taken.

use crate::account::{AccountState, Cohabiting, Engaged, Secret32, StateLabel};
use crate::auth_client::AuthClient;
use crate::clock::duration_millis;
use crate::error::{CloudError, CloudResult};
use crate::logging::obfuscate_email;
use driftsync_crypto::{generate_signing_keypair, quick_stretch_password, unwrap_kb, SigningKeyPair};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The step the machine attempts from a given state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginAction {
    FetchKeys,
    SignCertificate,
    CheckCertificate,
}

/// How a step moved the account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionKind {
    /// Moved toward Married.
    Progress,
    /// Fell back: lost credentials, needs upgrade, or certificate expired.
    Reset,
    /// No change; nothing more can be done in this run.
    Stay,
}

/// One step taken by the machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: StateLabel,
    pub to: StateLabel,
    pub action: LoginAction,
    pub kind: TransitionKind,
    pub detail: String,
}

/// Inputs and observers for [`LoginStateMachine::advance`].
pub trait LoginDelegate: Send + Sync {
    fn client(&self) -> Arc<dyn AuthClient>;

    fn now_millis(&self) -> u64;

    fn certificate_duration(&self) -> Duration;

    fn generate_key_pair(&self) -> CloudResult<SigningKeyPair> {
        Ok(generate_signing_keypair())
    }

    fn handle_transition(&self, transition: &Transition, state: &AccountState);

    /// Called once when `advance` stops.
    fn handle_final(&self, state: AccountState);
}

/// The action available from `state` at `now_ms`, or `None` when it has no
/// outgoing edge.
pub fn next_action(state: &AccountState, now_ms: u64) -> Option<LoginAction> {
    match state {
        AccountState::Engaged(_) => Some(LoginAction::FetchKeys),
        AccountState::Cohabiting(_) => Some(LoginAction::SignCertificate),
        AccountState::Married(m) if !m.has_valid_certificate(now_ms) => {
            Some(LoginAction::CheckCertificate)
        }
        AccountState::Married(_) | AccountState::Separated(_) | AccountState::Doghouse(_) => None,
    }
}

fn is_settled(state: &AccountState, target: StateLabel, now_ms: u64) -> bool {
    if state.label() != target {
        return false;
    }
    match state {
        AccountState::Married(m) => m.has_valid_certificate(now_ms),
        _ => true,
    }
}

#[derive(Clone, Debug)]
pub struct LoginStateMachine {
    max_steps: usize,
}

impl Default for LoginStateMachine {
    fn default() -> Self {
        Self { max_steps: 8 }
    }
}

impl LoginStateMachine {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps: max_steps.max(1),
        }
    }

    /// Advances `initial` toward `target` and returns where it ended up.
    pub async fn advance(
        &self,
        initial: AccountState,
        target: StateLabel,
        delegate: &dyn LoginDelegate,
    ) -> AccountState {
        let mut state = initial;
        let mut steps = 0;

        loop {
            let now = delegate.now_millis();
            if is_settled(&state, target, now) {
                break;
            }
            let Some(action) = next_action(&state, now) else {
                break;
            };
            if steps >= self.max_steps {
                warn!("login gave up after {steps} steps in state {}", state.label());
                break;
            }
            steps += 1;

            let (transition, next) = self.step(action, state, delegate).await;
            debug!(
                "login {:?}: {} -> {} ({:?}) {}",
                transition.action, transition.from, transition.to, transition.kind, transition.detail
            );
            delegate.handle_transition(&transition, &next);
            state = next;
            if transition.kind == TransitionKind::Stay {
                break;
            }
        }

        delegate.handle_final(state.clone());
        state
    }

    async fn step(
        &self,
        action: LoginAction,
        state: AccountState,
        delegate: &dyn LoginDelegate,
    ) -> (Transition, AccountState) {
        let from = state.label();
        let outcome = match (&state, action) {
            (AccountState::Engaged(engaged), LoginAction::FetchKeys) => {
                fetch_keys(engaged, delegate).await
            }
            (AccountState::Cohabiting(cohabiting), LoginAction::SignCertificate) => {
                sign_certificate(cohabiting, delegate).await
            }
            (AccountState::Married(married), LoginAction::CheckCertificate) => {
                let cohabiting = married.clone().make_cohabiting();
                return (
                    Transition {
                        from,
                        to: StateLabel::Cohabiting,
                        action,
                        kind: TransitionKind::Reset,
                        detail: "certificate expired".to_string(),
                    },
                    AccountState::Cohabiting(cohabiting),
                );
            }
            _ => Err(CloudError::InvalidState {
                expected: format!("{action:?}"),
                actual: from.to_string(),
            }),
        };

        match outcome {
            Ok(StepResult::Advanced(next)) => (
                Transition {
                    from,
                    to: next.label(),
                    action,
                    kind: TransitionKind::Progress,
                    detail: String::new(),
                },
                next,
            ),
            Ok(StepResult::Unverified(next)) => (
                Transition {
                    from,
                    to: next.label(),
                    action,
                    kind: TransitionKind::Stay,
                    detail: "account not verified".to_string(),
                },
                next,
            ),
            Err(err) => fall_back(from, action, state, err),
        }
    }
}

enum StepResult {
    Advanced(AccountState),
    Unverified(AccountState),
}

/// Maps a failed step onto the state the account should land in.
fn fall_back(
    from: StateLabel,
    action: LoginAction,
    state: AccountState,
    err: CloudError,
) -> (Transition, AccountState) {
    let (kind, next) = if err.is_invalid_authentication() {
        info!("credentials for {} rejected; separating", obfuscate_email(state.email()));
        (TransitionKind::Reset, state.separated())
    } else if err.is_upgrade_required() {
        (TransitionKind::Reset, state.doghouse())
    } else if err.is_unverified() {
        let next = match state {
            AccountState::Engaged(engaged) => AccountState::Engaged(Engaged {
                verified: false,
                ..engaged
            }),
            other => other,
        };
        (TransitionKind::Stay, next)
    } else {
        (TransitionKind::Stay, state)
    };
    (
        Transition {
            from,
            to: next.label(),
            action,
            kind,
            detail: err.to_string(),
        },
        next,
    )
}

async fn fetch_keys(engaged: &Engaged, delegate: &dyn LoginDelegate) -> CloudResult<StepResult> {
    let client = delegate.client();
    let mut engaged = engaged.clone();

    if !engaged.verified {
        let status = client.recovery_email_status(&engaged.session_token).await?;
        if !status.verified {
            return Ok(StepResult::Unverified(AccountState::Engaged(engaged)));
        }
        engaged.verified = true;
    }

    let keys = client.fetch_keys(&engaged.key_fetch_token).await?;
    let ka = Secret32::from_hex(&keys.ka)
        .ok_or_else(|| CloudError::Malformed("kA is not 32 hex-encoded bytes".into()))?;
    let wrap_kb = Secret32::from_hex(&keys.wrap_kb)
        .ok_or_else(|| CloudError::Malformed("wrapKB is not 32 hex-encoded bytes".into()))?;
    let kb = unwrap_kb(wrap_kb.as_bytes(), engaged.unwrap_kb.as_bytes());
    let key_pair = delegate.generate_key_pair()?;

    Ok(StepResult::Advanced(AccountState::Cohabiting(Cohabiting {
        email: engaged.email,
        uid: engaged.uid,
        session_token: engaged.session_token,
        ka,
        kb: Secret32(kb),
        key_pair,
    })))
}

async fn sign_certificate(
    cohabiting: &Cohabiting,
    delegate: &dyn LoginDelegate,
) -> CloudResult<StepResult> {
    let duration_ms = duration_millis(delegate.certificate_duration());
    let certificate = delegate
        .client()
        .sign_certificate(
            &cohabiting.session_token,
            &cohabiting.key_pair.public_key_json(),
            duration_ms,
        )
        .await?;
    if certificate.is_empty() {
        return Err(CloudError::Malformed("empty certificate".into()));
    }
    Ok(StepResult::Advanced(AccountState::Married(
        cohabiting.clone().with_certificate(certificate),
    )))
}

// ── Account entry points outside a sync ──

/// Signs in with email and password, producing an Engaged account.
pub async fn sign_in(client: &dyn AuthClient, email: &str, password: &str) -> CloudResult<AccountState> {
    let stretched = quick_stretch_password(email, password)?;
    let resp = client.login(email, &stretched.auth_pw).await?;
    info!("signed in as {}", obfuscate_email(email));
    Ok(AccountState::Engaged(Engaged {
        email: email.to_string(),
        uid: resp.uid,
        verified: resp.verified,
        session_token: resp.session_token,
        key_fetch_token: resp.key_fetch_token,
        unwrap_kb: Secret32(stretched.unwrap_kb),
    }))
}

/// Asks the provider to resend the verification email for an Engaged account.
pub async fn resend_verification(client: &dyn AuthClient, state: &AccountState) -> CloudResult<()> {
    match state {
        AccountState::Engaged(engaged) => {
            client.resend_verification_code(&engaged.session_token).await?;
            info!("verification code resent to {}", obfuscate_email(&engaged.email));
            Ok(())
        }
        other => Err(CloudError::InvalidState {
            expected: StateLabel::Engaged.to_string(),
            actual: other.label().to_string(),
        }),
    }
}
