//! One sync attempt, from backoff checks to storage sync.
//!
//! `run_once` consults the scheduler and token-server backoff, walks the
//! account toward Married, exchanges an assertion for a storage token,
//! checks the storage host's backoff and finally runs the storage engine.
//! Every path ends in exactly one [`SyncOutcome`].

use crate::account::{AccountState, Married, NeededAction, StateLabel};
use crate::auth_client::{AuthClient, HttpAuthClient};
use crate::backoff::{purpose, BackoffLedger};
use crate::clock::{duration_millis, Clock};
use crate::completion::{completion, Completion};
use crate::config::SyncConfig;
use crate::error::{CloudError, CloudResult};
use crate::logging::obfuscate_email;
use crate::login::{self, LoginDelegate, LoginStateMachine, Transition};
use crate::notifier::{LoggingNotifier, SyncNotifier};
use crate::schedule::{LoggingScheduler, PeriodicScheduler, SchedulePolicy};
use crate::storage::{StorageEngine, StorageOutcome, StorageSession};
use crate::store::AccountStore;
use crate::token_client::{HttpTokenClient, TokenClient};
use crate::types::{SyncExtras, SyncOutcome, TokenServerToken};
use crate::verifier::{AssertionVerifier, HttpVerifierClient, VerifierVerdict};
use driftsync_crypto::RequestSigner;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

pub struct SyncOrchestrator {
    config: SyncConfig,
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<BackoffLedger>,
    auth_client: Arc<dyn AuthClient>,
    token_client: Arc<dyn TokenClient>,
    verifier: Arc<dyn AssertionVerifier>,
    storage: Arc<dyn StorageEngine>,
    notifier: Arc<dyn SyncNotifier>,
    schedule: SchedulePolicy,
    machine: LoginStateMachine,
    audience: String,
    token_host: String,
}

impl SyncOrchestrator {
    /// Builds an orchestrator with HTTP clients for every endpoint in `config`.
    pub fn new(
        config: SyncConfig,
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<BackoffLedger>,
        storage: Arc<dyn StorageEngine>,
    ) -> CloudResult<Self> {
        config.validate()?;
        let audience = config.assertion_audience()?;
        let token_host = config.token_server_host()?;
        let schedule = SchedulePolicy::new(&config, Arc::clone(&ledger), Arc::new(LoggingScheduler));

        Ok(Self {
            auth_client: Arc::new(HttpAuthClient::new(&config)?),
            token_client: Arc::new(HttpTokenClient::new(&config, ledger.clock())?),
            verifier: Arc::new(HttpVerifierClient::new(&config)?),
            notifier: Arc::new(LoggingNotifier),
            machine: LoginStateMachine::new(config.max_login_steps),
            config,
            accounts,
            ledger,
            storage,
            schedule,
            audience,
            token_host,
        })
    }

    pub fn with_auth_client(mut self, client: Arc<dyn AuthClient>) -> Self {
        self.auth_client = client;
        self
    }

    pub fn with_token_client(mut self, client: Arc<dyn TokenClient>) -> Self {
        self.token_client = client;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn AssertionVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SyncNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn PeriodicScheduler>) -> Self {
        self.schedule = SchedulePolicy::new(&self.config, Arc::clone(&self.ledger), scheduler);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<BackoffLedger> {
        &self.ledger
    }

    // ── Account management ──

    /// Signs in and stores the resulting Engaged account.
    pub async fn sign_in(&self, email: &str, password: &str) -> CloudResult<AccountState> {
        let state = login::sign_in(self.auth_client.as_ref(), email, password).await?;
        self.accounts.save_state(&state)?;
        self.notifier.clear();
        Ok(state)
    }

    /// Resends the verification email for the stored account.
    pub async fn resend_verification(&self) -> CloudResult<()> {
        let state = self.accounts.load_state()?.ok_or(CloudError::AuthRequired)?;
        login::resend_verification(self.auth_client.as_ref(), &state).await
    }

    /// Asks the remote verifier about `assertion` and logs its verdict.
    pub async fn debug_assertion(&self, assertion: &str) -> CloudResult<VerifierVerdict> {
        let verdict = self.verifier.verify(&self.audience, assertion).await?;
        match &verdict {
            VerifierVerdict::Okay(body) => info!("verifier accepted assertion: {body}"),
            VerifierVerdict::Failure(body) => warn!("verifier rejected assertion: {body}"),
        }
        Ok(verdict)
    }

    // ── Sync ──

    /// Runs one sync attempt.
    pub async fn run_once(&self, extras: &SyncExtras) -> SyncOutcome {
        let span = info_span!("sync", attempt = %Uuid::new_v4(), forced = extras.forced);
        async {
            let outcome = self.attempt(extras).await;
            match &outcome {
                SyncOutcome::Success => info!("sync finished"),
                SyncOutcome::Postponed { delay } => info!("sync postponed for {}ms", delay.as_millis()),
                other => warn!("sync did not complete: {other}"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, extras: &SyncExtras) -> SyncOutcome {
        if let Err(outcome) = self.gate(purpose::SCHEDULER, extras.forced) {
            return outcome;
        }
        if let Err(outcome) = self.gate(purpose::TOKEN_SERVER, extras.forced) {
            return outcome;
        }

        if let Err(e) = self.schedule.configure_backoff_before_syncing() {
            warn!("could not record scheduler rate limit: {e}");
        }

        let initial = match self.accounts.load_state() {
            Ok(Some(state)) => state,
            Ok(None) => {
                return SyncOutcome::Unrecoverable {
                    reason: "no account configured".to_string(),
                };
            }
            Err(e) => return recoverable(e),
        };
        debug!("account {} starts in {}", obfuscate_email(initial.email()), initial.label());

        let (state, last_transition) = match self.login(initial.clone()).await {
            Ok(result) => result,
            Err(outcome) => return outcome,
        };
        self.schedule.on_handle_final(state.needed_action());

        let AccountState::Married(married) = &state else {
            self.persist(&initial, &state);
            return self.not_married(&state, last_transition);
        };

        match self.fetch_token(married).await {
            Ok(token) => {
                self.persist(&initial, &state);
                self.notifier.clear();
                self.sync_storage(married, token, extras).await
            }
            Err(TokenFailure::Rejected { reason }) => {
                info!("token server rejected assertion; dropping certificate");
                let demoted = AccountState::Cohabiting(married.clone().make_cohabiting());
                self.persist(&initial, &demoted);
                self.notifier
                    .notify_needs_action(demoted.email(), demoted.label(), NeededAction::NeedsPassword);
                SyncOutcome::Unrecoverable { reason }
            }
            Err(TokenFailure::Outcome(outcome)) => {
                self.persist(&initial, &state);
                outcome
            }
        }
    }

    /// `Postponed` while `purpose` is backing off, unless the attempt is forced.
    fn gate(&self, purpose: &str, forced: bool) -> Result<(), SyncOutcome> {
        match self.ledger.should_proceed(purpose, forced) {
            Ok(true) => Ok(()),
            Ok(false) => match self.ledger.delay_remaining(purpose) {
                Ok(delay) => Err(SyncOutcome::Postponed { delay }),
                Err(e) => Err(recoverable(e)),
            },
            Err(e) => Err(recoverable(e)),
        }
    }

    /// Writes `state` once per attempt, and only when it moved away from `initial`.
    fn persist(&self, initial: &AccountState, state: &AccountState) {
        if state == initial {
            return;
        }
        if let Err(e) = self.accounts.save_state(state) {
            error!("failed to persist {} account: {e}", state.label());
        }
    }

    async fn login(
        &self,
        initial: AccountState,
    ) -> Result<(AccountState, Option<Transition>), SyncOutcome> {
        let (done, waiter) = completion();
        let delegate = AttemptDelegate {
            client: Arc::clone(&self.auth_client),
            clock: self.ledger.clock(),
            certificate_duration: self.config.certificate_duration(),
            done,
            last_transition: Mutex::new(None),
        };
        self.machine.advance(initial, StateLabel::Married, &delegate).await;

        let state = waiter.wait().await.map_err(|_| SyncOutcome::Recoverable {
            reason: "login finished without a final state".to_string(),
        })?;
        let last = delegate.last_transition.lock().ok().and_then(|t| t.clone());
        Ok((state, last))
    }

    fn not_married(&self, state: &AccountState, last: Option<Transition>) -> SyncOutcome {
        let action = state.needed_action();
        if action == NeededAction::None {
            let reason = last
                .map(|t| t.detail)
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| format!("login stopped in state {}", state.label()));
            return SyncOutcome::Recoverable { reason };
        }
        self.notifier.notify_needs_action(state.email(), state.label(), action);
        SyncOutcome::CannotSync {
            label: state.label(),
            action,
        }
    }

    async fn fetch_token(&self, married: &Married) -> Result<TokenServerToken, TokenFailure> {
        let issued_at = self.ledger.adjusted_now_millis(&self.token_host);
        let assertion = married
            .generate_assertion(&self.audience, issued_at, duration_millis(self.config.assertion_duration()))
            .map_err(TokenFailure::recoverable)?;

        if self.config.debug_assertions {
            if let Err(e) = self.debug_assertion(&assertion).await {
                warn!("assertion verifier unavailable: {e}");
            }
        }

        let response = self
            .token_client
            .exchange(&assertion, &married.client_state())
            .await
            .map_err(TokenFailure::recoverable)?;

        if let Some(server_ms) = response.server_timestamp_ms {
            let skew = self.ledger.record_skew_from_timestamp(&self.token_host, server_ms);
            debug!("token server skew now {skew}s");
        }

        let backoff = response.backoff.total_backoff().filter(|d| !d.is_zero());
        if let Some(delay) = backoff {
            self.apply_token_backoff(delay);
        }

        let error = match response.result {
            Ok(token) => return Ok(token),
            Err(e) => e,
        };
        if backoff.is_none() && !self.config.debug_assertions {
            if let Err(e) = self.debug_assertion(&assertion).await {
                warn!("assertion verifier unavailable: {e}");
            }
        }

        Err(match error {
            e if e.is_invalid_authentication() => TokenFailure::Rejected { reason: e.to_string() },
            e => match backoff {
                Some(delay) => TokenFailure::Outcome(SyncOutcome::Postponed { delay }),
                None => TokenFailure::recoverable(e),
            },
        })
    }

    fn apply_token_backoff(&self, delay: Duration) {
        if let Err(e) = self.ledger.extend(purpose::TOKEN_SERVER, delay) {
            warn!("could not record token server backoff: {e}");
        }
        if let Err(e) = self.schedule.configure_backoff_on_backoff(delay) {
            warn!("could not record scheduler backoff: {e}");
        }
    }

    async fn sync_storage(
        &self,
        married: &Married,
        token: TokenServerToken,
        extras: &SyncExtras,
    ) -> SyncOutcome {
        let endpoint = match Url::parse(&token.api_endpoint) {
            Ok(url) => url,
            Err(e) => return recoverable(e),
        };
        let host = endpoint.host_str().unwrap_or_default().to_ascii_lowercase();

        match self.ledger.switch_storage_host(&host) {
            Ok(true) => debug!("syncing against storage host {host}"),
            Ok(false) => {}
            Err(e) => return recoverable(e),
        }
        if let Err(outcome) = self.gate(&purpose::storage(&host), extras.forced) {
            return outcome;
        }

        let key_bundle = match married.key_bundle() {
            Ok(bundle) => bundle,
            Err(e) => return recoverable(e),
        };
        let signer = RequestSigner::new(&token.id, token.key.as_bytes(), self.ledger.skew_secs(&host));
        let session = StorageSession::new(
            token.uid.clone(),
            endpoint,
            signer,
            key_bundle,
            extras.forced,
            Arc::clone(&self.ledger),
            self.schedule.clone(),
        );

        let storage = Arc::clone(&self.storage);
        let outcome = match tokio::spawn(async move { storage.sync(session).await }).await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                error!("storage engine failed: {join_err}");
                return SyncOutcome::Recoverable {
                    reason: format!("storage engine failed: {join_err}"),
                };
            }
        };

        match outcome {
            StorageOutcome::Success { other_clients } => {
                self.schedule.on_successful_sync(other_clients);
                SyncOutcome::Success
            }
            StorageOutcome::Error(e) => SyncOutcome::Recoverable {
                reason: format!("{e:#}"),
            },
            StorageOutcome::Aborted { reason } => SyncOutcome::Recoverable {
                reason: format!("aborted: {reason}"),
            },
            StorageOutcome::Unauthorized => {
                self.schedule.on_unauthorized();
                SyncOutcome::Recoverable {
                    reason: "storage server rejected the token".to_string(),
                }
            }
            StorageOutcome::UpgradeRequired => {
                self.schedule.on_upgrade_required();
                self.notifier
                    .notify_needs_action(married.email(), StateLabel::Married, NeededAction::NeedsUpgrade);
                SyncOutcome::Unrecoverable {
                    reason: "storage server requires a client upgrade".to_string(),
                }
            }
        }
    }
}

fn recoverable(err: impl std::fmt::Display) -> SyncOutcome {
    SyncOutcome::Recoverable {
        reason: err.to_string(),
    }
}

/// Why no storage token came back from the exchange.
enum TokenFailure {
    /// The token server refused our credentials; the certificate must go.
    Rejected { reason: String },
    Outcome(SyncOutcome),
}

impl TokenFailure {
    fn recoverable(err: impl std::fmt::Display) -> Self {
        TokenFailure::Outcome(recoverable(err))
    }
}

/// Login delegate for a single attempt.
struct AttemptDelegate {
    client: Arc<dyn AuthClient>,
    clock: Arc<dyn Clock>,
    certificate_duration: Duration,
    done: Completion<AccountState>,
    last_transition: Mutex<Option<Transition>>,
}

impl LoginDelegate for AttemptDelegate {
    fn client(&self) -> Arc<dyn AuthClient> {
        Arc::clone(&self.client)
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    fn certificate_duration(&self) -> Duration {
        self.certificate_duration
    }

    fn handle_transition(&self, transition: &Transition, _state: &AccountState) {
        if let Ok(mut last) = self.last_transition.lock() {
            *last = Some(transition.clone());
        }
    }

    fn handle_final(&self, state: AccountState) {
        self.done.complete(state);
    }
}
