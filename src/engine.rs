//! LicenseValidationEngine: registration, login, validation, renewal and
//! revocation on top of the device identity, vault, local cache and remote
//! store.
//!
//! ## Online and offline paths
//!
//! Remote calls are bounded by the policy timeout. A timeout or any other
//! [`LicenseError::RemoteUnavailable`] sends the engine down the offline path.
//! A negative verdict from a reachable store (revoked, expired, hardware
//! mismatch) is final and is never replaced by the local copy.
//!
//! ## Grace period
//!
//! Offline use is measured from the last successful online validation:
//!
//! | since last validation        | state         | offline use            |
//! |------------------------------|---------------|------------------------|
//! | `<= interval`                | `Fresh`       | allowed                |
//! | `<= interval + grace`        | `GracePeriod` | allowed, flagged       |
//! | `> interval + grace`         | `Locked`      | refused until online   |
//!
//! Every successful online validation restarts the clock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::cache::{CachedLicense, CachedUser, LocalLicenseCache, CACHE_VERSION};
use crate::config::LiqueenConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::hardware::{DeviceIdentity, HardwareFingerprint};
use crate::license_code::generate_unique_license_code;
use crate::logging::{log_license_event, log_login_attempt, mask_email, short_id, LicenseEvent};
use crate::remote::{
    self, LicenseRecord, LicenseStatus, LicenseType, LicenseUpdate, RemoteLicenseStore, Role,
    UserRecord, UserUpdate,
};
use crate::responses::{
    days_until, GraceState, LicenseData, LicenseStatusReport, LoginMode, LoginResult,
    OfflineValidation, OnlineValidation, PeriodicOutcome, RegistrationResult, RenewalResult,
    Session, UserData, DAY_MS,
};
use crate::storage::{KeyValueStore, SecureStore};
use crate::vault::SymmetricVault;

/// Pseudo license code reported for break-glass sessions.
pub const MASTER_LICENSE_CODE: &str = "MASTER-ACCESS";

const MASTER_UID: &str = "master";

/// Attempts made to find an unused code when issuing one.
const ISSUE_RETRIES: u32 = 10;

/// Timing and identity rules the engine enforces.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    pub validation_interval_ms: i64,
    pub grace_period_ms: i64,
    pub standard_validity_days: u32,
    pub admin_validity_days: u32,
    pub master_validity_days: u32,
    pub admin_email: String,
    pub master_email: String,
    pub master_password_hash: String,
    pub remote_timeout: Duration,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self::from(&LiqueenConfig::default())
    }
}

impl From<&LiqueenConfig> for EnginePolicy {
    fn from(config: &LiqueenConfig) -> Self {
        let license = &config.license;
        Self {
            validation_interval_ms: license.validation_interval_days as i64 * DAY_MS,
            grace_period_ms: license.grace_period_days as i64 * DAY_MS,
            standard_validity_days: license.standard_validity_days,
            admin_validity_days: license.admin_validity_days,
            master_validity_days: license.master_validity_days,
            admin_email: license.admin_email.clone(),
            master_email: config.master.email.clone(),
            master_password_hash: config.master.password_hash.clone(),
            remote_timeout: Duration::from_secs(config.remote.timeout_secs),
        }
    }
}

impl EnginePolicy {
    /// Classify the time elapsed since the last online validation.
    pub fn grace_state(&self, elapsed_ms: i64) -> GraceState {
        let hard_limit = self.validation_interval_ms + self.grace_period_ms;
        if elapsed_ms > self.validation_interval_ms && elapsed_ms > hard_limit {
            GraceState::Locked
        } else if elapsed_ms > self.validation_interval_ms {
            GraceState::GracePeriod
        } else {
            GraceState::Fresh
        }
    }

    fn role_for(&self, email: &str) -> Role {
        if email.trim().eq_ignore_ascii_case(self.admin_email.trim()) {
            Role::Admin
        } else {
            Role::User
        }
    }

    fn validity_ms(&self, role: Role, license_type: LicenseType) -> i64 {
        match role {
            Role::Admin => self.admin_validity_days as i64 * DAY_MS,
            _ => license_type.validity_ms(self.standard_validity_days),
        }
    }
}

/// Profile details captured at registration.
#[derive(Debug, Clone, Default)]
pub struct RegistrationProfile {
    pub display_name: String,
    pub company: Option<String>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn format_date(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// `Ok` only for a license in the `used` state.
fn status_verdict(record: &LicenseRecord, code: &str) -> LicenseResult<()> {
    match record.status {
        LicenseStatus::Used => Ok(()),
        LicenseStatus::Revoked => Err(LicenseError::LicenseRevoked(
            record
                .revoked_reason
                .clone()
                .unwrap_or_else(|| code.to_string()),
        )),
        LicenseStatus::Expired => Err(LicenseError::LicenseExpired(code.to_string())),
        other => Err(LicenseError::LicenseNotActivated(format!(
            "{code} is {other}"
        ))),
    }
}

/// The license orchestrator. One per process.
pub struct LicenseValidationEngine {
    vault: SymmetricVault,
    identity: Arc<dyn DeviceIdentity>,
    cache: LocalLicenseCache,
    remote: Arc<dyn RemoteLicenseStore>,
    policy: EnginePolicy,
    session: RwLock<Option<Session>>,
}

impl LicenseValidationEngine {
    pub fn new(
        vault: SymmetricVault,
        identity: Arc<dyn DeviceIdentity>,
        cache: LocalLicenseCache,
        remote: Arc<dyn RemoteLicenseStore>,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            vault,
            identity,
            cache,
            remote,
            policy,
            session: RwLock::new(None),
        }
    }

    /// Wire up the engine from configuration: OS secure storage, the
    /// machine fingerprint and the configured remote store.
    pub fn from_config(config: &LiqueenConfig) -> LicenseResult<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(SecureStore::from_config(&config.storage));
        let vault = SymmetricVault::default();
        let identity = Arc::new(HardwareFingerprint::new(Arc::clone(&store)));
        let cache = LocalLicenseCache::new(store, vault.clone());
        let remote = remote::connect(&config.remote)?;

        info!(remote = remote.name(), "License engine configured");
        Ok(Self::new(vault, identity, cache, remote, EnginePolicy::from(config)))
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub fn vault(&self) -> &SymmetricVault {
        &self.vault
    }

    /// Fingerprint of the current device.
    pub async fn fingerprint(&self) -> String {
        self.identity.fingerprint().await
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub async fn logout(&self) {
        if let Some(session) = self.session.write().await.take() {
            info!(email = %mask_email(&session.user.email), "Session closed");
        }
    }

    async fn open_session(&self, user: UserData, license_code: Option<String>, mode: LoginMode) {
        *self.session.write().await = Some(Session {
            user,
            license_code,
            mode,
            started_at: now_ms(),
        });
    }

    async fn require_privileged(&self, action: &str) -> LicenseResult<Session> {
        match self.session.read().await.as_ref() {
            None => Err(LicenseError::NotAuthenticated(format!(
                "sign in as an administrator to {action}"
            ))),
            Some(s) if !s.user.role.is_privileged() => Err(LicenseError::PermissionDenied(
                format!("only administrators may {action}"),
            )),
            Some(s) => Ok(s.clone()),
        }
    }

    /// Run one remote operation under the policy timeout.
    async fn remote_call<T, F>(&self, op: &'static str, fut: F) -> LicenseResult<T>
    where
        F: Future<Output = LicenseResult<T>>,
    {
        match tokio::time::timeout(self.policy.remote_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, remote = self.remote.name(), "Remote call timed out");
                Err(LicenseError::RemoteUnavailable(format!(
                    "{op} timed out after {} ms",
                    self.policy.remote_timeout.as_millis()
                )))
            }
        }
    }

    /// Look up a code that is about to be activated.
    async fn fetch_available(&self, code: &str) -> LicenseResult<LicenseRecord> {
        match self.remote_call("get_license", self.remote.get_license(code)).await? {
            None => Err(LicenseError::CodeNotFound(code.to_string())),
            Some(record) if record.status != LicenseStatus::Available => Err(
                LicenseError::CodeAlreadyUsed(format!("{} is {}", code, record.status)),
            ),
            Some(record) => Ok(record),
        }
    }

    /// Put a license document back to exactly `original`.
    async fn restore_license(&self, original: &LicenseRecord) {
        let fields = LicenseUpdate::from(original);
        let restored = self
            .remote_call("set_license", self.remote.set_license(&original.code, &fields, false))
            .await;
        match restored {
            Ok(()) => warn!(license = %original.code, "Rolled back license document"),
            Err(e) => error!(
                license = %original.code,
                error = %e,
                "Rollback of license document failed"
            ),
        }
    }

    // === Registration ===

    /// Activate `license_code` for a new account bound to this device.
    ///
    /// Remote writes happen before anything is cached locally; if a required
    /// remote write fails the operation aborts and the cache is untouched.
    pub async fn register_with_license(
        &self,
        email: &str,
        password: &str,
        license_code: &str,
        profile: &RegistrationProfile,
    ) -> LicenseResult<RegistrationResult> {
        let email = email.trim();
        let code = normalize_code(license_code);
        if !self.vault.validate_license_code_format(&code) {
            return Err(LicenseError::InvalidLicenseFormat(format!(
                "'{code}' does not match LIQ-YYYY-XXXX-XXXX-ZZZZ"
            )));
        }

        let original = self.fetch_available(&code).await?;
        let role = self.policy.role_for(email);
        let now = now_ms();
        let expiry = now + self.policy.validity_ms(role, original.license_type);
        let fingerprint = self.identity.fingerprint().await;

        let identity = self
            .remote_call("create_account", self.remote.create_account(email, password))
            .await?;

        let activation = LicenseUpdate {
            status: Some(LicenseStatus::Used),
            activated_on: Some(now),
            expiry_date: Some(expiry),
            last_validation: Some(now),
            validation_count: Some(0),
            hardware_id: Some(fingerprint.clone()),
            user_id: Some(identity.uid.clone()),
            user_email: Some(email.to_string()),
            ..Default::default()
        };
        self.remote_call("set_license", self.remote.set_license(&code, &activation, true))
            .await?;

        let user = UserData::new(&identity.uid, email, &profile.display_name, role);
        let user_doc = UserUpdate {
            uid: Some(identity.uid.clone()),
            email: Some(email.to_string()),
            display_name: Some(profile.display_name.clone()),
            company: profile.company.clone(),
            role: Some(role),
            license_code: Some(code.clone()),
            permissions: Some(user.permissions.clone()),
            hardware_id: Some(fingerprint.clone()),
            created_at: Some(now),
            last_login: Some(now),
            previous_licenses: Some(Vec::new()),
        };
        if let Err(e) = self
            .remote_call("set_user", self.remote.set_user(&identity.uid, &user_doc, false))
            .await
        {
            self.restore_license(&original).await;
            return Err(e);
        }

        let cached = CachedLicense {
            license_code: code.clone(),
            expiry_date: expiry,
            hardware_id: fingerprint.clone(),
            user_id: identity.uid.clone(),
            activated_on: now,
            last_validation: now,
            validation_count: 0,
            version: CACHE_VERSION.to_string(),
        };
        self.cache.save_license(&cached, &fingerprint).await?;
        self.cache
            .save_user(
                &CachedUser {
                    email: email.to_string(),
                    uid: identity.uid.clone(),
                    display_name: profile.display_name.clone(),
                    role,
                    password_hash: Some(self.vault.hash_password(password)),
                    last_login: now,
                },
                &fingerprint,
            )
            .await?;

        log_license_event(
            LicenseEvent::Registered,
            &code,
            Some(&format!("role={:?} device={}", role, short_id(&fingerprint))),
        );
        self.open_session(user.clone(), Some(code.clone()), LoginMode::Online)
            .await;

        Ok(RegistrationResult {
            role,
            license_code: code,
            expiry_date: expiry,
            days_remaining: days_until(expiry, now),
            user,
        })
    }

    // === Login ===

    /// Sign in against the remote identity provider, falling back to the
    /// local cache when the remote side cannot be reached.
    pub async fn login_online(&self, email: &str, password: &str) -> LicenseResult<LoginResult> {
        let email = email.trim();
        let identity = match self
            .remote_call("authenticate", self.remote.authenticate(email, password))
            .await
        {
            Ok(identity) => identity,
            Err(e) if e.is_connectivity_failure() => {
                info!(error = %e, "Remote sign-in unavailable, trying offline login");
                return self.login_offline(email, Some(password)).await;
            }
            Err(e) => {
                log_login_attempt(email, "online", false, Some(&e.to_string()));
                return Err(e);
            }
        };

        match self.complete_online_login(&identity.uid, email, password).await {
            Ok(result) => {
                log_login_attempt(email, "online", true, None);
                Ok(result)
            }
            Err(e) if e.is_connectivity_failure() => {
                info!(error = %e, "License check unavailable, trying offline login");
                self.login_offline(email, Some(password)).await
            }
            Err(e) => {
                log_login_attempt(email, "online", false, Some(&e.to_string()));
                Err(e)
            }
        }
    }

    async fn complete_online_login(
        &self,
        uid: &str,
        email: &str,
        password: &str,
    ) -> LicenseResult<LoginResult> {
        let user = self
            .remote_call("get_user", self.remote.get_user(uid))
            .await?
            .ok_or_else(|| {
                LicenseError::AuthenticationFailed(format!(
                    "no user profile exists for {}",
                    mask_email(email)
                ))
            })?;
        let code = user.license_code.clone().ok_or_else(|| {
            LicenseError::LicenseNotActivated("this account has no license".to_string())
        })?;

        let record = self.check_online(&code).await?;
        let now = now_ms();

        let last_login = UserUpdate {
            last_login: Some(now),
            ..Default::default()
        };
        if let Err(e) = self
            .remote_call("set_user", self.remote.set_user(uid, &last_login, true))
            .await
        {
            warn!(error = %e, "Could not record last login");
        }

        let fingerprint = self.identity.fingerprint().await;
        self.cache
            .save_license(&CachedLicense::from_record(&record)?, &fingerprint)
            .await?;
        self.cache
            .save_user(
                &CachedUser {
                    email: user.email.clone(),
                    uid: user.uid.clone(),
                    display_name: user.display_name.clone(),
                    role: user.role,
                    password_hash: Some(self.vault.hash_password(password)),
                    last_login: now,
                },
                &fingerprint,
            )
            .await?;

        let user_data = UserData::from(&user);
        let license = LicenseData::from(&record);
        log_license_event(LicenseEvent::Login, &code, None);
        self.open_session(user_data.clone(), Some(code), LoginMode::Online)
            .await;

        Ok(LoginResult {
            mode: LoginMode::Online,
            user: user_data,
            days_remaining: days_until(license.expiry_date, now),
            license,
            needs_online_validation: false,
        })
    }

    /// Sign in from the local cache only.
    ///
    /// The cached account must be `email`; when `password` is given it must
    /// match the cached hash.
    pub async fn login_offline(&self, email: &str, password: Option<&str>) -> LicenseResult<LoginResult> {
        let email = email.trim();
        let fingerprint = self.identity.fingerprint().await;

        let license = self.cache.load_license(&fingerprint).await?.ok_or_else(|| {
            LicenseError::NoLocalLicense(
                "this device has no stored license; sign in online once to enable offline use"
                    .to_string(),
            )
        })?;
        let user = self.cache.load_user(&fingerprint).await?.ok_or_else(|| {
            LicenseError::NoLocalUser(
                "this device has no stored account; sign in online once to enable offline use"
                    .to_string(),
            )
        })?;

        if user.email != email {
            log_login_attempt(email, "offline", false, Some("account mismatch"));
            return Err(LicenseError::AccountMismatch(format!(
                "This device is registered to {}. To use a different account, reset the device or contact support.",
                user.email
            )));
        }

        if let Some(password) = password {
            let matches = user
                .password_hash
                .as_deref()
                .is_some_and(|hash| self.vault.verify_password(password, hash));
            if !matches {
                log_login_attempt(email, "offline", false, Some("wrong password"));
                return Err(LicenseError::WrongPassword(
                    "the password does not match the one stored on this device".to_string(),
                ));
            }
        }

        let validation = self.validate_offline(&license).await?;

        let mut refreshed = user.clone();
        refreshed.last_login = now_ms();
        if let Err(e) = self.cache.save_user(&refreshed, &fingerprint).await {
            warn!(error = %e, "Could not update cached last login");
        }

        let user_data = UserData::new(&user.uid, &user.email, &user.display_name, user.role);
        log_license_event(
            LicenseEvent::OfflineLogin,
            &license.license_code,
            Some(&format!("grace_state={:?}", validation.grace_state)),
        );
        self.open_session(
            user_data.clone(),
            Some(license.license_code.clone()),
            LoginMode::Offline,
        )
        .await;

        Ok(LoginResult {
            mode: LoginMode::Offline,
            user: user_data,
            license: validation.license,
            days_remaining: validation.days_remaining,
            needs_online_validation: validation.needs_online_validation,
        })
    }

    /// Break-glass sign-in. Skips every license check and never calls the
    /// remote store.
    pub async fn login_master(&self, email: &str, password: &str) -> LicenseResult<LoginResult> {
        let email_ok = email.trim().eq_ignore_ascii_case(self.policy.master_email.trim());
        let password_ok = self
            .vault
            .verify_password(password, &self.policy.master_password_hash);
        if !(email_ok && password_ok) {
            log_login_attempt(email, "master", false, Some("invalid master credentials"));
            return Err(LicenseError::InvalidMasterCredentials);
        }

        let now = now_ms();
        let expiry = now + self.policy.master_validity_days as i64 * DAY_MS;
        let fingerprint = self.identity.fingerprint().await;
        let user = UserData::new(MASTER_UID, &self.policy.master_email, "Master Admin", Role::Master);
        let license = LicenseData {
            license_code: MASTER_LICENSE_CODE.to_string(),
            license_type: None,
            status: None,
            expiry_date: expiry,
            activated_on: now,
            last_validation: now,
            validation_count: 0,
            hardware_id: fingerprint,
            user_id: MASTER_UID.to_string(),
        };

        log_license_event(LicenseEvent::MasterLogin, MASTER_LICENSE_CODE, None);
        self.open_session(
            user.clone(),
            Some(MASTER_LICENSE_CODE.to_string()),
            LoginMode::Master,
        )
        .await;

        Ok(LoginResult {
            mode: LoginMode::Master,
            user,
            license,
            days_remaining: days_until(expiry, now),
            needs_online_validation: false,
        })
    }

    // === Validation ===

    /// Remote verdict for `code` on this device. Bumps the validation counter.
    async fn check_online(&self, code: &str) -> LicenseResult<LicenseRecord> {
        let mut record = self
            .remote_call("get_license", self.remote.get_license(code))
            .await?
            .ok_or_else(|| LicenseError::CodeNotFound(code.to_string()))?;
        let now = now_ms();

        let verdict = status_verdict(&record, code).and_then(|_| match record.expiry_date {
            Some(expiry) if now > expiry => Err(LicenseError::LicenseExpired(format!(
                "{code} expired on {}",
                format_date(expiry)
            ))),
            Some(_) => Ok(()),
            None => Err(LicenseError::LicenseNotActivated(format!(
                "{code} has no expiry date"
            ))),
        });

        if let Err(e) = verdict {
            log_license_event(LicenseEvent::ValidationFailed, code, Some(e.code()));
            return Err(e);
        }

        let fingerprint = self.identity.fingerprint().await;
        if record.hardware_id.as_deref() != Some(fingerprint.as_str()) {
            let e = LicenseError::HardwareMismatch(format!(
                "{code} is bound to another device"
            ));
            log_license_event(LicenseEvent::ValidationFailed, code, Some(e.code()));
            return Err(e);
        }

        record.validation_count += 1;
        record.last_validation = Some(now);
        let bump = LicenseUpdate {
            validation_count: Some(record.validation_count),
            last_validation: Some(now),
            ..Default::default()
        };
        if let Err(e) = self
            .remote_call("set_license", self.remote.set_license(code, &bump, true))
            .await
        {
            warn!(error = %e, "Could not record validation");
        }

        log_license_event(
            LicenseEvent::Validated,
            code,
            Some(&format!("count={}", record.validation_count)),
        );
        Ok(record)
    }

    /// Validate `license_code` against the remote store.
    pub async fn validate_online(&self, license_code: &str) -> LicenseResult<OnlineValidation> {
        let record = self.check_online(&normalize_code(license_code)).await?;
        let license = LicenseData::from(&record);
        Ok(OnlineValidation {
            is_valid: true,
            days_remaining: days_until(license.expiry_date, now_ms()),
            license,
        })
    }

    /// Validate a cached license without the network.
    pub async fn validate_offline(&self, license: &CachedLicense) -> LicenseResult<OfflineValidation> {
        let now = now_ms();
        if now > license.expiry_date {
            return Err(LicenseError::LicenseExpired(format!(
                "{} expired on {}",
                license.license_code,
                format_date(license.expiry_date)
            )));
        }

        let fingerprint = self.identity.fingerprint().await;
        if license.hardware_id != fingerprint {
            return Err(LicenseError::HardwareMismatch(format!(
                "{} is bound to another device",
                license.license_code
            )));
        }

        let elapsed = (now - license.last_validation).max(0);
        let grace_state = self.policy.grace_state(elapsed);
        if grace_state == GraceState::Locked {
            return Err(LicenseError::RequiresOnlineValidation(format!(
                "the license was last validated online {} days ago; connect to the internet to continue",
                elapsed / DAY_MS
            )));
        }

        let hard_limit = self.policy.validation_interval_ms + self.policy.grace_period_ms;
        Ok(OfflineValidation {
            is_valid: true,
            license: LicenseData::from(license),
            days_remaining: days_until(license.expiry_date, now),
            needs_online_validation: grace_state != GraceState::Fresh,
            grace_period_remaining_ms: (hard_limit - elapsed).max(0),
            grace_state,
        })
    }

    async fn refresh_local_license(&self, record: &LicenseRecord, fingerprint: &str) -> LicenseResult<()> {
        self.cache
            .save_license(&CachedLicense::from_record(record)?, fingerprint)
            .await
    }

    /// Opportunistic check on startup or navigation.
    ///
    /// Inside the validation interval only the local copy is checked. Past
    /// it, the remote store is asked; if it cannot be reached the grace
    /// period decides.
    pub async fn perform_periodic_validation(&self) -> LicenseResult<PeriodicOutcome> {
        let fingerprint = self.identity.fingerprint().await;
        let Some(license) = self.cache.load_license(&fingerprint).await? else {
            return Ok(PeriodicOutcome::NeedsRegistration);
        };

        let elapsed = now_ms() - license.last_validation;
        if self.policy.grace_state(elapsed) == GraceState::Fresh {
            return Ok(PeriodicOutcome::Fresh(self.validate_offline(&license).await?));
        }

        match self.check_online(&license.license_code).await {
            Ok(record) => {
                self.refresh_local_license(&record, &fingerprint).await?;
                let data = LicenseData::from(&record);
                Ok(PeriodicOutcome::Revalidated(OnlineValidation {
                    is_valid: true,
                    days_remaining: days_until(data.expiry_date, now_ms()),
                    license: data,
                }))
            }
            Err(e) if e.is_connectivity_failure() => {
                warn!(error = %e, "Periodic validation offline, checking grace period");
                let validation = self.validate_offline(&license).await?;
                Ok(PeriodicOutcome::GracePeriod(validation))
            }
            Err(e) => Err(e),
        }
    }

    /// Online-then-offline status of the license in use.
    ///
    /// Never fails; problems are reported in the returned value.
    pub async fn get_license_status(&self) -> LicenseStatusReport {
        let session = self.current_session().await;
        if let Some(s) = session.as_ref().filter(|s| s.mode == LoginMode::Master) {
            let expiry = s.started_at + self.policy.master_validity_days as i64 * DAY_MS;
            return LicenseStatusReport {
                is_valid: true,
                license_code: Some(MASTER_LICENSE_CODE.to_string()),
                days_remaining: Some(days_until(expiry, now_ms())),
                expiry_date: Some(expiry),
                ..Default::default()
            };
        }

        let fingerprint = self.identity.fingerprint().await;
        let cached = match self.cache.load_license(&fingerprint).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Could not read local license");
                None
            }
        };

        let code = session
            .and_then(|s| s.license_code)
            .or_else(|| cached.as_ref().map(|c| c.license_code.clone()));
        let Some(code) = code else {
            return LicenseStatusReport::invalid(
                None,
                false,
                &LicenseError::NoLocalLicense("no license is registered on this device".to_string()),
            );
        };

        match self.check_online(&code).await {
            Ok(record) => {
                let is_cached = cached.as_ref().map_or(true, |c| c.license_code == record.code);
                if is_cached {
                    if let Err(e) = self.refresh_local_license(&record, &fingerprint).await {
                        warn!(error = %e, "Could not refresh local license");
                    }
                }
                let data = LicenseData::from(&record);
                LicenseStatusReport::from_online(&OnlineValidation {
                    is_valid: true,
                    days_remaining: days_until(data.expiry_date, now_ms()),
                    license: data,
                })
            }
            Err(e) if e.is_connectivity_failure() => match cached {
                Some(local) if local.license_code == code => {
                    match self.validate_offline(&local).await {
                        Ok(v) => LicenseStatusReport::from_offline(&v),
                        Err(e) => LicenseStatusReport::invalid(Some(code), false, &e),
                    }
                }
                _ => LicenseStatusReport::invalid(Some(code), false, &e),
            },
            Err(e) => LicenseStatusReport::invalid(Some(code), true, &e),
        }
    }

    // === Renewal / revocation ===

    /// Replace the device license with `new_code`.
    ///
    /// Write order: activate the new code, retire the old one, repoint the
    /// user. A failed step rolls back the earlier ones, so the old code is
    /// never left `renewed` without an active successor.
    pub async fn renew_license(&self, new_code: &str) -> LicenseResult<RenewalResult> {
        let new_code = normalize_code(new_code);
        if !self.vault.validate_license_code_format(&new_code) {
            return Err(LicenseError::InvalidLicenseFormat(format!(
                "'{new_code}' does not match LIQ-YYYY-XXXX-XXXX-ZZZZ"
            )));
        }

        let fingerprint = self.identity.fingerprint().await;
        let current = self.cache.load_license(&fingerprint).await?.ok_or_else(|| {
            LicenseError::NoLocalLicense("there is no license on this device to renew".to_string())
        })?;
        let old_code = current.license_code.clone();
        if new_code == old_code {
            return Err(LicenseError::CodeAlreadyUsed(format!(
                "{new_code} is already the license of this device"
            )));
        }

        let new_original = self.fetch_available(&new_code).await?;
        let old_original = self
            .remote_call("get_license", self.remote.get_license(&old_code))
            .await?
            .ok_or_else(|| LicenseError::CodeNotFound(old_code.clone()))?;
        // Revoked and expired are terminal; only a live license can be retired.
        status_verdict(&old_original, &old_code)?;
        let user: UserRecord = self
            .remote_call("get_user", self.remote.get_user(&current.user_id))
            .await?
            .ok_or_else(|| {
                LicenseError::NotAuthenticated("no user profile for the license holder".to_string())
            })?;

        let now = now_ms();
        let expiry = now + self.policy.validity_ms(user.role, new_original.license_type);

        let activation = LicenseUpdate {
            status: Some(LicenseStatus::Used),
            activated_on: Some(now),
            expiry_date: Some(expiry),
            last_validation: Some(now),
            validation_count: Some(0),
            hardware_id: Some(fingerprint.clone()),
            user_id: Some(user.uid.clone()),
            user_email: Some(user.email.clone()),
            is_renewal: Some(true),
            previous_license: Some(old_code.clone()),
            ..Default::default()
        };
        self.remote_call("set_license", self.remote.set_license(&new_code, &activation, true))
            .await?;

        let retire = LicenseUpdate {
            status: Some(LicenseStatus::Renewed),
            renewed_on: Some(now),
            renewed_with: Some(new_code.clone()),
            ..Default::default()
        };
        if let Err(e) = self
            .remote_call("set_license", self.remote.set_license(&old_code, &retire, true))
            .await
        {
            self.restore_license(&new_original).await;
            return Err(e);
        }

        let mut previous = user.previous_licenses.clone();
        previous.push(old_code.clone());
        let repoint = UserUpdate {
            license_code: Some(new_code.clone()),
            hardware_id: Some(fingerprint.clone()),
            previous_licenses: Some(previous),
            ..Default::default()
        };
        if let Err(e) = self
            .remote_call("set_user", self.remote.set_user(&user.uid, &repoint, true))
            .await
        {
            self.restore_license(&new_original).await;
            self.restore_license(&old_original).await;
            return Err(e);
        }

        let cached = CachedLicense {
            license_code: new_code.clone(),
            expiry_date: expiry,
            hardware_id: fingerprint.clone(),
            user_id: user.uid.clone(),
            activated_on: now,
            last_validation: now,
            validation_count: 0,
            version: CACHE_VERSION.to_string(),
        };
        self.cache.save_license(&cached, &fingerprint).await?;

        if let Some(session) = self.session.write().await.as_mut() {
            if session.license_code.as_deref() == Some(old_code.as_str()) {
                session.license_code = Some(new_code.clone());
            }
        }

        log_license_event(
            LicenseEvent::Renewed,
            &new_code,
            Some(&format!("previous={}", old_code)),
        );

        Ok(RenewalResult {
            previous_license_code: old_code,
            license_code: new_code,
            expiry_date: expiry,
            days_remaining: days_until(expiry, now),
        })
    }

    /// Mark `code` revoked. Admin or master session required.
    ///
    /// The local cache is left alone; the holder finds out at the next
    /// online validation.
    pub async fn revoke_license(&self, code: &str, reason: &str) -> LicenseResult<()> {
        let session = self.require_privileged("revoke licenses").await?;
        let code = normalize_code(code);

        self.remote_call("get_license", self.remote.get_license(&code))
            .await?
            .ok_or_else(|| LicenseError::CodeNotFound(code.clone()))?;

        let update = LicenseUpdate {
            status: Some(LicenseStatus::Revoked),
            revoked_on: Some(now_ms()),
            revoked_reason: Some(reason.to_string()),
            ..Default::default()
        };
        self.remote_call("set_license", self.remote.set_license(&code, &update, true))
            .await?;

        log_license_event(
            LicenseEvent::Revoked,
            &code,
            Some(&format!("by={} reason={}", mask_email(&session.user.email), reason)),
        );
        Ok(())
    }

    /// Create a new available code of `license_type`. Admin or master
    /// session required.
    pub async fn issue_license(&self, license_type: LicenseType) -> LicenseResult<String> {
        self.require_privileged("generate licenses").await?;

        let remote = Arc::clone(&self.remote);
        let timeout = self.policy.remote_timeout;
        let code = generate_unique_license_code(
            move |candidate| {
                let remote = Arc::clone(&remote);
                async move {
                    match tokio::time::timeout(timeout, remote.get_license(&candidate)).await {
                        Ok(found) => found.map(|record| record.is_some()),
                        Err(_) => Err(LicenseError::RemoteUnavailable(
                            "license lookup timed out".to_string(),
                        )),
                    }
                }
            },
            ISSUE_RETRIES,
        )
        .await?;

        let record = LicenseRecord::available(&code, license_type, now_ms());
        self.remote_call(
            "set_license",
            self.remote.set_license(&code, &LicenseUpdate::from(&record), false),
        )
        .await?;

        info!(license = %code, license_type = ?license_type, "License issued");
        Ok(code)
    }

    // === Device ===

    /// Wipe every local slot and the installation id so a new account can
    /// register on this machine. Admin or master session required.
    pub async fn reset_device_for_new_user(&self) -> LicenseResult<()> {
        self.require_privileged("reset this device").await?;

        self.cache.clear().await?;
        let fingerprint = self.identity.regenerate().await;
        *self.session.write().await = None;

        log_license_event(
            LicenseEvent::DeviceReset,
            "-",
            Some(&format!("device={}", short_id(&fingerprint))),
        );
        Ok(())
    }

    /// Drop only the cached license, keeping the cached account.
    pub async fn clear_local_license(&self) -> LicenseResult<()> {
        self.cache.clear_license().await
    }
}
