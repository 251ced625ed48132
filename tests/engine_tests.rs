use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use liqueen::cache::{LocalLicenseCache, LICENSE_SLOT};
use liqueen::engine::{EnginePolicy, LicenseValidationEngine, RegistrationProfile, MASTER_LICENSE_CODE};
use liqueen::errors::LicenseError;
use liqueen::hardware::StaticIdentity;
use liqueen::remote::{DevelopmentLicenseStore, LicenseStatus, LicenseType, LicenseUpdate, RemoteLicenseStore, Role};
use liqueen::responses::{GraceState, LoginMode, PeriodicOutcome};
use liqueen::storage::{KeyValueStore, MemoryStore};
use liqueen::vault::SymmetricVault;

const DAY: i64 = 24 * 60 * 60 * 1000;

const DEVICE_A: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";
const DEVICE_B: &str = "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

const TRIAL_CODE: &str = "LIQ-2025-TEST-0001-MAIK";
const STANDARD_CODE: &str = "LIQ-2025-DEMO-0001-STUD";
const EXTENDED_CODE: &str = "LIQ-2025-ADMN-0001-SAEZ";

const EMAIL: &str = "user@test.com";
const PASSWORD: &str = "correct horse";
const MASTER_PASSWORD: &str = "123456";

struct Harness {
    engine: LicenseValidationEngine,
    remote: DevelopmentLicenseStore,
    identity: Arc<StaticIdentity>,
    store: MemoryStore,
    cache: LocalLicenseCache,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let vault = SymmetricVault::default();
    let cache = LocalLicenseCache::new(Arc::new(store.clone()), vault.clone());
    let identity = Arc::new(StaticIdentity::new(DEVICE_A));
    let remote = DevelopmentLicenseStore::seeded();
    let policy = EnginePolicy {
        remote_timeout: Duration::from_millis(200),
        ..EnginePolicy::default()
    };

    let engine = LicenseValidationEngine::new(
        vault,
        identity.clone(),
        cache.clone(),
        Arc::new(remote.clone()),
        policy,
    );

    Harness {
        engine,
        remote,
        identity,
        store,
        cache,
    }
}

fn profile() -> RegistrationProfile {
    RegistrationProfile {
        display_name: "Test User".to_string(),
        company: Some("Maiko Studios".to_string()),
    }
}

/// Harness with `EMAIL` registered on DEVICE_A using the trial code.
async fn registered() -> Harness {
    let h = harness();
    h.engine
        .register_with_license(EMAIL, PASSWORD, TRIAL_CODE, &profile())
        .await
        .expect("registration should succeed");
    h
}

/// Pretend the last online validation happened `days` ago.
async fn backdate_validation(h: &Harness, days: i64) {
    let mut license = h.cache.load_license(DEVICE_A).await.unwrap().unwrap();
    license.last_validation -= days * DAY;
    h.cache.save_license(&license, DEVICE_A).await.unwrap();
}

// === Registration ===

#[tokio::test]
async fn trial_registration_reports_thirty_days() {
    let h = harness();

    let result = assert_ok!(
        h.engine
            .register_with_license(EMAIL, PASSWORD, TRIAL_CODE, &profile())
            .await
    );
    assert_eq!(result.role, Role::User);
    assert_eq!(result.days_remaining, 30);
    assert!(result.user.has_permission("use_app"));

    let status = h.engine.get_license_status().await;
    assert!(status.is_valid, "status: {:?}", status);
    assert!(status.is_online);
    assert_eq!(status.license_code.as_deref(), Some(TRIAL_CODE));
    assert_eq!(status.days_remaining, Some(30));

    let record = h.remote.license(TRIAL_CODE).await.unwrap();
    assert_eq!(record.status, LicenseStatus::Used);
    assert_eq!(record.hardware_id.as_deref(), Some(DEVICE_A));
    assert_eq!(record.user_email.as_deref(), Some(EMAIL));

    let user = h.remote.user(&result.user.uid).await.unwrap();
    assert_eq!(user.license_code.as_deref(), Some(TRIAL_CODE));
    assert_eq!(user.company.as_deref(), Some("Maiko Studios"));
    assert!(h.store.contains(LICENSE_SLOT).await);
}

#[tokio::test]
async fn admin_email_registers_as_admin_for_ten_years() {
    let h = harness();
    let result = assert_ok!(
        h.engine
            .register_with_license("maikostudios@gmail.com", PASSWORD, EXTENDED_CODE, &profile())
            .await
    );

    assert_eq!(result.role, Role::Admin);
    assert_eq!(result.days_remaining, 3650);
    assert!(result.user.has_permission("revoke_licenses"));
}

#[tokio::test]
async fn registration_rejects_bad_codes() {
    let h = harness();

    let err = assert_err!(
        h.engine
            .register_with_license(EMAIL, PASSWORD, "ADMIN-2025-LIQUEEN-MASTER", &profile())
            .await
    );
    assert!(matches!(err, LicenseError::InvalidLicenseFormat(_)));

    let err = assert_err!(
        h.engine
            .register_with_license(EMAIL, PASSWORD, "LIQ-2025-NONE-0000-SAEZ", &profile())
            .await
    );
    assert!(matches!(err, LicenseError::CodeNotFound(_)));

    // Nothing was cached for a failed registration.
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn code_cannot_be_registered_twice() {
    let h = registered().await;
    let err = assert_err!(
        h.engine
            .register_with_license("other@test.com", PASSWORD, TRIAL_CODE, &profile())
            .await
    );
    assert!(matches!(err, LicenseError::CodeAlreadyUsed(_)));
}

#[tokio::test]
async fn registration_fails_cleanly_when_offline() {
    let h = harness();
    h.remote.set_reachable(false);

    let err = assert_err!(
        h.engine
            .register_with_license(EMAIL, PASSWORD, TRIAL_CODE, &profile())
            .await
    );
    assert!(err.is_connectivity_failure());
    assert!(h.store.is_empty().await);
    assert!(h.engine.current_session().await.is_none());
}

#[tokio::test]
async fn failed_activation_write_leaves_code_available() {
    let h = harness();
    h.remote.reject_writes_to(TRIAL_CODE).await;

    let err = assert_err!(
        h.engine
            .register_with_license(EMAIL, PASSWORD, TRIAL_CODE, &profile())
            .await
    );
    assert!(err.is_connectivity_failure());

    assert!(h.store.is_empty().await);
    assert!(h.engine.current_session().await.is_none());
    let record = h.remote.license(TRIAL_CODE).await.unwrap();
    assert_eq!(record.status, LicenseStatus::Available);
    assert!(record.hardware_id.is_none());
}

#[tokio::test]
async fn failed_profile_write_releases_activation() {
    let h = harness();
    h.remote.reject_writes_to(EMAIL).await;

    let err = assert_err!(
        h.engine
            .register_with_license(EMAIL, PASSWORD, TRIAL_CODE, &profile())
            .await
    );
    assert!(err.is_connectivity_failure());

    assert!(h.store.is_empty().await);
    assert!(h.engine.current_session().await.is_none());
    let record = h.remote.license(TRIAL_CODE).await.unwrap();
    assert_eq!(record.status, LicenseStatus::Available);
    assert!(record.hardware_id.is_none());
    assert!(record.user_email.is_none());
}

// === Device binding ===

#[tokio::test]
async fn different_device_is_rejected_online() {
    let h = registered().await;
    h.identity.set(DEVICE_B);

    let status = h.engine.get_license_status().await;
    assert!(!status.is_valid);
    assert!(status.is_online);
    assert_eq!(status.error_code.as_deref(), Some("HARDWARE_MISMATCH"));

    let err = assert_err!(h.engine.validate_online(TRIAL_CODE).await);
    assert!(matches!(err, LicenseError::HardwareMismatch(_)));
}

#[tokio::test]
async fn cache_from_another_device_is_discarded() {
    let h = registered().await;
    h.identity.set(DEVICE_B);

    let err = assert_err!(h.engine.login_offline(EMAIL, Some(PASSWORD)).await);
    assert!(matches!(err, LicenseError::NoLocalLicense(_)));
    assert!(!h.store.contains(LICENSE_SLOT).await);
}

#[tokio::test]
async fn license_bound_elsewhere_fails_offline_check() {
    let h = registered().await;
    let license = h.cache.load_license(DEVICE_A).await.unwrap().unwrap();
    h.identity.set(DEVICE_B);

    let err = assert_err!(h.engine.validate_offline(&license).await);
    assert!(matches!(err, LicenseError::HardwareMismatch(_)));
}

// === Offline and grace period ===

#[tokio::test]
async fn fresh_license_validates_without_network() {
    let h = registered().await;
    h.remote.set_reachable(false);

    let outcome = assert_ok!(h.engine.perform_periodic_validation().await);
    match outcome {
        PeriodicOutcome::Fresh(v) => {
            assert!(!v.needs_online_validation);
            assert_eq!(v.grace_state, GraceState::Fresh);
        }
        other => panic!("expected fresh, got {:?}", other),
    }
}

#[tokio::test]
async fn thirty_one_days_offline_is_grace_period() {
    let h = registered().await;
    backdate_validation(&h, 31).await;
    h.remote.set_reachable(false);

    let v = match assert_ok!(h.engine.perform_periodic_validation().await) {
        PeriodicOutcome::GracePeriod(v) => v,
        other => panic!("expected grace period, got {:?}", other),
    };
    assert!(v.is_valid);
    assert!(v.needs_online_validation);
    assert_eq!(v.grace_state, GraceState::GracePeriod);
    assert!(v.grace_period_remaining_ms > 13 * DAY && v.grace_period_remaining_ms <= 14 * DAY);

    let login = assert_ok!(h.engine.login_offline(EMAIL, Some(PASSWORD)).await);
    assert_eq!(login.mode, LoginMode::Offline);
    assert!(login.needs_online_validation);

    let status = h.engine.get_license_status().await;
    assert!(status.is_valid);
    assert!(!status.is_online);
    assert!(status.needs_online_validation);
}

#[tokio::test]
async fn forty_six_days_offline_is_locked() {
    let h = registered().await;
    backdate_validation(&h, 46).await;
    h.remote.set_reachable(false);

    let err = assert_err!(h.engine.perform_periodic_validation().await);
    assert!(matches!(err, LicenseError::RequiresOnlineValidation(_)));

    let err = assert_err!(h.engine.login_offline(EMAIL, Some(PASSWORD)).await);
    assert!(err.requires_online());
}

#[tokio::test]
async fn online_success_resets_the_clock() {
    let h = registered().await;
    backdate_validation(&h, 40).await;

    let outcome = assert_ok!(h.engine.perform_periodic_validation().await);
    assert!(matches!(outcome, PeriodicOutcome::Revalidated(_)));

    let license = h.cache.load_license(DEVICE_A).await.unwrap().unwrap();
    let now = chrono::Utc::now().timestamp_millis();
    assert!(now - license.last_validation < DAY);
    assert_eq!(license.validation_count, 1);
    assert_eq!(h.remote.license(TRIAL_CODE).await.unwrap().validation_count, 1);
}

#[tokio::test]
async fn expired_license_fails_offline() {
    let h = registered().await;
    let mut license = h.cache.load_license(DEVICE_A).await.unwrap().unwrap();
    license.expiry_date = chrono::Utc::now().timestamp_millis() - DAY;

    let err = assert_err!(h.engine.validate_offline(&license).await);
    assert!(matches!(err, LicenseError::LicenseExpired(_)));
}

#[tokio::test]
async fn no_license_needs_registration() {
    let h = harness();
    let outcome = assert_ok!(h.engine.perform_periodic_validation().await);
    assert!(outcome.needs_registration());

    let status = h.engine.get_license_status().await;
    assert!(!status.is_valid);
    assert_eq!(status.error_code.as_deref(), Some("NO_LOCAL_LICENSE"));
}

#[tokio::test]
async fn corrupt_license_slot_is_cleared() {
    let h = registered().await;
    h.store.set(LICENSE_SLOT, "{not an envelope").await.unwrap();

    let err = assert_err!(h.engine.login_offline(EMAIL, Some(PASSWORD)).await);
    assert!(matches!(err, LicenseError::NoLocalLicense(_)));
    assert!(!h.store.contains(LICENSE_SLOT).await);
}

// === Login ===

#[tokio::test]
async fn offline_login_refuses_other_accounts() {
    let h = registered().await;

    let err = assert_err!(h.engine.login_offline("intruder@test.com", Some(PASSWORD)).await);
    assert!(matches!(err, LicenseError::AccountMismatch(_)));
    assert!(err.to_string().contains(EMAIL));

    // The password does not matter for a different account.
    let err = assert_err!(h.engine.login_offline("intruder@test.com", None).await);
    assert!(matches!(err, LicenseError::AccountMismatch(_)));
}

#[tokio::test]
async fn offline_login_checks_password() {
    let h = registered().await;
    let err = assert_err!(h.engine.login_offline(EMAIL, Some("wrong")).await);
    assert!(matches!(err, LicenseError::WrongPassword(_)));

    let login = assert_ok!(h.engine.login_offline(EMAIL, None).await);
    assert_eq!(login.user.email, EMAIL);
}

#[tokio::test]
async fn online_login_refreshes_session() {
    let h = registered().await;
    h.engine.logout().await;
    assert!(h.engine.current_session().await.is_none());

    let login = assert_ok!(h.engine.login_online(EMAIL, PASSWORD).await);
    assert_eq!(login.mode, LoginMode::Online);
    assert_eq!(login.license.license_code, TRIAL_CODE);
    assert!(!login.needs_online_validation);

    let session = h.engine.current_session().await.unwrap();
    assert_eq!(session.mode, LoginMode::Online);
    assert_eq!(session.license_code.as_deref(), Some(TRIAL_CODE));
}

#[tokio::test]
async fn online_login_falls_back_when_unreachable() {
    let h = registered().await;
    h.remote.set_reachable(false);

    let login = assert_ok!(h.engine.login_online(EMAIL, PASSWORD).await);
    assert_eq!(login.mode, LoginMode::Offline);
}

#[tokio::test]
async fn slow_remote_times_out_into_offline_login() {
    let h = registered().await;
    h.remote.set_latency(Duration::from_millis(600));

    let login = assert_ok!(h.engine.login_online(EMAIL, PASSWORD).await);
    assert_eq!(login.mode, LoginMode::Offline);
}

#[tokio::test]
async fn bad_credentials_do_not_fall_back() {
    let h = registered().await;
    let err = assert_err!(h.engine.login_online(EMAIL, "wrong").await);
    assert!(matches!(err, LicenseError::AuthenticationFailed(_)));
}

#[tokio::test]
async fn revoked_license_is_not_rescued_by_cache() {
    let h = registered().await;
    let revoke = LicenseUpdate {
        status: Some(LicenseStatus::Revoked),
        revoked_reason: Some("chargeback".to_string()),
        ..Default::default()
    };
    h.remote.set_license(TRIAL_CODE, &revoke, true).await.unwrap();

    let err = assert_err!(h.engine.login_online(EMAIL, PASSWORD).await);
    assert!(matches!(err, LicenseError::LicenseRevoked(_)));
    assert!(err.is_definitive_verdict());

    let status = h.engine.get_license_status().await;
    assert!(!status.is_valid);
    assert_eq!(status.error_code.as_deref(), Some("LICENSE_REVOKED"));
}

#[tokio::test]
async fn master_login_requires_exact_credentials() {
    let h = harness();
    let master = h.engine.policy().master_email.clone();

    let err = assert_err!(h.engine.login_master(&master, "654321").await);
    assert!(matches!(err, LicenseError::InvalidMasterCredentials));
    let err = assert_err!(h.engine.login_master("someone@else.com", MASTER_PASSWORD).await);
    assert!(matches!(err, LicenseError::InvalidMasterCredentials));

    // Master access does not depend on the network.
    h.remote.set_reachable(false);
    let login = assert_ok!(h.engine.login_master(&master, MASTER_PASSWORD).await);
    assert_eq!(login.mode, LoginMode::Master);
    assert_eq!(login.user.role, Role::Master);
    assert_eq!(login.license.license_code, MASTER_LICENSE_CODE);
    assert_eq!(login.days_remaining, 365);

    let status = h.engine.get_license_status().await;
    assert!(status.is_valid);
    assert_eq!(status.license_code.as_deref(), Some(MASTER_LICENSE_CODE));
}

// === Renewal ===

#[tokio::test]
async fn renewal_moves_device_to_new_code() {
    let h = registered().await;

    let renewal = assert_ok!(h.engine.renew_license(STANDARD_CODE).await);
    assert_eq!(renewal.previous_license_code, TRIAL_CODE);
    assert_eq!(renewal.license_code, STANDARD_CODE);
    assert_eq!(renewal.days_remaining, 730);

    let old = h.remote.license(TRIAL_CODE).await.unwrap();
    assert_eq!(old.status, LicenseStatus::Renewed);
    assert_eq!(old.renewed_with.as_deref(), Some(STANDARD_CODE));

    let new = h.remote.license(STANDARD_CODE).await.unwrap();
    assert_eq!(new.status, LicenseStatus::Used);
    assert!(new.is_renewal);
    assert_eq!(new.previous_license.as_deref(), Some(TRIAL_CODE));
    assert_eq!(new.hardware_id.as_deref(), Some(DEVICE_A));

    let user = h.remote.user(new.user_id.as_deref().unwrap()).await.unwrap();
    assert_eq!(user.license_code.as_deref(), Some(STANDARD_CODE));
    assert_eq!(user.previous_licenses, vec![TRIAL_CODE.to_string()]);

    let cached = h.cache.load_license(DEVICE_A).await.unwrap().unwrap();
    assert_eq!(cached.license_code, STANDARD_CODE);

    let status = h.engine.get_license_status().await;
    assert!(status.is_valid);
    assert_eq!(status.license_code.as_deref(), Some(STANDARD_CODE));
}

#[tokio::test]
async fn renewal_with_used_code_changes_nothing() {
    let h = registered().await;
    let taken = LicenseUpdate {
        status: Some(LicenseStatus::Used),
        ..Default::default()
    };
    h.remote.set_license(STANDARD_CODE, &taken, true).await.unwrap();

    let err = assert_err!(h.engine.renew_license(STANDARD_CODE).await);
    assert!(matches!(err, LicenseError::CodeAlreadyUsed(_)));

    assert_eq!(h.remote.license(TRIAL_CODE).await.unwrap().status, LicenseStatus::Used);
    let cached = h.cache.load_license(DEVICE_A).await.unwrap().unwrap();
    assert_eq!(cached.license_code, TRIAL_CODE);
}

#[tokio::test]
async fn revoked_license_cannot_be_renewed() {
    let h = registered().await;
    let revoke = LicenseUpdate {
        status: Some(LicenseStatus::Revoked),
        revoked_reason: Some("fraud".to_string()),
        ..Default::default()
    };
    h.remote.set_license(TRIAL_CODE, &revoke, true).await.unwrap();

    let err = assert_err!(h.engine.renew_license(STANDARD_CODE).await);
    assert!(matches!(err, LicenseError::LicenseRevoked(_)));

    let old = h.remote.license(TRIAL_CODE).await.unwrap();
    assert_eq!(old.status, LicenseStatus::Revoked);
    assert_eq!(old.revoked_reason.as_deref(), Some("fraud"));
    assert!(old.renewed_with.is_none());
    assert_eq!(
        h.remote.license(STANDARD_CODE).await.unwrap().status,
        LicenseStatus::Available
    );
}

#[tokio::test]
async fn expired_license_cannot_be_renewed() {
    let h = registered().await;
    let expire = LicenseUpdate {
        status: Some(LicenseStatus::Expired),
        ..Default::default()
    };
    h.remote.set_license(TRIAL_CODE, &expire, true).await.unwrap();

    let err = assert_err!(h.engine.renew_license(STANDARD_CODE).await);
    assert!(matches!(err, LicenseError::LicenseExpired(_)));
    assert_eq!(h.remote.license(TRIAL_CODE).await.unwrap().status, LicenseStatus::Expired);
    assert_eq!(
        h.remote.license(STANDARD_CODE).await.unwrap().status,
        LicenseStatus::Available
    );
}

#[tokio::test]
async fn failed_retire_rolls_back_new_code() {
    let h = registered().await;
    h.remote.reject_writes_to(TRIAL_CODE).await;

    let err = assert_err!(h.engine.renew_license(STANDARD_CODE).await);
    assert!(err.is_connectivity_failure());

    let new = h.remote.license(STANDARD_CODE).await.unwrap();
    assert_eq!(new.status, LicenseStatus::Available);
    assert!(new.hardware_id.is_none());
    assert_eq!(h.remote.license(TRIAL_CODE).await.unwrap().status, LicenseStatus::Used);

    let cached = h.cache.load_license(DEVICE_A).await.unwrap().unwrap();
    assert_eq!(cached.license_code, TRIAL_CODE);
}

#[tokio::test]
async fn failed_user_update_rolls_back_both_codes() {
    let h = registered().await;
    let uid = h.engine.current_session().await.unwrap().user.uid;
    h.remote.reject_writes_to(&uid).await;

    assert_err!(h.engine.renew_license(STANDARD_CODE).await);

    assert_eq!(
        h.remote.license(STANDARD_CODE).await.unwrap().status,
        LicenseStatus::Available
    );
    let old = h.remote.license(TRIAL_CODE).await.unwrap();
    assert_eq!(old.status, LicenseStatus::Used);
    assert!(old.renewed_with.is_none());
    assert_eq!(old.hardware_id.as_deref(), Some(DEVICE_A));
}

// === Support operations ===

#[tokio::test]
async fn revocation_requires_privileged_session() {
    let h = registered().await;

    let err = assert_err!(h.engine.revoke_license(TRIAL_CODE, "refund").await);
    assert!(matches!(err, LicenseError::PermissionDenied(_)));

    h.engine.logout().await;
    let err = assert_err!(h.engine.revoke_license(TRIAL_CODE, "refund").await);
    assert!(matches!(err, LicenseError::NotAuthenticated(_)));

    let master = h.engine.policy().master_email.clone();
    assert_ok!(h.engine.login_master(&master, MASTER_PASSWORD).await);
    assert_ok!(h.engine.revoke_license(TRIAL_CODE, "refund").await);

    let record = h.remote.license(TRIAL_CODE).await.unwrap();
    assert_eq!(record.status, LicenseStatus::Revoked);
    assert_eq!(record.revoked_reason.as_deref(), Some("refund"));

    // The device still holds its cached copy until it goes online.
    assert!(h.cache.load_license(DEVICE_A).await.unwrap().is_some());

    let err = assert_err!(h.engine.revoke_license("LIQ-2025-NONE-0000-SAEZ", "x").await);
    assert!(matches!(err, LicenseError::CodeNotFound(_)));
}

#[tokio::test]
async fn device_reset_wipes_local_state() {
    let h = registered().await;

    let err = assert_err!(h.engine.reset_device_for_new_user().await);
    assert!(matches!(err, LicenseError::PermissionDenied(_)));
    assert!(h.store.contains(LICENSE_SLOT).await);

    let master = h.engine.policy().master_email.clone();
    assert_ok!(h.engine.login_master(&master, MASTER_PASSWORD).await);
    assert_ok!(h.engine.reset_device_for_new_user().await);

    assert!(h.store.is_empty().await);
    assert!(h.engine.current_session().await.is_none());

    let outcome = assert_ok!(h.engine.perform_periodic_validation().await);
    assert!(outcome.needs_registration());
}

#[tokio::test]
async fn admins_can_issue_codes() {
    let h = harness();
    let err = assert_err!(h.engine.issue_license(LicenseType::Standard).await);
    assert!(matches!(err, LicenseError::NotAuthenticated(_)));

    let master = h.engine.policy().master_email.clone();
    assert_ok!(h.engine.login_master(&master, MASTER_PASSWORD).await);

    let code = assert_ok!(h.engine.issue_license(LicenseType::Standard).await);
    assert!(h.engine.vault().validate_license_code_format(&code));

    let record = h.remote.license(&code).await.unwrap();
    assert_eq!(record.status, LicenseStatus::Available);
    assert_eq!(record.license_type, LicenseType::Standard);
}
