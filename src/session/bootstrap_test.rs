use super::*;

use std::sync::Arc;

use serde_json::json;

use crate::error::{ProviderError, TenantApiError};
use crate::net::{ProviderSession, RefreshedSession};
use crate::session::fakes::{Harness, jwt};
use crate::session::teardown::{TeardownReason, teardown};
use crate::state::Credential;
use crate::storage::{KeyValueStorage, save_json};

fn hydrated(h: &Harness) -> SessionContext {
    let ctx = h.context();
    ctx.credentials.rehydrate();
    ctx.tenant.rehydrate();
    ctx
}

fn persist_credential(h: &Harness, credential: &Credential) {
    save_json(h.local.as_ref(), "auth-storage", credential).unwrap();
}

// =============================================================================
// No preconditions
// =============================================================================

#[tokio::test]
async fn fresh_load_makes_no_network_calls() {
    let h = Harness::new();
    let ctx = hydrated(&h);

    let outcome = BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await;

    assert_eq!(outcome, BootstrapOutcome::Idle);
    assert_eq!(h.identity.callback_count(), 0);
    assert_eq!(h.identity.refresh_count(), 0);
    assert_eq!(h.tenant_api.fetch_count(), 0);
    assert!(!ctx.credentials.is_authenticated());
}

#[tokio::test]
async fn resolved_session_is_left_alone() {
    let h = Harness::new();
    persist_credential(
        &h,
        &Credential {
            access_token: Some(jwt("u-1", 3600)),
            tenant_id: Some("X".into()),
            account_code: Some("BK-1".into()),
            ..Credential::default()
        },
    );
    h.session.set_item("refresh-token", "R0").unwrap();
    let ctx = hydrated(&h);

    let outcome = BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await;

    assert_eq!(outcome, BootstrapOutcome::Idle);
    assert_eq!(h.tenant_api.fetch_count(), 0);
    assert_eq!(h.identity.refresh_count(), 0);
}

// =============================================================================
// Step 1: authorization code
// =============================================================================

#[tokio::test]
async fn code_exchange_populates_both_stores() {
    let h = Harness::at("https://app.example.com/callback?code=abc&state=xyz&tab=2");
    h.identity.on_callback(Ok(ProviderSession {
        access_token: "T1".into(),
        refresh_token: Some("R1".into()),
    }));
    h.tenant_api.respond(json!({ "tenantId": "X", "accountCode": "BK-1" }));
    let ctx = hydrated(&h);

    let outcome = BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await;

    assert_eq!(outcome, BootstrapOutcome::CodeExchanged(TenantFetchOutcome::Loaded));
    assert_eq!(h.identity.callbacks.lock().unwrap().clone(), vec!["abc".to_owned()]);
    let credential = ctx.credentials.snapshot();
    assert_eq!(credential.access_token.as_deref(), Some("T1"));
    assert_eq!(credential.tenant_id.as_deref(), Some("X"));
    assert_eq!(credential.account_code.as_deref(), Some("BK-1"));
    assert_eq!(ctx.tenant.tenant().unwrap().record_id, "X");
    assert!(ctx.credentials.is_authenticated());
    assert_eq!(ctx.credentials.refresh_slot().get().as_deref(), Some("R1"));
    assert_eq!(h.tenant_api.tokens.lock().unwrap().clone(), vec!["T1".to_owned()]);

    let location = h.location.navigations();
    assert!(location.is_empty());
    assert_eq!(ctx.location.current().as_str(), "https://app.example.com/callback?tab=2");
}

#[tokio::test]
async fn code_exchange_derives_user_from_claims() {
    let h = Harness::at("https://app.example.com/callback?code=abc");
    let token = jwt("u-42", 3600);
    h.identity.on_callback(Ok(ProviderSession { access_token: token, refresh_token: None }));
    h.tenant_api.respond(json!({ "tenantId": "X", "accountCode": "BK-1" }));
    let ctx = hydrated(&h);

    BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await;

    let user = ctx.credentials.snapshot().user.unwrap();
    assert_eq!(user.id.as_deref(), Some("u-42"));
    assert_eq!(user.email.as_deref(), Some("u-42@example.com"));
    assert!(ctx.credentials.refresh_slot().get().is_none());
}

#[tokio::test]
async fn rejected_code_leaves_session_untouched() {
    let h = Harness::at("https://app.example.com/callback?code=stale");
    h.identity.on_callback(Err(ProviderError::Rejected("invalid_grant".into())));
    let ctx = hydrated(&h);

    let outcome = BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await;

    assert_eq!(outcome, BootstrapOutcome::CodeRejected);
    assert!(!ctx.credentials.is_authenticated());
    assert_eq!(h.tenant_api.fetch_count(), 0);
    assert!(h.location.navigations().is_empty());
    assert_eq!(ctx.location.current().query(), None);
}

#[tokio::test]
async fn tenant_failure_after_code_exchange_is_degraded_not_fatal() {
    let h = Harness::at("https://app.example.com/callback?code=abc");
    h.identity.on_callback(Ok(ProviderSession { access_token: "T1".into(), refresh_token: None }));
    h.tenant_api.fail(TenantApiError::Transport("offline".into()));
    let ctx = hydrated(&h);

    let outcome = BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await;

    assert_eq!(outcome, BootstrapOutcome::CodeExchanged(TenantFetchOutcome::Failed));
    assert!(ctx.credentials.is_authenticated());
    assert_eq!(ctx.credentials.access_token().as_deref(), Some("T1"));
    assert!(ctx.credentials.snapshot().tenant_id.is_none());
    assert!(!ctx.tenant.is_resolved());
}

#[tokio::test]
async fn code_exchange_defers_to_in_flight_tenant_fetch() {
    let h = Harness::at("https://app.example.com/callback?code=abc");
    h.identity.on_callback(Ok(ProviderSession { access_token: "T1".into(), refresh_token: None }));
    let ctx = hydrated(&h);
    let _loading = ctx.tenant.begin_loading().unwrap();

    let outcome = BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await;

    assert_eq!(outcome, BootstrapOutcome::CodeExchanged(TenantFetchOutcome::AlreadyLoading));
    assert_eq!(h.tenant_api.fetch_count(), 0);
}

#[tokio::test]
async fn code_exchange_clears_stale_tenant_id() {
    let h = Harness::at("https://app.example.com/callback?code=abc");
    persist_credential(
        &h,
        &Credential { tenant_id: Some("OLD".into()), ..Credential::default() },
    );
    h.identity.on_callback(Ok(ProviderSession { access_token: "T1".into(), refresh_token: None }));
    h.tenant_api.fail(TenantApiError::Status(500));
    let ctx = hydrated(&h);

    BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await;

    assert!(ctx.credentials.snapshot().tenant_id.is_none());
}

// =============================================================================
// Step 2: tenant gap-fill
// =============================================================================

#[tokio::test]
async fn token_without_tenant_fetches_tenant() {
    let h = Harness::new();
    persist_credential(&h, &Credential { access_token: Some("T1".into()), ..Credential::default() });
    h.tenant_api.respond(json!({ "recordId": "X", "accountCode": "BK-1", "user": { "role": "staff" } }));
    let ctx = hydrated(&h);

    let outcome = BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await;

    assert_eq!(outcome, BootstrapOutcome::TenantGapFilled(TenantFetchOutcome::Loaded));
    assert_eq!(ctx.credentials.snapshot().tenant_id.as_deref(), Some("X"));
    assert!(ctx.credentials.has_role("Staff"));
    assert_eq!(h.identity.callback_count() + h.identity.refresh_count(), 0);
}

// =============================================================================
// Step 3: refresh credential
// =============================================================================

#[tokio::test]
async fn refresh_credential_restores_session() {
    let h = Harness::new();
    h.session.set_item("refresh-token", "R0").unwrap();
    let token = jwt("u-1", 3600);
    h.identity.on_refresh(Ok(RefreshedSession {
        access_token: token.clone(),
        refresh_token: Some("R1".into()),
        role: Some("staff".into()),
    }));
    h.tenant_api.respond(json!({ "tenantId": "X", "accountCode": "BK-1" }));
    let ctx = hydrated(&h);

    let outcome = BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await;

    assert_eq!(outcome, BootstrapOutcome::RefreshExchanged(TenantFetchOutcome::Loaded));
    assert_eq!(h.identity.refreshes.lock().unwrap().clone(), vec!["R0".to_owned()]);
    assert_eq!(ctx.credentials.access_token(), Some(token));
    assert_eq!(ctx.credentials.snapshot().role.as_deref(), Some("STAFF"));
    assert_eq!(ctx.credentials.refresh_slot().get().as_deref(), Some("R1"));
    assert!(ctx.tenant.is_resolved());
}

#[tokio::test]
async fn rejected_refresh_credential_tears_down() {
    let h = Harness::new();
    persist_credential(
        &h,
        &Credential {
            user: Some(crate::state::SessionUser::default()),
            role: Some("OWNER".into()),
            ..Credential::default()
        },
    );
    h.session.set_item("refresh-token", "R0").unwrap();
    h.identity.on_refresh(Err(ProviderError::Rejected("revoked".into())));
    let ctx = hydrated(&h);

    let outcome = BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await;

    assert_eq!(outcome, BootstrapOutcome::RefreshRejected);
    assert_eq!(ctx.credentials.snapshot(), Credential::default());
    assert!(!ctx.credentials.is_authenticated());
    assert!(h.session.get_item("refresh-token").unwrap().is_none());
    assert!(h.local.get_item("auth-storage").unwrap().is_none());
    assert_eq!(h.tenant_api.fetch_count(), 0);
    assert_eq!(h.location.navigations(), vec!["/login".to_owned()]);
}

// =============================================================================
// Re-entry and ordering
// =============================================================================

#[tokio::test]
async fn second_run_is_a_no_op() {
    let h = Harness::at("https://app.example.com/callback?code=abc");
    h.identity.on_callback(Ok(ProviderSession { access_token: "T1".into(), refresh_token: None }));
    h.tenant_api.respond(json!({ "tenantId": "X", "accountCode": "BK-1" }));
    let ctx = hydrated(&h);
    let orchestrator = BootstrapOrchestrator::new();
    let mount = MountSignal::new();
    assert_eq!(orchestrator.phase(), BootstrapPhase::NotStarted);

    orchestrator.run(&ctx, &mount).await;
    ctx.location.replace(url::Url::parse("https://app.example.com/callback?code=abc").unwrap());
    let again = orchestrator.run(&ctx, &mount).await;

    assert_eq!(again, BootstrapOutcome::AlreadyAttempted);
    assert_eq!(orchestrator.phase(), BootstrapPhase::Done);
    assert_eq!(h.identity.callback_count(), 1);
    assert_eq!(h.tenant_api.fetch_count(), 1);
}

#[tokio::test]
async fn waits_for_credential_rehydration() {
    let h = Harness::new();
    persist_credential(&h, &Credential { access_token: Some("T1".into()), ..Credential::default() });
    h.tenant_api.respond(json!({ "tenantId": "X", "accountCode": "BK-1" }));
    let ctx = Arc::new(h.context());
    let orchestrator = Arc::new(BootstrapOrchestrator::new());

    let task = {
        let ctx = ctx.clone();
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(&ctx, &MountSignal::new()).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(orchestrator.phase(), BootstrapPhase::Running);
    assert_eq!(h.tenant_api.fetch_count(), 0);

    ctx.credentials.rehydrate();
    let outcome = task.await.unwrap();

    assert_eq!(outcome, BootstrapOutcome::TenantGapFilled(TenantFetchOutcome::Loaded));
}

#[tokio::test]
async fn unmount_during_exchange_drops_result() {
    let h = Harness::at("https://app.example.com/callback?code=abc");
    h.identity.on_callback(Ok(ProviderSession { access_token: "T1".into(), refresh_token: Some("R1".into()) }));
    let ctx = hydrated(&h);
    let mount = MountSignal::new();
    mount.unmount();

    let outcome = BootstrapOrchestrator::new().run(&ctx, &mount).await;

    assert_eq!(outcome, BootstrapOutcome::Unmounted);
    assert!(ctx.credentials.access_token().is_none());
    assert!(ctx.credentials.refresh_slot().get().is_none());
}

// =============================================================================
// Teardown while an exchange is in flight
// =============================================================================

fn spawn_run(ctx: &Arc<SessionContext>) -> tokio::task::JoinHandle<BootstrapOutcome> {
    let ctx = ctx.clone();
    tokio::spawn(async move { BootstrapOrchestrator::new().run(&ctx, &MountSignal::new()).await })
}

#[tokio::test]
async fn logout_during_code_exchange_is_not_undone() {
    let h = Harness::at("https://app.example.com/callback?code=abc");
    h.identity.on_callback(Ok(ProviderSession { access_token: "T1".into(), refresh_token: Some("R1".into()) }));
    h.tenant_api.respond(json!({ "tenantId": "X", "accountCode": "BK-1" }));
    let release = h.identity.hold();
    let ctx = Arc::new(hydrated(&h));

    let task = spawn_run(&ctx);
    while h.identity.callback_count() == 0 {
        tokio::task::yield_now().await;
    }
    teardown(&ctx, TeardownReason::Logout);
    release.notify_one();

    assert_eq!(task.await.unwrap(), BootstrapOutcome::Superseded);
    assert!(ctx.credentials.access_token().is_none());
    assert!(ctx.credentials.refresh_slot().get().is_none());
    assert_eq!(h.tenant_api.fetch_count(), 0);
    assert_eq!(ctx.location.current().query(), None);
}

#[tokio::test]
async fn logout_during_refresh_exchange_is_not_undone() {
    let h = Harness::new();
    h.session.set_item("refresh-token", "R0").unwrap();
    h.identity.on_refresh(Ok(RefreshedSession {
        access_token: jwt("u-1", 3600),
        refresh_token: Some("R1".into()),
        role: None,
    }));
    let release = h.identity.hold();
    let ctx = Arc::new(hydrated(&h));

    let task = spawn_run(&ctx);
    while h.identity.refresh_count() == 0 {
        tokio::task::yield_now().await;
    }
    teardown(&ctx, TeardownReason::Logout);
    release.notify_one();

    assert_eq!(task.await.unwrap(), BootstrapOutcome::Superseded);
    assert!(!ctx.credentials.is_authenticated());
    assert!(ctx.credentials.refresh_slot().get().is_none());
    assert!(h.session.get_item("refresh-token").unwrap().is_none());
    assert_eq!(h.tenant_api.fetch_count(), 0);
}

#[tokio::test]
async fn late_refresh_rejection_spares_newer_session() {
    let h = Harness::new();
    h.session.set_item("refresh-token", "R0").unwrap();
    h.identity.on_refresh(Err(ProviderError::Rejected("revoked".into())));
    let release = h.identity.hold();
    let ctx = Arc::new(hydrated(&h));

    let task = spawn_run(&ctx);
    while h.identity.refresh_count() == 0 {
        tokio::task::yield_now().await;
    }
    teardown(&ctx, TeardownReason::Logout);
    let token = jwt("u-2", 3600);
    ctx.credentials.update_tokens(
        crate::state::TokenUpdate::new()
            .user(crate::state::SessionUser::from_access_token(&token))
            .access_token(token),
    );
    release.notify_one();

    assert_eq!(task.await.unwrap(), BootstrapOutcome::Superseded);
    assert!(ctx.credentials.is_authenticated());
    assert_eq!(h.location.navigations(), vec!["/login".to_owned()]);
}
