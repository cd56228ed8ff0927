//! Restart recovery: valid rows re-arm, tampered rows terminate as
//! REJECTED/HASH_MISMATCH, stale rows terminate as REJECTED/HITL_TIMEOUT.

mod common;

use common::{RecordingListener, build_app, count_events, signal, snapshot};
use rust_decimal_macros::dec;
use tempfile::TempDir;
use tradewarden::domain::hitl::{
    ApprovalStatus, REASON_HASH_MISMATCH, REASON_HITL_TIMEOUT,
};

#[tokio::test]
async fn test_recover_on_startup_triage() {
    let dir = TempDir::new().unwrap();
    let db_url = format!("sqlite://{}/warden.db", dir.path().display());

    // First process: three AWAITING_APPROVAL rows.
    let app1 = build_app(&[("DATABASE_URL", db_url.as_str()), ("HITL_TIMEOUT_SECONDS", "600")]).await;
    let r3 = app1
        .hitl
        .create(&signal("R-3", dec!(1850000.00), dec!(1830000.00)), dec!(0.05), snapshot(dec!(1850000.00)))
        .await
        .unwrap()
        .request()
        .clone();
    let r4 = app1
        .hitl
        .create(&signal("R-4", dec!(1850000.00), dec!(1830000.00)), dec!(0.05), snapshot(dec!(1850000.00)))
        .await
        .unwrap()
        .request()
        .clone();
    let r5 = app1
        .hitl
        .create(&signal("R-5", dec!(1850000.00), dec!(1830000.00)), dec!(0.05), snapshot(dec!(1850000.00)))
        .await
        .unwrap()
        .request()
        .clone();

    // Tamper with R-4's stored quantity so its row hash no longer verifies,
    // and push R-5's deadline into the past.
    {
        let db = tradewarden::infrastructure::persistence::Database::new(&db_url)
            .await
            .unwrap();
        sqlx::query("UPDATE hitl_approvals SET qty = '9999' WHERE trade_id = $1")
            .bind(&r4.trade_id)
            .execute(&db.pool)
            .await
            .unwrap();
        sqlx::query("UPDATE hitl_approvals SET expires_at = $1 WHERE trade_id = $2")
            .bind("2020-01-01T00:00:00.000000Z")
            .bind(&r5.trade_id)
            .execute(&db.pool)
            .await
            .unwrap();
    }
    drop(app1);

    // Second process over the same database.
    let app2 = build_app(&[("DATABASE_URL", db_url.as_str()), ("HITL_TIMEOUT_SECONDS", "600")]).await;
    let (listener, names) = RecordingListener::new();
    app2.bus.subscribe(listener).await;

    let report = app2.hitl.recover_on_startup().await.unwrap();
    assert_eq!(report.recovered, vec![r3.trade_id.clone()]);
    assert_eq!(report.rejected_corrupt, vec![r4.trade_id.clone()]);
    assert_eq!(report.rejected_expired, vec![r5.trade_id.clone()]);
    assert_eq!(count_events(&names, "hitl.recovered"), 1);

    // R-3 is still live and hash-clean.
    let pending = app2.hitl.pending().await.unwrap();
    assert_eq!(pending.requests.len(), 1);
    assert_eq!(pending.requests[0].trade_id, r3.trade_id);
    assert_eq!(pending.requests[0].status, ApprovalStatus::AwaitingApproval);

    // The terminated rows carry their reasons.
    let r4_trail = app2.audit.find_by_correlation(r4.correlation_id).await.unwrap();
    assert!(r4_trail.iter().any(|r| {
        r.action == "HITL_REJECT" && r.context["reason"] == REASON_HASH_MISMATCH
    }));
    let r5_trail = app2.audit.find_by_correlation(r5.correlation_id).await.unwrap();
    assert!(r5_trail.iter().any(|r| {
        r.action == "HITL_EXPIRE" && r.context["reason"] == REASON_HITL_TIMEOUT
    }));
}

#[tokio::test]
async fn test_pending_omits_tampered_rows() {
    let dir = TempDir::new().unwrap();
    let db_url = format!("sqlite://{}/warden.db", dir.path().display());

    let app = build_app(&[("DATABASE_URL", db_url.as_str())]).await;
    let good = app
        .hitl
        .create(&signal("G-1", dec!(1850000.00), dec!(1830000.00)), dec!(0.05), snapshot(dec!(1850000.00)))
        .await
        .unwrap()
        .request()
        .clone();
    let bad = app
        .hitl
        .create(&signal("B-1", dec!(1850000.00), dec!(1830000.00)), dec!(0.05), snapshot(dec!(1850000.00)))
        .await
        .unwrap()
        .request()
        .clone();

    let db = tradewarden::infrastructure::persistence::Database::new(&db_url)
        .await
        .unwrap();
    sqlx::query("UPDATE hitl_approvals SET request_price = '1' WHERE trade_id = $1")
        .bind(&bad.trade_id)
        .execute(&db.pool)
        .await
        .unwrap();

    let report = app.hitl.pending().await.unwrap();
    assert_eq!(report.requests.len(), 1);
    assert_eq!(report.requests[0].trade_id, good.trade_id);
    assert_eq!(report.corrupt_omitted, vec![bad.trade_id]);
}
