use deal_workflow::{
    config::WorkflowConfig,
    credentials::LogDelivery,
    deal::{ActorId, DealDraft, ReviewSlot, TimeStamp},
    notify::LogDispatcher,
    roles::{Role, StaticRoleProvider},
    service::{DealService, Verdict},
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// Walks one deal from creation to completion against a throwaway sled db.
// RUST_LOG=deal_workflow=debug shows the guard decisions as well.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let config = WorkflowConfig {
        db_path: dir.path().join("deals"),
        ..WorkflowConfig::load()?
    };

    let roles = StaticRoleProvider::new();
    roles.grant("mgr", [Role::SalesManager]);
    roles.grant("boss", [Role::Approver]);
    roles.grant("admin", [Role::AccountAdministrator]);
    roles.grant("sam", [Role::Salesman]);

    let svc = DealService::open(
        config,
        Arc::new(roles),
        Arc::new(LogDispatcher),
        Arc::new(LogDelivery),
    )?;

    let mgr = ActorId::new("mgr");
    let boss = ActorId::new("boss");
    let admin = ActorId::new("admin");

    let draft = DealDraft::new()
        .set_client("C-1042", "Acme Ltd")
        .set_deal_value(1_250_000)
        .set_description("three year platform licence")
        .set_expected_close_date(TimeStamp::new())
        .set_salesman(ActorId::new("sam"))
        .set_first_reviewer(ActorId::new("rita"))
        .set_second_reviewer(ActorId::new("ravi"));

    let deal = svc.create_deal(&mgr, draft)?;
    let deal = svc.submit_approval(
        &deal.id,
        &boss,
        deal.version,
        Verdict::Approved,
        "margin ok",
    )?;
    let deal = svc.mark_client_account_created(&deal.id, &admin, deal.version)?;
    let deal = svc.submit_salesman_report(
        &deal.id,
        &ActorId::new("sam"),
        deal.version,
        "contract signed, onboarding booked",
        vec!["uploads/acme-contract.pdf".into()],
    )?;
    let deal = svc.submit_peer_review(
        &deal.id,
        &ActorId::new("rita"),
        deal.version,
        ReviewSlot::First,
        "pricing in line",
    )?;
    let issue = svc.set_client_credentials(&deal.id, &admin, deal.version, "acme.portal", None)?;
    let deal = svc.submit_peer_review(
        &deal.id,
        &ActorId::new("ravi"),
        issue.deal.version,
        ReviewSlot::Second,
        "no concerns",
    )?;

    println!("{} is {} at v{}", deal.id, deal.stage, deal.version);
    for witness in &deal.history {
        println!("  {witness}");
    }

    Ok(())
}
