//! Catalog sync demo
//!
//! Mounts two independent pages on one bus, performs mutations from a third
//! place and shows both pages catching up, with the metrics panel counting.
//!
//! Run against a live backend (see `BIBLIOTECA_API_URL`), or pass `--offline`
//! to use the in-memory backend.

mod pages;

use anyhow::Context;
use biblioteca_sync_client::types::{AuthorRequest, BookRequest, LoanRequest, UserRequest};
use biblioteca_sync_core::entity::{EntityId, EntityKind};
use biblioteca_sync_core::event::EventType;
use biblioteca_sync_runtime::config::SyncConfig;
use biblioteca_sync_runtime::{default_bus, SyncRuntime};
use biblioteca_sync_testing::MockLibraryClient;
use pages::{CatalogPage, LoanDesk};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SETTLE: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalog_sync=info,biblioteca_sync_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let offline = std::env::args().any(|arg| arg == "--offline");
    let runtime = if offline {
        println!("=== Catalog Sync (offline backend) ===\n");
        SyncRuntime::with_client(Arc::new(MockLibraryClient::new()), &default_bus())
    } else {
        let config = SyncConfig::from_env().context("loading configuration")?;
        println!("=== Catalog Sync against {} ===\n", config.api_url);
        SyncRuntime::from_config(config).context("building sync runtime")?
    };

    let _panel = runtime.metrics().observe(|snapshot| {
        println!(
            "  [metrics] processed={} errors={}",
            snapshot.processed, snapshot.errors
        );
    });

    let api = runtime.api();
    let catalog = CatalogPage::mount(api);
    let mut desk = LoanDesk::mount(api, runtime.bus());

    println!(">>> Creating author, book and user");
    let author = api
        .create_entity(&AuthorRequest::new("Jorge Luis Borges").with_nationality("Argentina"))
        .into_result()
        .await?;
    let book = api
        .create_entity(&BookRequest::new("Ficciones", author.id))
        .into_result()
        .await?;
    let user = api
        .create_entity(&UserRequest::new("Ana Torres", "ana@example.org"))
        .into_result()
        .await?;
    tokio::time::sleep(SETTLE).await;
    println!("Catalog shows {} book(s)", catalog.books().len());

    println!("\n>>> Lending the book");
    let loan = api
        .create_entity(&LoanRequest::new(user.id, book.id))
        .into_result()
        .await?;
    tokio::time::sleep(SETTLE).await;
    println!("Loan desk shows {} loan(s)", desk.loans().len());

    println!("\n>>> Loan desk switches to returns; same callback, new event type");
    desk.render(EventType::updated(EntityKind::Loan));
    desk.render(EventType::updated(EntityKind::Loan));
    api.return_loan(loan.id).into_result().await?;
    tokio::time::sleep(SETTLE).await;

    println!("\n>>> Deleting a book that does not exist");
    if let Err(error) = api
        .delete(EntityKind::Book, EntityId::new(999_999))
        .into_result()
        .await
    {
        println!("Delete failed as expected: {error}");
    }

    let snapshot = runtime.metrics().snapshot();
    println!(
        "\nFinal metrics: processed={} errors={}",
        snapshot.processed, snapshot.errors
    );

    if let Some(text) = runtime.render_metrics() {
        println!("\n--- Prometheus ---\n{text}");
    }

    Ok(())
}
