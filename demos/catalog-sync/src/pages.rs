//! Two pages that never reference each other.

use biblioteca_sync_client::Record;
use biblioteca_sync_core::entity::EntityKind;
use biblioteca_sync_core::event::{Event, EventType};
use biblioteca_sync_core::event_bus::{Callback, EventBus};
use biblioteca_sync_core::subscription::{SubscriptionBinding, SubscriptionScope};
use biblioteca_sync_runtime::{Observer, ReactiveApi};
use std::sync::{Arc, Mutex, PoisonError};

type Rows = Arc<Mutex<Vec<Record>>>;

fn reload(api: &ReactiveApi, kind: EntityKind, rows: &Rows) {
    let rows = Arc::clone(rows);
    let _ = api.list(kind).subscribe(
        Observer::new()
            .on_next(move |records: Vec<Record>| {
                tracing::info!(%kind, count = records.len(), "Page reloaded");
                *rows.lock().unwrap_or_else(PoisonError::into_inner) = records;
            })
            .on_error(move |error| tracing::warn!(%kind, %error, "Reload failed")),
    );
}

/// Book catalog: reloads on any book or loan change, since loans flip availability.
pub struct CatalogPage {
    books: Rows,
    _scope: SubscriptionScope,
}

impl CatalogPage {
    pub fn mount(api: &ReactiveApi) -> Self {
        let books = Rows::default();
        let mut scope = SubscriptionScope::new(api.bus());

        for kind in [EntityKind::Book, EntityKind::Loan] {
            let (api, books) = (api.clone(), Arc::clone(&books));
            scope.on_changes(kind, move |_| reload(&api, EntityKind::Book, &books));
        }

        reload(api, EntityKind::Book, &books);
        Self {
            books,
            _scope: scope,
        }
    }

    pub fn books(&self) -> Vec<Record> {
        self.books.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Loan desk: follows one event type chosen by its filter.
pub struct LoanDesk {
    loans: Rows,
    binding: SubscriptionBinding,
    on_change: Callback,
}

impl LoanDesk {
    pub fn mount(api: &ReactiveApi, bus: &EventBus) -> Self {
        let loans = Rows::default();
        let (reload_api, reload_rows) = (api.clone(), Arc::clone(&loans));
        let on_change: Callback = Arc::new(move |event: &Event| {
            tracing::debug!(%event, "Loan desk notified");
            reload(&reload_api, EntityKind::Loan, &reload_rows);
            Ok(())
        });

        let mut desk = Self {
            loans,
            binding: SubscriptionBinding::new(bus),
            on_change,
        };
        desk.render(EventType::created(EntityKind::Loan));
        desk
    }

    /// Re-render with the given filter; rebinding happens only if it changed.
    pub fn render(&mut self, filter: EventType) {
        if self.binding.bind(filter, Arc::clone(&self.on_change)) {
            tracing::info!(%filter, "Loan desk now following");
        }
    }

    pub fn loans(&self) -> Vec<Record> {
        self.loans.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
