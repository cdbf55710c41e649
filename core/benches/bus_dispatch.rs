//! Bus fan-out benchmarks: cost of one emission as the subscriber count grows
//!
//! Run with: `cargo bench --bench bus_dispatch`

#![allow(missing_docs)] // Benchmarks don't need extensive docs

use biblioteca_sync_core::entity::{EntityId, EntityKind};
use biblioteca_sync_core::event::{Event, EventType, SystemEvent};
use biblioteca_sync_core::event_bus::EventBus;
use biblioteca_sync_core::subscription::SubscriptionScope;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit_fan_out");

    for subscribers in [0_usize, 1, 10, 100] {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let mut scope = SubscriptionScope::new(&bus);
        for _ in 0..subscribers {
            let hits = Arc::clone(&hits);
            scope.on(EventType::created(EntityKind::Book), move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
            });
        }

        let timestamp = bus.now();
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    let event = Event::domain(
                        EventType::created(EntityKind::Book),
                        EntityId::new(1),
                        timestamp,
                    );
                    black_box(bus.emit(event))
                });
            },
        );
    }

    group.finish();
}

fn bench_system_event(c: &mut Criterion) {
    let bus = EventBus::new();
    let _listener = bus.on(EventType::System, |event| {
        black_box(event.system_event());
    });
    let timestamp = bus.now();

    c.bench_function("emit_system_event_with_metadata", |b| {
        b.iter(|| {
            let system = SystemEvent::info("Book 1 created")
                .with_metadata("kind", "book")
                .with_metadata("id", 1);
            black_box(bus.emit(Event::system(system, timestamp)))
        });
    });
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let bus = EventBus::new();

    c.bench_function("subscribe_then_unsubscribe", |b| {
        b.iter(|| {
            let subscription = bus.on(EventType::deleted(EntityKind::Loan), |_| {});
            black_box(subscription.unsubscribe())
        });
    });
}

criterion_group!(
    benches,
    bench_fan_out,
    bench_system_event,
    bench_subscribe_unsubscribe
);
criterion_main!(benches);
