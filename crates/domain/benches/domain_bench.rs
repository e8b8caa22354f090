use common::{AggregateId, CorrelationId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    Aggregate, CreateOrder, CustomerId, DomainEvent, MarkDelivered, Money, Order, OrderEvent,
    OrderItem, OrderService,
};
use event_store::{AppendOptions, EventStore, InMemoryEventStore, NewEvent};

fn sample_items() -> Vec<OrderItem> {
    vec![
        OrderItem::new("SKU-001", "Widget", 2, Money::from_cents(1000)),
        OrderItem::new("SKU-002", "Gadget", 1, Money::from_cents(500)),
    ]
}

fn make_event(event: &OrderEvent) -> NewEvent {
    NewEvent::builder()
        .event_type(event.event_type())
        .correlation_id(CorrelationId::new())
        .payload(event)
        .unwrap()
        .build()
}

fn bench_create_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("domain/create_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let service = OrderService::new(store);
                let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
                service
                    .create_order(cmd, CorrelationId::new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_full_lifecycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("domain/full_lifecycle", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let service = OrderService::new(store);
                let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
                let order_id = cmd.order_id;
                service
                    .create_order(cmd, CorrelationId::new())
                    .await
                    .unwrap();

                service
                    .confirm_payment(order_id, "PAY-1".to_string(), CorrelationId::new())
                    .await
                    .unwrap();
                service
                    .mark_reserved(order_id, vec!["RES-1".to_string()], CorrelationId::new())
                    .await
                    .unwrap();
                service
                    .schedule_fulfillment(order_id, "TRACK-1".to_string(), CorrelationId::new())
                    .await
                    .unwrap();
                service
                    .mark_delivered(MarkDelivered::new(order_id), CorrelationId::new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_aggregate_reconstruction(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let agg_id = AggregateId::new();

    // Pre-populate: 1 create + 99 notification events
    rt.block_on(async {
        let created = OrderEvent::order_created(
            agg_id,
            CustomerId::new(),
            sample_items(),
            Money::from_cents(2500),
        );
        let mut events = vec![make_event(&created)];
        for _ in 0..99 {
            events.push(make_event(&OrderEvent::notification_sent("email")));
        }
        store
            .append(agg_id, "Order", events, AppendOptions::new())
            .await
            .unwrap();
    });

    c.bench_function("domain/reconstruct_100_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let events = store.get_events_for_aggregate(agg_id).await.unwrap();
                let mut order = Order::default();
                for event in &events {
                    let domain_event: OrderEvent =
                        serde_json::from_value(event.payload.clone()).unwrap();
                    order.apply(domain_event);
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_create_order,
    bench_full_lifecycle,
    bench_aggregate_reconstruction,
);
criterion_main!(benches);
