use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ramus::event_bus::{Event, EventBus, EventType};
use tokio::runtime::Runtime;

const BATCH_SIZES: &[usize] = &[64, 256, 1024];

fn user_event(i: usize) -> Event {
    Event {
        event_type: EventType::User("bench".to_string()),
        run_id: None,
        step: None,
        source: "bench".to_string(),
        source_node: String::new(),
        start_time: None,
        end_time: None,
        data: serde_json::json!({ "i": i }),
        meta: None,
    }
}

async fn publish_batch(bus: &EventBus, batch: usize) {
    bus.listen_for_events();
    let emitter = bus.get_emitter();
    for i in 0..batch {
        emitter.emit(user_event(i)).expect("emit");
    }
    bus.stop_listener().await;
}

fn event_bus_throughput(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("event_bus_publish");

    for &batch in BATCH_SIZES {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &size| {
            b.to_async(&runtime).iter(|| async {
                let bus = EventBus::default();
                publish_batch(&bus, size).await;
            });
        });
    }

    group.finish();
}

criterion_group!(benches, event_bus_throughput);
criterion_main!(benches);
