//! Benchmarks for the listener hot path: frame parsing and event dispatch

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tradeflow_balance_feed::listener::{ListenerEvent, ListenerMachine};
use tradeflow_balance_feed::protocol::InboundMessage;

const BALANCE_FRAME: &str =
    r#"{"event":"balance","accountId":"ACC1","balance":"25431.88","currency":"USD","timestamp":1755772800000}"#;

/// Machine driven through the handshake to the live stage
fn live_machine() -> ListenerMachine {
    let mut machine = ListenerMachine::new("token", "ACC1", 5);
    machine.handle(ListenerEvent::ConnectStarted);
    machine.handle(ListenerEvent::Opened);
    machine.handle(ListenerEvent::Inbound(
        InboundMessage::parse(r#"{"event":"authenticated","accountId":"ACC1"}"#).unwrap(),
    ));
    machine.handle(ListenerEvent::Inbound(
        InboundMessage::parse(
            r#"{"event":"balance","accountId":"ACC1","balance":"1000.00","currency":"USD","subscriptionId":"sub-1"}"#,
        )
        .unwrap(),
    ));
    assert!(machine.is_subscribed());
    machine
}

fn benchmark_parse_balance(c: &mut Criterion) {
    c.bench_function("parse_balance_frame", |b| {
        b.iter(|| InboundMessage::parse(black_box(BALANCE_FRAME)).unwrap())
    });
}

fn benchmark_dispatch_balance(c: &mut Criterion) {
    let mut machine = live_machine();

    c.bench_function("dispatch_balance_update", |b| {
        b.iter(|| {
            let message = InboundMessage::parse(black_box(BALANCE_FRAME)).unwrap();
            machine.handle(ListenerEvent::Inbound(message))
        })
    });
}

fn benchmark_full_handshake(c: &mut Criterion) {
    c.bench_function("handshake_to_live", |b| b.iter(live_machine));
}

criterion_group!(
    benches,
    benchmark_parse_balance,
    benchmark_dispatch_balance,
    benchmark_full_handshake
);
criterion_main!(benches);
