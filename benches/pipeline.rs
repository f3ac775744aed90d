//! Pipeline benchmarks: plan building, parameter encoding, stream parsing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal_macros::dec;
use std::sync::Arc;

use vault_pilot::codec::{encode, ParamValue};
use vault_pilot::model::DesiredState;
use vault_pilot::network::SseParser;
use vault_pilot::plan::build_plan;
use vault_pilot::registry::StrategyCatalog;

fn bench_plan_build(c: &mut Criterion) {
    let catalog = Arc::new(StrategyCatalog::builtin());
    let descriptor = catalog.get("bob").unwrap().clone();

    let mut model = DesiredState::new(catalog);
    model.set_strategy("bob");
    model.set_template(Some("conservative".into()));
    model.set_target_tokens(["USDC".to_string(), "USDT".to_string()].into());
    model.set_target_platforms(["uniswapV3".to_string()].into());

    c.bench_function("plan_build_full", |b| {
        b.iter(|| {
            build_plan(
                black_box(model.observed()),
                black_box(model.desired()),
                model.diff(),
                &descriptor,
                true,
                true,
            )
        })
    });
}

fn bench_codec_encode(c: &mut Criterion) {
    let values = vec![
        ParamValue::Percent(dec!(12.5)),
        ParamValue::FiatCurrency(dec!(3.07)),
        ParamValue::Integer(86_400),
        ParamValue::Decimal(dec!(0.123456)),
        ParamValue::Boolean(true),
        ParamValue::Select(2),
    ];
    c.bench_function("codec_encode_six_kinds", |b| {
        b.iter(|| {
            for value in &values {
                let _ = encode(black_box("param"), black_box(value));
            }
        })
    });
}

fn bench_sse_parse(c: &mut Criterion) {
    let frame = b"event: PositionRebalanced\ndata: {\"data\":{\"vaultAddress\":\"0x00000000000000000000000000000000000000a1\"},\"timestamp\":1700000000000}\n\n";
    c.bench_function("sse_parse_frame", |b| {
        b.iter(|| {
            let mut parser = SseParser::default();
            black_box(parser.push(black_box(frame)))
        })
    });
}

criterion_group!(benches, bench_plan_build, bench_codec_encode, bench_sse_parse);
criterion_main!(benches);
