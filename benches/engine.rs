use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ruleval::{Bindings, Value};

const EXPRESSION: &str =
    r#"Segments[0].Origin == "MOW" && Passengers.Adults == 2 && Marker == "test""#;

fn environment() -> Value {
    Value::map([
        (
            "Segments",
            Value::array(vec![Value::map([("Origin", Value::from("MOW"))])]),
        ),
        ("Passengers", Value::map([("Adults", Value::Int(2))])),
        ("Marker", Value::from("test")),
    ])
}

fn bench_engine(c: &mut Criterion) {
    let node = ruleval::parse(EXPRESSION).expect("parse");
    let program = ruleval::compile(&node).expect("compile");
    let env = environment();

    c.bench_function("engine_compile_only", |b| {
        b.iter(|| {
            let program = ruleval::compile(black_box(&node)).expect("compile");
            black_box(program);
        })
    });

    c.bench_function("engine_vm_prepared", |b| {
        b.iter(|| {
            let out = ruleval::run(black_box(&program), &env, &Bindings).expect("run");
            black_box(out);
        })
    });

    c.bench_function("engine_tree_walk", |b| {
        b.iter(|| {
            let out = ruleval::eval_node(black_box(&node), &env, &Bindings).expect("eval");
            black_box(out);
        })
    });

    c.bench_function("engine_total_pipeline", |b| {
        b.iter(|| {
            let out = ruleval::eval(black_box(EXPRESSION), &env).expect("eval");
            black_box(out);
        })
    });
}

criterion_group!(benches, bench_engine);
criterion_main!(benches);
