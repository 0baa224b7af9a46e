use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ruleval::{lexer, parser};

const EXPRESSION: &str =
    r#"Segments[0].Origin == "MOW" && Passengers.Adults == 2 && Marker == "test""#;

fn bench_frontend(c: &mut Criterion) {
    c.bench_function("frontend_tokenize", |b| {
        b.iter(|| {
            let tokens = lexer::tokenize(black_box(EXPRESSION)).expect("tokenize");
            black_box(tokens);
        })
    });

    c.bench_function("frontend_parse", |b| {
        b.iter(|| {
            let tokens = lexer::tokenize(black_box(EXPRESSION)).expect("tokenize");
            let node = parser::parse_tokens(tokens).expect("parse");
            black_box(node);
        })
    });
}

criterion_group!(benches, bench_frontend);
criterion_main!(benches);
