use bitspread::{Backend, ModulusSpreader, Strategy};
use criterion::{Criterion, criterion_group, criterion_main};

fn spread_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("spread");

    for strategy in [
        Strategy::Spread,
        Strategy::Reject,
        Strategy::Gen,
        Strategy::InverseSample,
        Strategy::InverseFrac,
        Strategy::Mask,
    ] {
        let mut spreader =
            ModulusSpreader::new(48_271, 31, Backend::ChaCha.source(Some(1))).unwrap();
        let mut z = 0u128;
        group.bench_function(strategy.name(), |bench| {
            bench.iter(|| {
                z = (z + 1) % 48_271;
                std::hint::black_box(spreader.spread(strategy, z))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, spread_strategies);
criterion_main!(benches);
