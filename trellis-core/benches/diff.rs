//! Benchmark: keyed child reconciliation

use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trellis_core::props;
use trellis_core::render::{h, longest_increasing_subsequence, Renderer, TestHost, VNode};

fn keyed_rows(order: &[usize]) -> VNode {
    let rows = order
        .iter()
        .map(|&i| h("tr", Some(props! { "key" => i }), i.to_string()))
        .collect::<Vec<_>>();
    h("tbody", None, rows)
}

/// Swap the second and second-to-last rows, the classic worst case for
/// naive list diffing.
fn swapped(len: usize) -> Vec<usize> {
    let mut order = (0..len).collect::<Vec<_>>();
    if len > 2 {
        order.swap(1, len - 2);
    }
    order
}

fn bench_keyed_patch(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyed_patch");
    for len in [100usize, 1_000] {
        let straight = (0..len).collect::<Vec<_>>();
        let swap = swapped(len);
        let reversed = straight.iter().rev().copied().collect::<Vec<_>>();

        for (name, next) in [("swap_rows", &swap), ("reverse", &reversed)] {
            group.bench_with_input(BenchmarkId::new(name, len), &len, |b, _| {
                let host = Rc::new(TestHost::new());
                let renderer = Renderer::new(Rc::clone(&host));
                let root = host.root();
                renderer.render(Some(keyed_rows(&straight)), root).unwrap();
                let mut flip = false;
                b.iter(|| {
                    let order = if flip { &straight } else { next };
                    flip = !flip;
                    renderer.render(Some(keyed_rows(order)), root).unwrap();
                    host.reset_ops();
                });
            });
        }
    }
    group.finish();
}

fn bench_lis(c: &mut Criterion) {
    let input = (0..1_000usize).map(|i| (i * 7919) % 1_000).collect::<Vec<_>>();
    c.bench_function("longest_increasing_subsequence_1000", |b| {
        b.iter(|| longest_increasing_subsequence(black_box(&input)))
    });
}

criterion_group!(benches, bench_keyed_patch, bench_lis);
criterion_main!(benches);
