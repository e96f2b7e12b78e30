//! Strategy comparison on the in-process transport.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cosma::comm::ThreadComm;
use cosma::{
    GridLayout, Layout, MatrixDescriptor, MatrixDescriptorMut, MultiplyContext, MultiplyOptions,
    Op,
};

fn dense(rows: usize, cols: usize, seed: u64) -> Vec<f64> {
    // Cheap deterministic fill; benchmark inputs need no statistics.
    (0..rows * cols)
        .map(|i| ((i as u64).wrapping_mul(seed + 1) % 1000) as f64 / 500.0 - 1.0)
        .collect()
}

fn run_once(m: usize, n: usize, k: usize, p: usize, spec: Option<&str>, grids: (usize, usize)) {
    let (pr, pc) = grids;
    let a = dense(m, k, 1);
    let b = dense(k, n, 2);
    let a_layout = Layout::Grid(GridLayout::new(m, k, pr, pc).unwrap());
    let b_layout = Layout::Grid(GridLayout::new(k, n, pr, pc).unwrap());
    let c_layout = Layout::Grid(GridLayout::new(m, n, pr, pc).unwrap());
    let options = MultiplyOptions {
        strategy_spec: spec.map(str::to_owned),
        memory_limit: None,
    };

    ThreadComm::<f64>::run(p, |comm| {
        let rank = comm.rank();
        let a_local: Vec<f64> = a_layout
            .owned_regions(rank)
            .iter()
            .flat_map(|r| {
                (0..r.size()).map(|l| {
                    let (i, j) = r.global_index(l);
                    a[j * m + i]
                })
            })
            .collect();
        let b_local: Vec<f64> = b_layout
            .owned_regions(rank)
            .iter()
            .flat_map(|r| {
                (0..r.size()).map(|l| {
                    let (i, j) = r.global_index(l);
                    b[j * k + i]
                })
            })
            .collect();
        let mut c_local = vec![0.0; c_layout.local_len(rank)];

        let mut ctx =
            MultiplyContext::with_options(m, n, k, comm.size(), options.clone()).unwrap();
        let da = MatrixDescriptor::new(m, k, Op::NoTrans, a_layout.clone(), &a_local).unwrap();
        let db = MatrixDescriptor::new(k, n, Op::NoTrans, b_layout.clone(), &b_local).unwrap();
        let mut dc = MatrixDescriptorMut::new(m, n, c_layout.clone(), &mut c_local).unwrap();
        cosma::multiply(&comm, &mut ctx, &da, &db, &mut dc, 1.0, 0.0).unwrap();
    });
}

fn bench_strategies(c: &mut Criterion) {
    let (m, n, k) = (256, 256, 256);
    let mut group = c.benchmark_group("multiply_256_p4");
    group.throughput(Throughput::Elements((m * n * k) as u64));
    group.sample_size(10);
    for spec in ["pm2,pn2", "pk4", "pm2,sm2,pk2"] {
        group.bench_with_input(BenchmarkId::from_parameter(spec), &spec, |bench, &spec| {
            bench.iter(|| run_once(m, n, k, 4, Some(spec), (2, 2)));
        });
    }
    group.bench_function("auto", |bench| {
        bench.iter(|| run_once(m, n, k, 4, None, (2, 2)));
    });
    group.finish();
}

fn bench_single_process(c: &mut Criterion) {
    let (m, n, k) = (256, 256, 256);
    let mut group = c.benchmark_group("multiply_256_p1");
    group.throughput(Throughput::Elements((m * n * k) as u64));
    group.sample_size(10);
    group.bench_function("local", |bench| {
        bench.iter(|| run_once(m, n, k, 1, None, (1, 1)));
    });
    group.finish();
}

criterion_group!(benches, bench_strategies, bench_single_process);
criterion_main!(benches);
