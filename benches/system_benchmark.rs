// ========================================================================================
//
//                 MSEPM REGRESSION SYSTEM PERFORMANCE BENCHMARK
//
// ========================================================================================
//
// Measures how the per-feature regression sweep scales with the worker pool size.
// This sweep dominates every alternating-least-squares iteration.
//
// ========================================================================================

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use msepm::system::{WorkerPool, solve_regression_system};
use ndarray::Array2;
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const NUM_SAMPLES: usize = 200;
const STATE_DIMS: usize = 2;
const WORKER_COUNTS: [usize; 4] = [1, 2, 4, 8];

fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |_| rng.sample(Standard))
}

fn benchmark_regression_system(c: &mut Criterion) {
    let states = random_matrix(NUM_SAMPLES, STATE_DIMS, 0x5EED);
    let mut group = c.benchmark_group("regression_system");

    for n_features in [1_000_usize, 10_000] {
        let observations = random_matrix(n_features, NUM_SAMPLES, 0xFEED + n_features as u64);
        group.throughput(Throughput::Elements(n_features as u64));

        for &workers in WORKER_COUNTS.iter() {
            let pool = match WorkerPool::new(workers) {
                Ok(pool) => pool,
                Err(e) => panic!("failed to build worker pool: {e}"),
            };
            group.bench_with_input(
                BenchmarkId::new(format!("{n_features}_features"), workers),
                &observations,
                |b, input| {
                    b.iter(|| {
                        let solution =
                            solve_regression_system(states.view(), input.view(), &pool, true);
                        black_box(solution.is_ok());
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(regression_system, benchmark_regression_system);
criterion_main!(regression_system);
