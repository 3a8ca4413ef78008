use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use ndarray::{Array2, Array3, Array4};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use sbi_core::{batched_mixture_vmv, mog_log_prob};

struct Inputs {
    theta: Array2<f64>,
    logits: Array2<f64>,
    means: Array3<f64>,
    precisions: Array4<f64>,
}

fn make_inputs(batch: usize, components: usize, dim: usize) -> Inputs {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let theta = Array2::from_shape_fn((batch, dim), |_| rng.sample(StandardNormal));
    let logits = Array2::from_shape_fn((batch, components), |_| rng.sample(StandardNormal));
    let means = Array3::from_shape_fn((batch, components, dim), |_| rng.sample(StandardNormal));
    // diagonally dominant, therefore positive definite
    let precisions = Array4::from_shape_fn((batch, components, dim, dim), |(_, _, i, j)| {
        if i == j {
            dim as f64 + rng.random::<f64>()
        } else {
            0.5
        }
    });
    Inputs {
        theta,
        logits,
        means,
        precisions,
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    for (batch, components, dim) in [(100, 5, 2), (1000, 10, 5), (100, 2, 20)] {
        let inputs = make_inputs(batch, components, dim);
        let name = format!("mog_log_prob {batch}x{components}x{dim}");
        c.bench_function(&name, |b| {
            b.iter(|| {
                mog_log_prob(
                    black_box(inputs.theta.view()),
                    black_box(inputs.logits.view()),
                    black_box(inputs.means.view()),
                    black_box(inputs.precisions.view()),
                )
                .unwrap()
            })
        });

        let name = format!("batched_mixture_vmv {batch}x{components}x{dim}");
        c.bench_function(&name, |b| {
            b.iter_batched(
                || inputs.means.clone(),
                |vector| batched_mixture_vmv(inputs.precisions.view(), vector.view()),
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
