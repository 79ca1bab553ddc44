use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use gtmatrix::descriptor::{DescriptorCache, StridedRegion};
use gtmatrix::fabric::{ThreadComm, ThreadGroup};
use gtmatrix::{Extent, GlobalMatrix, MatrixConfig};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::hint::black_box;

const MATRIX_DIM: usize = 256;
const NUM_PANELS: usize = 64;

// One member owning the whole matrix, so no iteration waits on a barrier.
fn single_member_matrix() -> GlobalMatrix<f64, ThreadComm> {
    let comm = ThreadGroup::new(1).remove(0);
    let config = MatrixConfig::uniform(MATRIX_DIM, MATRIX_DIM, 1, 1);
    GlobalMatrix::create(comm, &config).expect("unable to create matrix")
}

fn random_panels(width: usize) -> Vec<(Extent, Vec<f64>)> {
    let mut rng: StdRng = SeedableRng::seed_from_u64(42);
    (0..NUM_PANELS)
        .map(|_| {
            let region = Extent::new(
                rng.gen_range(0, MATRIX_DIM - width + 1),
                width,
                rng.gen_range(0, MATRIX_DIM - width + 1),
                width,
            );
            (region, (0..width * width).map(|_| rng.gen::<f64>()).collect())
        })
        .collect()
}

fn column(region: &Extent, j: usize) -> Extent {
    Extent::new(region.row_start, region.row_num, region.col_start + j, 1)
}

fn benchmark_panel_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("panel_updates");
    for &width in &[4usize, 16, 32] {
        let panels = random_panels(width);

        group.bench_with_input(BenchmarkId::new("immediate", width), &width, |b, _| {
            let matrix = single_member_matrix();
            b.iter(|| {
                for (region, data) in &panels {
                    for j in 0..width {
                        matrix
                            .accumulate_block(column(region, j), &data[j..], width)
                            .unwrap();
                    }
                }
                matrix.sync().unwrap();
            })
        });

        group.bench_with_input(BenchmarkId::new("batched", width), &width, |b, _| {
            let mut matrix = single_member_matrix();
            b.iter(|| {
                let mut batch = matrix.start_batch();
                for (region, data) in &panels {
                    for j in 0..width {
                        batch
                            .add_accumulate_block_request(column(region, j), &data[j..], width)
                            .unwrap();
                    }
                }
                batch.flush().unwrap();
                batch.stop();
                matrix.sync().unwrap();
            })
        });

        group.bench_with_input(BenchmarkId::new("whole_panel", width), &width, |b, _| {
            let matrix = single_member_matrix();
            b.iter(|| {
                for (region, data) in &panels {
                    matrix.accumulate_block(*region, data, width).unwrap();
                }
                matrix.sync().unwrap();
            })
        });
    }
    group.finish();
}

fn benchmark_descriptors(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptors");
    let cache = DescriptorCache::new(MATRIX_DIM);

    group.bench_function("cached_lookup", |b| {
        b.iter(|| {
            for rows in 1..=16 {
                black_box(cache.small_window_region(black_box(rows), black_box(9)));
            }
        })
    });

    group.bench_function("transient", |b| {
        b.iter(|| {
            for rows in 1..=16 {
                black_box(StridedRegion::new(black_box(rows), black_box(9), MATRIX_DIM));
            }
        })
    });
    group.finish();
}

fn benchmark_symmetrize(c: &mut Criterion) {
    let mut group = c.benchmark_group("symmetrize");
    group.sample_size(10);
    for &members in &[1usize, 4] {
        let blocks = (members as f64).sqrt() as usize;
        let config = MatrixConfig::uniform(MATRIX_DIM, MATRIX_DIM, blocks, blocks);
        group.bench_with_input(BenchmarkId::new("group", members), &members, |b, &members| {
            b.iter(|| {
                ThreadGroup::run(members, |comm| {
                    let matrix = GlobalMatrix::<f64, _>::create(comm, &config).unwrap();
                    matrix.fill(matrix.my_id() as f64).unwrap();
                    matrix.symmetrize().unwrap();
                    matrix.destroy().unwrap();
                })
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_panel_updates,
    benchmark_descriptors,
    benchmark_symmetrize
);
criterion_main!(benches);
