mod options;
mod printer;
mod record;

use options::GtmCli;
use record::RunRecord;

use clap::{Parser, ValueEnum};
use gtmatrix::fabric::{ThreadComm, ThreadGroup};
use gtmatrix::{Extent, GlobalMatrix, MatrixConfig, Result};
use rand::prelude::*;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Variant {
    Symmetrize,
    ImmediateUpdate,
    BatchedUpdate,
}

/// What one member saw during a variant.
struct MemberReport {
    times: Vec<(Duration, Duration)>,
    // sum of everything this member wrote into the matrix
    generated: f64,
    // sum of this member's block at the end
    local_sum: f64,
    snapshots: Option<(Vec<f64>, Vec<f64>)>,
}

/// Random `w`-wide panels, each stored row-major with leading dimension `w`.
fn random_panels(cli: &GtmCli, rng: &mut StdRng) -> Vec<(Extent, Vec<f64>)> {
    let h = cli.panel_width.min(cli.rows);
    let w = cli.panel_width.min(cli.cols);
    (0..cli.updates)
        .map(|_| {
            let region = Extent::new(
                rng.gen_range(0, cli.rows - h + 1),
                h,
                rng.gen_range(0, cli.cols - w + 1),
                w,
            );
            let data = (0..h * w).map(|_| rng.gen_range(0, 10) as f64).collect();
            (region, data)
        })
        .collect()
}

fn read_full(matrix: &GlobalMatrix<f64, ThreadComm>) -> Result<Vec<f64>> {
    let (nrows, ncols) = (matrix.nrows(), matrix.ncols());
    let mut out = vec![0.0; nrows * ncols];
    matrix.get_block(Extent::new(0, nrows, 0, ncols), &mut out, ncols)?;
    Ok(out)
}

fn symmetrize(matrix: &GlobalMatrix<f64, ThreadComm>, cli: &GtmCli) -> Result<MemberReport> {
    let my_id = matrix.my_id();
    let fill = my_id as f64 + 10.0;
    matrix.fill(fill)?;
    matrix.sync()?;
    let before = if cli.print && my_id == 0 {
        Some(read_full(matrix)?)
    } else {
        None
    };
    matrix.sync()?;

    let mut times = Vec::with_capacity(cli.iterations);
    for _ in 0..cli.iterations {
        let timer = Instant::now();
        matrix.symmetrize()?;
        let total = timer.elapsed();
        times.push((total, total));
    }

    let snapshots = match before {
        Some(before) => Some((before, read_full(matrix)?)),
        None => None,
    };
    finish(matrix, times, fill * matrix.owned_extent().len() as f64, snapshots)
}

fn panel_updates(
    matrix: &mut GlobalMatrix<f64, ThreadComm>,
    cli: &GtmCli,
    batched: bool,
) -> Result<MemberReport> {
    let mut rng = StdRng::seed_from_u64(matrix.my_id() as u64);
    matrix.sync()?;

    let mut generated = 0.0;
    let mut times = Vec::with_capacity(cli.iterations);
    for _ in 0..cli.iterations {
        let panels = random_panels(cli, &mut rng);
        generated += panels.iter().flat_map(|(_, d)| d.iter()).sum::<f64>();

        matrix.sync()?;
        let timer = Instant::now();
        // one request per panel column
        if batched {
            let mut batch = matrix.start_batch();
            for (region, data) in &panels {
                for j in 0..region.col_num {
                    let column = Extent::new(region.row_start, region.row_num, region.col_start + j, 1);
                    batch.add_accumulate_block_request(column, &data[j..], region.col_num)?;
                }
            }
            batch.flush()?;
            batch.stop();
        } else {
            for (region, data) in &panels {
                for j in 0..region.col_num {
                    let column = Extent::new(region.row_start, region.row_num, region.col_start + j, 1);
                    matrix.accumulate_block(column, &data[j..], region.col_num)?;
                }
            }
        }
        let issue = timer.elapsed();
        matrix.sync()?;
        times.push((issue, timer.elapsed()));
    }
    finish(matrix, times, generated, None)
}

fn finish(
    matrix: &GlobalMatrix<f64, ThreadComm>,
    times: Vec<(Duration, Duration)>,
    generated: f64,
    snapshots: Option<(Vec<f64>, Vec<f64>)>,
) -> Result<MemberReport> {
    matrix.sync()?;
    let local_sum = matrix.read_local()?.iter().sum();
    Ok(MemberReport {
        times,
        generated,
        local_sum,
        snapshots,
    })
}

fn run_member(
    comm: ThreadComm,
    cli: &GtmCli,
    config: &MatrixConfig,
    variant: Variant,
) -> Result<MemberReport> {
    let mut matrix = GlobalMatrix::<f64, _>::create(comm, config)?;
    let report = match variant {
        Variant::Symmetrize => symmetrize(&matrix, cli)?,
        Variant::ImmediateUpdate => panel_updates(&mut matrix, cli, false)?,
        Variant::BatchedUpdate => panel_updates(&mut matrix, cli, true)?,
    };
    matrix.destroy()?;
    Ok(report)
}

fn main() -> Result<()> {
    gtmatrix::logging::init_subscriber();
    let cli = GtmCli::parse();
    let config = cli.config();
    cli.describe();

    let mut record = RunRecord::new();
    record.with_output("members", cli.members().to_string());
    record.with_output("rows", cli.rows.to_string());
    record.with_output("cols", cli.cols.to_string());

    for variant in cli.variants() {
        info!(?variant, members = cli.members(), "starting variant");
        let reports = ThreadGroup::run(cli.members(), |comm| run_member(comm, &cli, &config, variant))
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        if let Some((before, after)) = &reports[0].snapshots {
            printer::print_matrix("Initial matrix", before, cli.rows, cli.cols, cli.cols);
            printer::print_matrix("Symmetrized matrix", after, cli.rows, cli.cols, cli.cols);
        }
        printer::print_times(&cli, &variant, &reports[0].times);

        let expected: f64 = reports.iter().map(|r| r.generated).sum();
        let found: f64 = reports.iter().map(|r| r.local_sum).sum();
        printer::print_checksum(&variant, expected, found);

        let mean = reports[0].times.iter().map(|t| t.1.as_secs_f64()).sum::<f64>()
            / reports[0].times.len().max(1) as f64;
        record.with_output(&format!("{variant:?}_mean_secs"), mean.to_string());
        record.with_output(
            &format!("{variant:?}_checksum_ok"),
            printer::checksum_matches(expected, found).to_string(),
        );
    }

    match &cli.output_dir {
        Some(dir) => {
            let path = record.default_output_path(dir);
            if let Err(e) = record.write(&path) {
                warn!(path = %path.display(), "unable to write run record: {e}");
            }
        }
        None => record.display(Some(3)),
    }
    Ok(())
}
