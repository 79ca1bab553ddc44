//! Symmetrize a 10 x 10 matrix on a 4 x 4 grid of lamellar PEs.
//!
//! Run with 16 PEs, e.g. `lamellar_run.sh -N=1 -T=16 ./target/release/gtm_symmetrize_lamellar`.

use gtmatrix::fabric::LamellarFabric;
use gtmatrix::{Extent, GlobalMatrix, MatrixConfig};

const ACTOR_PE: usize = 5;

fn print_matrix(label: &str, data: &[f64], n: usize) {
    println!("{label}:");
    for row in data.chunks(n) {
        let row: Vec<_> = row.iter().map(|x| format!("{x:>8.4}")).collect();
        println!("{}", row.join("    "));
    }
    println!();
}

fn main() -> gtmatrix::Result<()> {
    gtmatrix::logging::init_subscriber();
    let fabric = LamellarFabric::new();
    let config = MatrixConfig::new(10, 10, vec![0, 1, 4, 6, 10], vec![0, 2, 5, 7, 10]);
    let matrix = GlobalMatrix::<f64, _>::create(fabric, &config)?;
    let my_pe = matrix.my_id();
    let actor = ACTOR_PE.min(matrix.group_size() - 1);
    let full = Extent::new(0, 10, 0, 10);
    let mut mat = vec![0.0; 100];

    matrix.fill(my_pe as f64 + 10.0)?;
    matrix.sync()?;
    if my_pe == actor {
        matrix.get_block(full, &mut mat, 10)?;
        print_matrix("Initial matrix", &mat, 10);
    }
    matrix.sync()?;

    matrix.symmetrize()?;
    if my_pe == actor {
        matrix.get_block(full, &mut mat, 10)?;
        print_matrix("Symmetrized matrix", &mat, 10);
    }
    matrix.sync()?;
    matrix.destroy()
}
