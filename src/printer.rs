use crate::options::GtmCli;
use crate::Variant;

use std::time::Duration;

pub(crate) fn print_matrix(label: &str, data: &[f64], nrows: usize, ncols: usize, ld: usize) {
    println!("{label}:");
    for r in 0..nrows {
        let row = &data[r * ld..r * ld + ncols];
        println!(
            "{}",
            row.iter()
                .map(|x| format!("{x:>8.4}"))
                .collect::<Vec<_>>()
                .join("    ")
        );
    }
    println!();
}

/// `times` holds (issue, total) per iteration as seen by member 0.
pub(crate) fn print_times(cli: &GtmCli, variant: &Variant, times: &[(Duration, Duration)]) {
    let members = cli.members();
    let elements = match variant {
        Variant::Symmetrize => cli.rows * cli.cols,
        Variant::ImmediateUpdate | Variant::BatchedUpdate => cli.updates * cli.panel_elements(),
    };
    let payload = elements * std::mem::size_of::<f64>();
    for (issue, total) in times {
        let secs = total.as_secs_f32();
        println!(
            "{:<16} issue {:>9.4?} total {:>9.4?} lMelem/s {:>9.2?}, gMelem/s {:>9.2?}, lGB/s {:>7.2?}",
            format!("{variant:?}"),
            issue,
            total,
            (elements as f32 / 1_000_000.0) / secs,
            ((elements * members) as f32 / 1_000_000.0) / secs,
            (payload as f32 / 1_000_000_000.0) / secs,
        );
    }
}

/// Sums taken in a different order may differ in the last bits.
pub(crate) fn checksum_matches(expected: f64, found: f64) -> bool {
    (expected - found).abs() <= 1e-9 * expected.abs().max(1.0)
}

pub(crate) fn print_checksum(variant: &Variant, expected: f64, found: f64) {
    let status = if checksum_matches(expected, found) {
        "ok"
    } else {
        "MISMATCH"
    };
    println!("{variant:?} checksum {found} expected {expected} {status}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_tolerates_summation_order() {
        let values: Vec<f64> = (1..1000).map(|x| 1.0 / x as f64).collect();
        let forward: f64 = values.iter().sum();
        let backward: f64 = values.iter().rev().sum();
        assert!(checksum_matches(forward, backward));
        assert!(checksum_matches(0.1 + 0.2, 0.3));
        assert!(!checksum_matches(1000.0, 1000.001));
        assert!(!checksum_matches(0.0, 1e-6));
    }
}
