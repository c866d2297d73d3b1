//! Fit-quality statistics.
//!
//! - `R² = 1 - Loss / TSS`, with `TSS = Σ (y - mean(y))²`
//! - `Chi² = Loss / (N_points - N_free)`
//!
//! Both are reported per curve and pooled over the dataset. A statistic that
//! is undefined (zero TSS, no degrees of freedom) is `None`.

use nalgebra::DMatrix;

/// Free parameters attributed to a single curve.
pub const PER_CURVE_FREE_PARAMETERS: usize = 3;

/// Total sum of squares of the non-missing values and their count.
pub fn total_sum_of_squares<I>(values: I) -> (f64, usize)
where
    I: IntoIterator<Item = f64> + Clone,
{
    let (sum, n) = values
        .clone()
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        return (0.0, 0);
    }
    let mean = sum / n as f64;
    let tss = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .map(|v| (v - mean) * (v - mean))
        .sum();
    (tss, n)
}

pub fn r_squared(loss: f64, tss: f64) -> Option<f64> {
    if tss > 0.0 && tss.is_finite() && loss.is_finite() {
        Some(1.0 - loss / tss)
    } else {
        None
    }
}

pub fn chi_squared(loss: f64, n_points: usize, n_free: usize) -> Option<f64> {
    if n_points > n_free && loss.is_finite() {
        Some(loss / (n_points - n_free) as f64)
    } else {
        None
    }
}

/// Per-curve and pooled statistics for one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitStatistics {
    pub n_points: Vec<usize>,
    pub r2: Vec<Option<f64>>,
    pub chi2: Vec<Option<f64>>,
    pub global_r2: Option<f64>,
    pub global_chi2: Option<f64>,
}

/// Statistics for `observed` given per-curve losses and the pooled free-parameter count.
pub fn fit_statistics(observed: &DMatrix<f64>, losses: &[f64], global_free: usize) -> FitStatistics {
    debug_assert_eq!(observed.ncols(), losses.len());

    let mut n_points = Vec::with_capacity(losses.len());
    let mut r2 = Vec::with_capacity(losses.len());
    let mut chi2 = Vec::with_capacity(losses.len());
    for (col, &loss) in observed.column_iter().zip(losses) {
        let (tss, n) = total_sum_of_squares(col.iter().copied());
        n_points.push(n);
        r2.push(r_squared(loss, tss));
        chi2.push(chi_squared(loss, n, PER_CURVE_FREE_PARAMETERS));
    }

    let total_loss: f64 = losses.iter().sum();
    let (tss, n) = total_sum_of_squares(observed.iter().copied());

    FitStatistics {
        n_points,
        r2,
        chi2,
        global_r2: r_squared(total_loss, tss),
        global_chi2: chi_squared(total_loss, n, global_free),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tss_ignores_missing() {
        let (tss, n) = total_sum_of_squares(vec![1.0, f64::NAN, 3.0]);
        assert_eq!(n, 2);
        assert!((tss - 2.0).abs() < 1e-12);
    }

    #[test]
    fn perfect_fit_has_unit_r2() {
        assert_eq!(r_squared(0.0, 5.0), Some(1.0));
        assert_eq!(r_squared(1.0, 0.0), None);
    }

    #[test]
    fn chi2_needs_degrees_of_freedom() {
        assert_eq!(chi_squared(6.0, 5, 3), Some(3.0));
        assert_eq!(chi_squared(6.0, 3, 3), None);
    }

    #[test]
    fn pooled_statistics_use_topology_free_parameters() {
        let observed = DMatrix::from_row_slice(
            5,
            2,
            &[0.0, 0.0, 1.0, 2.0, 2.0, 4.0, 3.0, 6.0, 4.0, f64::NAN],
        );
        let stats = fit_statistics(&observed, &[1.0, 2.0], 3);
        assert_eq!(stats.n_points, vec![5, 4]);
        assert_eq!(stats.chi2[0], Some(0.5));
        assert_eq!(stats.chi2[1], Some(2.0));
        assert_eq!(stats.global_chi2, Some(0.5));
        let r2 = stats.r2[0].unwrap();
        assert!((r2 - 0.9).abs() < 1e-12);
    }
}
