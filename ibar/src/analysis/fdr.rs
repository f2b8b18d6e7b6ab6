//! Benjamini-Hochberg false discovery rate.

/// Adjusts p-values with the Benjamini-Hochberg step-up procedure.
///
/// Sorted ascending, each p-value becomes `p * N / rank`; a running minimum
/// from the largest rank down keeps the result monotone, and values are
/// clipped to `[0, 1]`. NaN p-values are left out of `N` and stay NaN.
pub fn adjust_fdr(pvalues: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..pvalues.len())
        .filter(|&i| !pvalues[i].is_nan())
        .collect();
    order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    let m = order.len() as f64;
    let mut fdr = vec![f64::NAN; pvalues.len()];
    let mut running_min = f64::INFINITY;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adjusted = pvalues[i] * m / (rank + 1) as f64;
        running_min = running_min.min(adjusted);
        fdr[i] = running_min.clamp(0.0, 1.0);
    }
    fdr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_up_takes_running_minimum() {
        let fdr = adjust_fdr(&[0.01, 0.04, 0.03, 0.02]);
        for q in &fdr {
            assert!((q - 0.04).abs() < 1e-12);
        }

        let fdr = adjust_fdr(&[0.001, 0.5, 0.02]);
        assert!((fdr[0] - 0.003).abs() < 1e-12);
        assert!((fdr[2] - 0.03).abs() < 1e-12);
        assert!((fdr[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn monotone_and_bounded() {
        let p = [0.9, 0.001, 0.2, 1.0, 0.05, 0.05, 0.7, 0.0003];
        let fdr = adjust_fdr(&p);
        let mut pairs: Vec<(f64, f64)> = p.iter().copied().zip(fdr).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        for w in pairs.windows(2) {
            assert!(w[0].1 <= w[1].1);
        }
        for (_, q) in pairs {
            assert!((0.0..=1.0).contains(&q));
        }
    }

    #[test]
    fn nan_stays_nan() {
        let fdr = adjust_fdr(&[0.01, f64::NAN, 0.02]);
        assert!(fdr[1].is_nan());
        assert!((fdr[0] - 0.02).abs() < 1e-12);
        assert!((fdr[2] - 0.02).abs() < 1e-12);
        assert!(adjust_fdr(&[]).is_empty());
    }
}
