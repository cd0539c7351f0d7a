// =============================================================================
// Cross-sectional scaling — raw component series onto a 0–100 scale
// =============================================================================
//
// Raw ILLIQ and traded value span several orders of magnitude across the
// market, so absolute scaling would crush most symbols into a corner.
// Percentile-rank scaling is used instead: each observation is scored by its
// rank within the whole cross-section (all symbol-days in the analysis
// window). Ties receive their average rank, so identical inputs always get
// identical scores. Higher is more liquid for every component; ILLIQ is
// rank-inverted (a lower raw value means better liquidity).
// =============================================================================

/// Scale `values` to 0–100 by percentile rank.
///
/// With `invert` set, the ranking is reversed (used for ILLIQ). A cross
/// section of fewer than two points degenerates to 50. Non-finite inputs
/// score 0.
pub fn percentile_rank_scale(values: &[f64], invert: bool) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![if values[0].is_finite() { 50.0 } else { 0.0 }];
    }

    // Sort indices by value; NaNs sink to the bottom and score zero.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Average rank for ties keeps equal inputs at equal scores.
    let mut ranks = vec![0.0_f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0;
        for k in i..=j {
            ranks[order[k]] = avg_rank;
        }
        i = j + 1;
    }

    let span = (n - 1) as f64;
    values
        .iter()
        .zip(ranks.iter())
        .map(|(v, rank)| {
            if !v.is_finite() {
                return 0.0;
            }
            let score = rank / span * 100.0;
            if invert {
                100.0 - score
            } else {
                score
            }
        })
        .collect()
}
