//! False discovery rate estimation by target/decoy counting
//!
//! Rows must be sorted best score first before calling [`calculate_fdr`],
//! and FDR values must be present before calling [`calculate_fdr_score`].
//!
//! Jones et al., https://doi.org/10.1002/pmic.200800473 (FDR-score)

use crate::evidence::{Decoy, PsmIx};
use crate::score::ScoreDirection;
use crate::structure::IntermediateStructure;
use fnv::FnvHashSet;
use log::info;
use regex::Regex;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FdrRow<Ix> {
    pub ix: Ix,
    pub score: f64,
    pub decoy: bool,
    pub fdr: f64,
    pub q_value: f64,
    pub fdr_score: f64,
}

impl<Ix> FdrRow<Ix> {
    pub fn new(ix: Ix, score: f64, decoy: bool) -> Self {
        FdrRow {
            ix,
            score,
            decoy,
            fdr: f64::NAN,
            q_value: f64::NAN,
            fdr_score: f64::NAN,
        }
    }
}

/// Sort rows best score first
pub fn sort_rows<Ix>(rows: &mut [FdrRow<Ix>], direction: ScoreDirection) {
    rows.sort_by(|a, b| direction.compare(a.score, b.score));
}

/// Assign FDR and q-value to score sorted rows. Returns the number of rows
/// with a q-value of at most 1%.
///
/// Rows with identical scores form one rank and share their FDR, which counts
/// every row of the rank. While no target has been seen, the FDR is infinite.
pub fn calculate_fdr<Ix>(rows: &mut [FdrRow<Ix>]) -> usize {
    let mut decoys = 0usize;
    let mut targets = 0usize;
    let mut start = 0;
    while start < rows.len() {
        let score = rows[start].score;
        let end = rows[start..]
            .iter()
            .position(|row| row.score != score)
            .map(|len| start + len)
            .unwrap_or(rows.len());

        for row in &rows[start..end] {
            match row.decoy {
                true => decoys += 1,
                false => targets += 1,
            }
        }
        let fdr = match targets {
            0 => f64::INFINITY,
            _ => decoys as f64 / targets as f64,
        };
        for row in &mut rows[start..end] {
            row.fdr = fdr;
        }
        start = end;
    }

    // Q-value is the minimum FDR at any given score threshold
    // `q = fdr[::-1].cummin()[::-1] in python`
    let mut q_min = f64::INFINITY;
    let mut passing = 0;
    for row in rows.iter_mut().rev() {
        q_min = q_min.min(row.fdr);
        row.q_value = q_min;
        if q_min <= 0.01 {
            passing += 1;
        }
    }
    passing
}

/// Assign the FDR-score: a piecewise linear map from score to q-value,
/// interpolated between the points where the q-value steps up.
///
/// Requires q-values from [`calculate_fdr`]. Does nothing for fewer than two
/// rows.
pub fn calculate_fdr_score<Ix>(rows: &mut [FdrRow<Ix>], direction: ScoreDirection) {
    let n = rows.len();
    if n < 2 {
        return;
    }

    let mut steps = Vec::new();
    for k in (0..n - 1).rev() {
        if rows[k].q_value < rows[k + 1].q_value {
            steps.push(k + 1);
        }
    }
    steps.sort_unstable();
    let decoys = rows.iter().filter(|row| row.decoy).count();
    let targets = n - decoys;

    let best = rows[0].score;
    let mut s_last = match direction {
        // extrapolate beyond the best score, so that it doesn't get a zero FDR-score
        ScoreDirection::HigherIsBetter => match steps.first() {
            Some(&step) => best + (best - rows[step].score) / step as f64,
            None => best + (best - rows[n - 1].score) / n as f64,
        },
        ScoreDirection::LowerIsBetter => 0.0,
    };
    let mut q_last = 0.0;

    let mut steps = steps.into_iter();
    let (mut next_step, mut s_next, mut q_next) = match steps.next() {
        Some(step) => (step, rows[step].score, rows[step].q_value),
        None => {
            // an artificial decoy after the last row
            let q = match targets {
                0 => f64::INFINITY,
                _ => (decoys + 1) as f64 / targets as f64,
            };
            (n, rows[n - 1].score, q)
        }
    };

    let slope = |s_last: f64, q_last: f64, s_next: f64, q_next: f64| {
        if s_next == s_last {
            0.0
        } else {
            (q_next - q_last) / (s_next - s_last)
        }
    };
    let mut g = slope(s_last, q_last, s_next, q_next);

    for ix in 0..n {
        if ix == next_step {
            if let Some(step) = steps.next() {
                s_last = s_next;
                q_last = q_next;
                next_step = step;
                s_next = rows[step].score;
                q_next = rows[step].q_value;
            }
            g = slope(s_last, q_last, s_next, q_next);
        }
        let row = &mut rows[ix];
        row.fdr_score = (row.score - s_last) * g + q_last;
    }
}

/// How proteins are recognized as decoys
#[derive(Clone, Debug)]
pub enum DecoyStrategy {
    /// Proteins whose accession matches the pattern are decoys
    Accession(Regex),
    /// Keep the decoy flags supplied at import; unset means target
    Explicit,
}

impl DecoyStrategy {
    pub fn from_pattern(pattern: Option<&str>) -> crate::Result<Self> {
        match pattern {
            Some(pattern) => Ok(DecoyStrategy::Accession(Regex::new(pattern)?)),
            None => Ok(DecoyStrategy::Explicit),
        }
    }
}

/// Flag every protein reachable from `psms` as decoy or target, visiting each
/// protein once. Returns the number of decoy proteins.
pub fn mark_decoys(
    structure: &mut IntermediateStructure,
    psms: &[PsmIx],
    strategy: &DecoyStrategy,
) -> usize {
    let mut done = FnvHashSet::default();
    let mut count = 0;
    for &psm in psms {
        let peptide = structure[psm].peptide;
        for prot in structure[peptide].proteins.clone() {
            if !done.insert(prot) {
                continue;
            }
            let protein = structure.protein_mut(prot);
            let decoy = match strategy {
                DecoyStrategy::Accession(re) => {
                    let decoy = re.is_match(&protein.accession);
                    protein.decoy = Decoy::Explicit(decoy);
                    decoy
                }
                DecoyStrategy::Explicit => protein.is_decoy(),
            };
            if decoy {
                count += 1;
            }
        }
    }
    info!("decoys marked ({}/{})", count, done.len());
    count
}

#[cfg(test)]
mod test {
    use super::*;

    fn rows(pattern: &[(f64, bool)]) -> Vec<FdrRow<usize>> {
        pattern
            .iter()
            .enumerate()
            .map(|(ix, &(score, decoy))| FdrRow::new(ix, score, decoy))
            .collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn fdr_and_q_values() {
        // target, target, decoy, target, decoy
        let mut rows = rows(&[(50.0, false), (40.0, false), (30.0, true), (20.0, false), (10.0, true)]);
        calculate_fdr(&mut rows);
        let fdr = rows.iter().map(|r| r.fdr).collect::<Vec<_>>();
        let q = rows.iter().map(|r| r.q_value).collect::<Vec<_>>();
        let expected_fdr = [0.0, 0.0, 0.5, 1.0 / 3.0, 2.0 / 3.0];
        let expected_q = [0.0, 0.0, 1.0 / 3.0, 1.0 / 3.0, 2.0 / 3.0];
        for i in 0..5 {
            assert!(approx(fdr[i], expected_fdr[i]), "{:?}", fdr);
            assert!(approx(q[i], expected_q[i]), "{:?}", q);
        }
    }

    #[test]
    fn ties_share_a_rank() {
        let mut rows = rows(&[(50.0, false), (40.0, true), (40.0, false), (30.0, false)]);
        calculate_fdr(&mut rows);
        assert_eq!(rows[1].fdr, 0.5);
        assert_eq!(rows[2].fdr, 0.5);
        assert!(approx(rows[3].fdr, 1.0 / 3.0));
        assert!(approx(rows[1].q_value, 1.0 / 3.0));
    }

    #[test]
    fn leading_decoy_is_infinite() {
        let mut rows = rows(&[(50.0, true), (40.0, false), (30.0, false)]);
        let passing = calculate_fdr(&mut rows);
        assert_eq!(rows[0].fdr, f64::INFINITY);
        assert_eq!(rows[1].fdr, 1.0);
        assert_eq!(rows[2].fdr, 0.5);
        assert_eq!(rows[0].q_value, 0.5);
        assert_eq!(passing, 0);
    }

    #[test]
    fn fdr_score_interpolates_between_steps() {
        let mut rows = rows(&[(50.0, false), (40.0, false), (30.0, true), (20.0, false), (10.0, true)]);
        calculate_fdr(&mut rows);
        calculate_fdr_score(&mut rows, ScoreDirection::HigherIsBetter);

        // q steps up at index 2 (0 -> 1/3) and index 4 (1/3 -> 2/3)
        // first segment: from (50 + 20/2 = 60, 0) to (30, 1/3)
        let g1 = (1.0 / 3.0) / (30.0 - 60.0);
        assert!(approx(rows[0].fdr_score, (50.0 - 60.0) * g1));
        assert!(approx(rows[1].fdr_score, (40.0 - 60.0) * g1));
        // second segment: from (30, 1/3) to (10, 2/3)
        let g2 = (1.0 / 3.0) / (10.0 - 30.0);
        assert!(approx(rows[2].fdr_score, 1.0 / 3.0));
        assert!(approx(rows[3].fdr_score, (20.0 - 30.0) * g2 + 1.0 / 3.0));
        assert!(approx(rows[4].fdr_score, 2.0 / 3.0));

        // FDR-score is positive and never decreases as the score gets worse
        assert!(rows[0].fdr_score > 0.0);
        assert!(rows.windows(2).all(|w| w[0].fdr_score <= w[1].fdr_score));
    }

    #[test]
    fn fdr_score_without_steps() {
        let mut rows = rows(&[(0.001, false), (0.01, false), (0.1, false)]);
        calculate_fdr(&mut rows);
        calculate_fdr_score(&mut rows, ScoreDirection::LowerIsBetter);
        // artificial decoy: q = 1/3 at the last score, starting from (0, 0)
        let g = (1.0 / 3.0) / 0.1;
        for row in &rows {
            assert!(approx(row.fdr_score, row.score * g));
        }
    }

    #[test]
    fn fdr_score_needs_two_rows() {
        let mut rows = rows(&[(10.0, false)]);
        calculate_fdr(&mut rows);
        calculate_fdr_score(&mut rows, ScoreDirection::HigherIsBetter);
        assert!(rows[0].fdr_score.is_nan());
    }

    #[test]
    fn sorting_follows_direction() {
        let mut r = rows(&[(1.0, false), (3.0, false), (2.0, true)]);
        sort_rows(&mut r, ScoreDirection::HigherIsBetter);
        assert_eq!(r.iter().map(|r| r.ix).collect::<Vec<_>>(), vec![1, 2, 0]);
        sort_rows(&mut r, ScoreDirection::LowerIsBetter);
        assert_eq!(r.iter().map(|r| r.ix).collect::<Vec<_>>(), vec![0, 2, 1]);
    }
}
