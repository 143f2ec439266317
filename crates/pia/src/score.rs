//! Score accessions, and the direction in which a score value improves
//!
//! Search engine scores are opaque numbers identified by a string accession
//! (usually a PSI-MS CV accession). The only thing the inference needs to know
//! about them is whether a higher or a lower value is better, and whether the
//! score is the "main" score of its search engine.

use crate::{Error, Result};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// PSM-level local FDR, computed by [`crate::fdr::calculate_fdr`]
pub const PSM_LOCAL_FDR: &str = "MS:1002351";
/// PSM-level q-value, computed by [`crate::fdr::calculate_fdr`]
pub const PSM_Q_VALUE: &str = "MS:1002354";
/// PSM-level FDR-score, computed by [`crate::fdr::calculate_fdr_score`]
pub const PSM_FDR_SCORE: &str = "MS:1002355";
/// Aggregate protein score, computed by [`crate::scoring::ProteinScoring`]
pub const PROTEIN_SCORE: &str = "MS:1002394";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreDirection {
    HigherIsBetter,
    LowerIsBetter,
}

impl ScoreDirection {
    /// Order two score values so that the better one comes first
    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        match self {
            ScoreDirection::HigherIsBetter => b.total_cmp(&a),
            ScoreDirection::LowerIsBetter => a.total_cmp(&b),
        }
    }

    pub fn is_better(&self, a: f64, b: f64) -> bool {
        self.compare(a, b) == Ordering::Less
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KnownScore {
    pub accession: &'static str,
    pub name: &'static str,
    pub direction: ScoreDirection,
    /// Is this the score a search engine ranks its own results by?
    pub main_score: bool,
}

const fn known(
    accession: &'static str,
    name: &'static str,
    direction: ScoreDirection,
    main_score: bool,
) -> KnownScore {
    KnownScore {
        accession,
        name,
        direction,
        main_score,
    }
}

use ScoreDirection::{HigherIsBetter, LowerIsBetter};

pub const KNOWN_SCORES: &[KnownScore] = &[
    known("MS:1001328", "OMSSA:evalue", LowerIsBetter, false),
    known("MS:1001329", "OMSSA:pvalue", LowerIsBetter, true),
    known("MS:1001171", "Mascot:score", HigherIsBetter, true),
    known("MS:1001172", "Mascot:expectation value", LowerIsBetter, false),
    known("MS:1001331", "X!Tandem:hyperscore", HigherIsBetter, false),
    known("MS:1001330", "X!Tandem:expect", LowerIsBetter, true),
    known("MS:1001155", "Sequest:xcorr", HigherIsBetter, true),
    known("MS:1001156", "Sequest:deltacn", HigherIsBetter, false),
    known("MS:1001589", "MyriMatch:MVH", HigherIsBetter, true),
    known("MS:1002049", "MS-GF:RawScore", HigherIsBetter, false),
    known("MS:1002052", "MS-GF:SpecEValue", LowerIsBetter, false),
    known("MS:1002053", "MS-GF:EValue", LowerIsBetter, true),
    known("MS:1001390", "Phenyx:Score", HigherIsBetter, true),
    known(PSM_LOCAL_FDR, "PSM-level local FDR", LowerIsBetter, false),
    known(PSM_Q_VALUE, "PSM-level q-value", LowerIsBetter, false),
    known(PSM_FDR_SCORE, "PSM-level FDRScore", LowerIsBetter, false),
    known(PROTEIN_SCORE, "PIA:protein score", HigherIsBetter, true),
];

pub fn known_score(accession: &str) -> Option<&'static KnownScore> {
    KNOWN_SCORES.iter().find(|s| s.accession == accession)
}

/// Resolves score accessions to their direction: user supplied directions
/// take precedence over the built-in table
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScoreDirections {
    overrides: FnvHashMap<String, ScoreDirection>,
}

impl ScoreDirections {
    pub fn new<I: IntoIterator<Item = (String, ScoreDirection)>>(overrides: I) -> Self {
        Self {
            overrides: overrides.into_iter().collect(),
        }
    }

    pub fn insert<S: Into<String>>(&mut self, accession: S, direction: ScoreDirection) {
        self.overrides.insert(accession.into(), direction);
    }

    pub fn resolve(&self, accession: &str) -> Result<ScoreDirection> {
        self.overrides
            .get(accession)
            .copied()
            .or_else(|| known_score(accession).map(|s| s.direction))
            .ok_or_else(|| Error::UnknownScore(accession.to_string()))
    }

    pub fn is_main_score(&self, accession: &str) -> bool {
        known_score(accession).map(|s| s.main_score).unwrap_or(false)
    }
}
