//! Peptide and protein scoring used during inference

use crate::evidence::Psm;
use crate::inference::ReportedPeptide;
use crate::score::{ScoreDirection, ScoreDirections};
use crate::Result;
use serde::{Deserialize, Serialize};

/// How a peptide (or PSM) contributes to the score of its group
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringRole {
    FullScoring,
    SharedScoring,
    #[default]
    NotScoring,
}

/// Scores a peptide by its best PSM
#[derive(Clone, Debug, PartialEq)]
pub struct PeptideScoring {
    accession: String,
    direction: ScoreDirection,
}

impl PeptideScoring {
    pub fn new(accession: &str, directions: &ScoreDirections) -> Result<Self> {
        Ok(PeptideScoring {
            accession: accession.to_string(),
            direction: directions.resolve(accession)?,
        })
    }

    pub fn accession(&self) -> &str {
        &self.accession
    }

    pub fn direction(&self) -> ScoreDirection {
        self.direction
    }

    /// Set the peptide's score to the best score of its PSMs. All PSMs with
    /// exactly the best score are marked full scoring, every other PSM shared
    /// scoring. The score is NaN if no PSM carries the score.
    pub fn calculate_peptide_score(&self, peptide: &mut ReportedPeptide, psms: &[Psm]) -> f64 {
        peptide.psm_roles = vec![ScoringRole::SharedScoring; peptide.psms.len()];

        let scores = peptide
            .psms
            .iter()
            .map(|ix| psms[ix.0 as usize].score(&self.accession))
            .collect::<Vec<_>>();

        let best = scores
            .iter()
            .flatten()
            .copied()
            .filter(|s| !s.is_nan())
            .min_by(|a, b| self.direction.compare(*a, *b));

        peptide.score = match best {
            Some(best) => {
                scores
                    .iter()
                    .zip(peptide.psm_roles.iter_mut())
                    .filter(|(score, _)| **score == Some(best))
                    .for_each(|(_, role)| *role = ScoringRole::FullScoring);
                best
            }
            None => f64::NAN,
        };
        peptide.score
    }
}

/// Combines the scores of a group's full scoring peptides
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProteinScoring {
    #[default]
    Additive,
    Multiplicative,
    GeometricMean,
}

impl ProteinScoring {
    /// Additive for scores where higher is better, multiplicative for
    /// probability-like scores where lower is better
    pub fn for_direction(direction: ScoreDirection) -> Self {
        match direction {
            ScoreDirection::HigherIsBetter => ProteinScoring::Additive,
            ScoreDirection::LowerIsBetter => ProteinScoring::Multiplicative,
        }
    }

    /// NaN if no peptide is full scoring
    pub fn calculate_protein_score(&self, peptides: &[ReportedPeptide]) -> f64 {
        let scores = peptides
            .iter()
            .filter(|p| p.role == ScoringRole::FullScoring && !p.score.is_nan())
            .map(|p| p.score)
            .collect::<Vec<_>>();
        if scores.is_empty() {
            return f64::NAN;
        }
        match self {
            ProteinScoring::Additive => scores.iter().sum(),
            ProteinScoring::Multiplicative => scores.iter().product(),
            ProteinScoring::GeometricMean => {
                scores.iter().product::<f64>().powf(1.0 / scores.len() as f64)
            }
        }
    }
}
