//! Run configuration, deserialized from JSON

use crate::builder::PeptideIdentity;
use crate::fdr::DecoyStrategy;
use crate::filter::{Criterion, FilterChain, FilterOptions};
use crate::inference::{Inference, InferenceStrategy, SharedPeptides};
use crate::score::{ScoreDirection, ScoreDirections, PSM_FDR_SCORE};
use crate::scoring::{PeptideScoring, ProteinScoring};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Deserialize, Default, Debug, Clone)]
/// Options of one run of the modeller; every field is optional
pub struct Builder {
    /// Number of worker threads used to build the structure and infer proteins
    pub threads: Option<usize>,
    /// Whether modifications distinguish peptides at import
    pub peptide_identity: Option<PeptideIdentity>,
    /// Whether modifications distinguish peptides during inference
    pub consider_modifications: Option<bool>,
    pub inference: Option<InferenceStrategy>,
    /// Score accession peptides are scored by
    pub peptide_score: Option<String>,
    /// How peptide scores combine into protein scores. Defaults to additive
    /// for higher-is-better and multiplicative for lower-is-better scores
    pub protein_scoring: Option<ProteinScoring>,
    pub shared_peptides: Option<SharedPeptides>,
    /// Score accession the PSM FDR is calculated on
    pub fdr_score: Option<String>,
    /// Regular expression matching the accessions of decoy proteins
    pub decoy_pattern: Option<String>,
    pub score_directions: Option<HashMap<String, ScoreDirection>>,
    pub import_filters: Option<Vec<FilterOptions>>,
    pub inference_filters: Option<Vec<FilterOptions>>,
}

impl Builder {
    pub fn load<S: AsRef<std::path::Path>>(path: S) -> Result<Self> {
        crate::read_json(path)
    }

    pub fn make_parameters(self) -> Result<Parameters> {
        let score_directions = ScoreDirections::new(self.score_directions.unwrap_or_default());

        let peptide_score = self.peptide_score.unwrap_or_else(|| PSM_FDR_SCORE.into());
        let peptide_direction = score_directions.resolve(&peptide_score)?;
        if let Some(fdr_score) = &self.fdr_score {
            score_directions.resolve(fdr_score)?;
        }
        if let Some(pattern) = &self.decoy_pattern {
            regex::Regex::new(pattern)?;
        }

        let import_filters = self.import_filters.unwrap_or_default();
        let inference_filters = self.inference_filters.unwrap_or_default();
        // compile once to reject invalid filters up front
        FilterChain::from_options(import_filters.clone())?;
        FilterChain::from_options(inference_filters.clone())?;

        Ok(Parameters {
            threads: self.threads.unwrap_or_else(num_cpus::get).max(1),
            peptide_identity: self.peptide_identity.unwrap_or_default(),
            consider_modifications: self.consider_modifications.unwrap_or(false),
            inference: self.inference.unwrap_or_default(),
            protein_scoring: self
                .protein_scoring
                .unwrap_or_else(|| ProteinScoring::for_direction(peptide_direction)),
            peptide_score,
            shared_peptides: self.shared_peptides.unwrap_or_default(),
            fdr_score: self.fdr_score,
            decoy_pattern: self.decoy_pattern,
            score_directions,
            import_filters,
            inference_filters,
        })
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct Parameters {
    pub threads: usize,
    pub peptide_identity: PeptideIdentity,
    pub consider_modifications: bool,
    pub inference: InferenceStrategy,
    pub peptide_score: String,
    pub protein_scoring: ProteinScoring,
    pub shared_peptides: SharedPeptides,
    pub fdr_score: Option<String>,
    pub decoy_pattern: Option<String>,
    pub score_directions: ScoreDirections,
    pub import_filters: Vec<FilterOptions>,
    pub inference_filters: Vec<FilterOptions>,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            threads: num_cpus::get().max(1),
            peptide_identity: PeptideIdentity::default(),
            consider_modifications: false,
            inference: InferenceStrategy::default(),
            peptide_score: PSM_FDR_SCORE.into(),
            protein_scoring: ProteinScoring::for_direction(ScoreDirection::LowerIsBetter),
            shared_peptides: SharedPeptides::default(),
            fdr_score: None,
            decoy_pattern: None,
            score_directions: ScoreDirections::default(),
            import_filters: Vec::new(),
            inference_filters: Vec::new(),
        }
    }
}

impl Parameters {
    pub fn import_filters(&self) -> Result<FilterChain> {
        FilterChain::from_options(self.import_filters.clone())
    }

    /// Scores PSMs keep at import. Everything is kept unless an FDR score is
    /// configured; then only the FDR score, the peptide score and the scores
    /// named by PSM score filters survive.
    pub fn retained_scores(&self) -> Option<Vec<String>> {
        let fdr_score = self.fdr_score.as_ref()?;
        let mut scores = vec![fdr_score.clone(), self.peptide_score.clone()];
        let filtered = self
            .import_filters
            .iter()
            .chain(&self.inference_filters)
            .filter_map(|options| match &options.criterion {
                Criterion::PsmScore { accession } => Some(accession.clone()),
                _ => None,
            });
        scores.extend(filtered);
        scores.sort();
        scores.dedup();
        Some(scores)
    }

    pub fn decoy_strategy(&self) -> Result<DecoyStrategy> {
        DecoyStrategy::from_pattern(self.decoy_pattern.as_deref())
    }

    pub fn inference(&self) -> Result<Inference> {
        Ok(Inference {
            strategy: self.inference,
            peptide_scoring: PeptideScoring::new(&self.peptide_score, &self.score_directions)?,
            protein_scoring: self.protein_scoring,
            shared_peptides: self.shared_peptides,
            filters: FilterChain::from_options(self.inference_filters.clone())?,
            consider_modifications: self.consider_modifications,
            threads: self.threads,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    #[test]
    fn defaults() {
        let parameters = Builder::default().make_parameters().unwrap();
        assert!(parameters.threads >= 1);
        assert_eq!(parameters.peptide_score, PSM_FDR_SCORE);
        assert_eq!(parameters.inference, InferenceStrategy::OccamsRazor);
        // the FDR-score is lower-is-better
        assert_eq!(parameters.protein_scoring, ProteinScoring::Multiplicative);
        assert_eq!(parameters.peptide_identity, PeptideIdentity::Sequence);
        assert!(parameters.fdr_score.is_none());
        assert!(parameters.import_filters().unwrap().is_empty());
    }

    #[test]
    fn deserialize() {
        let json = r#"{
            "threads": 0,
            "inference": "report_all",
            "peptide_score": "hyperscore",
            "score_directions": { "hyperscore": "higher_is_better" },
            "shared_peptides": "none",
            "decoy_pattern": "^rev_",
            "inference_filters": [
                { "criterion": "protein_number_of_peptides", "comparator": "greater_equal", "value": 2 }
            ]
        }"#;
        let builder: Builder = serde_json::from_str(json).unwrap();
        let parameters = builder.make_parameters().unwrap();
        assert_eq!(parameters.threads, 1);
        assert_eq!(parameters.protein_scoring, ProteinScoring::Additive);

        let inference = parameters.inference().unwrap();
        assert_eq!(inference.strategy, InferenceStrategy::ReportAll);
        assert_eq!(inference.shared_peptides, SharedPeptides::None);
        assert_eq!(inference.filters.len(), 1);
        assert_eq!(
            inference.peptide_scoring.direction(),
            ScoreDirection::HigherIsBetter
        );
        assert!(matches!(
            parameters.decoy_strategy().unwrap(),
            DecoyStrategy::Accession(_)
        ));
    }

    #[test]
    fn reject_invalid() {
        let builder = Builder {
            peptide_score: Some("not-a-score".into()),
            ..Default::default()
        };
        assert!(matches!(
            builder.make_parameters(),
            Err(Error::UnknownScore(s)) if s == "not-a-score"
        ));

        let builder = Builder {
            decoy_pattern: Some("(".into()),
            ..Default::default()
        };
        assert!(matches!(builder.make_parameters(), Err(Error::Regex(_))));

        let json = r#"{ "import_filters": [
            { "criterion": "psm_accessions", "comparator": "regex", "value": "[" }
        ] }"#;
        let builder: Builder = serde_json::from_str(json).unwrap();
        assert!(builder.make_parameters().is_err());
    }

    #[test]
    fn retained_scores_cover_every_use() {
        let parameters = Builder::default().make_parameters().unwrap();
        assert_eq!(parameters.retained_scores(), None);

        let json = r#"{
            "fdr_score": "MS:1001171",
            "peptide_score": "MS:1001330",
            "import_filters": [
                { "criterion": "psm_score", "accession": "MS:1002252", "comparator": "greater", "value": 1 }
            ],
            "inference_filters": [
                { "criterion": "psm_score", "accession": "MS:1001171", "comparator": "greater", "value": 5 },
                { "criterion": "psm_charge", "comparator": "equal", "value": 2 }
            ]
        }"#;
        let parameters = serde_json::from_str::<Builder>(json)
            .unwrap()
            .make_parameters()
            .unwrap();
        assert_eq!(
            parameters.retained_scores().unwrap(),
            vec!["MS:1001171", "MS:1001330", "MS:1002252"]
        );
    }
}
