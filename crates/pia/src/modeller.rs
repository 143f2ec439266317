//! Orchestration of a complete run: import, structure build, PSM FDR and
//! protein inference

use crate::builder::StructureBuilder;
use crate::config::Parameters;
use crate::evidence::{FileId, PsmIx};
use crate::fdr::{self, DecoyStrategy, FdrRow};
use crate::filter::FilterChain;
use crate::import::EvidenceSource;
use crate::inference::{Inference, InferenceProteinGroup, InferenceStrategy};
use crate::pool::Progress;
use crate::score::{ScoreDirection, ScoreDirections};
use crate::structure::IntermediateStructure;
use crate::{Error, Result};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Outcome of the FDR estimation on one set of items
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FdrSummary {
    pub score: String,
    /// Items with the score, which were ranked
    pub ranked: usize,
    /// Items without the score
    pub unscored: usize,
    pub decoys: usize,
    /// Ranked items with a q-value of at most 1%
    pub passing: usize,
}

/// PSMs of the structure, by file, and their FDR estimation
#[derive(Debug)]
pub struct PsmModeller {
    file_psms: BTreeMap<FileId, Vec<PsmIx>>,
    fdr_scores: BTreeMap<FileId, String>,
    directions: ScoreDirections,
    decoy_strategy: DecoyStrategy,
    fdr: BTreeMap<FileId, FdrSummary>,
}

impl PsmModeller {
    pub fn new(
        structure: &IntermediateStructure,
        directions: ScoreDirections,
        decoy_strategy: DecoyStrategy,
        fdr_score: Option<&str>,
    ) -> Self {
        let mut file_psms: BTreeMap<FileId, Vec<PsmIx>> = BTreeMap::new();
        for (ix, psm) in structure.all_psms().iter().enumerate() {
            file_psms.entry(psm.file).or_default().push(PsmIx(ix as u32));
        }

        let fdr_scores = file_psms
            .iter()
            .filter_map(|(&file, psms)| {
                let score = match fdr_score {
                    Some(score) => Some(score.to_string()),
                    None => select_fdr_score(structure, psms, &directions),
                };
                if score.is_none() {
                    warn!("no scores for the PSMs of file {:?}", file);
                }
                score.map(|score| (file, score))
            })
            .collect();

        PsmModeller {
            file_psms,
            fdr_scores,
            directions,
            decoy_strategy,
            fdr: BTreeMap::new(),
        }
    }

    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.file_psms.keys().copied()
    }

    pub fn psms(&self, file: FileId) -> Result<&[PsmIx]> {
        self.file_psms
            .get(&file)
            .map(Vec::as_slice)
            .ok_or(Error::UnknownFile(file))
    }

    /// Score accession the FDR of `file` is estimated on
    pub fn fdr_score(&self, file: FileId) -> Option<&str> {
        self.fdr_scores.get(&file).map(String::as_str)
    }

    pub fn set_fdr_score<S: Into<String>>(&mut self, file: FileId, score: S) -> Result<()> {
        let score = score.into();
        self.directions.resolve(&score)?;
        self.psms(file)?;
        self.fdr_scores.insert(file, score);
        Ok(())
    }

    /// Summary of the last FDR estimation on `file`
    pub fn fdr_summary(&self, file: FileId) -> Option<&FdrSummary> {
        self.fdr.get(&file)
    }

    /// Estimate FDR, q-value and FDR-score for the PSMs of `file`, and store
    /// them on the PSMs. PSMs without the FDR score are not ranked and keep
    /// no FDR values.
    pub fn calculate_fdr(
        &mut self,
        structure: &mut IntermediateStructure,
        file: FileId,
    ) -> Result<&FdrSummary> {
        let start = Instant::now();
        let psms = self.psms(file)?.to_vec();
        fdr::mark_decoys(structure, &psms, &self.decoy_strategy);

        let score = self.fdr_scores.get(&file).cloned().unwrap_or_default();
        let direction = match score.is_empty() {
            true => ScoreDirection::HigherIsBetter,
            false => self.directions.resolve(&score)?,
        };

        let mut rows = Vec::with_capacity(psms.len());
        for &ix in &psms {
            let psm = structure.psm_mut(ix);
            // ranking on a computed value reads the previous estimation
            let value = psm.score(&score).filter(|s| !s.is_nan());
            psm.fdr = None;
            psm.q_value = None;
            psm.fdr_score = None;
            if let Some(value) = value {
                // unresolvable decoy status counts as target
                let decoy = structure.psm_is_decoy(ix).unwrap_or(false);
                rows.push(FdrRow::new(ix, value, decoy));
            }
        }
        let unscored = psms.len() - rows.len();
        if unscored > 0 {
            warn!(
                "{} PSMs of file {:?} without score `{}` are not ranked",
                unscored, file, score
            );
        }

        fdr::sort_rows(&mut rows, direction);
        let passing = fdr::calculate_fdr(&mut rows);
        fdr::calculate_fdr_score(&mut rows, direction);

        let mut decoys = 0;
        for row in &rows {
            decoys += row.decoy as usize;
            let psm = structure.psm_mut(row.ix);
            psm.fdr = Some(row.fdr);
            psm.q_value = Some(row.q_value);
            psm.fdr_score = (!row.fdr_score.is_nan()).then_some(row.fdr_score);
        }

        info!(
            "FDR of file {:?} on `{}`: {}/{} PSMs at 1% FDR ({} decoys) in {}ms",
            file,
            score,
            passing,
            rows.len(),
            decoys,
            start.elapsed().as_millis()
        );
        self.fdr.insert(
            file,
            FdrSummary {
                score,
                ranked: rows.len(),
                unscored,
                decoys,
                passing,
            },
        );
        self.fdr.get(&file).ok_or(Error::UnknownFile(file))
    }

    pub fn calculate_all_fdr(&mut self, structure: &mut IntermediateStructure) -> Result<()> {
        for file in self.files().collect::<Vec<_>>() {
            self.calculate_fdr(structure, file)?;
        }
        Ok(())
    }
}

/// The main score of a known search engine, else the first score with a
/// known direction, else the first score, all in lexical order
fn select_fdr_score(
    structure: &IntermediateStructure,
    psms: &[PsmIx],
    directions: &ScoreDirections,
) -> Option<String> {
    let accessions = psms
        .iter()
        .flat_map(|&ix| structure[ix].scores.keys())
        .collect::<BTreeSet<_>>();
    accessions
        .iter()
        .find(|acc| directions.is_main_score(acc))
        .or_else(|| accessions.iter().find(|acc| directions.resolve(acc).is_ok()))
        .or_else(|| accessions.iter().next())
        .map(|acc| acc.to_string())
}

/// Inferred protein groups and the settings they were inferred with
#[derive(Debug)]
pub struct ProteinModeller {
    strategy: InferenceStrategy,
    direction: ScoreDirection,
    groups: Vec<InferenceProteinGroup>,
    fdr: Option<FdrSummary>,
}

impl ProteinModeller {
    pub fn new(inference: &Inference, groups: Vec<InferenceProteinGroup>) -> Self {
        ProteinModeller {
            strategy: inference.strategy,
            direction: inference.peptide_scoring.direction(),
            groups,
            fdr: None,
        }
    }

    pub fn strategy(&self) -> InferenceStrategy {
        self.strategy
    }

    pub fn groups(&self) -> &[InferenceProteinGroup] {
        &self.groups
    }

    pub fn fdr_summary(&self) -> Option<&FdrSummary> {
        self.fdr.as_ref()
    }

    /// Estimate FDR and q-value of the reported protein groups, ranked by
    /// their score. A group is a decoy iff all of its proteins are.
    pub fn calculate_protein_fdr(&mut self, structure: &IntermediateStructure) -> &FdrSummary {
        let mut rows = Vec::with_capacity(self.groups.len());
        for (ix, group) in self.groups.iter_mut().enumerate() {
            group.decoy = group.proteins.iter().all(|&prot| structure[prot].is_decoy());
            group.fdr = None;
            group.q_value = None;
            if !group.score.is_nan() {
                rows.push(FdrRow::new(ix, group.score, group.decoy));
            }
        }
        let unscored = self.groups.len() - rows.len();

        fdr::sort_rows(&mut rows, self.direction);
        let passing = fdr::calculate_fdr(&mut rows);
        for row in &rows {
            let group = &mut self.groups[row.ix];
            group.fdr = Some(row.fdr);
            group.q_value = Some(row.q_value);
        }

        let decoys = rows.iter().filter(|row| row.decoy).count();
        info!(
            "protein FDR: {}/{} groups at 1% FDR ({} decoys)",
            passing,
            rows.len(),
            decoys
        );
        self.fdr.insert(FdrSummary {
            score: crate::score::PROTEIN_SCORE.into(),
            ranked: rows.len(),
            unscored,
            decoys,
            passing,
        })
    }
}

/// Drives one run. Evidence is imported file by file, then the structure is
/// built exactly once, after which PSM FDR and protein inference can be
/// computed (and recomputed) on it.
pub struct PiaModeller {
    parameters: Parameters,
    import_filters: FilterChain,
    builder: Option<StructureBuilder>,
    files: Vec<String>,
    structure: Option<IntermediateStructure>,
    psm_modeller: Option<PsmModeller>,
    protein_modeller: Option<ProteinModeller>,
    progress: Progress,
}

/// Log a fatal error before handing it to the caller
fn fatal<T>(result: Result<T>) -> Result<T> {
    result.map_err(|err| {
        error!("{}", err);
        err
    })
}

impl PiaModeller {
    pub fn new(parameters: Parameters) -> Result<Self> {
        let import_filters = fatal(parameters.import_filters())?;
        Ok(PiaModeller {
            builder: Some(StructureBuilder::new(parameters.peptide_identity)),
            parameters,
            import_filters,
            files: Vec::new(),
            structure: None,
            psm_modeller: None,
            protein_modeller: None,
            progress: Progress::default(),
        })
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Names of the imported files, indexed by [`FileId`]
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Progress of the last inference
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Import all evidence of `source` as a new file
    pub fn add_file(&mut self, source: &mut dyn EvidenceSource) -> Result<FileId> {
        let builder = fatal(self.builder.as_mut().ok_or(Error::AlreadyBuilt))?;
        let file = FileId(self.files.len() as u32);
        let retained = self.parameters.retained_scores();
        let admitted = fatal(source.import(
            file,
            builder,
            &self.import_filters,
            retained.as_deref(),
        ))?;
        info!("file {:?} `{}`: {} PSMs admitted", file, source.name(), admitted);
        self.files.push(source.name().to_string());
        Ok(file)
    }

    pub fn build(&mut self) -> Result<&IntermediateStructure> {
        let builder = fatal(self.builder.take().ok_or(Error::AlreadyBuilt))?;
        let structure = fatal(builder.build(self.parameters.threads))?;
        let decoy_strategy = fatal(self.parameters.decoy_strategy())?;
        self.psm_modeller = Some(PsmModeller::new(
            &structure,
            self.parameters.score_directions.clone(),
            decoy_strategy,
            self.parameters.fdr_score.as_deref(),
        ));
        Ok(self.structure.insert(structure))
    }

    pub fn structure(&self) -> Result<&IntermediateStructure> {
        self.structure.as_ref().ok_or(Error::NotBuilt)
    }

    pub fn psm_modeller(&self) -> Result<&PsmModeller> {
        self.psm_modeller.as_ref().ok_or(Error::NotBuilt)
    }

    pub fn psm_modeller_mut(&mut self) -> Result<&mut PsmModeller> {
        self.psm_modeller.as_mut().ok_or(Error::NotBuilt)
    }

    pub fn calculate_fdr(&mut self, file: FileId) -> Result<&FdrSummary> {
        let (Some(structure), Some(psms)) = (self.structure.as_mut(), self.psm_modeller.as_mut())
        else {
            return fatal(Err(Error::NotBuilt));
        };
        fatal(psms.calculate_fdr(structure, file))
    }

    pub fn calculate_all_fdr(&mut self) -> Result<()> {
        let (Some(structure), Some(psms)) = (self.structure.as_mut(), self.psm_modeller.as_mut())
        else {
            return fatal(Err(Error::NotBuilt));
        };
        fatal(psms.calculate_all_fdr(structure))
    }

    /// Infer protein groups with the configured settings
    pub fn infer(&mut self) -> Result<&[InferenceProteinGroup]> {
        let inference = fatal(self.parameters.inference())?;
        self.infer_with(&inference)
    }

    pub fn infer_with(&mut self, inference: &Inference) -> Result<&[InferenceProteinGroup]> {
        let structure = fatal(self.structure.as_ref().ok_or(Error::NotBuilt))?;
        self.progress = Progress::default();
        let groups = fatal(inference.run(structure, &self.progress))?;
        let modeller = self
            .protein_modeller
            .insert(ProteinModeller::new(inference, groups));
        Ok(modeller.groups())
    }

    pub fn protein_modeller(&self) -> Result<&ProteinModeller> {
        self.protein_modeller.as_ref().ok_or(Error::NotBuilt)
    }

    pub fn calculate_protein_fdr(&mut self) -> Result<&FdrSummary> {
        let (Some(structure), Some(proteins)) =
            (self.structure.as_ref(), self.protein_modeller.as_mut())
        else {
            return fatal(Err(Error::NotBuilt));
        };
        Ok(proteins.calculate_protein_fdr(structure))
    }
}
