//! Protein inference over the intermediate structure
//!
//! Each cluster is inferred independently by one worker of a
//! [`WorkerPool`]. Both strategies share the collection of post-filter
//! peptides ([`ClusterPeptides`]) and the construction of scored
//! [`InferenceProteinGroup`]s.

mod occam;
mod report_all;

use crate::evidence::{PeptideIx, ProteinIx, PsmIx};
use crate::filter::{FilterChain, FilterItem, PeptideView, ProteinGroupView, PsmView};
use crate::pool::{Progress, WorkerPool};
use crate::scoring::{PeptideScoring, ProteinScoring, ScoringRole};
use crate::structure::{ClusterId, GroupId, IntermediateStructure};
use crate::Result;
use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceStrategy {
    /// Report an (almost) minimal set of protein groups explaining all peptides
    #[default]
    OccamsRazor,
    /// Report every protein group with distinguishable evidence
    ReportAll,
}

/// Whether peptides shared with proteins outside a group count towards its score
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedPeptides {
    #[default]
    All,
    None,
}

/// A peptide as reported for a protein group. Without considering
/// modifications, all peptides of one sequence are reported together.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportedPeptide {
    /// Sequence, plus the modifications if they are considered
    pub key: String,
    pub peptides: Vec<PeptideIx>,
    /// Post-filter PSMs
    pub psms: Vec<PsmIx>,
    /// Parallel to `psms`
    pub psm_roles: Vec<ScoringRole>,
    /// Role of this peptide in the score of the group reporting it
    pub role: ScoringRole,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InferenceProteinGroup {
    /// Sorted accessions, joined by `/`
    pub id: String,
    pub cluster: ClusterId,
    pub proteins: Vec<ProteinIx>,
    pub accessions: Vec<Arc<str>>,
    pub peptides: Vec<ReportedPeptide>,
    /// Groups whose evidence is explained by this one
    pub subgroups: Vec<InferenceProteinGroup>,
    pub score: f64,

    pub decoy: bool,
    pub fdr: Option<f64>,
    pub q_value: Option<f64>,
}

impl InferenceProteinGroup {
    pub fn nr_psms(&self) -> usize {
        self.peptides.iter().map(|p| p.psms.len()).sum()
    }

    fn filter_item(&self) -> FilterItem<'_> {
        FilterItem::ProteinGroup(ProteinGroupView {
            accessions: self.accessions.iter().map(|a| a.as_ref()).collect(),
            peptides: self.peptides.len(),
            psms: self.nr_psms(),
            score: self.score,
        })
    }
}

/// Settings of one inference run
#[derive(Clone, Debug)]
pub struct Inference {
    pub strategy: InferenceStrategy,
    pub peptide_scoring: PeptideScoring,
    pub protein_scoring: ProteinScoring,
    pub shared_peptides: SharedPeptides,
    pub filters: FilterChain,
    pub consider_modifications: bool,
    pub threads: usize,
}

impl Inference {
    /// Infer protein groups for every cluster. The result is ordered by
    /// cluster, then by group id.
    pub fn run(
        &self,
        structure: &IntermediateStructure,
        progress: &Progress,
    ) -> Result<Vec<InferenceProteinGroup>> {
        let start = Instant::now();
        info!(
            "inferring proteins with {:?} on {} clusters, scoring by {} ({:?})",
            self.strategy,
            structure.nr_clusters(),
            self.peptide_scoring.accession(),
            self.protein_scoring
        );
        progress.set(10);

        let clusters = structure.cluster_ids().collect::<Vec<_>>();
        let batches = WorkerPool::new(self.threads).run(clusters, Some(progress), |cluster| {
            let groups = match self.strategy {
                InferenceStrategy::OccamsRazor => occam::infer_cluster(structure, cluster, self),
                InferenceStrategy::ReportAll => report_all::infer_cluster(structure, cluster, self),
            };
            Ok((cluster, groups))
        })?;

        let groups = batches
            .into_iter()
            .sorted_by_key(|(cluster, _)| *cluster)
            .flat_map(|(_, groups)| groups)
            .collect::<Vec<_>>();

        progress.set(100);
        info!(
            "inferred {} protein groups in {}ms",
            groups.len(),
            start.elapsed().as_millis()
        );
        Ok(groups)
    }

    /// Build a scored protein group from the given proteins and indices into
    /// `peptides.peptides`
    fn protein_group(
        &self,
        structure: &IntermediateStructure,
        cluster: ClusterId,
        mut proteins: Vec<ProteinIx>,
        peptides: &ClusterPeptides,
        reported: &[usize],
    ) -> InferenceProteinGroup {
        proteins.sort_unstable_by(|a, b| structure[*a].accession.cmp(&structure[*b].accession));
        let accessions = proteins
            .iter()
            .map(|&prot| structure[prot].accession.clone())
            .collect::<Vec<_>>();
        let members = proteins.iter().copied().collect::<FnvHashSet<_>>();

        let peptides = reported
            .iter()
            .map(|&ix| {
                let mut peptide = peptides.peptides[ix].clone();
                let shared = peptide.peptides.iter().any(|&pep| {
                    structure[pep]
                        .proteins
                        .iter()
                        .any(|prot| !members.contains(prot))
                });
                peptide.role = if peptide.score.is_nan() {
                    ScoringRole::NotScoring
                } else if shared && self.shared_peptides == SharedPeptides::None {
                    ScoringRole::SharedScoring
                } else {
                    ScoringRole::FullScoring
                };
                peptide
            })
            .collect::<Vec<_>>();

        let score = self.protein_scoring.calculate_protein_score(&peptides);
        InferenceProteinGroup {
            id: accessions.iter().join("/"),
            cluster,
            proteins,
            accessions,
            peptides,
            subgroups: Vec::new(),
            score,
            decoy: false,
            fdr: None,
            q_value: None,
        }
    }

    fn passes_filters(&self, group: &InferenceProteinGroup) -> bool {
        self.filters.satisfies(&group.filter_item())
    }
}

/// The post-filter peptides of one cluster, scored
pub(crate) struct ClusterPeptides {
    /// Sorted by key
    pub(crate) peptides: Vec<ReportedPeptide>,
    by_peptide: FnvHashMap<PeptideIx, Vec<usize>>,
}

impl ClusterPeptides {
    pub(crate) fn new(
        structure: &IntermediateStructure,
        cluster: ClusterId,
        inference: &Inference,
    ) -> Self {
        let mut collected: BTreeMap<String, (Vec<PeptideIx>, Vec<PsmIx>)> = BTreeMap::new();
        for &group in structure.cluster(cluster) {
            for &pep in &structure[group].peptides {
                let peptide = &structure[pep];
                for &psm_ix in &peptide.psms {
                    let psm = &structure[psm_ix];
                    let admitted = inference.filters.satisfies(&FilterItem::Psm(PsmView {
                        psm,
                        accessions: structure.psm_accessions(psm_ix).collect(),
                        decoy: structure.psm_is_decoy(psm_ix),
                    }));
                    if !admitted {
                        continue;
                    }
                    let key = match inference.consider_modifications {
                        true => format!("{}|{}", peptide.sequence, psm.modification_key()),
                        false => peptide.sequence.clone(),
                    };
                    let entry = collected.entry(key).or_default();
                    if !entry.0.contains(&pep) {
                        entry.0.push(pep);
                    }
                    entry.1.push(psm_ix);
                }
            }
        }

        let mut peptides = Vec::with_capacity(collected.len());
        let mut by_peptide: FnvHashMap<PeptideIx, Vec<usize>> = FnvHashMap::default();
        for (key, (peps, psms)) in collected {
            let passes = inference.filters.satisfies(&FilterItem::Peptide(PeptideView {
                sequence: &key,
                psms: psms.len(),
            }));
            if !passes {
                continue;
            }
            let mut reported = ReportedPeptide {
                key,
                peptides: peps,
                psms,
                psm_roles: Vec::new(),
                role: ScoringRole::NotScoring,
                score: f64::NAN,
            };
            inference
                .peptide_scoring
                .calculate_peptide_score(&mut reported, structure.all_psms());
            for &pep in &reported.peptides {
                by_peptide.entry(pep).or_default().push(peptides.len());
            }
            peptides.push(reported);
        }

        ClusterPeptides {
            peptides,
            by_peptide,
        }
    }

    /// Sorted indices of the post-filter peptides reachable from `group`
    pub(crate) fn reachable(&self, structure: &IntermediateStructure, group: GroupId) -> Vec<usize> {
        structure
            .reachable_peptides(group)
            .iter()
            .filter_map(|pep| self.by_peptide.get(pep))
            .flatten()
            .copied()
            .sorted_unstable()
            .dedup()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::StructureBuilder;
    use crate::evidence::{FileId, Modification, Protein, Psm};
    use crate::filter::FilterOptions;
    use crate::import::EvidenceRecord;
    use crate::score::ScoreDirections;

    pub(crate) fn structure(evidence: &[(&str, f64, &[&str])]) -> IntermediateStructure {
        let mut builder = StructureBuilder::default();
        for (i, (seq, score, proteins)) in evidence.iter().enumerate() {
            let record = EvidenceRecord {
                psm: Psm::new(FileId(0), i.to_string(), seq.to_string())
                    .with_score("MS:1001171", *score),
                proteins: proteins.iter().map(Protein::new).collect(),
            };
            builder.add_evidence(record, &FilterChain::default(), None);
        }
        builder.build(2).unwrap()
    }

    pub(crate) fn inference(strategy: InferenceStrategy, filters: &[&str]) -> Inference {
        let filters = filters
            .iter()
            .map(|json| serde_json::from_str::<FilterOptions>(json).unwrap())
            .collect();
        Inference {
            strategy,
            peptide_scoring: PeptideScoring::new("MS:1001171", &ScoreDirections::default())
                .unwrap(),
            protein_scoring: ProteinScoring::Additive,
            shared_peptides: SharedPeptides::All,
            filters: FilterChain::from_options(filters).unwrap(),
            consider_modifications: false,
            threads: 2,
        }
    }

    #[test]
    fn peptides_are_filtered_and_scored() {
        let s = structure(&[
            ("PEPA", 10.0, &["A"]),
            ("PEPA", 30.0, &["A"]),
            ("PEPB", 5.0, &["A"]),
        ]);
        let inf = inference(
            InferenceStrategy::ReportAll,
            &[r#"{"criterion": "psm_score", "accession": "MS:1001171", "comparator": "greater", "value": 6}"#],
        );
        let peptides = ClusterPeptides::new(&s, ClusterId(0), &inf);
        assert_eq!(peptides.peptides.len(), 1);
        assert_eq!(peptides.peptides[0].key, "PEPA");
        assert_eq!(peptides.peptides[0].psms.len(), 2);
        assert_eq!(peptides.peptides[0].score, 30.0);
    }

    #[test]
    fn modifications_split_peptides() {
        let mut builder = StructureBuilder::default();
        for (i, shift) in [None, Some(15.9949)].into_iter().enumerate() {
            let mut psm = Psm::new(FileId(0), i.to_string(), "PEPMK".into()).with_score("MS:1001171", 1.0);
            if let Some(mass_shift) = shift {
                psm.modifications.push(Modification {
                    position: 4,
                    mass_shift,
                    residue: Some('M'),
                });
            }
            builder.add_evidence(
                EvidenceRecord {
                    psm,
                    proteins: vec![Protein::new("A")],
                },
                &FilterChain::default(),
                None,
            );
        }
        let s = builder.build(1).unwrap();

        let mut inf = inference(InferenceStrategy::ReportAll, &[]);
        assert_eq!(ClusterPeptides::new(&s, ClusterId(0), &inf).peptides.len(), 1);
        inf.consider_modifications = true;
        assert_eq!(ClusterPeptides::new(&s, ClusterId(0), &inf).peptides.len(), 2);
    }

    #[test]
    fn shared_peptides_do_not_score() {
        // A: PEPA, PEPS; B: PEPB, PEPS
        let s = structure(&[
            ("PEPA", 1.0, &["A"]),
            ("PEPS", 10.0, &["A", "B"]),
            ("PEPB", 2.0, &["B"]),
        ]);
        let mut inf = inference(InferenceStrategy::ReportAll, &[]);
        let all = inf.run(&s, &Progress::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "A");
        assert_eq!(all[0].score, 11.0);

        inf.shared_peptides = SharedPeptides::None;
        let progress = Progress::default();
        let unique = inf.run(&s, &progress).unwrap();
        assert_eq!(unique[0].score, 1.0);
        assert_eq!(unique[1].score, 2.0);
        assert_eq!(progress.get(), 100);
    }
}
