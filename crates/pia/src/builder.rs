use crate::evidence::{Decoy, FileId, Peptide, PeptideId, PeptideIx, Protein, ProteinIx, Psm, PsmIx};
use crate::filter::{FilterChain, FilterItem, PsmView};
use crate::import::EvidenceRecord;
use crate::pool::WorkerPool;
use crate::protein_grouping::{consolidate, ClusterEvidence};
use crate::structure::{ClusterId, Group, GroupId, IntermediateStructure};
use crate::{Error, Result};
use fnv::FnvHashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// What makes two PSMs belong to the same peptide
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeptideIdentity {
    #[default]
    Sequence,
    SequenceAndModifications,
}

/// Collects evidence and builds the [`IntermediateStructure`]
#[derive(Default)]
pub struct StructureBuilder {
    identity: PeptideIdentity,
    psms: Vec<Psm>,
    psm_keys: FnvHashMap<(FileId, String), PsmIx>,
    peptides: Vec<Peptide>,
    peptide_ids: FnvHashMap<PeptideId, PeptideIx>,
    proteins: Vec<Protein>,
    accessions: FnvHashMap<Arc<str>, ProteinIx>,

    peptide_proteins: Vec<Vec<ProteinIx>>,
    protein_peptides: Vec<Vec<PeptideIx>>,
}

impl StructureBuilder {
    pub fn new(identity: PeptideIdentity) -> Self {
        StructureBuilder {
            identity,
            ..Default::default()
        }
    }

    pub fn nr_psms(&self) -> usize {
        self.psms.len()
    }

    pub fn nr_peptides(&self) -> usize {
        self.peptides.len()
    }

    pub fn nr_proteins(&self) -> usize {
        self.proteins.len()
    }

    /// Insert a protein, or merge its information into the protein with the
    /// same accession. Returns the protein's index, and whether it was
    /// already present.
    pub fn add_protein(&mut self, protein: Protein) -> (ProteinIx, bool) {
        if let Some(&ix) = self.accessions.get(&protein.accession) {
            let existing = &mut self.proteins[ix.0 as usize];
            if let Some(sequence) = protein.sequence {
                if existing.sequence.is_none() {
                    existing.sequence = Some(sequence);
                } else if existing.sequence.as_deref() != Some(sequence.as_str()) {
                    warn!(
                        "conflicting sequences for protein {}, keeping the first one",
                        existing.accession
                    );
                }
            }
            if existing.description.is_none() {
                existing.description = protein.description;
            }
            if existing.decoy == Decoy::Unset {
                existing.decoy = protein.decoy;
            }
            return (ix, true);
        }

        let ix = ProteinIx(self.proteins.len() as u32);
        self.accessions.insert(protein.accession.clone(), ix);
        self.proteins.push(protein);
        self.protein_peptides.push(Vec::new());
        (ix, false)
    }

    /// Insert a peptide, unless one with the same identity exists
    pub fn add_peptide(&mut self, sequence: &str, modifications: Option<String>) -> PeptideIx {
        let id = PeptideId::new(sequence, modifications.as_deref());
        if let Some(&ix) = self.peptide_ids.get(&id) {
            return ix;
        }
        let ix = PeptideIx(self.peptides.len() as u32);
        self.peptide_ids.insert(id, ix);
        self.peptides
            .push(Peptide::new(sequence.to_string(), modifications));
        self.peptide_proteins.push(Vec::new());
        ix
    }

    /// Attach a PSM to a peptide. PSMs whose (file, id) is already known are
    /// dropped.
    pub fn add_psm(&mut self, mut psm: Psm, peptide: PeptideIx) -> Option<PsmIx> {
        let key = (psm.file, psm.id.clone());
        if self.psm_keys.contains_key(&key) {
            warn!("duplicate PSM {} in file {:?} dropped", psm.id, psm.file);
            return None;
        }
        let ix = PsmIx(self.psms.len() as u32);
        psm.peptide = peptide;
        self.psm_keys.insert(key, ix);
        self.psms.push(psm);
        self.peptides[peptide.0 as usize].psms.push(ix);
        Some(ix)
    }

    /// Record a peptide/protein connection. Unknown accessions are added as
    /// new proteins.
    pub fn add_peptide_to_protein_connection(&mut self, peptide: PeptideIx, accession: &str) {
        let protein = match self.accessions.get(accession) {
            Some(&ix) => ix,
            None => self.add_protein(Protein::new(accession)).0,
        };
        let proteins = &mut self.peptide_proteins[peptide.0 as usize];
        if !proteins.contains(&protein) {
            proteins.push(protein);
            self.protein_peptides[protein.0 as usize].push(peptide);
        }
    }

    /// Admit one record of evidence, if its PSM passes `filters`. Returns
    /// whether the PSM was admitted. When `retained_scores` is given, the
    /// admitted PSM keeps only those scores.
    pub fn add_evidence(
        &mut self,
        record: EvidenceRecord,
        filters: &FilterChain,
        retained_scores: Option<&[String]>,
    ) -> bool {
        let EvidenceRecord { mut psm, proteins } = record;

        let decoy = psm.decoy.explicit().or_else(|| {
            (!proteins.is_empty()).then(|| proteins.iter().all(|p| p.is_decoy()))
        });
        let admitted = filters.satisfies(&FilterItem::Psm(PsmView {
            psm: &psm,
            accessions: proteins.iter().map(|p| p.accession.as_ref()).collect(),
            decoy,
        }));
        if !admitted {
            return false;
        }

        if self.psm_keys.contains_key(&(psm.file, psm.id.clone())) {
            warn!("duplicate PSM {} in file {:?} dropped", psm.id, psm.file);
            return false;
        }
        if let Some(accessions) = retained_scores {
            psm.retain_scores(accessions);
        }

        let modifications = match self.identity {
            PeptideIdentity::Sequence => None,
            PeptideIdentity::SequenceAndModifications => Some(psm.modification_key()),
        };
        let peptide = self.add_peptide(&psm.sequence, modifications);
        if self.add_psm(psm, peptide).is_none() {
            return false;
        }
        for protein in proteins {
            let accession = protein.accession.clone();
            self.add_protein(protein);
            self.add_peptide_to_protein_connection(peptide, &accession);
        }
        true
    }

    /// Split the evidence into connected components, growing each cluster
    /// from an unvisited protein by alternately adding all peptides of the
    /// cluster's proteins and all proteins of its peptides.
    fn partition(&self) -> Vec<ClusterEvidence> {
        let mut protein_seen = vec![false; self.proteins.len()];
        let mut peptide_seen = vec![false; self.peptides.len()];
        let mut clusters = Vec::new();

        for start in 0..self.proteins.len() {
            if protein_seen[start] {
                continue;
            }
            protein_seen[start] = true;
            let mut proteins = vec![ProteinIx(start as u32)];
            let mut peptides = Vec::new();
            let mut frontier = proteins.clone();

            while !frontier.is_empty() {
                let mut new_peptides = Vec::new();
                for prot in std::mem::take(&mut frontier) {
                    for &pep in &self.protein_peptides[prot.0 as usize] {
                        if !peptide_seen[pep.0 as usize] {
                            peptide_seen[pep.0 as usize] = true;
                            new_peptides.push(pep);
                        }
                    }
                }
                for &pep in &new_peptides {
                    for &prot in &self.peptide_proteins[pep.0 as usize] {
                        if !protein_seen[prot.0 as usize] {
                            protein_seen[prot.0 as usize] = true;
                            frontier.push(prot);
                            proteins.push(prot);
                        }
                    }
                }
                peptides.extend(new_peptides);
            }

            proteins.sort_unstable();
            peptides.sort_unstable();
            let protein_peptides = proteins
                .iter()
                .map(|prot| {
                    let mut peps = self.protein_peptides[prot.0 as usize].clone();
                    peps.sort_unstable();
                    peps
                })
                .collect();
            clusters.push(ClusterEvidence {
                id: ClusterId(clusters.len() as u32),
                proteins,
                peptides,
                protein_peptides,
            });
        }

        let orphans = peptide_seen.iter().filter(|seen| !**seen).count();
        if orphans > 0 {
            warn!("{} peptides without proteins form their own clusters", orphans);
        }
        for (ix, _) in peptide_seen.iter().enumerate().filter(|(_, seen)| !**seen) {
            clusters.push(ClusterEvidence {
                id: ClusterId(clusters.len() as u32),
                peptides: vec![PeptideIx(ix as u32)],
                ..Default::default()
            });
        }
        clusters
    }

    /// Partition the evidence and consolidate every cluster into its group
    /// DAG, using `threads` workers.
    pub fn build(mut self, threads: usize) -> Result<IntermediateStructure> {
        if self.peptides.is_empty() || self.proteins.is_empty() {
            return Err(Error::EmptyEvidence {
                peptides: self.peptides.len(),
                proteins: self.proteins.len(),
            });
        }

        let start = Instant::now();
        info!(
            "building intermediate structure from {} PSMs, {} peptides, {} proteins",
            self.psms.len(),
            self.peptides.len(),
            self.proteins.len()
        );

        let time = Instant::now();
        let clusters = self.partition();
        for (peptide, mut proteins) in self.peptides.iter_mut().zip(self.peptide_proteins.drain(..)) {
            proteins.sort_unstable();
            peptide.proteins = proteins;
        }
        self.protein_peptides = Vec::new();
        info!(
            "- found {} clusters in {}ms",
            clusters.len(),
            time.elapsed().as_millis()
        );

        let time = Instant::now();
        let mut consolidated = WorkerPool::new(threads).run(clusters, None, |cluster| Ok(consolidate(cluster)))?;
        consolidated.sort_by_key(|cluster| cluster.id);

        let mut structure = IntermediateStructure {
            psms: self.psms,
            peptides: self.peptides,
            proteins: self.proteins,
            groups: Vec::new(),
            clusters: Vec::with_capacity(consolidated.len()),
            accessions: self.accessions,
        };

        for cluster in consolidated {
            let offset = structure.groups.len();
            let mut ids = Vec::with_capacity(cluster.groups.len());
            for (local, group) in cluster.groups.into_iter().enumerate() {
                let id = GroupId((offset + local) as u32);
                for &prot in &group.proteins {
                    let protein = structure.protein_mut(prot);
                    protein.group = Some(id);
                    protein.cluster = Some(cluster.id);
                }
                for &pep in &group.peptides {
                    let peptide = &mut structure.peptides[pep.0 as usize];
                    peptide.group = Some(id);
                    peptide.cluster = Some(cluster.id);
                }
                structure.groups.push(Group {
                    id,
                    cluster: cluster.id,
                    proteins: group.proteins,
                    peptides: group.peptides,
                    parents: group
                        .parents
                        .into_iter()
                        .map(|p| GroupId((offset + p) as u32))
                        .collect(),
                    children: Vec::new(),
                });
                ids.push(id);
            }
            for &id in &ids {
                for parent in structure.groups[id.0 as usize].parents.clone() {
                    structure.groups[parent.0 as usize].children.push(id);
                }
            }
            structure.clusters.push(ids);
        }
        debug!(
            "- consolidated {} groups in {}ms",
            structure.groups.len(),
            time.elapsed().as_millis()
        );

        info!(
            "built intermediate structure with {} clusters and {} groups in {}ms",
            structure.nr_clusters(),
            structure.nr_groups(),
            start.elapsed().as_millis()
        );
        Ok(structure)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter::FilterOptions;

    fn record(id: &str, seq: &str, proteins: &[&str]) -> EvidenceRecord {
        EvidenceRecord {
            psm: Psm::new(FileId(0), id, seq).with_score("MS:1001171", 10.0),
            proteins: proteins.iter().map(Protein::new).collect(),
        }
    }

    #[test]
    fn empty_evidence_is_rejected() {
        let builder = StructureBuilder::default();
        assert!(matches!(
            builder.build(1),
            Err(Error::EmptyEvidence {
                peptides: 0,
                proteins: 0
            })
        ));

        let mut builder = StructureBuilder::default();
        builder.add_protein(Protein::new("A"));
        assert!(matches!(
            builder.build(1),
            Err(Error::EmptyEvidence { peptides: 0, .. })
        ));
    }

    #[test]
    fn protein_upsert_merges_information() {
        let mut builder = StructureBuilder::default();
        let mut first = Protein::new("A");
        first.sequence = Some("MKAA".into());
        let (a, existed) = builder.add_protein(first);
        assert!(!existed);

        let mut second = Protein::new("A");
        second.sequence = Some("MKAB".into());
        second.description = Some("albumin".into());
        second.decoy = Decoy::Explicit(false);
        let (b, existed) = builder.add_protein(second);
        assert!(existed);
        assert_eq!(a, b);

        let protein = &builder.proteins[a.0 as usize];
        assert_eq!(protein.sequence.as_deref(), Some("MKAA"));
        assert_eq!(protein.description.as_deref(), Some("albumin"));
        assert_eq!(protein.decoy, Decoy::Explicit(false));
        assert_eq!(builder.nr_proteins(), 1);
    }

    #[test]
    fn evidence_admission() {
        let filters = FilterChain::from_options(vec![serde_json::from_str::<FilterOptions>(
            r#"{"criterion": "psm_charge", "comparator": "greater_equal", "value": 2}"#,
        )
        .unwrap()])
        .unwrap();

        let mut builder = StructureBuilder::default();
        let mut low = record("1", "PEPTIDE", &["A"]);
        low.psm.charge = 1;
        assert!(!builder.add_evidence(low, &filters, None));
        assert_eq!(builder.nr_proteins(), 0);
        assert_eq!(builder.nr_peptides(), 0);

        let mut ok = record("2", "PEPTIDE", &["A", "B"]);
        ok.psm.charge = 2;
        ok.psm.scores.insert("MS:1001172".into(), 0.1);
        assert!(builder.add_evidence(ok, &filters, Some(&["MS:1001171".to_string()][..])));
        assert_eq!(builder.nr_proteins(), 2);
        assert_eq!(builder.nr_peptides(), 1);
        assert_eq!(builder.psms[0].scores.len(), 1);

        // duplicate PSM identity
        let mut dup = record("2", "PEPTIDE", &["A"]);
        dup.psm.charge = 3;
        assert!(!builder.add_evidence(dup, &filters, None));
        assert_eq!(builder.nr_psms(), 1);
    }

    #[test]
    fn peptide_identity_with_modifications() {
        let mut builder = StructureBuilder::new(PeptideIdentity::SequenceAndModifications);
        let plain = record("1", "PEPMTIDE", &["A"]);
        let mut oxidized = record("2", "PEPMTIDE", &["A"]);
        oxidized.psm.modifications.push(crate::evidence::Modification {
            position: 4,
            mass_shift: 15.9949,
            residue: Some('M'),
        });
        builder.add_evidence(plain, &FilterChain::default(), None);
        builder.add_evidence(oxidized, &FilterChain::default(), None);
        assert_eq!(builder.nr_peptides(), 2);

        let mut builder = StructureBuilder::default();
        builder.add_evidence(record("1", "PEPMTIDE", &["A"]), &FilterChain::default(), None);
        builder.add_evidence(record("2", "PEPMTIDE", &["A"]), &FilterChain::default(), None);
        assert_eq!(builder.nr_peptides(), 1);
    }

    #[test]
    fn partition_and_back_references() {
        let mut builder = StructureBuilder::default();
        let records = [
            record("1", "AAA", &["P1"]),
            record("2", "CCC", &["P2", "P3"]),
            record("3", "DDD", &["P3", "P4"]),
            record("4", "EEE", &["P5"]),
            record("5", "FFF", &[]),
        ];
        for r in records {
            builder.add_evidence(r, &FilterChain::default(), None);
        }
        builder.add_protein(Protein::new("P6"));

        let structure = builder.build(3).unwrap();
        // {P1}, {P2, P3, P4}, {P5}, {P6}, {FFF}
        assert_eq!(structure.nr_clusters(), 5);

        let p2 = structure.protein_by_accession("P2").unwrap();
        let p4 = structure.protein_by_accession("P4").unwrap();
        assert_eq!(structure[p2].cluster, structure[p4].cluster);
        let p1 = structure.protein_by_accession("P1").unwrap();
        assert_ne!(structure[p1].cluster, structure[p2].cluster);

        for (ix, peptide) in structure.peptides().iter().enumerate() {
            let group = &structure[peptide.group.unwrap()];
            assert!(group.peptides.contains(&PeptideIx(ix as u32)));
            assert_eq!(Some(group.cluster), peptide.cluster);
        }
        for protein in structure.proteins() {
            assert!(protein.group.is_some());
        }

        let ddd = structure
            .peptides()
            .iter()
            .find(|p| p.sequence == "DDD")
            .unwrap();
        assert!(!ddd.is_unique());
        let eee = structure
            .peptides()
            .iter()
            .find(|p| p.sequence == "EEE")
            .unwrap();
        assert!(eee.is_unique());
    }
}
