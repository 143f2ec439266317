//! The intermediate structure: evidence partitioned into clusters, each
//! consolidated into a DAG of [`Group`]s.
//!
//! Everything is stored in flat arenas and referenced by index, so the
//! structure can be shared freely between inference workers.

use crate::evidence::{Peptide, PeptideIx, Protein, ProteinIx, Psm, PsmIx};
use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct GroupId(pub u32);

/// A node of a cluster's DAG. Protein groups hold proteins with identical
/// peptide evidence; peptide-only groups have no proteins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub cluster: ClusterId,
    pub proteins: Vec<ProteinIx>,
    /// Peptides attached directly to this group
    pub peptides: Vec<PeptideIx>,
    pub parents: Vec<GroupId>,
    pub children: Vec<GroupId>,
}

impl Group {
    pub fn is_protein_group(&self) -> bool {
        !self.proteins.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct IntermediateStructure {
    pub(crate) psms: Vec<Psm>,
    pub(crate) peptides: Vec<Peptide>,
    pub(crate) proteins: Vec<Protein>,
    pub(crate) groups: Vec<Group>,
    /// Indexed by [`ClusterId`]
    pub(crate) clusters: Vec<Vec<GroupId>>,
    pub(crate) accessions: FnvHashMap<Arc<str>, ProteinIx>,
}

impl std::ops::Index<PsmIx> for IntermediateStructure {
    type Output = Psm;
    fn index(&self, index: PsmIx) -> &Self::Output {
        &self.psms[index.0 as usize]
    }
}

impl std::ops::Index<PeptideIx> for IntermediateStructure {
    type Output = Peptide;
    fn index(&self, index: PeptideIx) -> &Self::Output {
        &self.peptides[index.0 as usize]
    }
}

impl std::ops::Index<ProteinIx> for IntermediateStructure {
    type Output = Protein;
    fn index(&self, index: ProteinIx) -> &Self::Output {
        &self.proteins[index.0 as usize]
    }
}

impl std::ops::Index<GroupId> for IntermediateStructure {
    type Output = Group;
    fn index(&self, index: GroupId) -> &Self::Output {
        &self.groups[index.0 as usize]
    }
}

impl IntermediateStructure {
    pub fn nr_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn nr_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn nr_peptides(&self) -> usize {
        self.peptides.len()
    }

    pub fn nr_proteins(&self) -> usize {
        self.proteins.len()
    }

    pub fn nr_psms(&self) -> usize {
        self.psms.len()
    }

    /// Every cluster with its groups, ordered by cluster id
    pub fn clusters(&self) -> BTreeMap<ClusterId, Vec<&Group>> {
        self.clusters
            .iter()
            .enumerate()
            .map(|(ix, groups)| {
                (
                    ClusterId(ix as u32),
                    groups.iter().map(|&id| &self[id]).collect(),
                )
            })
            .collect()
    }

    pub fn cluster(&self, id: ClusterId) -> &[GroupId] {
        self.clusters
            .get(id.0 as usize)
            .map(|groups| groups.as_slice())
            .unwrap_or_default()
    }

    pub fn cluster_ids(&self) -> impl Iterator<Item = ClusterId> {
        (0..self.clusters.len() as u32).map(ClusterId)
    }

    pub fn all_psms(&self) -> &[Psm] {
        &self.psms
    }

    pub fn peptides(&self) -> &[Peptide] {
        &self.peptides
    }

    pub fn proteins(&self) -> &[Protein] {
        &self.proteins
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn protein_by_accession(&self, accession: &str) -> Option<ProteinIx> {
        self.accessions.get(accession).copied()
    }

    /// All groups below `id` in its DAG, excluding `id` itself, in breadth
    /// first order
    pub fn descendants(&self, id: GroupId) -> Vec<GroupId> {
        let mut seen = FnvHashSet::default();
        let mut queue = VecDeque::from_iter(self[id].children.iter().copied());
        let mut out = Vec::new();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                out.push(next);
                queue.extend(self[next].children.iter().copied());
            }
        }
        out
    }

    /// All peptides reachable from `id`: its own plus those of all
    /// descendants, sorted
    pub fn reachable_peptides(&self, id: GroupId) -> Vec<PeptideIx> {
        let mut peptides = self[id].peptides.clone();
        for child in self.descendants(id) {
            peptides.extend_from_slice(&self[child].peptides);
        }
        peptides.sort_unstable();
        peptides.dedup();
        peptides
    }

    /// A PSM is a decoy iff all proteins reachable through its peptide are
    /// decoys; `None` if there are no such proteins. An explicitly set decoy
    /// flag on the PSM takes precedence.
    pub fn psm_is_decoy(&self, ix: PsmIx) -> Option<bool> {
        let psm = &self[ix];
        if let Some(decoy) = psm.decoy.explicit() {
            return Some(decoy);
        }
        let proteins = &self[psm.peptide].proteins;
        if proteins.is_empty() {
            return None;
        }
        Some(proteins.iter().all(|&prot| self[prot].is_decoy()))
    }

    pub fn psm_accessions(&self, ix: PsmIx) -> impl Iterator<Item = &str> {
        self[self[ix].peptide]
            .proteins
            .iter()
            .map(|&prot| self[prot].accession.as_ref())
    }

    pub(crate) fn psm_mut(&mut self, ix: PsmIx) -> &mut Psm {
        &mut self.psms[ix.0 as usize]
    }

    pub(crate) fn protein_mut(&mut self, ix: ProteinIx) -> &mut Protein {
        &mut self.proteins[ix.0 as usize]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::StructureBuilder;
    use crate::evidence::{Decoy, FileId};

    fn structure() -> IntermediateStructure {
        // A -- p1, p2 ; B -- p2 ; C -- p3
        let mut builder = StructureBuilder::default();
        for (i, (seq, prots)) in [("PEPA", vec!["A"]), ("PEPB", vec!["A", "B"]), ("PEPC", vec!["C"])]
            .into_iter()
            .enumerate()
        {
            let pep = builder.add_peptide(seq, None);
            builder.add_psm(Psm::new(FileId(0), i.to_string(), seq.into()), pep);
            for acc in prots {
                builder.add_protein(Protein::new(acc));
                builder.add_peptide_to_protein_connection(pep, acc);
            }
        }
        builder.build(2).unwrap()
    }

    #[test]
    fn queries_are_idempotent() {
        let s = structure();
        assert_eq!(s.nr_clusters(), 2);
        assert_eq!(s.nr_clusters(), s.nr_clusters());
        assert_eq!(s.all_psms(), s.all_psms());
        assert_eq!(s.clusters(), s.clusters());
        assert_eq!(s.nr_groups(), s.clusters().values().map(|g| g.len()).sum::<usize>());
    }

    #[test]
    fn reachability() {
        let s = structure();
        let a = s.protein_by_accession("A").unwrap();
        let b = s.protein_by_accession("B").unwrap();
        let ga = s[a].group.unwrap();
        let gb = s[b].group.unwrap();
        assert_ne!(ga, gb);
        assert_eq!(s.descendants(ga), vec![gb]);
        assert!(s.descendants(gb).is_empty());
        assert_eq!(s.reachable_peptides(ga).len(), 2);
        assert_eq!(s.reachable_peptides(gb).len(), 1);
        assert_eq!(s[ga].cluster, s[gb].cluster);
    }

    #[test]
    fn derived_psm_decoy() {
        let mut s = structure();
        assert_eq!(s.psm_is_decoy(PsmIx(0)), Some(false));
        let c = s.protein_by_accession("C").unwrap();
        s.protein_mut(c).decoy = Decoy::Explicit(true);
        let psm = s
            .all_psms()
            .iter()
            .position(|psm| psm.sequence == "PEPC")
            .unwrap();
        assert_eq!(s.psm_is_decoy(PsmIx(psm as u32)), Some(true));
        s.psm_mut(PsmIx(psm as u32)).decoy = Decoy::Explicit(false);
        assert_eq!(s.psm_is_decoy(PsmIx(psm as u32)), Some(false));
    }
}
