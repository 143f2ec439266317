//! # Protein Grouping
//!
//! Consolidation of one cluster (a connected component of the peptide/protein
//! graph) into a DAG of groups, and the bipartite graph cover used by
//! Occam's Razor inference.
//!
//! ## Consolidation
//! - Proteins with identical peptide sets are merged into one protein group.
//! - A protein group is a child of the smallest protein groups whose peptide
//!   sets are strict supersets of its own (transitive edges are not stored).
//! - A peptide is attached directly to a protein group if that group is the
//!   unique smallest group containing it. Otherwise it is placed in a
//!   peptide-only group, which is a child of every smallest group containing
//!   the peptide.
//!
//! The peptides reachable from a protein group (its own plus those of all
//! descendants) are then exactly the peptides of each of its proteins.
//!
//! ## References
// 1. Zhang, B., Chambers, M. C., & Tabb, D. L. (2007). Proteomic parsimony through
// bipartite graph analysis improves accuracy and transparency. Journal of proteome research,
// 6(9), 3549-3557. https://doi.org/10.1021/pr070230d
//!

use crate::evidence::{PeptideIx, ProteinIx};
use crate::structure::ClusterId;
use fnv::FnvHashMap;
use itertools::Itertools;
use std::collections::BTreeMap;

/// The evidence of one cluster, as handed to a worker
#[derive(Clone, Debug, Default)]
pub struct ClusterEvidence {
    pub id: ClusterId,
    /// Sorted
    pub proteins: Vec<ProteinIx>,
    /// Sorted
    pub peptides: Vec<PeptideIx>,
    /// Sorted peptides of each protein, parallel to `proteins`
    pub protein_peptides: Vec<Vec<PeptideIx>>,
}

/// A group before global ids are assigned; `parents` index into
/// [`ConsolidatedCluster::groups`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalGroup {
    pub proteins: Vec<ProteinIx>,
    pub peptides: Vec<PeptideIx>,
    pub parents: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct ConsolidatedCluster {
    pub id: ClusterId,
    pub groups: Vec<LocalGroup>,
}

/// Is sorted `a` a subset of sorted `b`?
pub(crate) fn is_subset<T: Ord>(a: &[T], b: &[T]) -> bool {
    if a.len() > b.len() {
        return false;
    }
    let mut b = b.iter();
    a.iter().all(|x| b.any(|y| y == x))
}

/// Protein classes: proteins grouped by identical peptide sets
struct ProteinClasses {
    peptides: Vec<Vec<PeptideIx>>,
    proteins: Vec<Vec<ProteinIx>>,
}

impl ProteinClasses {
    fn new(cluster: &ClusterEvidence) -> Self {
        let mut mapping: FnvHashMap<&[PeptideIx], Vec<ProteinIx>> = FnvHashMap::default();
        cluster
            .proteins
            .iter()
            .zip(&cluster.protein_peptides)
            .for_each(|(&prot, peptides)| {
                mapping.entry(peptides.as_slice()).or_default().push(prot);
            });
        // proteins were visited in sorted order, so the first one is the smallest
        let (peptides, proteins) = mapping
            .into_iter()
            .sorted_by_key(|(_, proteins)| proteins[0])
            .map(|(peptides, proteins)| (peptides.to_vec(), proteins))
            .unzip();
        ProteinClasses { peptides, proteins }
    }

    /// Elements of `classes` that contain no other element of `classes`
    fn minimal(&self, classes: &[usize]) -> Vec<usize> {
        let by_size = classes
            .iter()
            .copied()
            .sorted_by_key(|&c| self.peptides[c].len())
            .collect::<Vec<_>>();
        classes
            .iter()
            .copied()
            .filter(|&c| {
                by_size
                    .iter()
                    .take_while(|&&o| self.peptides[o].len() < self.peptides[c].len())
                    .all(|&o| !is_subset(&self.peptides[o], &self.peptides[c]))
            })
            .collect()
    }
}

pub fn consolidate(cluster: ClusterEvidence) -> ConsolidatedCluster {
    let classes = ProteinClasses::new(&cluster);
    let n_classes = classes.proteins.len();

    // classes containing each peptide of the cluster, in ascending order
    let mut containing: Vec<Vec<usize>> = vec![Vec::new(); cluster.peptides.len()];
    let local = |pep: &PeptideIx| cluster.peptides.binary_search(pep).ok();
    for (class, peptides) in classes.peptides.iter().enumerate() {
        for ix in peptides.iter().filter_map(local) {
            containing[ix].push(class);
        }
    }

    let mut groups = classes
        .proteins
        .iter()
        .zip(&classes.peptides)
        .enumerate()
        .map(|(class, (proteins, peptides))| {
            let parents = match peptides.split_first() {
                Some((first, rest)) => {
                    let mut supersets = local(first)
                        .map(|ix| containing[ix].clone())
                        .unwrap_or_default();
                    for ix in rest.iter().filter_map(local) {
                        supersets.retain(|c| containing[ix].binary_search(c).is_ok());
                    }
                    supersets.retain(|&c| c != class);
                    classes.minimal(&supersets)
                }
                None => Vec::new(),
            };
            LocalGroup {
                proteins: proteins.clone(),
                peptides: Vec::new(),
                parents,
            }
        })
        .collect::<Vec<_>>();

    let mut peptide_only: BTreeMap<Vec<usize>, Vec<PeptideIx>> = BTreeMap::new();
    for (&pep, classes_of_pep) in cluster.peptides.iter().zip(&containing) {
        let minimal = classes.minimal(classes_of_pep);
        match minimal.as_slice() {
            [owner] => groups[*owner].peptides.push(pep),
            _ => peptide_only.entry(minimal).or_default().push(pep),
        }
    }

    for (parents, peptides) in peptide_only {
        groups.push(LocalGroup {
            proteins: Vec::new(),
            peptides,
            parents,
        });
    }

    log::trace!(
        "cluster {:?}: {} protein groups, {} peptide groups",
        cluster.id,
        n_classes,
        groups.len() - n_classes
    );

    ConsolidatedCluster {
        id: cluster.id,
        groups,
    }
}

/// Greedy (almost) minimal cover of the right vertices by left vertices.
///
/// Left vertices that are the only connection of some right vertex are forced
/// into the cover; otherwise the left vertex with the most uncovered right
/// vertices is added, until every right vertex is covered.
pub(crate) struct BipartiteGraph {
    connections: Vec<(u32, u32)>,
    original_left: Vec<u32>,
    remaining_left: Vec<u32>,
    remaining_right: Vec<u32>,
    left_cover: Vec<bool>,
    right_cover: Vec<bool>,
}

impl BipartiteGraph {
    pub(crate) fn new(connections: Vec<(u32, u32)>, left_size: usize, right_size: usize) -> Self {
        let mut remaining_left = vec![0; left_size];
        let mut remaining_right = vec![0; right_size];
        connections.iter().for_each(|(l, r)| {
            remaining_left[*l as usize] += 1;
            remaining_right[*r as usize] += 1;
        });
        Self {
            connections,
            original_left: remaining_left.clone(),
            remaining_left,
            remaining_right,
            left_cover: vec![false; left_size],
            right_cover: vec![false; right_size],
        }
    }

    pub(crate) fn minimal_cover(mut self) -> Vec<bool> {
        while !self.connections.is_empty() {
            self.trim_connections();
            if !self.connections.is_empty() {
                self.add_biggest_left_to_cover();
            }
        }
        self.left_cover
    }

    fn remove_edge(&mut self, left_index: usize, right_index: usize) {
        self.remaining_left[left_index] -= 1;
        self.remaining_right[right_index] -= 1;
    }

    fn trim_connections(&mut self) {
        let mut connections = std::mem::take(&mut self.connections);
        let mut connection_count = 0;
        while connection_count != connections.len() {
            connection_count = connections.len();
            connections.iter().for_each(|&(left, right)| {
                if self.remaining_right[right as usize] == 1 {
                    self.left_cover[left as usize] = true;
                }
            });
            connections.retain(|&(left, right)| {
                let (left, right) = (left as usize, right as usize);
                if self.left_cover[left] {
                    self.right_cover[right] = true;
                    self.remove_edge(left, right);
                    false
                } else {
                    true
                }
            });
            connections.retain(|&(left, right)| {
                let (left, right) = (left as usize, right as usize);
                if self.right_cover[right] {
                    self.remove_edge(left, right);
                    false
                } else {
                    true
                }
            });
        }
        self.connections = connections;
    }

    fn add_biggest_left_to_cover(&mut self) {
        // ties on remaining edges are broken by the original degree, then by
        // the lowest index
        let biggest = self
            .remaining_left
            .iter()
            .zip(&self.original_left)
            .enumerate()
            .max_by(|(i, a), (j, b)| a.cmp(b).then_with(|| j.cmp(i)));
        if let Some((index, _)) = biggest {
            self.left_cover[index] = true;
        }
    }
}
