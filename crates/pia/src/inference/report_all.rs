//! Report-All: every protein group with post-filter peptides is reported.
//!
//! Only when filters are active can two groups end up with identical
//! evidence; such groups are then reported once, by the group with the
//! smallest id, with the proteins of the others absorbed.

use super::{ClusterPeptides, Inference, InferenceProteinGroup};
use crate::structure::{ClusterId, GroupId, IntermediateStructure};
use fnv::FnvHashMap;
use itertools::Itertools;

pub(super) fn infer_cluster(
    structure: &IntermediateStructure,
    cluster: ClusterId,
    inference: &Inference,
) -> Vec<InferenceProteinGroup> {
    let peptides = ClusterPeptides::new(structure, cluster, inference);

    let candidates = structure
        .cluster(cluster)
        .iter()
        .copied()
        .filter(|&group| structure[group].is_protein_group())
        .map(|group| (vec![group], peptides.reachable(structure, group)))
        .filter(|(_, reachable)| !reachable.is_empty())
        .collect::<Vec<_>>();

    let candidates = match inference.filters.is_empty() {
        true => candidates,
        false => {
            let mut same_sets: FnvHashMap<Vec<usize>, Vec<GroupId>> = FnvHashMap::default();
            for (groups, reachable) in candidates {
                same_sets.entry(reachable).or_default().extend(groups);
            }
            same_sets
                .into_iter()
                .map(|(reachable, groups)| (groups, reachable))
                .sorted_by_key(|(groups, _)| groups[0])
                .collect()
        }
    };

    candidates
        .into_iter()
        .map(|(groups, reachable)| {
            let proteins = groups
                .iter()
                .flat_map(|&g| structure[g].proteins.iter().copied())
                .collect();
            inference.protein_group(structure, cluster, proteins, &peptides, &reachable)
        })
        .filter(|group| inference.passes_filters(group))
        .collect()
}
