//! Occam's Razor: report an (almost) minimal set of protein groups that
//! explains every post-filter peptide of a cluster.
//!
//! Protein groups with identical post-filter peptides are merged first. The
//! candidates left over after the cover become subgroups of the reported groups
//! explaining them. A subgroup whose parents all fail the protein group
//! filters is reported itself, if it passes them.

use super::{ClusterPeptides, Inference, InferenceProteinGroup};
use crate::protein_grouping::{is_subset, BipartiteGraph};
use crate::structure::{ClusterId, GroupId, IntermediateStructure};
use fnv::FnvHashMap;
use itertools::Itertools;

struct Candidate {
    peptides: Vec<usize>,
    groups: Vec<GroupId>,
}

pub(super) fn infer_cluster(
    structure: &IntermediateStructure,
    cluster: ClusterId,
    inference: &Inference,
) -> Vec<InferenceProteinGroup> {
    let peptides = ClusterPeptides::new(structure, cluster, inference);

    let mut same_sets: FnvHashMap<Vec<usize>, Vec<GroupId>> = FnvHashMap::default();
    for &group in structure.cluster(cluster) {
        if !structure[group].is_protein_group() {
            continue;
        }
        let reachable = peptides.reachable(structure, group);
        if !reachable.is_empty() {
            same_sets.entry(reachable).or_default().push(group);
        }
    }
    // groups of a cluster are visited in id order, so `groups[0]` is the smallest
    let candidates = same_sets
        .into_iter()
        .map(|(peptides, groups)| Candidate { peptides, groups })
        .sorted_by_key(|c| c.groups[0])
        .collect::<Vec<_>>();
    if candidates.is_empty() {
        return Vec::new();
    }

    let connections = candidates
        .iter()
        .enumerate()
        .flat_map(|(left, c)| c.peptides.iter().map(move |&right| (left as u32, right as u32)))
        .collect::<Vec<_>>();
    let cover = BipartiteGraph::new(connections, candidates.len(), peptides.peptides.len())
        .minimal_cover();

    let make_group = |candidate: &Candidate| {
        let proteins = candidate
            .groups
            .iter()
            .flat_map(|&g| structure[g].proteins.iter().copied())
            .collect();
        inference.protein_group(structure, cluster, proteins, &peptides, &candidate.peptides)
    };

    let mut reported = candidates
        .iter()
        .enumerate()
        .filter(|(ix, _)| cover[*ix])
        .map(|(ix, c)| (ix, make_group(c)))
        .collect::<Vec<_>>();

    let mut attached = Vec::new();
    for (ix, candidate) in candidates.iter().enumerate().filter(|(ix, _)| !cover[*ix]) {
        let explaining = reported
            .iter()
            .positions(|(r, _)| is_subset(&candidate.peptides, &candidates[*r].peptides))
            .collect::<Vec<_>>();
        // not explained by a single group: attach to every group sharing evidence
        let parents = match explaining.is_empty() {
            false => explaining,
            true => reported
                .iter()
                .positions(|(r, _)| {
                    candidates[*r]
                        .peptides
                        .iter()
                        .any(|p| candidate.peptides.binary_search(p).is_ok())
                })
                .collect(),
        };
        log::trace!(
            "candidate {} of cluster {:?} is a subgroup of {} groups",
            ix,
            cluster,
            parents.len()
        );
        let subgroup = make_group(candidate);
        for &parent in &parents {
            reported[parent].1.subgroups.push(subgroup.clone());
        }
        attached.push((ix, parents, subgroup));
    }

    let passing = reported
        .iter()
        .map(|(_, group)| inference.passes_filters(group))
        .collect::<Vec<_>>();
    let promoted = attached
        .into_iter()
        .filter(|(_, parents, subgroup)| {
            parents.iter().all(|&parent| !passing[parent]) && inference.passes_filters(subgroup)
        })
        .map(|(ix, _, subgroup)| (ix, subgroup));

    reported
        .into_iter()
        .zip(&passing)
        .filter_map(|(reported, &passes)| passes.then_some(reported))
        .chain(promoted)
        .sorted_by_key(|(ix, _)| *ix)
        .map(|(_, group)| group)
        .collect()
}

#[cfg(test)]
mod test {
    use super::super::test::{inference, structure};
    use super::super::InferenceStrategy;
    use crate::pool::Progress;

    #[test]
    fn superset_explains_identical_pair() {
        // A and B share {p1, p2}, C has {p1, p2, p3}
        let s = structure(&[
            ("PEPONE", 10.0, &["A", "B", "C"]),
            ("PEPTWO", 20.0, &["A", "B", "C"]),
            ("PEPTHREE", 30.0, &["C"]),
        ]);
        let groups = inference(InferenceStrategy::OccamsRazor, &[])
            .run(&s, &Progress::default())
            .unwrap();
        assert_eq!(groups.len(), 1);
        let c = &groups[0];
        assert_eq!(c.id, "C");
        assert_eq!(c.peptides.len(), 3);
        assert_eq!(c.score, 60.0);

        // the merged A/B group is kept distinct, as a subgroup of C
        assert_eq!(c.subgroups.len(), 1);
        assert_eq!(c.subgroups[0].id, "A/B");
        assert_eq!(c.subgroups[0].proteins.len(), 2);
        assert_eq!(c.subgroups[0].peptides.len(), 2);
    }

    #[test]
    fn overlapping_groups_both_reported() {
        // A: {p1, p2}, B: {p2, p3}; both needed to explain p1 and p3
        let s = structure(&[
            ("PEPONE", 1.0, &["A"]),
            ("PEPTWO", 1.0, &["A", "B"]),
            ("PEPTHREE", 1.0, &["B"]),
        ]);
        let groups = inference(InferenceStrategy::OccamsRazor, &[])
            .run(&s, &Progress::default())
            .unwrap();
        assert_eq!(
            groups.iter().map(|g| g.id.as_str()).collect::<Vec<_>>(),
            vec!["A", "B"]
        );
        assert!(groups.iter().all(|g| g.subgroups.is_empty()));
    }

    #[test]
    fn shared_subset_is_attached_to_sharing_groups() {
        // A: {p1, p2}, B: {p3, p4}, C: {p2, p3} is covered by A and B together
        let s = structure(&[
            ("PEPONE", 1.0, &["A"]),
            ("PEPTWO", 1.0, &["A", "C"]),
            ("PEPTHREE", 1.0, &["B", "C"]),
            ("PEPFOUR", 1.0, &["B"]),
        ]);
        let groups = inference(InferenceStrategy::OccamsRazor, &[])
            .run(&s, &Progress::default())
            .unwrap();
        assert_eq!(groups.len(), 2);
        for group in &groups {
            assert_eq!(group.subgroups.len(), 1);
            assert_eq!(group.subgroups[0].id, "C");
        }
    }

    #[test]
    fn protein_filters_apply_after_scoring() {
        let s = structure(&[
            ("PEPONE", 10.0, &["A"]),
            ("PEPTWO", 1.0, &["B"]),
        ]);
        let groups = inference(
            InferenceStrategy::OccamsRazor,
            &[r#"{"criterion": "protein_score", "comparator": "greater_equal", "value": 5}"#],
        )
        .run(&s, &Progress::default())
        .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "A");
    }

    #[test]
    fn subgroup_of_filtered_group_is_reported() {
        let s = structure(&[
            ("PEPONE", 10.0, &["A", "B", "C"]),
            ("PEPTWO", 20.0, &["A", "B", "C"]),
            ("PEPTHREE", 30.0, &["C"]),
            ("PEPFOUR", 5.0, &["D"]),
        ]);
        let groups = inference(
            InferenceStrategy::OccamsRazor,
            &[r#"{"criterion": "protein_number_of_peptides", "comparator": "less_equal", "value": 2}"#],
        )
        .run(&s, &Progress::default())
        .unwrap();
        assert_eq!(
            groups.iter().map(|g| g.id.as_str()).collect::<Vec<_>>(),
            vec!["A/B", "D"]
        );
        assert_eq!(groups[0].score, 30.0);
        assert!(groups[0].subgroups.is_empty());

        // a subgroup failing the filters stays dropped
        let groups = inference(
            InferenceStrategy::OccamsRazor,
            &[
                r#"{"criterion": "protein_number_of_peptides", "comparator": "less_equal", "value": 2}"#,
                r#"{"criterion": "protein_score", "comparator": "greater", "value": 40}"#,
            ],
        )
        .run(&s, &Progress::default())
        .unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn psm_filters_shrink_evidence() {
        // without p3 passing, C is no better than A/B
        let s = structure(&[
            ("PEPONE", 10.0, &["A", "B", "C"]),
            ("PEPTWO", 20.0, &["A", "B", "C"]),
            ("PEPTHREE", 0.5, &["C"]),
        ]);
        let groups = inference(
            InferenceStrategy::OccamsRazor,
            &[r#"{"criterion": "psm_score", "accession": "MS:1001171", "comparator": "greater", "value": 1}"#],
        )
        .run(&s, &Progress::default())
        .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "A/B/C");
        assert_eq!(groups[0].peptides.len(), 2);
    }
}
