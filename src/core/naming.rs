// naming.rs - Incremental hierarchical name assignment

use crate::core::name::Name;
use crate::core::policy::{MergePolicy, MergePolicyFactory};
use crate::core::tree::{NodeHandle, Tree};
use crate::error::{NomenError, Result};
use log::debug;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Per-level dissimilarity cutoffs, always held loosest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thresholds(Vec<f64>);

impl Thresholds {
    pub fn new(mut values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(NomenError::Config("at least one threshold is required".to_string()));
        }
        if let Some(bad) = values
            .iter()
            .find(|t| !t.is_finite() || **t < 0.0 || **t > 100.0)
        {
            return Err(NomenError::Config(format!(
                "threshold {} is outside [0, 100]",
                bad
            )));
        }
        values.sort_by(|a, b| b.total_cmp(a));
        Ok(Thresholds(values))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Number of naming levels.
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl FromStr for Thresholds {
    type Err = NomenError;

    /// Parses a comma separated list such as `"40,20,10,5"`.
    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| NomenError::Config(format!("invalid threshold '{}'", part.trim())))
            })
            .collect::<Result<Vec<f64>>>()?;
        Thresholds::new(values)
    }
}

impl fmt::Display for Thresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: Vec<String> = self.0.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", text.join(","))
    }
}

/// Outcome of one assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: Name,
    /// False for QC-failed samples, whose name is provisional
    pub resolved: bool,
    pub merges: usize,
}

/// Assigns names level by level, consulting a merge policy before joining
/// or bridging clusters.
pub struct Namer {
    thresholds: Thresholds,
    policy: Box<dyn MergePolicy>,
}

impl Namer {
    pub fn new(thresholds: Thresholds, policy: Box<dyn MergePolicy>) -> Self {
        Self { thresholds, policy }
    }

    /// Namer that always joins and merges.
    pub fn permissive(thresholds: Thresholds) -> Self {
        Self::new(thresholds, MergePolicyFactory::default())
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn policy(&self) -> &dyn MergePolicy {
        self.policy.as_ref()
    }

    /// Names `key` given its distances to the samples in `named`.
    ///
    /// `distances[i]` is the distance to `named[i]`. QC-failed samples only
    /// follow existing clusters: where they would need a new cluster or a
    /// merge, the remaining levels are left undefined. Their names are kept
    /// as provisional and the tree structure is not touched.
    pub fn assign<S: AsRef<str>>(
        &self,
        tree: &mut Tree,
        named: &[S],
        key: &str,
        distances: &[f64],
        qc_passed: bool,
    ) -> Result<Assignment> {
        if distances.len() != named.len() {
            return Err(NomenError::Config(format!(
                "{} distances given for {} named samples",
                distances.len(),
                named.len()
            )));
        }
        if tree.has_resolved_name(key) {
            return Err(NomenError::AlreadyNamed(key.to_string()));
        }
        let thresholds = self.thresholds.as_slice();
        if tree.depth() != thresholds.len() {
            return Err(NomenError::Config(format!(
                "tree depth {} does not match {} thresholds",
                tree.depth(),
                thresholds.len()
            )));
        }
        tree.drop_provisional(key);

        let depth = tree.depth();
        let by_key: HashMap<&str, f64> = named
            .iter()
            .map(|s| s.as_ref())
            .zip(distances.iter().copied())
            .collect();
        let mut pool: Vec<(&str, f64)> = named
            .iter()
            .map(|s| s.as_ref())
            .zip(distances.iter().copied())
            .filter(|(k, _)| tree.has_resolved_name(k))
            .collect();

        let mut node = tree.root();
        let mut name = Name::with_capacity(depth);
        let mut merges = 0;

        for (index, &threshold) in thresholds.iter().enumerate() {
            let level = index + 1;

            pool.retain(|&(_, d)| d <= threshold);
            let candidates: BTreeSet<i32> = pool
                .iter()
                .filter_map(|(k, _)| tree.names().get(*k).and_then(|n| n.at_level(level)))
                .collect();

            let next = match candidates.len() {
                0 => {
                    if !qc_passed {
                        return Ok(self.abandon(tree, key, name, merges));
                    }
                    pool.clear();
                    tree.new_child(node)
                }
                1 => {
                    let id = *candidates.iter().next().unwrap_or_else(|| unreachable!());
                    let child = self.cluster(tree, node, id);
                    let member_distances = self.member_distances(tree, &[child], &by_key)?;
                    if self.policy.accepts(&member_distances, threshold) {
                        child
                    } else if !qc_passed {
                        return Ok(self.abandon(tree, key, name, merges));
                    } else {
                        debug!("{}: policy rejected joining cluster {} at level {}", key, id, level);
                        pool.clear();
                        tree.new_child(node)
                    }
                }
                _ => {
                    if !qc_passed {
                        return Ok(self.abandon(tree, key, name, merges));
                    }
                    let ids: Vec<i32> = candidates.iter().copied().collect();
                    let handles: Vec<NodeHandle> =
                        ids.iter().map(|&id| self.cluster(tree, node, id)).collect();
                    let all_distances = self.member_distances(tree, &handles, &by_key)?;

                    if self.policy.accepts(&all_distances, threshold) {
                        debug!("{}: merging clusters {:?} at level {}", key, ids, level);
                        merges += 1;
                        tree.merge_nodes(node, &ids)
                    } else {
                        match self.cheapest_cluster(tree, &ids, &handles, &by_key, threshold)? {
                            Some(handle) => handle,
                            None => {
                                pool.clear();
                                tree.new_child(node)
                            }
                        }
                    }
                }
            };

            let id = tree.cluster_id(next);
            name.push(id);
            node = next;
            pool.retain(|(k, _)| tree.names().get(*k).and_then(|n| n.at_level(level)) == Some(id));
        }

        if !qc_passed {
            tree.set_provisional(key, name.clone());
            return Ok(Assignment {
                name,
                resolved: false,
                merges,
            });
        }

        assert!(tree.is_named_node(node), "descent for '{}' ended above the leaves", key);
        let address = tree.add_member(node, key);
        assert_eq!(address, name, "assigned name of '{}' does not match its node", key);
        tree.finalize_name(key, name.clone());

        Ok(Assignment {
            name,
            resolved: true,
            merges,
        })
    }

    fn abandon(&self, tree: &mut Tree, key: &str, mut name: Name, merges: usize) -> Assignment {
        name.fill_undefined(tree.depth());
        tree.set_provisional(key, name.clone());
        Assignment {
            name,
            resolved: false,
            merges,
        }
    }

    fn cluster(&self, tree: &Tree, parent: NodeHandle, id: i32) -> NodeHandle {
        tree.child(parent, id)
            .unwrap_or_else(|| panic!("candidate cluster {} missing from the tree", id))
    }

    /// Distances from the new sample to every named member of `clusters`.
    fn member_distances(
        &self,
        tree: &Tree,
        clusters: &[NodeHandle],
        by_key: &HashMap<&str, f64>,
    ) -> Result<Vec<f64>> {
        if !self.policy.needs_distances() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for &cluster in clusters {
            for member in tree.named_keys(cluster) {
                let d = by_key.get(member).copied().ok_or_else(|| {
                    NomenError::Integrity(format!("no distance given to named sample '{}'", member))
                })?;
                out.push(d);
            }
        }
        Ok(out)
    }

    /// Lowest-cost acceptable cluster, lowest ID on ties.
    fn cheapest_cluster(
        &self,
        tree: &Tree,
        ids: &[i32],
        handles: &[NodeHandle],
        by_key: &HashMap<&str, f64>,
        threshold: f64,
    ) -> Result<Option<NodeHandle>> {
        let mut best: Option<(f64, i32, NodeHandle)> = None;
        for (&id, &handle) in ids.iter().zip(handles) {
            let distances = self.member_distances(tree, &[handle], by_key)?;
            if !self.policy.accepts(&distances, threshold) {
                continue;
            }
            let cost = self.policy.cost(&distances, threshold);
            let better = match best {
                None => true,
                Some((best_cost, best_id, _)) => cost < best_cost || (cost == best_cost && id < best_id),
            };
            if better {
                best = Some((cost, id, handle));
            }
        }
        Ok(best.map(|(_, _, handle)| handle))
    }
}

/// Assigns a name with the permissive policy.
pub fn assign_name<S: AsRef<str>>(
    tree: &mut Tree,
    named: &[S],
    key: &str,
    distances: &[f64],
    thresholds: &[f64],
    qc_passed: bool,
) -> Result<Assignment> {
    let namer = Namer::permissive(Thresholds::new(thresholds.to_vec())?);
    namer.assign(tree, named, key, distances, qc_passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::distance::distance;
    use crate::core::name::UNDEFINED;
    use std::collections::BTreeMap;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn tree_of(depth: usize, entries: &[(&str, &str)]) -> Tree {
        let names: BTreeMap<String, Name> = entries
            .iter()
            .map(|(k, n)| (k.to_string(), name(n)))
            .collect();
        Tree::from_names(depth, &names).unwrap()
    }

    /// Names profiles in order, distances computed against everything named so far.
    fn name_all(tree: &mut Tree, namer: &Namer, profiles: &[(&str, Vec<i32>)]) -> Vec<Name> {
        let mut named: Vec<String> = Vec::new();
        let mut calls: Vec<&Vec<i32>> = Vec::new();
        let mut out = Vec::new();
        for (key, profile) in profiles {
            let distances: Vec<f64> = calls.iter().map(|p| distance(profile, p)).collect();
            let assignment = namer.assign(tree, &named, key, &distances, true).unwrap();
            named.push(key.to_string());
            calls.push(profile);
            out.push(assignment.name);
        }
        out
    }

    #[test]
    fn test_thresholds_sorted_and_validated() {
        let t = Thresholds::new(vec![10.0, 50.0, 25.0]).unwrap();
        assert_eq!(t.as_slice(), &[50.0, 25.0, 10.0]);
        assert!(Thresholds::new(vec![]).is_err());
        assert!(Thresholds::new(vec![120.0]).is_err());
        let parsed: Thresholds = "5, 20,10".parse().unwrap();
        assert_eq!(parsed.as_slice(), &[20.0, 10.0, 5.0]);
        assert_eq!(parsed.to_string(), "20,10,5");
        assert!("5,x".parse::<Thresholds>().is_err());
    }

    #[test]
    fn test_first_sample_gets_all_ones() {
        let mut tree = Tree::new(4);
        let named: Vec<String> = Vec::new();
        let result = assign_name(&mut tree, &named, "S1", &[], &[40.0, 20.0, 10.0, 5.0], true).unwrap();
        assert_eq!(result.name, name("1.1.1.1"));
        assert!(result.resolved);
        assert_eq!(tree.get_name("S1"), Some(&name("1.1.1.1")));
    }

    #[test]
    fn test_scenario_identical_then_distant() {
        let namer = Namer::permissive(Thresholds::new(vec![50.0, 10.0]).unwrap());
        let mut tree = Tree::new(2);
        let p1 = vec![1; 10];
        let p2 = vec![1; 10];
        let mut p3 = vec![1; 10];
        p3[0] = 2;
        p3[1] = 2;

        let names = name_all(&mut tree, &namer, &[("P1", p1), ("P2", p2), ("P3", p3)]);
        assert_eq!(names, vec![name("1.1"), name("1.1"), name("1.2")]);
    }

    #[test]
    fn test_bridging_sample_merges_top_level() {
        let namer = Namer::permissive(Thresholds::new(vec![50.0, 10.0]).unwrap());
        let mut tree = Tree::new(2);
        let a = vec![1; 10];
        let b = vec![2, 2, 2, 2, 2, 2, 1, 1, 1, 1];
        let bridge = vec![2, 2, 2, 1, 1, 1, 1, 1, 1, 1];

        let names = name_all(&mut tree, &namer, &[("A", a), ("B", b), ("P4", bridge)]);
        assert_eq!(names[0], name("1.1"));
        assert_eq!(names[1], name("2.1"));
        assert_eq!(names[2], name("1.3"));

        assert_eq!(tree.children(tree.root()).len(), 1);
        assert_eq!(tree.get_name("B"), Some(&name("1.2")));
        assert_eq!(tree.history().len(), 1);
        assert_eq!(tree.history().events()[0].old, name("2.1"));
    }

    #[test]
    fn test_shared_prefix_matches_thresholds_without_merges() {
        let thresholds = [50.0, 20.0];
        let namer = Namer::permissive(Thresholds::new(thresholds.to_vec()).unwrap());
        let mut tree = Tree::new(2);
        let profiles = vec![
            ("p0", vec![1; 10]),
            ("p1", vec![1, 1, 1, 1, 1, 1, 1, 1, 1, 2]),
            ("p2", vec![1, 1, 1, 1, 1, 1, 1, 3, 3, 3]),
            ("p3", vec![1, 1, 1, 1, 1, 1, 1, 3, 3, 4]),
            ("p4", vec![5; 10]),
            ("p5", vec![5, 5, 5, 5, 5, 5, 5, 5, 5, 6]),
        ];

        let names = name_all(&mut tree, &namer, &profiles);
        let expected: Vec<Name> = ["1.1", "1.1", "1.2", "1.2", "2.1", "2.1"]
            .iter()
            .map(|n| name(n))
            .collect();
        assert_eq!(names, expected);
        assert!(tree.history().is_empty());

        for i in 0..profiles.len() {
            for j in i + 1..profiles.len() {
                let d = distance(&profiles[i].1, &profiles[j].1);
                let shared = names[i].common_prefix_len(&names[j]);
                for (level, &threshold) in thresholds.iter().enumerate() {
                    assert_eq!(
                        level < shared,
                        d <= threshold,
                        "{} and {} at distance {} share {} levels",
                        profiles[i].0,
                        profiles[j].0,
                        d,
                        shared
                    );
                }
            }
        }
    }

    #[test]
    fn test_idempotent_lookup() {
        let mut tree = Tree::new(2);
        let named: Vec<String> = Vec::new();
        let first = assign_name(&mut tree, &named, "S1", &[], &[50.0, 10.0], true).unwrap();
        assert_eq!(tree.get_name("S1"), Some(&first.name));
        assert_eq!(tree.get_name("S1"), Some(&first.name));
    }

    #[test]
    fn test_qc_failed_needing_merge_is_undefined() {
        let mut tree = tree_of(2, &[("A", "1.1"), ("B", "2.1")]);
        let named = vec!["A", "B"];
        let result = assign_name(&mut tree, &named, "Q", &[30.0, 30.0], &[50.0, 10.0], false).unwrap();

        assert_eq!(result.name.parts(), &[UNDEFINED, UNDEFINED]);
        assert!(!result.resolved);
        assert!(!tree.has_resolved_name("Q"));
        assert!(tree.has_name("Q"));
        assert_eq!(tree.children(tree.root()).len(), 2);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_qc_failed_follows_existing_clusters_only() {
        let mut tree = tree_of(3, &[("A", "1.1.1")]);
        let named = vec!["A"];
        let result =
            assign_name(&mut tree, &named, "Q", &[15.0], &[50.0, 20.0, 10.0], false).unwrap();
        assert_eq!(result.name.parts(), &[1, 1, UNDEFINED]);
        assert_eq!(tree.named_count(tree.root()), 1);

        // the provisional name never joins the candidate pool
        let named = vec!["A", "Q"];
        let next = assign_name(&mut tree, &named, "R", &[60.0, 0.0], &[50.0, 20.0, 10.0], true).unwrap();
        assert_eq!(next.name, name("2.1.1"));
    }

    #[test]
    fn test_qc_failed_can_be_renamed_after_passing() {
        let mut tree = tree_of(2, &[("A", "1.1")]);
        let named = vec!["A"];
        assign_name(&mut tree, &named, "Q", &[80.0], &[50.0, 10.0], false).unwrap();
        let result = assign_name(&mut tree, &named, "Q", &[80.0], &[50.0, 10.0], true).unwrap();
        assert_eq!(result.name, name("2.1"));
        assert!(tree.provisional_names().is_empty());
    }

    #[test]
    fn test_precondition_errors() {
        let mut tree = tree_of(2, &[("A", "1.1")]);
        let named = vec!["A"];
        assert!(matches!(
            assign_name(&mut tree, &named, "X", &[], &[50.0, 10.0], true),
            Err(NomenError::Config(_))
        ));
        assert!(matches!(
            assign_name(&mut tree, &named, "A", &[0.0], &[50.0, 10.0], true),
            Err(NomenError::AlreadyNamed(_))
        ));
        assert!(matches!(
            assign_name(&mut tree, &named, "X", &[0.0], &[50.0], true),
            Err(NomenError::Config(_))
        ));
    }

    #[test]
    fn test_margin_policy_rejects_loose_join() {
        let thresholds = Thresholds::new(vec![50.0, 10.0]).unwrap();
        let policy = MergePolicyFactory::create("margin", "margin=0.1").unwrap();
        let namer = Namer::new(thresholds.clone(), policy);
        let mut tree = tree_of(2, &[("A", "1.1"), ("A2", "1.2")]);
        let named = vec!["A", "A2"];
        let result = namer.assign(&mut tree, &named, "S", &[40.0, 60.0], true).unwrap();
        assert_eq!(result.name, name("2.1"));

        let mut tree = tree_of(2, &[("A", "1.1"), ("A2", "1.2")]);
        let result = Namer::permissive(thresholds)
            .assign(&mut tree, &named, "S", &[40.0, 60.0], true)
            .unwrap();
        assert_eq!(result.name, name("1.3"));
    }

    #[test]
    fn test_margin_policy_picks_cheapest_cluster_instead_of_merging() {
        let thresholds = Thresholds::new(vec![50.0, 10.0]).unwrap();
        let namer = Namer::new(thresholds, MergePolicyFactory::create("margin", "").unwrap());
        let mut tree = tree_of(2, &[("A", "1.1"), ("A2", "1.2"), ("B", "2.1")]);
        let named = vec!["A", "A2", "B"];
        let result = namer.assign(&mut tree, &named, "S", &[30.0, 58.0, 30.0], true).unwrap();

        assert_eq!(result.merges, 0);
        assert_eq!(result.name, name("2.2"));
        assert_eq!(tree.children(tree.root()).len(), 2);
    }

    #[test]
    fn test_missing_member_distance_is_integrity_error() {
        let thresholds = Thresholds::new(vec![50.0, 10.0]).unwrap();
        let namer = Namer::new(thresholds, MergePolicyFactory::create("margin", "").unwrap());
        let mut tree = tree_of(2, &[("A", "1.1"), ("A2", "1.2")]);
        let named = vec!["A"];
        assert!(matches!(
            namer.assign(&mut tree, &named, "S", &[5.0], true),
            Err(NomenError::Integrity(_))
        ));
    }

    #[test]
    fn test_every_name_reachable_after_growth() {
        let namer = Namer::permissive(Thresholds::new(vec![60.0, 30.0, 10.0]).unwrap());
        let mut tree = Tree::new(3);
        let profiles: Vec<(String, Vec<i32>)> = (0..12)
            .map(|i| {
                let profile: Vec<i32> = (0..10).map(|l| if l < i % 7 { 2 + (i % 3) } else { 1 }).collect();
                (format!("S{}", i), profile)
            })
            .collect();
        let refs: Vec<(&str, Vec<i32>)> = profiles.iter().map(|(k, p)| (k.as_str(), p.clone())).collect();
        name_all(&mut tree, &namer, &refs);

        assert_eq!(tree.len(), 12);
        for (key, n) in tree.names() {
            assert!(n.is_resolved());
            let node = tree.traverse(n.parts()).unwrap();
            assert!(tree.members(node).unwrap().contains(key));
        }
    }
}
