//! Fetch planning
//!
//! Decides, for a request that missed the cache, what constraint to send to
//! the server, which variables the response will satisfy, and the projection
//! the extraction walker should apply to it.

use std::fmt;

use dapfetch_core::{
    restrict_projections, Constraint, PolicyConfig, Projection, SchemaNodeId, SchemaProvider,
};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Served from a cache node, no fetch
    Cached,
    /// Server ignores constraints: fetch everything
    FetchWhole,
    /// Fetch the whole variable (or its coalesced container) and keep it
    FetchVar,
    /// Fetch exactly the requested window
    FetchPart,
}

impl FetchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchState::Cached => "cached",
            FetchState::FetchWhole => "fetch_whole",
            FetchState::FetchVar => "fetch_var",
            FetchState::FetchPart => "fetch_part",
        }
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of planning one request
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub state: FetchState,
    /// Constraint to send; `None` means an unconstrained fetch
    pub constraint: Option<Constraint>,
    /// Variables the response will satisfy
    pub vars: Vec<SchemaNodeId>,
    /// Whether the response will hold whole variables only
    pub whole_variable: bool,
    /// Projection the walker applies to the response
    pub walk: Projection,
}

impl FetchPlan {
    /// Plan for a request answered by a cache node holding whole variables
    pub fn cached(vara: &Projection) -> Self {
        Self {
            state: FetchState::Cached,
            constraint: None,
            vars: vec![vara.target],
            whole_variable: true,
            walk: vara.clone(),
        }
    }
}

pub struct ProjectionPlanner<'a> {
    schema: &'a dyn SchemaProvider,
    policy: &'a PolicyConfig,
    url_constraint: &'a Constraint,
    constrainable: bool,
}

impl<'a> ProjectionPlanner<'a> {
    pub fn new(
        schema: &'a dyn SchemaProvider,
        policy: &'a PolicyConfig,
        url_constraint: &'a Constraint,
        constrainable: bool,
    ) -> Self {
        Self {
            schema,
            policy,
            url_constraint,
            constrainable,
        }
    }

    /// Fetch state for a request that missed the cache
    pub fn select_state(&self) -> FetchState {
        if !self.constrainable {
            FetchState::FetchWhole
        } else if self.policy.whole_var && self.policy.cache {
            FetchState::FetchVar
        } else {
            FetchState::FetchPart
        }
    }

    /// Plan the fetch for `vara`, the full-rank projection of one request
    pub fn plan(&self, vara: &Projection) -> Result<FetchPlan> {
        let plan = match self.select_state() {
            FetchState::FetchWhole => self.plan_whole(vara),
            FetchState::FetchVar => self.plan_var(vara),
            FetchState::FetchPart => self.plan_part(vara)?,
            FetchState::Cached => FetchPlan::cached(vara),
        };
        tracing::debug!(
            state = %plan.state,
            vars = plan.vars.len(),
            whole = plan.whole_variable,
            "Planned fetch"
        );
        Ok(plan)
    }

    fn plan_whole(&self, vara: &Projection) -> FetchPlan {
        FetchPlan {
            state: FetchState::FetchWhole,
            constraint: None,
            vars: self.schema.leaves(),
            whole_variable: true,
            walk: vara.clone(),
        }
    }

    fn plan_var(&self, vara: &Projection) -> FetchPlan {
        let projections: Vec<Projection> =
            restrict_projections(self.schema, &[vara.target], &self.url_constraint.projections)
                .iter()
                .map(|p| p.to_whole(self.schema).remove_pseudo_dims(self.schema))
                .collect();
        let vars = self.covered_leaves(&projections);
        let constraint = Constraint::new(projections, self.url_constraint.selections.clone());
        FetchPlan {
            state: FetchState::FetchVar,
            whole_variable: constraint.is_whole_constraint(),
            constraint: Some(constraint),
            vars,
            walk: vara.clone(),
        }
    }

    fn plan_part(&self, vara: &Projection) -> Result<FetchPlan> {
        let requested = vara.remove_pseudo_dims(self.schema);
        let fetched = match self
            .url_constraint
            .projections
            .iter()
            .find(|p| p.target == vara.target)
        {
            Some(outstanding) => {
                let mut merged = outstanding.remove_pseudo_dims(self.schema);
                merged.merge(&requested)?;
                merged
            }
            None => requested,
        };
        let walk = vara.rebase_onto(self.schema, &fetched)?;
        let constraint = Constraint::new(vec![fetched], self.url_constraint.selections.clone());
        Ok(FetchPlan {
            state: FetchState::FetchPart,
            whole_variable: constraint.is_whole_constraint(),
            constraint: Some(constraint),
            vars: vec![vara.target],
            walk,
        })
    }

    /// Plan the connection-open bulk fetch of small variables. `None` when no
    /// variable qualifies.
    pub fn plan_prefetch(&self) -> Option<(Constraint, Vec<SchemaNodeId>)> {
        let small: Vec<SchemaNodeId> = self
            .schema
            .leaves()
            .into_iter()
            .filter(|v| !self.schema.inside_sequence(*v))
            .filter(|v| {
                let size = self.schema.estimated_size(*v);
                size > 0 && size <= self.policy.small_size_limit
            })
            .collect();
        if small.is_empty() {
            return None;
        }
        let projections: Vec<Projection> = restrict_projections(self.schema, &small, &[])
            .iter()
            .map(|p| p.remove_pseudo_dims(self.schema))
            .collect();
        tracing::debug!(vars = small.len(), projections = projections.len(), "Planned prefetch");
        let constraint = Constraint::new(projections, self.url_constraint.selections.clone());
        Some((constraint, small))
    }

    /// Atomic variables reachable under any of `projections`; every leaf when
    /// the list is empty.
    fn covered_leaves(&self, projections: &[Projection]) -> Vec<SchemaNodeId> {
        if projections.is_empty() {
            return self.schema.leaves();
        }
        let mut vars: Vec<SchemaNodeId> = projections
            .iter()
            .flat_map(|p| self.schema.leaves_under(p.target))
            .collect();
        vars.sort();
        vars.dedup();
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dapfetch_core::{build_vara_projection, AtomicType, Dimension, SchemaTree, Selection};

    struct Fixture {
        tree: SchemaTree,
        a: SchemaNodeId,
        b: SchemaNodeId,
        x: SchemaNodeId,
    }

    fn fixture() -> Fixture {
        let mut tree = SchemaTree::new("ds");
        let root = tree.root();
        let rec = tree.add_structure(root, "rec", vec![]);
        let a = tree.add_atomic(rec, "a", AtomicType::Int, vec![Dimension::new("n", 10)], 0);
        let b = tree.add_atomic(rec, "b", AtomicType::Int, vec![Dimension::new("n", 10)], 0);
        let x = tree.add_atomic(root, "x", AtomicType::Double, vec![Dimension::new("m", 100_000)], 0);
        Fixture { tree, a, b, x }
    }

    #[test]
    fn test_select_state() {
        let f = fixture();
        let url = Constraint::default();
        let policy = PolicyConfig::default();
        assert_eq!(ProjectionPlanner::new(&f.tree, &policy, &url, true).select_state(), FetchState::FetchVar);
        assert_eq!(ProjectionPlanner::new(&f.tree, &policy, &url, false).select_state(), FetchState::FetchWhole);
        let uncached = PolicyConfig::uncached();
        assert_eq!(ProjectionPlanner::new(&f.tree, &uncached, &url, true).select_state(), FetchState::FetchPart);
    }

    #[test]
    fn test_fetch_var_is_whole() {
        let f = fixture();
        let url = Constraint::default();
        let policy = PolicyConfig::default();
        let planner = ProjectionPlanner::new(&f.tree, &policy, &url, true);
        let vara = build_vara_projection(&f.tree, f.x, &[5], &[10], &[1]).unwrap();
        let plan = planner.plan(&vara).unwrap();
        assert_eq!(plan.state, FetchState::FetchVar);
        assert!(plan.whole_variable);
        assert_eq!(plan.vars, vec![f.x]);
        assert_eq!(plan.walk, vara);
    }

    #[test]
    fn test_fetch_var_forwards_selections() {
        let f = fixture();
        let url = Constraint::new(vec![], vec![Selection("x>0".to_string())]);
        let policy = PolicyConfig::default();
        let planner = ProjectionPlanner::new(&f.tree, &policy, &url, true);
        let vara = build_vara_projection(&f.tree, f.a, &[0], &[10], &[1]).unwrap();
        let plan = planner.plan(&vara).unwrap();
        let constraint = plan.constraint.unwrap();
        assert_eq!(constraint.selections.len(), 1);
        assert!(!plan.whole_variable);
    }

    #[test]
    fn test_fetch_part_rebases_walk() {
        let f = fixture();
        let url = Constraint::default();
        let policy = PolicyConfig::uncached();
        let planner = ProjectionPlanner::new(&f.tree, &policy, &url, true);
        let vara = build_vara_projection(&f.tree, f.a, &[2], &[3], &[1]).unwrap();
        let plan = planner.plan(&vara).unwrap();
        assert_eq!(plan.state, FetchState::FetchPart);
        assert!(!plan.whole_variable);
        let walk = plan.walk.segment_for(f.a).unwrap().slices[0];
        assert_eq!((walk.first, walk.stride, walk.stop, walk.declared_size), (0, 1, 3, 3));
    }

    #[test]
    fn test_fetch_part_merges_url_projection() {
        let f = fixture();
        let outstanding = build_vara_projection(&f.tree, f.a, &[0], &[4], &[1]).unwrap();
        let url = Constraint::new(vec![outstanding], vec![]);
        let policy = PolicyConfig::uncached();
        let planner = ProjectionPlanner::new(&f.tree, &policy, &url, true);
        let vara = build_vara_projection(&f.tree, f.a, &[2], &[4], &[1]).unwrap();
        let plan = planner.plan(&vara).unwrap();
        let sent = plan.constraint.unwrap().projections[0].segment_for(f.a).unwrap().slices[0];
        assert_eq!((sent.first, sent.stop), (0, 6));
        let walk = plan.walk.segment_for(f.a).unwrap().slices[0];
        assert_eq!((walk.first, walk.stop, walk.declared_size), (2, 6, 6));
    }

    #[test]
    fn test_prefetch_selects_small_vars() {
        let f = fixture();
        let url = Constraint::default();
        let policy = PolicyConfig::default().with_small_size_limit(1024);
        let planner = ProjectionPlanner::new(&f.tree, &policy, &url, true);
        let (constraint, vars) = planner.plan_prefetch().unwrap();
        assert_eq!(vars, vec![f.a, f.b]);
        assert_eq!(constraint.projections.len(), 1);

        let tiny = PolicyConfig::default().with_small_size_limit(1);
        assert!(ProjectionPlanner::new(&f.tree, &tiny, &url, true).plan_prefetch().is_none());
    }
}
