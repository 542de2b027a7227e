//! Request orchestration
//!
//! [`CacheCoordinator`] answers `get_vara` requests: it serves them from the
//! cache when a whole-variable response is retained, otherwise plans a fetch,
//! runs it through the [`RemoteFetch`] collaborator and admits the response.

use std::time::Instant;

use dapfetch_core::convert::check_conversion;
use dapfetch_core::{
    build_vara_projection, AtomicType, Constraint, ConstraintRenderer, DapRenderer, PolicyConfig,
    SchemaNodeId, SchemaProvider, SchemaTree,
};

use crate::cache::{CacheNode, CacheStats, CacheStore};
use crate::metrics;
use crate::planner::ProjectionPlanner;
use crate::remote::{FetchKind, RemoteFetch};
use crate::walker::extract;
use crate::{Error, Result};

const PREFETCH_LABEL: &str = "prefetch";

/// Builder for [`CacheCoordinator`]
pub struct CoordinatorBuilder<R, S = SchemaTree> {
    remote: R,
    schema: S,
    policy: PolicyConfig,
    url_constraint: Constraint,
    renderer: Box<dyn ConstraintRenderer>,
}

impl<R: RemoteFetch, S: SchemaProvider> CoordinatorBuilder<R, S> {
    pub fn new(remote: R, schema: S) -> Self {
        Self {
            remote,
            schema,
            policy: PolicyConfig::default(),
            url_constraint: Constraint::default(),
            renderer: Box::new(DapRenderer),
        }
    }

    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Projections and selections given with the dataset URL
    pub fn url_constraint(mut self, constraint: Constraint) -> Self {
        self.url_constraint = constraint;
        self
    }

    pub fn renderer(mut self, renderer: impl ConstraintRenderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    /// Build the coordinator, running the small-variable prefetch when the
    /// policy asks for it.
    pub fn build(self) -> Result<CacheCoordinator<R, S>> {
        let count_limit = if self.policy.cache {
            self.policy.cache_count_limit
        } else {
            0
        };
        let mut coordinator = CacheCoordinator {
            cache: CacheStore::new(self.policy.cache_size_limit, count_limit),
            remote: self.remote,
            schema: self.schema,
            policy: self.policy,
            url_constraint: self.url_constraint,
            renderer: self.renderer,
        };
        if coordinator.policy.prefetch && coordinator.policy.cache {
            coordinator.prefetch()?;
        }
        Ok(coordinator)
    }
}

/// Caching front end over one remote dataset
pub struct CacheCoordinator<R, S = SchemaTree> {
    remote: R,
    schema: S,
    policy: PolicyConfig,
    url_constraint: Constraint,
    renderer: Box<dyn ConstraintRenderer>,
    cache: CacheStore,
}

impl<R: RemoteFetch, S: SchemaProvider> CacheCoordinator<R, S> {
    /// Read the hyperslab `start`/`count`/`stride` of `target` into `out` as
    /// `dst_type` values, row-major.
    ///
    /// Coordinates cover every dimension on the path from the dataset to
    /// `target`, outermost first, including sequence record axes and the
    /// character axis of string variables.
    ///
    /// Nothing is fetched or cached when the request is invalid, and a failed
    /// fetch or extraction leaves the cache as it was.
    pub fn get_vara(
        &mut self,
        target: SchemaNodeId,
        start: &[usize],
        count: &[usize],
        stride: &[usize],
        dst_type: AtomicType,
        out: &mut [u8],
    ) -> Result<()> {
        let src_type = self
            .schema
            .element_type(target)
            .ok_or_else(|| Error::NotALeaf(self.schema.full_name(target)))?;
        check_conversion(src_type, dst_type)?;
        let vara = build_vara_projection(&self.schema, target, start, count, stride)?;

        let elements = vara.element_count();
        let needed = elements * dst_type.size_of();
        if out.len() < needed {
            return Err(Error::OutputTooSmall {
                needed,
                available: out.len(),
            });
        }
        if elements == 0 {
            tracing::debug!(var = %self.schema.full_name(target), "Empty request");
            return Ok(());
        }

        let fill_char = self.policy.fill_char;
        if let Some(node) = self.cache.lookup(target) {
            extract(&self.schema, node.tree(), &vara, dst_type, fill_char, out)?;
            return Ok(());
        }

        let plan = ProjectionPlanner::new(
            &self.schema,
            &self.policy,
            &self.url_constraint,
            self.remote.is_constrainable(),
        )
        .plan(&vara)?;
        let node = self.fetch_node(
            plan.state.as_str(),
            plan.constraint,
            plan.vars,
            plan.whole_variable,
        )?;
        extract(&self.schema, node.tree(), &plan.walk, dst_type, fill_char, out)?;
        self.cache.admit(node);
        Ok(())
    }

    /// [`get_vara`](Self::get_vara) addressing the variable by dotted path
    pub fn get_vara_by_name(
        &mut self,
        path: &str,
        start: &[usize],
        count: &[usize],
        stride: &[usize],
        dst_type: AtomicType,
        out: &mut [u8],
    ) -> Result<()> {
        let target = self.schema.find(path)?;
        self.get_vara(target, start, count, stride, dst_type, out)
    }

    /// Fetch every small variable in one request and install the response
    /// as the prefetch node. Replaces any previous prefetch node.
    pub fn prefetch(&mut self) -> Result<()> {
        let planned = ProjectionPlanner::new(
            &self.schema,
            &self.policy,
            &self.url_constraint,
            self.remote.is_constrainable(),
        )
        .plan_prefetch();
        let Some((constraint, vars)) = planned else {
            tracing::debug!(limit = self.policy.small_size_limit, "No variables small enough to prefetch");
            return Ok(());
        };
        let whole = constraint.is_whole_constraint();
        let constraint = if self.remote.is_constrainable() {
            Some(constraint)
        } else {
            None
        };
        let node = self.fetch_node(PREFETCH_LABEL, constraint, vars, whole)?;
        self.cache.set_prefetch(node);
        Ok(())
    }

    fn fetch_node(
        &mut self,
        label: &str,
        constraint: Option<Constraint>,
        vars: Vec<SchemaNodeId>,
        whole_variable: bool,
    ) -> Result<CacheNode> {
        let rendered = constraint
            .as_ref()
            .map(|c| self.renderer.render(&self.schema, c));
        tracing::debug!(state = label, constraint = rendered.as_deref().unwrap_or(""), "Fetching");

        let started = Instant::now();
        let tree = match self.remote.fetch(rendered.as_deref(), FetchKind::SchemaAndData) {
            Ok(tree) => tree,
            Err(e) => {
                metrics::record_fetch_error(label);
                tracing::warn!(state = label, error = %e, "Fetch failed");
                return Err(e.into());
            }
        };
        let bytes = tree.payload_byte_size();
        metrics::record_fetch(label, bytes, started.elapsed());
        tracing::info!(
            state = label,
            constraint = rendered.as_deref().unwrap_or(""),
            bytes,
            vars = vars.len(),
            "Fetched"
        );
        Ok(CacheNode::new(tree, constraint.unwrap_or_default(), vars, whole_variable))
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every retained response, prefetch included
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn url_constraint(&self) -> &Constraint {
        &self.url_constraint
    }
}
