//! Subgraph Queries
//!
//! The read side of the engine. A [`ContentSubgraph`] is the tree visible
//! from one (content stream, dimension point) pair under a set of
//! visibility constraints; all traversal operations live on it.
//!
//! Visibility is tag-based: a node whose edge carries an effective tag
//! listed in the constraints is invisible, and so is its whole subtree.
//! Because inherited tags are materialized on every edge, each operation
//! only has to check the edge at hand.
//!
//! A dangling edge (an anchor with no node row) hides the branch below it
//! instead of failing the query.

use crate::db::database::DatabaseService;
use crate::db::graph_store::GraphStore;
use crate::models::dimension::{
    DimensionSpacePoint, DimensionSpacePointHash, OriginDimensionSpacePoint,
};
use crate::models::node::{
    NodeAggregateId, NodeClassification, NodeName, NodeRecord, NodeTypeName, RelationAnchorPoint,
};
use crate::models::relation::HierarchyRelation;
use crate::models::stream::ContentStreamId;
use crate::models::tags::{SubtreeTag, SubtreeTags};
use crate::query::error::QueryError;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Tag-based read filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityConstraints {
    excluded_tags: BTreeSet<SubtreeTag>,
}

impl VisibilityConstraints {
    /// See everything, including tagged subtrees.
    pub fn none() -> Self {
        Self::default()
    }

    /// Exclude nodes whose effective tags intersect the given set.
    pub fn excluding<I: IntoIterator<Item = SubtreeTag>>(tags: I) -> Self {
        Self {
            excluded_tags: tags.into_iter().collect(),
        }
    }

    pub fn excludes(&self, tags: &SubtreeTags) -> bool {
        !self.excluded_tags.is_empty() && tags.intersects(&self.excluded_tags)
    }
}

/// One node as seen through a subgraph: the row joined with its edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub aggregate_id: NodeAggregateId,
    pub anchor: RelationAnchorPoint,
    pub node_type: NodeTypeName,
    pub classification: NodeClassification,
    pub name: Option<NodeName>,
    pub origin: OriginDimensionSpacePoint,
    pub properties: serde_json::Value,
    pub tags: SubtreeTags,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Node {
    fn from_parts(record: NodeRecord, relation: &HierarchyRelation) -> Self {
        Self {
            aggregate_id: record.aggregate_id,
            anchor: record.anchor,
            node_type: record.node_type,
            classification: record.classification,
            name: relation.name.clone(),
            origin: record.origin,
            properties: record.properties,
            tags: relation.subtree_tags.clone(),
            created_at: record.created_at,
            modified_at: record.modified_at,
        }
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }
}

/// A subtree snapshot: a node and its visible children, recursively.
#[derive(Debug, Clone, PartialEq)]
pub struct Subtree {
    pub node: Node,
    pub children: Vec<Subtree>,
}

/// Entry point of the read side. Cheap to clone; every subgraph gets its
/// own connection.
#[derive(Clone)]
pub struct ContentGraph {
    db: Arc<DatabaseService>,
}

impl ContentGraph {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    /// Open the subgraph at one (stream, dimension point) pair.
    pub async fn subgraph(
        &self,
        content_stream_id: ContentStreamId,
        dimension_space_point: &DimensionSpacePoint,
        visibility: VisibilityConstraints,
    ) -> Result<ContentSubgraph, QueryError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(ContentSubgraph {
            store: GraphStore::new(conn),
            content_stream_id,
            dimension_space_point_hash: dimension_space_point.hash(),
            visibility,
        })
    }
}

/// All read operations over one (stream, dimension point, visibility)
/// triple.
pub struct ContentSubgraph {
    store: GraphStore,
    content_stream_id: ContentStreamId,
    dimension_space_point_hash: DimensionSpacePointHash,
    visibility: VisibilityConstraints,
}

impl ContentSubgraph {
    pub fn content_stream_id(&self) -> &ContentStreamId {
        &self.content_stream_id
    }

    pub fn dimension_space_point_hash(&self) -> &DimensionSpacePointHash {
        &self.dimension_space_point_hash
    }

    /// Look up a node by aggregate id. `None` when the aggregate is not
    /// linked here or is excluded by visibility.
    pub async fn find_node_by_id(
        &self,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Option<Node>, QueryError> {
        let relation = match self
            .store
            .relation_for_aggregate(
                &self.content_stream_id,
                &self.dimension_space_point_hash,
                aggregate_id,
            )
            .await?
        {
            Some(relation) => relation,
            None => return Ok(None),
        };
        self.materialize(&relation).await
    }

    /// The visible children of an aggregate, in sibling order.
    pub async fn find_child_nodes(
        &self,
        parent_id: &NodeAggregateId,
    ) -> Result<Vec<Node>, QueryError> {
        let parent_anchor = match self.anchor_of(parent_id).await? {
            Some(anchor) => anchor,
            None => return Ok(Vec::new()),
        };
        self.children_of_anchor(&parent_anchor).await
    }

    /// The parent of an aggregate. `None` for roots and invisible parents.
    pub async fn find_parent_node(
        &self,
        child_id: &NodeAggregateId,
    ) -> Result<Option<Node>, QueryError> {
        let relation = match self
            .store
            .relation_for_aggregate(
                &self.content_stream_id,
                &self.dimension_space_point_hash,
                child_id,
            )
            .await?
        {
            Some(relation) => relation,
            None => return Ok(None),
        };
        if relation.parent_anchor.is_root_sentinel() {
            return Ok(None);
        }
        let parent_relation = match self
            .store
            .parent_relation_of(
                &self.content_stream_id,
                &self.dimension_space_point_hash,
                &relation.parent_anchor,
            )
            .await?
        {
            Some(relation) => relation,
            None => return Ok(None),
        };
        self.materialize(&parent_relation).await
    }

    /// Visible siblings before the aggregate, closest first.
    pub async fn find_preceding_siblings(
        &self,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Vec<Node>, QueryError> {
        let (relation, siblings) = match self.siblings_around(aggregate_id).await? {
            Some(pair) => pair,
            None => return Ok(Vec::new()),
        };

        let mut preceding = Vec::new();
        for sibling in siblings
            .iter()
            .rev()
            .filter(|s| s.position < relation.position)
        {
            if let Some(node) = self.materialize(sibling).await? {
                preceding.push(node);
            }
        }
        Ok(preceding)
    }

    /// Visible siblings after the aggregate, closest first.
    pub async fn find_succeeding_siblings(
        &self,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Vec<Node>, QueryError> {
        let (relation, siblings) = match self.siblings_around(aggregate_id).await? {
            Some(pair) => pair,
            None => return Ok(Vec::new()),
        };

        let mut succeeding = Vec::new();
        for sibling in siblings.iter().filter(|s| s.position > relation.position) {
            if let Some(node) = self.materialize(sibling).await? {
                succeeding.push(node);
            }
        }
        Ok(succeeding)
    }

    /// All visible descendants, breadth-first. An invisible node hides its
    /// whole branch.
    pub async fn find_descendants(
        &self,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Vec<Node>, QueryError> {
        let start = match self.anchor_of(aggregate_id).await? {
            Some(anchor) => anchor,
            None => return Ok(Vec::new()),
        };

        let mut descendants = Vec::new();
        let mut frontier = VecDeque::from([start]);
        while let Some(anchor) = frontier.pop_front() {
            for node in self.children_of_anchor(&anchor).await? {
                frontier.push_back(node.anchor.clone());
                descendants.push(node);
            }
        }
        Ok(descendants)
    }

    /// The visible subtree below an aggregate as a nested snapshot.
    pub async fn find_subtree(
        &self,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Option<Subtree>, QueryError> {
        let root = match self.find_node_by_id(aggregate_id).await? {
            Some(node) => node,
            None => return Ok(None),
        };

        // One pass over the subgraph's edges, then assembly in memory.
        let relations = self
            .store
            .relations_at_hash(&self.content_stream_id, &self.dimension_space_point_hash)
            .await?;
        let mut by_parent: HashMap<RelationAnchorPoint, Vec<&HierarchyRelation>> = HashMap::new();
        for relation in &relations {
            by_parent
                .entry(relation.parent_anchor.clone())
                .or_default()
                .push(relation);
        }
        for children in by_parent.values_mut() {
            children.sort_by_key(|r| r.position);
        }

        let mut nodes: HashMap<RelationAnchorPoint, Node> = HashMap::new();
        for relation in &relations {
            if self.visibility.excludes(&relation.subtree_tags) {
                continue;
            }
            if let Some(record) = self.store.get_node(&relation.child_anchor).await? {
                nodes.insert(relation.child_anchor.clone(), Node::from_parts(record, relation));
            }
        }

        Ok(Some(Self::assemble_subtree(root, &by_parent, &nodes)))
    }

    fn assemble_subtree(
        node: Node,
        by_parent: &HashMap<RelationAnchorPoint, Vec<&HierarchyRelation>>,
        nodes: &HashMap<RelationAnchorPoint, Node>,
    ) -> Subtree {
        let children = by_parent
            .get(&node.anchor)
            .map(|relations| {
                relations
                    .iter()
                    .filter_map(|r| nodes.get(&r.child_anchor).cloned())
                    .map(|child| Self::assemble_subtree(child, by_parent, nodes))
                    .collect()
            })
            .unwrap_or_default();
        Subtree { node, children }
    }

    /// The visible child carrying the given edge name, if any.
    pub async fn find_named_child(
        &self,
        parent_id: &NodeAggregateId,
        name: &NodeName,
    ) -> Result<Option<Node>, QueryError> {
        let children = self.find_child_nodes(parent_id).await?;
        Ok(children
            .into_iter()
            .find(|child| child.name.as_ref() == Some(name)))
    }

    /// Follow named edges from an aggregate down a path of node names.
    pub async fn find_node_by_path(
        &self,
        start_id: &NodeAggregateId,
        path: &[NodeName],
    ) -> Result<Option<Node>, QueryError> {
        let mut current = match self.find_node_by_id(start_id).await? {
            Some(node) => node,
            None => return Ok(None),
        };

        for segment in path {
            let children = self.children_of_anchor(&current.anchor).await?;
            match children
                .into_iter()
                .find(|child| child.name.as_ref() == Some(segment))
            {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Targets of the aggregate's references, in reference order. Targets
    /// not visible in this subgraph are skipped.
    pub async fn find_references(
        &self,
        aggregate_id: &NodeAggregateId,
        reference_name: Option<&str>,
    ) -> Result<Vec<Node>, QueryError> {
        let anchor = match self.anchor_of(aggregate_id).await? {
            Some(anchor) => anchor,
            None => return Ok(Vec::new()),
        };

        let references = match reference_name {
            Some(name) => self.store.references_named(&anchor, name).await?,
            None => self.store.references_for_source(&anchor).await?,
        };

        let mut targets = Vec::new();
        for reference in references {
            if let Some(node) = self.find_node_by_id(&reference.target_aggregate_id).await? {
                targets.push(node);
            }
        }
        Ok(targets)
    }

    /// Nodes of this subgraph that reference the given aggregate.
    pub async fn find_back_references(
        &self,
        target_id: &NodeAggregateId,
    ) -> Result<Vec<Node>, QueryError> {
        let references = self.store.references_to_target(target_id).await?;

        let mut sources = Vec::new();
        for reference in references {
            // The source anchor must be linked into this subgraph.
            let relation = match self
                .store
                .parent_relation_of(
                    &self.content_stream_id,
                    &self.dimension_space_point_hash,
                    &reference.source_anchor,
                )
                .await?
            {
                Some(relation) => relation,
                None => continue,
            };
            if let Some(node) = self.materialize(&relation).await? {
                if !sources.iter().any(|n: &Node| n.anchor == node.anchor) {
                    sources.push(node);
                }
            }
        }
        Ok(sources)
    }

    /// Count the visible nodes of this subgraph.
    pub async fn count_nodes(&self) -> Result<u64, QueryError> {
        let mut count = 0u64;
        let mut frontier = vec![RelationAnchorPoint::root_sentinel()];
        while let Some(anchor) = frontier.pop() {
            for node in self.children_of_anchor(&anchor).await? {
                count += 1;
                frontier.push(node.anchor);
            }
        }
        Ok(count)
    }

    /// The single root aggregate of the given type, if any.
    pub async fn find_root_node_by_type(
        &self,
        node_type: &NodeTypeName,
    ) -> Result<Option<Node>, QueryError> {
        let sentinel = RelationAnchorPoint::root_sentinel();
        let roots = self
            .store
            .child_relations(
                &self.content_stream_id,
                &self.dimension_space_point_hash,
                &sentinel,
            )
            .await?;

        let mut matches = Vec::new();
        for relation in &roots {
            if let Some(node) = self.materialize(relation).await? {
                if &node.node_type == node_type {
                    matches.push(node);
                }
            }
        }

        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.remove(0))),
            count => Err(QueryError::AmbiguousRootAggregate {
                node_type: node_type.clone(),
                count,
            }),
        }
    }

    // === Internals ===

    async fn anchor_of(
        &self,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Option<RelationAnchorPoint>, QueryError> {
        let relation = self
            .store
            .relation_for_aggregate(
                &self.content_stream_id,
                &self.dimension_space_point_hash,
                aggregate_id,
            )
            .await?;
        match relation {
            Some(relation) if !self.visibility.excludes(&relation.subtree_tags) => {
                Ok(Some(relation.child_anchor))
            }
            _ => Ok(None),
        }
    }

    async fn children_of_anchor(
        &self,
        parent: &RelationAnchorPoint,
    ) -> Result<Vec<Node>, QueryError> {
        let relations = self
            .store
            .child_relations(
                &self.content_stream_id,
                &self.dimension_space_point_hash,
                parent,
            )
            .await?;

        let mut children = Vec::new();
        for relation in &relations {
            if let Some(node) = self.materialize(relation).await? {
                children.push(node);
            }
        }
        Ok(children)
    }

    /// Edge to visible node, or `None` when excluded or dangling.
    async fn materialize(
        &self,
        relation: &HierarchyRelation,
    ) -> Result<Option<Node>, QueryError> {
        if self.visibility.excludes(&relation.subtree_tags) {
            return Ok(None);
        }
        match self.store.get_node(&relation.child_anchor).await? {
            Some(record) => Ok(Some(Node::from_parts(record, relation))),
            None => Ok(None),
        }
    }

    /// The aggregate's own edge plus the full ordered sibling list under its
    /// parent.
    async fn siblings_around(
        &self,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Option<(HierarchyRelation, Vec<HierarchyRelation>)>, QueryError> {
        let relation = match self
            .store
            .relation_for_aggregate(
                &self.content_stream_id,
                &self.dimension_space_point_hash,
                aggregate_id,
            )
            .await?
        {
            Some(relation) => relation,
            None => return Ok(None),
        };
        let siblings = self
            .store
            .child_relations(
                &self.content_stream_id,
                &self.dimension_space_point_hash,
                &relation.parent_anchor,
            )
            .await?;
        Ok(Some((relation, siblings)))
    }
}

#[cfg(test)]
#[path = "subgraph_test.rs"]
mod subgraph_test;
