//! Structural Integrity Checker
//!
//! Validates the projected graph against its structural invariants and
//! reports findings. Violations are diagnostics, not errors: a routine
//! maintenance run over a healthy graph returns an empty list, and a broken
//! graph yields one finding per violated invariant instance so an operator
//! can decide what to repair.
//!
//! The checker loads the whole graph into memory. It is an offline tool,
//! not a hot-path guard.

use crate::db::error::DatabaseError;
use crate::db::graph_store::GraphStore;
use crate::models::dimension::DimensionSpacePointHash;
use crate::models::node::{NodeAggregateId, NodeRecord, RelationAnchorPoint};
use crate::models::relation::{HierarchyRelation, ReferenceRelation};
use crate::models::stream::ContentStreamId;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// One reported invariant violation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrityViolation {
    #[error("Edge child anchor {anchor} in stream {stream} at {hash} has no node row")]
    DanglingChildAnchor {
        stream: ContentStreamId,
        hash: DimensionSpacePointHash,
        anchor: RelationAnchorPoint,
    },

    #[error("Edge parent anchor {anchor} in stream {stream} at {hash} has no node row")]
    DanglingParentAnchor {
        stream: ContentStreamId,
        hash: DimensionSpacePointHash,
        anchor: RelationAnchorPoint,
    },

    #[error("Node row {anchor} stores an origin hash that does not match its origin coordinates")]
    OriginHashMismatch { anchor: RelationAnchorPoint },

    #[error("Siblings under {parent} in stream {stream} at {hash} share position {position}")]
    DuplicateSiblingPosition {
        stream: ContentStreamId,
        hash: DimensionSpacePointHash,
        parent: RelationAnchorPoint,
        position: i64,
    },

    #[error("Tethered node {anchor} in stream {stream} at {hash} has an unnamed edge")]
    UnnamedTetheredEdge {
        stream: ContentStreamId,
        hash: DimensionSpacePointHash,
        anchor: RelationAnchorPoint,
    },

    #[error("Edge of {child} in stream {stream} at {hash} is missing inherited tags from its parent")]
    BrokenTagInheritance {
        stream: ContentStreamId,
        hash: DimensionSpacePointHash,
        child: RelationAnchorPoint,
    },

    #[error("Reference '{name}' from {source_anchor} targets unknown aggregate {target}")]
    MissingReferenceTarget {
        source_anchor: RelationAnchorPoint,
        name: String,
        target: NodeAggregateId,
    },

    #[error("References '{name}' from {source_anchor} share position {position}")]
    DuplicateReferencePosition {
        source_anchor: RelationAnchorPoint,
        name: String,
        position: i64,
    },

    #[error("Reference '{name}' from {source_anchor} targets {target}, which covers no dimension point of its source")]
    UncoveredReferenceTarget {
        source_anchor: RelationAnchorPoint,
        name: String,
        target: NodeAggregateId,
    },

    #[error("Node {anchor} in stream {stream} at {hash} is not reachable from the root")]
    UnreachableNode {
        stream: ContentStreamId,
        hash: DimensionSpacePointHash,
        anchor: RelationAnchorPoint,
    },

    #[error("Hierarchy cycle through {anchor} in stream {stream} at {hash}")]
    CycleDetected {
        stream: ContentStreamId,
        hash: DimensionSpacePointHash,
        anchor: RelationAnchorPoint,
    },

    #[error("Aggregate {aggregate} appears under multiple anchors in stream {stream} at {hash}")]
    DuplicateAggregateInSubgraph {
        stream: ContentStreamId,
        hash: DimensionSpacePointHash,
        aggregate: NodeAggregateId,
    },

    #[error("Aggregate {aggregate} has inconsistent type or classification in stream {stream}")]
    InconsistentAggregate {
        stream: ContentStreamId,
        aggregate: NodeAggregateId,
    },

    #[error("Node {child} has more than one parent edge in stream {stream} at {hash}")]
    MultipleParentsInSubgraph {
        stream: ContentStreamId,
        hash: DimensionSpacePointHash,
        child: RelationAnchorPoint,
    },

    #[error("Parent anchor {parent} of {child} in stream {stream} at {hash} is not itself linked there")]
    ParentNotCovered {
        stream: ContentStreamId,
        hash: DimensionSpacePointHash,
        parent: RelationAnchorPoint,
        child: RelationAnchorPoint,
    },

    #[error("Node row {anchor} in stream {stream} has no edge at its own origin")]
    OriginNotCovered {
        stream: ContentStreamId,
        anchor: RelationAnchorPoint,
    },
}

pub struct IntegrityChecker {
    store: GraphStore,
}

impl IntegrityChecker {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    /// Run all checks and return the findings.
    pub async fn run(&self) -> Result<Vec<IntegrityViolation>, DatabaseError> {
        let nodes = self.store.all_nodes().await?;
        let relations = self.store.all_hierarchy_relations().await?;
        let references = self.store.all_references().await?;

        let nodes_by_anchor: HashMap<&RelationAnchorPoint, &NodeRecord> =
            nodes.iter().map(|n| (&n.anchor, n)).collect();
        let known_aggregates: HashSet<&NodeAggregateId> =
            nodes.iter().map(|n| &n.aggregate_id).collect();

        // Every (stream, dimension point) pair an anchor is linked at, and
        // the same rolled up per aggregate. References are anchor-scoped,
        // so their coverage check needs both sides.
        let mut anchor_points: HashMap<
            &RelationAnchorPoint,
            HashSet<(&ContentStreamId, &DimensionSpacePointHash)>,
        > = HashMap::new();
        for relation in &relations {
            anchor_points
                .entry(&relation.child_anchor)
                .or_default()
                .insert((&relation.content_stream_id, &relation.dimension_space_point_hash));
        }
        let mut aggregate_points: HashMap<
            &NodeAggregateId,
            HashSet<(&ContentStreamId, &DimensionSpacePointHash)>,
        > = HashMap::new();
        for (anchor, points) in &anchor_points {
            if let Some(node) = nodes_by_anchor.get(*anchor) {
                aggregate_points
                    .entry(&node.aggregate_id)
                    .or_default()
                    .extend(points.iter().copied());
            }
        }

        let mut violations = Vec::new();

        check_origin_hashes(&nodes, &mut violations);
        check_references(
            &references,
            &known_aggregates,
            &anchor_points,
            &aggregate_points,
            &mut violations,
        );

        let mut by_subgraph: HashMap<
            (&ContentStreamId, &DimensionSpacePointHash),
            Vec<&HierarchyRelation>,
        > = HashMap::new();
        for relation in &relations {
            by_subgraph
                .entry((&relation.content_stream_id, &relation.dimension_space_point_hash))
                .or_default()
                .push(relation);
        }

        for ((stream, hash), edges) in &by_subgraph {
            check_subgraph(stream, hash, edges, &nodes_by_anchor, &mut violations);
        }

        check_streams(&relations, &nodes_by_anchor, &mut violations);

        Ok(violations)
    }
}

fn check_origin_hashes(nodes: &[NodeRecord], violations: &mut Vec<IntegrityViolation>) {
    for node in nodes {
        if node.origin.hash() != node.origin_hash {
            violations.push(IntegrityViolation::OriginHashMismatch {
                anchor: node.anchor.clone(),
            });
        }
    }
}

fn check_references(
    references: &[ReferenceRelation],
    known_aggregates: &HashSet<&NodeAggregateId>,
    anchor_points: &HashMap<
        &RelationAnchorPoint,
        HashSet<(&ContentStreamId, &DimensionSpacePointHash)>,
    >,
    aggregate_points: &HashMap<
        &NodeAggregateId,
        HashSet<(&ContentStreamId, &DimensionSpacePointHash)>,
    >,
    violations: &mut Vec<IntegrityViolation>,
) {
    let mut seen_positions: HashSet<(&RelationAnchorPoint, &str, i64)> = HashSet::new();
    for reference in references {
        if !known_aggregates.contains(&reference.target_aggregate_id) {
            violations.push(IntegrityViolation::MissingReferenceTarget {
                source_anchor: reference.source_anchor.clone(),
                name: reference.name.clone(),
                target: reference.target_aggregate_id.clone(),
            });
        } else if let Some(source_points) = anchor_points.get(&reference.source_anchor) {
            // The target must be linked at one of the (stream, dimension
            // point) pairs the source anchor is linked at. A source with no
            // edges at all is an orphan-row concern, handled by collection.
            let overlaps = aggregate_points
                .get(&reference.target_aggregate_id)
                .map(|target_points| {
                    source_points.iter().any(|point| target_points.contains(point))
                })
                .unwrap_or(false);
            if !overlaps {
                violations.push(IntegrityViolation::UncoveredReferenceTarget {
                    source_anchor: reference.source_anchor.clone(),
                    name: reference.name.clone(),
                    target: reference.target_aggregate_id.clone(),
                });
            }
        }
        if !seen_positions.insert((
            &reference.source_anchor,
            reference.name.as_str(),
            reference.position,
        )) {
            violations.push(IntegrityViolation::DuplicateReferencePosition {
                source_anchor: reference.source_anchor.clone(),
                name: reference.name.clone(),
                position: reference.position,
            });
        }
    }
}

fn check_subgraph(
    stream: &ContentStreamId,
    hash: &DimensionSpacePointHash,
    edges: &[&HierarchyRelation],
    nodes_by_anchor: &HashMap<&RelationAnchorPoint, &NodeRecord>,
    violations: &mut Vec<IntegrityViolation>,
) {
    let children: HashSet<&RelationAnchorPoint> =
        edges.iter().map(|e| &e.child_anchor).collect();
    let mut children_of: HashMap<&RelationAnchorPoint, Vec<&HierarchyRelation>> = HashMap::new();
    let mut edge_of_child: HashMap<&RelationAnchorPoint, &HierarchyRelation> = HashMap::new();
    for edge in edges {
        children_of.entry(&edge.parent_anchor).or_default().push(edge);
        edge_of_child.insert(&edge.child_anchor, edge);
    }

    // Dangling anchors, unnamed tethered edges, parent coverage.
    for edge in edges {
        match nodes_by_anchor.get(&edge.child_anchor) {
            None => violations.push(IntegrityViolation::DanglingChildAnchor {
                stream: stream.clone(),
                hash: hash.clone(),
                anchor: edge.child_anchor.clone(),
            }),
            Some(node) => {
                if node.classification.is_tethered() && edge.name.is_none() {
                    violations.push(IntegrityViolation::UnnamedTetheredEdge {
                        stream: stream.clone(),
                        hash: hash.clone(),
                        anchor: edge.child_anchor.clone(),
                    });
                }
            }
        }

        if !edge.parent_anchor.is_root_sentinel() {
            if !nodes_by_anchor.contains_key(&edge.parent_anchor) {
                violations.push(IntegrityViolation::DanglingParentAnchor {
                    stream: stream.clone(),
                    hash: hash.clone(),
                    anchor: edge.parent_anchor.clone(),
                });
            }
            if !children.contains(&edge.parent_anchor) {
                violations.push(IntegrityViolation::ParentNotCovered {
                    stream: stream.clone(),
                    hash: hash.clone(),
                    parent: edge.parent_anchor.clone(),
                    child: edge.child_anchor.clone(),
                });
            }
        }
    }

    // One parent per child and subgraph. The edge table's primary key also
    // enforces this; the checker verifies it independently of the schema.
    let mut parents_of: HashMap<&RelationAnchorPoint, HashSet<&RelationAnchorPoint>> =
        HashMap::new();
    for edge in edges {
        parents_of
            .entry(&edge.child_anchor)
            .or_default()
            .insert(&edge.parent_anchor);
    }
    for (child, parents) in &parents_of {
        if parents.len() > 1 {
            violations.push(IntegrityViolation::MultipleParentsInSubgraph {
                stream: stream.clone(),
                hash: hash.clone(),
                child: (*child).clone(),
            });
        }
    }

    // Duplicate sibling positions.
    for (parent, siblings) in &children_of {
        let mut positions = HashSet::new();
        for edge in siblings {
            if !positions.insert(edge.position) {
                violations.push(IntegrityViolation::DuplicateSiblingPosition {
                    stream: stream.clone(),
                    hash: hash.clone(),
                    parent: (*parent).clone(),
                    position: edge.position,
                });
            }
        }
    }

    // Inherited tags must include every effective tag of the parent edge.
    for edge in edges {
        if let Some(parent_edge) = edge_of_child.get(&edge.parent_anchor) {
            let parent_effective = parent_edge.subtree_tags.effective();
            if !parent_effective
                .iter()
                .all(|tag| edge.subtree_tags.inherited.contains(tag))
            {
                violations.push(IntegrityViolation::BrokenTagInheritance {
                    stream: stream.clone(),
                    hash: hash.clone(),
                    child: edge.child_anchor.clone(),
                });
            }
        }
    }

    // Reachability from the root sentinel.
    let sentinel = RelationAnchorPoint::root_sentinel();
    let mut reachable: HashSet<&RelationAnchorPoint> = HashSet::new();
    let mut frontier = vec![&sentinel];
    while let Some(anchor) = frontier.pop() {
        if let Some(below) = children_of.get(anchor) {
            for edge in below {
                if reachable.insert(&edge.child_anchor) {
                    frontier.push(&edge.child_anchor);
                }
            }
        }
    }
    for child in &children {
        if !reachable.contains(*child) {
            violations.push(IntegrityViolation::UnreachableNode {
                stream: stream.clone(),
                hash: hash.clone(),
                anchor: (*child).clone(),
            });
        }
    }

    // Cycles: walk up the single-parent chain from every unreachable child.
    for child in &children {
        if reachable.contains(*child) {
            continue;
        }
        let mut seen = HashSet::new();
        let mut current = *child;
        while let Some(edge) = edge_of_child.get(current) {
            if !seen.insert(current) {
                violations.push(IntegrityViolation::CycleDetected {
                    stream: stream.clone(),
                    hash: hash.clone(),
                    anchor: (*child).clone(),
                });
                break;
            }
            if edge.parent_anchor.is_root_sentinel() {
                break;
            }
            current = &edge.parent_anchor;
        }
    }

    // Aggregate id uniqueness per subgraph.
    let mut anchors_of_aggregate: HashMap<&NodeAggregateId, HashSet<&RelationAnchorPoint>> =
        HashMap::new();
    for child in &children {
        if let Some(node) = nodes_by_anchor.get(*child) {
            anchors_of_aggregate
                .entry(&node.aggregate_id)
                .or_default()
                .insert(child);
        }
    }
    for (aggregate, anchors) in anchors_of_aggregate {
        if anchors.len() > 1 {
            violations.push(IntegrityViolation::DuplicateAggregateInSubgraph {
                stream: stream.clone(),
                hash: hash.clone(),
                aggregate: aggregate.clone(),
            });
        }
    }
}

fn check_streams(
    relations: &[HierarchyRelation],
    nodes_by_anchor: &HashMap<&RelationAnchorPoint, &NodeRecord>,
    violations: &mut Vec<IntegrityViolation>,
) {
    // Group linked anchors per stream.
    let mut anchors_by_stream: HashMap<&ContentStreamId, HashSet<&RelationAnchorPoint>> =
        HashMap::new();
    let mut hashes_by_stream_anchor: HashMap<
        (&ContentStreamId, &RelationAnchorPoint),
        HashSet<&DimensionSpacePointHash>,
    > = HashMap::new();
    for relation in relations {
        anchors_by_stream
            .entry(&relation.content_stream_id)
            .or_default()
            .insert(&relation.child_anchor);
        hashes_by_stream_anchor
            .entry((&relation.content_stream_id, &relation.child_anchor))
            .or_default()
            .insert(&relation.dimension_space_point_hash);
    }

    for (stream, anchors) in &anchors_by_stream {
        // Type and classification agree across every row of an aggregate
        // linked into this stream.
        let mut shapes: HashMap<&NodeAggregateId, HashSet<(&str, &str)>> = HashMap::new();
        // All hashes an aggregate is linked at, for origin coverage.
        let mut coverage: HashMap<&NodeAggregateId, HashSet<&DimensionSpacePointHash>> =
            HashMap::new();

        for anchor in anchors {
            if let Some(node) = nodes_by_anchor.get(*anchor) {
                shapes.entry(&node.aggregate_id).or_default().insert((
                    node.node_type.as_str(),
                    node.classification.as_str(),
                ));
                if let Some(hashes) = hashes_by_stream_anchor.get(&(*stream, *anchor)) {
                    coverage
                        .entry(&node.aggregate_id)
                        .or_default()
                        .extend(hashes.iter().copied());
                }
            }
        }

        for (aggregate, shape) in shapes {
            if shape.len() > 1 {
                violations.push(IntegrityViolation::InconsistentAggregate {
                    stream: (*stream).clone(),
                    aggregate: aggregate.clone(),
                });
            }
        }

        for anchor in anchors {
            if let Some(node) = nodes_by_anchor.get(*anchor) {
                // Roots are authored in the empty origin while covering
                // concrete points; their origin is never a covered point.
                if node.classification.is_root() {
                    continue;
                }
                let covered = coverage
                    .get(&node.aggregate_id)
                    .map(|hashes| hashes.contains(&node.origin_hash))
                    .unwrap_or(false);
                if !covered {
                    violations.push(IntegrityViolation::OriginNotCovered {
                        stream: (*stream).clone(),
                        anchor: (*anchor).clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "checker_test.rs"]
mod checker_test;
