//! Graph Store
//!
//! Row-level persistence gateway over the four graph tables plus the
//! content stream, workspace and checkpoint bookkeeping tables. The store
//! wraps a single connection so that `begin`/`commit`/`rollback` scope a
//! real SQLite transaction around a batch of row operations; the projector
//! opens one store per event batch, readers open their own connections.
//!
//! No graph semantics live here. Copy-on-write, ordering, tag inheritance
//! and dimension adjustments are all decided in the projection layer; this
//! module only reads and writes rows.

use crate::db::error::DatabaseError;
use crate::models::dimension::{DimensionSpacePoint, DimensionSpacePointHash};
use crate::models::node::{
    NodeAggregateId, NodeClassification, NodeName, NodeRecord, NodeTypeName, RelationAnchorPoint,
};
use crate::models::relation::{HierarchyRelation, ReferenceRelation};
use crate::models::stream::{
    ContentStream, ContentStreamId, ContentStreamStatus, Workspace, WorkspaceName,
};
use crate::models::tags::SubtreeTags;
use crate::models::OriginDimensionSpacePoint;
use chrono::{DateTime, Utc};

/// Persistence gateway bound to one connection.
pub struct GraphStore {
    conn: libsql::Connection,
}

impl GraphStore {
    pub fn new(conn: libsql::Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &libsql::Connection {
        &self.conn
    }

    // === Transactions ===

    /// Start a write transaction. IMMEDIATE takes the write lock up front so
    /// the single-writer discipline fails fast instead of mid-batch.
    pub async fn begin(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e)))?;
        Ok(())
    }

    pub async fn commit(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("COMMIT", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    pub async fn rollback(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("ROLLBACK", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to roll back transaction: {}", e)))?;
        Ok(())
    }

    // === Node rows ===

    pub async fn insert_node(&self, node: &NodeRecord) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO node (
                    relation_anchor_point, node_aggregate_id,
                    origin_dimension_space_point, origin_dimension_space_point_hash,
                    node_type_name, classification, node_name, properties,
                    created_at, modified_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    node.anchor.as_str().to_string(),
                    node.aggregate_id.as_str().to_string(),
                    node.origin.to_json(),
                    node.origin_hash.as_str().to_string(),
                    node.node_type.as_str().to_string(),
                    node.classification.as_str().to_string(),
                    node.name.as_ref().map(|n| n.as_str().to_string()),
                    serde_json::to_string(&node.properties).map_err(|e| {
                        DatabaseError::sql_execution(format!("Failed to serialize properties: {}", e))
                    })?,
                    node.created_at.to_rfc3339(),
                    node.modified_at.to_rfc3339(),
                ),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert node row: {}", e)))?;
        Ok(())
    }

    pub async fn get_node(
        &self,
        anchor: &RelationAnchorPoint,
    ) -> Result<Option<NodeRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT relation_anchor_point, node_aggregate_id,
                        origin_dimension_space_point, origin_dimension_space_point_hash,
                        node_type_name, classification, node_name, properties,
                        created_at, modified_at
                 FROM node WHERE relation_anchor_point = ?",
            )
            .await?;
        let mut rows = stmt.query([anchor.as_str().to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn update_node(&self, node: &NodeRecord) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE node SET
                    node_aggregate_id = ?,
                    origin_dimension_space_point = ?,
                    origin_dimension_space_point_hash = ?,
                    node_type_name = ?,
                    classification = ?,
                    node_name = ?,
                    properties = ?,
                    modified_at = ?
                 WHERE relation_anchor_point = ?",
                (
                    node.aggregate_id.as_str().to_string(),
                    node.origin.to_json(),
                    node.origin_hash.as_str().to_string(),
                    node.node_type.as_str().to_string(),
                    node.classification.as_str().to_string(),
                    node.name.as_ref().map(|n| n.as_str().to_string()),
                    serde_json::to_string(&node.properties).map_err(|e| {
                        DatabaseError::sql_execution(format!("Failed to serialize properties: {}", e))
                    })?,
                    node.modified_at.to_rfc3339(),
                    node.anchor.as_str().to_string(),
                ),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to update node row: {}", e)))?;
        Ok(())
    }

    pub async fn delete_node(&self, anchor: &RelationAnchorPoint) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM node WHERE relation_anchor_point = ?",
                [anchor.as_str().to_string()],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to delete node row: {}", e)))?;
        Ok(())
    }

    /// Every materialized variant row of an aggregate, across all streams.
    pub async fn nodes_by_aggregate_id(
        &self,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Vec<NodeRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT relation_anchor_point, node_aggregate_id,
                        origin_dimension_space_point, origin_dimension_space_point_hash,
                        node_type_name, classification, node_name, properties,
                        created_at, modified_at
                 FROM node WHERE node_aggregate_id = ?",
            )
            .await?;
        let mut rows = stmt.query([aggregate_id.as_str().to_string()]).await?;

        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            nodes.push(Self::row_to_node(&row)?);
        }
        Ok(nodes)
    }

    pub async fn all_nodes(&self) -> Result<Vec<NodeRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT relation_anchor_point, node_aggregate_id,
                        origin_dimension_space_point, origin_dimension_space_point_hash,
                        node_type_name, classification, node_name, properties,
                        created_at, modified_at
                 FROM node",
            )
            .await?;
        let mut rows = stmt.query(()).await?;

        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            nodes.push(Self::row_to_node(&row)?);
        }
        Ok(nodes)
    }

    // === Hierarchy relations ===

    pub async fn insert_hierarchy_relation(
        &self,
        relation: &HierarchyRelation,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO hierarchy_relation (
                    parent_relation_anchor_point, child_relation_anchor_point,
                    content_stream_id, dimension_space_point_hash,
                    position, subtree_tags, node_name
                ) VALUES (?, ?, ?, ?, ?, ?, ?)",
                (
                    relation.parent_anchor.as_str().to_string(),
                    relation.child_anchor.as_str().to_string(),
                    relation.content_stream_id.as_str().to_string(),
                    relation.dimension_space_point_hash.as_str().to_string(),
                    relation.position,
                    relation.subtree_tags.to_json(),
                    relation.name.as_ref().map(|n| n.as_str().to_string()),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to insert hierarchy relation: {}", e))
            })?;
        Ok(())
    }

    /// Children of a parent anchor in one subgraph, in sibling order.
    pub async fn child_relations(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        parent: &RelationAnchorPoint,
    ) -> Result<Vec<HierarchyRelation>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT parent_relation_anchor_point, child_relation_anchor_point,
                        content_stream_id, dimension_space_point_hash,
                        position, subtree_tags, node_name
                 FROM hierarchy_relation
                 WHERE content_stream_id = ?
                   AND dimension_space_point_hash = ?
                   AND parent_relation_anchor_point = ?
                 ORDER BY position ASC",
            )
            .await?;
        let mut rows = stmt
            .query((
                stream.as_str().to_string(),
                hash.as_str().to_string(),
                parent.as_str().to_string(),
            ))
            .await?;

        let mut relations = Vec::new();
        while let Some(row) = rows.next().await? {
            relations.push(Self::row_to_relation(&row)?);
        }
        Ok(relations)
    }

    /// The single incoming edge of a child anchor in one subgraph.
    pub async fn parent_relation_of(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        child: &RelationAnchorPoint,
    ) -> Result<Option<HierarchyRelation>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT parent_relation_anchor_point, child_relation_anchor_point,
                        content_stream_id, dimension_space_point_hash,
                        position, subtree_tags, node_name
                 FROM hierarchy_relation
                 WHERE content_stream_id = ?
                   AND dimension_space_point_hash = ?
                   AND child_relation_anchor_point = ?",
            )
            .await?;
        let mut rows = stmt
            .query((
                stream.as_str().to_string(),
                hash.as_str().to_string(),
                child.as_str().to_string(),
            ))
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_relation(&row)?)),
            None => Ok(None),
        }
    }

    /// Every incoming edge of a child anchor, across streams and dimension
    /// points.
    pub async fn relations_for_child_anchor(
        &self,
        child: &RelationAnchorPoint,
    ) -> Result<Vec<HierarchyRelation>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT parent_relation_anchor_point, child_relation_anchor_point,
                        content_stream_id, dimension_space_point_hash,
                        position, subtree_tags, node_name
                 FROM hierarchy_relation
                 WHERE child_relation_anchor_point = ?",
            )
            .await?;
        let mut rows = stmt.query([child.as_str().to_string()]).await?;

        let mut relations = Vec::new();
        while let Some(row) = rows.next().await? {
            relations.push(Self::row_to_relation(&row)?);
        }
        Ok(relations)
    }

    /// Content streams that link the given anchor as a child. Drives the
    /// copy-on-write sharing check.
    pub async fn streams_containing_anchor(
        &self,
        child: &RelationAnchorPoint,
    ) -> Result<Vec<ContentStreamId>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT content_stream_id FROM hierarchy_relation
                 WHERE child_relation_anchor_point = ?",
            )
            .await?;
        let mut rows = stmt.query([child.as_str().to_string()]).await?;

        let mut streams = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row
                .get(0)
                .map_err(|e| DatabaseError::row_decoding(format!("content_stream_id: {}", e)))?;
            streams.push(ContentStreamId::from_string(id));
        }
        Ok(streams)
    }

    /// Replace `old` with `new` on both edge sides, within one stream only.
    /// This is the second half of a copy-on-write fork.
    pub async fn repoint_anchor(
        &self,
        stream: &ContentStreamId,
        old: &RelationAnchorPoint,
        new: &RelationAnchorPoint,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE hierarchy_relation SET child_relation_anchor_point = ?
                 WHERE content_stream_id = ? AND child_relation_anchor_point = ?",
                (
                    new.as_str().to_string(),
                    stream.as_str().to_string(),
                    old.as_str().to_string(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to repoint child anchor: {}", e))
            })?;

        self.conn
            .execute(
                "UPDATE hierarchy_relation SET parent_relation_anchor_point = ?
                 WHERE content_stream_id = ? AND parent_relation_anchor_point = ?",
                (
                    new.as_str().to_string(),
                    stream.as_str().to_string(),
                    old.as_str().to_string(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to repoint parent anchor: {}", e))
            })?;
        Ok(())
    }

    pub async fn update_relation_position(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        child: &RelationAnchorPoint,
        position: i64,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE hierarchy_relation SET position = ?
                 WHERE content_stream_id = ?
                   AND dimension_space_point_hash = ?
                   AND child_relation_anchor_point = ?",
                (
                    position,
                    stream.as_str().to_string(),
                    hash.as_str().to_string(),
                    child.as_str().to_string(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to update relation position: {}", e))
            })?;
        Ok(())
    }

    pub async fn update_relation_tags(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        child: &RelationAnchorPoint,
        tags: &SubtreeTags,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE hierarchy_relation SET subtree_tags = ?
                 WHERE content_stream_id = ?
                   AND dimension_space_point_hash = ?
                   AND child_relation_anchor_point = ?",
                (
                    tags.to_json(),
                    stream.as_str().to_string(),
                    hash.as_str().to_string(),
                    child.as_str().to_string(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to update relation tags: {}", e))
            })?;
        Ok(())
    }

    /// Rewrite the edge name of every edge pointing at `child` within one
    /// stream. Used by aggregate renames.
    pub async fn set_relation_name_for_child(
        &self,
        stream: &ContentStreamId,
        child: &RelationAnchorPoint,
        name: Option<&NodeName>,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE hierarchy_relation SET node_name = ?
                 WHERE content_stream_id = ? AND child_relation_anchor_point = ?",
                (
                    name.map(|n| n.as_str().to_string()),
                    stream.as_str().to_string(),
                    child.as_str().to_string(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to update relation name: {}", e))
            })?;
        Ok(())
    }

    pub async fn delete_relation(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        child: &RelationAnchorPoint,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM hierarchy_relation
                 WHERE content_stream_id = ?
                   AND dimension_space_point_hash = ?
                   AND child_relation_anchor_point = ?",
                (
                    stream.as_str().to_string(),
                    hash.as_str().to_string(),
                    child.as_str().to_string(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete hierarchy relation: {}", e))
            })?;
        Ok(())
    }

    pub async fn delete_relations_for_stream(
        &self,
        stream: &ContentStreamId,
    ) -> Result<u64, DatabaseError> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM hierarchy_relation WHERE content_stream_id = ?",
                [stream.as_str().to_string()],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete stream relations: {}", e))
            })?;
        Ok(deleted)
    }

    /// Every edge of one (stream, dimension hash) subgraph.
    pub async fn relations_at_hash(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
    ) -> Result<Vec<HierarchyRelation>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT parent_relation_anchor_point, child_relation_anchor_point,
                        content_stream_id, dimension_space_point_hash,
                        position, subtree_tags, node_name
                 FROM hierarchy_relation
                 WHERE content_stream_id = ? AND dimension_space_point_hash = ?",
            )
            .await?;
        let mut rows = stmt
            .query((stream.as_str().to_string(), hash.as_str().to_string()))
            .await?;

        let mut relations = Vec::new();
        while let Some(row) = rows.next().await? {
            relations.push(Self::row_to_relation(&row)?);
        }
        Ok(relations)
    }

    /// Re-key every edge of one subgraph from `source_hash` to `target_hash`.
    /// Used when a dimension point is moved.
    pub async fn rewrite_relation_hash(
        &self,
        stream: &ContentStreamId,
        source_hash: &DimensionSpacePointHash,
        target_hash: &DimensionSpacePointHash,
    ) -> Result<u64, DatabaseError> {
        let updated = self
            .conn
            .execute(
                "UPDATE hierarchy_relation SET dimension_space_point_hash = ?
                 WHERE content_stream_id = ? AND dimension_space_point_hash = ?",
                (
                    target_hash.as_str().to_string(),
                    stream.as_str().to_string(),
                    source_hash.as_str().to_string(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to rewrite relation hash: {}", e))
            })?;
        Ok(updated)
    }

    /// Duplicate every edge of one subgraph under `target_hash`. Used when a
    /// new dimension point shines through an existing one.
    pub async fn copy_relations_to_hash(
        &self,
        stream: &ContentStreamId,
        source_hash: &DimensionSpacePointHash,
        target_hash: &DimensionSpacePointHash,
    ) -> Result<u64, DatabaseError> {
        let copied = self
            .conn
            .execute(
                "INSERT INTO hierarchy_relation (
                    parent_relation_anchor_point, child_relation_anchor_point,
                    content_stream_id, dimension_space_point_hash,
                    position, subtree_tags, node_name
                 )
                 SELECT parent_relation_anchor_point, child_relation_anchor_point,
                        content_stream_id, ?,
                        position, subtree_tags, node_name
                 FROM hierarchy_relation
                 WHERE content_stream_id = ? AND dimension_space_point_hash = ?",
                (
                    target_hash.as_str().to_string(),
                    stream.as_str().to_string(),
                    source_hash.as_str().to_string(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to copy relations to hash: {}", e))
            })?;
        Ok(copied)
    }

    /// Duplicate every edge of the source stream into the target stream. The
    /// fork cost is proportional to the edge count only; node and reference
    /// rows stay shared.
    pub async fn copy_stream_relations(
        &self,
        source: &ContentStreamId,
        target: &ContentStreamId,
    ) -> Result<u64, DatabaseError> {
        let copied = self
            .conn
            .execute(
                "INSERT INTO hierarchy_relation (
                    parent_relation_anchor_point, child_relation_anchor_point,
                    content_stream_id, dimension_space_point_hash,
                    position, subtree_tags, node_name
                 )
                 SELECT parent_relation_anchor_point, child_relation_anchor_point,
                        ?, dimension_space_point_hash,
                        position, subtree_tags, node_name
                 FROM hierarchy_relation
                 WHERE content_stream_id = ?",
                (target.as_str().to_string(), source.as_str().to_string()),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to copy stream relations: {}", e))
            })?;
        Ok(copied)
    }

    /// Resolve an aggregate id to its anchor within one subgraph.
    pub async fn anchor_of_aggregate(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Option<RelationAnchorPoint>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT h.child_relation_anchor_point
                 FROM hierarchy_relation h
                 JOIN node n ON n.relation_anchor_point = h.child_relation_anchor_point
                 WHERE h.content_stream_id = ?
                   AND h.dimension_space_point_hash = ?
                   AND n.node_aggregate_id = ?",
            )
            .await?;
        let mut rows = stmt
            .query((
                stream.as_str().to_string(),
                hash.as_str().to_string(),
                aggregate_id.as_str().to_string(),
            ))
            .await?;

        match rows.next().await? {
            Some(row) => {
                let anchor: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::row_decoding(format!("anchor: {}", e)))?;
                Ok(Some(RelationAnchorPoint::from_string(anchor)))
            }
            None => Ok(None),
        }
    }

    /// The incoming edge of an aggregate within one subgraph.
    pub async fn relation_for_aggregate(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Option<HierarchyRelation>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT h.parent_relation_anchor_point, h.child_relation_anchor_point,
                        h.content_stream_id, h.dimension_space_point_hash,
                        h.position, h.subtree_tags, h.node_name
                 FROM hierarchy_relation h
                 JOIN node n ON n.relation_anchor_point = h.child_relation_anchor_point
                 WHERE h.content_stream_id = ?
                   AND h.dimension_space_point_hash = ?
                   AND n.node_aggregate_id = ?",
            )
            .await?;
        let mut rows = stmt
            .query((
                stream.as_str().to_string(),
                hash.as_str().to_string(),
                aggregate_id.as_str().to_string(),
            ))
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_relation(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn all_hierarchy_relations(&self) -> Result<Vec<HierarchyRelation>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT parent_relation_anchor_point, child_relation_anchor_point,
                        content_stream_id, dimension_space_point_hash,
                        position, subtree_tags, node_name
                 FROM hierarchy_relation",
            )
            .await?;
        let mut rows = stmt.query(()).await?;

        let mut relations = Vec::new();
        while let Some(row) = rows.next().await? {
            relations.push(Self::row_to_relation(&row)?);
        }
        Ok(relations)
    }

    // === Reference relations ===

    pub async fn insert_reference(
        &self,
        reference: &ReferenceRelation,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO reference_relation (
                    source_relation_anchor_point, reference_name, position,
                    target_node_aggregate_id, properties
                ) VALUES (?, ?, ?, ?, ?)",
                (
                    reference.source_anchor.as_str().to_string(),
                    reference.name.clone(),
                    reference.position,
                    reference.target_aggregate_id.as_str().to_string(),
                    reference
                        .properties
                        .as_ref()
                        .map(|p| serde_json::to_string(p).unwrap_or_else(|_| "null".to_string())),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to insert reference: {}", e))
            })?;
        Ok(())
    }

    /// Delete the ordered list under (source anchor, name).
    pub async fn delete_references(
        &self,
        source: &RelationAnchorPoint,
        name: &str,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM reference_relation
                 WHERE source_relation_anchor_point = ? AND reference_name = ?",
                (source.as_str().to_string(), name.to_string()),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete references: {}", e))
            })?;
        Ok(())
    }

    pub async fn delete_all_references(
        &self,
        source: &RelationAnchorPoint,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM reference_relation WHERE source_relation_anchor_point = ?",
                [source.as_str().to_string()],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete references: {}", e))
            })?;
        Ok(())
    }

    /// All references going out of one anchor, grouped by name, in order.
    pub async fn references_for_source(
        &self,
        source: &RelationAnchorPoint,
    ) -> Result<Vec<ReferenceRelation>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT source_relation_anchor_point, reference_name, position,
                        target_node_aggregate_id, properties
                 FROM reference_relation
                 WHERE source_relation_anchor_point = ?
                 ORDER BY reference_name ASC, position ASC",
            )
            .await?;
        let mut rows = stmt.query([source.as_str().to_string()]).await?;

        let mut references = Vec::new();
        while let Some(row) = rows.next().await? {
            references.push(Self::row_to_reference(&row)?);
        }
        Ok(references)
    }

    /// The ordered reference list under one (source anchor, name).
    pub async fn references_named(
        &self,
        source: &RelationAnchorPoint,
        name: &str,
    ) -> Result<Vec<ReferenceRelation>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT source_relation_anchor_point, reference_name, position,
                        target_node_aggregate_id, properties
                 FROM reference_relation
                 WHERE source_relation_anchor_point = ? AND reference_name = ?
                 ORDER BY position ASC",
            )
            .await?;
        let mut rows = stmt
            .query((source.as_str().to_string(), name.to_string()))
            .await?;

        let mut references = Vec::new();
        while let Some(row) = rows.next().await? {
            references.push(Self::row_to_reference(&row)?);
        }
        Ok(references)
    }

    /// All references pointing at one target aggregate.
    pub async fn references_to_target(
        &self,
        target: &NodeAggregateId,
    ) -> Result<Vec<ReferenceRelation>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT source_relation_anchor_point, reference_name, position,
                        target_node_aggregate_id, properties
                 FROM reference_relation
                 WHERE target_node_aggregate_id = ?
                 ORDER BY reference_name ASC, position ASC",
            )
            .await?;
        let mut rows = stmt.query([target.as_str().to_string()]).await?;

        let mut references = Vec::new();
        while let Some(row) = rows.next().await? {
            references.push(Self::row_to_reference(&row)?);
        }
        Ok(references)
    }

    /// Duplicate every reference row from one anchor to another. References
    /// do not travel implicitly with a copy-on-write fork; the projection
    /// copies them here.
    pub async fn copy_references(
        &self,
        from: &RelationAnchorPoint,
        to: &RelationAnchorPoint,
    ) -> Result<u64, DatabaseError> {
        let copied = self
            .conn
            .execute(
                "INSERT INTO reference_relation (
                    source_relation_anchor_point, reference_name, position,
                    target_node_aggregate_id, properties
                 )
                 SELECT ?, reference_name, position, target_node_aggregate_id, properties
                 FROM reference_relation
                 WHERE source_relation_anchor_point = ?",
                (to.as_str().to_string(), from.as_str().to_string()),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to copy references: {}", e))
            })?;
        Ok(copied)
    }

    pub async fn all_references(&self) -> Result<Vec<ReferenceRelation>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT source_relation_anchor_point, reference_name, position,
                        target_node_aggregate_id, properties
                 FROM reference_relation",
            )
            .await?;
        let mut rows = stmt.query(()).await?;

        let mut references = Vec::new();
        while let Some(row) = rows.next().await? {
            references.push(Self::row_to_reference(&row)?);
        }
        Ok(references)
    }

    // === Dimension space points ===

    /// Record a point in the hash -> coordinates lookup table. Idempotent.
    pub async fn register_dimension_space_point(
        &self,
        point: &DimensionSpacePoint,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO dimension_space_points (hash, coordinates) VALUES (?, ?)",
                (point.hash().as_str().to_string(), point.to_json()),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to register dimension point: {}", e))
            })?;
        Ok(())
    }

    pub async fn dimension_space_point_by_hash(
        &self,
        hash: &DimensionSpacePointHash,
    ) -> Result<Option<DimensionSpacePoint>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT coordinates FROM dimension_space_points WHERE hash = ?")
            .await?;
        let mut rows = stmt.query([hash.as_str().to_string()]).await?;

        match rows.next().await? {
            Some(row) => {
                let json: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::row_decoding(format!("coordinates: {}", e)))?;
                let point = DimensionSpacePoint::from_json(&json).map_err(|e| {
                    DatabaseError::row_decoding(format!("dimension point coordinates: {}", e))
                })?;
                Ok(Some(point))
            }
            None => Ok(None),
        }
    }

    pub async fn all_dimension_space_points(
        &self,
    ) -> Result<Vec<DimensionSpacePoint>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT coordinates FROM dimension_space_points")
            .await?;
        let mut rows = stmt.query(()).await?;

        let mut points = Vec::new();
        while let Some(row) = rows.next().await? {
            let json: String = row
                .get(0)
                .map_err(|e| DatabaseError::row_decoding(format!("coordinates: {}", e)))?;
            let point = DimensionSpacePoint::from_json(&json).map_err(|e| {
                DatabaseError::row_decoding(format!("dimension point coordinates: {}", e))
            })?;
            points.push(point);
        }
        Ok(points)
    }

    // === Content streams and workspaces ===

    pub async fn insert_content_stream(
        &self,
        stream: &ContentStream,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO content_stream (id, source_content_stream_id, status)
                 VALUES (?, ?, ?)",
                (
                    stream.id.as_str().to_string(),
                    stream
                        .source_content_stream_id
                        .as_ref()
                        .map(|s| s.as_str().to_string()),
                    stream.status.as_str().to_string(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to insert content stream: {}", e))
            })?;
        Ok(())
    }

    pub async fn get_content_stream(
        &self,
        id: &ContentStreamId,
    ) -> Result<Option<ContentStream>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, source_content_stream_id, status FROM content_stream WHERE id = ?")
            .await?;
        let mut rows = stmt.query([id.as_str().to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_stream(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn update_content_stream_status(
        &self,
        id: &ContentStreamId,
        status: ContentStreamStatus,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE content_stream SET status = ? WHERE id = ?",
                (status.as_str().to_string(), id.as_str().to_string()),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to update stream status: {}", e))
            })?;
        Ok(())
    }

    pub async fn all_content_streams(&self) -> Result<Vec<ContentStream>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, source_content_stream_id, status FROM content_stream")
            .await?;
        let mut rows = stmt.query(()).await?;

        let mut streams = Vec::new();
        while let Some(row) = rows.next().await? {
            streams.push(Self::row_to_stream(&row)?);
        }
        Ok(streams)
    }

    pub async fn upsert_workspace(&self, workspace: &Workspace) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO workspace (name, current_content_stream_id) VALUES (?, ?)
                 ON CONFLICT(name) DO UPDATE SET current_content_stream_id = excluded.current_content_stream_id",
                (
                    workspace.name.as_str().to_string(),
                    workspace.current_content_stream_id.as_str().to_string(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to upsert workspace: {}", e))
            })?;
        Ok(())
    }

    pub async fn get_workspace(
        &self,
        name: &WorkspaceName,
    ) -> Result<Option<Workspace>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, current_content_stream_id FROM workspace WHERE name = ?")
            .await?;
        let mut rows = stmt.query([name.as_str().to_string()]).await?;

        match rows.next().await? {
            Some(row) => {
                let name: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::row_decoding(format!("workspace name: {}", e)))?;
                let stream: String = row.get(1).map_err(|e| {
                    DatabaseError::row_decoding(format!("workspace stream: {}", e))
                })?;
                Ok(Some(Workspace {
                    name: WorkspaceName::from_string(name),
                    current_content_stream_id: ContentStreamId::from_string(stream),
                }))
            }
            None => Ok(None),
        }
    }

    // === Checkpoint ===

    /// The sequence number of the last applied event, 0 when nothing has
    /// been applied.
    pub async fn checkpoint(&self) -> Result<i64, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT sequence_number FROM checkpoint WHERE id = 0")
            .await?;
        let mut rows = stmt.query(()).await?;

        match rows.next().await? {
            Some(row) => row
                .get(0)
                .map_err(|e| DatabaseError::row_decoding(format!("checkpoint: {}", e))),
            None => Err(DatabaseError::sql_execution("Checkpoint row missing")),
        }
    }

    pub async fn advance_checkpoint(&self, sequence_number: i64) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE checkpoint SET sequence_number = ? WHERE id = 0",
                [sequence_number],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to advance checkpoint: {}", e))
            })?;
        Ok(())
    }

    // === Garbage collection ===

    /// Delete node rows no hierarchy edge links any more, along with their
    /// outgoing reference rows. Runs after a content stream is removed.
    pub async fn remove_orphaned_nodes(&self) -> Result<u64, DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM reference_relation
                 WHERE source_relation_anchor_point IN (
                     SELECT relation_anchor_point FROM node
                     WHERE relation_anchor_point NOT IN (
                         SELECT child_relation_anchor_point FROM hierarchy_relation
                     )
                 )",
                (),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to collect orphaned references: {}", e))
            })?;

        let removed = self
            .conn
            .execute(
                "DELETE FROM node
                 WHERE relation_anchor_point NOT IN (
                     SELECT child_relation_anchor_point FROM hierarchy_relation
                 )",
                (),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to collect orphaned nodes: {}", e))
            })?;
        Ok(removed)
    }

    // === Row conversion ===

    fn row_to_node(row: &libsql::Row) -> Result<NodeRecord, DatabaseError> {
        let anchor: String = row
            .get(0)
            .map_err(|e| DatabaseError::row_decoding(format!("anchor: {}", e)))?;
        let aggregate_id: String = row
            .get(1)
            .map_err(|e| DatabaseError::row_decoding(format!("aggregate id: {}", e)))?;
        let origin_json: String = row
            .get(2)
            .map_err(|e| DatabaseError::row_decoding(format!("origin: {}", e)))?;
        let origin_hash: String = row
            .get(3)
            .map_err(|e| DatabaseError::row_decoding(format!("origin hash: {}", e)))?;
        let node_type: String = row
            .get(4)
            .map_err(|e| DatabaseError::row_decoding(format!("node type: {}", e)))?;
        let classification: String = row
            .get(5)
            .map_err(|e| DatabaseError::row_decoding(format!("classification: {}", e)))?;
        let name: Option<String> = row
            .get(6)
            .map_err(|e| DatabaseError::row_decoding(format!("node name: {}", e)))?;
        let properties_json: String = row
            .get(7)
            .map_err(|e| DatabaseError::row_decoding(format!("properties: {}", e)))?;
        let created_at: String = row
            .get(8)
            .map_err(|e| DatabaseError::row_decoding(format!("created_at: {}", e)))?;
        let modified_at: String = row
            .get(9)
            .map_err(|e| DatabaseError::row_decoding(format!("modified_at: {}", e)))?;

        let origin = OriginDimensionSpacePoint::from_json(&origin_json)
            .map_err(|e| DatabaseError::row_decoding(format!("origin coordinates: {}", e)))?;
        let properties: serde_json::Value = serde_json::from_str(&properties_json)
            .map_err(|e| DatabaseError::row_decoding(format!("properties json: {}", e)))?;
        let classification = NodeClassification::parse(&classification)
            .map_err(|e| DatabaseError::row_decoding(format!("classification: {}", e)))?;

        Ok(NodeRecord {
            anchor: RelationAnchorPoint::from_string(anchor),
            aggregate_id: NodeAggregateId::from_string(aggregate_id),
            origin,
            origin_hash: DimensionSpacePointHash::from_stored(origin_hash),
            node_type: NodeTypeName::from_string(node_type),
            classification,
            name: name.map(NodeName::from_string),
            properties,
            created_at: Self::parse_timestamp(&created_at)?,
            modified_at: Self::parse_timestamp(&modified_at)?,
        })
    }

    fn row_to_relation(row: &libsql::Row) -> Result<HierarchyRelation, DatabaseError> {
        let parent: String = row
            .get(0)
            .map_err(|e| DatabaseError::row_decoding(format!("parent anchor: {}", e)))?;
        let child: String = row
            .get(1)
            .map_err(|e| DatabaseError::row_decoding(format!("child anchor: {}", e)))?;
        let stream: String = row
            .get(2)
            .map_err(|e| DatabaseError::row_decoding(format!("content stream: {}", e)))?;
        let hash: String = row
            .get(3)
            .map_err(|e| DatabaseError::row_decoding(format!("dimension hash: {}", e)))?;
        let position: i64 = row
            .get(4)
            .map_err(|e| DatabaseError::row_decoding(format!("position: {}", e)))?;
        let tags_json: String = row
            .get(5)
            .map_err(|e| DatabaseError::row_decoding(format!("subtree tags: {}", e)))?;
        let name: Option<String> = row
            .get(6)
            .map_err(|e| DatabaseError::row_decoding(format!("edge name: {}", e)))?;

        let subtree_tags = SubtreeTags::from_json(&tags_json)
            .map_err(|e| DatabaseError::row_decoding(format!("subtree tags json: {}", e)))?;

        Ok(HierarchyRelation {
            parent_anchor: RelationAnchorPoint::from_string(parent),
            child_anchor: RelationAnchorPoint::from_string(child),
            content_stream_id: ContentStreamId::from_string(stream),
            dimension_space_point_hash: DimensionSpacePointHash::from_stored(hash),
            position,
            subtree_tags,
            name: name.map(NodeName::from_string),
        })
    }

    fn row_to_reference(row: &libsql::Row) -> Result<ReferenceRelation, DatabaseError> {
        let source: String = row
            .get(0)
            .map_err(|e| DatabaseError::row_decoding(format!("source anchor: {}", e)))?;
        let name: String = row
            .get(1)
            .map_err(|e| DatabaseError::row_decoding(format!("reference name: {}", e)))?;
        let position: i64 = row
            .get(2)
            .map_err(|e| DatabaseError::row_decoding(format!("reference position: {}", e)))?;
        let target: String = row
            .get(3)
            .map_err(|e| DatabaseError::row_decoding(format!("target aggregate: {}", e)))?;
        let properties_json: Option<String> = row
            .get(4)
            .map_err(|e| DatabaseError::row_decoding(format!("reference properties: {}", e)))?;

        let properties = match properties_json {
            Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
                DatabaseError::row_decoding(format!("reference properties json: {}", e))
            })?),
            None => None,
        };

        Ok(ReferenceRelation {
            source_anchor: RelationAnchorPoint::from_string(source),
            name,
            position,
            target_aggregate_id: NodeAggregateId::from_string(target),
            properties,
        })
    }

    fn row_to_stream(row: &libsql::Row) -> Result<ContentStream, DatabaseError> {
        let id: String = row
            .get(0)
            .map_err(|e| DatabaseError::row_decoding(format!("stream id: {}", e)))?;
        let source: Option<String> = row
            .get(1)
            .map_err(|e| DatabaseError::row_decoding(format!("stream source: {}", e)))?;
        let status: String = row
            .get(2)
            .map_err(|e| DatabaseError::row_decoding(format!("stream status: {}", e)))?;

        Ok(ContentStream {
            id: ContentStreamId::from_string(id),
            source_content_stream_id: source.map(ContentStreamId::from_string),
            status: ContentStreamStatus::parse(&status)
                .map_err(|e| DatabaseError::row_decoding(e.to_string()))?,
        })
    }

    /// Parse timestamps in either SQLite's default format or RFC3339.
    fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DatabaseError> {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
            return Ok(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DatabaseError::row_decoding(format!("timestamp '{}': {}", value, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::database::DatabaseService;
    use crate::models::DimensionSpacePoint;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store() -> anyhow::Result<(TempDir, GraphStore)> {
        let temp_dir = TempDir::new()?;
        let db = DatabaseService::new(temp_dir.path().join("graph.db")).await?;
        let conn = db.connect_with_timeout().await?;
        Ok((temp_dir, GraphStore::new(conn)))
    }

    fn sample_node() -> NodeRecord {
        NodeRecord::new(
            NodeAggregateId::new(),
            OriginDimensionSpacePoint::from_point(DimensionSpacePoint::from_pairs([(
                "language", "en",
            )])),
            NodeTypeName::from_string("Document"),
            NodeClassification::Regular,
            Some(NodeName::from_string("main")),
            json!({"title": "Home"}),
        )
    }

    #[tokio::test]
    async fn node_round_trip() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let node = sample_node();

        store.insert_node(&node).await?;
        let loaded = store.get_node(&node.anchor).await?.expect("node stored");

        assert_eq!(loaded.aggregate_id, node.aggregate_id);
        assert_eq!(loaded.origin, node.origin);
        assert_eq!(loaded.origin_hash, node.origin_hash);
        assert_eq!(loaded.properties, node.properties);
        assert_eq!(loaded.name, node.name);
        Ok(())
    }

    #[tokio::test]
    async fn children_come_back_in_position_order() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let stream = ContentStreamId::new();
        let hash = DimensionSpacePoint::empty().hash();
        let parent = RelationAnchorPoint::new();

        let mut anchors = Vec::new();
        for position in [384i64, 128, 256] {
            let child = RelationAnchorPoint::new();
            store
                .insert_hierarchy_relation(&HierarchyRelation {
                    parent_anchor: parent.clone(),
                    child_anchor: child.clone(),
                    content_stream_id: stream.clone(),
                    dimension_space_point_hash: hash.clone(),
                    position,
                    subtree_tags: SubtreeTags::new(),
                    name: None,
                })
                .await?;
            anchors.push((position, child));
        }

        let children = store.child_relations(&stream, &hash, &parent).await?;
        let positions: Vec<i64> = children.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![128, 256, 384]);
        Ok(())
    }

    #[tokio::test]
    async fn repoint_anchor_is_stream_scoped() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let hash = DimensionSpacePoint::empty().hash();
        let shared = RelationAnchorPoint::new();
        let fresh = RelationAnchorPoint::new();
        let stream_a = ContentStreamId::new();
        let stream_b = ContentStreamId::new();

        for stream in [&stream_a, &stream_b] {
            store
                .insert_hierarchy_relation(&HierarchyRelation {
                    parent_anchor: RelationAnchorPoint::root_sentinel(),
                    child_anchor: shared.clone(),
                    content_stream_id: stream.clone(),
                    dimension_space_point_hash: hash.clone(),
                    position: 128,
                    subtree_tags: SubtreeTags::new(),
                    name: None,
                })
                .await?;
        }

        store.repoint_anchor(&stream_a, &shared, &fresh).await?;

        let a = store
            .parent_relation_of(&stream_a, &hash, &fresh)
            .await?
            .expect("repointed edge");
        assert_eq!(a.child_anchor, fresh);

        let b = store
            .parent_relation_of(&stream_b, &hash, &shared)
            .await?
            .expect("untouched edge");
        assert_eq!(b.child_anchor, shared);
        Ok(())
    }

    #[tokio::test]
    async fn orphan_collection_spares_linked_nodes() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let linked = sample_node();
        let orphan = sample_node();
        store.insert_node(&linked).await?;
        store.insert_node(&orphan).await?;

        store
            .insert_hierarchy_relation(&HierarchyRelation {
                parent_anchor: RelationAnchorPoint::root_sentinel(),
                child_anchor: linked.anchor.clone(),
                content_stream_id: ContentStreamId::new(),
                dimension_space_point_hash: DimensionSpacePoint::empty().hash(),
                position: 128,
                subtree_tags: SubtreeTags::new(),
                name: None,
            })
            .await?;

        let removed = store.remove_orphaned_nodes().await?;
        assert_eq!(removed, 1);
        assert!(store.get_node(&linked.anchor).await?.is_some());
        assert!(store.get_node(&orphan.anchor).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn checkpoint_advances() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        assert_eq!(store.checkpoint().await?, 0);
        store.advance_checkpoint(5).await?;
        assert_eq!(store.checkpoint().await?, 5);
        Ok(())
    }
}
