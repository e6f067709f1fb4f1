//! Graph Projector
//!
//! Applies the event log to the graph tables. One event is one transaction:
//! all of its row effects and the checkpoint advance commit together or not
//! at all. Restarting mid-log is safe because replayed events (sequence at
//! or below the checkpoint) are skipped, and a sequence number beyond
//! checkpoint + 1 is rejected as a gap.
//!
//! The projector is the single writer of the graph tables. Readers go
//! through the query layer on their own connections; WAL mode keeps them
//! unblocked while a transaction is open here.

use crate::db::graph_store::GraphStore;
use crate::models::dimension::{DimensionSpacePointHash, DimensionSpacePointSet};
use crate::models::events::{EventEnvelope, GraphEvent, ReferenceTarget};
use crate::models::node::{
    NodeAggregateId, NodeClassification, NodeName, NodeRecord, NodeTypeName, RelationAnchorPoint,
};
use crate::models::relation::{HierarchyRelation, ReferenceRelation};
use crate::models::stream::{ContentStream, ContentStreamId, ContentStreamStatus};
use crate::models::tags::{SubtreeTag, SubtreeTags};
use crate::models::OriginDimensionSpacePoint;
use crate::projection::copy_on_write::CopyOnWriteEngine;
use crate::projection::dimension_adjustment::DimensionAdjustmentEngine;
use crate::projection::error::ProjectionError;
use crate::projection::ordering::{assign_position, PositionAssignment};

pub struct GraphProjector {
    store: GraphStore,
}

impl GraphProjector {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Apply one enveloped event.
    ///
    /// Returns `Ok(())` without touching anything when the event was already
    /// applied (replay). Fails with [`ProjectionError::CheckpointGap`] when
    /// the sequence skips ahead.
    pub async fn apply(&self, envelope: &EventEnvelope) -> Result<(), ProjectionError> {
        let checkpoint = self.store.checkpoint().await?;

        if envelope.sequence_number <= checkpoint {
            tracing::debug!(
                sequence = envelope.sequence_number,
                checkpoint,
                kind = envelope.event.kind(),
                "Skipping replayed event"
            );
            return Ok(());
        }
        if envelope.sequence_number != checkpoint + 1 {
            return Err(ProjectionError::CheckpointGap {
                expected: checkpoint + 1,
                actual: envelope.sequence_number,
            });
        }

        self.store.begin().await?;

        let result = self.apply_event(&envelope.event).await;
        match result {
            Ok(()) => {
                self.store
                    .advance_checkpoint(envelope.sequence_number)
                    .await?;
                self.store.commit().await?;
                tracing::debug!(
                    sequence = envelope.sequence_number,
                    kind = envelope.event.kind(),
                    "Applied event"
                );
                Ok(())
            }
            Err(e) => {
                self.store.rollback().await?;
                Err(e)
            }
        }
    }

    async fn apply_event(&self, event: &GraphEvent) -> Result<(), ProjectionError> {
        match event {
            GraphEvent::RootNodeAggregateCreated {
                content_stream_id,
                node_aggregate_id,
                node_type,
                coverage,
            } => {
                self.when_root_node_aggregate_created(
                    content_stream_id,
                    node_aggregate_id,
                    node_type,
                    coverage,
                )
                .await
            }
            GraphEvent::NodeAggregateCreated {
                content_stream_id,
                node_aggregate_id,
                node_type,
                origin,
                coverage,
                parent_node_aggregate_id,
                node_name,
                succeeding_sibling_id,
                initial_properties,
                classification,
            } => {
                self.when_node_aggregate_created(
                    content_stream_id,
                    node_aggregate_id,
                    node_type,
                    origin,
                    coverage,
                    parent_node_aggregate_id,
                    node_name.as_ref(),
                    succeeding_sibling_id.as_ref(),
                    initial_properties,
                    *classification,
                )
                .await
            }
            GraphEvent::NodePropertiesSet {
                content_stream_id,
                node_aggregate_id,
                origin,
                property_values,
            } => {
                self.when_node_properties_set(
                    content_stream_id,
                    node_aggregate_id,
                    origin,
                    property_values,
                )
                .await
            }
            GraphEvent::NodeAggregateMoved {
                content_stream_id,
                node_aggregate_id,
                affected_dimension_space_points,
                new_parent_id,
                new_succeeding_sibling_id,
            } => {
                self.when_node_aggregate_moved(
                    content_stream_id,
                    node_aggregate_id,
                    affected_dimension_space_points,
                    new_parent_id.as_ref(),
                    new_succeeding_sibling_id.as_ref(),
                )
                .await
            }
            GraphEvent::NodeReferencesSet {
                content_stream_id,
                source_aggregate_id,
                source_origin,
                reference_name,
                targets,
            } => {
                self.when_node_references_set(
                    content_stream_id,
                    source_aggregate_id,
                    source_origin,
                    reference_name,
                    targets,
                )
                .await
            }
            GraphEvent::SubtreeTagged {
                content_stream_id,
                node_aggregate_id,
                tag,
            } => {
                self.when_subtree_tag_changed(content_stream_id, node_aggregate_id, tag, true)
                    .await
            }
            GraphEvent::SubtreeUntagged {
                content_stream_id,
                node_aggregate_id,
                tag,
            } => {
                self.when_subtree_tag_changed(content_stream_id, node_aggregate_id, tag, false)
                    .await
            }
            GraphEvent::NodeAggregateRenamed {
                content_stream_id,
                node_aggregate_id,
                new_name,
            } => {
                self.when_node_aggregate_renamed(content_stream_id, node_aggregate_id, new_name)
                    .await
            }
            GraphEvent::NodeAggregateTypeChanged {
                content_stream_id,
                node_aggregate_id,
                new_node_type,
            } => {
                self.when_node_aggregate_type_changed(
                    content_stream_id,
                    node_aggregate_id,
                    new_node_type,
                )
                .await
            }
            GraphEvent::NodeAggregateRemoved {
                content_stream_id,
                node_aggregate_id,
                affected_coverage,
            } => {
                self.when_node_aggregate_removed(
                    content_stream_id,
                    node_aggregate_id,
                    affected_coverage,
                )
                .await
            }
            GraphEvent::DimensionSpacePointMoved {
                content_stream_id,
                source,
                target,
            } => {
                self.require_open_stream(content_stream_id).await?;
                DimensionAdjustmentEngine::new(&self.store)
                    .move_dimension_point(content_stream_id, source, target)
                    .await
            }
            GraphEvent::DimensionShineThroughAdded {
                content_stream_id,
                source,
                target,
            } => {
                self.require_open_stream(content_stream_id).await?;
                DimensionAdjustmentEngine::new(&self.store)
                    .add_shine_through(content_stream_id, source, target)
                    .await
            }
            GraphEvent::ContentStreamForked {
                source_content_stream_id,
                new_content_stream_id,
            } => {
                self.when_content_stream_forked(source_content_stream_id, new_content_stream_id)
                    .await
            }
            GraphEvent::ContentStreamRemoved { content_stream_id } => {
                self.when_content_stream_removed(content_stream_id).await
            }
        }
    }

    // === Event handlers ===

    async fn when_root_node_aggregate_created(
        &self,
        stream: &ContentStreamId,
        aggregate_id: &NodeAggregateId,
        node_type: &NodeTypeName,
        coverage: &DimensionSpacePointSet,
    ) -> Result<(), ProjectionError> {
        // The first root of a fresh graph also establishes the stream row.
        if self.store.get_content_stream(stream).await?.is_none() {
            self.store
                .insert_content_stream(&ContentStream::root(stream.clone()))
                .await?;
        }

        let node = NodeRecord::new(
            aggregate_id.clone(),
            OriginDimensionSpacePoint::empty(),
            node_type.clone(),
            NodeClassification::Root,
            None,
            serde_json::json!({}),
        );
        self.store.insert_node(&node).await?;
        self.store
            .register_dimension_space_point(node.origin.as_point())
            .await?;

        let sentinel = RelationAnchorPoint::root_sentinel();
        for point in coverage.iter() {
            self.store.register_dimension_space_point(point).await?;
            let hash = point.hash();
            let roots = self.store.child_relations(stream, &hash, &sentinel).await?;
            let assignment = assign_position(&roots, None)?;
            let position = self.apply_assignment(stream, &hash, assignment).await?;

            self.store
                .insert_hierarchy_relation(&HierarchyRelation {
                    parent_anchor: sentinel.clone(),
                    child_anchor: node.anchor.clone(),
                    content_stream_id: stream.clone(),
                    dimension_space_point_hash: hash,
                    position,
                    subtree_tags: SubtreeTags::new(),
                    name: None,
                })
                .await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn when_node_aggregate_created(
        &self,
        stream: &ContentStreamId,
        aggregate_id: &NodeAggregateId,
        node_type: &NodeTypeName,
        origin: &OriginDimensionSpacePoint,
        coverage: &DimensionSpacePointSet,
        parent_id: &NodeAggregateId,
        name: Option<&NodeName>,
        succeeding_sibling_id: Option<&NodeAggregateId>,
        initial_properties: &serde_json::Value,
        classification: NodeClassification,
    ) -> Result<(), ProjectionError> {
        self.require_open_stream(stream).await?;
        if !initial_properties.is_object() {
            return Err(ProjectionError::invalid_event(
                "Initial properties must be a JSON object",
            ));
        }
        if !coverage.contains(origin.as_point()) {
            return Err(ProjectionError::invalid_event(
                "Coverage must include the origin point",
            ));
        }

        let node = NodeRecord::new(
            aggregate_id.clone(),
            origin.clone(),
            node_type.clone(),
            classification,
            name.cloned(),
            initial_properties.clone(),
        );
        self.store.insert_node(&node).await?;

        for point in coverage.iter() {
            self.store.register_dimension_space_point(point).await?;
            let hash = point.hash();

            let parent_anchor = self.resolve_anchor(stream, &hash, parent_id).await?;
            let siblings = self
                .store
                .child_relations(stream, &hash, &parent_anchor)
                .await?;
            let succeeding = self
                .succeeding_anchor(stream, &hash, succeeding_sibling_id)
                .await?;
            let assignment = assign_position(&siblings, succeeding.as_ref())?;
            let position = self.apply_assignment(stream, &hash, assignment).await?;

            // New edges inherit the parent edge's effective tags.
            let subtree_tags = match self
                .store
                .parent_relation_of(stream, &hash, &parent_anchor)
                .await?
            {
                Some(parent_relation) => parent_relation.subtree_tags.inherit(),
                None => SubtreeTags::new(),
            };

            self.store
                .insert_hierarchy_relation(&HierarchyRelation {
                    parent_anchor,
                    child_anchor: node.anchor.clone(),
                    content_stream_id: stream.clone(),
                    dimension_space_point_hash: hash,
                    position,
                    subtree_tags,
                    name: name.cloned(),
                })
                .await?;
        }
        Ok(())
    }

    async fn when_node_properties_set(
        &self,
        stream: &ContentStreamId,
        aggregate_id: &NodeAggregateId,
        origin: &OriginDimensionSpacePoint,
        property_values: &serde_json::Value,
    ) -> Result<(), ProjectionError> {
        self.require_open_stream(stream).await?;

        let origin_hash = origin.hash();
        let anchor = self.resolve_anchor(stream, &origin_hash, aggregate_id).await?;
        let record = self
            .store
            .get_node(&anchor)
            .await?
            .ok_or_else(|| ProjectionError::AnchorNotFound(anchor.clone()))?;
        if record.origin_hash != origin_hash {
            return Err(ProjectionError::invalid_event(format!(
                "Node aggregate {} does not occupy origin {}",
                aggregate_id, origin
            )));
        }

        let cow = CopyOnWriteEngine::new(&self.store);
        cow.write_node(stream, &anchor, |node| {
            node.merge_properties(property_values);
        })
        .await?;
        Ok(())
    }

    async fn when_node_aggregate_moved(
        &self,
        stream: &ContentStreamId,
        aggregate_id: &NodeAggregateId,
        affected: &DimensionSpacePointSet,
        new_parent_id: Option<&NodeAggregateId>,
        new_succeeding_sibling_id: Option<&NodeAggregateId>,
    ) -> Result<(), ProjectionError> {
        self.require_open_stream(stream).await?;

        for point in affected.iter() {
            let hash = point.hash();
            let relation = self
                .store
                .relation_for_aggregate(stream, &hash, aggregate_id)
                .await?
                .ok_or_else(|| {
                    ProjectionError::missing_anchor(
                        aggregate_id.clone(),
                        stream.clone(),
                        hash.clone(),
                    )
                })?;

            let new_parent_anchor = match new_parent_id {
                Some(parent_id) => self.resolve_anchor(stream, &hash, parent_id).await?,
                None => relation.parent_anchor.clone(),
            };

            let mut siblings = self
                .store
                .child_relations(stream, &hash, &new_parent_anchor)
                .await?;
            siblings.retain(|r| r.child_anchor != relation.child_anchor);

            let succeeding = self
                .succeeding_anchor(stream, &hash, new_succeeding_sibling_id)
                .await?;
            let assignment = assign_position(&siblings, succeeding.as_ref())?;
            let position = self.apply_assignment(stream, &hash, assignment).await?;

            let inherited = match self
                .store
                .parent_relation_of(stream, &hash, &new_parent_anchor)
                .await?
            {
                Some(parent_relation) => parent_relation.subtree_tags.inherit().inherited,
                None => Default::default(),
            };
            let subtree_tags = SubtreeTags {
                explicit: relation.subtree_tags.explicit.clone(),
                inherited,
            };

            self.store
                .delete_relation(stream, &hash, &relation.child_anchor)
                .await?;
            self.store
                .insert_hierarchy_relation(&HierarchyRelation {
                    parent_anchor: new_parent_anchor,
                    child_anchor: relation.child_anchor.clone(),
                    content_stream_id: stream.clone(),
                    dimension_space_point_hash: hash.clone(),
                    position,
                    subtree_tags,
                    name: relation.name.clone(),
                })
                .await?;

            self.recompute_inherited_tags(stream, &hash, &relation.child_anchor)
                .await?;
        }
        Ok(())
    }

    async fn when_node_references_set(
        &self,
        stream: &ContentStreamId,
        source_aggregate_id: &NodeAggregateId,
        source_origin: &OriginDimensionSpacePoint,
        reference_name: &str,
        targets: &[ReferenceTarget],
    ) -> Result<(), ProjectionError> {
        self.require_open_stream(stream).await?;

        let origin_hash = source_origin.hash();
        let anchor = self
            .resolve_anchor(stream, &origin_hash, source_aggregate_id)
            .await?;

        // Force a private row even though the node itself does not change:
        // reference rows hang off the anchor, so writing them on a shared
        // anchor would leak into every sharing stream.
        let cow = CopyOnWriteEngine::new(&self.store);
        let anchor = cow.write_node(stream, &anchor, |_| {}).await?;

        self.store.delete_references(&anchor, reference_name).await?;
        for (position, target) in targets.iter().enumerate() {
            self.store
                .insert_reference(&ReferenceRelation {
                    source_anchor: anchor.clone(),
                    name: reference_name.to_string(),
                    position: position as i64,
                    target_aggregate_id: target.target_aggregate_id.clone(),
                    properties: target.properties.clone(),
                })
                .await?;
        }
        Ok(())
    }

    async fn when_subtree_tag_changed(
        &self,
        stream: &ContentStreamId,
        aggregate_id: &NodeAggregateId,
        tag: &SubtreeTag,
        add: bool,
    ) -> Result<(), ProjectionError> {
        self.require_open_stream(stream).await?;

        let relations = self.stream_relations_of_aggregate(stream, aggregate_id).await?;
        if relations.is_empty() {
            return Err(ProjectionError::NodeNotFound(aggregate_id.clone()));
        }

        for relation in relations {
            let mut tags = relation.subtree_tags.clone();
            if add {
                tags.explicit.insert(tag.clone());
            } else {
                tags.explicit.remove(tag);
            }
            self.store
                .update_relation_tags(
                    stream,
                    &relation.dimension_space_point_hash,
                    &relation.child_anchor,
                    &tags,
                )
                .await?;
            self.recompute_inherited_tags(
                stream,
                &relation.dimension_space_point_hash,
                &relation.child_anchor,
            )
            .await?;
        }
        Ok(())
    }

    async fn when_node_aggregate_renamed(
        &self,
        stream: &ContentStreamId,
        aggregate_id: &NodeAggregateId,
        new_name: &NodeName,
    ) -> Result<(), ProjectionError> {
        self.require_open_stream(stream).await?;

        let anchors = self.stream_anchors_of_aggregate(stream, aggregate_id).await?;
        if anchors.is_empty() {
            return Err(ProjectionError::NodeNotFound(aggregate_id.clone()));
        }

        let cow = CopyOnWriteEngine::new(&self.store);
        for anchor in anchors {
            let new_anchor = cow
                .write_node(stream, &anchor, |node| {
                    node.name = Some(new_name.clone());
                })
                .await?;
            self.store
                .set_relation_name_for_child(stream, &new_anchor, Some(new_name))
                .await?;
        }
        Ok(())
    }

    async fn when_node_aggregate_type_changed(
        &self,
        stream: &ContentStreamId,
        aggregate_id: &NodeAggregateId,
        new_node_type: &NodeTypeName,
    ) -> Result<(), ProjectionError> {
        self.require_open_stream(stream).await?;

        let anchors = self.stream_anchors_of_aggregate(stream, aggregate_id).await?;
        if anchors.is_empty() {
            return Err(ProjectionError::NodeNotFound(aggregate_id.clone()));
        }

        let cow = CopyOnWriteEngine::new(&self.store);
        for anchor in anchors {
            cow.write_node(stream, &anchor, |node| {
                node.node_type = new_node_type.clone();
            })
            .await?;
        }
        Ok(())
    }

    async fn when_node_aggregate_removed(
        &self,
        stream: &ContentStreamId,
        aggregate_id: &NodeAggregateId,
        affected_coverage: &DimensionSpacePointSet,
    ) -> Result<(), ProjectionError> {
        self.require_open_stream(stream).await?;

        for point in affected_coverage.iter() {
            let hash = point.hash();
            // The aggregate may not be visible at every listed point.
            if let Some(relation) = self
                .store
                .relation_for_aggregate(stream, &hash, aggregate_id)
                .await?
            {
                self.remove_subtree_edges(stream, &hash, &relation.child_anchor)
                    .await?;
            }
        }
        // Node rows linger; stream removal garbage-collects them.
        Ok(())
    }

    async fn when_content_stream_forked(
        &self,
        source: &ContentStreamId,
        new: &ContentStreamId,
    ) -> Result<(), ProjectionError> {
        if self.store.get_content_stream(source).await?.is_none() {
            return Err(ProjectionError::StreamNotFound(source.clone()));
        }
        self.store
            .insert_content_stream(&ContentStream::forked_from(new.clone(), source.clone()))
            .await?;
        let copied = self.store.copy_stream_relations(source, new).await?;
        tracing::debug!(
            source = %source,
            new = %new,
            edges = copied,
            "Forked content stream"
        );
        Ok(())
    }

    async fn when_content_stream_removed(
        &self,
        stream: &ContentStreamId,
    ) -> Result<(), ProjectionError> {
        if self.store.get_content_stream(stream).await?.is_none() {
            return Err(ProjectionError::StreamNotFound(stream.clone()));
        }
        self.store
            .update_content_stream_status(stream, ContentStreamStatus::Removed)
            .await?;
        self.store.delete_relations_for_stream(stream).await?;
        let collected = self.store.remove_orphaned_nodes().await?;
        tracing::debug!(stream = %stream, collected, "Removed content stream");
        Ok(())
    }

    // === Helpers ===

    async fn require_open_stream(&self, stream: &ContentStreamId) -> Result<(), ProjectionError> {
        match self.store.get_content_stream(stream).await? {
            Some(row) if row.status == ContentStreamStatus::Open => Ok(()),
            Some(_) => Err(ProjectionError::invalid_event(format!(
                "Content stream {} is not open",
                stream
            ))),
            None => Err(ProjectionError::StreamNotFound(stream.clone())),
        }
    }

    async fn resolve_anchor(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        aggregate_id: &NodeAggregateId,
    ) -> Result<RelationAnchorPoint, ProjectionError> {
        self.store
            .anchor_of_aggregate(stream, hash, aggregate_id)
            .await?
            .ok_or_else(|| {
                ProjectionError::missing_anchor(aggregate_id.clone(), stream.clone(), hash.clone())
            })
    }

    /// Resolve the succeeding sibling at one point. A sibling absent at this
    /// point is not an error; the new element goes to the end there.
    async fn succeeding_anchor(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        sibling_id: Option<&NodeAggregateId>,
    ) -> Result<Option<RelationAnchorPoint>, ProjectionError> {
        match sibling_id {
            Some(id) => Ok(self.store.anchor_of_aggregate(stream, hash, id).await?),
            None => Ok(None),
        }
    }

    /// Write out a position assignment's renumbering updates and hand back
    /// the new element's position.
    async fn apply_assignment(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        assignment: PositionAssignment,
    ) -> Result<i64, ProjectionError> {
        match assignment {
            PositionAssignment::Direct(position) => Ok(position),
            PositionAssignment::Renumbered { updates, position } => {
                for (anchor, new_position) in updates {
                    self.store
                        .update_relation_position(stream, hash, &anchor, new_position)
                        .await?;
                }
                Ok(position)
            }
        }
    }

    /// Push effective tags down the subtree below `start`, breadth-first.
    async fn recompute_inherited_tags(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        start: &RelationAnchorPoint,
    ) -> Result<(), ProjectionError> {
        let start_relation = self
            .store
            .parent_relation_of(stream, hash, start)
            .await?
            .ok_or_else(|| ProjectionError::AnchorNotFound(start.clone()))?;

        let mut frontier = vec![(start.clone(), start_relation.subtree_tags.effective())];
        while let Some((parent, effective)) = frontier.pop() {
            for child in self.store.child_relations(stream, hash, &parent).await? {
                let mut tags = child.subtree_tags.clone();
                tags.inherited = effective.clone();
                if tags != child.subtree_tags {
                    self.store
                        .update_relation_tags(stream, hash, &child.child_anchor, &tags)
                        .await?;
                }
                frontier.push((child.child_anchor, tags.effective()));
            }
        }
        Ok(())
    }

    /// Delete the hierarchy edges of a whole subtree within one subgraph.
    async fn remove_subtree_edges(
        &self,
        stream: &ContentStreamId,
        hash: &DimensionSpacePointHash,
        root: &RelationAnchorPoint,
    ) -> Result<(), ProjectionError> {
        let mut frontier = vec![root.clone()];
        while let Some(anchor) = frontier.pop() {
            for child in self.store.child_relations(stream, hash, &anchor).await? {
                frontier.push(child.child_anchor);
            }
            self.store.delete_relation(stream, hash, &anchor).await?;
        }
        Ok(())
    }

    /// Hierarchy edges of every row of one aggregate within one stream,
    /// across dimension points.
    async fn stream_relations_of_aggregate(
        &self,
        stream: &ContentStreamId,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Vec<HierarchyRelation>, ProjectionError> {
        let mut result = Vec::new();
        for record in self.store.nodes_by_aggregate_id(aggregate_id).await? {
            for relation in self.store.relations_for_child_anchor(&record.anchor).await? {
                if &relation.content_stream_id == stream {
                    result.push(relation);
                }
            }
        }
        Ok(result)
    }

    /// Anchors of one aggregate linked into one stream, deduplicated.
    async fn stream_anchors_of_aggregate(
        &self,
        stream: &ContentStreamId,
        aggregate_id: &NodeAggregateId,
    ) -> Result<Vec<RelationAnchorPoint>, ProjectionError> {
        let mut anchors = Vec::new();
        for relation in self.stream_relations_of_aggregate(stream, aggregate_id).await? {
            if !anchors.contains(&relation.child_anchor) {
                anchors.push(relation.child_anchor);
            }
        }
        Ok(anchors)
    }
}

#[cfg(test)]
#[path = "projector_test.rs"]
mod projector_test;
