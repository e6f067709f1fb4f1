//! Dimension Space Adjustments
//!
//! Two structural migrations of the variation space, applied per content
//! stream:
//!
//! - **Move**: a dimension point's coordinates change identity. Node rows
//!   authored at the source origin are rewritten (through copy-on-write, so
//!   sharing streams are unaffected), then every edge keyed by the source
//!   hash is re-keyed to the target hash. A round trip of two moves restores
//!   the original subgraph.
//! - **Shine-through**: a new dimension point is introduced that falls back
//!   to an existing one. Edges are duplicated under the target hash; node
//!   rows are untouched, so content shows through into the new point until
//!   it is materialized there.

use crate::db::graph_store::GraphStore;
use crate::models::dimension::DimensionSpacePoint;
use crate::models::stream::ContentStreamId;
use crate::models::OriginDimensionSpacePoint;
use crate::projection::copy_on_write::CopyOnWriteEngine;
use crate::projection::error::ProjectionError;
use std::collections::HashSet;

pub struct DimensionAdjustmentEngine<'a> {
    store: &'a GraphStore,
}

impl<'a> DimensionAdjustmentEngine<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Rewrite one stream's subgraph from `source` to `target`.
    pub async fn move_dimension_point(
        &self,
        stream: &ContentStreamId,
        source: &DimensionSpacePoint,
        target: &DimensionSpacePoint,
    ) -> Result<(), ProjectionError> {
        if source == target {
            return Err(ProjectionError::invalid_event(
                "Dimension point move requires distinct source and target",
            ));
        }

        self.store.register_dimension_space_point(target).await?;

        let source_hash = source.hash();
        let target_hash = target.hash();

        // Rewrite origins first, while the edges are still keyed by the
        // source hash: copy-on-write locates the rows through those edges.
        let relations = self.store.relations_at_hash(stream, &source_hash).await?;
        let cow = CopyOnWriteEngine::new(self.store);
        let mut seen = HashSet::new();

        for relation in &relations {
            if !seen.insert(relation.child_anchor.clone()) {
                continue;
            }
            let record = self
                .store
                .get_node(&relation.child_anchor)
                .await?
                .ok_or_else(|| ProjectionError::AnchorNotFound(relation.child_anchor.clone()))?;

            if record.origin_hash == source_hash {
                let new_origin = OriginDimensionSpacePoint::from_point(target.clone());
                cow.write_node(stream, &relation.child_anchor, |node| {
                    node.set_origin(new_origin);
                })
                .await?;
            }
        }

        self.store
            .rewrite_relation_hash(stream, &source_hash, &target_hash)
            .await?;
        Ok(())
    }

    /// Duplicate one stream's subgraph edges under a new fallback point.
    pub async fn add_shine_through(
        &self,
        stream: &ContentStreamId,
        source: &DimensionSpacePoint,
        target: &DimensionSpacePoint,
    ) -> Result<(), ProjectionError> {
        if source == target {
            return Err(ProjectionError::invalid_event(
                "Shine-through requires distinct source and target",
            ));
        }

        self.store.register_dimension_space_point(target).await?;
        self.store
            .copy_relations_to_hash(stream, &source.hash(), &target.hash())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::database::DatabaseService;
    use crate::models::node::{
        NodeAggregateId, NodeClassification, NodeRecord, NodeTypeName, RelationAnchorPoint,
    };
    use crate::models::relation::HierarchyRelation;
    use crate::models::tags::SubtreeTags;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store() -> anyhow::Result<(TempDir, GraphStore)> {
        let temp_dir = TempDir::new()?;
        let db = DatabaseService::new(temp_dir.path().join("graph.db")).await?;
        let conn = db.connect_with_timeout().await?;
        Ok((temp_dir, GraphStore::new(conn)))
    }

    async fn seed_node_at(
        store: &GraphStore,
        stream: &ContentStreamId,
        origin: &DimensionSpacePoint,
    ) -> anyhow::Result<RelationAnchorPoint> {
        let node = NodeRecord::new(
            NodeAggregateId::new(),
            OriginDimensionSpacePoint::from_point(origin.clone()),
            NodeTypeName::from_string("Document"),
            NodeClassification::Regular,
            None,
            json!({}),
        );
        store.insert_node(&node).await?;
        store
            .insert_hierarchy_relation(&HierarchyRelation {
                parent_anchor: RelationAnchorPoint::root_sentinel(),
                child_anchor: node.anchor.clone(),
                content_stream_id: stream.clone(),
                dimension_space_point_hash: origin.hash(),
                position: 128,
                subtree_tags: SubtreeTags::new(),
                name: None,
            })
            .await?;
        Ok(node.anchor)
    }

    #[tokio::test]
    async fn move_rewrites_origin_and_edges() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let stream = ContentStreamId::new();
        let source = DimensionSpacePoint::from_pairs([("language", "en")]);
        let target = DimensionSpacePoint::from_pairs([("language", "en-us")]);
        let anchor = seed_node_at(&store, &stream, &source).await?;

        let engine = DimensionAdjustmentEngine::new(&store);
        engine
            .move_dimension_point(&stream, &source, &target)
            .await?;

        assert!(store.relations_at_hash(&stream, &source.hash()).await?.is_empty());
        let moved = store.relations_at_hash(&stream, &target.hash()).await?;
        assert_eq!(moved.len(), 1);

        let node = store.get_node(&anchor).await?.unwrap();
        assert_eq!(node.origin_hash, target.hash());
        Ok(())
    }

    #[tokio::test]
    async fn move_round_trip_restores_the_subgraph() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let stream = ContentStreamId::new();
        let source = DimensionSpacePoint::from_pairs([("language", "en")]);
        let target = DimensionSpacePoint::from_pairs([("language", "en-us")]);
        let anchor = seed_node_at(&store, &stream, &source).await?;

        let engine = DimensionAdjustmentEngine::new(&store);
        engine
            .move_dimension_point(&stream, &source, &target)
            .await?;
        engine
            .move_dimension_point(&stream, &target, &source)
            .await?;

        let back = store.relations_at_hash(&stream, &source.hash()).await?;
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].child_anchor, anchor);

        let node = store.get_node(&anchor).await?.unwrap();
        assert_eq!(node.origin_hash, source.hash());
        Ok(())
    }

    #[tokio::test]
    async fn move_forks_rows_shared_with_other_streams() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let stream_a = ContentStreamId::new();
        let stream_b = ContentStreamId::new();
        let source = DimensionSpacePoint::from_pairs([("language", "en")]);
        let target = DimensionSpacePoint::from_pairs([("language", "en-us")]);

        let anchor = seed_node_at(&store, &stream_a, &source).await?;
        // The second stream links the same anchor, as a fork would.
        store
            .insert_hierarchy_relation(&HierarchyRelation {
                parent_anchor: RelationAnchorPoint::root_sentinel(),
                child_anchor: anchor.clone(),
                content_stream_id: stream_b.clone(),
                dimension_space_point_hash: source.hash(),
                position: 128,
                subtree_tags: SubtreeTags::new(),
                name: None,
            })
            .await?;

        let engine = DimensionAdjustmentEngine::new(&store);
        engine
            .move_dimension_point(&stream_b, &source, &target)
            .await?;

        // The shared row kept its origin for the untouched stream.
        let original = store.get_node(&anchor).await?.unwrap();
        assert_eq!(original.origin_hash, source.hash());
        let a_edges = store.relations_at_hash(&stream_a, &source.hash()).await?;
        assert_eq!(a_edges.len(), 1);
        assert_eq!(a_edges[0].child_anchor, anchor);

        // The moving stream got a private row at the target origin.
        let b_edges = store.relations_at_hash(&stream_b, &target.hash()).await?;
        assert_eq!(b_edges.len(), 1);
        assert_ne!(b_edges[0].child_anchor, anchor);
        let forked = store.get_node(&b_edges[0].child_anchor).await?.unwrap();
        assert_eq!(forked.origin_hash, target.hash());
        Ok(())
    }

    #[tokio::test]
    async fn shine_through_duplicates_edges_only() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let stream = ContentStreamId::new();
        let source = DimensionSpacePoint::from_pairs([("language", "en")]);
        let target = DimensionSpacePoint::from_pairs([("language", "en-gb")]);
        let anchor = seed_node_at(&store, &stream, &source).await?;

        let engine = DimensionAdjustmentEngine::new(&store);
        engine.add_shine_through(&stream, &source, &target).await?;

        // Both hashes now carry an edge to the same anchor.
        let at_source = store.relations_at_hash(&stream, &source.hash()).await?;
        let at_target = store.relations_at_hash(&stream, &target.hash()).await?;
        assert_eq!(at_source.len(), 1);
        assert_eq!(at_target.len(), 1);
        assert_eq!(at_target[0].child_anchor, anchor);

        // The node row kept its source origin.
        let node = store.get_node(&anchor).await?.unwrap();
        assert_eq!(node.origin_hash, source.hash());
        Ok(())
    }

    #[tokio::test]
    async fn identical_source_and_target_are_rejected() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let stream = ContentStreamId::new();
        let point = DimensionSpacePoint::from_pairs([("language", "en")]);

        let engine = DimensionAdjustmentEngine::new(&store);
        assert!(engine
            .move_dimension_point(&stream, &point, &point)
            .await
            .is_err());
        assert!(engine
            .add_shine_through(&stream, &point, &point)
            .await
            .is_err());
        Ok(())
    }
}
