//! Copy-on-Write Node Mutation
//!
//! Forking a content stream copies hierarchy edges only; node rows stay
//! shared via their anchors. Every mutation of a node row must therefore go
//! through this engine: when the row is still shared with another stream it
//! is cloned under a fresh anchor first, the writing stream's edges are
//! repointed, and the mutation lands on the private copy. Other streams keep
//! seeing the untouched original.
//!
//! Reference rows do not travel with the anchor automatically; the fork
//! copies them explicitly so the private row keeps its outgoing references.

use crate::db::graph_store::GraphStore;
use crate::models::node::{NodeRecord, RelationAnchorPoint};
use crate::models::stream::ContentStreamId;
use crate::projection::error::ProjectionError;
use chrono::Utc;

pub struct CopyOnWriteEngine<'a> {
    store: &'a GraphStore,
}

impl<'a> CopyOnWriteEngine<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Whether the anchor is linked by any stream other than `stream`.
    pub async fn is_shared_beyond(
        &self,
        stream: &ContentStreamId,
        anchor: &RelationAnchorPoint,
    ) -> Result<bool, ProjectionError> {
        let streams = self.store.streams_containing_anchor(anchor).await?;
        Ok(streams.iter().any(|s| s != stream))
    }

    /// Apply `mutate` to the node row behind `anchor` on behalf of `stream`.
    ///
    /// Returns the anchor the mutated row lives under: the original when the
    /// row was private to the stream, a fresh one when a shared row had to be
    /// forked first. Callers must use the returned anchor for any follow-up
    /// row operations.
    pub async fn write_node<F>(
        &self,
        stream: &ContentStreamId,
        anchor: &RelationAnchorPoint,
        mutate: F,
    ) -> Result<RelationAnchorPoint, ProjectionError>
    where
        F: FnOnce(&mut NodeRecord),
    {
        let record = self
            .store
            .get_node(anchor)
            .await?
            .ok_or_else(|| ProjectionError::AnchorNotFound(anchor.clone()))?;

        if !self.is_shared_beyond(stream, anchor).await? {
            let mut record = record;
            mutate(&mut record);
            record.modified_at = Utc::now();
            self.store.update_node(&record).await?;
            return Ok(record.anchor);
        }

        let mut fork = record.fork();
        mutate(&mut fork);
        fork.modified_at = Utc::now();

        self.store.insert_node(&fork).await?;
        self.store.copy_references(anchor, &fork.anchor).await?;
        self.store.repoint_anchor(stream, anchor, &fork.anchor).await?;

        Ok(fork.anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::database::DatabaseService;
    use crate::models::dimension::{DimensionSpacePoint, OriginDimensionSpacePoint};
    use crate::models::node::{NodeAggregateId, NodeClassification, NodeTypeName};
    use crate::models::relation::{HierarchyRelation, ReferenceRelation};
    use crate::models::tags::SubtreeTags;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store() -> anyhow::Result<(TempDir, GraphStore)> {
        let temp_dir = TempDir::new()?;
        let db = DatabaseService::new(temp_dir.path().join("graph.db")).await?;
        let conn = db.connect_with_timeout().await?;
        Ok((temp_dir, GraphStore::new(conn)))
    }

    async fn link(
        store: &GraphStore,
        stream: &ContentStreamId,
        anchor: &RelationAnchorPoint,
    ) -> anyhow::Result<()> {
        store
            .insert_hierarchy_relation(&HierarchyRelation {
                parent_anchor: RelationAnchorPoint::root_sentinel(),
                child_anchor: anchor.clone(),
                content_stream_id: stream.clone(),
                dimension_space_point_hash: DimensionSpacePoint::empty().hash(),
                position: 128,
                subtree_tags: SubtreeTags::new(),
                name: None,
            })
            .await?;
        Ok(())
    }

    fn sample_node() -> NodeRecord {
        NodeRecord::new(
            NodeAggregateId::new(),
            OriginDimensionSpacePoint::empty(),
            NodeTypeName::from_string("Document"),
            NodeClassification::Regular,
            None,
            json!({"title": "before"}),
        )
    }

    #[tokio::test]
    async fn private_row_is_mutated_in_place() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let stream = ContentStreamId::new();
        let node = sample_node();
        store.insert_node(&node).await?;
        link(&store, &stream, &node.anchor).await?;

        let engine = CopyOnWriteEngine::new(&store);
        let result = engine
            .write_node(&stream, &node.anchor, |record| {
                record.merge_properties(&json!({"title": "after"}));
            })
            .await?;

        assert_eq!(result, node.anchor);
        let loaded = store.get_node(&node.anchor).await?.unwrap();
        assert_eq!(loaded.properties, json!({"title": "after"}));
        Ok(())
    }

    #[tokio::test]
    async fn shared_row_is_forked_and_original_untouched() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let stream_a = ContentStreamId::new();
        let stream_b = ContentStreamId::new();
        let node = sample_node();
        store.insert_node(&node).await?;
        link(&store, &stream_a, &node.anchor).await?;
        link(&store, &stream_b, &node.anchor).await?;

        let engine = CopyOnWriteEngine::new(&store);
        let forked = engine
            .write_node(&stream_b, &node.anchor, |record| {
                record.merge_properties(&json!({"title": "after"}));
            })
            .await?;

        assert_ne!(forked, node.anchor);

        // The original row and the other stream's view are unchanged.
        let original = store.get_node(&node.anchor).await?.unwrap();
        assert_eq!(original.properties, json!({"title": "before"}));

        let hash = DimensionSpacePoint::empty().hash();
        let a_edge = store
            .parent_relation_of(&stream_a, &hash, &node.anchor)
            .await?;
        assert!(a_edge.is_some());

        // The writing stream's edge now points at the fork.
        let b_edge = store.parent_relation_of(&stream_b, &hash, &forked).await?;
        assert!(b_edge.is_some());
        assert!(store
            .parent_relation_of(&stream_b, &hash, &node.anchor)
            .await?
            .is_none());

        let copy = store.get_node(&forked).await?.unwrap();
        assert_eq!(copy.properties, json!({"title": "after"}));
        assert_eq!(copy.aggregate_id, original.aggregate_id);
        Ok(())
    }

    #[tokio::test]
    async fn fork_carries_outgoing_references() -> anyhow::Result<()> {
        let (_dir, store) = store().await?;
        let stream_a = ContentStreamId::new();
        let stream_b = ContentStreamId::new();
        let node = sample_node();
        let target = NodeAggregateId::new();
        store.insert_node(&node).await?;
        link(&store, &stream_a, &node.anchor).await?;
        link(&store, &stream_b, &node.anchor).await?;
        store
            .insert_reference(&ReferenceRelation {
                source_anchor: node.anchor.clone(),
                name: "related".to_string(),
                position: 0,
                target_aggregate_id: target.clone(),
                properties: None,
            })
            .await?;

        let engine = CopyOnWriteEngine::new(&store);
        let forked = engine.write_node(&stream_b, &node.anchor, |_| {}).await?;

        let copied = store.references_for_source(&forked).await?;
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].target_aggregate_id, target);

        // And the original keeps its own.
        assert_eq!(store.references_for_source(&node.anchor).await?.len(), 1);
        Ok(())
    }
}
