//! Query tests: graphs built through the projector, read back through
//! subgraph operations.

use super::*;
use crate::db::database::DatabaseService;
use crate::models::dimension::DimensionSpacePointSet;
use crate::models::events::{EventEnvelope, GraphEvent, ReferenceTarget};
use crate::projection::projector::GraphProjector;
use serde_json::json;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    db: Arc<DatabaseService>,
    projector: GraphProjector,
    seq: i64,
    stream: ContentStreamId,
}

impl Fixture {
    async fn new() -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let db = Arc::new(DatabaseService::new(dir.path().join("graph.db")).await?);
        let conn = db.connect_with_timeout().await?;
        Ok(Self {
            _dir: dir,
            db,
            projector: GraphProjector::new(GraphStore::new(conn)),
            seq: 0,
            stream: ContentStreamId::new(),
        })
    }

    async fn apply(&mut self, event: GraphEvent) -> anyhow::Result<()> {
        self.seq += 1;
        self.projector
            .apply(&EventEnvelope::new(self.seq, event))
            .await?;
        Ok(())
    }

    async fn create(
        &mut self,
        parent: &NodeAggregateId,
        node_type: &str,
        name: Option<&str>,
        properties: serde_json::Value,
    ) -> anyhow::Result<NodeAggregateId> {
        let id = NodeAggregateId::new();
        self.apply(GraphEvent::NodeAggregateCreated {
            content_stream_id: self.stream.clone(),
            node_aggregate_id: id.clone(),
            node_type: NodeTypeName::from_string(node_type),
            origin: OriginDimensionSpacePoint::empty(),
            coverage: DimensionSpacePointSet::from_points([DimensionSpacePoint::empty()]),
            parent_node_aggregate_id: parent.clone(),
            node_name: name.map(NodeName::from_string),
            succeeding_sibling_id: None,
            initial_properties: properties,
            classification: NodeClassification::Regular,
        })
        .await?;
        Ok(id)
    }

    async fn subgraph(&self, visibility: VisibilityConstraints) -> anyhow::Result<ContentSubgraph> {
        let graph = ContentGraph::new(self.db.clone());
        Ok(graph
            .subgraph(self.stream.clone(), &DimensionSpacePoint::empty(), visibility)
            .await?)
    }
}

/// Root, then home / about with a team page below about.
async fn seed_site(fixture: &mut Fixture) -> anyhow::Result<SiteIds> {
    let root = NodeAggregateId::new();
    fixture
        .apply(GraphEvent::RootNodeAggregateCreated {
            content_stream_id: fixture.stream.clone(),
            node_aggregate_id: root.clone(),
            node_type: NodeTypeName::from_string("Site.Root"),
            coverage: DimensionSpacePointSet::from_points([DimensionSpacePoint::empty()]),
        })
        .await?;

    let home = fixture
        .create(&root, "Page", Some("home"), json!({"title": "Home"}))
        .await?;
    let about = fixture
        .create(&root, "Page", Some("about"), json!({"title": "About"}))
        .await?;
    let team = fixture
        .create(&about, "Page", Some("team"), json!({"title": "Team"}))
        .await?;

    Ok(SiteIds {
        root,
        home,
        about,
        team,
    })
}

struct SiteIds {
    root: NodeAggregateId,
    home: NodeAggregateId,
    about: NodeAggregateId,
    team: NodeAggregateId,
}

#[tokio::test]
async fn nodes_come_back_with_properties_and_names() -> anyhow::Result<()> {
    let mut fixture = Fixture::new().await?;
    let site = seed_site(&mut fixture).await?;

    let subgraph = fixture.subgraph(VisibilityConstraints::none()).await?;
    let home = subgraph.find_node_by_id(&site.home).await?.expect("home");

    assert_eq!(home.property("title"), Some(&json!("Home")));
    assert_eq!(home.name, Some(NodeName::from_string("home")));
    assert_eq!(home.node_type, NodeTypeName::from_string("Page"));
    Ok(())
}

#[tokio::test]
async fn hierarchy_navigation() -> anyhow::Result<()> {
    let mut fixture = Fixture::new().await?;
    let site = seed_site(&mut fixture).await?;
    let subgraph = fixture.subgraph(VisibilityConstraints::none()).await?;

    let children = subgraph.find_child_nodes(&site.root).await?;
    let ids: Vec<_> = children.iter().map(|n| n.aggregate_id.clone()).collect();
    assert_eq!(ids, vec![site.home.clone(), site.about.clone()]);

    let parent = subgraph.find_parent_node(&site.team).await?.expect("parent");
    assert_eq!(parent.aggregate_id, site.about);

    // Roots have no parent.
    assert!(subgraph.find_parent_node(&site.root).await?.is_none());

    let succeeding = subgraph.find_succeeding_siblings(&site.home).await?;
    assert_eq!(succeeding.len(), 1);
    assert_eq!(succeeding[0].aggregate_id, site.about);

    let preceding = subgraph.find_preceding_siblings(&site.about).await?;
    assert_eq!(preceding.len(), 1);
    assert_eq!(preceding[0].aggregate_id, site.home);

    let descendants = subgraph.find_descendants(&site.root).await?;
    assert_eq!(descendants.len(), 3);
    Ok(())
}

#[tokio::test]
async fn descendants_come_back_level_by_level() -> anyhow::Result<()> {
    let mut fixture = Fixture::new().await?;
    let site = seed_site(&mut fixture).await?;
    // A grandchild under home, so depth-first and breadth-first orders differ.
    let intro = fixture
        .create(&site.home, "Page", Some("intro"), json!({}))
        .await?;

    let subgraph = fixture.subgraph(VisibilityConstraints::none()).await?;
    let ids: Vec<_> = subgraph
        .find_descendants(&site.root)
        .await?
        .iter()
        .map(|n| n.aggregate_id.clone())
        .collect();
    assert_eq!(
        ids,
        vec![
            site.home.clone(),
            site.about.clone(),
            intro,
            site.team.clone()
        ]
    );
    Ok(())
}

#[tokio::test]
async fn tagged_subtrees_are_hidden_by_visibility() -> anyhow::Result<()> {
    let mut fixture = Fixture::new().await?;
    let site = seed_site(&mut fixture).await?;

    let tag = SubtreeTag::new("disabled").unwrap();
    fixture
        .apply(GraphEvent::SubtreeTagged {
            content_stream_id: fixture.stream.clone(),
            node_aggregate_id: site.about.clone(),
            tag: tag.clone(),
        })
        .await?;

    let constrained = fixture
        .subgraph(VisibilityConstraints::excluding([tag]))
        .await?;

    // The tagged node and its whole subtree disappear.
    assert!(constrained.find_node_by_id(&site.about).await?.is_none());
    assert!(constrained.find_node_by_id(&site.team).await?.is_none());

    let children = constrained.find_child_nodes(&site.root).await?;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].aggregate_id, site.home);

    // Only the root and home remain countable.
    assert_eq!(constrained.count_nodes().await?, 2);

    // An unconstrained subgraph still sees everything.
    let unconstrained = fixture.subgraph(VisibilityConstraints::none()).await?;
    assert!(unconstrained.find_node_by_id(&site.about).await?.is_some());
    assert_eq!(unconstrained.count_nodes().await?, 4);
    Ok(())
}

#[tokio::test]
async fn path_resolution_follows_named_edges() -> anyhow::Result<()> {
    let mut fixture = Fixture::new().await?;
    let site = seed_site(&mut fixture).await?;
    let subgraph = fixture.subgraph(VisibilityConstraints::none()).await?;

    let team = subgraph
        .find_node_by_path(
            &site.root,
            &[NodeName::from_string("about"), NodeName::from_string("team")],
        )
        .await?
        .expect("path resolves");
    assert_eq!(team.aggregate_id, site.team);

    assert!(subgraph
        .find_node_by_path(&site.root, &[NodeName::from_string("missing")])
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn references_and_back_references() -> anyhow::Result<()> {
    let mut fixture = Fixture::new().await?;
    let site = seed_site(&mut fixture).await?;

    let stream = fixture.stream.clone();
    fixture
        .apply(GraphEvent::NodeReferencesSet {
            content_stream_id: stream,
            source_aggregate_id: site.home.clone(),
            source_origin: OriginDimensionSpacePoint::empty(),
            reference_name: "related".to_string(),
            targets: vec![
                ReferenceTarget {
                    target_aggregate_id: site.about.clone(),
                    properties: None,
                },
                ReferenceTarget {
                    target_aggregate_id: site.team.clone(),
                    properties: Some(json!({"weight": 2})),
                },
            ],
        })
        .await?;

    let subgraph = fixture.subgraph(VisibilityConstraints::none()).await?;

    let related = subgraph
        .find_references(&site.home, Some("related"))
        .await?;
    let ids: Vec<_> = related.iter().map(|n| n.aggregate_id.clone()).collect();
    assert_eq!(ids, vec![site.about.clone(), site.team.clone()]);

    let back = subgraph.find_back_references(&site.about).await?;
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].aggregate_id, site.home);
    Ok(())
}

#[tokio::test]
async fn subtree_snapshot_preserves_order() -> anyhow::Result<()> {
    let mut fixture = Fixture::new().await?;
    let site = seed_site(&mut fixture).await?;
    let subgraph = fixture.subgraph(VisibilityConstraints::none()).await?;

    let subtree = subgraph.find_subtree(&site.root).await?.expect("subtree");
    assert_eq!(subtree.node.aggregate_id, site.root);
    assert_eq!(subtree.children.len(), 2);
    assert_eq!(subtree.children[0].node.aggregate_id, site.home);
    assert_eq!(subtree.children[1].node.aggregate_id, site.about);
    assert_eq!(subtree.children[1].children.len(), 1);
    assert_eq!(subtree.children[1].children[0].node.aggregate_id, site.team);
    Ok(())
}

#[tokio::test]
async fn root_lookup_by_type_detects_ambiguity() -> anyhow::Result<()> {
    let mut fixture = Fixture::new().await?;
    let site = seed_site(&mut fixture).await?;
    let subgraph = fixture.subgraph(VisibilityConstraints::none()).await?;

    let found = subgraph
        .find_root_node_by_type(&NodeTypeName::from_string("Site.Root"))
        .await?
        .expect("single root");
    assert_eq!(found.aggregate_id, site.root);

    assert!(subgraph
        .find_root_node_by_type(&NodeTypeName::from_string("Other.Root"))
        .await?
        .is_none());

    // A second root of the same type makes the lookup ambiguous.
    let stream = fixture.stream.clone();
    fixture
        .apply(GraphEvent::RootNodeAggregateCreated {
            content_stream_id: stream,
            node_aggregate_id: NodeAggregateId::new(),
            node_type: NodeTypeName::from_string("Site.Root"),
            coverage: DimensionSpacePointSet::from_points([DimensionSpacePoint::empty()]),
        })
        .await?;

    let subgraph = fixture.subgraph(VisibilityConstraints::none()).await?;
    let result = subgraph
        .find_root_node_by_type(&NodeTypeName::from_string("Site.Root"))
        .await;
    assert!(matches!(
        result,
        Err(QueryError::AmbiguousRootAggregate { count: 2, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn queries_in_other_dimension_points_see_nothing() -> anyhow::Result<()> {
    let mut fixture = Fixture::new().await?;
    let site = seed_site(&mut fixture).await?;

    let graph = ContentGraph::new(fixture.db.clone());
    let elsewhere = graph
        .subgraph(
            fixture.stream.clone(),
            &DimensionSpacePoint::from_pairs([("language", "de")]),
            VisibilityConstraints::none(),
        )
        .await?;

    assert!(elsewhere.find_node_by_id(&site.home).await?.is_none());
    assert_eq!(elsewhere.count_nodes().await?, 0);
    Ok(())
}
