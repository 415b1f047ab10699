//! Integration tests for the Neo4j backend and Cypher repositories.
//!
//! These tests require a running Neo4j instance.
//! Run with: `cargo test --features integration --test neo4j_integration`
//! (`QUALGRAPH_TEST_NEO4J_URI`, `_USER` and `_PASSWORD` override the defaults.)

#![cfg(feature = "integration")]

use qualgraph::config::{Config, Neo4jConfig};
use qualgraph::context::Context;
use qualgraph::di::FromRef;
use qualgraph::graph::backends::neo4j::Neo4jClient;
use qualgraph::graph::{GraphClient, QueryExt, Transaction};
use qualgraph::migrations::run_migrations;
use qualgraph::models::{Category, RawRow, RelationInput, TermKey};
use qualgraph::repositories::{CypherRepository, TermStore};
use qualgraph::services::{AuditService, Deduplicator, RelationImporter, UpsertWriter};
use serde_json::json;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

async fn create_client() -> Neo4jClient {
    Neo4jClient::connect(
        &env_or("QUALGRAPH_TEST_NEO4J_URI", "bolt://localhost:7687"),
        &env_or("QUALGRAPH_TEST_NEO4J_USER", "neo4j"),
        &env_or("QUALGRAPH_TEST_NEO4J_PASSWORD", "password"),
    )
    .await
    .expect("Failed to connect to test database")
}

fn context(client: Neo4jClient) -> Context {
    let config = Config {
        neo4j: Neo4jConfig {
            uri: String::new(),
            user: String::new(),
            password: None,
        },
        writer: Default::default(),
        schema: Default::default(),
    };
    Context::with_neo4j(client, &config)
}

/// Every node these tests create has a name starting with `it-`.
async fn cleanup(client: &Neo4jClient) {
    let _ = client
        .query("MATCH (n) WHERE n.name STARTS WITH 'it-' DETACH DELETE n")
        .run()
        .await;
}

// All tests share one database
#[serial]
mod database_tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let client = create_client().await;

        let first = run_migrations(&client).await.expect("Migrations failed");
        let second = run_migrations(&client).await.expect("Migrations failed");

        assert_eq!(first.current_version, 3);
        assert_eq!(second.previous_version, 3);
        assert!(second.applied_migrations.is_empty());

        let categories = client
            .query("MATCH (c:Category) RETURN count(c) AS count")
            .fetch_count("count")
            .await
            .expect("Query failed");
        assert!(categories >= Category::all().len() as i64);
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let client = create_client().await;
        cleanup(&client).await;

        let txn = client.begin().await.expect("Failed to begin transaction");
        txn.query("CREATE (n:Term {name: $name})")
            .param("name", "it-rollback")
            .run()
            .await
            .expect("Failed to create node in transaction");
        txn.rollback().await.expect("Failed to rollback");

        let rows = client
            .query("MATCH (n:Term {name: 'it-rollback'}) RETURN n")
            .fetch_all()
            .await
            .expect("Query failed");
        assert!(rows.is_empty(), "Node should not exist after rollback");
    }

    #[tokio::test]
    async fn test_ingest_import_and_rollback() {
        let client = create_client().await;
        run_migrations(&client).await.expect("Migrations failed");
        cleanup(&client).await;
        let ctx = context(client.clone());

        let rows: Vec<RawRow> = serde_json::from_value(json!([
            {"name": "it-治具颗粒杂质", "category": "RootCause", "tags": ["it-工艺"]},
            {"name": "it-电池盖裂纹", "category": "Symptom", "tags": ["it-外观"]},
        ]))
        .unwrap();
        let writer = UpsertWriter::from_ref(&ctx);
        let first = writer.upsert_entities(&rows, &CancellationToken::new()).await;
        let second = writer.upsert_entities(&rows, &CancellationToken::new()).await;
        assert_eq!(first.created, 2, "{first:?}");
        assert_eq!(second.updated, 2, "{second:?}");

        let repo = CypherRepository::new(client.clone());
        let found = repo
            .find_term(&TermKey::new("it-电池盖裂纹", Category::Symptom))
            .await
            .expect("Lookup failed");
        assert!(found.is_some());

        let relations: Vec<RelationInput> = serde_json::from_value(json!([{
            "type": "CAUSES",
            "source": {"name": "it-治具颗粒杂质", "category": "RootCause"},
            "target": {"name": "it-电池盖裂纹", "category": "Symptom"},
            "props": {"confidence": 0.85, "evidence": "治具颗粒导致压合受力不均"}
        }]))
        .unwrap();
        let report = RelationImporter::from_ref(&ctx)
            .import_relations(&relations, false, &CancellationToken::new())
            .await;
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.created, 1);

        let confidence: f64 = client
            .query(
                "MATCH (:Term {name: 'it-治具颗粒杂质'})-[r:CAUSES]->(:Term {name: 'it-电池盖裂纹'})
                 RETURN r.confidence AS confidence",
            )
            .fetch_one()
            .await
            .expect("Query failed")
            .expect("edge missing")
            .get("confidence")
            .unwrap();
        assert_eq!(confidence, 0.85);

        let build_id = report.build_id.unwrap();
        let rollback = AuditService::from_ref(&ctx)
            .rollback(&build_id)
            .await
            .expect("Rollback failed");
        assert_eq!(rollback.deleted, 1);

        cleanup(&client).await;
    }

    #[tokio::test]
    async fn test_dedup_merges_duplicate_business_nodes() {
        let client = create_client().await;
        cleanup(&client).await;

        client
            .query(
                "CREATE (a:ItDup {name: 'it-屏幕', created_at: '2026-01-01T00:00:00Z'})
                 CREATE (b:ItDup {name: 'it-屏幕', created_at: '2026-02-01T00:00:00Z'})
                 CREATE (s:ItDup {name: 'it-划伤'})
                 CREATE (c:ItDup {name: 'it-裂纹'})
                 CREATE (a)-[:HAS_SYMPTOM {confidence: 0.9}]->(s)
                 CREATE (b)-[:HAS_SYMPTOM {confidence: 0.7}]->(c)",
            )
            .run()
            .await
            .expect("Setup failed");

        let ctx = context(client.clone());
        let report = Deduplicator::from_ref(&ctx)
            .deduplicate("ItDup", &CancellationToken::new())
            .await
            .expect("Dedup failed");
        assert_eq!(report.deleted, 1);

        let edges = client
            .query("MATCH (:ItDup {name: 'it-屏幕'})-[r:HAS_SYMPTOM]->() RETURN count(r) AS count")
            .fetch_count("count")
            .await
            .expect("Query failed");
        assert_eq!(edges, 2);

        let pending = client
            .query("MATCH ()-[r:MERGE_PENDING]->() RETURN count(r) AS count")
            .fetch_count("count")
            .await
            .expect("Query failed");
        assert_eq!(pending, 0);

        cleanup(&client).await;
    }
}
