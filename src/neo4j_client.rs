//! Persistencia en Neo4j: documentos con su historial de snapshots y la
//! conversación de cada chat.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use neo4rs::{query, Graph};
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use crate::{
    config::Neo4jConfig,
    models::{DialogueTurn, Role},
    store::{ConversationLog, DocumentSave, DocumentStore, StoredMessage},
};

pub async fn connect_from_config(cfg: &Neo4jConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.user, &cfg.password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints básicos para las etiquetas usadas en el grafo:
/// :Document, :Snapshot, :Chat y :Message
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE CONSTRAINT document_id IF NOT EXISTS
         FOR (d:Document)
         REQUIRE d.id IS UNIQUE",
        "CREATE CONSTRAINT snapshot_id IF NOT EXISTS
         FOR (s:Snapshot)
         REQUIRE s.id IS UNIQUE",
        "CREATE CONSTRAINT chat_id IF NOT EXISTS
         FOR (c:Chat)
         REQUIRE c.id IS UNIQUE",
        "CREATE CONSTRAINT message_id IF NOT EXISTS
         FOR (m:Message)
         REQUIRE m.id IS UNIQUE",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints básicos creados).");
    Ok(())
}

pub struct Neo4jStore {
    graph: Arc<Graph>,
}

impl Neo4jStore {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    /// Comprueba que la base de datos responde.
    pub async fn health_check(&self) -> Result<()> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for Neo4jStore {
    /// Upsert del documento y nuevo :Snapshot enlazado al anterior.
    async fn save(&self, doc: &DocumentSave) -> Result<()> {
        let tx = self.graph.start_txn().await?;

        tx.run(
            query(
                "MERGE (d:Document {id: $id})
                 SET d.title = $title, d.kind = $kind, d.owner_id = $owner_id,
                     d.content = $content, d.updated_at = datetime($now)",
            )
            .param("id", doc.id.clone())
            .param("title", doc.title.clone())
            .param("kind", doc.kind.tag())
            .param("owner_id", doc.owner_id.clone())
            .param("content", doc.content.clone())
            .param("now", Utc::now().to_rfc3339()),
        )
        .await?;

        tx.run(
            query(
                "MATCH (d:Document {id: $doc_id})
                 OPTIONAL MATCH (d)-[:HAS_SNAPSHOT]->(prev:Snapshot)
                 WHERE NOT (prev)-[:NEXT_SNAPSHOT]->()
                 CREATE (s:Snapshot {id: $id, content: $content, created_at: datetime($now)})
                 MERGE (d)-[:HAS_SNAPSHOT]->(s)
                 FOREACH (p IN CASE WHEN prev IS NULL THEN [] ELSE [prev] END |
                     MERGE (p)-[:NEXT_SNAPSHOT]->(s))",
            )
            .param("doc_id", doc.id.clone())
            .param("id", Uuid::new_v4().to_string())
            .param("content", doc.content.clone())
            .param("now", Utc::now().to_rfc3339()),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationLog for Neo4jStore {
    async fn append(&self, chat_id: &str, turn: &DialogueTurn) -> Option<String> {
        let id = Uuid::new_v4().to_string();
        let result = self
            .graph
            .run(
                query(
                    "MERGE (c:Chat {id: $chat_id})
                     CREATE (m:Message {id: $id, role: $role, content: $content,
                                        created_at: datetime($now)})
                     MERGE (c)-[:HAS_MESSAGE]->(m)",
                )
                .param("chat_id", chat_id.to_string())
                .param("id", id.clone())
                .param("role", turn.role.as_str())
                .param("content", turn.content.clone())
                .param("now", Utc::now().to_rfc3339()),
            )
            .await;

        match result {
            Ok(()) => Some(id),
            Err(e) => {
                error!(chat_id, "Error guardando mensaje: {}", e);
                None
            }
        }
    }

    async fn messages(&self, chat_id: &str) -> Result<Vec<StoredMessage>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (:Chat {id: $chat_id})-[:HAS_MESSAGE]->(m:Message)
                     RETURN m.id AS id, m.role AS role, m.content AS content,
                            toString(m.created_at) AS created_at
                     ORDER BY m.created_at",
                )
                .param("chat_id", chat_id.to_string()),
            )
            .await?;

        let mut messages = Vec::new();
        while let Some(row) = cursor.next().await? {
            let id: String = row.get("id").ok_or_else(|| anyhow!("Falta campo 'id' en resultado de Neo4j"))?;
            let role: String = row.get("role").ok_or_else(|| anyhow!("Falta campo 'role' en resultado de Neo4j"))?;
            let content: String = row.get("content").ok_or_else(|| anyhow!("Falta campo 'content' en resultado de Neo4j"))?;
            let created_at: String = row.get("created_at").unwrap_or_default();
            let role = match role.as_str() {
                "user" => Role::User,
                _ => Role::Assistant,
            };
            messages.push(StoredMessage { id, role, content, created_at });
        }
        Ok(messages)
    }
}
