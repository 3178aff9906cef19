//! Puertos de persistencia (documentos y conversación) y su implementación en
//! memoria. La implementación sobre Neo4j vive en `neo4j_client`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    kinds::DocumentKind,
    models::{DialogueTurn, Role},
};

/// Lo que se persiste en cada guardado de documento (semántica upsert).
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSave {
    pub id: String,
    pub title: String,
    pub content: String,
    pub kind: DocumentKind,
    pub owner_id: String,
}

/// Mensaje tal como lo devuelve el historial de conversación.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save(&self, doc: &DocumentSave) -> Result<()>;
}

#[async_trait]
pub trait ConversationLog: Send + Sync {
    /// Añade un turno; devuelve su id, o `None` si no se pudo guardar.
    async fn append(&self, chat_id: &str, turn: &DialogueTurn) -> Option<String>;

    async fn messages(&self, chat_id: &str) -> Result<Vec<StoredMessage>>;
}

/// Guardados en segundo plano. Quien encola no espera al resultado y los
/// fallos sólo se registran: el estado en memoria sigue siendo la referencia
/// para la interfaz.
///
/// Un único worker drena la cola en orden de llegada, de modo que el último
/// guardado aplicado es siempre el último encolado.
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::UnboundedSender<DocumentSave>,
}

impl PersistQueue {
    /// Arranca el worker; debe llamarse dentro del runtime de tokio.
    pub fn spawn(store: Arc<dyn DocumentStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DocumentSave>();
        tokio::spawn(async move {
            while let Some(doc) = rx.recv().await {
                match store.save(&doc).await {
                    Ok(()) => debug!(document_id = %doc.id, "Documento guardado en segundo plano"),
                    Err(e) => error!(document_id = %doc.id, "Error guardando el documento: {}", e),
                }
            }
            debug!("Cola de guardados cerrada");
        });
        Self { tx }
    }

    pub fn enqueue(&self, doc: DocumentSave) {
        if let Err(e) = self.tx.send(doc) {
            error!(document_id = %e.0.id, "La cola de guardados ya no acepta trabajos");
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Vec<DocumentSave>>>,
    messages: Mutex<HashMap<String, Vec<StoredMessage>>>,
    fail_saves: bool,
    first_save_delay: Option<Duration>,
    saves_started: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    /// El primer guardado tarda `delay` en completarse.
    #[cfg(test)]
    pub fn slow_first_save(delay: Duration) -> Self {
        Self {
            first_save_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Historial de guardados de un documento, del más antiguo al más reciente.
    pub fn saves_of(&self, id: &str) -> Vec<DocumentSave> {
        self.documents
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn save(&self, doc: &DocumentSave) -> Result<()> {
        let started = self.saves_started.fetch_add(1, Ordering::SeqCst);
        if let (0, Some(delay)) = (started, self.first_save_delay) {
            tokio::time::sleep(delay).await;
        }
        if self.fail_saves {
            return Err(anyhow!("almacenamiento en memoria configurado para fallar"));
        }
        self.documents
            .lock()
            .unwrap()
            .entry(doc.id.clone())
            .or_default()
            .push(doc.clone());
        Ok(())
    }
}

#[async_trait]
impl ConversationLog for MemoryStore {
    async fn append(&self, chat_id: &str, turn: &DialogueTurn) -> Option<String> {
        let id = Uuid::new_v4().to_string();
        self.messages
            .lock()
            .unwrap()
            .entry(chat_id.to_string())
            .or_default()
            .push(StoredMessage {
                id: id.clone(),
                role: turn.role,
                content: turn.content.clone(),
                created_at: Utc::now().to_rfc3339(),
            });
        Some(id)
    }

    async fn messages(&self, chat_id: &str) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(chat_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save(content: &str) -> DocumentSave {
        DocumentSave {
            id: "doc-1".to_string(),
            title: "Ficha".to_string(),
            content: content.to_string(),
            kind: DocumentKind::Text,
            owner_id: "owner".to_string(),
        }
    }

    #[test]
    fn memory_store_keeps_every_save() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            store.save(&save("v1")).await.unwrap();
            store.save(&save("v2")).await.unwrap();
        });
        let saves = store.saves_of("doc-1");
        assert_eq!(saves.len(), 2);
        assert_eq!(saves[1].content, "v2");
    }

    #[test]
    fn conversation_is_scoped_per_chat() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            assert!(store.append("a", &DialogueTurn::user("hola")).await.is_some());
            store.append("b", &DialogueTurn::assistant("otra")).await;
            let a = store.messages("a").await.unwrap();
            assert_eq!(a.len(), 1);
            assert_eq!(a[0].content, "hola");
            assert_eq!(a[0].role, Role::User);
        });
    }

    async fn wait_for_saves(store: &MemoryStore, count: usize) {
        for _ in 0..50 {
            if store.saves_of("doc-1").len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn queued_saves_land_in_enqueue_order() {
        let store = Arc::new(MemoryStore::slow_first_save(Duration::from_millis(50)));
        let queue = PersistQueue::spawn(store.clone());
        queue.enqueue(save("Nike {{Season}}"));
        queue.enqueue(save("Nike FW24"));

        wait_for_saves(&store, 2).await;
        let written: Vec<_> = store.saves_of("doc-1").into_iter().map(|s| s.content).collect();
        assert_eq!(written, vec!["Nike {{Season}}", "Nike FW24"]);
    }

    #[tokio::test]
    async fn failed_save_does_not_stop_the_queue() {
        let failing = Arc::new(MemoryStore::failing());
        let queue = PersistQueue::spawn(failing.clone());
        queue.enqueue(save("v1"));
        queue.enqueue(save("v2"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(failing.saves_of("doc-1").is_empty());
        assert_eq!(failing.saves_started.load(Ordering::SeqCst), 2);
    }
}
