//! Ingesta del streaming de generación: aplica los fragmentos en orden de
//! llegada sobre el borrador, reenvía los eventos al cliente y, al terminar,
//! guarda el documento y anuncia los campos que necesitan respuesta.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{
    context::{ArtifactContext, ArtifactStatus},
    error::StudioError,
    kinds::DocumentKind,
    placeholder,
    store::{DocumentSave, DocumentStore},
};

/// El borrador se hace visible la primera vez que su longitud cae dentro de
/// este intervalo abierto mientras se está generando.
const VISIBLE_AFTER: usize = 400;
const VISIBLE_BEFORE: usize = 450;

/// Trozo tal como lo entrega el backend de generación.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationChunk {
    TextDelta(String),
    /// Llamadas a herramientas, razonamiento, etc. El núcleo las ignora.
    Other,
}

/// Eventos del canal de metadatos, en el orden en que se emiten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "kebab-case")]
pub enum StreamEvent {
    Kind(String),
    Id(String),
    Title(String),
    Clear,
    TextDelta(String),
    FieldsNeedingInput(Vec<String>),
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Kind(_) => "kind",
            Self::Id(_) => "id",
            Self::Title(_) => "title",
            Self::Clear => "clear",
            Self::TextDelta(_) => "text-delta",
            Self::FieldsNeedingInput(_) => "fields-needing-input",
        }
    }
}

/// Cabecera del documento que se va a generar.
#[derive(Debug, Clone)]
pub struct GenerationHeader {
    pub kind_tag: String,
    pub id: String,
    pub title: String,
}

/// Aplica un evento al contexto. Un tipo sin manejador es un error fatal.
pub fn apply_event(ctx: &mut ArtifactContext, event: &StreamEvent) -> Result<(), StudioError> {
    match event {
        StreamEvent::Kind(tag) => {
            let kind = DocumentKind::from_tag(tag)?;
            ctx.document_mut().kind = kind;
            kind.initialize(ctx);
        }
        StreamEvent::Id(id) => ctx.document_mut().id = id.clone(),
        StreamEvent::Title(title) => ctx.document_mut().title = title.clone(),
        StreamEvent::Clear => {
            ctx.clear_draft();
            ctx.metadata_mut().status = ArtifactStatus::Streaming;
        }
        StreamEvent::TextDelta(delta) => {
            let kind = ctx.document().kind;
            kind.stream_apply(ctx, delta);
            update_visibility(ctx);
        }
        StreamEvent::FieldsNeedingInput(_) => {}
    }
    Ok(())
}

fn update_visibility(ctx: &mut ArtifactContext) {
    if ctx.metadata().is_visible || ctx.metadata().status != ArtifactStatus::Streaming {
        return;
    }
    let len = ctx.draft().chars().count();
    if len > VISIBLE_AFTER && len < VISIBLE_BEFORE {
        ctx.metadata_mut().is_visible = true;
        debug!(len, "Borrador visible");
    }
}

async fn emit(
    ctx: &mut ArtifactContext,
    events: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
) -> Result<(), StudioError> {
    apply_event(ctx, &event)?;
    if events.send(event).await.is_err() {
        debug!("El cliente cerró el canal de eventos; la generación continúa");
    }
    Ok(())
}

/// Consume el streaming completo. Si el futuro se cancela a mitad, el borrador
/// parcial queda en `ctx` y su persistencia es cosa del llamante.
///
/// Devuelve la lista de campos pendientes extraída del documento final.
pub async fn run_generation<S>(
    ctx: &mut ArtifactContext,
    header: GenerationHeader,
    mut chunks: S,
    events: &mpsc::Sender<StreamEvent>,
    documents: Arc<dyn DocumentStore>,
) -> Result<Vec<String>, StudioError>
where
    S: Stream<Item = anyhow::Result<GenerationChunk>> + Unpin,
{
    emit(ctx, events, StreamEvent::Kind(header.kind_tag)).await?;
    emit(ctx, events, StreamEvent::Id(header.id)).await?;
    emit(ctx, events, StreamEvent::Title(header.title)).await?;
    emit(ctx, events, StreamEvent::Clear).await?;

    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(GenerationChunk::TextDelta(delta)) => {
                emit(ctx, events, StreamEvent::TextDelta(delta)).await?;
            }
            Ok(GenerationChunk::Other) => {}
            Err(e) => {
                error!("Error en el streaming de generación: {}", e);
                return Err(StudioError::Generation(e.to_string()));
            }
        }
    }

    let kind = ctx.document().kind;
    kind.finalize(ctx);
    let content = ctx.draft().to_string();
    ctx.metadata_mut().status = ArtifactStatus::Idle;
    let doc = ctx.document_mut();
    doc.versions.save(content.clone());

    let save = DocumentSave {
        id: doc.id.clone(),
        title: doc.title.clone(),
        content: content.clone(),
        kind: doc.kind,
        owner_id: doc.owner_id.clone(),
    };
    if let Err(e) = documents.save(&save).await {
        error!(document_id = %save.id, "No se pudo guardar el documento generado: {}", e);
    }

    let fields = placeholder::extract_fields(&content);
    info!(
        document_id = %save.id,
        chars = content.chars().count(),
        fields = fields.len(),
        "Generación terminada"
    );
    emit(ctx, events, StreamEvent::FieldsNeedingInput(fields.clone())).await?;
    Ok(fields)
}
