//! Diálogo guiado para completar los marcadores de la ficha, campo a campo.
//!
//! Estados: `Idle` (sin campos, el diálogo no se muestra), `Active` (quedan
//! campos) y `Complete` (terminal). El mensaje de cierre se envía una sola vez
//! gracias a `completion_sent`, por muchas veces que se consulte el estado.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    context::ArtifactContext,
    error::StudioError,
    models::DialogueTurn,
    placeholder,
    store::{ConversationLog, DocumentSave, PersistQueue},
};

/// Texto que sustituye a un marcador cuando el usuario omite el campo.
pub const NOT_PROVIDED_MARKER: &str = "[No proporcionado]";

const COMPLETION_MESSAGE: &str = "He completado todos los campos de la ficha técnica. \
Revisa el documento final, comprueba que no quede ningún marcador {{...}} sin resolver \
y pule el formato sin inventar datos nuevos.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldState {
    Idle,
    Active,
    Complete,
}

/// Colaboradores externos que necesita el diálogo.
#[derive(Clone)]
pub struct DialogueSinks {
    pub persist: PersistQueue,
    pub conversation: Arc<dyn ConversationLog>,
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FieldOutcome {
    /// Llamada fuera de rango: no hubo cambios.
    Ignored,
    Resolved {
        field: String,
        replacements: usize,
        completed: bool,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldSession {
    fields: Vec<String>,
    cursor: usize,
    completed: bool,
    completion_sent: bool,
}

impl FieldSession {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn state(&self) -> FieldState {
        if self.fields.is_empty() {
            FieldState::Idle
        } else if self.cursor < self.fields.len() {
            FieldState::Active
        } else {
            FieldState::Complete
        }
    }

    pub fn should_render(&self) -> bool {
        self.state() != FieldState::Idle
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_field(&self) -> Option<&str> {
        self.fields.get(self.cursor).map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub async fn submit(
        &mut self,
        ctx: &mut ArtifactContext,
        sinks: &DialogueSinks,
        value: &str,
    ) -> Result<FieldOutcome, StudioError> {
        if self.state() != FieldState::Active {
            debug!(cursor = self.cursor, "submit fuera de rango, se ignora");
            return Ok(FieldOutcome::Ignored);
        }
        let value = value.trim();
        if value.is_empty() {
            return Err(StudioError::EmptyValue);
        }

        let field = self.fields[self.cursor].clone();
        let ack = acknowledgment(&field, Some(value), self.next_after_current());
        let turn = format!("**{field}:** {value}\n\n{ack}");
        Ok(self.resolve(ctx, sinks, field, value, turn).await)
    }

    pub async fn skip(
        &mut self,
        ctx: &mut ArtifactContext,
        sinks: &DialogueSinks,
    ) -> FieldOutcome {
        if self.state() != FieldState::Active {
            debug!(cursor = self.cursor, "skip fuera de rango, se ignora");
            return FieldOutcome::Ignored;
        }

        let field = self.fields[self.cursor].clone();
        let ack = acknowledgment(&field, None, self.next_after_current());
        let turn = format!("_{field}: omitido_\n\n{ack}");
        self.resolve(ctx, sinks, field, NOT_PROVIDED_MARKER, turn).await
    }

    /// Dispara el mensaje de cierre si el cursor ha llegado al final y aún no
    /// se había enviado. Devuelve `true` sólo en la llamada que lo envía.
    pub async fn poll_completion(&mut self, sinks: &DialogueSinks) -> bool {
        if self.state() != FieldState::Complete || self.completion_sent {
            return false;
        }
        self.completion_sent = true;
        self.completed = true;
        info!(fields = self.fields.len(), "Todos los campos resueltos");
        sinks
            .conversation
            .append(&sinks.chat_id, &DialogueTurn::user(COMPLETION_MESSAGE))
            .await;
        true
    }

    /// Campo siguiente al actual y cuántos quedan después de éste.
    fn next_after_current(&self) -> Remaining<'_> {
        let remaining = self.fields.len() - self.cursor - 1;
        Remaining {
            count: remaining,
            next: self.fields.get(self.cursor + 1).map(String::as_str),
        }
    }

    async fn resolve(
        &mut self,
        ctx: &mut ArtifactContext,
        sinks: &DialogueSinks,
        field: String,
        replacement: &str,
        turn: String,
    ) -> FieldOutcome {
        let (updated, replacements) =
            placeholder::substitute(ctx.document().content(), &field, replacement);

        if replacements == 0 {
            warn!(field = %field, "No se encontró el marcador en el documento; se da por resuelto");
        } else {
            let doc = ctx.document_mut();
            doc.versions.save(updated.clone());
            sinks.persist.enqueue(DocumentSave {
                id: doc.id.clone(),
                title: doc.title.clone(),
                content: updated,
                kind: doc.kind,
                owner_id: doc.owner_id.clone(),
            });
        }

        sinks
            .conversation
            .append(&sinks.chat_id, &DialogueTurn::assistant(turn))
            .await;
        self.cursor += 1;

        let completed = self.poll_completion(sinks).await;
        FieldOutcome::Resolved {
            field,
            replacements,
            completed,
        }
    }
}

struct Remaining<'a> {
    count: usize,
    next: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldCategory {
    Brand,
    Designer,
    Description,
    Measurements,
    Other,
}

fn categorize(field: &str) -> FieldCategory {
    let name = field.to_lowercase();
    if name.contains("brand") || name.contains("marca") {
        FieldCategory::Brand
    } else if name.contains("designer") || name.contains("diseñador") {
        FieldCategory::Designer
    } else if name.contains("description") || name.contains("descripción") {
        FieldCategory::Description
    } else if name.contains("measurement") || name.contains("medida") {
        FieldCategory::Measurements
    } else {
        FieldCategory::Other
    }
}

/// Acuse de recibo determinista. `value` es `None` cuando el campo se omitió.
fn acknowledgment(field: &str, value: Option<&str>, remaining: Remaining<'_>) -> String {
    let head = match (categorize(field), value) {
        (FieldCategory::Brand, Some(v)) => format!("¡Perfecto! He añadido **{v}** como marca."),
        (FieldCategory::Brand, None) => "Sin problema, la marca queda sin especificar.".to_string(),
        (FieldCategory::Designer, Some(v)) => format!("Anotado: **{v}** figura como diseñador/a."),
        (FieldCategory::Designer, None) => "De acuerdo, dejamos el diseñador sin indicar.".to_string(),
        (FieldCategory::Description, Some(_)) => {
            "Gracias, la descripción ya está en la ficha.".to_string()
        }
        (FieldCategory::Description, None) => {
            "Vale, seguimos sin descripción por ahora.".to_string()
        }
        (FieldCategory::Measurements, Some(_)) => {
            "Medidas registradas; las he colocado en su sección.".to_string()
        }
        (FieldCategory::Measurements, None) => {
            "Entendido, las medidas quedan pendientes y podrás añadirlas más tarde.".to_string()
        }
        (FieldCategory::Other, Some(v)) => format!("He actualizado **{field}** con **{v}**."),
        (FieldCategory::Other, None) => format!("He marcado **{field}** como no proporcionado."),
    };

    let tail = match (remaining.count, remaining.next) {
        (0, _) => "Era el último campo.".to_string(),
        (n, Some(next)) => format!("Siguiente campo: **{next}** (quedan {n})."),
        (n, None) => format!("Quedan {n} campos."),
    };

    format!("{head} {tail}")
}
