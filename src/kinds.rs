//! Tipos de documento. Cada variante expone el mismo conjunto fijo de
//! capacidades (inicializar, aplicar streaming, renderizar, acciones y barra de
//! herramientas) y se despacha por su etiqueta.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::{context::ArtifactContext, error::StudioError, versions::VersionCursor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Text,
    Code,
}

/// Acción sobre el documento que ofrece el visor.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub id: &'static str,
    pub description: &'static str,
    pub enabled: bool,
}

/// Sugerencia de seguimiento que el usuario puede mandar al chat.
#[derive(Debug, Clone, Serialize)]
pub struct ToolbarItem {
    pub id: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
}

impl DocumentKind {
    /// Resuelve la etiqueta declarada por el generador. Una etiqueta sin
    /// manejador aborta la generación.
    pub fn from_tag(tag: &str) -> Result<Self, StudioError> {
        match tag.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "code" => Ok(Self::Code),
            other => Err(StudioError::UnknownKind(other.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
        }
    }

    /// Estado inicial de los metadatos antes de recibir el primer fragmento.
    pub fn initialize(&self, ctx: &mut ArtifactContext) {
        let meta = ctx.metadata_mut();
        meta.is_visible = false;
        meta.language = None;
    }

    /// Aplica un delta de texto al borrador. Ambos tipos concatenan tal cual:
    /// una valla ``` puede llegar partida entre varios deltas.
    pub fn stream_apply(&self, ctx: &mut ArtifactContext, delta: &str) {
        match self {
            Self::Text | Self::Code => ctx.append_draft(delta),
        }
    }

    /// Ajuste final del borrador completo, antes de guardarlo. El de código
    /// quita la valla que envuelve el programa y toma el lenguaje de su
    /// etiqueta.
    pub fn finalize(&self, ctx: &mut ArtifactContext) {
        if *self != Self::Code {
            return;
        }
        let Some((body, language)) = strip_code_fence(ctx.draft()) else {
            return;
        };
        ctx.set_draft(body);
        if language.is_some() {
            ctx.metadata_mut().language = language;
        }
    }

    /// Markdown listo para mostrar.
    pub fn render(&self, content: &str, language: Option<&str>) -> String {
        match self {
            Self::Text => content.to_string(),
            Self::Code => format!("```{}\n{}\n```", language.unwrap_or(""), content),
        }
    }

    pub fn actions(&self, cursor: &VersionCursor, ctx: &ArtifactContext) -> Vec<Action> {
        let store = &ctx.document().versions;
        let mut actions = vec![
            Action {
                id: "toggle-diff",
                description: "Ver cambios",
                enabled: cursor.can_prev(),
            },
            Action {
                id: "prev-version",
                description: "Ver versión anterior",
                enabled: cursor.can_prev(),
            },
            Action {
                id: "next-version",
                description: "Ver versión siguiente",
                enabled: cursor.can_next(store),
            },
            Action {
                id: "copy",
                description: "Copiar al portapapeles",
                enabled: !store.is_empty(),
            },
        ];
        if *self == Self::Text {
            actions.push(Action {
                id: "export",
                description: "Exportar ficha técnica",
                enabled: !store.is_empty(),
            });
        }
        actions
    }

    pub fn toolbar(&self) -> Vec<ToolbarItem> {
        match self {
            Self::Text => vec![
                ToolbarItem {
                    id: "final-polish",
                    description: "Pulido final",
                    prompt: "Revisa la ficha técnica y corrige formato, ortografía y coherencia sin inventar datos.",
                },
                ToolbarItem {
                    id: "request-suggestions",
                    description: "Pedir sugerencias",
                    prompt: "Sugiere mejoras para la ficha técnica: materiales, medidas y acabados que falten.",
                },
            ],
            Self::Code => vec![ToolbarItem {
                id: "add-comments",
                description: "Añadir comentarios",
                prompt: "Añade comentarios al código para que sea más fácil de entender.",
            }],
        }
    }
}

fn fence_open() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*```([\w+#.-]*)[^\n]*\n").expect("regex de apertura válida"))
}

fn fence_close() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n?```\s*$").expect("regex de cierre válida"))
}

/// Cuerpo sin la valla exterior y la etiqueta de lenguaje, si la había.
/// `None` cuando el texto no empieza por una valla.
fn strip_code_fence(text: &str) -> Option<(String, Option<String>)> {
    let open = fence_open().captures(text)?;
    let language = open
        .get(1)
        .map(|m| m.as_str())
        .filter(|l| !l.is_empty())
        .map(str::to_string);
    let start = open.get(0).map_or(0, |m| m.end());
    let body = fence_close().replace(&text[start..], "").into_owned();
    Some((body, language))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_is_fatal() {
        assert_eq!(DocumentKind::from_tag(" Text ").unwrap(), DocumentKind::Text);
        match DocumentKind::from_tag("spreadsheet") {
            Err(StudioError::UnknownKind(tag)) => assert_eq!(tag, "spreadsheet"),
            other => panic!("se esperaba UnknownKind, llegó {other:?}"),
        }
    }

    #[test]
    fn code_fence_is_stripped_from_the_whole_draft() {
        let mut ctx = ArtifactContext::new("doc-1", "Script", DocumentKind::Code, "owner");
        DocumentKind::Code.initialize(&mut ctx);
        for delta in ["``", "`python\nprint(1)\n`", "``"] {
            DocumentKind::Code.stream_apply(&mut ctx, delta);
        }
        DocumentKind::Code.finalize(&mut ctx);
        assert_eq!(ctx.draft(), "print(1)");
        assert_eq!(ctx.metadata().language.as_deref(), Some("python"));
    }

    #[test]
    fn unfenced_code_and_text_are_left_alone() {
        let mut ctx = ArtifactContext::new("doc-1", "Script", DocumentKind::Code, "owner");
        DocumentKind::Code.initialize(&mut ctx);
        ctx.append_draft("fn main() {}\n");
        DocumentKind::Code.finalize(&mut ctx);
        assert_eq!(ctx.draft(), "fn main() {}\n");
        assert_eq!(ctx.metadata().language, None);

        assert_eq!(
            strip_code_fence("```\nx = 1\n```\n"),
            Some(("x = 1".to_string(), None))
        );

        let mut text = ArtifactContext::new("doc-2", "Ficha", DocumentKind::Text, "owner");
        text.append_draft("```md\n# Hola\n```");
        DocumentKind::Text.finalize(&mut text);
        assert_eq!(text.draft(), "```md\n# Hola\n```");
    }

    #[test]
    fn code_render_is_fenced() {
        let out = DocumentKind::Code.render("print(1)", Some("python"));
        assert_eq!(out, "```python\nprint(1)\n```");
        assert_eq!(DocumentKind::Text.render("# Hola", None), "# Hola");
    }

    #[test]
    fn version_actions_follow_cursor_bounds() {
        let mut ctx = ArtifactContext::new("doc-1", "Ficha", DocumentKind::Text, "owner");
        ctx.document_mut().versions.save("a");
        ctx.document_mut().versions.save("b");
        let cursor = VersionCursor::at_latest(&ctx.document().versions);

        let actions = DocumentKind::Text.actions(&cursor, &ctx);
        let enabled = |id: &str| actions.iter().find(|a| a.id == id).map(|a| a.enabled);
        assert_eq!(enabled("prev-version"), Some(true));
        assert_eq!(enabled("next-version"), Some(false));
        assert_eq!(enabled("export"), Some(true));
    }
}
