//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa el streaming con OpenAI; Gemini/Ollama quedan
//! preparados para el futuro.

use anyhow::{anyhow, Result};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    config::{AppConfig, LlmProvider},
    models::{Attachment, GenerationRequest},
    stream::GenerationChunk,
};

/// Streaming de trozos de generación, ya desacoplado del proveedor.
pub type ChunkStream = BoxStream<'static, Result<GenerationChunk>>;

const TECHPACK_PROMPT: &str = r#"
Eres un asistente experto en desarrollo de producto de moda.
Tu tarea es redactar una ficha técnica (tech pack) en markdown a partir del boceto y
las indicaciones del usuario.

Reglas:
- Usa encabezados `##` en inglés para cada sección: Brand, Designer, Style Name,
  Style Number, Season, Description, Fabric, Size Range, Measurements y Bill of Materials.
- Cuando no conozcas un dato, NO lo inventes: escribe un marcador con el nombre del
  campo entre dobles llaves, por ejemplo `{{Brand}}` o `{{Style Number}}`.
- En Bill of Materials escribe una lista con un material por línea con el formato
  `item; description; color; code; quantity; supplier` (máximo 11 líneas). Si no conoces
  los materiales usa `{{BOM Item 1}}`, `{{BOM Item 2}}`, etc.
- No uses dobles llaves para nada que no sea un marcador.
"#;

/// Gestor de LLMs.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    fn model_name(&self) -> String {
        if self.chat_model.is_empty() {
            "gpt-4o-mini".to_string()
        } else {
            self.chat_model.clone()
        }
    }

    // ---------------------------------------------------------------------
    // GENERACIÓN EN STREAMING
    // ---------------------------------------------------------------------

    /// Lanza la generación de la ficha y devuelve el streaming de trozos.
    ///
    /// El agente corre en una tarea propia; si el consumidor suelta el
    /// streaming, la tarea deja de reenviar y termina.
    pub fn stream_document(
        &self,
        request: &GenerationRequest,
        sketch: &Attachment,
    ) -> Result<ChunkStream> {
        match self.provider {
            LlmProvider::OpenAI => {
                let prompt = build_user_prompt(request, sketch);
                Ok(self.stream_with_openai(prompt))
            }
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para generación en streaming",
                other
            )),
        }
    }

    fn stream_with_openai(&self, prompt: String) -> ChunkStream {
        use rig::agent::MultiTurnStreamItem;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;
        use rig::providers::openai;
        use rig::streaming::{StreamedAssistantContent, StreamingPrompt as _};

        let (tx, rx) = mpsc::channel::<Result<GenerationChunk>>(64);
        let model_name = self.model_name();

        tokio::spawn(async move {
            let client = openai::Client::from_env();
            let agent = client.agent(&model_name).preamble(TECHPACK_PROMPT).build();

            let mut upstream = agent.stream_prompt(prompt.as_str()).await;
            while let Some(item) = upstream.next().await {
                let chunk = match item {
                    Ok(MultiTurnStreamItem::StreamItem(StreamedAssistantContent::Text(text))) => {
                        Ok(GenerationChunk::TextDelta(text.text))
                    }
                    Ok(_) => Ok(GenerationChunk::Other),
                    Err(e) => {
                        warn!("Error del proveedor durante el streaming: {}", e);
                        Err(anyhow!("Error del proveedor: {e}"))
                    }
                };
                let failed = chunk.is_err();
                if tx.send(chunk).await.is_err() {
                    debug!("Streaming abandonado por el consumidor");
                    break;
                }
                if failed {
                    break;
                }
            }
        });

        receiver_stream(rx)
    }
}

/// Convierte el receptor del canal en un `Stream` finito.
fn receiver_stream(rx: mpsc::Receiver<Result<GenerationChunk>>) -> ChunkStream {
    stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    })
    .boxed()
}

fn build_user_prompt(request: &GenerationRequest, sketch: &Attachment) -> String {
    let mut prompt = format!(
        "Título: {}\n\nBoceto: {} ({})\n",
        request.title, sketch.name, sketch.url
    );
    let others: Vec<&Attachment> = request
        .attachments
        .iter()
        .filter(|a| a.url != sketch.url)
        .collect();
    if !others.is_empty() {
        prompt.push_str("\nOtros adjuntos:\n");
        for a in others {
            prompt.push_str(&format!("- {} ({})\n", a.name, a.url));
        }
    }
    prompt.push_str(&format!("\nIndicaciones del usuario:\n{}", request.prompt));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(name: &str) -> Attachment {
        Attachment {
            name: name.to_string(),
            url: format!("https://files.local/{name}"),
            content_type: None,
        }
    }

    #[test]
    fn prompt_lists_sketch_then_other_attachments() {
        let req = GenerationRequest {
            title: "Bomber".to_string(),
            kind: "text".to_string(),
            prompt: "Chaqueta de nylon".to_string(),
            attachments: vec![attachment("sketch.png"), attachment("ref.pdf")],
        };
        let prompt = build_user_prompt(&req, &req.attachments[0]);
        assert!(prompt.starts_with("Título: Bomber"));
        assert!(prompt.contains("Boceto: sketch.png"));
        assert!(prompt.contains("- ref.pdf"));
        assert!(prompt.ends_with("Chaqueta de nylon"));
    }

    #[tokio::test]
    async fn receiver_stream_ends_when_sender_drops() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(GenerationChunk::TextDelta("a".into()))).await.unwrap();
        tx.send(Ok(GenerationChunk::Other)).await.unwrap();
        drop(tx);

        let items: Vec<_> = receiver_stream(rx).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Ok(GenerationChunk::TextDelta(t)) if t == "a"));
    }

    #[test]
    fn unsupported_provider_is_an_error() {
        let manager = LlmManager {
            provider: LlmProvider::Ollama,
            chat_model: String::new(),
        };
        let req = GenerationRequest {
            title: "x".to_string(),
            kind: "text".to_string(),
            prompt: "y".to_string(),
            attachments: vec![attachment("a.png")],
        };
        assert!(manager.stream_document(&req, &req.attachments[0]).is_err());
        assert_eq!(manager.model_name(), "gpt-4o-mini");
    }
}
