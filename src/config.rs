//! Carga y gestión de configuración de la aplicación (almacenamiento + LLM + exportación).

use std::env;
use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Dónde se persisten documentos, snapshots y mensajes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Neo4j,
    Memory,
}

impl StorageBackend {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "neo4j" => Ok(Self::Neo4j),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("Backend de almacenamiento no soportado: {other}")),
        }
    }
}

/// Credenciales de Neo4j; sólo existen cuando el backend es `neo4j`.
#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub storage: StorageBackend,
    pub neo4j: Option<Neo4jConfig>,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,

    pub default_owner_id: String,
    pub export_default_brand: String,
    pub export_default_designer: String,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let storage_str = env::var("STORAGE_BACKEND").unwrap_or_else(|_| "neo4j".to_string());
        let storage = StorageBackend::from_str(&storage_str)?;

        let neo4j = match storage {
            StorageBackend::Neo4j => Some(Neo4jConfig {
                uri: env::var("NEO4J_URI")
                    .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?,
                user: env::var("NEO4J_USER")
                    .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?,
                password: env::var("NEO4J_PASSWORD")
                    .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?,
            }),
            StorageBackend::Memory => None,
        };

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let default_owner_id =
            env::var("DEFAULT_OWNER_ID").unwrap_or_else(|_| "local-user".to_string());
        let export_default_brand =
            env::var("EXPORT_DEFAULT_BRAND").unwrap_or_else(|_| "Brand Name".to_string());
        let export_default_designer =
            env::var("EXPORT_DEFAULT_DESIGNER").unwrap_or_else(|_| "Designer Name".to_string());

        Ok(Self {
            server_addr,
            storage,
            neo4j,
            llm_provider,
            llm_chat_model,
            default_owner_id,
            export_default_brand,
            export_default_designer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_backends_case_insensitively() {
        assert_eq!(StorageBackend::from_str("Memory").unwrap(), StorageBackend::Memory);
        assert_eq!(StorageBackend::from_str("NEO4J").unwrap(), StorageBackend::Neo4j);
        assert!(StorageBackend::from_str("sqlite").is_err());
    }

    #[test]
    fn rejects_unknown_llm_provider() {
        assert!(matches!(LlmProvider::from_str("OpenAI").unwrap(), LlmProvider::OpenAI));
        assert!(LlmProvider::from_str("claude-local").is_err());
    }
}
