//! Carga y validación de la configuración de la aplicación.
//!
//! Toda la configuración se lee una sola vez al arrancar (`.env` incluido) y
//! se valida aquí; el resto del código recibe un `AppConfig` ya correcto.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::errors::RagError;
use crate::upstream::RetryPolicy;

pub const DEFAULT_COLLECTION: &str = "texto_gerado";

/// Backend del vector store.
#[derive(Clone, Debug, PartialEq)]
pub enum VectorStoreKind {
    /// Fichero JSON local.
    Local { path: PathBuf },
    Neo4j {
        uri: String,
        user: String,
        password: String,
    },
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    /// Mensajes de historial que se envían al LLM.
    pub history_window: usize,
    /// Chunks recuperados por pregunta.
    pub top_k: usize,
    pub chunking: ChunkingConfig,

    pub docs_dir: PathBuf,
    pub collection_name: String,
    pub vector_store: VectorStoreKind,
    pub embedding_dimensions: usize,

    /// Secreto compartido de la API HTTP; sólo `serve` lo exige.
    pub api_key: Option<String>,
    pub server_addr: String,
    pub frontend_dir: PathBuf,
    pub debug: bool,
    pub upstream: RetryPolicy,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self, RagError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero con una fuente de variables arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &str| {
            var(key).ok_or_else(|| {
                RagError::ConfigurationMissing(format!("Falta {key} en el entorno"))
            })
        };
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let openai_api_key = required("OPENAI_API_KEY")?;

        let chunking = ChunkingConfig::new(
            parse_number(&or("CHUNK_SIZE", &DEFAULT_CHUNK_SIZE.to_string()), "CHUNK_SIZE")?,
            parse_number(
                &or("CHUNK_OVERLAP", &DEFAULT_CHUNK_OVERLAP.to_string()),
                "CHUNK_OVERLAP",
            )?,
        )?;

        let top_k: usize = parse_number(&or("RAG_TOP_K", "3"), "RAG_TOP_K")?;
        if top_k == 0 {
            return Err(RagError::InvalidConfiguration(
                "RAG_TOP_K debe ser mayor que 0".to_string(),
            ));
        }

        let vector_store = match or("VECTOR_STORE", "local").to_lowercase().as_str() {
            "local" => VectorStoreKind::Local {
                path: PathBuf::from(or("VECTOR_STORE_PATH", "data/vector_store.json")),
            },
            "neo4j" => VectorStoreKind::Neo4j {
                uri: required("NEO4J_URI")?,
                user: required("NEO4J_USER")?,
                password: required("NEO4J_PASSWORD")?,
            },
            other => {
                return Err(RagError::InvalidConfiguration(format!(
                    "Vector store no soportado: {other} (usa 'local' o 'neo4j')"
                )))
            }
        };

        let server_addr = match var("SERVER_ADDR") {
            Some(addr) => addr,
            None => {
                let port: u16 = parse_number(&or("PORT", "5000"), "PORT")?;
                format!("0.0.0.0:{port}")
            }
        };

        let upstream = RetryPolicy {
            retries: parse_number(&or("UPSTREAM_RETRIES", "2"), "UPSTREAM_RETRIES")?,
            timeout: Duration::from_secs(parse_number(
                &or("UPSTREAM_TIMEOUT_SECS", "30"),
                "UPSTREAM_TIMEOUT_SECS",
            )?),
            ..RetryPolicy::default()
        };

        Ok(Self {
            openai_api_key,
            embedding_model: or("LLM_EMBEDDING_MODEL", "text-embedding-3-small"),
            chat_model: or("LLM_CHAT_MODEL", "gpt-4o-mini"),
            temperature: parse_number(&or("LLM_TEMPERATURE", "0.1"), "LLM_TEMPERATURE")?,
            max_tokens: parse_number(&or("LLM_MAX_TOKENS", "500"), "LLM_MAX_TOKENS")?,
            history_window: parse_number(&or("HISTORY_WINDOW", "6"), "HISTORY_WINDOW")?,
            top_k,
            chunking,
            docs_dir: PathBuf::from(or("DOCS_DIR", "docs")),
            collection_name: or("COLLECTION_NAME", DEFAULT_COLLECTION),
            vector_store,
            embedding_dimensions: parse_number(
                &or("EMBEDDING_DIMENSIONS", "1536"),
                "EMBEDDING_DIMENSIONS",
            )?,
            api_key: var("API_KEY"),
            server_addr,
            frontend_dir: PathBuf::from(or("FRONTEND_DIR", "frontend")),
            debug: parse_bool(&or("DEBUG", "false"), "DEBUG")?,
            upstream,
        })
    }

    /// El secreto compartido, obligatorio para levantar la API HTTP.
    pub fn require_api_key(&self) -> Result<&str, RagError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| {
                RagError::ConfigurationMissing("Falta API_KEY en el entorno".to_string())
            })
    }
}

fn parse_number<T: FromStr>(raw: &str, key: &str) -> Result<T, RagError> {
    raw.parse().map_err(|_| {
        RagError::InvalidConfiguration(format!("{key} no es un número válido: '{raw}'"))
    })
}

fn parse_bool(raw: &str, key: &str) -> Result<bool, RagError> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RagError::InvalidConfiguration(format!(
            "{key} debe ser true/false: '{raw}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, RagError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_sales_bot() {
        let cfg = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();

        assert_eq!(cfg.chat_model, "gpt-4o-mini");
        assert_eq!(cfg.embedding_model, "text-embedding-3-small");
        assert_eq!(cfg.temperature, 0.1);
        assert_eq!(cfg.max_tokens, 500);
        assert_eq!(cfg.history_window, 6);
        assert_eq!(cfg.top_k, 3);
        assert_eq!(cfg.chunking, ChunkingConfig::new(1000, 20).unwrap());
        assert_eq!(cfg.collection_name, "texto_gerado");
        assert_eq!(cfg.server_addr, "0.0.0.0:5000");
        assert_eq!(
            cfg.vector_store,
            VectorStoreKind::Local {
                path: PathBuf::from("data/vector_store.json")
            }
        );
        assert!(cfg.api_key.is_none());
        assert!(!cfg.debug);
        assert_eq!(cfg.upstream.retries, 2);
    }

    #[test]
    fn missing_openai_key_is_reported() {
        match load(&[]) {
            Err(RagError::ConfigurationMissing(msg)) => assert!(msg.contains("OPENAI_API_KEY")),
            other => panic!("resultado inesperado: {other:?}"),
        }
        // Una clave en blanco cuenta como ausente.
        assert!(matches!(
            load(&[("OPENAI_API_KEY", "   ")]),
            Err(RagError::ConfigurationMissing(_))
        ));
    }

    #[test]
    fn neo4j_backend_requires_credentials() {
        let err = load(&[("OPENAI_API_KEY", "sk"), ("VECTOR_STORE", "neo4j")]).unwrap_err();
        assert!(matches!(err, RagError::ConfigurationMissing(msg) if msg.contains("NEO4J_URI")));

        let cfg = load(&[
            ("OPENAI_API_KEY", "sk"),
            ("VECTOR_STORE", "Neo4j"),
            ("NEO4J_URI", "neo4j://localhost:7687"),
            ("NEO4J_USER", "neo4j"),
            ("NEO4J_PASSWORD", "secret"),
        ])
        .unwrap();
        assert!(matches!(cfg.vector_store, VectorStoreKind::Neo4j { .. }));
    }

    #[test]
    fn invalid_values_fail_fast() {
        let base = ("OPENAI_API_KEY", "sk");
        assert!(matches!(
            load(&[base, ("CHUNK_SIZE", "100"), ("CHUNK_OVERLAP", "100")]),
            Err(RagError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            load(&[base, ("CHUNK_SIZE", "mil")]),
            Err(RagError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            load(&[base, ("RAG_TOP_K", "0")]),
            Err(RagError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            load(&[base, ("VECTOR_STORE", "chroma")]),
            Err(RagError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            load(&[base, ("DEBUG", "talvez")]),
            Err(RagError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn server_address_and_api_key() {
        let cfg = load(&[
            ("OPENAI_API_KEY", "sk"),
            ("PORT", "8080"),
            ("API_KEY", "segredo"),
        ])
        .unwrap();
        assert_eq!(cfg.server_addr, "0.0.0.0:8080");
        assert_eq!(cfg.require_api_key().unwrap(), "segredo");

        let cfg = load(&[("OPENAI_API_KEY", "sk"), ("SERVER_ADDR", "127.0.0.1:3322")]).unwrap();
        assert_eq!(cfg.server_addr, "127.0.0.1:3322");
        assert!(matches!(
            cfg.require_api_key(),
            Err(RagError::ConfigurationMissing(_))
        ));
    }
}
