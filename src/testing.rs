//! Dobles de prueba para los servicios externos.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::chat::ChatEngine;
use crate::errors::RagError;
use crate::llm::{ChatModel, CompletionRequest, Embedder};
use crate::models::{ScoredChunk, StoredChunk};
use crate::rag::{GenerationSettings, ResponseGenerator, Retriever};
use crate::vector_store::{Collection, LocalStore, VectorStore};

const DIMS: usize = 256;

/// Embedding de bolsa de palabras con hashing: textos que comparten palabras
/// tienen similitud coseno positiva.
#[derive(Default)]
pub struct KeywordEmbedder {
    fail_marker: Option<String>,
}

impl KeywordEmbedder {
    /// Falla para cualquier texto que contenga `marker`.
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
        }
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, RagError> {
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(RagError::Upstream("embedding rechazado".to_string()));
            }
        }

        let mut vector = vec![0.0; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            vector[(fnv1a(word.as_bytes()) % DIMS as u64) as usize] += 1.0;
        }
        Ok(vector)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x100000001b3)
    })
}

/// Modelo de chat que registra cada petición y responde con eco.
#[derive(Default)]
pub struct RecordingChat {
    requests: Mutex<Vec<CompletionRequest>>,
    failure: Option<String>,
}

impl RecordingChat {
    pub fn failing(message: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failure: Some(message.to_string()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for RecordingChat {
    async fn complete(&self, request: CompletionRequest) -> Result<String, RagError> {
        let question = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.requests.lock().unwrap().push(request);
        match &self.failure {
            Some(message) => Err(RagError::Upstream(message.clone())),
            None => Ok(format!("Resposta para: {question}")),
        }
    }
}

/// Store que falla en todas las operaciones.
pub struct FailingStore;

#[async_trait]
impl VectorStore for FailingStore {
    async fn upsert(&self, _collection: &str, _chunks: Vec<StoredChunk>) -> Result<(), RagError> {
        Err(RagError::Upstream("store caído".to_string()))
    }

    async fn query(
        &self,
        _collection: &str,
        _embedding: &[f64],
        _k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        Err(RagError::Upstream("store caído".to_string()))
    }

    async fn count(&self, _collection: &str) -> Result<usize, RagError> {
        Err(RagError::Upstream("store caído".to_string()))
    }
}

/// Motor completo sobre un store en memoria con los `texts` ya indexados.
pub async fn engine_with(texts: &[&str], chat: Arc<RecordingChat>) -> ChatEngine {
    let embedder = Arc::new(KeywordEmbedder::default());
    let collection = Collection::new(
        "texto_gerado",
        Arc::new(LocalStore::in_memory()),
        embedder.clone(),
    );
    let mut chunks = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        chunks.push(StoredChunk {
            id: format!("faq.txt_chunk{}", i + 1),
            text: text.to_string(),
            embedding: embedder.embed(text).await.unwrap(),
        });
    }
    if !chunks.is_empty() {
        collection.upsert(chunks).await.unwrap();
    }

    ChatEngine::new(
        Retriever::new(collection),
        ResponseGenerator::new(chat, GenerationSettings::default()),
        3,
    )
}
