//! Recuperación de contexto y generación de la respuesta de ventas.
//!
//! Flujo:
//!   1. `Retriever::retrieve` busca por texto en la colección los `k` chunks
//!      más relevantes (lista vacía si no hay datos o la búsqueda falla).
//!   2. `ResponseGenerator::generate` monta la instrucción de sistema con la
//!      persona de ventas y el contexto, añade los últimos mensajes del
//!      historial y la pregunta, y llama al modelo de chat.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::RagError;
use crate::llm::{ChatModel, CompletionRequest};
use crate::models::ConversationMessage;
use crate::vector_store::Collection;

/// Persona del asistente. El contexto recuperado se añade a continuación.
pub const SALES_PERSONA: &str = "\
Você é um assistente de vendas especializado em resolver objeções e vender. \
Seu principal objetivo é vender o produto 'Menos Café Mais Chá'. \
Use as informações do contexto para responder de forma empática, persuasiva e profissional. \
Use um tom conversacional, acolhedor e use emojis quando apropriado. \
Se não souber a resposta baseada no contexto, diga que não tem essa informação específica. \
Não diga tudo o que é possível encontrar no produto, dê alguns detalhes mas não todos. \
Sempre faça uma chamada para a venda, o objetivo é fazer o cliente comprar o produto \
e não simplesmente responder perguntas. \
Não fale de desconto. \
Sempre foque nos benefícios e na solução que o produto oferece.";

#[derive(Clone)]
pub struct Retriever {
    collection: Collection,
}

impl Retriever {
    pub fn new(collection: Collection) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Hasta `k` textos en el orden de relevancia del store. Un fallo del
    /// store o del embedding se registra y se trata como "sin contexto".
    pub async fn retrieve(&self, question: &str, k: usize) -> Vec<String> {
        match self.collection.query_text(question, k).await {
            Ok(results) => {
                debug!("Recuperados {} chunks para la pregunta", results.len());
                results.into_iter().take(k).map(|r| r.text).collect()
            }
            Err(err) => {
                warn!("Error al buscar documentos en '{}': {err}", self.collection.name());
                Vec::new()
            }
        }
    }
}

/// Modelo y parámetros de muestreo para cada respuesta.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub history_window: usize,
}

impl GenerationSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            model: cfg.chat_model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            history_window: cfg.history_window,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 500,
            history_window: 6,
        }
    }
}

#[derive(Clone)]
pub struct ResponseGenerator {
    chat: Arc<dyn ChatModel>,
    settings: GenerationSettings,
}

impl ResponseGenerator {
    pub fn new(chat: Arc<dyn ChatModel>, settings: GenerationSettings) -> Self {
        Self { chat, settings }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Llama siempre al modelo, también con contexto vacío. Los errores del
    /// proveedor se propagan como `RagError::Upstream`.
    pub async fn generate(
        &self,
        question: &str,
        context_chunks: &[String],
        history: &[ConversationMessage],
    ) -> Result<String, RagError> {
        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages: build_messages(
                question,
                context_chunks,
                history,
                self.settings.history_window,
            ),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        self.chat.complete(request).await
    }
}

pub fn system_prompt(context_chunks: &[String]) -> String {
    let context = context_chunks.join("\n\n");
    format!("{SALES_PERSONA}\n\nContexto:\n{context}\n\n")
}

/// `[sistema] + últimos `window` mensajes del historial + [pregunta]`.
pub fn build_messages(
    question: &str,
    context_chunks: &[String],
    history: &[ConversationMessage],
    window: usize,
) -> Vec<ConversationMessage> {
    let start = history.len().saturating_sub(window);
    let mut messages = Vec::with_capacity(history.len() - start + 2);
    messages.push(ConversationMessage::system(system_prompt(context_chunks)));
    messages.extend_from_slice(&history[start..]);
    messages.push(ConversationMessage::user(question));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Embedder;
    use crate::models::{Role, StoredChunk};
    use crate::testing::{FailingStore, KeywordEmbedder, RecordingChat};
    use crate::vector_store::LocalStore;

    fn history_of(n: usize) -> Vec<ConversationMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationMessage::user(format!("pergunta {i}"))
                } else {
                    ConversationMessage::assistant(format!("resposta {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn system_prompt_embeds_joined_context() {
        let prompt = system_prompt(&["primeiro".to_string(), "segundo".to_string()]);
        assert!(prompt.starts_with(SALES_PERSONA));
        assert!(prompt.contains("Contexto:\nprimeiro\n\nsegundo\n\n"));
        assert!(prompt.contains("Não fale de desconto"));
    }

    #[tokio::test]
    async fn only_last_six_history_messages_are_sent() {
        let chat = Arc::new(RecordingChat::default());
        let generator = ResponseGenerator::new(chat.clone(), GenerationSettings::default());
        let history = history_of(8);

        let answer = generator
            .generate("E se não funcionar comigo?", &["garantia de 7 dias".to_string()], &history)
            .await
            .unwrap();

        assert!(!answer.is_empty());
        let requests = chat.requests();
        assert_eq!(requests.len(), 1);
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 8);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("garantia de 7 dias"));
        assert_eq!(&messages[1..7], &history[2..]);
        assert_eq!(messages[7], ConversationMessage::user("E se não funcionar comigo?"));
        assert_eq!(requests[0].model, "gpt-4o-mini");
        assert_eq!(requests[0].temperature, 0.1);
        assert_eq!(requests[0].max_tokens, 500);
    }

    #[tokio::test]
    async fn empty_context_still_calls_the_model() {
        let chat = Arc::new(RecordingChat::default());
        let generator = ResponseGenerator::new(chat.clone(), GenerationSettings::default());

        let answer = generator.generate("Oi", &[], &[]).await.unwrap();

        assert!(!answer.is_empty());
        let requests = chat.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn upstream_errors_are_propagated() {
        let generator = ResponseGenerator::new(
            Arc::new(RecordingChat::failing("quota exceeded")),
            GenerationSettings::default(),
        );

        let err = generator.generate("Oi", &[], &[]).await.unwrap_err();
        assert!(matches!(err, RagError::Upstream(msg) if msg.contains("quota exceeded")));
    }

    #[tokio::test]
    async fn retrieve_on_empty_store_returns_nothing() {
        let collection = Collection::new(
            "texto_gerado",
            Arc::new(LocalStore::in_memory()),
            Arc::new(KeywordEmbedder::default()),
        );

        assert!(Retriever::new(collection).retrieve("Como preparar o chá?", 3).await.is_empty());
    }

    #[tokio::test]
    async fn retrieve_never_exceeds_k() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let store = Arc::new(LocalStore::in_memory());
        let collection = Collection::new("texto_gerado", store, embedder.clone());
        let mut chunks = Vec::new();
        for i in 0..10 {
            let text = format!("chá número {i}");
            chunks.push(StoredChunk {
                id: format!("doc_chunk{i}"),
                embedding: embedder.embed(&text).await.unwrap(),
                text,
            });
        }
        collection.upsert(chunks).await.unwrap();
        let retriever = Retriever::new(collection);

        for k in [1, 3, 10, 25] {
            let results = retriever.retrieve("chá", k).await;
            assert_eq!(results.len(), k.min(10));
        }
    }

    #[tokio::test]
    async fn retrieve_swallows_store_failures() {
        let collection = Collection::new(
            "texto_gerado",
            Arc::new(FailingStore),
            Arc::new(KeywordEmbedder::default()),
        );

        assert!(Retriever::new(collection).retrieve("Frete muito caro", 3).await.is_empty());
    }
}
