//! Abstracción sobre Rig para los dos servicios de OpenAI que usa el chat:
//! embeddings y chat completion.
//!
//! Los traits `Embedder` y `ChatModel` separan el pipeline del proveedor; las
//! implementaciones de OpenAI envuelven cada llamada en la `RetryPolicy`.

use async_trait::async_trait;
use rig::client::{CompletionClient as _, EmbeddingsClient as _};
use rig::completion::Chat as _;
use rig::embeddings::EmbeddingModel as _;
use rig::message::Message;
use rig::providers::openai;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::RagError;
use crate::models::{ConversationMessage, Role};
use crate::upstream::RetryPolicy;

/// Convierte texto en un vector de longitud fija.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, RagError>;
}

/// Petición de chat completion ya montada: `messages[0]` es la instrucción
/// de sistema y el último mensaje es la pregunta del usuario.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ConversationMessage>,
    pub temperature: f64,
    pub max_tokens: u64,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Devuelve el texto de la primera respuesta generada.
    async fn complete(&self, request: CompletionRequest) -> Result<String, RagError>;
}

// ---------------------------------------------------------------------
// EMBEDDINGS
// ---------------------------------------------------------------------

#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: openai::Client,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            client: openai::Client::new(&cfg.openai_api_key),
            model: cfg.embedding_model.clone(),
            retry: cfg.upstream,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, RagError> {
        let embedding_model = self.client.embedding_model(&self.model);

        let embeddings = self
            .retry
            .run("embedding", || embedding_model.embed_texts(vec![text.to_string()]))
            .await?;

        embeddings
            .into_iter()
            .next()
            .map(|e| e.vec)
            .ok_or_else(|| {
                RagError::Upstream("La API de embeddings no devolvió ningún vector".to_string())
            })
    }
}

// ---------------------------------------------------------------------
// CHAT / COMPLETION
// ---------------------------------------------------------------------

#[derive(Clone)]
pub struct OpenAiChat {
    client: openai::Client,
    retry: RetryPolicy,
}

impl OpenAiChat {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            client: openai::Client::new(&cfg.openai_api_key),
            retry: cfg.upstream,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, request: CompletionRequest) -> Result<String, RagError> {
        let (preamble, history, prompt) = split_for_agent(&request.messages)?;

        debug!(
            "Chat completion con {} mensajes de historial (modelo {})",
            history.len(),
            request.model
        );

        let agent = self
            .client
            .agent(&request.model)
            .preamble(&preamble)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build();

        self.retry
            .run("chat completion", || {
                agent.chat(Message::user(prompt.clone()), history.clone())
            })
            .await
    }
}

/// Reparte la lista de mensajes en lo que espera un agente de Rig:
/// preámbulo (sistema), historial intermedio y prompt final del usuario.
fn split_for_agent(
    messages: &[ConversationMessage],
) -> Result<(String, Vec<Message>, String), RagError> {
    let (last, rest) = messages
        .split_last()
        .ok_or_else(|| RagError::Validation("La petición de chat no tiene mensajes".to_string()))?;
    if last.role != Role::User {
        return Err(RagError::Validation(
            "El último mensaje de la petición debe ser del usuario".to_string(),
        ));
    }

    let mut preamble = Vec::new();
    let mut history = Vec::new();
    for msg in rest {
        match msg.role {
            Role::System => preamble.push(msg.content.as_str()),
            Role::User => history.push(Message::user(msg.content.clone())),
            Role::Assistant => history.push(Message::assistant(msg.content.clone())),
        }
    }

    Ok((preamble.join("\n\n"), history, last.content.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_system_history_and_prompt() {
        let messages = vec![
            ConversationMessage::system("persona"),
            ConversationMessage::user("oi"),
            ConversationMessage::assistant("olá!"),
            ConversationMessage::user("quanto custa?"),
        ];

        let (preamble, history, prompt) = split_for_agent(&messages).unwrap();

        assert_eq!(preamble, "persona");
        assert_eq!(history.len(), 2);
        assert_eq!(prompt, "quanto custa?");
    }

    #[test]
    fn rejects_requests_without_user_prompt() {
        assert!(matches!(split_for_agent(&[]), Err(RagError::Validation(_))));
        let messages = vec![
            ConversationMessage::system("persona"),
            ConversationMessage::assistant("olá!"),
        ];
        assert!(matches!(
            split_for_agent(&messages),
            Err(RagError::Validation(_))
        ));
    }
}
