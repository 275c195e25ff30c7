//! Motor de conversación compartido por la API, la consola y el chat web.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::AppConfig;
use crate::errors::RagError;
use crate::llm::OpenAiChat;
use crate::models::ConversationMessage;
use crate::rag::{GenerationSettings, ResponseGenerator, Retriever};
use crate::session::{ConversationSession, SessionStore};
use crate::vector_store::Collection;

/// Respuesta fija cuando la búsqueda no devuelve ningún chunk.
pub const NO_CONTEXT_REPLY: &str = "Não encontrei informações relevantes para sua pergunta. \
Tente reformular ou perguntar sobre objeções de vendas ou o produto 'Menos Café Mais Chá'.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Respuesta generada por el LLM con contexto recuperado.
    Answer(String),
    /// No había contexto; no se llamó al LLM.
    NoContext,
}

impl Reply {
    pub fn into_text(self) -> String {
        match self {
            Reply::Answer(text) => text,
            Reply::NoContext => NO_CONTEXT_REPLY.to_string(),
        }
    }
}

pub struct ChatEngine {
    retriever: Retriever,
    generator: ResponseGenerator,
    top_k: usize,
}

impl ChatEngine {
    pub fn new(retriever: Retriever, generator: ResponseGenerator, top_k: usize) -> Self {
        Self {
            retriever,
            generator,
            top_k,
        }
    }

    /// Abre el vector store configurado y prepara los clientes de OpenAI.
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, RagError> {
        let collection = Collection::from_config(cfg).await?;
        match collection.count().await {
            Ok(0) => info!(
                "La colección '{}' está vacía; ejecuta `ingest` primero",
                collection.name()
            ),
            Ok(n) => info!("Colección '{}' con {n} chunks", collection.name()),
            Err(e) => return Err(e),
        }

        Ok(Self::new(
            Retriever::new(collection),
            ResponseGenerator::new(
                Arc::new(OpenAiChat::from_config(cfg)),
                GenerationSettings::from_config(cfg),
            ),
            cfg.top_k,
        ))
    }

    /// Recupera contexto y, si lo hay, genera la respuesta.
    pub async fn answer(
        &self,
        question: &str,
        history: &[ConversationMessage],
    ) -> Result<Reply, RagError> {
        let chunks = self.retriever.retrieve(question, self.top_k).await;
        if chunks.is_empty() {
            debug!("Sin contexto en '{}'", self.retriever.collection().name());
            return Ok(Reply::NoContext);
        }

        debug!(
            "Generando con {} chunks (modelo {})",
            chunks.len(),
            self.generator.settings().model
        );
        let text = self.generator.generate(question, &chunks, history).await?;
        Ok(Reply::Answer(text))
    }

    fn history_window(&self) -> usize {
        self.generator.settings().history_window
    }

    /// Turno completo sobre una sesión del `SessionStore`. Sólo las respuestas
    /// generadas quedan en el historial.
    pub async fn converse(
        &self,
        sessions: &SessionStore,
        session_id: &str,
        question: &str,
    ) -> Result<String, RagError> {
        let history = sessions.recent(session_id, self.history_window());
        let reply = self.answer(question, &history).await?;
        if let Reply::Answer(text) = &reply {
            sessions.record_turn(session_id, question, text);
        }
        Ok(reply.into_text())
    }

    /// Igual que `converse`, para una sesión local (consola).
    pub async fn respond(
        &self,
        session: &mut ConversationSession,
        question: &str,
    ) -> Result<String, RagError> {
        let reply = self
            .answer(question, session.recent(self.history_window()))
            .await?;
        if let Reply::Answer(text) = &reply {
            session.record_turn(question, text);
        }
        Ok(reply.into_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::session::ResetPolicy;
    use crate::testing::{engine_with, RecordingChat};

    #[tokio::test]
    async fn empty_store_short_circuits_without_llm_call() {
        let chat = Arc::new(RecordingChat::default());
        let engine = engine_with(&[], chat.clone()).await;
        let sessions = SessionStore::new(ResetPolicy::Empty);

        let text = engine.converse(&sessions, "default", "Quanto custa?").await.unwrap();

        assert_eq!(text, NO_CONTEXT_REPLY);
        assert!(chat.requests().is_empty());
        assert!(sessions.history("default").is_empty());
    }

    #[tokio::test]
    async fn answered_turn_is_recorded() {
        let chat = Arc::new(RecordingChat::default());
        let engine = engine_with(&["garantia de 7 dias", "entrega em 5 dias"], chat.clone()).await;
        let sessions = SessionStore::new(ResetPolicy::Empty);

        let text = engine.converse(&sessions, "ana", "qual a garantia?").await.unwrap();

        assert!(!text.is_empty());
        assert_ne!(text, NO_CONTEXT_REPLY);
        let history = sessions.history("ana");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ConversationMessage::user("qual a garantia?"));
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, text);

        // El contexto llega en la instrucción de sistema, el más relevante primero.
        let requests = chat.requests();
        let system = &requests[0].messages[0].content;
        let garantia = system.find("garantia de 7 dias").unwrap();
        let entrega = system.find("entrega em 5 dias").unwrap();
        assert!(garantia < entrega);
    }

    #[tokio::test]
    async fn history_from_previous_turns_is_sent() {
        let chat = Arc::new(RecordingChat::default());
        let engine = engine_with(&["o chá acalma"], chat.clone()).await;
        let mut session = ConversationSession::new(ResetPolicy::Empty);

        engine.respond(&mut session, "o chá acalma?").await.unwrap();
        engine.respond(&mut session, "e o chá dá sono?").await.unwrap();

        let requests = chat.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].messages[1], ConversationMessage::user("o chá acalma?"));
        assert_eq!(session.len(), 4);
    }

    #[tokio::test]
    async fn long_conversations_send_only_the_recent_window() {
        let chat = Arc::new(RecordingChat::default());
        let engine = engine_with(&["o chá acalma"], chat.clone()).await;
        let sessions = SessionStore::new(ResetPolicy::Empty);

        for i in 0..5 {
            let question = format!("o chá acalma? {i}");
            engine.converse(&sessions, "ana", &question).await.unwrap();
        }

        let requests = chat.requests();
        // Sistema + 6 mensajes de historial + pregunta.
        assert_eq!(requests[4].messages.len(), 8);
        assert_eq!(requests[4].messages[1], ConversationMessage::user("o chá acalma? 1"));
        assert_eq!(sessions.history("ana").len(), 10);
    }

    #[tokio::test]
    async fn failed_generation_is_not_recorded() {
        let chat = Arc::new(RecordingChat::failing("quota exceeded"));
        let engine = engine_with(&["garantia de 7 dias"], chat).await;
        let mut session = ConversationSession::new(ResetPolicy::Empty);

        let err = engine.respond(&mut session, "qual a garantia?").await.unwrap_err();

        assert!(matches!(err, RagError::Upstream(_)));
        assert!(session.is_empty());
    }
}
