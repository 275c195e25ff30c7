use std::sync::{Arc, PoisonError, RwLock};

use crate::chat::ChatEngine;
use crate::config::AppConfig;
use crate::errors::RagError;
use crate::session::{ResetPolicy, SessionStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Secreto compartido de las rutas `/chat*`.
    pub api_key: Arc<str>,
    pub engine: EngineSlot,
    /// Conversaciones de la API HTTP, por `X-Session-Id`.
    pub api_sessions: Arc<SessionStore>,
    /// Conversaciones del chat web, por id de sesión del navegador.
    pub web_sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(config: AppConfig, api_key: &str, engine: EngineSlot) -> Self {
        Self {
            config: Arc::new(config),
            api_key: Arc::from(api_key),
            engine,
            api_sessions: Arc::new(SessionStore::new(ResetPolicy::Empty)),
            web_sessions: Arc::new(SessionStore::new(ResetPolicy::Welcome)),
        }
    }

    /// Descarta las sesiones inactivas de la API y del chat web.
    pub fn purge_expired_sessions(&self) -> usize {
        self.api_sessions.purge_expired() + self.web_sessions.purge_expired()
    }
}

/// El motor de chat, que puede no estar listo todavía (o no haber podido
/// arrancar). Mientras está vacío las rutas de chat responden
/// `RagError::NotInitialized`.
#[derive(Clone, Default)]
pub struct EngineSlot(Arc<RwLock<Option<Arc<ChatEngine>>>>);

impl EngineSlot {
    pub fn empty() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn ready(engine: ChatEngine) -> Self {
        let slot = Self::empty();
        slot.set(engine);
        slot
    }

    pub fn set(&self, engine: ChatEngine) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(engine));
    }

    pub fn get(&self) -> Result<Arc<ChatEngine>, RagError> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RagError::NotInitialized)
    }

    pub fn is_loaded(&self) -> bool {
        self.0.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}
