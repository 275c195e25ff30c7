//! Historial de conversación por sesión.
//!
//! Política de reinicio por front-end:
//!   - API HTTP y consola: `ResetPolicy::Empty`, `clear()` deja la sesión vacía.
//!   - Chat web: `ResetPolicy::Welcome`, la sesión arranca con el mensaje de
//!     bienvenida y `clear()` lo vuelve a sembrar.
//!
//! `SessionStore` sólo guarda sesiones con algún turno registrado y las
//! descarta tras `SESSION_TTL` sin actividad o al superar `MAX_SESSIONS`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::models::{ConversationMessage, Role};

pub const WELCOME_MESSAGE: &str = "\
👋 Olá! Bem-vindo ao Chat de Vendas do **Menos Café Mais Chá**!

Sou seu assistente especializado em resolver objeções e ajudar você a descobrir como \
nosso produto pode transformar sua relação com o café! ☕➡️🍃

**Como posso te ajudar hoje?**

🎯 Resolver objeções sobre o produto
☕ Explicar os benefícios do método de 21 dias
🛒 Ajudar com dúvidas de checkout
💡 Fornecer informações sobre chás especiais

**Exemplos de perguntas:**
• \"E se não funcionar comigo?\"
• \"Como funciona o método de 21 dias?\"
• \"Quais são os benefícios do chá?\"

Estou aqui para te ajudar a fazer a melhor escolha para sua saúde e bem-estar! 💚";

/// Tiempo sin actividad tras el que una sesión se descarta.
pub const SESSION_TTL: Duration = Duration::from_secs(60 * 60);
/// Sesiones guardadas como máximo; al superarlo se descarta la más antigua.
pub const MAX_SESSIONS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPolicy {
    Empty,
    Welcome,
}

#[derive(Debug, Clone)]
pub struct ConversationSession {
    messages: Vec<ConversationMessage>,
    policy: ResetPolicy,
}

impl ConversationSession {
    pub fn new(policy: ResetPolicy) -> Self {
        let mut session = Self {
            messages: Vec::new(),
            policy,
        };
        session.clear();
        session
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ConversationMessage::new(role, content));
    }

    pub fn history(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Los últimos `n` mensajes, en orden cronológico.
    pub fn recent(&self, n: usize) -> &[ConversationMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn record_turn(&mut self, question: &str, answer: &str) {
        self.append(Role::User, question);
        self.append(Role::Assistant, answer);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        if self.policy == ResetPolicy::Welcome {
            self.messages.push(ConversationMessage::assistant(WELCOME_MESSAGE));
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

struct StoredSession {
    session: ConversationSession,
    last_access: Instant,
}

/// Sesiones en memoria indexadas por id, todas con la misma política.
///
/// El mutex nunca se mantiene durante un `.await`: los llamantes toman una
/// copia del historial, llaman al LLM y después registran el turno. Leer o
/// reiniciar un id desconocido no crea la sesión.
pub struct SessionStore {
    policy: ResetPolicy,
    ttl: Duration,
    max_sessions: usize,
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl SessionStore {
    pub fn new(policy: ResetPolicy) -> Self {
        Self::with_limits(policy, SESSION_TTL, MAX_SESSIONS)
    }

    pub fn with_limits(policy: ResetPolicy, ttl: Duration, max_sessions: usize) -> Self {
        Self {
            policy,
            ttl,
            max_sessions: max_sessions.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Los últimos `n` mensajes de la sesión; el historial inicial de la
    /// política si la sesión no existe.
    pub fn recent(&self, id: &str, n: usize) -> Vec<ConversationMessage> {
        let mut sessions = self.lock();
        match sessions.get_mut(id) {
            Some(stored) => {
                stored.last_access = Instant::now();
                stored.session.recent(n).to_vec()
            }
            None => ConversationSession::new(self.policy).recent(n).to_vec(),
        }
    }

    /// Copia del historial completo.
    pub fn history(&self, id: &str) -> Vec<ConversationMessage> {
        self.recent(id, usize::MAX)
    }

    pub fn record_turn(&self, id: &str, question: &str, answer: &str) {
        let now = Instant::now();
        let mut sessions = self.lock();
        if !sessions.contains_key(id) {
            self.evict(&mut sessions, now);
        }
        let stored = sessions
            .entry(id.to_string())
            .or_insert_with(|| StoredSession {
                session: ConversationSession::new(self.policy),
                last_access: now,
            });
        stored.session.record_turn(question, answer);
        stored.last_access = now;
    }

    /// Reinicia la sesión según la política y devuelve el historial resultante.
    pub fn clear(&self, id: &str) -> Vec<ConversationMessage> {
        // Una sesión reiniciada es igual a una nueva: no hace falta guardarla.
        self.lock().remove(id);
        ConversationSession::new(self.policy).history().to_vec()
    }

    /// Descarta las sesiones caducadas. Devuelve cuántas se eliminaron.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now.duration_since(s.last_access) <= self.ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Deja sitio para una sesión nueva: caducadas primero y, si aún se
    /// alcanza el máximo, las de acceso más antiguo.
    fn evict(&self, sessions: &mut HashMap<String, StoredSession>, now: Instant) {
        sessions.retain(|_, s| now.duration_since(s.last_access) <= self.ttl);
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_access)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => sessions.remove(&id),
                None => break,
            };
        }
    }
}
