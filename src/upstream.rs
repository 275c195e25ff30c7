//! Timeouts y reintentos acotados para las llamadas a servicios externos
//! (embeddings, chat completion y vector store).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::RagError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reintentos tras el primer intento fallido.
    pub retries: u32,
    pub timeout: Duration,
    /// Espera antes del primer reintento; se duplica en cada uno.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            timeout: Duration::from_secs(30),
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Ejecuta `call` hasta `retries + 1` veces. Cada intento tiene su propio
    /// timeout; el último error se devuelve como `RagError::Upstream`.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, RagError>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            let error = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!("timeout tras {:?}", self.timeout),
            };

            if attempt >= self.retries {
                return Err(RagError::Upstream(format!(
                    "{operation} falló tras {} intento(s): {error}",
                    attempt + 1
                )));
            }

            attempt += 1;
            warn!(
                "{operation} falló ({error}); reintento {attempt}/{} en {:?}",
                self.retries, delay
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
}
