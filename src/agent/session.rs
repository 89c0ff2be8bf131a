//! Installed agents keyed by page.
//! Installing twice into the same page returns the existing agent.

use crate::agent::dispatch::PageAgent;
use crate::agent::emitter::EventEmitter;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::host::PageHost;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct AgentSessions {
    config: AgentConfig,
    emitter: EventEmitter,
    sessions: Mutex<HashMap<String, Arc<PageAgent>>>,
}

impl AgentSessions {
    pub fn new(config: AgentConfig, emitter: EventEmitter) -> Self {
        Self {
            config,
            emitter,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Get the agent for `host`'s page, installing it on first use.
    /// The map stays locked during installation so two callers cannot both install.
    pub async fn get_or_install(&self, host: Arc<dyn PageHost>) -> Result<Arc<PageAgent>> {
        let key = host.page_key();
        let mut sessions = self.sessions.lock().await;
        if let Some(agent) = sessions.get(&key) {
            return Ok(Arc::clone(agent));
        }

        let agent = PageAgent::install(host, &self.config, self.emitter.clone()).await?;
        sessions.insert(key, Arc::clone(&agent));
        Ok(agent)
    }

    pub async fn get(&self, page_key: &str) -> Option<Arc<PageAgent>> {
        self.sessions.lock().await.get(page_key).cloned()
    }

    /// Shut down and forget one page's agent.
    pub async fn remove(&self, page_key: &str) {
        let agent = self.sessions.lock().await.remove(page_key);
        if let Some(agent) = agent {
            agent.shutdown().await;
            tracing::info!("Removed agent for page {}", page_key);
        }
    }

    /// Shut down every agent (e.g. on process exit).
    pub async fn shutdown_all(&self) {
        let agents: Vec<_> = self.sessions.lock().await.drain().collect();
        for (key, agent) in agents {
            agent.shutdown().await;
            tracing::info!("Shut down agent for page {}", key);
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryPage;

    fn sessions() -> AgentSessions {
        AgentSessions::new(AgentConfig::default(), EventEmitter::new())
    }

    #[tokio::test]
    async fn test_repeated_install_reuses_agent() {
        let sessions = sessions();
        let page = Arc::new(MemoryPage::new("https://example.com", "t", 800.0, 600.0));

        let first = sessions.get_or_install(page.clone()).await.unwrap();
        let second = sessions.get_or_install(page.clone()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(sessions.len().await, 1);
        assert_eq!(page.overlay_installs(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_shutdown_all() {
        let sessions = sessions();
        let a = Arc::new(MemoryPage::new("https://a.example", "a", 800.0, 600.0));
        let b = Arc::new(MemoryPage::new("https://b.example", "b", 800.0, 600.0));
        let agent = sessions.get_or_install(a.clone()).await.unwrap();
        sessions.get_or_install(b.clone()).await.unwrap();
        assert_eq!(sessions.len().await, 2);

        sessions.remove(&agent.page_key()).await;
        assert!(sessions.get(&a.page_key()).await.is_none());

        sessions.shutdown_all().await;
        assert!(sessions.is_empty().await);
    }
}
