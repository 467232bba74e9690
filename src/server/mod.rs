//! Listener setup
//!
//! One [`Gateway`] (and therefore one router and one set of dispatch
//! queues) is shared by the http and https listeners.

pub mod gateway;
pub mod listener;
pub mod tls;

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use crate::config::{Config, ListenerConfig};
use crate::routing::Scheme;

pub use gateway::Gateway;

/// The configured listeners and the gateway they share.
pub struct Server {
    gateway: Arc<Gateway>,
    listeners: Vec<(ListenerConfig, Scheme, Option<TlsAcceptor>)>,
}

impl Server {
    /// Builds the gateway and loads TLS material. Nothing is bound yet.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let gateway = Arc::new(Gateway::from_config(config).await?);

        let mut listeners = Vec::new();
        if let Some(http) = &config.http {
            listeners.push((http.clone(), Scheme::Http, None));
        }
        if let Some(https) = &config.https {
            let ssl = https.ssl().ok_or(crate::config::ConfigError::MissingTls)?;
            let acceptor = tls::acceptor(ssl).context("failed to load https certificate")?;
            listeners.push((https.clone(), Scheme::Https, Some(acceptor)));
        }

        Ok(Self { gateway, listeners })
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Runs every listener; returns when the first one fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut tasks = JoinSet::new();
        for (listener_cfg, scheme, tls) in self.listeners {
            let gateway = Arc::clone(&self.gateway);
            tasks.spawn(async move { listener::run(&listener_cfg, scheme, gateway, tls).await });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.context("listener task panicked")??;
        }
        Ok(())
    }
}
