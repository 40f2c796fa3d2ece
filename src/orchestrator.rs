//! Runs the listeners side by side under one shutdown signal.
//!
//! The signal is a `watch` channel that only ever goes `false` -> `true`.
//! Proxy DHCP and TFTP stop as soon as it flips; HTTP drains for up to
//! [`HTTP_SHUTDOWN_GRACE`] and is then dropped. The first listener that
//! fails raises the signal for the others.

use std::future::{Future, IntoFuture};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::bootconfig::{BootConfigRetriever, HttpDecisionClient, UPSTREAM_TIMEOUT};
use crate::bootfiles::BootFileStore;
use crate::config::ServiceConfig;
use crate::proxydhcp::{ProxyDhcpHandler, ProxyDhcpServer, DHCP_SERVER_PORT};
use crate::routes::create_router;
use crate::tftp::{TftpServer, TFTP_PORT};

/// How long in-flight HTTP requests may run after shutdown is requested.
pub const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Raises the shutdown signal. Cheap to clone; raising twice is harmless.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    #[cfg(test)]
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }
}

/// Resolves once the signal is raised or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// HTTP listener for the boot-config endpoint.
pub struct HttpListener {
    listener: TcpListener,
    router: Router,
}

impl HttpListener {
    pub async fn bind(addr: SocketAddr, retriever: BootConfigRetriever) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;

        Ok(Self {
            listener,
            router: create_router(retriever),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until shutdown, then drain for at most `grace`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>, grace: Duration) -> Result<()> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "HTTP server listening");

        let mut drain_signal = shutdown.clone();
        let server = axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { stopped(&mut drain_signal).await })
        .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => {
                return result.context("HTTP server failed");
            }
            _ = stopped(&mut shutdown) => {}
        }

        match tokio::time::timeout(grace, &mut server).await {
            Ok(result) => result.context("HTTP server failed while draining")?,
            Err(_) => warn!(
                grace_secs = grace.as_secs(),
                "HTTP requests still in flight after grace period, closing"
            ),
        }

        info!("HTTP server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for HttpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpListener")
            .field("addr", &self.listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

/// Bound, not yet running, listeners.
#[derive(Debug)]
pub struct Listeners {
    pub proxy_dhcp: Option<ProxyDhcpServer>,
    pub tftp: TftpServer,
    pub http: Option<HttpListener>,
}

impl Listeners {
    /// Bind every listener the configuration enables.
    ///
    /// Binding happens up front so a port conflict fails startup before
    /// anything is served.
    pub async fn bind(config: &ServiceConfig, store: Arc<dyn BootFileStore>) -> Result<Self> {
        let proxy_dhcp = if config.enable_proxy_dhcp {
            let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT);
            let handler = ProxyDhcpHandler::new(config.proxy_dhcp.clone());
            let server = ProxyDhcpServer::bind(addr, Some(&config.interface), handler)
                .context("failed to start proxy DHCP listener")?;
            Some(server)
        } else {
            info!("ProxyDHCP disabled by configuration");
            None
        };

        let tftp_addr = SocketAddr::from((config.server_ip, TFTP_PORT));
        let tftp = TftpServer::bind(tftp_addr, store)
            .await
            .context("failed to start TFTP listener")?;

        let http = match &config.boot_decision_url {
            Some(url) => {
                let client = HttpDecisionClient::new(url.clone(), UPSTREAM_TIMEOUT)
                    .context("failed to build boot decision client")?;
                let retriever = BootConfigRetriever::new(Arc::new(client));
                let addr = SocketAddr::from((config.server_ip, config.http_port));
                Some(HttpListener::bind(addr, retriever).await?)
            }
            None => {
                warn!("No boot decision URL configured, HTTP boot-config endpoint disabled");
                None
            }
        };

        Ok(Self {
            proxy_dhcp,
            tftp,
            http,
        })
    }
}

/// Owns the shutdown signal and the running listener tasks.
pub struct Orchestrator {
    shutdown: Arc<watch::Sender<bool>>,
    tasks: JoinSet<Result<()>>,
    http_grace: Duration,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::with_http_grace(HTTP_SHUTDOWN_GRACE)
    }

    pub fn with_http_grace(http_grace: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown: Arc::new(shutdown),
            tasks: JoinSet::new(),
            http_grace,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Run `listener` as one of the supervised tasks.
    pub fn spawn<F>(&mut self, name: &'static str, listener: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(async move {
            listener
                .await
                .with_context(|| format!("{name} listener failed"))
        });
    }

    /// Start every bound listener.
    pub fn start(&mut self, listeners: Listeners) {
        let Listeners {
            proxy_dhcp,
            tftp,
            http,
        } = listeners;

        if let Some(server) = proxy_dhcp {
            let shutdown = self.subscribe();
            self.spawn("proxy DHCP", async move { Ok(server.run(shutdown).await?) });
        }

        let shutdown = self.subscribe();
        self.spawn("TFTP", async move { Ok(tftp.run(shutdown).await?) });

        if let Some(http) = http {
            let shutdown = self.subscribe();
            let grace = self.http_grace;
            self.spawn("HTTP", http.run(shutdown, grace));
        }
    }

    /// Wait for every listener to finish.
    ///
    /// A failing listener raises the shutdown signal; the remaining ones
    /// are still awaited before the first error is returned.
    pub async fn wait(mut self) -> Result<()> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let result = joined
                .map_err(anyhow::Error::from)
                .and_then(|result| result);

            if let Err(e) = result {
                let reason = format!("{e:#}");
                error!(error = %reason, "Listener failed, shutting down");
                self.shutdown.send_replace(true);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("All listeners stopped");
                Ok(())
            }
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}
