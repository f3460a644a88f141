use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{
    config::RelayConfig,
    connection::Supervisor,
    hub::Hub,
    identity::{IdentityProvider, NanoidIdentities},
};

pub struct Server {
    listener: TcpListener,
    config: RelayConfig,
    identities: Arc<dyn IdentityProvider>,
}

impl Server {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self::with_identities(listener, config, Arc::new(NanoidIdentities))
    }

    pub fn with_identities(
        listener: TcpListener,
        config: RelayConfig,
        identities: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            listener,
            config,
            identities,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Sessions already running keep the hub alive and finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            config,
            identities,
        } = self;
        let (hub, _hub_task) = Hub::spawn(&config);
        let supervisor = Supervisor::new(hub, identities, Arc::new(config));
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &supervisor);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    supervisor: &Supervisor,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, supervisor),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, supervisor: &Supervisor) {
    let supervisor = supervisor.clone();
    tokio::spawn(async move {
        if let Err(err) = supervisor.run(stream, Some(peer)).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}
