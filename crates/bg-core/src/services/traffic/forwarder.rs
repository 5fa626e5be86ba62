use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use super::TrafficSwitch;
use crate::error::{DeployError, Result};

/// The listener currently owning the port, with everything needed to drain it.
struct ActiveListener {
    local_addr: SocketAddr,
    destination: String,
    shutdown_tx: watch::Sender<bool>,
    accept_loop: JoinHandle<()>,
}

impl ActiveListener {
    fn spawn(listener: TcpListener, destination: String) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_loop = tokio::spawn(accept_loop(listener, destination.clone(), shutdown_rx));
        Ok(Self {
            local_addr,
            destination,
            shutdown_tx,
            accept_loop,
        })
    }

    /// Stop accepting, close the socket and wait for every in-flight
    /// connection to finish. Returns where it listened and forwarded.
    async fn drain(self) -> (SocketAddr, String) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.accept_loop.await {
            tracing::warn!(addr = %self.local_addr, "forwarder accept loop aborted: {e}");
        }
        tracing::info!(addr = %self.local_addr, destination = %self.destination, "forwarder drained");
        (self.local_addr, self.destination)
    }
}

/// Hot-swappable TCP forwarder owning at most one listener.
///
/// `start` and `stop` are serialized; the previous listener and all of its
/// connections are gone before a new listener binds, so the port is never
/// held twice.
#[derive(Default)]
pub struct Forwarder {
    active: Mutex<Option<ActiveListener>>,
}

impl Forwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)bind `listen_addr` and forward every accepted connection to
    /// `destination`. Returns the bound address.
    ///
    /// If the new bind fails the previous listener is rebound with its old
    /// destination before the error is returned.
    pub async fn start(&self, listen_addr: SocketAddr, destination: &str) -> Result<SocketAddr> {
        let mut active = self.active.lock().await;
        let previous = match active.take() {
            Some(previous) => Some(previous.drain().await),
            None => None,
        };

        let listener = match TcpListener::bind(listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                if let Some((previous_addr, previous_destination)) = previous {
                    match restore(previous_addr, previous_destination).await {
                        Ok(restored) => {
                            tracing::warn!(addr = %previous_addr, destination = %restored.destination, "new listener failed, previous route restored");
                            *active = Some(restored);
                        }
                        Err(restore_err) => tracing::error!(
                            addr = %previous_addr,
                            "new listener failed and the previous route could not be restored: {restore_err}"
                        ),
                    }
                }
                return Err(DeployError::Cutover(format!(
                    "failed to listen on {listen_addr}: {e}"
                )));
            }
        };

        let started = ActiveListener::spawn(listener, destination.to_string())?;
        let local_addr = started.local_addr;
        tracing::info!(addr = %local_addr, destination, "forwarding");
        *active = Some(started);
        Ok(local_addr)
    }

    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.drain().await;
        }
    }

    pub async fn destination(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.destination.clone())
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.active.lock().await.as_ref().map(|a| a.local_addr)
    }
}

async fn restore(addr: SocketAddr, destination: String) -> Result<ActiveListener> {
    let listener = TcpListener::bind(addr).await?;
    ActiveListener::spawn(listener, destination)
}

async fn accept_loop(
    listener: TcpListener,
    destination: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((inbound, peer)) => {
                    let destination = destination.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        if let Err(e) = forward(inbound, &destination, shutdown).await {
                            tracing::debug!(%peer, %destination, "forwarded connection failed: {e}");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("accept error: {e}");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }
    drop(listener);
    while connections.join_next().await.is_some() {}
}

/// Copy both directions until either one ends or shutdown is signalled.
async fn forward(
    mut inbound: TcpStream,
    destination: &str,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let mut outbound = tokio::select! {
        connected = TcpStream::connect(destination) => connected?,
        _ = shutdown.changed() => return Ok(()),
    };

    let (mut inbound_read, mut inbound_write) = inbound.split();
    let (mut outbound_read, mut outbound_write) = outbound.split();
    let client_to_target = tokio::io::copy(&mut inbound_read, &mut outbound_write);
    let target_to_client = tokio::io::copy(&mut outbound_read, &mut inbound_write);

    tokio::select! {
        copied = client_to_target => { copied?; }
        copied = target_to_client => { copied?; }
        _ = shutdown.changed() => {}
    }
    Ok(())
}

/// Traffic switch backed by one [`Forwarder`] per public port.
pub struct ForwarderSwitch {
    bind_host: IpAddr,
    target_host: String,
    forwarders: Mutex<HashMap<u16, Arc<Forwarder>>>,
}

impl ForwarderSwitch {
    pub fn new(target_host: &str) -> Self {
        Self::with_bind_host(IpAddr::V4(Ipv4Addr::UNSPECIFIED), target_host)
    }

    pub fn with_bind_host(bind_host: IpAddr, target_host: &str) -> Self {
        Self {
            bind_host,
            target_host: target_host.to_string(),
            forwarders: Mutex::new(HashMap::new()),
        }
    }

    async fn forwarder(&self, listen_port: u16) -> Arc<Forwarder> {
        self.forwarders
            .lock()
            .await
            .entry(listen_port)
            .or_default()
            .clone()
    }

    /// Where `listen_port` currently forwards to, if anywhere.
    pub async fn route(&self, listen_port: u16) -> Option<String> {
        let forwarder = self.forwarders.lock().await.get(&listen_port).cloned()?;
        forwarder.destination().await
    }
}

#[async_trait]
impl TrafficSwitch for ForwarderSwitch {
    async fn cutover(&self, listen_port: u16, new_target: u16, old_target: u16) -> Result<()> {
        let destination = format!("{}:{new_target}", self.target_host);
        let forwarder = self.forwarder(listen_port).await;
        forwarder
            .start(SocketAddr::new(self.bind_host, listen_port), &destination)
            .await?;
        tracing::info!(listen_port, new_target, old_target, "forwarder switched");
        Ok(())
    }

    async fn shutdown(&self) {
        let forwarders: Vec<Arc<Forwarder>> =
            self.forwarders.lock().await.values().cloned().collect();
        for forwarder in forwarders {
            forwarder.stop().await;
        }
    }

    fn name(&self) -> &'static str {
        "forwarder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const WAIT: Duration = Duration::from_secs(5);

    /// Backend that greets every connection with `tag` and then echoes.
    async fn tagged_backend(tag: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    if stream.write_all(tag.as_bytes()).await.is_err() {
                        return;
                    }
                    let mut buf = [0u8; 256];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    async fn greeting(stream: &mut TcpStream) -> String {
        let mut buf = [0u8; 1];
        tokio::time::timeout(WAIT, stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn forwards_both_directions() {
        let backend = tagged_backend("A").await;
        let forwarder = Forwarder::new();
        let addr = forwarder
            .start(loopback(0), &backend.to_string())
            .await
            .unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(greeting(&mut client).await, "A");
        client.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        tokio::time::timeout(WAIT, client.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&echoed, b"ping");

        forwarder.stop().await;
    }

    #[tokio::test]
    async fn restart_on_same_port_never_double_binds() {
        let backend_a = tagged_backend("A").await;
        let backend_b = tagged_backend("B").await;
        let forwarder = Forwarder::new();

        let addr = forwarder
            .start(loopback(0), &backend_a.to_string())
            .await
            .unwrap();
        let mut old_client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(greeting(&mut old_client).await, "A");

        let rebound = forwarder
            .start(addr, &backend_b.to_string())
            .await
            .unwrap();
        assert_eq!(rebound, addr);

        // The old connection was drained before the port was rebound.
        let mut rest = Vec::new();
        let read = tokio::time::timeout(WAIT, old_client.read_to_end(&mut rest))
            .await
            .unwrap();
        assert!(read.is_err() || rest.is_empty());

        let mut new_client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(greeting(&mut new_client).await, "B");
        assert_eq!(forwarder.destination().await, Some(backend_b.to_string()));

        forwarder.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_the_port() {
        let backend = tagged_backend("A").await;
        let forwarder = Forwarder::new();
        let addr = forwarder
            .start(loopback(0), &backend.to_string())
            .await
            .unwrap();

        forwarder.stop().await;
        assert!(forwarder.local_addr().await.is_none());

        let listener = TcpListener::bind(addr).await;
        assert!(listener.is_ok());
    }

    /// Connect, read the greeting, send `ping` and collect what comes back
    /// until the echo completes or the connection ends. `None` when nothing
    /// was served.
    async fn exchange(addr: SocketAddr) -> Option<Vec<u8>> {
        let mut client = TcpStream::connect(addr).await.ok()?;
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(WAIT, client.read(&mut buf))
            .await
            .ok()?
            .ok()?;
        if n == 0 {
            return None;
        }
        let mut response = buf[..n].to_vec();
        if client.write_all(b"ping").await.is_ok() {
            while response.len() < 5 {
                match tokio::time::timeout(WAIT, client.read(&mut buf)).await {
                    Ok(Ok(n)) if n > 0 => response.extend_from_slice(&buf[..n]),
                    _ => break,
                }
            }
        }
        Some(response)
    }

    #[tokio::test]
    async fn connections_during_switch_reach_exactly_one_backend() {
        let backend_a = tagged_backend("A").await;
        let backend_b = tagged_backend("B").await;
        let forwarder = Arc::new(Forwarder::new());
        let addr = forwarder
            .start(loopback(0), &backend_a.to_string())
            .await
            .unwrap();

        let switching = {
            let forwarder = forwarder.clone();
            let destination = backend_b.to_string();
            tokio::spawn(async move { forwarder.start(addr, &destination).await })
        };

        let mut tags = Vec::new();
        for _ in 0..10 {
            if let Some(response) = exchange(addr).await {
                let (tag, rest) = response.split_first().unwrap();
                assert!(*tag == b'A' || *tag == b'B', "unexpected greeting {response:?}");
                // One greeting, then only this backend's echo or the end of the stream.
                assert!(b"ping".starts_with(rest), "mixed response {response:?}");
                tags.push(*tag);
            }
        }
        switching.await.unwrap().unwrap();

        // Once the new listener serves, the old one never does again.
        assert!(tags.windows(2).all(|w| w[0] <= w[1]), "out of order {tags:?}");
        let response = exchange(addr).await.unwrap();
        assert_eq!(response, b"Bping".to_vec());

        forwarder.stop().await;
    }

    #[tokio::test]
    async fn failed_rebind_keeps_the_previous_route() {
        let backend_a = tagged_backend("A").await;
        let forwarder = Forwarder::new();
        let addr = forwarder
            .start(loopback(0), &backend_a.to_string())
            .await
            .unwrap();

        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let err = forwarder
            .start(occupied.local_addr().unwrap(), "127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Cutover(_)));

        assert_eq!(forwarder.local_addr().await, Some(addr));
        assert_eq!(forwarder.destination().await, Some(backend_a.to_string()));
        let mut client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(greeting(&mut client).await, "A");

        forwarder.stop().await;
    }

    #[tokio::test]
    async fn bind_conflict_is_a_cutover_failure() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap();
        let forwarder = Forwarder::new();

        let err = forwarder.start(addr, "127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, DeployError::Cutover(_)));
    }

    #[tokio::test]
    async fn switch_tracks_route_per_port() {
        let port = {
            let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().port()
        };
        let switch = ForwarderSwitch::with_bind_host(IpAddr::V4(Ipv4Addr::LOCALHOST), "127.0.0.1");
        assert_eq!(switch.route(port).await, None);

        switch.cutover(port, 18082, 18081).await.unwrap();
        assert_eq!(switch.route(port).await.as_deref(), Some("127.0.0.1:18082"));

        switch.cutover(port, 18081, 18082).await.unwrap();
        assert_eq!(switch.route(port).await.as_deref(), Some("127.0.0.1:18081"));

        switch.shutdown().await;
        assert_eq!(switch.route(port).await, None);
    }
}
