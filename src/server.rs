//! TCP server: accept loop, connection workers and graceful shutdown.
//!
//! ```text
//! Running --(shutdown token cancelled)--> ShuttingDown --(workers drained)--> Stopped
//! ```
//!
//! Shutdown is a single cancellation token. The accept loop and every
//! connection worker observe it; the server then waits for all workers
//! before reporting `Stopped`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace};

use crate::config::Config;
use crate::runtime::{serve_connection, ConnectionContext};
use crate::service::ServiceGateway;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) cannot spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Running,
    ShuttingDown,
    Stopped,
}

/// Server instance
pub struct Server {
    config: Config,
    listener: TcpListener,
    local_addr: SocketAddr,
    gateway: Arc<ServiceGateway>,
    connection_limit: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    state: watch::Sender<ServerState>,
}

/// Cloneable control handle for a running server.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: CancellationToken,
    state: watch::Receiver<ServerState>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Ask the server to stop. Safe to call any number of times.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// The token whose cancellation stops the server.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Wait until every worker has finished.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ServerState::Stopped).await;
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Server {
    /// Bind the listening socket.
    ///
    /// Must be called from within a Tokio runtime. Failing to bind is the
    /// only error that stops the process.
    pub fn bind(config: Config, gateway: Arc<ServiceGateway>) -> io::Result<Self> {
        let std_listener = create_listener(config.listen_addr(), config.backlog)?;
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;
        let (state, _) = watch::channel(ServerState::Running);

        Ok(Server {
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            config,
            listener,
            local_addr,
            gateway,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            state,
        })
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            state: self.state.subscribe(),
            local_addr: self.local_addr,
        }
    }

    /// Accept connections until shutdown, then drain every worker.
    pub async fn run(self) {
        let Server {
            config,
            listener,
            local_addr,
            gateway,
            connection_limit,
            shutdown,
            tracker,
            state,
        } = self;

        info!(address = %local_addr, max_connections = config.max_connections, "Server listening");

        let ctx = ConnectionContext {
            gateway,
            shutdown: shutdown.clone(),
            max_frame_bytes: config.max_frame_bytes,
            read_buffer_size: config.read_buffer_size,
        };

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&connection_limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let ctx = ctx.clone();
            tracker.spawn(async move {
                let reason = serve_connection(stream, peer, ctx).await;
                trace!(peer = %peer, reason = ?reason, "Worker finished");
                drop(permit);
            });
        }

        state.send_replace(ServerState::ShuttingDown);
        info!(workers = tracker.len(), "Server shutting down");

        drop(listener);
        tracker.close();
        tracker.wait().await;

        state.send_replace(ServerState::Stopped);
        info!("Server stopped");
    }
}

/// Create a listening socket with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Registry;
    use crate::storage::MemoryUserStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;

    const IO_TIMEOUT: Duration = Duration::from_secs(5);

    fn test_config(port: u16, max_connections: usize) -> Config {
        Config {
            host: [127, 0, 0, 1].into(),
            port,
            max_connections,
            backlog: 16,
            max_frame_bytes: 1024,
            read_buffer_size: 256,
            log_level: "info".to_string(),
        }
    }

    fn gateway() -> Arc<ServiceGateway> {
        Arc::new(ServiceGateway::new(
            MemoryUserStore::new(),
            Arc::new(Registry::new()),
        ))
    }

    fn start(max_connections: usize) -> (ServerHandle, Arc<ServiceGateway>, JoinHandle<()>) {
        let gateway = gateway();
        let server = Server::bind(test_config(0, max_connections), Arc::clone(&gateway)).unwrap();
        let handle = server.handle();
        (handle, gateway, tokio::spawn(server.run()))
    }

    /// Read one reply, up to and including its blank-line terminator.
    async fn read_frame(stream: &mut TcpStream) -> String {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        while !out.ends_with(b"\n\n") {
            tokio::time::timeout(IO_TIMEOUT, stream.read_exact(&mut byte))
                .await
                .unwrap()
                .unwrap();
            out.push(byte[0]);
        }
        String::from_utf8(out).unwrap()
    }

    async fn read_rest(stream: &mut TcpStream) -> String {
        let mut out = Vec::new();
        tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = Server::bind(test_config(0, 16), gateway()).unwrap();
        let handle = server.handle();
        assert_ne!(handle.local_addr().port(), 0);
        assert_eq!(handle.state(), ServerState::Running);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let first = Server::bind(test_config(0, 16), gateway()).unwrap();
        let port = first.handle().local_addr().port();
        assert!(Server::bind(test_config(port, 16), gateway()).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_without_connections() {
        let (handle, _gateway, task) = start(16);

        handle.shutdown();
        handle.stopped().await;
        tokio_test::assert_ok!(task.await);
        assert_eq!(handle.state(), ServerState::Stopped);

        // The listening socket is closed once stopped.
        assert!(TcpStream::connect(handle.local_addr()).await.is_err());
    }

    #[tokio::test]
    async fn test_login_over_tcp() {
        let (handle, gateway, task) = start(16);
        let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();

        client
            .write_all(b"AUTH|LOGIN\n{\"username\":\"alice\"}\n\n")
            .await
            .unwrap();
        assert_eq!(read_frame(&mut client).await, "OK\n{}\n\n");
        assert_eq!(gateway.registry().logged_in_count(), 1);

        client.write_all(b"T|GET_ALL\n{}\n\n").await.unwrap();
        assert_eq!(
            read_frame(&mut client).await,
            "FAIL\n{\"message\":\"Unknown operation\",\"source\":\"T\"}\n\n"
        );

        handle.shutdown();
        tokio_test::assert_ok!(task.await);
    }

    #[tokio::test]
    async fn test_same_username_one_winner() {
        let (handle, gateway, task) = start(16);
        let mut first = TcpStream::connect(handle.local_addr()).await.unwrap();
        let mut second = TcpStream::connect(handle.local_addr()).await.unwrap();

        let login = b"AUTH|LOGIN\n{\"username\":\"bob\"}\n\n";
        let (a, b) = tokio::join!(first.write_all(login), second.write_all(login));
        tokio_test::assert_ok!(a);
        tokio_test::assert_ok!(b);

        let replies = [read_frame(&mut first).await, read_frame(&mut second).await];
        let ok = replies.iter().filter(|r| *r == "OK\n{}\n\n").count();
        assert_eq!(ok, 1, "{replies:?}");
        assert!(replies.contains(
            &"FAIL\n{\"message\":\"User with that name already exists\",\"source\":\"AUTH\"}\n\n"
                .to_string()
        ));
        assert_eq!(gateway.registry().logged_in_count(), 1);

        handle.shutdown();
        tokio_test::assert_ok!(task.await);
    }

    #[tokio::test]
    async fn test_shutdown_drains_connections() {
        let (handle, gateway, task) = start(16);

        let mut clients = Vec::new();
        for _ in 0..3 {
            let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
            // A reply proves the worker is registered and idle in its read.
            client.write_all(b"TL|GET_ALL\n{}\n\n").await.unwrap();
            assert_eq!(
                read_frame(&mut client).await,
                "FAIL\n{\"message\":\"Not logged in\",\"source\":\"AUTH\"}\n\n"
            );
            clients.push(client);
        }
        assert_eq!(gateway.registry().len(), 3);

        handle.shutdown();
        for client in &mut clients {
            assert_eq!(read_rest(client).await, "Disconnecting!");
        }

        handle.stopped().await;
        tokio_test::assert_ok!(task.await);
        assert_eq!(handle.state(), ServerState::Stopped);
        assert!(gateway.registry().is_empty());
    }

    #[tokio::test]
    async fn test_client_disconnect_frees_slot() {
        let (handle, gateway, task) = start(1);

        let mut first = TcpStream::connect(handle.local_addr()).await.unwrap();
        first.write_all(b"T|GET_ALL\n{}\n\n").await.unwrap();
        read_frame(&mut first).await;

        // The second client waits in the backlog while the only slot is taken.
        let mut second = TcpStream::connect(handle.local_addr()).await.unwrap();
        second.write_all(b"T|GET_ALL\n{}\n\n").await.unwrap();
        let mut byte = [0u8; 1];
        assert!(
            tokio::time::timeout(Duration::from_millis(200), second.read_exact(&mut byte))
                .await
                .is_err()
        );

        first.shutdown().await.unwrap();
        assert_eq!(read_rest(&mut first).await, "Disconnecting!");

        assert_eq!(
            read_frame(&mut second).await,
            "FAIL\n{\"message\":\"Not logged in\",\"source\":\"AUTH\"}\n\n"
        );
        assert_eq!(gateway.registry().len(), 1);

        handle.shutdown();
        tokio_test::assert_ok!(task.await);
    }
}
