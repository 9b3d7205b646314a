//! TCP-backed [`DeviceLink`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::application::manage_devices::DeviceLink;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound half of one accepted device connection.
///
/// Clones share the socket.  Closing shuts the write half down and stops
/// the reader task, which drops the read half and releases the socket.
#[derive(Clone)]
pub struct TcpDeviceLink {
    id: u64,
    peer: SocketAddr,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    reader: Arc<StdMutex<Option<AbortHandle>>>,
}

impl TcpDeviceLink {
    pub fn new(peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id: NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            writer: Arc::new(Mutex::new(Some(writer))),
            reader: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Ties the connection's reader task to this link's lifetime.
    pub fn attach_reader(&self, handle: AbortHandle) {
        let mut slot = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

#[async_trait]
impl DeviceLink for TcpDeviceLink {
    async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "link closed"))?;
        writer.write_all(bytes).await
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("shutdown of {} failed: {e}", self.peer);
            }
        }
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }

    fn same_link(&self, other: &Self) -> bool {
        self.id == other.id
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_pair() -> (TcpDeviceLink, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        let (_read, write) = server.into_split();
        // The read half is dropped here; writes still go through.
        (TcpDeviceLink::new(peer, write), client)
    }

    #[tokio::test]
    async fn test_send_delivers_bytes_to_peer() {
        let (link, mut client) = connected_pair().await;

        link.send(&[1, 2, 3, 4]).await.unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_send_after_close_is_not_connected() {
        let (link, _client) = connected_pair().await;

        link.close().await;
        link.close().await;
        let err = link.send(&[0]).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(link.is_closed().await);
    }

    #[tokio::test]
    async fn test_close_is_seen_as_eof_by_peer() {
        let (link, mut client) = connected_pair().await;

        link.close().await;

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clones_are_the_same_link() {
        let (a, _client_a) = connected_pair().await;
        let (b, _client_b) = connected_pair().await;

        assert!(a.same_link(&a.clone()));
        assert!(!a.same_link(&b));
    }

    #[tokio::test]
    async fn test_close_aborts_attached_reader() {
        let (link, _client) = connected_pair().await;
        let task = tokio::spawn(std::future::pending::<()>());
        link.attach_reader(task.abort_handle());

        link.close().await;

        assert!(task.await.unwrap_err().is_cancelled());
    }
}
