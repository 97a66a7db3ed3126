//! Stream-socket wrappers
//!
//! The broker listens on either tcp (host:port addresses) or unix-domain
//! sockets (path addresses), selected by configuration. `Listener` and
//! `Stream` fold both families into one surface so the transport and the
//! client library are written once.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: String },
}

impl Listener {
    /// Bind a listener of the configured family. Stale unix socket files
    /// are unlinked before bind.
    pub async fn bind(network: &str, addr: &str) -> io::Result<Listener> {
        match network {
            "tcp" => Ok(Listener::Tcp(TcpListener::bind(addr).await?)),
            #[cfg(unix)]
            "unix" => {
                let _ = std::fs::remove_file(addr);
                Ok(Listener::Unix {
                    listener: UnixListener::bind(addr)?,
                    path: addr.to_string(),
                })
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported network '{other}'"),
            )),
        }
    }

    pub async fn accept(&self) -> io::Result<Stream> {
        match self {
            Listener::Tcp(l) => {
                let (stream, _) = l.accept().await?;
                Ok(Stream::Tcp(stream))
            }
            #[cfg(unix)]
            Listener::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok(Stream::Unix(stream))
            }
        }
    }

    /// The address the listener actually bound, in the same form `connect`
    /// accepts. Resolves port 0 to the assigned port on tcp.
    pub fn local_addr_string(&self) -> io::Result<String> {
        match self {
            Listener::Tcp(l) => Ok(l.local_addr()?.to_string()),
            #[cfg(unix)]
            Listener::Unix { path, .. } => Ok(path.clone()),
        }
    }

    /// Unlink the socket file of a unix listener. No-op for tcp.
    pub fn cleanup(&self) {
        #[cfg(unix)]
        if let Listener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Connect a stream of the configured family.
pub async fn connect(network: &str, addr: &str) -> io::Result<Stream> {
    match network {
        "tcp" => Ok(Stream::Tcp(TcpStream::connect(addr).await?)),
        #[cfg(unix)]
        "unix" => Ok(Stream::Unix(UnixStream::connect(addr).await?)),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported network '{other}'"),
        )),
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
