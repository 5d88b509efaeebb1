//! Listener acquisition over vsock with automatic TCP fallback.
//!
//! Inside an enclave the only channel to the host is a virtual socket. On a
//! developer machine or in CI there is usually no vsock device, so the
//! selector degrades to a plain TCP listener on the same port. Either way the
//! rest of the server sees a single [`TransportListener`] with one
//! accept/close contract.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

#[cfg(target_os = "linux")]
use tokio_vsock::{VsockAddr, VsockListener, VsockStream};

/// Errors that prevent the server from obtaining a listener.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("binding vsock listener on cid {cid} port {port}")]
    VsockBind {
        cid: u32,
        port: u32,
        #[source]
        source: io::Error,
    },
    #[error("binding tcp listener on port {port}")]
    TcpBind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("port {0} is out of range for a tcp listener")]
    InvalidTcpPort(u32),
    #[error("reading listener address")]
    LocalAddr(#[source] io::Error),
}

/// Platform seam for the virtual-socket half of the selector.
pub trait VsockBackend: Send + Sync {
    /// Resolves the context identifier of the enclosing host.
    ///
    /// # Errors
    ///
    /// Fails when the platform has no vsock support.
    fn local_cid(&self) -> io::Result<u32>;

    /// Binds a vsock listener under `cid` on `port`.
    ///
    /// # Errors
    ///
    /// Returns the raw bind error; the selector decides whether it is fatal.
    fn bind(&self, cid: u32, port: u32) -> io::Result<TransportListener>;
}

/// The host's real vsock device.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVsock;

impl VsockBackend for SystemVsock {
    #[cfg(target_os = "linux")]
    fn local_cid(&self) -> io::Result<u32> {
        vsock::get_local_cid()
    }

    #[cfg(not(target_os = "linux"))]
    fn local_cid(&self) -> io::Result<u32> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "vsock: not implemented on this platform",
        ))
    }

    #[cfg(target_os = "linux")]
    fn bind(&self, cid: u32, port: u32) -> io::Result<TransportListener> {
        VsockListener::bind(VsockAddr::new(cid, port)).map(TransportListener::Vsock)
    }

    #[cfg(not(target_os = "linux"))]
    fn bind(&self, _cid: u32, _port: u32) -> io::Result<TransportListener> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "vsock: not implemented on this platform",
        ))
    }
}

/// Acquires a listener on `port` using the host's vsock device, falling back
/// to TCP when vsock is unavailable.
///
/// # Errors
///
/// See [`acquire_listener_with`].
pub async fn acquire_listener(port: u32) -> Result<TransportListener, TransportError> {
    acquire_listener_with(&SystemVsock, port).await
}

/// Acquires a listener on `port` through the given vsock backend.
///
/// Falls back to TCP when the context identifier cannot be resolved, or when
/// the vsock bind fails with an unsupported-class error. Every other bind
/// failure is returned unchanged.
///
/// # Errors
///
/// Returns [`TransportError::VsockBind`] for non-fallback vsock failures and
/// [`TransportError::TcpBind`] / [`TransportError::InvalidTcpPort`] when the
/// TCP fallback itself cannot bind.
pub async fn acquire_listener_with<B>(
    backend: &B,
    port: u32,
) -> Result<TransportListener, TransportError>
where
    B: VsockBackend + ?Sized,
{
    let cid = match backend.local_cid() {
        Ok(cid) => cid,
        Err(e) => {
            warn!(error = %e, "OS does not support vsock: falling back to regular TCP socket");
            return bind_tcp(port).await;
        }
    };

    match backend.bind(cid, port) {
        Ok(listener) => {
            info!(cid, port, "vsock listener bound");
            Ok(listener)
        }
        Err(e) if is_unsupported(&e) => {
            warn!(cid, error = %e, "vsock bind not supported: falling back to regular TCP socket");
            bind_tcp(port).await
        }
        Err(source) => Err(TransportError::VsockBind { cid, port, source }),
    }
}

async fn bind_tcp(port: u32) -> Result<TransportListener, TransportError> {
    let port = u16::try_from(port).map_err(|_| TransportError::InvalidTcpPort(port))?;
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .map_err(|source| TransportError::TcpBind { port, source })?;
    info!(port, "tcp listener bound");
    Ok(TransportListener::Tcp(listener))
}

/// Whether a bind error means "this platform cannot do vsock" rather than a
/// real failure such as a busy port.
fn is_unsupported(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::Unsupported {
        return true;
    }
    #[cfg(unix)]
    if let Some(code) = err.raw_os_error() {
        return matches!(
            code,
            libc::EAFNOSUPPORT
                | libc::EOPNOTSUPP
                | libc::EPROTONOSUPPORT
                | libc::ESOCKTNOSUPPORT
                | libc::ENODEV
        );
    }
    false
}

/// Peer or local address of either transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAddr {
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

impl fmt::Display for TransportAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Vsock { cid, port } => write!(f, "vsock://{cid}:{port}"),
        }
    }
}

/// A bound listener on exactly one of the two transports.
///
/// Dropping it closes the underlying socket.
pub enum TransportListener {
    Tcp(TcpListener),
    #[cfg(target_os = "linux")]
    Vsock(VsockListener),
}

impl TransportListener {
    /// Short transport name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            #[cfg(target_os = "linux")]
            Self::Vsock(_) => "vsock",
        }
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Propagates the socket's `getsockname` failure.
    pub fn local_addr(&self) -> io::Result<TransportAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().map(TransportAddr::Tcp),
            #[cfg(target_os = "linux")]
            Self::Vsock(listener) => listener.local_addr().map(|addr| TransportAddr::Vsock {
                cid: addr.cid(),
                port: addr.port(),
            }),
        }
    }

    async fn accept_once(&mut self) -> io::Result<(TransportStream, TransportAddr)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((TransportStream::Tcp(stream), TransportAddr::Tcp(addr)))
            }
            #[cfg(target_os = "linux")]
            Self::Vsock(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((
                    TransportStream::Vsock(stream),
                    TransportAddr::Vsock {
                        cid: addr.cid(),
                        port: addr.port(),
                    },
                ))
            }
        }
    }
}

impl fmt::Debug for TransportListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportListener")
            .field("kind", &self.kind())
            .field("local_addr", &self.local_addr().ok())
            .finish()
    }
}

impl axum::serve::Listener for TransportListener {
    type Io = TransportStream;
    type Addr = TransportAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.accept_once().await {
                Ok(conn) => return conn,
                Err(e) => handle_accept_error(e).await,
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        TransportListener::local_addr(self)
    }
}

/// Per-connection errors are dropped; anything else (e.g. fd exhaustion)
/// backs off for a second so the loop does not spin.
async fn handle_accept_error(e: io::Error) {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    ) {
        return;
    }
    error!(error = %e, "accept error");
    tokio::time::sleep(Duration::from_secs(1)).await;
}

/// An accepted connection on either transport.
pub enum TransportStream {
    Tcp(TcpStream),
    #[cfg(target_os = "linux")]
    Vsock(VsockStream),
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(target_os = "linux")]
            Self::Vsock(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(target_os = "linux")]
            Self::Vsock(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(target_os = "linux")]
            Self::Vsock(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(target_os = "linux")]
            Self::Vsock(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::serve::Listener;

    /// Scripted vsock backend: `cid_error` fails context resolution,
    /// `bind_error` builds the error returned by `bind`.
    struct FakeVsock {
        cid_error: Option<io::ErrorKind>,
        bind_error: Option<fn() -> io::Error>,
    }

    impl FakeVsock {
        fn no_device() -> Self {
            Self {
                cid_error: Some(io::ErrorKind::NotFound),
                bind_error: None,
            }
        }

        fn bind_fails(make_error: fn() -> io::Error) -> Self {
            Self {
                cid_error: None,
                bind_error: Some(make_error),
            }
        }
    }

    impl VsockBackend for FakeVsock {
        fn local_cid(&self) -> io::Result<u32> {
            match self.cid_error {
                Some(kind) => Err(io::Error::new(kind, "no /dev/vsock")),
                None => Ok(3),
            }
        }

        fn bind(&self, _cid: u32, _port: u32) -> io::Result<TransportListener> {
            match self.bind_error {
                Some(make_error) => Err(make_error()),
                None => panic!("fake vsock cannot produce a listener"),
            }
        }
    }

    fn tcp_port(listener: &TransportListener) -> u16 {
        match listener.local_addr().unwrap() {
            TransportAddr::Tcp(addr) => addr.port(),
            other @ TransportAddr::Vsock { .. } => panic!("expected tcp, got {other}"),
        }
    }

    #[tokio::test]
    async fn cid_failure_falls_back_to_tcp_and_accepts() {
        let mut listener = acquire_listener_with(&FakeVsock::no_device(), 0)
            .await
            .unwrap();
        assert_eq!(listener.kind(), "tcp");

        let port = tcp_port(&listener);
        let client = tokio::spawn(async move { TcpStream::connect(("127.0.0.1", port)).await });
        let (_stream, peer) = Listener::accept(&mut listener).await;
        assert!(matches!(peer, TransportAddr::Tcp(_)));
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unsupported_bind_falls_back_to_tcp() {
        let backend = FakeVsock::bind_fails(|| {
            io::Error::new(io::ErrorKind::Unsupported, "vsock: not implemented")
        });
        let listener = acquire_listener_with(&backend, 0).await.unwrap();
        assert_eq!(listener.kind(), "tcp");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn address_family_unsupported_falls_back_to_tcp() {
        let backend = FakeVsock::bind_fails(|| io::Error::from_raw_os_error(libc::EAFNOSUPPORT));
        let listener = acquire_listener_with(&backend, 0).await.unwrap();
        assert_eq!(listener.kind(), "tcp");
    }

    #[tokio::test]
    async fn vsock_port_in_use_is_not_masked() {
        let backend = FakeVsock::bind_fails(|| io::Error::new(io::ErrorKind::AddrInUse, "busy"));
        let err = acquire_listener_with(&backend, 5005).await.unwrap_err();
        match err {
            TransportError::VsockBind { cid, port, source } => {
                assert_eq!(cid, 3);
                assert_eq!(port, 5005);
                assert_eq!(source.kind(), io::ErrorKind::AddrInUse);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn vsock_permission_denied_is_not_masked() {
        let backend =
            FakeVsock::bind_fails(|| io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        let err = acquire_listener_with(&backend, 5005).await.unwrap_err();
        assert!(matches!(err, TransportError::VsockBind { .. }));
    }

    #[tokio::test]
    async fn tcp_fallback_propagates_port_in_use() {
        let held = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let port = held.local_addr().unwrap().port();

        let err = acquire_listener_with(&FakeVsock::no_device(), u32::from(port))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::TcpBind { .. }));
    }

    #[tokio::test]
    async fn tcp_fallback_rejects_ports_above_u16() {
        let err = acquire_listener_with(&FakeVsock::no_device(), 70_000)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidTcpPort(70_000)));
    }

    #[test]
    fn unsupported_classification() {
        assert!(is_unsupported(&io::Error::new(io::ErrorKind::Unsupported, "x")));
        assert!(!is_unsupported(&io::Error::new(io::ErrorKind::AddrInUse, "x")));
        #[cfg(unix)]
        {
            assert!(is_unsupported(&io::Error::from_raw_os_error(libc::ENODEV)));
            assert!(!is_unsupported(&io::Error::from_raw_os_error(libc::EACCES)));
        }
    }

    #[test]
    fn addresses_display_with_scheme() {
        let tcp = TransportAddr::Tcp("127.0.0.1:8080".parse().unwrap());
        assert_eq!(tcp.to_string(), "tcp://127.0.0.1:8080");
        let vsock = TransportAddr::Vsock { cid: 16, port: 5005 };
        assert_eq!(vsock.to_string(), "vsock://16:5005");
    }
}
