//! Listener binding with address reuse.
//!
//! `SO_REUSEPORT` lets a successor process bind the exact address a
//! predecessor still holds. While both are bound the kernel distributes
//! incoming connections across them, which is what keeps the handoff window
//! free of connection refusals.

use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket};
use tracing::info;

/// Bind `addr` with `SO_REUSEADDR` and `SO_REUSEPORT` set.
///
/// Succeeds even while another process on this machine is bound to the same
/// address, provided that process also bound with `SO_REUSEPORT`.
pub fn bind_reuseport(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    socket.set_reuseaddr(true)?;
    socket.set_reuseport(true)?;
    socket.bind(addr)?;

    let listener = socket.listen(1024)?;
    info!(addr = %listener.local_addr()?, "Bound listener with SO_REUSEPORT");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two processes' worth of listeners on the same port must coexist.
    /// This is the property the whole handoff rests on.
    #[tokio::test]
    async fn test_dual_bind_same_port() {
        let first = bind_reuseport("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();

        let second = bind_reuseport(addr).expect("second bind on same port must succeed");
        assert_eq!(second.local_addr().unwrap().port(), addr.port());

        // Both are live: a client can connect while both are bound.
        let stream = tokio::net::TcpStream::connect(addr).await;
        assert!(stream.is_ok());
    }

    /// After the first listener is dropped the second keeps accepting.
    #[tokio::test]
    async fn test_survivor_keeps_accepting() {
        let first = bind_reuseport("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        let second = bind_reuseport(addr).unwrap();

        drop(first);

        let accept = tokio::spawn(async move { second.accept().await });
        let stream = tokio::net::TcpStream::connect(addr).await;
        assert!(stream.is_ok());
        assert!(accept.await.unwrap().is_ok());
    }
}
