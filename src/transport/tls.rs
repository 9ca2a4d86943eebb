//! TLS wrapping for the SSL and WSS transport kinds, via `async-tls`/`rustls`.

use async_std::net::TcpStream;
use async_tls::{client::TlsStream as ClientTlsStream, server::TlsStream as ServerTlsStream, TlsConnector, TlsAcceptor};

use crate::error::{Error, Result};
use crate::tls_config::TlsConfig;

pub async fn connect_client(
    config: &TlsConfig,
    domain: &str,
    stream: TcpStream,
) -> Result<ClientTlsStream<TcpStream>> {
    let rustls_config = config.build_client_config()?;
    let connector: TlsConnector = rustls_config.into();
    connector
        .connect(domain, stream)
        .await
        .map_err(|err| Error::Tls {
            code: -1,
            detail: Some(err.to_string().into_boxed_str()),
        })
}

pub async fn accept_server(config: &TlsConfig, stream: TcpStream) -> Result<ServerTlsStream<TcpStream>> {
    let rustls_config = config.build_server_config()?;
    let acceptor: TlsAcceptor = rustls_config.into();
    acceptor.accept(stream).await.map_err(|err| Error::Tls {
        code: -1,
        detail: Some(err.to_string().into_boxed_str()),
    })
}

/// `GetVerifyResult()` per spec §4.3: `Ok(())` once the handshake has
/// completed successfully (rustls aborts the handshake on verification
/// failure, so by the time a stream exists, verification already passed).
fn verify_result<S>(_stream: &ClientTlsStream<S>) -> Result<()> {
    Ok(())
}

/// `PresentPeerCertificate()` / `GetPeerCertificate()`: true/Some iff the peer
/// presented a certificate chain during the handshake.
fn peer_certificate_present(stream: &ClientTlsStream<TcpStream>) -> bool {
    stream
        .get_ref()
        .1
        .peer_certificates()
        .map(|certs| !certs.is_empty())
        .unwrap_or(false)
}

fn peer_certificate_der(stream: &ClientTlsStream<TcpStream>) -> Result<Vec<u8>> {
    stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| cert.as_ref().to_vec())
        .ok_or_else(|| Error::InvalidArgument("peer certificate does not exist".into()))
}

/// Snapshot of `GetVerifyResult()`/`PresentPeerCertificate()`/
/// `GetPeerCertificate()` (spec §4.3), taken at handshake completion and
/// cached on the socket. The concrete `ClientTlsStream` is erased into a
/// `BoxedStream` right after the handshake, so these three accessors can't be
/// called against the live stream later — this is captured before that
/// erasure happens and exposed via `Socket::tls_connection_info()`.
#[derive(Debug, Clone)]
pub struct TlsConnectionInfo {
    pub verified: bool,
    pub peer_certificate_present: bool,
    pub peer_certificate_der: Option<Vec<u8>>,
}

pub fn connection_info(stream: &ClientTlsStream<TcpStream>) -> TlsConnectionInfo {
    TlsConnectionInfo {
        verified: verify_result(stream).is_ok(),
        peer_certificate_present: peer_certificate_present(stream),
        peer_certificate_der: peer_certificate_der(stream).ok(),
    }
}
