// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC client for driving a control endpoint.
//!
//! [`ControlClient`] offers the four control methods as typed calls on top
//! of the generic frame plumbing: [`ControlClient::get_state`],
//! [`ControlClient::transition`], [`ControlClient::state_stream`] and
//! [`ControlClient::event_stream`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig, Connection, Endpoint, TransportConfig};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::control_proto::{
    ConfigEntry, ControlRequest, ControlResponse, EventStreamReply, EventStreamRequest,
    GetStateReply, GetStateRequest, RpcError, StateStreamReply, StateStreamRequest,
    TransitionReply, TransitionRequest, control_request, control_response,
};
use crate::frame::{BiStream, Frame, FrameError, FramedStream};

/// Errors that can occur in the QUIC client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no connection established")]
    NotConnected,

    #[error("connection timed out after {0}ms")]
    Timeout(u64),

    #[error("rpc failed: {status}: {code}: {message}")]
    Rpc {
        status: String,
        code: String,
        message: String,
    },

    #[error("unexpected response variant")]
    UnexpectedResponse,
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        ClientError::Rpc {
            status: err.status,
            code: err.code,
            message: err.message,
        }
    }
}

/// Configuration for the QUIC control client
#[derive(Debug, Clone)]
pub struct ControlClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Server name for TLS verification
    pub server_name: String,
    /// Skip certificate verification (the endpoint serves a self-signed cert)
    pub insecure_skip_cert_verification: bool,
    /// Keep-alive interval in milliseconds (0 to disable)
    pub keep_alive_interval_ms: u64,
    /// Idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ControlClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:47100".parse().unwrap(),
            server_name: "localhost".to_string(),
            insecure_skip_cert_verification: false,
            keep_alive_interval_ms: 10_000,
            idle_timeout_ms: 120_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// QUIC client for one control endpoint
pub struct ControlClient {
    endpoint: Endpoint,
    connection: Mutex<Option<Connection>>,
    config: ControlClientConfig,
}

impl ControlClient {
    /// Create a new client with the given configuration
    pub fn new(config: ControlClientConfig) -> Result<Self, ClientError> {
        let mut endpoint = Endpoint::client("0.0.0.0:0".parse().unwrap())?;

        let client_config = Self::build_client_config(&config)?;
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            endpoint,
            connection: Mutex::new(None),
            config,
        })
    }

    /// Create a client for an endpoint serving a self-signed certificate
    pub fn insecure(server_addr: SocketAddr) -> Result<Self, ClientError> {
        Self::new(ControlClientConfig {
            server_addr,
            insecure_skip_cert_verification: true,
            ..Default::default()
        })
    }

    fn build_client_config(config: &ControlClientConfig) -> Result<ClientConfig, ClientError> {
        let crypto = if config.insecure_skip_cert_verification {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(TrustPresentedCert))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        let mut transport = TransportConfig::default();
        if config.keep_alive_interval_ms > 0 {
            transport.keep_alive_interval(Some(Duration::from_millis(
                config.keep_alive_interval_ms,
            )));
        }
        transport.max_idle_timeout(Some(
            Duration::from_millis(config.idle_timeout_ms)
                .try_into()
                .unwrap(),
        ));

        let mut client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto).unwrap(),
        ));
        client_config.transport_config(Arc::new(transport));

        Ok(client_config)
    }

    /// Connect to the server
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut conn_guard = self.connection.lock().await;

        if let Some(ref conn) = *conn_guard
            && conn.close_reason().is_none()
        {
            debug!("reusing existing connection");
            return Ok(());
        }

        info!(addr = %self.config.server_addr, "connecting to control endpoint");

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let connecting = self
            .endpoint
            .connect(self.config.server_addr, &self.config.server_name)?;

        let connection = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| ClientError::Timeout(self.config.connect_timeout_ms))??;

        info!("connected to control endpoint");
        *conn_guard = Some(connection);
        Ok(())
    }

    /// Get the current connection, connecting if necessary
    async fn get_connection(&self) -> Result<Connection, ClientError> {
        self.connect().await?;
        let conn_guard = self.connection.lock().await;
        conn_guard.clone().ok_or(ClientError::NotConnected)
    }

    /// Open a new bidirectional stream for a request/response
    pub async fn open_stream(
        &self,
    ) -> Result<FramedStream<BiStream<quinn::SendStream, quinn::RecvStream>>, ClientError> {
        let conn = self.get_connection().await?;
        let (send, recv) = conn.open_bi().await?;
        Ok(FramedStream::new(BiStream::new(send, recv)))
    }

    /// Send a request and receive a response using a new stream
    #[instrument(skip(self, request))]
    pub async fn request<Req: prost::Message, Resp: prost::Message + Default>(
        &self,
        request: &Req,
    ) -> Result<Resp, ClientError> {
        let conn = self.get_connection().await?;
        let (mut send, mut recv) = conn.open_bi().await?;

        let frame = Frame::request(request)?;
        crate::frame::write_frame(&mut send, &frame).await?;
        send.finish()
            .map_err(|e| ClientError::Io(std::io::Error::other(e)))?;

        let response_frame = crate::frame::read_frame(&mut recv).await?;
        Ok(response_frame.decode()?)
    }

    async fn call(&self, request: ControlRequest) -> Result<ControlResponse, ClientError> {
        self.request(&request).await
    }

    /// GetState: current state string and process id of the controlled task
    pub async fn get_state(&self) -> Result<GetStateReply, ClientError> {
        let response = self
            .call(ControlRequest {
                request: Some(control_request::Request::GetState(GetStateRequest {})),
            })
            .await?;
        match response.response {
            Some(control_response::Response::GetState(reply)) => Ok(reply),
            Some(control_response::Response::Error(err)) => Err(err.into()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Transition: request a lifecycle transition and block until it settles
    pub async fn transition(
        &self,
        src_state: &str,
        transition_event: &str,
        arguments: Vec<ConfigEntry>,
    ) -> Result<TransitionReply, ClientError> {
        let response = self
            .call(ControlRequest {
                request: Some(control_request::Request::Transition(TransitionRequest {
                    src_state: src_state.to_string(),
                    transition_event: transition_event.to_string(),
                    arguments,
                })),
            })
            .await?;
        match response.response {
            Some(control_response::Response::Transition(reply)) => Ok(reply),
            Some(control_response::Response::Error(err)) => Err(err.into()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// StateStream: subscribe to state-change notifications
    pub async fn state_stream(&self) -> Result<ServerStream<StateStreamReply>, ClientError> {
        self.open_server_stream(ControlRequest {
            request: Some(control_request::Request::StateStream(StateStreamRequest {})),
        })
        .await
    }

    /// EventStream: subscribe to device events
    pub async fn event_stream(&self) -> Result<ServerStream<EventStreamReply>, ClientError> {
        self.open_server_stream(ControlRequest {
            request: Some(control_request::Request::EventStream(EventStreamRequest {})),
        })
        .await
    }

    async fn open_server_stream<M: prost::Message + Default>(
        &self,
        request: ControlRequest,
    ) -> Result<ServerStream<M>, ClientError> {
        let mut framed = self.open_stream().await?;
        framed.write_frame(&Frame::request(&request)?).await?;
        Ok(ServerStream {
            framed,
            _marker: std::marker::PhantomData,
        })
    }

    /// Close the connection gracefully
    pub async fn close(&self) {
        let mut conn_guard = self.connection.lock().await;
        if let Some(conn) = conn_guard.take() {
            conn.close(0u32.into(), b"client closing");
        }
    }

    /// Check if the client is currently connected
    pub async fn is_connected(&self) -> bool {
        let conn_guard = self.connection.lock().await;
        if let Some(ref conn) = *conn_guard {
            conn.close_reason().is_none()
        } else {
            false
        }
    }
}

impl Drop for ControlClient {
    fn drop(&mut self) {
        // Close connection on drop (non-async, best effort)
        if let Ok(mut guard) = self.connection.try_lock()
            && let Some(conn) = guard.take()
        {
            conn.close(0u32.into(), b"client dropped");
        }
    }
}

/// A server-streamed sequence of replies.
///
/// Dropping the stream closes the underlying QUIC stream, which the server
/// notices on its next write and uses to tear down the subscription.
pub struct ServerStream<M> {
    framed: FramedStream<BiStream<quinn::SendStream, quinn::RecvStream>>,
    _marker: std::marker::PhantomData<M>,
}

impl<M: prost::Message + Default> ServerStream<M> {
    /// Receive the next reply; `None` once the server ends the stream.
    pub async fn next(&mut self) -> Result<Option<M>, ClientError> {
        Ok(self.framed.read_stream_item().await?)
    }
}

/// Accepts whatever certificate the control endpoint presents.
///
/// Endpoints mint a throwaway self-signed certificate at startup
/// (`ControlListener::self_signed`), so there is no authority to check it
/// against; the connection is still encrypted. Selected through
/// `insecure_skip_cert_verification`.
#[derive(Debug)]
struct TrustPresentedCert;

impl rustls::client::danger::ServerCertVerifier for TrustPresentedCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        // QUIC runs TLS 1.3 exclusively; a TLS 1.2 signature cannot occur.
        Err(rustls::Error::General(
            "TLS 1.2 is not used over QUIC".to_string(),
        ))
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        // Self-signed endpoint certificates are ECDSA P-256 (rcgen's
        // default); the remainder covers operator-supplied certificates.
        vec![
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControlClientConfig::default();
        assert_eq!(config.server_addr, "127.0.0.1:47100".parse().unwrap());
        assert_eq!(config.server_name, "localhost");
        assert!(!config.insecure_skip_cert_verification);
        assert_eq!(config.keep_alive_interval_ms, 10_000);
        assert_eq!(config.idle_timeout_ms, 120_000);
        assert_eq!(config.connect_timeout_ms, 10_000);
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = ControlClient::insecure("127.0.0.1:47100".parse().unwrap());
        assert!(
            client.is_ok(),
            "failed to create client: {:?}",
            client.err()
        );
    }

    #[tokio::test]
    async fn test_client_initial_not_connected() {
        let client = ControlClient::insecure("127.0.0.1:47100".parse().unwrap()).unwrap();
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_client_connect_timeout() {
        let config = ControlClientConfig {
            server_addr: "127.0.0.1:59998".parse().unwrap(), // unlikely to have a server
            insecure_skip_cert_verification: true,
            connect_timeout_ms: 100,
            ..Default::default()
        };
        let client = ControlClient::new(config).unwrap();
        let result = client.connect().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_client_close_without_connection() {
        let client = ControlClient::insecure("127.0.0.1:47100".parse().unwrap()).unwrap();
        client.close().await;
        assert!(!client.is_connected().await);
    }

    #[test]
    fn test_rpc_error_conversion() {
        let err: ClientError = RpcError {
            status: "INVALID_ARGUMENT".to_string(),
            code: "STATE_MISMATCH".to_string(),
            message: "source: RUNNING current: STANDBY".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "rpc failed: INVALID_ARGUMENT: STATE_MISMATCH: source: RUNNING current: STANDBY"
        );
    }

    #[test]
    fn test_build_client_config_with_verification() {
        let config = ControlClientConfig::default();
        let result = ControlClient::build_client_config(&config);
        assert!(result.is_ok());
    }

    #[test]
    fn test_build_client_config_skip_verification() {
        let config = ControlClientConfig {
            insecure_skip_cert_verification: true,
            ..Default::default()
        };
        let result = ControlClient::build_client_config(&config);
        assert!(result.is_ok());
    }

    #[test]
    fn test_trusted_cert_verifier_covers_self_signed_endpoints() {
        use rustls::client::danger::ServerCertVerifier;

        let verifier = TrustPresentedCert;
        let schemes = verifier.supported_verify_schemes();
        // ControlListener::self_signed serves an ECDSA P-256 certificate.
        assert!(schemes.contains(&rustls::SignatureScheme::ECDSA_NISTP256_SHA256));
    }
}
