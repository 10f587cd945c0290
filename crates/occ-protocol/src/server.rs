// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC endpoint serving control calls.
//!
//! One endpoint serves one controlled task. The orchestrator opens a
//! bidirectional stream per call: a Request frame, answered either by one
//! Response frame (`GetState`, `Transition`) or by StreamData frames closed
//! with StreamEnd (`StateStream`, `EventStream`). [`CallStream`] exposes
//! exactly those two shapes; there is no generic byte-stream surface.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{Endpoint, RecvStream, SendStream, ServerConfig, TransportConfig};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::{Frame, FrameError, read_frame, write_frame};

/// Errors raised while serving control calls
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot bind control endpoint: {0}")]
    Bind(#[from] std::io::Error),

    #[error("control endpoint TLS setup failed: {0}")]
    Tls(String),

    #[error("orchestrator connection lost: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("malformed control frame: {0}")]
    Frame(#[from] FrameError),

    /// The orchestrator cancelled the call; surfaced on the next write.
    #[error("call closed by the orchestrator")]
    CallClosed,
}

/// Configuration for the QUIC control listener
#[derive(Debug, Clone)]
pub struct ControlListenerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// TLS certificate chain (PEM format)
    pub cert_pem: Vec<u8>,
    /// TLS private key (PEM format)
    pub key_pem: Vec<u8>,
    /// Maximum concurrent bidirectional streams per connection
    pub max_bi_streams: u32,
    /// Idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Server-side keep-alive interval in milliseconds (0 to disable)
    pub keep_alive_interval_ms: u64,
}

impl Default for ControlListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:47100".parse().unwrap(),
            cert_pem: Vec::new(),
            key_pem: Vec::new(),
            // One GetState, one Transition and the two subscription streams
            // leave generous headroom at 64 concurrent calls.
            max_bi_streams: 64,
            // Streaming subscribers may sit silent for long stretches while
            // the machine stays in one state; keep-alives carry the idle gap.
            idle_timeout_ms: 120_000,
            keep_alive_interval_ms: 15_000,
        }
    }
}

/// QUIC listener for a control endpoint
pub struct ControlListener {
    endpoint: Endpoint,
    config: ControlListenerConfig,
}

impl ControlListener {
    /// Create a new listener with the given configuration
    pub fn new(config: ControlListenerConfig) -> Result<Self, ServerError> {
        let server_config = Self::build_server_config(&config)?;
        let endpoint = Endpoint::server(server_config, config.bind_addr)?;

        info!(
            addr = %config.bind_addr,
            max_bi_streams = config.max_bi_streams,
            idle_timeout_ms = config.idle_timeout_ms,
            keep_alive_ms = config.keep_alive_interval_ms,
            "control listener bound"
        );

        Ok(Self { endpoint, config })
    }

    /// Create a listener with a self-signed certificate.
    ///
    /// The control plane runs inside a trusted deployment; peers connect
    /// with verification disabled, exactly as in local development.
    pub fn self_signed(bind_addr: SocketAddr) -> Result<Self, ServerError> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| ServerError::Tls(e.to_string()))?;

        let config = ControlListenerConfig {
            bind_addr,
            cert_pem: cert.cert.pem().into_bytes(),
            key_pem: cert.key_pair.serialize_pem().into_bytes(),
            ..Default::default()
        };

        Self::new(config)
    }

    /// Get the listener configuration
    pub fn config(&self) -> &ControlListenerConfig {
        &self.config
    }

    fn build_server_config(config: &ControlListenerConfig) -> Result<ServerConfig, ServerError> {
        let certs = rustls_pemfile::certs(&mut config.cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServerError::Tls(format!("failed to parse certificates: {}", e)))?;

        let key = rustls_pemfile::private_key(&mut config.key_pem.as_slice())
            .map_err(|e| ServerError::Tls(format!("failed to parse private key: {}", e)))?
            .ok_or_else(|| ServerError::Tls("no private key found".to_string()))?;

        let crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ServerError::Tls(e.to_string()))?;

        let mut transport = TransportConfig::default();
        transport.max_idle_timeout(Some(
            std::time::Duration::from_millis(config.idle_timeout_ms)
                .try_into()
                .unwrap(),
        ));
        transport.max_concurrent_bidi_streams(config.max_bi_streams.into());

        if config.keep_alive_interval_ms > 0 {
            transport.keep_alive_interval(Some(std::time::Duration::from_millis(
                config.keep_alive_interval_ms,
            )));
        }

        let mut server_config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
                .map_err(|e| ServerError::Tls(e.to_string()))?,
        ));
        server_config.transport_config(Arc::new(transport));

        Ok(server_config)
    }

    /// Accept the next orchestrator connection.
    ///
    /// The handshake is awaited inline: a control endpoint talks to a
    /// single orchestrator, so there is no accept backlog worth
    /// parallelizing. Failed handshakes are logged and skipped. Returns
    /// `None` once the endpoint is closed.
    pub async fn accept(&self) -> Option<ControlConnection> {
        loop {
            let incoming = self.endpoint.accept().await?;
            match incoming.await {
                Ok(connection) => {
                    debug!(remote = %connection.remote_address(), "orchestrator connected");
                    return Some(ControlConnection { connection });
                }
                Err(e) => warn!("orchestrator handshake failed: {e}"),
            }
        }
    }

    /// Get the local address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Close the listener and every connection on it
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"control endpoint closing");
    }
}

/// An established orchestrator connection
pub struct ControlConnection {
    connection: quinn::Connection,
}

impl ControlConnection {
    /// Remote address of the orchestrator
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Wait for the next control call on this connection.
    ///
    /// Every bidirectional stream the orchestrator opens is one call.
    /// Returns `None` once the peer hangs up or the endpoint shuts down.
    pub async fn next_call(&self) -> Option<CallStream> {
        match self.connection.accept_bi().await {
            Ok((send, recv)) => Some(CallStream { send, recv }),
            Err(
                quinn::ConnectionError::ApplicationClosed(_)
                | quinn::ConnectionError::LocallyClosed,
            ) => {
                debug!("orchestrator disconnected");
                None
            }
            Err(e) => {
                warn!("connection failed while waiting for calls: {e}");
                None
            }
        }
    }
}

/// A single in-flight control call.
///
/// Unary calls are answered with [`CallStream::reply`]; streaming calls
/// push any number of replies with [`CallStream::push`] and close with
/// [`CallStream::end_stream`].
pub struct CallStream {
    send: SendStream,
    recv: RecvStream,
}

impl CallStream {
    /// Decode the request frame that opened this call
    pub async fn request<M: prost::Message + Default>(&mut self) -> Result<M, ServerError> {
        let frame = read_frame(&mut self.recv).await?;
        Ok(frame.decode()?)
    }

    /// Answer a unary call and close it
    pub async fn reply<M: prost::Message>(&mut self, reply: &M) -> Result<(), ServerError> {
        write_frame(&mut self.send, &Frame::response(reply)?).await?;
        self.finish()
    }

    /// Push one reply on a streaming call.
    ///
    /// A write failure means the orchestrator cancelled the call; the
    /// handler drops its subscription and returns.
    pub async fn push<M: prost::Message>(&mut self, reply: &M) -> Result<(), ServerError> {
        write_frame(&mut self.send, &Frame::stream_data(reply)?).await?;
        Ok(())
    }

    /// Close a streaming call after its final reply
    pub async fn end_stream(&mut self) -> Result<(), ServerError> {
        write_frame(&mut self.send, &Frame::stream_end()).await?;
        self.finish()
    }

    /// Signal that no further replies follow
    pub fn finish(&mut self) -> Result<(), ServerError> {
        self.send.finish().map_err(|_| ServerError::CallClosed)
    }
}
