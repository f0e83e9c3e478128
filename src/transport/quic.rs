//! QUIC transport adapter over `quinn`
//!
//! Each bidirectional QUIC stream becomes one logical stream. Certificates
//! and endpoint construction are left to the caller.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use quinn::{ConnectionError, RecvStream, SendStream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::{BoxedStream, Connection, Transport};

/// Accepts QUIC connections from a bound endpoint
#[derive(Debug, Clone)]
pub struct QuicTransport {
    endpoint: quinn::Endpoint,
}

impl QuicTransport {
    pub fn new(endpoint: quinn::Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

impl Transport for QuicTransport {
    type Connection = QuicConnection;

    fn accept_connection(
        &mut self,
    ) -> impl Future<Output = io::Result<Option<QuicConnection>>> + Send {
        async move {
            let Some(incoming) = self.endpoint.accept().await else {
                return Ok(None);
            };
            let connection = incoming.await.map_err(io::Error::from)?;
            Ok(Some(QuicConnection { inner: connection }))
        }
    }
}

/// One established QUIC connection
#[derive(Debug, Clone)]
pub struct QuicConnection {
    inner: quinn::Connection,
}

impl Connection for QuicConnection {
    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.inner.remote_address())
    }

    fn accept_stream(&mut self) -> impl Future<Output = io::Result<Option<BoxedStream>>> + Send {
        async move {
            match self.inner.accept_bi().await {
                Ok((send, recv)) => Ok(Some(Box::new(QuicStream { send, recv }) as BoxedStream)),
                Err(
                    ConnectionError::ApplicationClosed(_)
                    | ConnectionError::ConnectionClosed(_)
                    | ConnectionError::LocallyClosed,
                ) => Ok(None),
                Err(e) => Err(io::Error::from(e)),
            }
        }
    }
}

/// Send and receive halves of a bidirectional stream joined together
#[derive(Debug)]
pub struct QuicStream {
    send: SendStream,
    recv: RecvStream,
}

impl AsyncRead for QuicStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        AsyncRead::poll_read(Pin::new(&mut self.recv), cx, buf)
    }
}

impl AsyncWrite for QuicStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.send), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.send), cx)
    }
}
