//! Proxy server implementation
//! Terminates TLS on the local listener and dispatches requests to the
//! discovery documents, the backends or the 404 fallback

use crate::discovery::{API_GROUP_LIST, CORE_API};
use crate::forward::{full_body, status_response, BoxError, Forwarder, ProxyBody};
use crate::identity::TlsIdentity;
use crate::router::{PathMatcher, RouteTable};
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Path of the swagger schema `kubectl edit` fetches
pub const SWAGGER_PATH: &str = "/swagger-2.0.0.pb-v1";

/// Proxy server configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub routes: RouteTable,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 6443)),
            routes: RouteTable::default(),
        }
    }
}

/// What a request path is served by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    CoreApi,
    ApiGroups,
    Proxied,
    NotFound,
}

impl Endpoint {
    pub fn classify(path: &str) -> Self {
        match path {
            "/api" => Endpoint::CoreApi,
            "/apis" => Endpoint::ApiGroups,
            SWAGGER_PATH => Endpoint::Proxied,
            _ if is_proxied_tree(path) => Endpoint::Proxied,
            _ => Endpoint::NotFound,
        }
    }
}

fn is_proxied_tree(path: &str) -> bool {
    ["apis", "openapi"]
        .iter()
        .any(|root| PathMatcher::SegmentPrefix(vec![root.to_string()]).matches(path))
}

/// Immutable per-process state shared by every connection
pub struct ProxyContext {
    routes: RouteTable,
    forwarder: Forwarder,
}

impl ProxyContext {
    pub fn new(routes: RouteTable) -> Result<Self> {
        let forwarder = Forwarder::new().context("Failed to build backend HTTP clients")?;
        Ok(Self { routes, forwarder })
    }

    /// Serve one request
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let span = info_span!(
            "request",
            id = %Uuid::new_v4(),
            method = %req.method(),
            path = %req.uri().path(),
        );

        self.dispatch(req).instrument(span).await
    }

    async fn dispatch<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let path = req.uri().path().to_string();

        match Endpoint::classify(&path) {
            Endpoint::CoreApi => json_response(CORE_API),
            Endpoint::ApiGroups => json_response(API_GROUP_LIST),
            Endpoint::Proxied => {
                let target = self.routes.select(&path);
                debug!("Selected backend {} (verify_peer={})", target, target.verify_peer);
                self.forwarder.forward(req, target).await
            }
            Endpoint::NotFound => {
                info!("No route for {} {}", req.method(), path);
                status_response(StatusCode::NOT_FOUND)
            }
        }
    }
}

fn json_response(body: &'static str) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Proxy server
pub struct ProxyServer {
    config: ProxyConfig,
    acceptor: TlsAcceptor,
    context: Arc<ProxyContext>,
}

impl ProxyServer {
    /// Create a new proxy server presenting `identity` to clients
    pub fn new(config: ProxyConfig, identity: &TlsIdentity) -> Result<Self> {
        let tls_config = identity.server_config()?;
        let context = Arc::new(ProxyContext::new(config.routes.clone())?);

        Ok(Self {
            config,
            acceptor: TlsAcceptor::from(Arc::new(tls_config)),
            context,
        })
    }

    /// Bind the configured address and serve until the listener fails
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to listen on {}", self.config.listen_addr))?;
        self.serve(listener).await
    }

    /// Accept TLS connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("HTTPS server listening on {}", listener.local_addr()?);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            let acceptor = self.acceptor.clone();
            let context = self.context.clone();

            tokio::spawn(async move {
                let result = Self::handle_connection(stream, remote_addr, acceptor, context).await;
                if let Err(e) = result {
                    debug!("Connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }

    /// Handle a single TLS connection
    async fn handle_connection(
        stream: TcpStream,
        remote_addr: SocketAddr,
        acceptor: TlsAcceptor,
        context: Arc<ProxyContext>,
    ) -> Result<()> {
        let tls_stream = acceptor
            .accept(stream)
            .await
            .with_context(|| format!("TLS handshake with {} failed", remote_addr))?;
        let io = TokioIo::new(tls_stream);

        http1::Builder::new()
            .serve_connection(
                io,
                service_fn(move |req| {
                    let context = context.clone();
                    async move { Ok::<_, Infallible>(context.handle(req).await) }
                }),
            )
            .await
            .map_err(|e| anyhow!("HTTP service error: {}", e))
    }
}
