//! Outbound forwarding
//!
//! Rebuilds an inbound request against a [`BackendTarget`], sends it and turns
//! the backend response into the client response. Bodies are streamed in both
//! directions; only DELETE responses are buffered, for translation.

use crate::router::BackendTarget;
use crate::translate::translate_delete;
use bytes::Bytes;
use futures_util::{future, stream, StreamExt, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, BodyStream, Empty, Full, StreamBody};
use hyper::body::{Body, Frame};
use hyper::header::{HeaderValue, ACCEPT_ENCODING, CONTENT_LENGTH, HOST};
use hyper::{Method, Request, Response, StatusCode};
use reqwest::redirect::Policy;
use reqwest::Client;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of every response the proxy writes
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

/// Per-request forwarding failures; both end in a bodiless 500
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to build request for {target}: {reason}")]
    Build { target: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Sends proxied requests with one client per certificate policy
pub struct Forwarder {
    verified: Client,
    unverified: Client,
}

impl Forwarder {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            verified: Self::client(true)?,
            unverified: Self::client(false)?,
        })
    }

    fn client(verify_peer: bool) -> anyhow::Result<Client> {
        let client = Client::builder()
            .redirect(Policy::none())
            .danger_accept_invalid_certs(!verify_peer)
            .build()?;
        Ok(client)
    }

    fn client_for(&self, target: &BackendTarget) -> &Client {
        if target.verify_peer {
            &self.verified
        } else {
            &self.unverified
        }
    }

    /// Forward a request and build the client response
    ///
    /// Never fails: build and transport errors become a 500 with an empty body.
    pub async fn forward<B>(&self, req: Request<B>, target: &BackendTarget) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let translate = req.method() == Method::DELETE;

        let outbound = match Self::build_request(req, target) {
            Ok(r) => r,
            Err(e) => {
                warn!("{}", e);
                return status_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let url = outbound.url().to_string();
        info!("Proxying request to {}", url);

        let response = match self.client_for(target).execute(outbound).await {
            Ok(r) => r,
            Err(source) => {
                warn!("{}", ForwardError::Transport { url, source });
                return status_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        info!("Proxying complete for {} code={}", url, response.status().as_u16());

        Self::client_response(response, translate)
    }

    /// Rebuild the inbound request against the target
    pub fn build_request<B>(
        req: Request<B>,
        target: &BackendTarget,
    ) -> Result<reqwest::Request, ForwardError>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        let build_error = |reason: String| ForwardError::Build {
            target: target.to_string(),
            reason,
        };

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = Url::parse(&format!("{}://{}{}", target.scheme, target.host, path_and_query))
            .map_err(|e| build_error(e.to_string()))?;
        let host = HeaderValue::from_str(&target.host).map_err(|e| build_error(e.to_string()))?;

        let mut headers = parts.headers;
        headers.insert(HOST, host);
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        let mut outbound = reqwest::Request::new(parts.method, url);
        *outbound.headers_mut() = headers;

        // Bodiless requests stay bodiless instead of becoming an empty chunked stream
        if !body.is_end_stream() {
            let frames = TryStreamExt::map_err(BodyStream::new(body), |e| -> BoxError { e.into() })
                .try_filter_map(|frame| future::ready(Ok::<_, BoxError>(frame.into_data().ok())));
            *outbound.body_mut() = Some(reqwest::Body::wrap_stream(frames));
        }

        Ok(outbound)
    }

    /// Copy status and headers, then stream or translate the body
    fn client_response(response: reqwest::Response, translate: bool) -> Response<ProxyBody> {
        let mut builder = Response::builder().status(response.status());
        for (key, value) in response.headers().iter() {
            // The translated body has its own length
            if translate && key == CONTENT_LENGTH {
                continue;
            }
            builder = builder.header(key, value);
        }

        let body = if translate {
            translated_body(response)
        } else {
            streamed_body(response)
        };

        match builder.body(body) {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to build client response: {}", e);
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// Pass the backend body through chunk by chunk
fn streamed_body(response: reqwest::Response) -> ProxyBody {
    let frames = response
        .bytes_stream()
        .inspect_err(|e| warn!("Failed to copy proxied response body: {}", e))
        .map_ok(Frame::data)
        .map_err(BoxError::from);
    StreamBody::new(frames).boxed_unsync()
}

/// Body produced by translation once the client response is already under way
fn translated_body(response: reqwest::Response) -> ProxyBody {
    let frames = stream::once(translate_delete(response)).filter_map(|body| {
        future::ready(body.map(|bytes| Ok::<_, BoxError>(Frame::data(bytes))))
    });
    StreamBody::new(frames).boxed_unsync()
}

/// Response with the given status and no body
pub fn status_response(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
}

pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(method: Method, uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(HOST, "localhost:6443")
            .header(ACCEPT_ENCODING, "gzip")
            .header("authorization", "Bearer token")
            .header("x-multi", "a")
            .header("x-multi", "b")
            .body(Full::new(Bytes::from_static(b"payload")))
            .unwrap()
    }

    #[test]
    fn test_build_request_rewrites_target() {
        let target = BackendTarget::verified("us-central1-run.googleapis.com");
        let req = inbound(
            Method::GET,
            "/apis/serving.knative.dev/v1alpha1/namespaces/default/services?limit=5",
        );

        let outbound = Forwarder::build_request(req, &target).unwrap();

        assert_eq!(outbound.method(), Method::GET);
        assert_eq!(
            outbound.url().as_str(),
            "https://us-central1-run.googleapis.com/apis/serving.knative.dev/v1alpha1/namespaces/default/services?limit=5"
        );
        assert_eq!(outbound.headers()[HOST], "us-central1-run.googleapis.com");
        assert!(outbound.body().is_some());
    }

    #[test]
    fn test_build_request_without_body() {
        let target = BackendTarget::unverified("146.148.59.112");
        let req = Request::builder()
            .method(Method::GET)
            .uri("/openapi/v2")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let outbound = Forwarder::build_request(req, &target).unwrap();

        assert!(outbound.body().is_none());
    }

    #[test]
    fn test_build_request_forces_identity_encoding() {
        let target = BackendTarget::unverified("146.148.59.112");
        let req = inbound(Method::GET, "/openapi/v2");
        let outbound = Forwarder::build_request(req, &target).unwrap();

        let encodings: Vec<_> = outbound.headers().get_all(ACCEPT_ENCODING).iter().collect();
        assert_eq!(encodings, vec!["identity"]);
    }

    #[test]
    fn test_build_request_keeps_other_headers() {
        let target = BackendTarget::verified("example.com");
        let req = inbound(Method::DELETE, "/apis/g/v1/namespaces/ns/x/y");
        let outbound = Forwarder::build_request(req, &target).unwrap();

        assert_eq!(outbound.method(), Method::DELETE);
        assert_eq!(outbound.headers()["authorization"], "Bearer token");
        let multi: Vec<_> = outbound.headers().get_all("x-multi").iter().collect();
        assert_eq!(multi, vec!["a", "b"]);
    }

    #[test]
    fn test_build_request_rejects_bad_host() {
        let target = BackendTarget::verified("bad host");
        let req = inbound(Method::GET, "/openapi/v2");
        let err = Forwarder::build_request(req, &target).unwrap_err();

        assert!(matches!(err, ForwardError::Build { .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_is_500() {
        let forwarder = Forwarder::new().unwrap();
        let target = BackendTarget {
            host: "127.0.0.1:1".to_string(),
            scheme: "http".to_string(),
            verify_peer: true,
        };

        let response = forwarder.forward(inbound(Method::GET, "/openapi/v2"), &target).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_status_response_is_empty() {
        let response = status_response(StatusCode::NOT_FOUND);

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }
}
