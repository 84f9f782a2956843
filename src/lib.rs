//! kapiproxy - A local TLS reverse proxy for the Cloud Run API
//!
//! Presents a minimal Kubernetes-style API server on localhost so that
//! `kubectl` can manage Cloud Run services:
//! - Ephemeral self-signed TLS identity generated at startup
//! - Namespaced resource calls forwarded to the live API, discovery to an auxiliary host
//! - Streaming passthrough of backend responses
//! - DELETE responses rewritten into Kubernetes `Status` objects

pub mod discovery;
pub mod forward;
pub mod identity;
pub mod proxy;
pub mod router;
pub mod translate;

pub use forward::{ForwardError, Forwarder, ProxyBody};
pub use identity::TlsIdentity;
pub use proxy::{Endpoint, ProxyConfig, ProxyContext, ProxyServer};
pub use router::{BackendTarget, PathMatcher, RouteRule, RouteTable};
pub use translate::StatusEnvelope;
