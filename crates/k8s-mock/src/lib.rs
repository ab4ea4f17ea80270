//! Mock Kubernetes API server for testing.
//!
//! Provides an HTTP server that can be used with kubeconfig-based connections.

pub mod discovery;
pub mod http;

pub use discovery::{MockApiResource, MockCrd, MockDiscovery};
pub use http::{HttpMockK8sServer, RunningHttpMockK8sServer, WatchEventType};
