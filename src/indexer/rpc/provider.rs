use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::indexer::rpc::RpcClient;
use crate::indexer::rpc::http::HttpRpcClient;
use crate::models::errors::RpcError;

type ClientFactory = dyn Fn(&str) -> Result<Arc<dyn RpcClient>, RpcError> + Send + Sync;

/// Ordered list of node endpoints with round-robin-with-demotion failover.
///
/// The ordering is shared by every stage of a cycle, so rotation is serialised behind a
/// mutex. One client is built lazily per endpoint and reused afterwards.
pub struct ProviderSelector {
    original: Vec<String>,
    order: Mutex<VecDeque<String>>,
    clients: Mutex<HashMap<String, Arc<dyn RpcClient>>>,
    factory: Box<ClientFactory>,
}

impl ProviderSelector {
    pub fn new(provider_uris: Vec<String>, timeout: Duration) -> Result<Self, RpcError> {
        for uri in &provider_uris {
            parse_http_uri(uri)?;
        }
        Ok(Self::with_factory(provider_uris, move |uri| {
            let client = HttpRpcClient::new(parse_http_uri(uri)?, timeout)?;
            Ok(Arc::new(client) as Arc<dyn RpcClient>)
        }))
    }

    pub fn with_factory<F>(provider_uris: Vec<String>, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn RpcClient>, RpcError> + Send + Sync + 'static,
    {
        Self {
            order: Mutex::new(provider_uris.iter().cloned().collect()),
            original: provider_uris,
            clients: Mutex::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    /// Endpoint currently at the head of the line.
    pub fn current_uri(&self) -> Option<String> {
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Client bound to the current head.
    pub fn current(&self) -> Result<Arc<dyn RpcClient>, RpcError> {
        let uri = self
            .current_uri()
            .ok_or_else(|| RpcError::UnsupportedProvider("no providers configured".to_string()))?;
        self.client_for(&uri)
    }

    /// Moves the current head to the back and returns a client for the new head.
    pub fn select_provider(&self) -> Result<Arc<dyn RpcClient>, RpcError> {
        let uri = {
            let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(failed) = order.pop_front() {
                order.push_back(failed);
            }
            order
                .front()
                .cloned()
                .ok_or_else(|| RpcError::UnsupportedProvider("no providers configured".to_string()))?
        };
        if self.original.len() > 1 {
            warn!("Failing over to provider {}", uri);
        }
        self.client_for(&uri)
    }

    /// Restores the configured ordering and returns a client for the original head.
    pub fn reset_provider(&self) -> Result<Arc<dyn RpcClient>, RpcError> {
        {
            let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
            if order.front() != self.original.first() {
                info!("Restoring original provider order");
            }
            *order = self.original.iter().cloned().collect();
        }
        self.current()
    }

    fn client_for(&self, uri: &str) -> Result<Arc<dyn RpcClient>, RpcError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(uri) {
            return Ok(client.clone());
        }
        let client = (self.factory)(uri)?;
        clients.insert(uri.to_string(), client.clone());
        Ok(client)
    }
}

fn parse_http_uri(uri: &str) -> Result<Url, RpcError> {
    let url = Url::parse(uri).map_err(|e| RpcError::UnsupportedProvider(format!("{uri}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(RpcError::UnsupportedProvider(format!(
            "{uri}: scheme '{scheme}' is not supported"
        ))),
    }
}
