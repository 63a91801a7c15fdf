use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::ast::Document;
use crate::error::{FederationError, Result};
use crate::operation_printer::print_document;
use crate::{GraphQLResponse, RequestContext};

/// The body POSTed to a remote origin.
#[derive(Clone, Debug, Serialize)]
pub struct SubgraphRequest {
    #[serde(rename = "operationName")]
    pub operation_name: Option<String>,
    pub query: String,
    pub variables: Map<String, Value>,
}

/// Outcome of one origin fetch. `status` is only known for remote origins.
#[derive(Clone, Debug, Default)]
pub struct FetchResult {
    pub status: Option<u16>,
    pub response: GraphQLResponse,
}

/// A request executed in-process against a local schema.
pub struct LocalRequest<'a> {
    pub document: &'a Document,
    pub operation_name: Option<&'a str>,
    pub variables: &'a Map<String, Value>,
    pub context: &'a RequestContext,
}

/// Executes operations against a local schema without going over the network.
pub trait LocalExecutor: Send + Sync {
    fn execute(&self, request: LocalRequest<'_>) -> GraphQLResponse;
}

impl<F> LocalExecutor for F
where
    F: Fn(LocalRequest<'_>) -> GraphQLResponse + Send + Sync,
{
    fn execute(&self, request: LocalRequest<'_>) -> GraphQLResponse {
        self(request)
    }
}

type HeaderFn = dyn Fn(&RequestContext) -> HashMap<String, String> + Send + Sync;

/// Headers sent with every request to a remote origin.
#[derive(Clone)]
pub enum HeaderPolicy {
    Static(HashMap<String, String>),
    Dynamic(Arc<HeaderFn>),
}

impl HeaderPolicy {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> HashMap<String, String> + Send + Sync + 'static,
    {
        HeaderPolicy::Dynamic(Arc::new(f))
    }

    pub fn resolve(&self, context: &RequestContext) -> HashMap<String, String> {
        match self {
            HeaderPolicy::Static(headers) => headers.clone(),
            HeaderPolicy::Dynamic(f) => f(context),
        }
    }
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        HeaderPolicy::Static(HashMap::new())
    }
}

impl fmt::Debug for HeaderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderPolicy::Static(headers) => f.debug_tuple("Static").field(headers).finish(),
            HeaderPolicy::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Transport used to reach remote origins.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        request: &SubgraphRequest,
    ) -> Result<FetchResult>;
}

pub struct HttpQueryExecutor {
    client: reqwest::Client,
}

impl HttpQueryExecutor {
    pub fn new() -> Self {
        HttpQueryExecutor {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpQueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        request: &SubgraphRequest,
    ) -> Result<FetchResult> {
        let fetch_error = |reason: String| FederationError::Fetch {
            origin: url.to_string(),
            reason,
        };

        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .json(request)
            .send()
            .await
            .map_err(|e| fetch_error(format!("failed to send request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("unexpected status {status}")));
        }

        let response = response
            .json::<GraphQLResponse>()
            .await
            .map_err(|e| fetch_error(format!("failed to parse response: {e}")))?;

        Ok(FetchResult {
            status: Some(status.as_u16()),
            response,
        })
    }
}

/// Where an operation is sent: a local schema or a remote endpoint.
#[derive(Clone)]
pub enum Upstream {
    Local(Arc<dyn LocalExecutor>),
    Remote { url: String, headers: HeaderPolicy },
}

impl Upstream {
    pub fn remote(url: impl Into<String>) -> Self {
        Upstream::Remote {
            url: url.into(),
            headers: HeaderPolicy::default(),
        }
    }

    /// Runs `document` in-process. Returns `None` for remote upstreams.
    pub fn execute_local(
        &self,
        document: &Document,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
        context: &RequestContext,
    ) -> Option<FetchResult> {
        let Upstream::Local(executor) = self else {
            return None;
        };
        let response = executor.execute(LocalRequest {
            document,
            operation_name,
            variables,
            context,
        });
        Some(FetchResult {
            status: None,
            response,
        })
    }

    /// Sends `document` to this upstream, locally or over the transport.
    pub async fn fetch(
        &self,
        executor: &dyn QueryExecutor,
        document: &Document,
        operation_name: Option<&str>,
        variables: Map<String, Value>,
        context: &RequestContext,
    ) -> Result<FetchResult> {
        match self {
            Upstream::Local(_) => Ok(self
                .execute_local(document, operation_name, &variables, context)
                .unwrap_or_default()),
            Upstream::Remote { url, headers } => {
                let request = SubgraphRequest {
                    operation_name: operation_name.map(str::to_string),
                    query: print_document(document)?,
                    variables,
                };
                debug!(url = %url, query = %request.query, "sending request to remote origin");
                executor
                    .execute(url, &headers.resolve(context), &request)
                    .await
            }
        }
    }
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::Local(_) => f.write_str("Local(..)"),
            Upstream::Remote { url, headers } => f
                .debug_struct("Remote")
                .field("url", url)
                .field("headers", headers)
                .finish(),
        }
    }
}
