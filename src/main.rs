use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use portkey::config::SupergraphConfig;
use portkey::{FederationGateway, GraphQLRequest, RequestContext, SchemaRegistry};

/// Federation gateway serving one merged GraphQL schema over several subgraphs.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Supergraph YAML file.
    #[arg(long, default_value = "./schemas/supergraph.yaml")]
    config: PathBuf,

    #[arg(long, default_value = "0.0.0.0:3000")]
    listen: SocketAddr,
}

// Create a response body from a string
fn full<T: Into<Bytes>>(value: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

const GRAPHIQL_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head>
  <title>GraphiQL - Portkey Federation Gateway</title>
  <link href="https://unpkg.com/graphiql@1.5.0/graphiql.min.css" rel="stylesheet" />
  <style>
    body { margin: 0; padding: 0; height: 100vh; }
    #graphiql { height: 100vh; }
  </style>
</head>
<body>
  <div id="graphiql"></div>

  <script src="https://unpkg.com/react@17.0.2/umd/react.production.min.js"></script>
  <script src="https://unpkg.com/react-dom@17.0.2/umd/react-dom.production.min.js"></script>
  <script src="https://unpkg.com/graphiql@1.5.0/graphiql.min.js"></script>
  <script>
    const token = localStorage.getItem('auth_token') || '';

    function graphQLFetcher(graphQLParams) {
      return fetch('/graphql', {
        method: 'post',
        headers: {
          'Content-Type': 'application/json',
          'Authorization': token ? `Bearer ${token}` : '',
        },
        body: JSON.stringify(graphQLParams),
      }).then(response => response.json());
    }

    ReactDOM.render(
      React.createElement(GraphiQL, { fetcher: graphQLFetcher }),
      document.getElementById('graphiql')
    );
  </script>
</body>
</html>
"#;

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<FederationGateway>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    let context = RequestContext {
        headers: extract_auth_headers(&req),
    };

    let result = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => {
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "failed to read request body");
                    return Ok(plain(StatusCode::BAD_REQUEST, "Failed to read request body"));
                }
            };

            match serde_json::from_slice::<GraphQLRequest>(&body_bytes) {
                Ok(request) => {
                    let body = match gateway.process_request(request, context).await {
                        Ok(response) => serde_json::to_string(&response).unwrap_or_default(),
                        Err(e) if e.is_configuration_error() => {
                            error!(error = %e, "gateway configuration is inconsistent");
                            json!({ "errors": [{ "message": e.to_string() }] }).to_string()
                        }
                        Err(e) => {
                            warn!(error = %e, "request failed");
                            json!({ "errors": [{ "message": e.to_string() }] }).to_string()
                        }
                    };
                    Response::builder()
                        .header("Content-Type", "application/json")
                        .header("Access-Control-Allow-Origin", "*")
                        .body(full(body))
                        .unwrap_or_else(|_| internal_server_error())
                }
                Err(e) => plain(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid JSON request: {e}"),
                ),
            }
        }

        (&Method::GET, "/schema") => Response::builder()
            .header("Content-Type", "text/plain")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(gateway.config().schema.to_string()))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/graphiql") => Response::builder()
            .header("Content-Type", "text/html")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(GRAPHIQL_HTML))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::FOUND)
            .header("Location", "/graphiql")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::OPTIONS, _) => Response::builder()
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type, Authorization",
            )
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => plain(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(result)
}

fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .header("Access-Control-Allow-Origin", "*")
        .body(full(body))
        .unwrap_or_else(|_| internal_server_error())
}

fn internal_server_error() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

// Headers forwarded to subgraphs
fn extract_auth_headers(req: &Request<Incoming>) -> HashMap<String, String> {
    ["Authorization", "x-api-key", "x-token"]
        .into_iter()
        .filter_map(|name| {
            let value = req.headers().get(name)?.to_str().ok()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

#[derive(Clone)]
// An Executor that uses the tokio runtime.
pub struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

async fn build_gateway(config_path: &Path) -> portkey::Result<FederationGateway> {
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new(""));
    let supergraph = SupergraphConfig::from_file(config_path)?;

    let mut registry = SchemaRegistry::new();
    let origins = supergraph.load_into(config_dir, &mut registry).await?;
    let gateway = FederationGateway::from_registry(&mut registry)?;
    supergraph.install_resolvers(gateway, &origins)
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let gateway = match build_gateway(&args.config).await {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            error!(error = %e, config = %args.config.display(), "failed to build the federated schema");
            return Err(e.into());
        }
    };

    let listener = TcpListener::bind(args.listen).await?;
    info!(addr = %args.listen, "GraphQL Federation Gateway listening");
    info!("GraphiQL UI available at http://{}/graphiql", args.listen);

    loop {
        let (stream, _addr) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let gateway_clone = Arc::clone(&gateway);

        let executor = TokioExecutor;

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let gateway = gateway_clone.clone();
                handle_request(req, gateway)
            });

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(executor)
                .serve_connection(io, service)
                .await
            {
                error!(error = %e, "error processing connection");
            }
        });
    }
}
