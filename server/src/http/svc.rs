use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use axum::extract::{Extension, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use futures::TryStreamExt;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_rustls::TlsAcceptor;
use tokio_util::io::StreamReader;
use tower::Service;
use tracing::{debug, error, info, instrument, warn, Level};
use x509_certificate::X509Certificate;

use common::config::ESConfig;
use common::db::UploadRecord;

use crate::db::msg::DbMsg;
use crate::http::auth::{proxy_auth, CurrentUser};
use crate::http::multipart::{DownloadSettings, MultipartReceiver, ReceiverError};
use crate::service::{ESMReceiver, ESMRegistry, EntanglementService, ServiceType, ESM};

// http service
//
// unlike the other services, this one never receives ESM messages of its
// own: it is purely a client of auth/db/fs via the registry. it still holds
// an ESMReceiver to satisfy EntanglementService's shape, but nothing ever
// sends to ServiceType::Http and the loop draining it is expected to sit
// idle for the life of the process
pub struct HttpService {
    config: Arc<ESConfig>,
    receiver: Arc<Mutex<ESMReceiver>>,
    msg_handle: AsyncCell<tokio::task::JoinHandle<anyhow::Result<()>>>,
    hyper_handle: AsyncCell<tokio::task::JoinHandle<anyhow::Result<()>>>,
}

#[async_trait]
impl EntanglementService for HttpService {
    type Inner = HttpState;

    fn create(config: Arc<ESConfig>, registry: &ESMRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<ESM>(1);

        registry
            .insert(ServiceType::Http, tx)
            .expect("failed to insert sender for http service");

        HttpService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            msg_handle: AsyncCell::new(),
            hyper_handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &ESMRegistry) -> anyhow::Result<()> {
        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(HttpState::new(self.config.clone(), registry.clone()));

        let hyper_handle = tokio::task::spawn(serve(state));
        self.hyper_handle.set(hyper_handle);

        // nothing is ever sent here, but we drain the channel anyway so a
        // stray message (a bug elsewhere) shows up as a log line instead of
        // silently piling up
        let msg_serve = async move {
            let mut receiver = receiver.lock().await;

            while let Some(_msg) = receiver.recv().await {
                error!("http_service received an esm message, which should never happen");
            }

            Err(anyhow::Error::msg("http_service esm channel disconnected"))
        };

        let msg_handle = tokio::task::spawn(msg_serve);
        self.msg_handle.set(msg_handle);

        debug!("finished startup for http_service");
        Ok(())
    }
}

pub struct HttpState {
    config: Arc<ESConfig>,
    registry: ESMRegistry,
}

impl HttpState {
    fn new(config: Arc<ESConfig>, registry: ESMRegistry) -> Self {
        HttpState { config, registry }
    }
}

fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/api/upload", post(upload))
        .route_layer(middleware::from_fn(proxy_auth))
        .with_state(state)
}

// handles POST /api/upload
//
// takes the raw Request rather than an extractor that would buffer the
// body through axum's own types first -- the whole point of the receiver
// is bounded-memory streaming, so the body is handed over as a plain
// AsyncRead via StreamReader instead
#[instrument(level=Level::DEBUG, skip(state, current_user, req))]
async fn upload(
    State(state): State<Arc<HttpState>>,
    Extension(current_user): Extension<CurrentUser>,
    req: Request,
) -> Result<impl IntoResponse, StatusCode> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_owned())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let output_directory = state.config.fs.upload_dir.clone();
    let chunk_cap = state.config.fs.chunk_cap;
    let timeout = Duration::from_secs(state.config.http.upload_timeout_secs);

    let data_stream = req
        .into_body()
        .into_data_stream()
        .map_err(std::io::Error::other);

    let mut reader = StreamReader::new(data_stream);

    let settings = DownloadSettings {
        output_directory,
        chunk_cap,
        timeout: Some(timeout),
        on_header: None,
        on_body: None,
    };

    let receiver = MultipartReceiver::new(&mut reader, settings);

    let paths = match receiver.download(&content_type).await {
        Ok(paths) => paths,
        Err(fault) => {
            // the files that completed before the fault are still sitting on
            // disk -- record them even though the request as a whole failed
            for path in &fault.paths {
                record_upload(&state, &current_user, path).await;
            }

            return Err(map_receiver_error(&fault.error));
        }
    };

    for path in &paths {
        record_upload(&state, &current_user, path).await;
    }

    Ok((StatusCode::CREATED, format!("{} file(s) received", paths.len())))
}

async fn record_upload(state: &HttpState, current_user: &CurrentUser, path: &Path) {
    let byte_len = tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len() as i64)
        .unwrap_or(0);

    let upload = UploadRecord {
        uid: current_user.uid.clone(),
        path: path.to_string_lossy().into_owned(),
        byte_len,
    };

    let db_svc_sender = match state.registry.get(&ServiceType::Db) {
        Ok(sender) => sender,
        Err(err) => {
            warn!(%err, "dropping upload record, db service unavailable");
            return;
        }
    };

    let (tx, rx) = tokio::sync::oneshot::channel();

    if db_svc_sender
        .send(DbMsg::RecordUpload { resp: tx, upload }.into())
        .await
        .is_err()
    {
        warn!("failed to send RecordUpload message");
        return;
    }

    match rx.await {
        Ok(Ok(())) => (),
        Ok(Err(err)) => warn!(%err, "db service failed to record upload"),
        Err(err) => warn!(%err, "db service dropped RecordUpload response"),
    }
}

fn map_receiver_error(err: &ReceiverError) -> StatusCode {
    match err {
        ReceiverError::NotMultipartFormData => StatusCode::BAD_REQUEST,
        ReceiverError::InvalidStructure => StatusCode::BAD_REQUEST,
        ReceiverError::InvalidFilePath => StatusCode::INTERNAL_SERVER_ERROR,
        ReceiverError::OperationAborted => StatusCode::INTERNAL_SERVER_ERROR,
        ReceiverError::TimedOut => StatusCode::REQUEST_TIMEOUT,
        ReceiverError::Closed => StatusCode::INTERNAL_SERVER_ERROR,
        ReceiverError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// raw tls accept loop
//
// axum::serve assumes a plain tcp listener, but mutual-tls peer certificate
// extraction means driving the rustls handshake ourselves. the peer's
// certificate common name (when client auth is configured) is injected as a
// request extension ahead of the CurrentUser set by proxy_auth, so a
// handler could in principle cross-check the two
async fn serve(state: Arc<HttpState>) -> anyhow::Result<()> {
    let config = state.config.clone();
    let router = router(state);

    let tls_config = build_tls_config(
        &config.http.key,
        &config.http.cert,
        config.http.client_ca_cert.as_deref(),
    )?;

    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let listener = TcpListener::bind(&config.http.socket).await?;

    info!(socket = %config.http.socket, "http_service listening");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "failed to accept tcp connection");
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let router = router.clone();

        tokio::task::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(%peer_addr, %err, "tls handshake failed");
                    return;
                }
            };

            let peer_cn = {
                let (_io, session) = tls_stream.get_ref();

                session.peer_certificates().and_then(|certs| {
                    certs
                        .first()
                        .and_then(|cert| X509Certificate::from_der(cert.as_ref()).ok())
                        .and_then(|cert| cert.subject_common_name().ok())
                })
            };

            let io = hyper_util::rt::TokioIo::new(tls_stream);

            let service = hyper::service::service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                let mut router = router.clone();
                let peer_cn = peer_cn.clone();

                async move {
                    let (mut parts, incoming) = req.into_parts();

                    if let Some(cn) = peer_cn {
                        parts.extensions.insert(PeerCommonName(cn));
                    }

                    let body = axum::body::Body::new(incoming);
                    let req = axum::http::Request::from_parts(parts, body);

                    Service::call(&mut router, req).await
                }
            });

            let result = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection(io, service)
                .await;

            if let Err(err) = result {
                debug!(%peer_addr, %err, "connection closed with error");
            }
        });
    }
}

// carries the verified mtls client certificate's common name, set before
// CurrentUser so a handler could in principle cross-check the two
#[derive(Clone, Debug)]
pub struct PeerCommonName(pub String);

fn build_tls_config(
    key_path: &Path,
    cert_path: &Path,
    client_ca_cert_path: Option<&Path>,
) -> anyhow::Result<ServerConfig> {
    let key = load_private_key(key_path)?;
    let certs = load_certs(cert_path)?;

    let mut config = match client_ca_cert_path {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();

            for cert in load_certs(ca_path)? {
                roots.add(cert)?;
            }

            let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build()?;

            ServerConfig::builder()
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        }
        None => ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?,
    };

    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let bytes = std::fs::read(path)?;
    let certs = rustls_pemfile::certs(&mut bytes.as_slice()).collect::<Result<Vec<_>, _>>()?;
    Ok(certs)
}

fn load_private_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let bytes = std::fs::read(path)?;

    rustls_pemfile::private_key(&mut bytes.as_slice())?
        .ok_or_else(|| anyhow::Error::msg("no private key found in pem file"))
}
