//! Local HTTP endpoint that receives the OAuth authorization redirect.

use crate::error::{AuthError, AuthErrorKind, Grant};
use bytes::Bytes;
use eyre::Context;
use http_body_util::Full;
use hyper::body;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use oauth2::{AuthorizationCode, CsrfToken, RedirectUrl};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

/// How long open connections get to finish their response once the listener stops.
const CONNECTION_GRACE: Duration = Duration::from_millis(500);

/// What the browser redirect carried.
#[derive(Debug)]
enum CallbackOutcome {
    Code(AuthorizationCode),
    Denied {
        error: String,
        description: Option<String>,
    },
}

/// A short-lived listener for exactly one authorization redirect.
///
/// The listener serves a single path. A request carrying `code` (and the expected
/// `state`) or `error` completes it; anything else is answered with 404 or 400 and
/// ignored. The bound port is released as soon as an outcome or the deadline is
/// observed, and on drop. Connections accepted along the way are closed with it.
#[derive(Debug)]
pub struct CallbackListener {
    local_addr: SocketAddr,
    redirect_url: RedirectUrl,
    outcome: oneshot::Receiver<CallbackOutcome>,
    stop: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl CallbackListener {
    /// Binds `127.0.0.1:{port}` and starts serving `path` in the background.
    ///
    /// `port` may be 0, in which case the redirect URL names whichever port was assigned.
    pub async fn bind(
        port: u16,
        path: &str,
        csrf: CsrfToken,
        success_html: &'static str,
    ) -> eyre::Result<Self> {
        let socket = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("bind to localhost:{port}"))?;
        let local_addr = socket.local_addr().context("get local address")?;
        let redirect_url = RedirectUrl::new(format!(
            "http://localhost:{}{}",
            local_addr.port(),
            path
        ))
        .context("construct redirect url")?;

        let (done, outcome) = oneshot::channel();
        let (stop, mut stop_requested) = oneshot::channel();
        let path = path.to_string();
        let server = tokio::spawn(async move {
            let (got, mut gotten) = mpsc::channel(1);
            let (stop_connections, stopping) = watch::channel(false);
            let mut connections = JoinSet::new();
            let outcome = loop {
                tokio::select! {
                    accepted = socket.accept() => {
                        let (conn, peer) = match accepted {
                            Ok(accepted) => accepted,
                            Err(e) => {
                                tracing::warn!("failed to accept redirect connection: {e}");
                                continue;
                            }
                        };
                        tracing::trace!(%peer, "accepted redirect connection");
                        let conn = hyper_util::rt::TokioIo::new(conn);
                        let path = path.clone();
                        let csrf = csrf.clone();
                        let got = got.clone();
                        let service = service_fn(move |req: Request<body::Incoming>| {
                            let response = handle(&req, &path, &csrf, &got, success_html);
                            async move { Ok::<_, Infallible>(response) }
                        });
                        let mut stopping = stopping.clone();
                        connections.spawn(async move {
                            let mut serve = std::pin::pin!(
                                hyper::server::conn::http1::Builder::new()
                                    .keep_alive(false)
                                    .serve_connection(conn, service)
                            );
                            let exit = tokio::select! {
                                exit = &mut serve => exit,
                                _ = stopping.changed() => {
                                    serve.as_mut().graceful_shutdown();
                                    serve.await
                                }
                            };
                            if let Err(e) = exit {
                                tracing::debug!("redirect connection ended with error: {e}");
                            }
                        });
                    }
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                    Some(outcome) = gotten.recv() => break Some(outcome),
                    _ = &mut stop_requested => break None,
                }
            };
            // the listening socket is dropped here, releasing the port
            drop(socket);

            let _ = stop_connections.send(true);
            let drain = async { while connections.join_next().await.is_some() {} };
            if tokio::time::timeout(CONNECTION_GRACE, drain).await.is_err() {
                tracing::debug!("closing lingering redirect connections");
            }
            connections.shutdown().await;

            if let Some(outcome) = outcome {
                let _ = done.send(outcome);
            }
        });

        tracing::debug!(%local_addr, "redirect listener started");
        Ok(Self {
            local_addr,
            redirect_url,
            outcome,
            stop: Some(stop),
            server: Some(server),
        })
    }

    pub fn redirect_url(&self) -> &RedirectUrl {
        &self.redirect_url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the redirect, up to `timeout`.
    ///
    /// The listener is fully shut down before this returns, whatever the outcome.
    pub async fn wait(&mut self, timeout: Duration) -> Result<AuthorizationCode, AuthError> {
        let outcome = tokio::time::timeout(timeout, &mut self.outcome).await;
        self.shutdown().await;

        match outcome {
            Err(_elapsed) => {
                tracing::error!(?timeout, "no authorization redirect received in time");
                Err(AuthError::new(
                    AuthErrorKind::Timeout,
                    Grant::AuthorizationCode,
                    format!("no authorization callback within {timeout:?}"),
                ))
            }
            Ok(Err(_)) => Err(AuthError::new(
                AuthErrorKind::Network,
                Grant::AuthorizationCode,
                "redirect listener stopped unexpectedly",
            )),
            Ok(Ok(CallbackOutcome::Code(code))) => {
                tracing::info!("received authorization code");
                Ok(code)
            }
            Ok(Ok(CallbackOutcome::Denied { error, description })) => {
                let detail = match description {
                    Some(description) if !description.is_empty() => {
                        format!("{error}: {description}")
                    }
                    _ => error,
                };
                tracing::error!(%detail, "authorization was denied");
                Err(AuthError::new(
                    AuthErrorKind::ServerRejected,
                    Grant::AuthorizationCode,
                    detail,
                ))
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(server) = self.server.take() {
            // wait for the socket and every accepted connection to be closed
            let _ = server.await;
            tracing::debug!(local_addr = %self.local_addr, "redirect listener stopped");
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

fn handle(
    req: &Request<body::Incoming>,
    path: &str,
    csrf: &CsrfToken,
    got: &mpsc::Sender<CallbackOutcome>,
    success_html: &'static str,
) -> Response<Full<Bytes>> {
    if req.uri().path() != path {
        tracing::debug!(path = req.uri().path(), "ignoring request for unexpected path");
        return respond(StatusCode::NOT_FOUND, Bytes::from_static(b"Not found"));
    }

    let mut state = None;
    let mut code = None;
    let mut error = None;
    let mut description = None;
    for (k, v) in form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes()) {
        match &*k {
            "state" => state = Some(v),
            "code" => code = Some(v),
            "error" => error = Some(v),
            "error_description" => description = Some(v),
            _ => {}
        }
    }

    if let Some(error) = error {
        let body = format!("Authorization failed: {error}");
        // a full channel means an outcome is already being reported
        let _ = got.try_send(CallbackOutcome::Denied {
            error: error.into_owned(),
            description: description.map(|d| d.into_owned()),
        });
        return respond(StatusCode::BAD_REQUEST, Bytes::from(body));
    }

    let Some(code) = code else {
        tracing::warn!("redirect carried neither code nor error");
        return respond(
            StatusCode::BAD_REQUEST,
            Bytes::from_static(b"Authorization failed: no code received"),
        );
    };
    if state.as_deref() != Some(csrf.secret().as_str()) {
        tracing::warn!("redirect carried an unexpected state parameter");
        return respond(
            StatusCode::BAD_REQUEST,
            Bytes::from_static(b"Authorization failed: invalid state"),
        );
    }

    let _ = got.try_send(CallbackOutcome::Code(AuthorizationCode::new(
        code.into_owned(),
    )));
    let mut response = respond(StatusCode::OK, Bytes::from_static(success_html.as_bytes()));
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn respond(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}
