//! The WebSocket Upgrade handshake, including the one-shot Basic/Digest retry
//! (spec §4.4). Transport-agnostic: the same code upgrades a plain TCP stream
//! or a TLS stream, since `async_tungstenite::client_async` is generic over
//! `AsyncRead + AsyncWrite`.

use async_tungstenite::tungstenite::handshake::client::{Request, Response};
use async_tungstenite::tungstenite::http::{self, StatusCode};
use async_tungstenite::WebSocketStream;
use futures::{AsyncRead, AsyncWrite};

use crate::auth::digest::{build_authorization_header, build_basic_header};
use crate::auth::{AuthenticateContext, Scheme};
use crate::error::{Error, Result};
use crate::util::build_ws_target;
use crate::ws_context::{WsRequestContext, WsResponseContext};

/// The outcome of one upgrade attempt: either it succeeded, or it failed with
/// enough information (status + headers) for the caller to decide whether a
/// Digest retry applies.
pub enum UpgradeOutcome<S> {
    Success {
        stream: WebSocketStream<S>,
        response: WsResponseContext,
    },
    Challenged {
        status: u16,
        www_authenticate: Option<String>,
    },
}

fn build_request(host: &str, port: u16, ctx: &WsRequestContext, authorization: Option<&str>) -> Result<Request> {
    let target = build_ws_target(&ctx.path, &ctx.query);
    let mut builder = http::Request::builder()
        .method("GET")
        .uri(format!("ws://{host}:{port}{target}"))
        .header("Host", format!("{host}:{port}"));

    for (name, value) in &ctx.headers {
        builder = builder.header(name, value);
    }
    if let Some(auth) = authorization {
        builder = builder.header("Authorization", auth);
    }

    builder
        .body(())
        .map_err(|err| Error::InvalidArgument(err.to_string().into_boxed_str()))
}

/// Basic credentials are sent unconditionally once the request context
/// carries them, no challenge needed; Digest has no cleartext response to
/// compute until a challenge hands over a nonce, so it waits for a retry.
fn authorization_for(ctx: &WsRequestContext, auth_state: Option<&AuthenticateContext>, target: &str) -> Option<String> {
    let creds = ctx.authenticate.as_ref()?;
    match creds.scheme {
        Scheme::Basic => Some(build_basic_header(&creds.username, &creds.password)),
        Scheme::Digest => {
            let auth_ctx = auth_state?;
            build_authorization_header(auth_ctx, &creds.username, &creds.password, "GET", target)
        },
        Scheme::Unused => None,
    }
}

fn collect_response_context(response: &Response) -> WsResponseContext {
    WsResponseContext {
        status: response.status().as_u16(),
        headers: response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect(),
    }
}

/// Attempt one upgrade over an already-connected stream. Does not retry;
/// the caller (socket state machine) owns redialing a fresh transport
/// connection and re-invoking this with an updated `auth_state`.
pub async fn attempt_upgrade<S>(
    stream: S,
    host: &str,
    port: u16,
    request_ctx: &WsRequestContext,
    auth_state: Option<&AuthenticateContext>,
) -> Result<UpgradeOutcome<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let target = build_ws_target(&request_ctx.path, &request_ctx.query);
    let authorization = authorization_for(request_ctx, auth_state, &target);
    let request = build_request(host, port, request_ctx, authorization.as_deref())?;

    match async_tungstenite::client_async(request, stream).await {
        Ok((ws_stream, response)) => Ok(UpgradeOutcome::Success {
            stream: ws_stream,
            response: collect_response_context(&response),
        }),
        Err(async_tungstenite::tungstenite::Error::Http(response)) => {
            if response.status() == StatusCode::UNAUTHORIZED {
                let www_authenticate = response
                    .headers()
                    .get("WWW-Authenticate")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(UpgradeOutcome::Challenged {
                    status: response.status().as_u16(),
                    www_authenticate,
                })
            } else {
                Err(Error::Handshake(
                    format!("WS upgrade rejected with status {}", response.status()).into_boxed_str(),
                ))
            }
        },
        Err(err) => Err(Error::Handshake(err.to_string().into_boxed_str())),
    }
}

/// What the server decides to do with an inbound Upgrade request.
pub enum AcceptDecision {
    Accept,
    Challenge { status: u16, www_authenticate: String },
    /// Reject outright with no `WWW-Authenticate` invitation to retry (spec
    /// §4.4: a Basic credential mismatch closes rather than re-challenges,
    /// since there's no nonce/stale mechanism for the client to act on).
    Close,
}

/// Server-side accept of an inbound Upgrade request. `decide` inspects the
/// request (its `Authorization` header, typically) and may answer a 401
/// challenge instead of completing the handshake, mirroring the "Server
/// challenge" flow in spec §4.4.
pub async fn accept<S>(
    stream: S,
    mut decide: impl FnMut(&Request) -> AcceptDecision + Send,
) -> Result<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async_tungstenite::accept_hdr_async(stream, move |req: &Request, response: Response| {
        match decide(req) {
            AcceptDecision::Accept => Ok(response),
            AcceptDecision::Challenge { status, www_authenticate } => Err(http::Response::builder()
                .status(status)
                .header("WWW-Authenticate", www_authenticate)
                .body(Some(String::new()))
                .unwrap()),
            AcceptDecision::Close => Err(http::Response::builder()
                .status(StatusCode::FORBIDDEN)
                .body(Some(String::new()))
                .unwrap()),
        }
    })
    .await
    .map_err(|err| Error::Handshake(err.to_string().into_boxed_str()))
}
