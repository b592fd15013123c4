//! Thin HTTP/websocket surface over the coordinator.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures::{
    future,
    stream::{SplitSink, SplitStream},
    Sink, SinkExt, Stream, StreamExt,
};
use mukatte_protocol::{decode_payload, encode_payload, Identity, SESSION_COOKIE, STATUS_PATH};
use serde::Deserialize;

use crate::coordinator::Coordinator;
use crate::relay::{Payload, RelayError};

const COOKIE_MAX_AGE_SECS: i64 = 31_536_000;

#[derive(Debug, Default, Deserialize)]
pub struct RoomQuery {
    sala: Option<String>,
    delete: Option<String>,
}

pub fn router(coordinator: Coordinator) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route(STATUS_PATH, get(status_handler))
        .layer(middleware::map_response(security_headers))
        .with_state(coordinator)
}

/// The caller's identity token, plus the cookie to hand out if it was missing.
struct Session {
    token: String,
    issued: Option<HeaderValue>,
}

impl Session {
    fn from_headers(headers: &HeaderMap) -> Self {
        let existing = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value.to_string());

        match existing {
            Some(token) => Session {
                token,
                issued: None,
            },
            None => {
                let id = Identity::generate();
                let expires = Utc::now() + chrono::Duration::seconds(COOKIE_MAX_AGE_SECS);
                let cookie = format!(
                    "{SESSION_COOKIE}={id}; Max-Age={COOKIE_MAX_AGE_SECS}; Expires={}; \
                     HttpOnly; Secure; SameSite=Strict",
                    expires.format("%a, %d %b %Y %H:%M:%S GMT")
                );
                tracing::debug!(%id, "issued new identity");
                Session {
                    token: id.to_string(),
                    issued: HeaderValue::from_str(&cookie).ok(),
                }
            }
        }
    }

    fn attach(self, mut response: Response) -> Response {
        if let Some(cookie) = self.issued {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        response
    }
}

async fn root_handler(
    State(coordinator): State<Coordinator>,
    Query(query): Query<RoomQuery>,
    headers: HeaderMap,
) -> Response {
    let session = Session::from_headers(&headers);

    let response = if query.delete.as_deref() == Some("yes") {
        match coordinator.leave(&session.token) {
            Ok(room) => {
                tracing::info!(room = %room, "player left");
                StatusCode::OK.into_response()
            }
            Err(e) => e.into_response(),
        }
    } else if let Some(room) = query.sala.filter(|r| !r.is_empty()) {
        match coordinator.join(&room, &session.token) {
            Ok(view) => Json(view).into_response(),
            Err(e) => e.into_response(),
        }
    } else {
        StatusCode::NOT_FOUND.into_response()
    };

    session.attach(response)
}

async fn status_handler(
    State(coordinator): State<Coordinator>,
    Query(query): Query<RoomQuery>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let session = Session::from_headers(&headers);
    let room = query.sala.unwrap_or_default();

    let link = match coordinator.prepare_relay(&room, &session.token) {
        Ok(link) => link,
        Err(e) => return session.attach(e.into_response()),
    };
    let Some(ws) = ws else {
        let refusal = (StatusCode::BAD_REQUEST, "expected a websocket upgrade");
        return session.attach(refusal.into_response());
    };

    let response = ws.on_upgrade(move |socket: WebSocket| async move {
        let (sink, stream) = socket.split();
        coordinator
            .run_relay(link, inbound_frames(stream), outbound_frames(sink))
            .await;
    });
    session.attach(response)
}

/// Text frames carry base64 payloads; other frames are ignored, close ends the stream.
fn inbound_frames(
    stream: SplitStream<WebSocket>,
) -> impl Stream<Item = Result<Payload, RelayError>> + Send + 'static {
    stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(decode_payload(&text).map_err(RelayError::from)),
                Ok(_) => None,
                Err(e) => Some(Err(RelayError::Transport(e.to_string()))),
            })
        })
}

fn outbound_frames(
    sink: SplitSink<WebSocket, Message>,
) -> impl Sink<Payload, Error = RelayError> + Send + 'static {
    sink.sink_map_err(|e| RelayError::Transport(e.to_string()))
        .with(|payload: Payload| {
            future::ready(Ok::<_, RelayError>(Message::Text(encode_payload(&payload))))
        })
}

async fn security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'; script-src 'self'"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=63072000;"),
    );
    response
}
