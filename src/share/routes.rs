//! Router and handlers for the share listener.
//!
//! Exactly two meaningful routes: `GET /` streams the archive, `GET /confirm`
//! records completion. Everything else is a plain-text 404.

use crate::archive::{build_share_archive, TempArchive};
use crate::configs::ConfigDescriptor;
use crate::share::session::{ConfirmAck, TransferSession};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::Stream;
use serde_json::json;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::io::ReaderStream;

pub const ARCHIVE_FILENAME: &str = "cursor-kit-configs.zip";

#[derive(Clone)]
pub struct ShareState {
    pub session: Arc<TransferSession>,
    pub selected: Arc<Vec<ConfigDescriptor>>,
}

impl ShareState {
    pub fn new(session: Arc<TransferSession>, selected: Vec<ConfigDescriptor>) -> Self {
        Self {
            session,
            selected: Arc::new(selected),
        }
    }
}

pub fn create_share_router(state: ShareState) -> Router {
    // Non-GET methods fall through to 404 as well: the wire contract knows
    // only these two GET routes.
    Router::new()
        .route("/", get(download_handler).fallback(not_found))
        .route("/confirm", get(confirm_handler).fallback(not_found))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Streams the share archive. The session transitions on connection, on the
/// body reaching EOF, and when the client drops the stream early.
async fn download_handler(State(state): State<ShareState>) -> Response {
    if state.session.connection_received().is_err() {
        return (
            StatusCode::CONFLICT,
            "A transfer is already awaiting confirmation",
        )
            .into_response();
    }

    let archive = match build_share_archive(&state.selected).await {
        Ok(archive) => archive,
        Err(err) => {
            tracing::error!("archive build failed: {err:#}");
            state.session.transfer_failed();
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to build share archive",
            )
                .into_response();
        }
    };

    let file = match tokio::fs::File::open(archive.path()).await {
        Ok(file) => file,
        Err(err) => {
            tracing::error!("failed to open built archive: {err}");
            state.session.transfer_failed();
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to open share archive",
            )
                .into_response();
        }
    };

    let stream = ArchiveStream::new(ReaderStream::new(file), state.session.clone(), archive);

    // No Content-Length: the body goes out chunked, straight from the stream.
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{ARCHIVE_FILENAME}\""),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Idempotent confirmation endpoint. Only the first call triggers teardown.
async fn confirm_handler(State(state): State<ShareState>) -> Response {
    match state.session.confirm_received() {
        ConfirmAck::Confirmed => Json(json!({ "status": "confirmed" })).into_response(),
        ConfirmAck::AlreadyConfirmed => {
            Json(json!({ "status": "already_confirmed" })).into_response()
        }
    }
}

/// Response body stream that owns the temp archive for the duration of the
/// response and reports how the stream ended to the session:
/// EOF → `stream_finished`, read error → `transfer_failed`,
/// dropped early → `client_disconnected`.
struct ArchiveStream {
    inner: ReaderStream<tokio::fs::File>,
    session: Arc<TransferSession>,
    // Keeps the temp file alive until the response is done.
    _archive: TempArchive,
    done: bool,
}

impl ArchiveStream {
    fn new(
        inner: ReaderStream<tokio::fs::File>,
        session: Arc<TransferSession>,
        archive: TempArchive,
    ) -> Self {
        Self {
            inner,
            session,
            _archive: archive,
            done: false,
        }
    }
}

impl Stream for ArchiveStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                this.session.transfer_failed();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if !this.done {
                    this.done = true;
                    this.session.stream_finished();
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ArchiveStream {
    fn drop(&mut self) {
        // Axum drops the body when the client goes away mid-response.
        if !self.done {
            self.session.client_disconnected();
        }
    }
}
