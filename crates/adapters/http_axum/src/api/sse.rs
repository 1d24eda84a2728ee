//! Server-Sent Events stream of sync frames.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

use crate::state::AppState;

/// `GET /events` — one JSON-encoded [`SyncFrame`] per `data:` line.
///
/// A subscriber that falls behind loses frames. It notices through the gap
/// in `counter` and re-pulls the snapshots. The stream ends when the hub
/// shuts down.
///
/// [`SyncFrame`]: hearth_domain::sync::SyncFrame
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let frames = BroadcastStream::new(state.hub.subscribe()).filter_map(|result| match result {
        Ok(frame) => match serde_json::to_string(&frame) {
            Ok(json) => Some(Some(Event::default().data(json))),
            Err(err) => {
                tracing::warn!(%err, "failed to serialize sync frame");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            tracing::warn!(skipped = n, "SSE subscriber lagged, frames were dropped");
            None
        }
    });
    let stop = WatchStream::new(state.hub.stop_signal())
        .filter(|stopped| *stopped)
        .map(|_| None);
    let stream = frames.merge(stop).map_while(|event| event.map(Ok));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::api::testing;

    #[tokio::test]
    async fn should_stream_update_frame() {
        let hub = testing::hub().await;
        let resp = testing::app(&hub)
            .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");

        hub.write(&"test:lamp".parse().unwrap(), "on", json!(true))
            .await
            .unwrap();
        hub.drain().await;

        let mut body = resp.into_body();
        let frame = tokio::time::timeout(Duration::from_secs(1), body.frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        let data = text.strip_prefix("data: ").unwrap().trim_end();
        let frame: serde_json::Value = serde_json::from_str(data).unwrap();

        assert_eq!(frame["action"], "update");
        assert_eq!(frame["id"], "test:lamp");
        assert_eq!(frame["key"], "on");
        assert_eq!(frame["value"], true);
        assert_eq!(frame["oldValue"], false);
        assert_eq!(frame["counter"], hub.sync().cursor().counter);
    }
}
