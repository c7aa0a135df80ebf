//! Server-Sent Events support

use crate::session::SessionView;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

/// Stream session snapshots, starting with the current one.
///
/// Intermediate snapshots may be skipped when the client is slow; each event
/// carries the whole view so nothing is lost by skipping.
pub fn sse_stream(
    view_rx: watch::Receiver<SessionView>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let views = WatchStream::new(view_rx).map(|view| Ok(view_to_event(&view)));

    Sse::new(views).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn view_to_event(view: &SessionView) -> Event {
    match serde_json::to_string(view) {
        Ok(data) => Event::default().event("session").data(data),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize session view");
            Event::default().event("error").data(e.to_string())
        }
    }
}
