//! Client event stream
//!
//! Each open stream counts as a connected client of the registration, so a
//! waiting version activates once the last stream closes.

use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use strata_core::{ClientHandle, ClientMessage};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::state::AppState;

/// Relay messages for one client; dropping it disconnects the client
struct ClientStream {
    inner: BroadcastStream<ClientMessage>,
    _client: ClientHandle,
}

impl Stream for ClientStream {
    type Item = Result<ClientMessage, BroadcastStreamRecvError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

fn to_event(message: Result<ClientMessage, BroadcastStreamRecvError>) -> Option<Result<Event, Infallible>> {
    match message {
        Ok(message) => match Event::default().json_data(&message) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("Failed to encode client message: {}", e);
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!("Client event stream lagged, {} messages skipped", skipped);
            None
        }
    }
}

/// GET /__strata/events
async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let client = state.registration.connect_client();
    debug!("Client {} subscribed to events", client.id());

    let stream = ClientStream {
        inner: BroadcastStream::new(state.registration.relay().subscribe()),
        _client: client,
    };

    Sse::new(stream.filter_map(to_event)).keep_alive(KeepAlive::default())
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/__strata/events", get(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing::harness;

    #[tokio::test]
    async fn test_stream_counts_as_connected_client() {
        let harness = harness().await;
        let registration = harness.state.registration.clone();

        let mut stream = ClientStream {
            inner: BroadcastStream::new(registration.relay().subscribe()),
            _client: registration.connect_client(),
        };
        assert_eq!(registration.client_count(), 1);

        registration.relay().sync("tasks");
        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(
            message,
            ClientMessage::SyncCompleted {
                tag: "tasks".to_string()
            }
        );

        drop(stream);
        assert_eq!(registration.client_count(), 0);
    }
}
