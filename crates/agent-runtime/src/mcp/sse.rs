//! SSE transport: server-to-client events on a long-lived GET stream,
//! client-to-server messages POSTed to the endpoint the server announces.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Url};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource, retry};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{McpError, Transport};

const INBOUND_BUFFER: usize = 64;

pub struct SseTransport {
    client: Client,
    endpoint: Url,
    reader: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the server's `endpoint` event
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<Value>), McpError> {
        let base = Url::parse(url)
            .map_err(|e| McpError::Connect(format!("invalid server URL '{url}': {e}")))?;
        let client = Client::new();

        let mut events = EventSource::new(client.get(base.clone()))
            .map_err(|e| McpError::Connect(e.to_string()))?;
        events.set_retry_policy(Box::new(retry::Never));

        let endpoint = tokio::time::timeout(connect_timeout, wait_for_endpoint(&mut events, &base))
            .await
            .map_err(|_| {
                McpError::Connect(format!(
                    "no endpoint event from {url} within {}s",
                    connect_timeout.as_secs()
                ))
            })??;
        debug!(endpoint = %endpoint, "SSE message endpoint announced");

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let reader = tokio::spawn(read_events(events, tx));

        Ok((
            Self {
                client,
                endpoint,
                reader,
            },
            rx,
        ))
    }
}

/// Consume events up to the `endpoint` announcement and resolve it against
/// `base`. Anything earlier is skipped.
async fn wait_for_endpoint<S>(events: &mut S, base: &Url) -> Result<Url, McpError>
where
    S: Stream<Item = Result<Event, EventSourceError>> + Unpin,
{
    while let Some(event) = events.next().await {
        match event {
            Ok(Event::Open) => debug!("SSE stream opened"),
            Ok(Event::Message(message)) if message.event == "endpoint" => {
                return base.join(message.data.trim()).map_err(|e| {
                    McpError::Protocol(format!("invalid endpoint '{}': {e}", message.data))
                });
            }
            Ok(Event::Message(message)) => {
                debug!(event = %message.event, "Ignoring SSE event before endpoint");
            }
            Err(e) => return Err(McpError::Connect(e.to_string())),
        }
    }
    Err(McpError::Connect("event stream closed before endpoint was announced".into()))
}

/// Forward the JSON body of every `message` event until the stream ends or
/// the receiver goes away
async fn read_events<S>(mut events: S, tx: mpsc::Sender<Value>)
where
    S: Stream<Item = Result<Event, EventSourceError>> + Unpin,
{
    while let Some(event) = events.next().await {
        match event {
            Ok(Event::Open) => {}
            Ok(Event::Message(message)) if message.event == "message" => {
                match serde_json::from_str::<Value>(&message.data) {
                    Ok(value) => {
                        if tx.send(value).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Discarding malformed SSE message"),
                }
            }
            Ok(Event::Message(message)) => {
                debug!(event = %message.event, "Ignoring SSE event");
            }
            Err(EventSourceError::StreamEnded) => {
                debug!("SSE stream ended");
                break;
            }
            Err(e) => {
                warn!(error = %e, "SSE stream failed");
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: &Value) -> Result<(), McpError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let endpoint = &self.endpoint;
            return Err(McpError::Transport(format!(
                "POST {endpoint} returned {status}: {body}"
            )));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), McpError> {
        self.reader.abort();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
