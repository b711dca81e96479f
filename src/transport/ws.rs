//! WebSocket transport

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{Channel, Connector, Credentials, OUTBOUND_CAPACITY, TransportEvent, exchange_token};
use crate::config::ConnectionConfig;
use crate::{Error, Result};

/// Capacity of the inbound event queue
const INBOUND_CAPACITY: usize = 256;

/// Opens WebSocket channels to the agent endpoint
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    http: reqwest::Client,
}

impl WsConnector {
    /// Create a connector with a fresh HTTP client for token exchange
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Query parameter carrying the credential
enum Auth {
    None,
    ApiKey(String),
    AccessToken(String),
}

/// Build the endpoint URL with auth and config query parameters
fn build_url(config: &ConnectionConfig, auth: &Auth) -> Result<url::Url> {
    let mut url = url::Url::parse(&config.endpoint)
        .map_err(|e| Error::Config(format!("invalid endpoint: {e}")))?;

    {
        let mut query = url.query_pairs_mut();
        match auth {
            Auth::None => {}
            Auth::ApiKey(key) => {
                query.append_pair("api_key", key);
            }
            Auth::AccessToken(token) => {
                query.append_pair("access_token", token);
            }
        }
        if let Some(config_id) = &config.config_id {
            query.append_pair("config_id", config_id);
        }
    }

    // Drop a dangling `?` when nothing was appended
    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url)
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Channel> {
        let auth = match &config.credentials {
            Credentials::None => Auth::None,
            Credentials::ApiKey(key) => Auth::ApiKey(key.clone()),
            Credentials::ClientCredentials {
                api_key,
                secret_key,
            } => Auth::AccessToken(
                exchange_token(&self.http, &config.token_url, api_key, secret_key).await?,
            ),
        };

        let url = build_url(config, &auth)?;
        tracing::debug!(
            host = url.host_str().unwrap_or_default(),
            config_id = ?config.config_id,
            "opening agent channel"
        );

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(INBOUND_CAPACITY);

        // Writer: exits once every sender is dropped, then closes the socket
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(error = %e, "websocket write failed");
                    return;
                }
            }
            let _ = sink.close().await;
            tracing::trace!("websocket writer finished");
        });

        let reader = tokio::spawn(async move {
            if in_tx.send(TransportEvent::Opened).await.is_err() {
                return;
            }
            loop {
                let event = match stream.next().await {
                    Some(Ok(Message::Text(text))) => TransportEvent::Message(text),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((None, String::new()), |f| {
                            (Some(u16::from(f.code)), f.reason.to_string())
                        });
                        let _ = in_tx.send(TransportEvent::Closed { code, reason }).await;
                        return;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::debug!(len = data.len(), "ignoring binary frame");
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                    None => {
                        let _ = in_tx
                            .send(TransportEvent::Closed {
                                code: None,
                                reason: String::new(),
                            })
                            .await;
                        return;
                    }
                };

                if in_tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        tracing::info!("agent channel open");
        Ok(Channel::new(out_tx, in_rx, Some(reader)))
    }
}
