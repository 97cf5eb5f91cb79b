//! Hub link over WebSocket using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gamelink_domain::{Message, ServerId};
use gamelink_shared::{
    protocol::{HUB_PATH, SERVER_ID_PARAM},
    HubFrame,
};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    self, client::IntoClientRequest, http::HeaderValue, http::StatusCode, Message as WsMessage,
};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::ports::{HubConnector, HubLink, HubReceiver, HubSender, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Derive the hub URL (`ws://…/hub?serverId=…`) from the Engine's base URL.
pub fn hub_url(engine_url: &Url, server_id: ServerId) -> Result<Url, TransportError> {
    let mut url = engine_url
        .join(HUB_PATH)
        .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidEndpoint(format!("cannot use scheme {scheme}")))?;
    url.query_pairs_mut()
        .clear()
        .append_pair(SERVER_ID_PARAM, &server_id.to_string());
    Ok(url)
}

pub struct WsHubConnector {
    url: Url,
}

impl WsHubConnector {
    pub fn new(engine_url: &Url, server_id: ServerId) -> Result<Self, TransportError> {
        Ok(Self {
            url: hub_url(engine_url, server_id)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl HubConnector for WsHubConnector {
    async fn connect(&self, bearer_token: &str) -> Result<HubLink, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {bearer_token}"))
            .map_err(|e| TransportError::Authentication(e.to_string()))?;
        request
            .headers_mut()
            .insert(tungstenite::http::header::AUTHORIZATION, bearer);

        let (stream, _) = connect_async(request).await.map_err(|e| match e {
            tungstenite::Error::Http(response)
                if response.status() == StatusCode::UNAUTHORIZED =>
            {
                TransportError::Authentication("hub rejected bearer token".to_string())
            }
            other => TransportError::Connect(other.to_string()),
        })?;

        tracing::info!(url = %self.url, "Connected to Engine hub");
        let (sink, stream) = stream.split();
        Ok((
            Box::new(WsHubSender { sink }),
            Box::new(WsHubReceiver { stream }),
        ))
    }
}

struct WsHubSender {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl HubSender for WsHubSender {
    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let text = HubFrame::PublishEvent(message.clone())
            .encode()
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.sink
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            tracing::debug!(error = %e, "Error while closing hub link");
        }
    }
}

struct WsHubReceiver {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl HubReceiver for WsHubReceiver {
    async fn recv(&mut self) -> Option<Result<Message, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => match HubFrame::decode(&text) {
                    Ok(HubFrame::ReceiveEvent(message)) => return Some(Ok(message)),
                    Ok(HubFrame::PublishEvent(message)) => {
                        tracing::warn!(
                            message_type = %message.message_type(),
                            "Engine sent a client-to-server frame, ignoring"
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to parse hub frame"),
                },
                Ok(WsMessage::Close(_)) => {
                    tracing::info!("Engine closed the hub link");
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }
}
