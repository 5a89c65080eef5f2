//! Observed HTTP client.
//!
//! # Responsibilities
//! - Wrap every outbound call in one `Client` observation
//! - Send the headers the handlers injected (traceparent) with the request
//! - Close with `error` on transport failures and non-success statuses
//! - Close as `Cancelled` when the caller drops the call future

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::config::ClientConfig;
use crate::http::{InFlight, Outcome, CLIENT_REQUESTS};
use crate::observation::{Observation, ObservationCause, ObservationKind, ObservationRegistry};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// `reqwest` client whose calls are observations.
#[derive(Clone)]
pub struct ObservedClient {
    client: Client,
    observations: Arc<ObservationRegistry>,
    client_name: Option<String>,
}

impl ObservedClient {
    pub fn new(config: &ClientConfig, observations: Arc<ObservationRegistry>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .no_proxy()
            .build()?;
        let client_name = Some(config.client_name.clone()).filter(|name| !name.is_empty());
        Ok(Self {
            client,
            observations,
            client_name,
        })
    }

    /// GET `url` and return the body text.
    pub async fn get_text(&self, url: &str) -> Result<String, ClientError> {
        let url = Url::parse(url)?;
        let client_name = self
            .client_name
            .clone()
            .or_else(|| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "none".to_string());

        let observation = Observation::new(CLIENT_REQUESTS, ObservationKind::Client)
            .with_contextual_name("GET")
            .with_low_cardinality("method", "GET")
            .with_low_cardinality("uri", url.path())
            .with_low_cardinality("client.name", client_name)
            .with_high_cardinality("http.url", url.as_str());

        let mut in_flight = InFlight::start(&self.observations, observation);

        let headers = in_flight.observation().carrier().clone();
        tracing::debug!(url = %url, "Sending request");
        let result = async {
            let response = self.client.get(url.clone()).headers(headers).send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        }
        .await;

        match result {
            Ok((status, body)) => {
                let observation = in_flight.observation_mut();
                observation.add_low_cardinality("status", status.as_str());
                observation.add_low_cardinality("outcome", Outcome::from(status).as_str());

                if status.is_success() {
                    in_flight.close(None);
                    Ok(body)
                } else {
                    in_flight.close(Some(ObservationCause::new("HttpStatus", status.to_string())));
                    Err(ClientError::Status {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
            Err(e) => {
                let observation = in_flight.observation_mut();
                observation.add_low_cardinality("status", "CLIENT_ERROR");
                observation.add_low_cardinality("outcome", Outcome::Unknown.as_str());
                in_flight.close(Some(ObservationCause::from_error(transport_kind(&e), &e)));
                Err(e.into())
            }
        }
    }
}

fn transport_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "Timeout"
    } else if e.is_connect() {
        "Connect"
    } else if e.is_decode() || e.is_body() {
        "Body"
    } else {
        "Transport"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{MeterHandler, MeterId, MeterRegistry, MeterType};
    use crate::observation::HandlerGroup;

    #[tokio::test]
    async fn test_connection_refused_is_observed_as_error() {
        let meters = Arc::new(MeterRegistry::new());
        let mut registry = ObservationRegistry::new();
        registry.register(HandlerGroup::single(Arc::new(MeterHandler::new(meters.clone()))));

        let config = ClientConfig {
            timeout_secs: 2,
            client_name: "test".into(),
            ..ClientConfig::default()
        };
        let client = ObservedClient::new(&config, Arc::new(registry)).unwrap();

        // Bind then drop to get a port with no listener.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = client
            .get_text(&format!("http://127.0.0.1:{}/foo", port))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));

        let id = MeterId::new(
            CLIENT_REQUESTS,
            [
                ("client.name", "test"),
                ("error", "Connect"),
                ("method", "GET"),
                ("outcome", "UNKNOWN"),
                ("status", "CLIENT_ERROR"),
                ("uri", "/foo"),
            ]
            .into_iter()
            .collect(),
            MeterType::Timer,
        );
        assert!(meters.get(&id).is_some(), "meters: {:?}", meters.meters());
    }

    #[tokio::test]
    async fn test_cancelled_call_releases_active_task() {
        let meters = Arc::new(MeterRegistry::new());
        let mut registry = ObservationRegistry::new();
        registry.register(HandlerGroup::single(Arc::new(MeterHandler::new(meters.clone()))));
        let config = ClientConfig {
            client_name: "test".into(),
            ..ClientConfig::default()
        };
        let client = ObservedClient::new(&config, Arc::new(registry)).unwrap();

        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let url = format!("http://{}/foo", addr);
        let call = client.get_text(&url);
        assert!(tokio::time::timeout(Duration::from_millis(200), call).await.is_err());

        let tags = [
            ("client.name", "test"),
            ("error", crate::http::CANCELLED),
            ("method", "GET"),
            ("outcome", "UNKNOWN"),
            ("uri", "/foo"),
        ]
        .into_iter()
        .collect();
        assert_eq!(meters.timer(CLIENT_REQUESTS, tags).unwrap().count(), 1);

        let active_tags = [("client.name", "test"), ("method", "GET"), ("uri", "/foo")]
            .into_iter()
            .collect();
        let active = meters
            .long_task_timer("http.client.requests.active", active_tags)
            .unwrap();
        assert_eq!(active.active_tasks(), 0);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let client = ObservedClient::new(&ClientConfig::default(), Arc::new(ObservationRegistry::noop())).unwrap();
        assert!(matches!(client.get_text("not a url").await, Err(ClientError::Url(_))));
    }
}
