//! HTTP transport towards an MTConnect agent.
//!
//! `AgentTransport` is the seam between the protocol logic and the network:
//! the client only ever asks for one of the three endpoints with an optional
//! query, and gets the raw XML body back.

use crate::error::TransportError;
use reqwest::{Client, Url};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Probe,
    Current,
    Sample,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Probe => "probe",
            Endpoint::Current => "current",
            Endpoint::Sample => "sample",
        }
    }
}

pub trait AgentTransport: Send + Sync {
    /// GET `<base>/<endpoint>?<query>` et renvoie le corps XML
    fn get(
        &self,
        endpoint: Endpoint,
        query: &[(&'static str, u64)],
    ) -> impl Future<Output = Result<String, TransportError>> + Send;
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Délai max par requête ; `None` = comportement par défaut de reqwest (pas de limite)
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            user_agent: format!("mtconnect-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Self::with_config(base_url, HttpTransportConfig::default())
    }

    pub fn with_config(base_url: &str, config: HttpTransportConfig) -> Result<Self, TransportError> {
        // "http://agent:5000/VMC" + "probe" doit donner ".../VMC/probe", pas ".../probe"
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base = Url::parse(&normalized).map_err(|e| TransportError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let mut builder = Client::builder().user_agent(config.user_agent);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn endpoint_url(&self, endpoint: Endpoint) -> Result<Url, TransportError> {
        self.base.join(endpoint.path()).map_err(|e| TransportError::InvalidUrl {
            url: self.base.to_string(),
            reason: e.to_string(),
        })
    }
}

impl AgentTransport for HttpTransport {
    async fn get(&self, endpoint: Endpoint, query: &[(&'static str, u64)]) -> Result<String, TransportError> {
        let url = self.endpoint_url(endpoint)?;
        let mut request = self.client.get(url.clone());
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(%url, status = status.as_u16(), bytes = body.len(), "agent response");

        // Les agents renvoient leurs documents MTConnectError avec un statut 4xx
        if status.is_success() || (status.is_client_error() && !body.trim().is_empty()) {
            Ok(body)
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }
}

/// Transport scripté pour les tests unitaires (pas de réseau)
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedRequest {
        pub endpoint: Endpoint,
        pub query: Vec<(&'static str, u64)>,
    }

    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        responses: Arc<Mutex<VecDeque<Result<String, TransportError>>>>,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, body: impl Into<String>) -> &Self {
            self.responses.lock().unwrap().push_back(Ok(body.into()));
            self
        }

        pub fn fail(&self, status: u16) -> &Self {
            self.responses.lock().unwrap().push_back(Err(TransportError::Status {
                status,
                url: "scripted".into(),
            }));
            self
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn endpoints(&self) -> Vec<Endpoint> {
            self.requests().into_iter().map(|r| r.endpoint).collect()
        }
    }

    impl AgentTransport for ScriptedTransport {
        async fn get(&self, endpoint: Endpoint, query: &[(&'static str, u64)]) -> Result<String, TransportError> {
            self.requests.lock().unwrap().push(RecordedRequest {
                endpoint,
                query: query.to_vec(),
            });
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Status {
                    status: 503,
                    url: "script exhausted".into(),
                }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls_keep_device_path() {
        let transport = HttpTransport::new("http://agent.local:5000/VMC-3Axis").unwrap();
        assert_eq!(
            transport.endpoint_url(Endpoint::Probe).unwrap().as_str(),
            "http://agent.local:5000/VMC-3Axis/probe"
        );

        let transport = HttpTransport::new("http://agent.local:5000/").unwrap();
        assert_eq!(
            transport.endpoint_url(Endpoint::Sample).unwrap().as_str(),
            "http://agent.local:5000/sample"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpTransport::new("not a url"),
            Err(TransportError::InvalidUrl { .. })
        ));
    }
}
