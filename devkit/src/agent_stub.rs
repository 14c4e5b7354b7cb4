/*!
Mock MTConnect Agent pour tests sans machine réelle

Serveur HTTP local (port éphémère) qui répond aux requêtes `probe`, `current`
et `sample` avec des documents scriptés, et enregistre chaque requête reçue.

FONCTIONNEMENT :
- une file de réponses par endpoint, consommée dans l'ordre
- file vide → la dernière réponse servie est rejouée (agent "figé")
- aucune réponse jamais scriptée → HTTP 503 sans corps
- accepte `/probe` comme `/<device>/probe` : le segment device est enregistré
*/

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentEndpoint {
    Probe,
    Current,
    Sample,
}

impl AgentEndpoint {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "probe" => Some(Self::Probe),
            "current" => Some(Self::Current),
            "sample" => Some(Self::Sample),
            _ => None,
        }
    }
}

/// Requête reçue par l'agent simulé
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub endpoint: AgentEndpoint,
    pub device: Option<String>,
    pub query: HashMap<String, String>,
}

impl AgentRequest {
    /// Paramètre numérique de la query (`from`, `count`...)
    pub fn query_u64(&self, key: &str) -> Option<u64> {
        self.query.get(key).and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Clone)]
struct ScriptedResponse {
    status: StatusCode,
    body: String,
}

#[derive(Default)]
struct Script {
    queues: HashMap<AgentEndpoint, VecDeque<ScriptedResponse>>,
    last_served: HashMap<AgentEndpoint, ScriptedResponse>,
    requests: Vec<AgentRequest>,
}

impl Script {
    fn next_response(&mut self, endpoint: AgentEndpoint) -> Option<ScriptedResponse> {
        match self.queues.get_mut(&endpoint).and_then(VecDeque::pop_front) {
            Some(response) => {
                self.last_served.insert(endpoint, response.clone());
                Some(response)
            }
            None => self.last_served.get(&endpoint).cloned(),
        }
    }
}

type SharedScript = Arc<Mutex<Script>>;

/// Agent MTConnect simulé ; le serveur est arrêté au drop
pub struct MockAgent {
    addr: SocketAddr,
    script: SharedScript,
    server: JoinHandle<()>,
}

impl MockAgent {
    /// Démarre le serveur sur 127.0.0.1 avec un port choisi par l'OS
    pub async fn start() -> Result<Self> {
        let script = SharedScript::default();
        let app = Router::new().fallback(serve_document).with_state(script.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ [MOCK AGENT] server stopped: {}", e);
            }
        });

        log::info!("🏭 [MOCK AGENT] listening on http://{}", addr);
        Ok(Self { addr, script, server })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL d'un device : `http://127.0.0.1:port/<device>`
    pub fn device_url(&self, device: &str) -> String {
        format!("http://{}/{}", self.addr, device)
    }

    pub fn push_probe(&self, body: impl Into<String>) -> &Self {
        self.push_response(AgentEndpoint::Probe, 200, body)
    }

    pub fn push_current(&self, body: impl Into<String>) -> &Self {
        self.push_response(AgentEndpoint::Current, 200, body)
    }

    pub fn push_sample(&self, body: impl Into<String>) -> &Self {
        self.push_response(AgentEndpoint::Sample, 200, body)
    }

    /// Réponse avec un statut HTTP arbitraire (ex: 500 vide, 400 + MTConnectError)
    pub fn push_response(&self, endpoint: AgentEndpoint, status: u16, body: impl Into<String>) -> &Self {
        let response = ScriptedResponse {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: body.into(),
        };
        self.script
            .lock()
            .unwrap()
            .queues
            .entry(endpoint)
            .or_default()
            .push_back(response);
        self
    }

    /// Toutes les requêtes reçues, dans l'ordre d'arrivée
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.script.lock().unwrap().requests.clone()
    }

    pub fn requests_for(&self, endpoint: AgentEndpoint) -> Vec<AgentRequest> {
        self.requests().into_iter().filter(|r| r.endpoint == endpoint).collect()
    }

    pub fn endpoints(&self) -> Vec<AgentEndpoint> {
        self.requests().into_iter().map(|r| r.endpoint).collect()
    }

    /// Réponses encore en file pour un endpoint
    pub fn pending(&self, endpoint: AgentEndpoint) -> usize {
        self.script
            .lock()
            .unwrap()
            .queues
            .get(&endpoint)
            .map_or(0, VecDeque::len)
    }

    pub fn clear_requests(&self) {
        self.script.lock().unwrap().requests.clear();
    }

    pub fn shutdown(&self) {
        self.server.abort();
    }
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve_document(
    State(script): State<SharedScript>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
) -> Response {
    let segments: Vec<&str> = uri.path().split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, prefix)) = segments.split_last() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(endpoint) = AgentEndpoint::from_segment(last) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let request = AgentRequest {
        endpoint,
        device: prefix.last().map(|d| d.to_string()),
        query,
    };
    log::debug!("📥 [MOCK AGENT] {:?} device={:?} query={:?}", endpoint, request.device, request.query);

    let response = {
        let mut script = script.lock().unwrap();
        script.requests.push(request);
        script.next_response(endpoint)
    };

    match response {
        Some(r) => (r.status, [(header::CONTENT_TYPE, "text/xml")], r.body).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
