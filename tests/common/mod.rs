//! Shared test utilities
//!
//! Each integration test binary compiles this module separately and uses a
//! subset of it.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use tower::ServiceExt;

use aura_relay::agent::{
    ChatError, ChatModel, KnowledgeRetriever, ModeController, ResponseGenerator,
};
use aura_relay::api::{self, ApiState};
use aura_relay::db::{
    self, ChannelRepo, ConnectedChannel, ConversationRepo, EmbeddingModel, IdentityRepo,
    KnowledgeRepo, MessageRepo, SettingsRepo, EMBEDDING_DIM,
};
use aura_relay::events::EventBus;
use aura_relay::platforms::{ClientFactory, Platform, PlatformClient, UserProfile};
use aura_relay::worker::ReplyWorker;
use aura_relay::Result;

/// Channel secret of the seeded LINE channel
pub const LINE_SECRET: &str = "line-channel-secret";

/// Bot account id of the seeded LINE channel
pub const LINE_DESTINATION: &str = "U-clinic-bot";

/// Token configured for the Facebook webhook handshake
pub const FB_VERIFY_TOKEN: &str = "fb-verify-token";

/// Vector shared by the scripted embedder and fixture knowledge entries,
/// so every fixture entry matches every query at similarity 1.0
#[must_use]
pub fn fixture_embedding() -> Vec<f32> {
    let mut v = vec![0.0; EMBEDDING_DIM];
    v[0] = 1.0;
    v
}

/// One recorded chat completion call
pub struct RecordedCall {
    pub model: String,
    pub system: String,
    pub user: String,
}

/// Chat double replaying one scripted outcome and recording every call
pub struct ScriptedChat {
    outcome: std::result::Result<String, ChatError>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedChat {
    #[must_use]
    pub fn new(outcome: std::result::Result<String, ChatError>) -> Self {
        Self { outcome, calls: Mutex::new(Vec::new()) }
    }

    /// Drain the recorded calls
    pub fn calls(&self) -> Vec<RecordedCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ChatError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            system: system_prompt.to_string(),
            user: user_prompt.to_string(),
        });
        self.outcome.clone()
    }
}

/// Embedding double returning the fixture vector for every text
pub struct ScriptedEmbedder;

#[async_trait]
impl EmbeddingModel for ScriptedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(fixture_embedding())
    }
}

/// Outbound double recording platform pushes instead of calling the network
#[derive(Default)]
pub struct RecordingClient {
    /// (recipient id, text) pairs in send order
    pub sent: Mutex<Vec<(String, String)>>,
    /// Profile served to first-contact enrichment; `None` forces placeholders
    pub profile: Mutex<Option<UserProfile>>,
}

#[async_trait]
impl PlatformClient for RecordingClient {
    fn platform(&self) -> Platform {
        Platform::Line
    }

    async fn send_text(&self, recipient_id: &str, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((recipient_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn fetch_profile(&self, _platform_user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.profile.lock().unwrap().clone())
    }
}

/// Factory handing out the shared recording client for every channel
pub struct RecordingFactory {
    pub client: Arc<RecordingClient>,
}

impl ClientFactory for RecordingFactory {
    fn client_for(&self, _platform: Platform, _access_token: &str) -> Arc<dyn PlatformClient> {
        self.client.clone()
    }
}

/// Fully wired application over an in-memory database
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<ApiState>,
    /// Held unspawned so tests drain jobs deterministically
    pub worker: ReplyWorker,
    pub chat: Arc<ScriptedChat>,
    pub outbound: Arc<RecordingClient>,
    pub channel: ConnectedChannel,
}

/// App with scripted model backends and one seeded LINE channel
#[must_use]
pub fn setup_app(reply: std::result::Result<String, ChatError>) -> TestApp {
    build_app(true, reply)
}

/// App without model backends; generation and embedding are unconfigured
#[must_use]
pub fn setup_app_without_models() -> TestApp {
    build_app(false, Ok(String::new()))
}

fn build_app(models: bool, reply: std::result::Result<String, ChatError>) -> TestApp {
    let pool = db::init_memory().expect("failed to init test db");

    let channels = ChannelRepo::new(pool.clone());
    let channel = channels
        .create(
            Platform::Line,
            Some("Clinic LINE"),
            LINE_DESTINATION,
            "line-token",
            Some(LINE_SECRET),
        )
        .expect("failed to seed channel");

    let identities = IdentityRepo::new(pool.clone());
    let conversations = ConversationRepo::new(pool.clone());
    let messages = MessageRepo::new(pool.clone());
    let knowledge = KnowledgeRepo::new(pool.clone());
    let settings = SettingsRepo::new(pool.clone());

    let bus = EventBus::new();
    let chat = Arc::new(ScriptedChat::new(reply));
    let outbound = Arc::new(RecordingClient::default());
    let clients: Arc<dyn ClientFactory> =
        Arc::new(RecordingFactory { client: outbound.clone() });
    let embedder: Option<Arc<dyn EmbeddingModel>> =
        models.then(|| Arc::new(ScriptedEmbedder) as Arc<dyn EmbeddingModel>);

    let generator = ResponseGenerator::new(
        messages.clone(),
        KnowledgeRetriever::new(knowledge.clone(), embedder.clone()),
        models.then(|| chat.clone() as Arc<dyn ChatModel>),
        "gpt-4o-mini".to_string(),
        Some("ft:gpt-4o-mini:clinic".to_string()),
    );

    let (queue, worker) = ReplyWorker::new(
        conversations.clone(),
        channels.clone(),
        messages.clone(),
        settings.clone(),
        generator,
        bus.clone(),
        clients.clone(),
    );
    let modes = ModeController::new(conversations.clone(), bus.clone());

    let state = Arc::new(ApiState {
        db: pool,
        channels,
        identities,
        conversations,
        messages,
        knowledge,
        settings,
        bus,
        queue,
        modes,
        clients,
        embedder,
        chat_configured: models,
        facebook_verify_token: Some(FB_VERIFY_TOKEN.to_string()),
    });

    TestApp {
        router: api::router(state.clone()),
        state,
        worker,
        chat,
        outbound,
        channel,
    }
}

/// Drive one request through the router
pub async fn request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<&serde_json::Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(json).expect("serialize request body"))
        }
        None => Body::empty(),
    };

    router
        .clone()
        .oneshot(builder.body(body).expect("build request"))
        .await
        .expect("route request")
}

/// Read a response body as JSON
pub async fn response_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is JSON")
}
