//! Decides which client to call and keeps at most one request in flight per kind.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::{
    Config,
    client::{
        ChatProvider, ServiceId, WeatherProvider, chat_client_from_config,
        weather_client_from_config,
    },
    error::ClientError,
    model::WeatherQuery,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Chat,
    Weather,
}

/// Identifies one dispatched request. Later requests get larger tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("request {0} was superseded by a newer one")]
    Superseded(RequestToken),

    #[error("no client configured for {0:?} requests")]
    Unavailable(RequestKind),
}

impl DispatchError {
    pub fn title(&self) -> &'static str {
        match self {
            DispatchError::Client(err) => err.title(),
            DispatchError::Superseded(_) => "SUPERSEDED",
            DispatchError::Unavailable(_) => "UNAVAILABLE",
        }
    }
}

struct InFlight {
    token: RequestToken,
    abort: AbortHandle,
}

/// Unregisters a request when its caller finishes or goes away. A caller
/// that is dropped mid-request also cancels the spawned task.
struct InFlightGuard<'a> {
    orchestrator: &'a Orchestrator,
    kind: RequestKind,
    token: RequestToken,
    abort: AbortHandle,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.abort.abort();

        let mut inflight = self.orchestrator.lock_inflight();
        if inflight.get(&self.kind).is_some_and(|f| f.token == self.token) {
            inflight.remove(&self.kind);
        }
    }
}

pub struct Orchestrator {
    chat: Option<Arc<dyn ChatProvider>>,
    weather: Arc<dyn WeatherProvider>,
    location: WeatherQuery,
    inflight: Mutex<HashMap<RequestKind, InFlight>>,
    next_token: AtomicU64,
}

impl Orchestrator {
    pub fn new(weather: Arc<dyn WeatherProvider>, location: WeatherQuery) -> Self {
        Self {
            chat: None,
            weather,
            location,
            inflight: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatProvider>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn location(&self) -> &WeatherQuery {
        &self.location
    }

    /// Answer a question. The question itself is not used: the answer is the
    /// current weather condition at the configured location.
    pub async fn ask(&self, question: &str) -> Result<String, DispatchError> {
        debug!(question, "question received, answering with current weather");
        self.weather_at(self.location.clone()).await
    }

    pub async fn weather_at(&self, query: WeatherQuery) -> Result<String, DispatchError> {
        let weather = Arc::clone(&self.weather);
        self.dispatch(RequestKind::Weather, async move {
            weather.current_condition(&query).await
        })
        .await
    }

    pub async fn chat(&self, message: &str) -> Result<String, DispatchError> {
        let chat = self
            .chat
            .clone()
            .ok_or(DispatchError::Unavailable(RequestKind::Chat))?;
        let message = message.to_owned();
        self.dispatch(RequestKind::Chat, async move { chat.complete(&message).await })
            .await
    }

    pub fn in_flight(&self, kind: RequestKind) -> bool {
        self.lock_inflight().contains_key(&kind)
    }

    async fn dispatch<F>(&self, kind: RequestKind, request: F) -> Result<String, DispatchError>
    where
        F: Future<Output = Result<String, ClientError>> + Send + 'static,
    {
        // Token, spawn and registration happen under one lock so that a larger
        // token always supersedes a smaller one.
        let (handle, guard) = {
            let mut inflight = self.lock_inflight();
            let token = RequestToken(self.next_token.fetch_add(1, Ordering::Relaxed));
            let handle = tokio::spawn(request);
            let abort = handle.abort_handle();
            let entry = InFlight {
                token,
                abort: abort.clone(),
            };
            if let Some(previous) = inflight.insert(kind, entry) {
                debug!(?kind, old = %previous.token, new = %token, "superseding in-flight request");
                previous.abort.abort();
            }
            let guard = InFlightGuard {
                orchestrator: self,
                kind,
                token,
                abort,
            };
            (handle, guard)
        };

        let token = guard.token;
        let outcome = handle.await;
        drop(guard);

        match outcome {
            Ok(result) => result.map_err(DispatchError::Client),
            Err(err) if err.is_cancelled() => Err(DispatchError::Superseded(token)),
            Err(err) => {
                warn!(?kind, %token, error = %err, "request task panicked");
                Err(DispatchError::Client(ClientError::Unknown))
            }
        }
    }

    fn lock_inflight(&self) -> MutexGuard<'_, HashMap<RequestKind, InFlight>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Build an orchestrator for the configured location. Weather credentials are
/// required; the chat client is attached only when its key is configured.
pub fn orchestrator_from_config(config: &Config) -> anyhow::Result<Orchestrator> {
    let http = reqwest::Client::new();

    let weather = weather_client_from_config(config, http.clone())?;
    let mut orchestrator = Orchestrator::new(Arc::new(weather), config.location.clone());

    if config.is_service_configured(ServiceId::OpenAi) {
        let chat = chat_client_from_config(config, http)?;
        orchestrator = orchestrator.with_chat(Arc::new(chat));
    } else {
        debug!("no chat credentials configured, chat requests are unavailable");
    }

    Ok(orchestrator)
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("chat", &self.chat)
            .field("weather", &self.weather)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientErrorKind, InvalidReason};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// First call never finishes; later calls answer straight away.
    #[derive(Debug, Default)]
    struct StallsOnce {
        calls: AtomicUsize,
        seen: Mutex<Vec<WeatherQuery>>,
    }

    impl StallsOnce {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WeatherProvider for StallsOnce {
        async fn current_condition(&self, query: &WeatherQuery) -> Result<String, ClientError> {
            self.seen.lock().unwrap().push(query.clone());
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            Ok("Clear".to_string())
        }
    }

    #[async_trait]
    impl ChatProvider for StallsOnce {
        async fn complete(&self, content: &str) -> Result<String, ClientError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            Ok(format!("echo: {content}"))
        }
    }

    #[derive(Debug)]
    struct Fixed(Result<&'static str, InvalidReason>);

    #[async_trait]
    impl WeatherProvider for Fixed {
        async fn current_condition(&self, _query: &WeatherQuery) -> Result<String, ClientError> {
            self.0.map(str::to_string).map_err(ClientError::InvalidResponse)
        }
    }

    #[async_trait]
    impl ChatProvider for Fixed {
        async fn complete(&self, _content: &str) -> Result<String, ClientError> {
            self.0.map(str::to_string).map_err(ClientError::InvalidResponse)
        }
    }

    #[derive(Debug)]
    struct Panics;

    #[async_trait]
    impl WeatherProvider for Panics {
        async fn current_condition(&self, _query: &WeatherQuery) -> Result<String, ClientError> {
            panic!("provider blew up");
        }
    }

    async fn wait_for_calls(provider: &StallsOnce, n: usize) {
        while provider.calls() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn ask_ignores_question_and_uses_configured_location() {
        let weather = Arc::new(StallsOnce::default());
        weather.calls.store(1, Ordering::SeqCst);
        let location = WeatherQuery::new("10", "20");
        let orch = Orchestrator::new(weather.clone(), location.clone());

        let answer = orch.ask("what is the meaning of life?").await.unwrap();

        assert_eq!(answer, "Clear");
        assert_eq!(*weather.seen.lock().unwrap(), vec![location]);
        assert!(!orch.in_flight(RequestKind::Weather));
    }

    #[tokio::test]
    async fn client_errors_are_forwarded() {
        let weather = Arc::new(Fixed(Err(InvalidReason::Status(500))));
        let orch = Orchestrator::new(weather, WeatherQuery::default())
            .with_chat(Arc::new(Fixed(Err(InvalidReason::NoChoices))));

        let err = orch.ask("q").await.unwrap_err();
        assert_eq!(err.title(), "INVALID");
        assert!(matches!(err, DispatchError::Client(ref e) if e.status() == Some(500)));

        let err = orch.chat("hello").await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Client(ClientError::InvalidResponse(InvalidReason::NoChoices))
        ));
    }

    #[tokio::test]
    async fn newer_request_supersedes_older_of_same_kind() {
        let weather = Arc::new(StallsOnce::default());
        let orch = Arc::new(Orchestrator::new(weather.clone(), WeatherQuery::default()));

        let first = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.ask("first").await })
        };
        wait_for_calls(&weather, 1).await;
        assert!(orch.in_flight(RequestKind::Weather));

        let second = orch.ask("second").await.unwrap();
        assert_eq!(second, "Clear");

        let first = first.await.unwrap();
        assert!(matches!(first, Err(DispatchError::Superseded(_))));
        assert_eq!(first.unwrap_err().title(), "SUPERSEDED");
        assert!(!orch.in_flight(RequestKind::Weather));
    }

    #[tokio::test]
    async fn different_kinds_do_not_interfere() {
        let chat = Arc::new(StallsOnce::default());
        chat.calls.store(1, Ordering::SeqCst);
        let weather = Arc::new(StallsOnce::default());
        let orch =
            Arc::new(Orchestrator::new(weather.clone(), WeatherQuery::default()).with_chat(chat));

        let pending_weather = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.ask("q").await })
        };
        wait_for_calls(&weather, 1).await;

        let reply = orch.chat("hi").await.unwrap();
        assert_eq!(reply, "echo: hi");
        assert!(orch.in_flight(RequestKind::Weather));
        assert!(!pending_weather.is_finished());

        pending_weather.abort();
    }

    struct FlagOnDrop<'a>(&'a AtomicBool);

    impl Drop for FlagOnDrop<'_> {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Never answers; records when it starts and when its future is dropped.
    #[derive(Debug, Default)]
    struct Parks {
        started: AtomicBool,
        dropped: AtomicBool,
    }

    #[async_trait]
    impl WeatherProvider for Parks {
        async fn current_condition(&self, _query: &WeatherQuery) -> Result<String, ClientError> {
            let _flag = FlagOnDrop(&self.dropped);
            self.started.store(true, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn dropped_caller_unregisters_and_cancels_request() {
        let weather = Arc::new(Parks::default());
        let orch = Arc::new(Orchestrator::new(weather.clone(), WeatherQuery::default()));

        let caller = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.ask("q").await })
        };
        while !weather.started.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        assert!(orch.in_flight(RequestKind::Weather));

        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        assert!(!orch.in_flight(RequestKind::Weather));

        while !weather.dropped.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn tokens_increase_with_call_order() {
        let weather = Arc::new(StallsOnce::default());
        let orch = Arc::new(Orchestrator::new(weather.clone(), WeatherQuery::default()));

        let first = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.ask("first").await })
        };
        wait_for_calls(&weather, 1).await;
        orch.ask("second").await.unwrap();

        let superseded = match first.await.unwrap() {
            Err(DispatchError::Superseded(token)) => token,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(superseded, RequestToken(1));
        assert!(superseded < RequestToken(orch.next_token.load(Ordering::SeqCst)));
    }

    #[tokio::test]
    async fn panicking_provider_maps_to_unknown() {
        let orch = Orchestrator::new(Arc::new(Panics), WeatherQuery::default());

        let err = orch.ask("q").await.unwrap_err();
        match err {
            DispatchError::Client(e) => assert_eq!(e.kind(), ClientErrorKind::Unknown),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!orch.in_flight(RequestKind::Weather));
    }

    #[tokio::test]
    async fn chat_without_client_is_unavailable() {
        let orch = Orchestrator::new(Arc::new(Fixed(Ok("Clear"))), WeatherQuery::default());

        let err = orch.chat("hi").await.unwrap_err();
        assert!(matches!(err, DispatchError::Unavailable(RequestKind::Chat)));
        assert_eq!(err.title(), "UNAVAILABLE");
        assert_eq!(orch.ask("q").await.unwrap(), "Clear");
    }

    #[test]
    fn from_config_requires_weather_key_only() {
        let mut cfg = Config::default();
        assert!(orchestrator_from_config(&cfg).is_err());

        cfg.upsert_service_api_key(ServiceId::OpenWeather, "KEY".into());
        cfg.location = WeatherQuery::new("1", "2");
        let orch = orchestrator_from_config(&cfg).unwrap();

        assert_eq!(orch.location(), &WeatherQuery::new("1", "2"));
        assert!(orch.chat.is_none());

        cfg.upsert_service_api_key(ServiceId::OpenAi, "sk".into());
        assert!(orchestrator_from_config(&cfg).unwrap().chat.is_some());
    }

    #[test]
    fn tokens_display_with_hash() {
        assert_eq!(RequestToken(7).to_string(), "#7");
    }
}
