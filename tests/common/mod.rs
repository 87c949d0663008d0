//! Shared harness: runs the service router on an ephemeral port.

use hello_service::handlers::HelloState;
use hello_service::{app, cache, server};
use hello_telemetry::Telemetry;
use hello_tower::HttpInstrumentationConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: HelloState,
    token: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
    _telemetry: Telemetry,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(HttpInstrumentationConfig::default()).await
    }

    pub async fn start_with(http: HttpInstrumentationConfig) -> Self {
        let telemetry = Telemetry::disabled();
        let meter = telemetry.meter("hello-service");
        let handle = cache::build("map", 100).expect("cache");
        let state = HelloState::new(handle.cache.clone(), &meter, true);
        let router = app::router(state.clone(), &http, &meter);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let token = CancellationToken::new();
        let task = tokio::spawn(server::run(
            listener,
            router,
            token.clone(),
            Duration::from_secs(2),
        ));

        Self {
            addr,
            state,
            token,
            task,
            _telemetry: telemetry,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn stop(self) -> std::io::Result<()> {
        self.token.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server stopped within the grace period")
            .expect("server task panicked")
    }
}
