use actix_web::*;
use anyhow::Context as _;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize, Clone)]
pub struct HttpServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl HttpServerConfig {
    pub async fn run_server<F>(&self, scopes: F, shutdown: CancellationToken) -> anyhow::Result<()>
    where
        F: Fn() -> Vec<Scope> + Send + Clone + 'static,
    {
        let http_server = HttpServer::new(move || {
            let mut app = App::new().wrap(tracing_actix_web::TracingLogger::default());

            for scope in scopes() {
                app = app.service(scope);
            }

            app
        })
        .workers(1)
        .disable_signals()
        .bind((self.host.as_str(), self.port))
        .with_context(|| format!("Error binding HTTP server to {}:{}", self.host, self.port))?
        .run();

        let handle = http_server.handle();

        tokio::select! {
            res = http_server => res.with_context(|| format!("Error running HTTP server on port {}", self.port)),
            _ = shutdown.cancelled() => {
                tracing::info!("Stopping HTTP server on port {}", self.port);
                handle.stop(true).await;
                Ok(())
            }
        }
    }
}
