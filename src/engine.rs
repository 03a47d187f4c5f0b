//! Thin HTTP engine over axum.
//!
//! Applications register routes and call [`Engine::run`]; whether that
//! serves or starts the live-rebuild harness is decided by [`Mode`].

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::Router;
use axum::routing::MethodRouter;
use tokio::net::TcpListener;

use crate::config::AppConfig;
use crate::host::{self, Mode};

pub struct Engine {
    root: PathBuf,
    config: AppConfig,
    router: Router,
}

impl Engine {
    pub fn new(root: impl Into<PathBuf>, config: AppConfig) -> Self {
        Self {
            root: root.into(),
            config,
            router: Router::new(),
        }
    }

    /// Load `gone.json` from `root`.
    pub fn from_root(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        let config = AppConfig::load(&root).context("Failed to load gone.json")?;
        Ok(Self::new(root, config))
    }

    pub fn route(mut self, path: &str, method_router: MethodRouter) -> Self {
        self.router = self.router.route(path, method_router);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Serve in child or production mode, otherwise run the harness.
    pub async fn run(self) -> anyhow::Result<()> {
        match Mode::detect(&self.config) {
            Mode::Harness => host::run_harness(&self.root, &self.config).await,
            Mode::Serve => self.serve().await,
        }
    }

    /// Bind `0.0.0.0:<port>` and serve until Ctrl-C.
    pub async fn serve(self) -> anyhow::Result<()> {
        crate::logging::init_with_config(&self.config);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        self.serve_on(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serve on an existing listener until `shutdown` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        crate::log_event!("engine", "listening", "{} on http://{local}", self.config.name);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        crate::log_event!("engine", "stopped");
        Ok(())
    }
}
