//! Car Dashboard
//!
//! Wires cameras, the display controller, fans and input adapters together,
//! and serves the remote control / status API.

pub mod config;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};
use camera_capture::{CameraRegistry, SourceFactory, VideoFrame};
use compositor::Compositor;
use display_session::{
    ControllerError, DisplayController, DisplaySink, FanoutSink, FramebufferSink,
    LatestFrameSink, SessionContext,
};
use fan_control::{FanController, FanError, NullPwm, Pca9685, PwmController};
use input::{Command, CommandSink};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, FanDriver, LogConfig};

/// Dashboard errors
#[derive(Error, Debug)]
pub enum DashboardError {
    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Fan(#[from] FanError),
}

/// The running dashboard: display controller, fans and the latest frame
pub struct Dashboard {
    controller: DisplayController,
    fans: FanController,
    frames: Arc<LatestFrameSink>,
    shutdown_tx: watch::Sender<bool>,
}

impl Dashboard {
    /// Assemble from already-built parts
    pub fn new(controller: DisplayController, fans: FanController, frames: Arc<LatestFrameSink>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            controller,
            fans,
            frames,
            shutdown_tx,
        }
    }

    /// Build cameras, display output and fan hardware from configuration.
    ///
    /// Missing display or fan hardware is logged and replaced by in-memory /
    /// logging stand-ins so the dashboard still comes up.
    pub fn from_config(config: &AppConfig) -> Result<Self, DashboardError> {
        let factory: Arc<dyn SourceFactory> = Arc::new(CameraRegistry::new(config.cameras.clone()));
        let frames = Arc::new(LatestFrameSink::new());

        let sink: Arc<dyn DisplaySink> = match &config.display.framebuffer {
            Some(device) => match FramebufferSink::open(device) {
                Ok(fb) => {
                    let sinks: Vec<Arc<dyn DisplaySink>> = vec![Arc::new(fb), frames.clone()];
                    Arc::new(FanoutSink::new(sinks))
                }
                Err(e) => {
                    warn!(device = %device, error = %e, "Framebuffer unavailable, frames kept in memory only");
                    frames.clone()
                }
            },
            None => frames.clone(),
        };

        let controller = DisplayController::new(SessionContext {
            factory,
            sink,
            compositor: Compositor::new(config.canvas, config.display.filter),
            settings: config.session.clone(),
        });

        let pwm: Arc<dyn PwmController> = match config.fans.driver {
            FanDriver::Pca9685 => match Pca9685::open(&config.fans.pca9685) {
                Ok(chip) => Arc::new(chip),
                Err(e) => {
                    warn!(
                        device = %config.fans.pca9685.i2c_device,
                        error = %e,
                        "PCA9685 unavailable, fan commands will only be logged"
                    );
                    Arc::new(NullPwm)
                }
            },
            FanDriver::None => Arc::new(NullPwm),
        };
        let fans = FanController::new(pwm, &config.fans.channels)?;

        Ok(Self::new(controller, fans, frames))
    }

    pub fn controller(&self) -> &DisplayController {
        &self.controller
    }

    pub fn fans(&self) -> &FanController {
        &self.fans
    }

    /// Most recently composed frame
    pub fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.frames.latest()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames.presented()
    }

    /// Stop the display (bounded wait for the capture thread), then zero
    /// every fan and deinitialize the PWM controller. Runs once; later calls
    /// return immediately.
    pub fn shutdown(&self) {
        if *self.shutdown_tx.borrow() {
            return;
        }
        info!("Shutting down");
        self.controller.shutdown();
        self.fans.shutdown();
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Becomes `true` once [`Dashboard::shutdown`] has completed
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

impl CommandSink for Dashboard {
    type Error = DashboardError;

    fn dispatch(&self, command: Command) -> Result<(), DashboardError> {
        match command {
            Command::ShowCamera(key) => {
                self.controller.activate_camera(key)?;
            }
            Command::BeginMultiviewSelection => self.controller.begin_multiview_selection()?,
            Command::SetFan { channel, percent } => self.fans.set_duty(channel, percent)?,
            Command::Shutdown => self.shutdown(),
        }
        Ok(())
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
    /// Prometheus recorder, when installed
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(dashboard: Arc<Dashboard>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            dashboard,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/status", get(routes::display::get_status))
        .route("/api/v1/mode", post(routes::display::set_mode))
        .route("/api/v1/selection", delete(routes::display::cancel_selection))
        .route("/api/v1/selection/begin", post(routes::display::begin_selection))
        .route("/api/v1/selection/:key", post(routes::display::select_camera))
        .route("/api/v1/snapshot.png", get(routes::display::get_snapshot))
        .route("/api/v1/fans", get(routes::fans::get_fans))
        .route("/api/v1/fans/:channel", post(routes::fans::set_fan))
        .route("/api/v1/shutdown", post(routes::shutdown))
        .route("/metrics", get(routes::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.dashboard.is_shut_down() {
        "shutting_down"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Initialize logging. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LogConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json {
        builder.json().finish().try_init()
    } else {
        builder.finish().try_init()
    }
}

/// Serve the API until `shutdown` turns `true`
pub async fn run_server(
    app: Router,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Starting API server on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|done| *done).await;
        })
        .await
}
