//! Gateway HTTP server and inbound processing loop.

use crate::channels::{
    ChannelRegistry, InboundMessage, TelegramChannel, TelegramUpdate, TELEGRAM_CHANNEL_ID,
};
use crate::completion::CompletionClient;
use crate::config::{self, Config};
use crate::pipeline::{MessagePipeline, PipelineOutcome, PipelineSettings};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

const INBOUND_QUEUE_CAPACITY: usize = 64;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// Sender for inbound channel messages (e.g. Telegram webhook POSTs). Processor task receives.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub channel_registry: ChannelRegistry,
    pub completion: Arc<CompletionClient>,
    /// Messages currently inside the pipeline.
    pub in_flight: Arc<AtomicUsize>,
}

/// Run the relay with the Gemini backend from `config` until SIGINT, SIGTERM, SIGUSR1 or SIGUSR2.
pub async fn run_gateway(config: Config) -> Result<()> {
    let completion =
        CompletionClient::from_config(&config).context("configuring completion backend")?;
    run_gateway_with(config, Arc::new(completion), shutdown_signal()).await
}

/// Run the relay with an explicit completion client, stopping when `shutdown` completes.
///
/// Startup fails if the completion backend cannot be initialized. Shutdown stops channel
/// connectors, removes a Telegram webhook if one was set, and waits up to
/// `gateway.shutdownGraceMs` for in-flight messages before aborting them.
pub async fn run_gateway_with<F>(
    config: Config,
    completion: Arc<CompletionClient>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind)
        && config.channels.telegram.webhook_url.is_some()
        && config.channels.telegram.webhook_secret.is_none()
    {
        anyhow::bail!(
            "refusing to bind gateway to {} with a Telegram webhook but no channels.telegram.webhookSecret",
            bind
        );
    }

    completion
        .ensure_initialized()
        .await
        .context("initializing completion backend")?;

    let config = Arc::new(config);
    let grace = config.gateway.shutdown_grace();
    let channel_registry = ChannelRegistry::new();
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE_CAPACITY);
    let (stop_tx, stop_rx) = watch::channel(false);
    let in_flight = Arc::new(AtomicUsize::new(0));

    let pipeline = Arc::new(MessagePipeline::new(
        completion.clone(),
        channel_registry.clone(),
        PipelineSettings::from_config(&config),
    ));
    let processor = tokio::spawn(process_inbound(
        pipeline,
        inbound_rx,
        stop_rx,
        in_flight.clone(),
        grace,
    ));

    let mut channel_tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut telegram_webhook: Option<Arc<TelegramChannel>> = None;
    if let Some(token) = config::resolve_telegram_token(&config) {
        let telegram = Arc::new(TelegramChannel::new(
            token,
            config.channels.telegram.api_base.clone(),
        ));
        if let Some(ref url) = config.channels.telegram.webhook_url {
            let secret = config.channels.telegram.webhook_secret.as_deref();
            if let Err(e) = telegram.set_webhook(url, secret).await {
                log::warn!("telegram set_webhook failed: {}", e);
            } else {
                log::info!("telegram channel registered (webhook mode): {}", url);
            }
            telegram_webhook = Some(telegram.clone());
        } else {
            channel_tasks.push(telegram.clone().start_inbound(inbound_tx.clone()));
            log::info!("telegram channel registered and getUpdates loop started");
        }
        channel_registry.register(telegram).await;
    } else {
        log::warn!("no telegram bot token configured; only the health endpoint is served");
    }

    let state = GatewayState {
        config: config.clone(),
        inbound_tx,
        channel_registry: channel_registry.clone(),
        completion,
        in_flight,
    };
    let app = Router::new()
        .route("/", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook_http))
        .with_state(state);

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server exited")?;

    log::info!("shutting down: stopping channels and draining in-flight messages");
    channel_registry.stop_all().await;
    if let Some(t) = telegram_webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }
    let _ = stop_tx.send(true);
    for mut handle in channel_tasks {
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            log::debug!("channel task did not stop within {:?}, aborting", grace);
            handle.abort();
        }
    }
    if let Err(e) = processor.await {
        log::error!("inbound processor task failed: {}", e);
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Counts one message in the pipeline; releases the count when dropped, including on panic
/// or abort.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn spawn_message(
    tasks: &mut JoinSet<PipelineOutcome>,
    pipeline: &Arc<MessagePipeline>,
    in_flight: &Arc<AtomicUsize>,
    msg: InboundMessage,
) {
    let pipeline = pipeline.clone();
    let guard = InFlightGuard::enter(in_flight);
    tasks.spawn(async move {
        let _guard = guard;
        pipeline.handle(msg).await
    });
}

/// Receive inbound messages and run each through the pipeline on its own task.
///
/// On stop, messages already queued are still run (they were acknowledged upstream), and
/// everything in flight gets `grace` to finish before it is aborted.
async fn process_inbound(
    pipeline: Arc<MessagePipeline>,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    mut stop_rx: watch::Receiver<bool>,
    in_flight: Arc<AtomicUsize>,
    grace: Duration,
) {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            msg = inbound_rx.recv() => {
                let Some(msg) = msg else { break };
                spawn_message(&mut tasks, &pipeline, &in_flight, msg);
            }
            Some(res) = tasks.join_next(), if !tasks.is_empty() => log_task_result(res),
            _ = stop_rx.changed() => break,
        }
    }

    inbound_rx.close();
    let mut queued = 0;
    while let Ok(msg) = inbound_rx.try_recv() {
        spawn_message(&mut tasks, &pipeline, &in_flight, msg);
        queued += 1;
    }
    if queued > 0 {
        log::info!("running {} queued message(s) before shutdown", queued);
    }

    let pending = tasks.len();
    if pending == 0 {
        return;
    }
    log::info!("waiting up to {:?} for {} in-flight message(s)", grace, pending);
    let drained = tokio::time::timeout(grace, async {
        while let Some(res) = tasks.join_next().await {
            log_task_result(res);
        }
    })
    .await
    .is_ok();
    if !drained {
        log::warn!(
            "{} message(s) still in flight after {:?}, aborting",
            tasks.len(),
            grace
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

fn log_task_result(res: Result<PipelineOutcome, tokio::task::JoinError>) {
    match res {
        Ok(outcome) => log::debug!("pipeline finished: {:?}", outcome),
        Err(e) => log::error!("pipeline task failed: {}", e),
    }
}

/// Future that completes when the process should shut down.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::SignalKind;
        tokio::select! {
            _ = ctrl_c => {},
            _ = unix_signal(SignalKind::terminate(), "SIGTERM") => {},
            _ = unix_signal(SignalKind::user_defined1(), "SIGUSR1") => {},
            _ = unix_signal(SignalKind::user_defined2(), "SIGUSR2") => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;

    log::info!("shutdown signal received");
}

#[cfg(unix)]
async fn unix_signal(kind: tokio::signal::unix::SignalKind, name: &str) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut s) => {
            s.recv().await;
            log::info!("received {}", name);
        }
        Err(e) => {
            log::warn!("failed to install {} handler: {}", name, e);
            std::future::pending::<()>().await;
        }
    }
}

/// POST /telegram/webhook — receives Telegram update JSON; verifies optional secret, pushes InboundMessage.
/// Malformed updates are logged and acknowledged so Telegram does not redeliver them.
async fn telegram_webhook_http(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            log::warn!("telegram webhook: dropping malformed update: {}", e);
            return StatusCode::OK;
        }
    };
    let Some(inbound) = update.to_inbound(TELEGRAM_CHANNEL_ID) else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "channels": state.channel_registry.ids().await,
        "completionReady": state.completion.is_initialized(),
        "inFlight": state.in_flight.load(Ordering::SeqCst),
    }))
}
