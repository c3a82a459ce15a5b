//! Collector wiring
//!
//! Builds every piece from a [`CollectorConfig`] and runs it:
//!
//! 1. update queue
//! 2. publisher thread (connector, alerter, notifiers)
//! 3. dispatcher (registry + policies)
//! 4. socket, transport, engine
//!
//! When the engine returns, its queue sender is dropped with it, the
//! publisher drains what is left and its thread is joined.

use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fieldgate_connectors::{
    Alerter, Connector, LogConnector, LogNotifier, MqttConnector, Notifier, PublishReport,
    Publisher, WebhookConfig, WebhookNotifier,
};
use fieldgate_core::{
    update_queue, IdentityNamespace, ReadingValidator, SessionRegistry, UpdateReceiver,
    UpdateSender,
};
use log::{error, info};

use crate::config::{CollectorConfig, PublisherKind, TransportKind};
use crate::dispatch::Dispatcher;
use crate::engine::{EngineStats, IngestionEngine};
use crate::error::{CollectorError, Result};
use crate::socket::{self, SocketOptions, DEFAULT_BACKLOG};
use crate::transport::{TcpTransport, Transport, UdpTransport};

/// Webhook retry backoff base
const WEBHOOK_BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Run the collector until `shutdown` is set
pub fn run(config: &CollectorConfig, shutdown: &AtomicBool) -> Result<EngineStats> {
    config.validate()?;

    let (tx, rx) = update_queue(config.queue);
    let publisher = spawn_publisher(config, rx)?;

    let served = serve(config, build_dispatcher(config, tx), shutdown);
    if let Err(e) = &served {
        error!("Ingestion failed: {}", e);
    }

    let report = publisher.join().map_err(|_| CollectorError::PublisherPanicked)?;
    info!(
        "Publisher stopped: {} published, {} failed, {} alerts",
        report.published, report.failed, report.alerts
    );

    served
}

/// Dispatcher configured from the session and validation sections
pub fn build_dispatcher(config: &CollectorConfig, queue: UpdateSender) -> Dispatcher {
    let namespace = match config.sessions.namespace {
        Some(uuid) => IdentityNamespace::fixed(uuid),
        None => IdentityNamespace::random(),
    };
    info!("Deriving device ids under namespace {}", namespace.as_uuid());

    let registry = SessionRegistry::new(namespace, config.sessions.shared_secret);
    Dispatcher::new(registry, queue)
        .with_validation(
            config.validation.mode,
            ReadingValidator::from_ranges(&config.validation.ranges),
        )
        .with_unknown_peer(config.sessions.unknown_peer)
        .with_fill_device_id(config.sessions.fill_device_id)
}

fn serve(config: &CollectorConfig, dispatcher: Dispatcher, shutdown: &AtomicBool) -> Result<EngineStats> {
    let address = config.listen.socket_addr()?;
    let options = SocketOptions {
        receive_timeout: config.listen.receive_timeout(),
        backlog: DEFAULT_BACKLOG,
    };

    match config.listen.transport {
        TransportKind::Datagram => {
            let socket = socket::bind_datagram(address, &options)?;
            drive(config, UdpTransport::new(socket), dispatcher, shutdown)
        }
        TransportKind::Stream => {
            let listener = socket::bind_stream(address, &options)?;
            let transport = TcpTransport::new(
                listener,
                config.listen.stream_messages,
                config.listen.max_connections,
            )
            .with_max_pending(config.listen.max_pending_reply_bytes);
            drive(config, transport, dispatcher, shutdown)
        }
    }
}

fn drive<T: Transport>(
    config: &CollectorConfig,
    transport: T,
    dispatcher: Dispatcher,
    shutdown: &AtomicBool,
) -> Result<EngineStats> {
    let mut engine = IngestionEngine::new(transport, dispatcher)?
        .with_idle_threshold(config.sessions.idle_threshold())
        .with_poll_timeout(config.listen.poll_interval());

    info!(
        "Listening on {} ({:?}), idle timeout {} min",
        engine.local_addr()?,
        config.listen.transport,
        config.sessions.idle_timeout_minutes
    );
    engine.run_until(shutdown)
}

fn spawn_publisher(config: &CollectorConfig, rx: UpdateReceiver) -> Result<JoinHandle<PublishReport>> {
    let alerter = Alerter::new(config.alerts.rules.iter().copied());
    let notifiers = build_notifiers(config)?;
    let topic = config.publisher.topic.as_str();

    match config.publisher.kind {
        PublisherKind::Log => spawn(Publisher::new(LogConnector::new(), topic), alerter, notifiers, rx),
        PublisherKind::Mqtt => {
            let connector = MqttConnector::connect(&config.publisher.mqtt)?;
            info!(
                "Publishing to mqtt://{}:{}{}",
                config.publisher.mqtt.host, config.publisher.mqtt.port, topic
            );
            spawn(Publisher::new(connector, topic), alerter, notifiers, rx)
        }
    }
}

fn build_notifiers(config: &CollectorConfig) -> Result<Vec<Box<dyn Notifier>>> {
    let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
    if !config.alerts.rules.is_empty() {
        notifiers.push(Box::new(LogNotifier::new()));
    }

    if let Some(settings) = &config.alerts.webhook {
        let mut webhook = WebhookConfig::new(settings.url.as_str())
            .timeout_secs(settings.timeout_secs)
            .retries(settings.max_retries, WEBHOOK_BACKOFF_BASE);
        if let Some(token) = &settings.bearer_token {
            webhook = webhook.bearer_token(token.as_str());
        }
        notifiers.push(Box::new(WebhookNotifier::new(webhook)?));
    }

    Ok(notifiers)
}

fn spawn<C: Connector + 'static>(
    publisher: Publisher<C>,
    alerter: Alerter,
    notifiers: Vec<Box<dyn Notifier>>,
    rx: UpdateReceiver,
) -> Result<JoinHandle<PublishReport>> {
    let publisher = notifiers
        .into_iter()
        .fold(publisher.with_alerter(alerter), Publisher::with_boxed_notifier);

    thread::Builder::new()
        .name("publisher".into())
        .spawn(move || publisher.run(rx))
        .map_err(CollectorError::Spawn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenConfig;
    use fieldgate_core::QueueConfig;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use uuid::Uuid;

    fn loopback_config(transport: TransportKind) -> CollectorConfig {
        CollectorConfig {
            listen: ListenConfig {
                address: "127.0.0.1:0".into(),
                transport,
                poll_interval_ms: 10,
                ..ListenConfig::default()
            },
            ..CollectorConfig::default()
        }
    }

    #[test]
    fn dispatcher_uses_configured_namespace() {
        let mut config = CollectorConfig::default();
        config.sessions.namespace = Some(Uuid::NAMESPACE_URL);
        let (tx, _rx) = update_queue(QueueConfig::unbounded());

        let dispatcher = build_dispatcher(&config, tx);
        assert_eq!(dispatcher.registry().namespace(), IdentityNamespace::fixed(Uuid::NAMESPACE_URL));
    }

    #[test]
    fn invalid_config_fails_before_binding() {
        let mut config = loopback_config(TransportKind::Datagram);
        config.sessions.idle_timeout_minutes = 0;
        let shutdown = AtomicBool::new(true);
        assert!(matches!(run(&config, &shutdown), Err(CollectorError::Config(_))));
    }

    #[test]
    fn stops_on_shutdown_flag() {
        for transport in [TransportKind::Datagram, TransportKind::Stream] {
            let config = loopback_config(transport);
            let shutdown = Arc::new(AtomicBool::new(false));

            let flag = Arc::clone(&shutdown);
            let collector = thread::spawn(move || run(&config, &flag));
            thread::sleep(Duration::from_millis(50));
            shutdown.store(true, Ordering::Release);

            let stats = collector.join().unwrap().unwrap();
            assert_eq!(stats, EngineStats::default());
        }
    }
}
