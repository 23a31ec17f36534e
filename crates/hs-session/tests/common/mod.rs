//! Recording mock transport shared by the session integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use hs_core::config::RegistrySettings;
use hs_core::traits::{FileSink, FileSource, Transport, TransportFactory};
use hs_core::{
    ConsumerToken, HandlerConfig, HostAuth, HostDestination, PortForwardSpec, TransportError,
};
use hs_session::SessionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(String),
    ConnectVia(String),
    Disconnect,
    ForwardAdded(String),
    ForwardRemoved(String),
    Get(String),
    Put(String),
}

/// Knobs shared by every transport a factory creates
#[derive(Default)]
pub struct Behaviour {
    pub connect_delay: Mutex<Duration>,
    pub disconnect_delay: Mutex<Duration>,
    pub fail_connect: AtomicBool,
    pub fail_forward: AtomicBool,
    pub fail_disconnect: AtomicBool,
}

/// Ordered log of `(transport id, event)`
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<(usize, Event)>>>,
}

impl Recorder {
    fn push(&self, id: usize, event: Event) {
        self.events.lock().unwrap().push((id, event));
    }

    pub fn events(&self) -> Vec<(usize, Event)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|(_, e)| pred(e)).count()
    }

    pub fn connects(&self) -> usize {
        self.count(|e| matches!(e, Event::Connect(_)))
    }

    pub fn disconnects(&self) -> usize {
        self.count(|e| matches!(e, Event::Disconnect))
    }

    pub fn forwards_added(&self) -> usize {
        self.count(|e| matches!(e, Event::ForwardAdded(_)))
    }

    pub fn forwards_removed(&self) -> usize {
        self.count(|e| matches!(e, Event::ForwardRemoved(_)))
    }
}

pub struct MockTransport {
    id: usize,
    recorder: Recorder,
    behaviour: Arc<Behaviour>,
    ports: Arc<AtomicU16>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        _monitor: &CancellationToken,
        destination: &HostDestination,
        _config: &HandlerConfig,
    ) -> Result<(), TransportError> {
        let delay = *self.behaviour.connect_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        if self.behaviour.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionRefused(destination.address()));
        }
        self.recorder
            .push(self.id, Event::Connect(destination.to_display_string()));
        Ok(())
    }

    async fn connect_via(
        &self,
        _monitor: &CancellationToken,
        host: &HostDestination,
        _config: &HandlerConfig,
    ) -> Result<(), TransportError> {
        self.recorder
            .push(self.id, Event::ConnectVia(host.to_display_string()));
        Ok(())
    }

    async fn disconnect(
        &self,
        _monitor: &CancellationToken,
        _config: &HandlerConfig,
    ) -> Result<(), TransportError> {
        let delay = *self.behaviour.disconnect_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.recorder.push(self.id, Event::Disconnect);
        if self.behaviour.fail_disconnect.load(Ordering::SeqCst) {
            return Err(TransportError::Ssh("connection reset".to_string()));
        }
        Ok(())
    }

    async fn setup_port_forward(
        &self,
        spec: &PortForwardSpec,
    ) -> Result<PortForwardSpec, TransportError> {
        if self.behaviour.fail_forward.load(Ordering::SeqCst) {
            return Err(TransportError::Forward("address in use".to_string()));
        }
        let resolved = if spec.local_port == 0 {
            spec.with_local_port(self.ports.fetch_add(1, Ordering::SeqCst))
        } else {
            spec.clone()
        };
        self.recorder
            .push(self.id, Event::ForwardAdded(resolved.to_display_string()));
        Ok(resolved)
    }

    async fn remove_port_forward(&self, spec: &PortForwardSpec) -> Result<(), TransportError> {
        self.recorder
            .push(self.id, Event::ForwardRemoved(spec.to_display_string()));
        Ok(())
    }

    async fn get_file(
        &self,
        src: &str,
        dst: FileSink<'_>,
        _monitor: &CancellationToken,
    ) -> Result<u64, TransportError> {
        self.recorder.push(self.id, Event::Get(src.to_string()));
        let body = format!("contents of {}", src);
        dst.write_all(body.as_bytes()).await?;
        Ok(body.len() as u64)
    }

    async fn put_file(
        &self,
        src: FileSource<'_>,
        dst: &str,
        _monitor: &CancellationToken,
    ) -> Result<u64, TransportError> {
        let mut body = Vec::new();
        src.read_to_end(&mut body).await?;
        self.recorder.push(self.id, Event::Put(dst.to_string()));
        Ok(body.len() as u64)
    }

    fn client_version(&self) -> String {
        "SSH-2.0-mock_client".to_string()
    }

    fn server_version(&self) -> String {
        format!("SSH-2.0-mock_server_{}", self.id)
    }
}

/// Creates numbered mock transports that log into one recorder
#[derive(Clone)]
pub struct MockFactory {
    pub recorder: Recorder,
    pub behaviour: Arc<Behaviour>,
    created: Arc<AtomicUsize>,
    ports: Arc<AtomicU16>,
}

/// First port handed out for `local_port = 0` requests
pub const FIRST_PORT: u16 = 40000;

impl Default for MockFactory {
    fn default() -> Self {
        Self {
            recorder: Recorder::default(),
            behaviour: Arc::new(Behaviour::default()),
            created: Arc::new(AtomicUsize::new(0)),
            ports: Arc::new(AtomicU16::new(FIRST_PORT)),
        }
    }
}

impl MockFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.behaviour.connect_delay.lock().unwrap() = delay;
    }

    pub fn set_disconnect_delay(&self, delay: Duration) {
        *self.behaviour.disconnect_delay.lock().unwrap() = delay;
    }
}

impl TransportFactory for MockFactory {
    fn create(&self) -> Arc<dyn Transport> {
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(MockTransport {
            id,
            recorder: self.recorder.clone(),
            behaviour: Arc::clone(&self.behaviour),
            ports: Arc::clone(&self.ports),
        })
    }
}

pub fn registry_with(settings: RegistrySettings) -> (SessionRegistry, MockFactory) {
    let factory = MockFactory::default();
    let registry = SessionRegistry::new(Arc::new(factory.clone()), settings);
    (registry, factory)
}

pub fn registry() -> (SessionRegistry, MockFactory) {
    registry_with(RegistrySettings::default())
}

pub fn consumer(name: &str) -> HandlerConfig {
    HandlerConfig::new(ConsumerToken::new(name))
}

pub fn host(name: &str) -> HostDestination {
    HostDestination::new(name, 22, "deploy", HostAuth::Agent)
}

pub fn forward(remote_host: &str, remote_port: u16) -> PortForwardSpec {
    PortForwardSpec::new(hs_core::LOCAL_HOST, 0, remote_host, remote_port)
}

pub const TIMEOUT: Duration = Duration::from_secs(5);
