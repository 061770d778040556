//! End-to-end tests against a simulated Modbus TCP device.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use iosrv::channels::ChannelService;
use iosrv::config::PollingConfig;
use iosrv::connection::ConnectionManager;
use iosrv::model::{ChangeSource, ChannelKind, Device, NewDevice};
use iosrv::notify::{BroadcastSink, Notification};
use iosrv::protocol::ProtocolClient;
use iosrv::scheduler::PollingScheduler;
use iosrv::store::{DeviceStore, MemoryStore};
use iosrv::subscriptions::{Subscription, SubscriptionTracker};

use support::DeviceSimulator;

struct Harness {
    store: Arc<MemoryStore>,
    sink: Arc<BroadcastSink>,
    connections: Arc<ConnectionManager>,
    channels: Arc<ChannelService>,
    tracker: Arc<SubscriptionTracker>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(BroadcastSink::default());
        let connections = Arc::new(ConnectionManager::new());
        let protocol = ProtocolClient::new(connections.clone());
        let channels = Arc::new(ChannelService::new(
            store.clone(),
            protocol,
            sink.clone(),
        ));
        let tracker = Arc::new(SubscriptionTracker::new());
        Self {
            store,
            sink,
            connections,
            channels,
            tracker,
        }
    }

    async fn add_device(&self, sim: &DeviceSimulator) -> Device {
        self.channels
            .create_device(NewDevice {
                name: "sim".to_string(),
                host: sim.host(),
                port: sim.port(),
                unit_id: 1,
                poll_interval_ms: 20,
                timeout_ms: 500,
            })
            .await
            .expect("create device")
    }

    async fn add_unreachable_device(&self) -> Device {
        self.channels
            .create_device(NewDevice {
                name: "ghost".to_string(),
                host: "127.0.0.1".to_string(),
                port: 1, // nothing listens here
                unit_id: 1,
                poll_interval_ms: 20,
                timeout_ms: 100,
            })
            .await
            .expect("create device")
    }

    fn spawn_scheduler(&self, demand_based: bool) -> CancellationToken {
        let token = CancellationToken::new();
        let scheduler = PollingScheduler::new(
            self.store.clone() as Arc<dyn DeviceStore>,
            self.channels.clone(),
            self.tracker.clone(),
            self.sink.clone(),
            PollingConfig {
                enabled: true,
                interval_ms: 20,
                demand_based,
                max_concurrent_polls: 2,
            },
        );
        tokio::spawn(scheduler.run(token.clone()));
        token
    }
}

/// Receive notifications until one matches, or panic after two seconds
async fn wait_for<F>(rx: &mut broadcast::Receiver<Notification>, mut matches: F) -> Notification
where
    F: FnMut(&Notification) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("notification stream closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected notification not published")
}

#[tokio::test]
async fn set_output_writes_device_persists_and_notifies() {
    let sim = DeviceSimulator::start().await;
    let h = Harness::new();
    let device = h.add_device(&sim).await;
    let mut rx = h.sink.subscribe();

    let channel = h
        .channels
        .set_output(device.id, 2, true, "alice", Some("test run".to_string()))
        .await
        .expect("set output");
    assert!(channel.state);

    // Coil actually flipped on the device.
    assert!(sim.output(2));

    // Persisted state and audit entry.
    let stored = h
        .store
        .channel(device.id, ChannelKind::Output, 2)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.state);
    let entries = h.store.log_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source, ChangeSource::User);
    assert_eq!(entries[0].username.as_deref(), Some("alice"));
    assert!(!entries[0].previous);
    assert!(entries[0].new);

    // Notification made it out.
    let event = wait_for(&mut rx, |e| matches!(e, Notification::ChannelChange(_))).await;
    assert_eq!(event.device_id(), device.id);

    // Repeating the same command still writes the device and is still
    // logged: each acknowledged write is its own audit entry.
    h.channels
        .set_output(device.id, 2, true, "alice", None)
        .await
        .expect("repeat set output");
    let entries = h.store.log_entries();
    assert_eq!(entries.len(), 2);
    assert!(entries[1].previous);
    assert!(entries[1].new);
}

#[tokio::test]
async fn poll_detects_input_flip() {
    let sim = DeviceSimulator::start().await;
    let h = Harness::new();
    let device = h.add_device(&sim).await;

    h.tracker.add_connection("observer-1");
    h.tracker.add_subscription("observer-1", Subscription::All);
    let mut rx = h.sink.subscribe();
    let token = h.spawn_scheduler(true);

    // First successful poll reports the device as connected.
    wait_for(&mut rx, |e| {
        matches!(e, Notification::ConnectionStatus(s) if s.connected)
    })
    .await;

    sim.set_input(5, true);
    let event = wait_for(&mut rx, |e| {
        matches!(e, Notification::ChannelChange(c)
            if c.kind == ChannelKind::Input && c.number == 5 && c.state)
    })
    .await;
    assert_eq!(event.device_id(), device.id);
    token.cancel();

    let entries = h.store.log_entries();
    let flip = entries
        .iter()
        .find(|e| e.kind == ChannelKind::Input && e.number == 5)
        .expect("input flip logged");
    assert_eq!(flip.source, ChangeSource::System);

    let refreshed = h.store.device(device.id).await.unwrap().unwrap();
    assert_eq!(refreshed.last_connect_ok, Some(true));
}

#[tokio::test]
async fn unreachable_device_reports_every_failed_poll_and_no_channel_events() {
    let h = Harness::new();
    let device = h.add_unreachable_device().await;

    h.tracker.add_connection("observer-1");
    h.tracker.add_subscription("observer-1", Subscription::All);
    let mut rx = h.sink.subscribe();
    let token = h.spawn_scheduler(true);

    let event = wait_for(&mut rx, |e| matches!(e, Notification::ConnectionStatus(_))).await;
    match event {
        Notification::ConnectionStatus(s) => {
            assert!(!s.connected);
            assert!(s.error.is_some());
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Every failed poll reports the outage again, so an observer who
    // subscribes mid-outage still hears about it. No channel change is
    // ever reported for an unreachable device.
    tokio::time::sleep(Duration::from_millis(300)).await;
    token.cancel();
    let mut failures = 0;
    loop {
        match rx.try_recv() {
            Ok(Notification::ChannelChange(_)) => panic!("channel event from dead device"),
            Ok(Notification::ConnectionStatus(s)) => {
                assert!(!s.connected);
                failures += 1;
            }
            Ok(Notification::DeviceStatus(_)) => panic!("status snapshot from dead device"),
            Err(_) => break,
        }
    }
    assert!(failures >= 1, "expected repeated connection-status events");

    let refreshed = h.store.device(device.id).await.unwrap().unwrap();
    assert_eq!(refreshed.last_connect_ok, Some(false));
    assert!(refreshed.last_connect_error.is_some());
    assert!(h.store.log_entries().is_empty());
}

#[tokio::test]
async fn sessions_are_reused_across_reads() {
    let sim = DeviceSimulator::start().await;
    let h = Harness::new();
    let device = h.add_device(&sim).await;
    let addr = iosrv::connection::DeviceAddr::from_device(&device);

    h.channels.protocol().read_inputs(&addr).await.unwrap();
    h.channels.protocol().read_outputs(&addr).await.unwrap();
    h.channels.protocol().read_inputs(&addr).await.unwrap();

    assert_eq!(sim.connection_count(), 1);
    let stats = h.connections.stats();
    assert_eq!(stats.total_created, 1);
    assert_eq!(stats.reconnected, 0);
}

#[tokio::test]
async fn invalidate_forces_a_fresh_dial() {
    let sim = DeviceSimulator::start().await;
    let h = Harness::new();
    let device = h.add_device(&sim).await;
    let addr = iosrv::connection::DeviceAddr::from_device(&device);

    h.channels.protocol().read_inputs(&addr).await.unwrap();
    h.connections.invalidate(device.id);
    h.channels.protocol().read_inputs(&addr).await.unwrap();

    assert_eq!(sim.connection_count(), 2);
    assert_eq!(h.connections.stats().reconnected, 1);
}

#[tokio::test]
async fn demand_based_scheduler_stays_idle_without_subscribers() {
    let sim = DeviceSimulator::start().await;
    let h = Harness::new();
    h.add_device(&sim).await;

    // Nobody registered, nobody subscribed.
    let token = h.spawn_scheduler(true);
    tokio::time::sleep(Duration::from_millis(300)).await;
    token.cancel();

    assert_eq!(sim.connection_count(), 0);
    assert_eq!(sim.request_count(), 0);
}
