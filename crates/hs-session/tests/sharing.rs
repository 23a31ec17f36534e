//! Reference counting and registry behaviour of shared sessions

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{consumer, host, registry, registry_with, Event, TIMEOUT};
use hs_core::config::RegistrySettings;
use hs_core::{
    ConsumerToken, HandlerConfig, HostAuth, HostDestination, SessionError, TransportError,
};
use hs_session::{InvalidatePhase, Session};

#[tokio::test]
async fn test_two_consumers_share_one_transport() {
    let (registry, factory) = registry();
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let (a, b) = (consumer("A"), consumer("B"));

    let session_a = registry.acquire_session(&a, &h, None, None);
    assert_eq!(factory.recorder.connects(), 0, "acquire must not connect");
    session_a.connect(&monitor, &h, &a).await.unwrap();
    assert_eq!(factory.recorder.connects(), 1);

    let session_b = registry.acquire_session(&b, &h, None, None);
    session_b.connect(&monitor, &h, &b).await.unwrap();
    assert_eq!(factory.recorder.connects(), 1);
    assert_eq!(
        registry.dependent_consumers(session_b.as_ref()).await,
        vec![ConsumerToken::new("A"), ConsumerToken::new("B")]
    );

    registry
        .release(&monitor, session_a.as_ref(), &a, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(factory.recorder.disconnects(), 0);
    assert_eq!(registry.sessions().len(), 1);
    assert_eq!(
        session_b.dependent_consumers().await,
        vec![ConsumerToken::new("B")]
    );

    registry
        .release(&monitor, session_b.as_ref(), &b, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(factory.recorder.disconnects(), 1);
    assert!(registry.sessions().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumers_connect_once() {
    let (registry, factory) = registry();
    factory.set_connect_delay(Duration::from_millis(20));
    let h = host("db.example.com");

    let mut handles = Vec::new();
    for i in 0..16 {
        let registry = registry.clone();
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            let config = consumer(&format!("consumer-{}", i));
            let session = registry.acquire_session(&config, &h, None, None);
            session
                .connect(&CancellationToken::new(), &h, &config)
                .await
                .unwrap();
            (session, config)
        }));
    }
    let held = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect::<Vec<_>>();

    assert_eq!(factory.recorder.connects(), 1);
    assert_eq!(registry.sessions().len(), 1);
    assert_eq!(held[0].0.dependent_consumers().await.len(), 16);

    let mut handles = Vec::new();
    for (session, config) in held {
        handles.push(tokio::spawn(async move {
            session
                .disconnect(&CancellationToken::new(), &config, TIMEOUT)
                .await
                .unwrap();
        }));
    }
    for handle in futures::future::join_all(handles).await {
        handle.unwrap();
    }

    let events = factory.recorder.events();
    assert_eq!(factory.recorder.connects(), 1);
    assert_eq!(factory.recorder.disconnects(), 1);
    let connect_at = events
        .iter()
        .position(|(_, e)| matches!(e, Event::Connect(_)))
        .unwrap();
    let disconnect_at = events
        .iter()
        .position(|(_, e)| matches!(e, Event::Disconnect))
        .unwrap();
    assert!(connect_at < disconnect_at);
    assert!(registry.sessions().is_empty());
}

#[tokio::test]
async fn test_disconnect_without_usage_is_rejected() {
    let (registry, factory) = registry();
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let (a, b) = (consumer("A"), consumer("B"));

    let session_a = registry.acquire_direct(&a, &h, None);
    let session_b = registry.acquire_direct(&b, &h, None);
    session_a.connect(&monitor, &h, &a).await.unwrap();
    session_b.connect(&monitor, &h, &b).await.unwrap();
    session_a.disconnect(&monitor, &a, TIMEOUT).await.unwrap();

    let err = session_a.disconnect(&monitor, &a, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SessionError::NotAcquired { ref consumer, .. } if consumer == "A"));

    let shared = session_b.shareable().await;
    assert_eq!(shared.consumers().await, vec![ConsumerToken::new("B")]);
    assert_eq!(shared.usage(&ConsumerToken::new("B")).await, 1);
    assert_eq!(factory.recorder.disconnects(), 0);
}

#[tokio::test]
async fn test_same_consumer_counts_usages() {
    let (registry, factory) = registry();
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let a = consumer("A");

    let first = registry.acquire_direct(&a, &h, None);
    let second = registry.acquire_direct(&a, &h, None);
    first.connect(&monitor, &h, &a).await.unwrap();
    second.connect(&monitor, &h, &a).await.unwrap();

    let shared = first.shareable().await;
    assert_eq!(shared.usage(&ConsumerToken::new("A")).await, 2);
    assert_eq!(shared.consumer_info().await, "A (2)");

    first.disconnect(&monitor, &a, TIMEOUT).await.unwrap();
    assert_eq!(factory.recorder.disconnects(), 0);
    second.disconnect(&monitor, &a, TIMEOUT).await.unwrap();
    assert_eq!(factory.recorder.disconnects(), 1);
}

#[tokio::test]
async fn test_sharing_gate_opt_out() {
    let (registry, factory) = registry();
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let config = consumer("A").with_share_tunnels(false);
    assert!(!registry.can_share(&config));

    let first = registry.acquire_direct(&config, &h, None);
    let second = registry.acquire_direct(&config, &h, None);
    first.connect(&monitor, &h, &config).await.unwrap();
    second.connect(&monitor, &h, &config).await.unwrap();

    let (one, two) = (first.shareable().await, second.shareable().await);
    assert!(!Arc::ptr_eq(&one, &two));
    assert!(!one.is_shared());
    assert_eq!(factory.recorder.connects(), 2);
    assert!(registry.sessions().is_empty());
}

#[tokio::test]
async fn test_sharing_gate_global_and_anonymous() {
    let settings = RegistrySettings {
        disable_sharing: true,
        ..Default::default()
    };
    let (registry, _factory) = registry_with(settings);
    assert!(!registry.can_share(&consumer("A")));

    let (registry, factory) = common::registry();
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let anonymous = HandlerConfig::anonymous();
    assert!(!registry.can_share(&anonymous));

    let session = registry.acquire_direct(&anonymous, &h, None);
    session.connect(&monitor, &h, &anonymous).await.unwrap();
    assert!(registry.sessions().is_empty());
    session.disconnect(&monitor, &anonymous, TIMEOUT).await.unwrap();
    assert_eq!(factory.recorder.disconnects(), 1);
}

#[tokio::test]
async fn test_late_acquisition_rebinds_to_owner() {
    let (registry, factory) = registry();
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let (a, b) = (consumer("A"), consumer("B"));

    // Both acquired before anyone connected: two fresh instances
    let session_a = registry.acquire_direct(&a, &h, None);
    let session_b = registry.acquire_direct(&b, &h, None);
    assert!(!Arc::ptr_eq(
        &session_a.shareable().await,
        &session_b.shareable().await
    ));

    session_a.connect(&monitor, &h, &a).await.unwrap();
    session_b.connect(&monitor, &h, &b).await.unwrap();

    assert!(Arc::ptr_eq(
        &session_a.shareable().await,
        &session_b.shareable().await
    ));
    assert_eq!(factory.recorder.connects(), 1);
    assert_eq!(factory.created(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registry_only_shows_held_sessions() {
    let (registry, factory) = registry();
    factory.set_connect_delay(Duration::from_millis(1));
    let h = host("db.example.com");
    let stop = CancellationToken::new();

    let observer = {
        let registry = registry.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut checks = 0usize;
            while !stop.is_cancelled() {
                for session in registry.sessions() {
                    let snapshot = session.snapshot().await;
                    if snapshot.live {
                        assert!(!snapshot.consumers.is_empty());
                    }
                    checks += 1;
                }
                tokio::task::yield_now().await;
            }
            checks
        })
    };

    let mut workers = Vec::new();
    for i in 0..4 {
        let registry = registry.clone();
        let h = h.clone();
        workers.push(tokio::spawn(async move {
            let monitor = CancellationToken::new();
            let config = consumer(&format!("churn-{}", i));
            for _ in 0..25 {
                let session = registry.acquire_session(&config, &h, None, None);
                session.connect(&monitor, &h, &config).await.unwrap();
                assert!(registry
                    .sessions()
                    .iter()
                    .any(|s| s.destination() == &h));
                session.disconnect(&monitor, &config, TIMEOUT).await.unwrap();
            }
        }));
    }
    for worker in futures::future::join_all(workers).await {
        worker.unwrap();
    }
    stop.cancel();
    observer.await.unwrap();

    assert!(registry.sessions().is_empty());
    assert_eq!(
        factory.recorder.connects(),
        factory.recorder.disconnects()
    );
}

#[tokio::test]
async fn test_failed_connect_leaves_nothing_registered() {
    let (registry, factory) = registry();
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let a = consumer("A");

    factory.behaviour.fail_connect.store(true, Ordering::SeqCst);
    let err = registry
        .open_session(&monitor, &a, &h, None, None)
        .await
        .err().unwrap();
    assert!(matches!(
        err,
        SessionError::Transport(TransportError::ConnectionRefused(_))
    ));
    assert!(registry.sessions().is_empty());

    // The slot was released, so a later attempt owns it
    factory.behaviour.fail_connect.store(false, Ordering::SeqCst);
    let session = registry
        .open_session(&monitor, &a, &h, None, None)
        .await
        .unwrap();
    assert_eq!(registry.sessions().len(), 1);
    session.disconnect(&monitor, &a, TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_cancelled_connect_releases_claim() {
    let (registry, factory) = registry();
    factory.set_connect_delay(Duration::from_secs(60));
    let h = host("db.example.com");
    let a = consumer("A");

    let monitor = CancellationToken::new();
    monitor.cancel();
    let err = registry
        .open_session(&monitor, &a, &h, None, None)
        .await
        .err().unwrap();
    assert!(matches!(
        err,
        SessionError::Transport(TransportError::Cancelled)
    ));
    assert!(registry.sessions().is_empty());

    factory.set_connect_delay(Duration::ZERO);
    let session = registry
        .open_session(&CancellationToken::new(), &a, &h, None, None)
        .await
        .unwrap();
    assert_eq!(factory.recorder.connects(), 1);
    assert!(session.transport().await.server_version().starts_with("SSH-2.0-mock"));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_timeout_still_releases() {
    let (registry, factory) = registry();
    factory.set_disconnect_delay(Duration::from_secs(30));
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let a = consumer("A");

    let session = registry
        .open_session(&monitor, &a, &h, None, None)
        .await
        .unwrap();
    let err = session
        .disconnect(&monitor, &a, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::DisconnectTimeout(_)));

    assert!(registry.sessions().is_empty());
    assert!(session.dependent_consumers().await.is_empty());

    factory.set_disconnect_delay(Duration::ZERO);
    let again = registry
        .open_session(&monitor, &a, &h, None, None)
        .await
        .unwrap();
    assert_eq!(factory.recorder.connects(), 2);
    again.disconnect(&monitor, &a, TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_failed_teardown_is_reported_and_accounted() {
    let (registry, factory) = registry();
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let a = consumer("A");

    let session = registry
        .open_session(&monitor, &a, &h, None, None)
        .await
        .unwrap();
    factory
        .behaviour
        .fail_disconnect
        .store(true, Ordering::SeqCst);
    let err = session.disconnect(&monitor, &a, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(TransportError::Ssh(_))));
    assert!(registry.sessions().is_empty());
}

#[tokio::test]
async fn test_invalidate_reconnects() {
    let (registry, factory) = registry();
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let a = consumer("A");

    let session = registry
        .open_session(&monitor, &a, &h, None, None)
        .await
        .unwrap();
    for phase in [
        InvalidatePhase::BeforeInvalidate,
        InvalidatePhase::Invalidate,
        InvalidatePhase::AfterInvalidate,
    ] {
        registry
            .invalidate(&monitor, session.as_ref(), phase, &a, TIMEOUT)
            .await
            .unwrap();
    }

    assert_eq!(factory.recorder.connects(), 2);
    assert_eq!(factory.recorder.disconnects(), 1);
    assert_eq!(registry.sessions().len(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let (registry, factory) = registry();
    let monitor = CancellationToken::new();
    let (a, b) = (consumer("A"), consumer("B"));

    registry
        .open_session(&monitor, &a, &host("one"), None, None)
        .await
        .unwrap();
    registry
        .open_session(&monitor, &b, &host("one"), None, None)
        .await
        .unwrap();
    registry
        .open_session(&monitor, &a, &host("two"), None, None)
        .await
        .unwrap();
    assert_eq!(registry.sessions().len(), 2);

    registry.shutdown(&monitor, TIMEOUT).await;
    assert!(registry.sessions().is_empty());
    assert_eq!(factory.recorder.disconnects(), 2);
}

#[tokio::test]
async fn test_snapshots_and_info() {
    let (registry, _factory) = registry();
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let a = consumer("A");

    let session = registry.acquire_direct(&a, &h, None);
    session.connect(&monitor, &h, &a).await.unwrap();

    let snapshots = registry.snapshots().await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].destination, "deploy@db.example.com:22");
    assert!(snapshots[0].shared);
    assert_eq!(snapshots[0].consumers.get("A"), Some(&1));

    let json = serde_json::to_value(&snapshots[0]).unwrap();
    assert_eq!(json["consumers"]["A"], 1);
    assert_eq!(
        session.shareable().await.destination_info(),
        "deploy@db.example.com:22"
    );
}

#[tokio::test]
async fn test_identity_source_requires_providers() {
    let (registry, _factory) = registry();
    let err = registry.identity_source().await.err().unwrap();
    assert!(matches!(err, SessionError::IdentitySourceUnavailable(_)));
}

#[tokio::test]
async fn test_file_transfer_passes_through() {
    let (registry, factory) = registry();
    let monitor = CancellationToken::new();
    let h = host("db.example.com");
    let a = consumer("A");

    let session = registry
        .open_session(&monitor, &a, &h, None, None)
        .await
        .unwrap();

    let mut downloaded: Vec<u8> = Vec::new();
    let n = session
        .get_file("/etc/motd", &mut downloaded, &monitor)
        .await
        .unwrap();
    assert_eq!(n as usize, downloaded.len());
    assert_eq!(downloaded, b"contents of /etc/motd");

    let mut upload: &[u8] = b"hello";
    let n = session
        .put_file(&mut upload, "/tmp/hello", &monitor)
        .await
        .unwrap();
    assert_eq!(n, 5);
    assert_eq!(
        factory.recorder.count(|e| matches!(e, Event::Put(p) if p == "/tmp/hello")),
        1
    );
    assert_eq!(session.client_version().await, "SSH-2.0-mock_client");
}

#[tokio::test]
async fn test_different_credentials_do_not_share() {
    let (registry, factory) = registry();
    let monitor = CancellationToken::new();
    let password = |p: &str| HostAuth::Password { password: p.into() };
    let right = HostDestination::new("db.example.com", 22, "deploy", password("right"));
    let wrong = HostDestination::new("db.example.com", 22, "deploy", password("WRONG"));
    let (a, b) = (consumer("A"), consumer("B"));

    let session_a = registry
        .open_session(&monitor, &a, &right, None, None)
        .await
        .unwrap();
    let session_b = registry.acquire_session(&b, &wrong, None, None);
    session_b.connect(&monitor, &wrong, &b).await.unwrap();

    // B logged in on its own transport
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.recorder.connects(), 2);
    assert_eq!(registry.sessions().len(), 2);
    assert_eq!(
        session_a.dependent_consumers().await,
        vec![ConsumerToken::new("A")]
    );
    assert_eq!(
        session_b.dependent_consumers().await,
        vec![ConsumerToken::new("B")]
    );

    // Same credentials still share
    let c = consumer("C");
    let session_c = registry
        .open_session(&monitor, &c, &right, None, None)
        .await
        .unwrap();
    assert_eq!(factory.recorder.connects(), 2);
    assert_eq!(
        session_c.dependent_consumers().await,
        vec![ConsumerToken::new("A"), ConsumerToken::new("C")]
    );
}
