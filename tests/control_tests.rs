use std::sync::Arc;
use std::time::Duration;

use quicshim::{
    write_message, ClientControl, ControlMessage, ControlReader, ControlSession, SessionRegistry,
    SwappableEndpoint,
};
use tokio::io::{split, AsyncWriteExt, DuplexStream};
use tokio::time::{sleep, timeout, Instant};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const ACK_TIMEOUT: Duration = Duration::from_millis(800);

async fn test_endpoint() -> Arc<SwappableEndpoint> {
    // The peer does not need to exist for control-plane tests.
    Arc::new(
        SwappableEndpoint::connect("127.0.0.1:45000".parse().unwrap())
            .await
            .unwrap(),
    )
}

fn control_pipe() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(16 * 1024)
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn migrate_is_armed_and_acknowledged() {
    let (server_io, client_io) = control_pipe();
    let (sr, sw) = split(server_io);
    let (cr, cw) = split(client_io);

    let endpoint = test_endpoint().await;
    let session = ControlSession::start(sr, sw);
    let control = ClientControl::start(cr, cw, "car", Arc::clone(&endpoint))
        .await
        .unwrap();

    let outcome = timeout(
        TEST_TIMEOUT,
        session.send_migrate_and_wait("127.0.0.1", 46000, ACK_TIMEOUT),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(outcome.acked);
    assert!(outcome.waited < ACK_TIMEOUT);
    assert!(control.migrate_seen().is_cancelled());
    assert_eq!(
        endpoint.armed_peer(),
        Some("127.0.0.1:46000".parse().unwrap())
    );
    // Arming never touches the live peer.
    assert_eq!(
        endpoint.real_peer(),
        Some("127.0.0.1:45000".parse().unwrap())
    );
    // The hello preceded the ack on the ordered stream.
    assert_eq!(session.client_id(), Some("car".to_string()));
}

#[tokio::test]
async fn migrate_without_a_listener_times_out() {
    let (server_io, client_io) = control_pipe();
    let (sr, sw) = split(server_io);
    // Keep the client end alive but silent, like a paused process.
    let _client_io = client_io;

    let session = ControlSession::start(sr, sw);
    let started = Instant::now();
    let outcome = timeout(
        TEST_TIMEOUT,
        session.send_migrate_and_wait("10.0.0.2", 5243, ACK_TIMEOUT),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(!outcome.acked);
    assert!(started.elapsed() >= ACK_TIMEOUT);
    // Timing out is informational; the session is still usable.
    assert!(!session.is_closed());
    assert!(outcome.require_ack().is_err());
}

#[tokio::test]
async fn duplicate_migrate_fires_the_latch_once_and_acks_twice() {
    let (server_io, client_io) = control_pipe();
    let (sr, sw) = split(server_io);
    let (cr, cw) = split(client_io);

    let endpoint = test_endpoint().await;
    let session = ControlSession::start(sr, sw);
    let control = ClientControl::start(cr, cw, "car", Arc::clone(&endpoint))
        .await
        .unwrap();

    let first = session
        .send_migrate_and_wait("127.0.0.1", 46000, ACK_TIMEOUT)
        .await
        .unwrap();
    assert!(first.acked);
    assert!(control.migrate_seen().is_cancelled());

    let second = session
        .send_migrate_and_wait("127.0.0.1", 47000, ACK_TIMEOUT)
        .await
        .unwrap();
    assert!(second.acked);
    // The latch stays fired; the armed slot follows the newer announcement.
    assert!(control.migrate_seen().is_cancelled());
    assert_eq!(
        endpoint.armed_peer(),
        Some("127.0.0.1:47000".parse().unwrap())
    );
}

#[tokio::test]
async fn client_loop_survives_noise_on_the_stream() {
    let (server_io, client_io) = control_pipe();
    let (mut sr, mut sw) = split(server_io);
    let (cr, cw) = split(client_io);

    let endpoint = test_endpoint().await;
    let _control = ClientControl::start(cr, cw, "car", Arc::clone(&endpoint))
        .await
        .unwrap();

    // A malformed line and an unknown type must both be skipped.
    sw.write_all(b"this is not json\n").await.unwrap();
    sw.write_all(b"{\"type\":\"quiesce\",\"id\":\"q-1\"}\n")
        .await
        .unwrap();
    write_message(
        &mut sw,
        &ControlMessage::Migrate {
            id: "m-1".into(),
            new_addr: "127.0.0.1".into(),
            new_port: 46000,
        },
    )
    .await
    .unwrap();

    let mut reader = ControlReader::new(&mut sr);
    // Skip the client's hello, then expect the ack for m-1.
    loop {
        match timeout(TEST_TIMEOUT, reader.next()).await.unwrap().unwrap() {
            Some(ControlMessage::Hello { .. }) => continue,
            Some(ControlMessage::Ack { ack_id }) => {
                assert_eq!(ack_id, "m-1");
                break;
            }
            other => panic!("unexpected control message: {other:?}"),
        }
    }
    assert_eq!(
        endpoint.armed_peer(),
        Some("127.0.0.1:46000".parse().unwrap())
    );
}

#[tokio::test]
async fn in_band_commit_promotes_the_armed_peer() {
    let (server_io, client_io) = control_pipe();
    let (mut sr, mut sw) = split(server_io);
    let (cr, cw) = split(client_io);

    let endpoint = test_endpoint().await;
    let _control = ClientControl::start(cr, cw, "car", Arc::clone(&endpoint))
        .await
        .unwrap();

    write_message(
        &mut sw,
        &ControlMessage::Migrate {
            id: "m-1".into(),
            new_addr: "127.0.0.1".into(),
            new_port: 46000,
        },
    )
    .await
    .unwrap();

    // Drain hello + ack so the order below is unambiguous.
    let mut reader = ControlReader::new(&mut sr);
    loop {
        if let Some(ControlMessage::Ack { .. }) =
            timeout(TEST_TIMEOUT, reader.next()).await.unwrap().unwrap()
        {
            break;
        }
    }

    write_message(&mut sw, &ControlMessage::Commit { id: "c-1".into() })
        .await
        .unwrap();

    let ep = Arc::clone(&endpoint);
    wait_until(move || ep.real_peer() == Some("127.0.0.1:46000".parse().unwrap())).await;
    assert_eq!(endpoint.armed_peer(), None);
}

#[tokio::test]
async fn unmatched_acks_are_dropped() {
    let (server_io, client_io) = control_pipe();
    let (sr, sw) = split(server_io);
    let (mut cr, mut cw) = split(client_io);

    let session = ControlSession::start(sr, sw);

    // An ack nobody asked for is ignored without disturbing the session.
    write_message(
        &mut cw,
        &ControlMessage::Ack {
            ack_id: "never-sent".into(),
        },
    )
    .await
    .unwrap();

    // A hand-rolled client: read the migrate, ack it properly.
    let responder = tokio::spawn(async move {
        let mut reader = ControlReader::new(&mut cr);
        loop {
            if let Some(ControlMessage::Migrate { id, .. }) =
                reader.next().await.unwrap()
            {
                write_message(&mut cw, &ControlMessage::Ack { ack_id: id })
                    .await
                    .unwrap();
                break;
            }
        }
    });

    let outcome = timeout(
        TEST_TIMEOUT,
        session.send_migrate_and_wait("127.0.0.1", 46000, ACK_TIMEOUT),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(outcome.acked);
    responder.await.unwrap();
}

#[tokio::test]
async fn registry_broadcasts_to_every_live_session() {
    let registry = SessionRegistry::new();
    let mut handles = Vec::new();
    let mut controls = Vec::new();
    let mut endpoints = Vec::new();

    for _ in 0..2 {
        let (server_io, client_io) = control_pipe();
        let (sr, sw) = split(server_io);
        let (cr, cw) = split(client_io);
        let endpoint = test_endpoint().await;
        handles.push(registry.register(ControlSession::start(sr, sw)));
        controls.push(
            ClientControl::start(cr, cw, "car", Arc::clone(&endpoint))
                .await
                .unwrap(),
        );
        endpoints.push(endpoint);
    }
    assert_eq!(registry.len(), 2);

    let outcomes = timeout(
        TEST_TIMEOUT,
        registry.broadcast_migrate("127.0.0.1", 46000, ACK_TIMEOUT),
    )
    .await
    .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.acked));
    for endpoint in &endpoints {
        assert_eq!(
            endpoint.armed_peer(),
            Some("127.0.0.1:46000".parse().unwrap())
        );
    }
}

#[tokio::test]
async fn registry_prunes_dead_sessions() {
    let registry = SessionRegistry::new();

    // A session whose client end is already gone, with its registration
    // guard still held by a lingering connection task.
    let (server_io, client_io) = control_pipe();
    let (sr, sw) = split(server_io);
    drop(client_io);
    let dead = ControlSession::start(sr, sw);
    let _handle = registry.register(Arc::clone(&dead));

    let dead_probe = Arc::clone(&dead);
    wait_until(move || dead_probe.is_closed()).await;

    let outcomes = timeout(
        TEST_TIMEOUT,
        registry.broadcast_migrate("127.0.0.1", 46000, ACK_TIMEOUT),
    )
    .await
    .unwrap();
    assert!(outcomes.is_empty());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn dropping_the_handle_unregisters_the_session() {
    let registry = SessionRegistry::new();

    let (server_io, client_io) = control_pipe();
    let (sr, sw) = split(server_io);
    let session = ControlSession::start(sr, sw);
    let handle = registry.register(Arc::clone(&session));
    assert_eq!(registry.len(), 1);

    // The connection dies; its owning task drops the guard on the way out.
    // No broadcast runs in between, cleanup comes from the guard alone.
    drop(client_io);
    let probe = Arc::clone(&session);
    wait_until(move || probe.is_closed()).await;
    assert_eq!(registry.len(), 1);

    drop(handle);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn explicit_unregister_removes_the_session_early() {
    let registry = SessionRegistry::new();

    let (server_io, client_io) = control_pipe();
    let (sr, sw) = split(server_io);
    let _client_io = client_io;
    let handle = registry.register(ControlSession::start(sr, sw));
    assert_eq!(registry.len(), 1);

    handle.unregister();
    assert!(registry.is_empty());
}
