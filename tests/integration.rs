use std::sync::Arc;
use std::time::Duration;

use tchannel_rs::{CallOptions, Channel, Options};

async fn bound_channel(options: Options) -> (Channel, String) {
    let channel = Channel::new(options);
    let addr = channel.listen("127.0.0.1", 0).await.unwrap();
    channel.set_local_host_port(addr.to_string());
    (channel, addr.to_string())
}

#[tokio::test]
async fn simple_call_echoes_args_and_clears_pending_counts() {
    let (server, server_addr) = bound_channel(Options::default()).await;
    server
        .register("foo", |req| async move { (true, req.arg2, req.arg3) })
        .unwrap();

    let (client, _) = bound_channel(Options::default()).await;
    let resp = client
        .request(
            &server_addr,
            CallOptions {
                arg1: b"foo".to_vec(),
                arg2: b"k".to_vec(),
                arg3: b"v".to_vec(),
                timeout: None,
            },
        )
        .await
        .unwrap();

    assert!(resp.ok);
    assert_eq!(resp.arg2, b"k");
    assert_eq!(resp.arg3, b"v");

    // Give both sides a moment to retire their operation-table entries.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.peer_count(), 1);
    assert_eq!(server.peer_count(), 1);
}

#[tokio::test]
async fn unregistered_endpoint_gets_default_not_ok() {
    let (server, server_addr) = bound_channel(Options::default()).await;
    let (client, _) = bound_channel(Options::default()).await;

    let resp = client
        .request(
            &server_addr,
            CallOptions {
                arg1: b"nonexistent".to_vec(),
                arg2: Vec::new(),
                arg3: Vec::new(),
                timeout: None,
            },
        )
        .await
        .unwrap();

    assert!(!resp.ok);
    assert_eq!(resp.arg3, b"no handler defined");
}

#[tokio::test]
async fn no_handler_channel_replies_not_ok_to_every_call() {
    let (server, server_addr) = bound_channel(Options {
        handler: Arc::new(tchannel_rs::NoHandler),
        ..Default::default()
    })
    .await;
    let (client, _) = bound_channel(Options::default()).await;

    let resp = client
        .request(
            &server_addr,
            CallOptions {
                arg1: b"anything".to_vec(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!resp.ok);
    assert_eq!(resp.arg3, b"no handler defined");
    drop(server);
}

#[tokio::test(start_paused = true)]
async fn per_request_timeout_fires_without_killing_the_connection() {
    let mut options = Options::default();
    options.timeout_check_interval = Duration::from_millis(50);
    options.timeout_fuzz = Duration::from_millis(0);
    let (server, server_addr) = bound_channel(options.clone()).await;
    server
        .register("black-hole", |_req| async move {
            // Never replies within the 50ms wait below.
            tokio::time::sleep(Duration::from_secs(3600)).await;
            (true, Vec::new(), Vec::new())
        })
        .unwrap();

    let (client, _) = bound_channel(options).await;
    let call = client.request(
        &server_addr,
        CallOptions {
            arg1: b"black-hole".to_vec(),
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );
    tokio::pin!(call);

    tokio::time::advance(Duration::from_millis(200)).await;
    let err = call.await.unwrap_err();
    assert!(matches!(err, tchannel_rs::Error::TimedOut));

    // The connection itself must survive a single timeout; a fresh request
    // still round-trips.
    server.register("ping", |_req| async move { (true, Vec::new(), Vec::new()) }).ok();
    let resp = client
        .request(
            &server_addr,
            CallOptions {
                arg1: b"ping".to_vec(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(resp.ok);
}

#[tokio::test(start_paused = true)]
async fn dead_link_is_destroyed_after_two_sweeps_of_silence() {
    let mut options = Options::default();
    options.timeout_check_interval = Duration::from_millis(50);
    options.timeout_fuzz = Duration::from_millis(0);
    let (server, server_addr) = bound_channel(options.clone()).await;
    server
        .register("black-hole", |_req| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            (true, Vec::new(), Vec::new())
        })
        .unwrap();

    let (client, _) = bound_channel(options).await;
    let call = client.request(
        &server_addr,
        CallOptions {
            arg1: b"black-hole".to_vec(),
            timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    );
    tokio::pin!(call);

    // First sweep: the call times out, lastTimeoutTime is set.
    tokio::time::advance(Duration::from_millis(60)).await;
    let _ = call.await;

    // Second sweep with no intervening frame: the link is declared dead.
    tokio::time::advance(Duration::from_millis(60)).await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    let resp = client
        .request(
            &server_addr,
            CallOptions {
                arg1: b"black-hole".to_vec(),
                timeout: Some(Duration::from_millis(10)),
                ..Default::default()
            },
        )
        .await;
    assert!(resp.is_err());
}

#[tokio::test]
async fn close_errors_in_flight_requests_and_is_not_idempotent() {
    let (server, server_addr) = bound_channel(Options::default()).await;
    server
        .register("slow", |_req| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            (true, Vec::new(), Vec::new())
        })
        .unwrap();

    let (client, _) = bound_channel(Options::default()).await;
    let call = client.request(
        &server_addr,
        CallOptions {
            arg1: b"slow".to_vec(),
            ..Default::default()
        },
    );
    tokio::pin!(call);

    tokio::time::sleep(Duration::from_millis(20)).await;
    client.close().await.unwrap();
    let err = call.await.unwrap_err();
    assert!(matches!(err, tchannel_rs::Error::Shutdown));

    assert!(client.close().await.is_err());
    drop(server);
}

#[tokio::test]
async fn large_streaming_round_trip_spans_many_wire_frames() {
    let (server, server_addr) = bound_channel(Options::default()).await;
    server
        .register("echo", |req| async move { (true, req.arg2, req.arg3) })
        .unwrap();
    let (client, _) = bound_channel(Options::default()).await;

    // (header, body) sizes chosen to force multi-frame reassembly on both
    // arguments (well past the 16-bit single-frame budget).
    let pairs: [(usize, usize); 4] = [
        (31 * 1024 + 966, 64 * 1024),
        (431 * 1024 + 1001, 64 * 1024),
        (423 * 1024 + 1023, 128 * 1024),
        (437 * 1024 + 17, 512 * 1024),
    ];

    for (header_len, body_len) in pairs {
        let header: Vec<u8> = (0..header_len).map(|i| (i % 256) as u8).collect();
        let body: Vec<u8> = (0..body_len).map(|i| ((i * 7 + 3) % 256) as u8).collect();

        let resp = client
            .request(
                &server_addr,
                CallOptions {
                    arg1: b"echo".to_vec(),
                    arg2: header.clone(),
                    arg3: body.clone(),
                    timeout: Some(Duration::from_secs(5)),
                },
            )
            .await
            .unwrap();

        assert!(resp.ok);
        assert_eq!(resp.arg2, header);
        assert_eq!(resp.arg3, body);
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
}
