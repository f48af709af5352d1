use std::time::Duration;

use tokio::time::timeout;

use ferry_core::Envelope;
use ferry_transport::{Broker, ChunkCodec, ChunkFrame, CodecConfig, MemoryHub, PubSub, TcpPubSub};

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_chunks(device_id: &str) -> CodecConfig {
    let mut config = CodecConfig::new(device_id);
    config.chunk_size = 64;
    config.telemetry_interval = Duration::from_millis(50);
    config
}

#[tokio::test]
async fn test_multi_chunk_transfer_over_memory_hub() {
    init_logging();
    let hub = MemoryHub::new(1024);
    let (mut link_a, _codec_a) = ChunkCodec::spawn(hub.attach(), small_chunks("dev-a"));
    let (mut link_b, _codec_b) = ChunkCodec::spawn(hub.attach(), small_chunks("dev-b"));

    let body = "x".repeat(1000);
    link_a
        .outbound
        .send(Envelope::text(body.clone()))
        .await
        .unwrap();

    let received = timeout(WAIT, link_b.inbound.recv())
        .await
        .expect("no message arrived")
        .unwrap();
    assert_eq!(received.body, body);
    assert_eq!(received.kind, ferry_core::MessageKind::Text);

    // The sender must not see its own message echoed back.
    assert!(timeout(Duration::from_millis(200), link_a.inbound.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn test_completion_telemetry_reaches_the_receiver() {
    init_logging();
    let hub = MemoryHub::new(1024);
    let (mut link_a, _codec_a) = ChunkCodec::spawn(hub.attach(), small_chunks("dev-a"));
    let (mut link_b, _codec_b) = ChunkCodec::spawn(hub.attach(), small_chunks("dev-b"));

    link_a
        .outbound
        .send(Envelope::text("y".repeat(2000)))
        .await
        .unwrap();
    timeout(WAIT, link_b.inbound.recv())
        .await
        .expect("no message arrived")
        .unwrap();

    // The receiving codec guarantees a final 100% sample for a message
    // that went through reassembly.
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let batch = timeout(Duration::from_secs(1), link_b.telemetry.recv())
            .await
            .expect("telemetry went quiet before completion")
            .unwrap();
        if batch.iter().any(|p| p.progress_percent >= 100.0) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
    }
}

#[tokio::test]
async fn test_single_chunk_messages_produce_no_telemetry() {
    init_logging();
    let hub = MemoryHub::new(64);
    let (mut link_a, _codec_a) = ChunkCodec::spawn(hub.attach(), CodecConfig::new("dev-a"));
    let (mut link_b, _codec_b) = ChunkCodec::spawn(hub.attach(), CodecConfig::new("dev-b"));

    link_a.outbound.send(Envelope::text("small")).await.unwrap();
    timeout(WAIT, link_b.inbound.recv())
        .await
        .expect("no message arrived")
        .unwrap();

    assert!(timeout(Duration::from_millis(300), link_b.telemetry.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn test_oversized_last_index_does_not_stop_the_codec() {
    init_logging();
    let hub = MemoryHub::new(1024);
    let (mut link, _codec) = ChunkCodec::spawn(hub.attach(), small_chunks("dev-a"));
    let mut rogue = hub.attach();

    // A frame claiming u32::MAX + 1 chunks must be discarded without
    // killing the codec task or opening a reassembly entry.
    let bad = ChunkFrame {
        message_id: "m-bad".to_string(),
        origin: "rogue".to_string(),
        index: 0,
        last_index: u32::MAX,
        payload: vec![1],
    };
    rogue
        .publish(&bincode::serialize(&bad).unwrap())
        .await
        .unwrap();

    let (peer, _peer_codec) = ChunkCodec::spawn(hub.attach(), small_chunks("dev-b"));
    peer.outbound
        .send(Envelope::text("still alive"))
        .await
        .unwrap();

    let received = timeout(WAIT, link.inbound.recv())
        .await
        .expect("codec stopped accepting messages")
        .unwrap();
    assert_eq!(received.body, "still alive");

    // The rejected frame must not linger as a partial message either.
    assert!(timeout(Duration::from_millis(300), link.telemetry.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn test_final_stats_are_returned_when_the_link_drops() {
    init_logging();
    let hub = MemoryHub::new(1024);
    let (link, codec) = ChunkCodec::spawn(hub.attach(), small_chunks("dev-a"));
    let (mut peer, _peer_codec) = ChunkCodec::spawn(hub.attach(), small_chunks("dev-b"));

    link.outbound
        .send(Envelope::text("z".repeat(200)))
        .await
        .unwrap();
    timeout(WAIT, peer.inbound.recv())
        .await
        .expect("no message arrived")
        .unwrap();

    drop(link);
    let stats = timeout(WAIT, codec)
        .await
        .expect("codec never stopped")
        .unwrap();
    assert_eq!(stats.messages_sent, 1);
    assert!(stats.frames_sent > 1);
}

#[tokio::test]
async fn test_broker_fans_out_to_all_subscribers() {
    init_logging();
    let broker = Broker::bind("127.0.0.1:0").await.unwrap();
    let addr = broker.local_addr().to_string();

    let mut a = TcpPubSub::connect(&addr, "ferry").await.unwrap();
    let mut b = TcpPubSub::connect(&addr, "ferry").await.unwrap();
    let mut other = TcpPubSub::connect(&addr, "elsewhere").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    a.publish(b"broadcast").await.unwrap();

    let at_a = timeout(WAIT, a.recv()).await.unwrap().unwrap().unwrap();
    let at_b = timeout(WAIT, b.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(at_a, b"broadcast");
    assert_eq!(at_b, b"broadcast");

    // Channel isolation: the other channel sees nothing.
    assert!(timeout(Duration::from_millis(200), other.recv())
        .await
        .is_err());
    broker.shutdown();
}

#[tokio::test]
async fn test_envelope_transfer_through_broker() {
    init_logging();
    let broker = Broker::bind("127.0.0.1:0").await.unwrap();
    let addr = broker.local_addr().to_string();

    let agent_conn = TcpPubSub::connect(&addr, "ops").await.unwrap();
    let operator_conn = TcpPubSub::connect(&addr, "ops").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (mut agent, _codec_a) = ChunkCodec::spawn(agent_conn, small_chunks("agent"));
    let (mut operator, _codec_b) = ChunkCodec::spawn(operator_conn, small_chunks("operator"));

    operator
        .outbound
        .send(Envelope::text(r#"{"action":"ping"}"#))
        .await
        .unwrap();
    let at_agent = timeout(WAIT, agent.inbound.recv())
        .await
        .expect("command never arrived")
        .unwrap();
    assert_eq!(at_agent.body, r#"{"action":"ping"}"#);

    agent
        .outbound
        .send(Envelope::file("f.bin", "QUJD", 3))
        .await
        .unwrap();
    let at_operator = timeout(WAIT, operator.inbound.recv())
        .await
        .expect("file never arrived")
        .unwrap();
    assert_eq!(at_operator.file_name.as_deref(), Some("f.bin"));
    assert_eq!(at_operator.body, "QUJD");
    broker.shutdown();
}
