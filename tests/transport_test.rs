// End-to-end tests for the built-in TCP and in-memory transports

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tether::transport::memory::MemoryHub;
use tether::transport::tcp::{Envelope, TcpTransport};
use tether::{
    AuthFunc, ConnectorConfig, ConnectorKind, ConnectorStore, Credentials, KindTable, Message,
    MessageCallback, Role, SupervisorConfig, Transport,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn settings() -> SupervisorConfig {
    SupervisorConfig {
        retry_delay_ms: 5,
        ..SupervisorConfig::default()
    }
}

fn collector() -> (MessageCallback, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: MessageCallback = Arc::new(move |msg| {
        let _ = tx.send(msg);
    });
    (callback, rx)
}

/// Built-in transports start in their own task; waits for the first connection.
async fn wait_connected(store: &ConnectorStore, name: &str) {
    let connector = store.get(name).await.expect("unknown connector");
    for _ in 0..500 {
        if connector.is_connected() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("connector `{}` never connected", name);
}

async fn read_envelope(lines: &mut tokio::io::Lines<BufReader<TcpStream>>) -> Envelope {
    let line = timeout(WAIT, lines.next_line())
        .await
        .expect("timed out waiting for a line")
        .unwrap()
        .expect("socket closed");
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn test_tcp_outbound_sends_envelopes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let table = KindTable::builtin(MemoryHub::new());
    let store = ConnectorStore::from_table(&table, ConnectorKind::TcpOutbound, settings()).unwrap();
    let mut config = ConnectorConfig::new(1, "billing", address);
    config.options.insert("username".to_string(), json!("user1"));
    config.options.insert("password".to_string(), json!("secret"));
    store.create("billing", config, None, None).await.unwrap();

    store.start(None).await;
    let (socket, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut lines = BufReader::new(socket).lines();
    wait_connected(&store, "billing").await;

    store
        .send("billing", Message::new(json!({"amount": 10})))
        .await
        .unwrap();
    store
        .invoke("billing", Message::new(json!({"amount": 20})))
        .await
        .unwrap();

    let first = read_envelope(&mut lines).await;
    assert_eq!(first.message.payload, json!({"amount": 10}));
    let creds = first.credentials.unwrap();
    assert_eq!(creds.username, "user1");
    assert_eq!(creds.password, "secret");
    let second = read_envelope(&mut lines).await;
    assert_eq!(second.message.payload, json!({"amount": 20}));

    store.stop_all().await;
}

#[tokio::test]
async fn test_tcp_outbound_reconnects_after_link_loss() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let table = KindTable::builtin(MemoryHub::new());
    let store = ConnectorStore::from_table(&table, ConnectorKind::TcpOutbound, settings()).unwrap();
    store
        .create("billing", ConnectorConfig::new(1, "billing", address), None, None)
        .await
        .unwrap();
    store.start(None).await;

    let (first, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    drop(first);

    let (second, _) = timeout(WAIT, listener.accept())
        .await
        .expect("connector did not reconnect")
        .unwrap();
    let mut lines = BufReader::new(second).lines();

    wait_connected(&store, "billing").await;
    store
        .send("billing", Message::new(json!("after")))
        .await
        .unwrap();
    assert_eq!(read_envelope(&mut lines).await.message.payload, json!("after"));

    store.stop_all().await;
}

#[tokio::test]
async fn test_tcp_channel_authenticates_and_delivers() {
    let transport = Arc::new(TcpTransport::new(Role::Channel));
    let shared = Arc::clone(&transport);
    let table = KindTable::builder()
        .register(
            ConnectorKind::TcpChannel,
            Arc::new(move |_config: &ConnectorConfig| {
                let transport: Arc<dyn Transport> = shared.clone();
                Ok(transport)
            }),
        )
        .build();
    let store = ConnectorStore::from_table(&table, ConnectorKind::TcpChannel, settings()).unwrap();

    let (callback, mut received) = collector();
    let auth: AuthFunc = Arc::new(|c: &Credentials| c.username == "user1" && c.password == "secret");
    let mut config = ConnectorConfig::new(3, "inbox", "127.0.0.1:0");
    config.service_name = Some("orders.create".to_string());
    store
        .create("inbox", config, Some(callback), Some(auth))
        .await
        .unwrap();
    store.start(None).await;
    wait_connected(&store, "inbox").await;

    let local = transport.local_addr().await.expect("channel is not listening");
    let mut client = TcpStream::connect(local).await.unwrap();

    let rejected = Envelope {
        credentials: Some(Credentials {
            username: "user1".to_string(),
            password: "wrong".to_string(),
        }),
        message: Message::new(json!("rejected")),
    };
    let anonymous = Envelope {
        credentials: None,
        message: Message::new(json!("anonymous")),
    };
    let accepted = Envelope {
        credentials: Some(Credentials {
            username: "user1".to_string(),
            password: "secret".to_string(),
        }),
        message: Message::new(json!("accepted")),
    };
    for envelope in [rejected, anonymous, accepted] {
        client.write_all(&envelope.encode().unwrap()).await.unwrap();
    }
    client.flush().await.unwrap();

    let msg = timeout(WAIT, received.recv()).await.unwrap().unwrap();
    assert_eq!(msg.payload, json!("accepted"));
    assert_eq!(msg.service.as_deref(), Some("orders.create"));
    assert!(received.try_recv().is_err());

    let err = store
        .send("inbox", Message::new(json!(1)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("inbound only"));

    store.stop_all().await;
    assert!(transport.local_addr().await.is_none());
}

#[tokio::test]
async fn test_memory_channel_receives_from_outbound() {
    let table = KindTable::builtin(MemoryHub::new());
    let channels =
        ConnectorStore::from_table(&table, ConnectorKind::MemoryChannel, settings()).unwrap();
    let outbound =
        ConnectorStore::from_table(&table, ConnectorKind::MemoryOutbound, settings()).unwrap();

    let (callback, mut received) = collector();
    let mut config = ConnectorConfig::new(1, "inbox", "mem://inbox");
    config.service_name = Some("inbox.handle".to_string());
    channels
        .create("inbox", config, Some(callback), None)
        .await
        .unwrap();
    outbound
        .create("sender", ConnectorConfig::new(2, "sender", "mem://inbox"), None, None)
        .await
        .unwrap();

    channels.start(None).await;
    outbound.start(None).await;
    wait_connected(&outbound, "sender").await;

    outbound
        .send("sender", Message::new(json!({"n": 1})))
        .await
        .unwrap();
    let msg = timeout(WAIT, received.recv()).await.unwrap().unwrap();
    assert_eq!(msg.payload, json!({"n": 1}));
    assert_eq!(msg.service.as_deref(), Some("inbox.handle"));
}

#[tokio::test]
async fn test_memory_outbound_waits_for_late_channel() {
    let table = KindTable::builtin(MemoryHub::new());
    let supervisor = SupervisorConfig {
        retry_delay_ms: 5,
        first_connect_timeout_secs: Some(0),
        ..SupervisorConfig::default()
    };
    let channels =
        ConnectorStore::from_table(&table, ConnectorKind::MemoryChannel, settings()).unwrap();
    let outbound =
        ConnectorStore::from_table(&table, ConnectorKind::MemoryOutbound, supervisor).unwrap();

    outbound
        .create("sender", ConnectorConfig::new(2, "sender", "late"), None, None)
        .await
        .unwrap();
    outbound.start(None).await;
    let sender = outbound.get("sender").await.unwrap();
    assert!(!sender.is_connected());
    assert!(sender.keep_connecting());

    let (callback, mut received) = collector();
    channels
        .create("late", ConnectorConfig::new(1, "late", "late"), Some(callback), None)
        .await
        .unwrap();
    channels.start(None).await;

    for _ in 0..200 {
        if sender.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(sender.is_connected());
    assert!(sender.status().await.attempts >= 1);

    outbound
        .send("sender", Message::new(json!("hello")))
        .await
        .unwrap();
    let msg = timeout(WAIT, received.recv()).await.unwrap().unwrap();
    assert_eq!(msg.payload, json!("hello"));

    outbound.stop_all().await;
    channels.stop_all().await;
}

#[tokio::test]
async fn test_tcp_duplex_delivers_replies() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    // Remote end echoes every line back
    let echo = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let echoed = format!("{}\n", line);
            if writer.write_all(echoed.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let table = KindTable::builtin(MemoryHub::new());
    let store = ConnectorStore::from_table(&table, ConnectorKind::TcpDuplex, settings()).unwrap();
    let (callback, mut received) = collector();
    let mut config = ConnectorConfig::new(4, "pricing", address);
    config.service_name = Some("pricing.reply".to_string());
    store
        .create("pricing", config, Some(callback), None)
        .await
        .unwrap();
    store.start(None).await;
    wait_connected(&store, "pricing").await;

    store
        .send("pricing", Message::new(json!({"quote": 7})))
        .await
        .unwrap();
    let reply = timeout(WAIT, received.recv()).await.unwrap().unwrap();
    assert_eq!(reply.payload, json!({"quote": 7}));
    assert_eq!(reply.service.as_deref(), Some("pricing.reply"));

    store.stop_all().await;
    echo.abort();
}

#[tokio::test]
async fn test_memory_duplex_pair_exchanges_messages() {
    let table = KindTable::builtin(MemoryHub::new());
    let store = ConnectorStore::from_table(&table, ConnectorKind::MemoryDuplex, settings()).unwrap();

    let (left_callback, mut left_received) = collector();
    let (right_callback, mut right_received) = collector();
    let mut left = ConnectorConfig::new(1, "left", "left");
    left.options.insert("peer".to_string(), json!("right"));
    let mut right = ConnectorConfig::new(2, "right", "right");
    right.options.insert("peer".to_string(), json!("left"));
    store
        .create("left", left, Some(left_callback), None)
        .await
        .unwrap();
    store
        .create("right", right, Some(right_callback), None)
        .await
        .unwrap();

    assert_eq!(store.start(None).await, 2);
    wait_connected(&store, "left").await;
    wait_connected(&store, "right").await;

    store
        .send("left", Message::new(json!("to right")))
        .await
        .unwrap();
    store
        .send("right", Message::new(json!("to left")))
        .await
        .unwrap();

    let at_right = timeout(WAIT, right_received.recv()).await.unwrap().unwrap();
    assert_eq!(at_right.payload, json!("to right"));
    let at_left = timeout(WAIT, left_received.recv()).await.unwrap().unwrap();
    assert_eq!(at_left.payload, json!("to left"));

    store.stop_all().await;
}
