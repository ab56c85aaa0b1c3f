use bytes::{BufMut, BytesMut};
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;
use vulp_session::{
    Client, ClientConfig, ClientEvent, ClientEvents, ConnectionState, DisconnectReason,
    SendOutcome,
};
use vulp_wire::{
    build_resync, FixedHeader, Frame, FrameDecoder, Login, Packet, PacketType, SessionKey,
};

const WAIT: Duration = Duration::from_secs(5);

/// Server end of an in-memory connection
struct Bouncer {
    stream: DuplexStream,
    buf: BytesMut,
    decoder: FrameDecoder,
}

impl Bouncer {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            decoder: FrameDecoder::new(),
        }
    }

    async fn recv(&mut self) -> Frame {
        timeout(WAIT, async {
            loop {
                if let Some(frame) = self.decoder.decode(&mut self.buf).unwrap() {
                    return frame;
                }
                let n = self.stream.read_buf(&mut self.buf).await.unwrap();
                assert!(n > 0, "client closed the stream");
            }
        })
        .await
        .expect("timed out waiting for a frame")
    }

    async fn recv_login(&mut self) -> Login {
        let frame = self.recv().await;
        assert_eq!(frame.packet.packet_type(), PacketType::LOGIN);
        assert_eq!(frame.peer_ack_id, None);
        Login::decode(frame.packet.payload()).unwrap()
    }

    async fn send(&mut self, packet: Packet, ack: u32) {
        self.stream
            .write_all(&packet.encode(ack).unwrap())
            .await
            .unwrap();
    }

    async fn auth_success(&mut self, key: SessionKey) {
        let packet = Packet::control(PacketType::AUTH_SUCCESS, key.as_bytes().to_vec()).unwrap();
        self.send(packet, 0).await;
    }

    async fn resync(&mut self, acked: u32) {
        let packet = Packet::control(PacketType::RESYNC, build_resync(acked)).unwrap();
        self.send(packet, 0).await;
    }

    async fn assert_silent(&mut self) {
        let mut byte = [0u8; 1];
        let read = timeout(Duration::from_millis(100), self.stream.read(&mut byte)).await;
        assert!(read.is_err(), "client wrote while it should be silent");
    }

    async fn assert_closed(&mut self) {
        let mut byte = [0u8; 1];
        let read = timeout(WAIT, self.stream.read(&mut byte))
            .await
            .expect("timed out waiting for close");
        assert_eq!(read.unwrap(), 0);
    }
}

async fn next_event(events: &mut ClientEvents) -> ClientEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

async fn wait_for_state(events: &mut ClientEvents, state: ConnectionState) {
    loop {
        if next_event(events).await == ClientEvent::StateChanged(state) {
            return;
        }
    }
}

async fn wait_for_disconnect(events: &mut ClientEvents) -> DisconnectReason {
    loop {
        if let ClientEvent::Disconnected { reason } = next_event(events).await {
            return reason;
        }
    }
}

async fn wait_for_packet(events: &mut ClientEvents) -> (PacketType, bytes::Bytes) {
    loop {
        if let ClientEvent::Packet {
            packet_type,
            payload,
        } = next_event(events).await
        {
            return (packet_type, payload);
        }
    }
}

async fn open(client: &Client) -> Bouncer {
    let (local, remote) = duplex(64 * 1024);
    client.attach(local).await;
    Bouncer::new(remote)
}

async fn authenticate(client: &Client, events: &mut ClientEvents, key: SessionKey) -> Bouncer {
    let mut bouncer = open(client).await;
    assert_eq!(
        client.login().await.unwrap(),
        SendOutcome::Written { sequence_id: None }
    );
    bouncer.recv_login().await;
    bouncer.auth_success(key).await;
    wait_for_state(events, ConnectionState::Authenticated).await;
    bouncer
}

fn key(byte: u8) -> SessionKey {
    SessionKey::new([byte; 16])
}

#[tokio::test]
async fn fresh_login_then_ack_empties_cache() {
    let (client, mut events) = Client::new(ClientConfig::default());
    let mut bouncer = open(&client).await;
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::StateChanged(ConnectionState::Connected)
    );

    client.login().await.unwrap();
    let login = bouncer.recv_login().await;
    assert_eq!(login.protocol_version, 1);
    assert_eq!(login.last_received_id, 0);
    assert_eq!(login.session_key, SessionKey::ZERO);
    assert_eq!(client.state().await, ConnectionState::Authenticating);

    bouncer.auth_success(key(0x4b)).await;
    wait_for_state(&mut events, ConnectionState::Authenticated).await;
    assert_eq!(client.session_key().await, key(0x4b));

    let outcome = client
        .send(PacketType::DEBUG_COMMAND, &b"hello"[..])
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::Written { sequence_id: Some(1) });

    let frame = bouncer.recv().await;
    assert_eq!(frame.packet.sequence_id(), Some(1));
    assert_eq!(frame.peer_ack_id, Some(0));
    assert_eq!(frame.packet.payload().as_ref(), b"hello");
    assert_eq!(client.cached_ids().await, vec![1]);

    let reply = Packet::reliable(PacketType::STATUS, 1, &b"ok"[..]).unwrap();
    bouncer.send(reply, 1).await;
    let (packet_type, payload) = wait_for_packet(&mut events).await;
    assert_eq!(packet_type, PacketType::STATUS);
    assert_eq!(payload.as_ref(), b"ok");

    assert!(client.cached_ids().await.is_empty());
    assert_eq!(client.last_received_id().await, 1);
}

#[tokio::test]
async fn nothing_but_login_written_before_auth() {
    let (client, mut events) = Client::new(ClientConfig::default());
    let mut bouncer = open(&client).await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    assert_eq!(
        client.send(PacketType(0x0001), &b"early"[..]).await.unwrap(),
        SendOutcome::Deferred { sequence_id: 1 }
    );
    assert_eq!(
        client.send(PacketType(0x8005), &b"ctl"[..]).await.unwrap(),
        SendOutcome::Suppressed
    );
    bouncer.assert_silent().await;
    assert_eq!(client.cached_ids().await, vec![1]);

    client.login().await.unwrap();
    bouncer.recv_login().await;
    bouncer.auth_success(key(1)).await;
    wait_for_state(&mut events, ConnectionState::Authenticated).await;

    // Deferred packets go out on the next resync.
    bouncer.resync(0).await;
    let frame = bouncer.recv().await;
    assert_eq!(frame.packet.sequence_id(), Some(1));
    assert_eq!(frame.packet.payload().as_ref(), b"early");
}

#[tokio::test]
async fn reconnect_resumes_and_replays_unacked() {
    let (client, mut events) = Client::new(ClientConfig::default());
    let mut bouncer = authenticate(&client, &mut events, key(7)).await;

    for n in 1..=5u8 {
        client.send(PacketType::DEBUG_COMMAND, vec![n]).await.unwrap();
    }
    for id in 1..=5 {
        assert_eq!(bouncer.recv().await.packet.sequence_id(), Some(id));
    }

    let inbound = Packet::reliable(PacketType::WINDOW_ADD, 1, bytes::Bytes::new()).unwrap();
    bouncer.send(inbound, 3).await;
    wait_for_packet(&mut events).await;
    assert_eq!(client.cached_ids().await, vec![4, 5]);

    drop(bouncer);
    assert_eq!(
        wait_for_disconnect(&mut events).await,
        DisconnectReason::Closed
    );
    assert_eq!(client.state().await, ConnectionState::Disconnected);

    assert_eq!(
        client.send(PacketType::DEBUG_COMMAND, vec![6u8]).await.unwrap(),
        SendOutcome::Deferred { sequence_id: 6 }
    );

    let mut bouncer = open(&client).await;
    client.login().await.unwrap();
    let login = bouncer.recv_login().await;
    assert_eq!(login.last_received_id, 1);
    assert_eq!(login.session_key, key(7));

    bouncer.resync(4).await;
    for expected in [5, 6] {
        let frame = bouncer.recv().await;
        assert_eq!(frame.packet.sequence_id(), Some(expected));
        assert_eq!(frame.peer_ack_id, Some(1));
        assert_eq!(frame.packet.payload().as_ref(), &[expected as u8]);
    }
    wait_for_state(&mut events, ConnectionState::Authenticated).await;
    assert_eq!(client.cached_ids().await, vec![5, 6]);

    assert_eq!(
        client.send(PacketType::DEBUG_COMMAND, vec![7u8]).await.unwrap(),
        SendOutcome::Written { sequence_id: Some(7) }
    );
    assert_eq!(bouncer.recv().await.packet.sequence_id(), Some(7));
}

#[tokio::test]
async fn auth_failure_keeps_connection_open() {
    let (client, mut events) = Client::new(ClientConfig::default());
    let mut bouncer = open(&client).await;
    client.login().await.unwrap();
    bouncer.recv_login().await;

    bouncer
        .send(Packet::control(PacketType::AUTH_FAILURE, bytes::Bytes::new()).unwrap(), 0)
        .await;

    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::StateChanged(ConnectionState::Connected)
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::StateChanged(ConnectionState::Authenticating)
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::StateChanged(ConnectionState::Connected)
    );
    assert_eq!(next_event(&mut events).await, ClientEvent::AuthFailed);

    assert_eq!(
        client.login().await.unwrap(),
        SendOutcome::Written { sequence_id: None }
    );
    bouncer.recv_login().await;
}

#[tokio::test]
async fn oversized_frame_drops_connection() {
    let config = ClientConfig {
        max_payload_len: 64,
        ..ClientConfig::default()
    };
    let (client, mut events) = Client::new(config);
    let mut bouncer = open(&client).await;

    let mut raw = BytesMut::new();
    FixedHeader::new(PacketType::STATUS, 1000).encode(&mut raw);
    raw.put_bytes(0, 8);
    bouncer.stream.write_all(&raw).await.unwrap();

    assert!(matches!(
        wait_for_disconnect(&mut events).await,
        DisconnectReason::Protocol(_)
    ));
    assert_eq!(client.state().await, ConnectionState::Disconnected);
    bouncer.assert_closed().await;
}

#[tokio::test]
async fn local_disconnect_keeps_cache() {
    let (client, mut events) = Client::new(ClientConfig::default());
    let mut bouncer = authenticate(&client, &mut events, key(2)).await;

    client.send(PacketType::WINDOW_INPUT, vec![1u8, 2]).await.unwrap();
    bouncer.recv().await;

    client.disconnect().await;
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::StateChanged(ConnectionState::Disconnected)
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Disconnected {
            reason: DisconnectReason::Local
        }
    );
    bouncer.assert_closed().await;

    assert_eq!(client.cached_ids().await, vec![1]);
    assert_eq!(client.session_key().await, key(2));
}

#[tokio::test]
async fn disconnect_cuts_write_to_peer_that_stopped_reading() {
    let (client, mut events) = Client::new(ClientConfig::default());
    let (local, remote) = duplex(256);
    client.attach(local).await;
    let mut bouncer = Bouncer::new(remote);
    client.login().await.unwrap();
    bouncer.recv_login().await;
    bouncer.auth_success(key(4)).await;
    wait_for_state(&mut events, ConnectionState::Authenticated).await;

    // The bouncer never reads again, so this write fills the pipe and stalls
    // while holding the session.
    let sender = client.clone();
    let stalled =
        tokio::spawn(async move { sender.send(PacketType::WINDOW_INPUT, vec![0u8; 4096]).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stalled.is_finished());

    timeout(Duration::from_secs(2), client.disconnect())
        .await
        .expect("disconnect blocked behind the stalled write");

    let outcome = timeout(WAIT, stalled).await.unwrap().unwrap().unwrap();
    assert!(matches!(
        outcome,
        SendOutcome::WriteFailed {
            sequence_id: Some(1),
            ..
        }
    ));
    assert_eq!(wait_for_disconnect(&mut events).await, DisconnectReason::Local);
    assert_eq!(client.state().await, ConnectionState::Disconnected);
    assert_eq!(client.cached_ids().await, vec![1]);
}

#[tokio::test]
async fn frames_in_one_read_are_delivered_in_order() {
    let (client, mut events) = Client::new(ClientConfig::default());
    let mut bouncer = authenticate(&client, &mut events, key(3)).await;

    let mut burst = BytesMut::new();
    Packet::reliable(PacketType::STATUS, 1, &b"first"[..])
        .unwrap()
        .encode_into(0, &mut burst)
        .unwrap();
    Packet::control(PacketType(0x8010), &b"second"[..])
        .unwrap()
        .encode_into(0, &mut burst)
        .unwrap();
    Packet::reliable(PacketType::WINDOW_ADD, 2, &b"third"[..])
        .unwrap()
        .encode_into(0, &mut burst)
        .unwrap();
    bouncer.stream.write_all(&burst).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let (packet_type, payload) = wait_for_packet(&mut events).await;
        seen.push((packet_type, payload));
    }
    assert_eq!(seen[0].0, PacketType::STATUS);
    assert_eq!(seen[0].1.as_ref(), b"first");
    assert_eq!(seen[1].0, PacketType(0x8010));
    assert_eq!(seen[2].0, PacketType::WINDOW_ADD);
    assert_eq!(client.last_received_id().await, 2);
}
