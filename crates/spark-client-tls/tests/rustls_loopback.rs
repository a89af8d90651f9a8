//! 以内存中的 rustls 服务端驱动 [`RustlsSession`]：完整握手、双向应用数据、出站背压与致命错误。
//!
//! 测试不经过任何套接字：状态机发起的底层写直接喂给 `ServerConnection`，服务端产出的密文再经
//! `on_ciphertext` 回到状态机。

mod support;

use std::{
    io::{self, Read, Write},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use rustls::{
    RootCertStore, ServerConfig, ServerConnection,
    crypto::ring,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName},
};
use spark_client_tls::{
    HotReloadingClientConfig, RustlsSession, SweepTimer, TLS_ERROR_REASON, TlsTransport,
    build_client_config,
};
use spark_client_transport::{ConnState, Status, TransportEvent, WITHOUT_TIMEOUT, WriteItem};
use support::{Outcome, RecordingBase, payload};

struct Loopback {
    core: TlsTransport<RustlsSession>,
    base: RecordingBase,
    server: ServerConnection,
    received: Vec<u8>,
}

fn server_and_client(outbound_limit: usize) -> Loopback {
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).expect("生成自签名证书");
    let cert: CertificateDer<'static> = certified.cert.der().clone();
    let key: PrivateKeyDer<'static> =
        PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()).into();

    let server_config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("协议版本")
        .with_no_client_auth()
        .with_single_cert(vec![cert.clone()], key)
        .expect("服务端证书");
    let server = ServerConnection::new(Arc::new(server_config)).expect("服务端连接");

    let mut roots = RootCertStore::empty();
    roots.add(cert).expect("信任根");
    let client_config =
        HotReloadingClientConfig::from_config(build_client_config(roots, &[]).expect("客户端配置"));
    let server_name = ServerName::try_from("localhost").expect("主机名");
    let session =
        RustlsSession::new(client_config, server_name, outbound_limit, 4096).expect("客户端会话");

    Loopback {
        core: TlsTransport::new(session, SweepTimer::new(Duration::from_secs(2))),
        base: RecordingBase::new(ConnState::Handshaking),
        server,
        received: Vec::new(),
    }
}

impl Loopback {
    /// 在状态机与服务端之间来回搬运字节，直到双方都没有新的进展。
    fn shuttle(&mut self) {
        for _ in 0..64 {
            let mut progressed = false;
            self.core.drain_and_encrypt(&mut self.base);

            while self.base.outstanding == 1 {
                let bytes = self.base.writes.last().cloned().expect("在途写入");
                let mut rest: &[u8] = &bytes;
                while !rest.is_empty() {
                    self.server.read_tls(&mut rest).expect("服务端读取密文");
                    self.server.process_new_packets().expect("服务端处理记录");
                }
                self.base.outstanding = 0;
                self.core.on_write_done(&mut self.base, Ok(()));
                progressed = true;
            }

            let mut chunk = [0u8; 4096];
            loop {
                match self.server.reader().read(&mut chunk) {
                    Ok(0) => break,
                    Ok(len) => self.received.extend_from_slice(&chunk[..len]),
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                    Err(error) => panic!("服务端读取明文失败: {error}"),
                }
            }

            let mut out = Vec::new();
            while self.server.wants_write() {
                self.server.write_tls(&mut out).expect("服务端输出密文");
            }
            if !out.is_empty() {
                self.core.on_ciphertext(&mut self.base, Ok(&out));
                progressed = true;
            }
            if !progressed {
                return;
            }
        }
        panic!("字节搬运未能收敛");
    }

    fn handshake(&mut self) {
        self.core.on_connected(&mut self.base);
        self.shuttle();
        assert!(!self.core.is_handshaking(), "客户端握手完成");
        assert!(!self.server.is_handshaking(), "服务端握手完成");
        self.base.set_state(ConnState::Done);
    }

    fn frames(&self) -> Vec<u8> {
        self.base.frames.iter().flat_map(|frame| frame.iter().copied()).collect()
    }
}

#[test]
fn handshake_then_application_data_in_both_directions() {
    let mut lo = server_and_client(64 * 1024);
    lo.handshake();

    lo.base.submit(WriteItem::notify(1, Bytes::from_static(b"ping-1"), WITHOUT_TIMEOUT));
    lo.base.submit(WriteItem::notify(2, Bytes::from_static(b"ping-2"), WITHOUT_TIMEOUT));
    lo.shuttle();

    assert_eq!(lo.received, b"ping-1ping-2");
    assert_eq!(
        lo.base.client.resolutions(),
        vec![Outcome::Notify(1, Status::Ok), Outcome::Notify(2, Status::Ok)]
    );

    lo.server.writer().write_all(b"pong").expect("服务端写入明文");
    lo.shuttle();
    assert_eq!(lo.frames(), b"pong");
    assert!(lo.base.client.events().is_empty());
}

#[test]
fn outbound_limit_turns_into_retries_without_reordering() {
    let mut lo = server_and_client(1);
    lo.handshake();

    let bodies: Vec<Bytes> = (0..4u8).map(|tag| payload(b'a' + tag, 300)).collect();
    for (seq, body) in bodies.iter().enumerate() {
        lo.base.submit(WriteItem::notify(seq as u32, body.clone(), WITHOUT_TIMEOUT));
    }
    lo.core.drain_and_encrypt(&mut lo.base);
    assert!(lo.core.retry_pending(), "出站暂存区达到阈值后加密返回 would-block");

    lo.shuttle();

    let expected: Vec<u8> = bodies.iter().flat_map(|body| body.iter().copied()).collect();
    assert_eq!(lo.received, expected);
    assert_eq!(
        lo.base.client.resolutions(),
        (0..4u32).map(|seq| Outcome::Notify(seq, Status::Ok)).collect::<Vec<_>>()
    );
    assert_eq!(lo.base.max_outstanding, 1);
}

#[test]
fn tampered_record_forces_reconnect_and_reset_restarts_the_handshake() {
    let mut lo = server_and_client(64 * 1024);
    lo.handshake();

    lo.server.writer().write_all(b"secret").expect("服务端写入明文");
    let mut record = Vec::new();
    while lo.server.wants_write() {
        lo.server.write_tls(&mut record).expect("服务端输出密文");
    }
    let last = record.len() - 1;
    record[last] ^= 0xff;
    lo.core.on_ciphertext(&mut lo.base, Ok(&record));

    assert_eq!(
        lo.base.client.outcomes(),
        vec![Outcome::Event(
            TransportEvent::UnexpectedDisconnect,
            TLS_ERROR_REASON.to_string()
        )]
    );
    assert_eq!(lo.base.reconnects, 1);
    assert!(lo.frames().is_empty());

    lo.core.reset(&mut lo.base).expect("重建会话");
    assert!(lo.core.is_handshaking(), "重置后的会话重新握手");
    assert!(!lo.core.is_stale());
}

#[test]
fn close_notify_is_treated_like_a_fatal_error() {
    let mut lo = server_and_client(64 * 1024);
    lo.handshake();

    lo.server.send_close_notify();
    lo.shuttle();

    assert_eq!(lo.base.client.events(), vec![TransportEvent::UnexpectedDisconnect]);
    assert_eq!(lo.base.reconnects, 1);
}
