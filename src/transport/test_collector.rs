//! In-process QUIC collector for tests.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use quinn::{Endpoint, Incoming, ServerConfig, crypto::rustls::QuicServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tempfile::TempDir;
use tokio::runtime::Runtime;

use super::TransportConfig;

/// Upper bound on what one test stream may carry.
const MAX_STREAM_BYTES: usize = 1 << 20;

/// What the collector does with the stream of each connection.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Behaviour {
    /// Read the stream to its end and report the bytes.
    Collect,
    /// Report the first chunk, answer with the reply and finish its side.
    ReplyThenFinish(&'static [u8]),
}

/// A collector listening on loopback with a fresh self-signed identity.
pub(crate) struct TestCollector {
    addr: SocketAddr,
    received: Receiver<Vec<u8>>,
    ca_file: PathBuf,
    _dir: TempDir,
    _endpoint: Endpoint,
    _runtime: Runtime,
}

impl TestCollector {
    pub(crate) fn start(alpn: &str, behaviour: Behaviour) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("collector runtime");
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()])
            .expect("self-signed certificate");
        let dir = tempfile::tempdir().expect("create temp dir");
        let ca_file = dir.path().join("collector.pem");
        std::fs::write(&ca_file, certified.cert.pem()).expect("write certificate");

        let cert = CertificateDer::from(certified.cert.der().to_vec());
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));
        let mut crypto = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .expect("tls 1.3 is supported")
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .expect("server identity");
        crypto.alpn_protocols = vec![alpn.as_bytes().to_vec()];
        let quic = QuicServerConfig::try_from(crypto).expect("quic server config");

        let endpoint = {
            let _guard = runtime.enter();
            Endpoint::server(
                ServerConfig::with_crypto(Arc::new(quic)),
                (Ipv4Addr::LOCALHOST, 0).into(),
            )
            .expect("bind collector")
        };
        let addr = endpoint.local_addr().expect("collector address");
        let (tx, received) = unbounded();
        runtime.spawn(accept_loop(endpoint.clone(), behaviour, tx));
        Self {
            addr,
            received,
            ca_file,
            _dir: dir,
            _endpoint: endpoint,
            _runtime: runtime,
        }
    }

    /// Client settings that trust this collector's certificate.
    pub(crate) fn config(&self) -> TransportConfig {
        let mut config = TransportConfig::new(self.addr.ip().to_string(), self.addr.port());
        config.tls.domain = "localhost".into();
        config.tls.ca_file = Some(self.ca_file.clone());
        config.connect_timeout = Duration::from_secs(5);
        config
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    pub(crate) fn ca_file(&self) -> PathBuf {
        self.ca_file.clone()
    }

    /// Bytes the collector read, one entry per stream.
    pub(crate) fn received(&self) -> &Receiver<Vec<u8>> {
        &self.received
    }
}

async fn accept_loop(endpoint: Endpoint, behaviour: Behaviour, tx: Sender<Vec<u8>>) {
    while let Some(incoming) = endpoint.accept().await {
        tokio::spawn(serve(incoming, behaviour, tx.clone()));
    }
}

async fn serve(incoming: Incoming, behaviour: Behaviour, tx: Sender<Vec<u8>>) {
    let Ok(connecting) = incoming.accept() else {
        return;
    };
    let Ok(connection) = connecting.await else {
        return;
    };
    if let Ok((mut send, mut recv)) = connection.accept_bi().await {
        match behaviour {
            Behaviour::Collect => {
                if let Ok(bytes) = recv.read_to_end(MAX_STREAM_BYTES).await {
                    let _ = tx.send(bytes);
                }
            }
            Behaviour::ReplyThenFinish(reply) => {
                let mut buf = vec![0; 4096];
                if let Ok(Some(n)) = recv.read(&mut buf).await {
                    let _ = tx.send(buf[..n].to_vec());
                }
                let _ = send.write_all(reply).await;
                let _ = send.finish();
                let _ = recv.read_to_end(MAX_STREAM_BYTES).await;
            }
        }
    }
    connection.closed().await;
}
