//! TLS listener support, enabled by the `tls` feature.
use crate::{config::TlsConfig, errors::ServerError};
use hyper::server::accept::{self, Accept};
use std::{fs::File, io, io::BufReader, path::Path, sync::Arc, time::Duration};
use tokio::{net::TcpListener, net::TcpStream, sync::mpsc};
use tokio_rustls::{
    rustls::{Certificate, PrivateKey, ServerConfig},
    server::TlsStream,
    TlsAcceptor,
};

fn open(path: &Path) -> Result<BufReader<File>, ServerError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ServerError(format!("cannot open '{}': {}", path.display(), e)))
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, ServerError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)?;
    if certs.is_empty() {
        return Err(ServerError(format!("no certificates found in '{}'", path.display())));
    }

    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_key(path: &Path) -> Result<PrivateKey, ServerError> {
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut open(path)?)?;
    if keys.is_empty() {
        keys = rustls_pemfile::rsa_private_keys(&mut open(path)?)?;
    }

    match keys.into_iter().next() {
        Some(key) => Ok(PrivateKey(key)),
        None => Err(ServerError(format!("no private key found in '{}'", path.display()))),
    }
}

/// Build an acceptor from the PEM files named in the configuration. Both HTTP/2 and HTTP/1.1
/// are offered through ALPN.
pub fn acceptor(config: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let certs = load_certs(&config.cert_file)?;
    let key = load_key(&config.key_file)?;

    let mut server = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError(format!("invalid certificate or key: {}", e)))?;
    server.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server)))
}

/// Accept TCP connections and hand out the ones that complete a TLS handshake. Handshakes run
/// in their own tasks; accepting stops once the returned value is dropped.
pub(crate) fn incoming(
    listener: TcpListener,
    acceptor: TlsAcceptor,
) -> impl Accept<Conn = TlsStream<TcpStream>, Error = io::Error> {
    let (tx, mut rx) = mpsc::channel::<io::Result<TlsStream<TcpStream>>>(128);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let acceptor = acceptor.clone();
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(stream) => {
                                    let _ = tx.send(Ok(stream)).await;
                                }
                                Err(e) => debug!("TLS handshake with {} failed: {}", peer, e),
                            }
                        });
                    }
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
    });

    accept::poll_fn(move |cx| rx.poll_recv(cx))
}
