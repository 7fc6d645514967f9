use rustls_pemfile::{read_one, Item, certs};
use anyhow::{bail, Context, Result};
use std::{
    io::BufReader,
    sync::atomic::{AtomicI64, Ordering},
};
use rustls::{
    RootCertStore,
    pki_types::{CertificateDer, PrivateKeyDer},
};

// parses every x509 cert out of a PEM blob; an empty result is an error
pub fn load_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut rd = BufReader::new(pem);

    let raw_certs: Vec<_> = certs(&mut rd)
        .collect::<std::result::Result<_, _>>()
        .context("reading certificates from PEM")?;

    if raw_certs.is_empty() {
        bail!("no certificate found in PEM");
    }
    Ok(raw_certs)
}

// first private key of a PEM blob (PKCS#8, PKCS#1 or SEC1)
pub fn load_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut rd = BufReader::new(pem);

    loop {
        match read_one(&mut rd)
            .context("reading PEM block")?
        {
            Some(Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::from(key)),
            Some(Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::from(key)),
            Some(Item::Sec1Key(key))  => return Ok(PrivateKeyDer::from(key)),
            Some(_)                   => continue,
            None                      => break,
        }
    }
    bail!("no private key found in PEM");
}

// CA certs of a PEM blob as a rustls RootCertStore
pub fn load_ca(pem: &[u8]) -> Result<RootCertStore> {
    let mut rd = BufReader::new(pem);

    let mut store = RootCertStore::empty();
    loop {
        match read_one(&mut rd)
            .context("reading PEM block")?
        {
            Some(Item::X509Certificate(der)) => {
                store.add_parsable_certificates(std::iter::once(der));
            }
            Some(_) => continue,
            None    => break,
        }
    }
    if store.is_empty() {
        bail!("no usable CA certificate in PEM");
    }
    Ok(store)
}

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(i64::MIN);

/// Wall-clock epoch seconds, clamped so a process never sees time go back.
pub fn monotonic_unix_secs() -> i64 {
    let now = chrono::Utc::now().timestamp();
    let prev = LAST_TIMESTAMP.fetch_max(now, Ordering::SeqCst);
    prev.max(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_pem_is_refused() {
        let junk = b"-----BEGIN CERTIFICATE-----\nnot base64 at all!!\n-----END CERTIFICATE-----\n";
        assert!(load_certs(junk).is_err());
        assert!(load_certs(b"").is_err());
        assert!(load_key(b"no key in here").is_err());
        assert!(load_ca(b"").is_err());
    }

    #[test]
    fn timestamps_never_decrease() {
        let mut last = monotonic_unix_secs();
        for _ in 0..1000 {
            let next = monotonic_unix_secs();
            assert!(next >= last);
            last = next;
        }
    }
}
