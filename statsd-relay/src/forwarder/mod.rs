use std::{
    net::{SocketAddr, ToSocketAddrs as _},
    time::Duration,
};

pub mod sync;

/// Parses a Graphite address: either a bare `<host>:<port>` or a
/// `tcp://<host>:<port>` URL. Graphite's plaintext protocol is TCP-only, so
/// any other scheme is an error.
pub(crate) fn parse_remote_addr(addr: &str) -> Result<Vec<SocketAddr>, String> {
    let addr = match addr.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => return Err(format!("invalid scheme '{scheme}' (expected 'tcp')")),
        None => addr,
    };

    match addr.to_socket_addrs() {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            if addrs.is_empty() {
                Err(format!("address '{addr}' resolved to nothing"))
            } else {
                Ok(addrs)
            }
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Forwarder configuration.
#[derive(Clone)]
pub(crate) struct ForwarderConfiguration {
    pub remote_addrs: Vec<SocketAddr>,
    pub write_timeout: Duration,
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddrV4;

    use super::*;

    #[test]
    fn remote_addr_basic() {
        let addrs = parse_remote_addr("127.0.0.1:2003").unwrap();
        assert_eq!(addrs, vec![SocketAddr::V4(SocketAddrV4::new([127, 0, 0, 1].into(), 2003))]);
    }

    #[test]
    fn remote_addr_scheme_tcp() {
        let addrs = parse_remote_addr("tcp://127.0.0.1:2004").unwrap();
        assert_eq!(addrs, vec![SocketAddr::V4(SocketAddrV4::new([127, 0, 0, 1].into(), 2004))]);
    }

    #[test]
    fn remote_addr_scheme_unknown() {
        let err = parse_remote_addr("udp://127.0.0.1:2003").unwrap_err();
        assert!(err.contains("invalid scheme 'udp'"), "{err}");
    }
}
