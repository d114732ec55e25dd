//! Fixtures shared by unit tests.

use oka_config::{HttpsSettings, ServerSpec};
use secrecy::SecretString;
use std::net::{IpAddr, Ipv4Addr};

pub fn spec(name: &str, port: u16) -> ServerSpec {
    spec_for(name, port, "http://127.0.0.1:9")
}

pub fn spec_for(name: &str, port: u16, target_url: &str) -> ServerSpec {
    ServerSpec {
        name: name.to_string(),
        port,
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        target_url: target_url.to_string(),
        secret_key: SecretString::new("test-secret".to_string()),
        expired: 3600,
        ctn_max: 0,
        https: HttpsSettings::default(),
        limit: None,
    }
}
