//! MQTT client wrapper for rumqttc
//!
//! Builds the MQTT v5 session options (credentials, TLS) and exposes the
//! small publish surface the rest of the daemon needs.

use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use rumqttc::Transport;
use rustls::pki_types::CertificateDer;
use rustls::ClientConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{MqttConfig, TlsConfig};
use crate::error::MqttError;

/// MQTT client wrapper
pub struct MqttClient {
    client: AsyncClient,
}

impl MqttClient {
    /// Create a new MQTT client from configuration
    pub fn new(config: &MqttConfig, client_id: &str) -> Result<(Self, EventLoop), MqttError> {
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.user, &config.password) {
            options.set_credentials(user, pass);
        }

        if let Some(tls_config) = &config.tls {
            options.set_transport(build_tls_transport(tls_config)?);
            info!("MQTT TLS enabled");
        }

        let (client, eventloop) = AsyncClient::new(options, 100);

        Ok((Self { client }, eventloop))
    }

    /// Publish a message, not retained, at-least-once
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), MqttError> {
        debug!("Publishing to {}: {}", topic, payload);
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| MqttError::PublishFailed(e.to_string()))
    }

    /// Get a clone of the underlying client (for use in multiple tasks)
    pub fn clone_client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Send a graceful disconnect to the broker
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("Failed to send disconnect: {}", e);
        }
    }
}

/// Build the rustls transport for the broker session
///
/// Trust comes from an explicit CA file when configured, otherwise the
/// bundled webpki roots (cloud brokers use publicly trusted certificates).
fn build_tls_transport(config: &TlsConfig) -> Result<Transport, MqttError> {
    let mut root_cert_store = rustls::RootCertStore::empty();

    if let Some(ca_file) = &config.ca_file {
        for cert in load_certs(ca_file)? {
            root_cert_store
                .add(cert)
                .map_err(|e| MqttError::ConnectionFailed(format!("Failed to add CA cert: {}", e)))?;
        }
    } else if let Some(ca_path) = &config.ca_path {
        // Every .crt/.pem file in the directory contributes roots
        if let Ok(entries) = std::fs::read_dir(ca_path) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "crt" || ext == "pem") {
                    if let Ok(certs) = load_certs(&path) {
                        for cert in certs {
                            let _ = root_cert_store.add(cert);
                        }
                    }
                }
            }
        }
    } else {
        root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    Ok(Transport::tls_with_config(
        rumqttc::TlsConfiguration::Rustls(Arc::new(tls_config)),
    ))
}

/// Load certificates from a PEM file
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, MqttError> {
    let file = File::open(path)
        .map_err(|e| MqttError::ConnectionFailed(format!("Failed to open cert file: {}", e)))?;
    let mut reader = BufReader::new(file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MqttError::ConnectionFailed(format!("Failed to parse certs: {}", e)))?;
    Ok(certs)
}
