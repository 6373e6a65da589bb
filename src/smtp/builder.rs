/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::time::Duration;

use smtp_proto::{EhloResponse, EXT_START_TLS};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::{SmtpClient, SmtpClientBuilder};

use super::{
    tls::{build_tls_connector, TlsMode},
    AssertReply,
};

impl<T: AsRef<str>> SmtpClientBuilder<T> {
    pub fn new(hostname: T, port: u16) -> Self {
        SmtpClientBuilder {
            addr: format!("{}:{}", hostname.as_ref(), port),
            timeout: Duration::from_secs(60 * 60),
            tls_connector: build_tls_connector(false),
            tls_hostname: hostname,
            tls_mode: TlsMode::Plain,
            local_host: gethostname::gethostname()
                .to_str()
                .unwrap_or("[127.0.0.1]")
                .to_string(),
        }
    }

    /// Allow invalid TLS certificates
    pub fn allow_invalid_certs(mut self, allow: bool) -> Self {
        self.tls_connector = build_tls_connector(allow);
        self
    }

    /// How the connection is secured
    pub fn tls_mode(mut self, tls_mode: TlsMode) -> Self {
        self.tls_mode = tls_mode;
        self
    }

    /// Set the EHLO/HELO hostname
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Sets the SMTP connection timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect over TLS, either implicit or upgraded with STARTTLS
    pub async fn connect(
        &self,
    ) -> crate::Result<SmtpClient<TlsStream<TcpStream>, EhloResponse<String>>> {
        tokio::time::timeout(self.timeout, async {
            let mut client = SmtpClient {
                stream: self.tcp_connect().await?,
                timeout: self.timeout,
                capabilities: (),
            };

            let mut client = if self.tls_mode == TlsMode::Implicit {
                let mut client = client
                    .into_tls(&self.tls_connector, self.tls_hostname.as_ref())
                    .await?;
                // Read greeting
                client.read().await?.assert_positive_completion()?;
                client
            } else {
                // Read greeting
                client.read().await?.assert_positive_completion()?;

                let response = client.greet(&self.local_host).await?;
                if response.has_capability(EXT_START_TLS) {
                    client
                        .start_tls(&self.tls_connector, self.tls_hostname.as_ref())
                        .await?
                } else {
                    return Err(crate::Error::MissingStartTls);
                }
            };

            Ok(SmtpClient {
                capabilities: client.greet(&self.local_host).await?,
                stream: client.stream,
                timeout: client.timeout,
            })
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    /// Connect over clear text
    pub async fn connect_plain(
        &self,
    ) -> crate::Result<SmtpClient<TcpStream, EhloResponse<String>>> {
        tokio::time::timeout(self.timeout, async {
            let mut client = SmtpClient {
                stream: self.tcp_connect().await?,
                timeout: self.timeout,
                capabilities: (),
            };

            // Read greeting
            client.read().await?.assert_positive_completion()?;

            Ok(SmtpClient {
                capabilities: client.greet(&self.local_host).await?,
                stream: client.stream,
                timeout: client.timeout,
            })
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    async fn tcp_connect(&self) -> crate::Result<TcpStream> {
        log::debug!("Connecting to {} ({})", self.addr, self.tls_mode);
        let stream = TcpStream::connect(&self.addr).await?;
        if let Ok(peer) = stream.peer_addr() {
            log::trace!(target: super::client::TRACE_TARGET, "connected to {peer}");
        }
        Ok(stream)
    }
}
