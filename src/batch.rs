/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Sends a batch of message files over a single SMTP session.
//!
//! The session is opened once, every input is parsed and submitted in the
//! order given, and the session is closed with `QUIT` whatever the outcome.
//! The first failure aborts the remaining inputs.

use std::{fmt::Display, io::Write, path::PathBuf};

use mail_parser::MessageParser;
use smtp_proto::EhloResponse;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    config::{Config, Input},
    smtp::{message::IntoMessage, tls::TlsMode},
    SmtpClient, SmtpClientBuilder,
};

#[derive(Debug)]
pub enum Error {
    /// The SMTP session could not be established.
    Connection { addr: String, source: crate::Error },

    /// An input file is missing or unreadable.
    File { path: PathBuf, source: std::io::Error },

    /// The input is not a message that can be sent.
    MessageParse {
        name: String,
        source: Option<crate::Error>,
    },

    /// The server rejected the message or the exchange failed.
    Send { name: String, source: crate::Error },
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Connection { addr, source } => {
                write!(f, "cannot connect to {addr}: {source}")
            }
            Error::File { path, source } => write!(f, "cannot read {}: {source}", path.display()),
            Error::MessageParse { name, source } => match source {
                Some(source) => write!(f, "cannot parse {name}: {source}"),
                None => write!(f, "cannot parse {name}: not an RFC 5322 message"),
            },
            Error::Send { name, source } => write!(f, "failed to send {name}: {source}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection { source, .. } | Error::Send { source, .. } => Some(source),
            Error::File { source, .. } => Some(source),
            Error::MessageParse { source, .. } => source
                .as_ref()
                .map(|source| source as &(dyn std::error::Error + 'static)),
        }
    }
}

/// Connects to the configured server, sends every input in order and closes
/// the session. Progress lines go to `progress`. Returns the number of
/// messages sent.
pub async fn run(config: Config, mut progress: impl Write) -> Result<usize, Error> {
    let addr = config.addr();
    let Config {
        host,
        port,
        tls_mode,
        allow_invalid_certs,
        helo_host,
        timeout,
        inputs,
    } = config;

    let mut builder = SmtpClientBuilder::new(host.as_str(), port)
        .timeout(timeout)
        .tls_mode(tls_mode);
    if allow_invalid_certs {
        builder = builder.allow_invalid_certs(true);
    }
    if let Some(helo_host) = helo_host {
        builder = builder.helo_host(helo_host);
    }

    let connection_error = |source| Error::Connection {
        addr: addr.clone(),
        source,
    };

    log::info!("Sending {} message(s) to {addr}", inputs.len());

    match tls_mode {
        TlsMode::Plain => {
            let client = builder.connect_plain().await.map_err(connection_error)?;
            session(client, inputs, &mut progress).await
        }
        TlsMode::Implicit | TlsMode::StartTls => {
            let client = builder.connect().await.map_err(connection_error)?;
            session(client, inputs, &mut progress).await
        }
    }
}

/// Runs the batch on an established session and closes it on every path.
async fn session<T: AsyncRead + AsyncWrite + Unpin>(
    mut client: SmtpClient<T, EhloResponse<String>>,
    inputs: Vec<Input>,
    progress: &mut impl Write,
) -> Result<usize, Error> {
    let result = send_all(&mut client, inputs, progress).await;
    let closed = client.quit().await;

    match (result, closed) {
        (Ok(sent), Ok(())) => {
            log::info!("Sent {sent} message(s)");
            Ok(sent)
        }
        (Ok(_), Err(source)) => Err(Error::Send {
            name: "QUIT".to_string(),
            source,
        }),
        (Err(err), closed) => {
            if let Err(close_err) = closed {
                log::warn!("Failed to close session: {close_err}");
            }
            Err(err)
        }
    }
}

async fn send_all<T: AsyncRead + AsyncWrite + Unpin>(
    client: &mut SmtpClient<T, EhloResponse<String>>,
    inputs: Vec<Input>,
    progress: &mut impl Write,
) -> Result<usize, Error> {
    let total = inputs.len();

    for (idx, mut input) in inputs.into_iter().enumerate() {
        let name = input.to_string();

        let raw = input.read_to_end().map_err(|source| Error::File {
            path: input
                .path()
                .map_or_else(|| PathBuf::from("-"), |path| path.to_path_buf()),
            source,
        })?;
        let parsed = MessageParser::default()
            .parse(&raw)
            .ok_or_else(|| Error::MessageParse {
                name: name.clone(),
                source: None,
            })?;

        if let Err(err) = writeln!(progress, "sending {name}...").and_then(|_| progress.flush()) {
            log::debug!("Failed to write progress: {err}");
        }

        let message = parsed
            .into_message()
            .map_err(|source| Error::MessageParse {
                name: name.clone(),
                source: Some(source),
            })?;
        log::debug!(
            "{name}: envelope from <{}> to {} recipient(s), {} bytes",
            message.mail_from.email,
            message.rcpt_to.len(),
            message.body.len()
        );

        client
            .send(message)
            .await
            .map_err(|source| Error::Send {
                name: name.clone(),
                source,
            })?;
        log::debug!("{name}: accepted ({}/{total})", idx + 1);
    }

    Ok(total)
}

#[cfg(test)]
mod test {
    use std::{error::Error as _, path::PathBuf};

    use super::Error;

    #[test]
    fn diagnostics_name_the_failing_step() {
        let err = Error::File {
            path: PathBuf::from("missing.eml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(err.to_string(), "cannot read missing.eml: not found");
        assert!(err.source().is_some());

        let err = Error::MessageParse {
            name: "b.eml".to_string(),
            source: Some(crate::Error::MissingMailFrom),
        };
        assert_eq!(err.to_string(), "cannot parse b.eml: Missing message sender");

        let err = Error::MessageParse {
            name: "c.eml".to_string(),
            source: None,
        };
        assert!(err.source().is_none());

        let err = Error::Connection {
            addr: "127.0.0.1:3025".to_string(),
            source: crate::Error::Timeout,
        };
        assert_eq!(
            err.to_string(),
            "cannot connect to 127.0.0.1:3025: Connection timeout"
        );
    }
}
