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

//! # eml-send
//!
//! _eml-send_ replays e-mail message files against an SMTP server. It is meant for
//! testing mail servers: point it at a local test server, hand it a few `.eml` files
//! and every message is submitted, in order, over a single SMTP session.
//!
//! - Reads messages conforming to the Internet Message Format standard (_RFC 5322_).
//! - Derives the SMTP envelope from the `Sender`/`From`, `To`, `Cc` and `Bcc` headers
//!   (or from a single `Resent-*` block), strips `Bcc` before transmission.
//! - Simple Mail Transfer Protocol (**SMTP**; _RFC 5321_) delivery with EHLO/HELO fallback.
//! - SMTP Service Extension for Secure SMTP over **TLS** (_RFC 3207_) and implicit TLS.
//! - Full protocol dialogue logged through the [`log`](https://crates.io/crates/log) facade
//!   under the `smtp` target.
//! - Full async (requires Tokio).
//!
//! ## Usage Example
//!
//! ```bash
//!  $ eml-send --host 127.0.0.1 --port 3025 a.eml b.eml
//!  sending a.eml...
//!  sending b.eml...
//! ```
//!
//! The SMTP client can also be used directly:
//!
//! ```rust
//!     let message = MessageParser::default().parse(&raw).unwrap();
//!
//!     SmtpClientBuilder::new("127.0.0.1", 3025)
//!         .connect_plain()
//!         .await
//!         .unwrap()
//!         .send(message)
//!         .await
//!         .unwrap();
//! ```
//!
//! ## Testing
//!
//! To run the testsuite:
//!
//! ```bash
//!  $ cargo test --all-features
//! ```
//!
//! ## License
//!
//! Licensed under either of
//!
//!  * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!  * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.
//!

pub mod batch;
pub mod config;
pub mod smtp;

use std::{fmt::Display, time::Duration};

use smtp::tls::TlsMode;
use tokio_rustls::TlsConnector;

pub use mail_parser;
pub use smtp_proto;

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// TLS error
    Tls(Box<rustls::Error>),

    /// Failure parsing SMTP reply
    UnparseableReply,

    /// Unexpected SMTP reply.
    UnexpectedReply(smtp_proto::Response<String>),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// Missing message sender.
    MissingMailFrom,

    /// Missing message recipients.
    MissingRcptTo,

    /// More than one Resent-* block in the message.
    AmbiguousResent,

    /// STARTTLS was requested but the server does not offer it.
    MissingStartTls,

    /// The envelope needs SMTPUTF8 but the server does not offer it.
    Utf8NotSupported,

    /// Connection timeout.
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;

/// SMTP client, after connecting `U` holds the server capabilities.
pub struct SmtpClient<T, U = ()> {
    pub stream: T,
    pub timeout: Duration,
    pub capabilities: U,
}

#[derive(Clone)]
pub struct SmtpClientBuilder<T: AsRef<str>> {
    pub timeout: Duration,
    pub tls_connector: TlsConnector,
    pub tls_hostname: T,
    pub tls_mode: TlsMode,
    pub addr: String,
    pub local_host: String,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Tls(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::UnparseableReply => write!(f, "Unparseable SMTP reply"),
            Error::UnexpectedReply(e) => {
                write!(f, "Unexpected reply: {} {}", e.code(), e.message())
            }
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::MissingMailFrom => write!(f, "Missing message sender"),
            Error::MissingRcptTo => write!(f, "Missing message recipients"),
            Error::AmbiguousResent => write!(f, "Multiple Resent-* header blocks"),
            Error::MissingStartTls => write!(f, "STARTTLS extension unavailable"),
            Error::Utf8NotSupported => {
                write!(f, "Server does not support SMTPUTF8 for non-ASCII addresses")
            }
            Error::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
