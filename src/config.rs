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

use std::{
    fmt::Display,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;

use crate::{batch, smtp::tls::TlsMode};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3025;

/// Sends RFC 5322 message files to an SMTP server, one session for the whole batch.
#[derive(Debug, Clone, Parser)]
#[command(name = "eml-send", version, about)]
pub struct Args {
    /// Message files to send, in order. `-` reads one message from standard input.
    pub files: Vec<PathBuf>,

    /// SMTP server host.
    #[arg(short = 'H', long, env = "SMTP_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// SMTP server port.
    #[arg(short, long, env = "SMTP_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Connect with implicit TLS.
    #[arg(long, conflicts_with = "starttls")]
    pub tls: bool,

    /// Upgrade the connection with STARTTLS.
    #[arg(long)]
    pub starttls: bool,

    /// Accept invalid server certificates.
    #[arg(long)]
    pub allow_invalid_certs: bool,

    /// Hostname announced in EHLO/HELO, defaults to the local hostname.
    #[arg(long, value_name = "HOSTNAME")]
    pub helo: Option<String>,

    /// Timeout in seconds for each SMTP exchange.
    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 3600,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,
}

/// A message source that was opened when the configuration was built.
#[derive(Debug)]
pub enum Input {
    File { path: PathBuf, file: File },
    Stdin,
}

/// Validated invocation configuration.
#[derive(Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub tls_mode: TlsMode,
    pub allow_invalid_certs: bool,
    pub helo_host: Option<String>,
    pub timeout: Duration,
    pub inputs: Vec<Input>,
}

impl Args {
    pub fn tls_mode(&self) -> TlsMode {
        if self.tls {
            TlsMode::Implicit
        } else if self.starttls {
            TlsMode::StartTls
        } else {
            TlsMode::Plain
        }
    }

    /// Opens every input so that a missing or unreadable file fails the run
    /// before any connection is made.
    pub fn into_config(self) -> Result<Config, batch::Error> {
        let tls_mode = self.tls_mode();
        let inputs = self
            .files
            .into_iter()
            .map(Input::open)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            host: self.host,
            port: self.port,
            tls_mode,
            allow_invalid_certs: self.allow_invalid_certs,
            helo_host: self.helo,
            timeout: Duration::from_secs(self.timeout),
            inputs,
        })
    }
}

impl Config {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Config {
            host: host.into(),
            port,
            tls_mode: TlsMode::Plain,
            allow_invalid_certs: false,
            helo_host: None,
            timeout: Duration::from_secs(60 * 60),
            inputs: Vec::new(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl Input {
    pub fn open(path: PathBuf) -> Result<Self, batch::Error> {
        if path.as_os_str() == "-" {
            return Ok(Input::Stdin);
        }

        let file_error = |source| batch::Error::File {
            path: path.clone(),
            source,
        };
        let file = File::open(&path).map_err(file_error)?;
        if file.metadata().map_err(file_error)?.is_dir() {
            return Err(file_error(io::Error::other("is a directory")));
        }

        Ok(Input::File { path, file })
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Input::File { path, .. } => Some(path),
            Input::Stdin => None,
        }
    }

    /// Reads the whole message.
    pub fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut contents = Vec::new();
        match self {
            Input::File { file, .. } => file.read_to_end(&mut contents)?,
            Input::Stdin => io::stdin().lock().read_to_end(&mut contents)?,
        };
        Ok(contents)
    }
}

impl Display for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Input::File { path, .. } => write!(f, "{}", path.display()),
            Input::Stdin => f.write_str("<stdin>"),
        }
    }
}
