//! Test support utilities: a recording mock SMTP server and message fixtures.
#![allow(dead_code)]

pub mod mock_server;

use std::path::{Path, PathBuf};

use clap::Parser;
use eml_send::config::{Args, Config};

pub use mock_server::{MockSmtpServer, SmtpCommand};

/// Writes each `(name, contents)` pair into `dir`, returning the paths in order.
pub fn write_messages(dir: &Path, messages: &[(&str, &str)]) -> Vec<PathBuf> {
    messages
        .iter()
        .map(|(name, contents)| {
            let path = dir.join(name);
            std::fs::write(&path, contents).expect("Failed to write message file");
            path
        })
        .collect()
}

/// Builds a validated configuration the way the command line does.
pub fn config(port: u16, files: &[PathBuf]) -> Config {
    let mut argv = vec![
        "eml-send".to_string(),
        "--host".to_string(),
        "127.0.0.1".to_string(),
        "--port".to_string(),
        port.to_string(),
        "--timeout".to_string(),
        "10".to_string(),
        "--helo".to_string(),
        "client.test".to_string(),
    ];
    argv.extend(files.iter().map(|path| path.display().to_string()));
    Args::try_parse_from(argv)
        .expect("Invalid arguments")
        .into_config()
        .expect("Invalid configuration")
}

pub fn simple_message(from: &str, to: &str, subject: &str) -> String {
    format!("From: {from}\nTo: {to}\nSubject: {subject}\n\nThis is {subject}.\n")
}
