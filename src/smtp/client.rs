/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use smtp_proto::{response::parser::ResponseReceiver, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::SmtpClient;

/// Log target of the protocol dialogue.
pub const TRACE_TARGET: &str = "smtp";

impl<T: AsyncRead + AsyncWrite + Unpin, U> SmtpClient<T, U> {
    pub(crate) async fn read(&mut self) -> crate::Result<Response<String>> {
        let mut buf = vec![0u8; 1024];
        let mut parser = ResponseReceiver::default();

        loop {
            let br = self.stream.read(&mut buf).await?;

            if br == 0 {
                return Err(crate::Error::UnparseableReply);
            }

            match parser.parse(&mut buf[..br].iter()) {
                Ok(reply) => {
                    trace_reply(&reply);
                    return Ok(reply);
                }
                Err(err) => match err {
                    smtp_proto::Error::NeedsMoreData { .. } => (),
                    _ => {
                        return Err(crate::Error::UnparseableReply);
                    }
                },
            }
        }
    }

    /// Writes a command line to the server without waiting for a reply.
    pub(crate) async fn write_cmd(&mut self, cmd: &[u8]) -> crate::Result<()> {
        log::trace!(
            target: TRACE_TARGET,
            "C: {}",
            String::from_utf8_lossy(cmd).trim_end()
        );
        self.stream.write_all(cmd).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Sends a command to the SMTP server and waits for a reply.
    pub async fn cmd(&mut self, cmd: impl AsRef<[u8]>) -> crate::Result<Response<String>> {
        tokio::time::timeout(self.timeout, async {
            self.write_cmd(cmd.as_ref()).await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    /// Writes the message contents applying the transparency procedure,
    /// followed by the end-of-data marker.
    pub(crate) async fn write_message(&mut self, message: &[u8]) -> tokio::io::Result<()> {
        #[derive(Debug)]
        enum State {
            Cr,
            CrLf,
            Init,
        }

        trace_data(message);

        // A message starting with a dot is preceded by the CRLF ending DATA.
        let mut state = State::CrLf;
        let mut last_pos = 0;
        for (pos, byte) in message.iter().enumerate() {
            if *byte == b'.' && matches!(state, State::CrLf) {
                if let Some(bytes) = message.get(last_pos..pos) {
                    self.stream.write_all(bytes).await?;
                    self.stream.write_all(b".").await?;
                    last_pos = pos;
                }
                state = State::Init;
            } else if *byte == b'\r' {
                state = State::Cr;
            } else if *byte == b'\n' && matches!(state, State::Cr) {
                state = State::CrLf;
            } else {
                state = State::Init;
            }
        }
        if let Some(bytes) = message.get(last_pos..) {
            self.stream.write_all(bytes).await?;
        }
        if message.ends_with(b"\r\n") {
            self.stream.write_all(b".\r\n").await?;
        } else {
            self.stream.write_all(b"\r\n.\r\n").await?;
        }
        log::trace!(target: TRACE_TARGET, "C: .");
        self.stream.flush().await
    }
}

/// Logs raw protocol bytes one line at a time.
pub(crate) fn trace_lines(direction: &str, data: &[u8]) {
    if log::log_enabled!(target: TRACE_TARGET, log::Level::Trace) {
        for line in data.strip_suffix(b"\n").unwrap_or(data).split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            log::trace!(
                target: TRACE_TARGET,
                "{direction}: {}",
                String::from_utf8_lossy(line)
            );
        }
    }
}

/// Logs message lines as they appear on the wire, dots stuffed.
fn trace_data(message: &[u8]) {
    if log::log_enabled!(target: TRACE_TARGET, log::Level::Trace) {
        let message = message.strip_suffix(b"\r\n").unwrap_or(message);
        for line in message.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            log::trace!(
                target: TRACE_TARGET,
                "C: {}{}",
                if line.starts_with(b".") { "." } else { "" },
                String::from_utf8_lossy(line)
            );
        }
    }
}

fn trace_reply(reply: &Response<String>) {
    if log::log_enabled!(target: TRACE_TARGET, log::Level::Trace) {
        let mut lines = reply.message().split('\n').peekable();
        while let Some(line) = lines.next() {
            log::trace!(
                target: TRACE_TARGET,
                "S: {}{}{}",
                reply.code(),
                if lines.peek().is_some() { '-' } else { ' ' },
                line.trim_end()
            );
        }
    }
}
