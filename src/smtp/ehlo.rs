/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use smtp_proto::{
    response::parser::{ResponseReceiver, MAX_RESPONSE_LENGTH},
    EhloResponse,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::SmtpClient;

use super::{client::trace_lines, AssertReply};

impl<T: AsyncRead + AsyncWrite + Unpin, U> SmtpClient<T, U> {
    /// Sends a EHLO command to the server.
    pub async fn ehlo(&mut self, hostname: &str) -> crate::Result<EhloResponse<String>> {
        tokio::time::timeout(self.timeout, async {
            self.write_cmd(format!("EHLO {hostname}\r\n").as_bytes())
                .await?;
            self.read_ehlo().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    /// Sends a HELO command to the server. The reply carries no extensions,
    /// so an empty capability set is returned.
    pub async fn helo(&mut self, hostname: &str) -> crate::Result<EhloResponse<String>> {
        self.cmd(format!("HELO {hostname}\r\n").as_bytes())
            .await?
            .assert_positive_completion()?;
        Ok(EhloResponse::default())
    }

    /// Greets the server with EHLO, retrying with HELO when the server
    /// rejects EHLO with a permanent error.
    pub async fn greet(&mut self, hostname: &str) -> crate::Result<EhloResponse<String>> {
        match self.ehlo(hostname).await {
            Err(crate::Error::UnexpectedReply(reply)) if reply.code() / 100 == 5 => {
                log::debug!("EHLO rejected with {}, falling back to HELO", reply.code());
                self.helo(hostname).await
            }
            result => result,
        }
    }

    pub async fn read_ehlo(&mut self) -> crate::Result<EhloResponse<String>> {
        let mut buf = vec![0u8; 1024];
        let mut buf_concat = Vec::with_capacity(0);

        loop {
            let br = self.stream.read(&mut buf).await?;

            if br == 0 {
                return Err(crate::Error::UnparseableReply);
            }
            let received = if buf_concat.is_empty() {
                &buf[..br]
            } else if br + buf_concat.len() < MAX_RESPONSE_LENGTH {
                buf_concat.extend_from_slice(&buf[..br]);
                &buf_concat[..]
            } else {
                return Err(crate::Error::UnparseableReply);
            };
            let mut iter = received.iter();

            match EhloResponse::parse(&mut iter) {
                Ok(reply) => {
                    trace_lines("S", received);
                    return Ok(reply);
                }
                Err(err) => match err {
                    smtp_proto::Error::NeedsMoreData { .. } => {
                        if buf_concat.is_empty() {
                            buf_concat = buf[..br].to_vec();
                        }
                    }
                    smtp_proto::Error::InvalidResponse { code } => {
                        match ResponseReceiver::from_code(code).parse(&mut iter) {
                            Ok(response) => {
                                trace_lines("S", received);
                                return Err(crate::Error::UnexpectedReply(response));
                            }
                            Err(smtp_proto::Error::NeedsMoreData { .. }) => {
                                if buf_concat.is_empty() {
                                    buf_concat = buf[..br].to_vec();
                                }
                            }
                            Err(_) => return Err(crate::Error::UnparseableReply),
                        }
                    }
                    _ => {
                        return Err(crate::Error::UnparseableReply);
                    }
                },
            }
        }
    }
}
