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

use std::{borrow::Cow, collections::HashSet, fmt::Display};

use mail_parser::{Addr, Header, HeaderName, HeaderValue};
use smtp_proto::{EhloResponse, EXT_8BIT_MIME, EXT_SIZE, EXT_SMTP_UTF8};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::SmtpClient;

#[derive(Debug, Default, Clone)]
pub struct Message<'x> {
    pub mail_from: Address<'x>,
    pub rcpt_to: Vec<Address<'x>>,
    pub body: Cow<'x, [u8]>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Address<'x> {
    pub email: Cow<'x, str>,
    pub parameters: Parameters<'x>,
}

/// ESMTP parameters, written in insertion order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Parameters<'x> {
    params: Vec<(Cow<'x, str>, Option<Cow<'x, str>>)>,
}

impl<'x> Message<'x> {
    /// Create a new message
    pub fn new<T, U, V>(from: T, to: U, body: V) -> Self
    where
        T: Into<Address<'x>>,
        U: IntoIterator<Item = T>,
        V: Into<Cow<'x, [u8]>>,
    {
        Message {
            mail_from: from.into(),
            rcpt_to: to.into_iter().map(Into::into).collect(),
            body: body.into(),
        }
    }

    /// Whether any envelope address needs SMTPUTF8.
    pub fn is_international(&self) -> bool {
        !self.mail_from.email.is_ascii() || self.rcpt_to.iter().any(|rcpt| !rcpt.email.is_ascii())
    }
}

impl<'x> From<&'x str> for Address<'x> {
    fn from(email: &'x str) -> Self {
        Address {
            email: email.into(),
            parameters: Parameters::default(),
        }
    }
}

impl<'x> From<String> for Address<'x> {
    fn from(email: String) -> Self {
        Address {
            email: email.into(),
            parameters: Parameters::default(),
        }
    }
}

impl<'x> Parameters<'x> {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    pub fn param(&mut self, key: impl Into<Cow<'x, str>>, value: impl Into<Cow<'x, str>>) {
        self.insert(key.into(), Some(value.into()));
    }

    pub fn keyword(&mut self, key: impl Into<Cow<'x, str>>) {
        self.insert(key.into(), None);
    }

    fn insert(&mut self, key: Cow<'x, str>, value: Option<Cow<'x, str>>) {
        if let Some(entry) = self
            .params
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(&key))
        {
            entry.1 = value;
        } else {
            self.params.push((key, value));
        }
    }
}

impl<'x> Display for Parameters<'x> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in &self.params {
            f.write_str(" ")?;
            f.write_str(key)?;
            if let Some(value) = value {
                f.write_str("=")?;
                f.write_str(value)?;
            }
        }
        Ok(())
    }
}

pub trait IntoMessage<'x> {
    fn into_message(self) -> crate::Result<Message<'x>>;
}

impl<'x> IntoMessage<'x> for Message<'x> {
    fn into_message(self) -> crate::Result<Message<'x>> {
        Ok(self)
    }
}

impl<'x, 'y> IntoMessage<'x> for mail_parser::Message<'y> {
    fn into_message(self) -> crate::Result<Message<'x>> {
        (&self).into_message()
    }
}

impl<'x, 'y> IntoMessage<'x> for &mail_parser::Message<'y> {
    fn into_message(self) -> crate::Result<Message<'x>> {
        let headers = self.headers();

        // A single Resent-* block replaces the original originator and
        // destination fields; several blocks cannot be told apart.
        let resent = match headers
            .iter()
            .filter(|header| header.name == HeaderName::ResentDate)
            .count()
        {
            0 => false,
            1 => true,
            _ => return Err(crate::Error::AmbiguousResent),
        };

        let (sender, from, destinations) = if resent {
            (
                HeaderName::ResentSender,
                HeaderName::ResentFrom,
                [
                    HeaderName::ResentTo,
                    HeaderName::ResentBcc,
                    HeaderName::ResentCc,
                ],
            )
        } else {
            (
                HeaderName::Sender,
                HeaderName::From,
                [HeaderName::To, HeaderName::Bcc, HeaderName::Cc],
            )
        };

        let mail_from = addresses(headers, &sender)
            .into_iter()
            .next()
            .or_else(|| addresses(headers, &from).into_iter().next())
            .ok_or(crate::Error::MissingMailFrom)?;

        let mut seen = HashSet::new();
        let rcpt_to = destinations
            .iter()
            .flat_map(|name| addresses(headers, name))
            .filter(|email| seen.insert(email.to_lowercase()))
            .map(Address::from)
            .collect::<Vec<_>>();

        if rcpt_to.is_empty() {
            return Err(crate::Error::MissingRcptTo);
        }

        Ok(Message {
            mail_from: mail_from.into(),
            rcpt_to,
            body: strip_bcc(&normalize_crlf(self.raw_message())).into(),
        })
    }
}

/// Non-empty addresses of every header named `name`, group members included.
fn addresses<'x>(headers: &[Header<'x>], name: &HeaderName<'x>) -> Vec<String> {
    let mut emails = Vec::new();

    for header in headers.iter().filter(|header| &header.name == name) {
        let addrs: Vec<&Addr<'_>> = match &header.value {
            HeaderValue::Address(mail_parser::Address::List(list)) => list.iter().collect(),
            HeaderValue::Address(mail_parser::Address::Group(groups)) => groups
                .iter()
                .flat_map(|group| group.addresses.iter())
                .collect(),
            _ => continue,
        };
        emails.extend(
            addrs
                .into_iter()
                .filter_map(|addr| addr.address.as_deref())
                .map(str::trim)
                .filter(|email| !email.is_empty())
                .map(str::to_string),
        );
    }

    emails
}

/// Converts bare LF and bare CR line endings to CRLF.
pub fn normalize_crlf(raw: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(raw.len() + raw.len() / 32);
    let mut iter = raw.iter().peekable();

    while let Some(&byte) = iter.next() {
        match byte {
            b'\r' => {
                iter.next_if_eq(&&b'\n');
                message.extend_from_slice(b"\r\n");
            }
            b'\n' => message.extend_from_slice(b"\r\n"),
            _ => message.push(byte),
        }
    }

    message
}

/// Removes `Bcc` and `Resent-Bcc` fields, continuation lines included, from
/// the header section of a CRLF message. The body is left untouched.
pub fn strip_bcc(message: &[u8]) -> Vec<u8> {
    let mut stripped = Vec::with_capacity(message.len());
    let mut skipping = false;
    let mut pos = 0;

    while pos < message.len() {
        let end = message[pos..]
            .windows(2)
            .position(|window| window == b"\r\n")
            .map_or(message.len(), |idx| pos + idx + 2);
        let line = &message[pos..end];

        if line == b"\r\n" {
            // End of the header section
            stripped.extend_from_slice(&message[pos..]);
            return stripped;
        }

        if !matches!(line.first(), Some(b' ' | b'\t')) {
            skipping = is_bcc_field(line);
        }
        if !skipping {
            stripped.extend_from_slice(line);
        }
        pos = end;
    }

    stripped
}

fn is_bcc_field(line: &[u8]) -> bool {
    line.iter().position(|&byte| byte == b':').map_or(false, |colon| {
        let mut name = &line[..colon];
        while let [rest @ .., b' ' | b'\t'] = name {
            name = rest;
        }
        name.eq_ignore_ascii_case(b"bcc") || name.eq_ignore_ascii_case(b"resent-bcc")
    })
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T, EhloResponse<String>> {
    /// Sends a message to the server. The transaction is reset when the
    /// server rejects it, leaving the session ready for the next message.
    pub async fn send<'x>(&mut self, message: impl IntoMessage<'x>) -> crate::Result<()> {
        let mut message = message.into_message()?;
        if message.rcpt_to.is_empty() {
            return Err(crate::Error::MissingRcptTo);
        }
        self.add_mail_params(&mut message)?;

        let result = self.transaction(&message).await;
        if let Err(crate::Error::UnexpectedReply(reply)) = &result {
            log::debug!("Transaction rejected with {}, resetting", reply.code());
            if let Err(err) = self.rset().await {
                log::debug!("RSET failed: {err}");
            }
        }
        result
    }

    fn add_mail_params(&self, message: &mut Message<'_>) -> crate::Result<()> {
        let international = message.is_international();
        let params = &mut message.mail_from.parameters;

        if self.capabilities.has_capability(EXT_SIZE) {
            params.param("SIZE", message.body.len().to_string());
        }

        if international {
            if !self.capabilities.has_capability(EXT_SMTP_UTF8) {
                return Err(crate::Error::Utf8NotSupported);
            }
            params.keyword("SMTPUTF8");
            if self.capabilities.has_capability(EXT_8BIT_MIME) {
                params.param("BODY", "8BITMIME");
            }
        }

        Ok(())
    }

    async fn transaction(&mut self, message: &Message<'_>) -> crate::Result<()> {
        self.mail_from(
            message.mail_from.email.as_ref(),
            &message.mail_from.parameters,
        )
        .await?;

        // A refused recipient only fails the message when nobody accepts it
        let mut accepted = 0;
        let mut refusal = None;
        for rcpt in &message.rcpt_to {
            match self.rcpt_to(rcpt.email.as_ref(), &rcpt.parameters).await {
                Ok(()) => accepted += 1,
                Err(crate::Error::UnexpectedReply(reply)) => {
                    log::warn!(
                        "Recipient <{}> refused: {} {}",
                        rcpt.email,
                        reply.code(),
                        reply.message()
                    );
                    refusal = Some(reply);
                }
                Err(err) => return Err(err),
            }
        }
        if accepted == 0 {
            return Err(refusal.map_or(crate::Error::MissingRcptTo, crate::Error::UnexpectedReply));
        }

        self.data(message.body.as_ref()).await
    }
}
