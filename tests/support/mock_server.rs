//! Mock SMTP server recording every command it receives.
#![allow(dead_code)]

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content after DATA, dot-stuffing removed
    MessageContent(String),
    Rset,
    Quit,
    Other(String),
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: (u16, String),
    capabilities: Vec<String>,
    ehlo_supported: bool,
    rejected_recipients: Vec<String>,
    data_end_response: (u16, String),
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: (220, "mock.test ESMTP ready".to_string()),
            capabilities: vec!["SIZE 10000000".to_string(), "8BITMIME".to_string()],
            ehlo_supported: true,
            rejected_recipients: Vec::new(),
            data_end_response: (250, "2.0.0 Queued".to_string()),
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    sessions: Arc<AtomicUsize>,
}

impl MockSmtpServer {
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of connections accepted so far
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// Waits until the client has sent QUIT or the deadline passes.
    pub async fn wait_for_quit(&self) -> Vec<SmtpCommand> {
        let _ = timeout(Duration::from_secs(5), async {
            loop {
                if self.commands.read().await.contains(&SmtpCommand::Quit) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        self.commands().await
    }

    /// Message contents in the order they were received
    pub async fn messages(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|cmd| match cmd {
                SmtpCommand::MessageContent(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    async fn handle_client(
        stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let mut stream = BufReader::new(stream);
        let mut line = String::new();

        reply(&mut stream, config.greeting.0, &config.greeting.1).await?;
        if config.greeting.0 != 220 {
            return Ok(());
        }

        loop {
            line.clear();
            if stream.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            let cmd_line = line.trim_end().to_string();
            let (verb, arg) = cmd_line
                .split_once(' ')
                .map_or((cmd_line.as_str(), ""), |(verb, arg)| (verb, arg));

            match verb.to_ascii_uppercase().as_str() {
                "EHLO" => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::Ehlo(arg.to_string()));
                    if config.ehlo_supported {
                        let mut response = String::from("250-mock.test\r\n");
                        for (idx, capability) in config.capabilities.iter().enumerate() {
                            let sep = if idx + 1 == config.capabilities.len() {
                                ' '
                            } else {
                                '-'
                            };
                            let _ = write!(response, "250{sep}{capability}\r\n");
                        }
                        if config.capabilities.is_empty() {
                            response = "250 mock.test\r\n".to_string();
                        }
                        stream.get_mut().write_all(response.as_bytes()).await?;
                    } else {
                        reply(&mut stream, 502, "5.5.1 Command not implemented").await?;
                    }
                }
                "HELO" => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::Helo(arg.to_string()));
                    reply(&mut stream, 250, "mock.test").await?;
                }
                "MAIL" => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::MailFrom(arg.to_string()));
                    reply(&mut stream, 250, "2.1.0 Ok").await?;
                }
                "RCPT" => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::RcptTo(arg.to_string()));
                    if config
                        .rejected_recipients
                        .iter()
                        .any(|rejected| arg.contains(rejected.as_str()))
                    {
                        reply(&mut stream, 550, "5.1.1 Mailbox unavailable").await?;
                    } else {
                        reply(&mut stream, 250, "2.1.5 Ok").await?;
                    }
                }
                "DATA" => {
                    commands.write().await.push(SmtpCommand::Data);
                    reply(&mut stream, 354, "End data with <CR><LF>.<CR><LF>").await?;

                    let mut content = String::new();
                    loop {
                        line.clear();
                        if stream.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line == ".\r\n" {
                            break;
                        }
                        content.push_str(line.strip_prefix('.').unwrap_or(&line));
                    }
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::MessageContent(content));
                    reply(
                        &mut stream,
                        config.data_end_response.0,
                        &config.data_end_response.1,
                    )
                    .await?;
                }
                "RSET" => {
                    commands.write().await.push(SmtpCommand::Rset);
                    reply(&mut stream, 250, "2.0.0 Ok").await?;
                }
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    reply(&mut stream, 221, "2.0.0 Bye").await?;
                    return Ok(());
                }
                _ => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::Other(cmd_line.clone()));
                    reply(&mut stream, 500, "5.5.2 Unknown command").await?;
                }
            }
        }
    }
}

async fn reply(stream: &mut BufReader<TcpStream>, code: u16, message: &str) -> std::io::Result<()> {
    let stream = stream.get_mut();
    stream
        .write_all(format!("{code} {message}\r\n").as_bytes())
        .await?;
    stream.flush().await
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = (code, message.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.config.capabilities = capabilities.iter().map(|cap| cap.to_string()).collect();
        self
    }

    /// Reply 502 to EHLO so clients fall back to HELO
    pub fn without_ehlo(mut self) -> Self {
        self.config.ehlo_supported = false;
        self
    }

    /// Refuse RCPT TO for any address containing `address`
    pub fn rejecting_recipient(mut self, address: impl Into<String>) -> Self {
        self.config.rejected_recipients.push(address.into());
        self
    }

    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = (code, message.into());
        self
    }

    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let sessions = Arc::new(AtomicUsize::new(0));

        let commands_clone = Arc::clone(&commands);
        let sessions_clone = Arc::clone(&sessions);
        tokio::spawn(async move {
            while let Ok((stream, _peer)) = listener.accept().await {
                sessions_clone.fetch_add(1, Ordering::SeqCst);
                let config = Arc::clone(&config);
                let commands = Arc::clone(&commands_clone);
                tokio::spawn(async move {
                    let _ = MockSmtpServer::handle_client(stream, config, commands).await;
                });
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands,
            sessions,
        })
    }
}
