use crate::config::SmtpConfig;
use crate::domain::DomainStore;
use crate::error::{Result, TossmailError};
use crate::mime::{MimeParser, ParsedEmail};
use crate::notify::{NewMessageNotice, NotificationHub};
use crate::smtp::commands::SmtpCommand;
use crate::storage::{FileStore, MailStore, NewAttachment, NewMessage};
use crate::utils::{split_address, validate_email};
use base64::{engine::general_purpose, Engine as _};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Maximum number of errors before disconnecting
const MAX_ERRORS: usize = 10;

/// Everything a session needs to turn an accepted message into rows
#[derive(Clone)]
pub struct SmtpContext {
    pub domains: DomainStore,
    pub mail: MailStore,
    pub files: Arc<dyn FileStore>,
    pub hub: Arc<dyn NotificationHub>,
}

/// Unified stream type for both plain and TLS connections
///
/// This enum allows us to handle both plain TCP and TLS-encrypted
/// connections through the same interface, enabling STARTTLS upgrades
/// mid-session.
enum SmtpStream {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
    /// Temporary state during STARTTLS upgrade - should never be observable
    Upgrading,
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            SmtpStream::Upgrading => {
                panic!("Attempted I/O on SmtpStream during STARTTLS upgrade")
            }
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            SmtpStream::Upgrading => {
                panic!("Attempted I/O on SmtpStream during STARTTLS upgrade")
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
            SmtpStream::Upgrading => {
                panic!("Attempted I/O on SmtpStream during STARTTLS upgrade")
            }
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            SmtpStream::Upgrading => {
                panic!("Attempted I/O on SmtpStream during STARTTLS upgrade")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SmtpState {
    Fresh,
    Greeted,
    MailFrom,
    RcptTo,
    Data,
}

/// Result of processing SMTP commands
enum SessionResult {
    /// Continue processing (after STARTTLS upgrade)
    Continue,
    /// Session ended normally
    Quit,
}

/// SMTP session handler
///
/// One instance per TCP connection. Recipients are validated against
/// the domain store as they arrive; accepted messages are parsed once
/// and delivered per recipient, with failures isolated so one bad
/// mailbox never costs the others their copy.
pub struct SmtpSession {
    state: SmtpState,
    from: Option<String>,
    to: Vec<String>,
    data: Vec<u8>,
    hostname: String,
    ctx: SmtpContext,
    config: SmtpConfig,
    auto_provision: bool,
    tls: Option<TlsAcceptor>,
    is_encrypted: bool,
    authenticated: bool,
    error_count: usize,
}

impl SmtpSession {
    pub fn new(
        hostname: String,
        ctx: SmtpContext,
        config: SmtpConfig,
        auto_provision: bool,
        tls: Option<TlsAcceptor>,
    ) -> Self {
        Self {
            state: SmtpState::Fresh,
            from: None,
            to: Vec::new(),
            data: Vec::new(),
            hostname,
            ctx,
            config,
            auto_provision,
            tls,
            is_encrypted: false,
            authenticated: false,
            error_count: 0,
        }
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.config.read_timeout_secs)
    }

    fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.config.write_timeout_secs)
    }

    /// Handle the SMTP session, potentially upgrading to TLS mid-stream
    pub async fn handle(mut self, stream: TcpStream) -> Result<()> {
        if let Ok(peer_addr) = stream.peer_addr() {
            debug!("Session started for {}", peer_addr);
        }

        // Wrap in unified stream type (starts as plain)
        let mut smtp_stream = SmtpStream::Plain(stream);

        let greeting = format!("220 {} ESMTP Service Ready\r\n", self.hostname);
        self.write_reply(&mut smtp_stream, &greeting).await?;

        // Process the session in a loop so STARTTLS can restart
        // command handling on the upgraded stream without recursion
        loop {
            match self.process_commands(&mut smtp_stream).await? {
                SessionResult::Continue => continue,
                SessionResult::Quit => break,
            }
        }

        Ok(())
    }

    async fn write_reply<W>(&self, writer: &mut W, reply: &str) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        debug!("Sending: {}", reply.trim_end());
        timeout(self.write_timeout(), async {
            writer.write_all(reply.as_bytes()).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| TossmailError::SmtpProtocol("Write timeout".to_string()))??;
        Ok(())
    }

    /// Process SMTP commands on the given stream
    async fn process_commands(&mut self, stream: &mut SmtpStream) -> Result<SessionResult> {
        // The reader wraps a reborrow so it can be dropped to regain
        // access to the stream when STARTTLS replaces it
        let mut buf_reader = BufReader::new(&mut *stream);
        let mut line = String::new();

        loop {
            if self.error_count >= MAX_ERRORS {
                warn!("Too many errors, disconnecting");
                self.write_reply(&mut buf_reader, "421 Too many errors, closing connection\r\n")
                    .await?;
                return Ok(SessionResult::Quit);
            }

            line.clear();

            let read_result = timeout(self.read_timeout(), buf_reader.read_line(&mut line)).await;

            let n = match read_result {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("IO error reading line: {}", e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("Command timeout, disconnecting");
                    self.write_reply(&mut buf_reader, "421 Timeout, closing connection\r\n")
                        .await?;
                    return Ok(SessionResult::Quit);
                }
            };

            if n == 0 {
                debug!("Client disconnected");
                return Ok(SessionResult::Quit);
            }

            if line.len() > self.config.max_line_length {
                error!("Line too long: {} bytes", line.len());
                self.write_reply(&mut buf_reader, "500 Line too long\r\n").await?;
                self.error_count += 1;
                continue;
            }

            let line_trimmed = line.trim_end();
            debug!("Received: {}", line_trimmed);

            match SmtpCommand::parse(line_trimmed) {
                Ok(cmd) => {
                    // STARTTLS needs the raw stream back to upgrade it
                    if matches!(cmd, SmtpCommand::Starttls) {
                        drop(buf_reader);

                        match self.handle_starttls_upgrade(stream).await {
                            Ok(true) => {
                                info!("STARTTLS upgrade completed, restarting session");
                                return Ok(SessionResult::Continue);
                            }
                            Ok(false) => {
                                buf_reader = BufReader::new(&mut *stream);
                                continue;
                            }
                            Err(e) => {
                                error!("STARTTLS error: {}", e);
                                return Err(e);
                            }
                        }
                    }

                    // AUTH may need a continuation read
                    if let SmtpCommand::Auth(mechanism, initial_response) = cmd.clone() {
                        if let Err(e) = self
                            .handle_auth(&mechanism, initial_response, &mut buf_reader)
                            .await
                        {
                            error!("AUTH error: {}", e);
                            self.write_reply(
                                &mut buf_reader,
                                "454 4.7.0 Temporary authentication failure\r\n",
                            )
                            .await?;
                            self.error_count += 1;
                        }
                        continue;
                    }

                    match self.handle_command(cmd).await {
                        Ok(response) => {
                            self.write_reply(&mut buf_reader, &response).await?;

                            if response.starts_with("221") {
                                // QUIT command
                                return Ok(SessionResult::Quit);
                            }

                            if self.state == SmtpState::Data {
                                match self.receive_data(&mut buf_reader).await {
                                    Ok(true) => {}
                                    Ok(false) => return Ok(SessionResult::Quit),
                                    Err(e) => {
                                        error!("Error receiving data: {}", e);
                                        self.write_reply(
                                            &mut buf_reader,
                                            "451 Error receiving message\r\n",
                                        )
                                        .await?;
                                        self.error_count += 1;
                                        self.reset_transaction();
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            error!("Error handling command: {}", e);
                            self.write_reply(&mut buf_reader, &format!("451 {}\r\n", e))
                                .await?;
                            self.error_count += 1;
                        }
                    }
                }
                Err(e) => {
                    debug!("Command parse error: {}", e);
                    self.write_reply(&mut buf_reader, "500 Syntax error, command unrecognized\r\n")
                        .await?;
                    self.error_count += 1;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: SmtpCommand) -> Result<String> {
        match (&self.state, cmd) {
            (SmtpState::Fresh, SmtpCommand::Helo(domain)) => {
                info!("HELO from {}", domain);
                self.state = SmtpState::Greeted;
                Ok(format!("250 {} Hello {}\r\n", self.hostname, domain))
            }
            (SmtpState::Fresh, SmtpCommand::Ehlo(domain)) => {
                info!("EHLO from {}", domain);
                self.state = SmtpState::Greeted;

                let mut response = format!("250-{} Hello {}\r\n", self.hostname, domain);
                response.push_str(&format!("250-SIZE {}\r\n", self.config.max_message_size));

                if self.tls.is_some() && !self.is_encrypted {
                    response.push_str("250-STARTTLS\r\n");
                }
                if self.is_encrypted || self.tls.is_none() || self.config.allow_insecure_auth {
                    response.push_str("250-AUTH PLAIN\r\n");
                }

                response.push_str("250 HELP\r\n");
                Ok(response)
            }
            (
                SmtpState::Greeted | SmtpState::MailFrom | SmtpState::RcptTo,
                SmtpCommand::MailFrom(from, declared_size),
            ) => {
                // The null reverse-path is legal (bounce messages)
                if !from.is_empty() {
                    validate_email(&from)?;
                }

                if let Some(size) = declared_size {
                    if size > self.config.max_message_size {
                        warn!(
                            "MAIL FROM declared {} bytes, over the {} limit",
                            size, self.config.max_message_size
                        );
                        return Ok(format!(
                            "552 5.3.4 Message size exceeds limit of {} bytes\r\n",
                            self.config.max_message_size
                        ));
                    }
                }

                info!(
                    "MAIL FROM: {}",
                    if from.is_empty() { "<>" } else { from.as_str() }
                );
                self.from = Some(from);
                self.to.clear();
                self.data.clear();
                self.state = SmtpState::MailFrom;
                Ok("250 OK\r\n".to_string())
            }
            (SmtpState::MailFrom | SmtpState::RcptTo, SmtpCommand::RcptTo(to)) => {
                self.handle_rcpt(to).await
            }
            (SmtpState::RcptTo, SmtpCommand::Data) => {
                info!("DATA command received");
                self.state = SmtpState::Data;
                Ok("354 Start mail input; end with <CRLF>.<CRLF>\r\n".to_string())
            }
            (SmtpState::MailFrom, SmtpCommand::Data) => {
                Ok("503 5.5.1 Need RCPT before DATA\r\n".to_string())
            }
            (_, SmtpCommand::Rset) => {
                info!("RSET command");
                self.reset_transaction();
                Ok("250 OK\r\n".to_string())
            }
            (_, SmtpCommand::Noop) => Ok("250 OK\r\n".to_string()),
            (_, SmtpCommand::Quit) => {
                info!("QUIT command");
                Ok(format!("221 {} closing connection\r\n", self.hostname))
            }
            // STARTTLS and AUTH are intercepted in process_commands
            (_, SmtpCommand::Starttls) | (_, SmtpCommand::Auth(_, _)) => {
                Ok("503 Bad sequence of commands\r\n".to_string())
            }
            (_, SmtpCommand::Unknown(cmd)) => {
                debug!("Unknown command: {}", cmd);
                Ok("502 Command not implemented\r\n".to_string())
            }
            _ => Ok("503 Bad sequence of commands\r\n".to_string()),
        }
    }

    /// Validate a recipient against the provisioning state.
    ///
    /// Unknown and inactive domains are permanent errors; lookup
    /// failures are temporary so a well-behaved sender retries.
    async fn handle_rcpt(&mut self, to: String) -> Result<String> {
        if self.to.len() >= self.config.max_recipients {
            warn!("Too many recipients: {}", self.to.len());
            return Ok(format!(
                "452 4.5.3 Too many recipients (max {})\r\n",
                self.config.max_recipients
            ));
        }

        let (local_part, domain_name) = match split_address(&to) {
            Ok(parts) => parts,
            Err(e) => {
                debug!("RCPT TO rejected, bad address {}: {}", to, e);
                return Ok("501 5.1.3 Invalid address syntax\r\n".to_string());
            }
        };

        let domain = match self.ctx.domains.find_by_name(&domain_name).await {
            Ok(Some(domain)) => domain,
            Ok(None) => {
                info!("RCPT TO rejected, unknown domain: {}", domain_name);
                return Ok("550 5.1.1 Domain not served here\r\n".to_string());
            }
            Err(e) => {
                error!("Domain lookup failed for {}: {}", domain_name, e);
                return Ok("451 4.3.0 Temporary lookup failure, try again later\r\n".to_string());
            }
        };

        if !domain.receives_mail() {
            info!("RCPT TO rejected, domain not active: {}", domain_name);
            return Ok("550 5.1.1 Domain not accepting mail\r\n".to_string());
        }

        let full_address = format!("{}@{}", local_part, domain_name);

        if !self.auto_provision {
            match self.ctx.mail.mailbox_exists(&full_address).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("RCPT TO rejected, no mailbox: {}", full_address);
                    return Ok("550 5.1.1 Mailbox not found\r\n".to_string());
                }
                Err(e) => {
                    error!("Mailbox lookup failed for {}: {}", full_address, e);
                    return Ok(
                        "451 4.3.0 Temporary lookup failure, try again later\r\n".to_string()
                    );
                }
            }
        }

        info!("RCPT TO: {}", full_address);
        self.to.push(full_address);
        self.state = SmtpState::RcptTo;
        Ok("250 OK\r\n".to_string())
    }

    /// Receive message content, then deliver to every recipient.
    ///
    /// Returns false when the connection should close (oversize data).
    async fn receive_data<S>(&mut self, buf_reader: &mut BufReader<S>) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();

            let read_result = timeout(self.read_timeout(), buf_reader.read_line(&mut line)).await;

            let n = match read_result {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("IO error during DATA: {}", e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("DATA timeout");
                    return Err(TossmailError::SmtpProtocol("Timeout during DATA".to_string()));
                }
            };

            if n == 0 {
                return Err(TossmailError::SmtpProtocol(
                    "Connection closed during DATA".to_string(),
                ));
            }

            if line.len() > self.config.max_line_length {
                error!("DATA line too long: {} bytes", line.len());
                return Err(TossmailError::SmtpProtocol("Line too long".to_string()));
            }

            // End of data marker
            if line.trim_end() == "." {
                info!("End of DATA received, total size: {} bytes", self.data.len());
                break;
            }

            let new_size = self.data.len() + line.len();
            if new_size > self.config.max_message_size {
                warn!(
                    "Message too large: {} bytes (max {})",
                    new_size, self.config.max_message_size
                );
                self.write_reply(
                    buf_reader,
                    &format!(
                        "552 5.3.4 Message exceeds maximum size of {} bytes\r\n",
                        self.config.max_message_size
                    ),
                )
                .await?;
                return Ok(false);
            }

            // Dot-stuffing transparency (RFC 5321 §4.5.2)
            if line.starts_with("..") {
                self.data.extend_from_slice(&line.as_bytes()[1..]);
            } else {
                self.data.extend_from_slice(line.as_bytes());
            }
        }

        if self.data.is_empty() {
            warn!("Empty message received");
            self.write_reply(buf_reader, "554 5.6.0 Empty message\r\n").await?;
            self.reset_transaction();
            return Ok(true);
        }

        let (delivered, attempted) = self.deliver_message().await;
        if delivered > 0 {
            info!("Delivered to {}/{} recipients", delivered, attempted);
            self.write_reply(buf_reader, "250 OK: Message accepted for delivery\r\n")
                .await?;
        } else {
            warn!("Delivery failed for all {} recipients", attempted);
            self.write_reply(
                buf_reader,
                "451 4.3.0 Unable to deliver message, try again later\r\n",
            )
            .await?;
        }

        self.reset_transaction();
        Ok(true)
    }

    /// Parse the buffered message once, then deliver per recipient.
    ///
    /// A failure for one recipient is logged and must not abort the
    /// others. Returns (delivered, attempted).
    async fn deliver_message(&self) -> (usize, usize) {
        let attempted = self.to.len();

        let parsed = match MimeParser::parse(&self.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Failed to parse message: {}", e);
                return (0, attempted);
            }
        };

        let mut delivered = 0;
        for recipient in &self.to {
            match self.deliver_to(recipient, &parsed).await {
                Ok(message_id) => {
                    info!("Delivered message {} to {}", message_id, recipient);
                    delivered += 1;
                }
                Err(e) => {
                    error!("Delivery to {} failed: {}", recipient, e);
                }
            }
        }

        (delivered, attempted)
    }

    async fn deliver_to(&self, address: &str, parsed: &ParsedEmail) -> Result<i64> {
        let (local_part, domain_name) = split_address(address)?;

        let domain = self
            .ctx
            .domains
            .find_by_name(&domain_name)
            .await?
            .ok_or_else(|| TossmailError::NotFound(format!("domain {}", domain_name)))?;
        if !domain.receives_mail() {
            return Err(TossmailError::DomainNotActive(domain_name));
        }

        let (mailbox, created) = self
            .ctx
            .mail
            .get_or_create_mailbox(&local_part, domain.id, address)
            .await?;
        if created {
            info!("Auto-provisioned mailbox {}", mailbox.full_address);
        }

        // Attachment content goes to the file store before the rows
        // commit; a failed save drops that attachment, not the message
        let mut attachments = Vec::with_capacity(parsed.attachments.len());
        for attachment in &parsed.attachments {
            match self.ctx.files.save(&attachment.filename, &attachment.data).await {
                Ok(stored) => attachments.push(NewAttachment {
                    filename: attachment.filename.clone(),
                    content_type: attachment.content_type.clone(),
                    storage_path: stored,
                    size_bytes: attachment.size() as i64,
                }),
                Err(e) => {
                    warn!(
                        "Skipping attachment {} for {}: {}",
                        attachment.filename, address, e
                    );
                }
            }
        }

        // Header From may be absent; fall back to the envelope sender
        let sender_email = if parsed.sender_email.is_empty() {
            self.from.clone().unwrap_or_default()
        } else {
            parsed.sender_email.clone()
        };

        let message = self
            .ctx
            .mail
            .create_message_with_attachments(
                NewMessage {
                    mailbox_id: mailbox.id,
                    sender_email,
                    sender_name: parsed.sender_name.clone(),
                    subject: parsed.subject.clone(),
                    snippet: parsed.snippet.clone(),
                    body_text: parsed.text_body.clone().unwrap_or_default(),
                    body_html: parsed.html_body.clone().unwrap_or_default(),
                },
                attachments,
            )
            .await?;

        self.ctx.hub.broadcast_new_message(NewMessageNotice {
            message_id: message.id,
            mailbox_id: mailbox.id,
            sender_email: message.sender_email.clone(),
            sender_name: message.sender_name.clone(),
            subject: message.subject.clone(),
            received_at: message.received_at,
        });

        Ok(message.id)
    }

    fn reset_transaction(&mut self) {
        self.from = None;
        self.to.clear();
        self.data.clear();
        if self.state != SmtpState::Fresh {
            self.state = SmtpState::Greeted;
        }
    }

    /// Handle STARTTLS and perform the TLS upgrade in place.
    ///
    /// Returns Ok(true) when the stream was replaced with its TLS
    /// version (the session restarts; RFC 3207 requires a fresh EHLO),
    /// Ok(false) when STARTTLS was refused and the session continues.
    async fn handle_starttls_upgrade(&mut self, stream: &mut SmtpStream) -> Result<bool> {
        let acceptor = match &self.tls {
            Some(acceptor) => acceptor.clone(),
            None => {
                self.write_reply(stream, "502 STARTTLS not available\r\n").await?;
                return Ok(false);
            }
        };

        if self.is_encrypted {
            self.write_reply(stream, "503 Already using TLS\r\n").await?;
            return Ok(false);
        }

        // Must come after EHLO/HELO, before a mail transaction
        if self.state != SmtpState::Greeted {
            self.write_reply(stream, "503 Bad sequence of commands\r\n").await?;
            return Ok(false);
        }

        info!("STARTTLS: Initiating TLS upgrade");
        self.write_reply(stream, "220 Ready to start TLS\r\n").await?;

        // Take the plain stream out, leaving the placeholder
        let tcp_stream = match std::mem::replace(stream, SmtpStream::Upgrading) {
            SmtpStream::Plain(tcp) => tcp,
            _ => {
                error!("STARTTLS: Stream not plain despite is_encrypted=false");
                return Err(TossmailError::SmtpProtocol(
                    "Internal error: stream state mismatch".to_string(),
                ));
            }
        };

        let tls_stream = acceptor.accept(tcp_stream).await.map_err(|e| {
            error!("TLS handshake failed: {}", e);
            TossmailError::SmtpProtocol(format!("TLS handshake failed: {}", e))
        })?;

        *stream = SmtpStream::Tls(tls_stream);
        self.is_encrypted = true;

        // Client must send EHLO again after STARTTLS (RFC 3207)
        self.state = SmtpState::Fresh;

        Ok(true)
    }

    /// Handle AUTH PLAIN.
    ///
    /// Receiving mail needs no credentials, so any well-formed attempt
    /// succeeds; the identity is only logged.
    async fn handle_auth<S>(
        &mut self,
        mechanism: &str,
        initial_response: Option<String>,
        buf_reader: &mut BufReader<S>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.state != SmtpState::Greeted {
            self.write_reply(buf_reader, "503 Bad sequence of commands\r\n").await?;
            return Ok(());
        }

        if self.tls.is_some() && !self.is_encrypted && !self.config.allow_insecure_auth {
            self.write_reply(
                buf_reader,
                "538 5.7.11 Encryption required for requested authentication mechanism\r\n",
            )
            .await?;
            return Ok(());
        }

        if !mechanism.eq_ignore_ascii_case("PLAIN") {
            self.write_reply(buf_reader, "504 5.5.4 Unrecognized authentication type\r\n")
                .await?;
            return Ok(());
        }

        let payload = match initial_response {
            Some(data) => data,
            None => {
                // Ask for the credentials in a continuation
                self.write_reply(buf_reader, "334 \r\n").await?;

                let mut line = String::new();
                timeout(self.read_timeout(), buf_reader.read_line(&mut line))
                    .await
                    .map_err(|_| TossmailError::SmtpProtocol("AUTH timeout".to_string()))??;
                line.trim().to_string()
            }
        };

        match decode_plain_identity(&payload) {
            Some(identity) => info!("AUTH PLAIN accepted for {}", identity),
            None => info!("AUTH PLAIN accepted"),
        }
        self.authenticated = true;

        self.write_reply(buf_reader, "235 2.7.0 Authentication successful\r\n").await?;
        Ok(())
    }
}

/// Pull the authentication identity out of an AUTH PLAIN payload
/// (`authzid NUL authcid NUL password`, base64-encoded) for logging
fn decode_plain_identity(payload: &str) -> Option<String> {
    let decoded = general_purpose::STANDARD.decode(payload.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;

    let mut fields = text.split('\0');
    let _authzid = fields.next()?;
    let authcid = fields.next()?;

    if authcid.is_empty() {
        None
    } else {
        Some(authcid.to_string())
    }
}
