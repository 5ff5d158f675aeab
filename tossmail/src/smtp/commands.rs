use crate::error::{Result, TossmailError};

#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    /// Sender address plus the declared SIZE parameter when given
    MailFrom(String, Option<usize>),
    RcptTo(String),
    Data,
    Rset,
    Quit,
    Noop,
    Starttls,
    /// Mechanism name and the optional initial response
    Auth(String, Option<String>),
    Unknown(String),
}

impl SmtpCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(TossmailError::SmtpProtocol("Empty command".to_string()));
        }

        let parts: Vec<&str> = line.splitn(2, ' ').collect();
        let command = parts[0].to_uppercase();
        let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

        match command.as_str() {
            "HELO" => {
                if args.is_empty() {
                    return Err(TossmailError::SmtpProtocol(
                        "HELO requires domain".to_string(),
                    ));
                }
                Ok(SmtpCommand::Helo(args.to_string()))
            }
            "EHLO" => {
                if args.is_empty() {
                    return Err(TossmailError::SmtpProtocol(
                        "EHLO requires domain".to_string(),
                    ));
                }
                Ok(SmtpCommand::Ehlo(args.to_string()))
            }
            "MAIL" => {
                // Parse MAIL FROM:<address> [SIZE=n]
                let (from, size) = Self::parse_mail_from(args)?;
                Ok(SmtpCommand::MailFrom(from, size))
            }
            "RCPT" => {
                // Parse RCPT TO:<address>
                let to = Self::parse_rcpt_to(args)?;
                Ok(SmtpCommand::RcptTo(to))
            }
            "DATA" => Ok(SmtpCommand::Data),
            "RSET" => Ok(SmtpCommand::Rset),
            "QUIT" => Ok(SmtpCommand::Quit),
            "NOOP" => Ok(SmtpCommand::Noop),
            "STARTTLS" => Ok(SmtpCommand::Starttls),
            "AUTH" => {
                let mut words = args.split_whitespace();
                let mechanism = match words.next() {
                    Some(m) => m.to_string(),
                    None => {
                        return Err(TossmailError::SmtpProtocol(
                            "AUTH requires a mechanism".to_string(),
                        ))
                    }
                };
                let initial = words.next().map(|s| s.to_string());
                Ok(SmtpCommand::Auth(mechanism, initial))
            }
            _ => Ok(SmtpCommand::Unknown(command)),
        }
    }

    fn parse_mail_from(args: &str) -> Result<(String, Option<usize>)> {
        // Expected format: FROM:<email@domain.com> [SIZE=n]
        if !args.to_uppercase().starts_with("FROM:") {
            return Err(TossmailError::SmtpProtocol(
                "Invalid MAIL FROM syntax".to_string(),
            ));
        }

        let rest = args[5..].trim();
        let (address_part, params) = match rest.split_once(' ') {
            Some((address, params)) => (address.trim(), params.trim()),
            None => (rest, ""),
        };

        let email = Self::strip_angle_brackets(address_part);

        let mut size = None;
        for param in params.split_whitespace() {
            let upper = param.to_uppercase();
            if let Some(value) = upper.strip_prefix("SIZE=") {
                size = value.parse::<usize>().ok();
            }
        }

        Ok((email.to_string(), size))
    }

    fn parse_rcpt_to(args: &str) -> Result<String> {
        // Expected format: TO:<email@domain.com>
        if !args.to_uppercase().starts_with("TO:") {
            return Err(TossmailError::SmtpProtocol(
                "Invalid RCPT TO syntax".to_string(),
            ));
        }

        let rest = args[3..].trim();
        let address_part = match rest.split_once(' ') {
            Some((address, _params)) => address.trim(),
            None => rest,
        };

        Ok(Self::strip_angle_brackets(address_part).to_string())
    }

    fn strip_angle_brackets(address: &str) -> &str {
        if address.starts_with('<') && address.ends_with('>') {
            &address[1..address.len() - 1]
        } else {
            address
        }
    }
}
