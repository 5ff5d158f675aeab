/// A raw MIME part as it appears on the wire (body may still be encoded)
#[derive(Debug, Clone)]
pub struct MimePart {
    /// Content-Type header value
    pub content_type: String,
    /// Content-Disposition header value (e.g., "attachment")
    pub content_disposition: Option<String>,
    /// Filename from Content-Disposition or Content-Type
    pub filename: Option<String>,
    /// Content-Transfer-Encoding (e.g., "base64", "quoted-printable")
    pub encoding: Option<String>,
    /// Raw body content (may be encoded)
    pub body: Vec<u8>,
    /// Whether this part is an attachment
    pub is_attachment: bool,
}

impl Default for MimePart {
    fn default() -> Self {
        MimePart {
            content_type: "text/plain".to_string(),
            content_disposition: None,
            filename: None,
            encoding: None,
            body: Vec::new(),
            is_attachment: false,
        }
    }
}

/// A decoded attachment ready for storage
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    /// Decoded content
    pub data: Vec<u8>,
}

impl EmailAttachment {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Parsed email with the fields the service stores and displays
#[derive(Debug, Clone, Default)]
pub struct ParsedEmail {
    /// Display name from the From header ("" when absent)
    pub sender_name: String,
    /// Address from the From header ("" when absent)
    pub sender_email: String,
    pub subject: String,
    /// Plain text body (if present)
    pub text_body: Option<String>,
    /// HTML body (if present)
    pub html_body: Option<String>,
    /// Preview text derived from the bodies, capped at 255 chars
    pub snippet: String,
    pub attachments: Vec<EmailAttachment>,
}

impl ParsedEmail {
    pub fn new() -> Self {
        ParsedEmail::default()
    }

    /// Get total size of all attachments in bytes
    pub fn total_attachment_size(&self) -> usize {
        self.attachments.iter().map(|a| a.data.len()).sum()
    }

    /// Get number of attachments
    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// Check if email has attachments
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_part_default() {
        let part = MimePart::default();
        assert_eq!(part.content_type, "text/plain");
        assert!(part.content_disposition.is_none());
        assert!(part.filename.is_none());
        assert!(!part.is_attachment);
    }

    #[test]
    fn test_parsed_email_default() {
        let email = ParsedEmail::default();
        assert!(email.sender_name.is_empty());
        assert!(email.sender_email.is_empty());
        assert!(email.text_body.is_none());
        assert!(email.html_body.is_none());
        assert_eq!(email.attachment_count(), 0);
    }

    #[test]
    fn test_attachment_count() {
        let mut email = ParsedEmail::new();
        assert_eq!(email.attachment_count(), 0);

        email.attachments.push(EmailAttachment {
            filename: "a.txt".to_string(),
            content_type: "text/plain".to_string(),
            data: vec![1, 2, 3],
        });
        assert_eq!(email.attachment_count(), 1);
        assert!(email.has_attachments());
    }

    #[test]
    fn test_total_attachment_size() {
        let mut email = ParsedEmail::new();

        email.attachments.push(EmailAttachment {
            filename: "a.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            data: vec![1, 2, 3, 4, 5],
        });

        email.attachments.push(EmailAttachment {
            filename: "b.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            data: vec![1, 2, 3],
        });

        assert_eq!(email.total_attachment_size(), 8);
        assert_eq!(email.attachments[0].size(), 5);
    }
}
