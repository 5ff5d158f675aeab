use base64::{engine::general_purpose, Engine as _};
use regex::Regex;
use std::collections::HashMap;

use super::types::{EmailAttachment, MimePart, ParsedEmail};
use crate::error::{Result, TossmailError};

const SNIPPET_MAX_CHARS: usize = 255;

/// MIME message parser
///
/// Tolerant by design: malformed input degrades to empty fields or
/// raw bodies, it never aborts ingestion.
pub struct MimeParser;

impl MimeParser {
    /// Parse a raw email message into the fields the service stores
    pub fn parse(message: &[u8]) -> Result<ParsedEmail> {
        let message_str = String::from_utf8_lossy(message);

        let (headers_str, body_str) = Self::split_headers_body(&message_str)?;
        let headers = Self::parse_headers(&headers_str);

        let mut parsed = ParsedEmail::new();

        let from = headers.get("from").map(String::as_str).unwrap_or("");
        let (sender_name, sender_email) = Self::parse_from_header(from);
        parsed.sender_name = sender_name;
        parsed.sender_email = sender_email;

        let subject = headers.get("subject").map(String::as_str).unwrap_or("");
        parsed.subject = Self::decode_encoded_words(subject);

        let content_type = headers
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| "text/plain".to_string());

        if content_type.to_lowercase().contains("multipart/") {
            if let Some(boundary) = Self::extract_boundary(&content_type) {
                for part in Self::parse_multipart(&boundary, &body_str) {
                    Self::categorize_part(&mut parsed, part);
                }
            } else {
                // No boundary found, treat as plain text
                parsed.text_body = Some(body_str);
            }
        } else {
            // Single-part message, top-level encoding still applies
            let part = MimePart {
                content_type,
                encoding: headers.get("content-transfer-encoding").cloned(),
                body: body_str.into_bytes(),
                ..Default::default()
            };
            Self::categorize_part(&mut parsed, part);
        }

        parsed.snippet = Self::generate_snippet(
            parsed.text_body.as_deref().unwrap_or(""),
            parsed.html_body.as_deref().unwrap_or(""),
        );

        Ok(parsed)
    }

    /// Split a From header into display name and address.
    ///
    /// Handles `"Name" <addr>`, `Name <addr>` and bare `addr` forms.
    /// Anything else degrades without panicking.
    pub fn parse_from_header(header: &str) -> (String, String) {
        let header = header.trim();
        if header.is_empty() {
            return (String::new(), String::new());
        }

        if let Ok(re) = Regex::new(r#"^"?([^"<]*)"?\s*<([^>]*)>"#) {
            if let Some(caps) = re.captures(header) {
                let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                let email = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
                return (Self::decode_encoded_words(name), email.to_string());
            }
        }

        if header.contains('@') {
            let email = header.trim_matches(|c| c == '<' || c == '>').trim();
            return (String::new(), email.to_string());
        }

        // Parse failure: the whole header becomes the address
        (String::new(), header.to_string())
    }

    /// Build the preview snippet from the message bodies.
    ///
    /// Prefers the text body; falls back to the HTML body with markup
    /// stripped. Whitespace runs collapse to single spaces and the
    /// result is capped at 255 chars, the last three being "...".
    pub fn generate_snippet(text_body: &str, html_body: &str) -> String {
        let source = if !text_body.trim().is_empty() {
            text_body.to_string()
        } else if !html_body.trim().is_empty() {
            Self::strip_html(html_body)
        } else {
            return String::new();
        };

        let collapsed = source.split_whitespace().collect::<Vec<_>>().join(" ");

        if collapsed.chars().count() <= SNIPPET_MAX_CHARS {
            collapsed
        } else {
            let mut snippet: String = collapsed.chars().take(SNIPPET_MAX_CHARS - 3).collect();
            snippet.push_str("...");
            snippet
        }
    }

    /// Split message into headers and body
    fn split_headers_body(message: &str) -> Result<(String, String)> {
        // Headers end with double CRLF or double LF
        if let Some(pos) = message.find("\r\n\r\n") {
            let headers = message[..pos].to_string();
            let body = message[pos + 4..].to_string();
            Ok((headers, body))
        } else if let Some(pos) = message.find("\n\n") {
            let headers = message[..pos].to_string();
            let body = message[pos + 2..].to_string();
            Ok((headers, body))
        } else {
            // No body separator found, treat entire message as headers
            Ok((message.to_string(), String::new()))
        }
    }

    /// Parse email headers into HashMap
    fn parse_headers(headers_str: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        let mut current_header: Option<(String, String)> = None;

        for line in headers_str.lines() {
            if line.starts_with(' ') || line.starts_with('\t') {
                // Continuation of previous header (folded header)
                if let Some((_, ref mut value)) = current_header {
                    value.push(' ');
                    value.push_str(line.trim());
                }
            } else if let Some(colon_pos) = line.find(':') {
                // Save previous header if exists
                if let Some((name, value)) = current_header.take() {
                    headers.insert(name.to_lowercase(), value);
                }

                // Start new header
                let name = line[..colon_pos].trim().to_string();
                let value = line[colon_pos + 1..].trim().to_string();
                current_header = Some((name, value));
            }
        }

        // Save last header
        if let Some((name, value)) = current_header {
            headers.insert(name.to_lowercase(), value);
        }

        headers
    }

    /// Extract boundary from Content-Type header
    fn extract_boundary(content_type: &str) -> Option<String> {
        for part in content_type.split(';') {
            let part = part.trim();
            if let Some(boundary) = part.strip_prefix("boundary=") {
                // Remove quotes if present
                let boundary = boundary.trim_matches('"').trim_matches('\'');
                return Some(boundary.to_string());
            }
        }
        None
    }

    /// Parse multipart message body
    fn parse_multipart(boundary: &str, body: &str) -> Vec<MimePart> {
        let mut parts = Vec::new();
        let boundary_marker = format!("--{}", boundary);

        let sections: Vec<&str> = body.split(&boundary_marker).collect();

        for section in sections {
            let section = section.trim();

            // Skip empty sections and the end marker
            if section.is_empty() || section.starts_with("--") {
                continue;
            }

            // Each section has headers and body
            if let Ok((part_headers_str, part_body)) = Self::split_headers_body(section) {
                let part_headers = Self::parse_headers(&part_headers_str);

                let mut part = MimePart::default();

                // Extract Content-Type
                if let Some(content_type) = part_headers.get("content-type") {
                    part.content_type = content_type.clone();

                    // Extract filename from Content-Type if present
                    if let Some(name) = Self::extract_parameter(content_type, "name") {
                        part.filename = Some(name);
                    }
                }

                // Extract Content-Disposition
                if let Some(disposition) = part_headers.get("content-disposition") {
                    part.content_disposition = Some(disposition.clone());

                    let disposition_lower = disposition.to_lowercase();
                    if disposition_lower.contains("attachment") {
                        part.is_attachment = true;
                    }

                    // Extract filename from Content-Disposition
                    if let Some(filename) = Self::extract_parameter(disposition, "filename") {
                        part.filename = Some(filename);
                    }

                    // Inline parts that carry a filename are attachments too
                    if disposition_lower.contains("inline") && part.filename.is_some() {
                        part.is_attachment = true;
                    }
                }

                // Extract Content-Transfer-Encoding
                if let Some(encoding) = part_headers.get("content-transfer-encoding") {
                    part.encoding = Some(encoding.clone());
                }

                // Store body (may be encoded)
                part.body = part_body.as_bytes().to_vec();

                parts.push(part);
            }
        }

        parts
    }

    /// Extract parameter value from header (e.g., filename="file.txt")
    fn extract_parameter(header: &str, param_name: &str) -> Option<String> {
        for part in header.split(';') {
            let part = part.trim();
            if part.to_lowercase().starts_with(&format!("{}=", param_name)) {
                let value = &part[param_name.len() + 1..];
                // Remove quotes
                let value = value.trim_matches('"').trim_matches('\'');
                return Some(value.to_string());
            }
        }
        None
    }

    /// Categorize MIME part into text/HTML/attachment
    fn categorize_part(parsed: &mut ParsedEmail, part: MimePart) {
        let content_type_lower = part.content_type.to_lowercase();

        // Nested multipart (e.g. multipart/alternative inside multipart/mixed)
        if content_type_lower.contains("multipart/") {
            if let Some(boundary) = Self::extract_boundary(&part.content_type) {
                let body = String::from_utf8_lossy(&part.body).to_string();
                for nested in Self::parse_multipart(&boundary, &body) {
                    Self::categorize_part(parsed, nested);
                }
            }
            return;
        }

        if part.is_attachment {
            parsed.attachments.push(Self::attachment_from_part(part));
        } else if content_type_lower.contains("text/html") {
            if let Ok(decoded) = Self::decode_body(&part) {
                parsed.html_body = Some(String::from_utf8_lossy(&decoded).to_string());
            }
        } else if content_type_lower.contains("text/plain") {
            if let Ok(decoded) = Self::decode_body(&part) {
                parsed.text_body = Some(String::from_utf8_lossy(&decoded).to_string());
            }
        } else {
            // Unknown type, treat as attachment
            parsed.attachments.push(Self::attachment_from_part(part));
        }
    }

    /// Decode a raw part into a storable attachment
    fn attachment_from_part(part: MimePart) -> EmailAttachment {
        let data = Self::decode_body(&part).unwrap_or_else(|_| part.body.clone());

        let filename = part
            .filename
            .as_deref()
            .map(Self::decode_encoded_words)
            .unwrap_or_else(|| "attachment.bin".to_string());

        let content_type = part
            .content_type
            .split(';')
            .next()
            .unwrap_or("application/octet-stream")
            .trim()
            .to_string();

        EmailAttachment {
            filename,
            content_type,
            data,
        }
    }

    /// Decode message body based on Content-Transfer-Encoding
    fn decode_body(part: &MimePart) -> Result<Vec<u8>> {
        if let Some(ref encoding) = part.encoding {
            let encoding_lower = encoding.to_lowercase();
            if encoding_lower.contains("base64") {
                Self::decode_base64(&part.body)
            } else if encoding_lower.contains("quoted-printable") {
                Ok(Self::decode_quoted_printable(&part.body))
            } else {
                // 7bit, 8bit, binary - no decoding needed
                Ok(part.body.clone())
            }
        } else {
            Ok(part.body.clone())
        }
    }

    /// Decode base64 content
    fn decode_base64(content: &[u8]) -> Result<Vec<u8>> {
        // Remove whitespace and newlines
        let cleaned: Vec<u8> = content
            .iter()
            .filter(|&&b| !b.is_ascii_whitespace())
            .copied()
            .collect();

        general_purpose::STANDARD
            .decode(&cleaned)
            .map_err(|e| TossmailError::Parse(format!("Base64 decode error: {}", e)))
    }

    /// Decode quoted-printable content
    fn decode_quoted_printable(content: &[u8]) -> Vec<u8> {
        let mut result = Vec::new();
        let text = String::from_utf8_lossy(content);
        let mut chars = text.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch == '=' {
                // Soft line break
                if chars.peek() == Some(&'\n') || chars.peek() == Some(&'\r') {
                    chars.next();
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    continue;
                }

                // Hex-encoded character
                let mut hex = String::new();
                if let Some(c1) = chars.next() {
                    hex.push(c1);
                }
                if let Some(c2) = chars.next() {
                    hex.push(c2);
                }

                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    result.push(byte);
                } else {
                    // Invalid encoding, keep as-is
                    result.push(b'=');
                    result.extend(hex.as_bytes());
                }
            } else {
                result.push(ch as u8);
            }
        }

        result
    }

    /// Decode RFC 2047 encoded words ("=?charset?B?...?=") in a header value
    fn decode_encoded_words(input: &str) -> String {
        let re = match Regex::new(r"=\?[^?]+\?([bBqQ])\?([^?]*)\?=") {
            Ok(re) => re,
            Err(_) => return input.to_string(),
        };

        re.replace_all(input, |caps: &regex::Captures| {
            let payload = &caps[2];
            let decoded = if caps[1].eq_ignore_ascii_case("b") {
                Self::decode_base64(payload.as_bytes())
                    .unwrap_or_else(|_| payload.as_bytes().to_vec())
            } else {
                // Q encoding is quoted-printable with '_' for space
                Self::decode_quoted_printable(payload.replace('_', " ").as_bytes())
            };
            String::from_utf8_lossy(&decoded).to_string()
        })
        .to_string()
    }

    /// Reduce HTML to its visible text
    fn strip_html(html: &str) -> String {
        let mut text = html.to_string();

        // Script and style blocks contribute no visible text
        for pattern in [
            r"(?is)<script[^>]*>.*?</script>",
            r"(?is)<style[^>]*>.*?</style>",
        ] {
            if let Ok(re) = Regex::new(pattern) {
                text = re.replace_all(&text, " ").to_string();
            }
        }

        if let Ok(re) = Regex::new(r"<[^>]*>") {
            text = re.replace_all(&text, " ").to_string();
        }

        // &amp; last so entity text is not decoded twice
        text.replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_headers_body_crlf() {
        let message = "From: test@example.com\r\nSubject: Test\r\n\r\nBody content";
        let (headers, body) = MimeParser::split_headers_body(message).unwrap();
        assert!(headers.contains("From:"));
        assert_eq!(body, "Body content");
    }

    #[test]
    fn test_split_headers_body_lf() {
        let message = "From: test@example.com\nSubject: Test\n\nBody content";
        let (headers, body) = MimeParser::split_headers_body(message).unwrap();
        assert!(headers.contains("From:"));
        assert_eq!(body, "Body content");
    }

    #[test]
    fn test_parse_headers() {
        let headers_str = "From: test@example.com\nSubject: Test Email\nContent-Type: text/plain";
        let headers = MimeParser::parse_headers(headers_str);

        assert_eq!(headers.get("from"), Some(&"test@example.com".to_string()));
        assert_eq!(headers.get("subject"), Some(&"Test Email".to_string()));
        assert_eq!(headers.get("content-type"), Some(&"text/plain".to_string()));
    }

    #[test]
    fn test_parse_headers_folded() {
        let headers_str = "Subject: This is a very long subject\n that spans multiple lines";
        let headers = MimeParser::parse_headers(headers_str);

        assert_eq!(
            headers.get("subject"),
            Some(&"This is a very long subject that spans multiple lines".to_string())
        );
    }

    #[test]
    fn test_extract_boundary() {
        let content_type = "multipart/mixed; boundary=\"----=_Part_123\"";
        let boundary = MimeParser::extract_boundary(content_type);
        assert_eq!(boundary, Some("----=_Part_123".to_string()));
    }

    #[test]
    fn test_extract_boundary_no_quotes() {
        let content_type = "multipart/mixed; boundary=simple_boundary";
        let boundary = MimeParser::extract_boundary(content_type);
        assert_eq!(boundary, Some("simple_boundary".to_string()));
    }

    #[test]
    fn test_extract_parameter() {
        let header = "attachment; filename=\"document.pdf\"";
        let filename = MimeParser::extract_parameter(header, "filename");
        assert_eq!(filename, Some("document.pdf".to_string()));
    }

    #[test]
    fn test_decode_base64() {
        let encoded = b"SGVsbG8gV29ybGQ="; // "Hello World"
        let decoded = MimeParser::decode_base64(encoded).unwrap();
        assert_eq!(decoded, b"Hello World");
    }

    #[test]
    fn test_decode_base64_with_whitespace() {
        let encoded = b"SGVs bG8g\nV29y bGQ="; // "Hello World" with whitespace
        let decoded = MimeParser::decode_base64(encoded).unwrap();
        assert_eq!(decoded, b"Hello World");
    }

    #[test]
    fn test_decode_quoted_printable() {
        let encoded = b"Hello=20World=21"; // "Hello World!"
        let decoded = MimeParser::decode_quoted_printable(encoded);
        assert_eq!(decoded, b"Hello World!");
    }

    #[test]
    fn test_decode_quoted_printable_soft_linebreak() {
        let encoded = b"Hello=\nWorld"; // "HelloWorld" with soft line break
        let decoded = MimeParser::decode_quoted_printable(encoded);
        assert_eq!(decoded, b"HelloWorld");
    }

    #[test]
    fn test_parse_from_header_quoted_name() {
        let (name, email) = MimeParser::parse_from_header("\"Alice A.\" <a@x.com>");
        assert_eq!(name, "Alice A.");
        assert_eq!(email, "a@x.com");
    }

    #[test]
    fn test_parse_from_header_bare_name() {
        let (name, email) = MimeParser::parse_from_header("Bob <b@x.com>");
        assert_eq!(name, "Bob");
        assert_eq!(email, "b@x.com");
    }

    #[test]
    fn test_parse_from_header_address_only() {
        let (name, email) = MimeParser::parse_from_header("c@x.com");
        assert_eq!(name, "");
        assert_eq!(email, "c@x.com");
    }

    #[test]
    fn test_parse_from_header_angle_only() {
        let (name, email) = MimeParser::parse_from_header("<d@x.com>");
        assert_eq!(name, "");
        assert_eq!(email, "d@x.com");
    }

    #[test]
    fn test_parse_from_header_malformed() {
        // Unparseable header falls back to being the address
        let (name, email) = MimeParser::parse_from_header("Undisclosed recipients");
        assert_eq!(name, "");
        assert_eq!(email, "Undisclosed recipients");
    }

    #[test]
    fn test_parse_from_header_empty() {
        let (name, email) = MimeParser::parse_from_header("");
        assert_eq!(name, "");
        assert_eq!(email, "");
    }

    #[test]
    fn test_snippet_prefers_text_body() {
        let snippet = MimeParser::generate_snippet("hello", "<p>ignored</p>");
        assert_eq!(snippet, "hello");
    }

    #[test]
    fn test_snippet_collapses_whitespace() {
        let snippet = MimeParser::generate_snippet("hello\n\n  world\t!", "");
        assert_eq!(snippet, "hello world !");
    }

    #[test]
    fn test_snippet_strips_html() {
        let html = "<html><head><style>p { color: red; }</style>\
                    <script>alert('x');</script></head>\
                    <body><p>Ben &amp; Jerry&#39;s&nbsp;news</p></body></html>";
        let snippet = MimeParser::generate_snippet("", html);
        assert_eq!(snippet, "Ben & Jerry's news");
    }

    #[test]
    fn test_snippet_truncates_at_255() {
        let long = "word ".repeat(100); // 500 chars once collapsed
        let snippet = MimeParser::generate_snippet(&long, "");
        assert_eq!(snippet.chars().count(), 255);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn test_snippet_empty_bodies() {
        assert_eq!(MimeParser::generate_snippet("", ""), "");
        assert_eq!(MimeParser::generate_snippet("   ", "  "), "");
    }

    #[test]
    fn test_parse_simple_text_email() {
        let message =
            b"From: sender@example.com\nTo: recipient@example.com\nSubject: Test\n\nHello World";
        let parsed = MimeParser::parse(message).unwrap();

        assert_eq!(parsed.sender_email, "sender@example.com");
        assert_eq!(parsed.sender_name, "");
        assert_eq!(parsed.subject, "Test");
        assert_eq!(parsed.text_body, Some("Hello World".to_string()));
        assert_eq!(parsed.snippet, "Hello World");
        assert_eq!(parsed.attachment_count(), 0);
    }

    #[test]
    fn test_parse_multipart_email() {
        let message = b"Content-Type: multipart/mixed; boundary=\"boundary123\"\n\n--boundary123\nContent-Type: text/plain\n\nText part\n--boundary123\nContent-Type: text/html\n\n<p>HTML part</p>\n--boundary123--";

        let parsed = MimeParser::parse(message).unwrap();

        assert_eq!(parsed.text_body, Some("Text part".to_string()));
        assert_eq!(parsed.html_body, Some("<p>HTML part</p>".to_string()));
    }

    #[test]
    fn test_parse_email_with_attachment() {
        let message = b"Content-Type: multipart/mixed; boundary=\"bound\"\n\n--bound\nContent-Type: text/plain\n\nBody\n--bound\nContent-Type: application/pdf\nContent-Disposition: attachment; filename=\"file.pdf\"\n\nPDF content\n--bound--";

        let parsed = MimeParser::parse(message).unwrap();

        assert_eq!(parsed.text_body, Some("Body".to_string()));
        assert_eq!(parsed.attachment_count(), 1);
        assert_eq!(parsed.attachments[0].filename, "file.pdf");
        assert_eq!(parsed.attachments[0].content_type, "application/pdf");
    }

    #[test]
    fn test_parse_base64_attachment_is_decoded() {
        let message = b"Content-Type: multipart/mixed; boundary=\"b\"\n\n--b\nContent-Type: text/plain\n\nBody\n--b\nContent-Type: application/octet-stream\nContent-Transfer-Encoding: base64\nContent-Disposition: attachment; filename=\"data.bin\"\n\nSGVsbG8gV29ybGQ=\n--b--";

        let parsed = MimeParser::parse(message).unwrap();

        assert_eq!(parsed.attachment_count(), 1);
        assert_eq!(parsed.attachments[0].data, b"Hello World");
        assert_eq!(parsed.attachments[0].size(), 11);
    }

    #[test]
    fn test_parse_inline_with_filename_is_attachment() {
        let message = b"Content-Type: multipart/mixed; boundary=\"b\"\n\n--b\nContent-Type: text/plain\n\nBody\n--b\nContent-Type: image/png\nContent-Disposition: inline; filename=\"logo.png\"\n\npngdata\n--b--";

        let parsed = MimeParser::parse(message).unwrap();

        assert_eq!(parsed.attachment_count(), 1);
        assert_eq!(parsed.attachments[0].filename, "logo.png");
    }

    #[test]
    fn test_parse_nested_multipart() {
        let message = b"Content-Type: multipart/mixed; boundary=\"outer\"\n\n--outer\nContent-Type: multipart/alternative; boundary=\"inner\"\n\n--inner\nContent-Type: text/plain\n\nplain version\n--inner\nContent-Type: text/html\n\n<b>html version</b>\n--inner--\n--outer\nContent-Type: application/pdf\nContent-Disposition: attachment; filename=\"doc.pdf\"\n\npdfbytes\n--outer--";

        let parsed = MimeParser::parse(message).unwrap();

        assert_eq!(parsed.text_body, Some("plain version".to_string()));
        assert_eq!(parsed.html_body, Some("<b>html version</b>".to_string()));
        assert_eq!(parsed.attachment_count(), 1);
        assert_eq!(parsed.attachments[0].filename, "doc.pdf");
    }

    #[test]
    fn test_parse_single_part_base64_body() {
        let message =
            b"From: a@x.com\nContent-Transfer-Encoding: base64\n\nSGVsbG8gV29ybGQ=";
        let parsed = MimeParser::parse(message).unwrap();

        assert_eq!(parsed.text_body, Some("Hello World".to_string()));
    }

    #[test]
    fn test_encoded_word_subject() {
        let message = b"Subject: =?UTF-8?B?SGVsbG8gV29ybGQ=?=\n\nbody";
        let parsed = MimeParser::parse(message).unwrap();
        assert_eq!(parsed.subject, "Hello World");

        let message = b"Subject: =?utf-8?Q?Hello=20World?=\n\nbody";
        let parsed = MimeParser::parse(message).unwrap();
        assert_eq!(parsed.subject, "Hello World");
    }

    #[test]
    fn test_parse_unnamed_attachment_gets_default_name() {
        let message = b"Content-Type: multipart/mixed; boundary=\"b\"\n\n--b\nContent-Type: application/zip\nContent-Disposition: attachment\n\nzipbytes\n--b--";

        let parsed = MimeParser::parse(message).unwrap();

        assert_eq!(parsed.attachment_count(), 1);
        assert_eq!(parsed.attachments[0].filename, "attachment.bin");
    }
}
