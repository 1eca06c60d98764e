//! TwiML replies — the provider's XML response dialect.

/// Content type the provider expects on webhook replies.
pub const CONTENT_TYPE: &str = "text/xml";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// A webhook reply: zero or one message sent back to the sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TwimlReply {
    message: Option<String>,
}

impl TwimlReply {
    /// Acknowledge without replying.
    pub fn empty() -> Self {
        Self { message: None }
    }

    /// Reply with a single message.
    pub fn message(body: impl Into<String>) -> Self {
        Self {
            message: Some(body.into()),
        }
    }

    /// The message text, if this reply carries one.
    pub fn text(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Render the reply as a complete XML document.
    pub fn render(&self) -> String {
        match &self.message {
            Some(body) => format!(
                "{XML_DECLARATION}<Response><Message>{}</Message></Response>",
                escape_xml(body)
            ),
            None => format!("{XML_DECLARATION}<Response></Response>"),
        }
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response() {
        assert_eq!(
            TwimlReply::empty().render(),
            r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#
        );
    }

    #[test]
    fn single_message() {
        let xml = TwimlReply::message("Thanks!").render();
        assert_eq!(
            xml,
            r#"<?xml version="1.0" encoding="UTF-8"?><Response><Message>Thanks!</Message></Response>"#
        );
    }

    #[test]
    fn escapes_markup() {
        let xml = TwimlReply::message("Tom & Jerry's <shop>").render();
        assert!(xml.contains("Tom &amp; Jerry&apos;s &lt;shop&gt;"));
        assert_eq!(xml.matches("<Message>").count(), 1);
    }

    #[test]
    fn default_is_empty() {
        assert_eq!(TwimlReply::default(), TwimlReply::empty());
        assert!(TwimlReply::default().text().is_none());
    }
}
