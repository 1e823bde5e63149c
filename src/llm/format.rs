//! Requested shape of the assistant reply.

use serde::{Deserialize, Serialize};

const JSON_INSTRUCTION: &str =
    "Please format your response as valid JSON. Structure the response appropriately based on the content.";
const XML_INSTRUCTION: &str =
    "Please format your response as valid XML. Use appropriate tags and structure based on the content.";

/// Output format a client may ask for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseFormat {
    /// No extra instruction.
    #[default]
    PlainText,
    Json,
    Xml,
}

impl ResponseFormat {
    /// Text to send upstream for `message` under this format.
    ///
    /// Only the upstream copy is decorated; session history keeps the raw
    /// message.
    #[must_use]
    pub fn decorate(self, message: &str) -> String {
        match self {
            Self::PlainText => message.to_string(),
            Self::Json => format!("{message}\n\n{JSON_INSTRUCTION}"),
            Self::Xml => format!("{message}\n\n{XML_INSTRUCTION}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(ResponseFormat::PlainText.decorate("hi"), "hi");
    }

    #[test]
    fn structured_formats_append_an_instruction() {
        let json = ResponseFormat::Json.decorate("list three colors");
        assert!(json.starts_with("list three colors\n\n"));
        assert!(json.ends_with(JSON_INSTRUCTION));

        let xml = ResponseFormat::Xml.decorate("list three colors");
        assert!(xml.ends_with(XML_INSTRUCTION));
    }

    #[test]
    fn wire_names_match_the_api() {
        let parsed: ResponseFormat = serde_json::from_str("\"PLAIN_TEXT\"").unwrap();
        assert_eq!(parsed, ResponseFormat::PlainText);
        let parsed: ResponseFormat = serde_json::from_str("\"XML\"").unwrap();
        assert_eq!(parsed, ResponseFormat::Xml);
        assert!(serde_json::from_str::<ResponseFormat>("\"yaml\"").is_err());
    }
}
