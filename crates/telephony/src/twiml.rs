//! TwiML answer rendering
//!
//! When the provider fetches the answer URL for a connected call, the
//! response tells it to open a bidirectional media stream to the bridge.
//! The document is deterministic given its inputs.

use url::Url;

use crate::TelephonyError;

/// Inputs to the answer document
#[derive(Debug, Clone)]
pub struct AnswerParams {
    /// Externally reachable base URL of this system
    /// (e.g. "https://dial.example.com")
    pub public_base_url: String,
    /// Speak before the caller does
    pub speak_first: bool,
    /// Opening line for the assistant when speaking first
    pub initial_message: Option<String>,
}

/// Render the answer document:
/// `<Response><Connect><Stream url="wss://…/media-stream?…"/></Connect></Response>`
pub fn render_answer(params: &AnswerParams) -> Result<String, TelephonyError> {
    let stream_url = build_stream_url(params)?;

    Ok(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Connect><Stream url=\"{}\"/></Connect></Response>",
        escape_xml_attr(stream_url.as_str())
    ))
}

fn build_stream_url(params: &AnswerParams) -> Result<Url, TelephonyError> {
    let base = params.public_base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(TelephonyError::InvalidResponse(format!(
            "public base URL must be http(s): {base}"
        )));
    };

    let mut url = Url::parse(&format!("{ws_base}/media-stream"))
        .map_err(|e| TelephonyError::InvalidResponse(e.to_string()))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("speakFirst", if params.speak_first { "true" } else { "false" });
        if let Some(message) = &params.initial_message {
            query.append_pair("initialMessage", message);
        }
    }

    Ok(url)
}

/// Minimal XML attribute escaping
fn escape_xml_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(speak_first: bool, initial_message: Option<&str>) -> AnswerParams {
        AnswerParams {
            public_base_url: "https://dial.example.com".to_string(),
            speak_first,
            initial_message: initial_message.map(String::from),
        }
    }

    #[test]
    fn test_render_answer_shape() {
        let xml = render_answer(&params(true, Some("Hello there"))).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<Response><Connect><Stream url=\""));
        assert!(xml.contains("wss://dial.example.com/media-stream?speakFirst=true"));
        assert!(xml.contains("initialMessage=Hello"));
        assert!(xml.ends_with("/></Connect></Response>"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render_answer(&params(false, Some("Hi"))).unwrap();
        let b = render_answer(&params(false, Some("Hi"))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_query_parameters_are_encoded() {
        let xml = render_answer(&params(true, Some("Hi & welcome, \"friend\""))).unwrap();

        // The ampersand is percent-encoded in the URL, then the URL itself
        // is XML-escaped, so no raw '&' or '"' can leak into the attribute.
        assert!(!xml.contains("Hi & welcome"));
        assert!(xml.contains("initialMessage=Hi+%26+welcome"));
    }

    #[test]
    fn test_omits_initial_message_when_absent() {
        let xml = render_answer(&params(false, None)).unwrap();
        assert!(xml.contains("speakFirst=false"));
        assert!(!xml.contains("initialMessage"));
    }

    #[test]
    fn test_http_base_downgrades_to_ws() {
        let mut p = params(false, None);
        p.public_base_url = "http://localhost:8080".to_string();
        let xml = render_answer(&p).unwrap();
        assert!(xml.contains("ws://localhost:8080/media-stream"));
    }

    #[test]
    fn test_rejects_non_http_base() {
        let mut p = params(false, None);
        p.public_base_url = "ftp://example.com".to_string();
        assert!(render_answer(&p).is_err());
    }
}
