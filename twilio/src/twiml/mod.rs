mod dial;
mod say;

pub use dial::{Dial, DialTarget};
pub use say::Say;

/// A single TwiML verb that can be nested inside a `<Response>`.
pub trait Action {
    fn as_twiml(&self) -> String;
}

/// An ordered list of verbs, rendered as a complete TwiML document.
#[derive(Debug, Default, Clone)]
pub struct Twiml {
    body: String,
}

impl Twiml {
    pub fn new() -> Twiml {
        Twiml::default()
    }

    pub fn add(&mut self, action: &dyn Action) -> &mut Twiml {
        self.body.push_str(&action.as_twiml());
        self
    }

    pub fn as_twiml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>{}",
            format_xml_string("Response", &[], &self.body)
        )
    }
}

/// Formats an element. `inner` is inserted verbatim, attribute values are escaped.
fn format_xml_string(tag: &str, attributes: &[(&str, &str)], inner: &str) -> String {
    let attrs: String = attributes
        .iter()
        .map(|(name, value)| format!(" {}=\"{}\"", name, escape_xml(value)))
        .collect();

    if inner.is_empty() {
        format!("<{}{}/>", tag, attrs)
    } else {
        format!("<{}{}>{}</{}>", tag, attrs, inner, tag)
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
