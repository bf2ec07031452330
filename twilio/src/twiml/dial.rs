use super::{escape_xml, format_xml_string, Action};

/// The noun nested in a `<Dial>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    /// A phone number on the public telephone network.
    Number(String),
    /// A Twilio Client identity, e.g. a browser softphone.
    Client(String),
}

#[derive(Debug, Clone)]
pub struct Dial {
    pub target: DialTarget,
    pub caller_id: Option<String>,
    /// Hold the caller's audio until the dialed party answers.
    pub answer_on_bridge: bool,
    /// Hang up after this many seconds.
    pub time_limit: Option<u32>,
}

impl Dial {
    pub fn new(target: DialTarget) -> Dial {
        Dial {
            target,
            caller_id: None,
            answer_on_bridge: false,
            time_limit: None,
        }
    }
}

impl Action for Dial {
    fn as_twiml(&self) -> String {
        let time_limit_string = self.time_limit.map(|t| t.to_string());
        let mut attrs = Vec::new();
        if let Some(ref caller_id) = self.caller_id {
            attrs.push(("callerId", caller_id.as_str()));
        }
        if self.answer_on_bridge {
            attrs.push(("answerOnBridge", "true"));
        }
        if let Some(ref t) = time_limit_string {
            attrs.push(("timeLimit", t.as_str()));
        }

        let inner = match self.target {
            DialTarget::Number(ref n) => format_xml_string("Number", &[], &escape_xml(n)),
            DialTarget::Client(ref c) => format_xml_string("Client", &[], &escape_xml(c)),
        };

        format_xml_string("Dial", &attrs, &inner)
    }
}
