use super::{escape_xml, format_xml_string, Action};

/// Speaks `txt` to the caller with Twilio's default voice.
#[derive(Debug, Clone)]
pub struct Say {
    pub txt: String,
}

impl Say {
    pub fn new(txt: &str) -> Say {
        Say {
            txt: txt.to_owned(),
        }
    }
}

impl Action for Say {
    fn as_twiml(&self) -> String {
        format_xml_string("Say", &[], &escape_xml(&self.txt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_spoken_text() {
        assert_eq!(
            Say::new("Tom & Jerry").as_twiml(),
            "<Say>Tom &amp; Jerry</Say>"
        );
    }
}
