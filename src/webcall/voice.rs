use crate::{secrets::Secrets, CONFIG};
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::header,
    response::IntoResponse,
    Extension,
};
use std::{collections::BTreeMap, convert::Infallible};
use twilio::twiml::{Dial, DialTarget, Say, Twiml};

/// Fields of a Twilio voice callback. Twilio posts them form encoded, browser
/// clients may also post JSON. Unparseable bodies yield an empty request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub to: Option<String>,
    pub from: Option<String>,
    /// Caller number forwarded through the capability token's app parameters.
    pub phone_number: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl CallRequest {
    pub fn from_fields(mut fields: BTreeMap<String, String>) -> Self {
        let mut take = |key: &str| fields.remove(key).filter(|v| !v.is_empty());
        let to = take("To");
        let from = take("From");
        let phone_number = take("phoneNumber");

        Self {
            to,
            from,
            phone_number,
            extra: fields,
        }
    }

    fn parse(body: &[u8], is_json: bool) -> Self {
        let fields = if is_json {
            serde_json::from_slice::<BTreeMap<String, serde_json::Value>>(body)
                .map(|map| {
                    map.into_iter()
                        .map(|(k, v)| match v {
                            serde_json::Value::String(s) => (k, s),
                            other => (k, other.to_string()),
                        })
                        .collect()
                })
                .unwrap_or_default()
        } else {
            url::form_urlencoded::parse(body).into_owned().collect()
        };

        Self::from_fields(fields)
    }
}

#[async_trait]
impl<S> FromRequest<S> for CallRequest
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        let body = Bytes::from_request(req, state).await.unwrap_or_default();
        Ok(Self::parse(&body, is_json))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRoute {
    /// The browser dials a number on the phone network.
    Outbound { number: String },
    /// Someone calls in and is connected to the browser client.
    Inbound,
}

impl CallRoute {
    pub fn classify(to: Option<&str>) -> Self {
        match to {
            Some(number) if is_phone_number(number) => CallRoute::Outbound {
                number: number.to_string(),
            },
            _ => CallRoute::Inbound,
        }
    }
}

/// Matches `^\+[0-9]+$`.
pub fn is_phone_number(address: &str) -> bool {
    address
        .strip_prefix('+')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Builds the routing instructions for a call. Pure, so identical requests
/// produce identical documents.
pub fn build_twiml(call: &CallRequest, default_caller_id: Option<&str>) -> Twiml {
    let mut twiml = Twiml::new();

    match CallRoute::classify(call.to.as_deref()) {
        CallRoute::Outbound { number } => {
            let caller_id = call
                .from
                .as_deref()
                .or(call.phone_number.as_deref())
                .or(default_caller_id)
                .map(str::to_owned);

            twiml.add(&Dial {
                target: DialTarget::Number(number),
                caller_id,
                answer_on_bridge: true,
                time_limit: Some(CONFIG.settings.max_call_duration as u32),
            });
        }
        CallRoute::Inbound => {
            let mut dial = Dial::new(DialTarget::Client(
                CONFIG.settings.client_identity.to_owned(),
            ));
            dial.answer_on_bridge = true;

            twiml
                .add(&Say::new(CONFIG.texts.inbound_announcement))
                .add(&dial);
        }
    }

    twiml
}

pub async fn voice_handler(secrets: Extension<Secrets>, call: CallRequest) -> impl IntoResponse {
    log::debug!(
        "Voice callback from {:?} to {:?} with {} extra fields",
        call.from,
        call.to,
        call.extra.len()
    );

    let twiml = build_twiml(&call, secrets.twilio_phone_number.as_deref());

    ([(header::CONTENT_TYPE, "text/xml")], twiml.as_twiml())
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

    fn call(to: Option<&str>, from: Option<&str>) -> CallRequest {
        CallRequest {
            to: to.map(str::to_owned),
            from: from.map(str::to_owned),
            ..Default::default()
        }
    }

    #[test]
    fn plus_followed_by_digits_is_a_phone_number() {
        for number in ["+1", "+15551234567", "+4930123456"] {
            assert!(is_phone_number(number), "{number}");
        }
        for address in [
            "",
            "+",
            "15551234567",
            "+1555-123",
            "+1 555",
            "browser",
            "client:browser",
            "browser-client-1",
            "+١٢٣",
        ] {
            assert!(!is_phone_number(address), "{address}");
        }
    }

    #[test]
    fn missing_destination_is_inbound() {
        assert_eq!(CallRoute::classify(None), CallRoute::Inbound);
        assert_eq!(CallRoute::classify(Some("")), CallRoute::Inbound);
    }

    #[test]
    fn outbound_call_dials_the_number_from_the_caller() {
        let twiml = build_twiml(&call(Some("+15551234567"), Some("+15559876543")), None);

        assert_eq!(
            twiml.as_twiml(),
            format!(
                "{XML_HEADER}<Response><Dial callerId=\"+15559876543\" answerOnBridge=\"true\" \
                 timeLimit=\"14400\"><Number>+15551234567</Number></Dial></Response>"
            )
        );
    }

    #[test]
    fn caller_id_falls_back_to_forwarded_then_configured_number() {
        let mut request = call(Some("+15551234567"), None);
        request.phone_number = Some("+15550000001".to_string());
        let twiml = build_twiml(&request, Some("+15550000002")).as_twiml();
        assert!(twiml.contains("callerId=\"+15550000001\""));

        let twiml = build_twiml(&call(Some("+15551234567"), None), Some("+15550000002")).as_twiml();
        assert!(twiml.contains("callerId=\"+15550000002\""));

        let twiml = build_twiml(&call(Some("+15551234567"), None), None).as_twiml();
        assert!(!twiml.contains("callerId"));
    }

    #[test]
    fn inbound_call_announces_and_dials_the_browser() {
        let twiml = build_twiml(&call(Some("browser-client-1"), Some("+15559876543")), None);

        assert_eq!(
            twiml.as_twiml(),
            format!(
                "{XML_HEADER}<Response><Say>Connecting you to browser client</Say>\
                 <Dial answerOnBridge=\"true\"><Client>browser</Client></Dial></Response>"
            )
        );
    }

    #[test]
    fn parses_form_encoded_callbacks() {
        let request = CallRequest::parse(
            b"To=%2B15551234567&From=client%3Abrowser&CallSid=CA1&phoneNumber=",
            false,
        );

        assert_eq!(request.to.as_deref(), Some("+15551234567"));
        assert_eq!(request.from.as_deref(), Some("client:browser"));
        assert_eq!(request.phone_number, None);
        assert_eq!(request.extra.get("CallSid").map(String::as_str), Some("CA1"));
    }

    #[test]
    fn parses_json_callbacks_and_ignores_garbage() {
        let request = CallRequest::parse(br#"{"To":"+15551234567","Attempt":2}"#, true);
        assert_eq!(request.to.as_deref(), Some("+15551234567"));
        assert_eq!(request.extra.get("Attempt").map(String::as_str), Some("2"));

        assert_eq!(CallRequest::parse(b"{not json", true), CallRequest::default());
    }
}
