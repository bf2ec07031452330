use crate::{
    error::AppError,
    provision::ApplicationCache,
    secrets::{CredentialSource, Credentials, Secrets},
    CONFIG,
};
use axum::{extract::rejection::JsonRejection, Extension, Json};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::form_urlencoded::Serializer;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    identity: Option<String>,
    account_sid: Option<String>,
    auth_token: Option<String>,
    phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    twiml_app_sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<String>,
}

/// A permission granted by a Twilio Client capability token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Place calls through the application. `params` are forwarded by
    /// Twilio to the application's voice url with every call.
    Outgoing {
        application_sid: String,
        params: Vec<(String, String)>,
    },
    /// Receive calls addressed to the client name.
    Incoming { client_name: String },
}

impl Scope {
    fn payload(&self) -> String {
        match self {
            Scope::Outgoing {
                application_sid,
                params,
            } => {
                let mut query = Serializer::new(String::new());
                query.append_pair("appSid", application_sid);
                if !params.is_empty() {
                    let app_params = Serializer::new(String::new())
                        .extend_pairs(params)
                        .finish();
                    query.append_pair("appParams", &app_params);
                }
                format!("scope:client:outgoing?{}", query.finish())
            }
            Scope::Incoming { client_name } => format!(
                "scope:client:incoming?{}",
                Serializer::new(String::new())
                    .append_pair("clientName", client_name)
                    .finish()
            ),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub exp: i64,
    pub scope: String,
}

/// Signs a capability token for the account with its auth token (HS256).
pub fn sign_capability_token(
    credentials: &Credentials,
    scopes: &[Scope],
    ttl_seconds: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        iss: credentials.account_sid.clone(),
        exp: (Utc::now() + Duration::seconds(ttl_seconds)).timestamp(),
        scope: scopes
            .iter()
            .map(Scope::payload)
            .collect::<Vec<_>>()
            .join(" "),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(credentials.auth_token.as_bytes()),
    )
}

fn required(value: Option<String>, message: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(message.to_string()))
}

pub async fn generate_token(
    secrets: Extension<Secrets>,
    applications: Extension<Arc<ApplicationCache>>,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AppError> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;

    // Validate the request before talking to Twilio
    let account_sid = required(request.account_sid, "Account SID is required")?;
    let identity = request
        .identity
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| CONFIG.settings.client_identity.to_string());

    let (credentials, phone_number) = match secrets.credential_source {
        CredentialSource::Environment(ref credentials) => {
            log::debug!("Token requested for account {account_sid}");
            (credentials.clone(), None)
        }
        CredentialSource::Request => {
            let auth_token = required(request.auth_token, "Auth token is required")?;
            let phone_number = required(request.phone_number, "Phone number is required")?;
            let credentials = Credentials {
                account_sid,
                auth_token,
            };
            (credentials, Some(phone_number))
        }
    };

    // Provision the application on first use
    let application_sid = applications.application_sid(&credentials).await?;

    // Allow outgoing calls through the application and incoming calls to the identity
    let scopes = [
        Scope::Outgoing {
            application_sid: application_sid.clone(),
            params: phone_number
                .iter()
                .map(|n| ("phoneNumber".to_string(), n.clone()))
                .collect(),
        },
        Scope::Incoming {
            client_name: identity.clone(),
        },
    ];
    let token = sign_capability_token(&credentials, &scopes, CONFIG.settings.token_ttl)?;

    log::debug!("Issued capability token for {identity} on app {application_sid}");

    // Callers that bring their own account need to know what was provisioned for it
    let echo = phone_number.is_some();
    Ok(Json(TokenResponse {
        token,
        twiml_app_sid: echo.then_some(application_sid),
        identity: echo.then_some(identity),
    }))
}
