//! Cloud189 login handshake
//!
//! The web login is a six step exchange; each step needs values produced by
//! the ones before it:
//!
//! 1. `loginUrl.action` redirects to the login page; the redirect query
//!    carries the transaction token `lt` and the request id `reqId`.
//! 2. `encryptConf.do` returns an RSA public key and a prefix (`pre`).
//! 3. `appConf.do`, scoped by `lt`/`reqId`, returns `paramId`.
//! 4. Username and password are encrypted with PKCS#1 v1.5, hex-encoded and
//!    prefixed with `pre`.
//! 5. `loginSubmit.do` takes the encrypted credentials and returns `toUrl`.
//! 6. Following `toUrl` with HTTP 200 means the cookie jar now holds a session.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::http_retry::{send_with_retry, HttpRetryConfig};
use super::{AuthError, Credentials};

/// Login host
pub(crate) const AUTH_BASE: &str = "https://open.e.189.cn";

const APP_ID: &str = "cloud";
const ACCOUNT_TYPE: &str = "01";

/// Correlation values captured from the login redirect (step 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoginContext {
    /// Final URL of the redirect chain, sent back as Referer
    pub referer: String,
    pub lt: String,
    pub req_id: String,
}

impl LoginContext {
    /// Pull `lt` and `reqId` out of the redirect target.
    pub(crate) fn from_redirect(url: &Url) -> Result<Self, AuthError> {
        let mut lt = None;
        let mut req_id = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "lt" => lt = Some(value.into_owned()),
                "reqId" => req_id = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(Self {
            referer: url.to_string(),
            lt: lt.ok_or(AuthError::MissingField { step: "login-url", field: "lt" })?,
            req_id: req_id.ok_or(AuthError::MissingField { step: "login-url", field: "reqId" })?,
        })
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("lt", &self.lt)
            .header("reqid", &self.req_id)
            .header("Referer", &self.referer)
            .header("Origin", AUTH_BASE)
    }
}

#[derive(Debug, Deserialize)]
struct EncryptConfResponse {
    data: Option<EncryptConf>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EncryptConf {
    #[serde(rename = "pubKey")]
    pub_key: Option<String>,
    pre: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AppConfResponse {
    data: Option<AppConf>,
}

#[derive(Debug, Deserialize)]
struct AppConf {
    #[serde(rename = "paramId")]
    param_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginSubmitResponse {
    #[serde(rename = "toUrl")]
    to_url: Option<String>,
    msg: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginSubmitForm<'a> {
    version: &'a str,
    #[serde(rename = "apToken")]
    ap_token: &'a str,
    #[serde(rename = "appKey")]
    app_key: &'a str,
    #[serde(rename = "accountType")]
    account_type: &'a str,
    #[serde(rename = "userName")]
    user_name: &'a str,
    epd: &'a str,
    #[serde(rename = "captchaType")]
    captcha_type: &'a str,
    #[serde(rename = "validateCode")]
    validate_code: &'a str,
    #[serde(rename = "smsValidateCode")]
    sms_validate_code: &'a str,
    #[serde(rename = "captchaToken")]
    captcha_token: &'a str,
    #[serde(rename = "mailSuffix")]
    mail_suffix: &'a str,
    #[serde(rename = "dynamicCheck")]
    dynamic_check: bool,
    #[serde(rename = "clientType")]
    client_type: u8,
    #[serde(rename = "cb_SaveName")]
    cb_save_name: u8,
    #[serde(rename = "isOauth2")]
    is_oauth2: bool,
    state: &'a str,
    #[serde(rename = "paramId")]
    param_id: &'a str,
}

/// RSA public key plus the prefix every encrypted field must carry.
pub(crate) struct CredentialCipher {
    key: RsaPublicKey,
    prefix: String,
}

impl CredentialCipher {
    /// Build from the base64 DER body the provider sends (no PEM armor).
    pub(crate) fn from_base64_key(pub_key: &str, prefix: &str) -> Result<Self, AuthError> {
        let compact: String = pub_key.chars().filter(|c| !c.is_whitespace()).collect();
        let der = BASE64
            .decode(compact.as_bytes())
            .map_err(|e| AuthError::Crypto(format!("public key is not base64: {}", e)))?;
        let key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| AuthError::Crypto(format!("invalid public key: {}", e)))?;
        Ok(Self { key, prefix: prefix.to_string() })
    }

    /// `prefix + hex(PKCS#1 v1.5 ciphertext)`
    pub(crate) fn encrypt(&self, plain: &str) -> Result<String, AuthError> {
        let mut rng = rand::thread_rng();
        let cipher = self
            .key
            .encrypt(&mut rng, Pkcs1v15Encrypt, plain.as_bytes())
            .map_err(|e| AuthError::Crypto(e.to_string()))?;
        Ok(format!("{}{}", self.prefix, hex::encode(cipher)))
    }
}

/// Send one handshake request; anything but HTTP 200 fails the step.
async fn send_step(
    client: &Client,
    retry: &HttpRetryConfig,
    request: RequestBuilder,
    step: &'static str,
) -> Result<Response, AuthError> {
    let request = request
        .build()
        .map_err(|e| AuthError::Network { step, message: e.to_string() })?;
    let response = send_with_retry(client, request, retry)
        .await
        .map_err(|e| AuthError::Network { step, message: e.to_string() })?;
    if response.status() != StatusCode::OK {
        return Err(AuthError::Http { step, status: response.status().as_u16() });
    }
    Ok(response)
}

async fn json_step<T: DeserializeOwned>(
    response: Response,
    step: &'static str,
) -> Result<T, AuthError> {
    response
        .json::<T>()
        .await
        .map_err(|e| AuthError::Network { step, message: format!("invalid JSON: {}", e) })
}

/// Run the complete handshake. On success the client's cookie store holds
/// the authenticated session.
pub(crate) async fn login(
    client: &Client,
    retry: &HttpRetryConfig,
    api_base: &str,
    credentials: &Credentials,
) -> Result<(), AuthError> {
    // Step 1: login URL redirect
    let login_url = format!(
        "{}/portal/loginUrl.action?redirectURL={}",
        api_base,
        urlencoding::encode("https://cloud.189.cn/main.action")
    );
    let response = send_step(client, retry, client.get(&login_url), "login-url").await?;
    let context = LoginContext::from_redirect(response.url())?;
    debug!(target: "cloud189", "login redirect captured, reqId={}", context.req_id);

    // Step 2: encryption config
    let request = client
        .post(format!("{}/api/logbox/config/encryptConf.do", AUTH_BASE))
        .form(&[("appId", APP_ID)]);
    let conf: EncryptConfResponse =
        json_step(send_step(client, retry, request, "encrypt-conf").await?, "encrypt-conf").await?;
    let conf = conf
        .data
        .ok_or(AuthError::MissingField { step: "encrypt-conf", field: "data" })?;
    let pub_key = conf
        .pub_key
        .ok_or(AuthError::MissingField { step: "encrypt-conf", field: "pubKey" })?;
    let prefix = conf
        .pre
        .ok_or(AuthError::MissingField { step: "encrypt-conf", field: "pre" })?;

    // Step 3: application config, scoped by the step 1 correlation values
    let request = context.apply(
        client
            .post(format!("{}/api/logbox/oauth2/appConf.do", AUTH_BASE))
            .form(&[("appKey", APP_ID), ("version", "2.0")]),
    );
    let app: AppConfResponse =
        json_step(send_step(client, retry, request, "app-conf").await?, "app-conf").await?;
    let param_id = app
        .data
        .and_then(|d| d.param_id)
        .ok_or(AuthError::MissingField { step: "app-conf", field: "paramId" })?;

    // Step 4: encrypt credentials
    let cipher = CredentialCipher::from_base64_key(&pub_key, &prefix)?;
    let user_name = cipher.encrypt(&credentials.username)?;
    let epd = cipher.encrypt(credentials.password.expose_secret())?;

    // Step 5: submit
    let form = LoginSubmitForm {
        version: "v2.0",
        ap_token: "",
        app_key: APP_ID,
        account_type: ACCOUNT_TYPE,
        user_name: &user_name,
        epd: &epd,
        captcha_type: "",
        validate_code: "",
        sms_validate_code: "",
        captcha_token: "",
        mail_suffix: "",
        dynamic_check: false,
        client_type: 1,
        cb_save_name: 0,
        is_oauth2: false,
        state: "",
        param_id: &param_id,
    };
    let request = context.apply(
        client
            .post(format!("{}/api/logbox/oauth2/loginSubmit.do", AUTH_BASE))
            .form(&form),
    );
    let submit: LoginSubmitResponse =
        json_step(send_step(client, retry, request, "login-submit").await?, "login-submit").await?;
    let to_url = match submit.to_url {
        Some(url) if !url.is_empty() => url,
        _ => {
            debug!(target: "cloud189", "login rejected: {}", submit.msg.unwrap_or_default());
            return Err(AuthError::MissingField { step: "login-submit", field: "toUrl" });
        }
    };

    // Step 6: follow the redirect; 200 here is the success criterion
    let request = client
        .post(&to_url)
        .header("Referer", format!("{}/", AUTH_BASE));
    send_step(client, retry, request, "login-redirect").await?;
    Ok(())
}
