//! Twilio SMS transport.
//!
//! One authenticated `POST <base>/2010-04-01/Accounts/<sid>/Messages.json`
//! per recipient number, form-encoded `From`/`To`/`Body`. Credentials travel
//! as HTTP basic auth (account SID / auth token).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{describe_http_error, http_agent, Alert, Notifier};

pub const TWILIO_API_BASE: &str = "https://api.twilio.com";

#[derive(Clone, Debug)]
pub struct SmsConfig {
    pub api_base: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_numbers: Vec<String>,
    pub timeout: Duration,
}

pub struct SmsNotifier {
    agent: ureq::Agent,
    messages_url: String,
    from_number: String,
    to_numbers: Vec<String>,
}

impl SmsNotifier {
    pub fn new(config: SmsConfig) -> Result<Self> {
        if config.account_sid.trim().is_empty() || config.auth_token.trim().is_empty() {
            return Err(anyhow!("sms account sid and auth token must be set"));
        }
        if config.from_number.trim().is_empty() {
            return Err(anyhow!("sms from number must be set"));
        }
        let mut url = Url::parse(&format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            config.api_base.trim_end_matches('/'),
            config.account_sid
        ))
        .context("parse sms api url")?;
        // ureq turns URL user-info into an Authorization: Basic header.
        url.set_username(&config.account_sid)
            .map_err(|_| anyhow!("sms api url cannot carry credentials"))?;
        url.set_password(Some(&config.auth_token))
            .map_err(|_| anyhow!("sms api url cannot carry credentials"))?;

        Ok(Self {
            agent: http_agent(config.timeout),
            messages_url: url.to_string(),
            from_number: config.from_number,
            to_numbers: config.to_numbers,
        })
    }
}

impl Notifier for SmsNotifier {
    fn name(&self) -> &'static str {
        "sms"
    }

    fn recipients(&self) -> &[String] {
        &self.to_numbers
    }

    fn compose(&self, alert: &Alert) -> String {
        alert.sms_message()
    }

    fn deliver(&self, recipient: &str, message: &str) -> Result<()> {
        self.agent
            .post(&self.messages_url)
            .send_form(&[
                ("From", self.from_number.as_str()),
                ("To", recipient),
                ("Body", message),
            ])
            .map_err(|err| describe_http_error("sms", err))?;
        Ok(())
    }
}
