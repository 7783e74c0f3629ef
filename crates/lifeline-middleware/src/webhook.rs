//! [`WebhookChannel`] – messaging over an HTTP SMS gateway.
//!
//! Each message is one `POST` with a JSON body:
//!
//! ```json
//! { "to": "+15550100", "body": "⚠️ User missed safety checks. …" }
//! ```
//!
//! Delivery is best effort.  Any transport error or non-2xx status is
//! returned as [`LifelineError::Delivery`]; the caller logs it and moves on.

use std::sync::OnceLock;
use std::time::Duration;

use lifeline_types::LifelineError;
use reqwest::blocking::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::ports::MessagingChannel;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    to: &'a str,
    body: &'a str,
}

pub struct WebhookChannel {
    url: String,
    // Built on first send: the blocking client must not be created inside an
    // async context.
    client: OnceLock<Client>,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: OnceLock::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn client(&self, destination: &str) -> Result<&Client, LifelineError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| delivery_error(destination, e))?;
        Ok(self.client.get_or_init(|| client))
    }
}

fn delivery_error(destination: &str, details: impl ToString) -> LifelineError {
    LifelineError::Delivery {
        destination: destination.to_string(),
        details: details.to_string(),
    }
}

impl MessagingChannel for WebhookChannel {
    fn send(&self, destination: &str, body: &str) -> Result<(), LifelineError> {
        let payload = OutboundMessage { to: destination, body };
        debug!(url = %self.url, to = destination, "posting message to gateway");

        let response = self
            .client(destination)?
            .post(&self.url)
            .json(&payload)
            .send()
            .map_err(|e| delivery_error(destination, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(delivery_error(destination, format!("gateway returned {status}")));
        }
        info!(to = destination, "message delivered to gateway");
        Ok(())
    }
}
