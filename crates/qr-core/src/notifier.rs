//! Job outcome reporting.
//!
//! Notification is fire-and-forget: delivery failures are logged by the
//! notifier and never reach the job that produced the outcome.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::http_client::{HttpClient, HttpRequest};

pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    History,
    Daily,
}

impl Display for JobKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::History => f.write_str("history"),
            Self::Daily => f.write_str("daily"),
        }
    }
}

/// Outcome of one job run for one exchange and date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub exchange: String,
    pub date: NaiveDate,
    pub job: JobKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(exchange: impl Into<String>, date: NaiveDate, job: JobKind) -> Self {
        Self {
            exchange: exchange.into(),
            date,
            job,
            success: true,
            message: None,
        }
    }

    pub fn failed(
        exchange: impl Into<String>,
        date: NaiveDate,
        job: JobKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            date,
            job,
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, outcome: &'a JobOutcome) -> NotifyFuture<'a>;

    /// Release transport resources.
    fn close(&self) {}
}

/// Reports outcomes through the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(&'a self, outcome: &'a JobOutcome) -> NotifyFuture<'a> {
        Box::pin(async move {
            if outcome.success {
                info!(
                    exchange = %outcome.exchange,
                    date = %outcome.date,
                    job = %outcome.job,
                    "job succeeded"
                );
            } else {
                error!(
                    exchange = %outcome.exchange,
                    date = %outcome.date,
                    job = %outcome.job,
                    message = outcome.message.as_deref().unwrap_or_default(),
                    "job failed"
                );
            }
        })
    }
}

/// Posts outcomes as JSON to an operator webhook.
pub struct WebhookNotifier {
    http_client: Arc<dyn HttpClient>,
    url: String,
    bearer_token: Option<String>,
    timeout_ms: u64,
}

impl WebhookNotifier {
    pub fn new(http_client: Arc<dyn HttpClient>, url: impl Into<String>) -> Self {
        Self {
            http_client,
            url: url.into(),
            bearer_token: None,
            timeout_ms: 5_000,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn request(&self, outcome: &JobOutcome) -> Result<HttpRequest, serde_json::Error> {
        let body = serde_json::to_string(outcome)?;
        let mut request = HttpRequest::post(&self.url)
            .with_json_body(body)
            .with_timeout_ms(self.timeout_ms);
        if let Some(token) = &self.bearer_token {
            request = request.with_bearer_token(token);
        }
        Ok(request)
    }
}

impl Notifier for WebhookNotifier {
    fn notify<'a>(&'a self, outcome: &'a JobOutcome) -> NotifyFuture<'a> {
        Box::pin(async move {
            let request = match self.request(outcome) {
                Ok(request) => request,
                Err(error) => {
                    warn!(%error, "failed to serialize job outcome");
                    return;
                }
            };

            match self.http_client.execute(request).await {
                Ok(response) if response.is_success() => {}
                Ok(response) => warn!(
                    status = response.status,
                    exchange = %outcome.exchange,
                    "webhook rejected job outcome"
                ),
                Err(error) => warn!(%error, exchange = %outcome.exchange, "webhook delivery failed"),
            }
        })
    }
}

/// Delivers every outcome to each inner notifier in order.
#[derive(Default)]
pub struct MultiNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn push(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.push(notifier);
    }
}

impl Notifier for MultiNotifier {
    fn notify<'a>(&'a self, outcome: &'a JobOutcome) -> NotifyFuture<'a> {
        Box::pin(async move {
            for notifier in &self.notifiers {
                notifier.notify(outcome).await;
            }
        })
    }

    fn close(&self) {
        for notifier in &self.notifiers {
            notifier.close();
        }
    }
}
