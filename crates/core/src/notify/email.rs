//! SMTP delivery of the HTML results report

use async_trait::async_trait;
use flowcheck_common::{RunStatus, SmtpConfig};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use handlebars::Handlebars;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::{valid_recipients, Delivery, Notifier, RunReport};
use crate::error::{NotifyError, NotifyResult};

/// Sends the report as an HTML mail with every screenshot attached
pub struct EmailNotifier {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Option<String>,
    recipients: Vec<String>,
    timeout: Duration,
}

impl EmailNotifier {
    /// Build a notifier from mail settings.
    ///
    /// Incomplete settings produce a notifier that skips every delivery.
    pub fn from_config(smtp: &SmtpConfig) -> Self {
        let recipients = valid_recipients(&smtp.recipients);
        let timeout = smtp.timeout();

        let transport = match (&smtp.server, &smtp.username, &smtp.password) {
            (Some(server), Some(username), Some(password)) => {
                match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server) {
                    Ok(builder) => Some(
                        builder
                            .port(smtp.port)
                            .credentials(Credentials::new(username.clone(), password.clone()))
                            .timeout(Some(timeout))
                            .build(),
                    ),
                    Err(e) => {
                        warn!("Invalid SMTP relay {}: {}", server, e);
                        None
                    }
                }
            }
            _ => None,
        };

        Self {
            transport,
            from: smtp.username.clone(),
            recipients,
            timeout,
        }
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some() && !self.recipients.is_empty()
    }

    fn build_message(&self, from: &str, report: &RunReport) -> NotifyResult<Message> {
        let from: Mailbox = from.parse().map_err(|e| NotifyError::Address {
            address: from.to_string(),
            reason: format!("{}", e),
        })?;

        let mut builder = Message::builder()
            .from(from)
            .subject(subject(report));
        for recipient in &self.recipients {
            let mailbox: Mailbox = recipient.parse().map_err(|e| NotifyError::Address {
                address: recipient.clone(),
                reason: format!("{}", e),
            })?;
            builder = builder.to(mailbox);
        }

        let png = ContentType::parse("image/png")
            .map_err(|e| NotifyError::Message(format!("content type: {}", e)))?;

        let mut body = MultiPart::mixed().singlepart(SinglePart::html(render_html(report)?));
        for artifact in &report.artifacts {
            body = body.singlepart(
                Attachment::new(artifact.filename.clone()).body(artifact.payload.to_vec(), png.clone()),
            );
        }

        Ok(builder.multipart(body)?)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn deliver(&self, report: &RunReport) -> NotifyResult<Delivery> {
        let (transport, from) = match (&self.transport, &self.from) {
            (Some(transport), Some(from)) => (transport, from),
            _ => {
                return Ok(Delivery::Skipped(
                    "email configuration is incomplete".to_string(),
                ))
            }
        };
        if self.recipients.is_empty() {
            return Ok(Delivery::Skipped("no valid recipients".to_string()));
        }

        let message = self.build_message(from, report)?;

        match tokio::time::timeout(self.timeout, transport.send(message)).await {
            Ok(Ok(_)) => {
                info!(
                    "Report for {} sent to {}",
                    report.run_id,
                    self.recipients.join(", ")
                );
                Ok(Delivery::Sent)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(NotifyError::Timeout(self.timeout.as_secs())),
        }
    }
}

fn subject(report: &RunReport) -> String {
    format!("Automation Test {}: {}", report.status, report.run_id)
}

fn format_duration(seconds: Option<f64>) -> String {
    let total = seconds.unwrap_or(0.0).max(0.0) as u64;
    format!("{}m {}s", total / 60, total % 60)
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn badge(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Passed => "badge-success",
        RunStatus::Failed => "badge-danger",
        RunStatus::Running => "badge-primary",
    }
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static REPORT: Lazy<Handlebars<'static>> = Lazy::new(|| {
    let mut engine = Handlebars::new();
    if let Err(e) = engine.register_template_string("report", include_str!("report.hbs")) {
        error!("Report template does not compile: {}", e);
    }
    engine
});

/// Render the HTML body of the report mail
pub fn render_html(report: &RunReport) -> NotifyResult<String> {
    let snap = &report.snapshot;

    let mut parameters = vec![json!({ "label": "Environment", "value": snap.parameters.env })];
    if let Some(details) = &snap.parameters.case_details {
        for (key, value) in details.fields() {
            parameters.push(json!({
                "label": format!("Case {}", title_case(key)),
                "value": value,
            }));
        }
    }
    if let Some(trigger) = &snap.parameters.trigger {
        parameters.push(json!({
            "label": "Triggered By",
            "value": format!("{} ({}) by {}", trigger.repository, trigger.event_type, trigger.sender),
        }));
    }

    let cases: Vec<Value> = snap
        .cases
        .iter()
        .map(|case| {
            let failed = case.status == RunStatus::Failed;
            json!({
                "name": case.name,
                "class": if case.status == RunStatus::Passed { "case-passed" } else { "case-failed" },
                "badge": badge(case.status),
                "status": case.status,
                "duration": format_duration(case.duration_seconds),
                "artifact_count": case.artifact_count,
                "error_message": if failed { case.error_message.clone() } else { None },
            })
        })
        .collect();

    let error_message = match report.status {
        RunStatus::Failed => snap.error_message.clone(),
        _ => None,
    };

    let data = json!({
        "run_id": snap.run_id,
        "badge": badge(report.status),
        "status": report.status,
        "start_time": snap.start_time.format(TIME_FORMAT).to_string(),
        "end_time": snap
            .end_time
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| "-".to_string()),
        "duration": format_duration(snap.duration_seconds),
        "artifact_count": snap.artifact_count,
        "parameters": parameters,
        "error_message": error_message,
        "cases": cases,
    });

    Ok(REPORT.render("report", &data)?)
}
