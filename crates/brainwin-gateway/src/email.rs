use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl EmailMessage {
    pub fn verification_code(to: &str, code: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "BrainWin - Código de verificação".to_string(),
            html: code_body(
                "Confirme seu e-mail",
                "Use o código abaixo para confirmar seu cadastro no BrainWin.",
                code,
            ),
        }
    }

    pub fn password_reset_code(to: &str, code: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "BrainWin - Recuperação de senha".to_string(),
            html: code_body(
                "Recuperação de senha",
                "Use o código abaixo para redefinir sua senha.",
                code,
            ),
        }
    }
}

fn code_body(title: &str, intro: &str, code: &str) -> String {
    format!(
        "<h2>{title}</h2><p>{intro}</p>\
         <p style=\"font-size:28px;letter-spacing:6px\"><strong>{code}</strong></p>\
         <p>O código expira em 15 minutos.</p>"
    )
}

/// Outbound email delivery.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), GatewayError>;
}

/// Deliver `message` within the request, bounded by `timeout`. Delivery is
/// best-effort: failures are logged, never returned to the caller.
pub async fn deliver(sender: &dyn EmailSender, message: &EmailMessage, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, sender.send(message)).await {
        Ok(Ok(())) => {
            tracing::debug!(to = %message.to, "email delivered");
            true
        }
        Ok(Err(e)) => {
            tracing::warn!(to = %message.to, error = %e, "email delivery failed");
            false
        }
        Err(_) => {
            tracing::warn!(to = %message.to, "email delivery timed out");
            false
        }
    }
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct SendGridMail<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

/// SendGrid v3 mail-send client.
pub struct SendGridSender {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    from_email: String,
    from_name: String,
    timeout: Duration,
}

impl SendGridSender {
    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        api_key: &str,
        from_email: &str,
        from_name: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            from_email: from_email.to_string(),
            from_name: from_name.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl EmailSender for SendGridSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), GatewayError> {
        let body = SendGridMail {
            personalizations: vec![Personalization {
                to: vec![Address {
                    email: &message.to,
                    name: None,
                }],
            }],
            from: Address {
                email: &self.from_email,
                name: Some(&self.from_name),
            },
            subject: &message.subject,
            content: vec![Content {
                kind: "text/html",
                value: &message.html,
            }],
        };

        let resp = self
            .client
            .post(format!("{}/v3/mail/send", self.api_base))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(format!("sendgrid request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(GatewayError::Upstream(format!(
                "sendgrid returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Used when no SendGrid key is configured.
pub struct DisabledSender;

#[async_trait]
impl EmailSender for DisabledSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), GatewayError> {
        tracing::info!(to = %message.to, subject = %message.subject, "email delivery disabled, message dropped");
        Ok(())
    }
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSender {
    pub sent: std::sync::Mutex<Vec<EmailMessage>>,
}

#[cfg(test)]
#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSender;

    #[async_trait]
    impl EmailSender for FailingSender {
        async fn send(&self, _: &EmailMessage) -> Result<(), GatewayError> {
            Err(GatewayError::Upstream("smtp down".into()))
        }
    }

    #[test]
    fn messages_embed_the_code() {
        let m = EmailMessage::verification_code("a@b.co", "482913");
        assert_eq!(m.to, "a@b.co");
        assert!(m.html.contains("482913"));
        assert!(EmailMessage::password_reset_code("a@b.co", "111222")
            .html
            .contains("111222"));
    }

    struct StalledSender;

    #[async_trait]
    impl EmailSender for StalledSender {
        async fn send(&self, _: &EmailMessage) -> Result<(), GatewayError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[actix_rt::test]
    async fn delivery_completes_before_returning() {
        let rec = RecordingSender::default();
        let msg = EmailMessage::verification_code("a@b.co", "1");
        assert!(deliver(&rec, &msg, Duration::from_secs(1)).await);
        assert_eq!(rec.sent.lock().unwrap().as_slice(), &[msg]);
    }

    #[actix_rt::test]
    async fn failed_delivery_is_swallowed() {
        let msg = EmailMessage::verification_code("a@b.co", "1");
        assert!(!deliver(&FailingSender, &msg, Duration::from_secs(1)).await);
    }

    #[actix_rt::test]
    async fn stalled_delivery_is_bounded() {
        let msg = EmailMessage::verification_code("a@b.co", "1");
        let started = std::time::Instant::now();
        assert!(!deliver(&StalledSender, &msg, Duration::from_millis(50)).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn sendgrid_payload_shape() {
        let body = SendGridMail {
            personalizations: vec![Personalization {
                to: vec![Address {
                    email: "to@x.io",
                    name: None,
                }],
            }],
            from: Address {
                email: "from@x.io",
                name: Some("BrainWin"),
            },
            subject: "s",
            content: vec![Content {
                kind: "text/html",
                value: "<p>x</p>",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["personalizations"][0]["to"][0]["email"], "to@x.io");
        assert!(json["personalizations"][0]["to"][0].get("name").is_none());
        assert_eq!(json["from"]["name"], "BrainWin");
        assert_eq!(json["content"][0]["type"], "text/html");
    }
}
