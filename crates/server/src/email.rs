//! Outgoing email.

use crate::config::SmtpConfig;
use futures::future::BoxFuture;
use lettre::message::{Mailbox, MultiPart, SinglePart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid address {address}: {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// A rendered message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

/// Capability to deliver email.
pub trait EmailSender: Send + Sync {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), EmailError>>;
}

fn mailbox(address: &str) -> Result<Mailbox, EmailError> {
    address.parse().map_err(|source| EmailError::Address {
        address: address.to_string(),
        source,
    })
}

/// SMTP delivery through lettre.
#[derive(Clone)]
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(config: &SmtpConfig) -> Result<Self, EmailError> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server)?
            .port(config.port)
            .credentials(creds)
            .build();
        Ok(Self {
            transport,
            from: mailbox(&config.from)?,
        })
    }

    fn build(&self, message: &EmailMessage) -> Result<Message, EmailError> {
        let builder = Message::builder()
            .from(self.from.clone())
            .to(mailbox(&message.to)?)
            .subject(message.subject.clone())
            .header(lettre::message::header::MIME_VERSION_1_0);
        let email = match &message.html_body {
            Some(html) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(message.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.clone()),
                    ),
            )?,
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(message.text_body.clone())?,
        };
        Ok(email)
    }
}

impl EmailSender for SmtpEmailSender {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), EmailError>> {
        Box::pin(async move {
            let email = self.build(message)?;
            self.transport.send(email).await?;
            tracing::debug!(subject = %message.subject, "sent email");
            Ok(())
        })
    }
}

/// Writes messages to the log instead of delivering them. Used when no SMTP relay
/// is configured.
#[derive(Clone, Debug, Default)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), EmailError>> {
        Box::pin(async move {
            tracing::info!(
                name = "email.log_sender",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                to = %message.to,
                subject = %message.subject,
                body = %message.text_body,
                message = "email not delivered: no SMTP relay configured"
            );
            Ok(())
        })
    }
}

/// Email asking a new user to confirm their address.
#[derive(Debug, Clone)]
pub struct VerificationEmail {
    pub issuer: String,
    pub verify_url: String,
}

impl VerificationEmail {
    pub fn render_text(&self) -> String {
        format!(
            r#"Hello,

Please confirm your email address for {} by opening the link below:

{}

If you did not create an account, you can ignore this email.
"#,
            self.issuer, self.verify_url
        )
    }

    pub fn render_html(&self) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<body>
<p>Hello,</p>
<p>Please confirm your email address for {} by opening the link below:</p>
<p><a href="{}">Confirm email address</a></p>
<p>If you did not create an account, you can ignore this email.</p>
</body>
</html>"#,
            self.issuer, self.verify_url
        )
    }

    pub fn into_message(self, to: &str) -> EmailMessage {
        EmailMessage {
            to: to.to_string(),
            subject: "Confirm your email address".to_string(),
            text_body: self.render_text(),
            html_body: Some(self.render_html()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp() -> SmtpConfig {
        SmtpConfig {
            server: "localhost".into(),
            port: 2525,
            username: "user".into(),
            password: "pass".into(),
            from: "Identity <id@example.org>".into(),
        }
    }

    #[test]
    fn verification_email_links_the_token() {
        let message = VerificationEmail {
            issuer: "https://id.example.org".into(),
            verify_url: "https://id.example.org/account/verify?token=abc".into(),
        }
        .into_message("alice@example.org");
        assert_eq!(message.to, "alice@example.org");
        assert!(message.text_body.contains("token=abc"));
        assert!(
            message
                .html_body
                .unwrap()
                .contains(r#"href="https://id.example.org/account/verify?token=abc""#)
        );
    }

    #[tokio::test]
    async fn smtp_sender_builds_multipart_messages() {
        let sender = SmtpEmailSender::new(&smtp()).unwrap();
        let message = EmailMessage {
            to: "alice@example.org".into(),
            subject: "Hi".into(),
            text_body: "plain".into(),
            html_body: Some("<p>html</p>".into()),
        };
        let built = sender.build(&message).unwrap();
        let raw = String::from_utf8(built.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("To: alice@example.org"));
    }

    #[tokio::test]
    async fn smtp_sender_rejects_bad_recipients() {
        let sender = SmtpEmailSender::new(&smtp()).unwrap();
        let message = EmailMessage {
            to: "not an address".into(),
            subject: "Hi".into(),
            text_body: "plain".into(),
            html_body: None,
        };
        assert!(matches!(sender.build(&message), Err(EmailError::Address { .. })));
    }

    #[tokio::test]
    async fn invalid_from_address_fails_construction() {
        let mut config = smtp();
        config.from = "nope".into();
        assert!(matches!(
            SmtpEmailSender::new(&config),
            Err(EmailError::Address { .. })
        ));
    }
}
