use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
}

fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}

impl Email {
    pub fn welcome(name: &str, to: &str, url: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Welcome to the Tourbook family!".into(),
            text: format!(
                "Hi {},\n\nWelcome aboard! Complete your profile here: {url}\n",
                first_name(name)
            ),
        }
    }

    pub fn password_reset(name: &str, to: &str, url: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Your password reset token (valid for only 10 minutes)".into(),
            text: format!(
                "Hi {},\n\nForgot your password? Submit a PATCH request with your new password \
                 and passwordConfirm to: {url}\nIf you didn't forget your password, please \
                 ignore this email.\n",
                first_name(name)
            ),
        }
    }
}

/// Transactional email provider.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &MailConfig, host: &str) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .context("smtp relay")?
            .port(cfg.smtp_port)
            .credentials(Credentials::new(
                cfg.smtp_username.clone(),
                cfg.smtp_password.clone(),
            ))
            .build();
        let from = cfg.from.parse::<Mailbox>().context("parse EMAIL_FROM")?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        let to = email.to.parse::<Mailbox>().context("parse recipient")?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.text)
            .context("build email")?;
        self.transport.send(message).await.context("smtp send")?;
        info!(to = %email.to, "email sent");
        Ok(())
    }
}

/// Writes mails to the log; used when no SMTP host is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, body = %email.text, "email (not sent)");
        Ok(())
    }
}
