//! Send emails to users for account activation and recovery.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use url::Url;

use crate::config::Mail;
use crate::user::EmailAddress;

const DEFAULT_SMTP_PORT: u16 = 587;
const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while sending an email.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP transport failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Plain-text email ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Letter {
    pub subject: String,
    pub body: String,
}

/// Emails the service knows how to write.
#[derive(Debug)]
pub enum Template<'a> {
    /// Link to choose a first password.
    Activation {
        name: &'a str,
        link: &'a Url,
        minutes: i64,
    },
    /// Link to choose a new password.
    PasswordReset {
        name: &'a str,
        link: &'a Url,
        minutes: i64,
    },
}

impl Template<'_> {
    /// Render subject and body.
    pub fn render(&self) -> Letter {
        match self {
            Template::Activation {
                name,
                link,
                minutes,
            } => Letter {
                subject: "Set Your Password".into(),
                body: format!(
                    "Hello {name},\n\n\
                     Your account has been created. Follow this link to set \
                     your password:\n\n{link}\n\n\
                     The link expires in {minutes} minutes.\n"
                ),
            },
            Template::PasswordReset {
                name,
                link,
                minutes,
            } => Letter {
                subject: "Password Reset Request".into(),
                body: format!(
                    "Hello {name},\n\n\
                     A password reset was requested for your account. Follow \
                     this link to choose a new password:\n\n{link}\n\n\
                     The link expires in {minutes} minutes. If you did not \
                     request it, ignore this email.\n"
                ),
            },
        }
    }
}

/// Port for sending emails.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a letter to a single recipient.
    async fn send(
        &self,
        to: &EmailAddress,
        letter: &Letter,
    ) -> Result<(), NotifyError>;
}

/// SMTP notifier.
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Create a new [`SmtpNotifier`].
    pub fn new(config: &Mail) -> Result<Self, NotifyError> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &config.host,
            )
        };
        let mut builder = builder
            .port(config.port.unwrap_or(DEFAULT_SMTP_PORT))
            .timeout(Some(SMTP_TIMEOUT));

        if let (Some(username), Some(password)) =
            (&config.username, &config.password)
        {
            builder = builder
                .credentials(Credentials::new(username.clone(), password.clone()));
        }

        let from = config.from.parse::<Mailbox>()?;

        tracing::info!(host = %config.host, "smtp transport configured");

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(
        &self,
        to: &EmailAddress,
        letter: &Letter,
    ) -> Result<(), NotifyError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.as_str().parse::<Mailbox>()?)
            .subject(&letter.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(letter.body.clone())?;

        self.transport.send(message).await?;

        tracing::debug!(%to, subject = %letter.subject, "email sent");

        Ok(())
    }
}

/// Fallback used when no `mail` entry is configured: nothing leaves the
/// process, the letter is written to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        to: &EmailAddress,
        letter: &Letter,
    ) -> Result<(), NotifyError> {
        tracing::warn!(%to, subject = %letter.subject, "mail transport disabled, email not sent");
        tracing::debug!(%to, body = %letter.body, "unsent email");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_embed_link() {
        let link = Url::parse("http://localhost:8080/set-password?token=abc")
            .unwrap();

        let letter = Template::Activation {
            name: "Alice",
            link: &link,
            minutes: 30,
        }
        .render();
        assert_eq!(letter.subject, "Set Your Password");
        assert!(letter.body.contains("30 minutes"));
        assert!(letter.body.contains("Alice"));
        assert!(letter.body.contains(link.as_str()));

        let letter = Template::PasswordReset {
            name: "Alice",
            link: &link,
            minutes: 15,
        }
        .render();
        assert_eq!(letter.subject, "Password Reset Request");
        assert!(letter.body.contains("15 minutes"));
        assert!(letter.body.contains(link.as_str()));
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let to = EmailAddress::parse("a@x.com").unwrap();
        let letter = Letter {
            subject: "subject".into(),
            body: "body".into(),
        };

        assert!(LogNotifier.send(&to, &letter).await.is_ok());
    }

    #[test]
    fn test_smtp_rejects_bad_sender() {
        let config = Mail {
            host: "localhost".into(),
            from: "not an address".into(),
            ..Default::default()
        };

        assert!(matches!(
            SmtpNotifier::new(&config),
            Err(NotifyError::Address(_))
        ));
    }
}
