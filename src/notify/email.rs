// src/notify/email.rs
//! SMTP digest emails.

use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{FeedDigestEvent, Notifier};

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailSender {
    /// `None` unless SMTP_HOST/SMTP_USER/SMTP_PASS and both addresses are
    /// set and valid.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;
        let user = std::env::var("SMTP_USER").ok()?;
        let pass = std::env::var("SMTP_PASS").ok()?;
        let from_addr = std::env::var("NOTIFY_EMAIL_FROM").ok()?;
        let to_addr = std::env::var("NOTIFY_EMAIL_TO").ok()?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .ok()?
            .credentials(creds)
            .build();

        let from = from_addr.parse().ok()?;
        let to = to_addr.parse().ok()?;
        Some(Self { mailer, from, to })
    }

    fn render_body(event: &FeedDigestEvent) -> String {
        let mut body = format!(
            "{} new item(s) across your feeds ({}):\n\n",
            event.items.len(),
            event.ts.to_rfc3339()
        );
        for item in &event.items {
            body.push_str(&format!("- {}: {}\n  {}\n", item.feed, item.title, item.url));
        }
        body
    }
}

#[async_trait::async_trait]
impl Notifier for EmailSender {
    async fn notify(&self, event: &FeedDigestEvent) -> Result<()> {
        let subject = format!("{} new feed item(s)", event.items.len());
        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(Self::render_body(event))
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
