use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use report_core::{Analyst, Mailer, PipelineError, User};

use crate::templates::DigestTemplate;

#[derive(Debug, Clone, Default)]
pub enum SmtpTls {
    #[default]
    StartTls,
    Tls,
    None,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub tls: SmtpTls,
}

impl SmtpConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let tls = match std::env::var("SMTP_TLS").unwrap_or_default().as_str() {
            "tls" => SmtpTls::Tls,
            "none" => SmtpTls::None,
            _ => SmtpTls::StartTls,
        };
        Self {
            host: std::env::var("SMTP_HOST").ok().filter(|s| !s.is_empty()),
            port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(587),
            username: std::env::var("SMTP_USERNAME").ok().filter(|s| !s.is_empty()),
            password: std::env::var("SMTP_PASSWORD").ok().filter(|s| !s.is_empty()),
            from: std::env::var("SMTP_FROM_ADDRESS")
                .ok()
                .filter(|s| !s.is_empty()),
            tls,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.host.is_some() && self.from.is_some()
    }
}

/// Sends follower digests over SMTP.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, PipelineError> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| PipelineError::Config("SMTP_HOST not set".into()))?;
        let from_addr = config
            .from
            .as_deref()
            .ok_or_else(|| PipelineError::Config("SMTP_FROM_ADDRESS not set".into()))?;

        let from: Mailbox = from_addr
            .parse()
            .map_err(|e| PipelineError::Config(format!("Invalid from address: {e}")))?;

        let mut builder = match config.tls {
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host),
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host),
            SmtpTls::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                host,
            )),
        }
        .map_err(|e| PipelineError::Notification(format!("SMTP transport error: {e}")))?;

        builder = builder.port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_new_report_digest(
        &self,
        user: &User,
        analysts: &[Analyst],
    ) -> Result<(), PipelineError> {
        let to: Mailbox = user
            .email
            .parse()
            .map_err(|e| PipelineError::Notification(format!("Invalid recipient: {e}")))?;

        let subject = if analysts.len() == 1 {
            format!("New research from {}", analysts[0].name)
        } else {
            format!("New research from {} analysts you follow", analysts.len())
        };

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(DigestTemplate::render(user, analysts))
            .map_err(|e| PipelineError::Notification(format!("Failed to build email: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| PipelineError::Notification(format!("Failed to send email: {e}")))?;

        Ok(())
    }
}
