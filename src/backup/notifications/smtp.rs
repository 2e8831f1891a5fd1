use crate::backup::archive::ArchiveArtifact;
use crate::backup::function_path;
use crate::backup::notifications::{DeliveryOutcome, Notifier};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::validate::validate_not_blank;
use bon::Builder;
use function_name::named;
use getset::Getters;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

static ZIP_CONTENT_TYPE: &str = "application/zip";

/// Configuration for SMTP email delivery
///
/// Supports various SMTP modes including SSL, StartTLS, and unsecured connections.
/// Credentials are stored using `RedactedString` to prevent exposure
/// in logs and debug output.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SmtpNotificationConfig {
    #[validate(custom(function = validate_not_blank))]
    #[builder(into)]
    host: String,
    port: Option<u16>,
    #[builder(into)]
    smtp_mode: SmtpMode,
    #[builder(into)]
    from: Mailbox,
    #[builder(into)]
    username: String,
    #[builder(into)]
    password: RedactedString,
}

/// SMTP connection security modes
///
/// - `Unsecured`: Plain text connection (not recommended for production)
/// - `Ssl`: SSL/TLS encrypted connection from start
/// - `StartTls`: Start with plain text, then upgrade to TLS
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    Unsecured,
    Ssl,
    StartTls,
}

impl SmtpNotificationConfig {
    #[named]
    pub fn build_transport(&self) -> Result<SmtpTransport> {
        let creds = Credentials::new(self.username.clone(), self.password.inner().to_string());

        let builder = match self.smtp_mode {
            SmtpMode::Unsecured => Ok(SmtpTransport::builder_dangerous(self.host.as_str())),
            SmtpMode::Ssl => SmtpTransport::relay(self.host.as_str()),
            SmtpMode::StartTls => SmtpTransport::starttls_relay(self.host.as_str()),
        }
        .map_err(Error::from)
        .add_msg(format!(
            "Failed to build smtp client for host: {:?} with mode {:?}",
            self.host, self.smtp_mode
        ))
        .add_fn_name(function_path!())?;

        let builder = match self.port {
            Some(port) => builder.port(port),
            None => builder,
        };

        Ok(builder.credentials(creds).build())
    }

    pub fn build_notifier<S: Into<String>>(&self, body: S) -> Result<MailNotifier<SmtpTransport>> {
        Ok(MailNotifier::new(self.build_transport()?, self.from.clone(), body))
    }
}

/// Mails the archive through any lettre transport, one message per recipient
#[derive(Getters)]
#[getset(get = "pub")]
pub struct MailNotifier<T: Transport> {
    transport: T,
    from: Mailbox,
    body: String,
}

impl<T: Transport> MailNotifier<T> {
    pub fn new<S: Into<String>>(transport: T, from: Mailbox, body: S) -> Self {
        Self {
            transport,
            from,
            body: body.into(),
        }
    }

    #[named]
    pub fn build_message(
        &self,
        recipient: &Mailbox,
        subject: &str,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<Message> {
        let content_type = ContentType::parse(ZIP_CONTENT_TYPE)
            .map_err(|e| Error::ContentType(e.to_string()))?;
        let attachment = Attachment::new(file_name.to_string()).body(content, content_type);

        Message::builder()
            .from(self.from.clone())
            .to(recipient.clone())
            .subject(subject)
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(self.body.clone()))
                    .singlepart(attachment),
            )
            .map_err(Error::from)
            .add_msg(format!(
                "Fail to build backup email from {:?} to {:?}",
                self.from, recipient
            ))
            .add_fn_name(function_path!())
    }
}

impl<T> Notifier for MailNotifier<T>
where
    T: Transport,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    fn notify(
        &self,
        archive: &ArchiveArtifact,
        recipients: &[Mailbox],
        subject: &str,
    ) -> Vec<DeliveryOutcome> {
        tracing::info!(
            "Sending {:?} from {:?} to {} recipient(s)",
            archive.path(),
            self.from,
            recipients.len()
        );

        let content = std::fs::read(archive.path());
        let file_name = archive.file_name();

        recipients
            .iter()
            .map(|recipient| {
                let result = match &content {
                    Ok(content) => self
                        .build_message(recipient, subject, &file_name, content.clone())
                        .and_then(|email| {
                            self.transport
                                .send(&email)
                                .map(|_| ())
                                .map_err(Error::transport)
                        }),
                    Err(e) => Err(Error::from(std::io::Error::new(e.kind(), e.to_string()))
                        .add_msg(format!("Cannot read archive {:?}", archive.path()))),
                }
                .map_err(|e| Error::delivery_failed(recipient.to_string(), e));

                match &result {
                    Ok(_) => tracing::info!("Backup sent to {}", recipient),
                    Err(e) => tracing::error!("{e}"),
                }

                DeliveryOutcome {
                    recipient: recipient.clone(),
                    result,
                }
            })
            .collect()
    }
}
