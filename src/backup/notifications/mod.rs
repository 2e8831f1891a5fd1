use crate::backup::archive::ArchiveArtifact;
use crate::backup::notifications::smtp::{MailNotifier, SmtpNotificationConfig};
use crate::backup::result_error::result::Result;
use derive_more::From;
use lettre::message::Mailbox;
use lettre::SmtpTransport;
use serde::{Deserialize, Serialize};
use std::result;
use validator::{Validate, ValidationErrors};

pub mod smtp;

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum NotificationConfig {
    Smtp(SmtpNotificationConfig),
}

impl Validate for NotificationConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Smtp(inner) => inner.validate(),
        }
    }
}

impl NotificationConfig {
    pub fn build_notifier<S: Into<String>>(&self, body: S) -> Result<MailNotifier<SmtpTransport>> {
        match self {
            Self::Smtp(inner) => inner.build_notifier(body),
        }
    }
}

/// Result of sending the archive to one recipient
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub recipient: Mailbox,
    pub result: Result<()>,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Sends the archive to each recipient separately.
///
/// Every recipient is attempted even when earlier ones fail; the caller decides
/// what a partial failure means for the run.
pub trait Notifier {
    fn notify(
        &self,
        archive: &ArchiveArtifact,
        recipients: &[Mailbox],
        subject: &str,
    ) -> Vec<DeliveryOutcome>;
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn notify(
        &self,
        archive: &ArchiveArtifact,
        recipients: &[Mailbox],
        subject: &str,
    ) -> Vec<DeliveryOutcome> {
        (**self).notify(archive, recipients, subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::result_error::error::Error;

    fn outcome(to: &str, result: Result<()>) -> DeliveryOutcome {
        DeliveryOutcome {
            recipient: to.parse().unwrap(),
            result,
        }
    }

    #[test]
    fn test_outcome_is_delivered() {
        assert!(outcome("a@example.com", Ok(())).is_delivered());

        let failed = outcome(
            "b@example.com",
            Err(Error::delivery_failed(
                "b@example.com",
                Error::transport(std::io::Error::other("550 mailbox unavailable")),
            )),
        );
        assert!(!failed.is_delivered());
        assert!(failed.result.unwrap_err().to_string().contains("b@example.com"));
    }

    #[test]
    fn test_notification_config_deserialization() {
        let yaml = r#"
type: smtp
host: smtp.example.com
smtp_mode: StartTls
from: Backups <backup@example.com>
username: mailer
password: hunter2hunter2
"#;
        let config: NotificationConfig = serde_yml::from_str(yaml).unwrap();
        let NotificationConfig::Smtp(smtp) = &config;
        assert_eq!(smtp.host(), "smtp.example.com");
        assert_eq!(smtp.from().email.to_string(), "backup@example.com");
        assert!(config.validate().is_ok());
    }
}
