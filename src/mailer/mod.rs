use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::AppConfig;
use crate::utils::{DigestError, DigestResult};

/// 把渲染好的推送发给收件人
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_html(&self, subject: &str, html: &str) -> DigestResult<()>;
}

/// 通过 SMTP (STARTTLS + 登录) 投递
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    host: String,
    port: u16,
    user: String,
    password: String,
    recipient: String,
}

impl SmtpMailer {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            host: config.email_host.clone(),
            port: config.email_port,
            user: config.email_user.clone(),
            password: config.email_password.clone(),
            recipient: config.email_recipient.clone(),
        }
    }

    pub fn build_message(&self, subject: &str, html: &str) -> DigestResult<Message> {
        let from: Mailbox = self
            .user
            .parse()
            .map_err(|e| DigestError::MailError(format!("发件地址无效 '{}': {}", self.user, e)))?;
        let to: Mailbox = self.recipient.parse().map_err(|e| {
            DigestError::MailError(format!("收件地址无效 '{}': {}", self.recipient, e))
        })?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| DigestError::MailError(format!("构建邮件失败: {}", e)))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send_html(&self, subject: &str, html: &str) -> DigestResult<()> {
        if self.host.is_empty() || self.recipient.is_empty() {
            return Err(DigestError::MailError(
                "EMAIL_HOST 或 EMAIL_RECIPIENT 未配置".to_string(),
            ));
        }

        let message = self.build_message(subject, html)?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(|e| DigestError::MailError(format!("连接 {} 失败: {}", self.host, e)))?
            .port(self.port)
            .credentials(Credentials::new(self.user.clone(), self.password.clone()))
            .build();

        transport
            .send(message)
            .await
            .map_err(|e| DigestError::MailError(format!("发送邮件失败: {}", e)))?;

        info!("邮件已发送至 {}", self.recipient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailer() -> SmtpMailer {
        SmtpMailer::from_config(
            &AppConfig::from_map([
                ("EMAIL_HOST", "smtp.example.com"),
                ("EMAIL_USER", "bot@example.com"),
                ("EMAIL_PASSWORD", "secret"),
                ("EMAIL_RECIPIENT", "me@example.com"),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn message_is_html_with_subject() {
        let message = mailer()
            .build_message("Daily Update", "<p>hi</p>")
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: Daily Update"));
        assert!(raw.contains("Content-Type: text/html"));
        assert!(raw.contains("To: me@example.com"));
        assert!(raw.contains("<p>hi</p>"));
    }

    #[test]
    fn invalid_sender_is_a_mail_error() {
        let mut mailer = mailer();
        mailer.user = "not an address".to_string();
        assert!(matches!(
            mailer.build_message("s", "b"),
            Err(DigestError::MailError(_))
        ));
    }

    #[tokio::test]
    async fn unconfigured_host_fails_without_network() {
        let mut mailer = mailer();
        mailer.host.clear();
        assert!(mailer.send_html("s", "b").await.is_err());
    }
}
