use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use crate::config::SmtpConfig;
use crate::models::Member;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailTemplate {
    Registration,
    ForgotPassword,
    EventReminder,
    EventSummary,
}

impl MailTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailTemplate::Registration => "registration",
            MailTemplate::ForgotPassword => "forgot_password",
            MailTemplate::EventReminder => "event_reminder",
            MailTemplate::EventSummary => "event_summary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    English,
    French,
    Catalan,
}

impl Language {
    /// Unknown languages fall back to French.
    fn from_code(code: &str) -> Self {
        match code.to_ascii_lowercase().as_str() {
            "en" => Language::English,
            "cat" | "ca" => Language::Catalan,
            _ => Language::French,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

fn text<'a>(context: &'a Value, key: &str) -> &'a str {
    context.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Plain-text subject and body for a template in the recipient's language.
pub fn render(template: MailTemplate, recipient: &Member, context: &Value) -> RenderedEmail {
    let language = Language::from_code(&recipient.language);
    let name = &recipient.first_name;
    let link = text(context, "link");
    let event = text(context, "event_name");
    let start = text(context, "event_start");

    let greeting = match language {
        Language::English => format!("Hello {},", name),
        Language::French => format!("Bonjour {},", name),
        Language::Catalan => format!("Hola {},", name),
    };

    let (subject, lines) = match (template, language) {
        (MailTemplate::Registration, Language::English) => (
            "Welcome to the association".to_string(),
            vec![
                format!("{} has registered you as a member.", text(context, "author_name")),
                format!("Set your login credentials here: {}", link),
            ],
        ),
        (MailTemplate::Registration, Language::French) => (
            "Bienvenue dans l'association".to_string(),
            vec![
                format!("{} vous a inscrit comme membre.", text(context, "author_name")),
                format!("Choisissez vos identifiants ici : {}", link),
            ],
        ),
        (MailTemplate::Registration, Language::Catalan) => (
            "Benvingut a l'associació".to_string(),
            vec![
                format!("{} t'ha inscrit com a membre.", text(context, "author_name")),
                format!("Tria les teves credencials aquí: {}", link),
            ],
        ),
        (MailTemplate::ForgotPassword, Language::English) => (
            "Reset your password".to_string(),
            vec![
                format!("Your username is {}.", text(context, "username")),
                format!("Choose a new password here: {}", link),
            ],
        ),
        (MailTemplate::ForgotPassword, Language::French) => (
            "Réinitialisez votre mot de passe".to_string(),
            vec![
                format!("Votre identifiant est {}.", text(context, "username")),
                format!("Choisissez un nouveau mot de passe ici : {}", link),
            ],
        ),
        (MailTemplate::ForgotPassword, Language::Catalan) => (
            "Restableix la contrasenya".to_string(),
            vec![
                format!("El teu usuari és {}.", text(context, "username")),
                format!("Tria una contrasenya nova aquí: {}", link),
            ],
        ),
        (MailTemplate::EventReminder, Language::English) => (
            format!("Upcoming event: {}", event),
            vec![
                format!("{} starts on {}.", event, start),
                format!("Your current answer: {}", answer_or(context, "none")),
                format!("Answer here: {}", link),
            ],
        ),
        (MailTemplate::EventReminder, Language::French) => (
            format!("Événement à venir : {}", event),
            vec![
                format!("{} commence le {}.", event, start),
                format!("Votre réponse actuelle : {}", answer_or(context, "aucune")),
                format!("Répondez ici : {}", link),
            ],
        ),
        (MailTemplate::EventReminder, Language::Catalan) => (
            format!("Proper esdeveniment: {}", event),
            vec![
                format!("{} comença el {}.", event, start),
                format!("La teva resposta actual: {}", answer_or(context, "cap")),
                format!("Respon aquí: {}", link),
            ],
        ),
        (MailTemplate::EventSummary, language) => {
            let (subject, heading) = match language {
                Language::English => ("Participation summary", "Answers"),
                Language::French => ("Résumé des participations", "Réponses"),
                Language::Catalan => ("Resum de participació", "Respostes"),
            };
            let mut lines = vec![format!("{} ({}) - {}:", event, start, heading)];
            if let Some(participants) = context.get("participants").and_then(Value::as_array) {
                lines.extend(participants.iter().map(|p| {
                    format!("- {}: {}", text(p, "name"), answer_or(p, "-"))
                }));
            }
            (format!("{}: {}", subject, event), lines)
        }
    };

    let mut body = greeting;
    body.push_str("\n\n");
    body.push_str(&lines.join("\n"));
    body.push('\n');

    RenderedEmail { subject, body }
}

fn answer_or<'a>(context: &'a Value, default: &'a str) -> &'a str {
    match text(context, "answer") {
        "" => default,
        answer => answer,
    }
}

/// Outbound mail collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        template: MailTemplate,
        recipient: &Member,
        context: &Value,
    ) -> Result<(), ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError>;
}

pub struct SmtpMailer {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, ProviderError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                ProviderError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port);

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            config,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(
        &self,
        template: MailTemplate,
        recipient: &Member,
        context: &Value,
    ) -> Result<(), ProviderError> {
        let rendered = render(template, recipient, context);

        let from_mailbox: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| ProviderError::Configuration(format!("Invalid from address: {}", e)))?;

        let to_mailbox: Mailbox = recipient
            .email
            .parse()
            .map_err(|e| ProviderError::InvalidRecipient(format!("Invalid recipient: {}", e)))?;

        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&rendered.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
            .map_err(|e| ProviderError::SendFailed(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| ProviderError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(
            member_uuid = %recipient.member_uuid,
            template = template.as_str(),
            "Email sent"
        );

        Ok(())
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| ProviderError::Connection(format!("SMTP connection test failed: {}", e)))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub template: MailTemplate,
    pub to: String,
    pub subject: String,
    pub context: Value,
}

/// Records sends instead of delivering them; can be told to fail.
#[derive(Default)]
pub struct MockMailer {
    sent: Mutex<Vec<SentEmail>>,
    fail_all: AtomicBool,
    failing_recipients: Mutex<HashSet<String>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_for(&self, email: &str) {
        if let Ok(mut failing) = self.failing_recipients.lock() {
            failing.insert(email.to_string());
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(
        &self,
        template: MailTemplate,
        recipient: &Member,
        context: &Value,
    ) -> Result<(), ProviderError> {
        let failing = self
            .failing_recipients
            .lock()
            .map_err(|e| ProviderError::SendFailed(format!("Mock mailer mutex poisoned: {}", e)))?
            .contains(&recipient.email);
        if failing || self.fail_all.load(Ordering::SeqCst) {
            return Err(ProviderError::SendFailed("Mock send failure".to_string()));
        }

        let rendered = render(template, recipient, context);
        tracing::info!(
            member_uuid = %recipient.member_uuid,
            template = template.as_str(),
            "[MOCK] Email would be sent"
        );

        self.sent
            .lock()
            .map_err(|e| ProviderError::SendFailed(format!("Mock mailer mutex poisoned: {}", e)))?
            .push(SentEmail {
                template,
                to: recipient.email.clone(),
                subject: rendered.subject,
                context: context.clone(),
            });
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemberType;
    use serde_json::json;

    fn member(language: &str) -> Member {
        Member::new(
            "Jordi".to_string(),
            "Vidal".to_string(),
            "jordi@example.com".to_string(),
            MemberType::Member,
            language.to_string(),
        )
    }

    #[test]
    fn renders_in_member_language() {
        let context = json!({"author_name": "Marta", "link": "https://x/reset?t=abc"});

        let en = render(MailTemplate::Registration, &member("en"), &context);
        assert_eq!(en.subject, "Welcome to the association");
        assert!(en.body.starts_with("Hello Jordi,"));
        assert!(en.body.contains("https://x/reset?t=abc"));

        let cat = render(MailTemplate::Registration, &member("cat"), &context);
        assert!(cat.body.starts_with("Hola Jordi,"));
    }

    #[test]
    fn unknown_language_falls_back_to_french() {
        let rendered = render(MailTemplate::ForgotPassword, &member("de"), &json!({}));
        assert_eq!(rendered.subject, "Réinitialisez votre mot de passe");
    }

    #[test]
    fn summary_lists_participants() {
        let context = json!({
            "event_name": "Diada",
            "event_start": "2024-09-11 10:00 UTC",
            "participants": [
                {"name": "Anna Puig", "answer": "yes"},
                {"name": "Pere Roca", "answer": ""}
            ]
        });
        let rendered = render(MailTemplate::EventSummary, &member("en"), &context);
        assert_eq!(rendered.subject, "Participation summary: Diada");
        assert!(rendered.body.contains("- Anna Puig: yes"));
        assert!(rendered.body.contains("- Pere Roca: -"));
    }

    #[tokio::test]
    async fn mock_fails_for_selected_recipient() {
        let mailer = MockMailer::new();
        let target = member("en");
        mailer.fail_for(&target.email);

        assert!(mailer
            .send(MailTemplate::Registration, &target, &json!({}))
            .await
            .is_err());
        assert!(mailer.sent().is_empty());
    }
}
