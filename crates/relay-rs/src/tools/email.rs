//! The `email` tool: send mail, fill templates, keep drafts.
//!
//! Delivery goes through a [`MailTransport`]. The crate ships only
//! [`MemoryTransport`], which records messages; plug in a real transport
//! with [`EmailTool::with_transport`]. With `dry_run` set (the default)
//! sends are validated and reported but never reach the transport.

use super::args::{opt_bool, parse_args};
use super::cache::{Clock, SystemClock};
use super::core::{Tool, ToolArgs, ToolFuture};
use crate::error::ToolError;
use crate::{ToolDef, json_schema_for};
use chrono::NaiveDate;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, LazyLock, Mutex};
use tracing::{debug, info, warn};

static EMAIL_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid regex")
});

/// SMTP-style settings plus template sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Falls back to `username`.
    pub default_sender: Option<String>,
    /// `.html` and `.txt` files here become templates named by file stem.
    pub template_dir: Option<PathBuf>,
    pub templates: BTreeMap<String, String>,
    pub daily_limit: u32,
    pub dry_run: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_server: "smtp.gmail.com".into(),
            smtp_port: 587,
            username: None,
            password: None,
            default_sender: None,
            template_dir: None,
            templates: BTreeMap::new(),
            daily_limit: 50,
            dry_run: true,
        }
    }
}

// ── Transport ──────────────────────────────────────────────────────

/// A fully addressed message ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
}

impl OutgoingMail {
    pub fn recipients(&self) -> Vec<String> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .cloned()
            .collect()
    }
}

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// Delivers mail.
pub trait MailTransport: Send + Sync {
    fn send<'a>(&'a self, mail: &'a OutgoingMail) -> SendFuture<'a>;
}

/// Keeps every message it is handed.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl MailTransport for MemoryTransport {
    fn send<'a>(&'a self, mail: &'a OutgoingMail) -> SendFuture<'a> {
        Box::pin(async move {
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(mail.clone());
            Ok(())
        })
    }
}

// ── Tool ───────────────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct EmailArgs {
    /// One of 'send_email', 'send_template_email', 'get_template', 'save_draft', 'get_draft'.
    action: String,
    /// Recipient address(es), comma-separated.
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<String>,
    /// Carbon copy recipients, comma-separated.
    #[serde(default)]
    cc: Option<String>,
    /// Blind carbon copy recipients, comma-separated.
    #[serde(default)]
    bcc: Option<String>,
    /// Whether the body is HTML. Defaults to false, or true for templates.
    #[serde(default, deserialize_with = "opt_bool")]
    #[schemars(with = "Option<bool>")]
    is_html: Option<bool>,
    #[serde(default)]
    template_name: Option<String>,
    /// Values substituted for `{{key}}` placeholders in the template.
    #[serde(default)]
    template_vars: Option<Map<String, Value>>,
    #[serde(default)]
    draft_id: Option<String>,
    /// Arbitrary draft fields to store.
    #[serde(default)]
    draft_data: Option<Map<String, Value>>,
}

#[derive(Debug)]
struct Mailbox {
    day: Option<NaiveDate>,
    sent_today: u32,
    drafts: HashMap<String, Map<String, Value>>,
}

pub struct EmailTool {
    config: EmailConfig,
    templates: BTreeMap<String, String>,
    transport: Arc<dyn MailTransport>,
    clock: Arc<dyn Clock>,
    mailbox: Mutex<Mailbox>,
}

impl EmailTool {
    pub fn new(config: EmailConfig) -> Self {
        let mut templates = config
            .template_dir
            .as_deref()
            .map(load_templates)
            .unwrap_or_default();
        templates.extend(config.templates.clone());
        Self {
            config,
            templates,
            transport: Arc::new(MemoryTransport::new()),
            clock: Arc::new(SystemClock),
            mailbox: Mutex::new(Mailbox {
                day: None,
                sent_today: 0,
                drafts: HashMap::new(),
            }),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn template_names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    fn lock_mailbox(&self) -> std::sync::MutexGuard<'_, Mailbox> {
        let mut mailbox = self.mailbox.lock().unwrap_or_else(|e| e.into_inner());
        let today = self.clock.now().date_naive();
        if mailbox.day != Some(today) {
            mailbox.day = Some(today);
            mailbox.sent_today = 0;
        }
        mailbox
    }

    fn template(&self, name: Option<&str>) -> Result<(&str, &str), ToolError> {
        let name = name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ToolError::invalid("template_name is required"))?;
        self.templates
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .ok_or_else(|| {
                ToolError::execution(format!(
                    "Template '{name}' not found. Available templates: {}",
                    self.template_names().join(", ")
                ))
            })
    }

    async fn send(
        &self,
        to: Option<&str>,
        cc: Option<&str>,
        bcc: Option<&str>,
        subject: String,
        body: String,
        is_html: bool,
    ) -> Result<Value, ToolError> {
        let credentials = self
            .config
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .zip(self.config.password.as_deref().filter(|p| !p.is_empty()));
        if credentials.is_none() && !self.config.dry_run {
            return Err(ToolError::Unavailable(
                "Email credentials not configured. Please set EMAIL_USERNAME and EMAIL_PASSWORD environment variables."
                    .into(),
            ));
        }
        if self.lock_mailbox().sent_today >= self.config.daily_limit {
            return Err(ToolError::execution("Daily email limit reached"));
        }

        let mail = OutgoingMail {
            from: self
                .config
                .default_sender
                .clone()
                .or_else(|| self.config.username.clone())
                .unwrap_or_default(),
            to: parse_address_list(to)?,
            cc: parse_address_list(cc)?,
            bcc: parse_address_list(bcc)?,
            subject,
            body,
            is_html,
        };
        let recipients = mail.recipients();
        if recipients.is_empty() {
            return Err(ToolError::invalid("No valid recipients specified"));
        }
        info!(
            "Sending email to {} recipients with subject: {}",
            recipients.len(),
            mail.subject
        );

        if self.config.dry_run {
            info!("DRY RUN: email would be sent to {}", recipients.join(", "));
            return Ok(json!({
                "status": "success",
                "message": "[DRY RUN] Email would be sent successfully",
                "recipients": recipients,
                "subject": mail.subject,
            }));
        }

        self.transport
            .send(&mail)
            .await
            .map_err(|e| ToolError::Unavailable(format!("Failed to send email: {e}")))?;
        self.lock_mailbox().sent_today += 1;
        Ok(json!({
            "status": "success",
            "message": "Email sent successfully",
            "recipients": recipients,
            "subject": mail.subject,
        }))
    }
}

impl Tool for EmailTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "email",
            "Send emails and manage email templates",
            json_schema_for::<EmailArgs>(),
        )
    }

    fn execute<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: EmailArgs = parse_args(arguments)?;
            match args.action.as_str() {
                "send_email" => {
                    self.send(
                        args.to.as_deref(),
                        args.cc.as_deref(),
                        args.bcc.as_deref(),
                        args.subject.unwrap_or_default(),
                        args.body.unwrap_or_default(),
                        args.is_html.unwrap_or(false),
                    )
                    .await
                }
                "send_template_email" => {
                    let (_, template) = self.template(args.template_name.as_deref())?;
                    let body = render_template(template, args.template_vars.as_ref());
                    self.send(
                        args.to.as_deref(),
                        args.cc.as_deref(),
                        args.bcc.as_deref(),
                        args.subject.unwrap_or_default(),
                        body,
                        args.is_html.unwrap_or(true),
                    )
                    .await
                }
                "get_template" => {
                    let (name, template) = self.template(args.template_name.as_deref())?;
                    Ok(json!({
                        "status": "success",
                        "template_name": name,
                        "template": template,
                    }))
                }
                "save_draft" => {
                    let id = args
                        .draft_id
                        .filter(|id| !id.is_empty())
                        .ok_or_else(|| ToolError::invalid("Draft ID is required"))?;
                    let data = args
                        .draft_data
                        .filter(|d| !d.is_empty())
                        .ok_or_else(|| ToolError::invalid("No draft data provided"))?;
                    self.lock_mailbox().drafts.insert(id.clone(), data);
                    Ok(json!({
                        "status": "success",
                        "message": format!("Draft '{id}' saved successfully"),
                        "draft_id": id,
                    }))
                }
                "get_draft" => {
                    let id = args
                        .draft_id
                        .filter(|id| !id.is_empty())
                        .ok_or_else(|| ToolError::invalid("Draft ID is required"))?;
                    let draft = self.lock_mailbox().drafts.get(&id).cloned();
                    match draft {
                        Some(data) => Ok(json!({
                            "status": "success",
                            "draft_id": id,
                            "draft_data": data,
                        })),
                        None => Err(ToolError::execution(format!("Draft '{id}' not found"))),
                    }
                }
                other => Err(ToolError::invalid(format!("Unknown action: {other}"))),
            }
        })
    }

    fn cache_enabled(&self) -> bool {
        false
    }
}

// ── Helpers ────────────────────────────────────────────────────────

pub fn is_valid_address(address: &str) -> bool {
    EMAIL_ADDRESS.is_match(address)
}

/// Split a comma-separated list, rejecting the first malformed address.
fn parse_address_list(raw: Option<&str>) -> Result<Vec<String>, ToolError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|a| {
            if is_valid_address(a) {
                Ok(a.to_string())
            } else {
                Err(ToolError::invalid(format!("Invalid email address: {a}")))
            }
        })
        .collect()
}

/// Replace each `{{key}}` with its value. Strings are inserted unquoted.
pub fn render_template(template: &str, vars: Option<&Map<String, Value>>) -> String {
    let Some(vars) = vars else {
        return template.to_string();
    };
    vars.iter().fold(template.to_string(), |body, (key, value)| {
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        body.replace(&format!("{{{{{key}}}}}"), &replacement)
    })
}

fn load_templates(dir: &Path) -> BTreeMap<String, String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Email template directory {} unreadable: {e}", dir.display());
            return BTreeMap::new();
        }
    };
    let mut templates = BTreeMap::new();
    for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
        let is_template = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("html" | "txt")
        );
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !is_template {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(body) => {
                templates.insert(stem.to_string(), body);
            }
            Err(e) => warn!("Skipping email template {}: {e}", path.display()),
        }
    }
    debug!("Loaded {} email templates from {}", templates.len(), dir.display());
    templates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::cache::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn args(v: Value) -> ToolArgs {
        v.as_object().cloned().unwrap()
    }

    fn live_config() -> EmailConfig {
        EmailConfig {
            username: Some("bot@example.com".into()),
            password: Some("secret".into()),
            dry_run: false,
            daily_limit: 2,
            templates: BTreeMap::from([("welcome".to_string(), "Hello {{name}}, you are #{{rank}}!".to_string())]),
            ..EmailConfig::default()
        }
    }

    #[test]
    fn address_validation() {
        assert!(is_valid_address("a.b+c@example.co.uk"));
        assert!(!is_valid_address("not-an-address"));
        assert!(!is_valid_address("x@y"));
    }

    #[test]
    fn template_rendering() {
        let vars = json!({"name": "Ada", "rank": 1});
        assert_eq!(
            render_template("Hi {{name}} ({{rank}}) {{missing}}", vars.as_object()),
            "Hi Ada (1) {{missing}}"
        );
    }

    #[tokio::test]
    async fn dry_run_does_not_touch_transport() {
        let transport = Arc::new(MemoryTransport::new());
        let tool = EmailTool::new(EmailConfig::default()).with_transport(transport.clone());
        let result = tool
            .execute(&args(json!({
                "action": "send_email",
                "to": "a@example.com, b@example.com",
                "subject": "Hi"
            })))
            .await
            .unwrap();
        assert_eq!(result["message"], "[DRY RUN] Email would be sent successfully");
        assert_eq!(result["recipients"].as_array().unwrap().len(), 2);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn credentials_required_outside_dry_run() {
        let tool = EmailTool::new(EmailConfig {
            dry_run: false,
            ..EmailConfig::default()
        });
        let err = tool
            .execute(&args(json!({"action": "send_email", "to": "a@example.com"})))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Email credentials not configured"));
    }

    #[tokio::test]
    async fn template_email_is_rendered_and_delivered() {
        let transport = Arc::new(MemoryTransport::new());
        let tool = EmailTool::new(live_config()).with_transport(transport.clone());
        let result = tool
            .execute(&args(json!({
                "action": "send_template_email",
                "template_name": "welcome",
                "to": "ada@example.com",
                "cc": "ops@example.com",
                "subject": "Welcome",
                "template_vars": {"name": "Ada", "rank": 1}
            })))
            .await
            .unwrap();
        assert_eq!(result["message"], "Email sent successfully");

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "Hello Ada, you are #1!");
        assert_eq!(sent[0].from, "bot@example.com");
        assert_eq!(sent[0].cc, vec!["ops@example.com".to_string()]);
        assert!(sent[0].is_html);
    }

    #[tokio::test]
    async fn invalid_and_missing_recipients() {
        let tool = EmailTool::new(live_config());
        let err = tool
            .execute(&args(json!({"action": "send_email", "to": "ok@example.com, nope"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid email address: nope"));

        let err = tool
            .execute(&args(json!({"action": "send_email", "to": " , "})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No valid recipients specified"));
    }

    #[tokio::test]
    async fn daily_limit_resets_on_a_new_day() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap()));
        let tool = EmailTool::new(live_config()).with_clock(clock.clone());
        let send = args(json!({"action": "send_email", "to": "a@example.com"}));

        tool.execute(&send).await.unwrap();
        tool.execute(&send).await.unwrap();
        let err = tool.execute(&send).await.unwrap_err();
        assert_eq!(err.to_string(), "Daily email limit reached");

        clock.advance(Duration::from_secs(24 * 3600));
        assert!(tool.execute(&send).await.is_ok());
    }

    #[tokio::test]
    async fn drafts_round_trip_and_unknown_action() {
        let tool = EmailTool::new(EmailConfig::default());
        let saved = tool
            .execute(&args(json!({
                "action": "save_draft",
                "draft_id": "d1",
                "draft_data": {"subject": "Later"}
            })))
            .await
            .unwrap();
        assert_eq!(saved["message"], "Draft 'd1' saved successfully");

        let loaded = tool
            .execute(&args(json!({"action": "get_draft", "draft_id": "d1"})))
            .await
            .unwrap();
        assert_eq!(loaded["draft_data"]["subject"], "Later");

        let err = tool
            .execute(&args(json!({"action": "save_draft", "draft_id": "d2"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No draft data provided"));

        let err = tool
            .execute(&args(json!({"action": "shred"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown action: shred"));
    }

    #[tokio::test]
    async fn templates_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("reminder.txt"), "Don't forget {{thing}}").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        let tool = EmailTool::new(EmailConfig {
            template_dir: Some(dir.path().to_path_buf()),
            ..EmailConfig::default()
        });
        assert_eq!(tool.template_names(), vec!["reminder"]);

        let err = tool
            .execute(&args(json!({"action": "get_template", "template_name": "welcome"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Available templates: reminder"));
    }
}
