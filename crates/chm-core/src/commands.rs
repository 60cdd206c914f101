//! Chat command adapter: parses slash commands, calls the registry engine and
//! renders Telegram-HTML replies.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{BotIdentity, Channel, ChannelOrigin, ConversationRef, MessagingId, Workspace},
    errors::RegistryError,
    formatting::escape_html,
    registry::{RefreshAllReport, RefreshSummary, RegistryEngine},
};

const HELP: &str = "<b>📋 Commands:</b>\n\
/add_workspace &lt;name&gt; - Create a workspace\n\
/add_channel &lt;workspace&gt; &lt;remote-id&gt; &lt;name&gt; - Track a channel\n\
/list_workspaces - List workspaces\n\
/list_channels &lt;workspace&gt; - List tracked channels\n\
/refresh &lt;workspace&gt; - Sync one workspace from the directory\n\
/refresh_all - Sync every workspace\n\
/link_account &lt;account&gt; - Link your directory account\n\
/account - Show the linked account\n\
/ping - Check the bot is alive\n\
/version - Show version";

/// Who sent a command, as far as the engine cares.
#[derive(Clone, Debug)]
pub struct CommandContext {
    pub conversation: ConversationRef,
}

#[derive(Clone, Debug)]
pub struct AdapterSettings {
    pub welcome_message: String,
    /// Deadline for `/refresh` and `/refresh_all`.
    pub refresh_timeout: Duration,
}

pub struct CommandAdapter {
    engine: Arc<RegistryEngine>,
    identity: BotIdentity,
    settings: AdapterSettings,
    shutdown: CancellationToken,
}

/// Cancels its token when the deadline passes; stops the timer on drop.
struct Deadline {
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl Deadline {
    fn new(parent: &CancellationToken, after: Duration) -> Self {
        let token = parent.child_token();
        let timer = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                token.cancel();
            })
        };
        Self { token, timer }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Split `/cmd@bot rest` into a normalized command name and its arguments.
///
/// Names are lowercased and `-` is accepted as an alias for `_`.
pub fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase()
        .replace('-', "_");

    (cmd, rest)
}

pub fn is_command(text: &str) -> bool {
    text.trim_start().starts_with('/')
}

impl CommandAdapter {
    pub fn new(
        engine: Arc<RegistryEngine>,
        identity: BotIdentity,
        settings: AdapterSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            identity,
            settings,
            shutdown,
        }
    }

    /// Run one chat command and return the HTML reply.
    pub async fn handle(&self, ctx: &CommandContext, text: &str) -> String {
        let (cmd, arg) = parse_command(text);
        tracing::debug!(conversation = %ctx.conversation, command = %cmd, "command received");

        let res = match cmd.as_str() {
            "start" | "help" => Ok(self.help()),
            "ping" => Ok("pong".to_string()),
            "version" => Ok(self.version()),
            "add_workspace" | "add_work" => self.add_workspace(ctx, &arg).await,
            "add_channel" => self.add_channel(ctx, &arg).await,
            "list_workspaces" => self.list_workspaces(ctx).await,
            "list_channels" => self.list_channels(ctx, &arg).await,
            "refresh" => self.refresh(ctx, &arg).await,
            "refresh_all" => self.refresh_all(ctx).await,
            "link_account" | "link_teritori_account" => self.link_account(ctx, &arg).await,
            "account" => self.account(ctx).await,
            _ => Ok(format!("Unknown command: /{}", escape_html(&cmd))),
        };

        match res {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_internal() {
                    tracing::error!(command = %cmd, error = %e, "command failed");
                }
                format!("❌ {}", escape_html(&e.user_message()))
            }
        }
    }

    fn help(&self) -> String {
        format!(
            "🤖 <b>{}</b>\n\n{}\n\n{HELP}",
            escape_html(&self.identity.display_name),
            escape_html(&self.settings.welcome_message)
        )
    }

    fn version(&self) -> String {
        let mut out = format!(
            "{} version: <code>{}</code>",
            escape_html(&self.identity.display_name),
            env!("CARGO_PKG_VERSION")
        );
        if let Some(key) = &self.identity.key_id {
            out.push_str(&format!("\nKey: <code>{}</code>", escape_html(key)));
        }
        out
    }

    async fn add_workspace(&self, ctx: &CommandContext, arg: &str) -> Result<String, RegistryError> {
        if arg.is_empty() {
            return Ok(usage("/add_workspace &lt;name&gt;"));
        }
        let ws = self.engine.add_workspace(&ctx.conversation, arg).await?;
        Ok(format!(
            "✅ Workspace <b>{}</b> created (<code>{}</code>)",
            escape_html(&ws.name),
            escape_html(ws.id.as_str())
        ))
    }

    async fn add_channel(&self, ctx: &CommandContext, arg: &str) -> Result<String, RegistryError> {
        let (ws_ref, rest) = split_word(arg);
        let (remote_id, name) = split_word(rest);
        if ws_ref.is_empty() || remote_id.is_empty() || name.is_empty() {
            return Ok(usage(
                "/add_channel &lt;workspace&gt; &lt;remote-id&gt; &lt;name&gt;",
            ));
        }
        let ws = self.engine.find_workspace(&ctx.conversation, ws_ref).await?;
        let ch = self.engine.add_channel(&ws.id, remote_id, name).await?;
        Ok(format!(
            "✅ Tracking <code>{}</code> {} in <b>{}</b>",
            escape_html(&ch.remote_id),
            escape_html(&ch.name),
            escape_html(&ws.name)
        ))
    }

    async fn list_workspaces(&self, ctx: &CommandContext) -> Result<String, RegistryError> {
        let list = self.engine.list_workspaces(&ctx.conversation).await?;
        Ok(render_workspaces(&list))
    }

    async fn list_channels(&self, ctx: &CommandContext, arg: &str) -> Result<String, RegistryError> {
        if arg.is_empty() {
            return Ok(usage("/list_channels &lt;workspace&gt;"));
        }
        let ws = self.engine.find_workspace(&ctx.conversation, arg).await?;
        let channels = self.engine.list_channels(&ws.id).await?;
        Ok(render_channels(&ws, &channels))
    }

    async fn refresh(&self, ctx: &CommandContext, arg: &str) -> Result<String, RegistryError> {
        if arg.is_empty() {
            return Ok(usage("/refresh &lt;workspace&gt;"));
        }
        let ws = self.engine.find_workspace(&ctx.conversation, arg).await?;
        let deadline = Deadline::new(&self.shutdown, self.settings.refresh_timeout);
        let summary = self.engine.refresh(&ws.id, &deadline.token).await?;
        Ok(format!(
            "🔄 Refreshed <b>{}</b>: {}",
            escape_html(&ws.name),
            render_summary(&summary)
        ))
    }

    async fn refresh_all(&self, ctx: &CommandContext) -> Result<String, RegistryError> {
        let deadline = Deadline::new(&self.shutdown, self.settings.refresh_timeout);
        let report = self
            .engine
            .refresh_all(&ctx.conversation, &deadline.token)
            .await?;
        Ok(render_report(&report))
    }

    async fn link_account(&self, ctx: &CommandContext, arg: &str) -> Result<String, RegistryError> {
        if arg.is_empty() {
            return Ok(usage("/link_account &lt;account&gt;"));
        }
        let link = self
            .engine
            .link_account(&MessagingId::from(&ctx.conversation), arg)
            .await?;
        Ok(format!(
            "🔗 Linked account <code>{}</code>",
            escape_html(link.external_account.as_str())
        ))
    }

    async fn account(&self, ctx: &CommandContext) -> Result<String, RegistryError> {
        let link = self
            .engine
            .account_link(&MessagingId::from(&ctx.conversation))
            .await?;
        Ok(format!(
            "🔗 Linked account <code>{}</code> (since {})",
            escape_html(link.external_account.as_str()),
            link.linked_at.format("%Y-%m-%d %H:%M UTC")
        ))
    }
}

/// First whitespace-separated word and the trimmed remainder.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}

fn usage(line: &str) -> String {
    format!("Usage: {line}")
}

fn render_workspaces(list: &[Workspace]) -> String {
    if list.is_empty() {
        return "No workspaces yet. Use /add_workspace &lt;name&gt; to create one.".to_string();
    }
    let mut lines = vec![format!("📂 <b>Workspaces</b> ({})", list.len())];
    for ws in list {
        lines.push(format!(
            "• <b>{}</b> <code>{}</code>",
            escape_html(&ws.name),
            escape_html(ws.id.as_str())
        ));
    }
    lines.join("\n")
}

fn render_channels(ws: &Workspace, channels: &[Channel]) -> String {
    if channels.is_empty() {
        return format!(
            "No channels tracked in <b>{}</b> yet.",
            escape_html(&ws.name)
        );
    }
    let mut lines = vec![format!(
        "📺 <b>Channels in {}</b> ({})",
        escape_html(&ws.name),
        channels.len()
    )];
    for ch in channels {
        let mut line = format!(
            "• <code>{}</code> {}",
            escape_html(&ch.remote_id),
            escape_html(&ch.name)
        );
        if ch.origin == ChannelOrigin::Sync {
            line.push_str(" <i>(synced)</i>");
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn render_summary(s: &RefreshSummary) -> String {
    format!(
        "{} created, {} updated, {} unchanged",
        s.created, s.updated, s.unchanged
    )
}

fn render_report(report: &RefreshAllReport) -> String {
    let total = report.refreshed.len() + report.failed.len() + report.not_reached.len();
    if total == 0 {
        return "No workspaces to refresh.".to_string();
    }

    let mut lines = vec![format!(
        "🔄 <b>Refresh all</b>: {}/{} workspaces refreshed",
        report.refreshed.len(),
        total
    )];
    for (ws, summary) in &report.refreshed {
        lines.push(format!(
            "✅ <b>{}</b>: {}",
            escape_html(&ws.name),
            render_summary(summary)
        ));
    }
    for (ws, err) in &report.failed {
        lines.push(format!(
            "❌ <b>{}</b>: {}",
            escape_html(&ws.name),
            escape_html(&err.user_message())
        ));
    }
    for ws in &report.not_reached {
        lines.push(format!("⏭️ <b>{}</b>: not reached (timed out)", escape_html(&ws.name)));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        directory::DirectoryClient,
        domain::{ExternalAccountId, RemoteChannel},
        errors::DirectoryError,
        store::SqliteStore,
    };
    use async_trait::async_trait;

    struct StaticDirectory(Vec<RemoteChannel>);

    #[async_trait]
    impl DirectoryClient for StaticDirectory {
        async fn fetch_channels(
            &self,
            account: &ExternalAccountId,
        ) -> std::result::Result<Vec<RemoteChannel>, DirectoryError> {
            if account.as_str() == "revoked" {
                return Err(DirectoryError::Auth("401 token revoked".into()));
            }
            Ok(self.0.clone())
        }
    }

    fn adapter(listing: &[(&str, &str)]) -> CommandAdapter {
        let dir = StaticDirectory(
            listing
                .iter()
                .map(|(id, name)| RemoteChannel {
                    id: id.to_string(),
                    name: name.to_string(),
                })
                .collect(),
        );
        let identity = BotIdentity {
            display_name: "peroquet".to_string(),
            key_id: Some("ab12".to_string()),
        };
        let engine = Arc::new(RegistryEngine::new(
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            Arc::new(dir),
            identity.clone(),
        ));
        CommandAdapter::new(
            engine,
            identity,
            AdapterSettings {
                welcome_message: "Hello dear peroquet !".to_string(),
                refresh_timeout: Duration::from_secs(5),
            },
            CancellationToken::new(),
        )
    }

    fn ctx(conv: &str) -> CommandContext {
        CommandContext {
            conversation: ConversationRef::from(conv),
        }
    }

    #[test]
    fn parses_command_variants() {
        assert_eq!(
            parse_command("/add-work team a"),
            ("add_work".to_string(), "team a".to_string())
        );
        assert_eq!(
            parse_command("/List_Channels@chm_bot  team-a "),
            ("list_channels".to_string(), "team-a".to_string())
        );
        assert_eq!(parse_command("/ping"), ("ping".to_string(), String::new()));
        assert!(is_command("  /ping"));
        assert!(!is_command("ping"));
    }

    #[test]
    fn splits_channel_arguments() {
        assert_eq!(split_word("team-a   rc-1  big room"), ("team-a", "rc-1  big room"));
        assert_eq!(split_word("rc-1"), ("rc-1", ""));
        assert_eq!(split_word("  "), ("", ""));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_help_and_version() {
        let a = adapter(&[]);
        assert_eq!(a.handle(&ctx("c"), "/ping").await, "pong");
        let help = a.handle(&ctx("c"), "/start").await;
        assert!(help.contains("Hello dear peroquet !"));
        assert!(help.contains("/refresh_all"));
        let version = a.handle(&ctx("c"), "/version").await;
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
        assert!(version.contains("ab12"));
        assert!(a.handle(&ctx("c"), "/nope").await.starts_with("Unknown command"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn workspace_and_channel_scenario() {
        let a = adapter(&[]);
        let c = ctx("conv1");

        assert!(a.handle(&c, "/add_workspace team-a").await.contains("created"));
        assert!(a
            .handle(&c, "/add-work team-a")
            .await
            .contains("already exists"));

        assert!(a
            .handle(&c, "/add_channel team-a rc-1 general")
            .await
            .contains("Tracking"));
        assert!(a
            .handle(&c, "/add_channel team-a rc-1 general")
            .await
            .contains("already tracked"));

        let listing = a.handle(&c, "/list_channels team-a").await;
        assert!(listing.contains("<code>rc-1</code> general"));
        assert_eq!(listing.matches("rc-1").count(), 1);

        let ws = a.handle(&c, "/list_workspaces").await;
        assert!(ws.contains("<b>team-a</b>"));
        assert!(a
            .handle(&ctx("other"), "/list_workspaces")
            .await
            .starts_with("No workspaces"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_arguments_show_usage_and_missing_workspace_is_reported() {
        let a = adapter(&[]);
        let c = ctx("conv1");
        assert!(a.handle(&c, "/add_workspace").await.starts_with("Usage:"));
        assert!(a.handle(&c, "/add_channel team-a rc-1").await.starts_with("Usage:"));
        assert!(a
            .handle(&c, "/add_channel ghost rc-1 general")
            .await
            .contains("does not exist"));
        assert!(a.handle(&c, "/refresh ghost").await.contains("does not exist"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn link_then_refresh_twice() {
        let a = adapter(&[("rc-9", "random")]);
        let c = ctx("conv1");
        a.handle(&c, "/add_workspace team-a").await;

        assert!(a.handle(&c, "/refresh team-a").await.contains("No linked account"));

        assert!(a
            .handle(&c, "/link-teritori-account acct-42")
            .await
            .contains("acct-42"));
        assert!(a.handle(&c, "/account").await.contains("acct-42"));

        let first = a.handle(&c, "/refresh team-a").await;
        assert!(first.contains("1 created, 0 updated, 0 unchanged"), "{first}");
        let second = a.handle(&c, "/refresh team-a").await;
        assert!(second.contains("0 created, 0 updated, 1 unchanged"), "{second}");

        let listing = a.handle(&c, "/list_channels team-a").await;
        assert!(listing.contains("random <i>(synced)</i>"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_all_renders_failures_without_internals() {
        let a = adapter(&[("rc-1", "general")]);
        let c = ctx("conv1");
        a.handle(&c, "/add_workspace a").await;
        a.handle(&c, "/add_workspace b").await;
        a.handle(&c, "/link_account revoked").await;

        let reply = a.handle(&c, "/refresh_all").await;
        assert!(reply.contains("0/2 workspaces refreshed"));
        assert!(reply.contains("Refresh failed, try again later."));
        assert!(!reply.contains("401"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_stops_refresh_all_before_it_starts() {
        let a = adapter(&[("rc-1", "general")]);
        let c = ctx("conv1");
        a.handle(&c, "/add_workspace a").await;
        a.handle(&c, "/link_account acct").await;
        a.shutdown.cancel();

        let reply = a.handle(&c, "/refresh_all").await;
        assert!(reply.contains("not reached"));
    }
}
