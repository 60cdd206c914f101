use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::BotIdentity, errors::Error, Result};

const DEFAULT_DIRECTORY_URL: &str = "http://127.0.0.1:8080/access";
const DEFAULT_WELCOME: &str = "Hello! I keep your workspaces and channels in sync.";

/// Typed configuration, loaded from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    /// Empty means every sender may use the bot.
    pub telegram_allowed_users: Vec<i64>,
    pub telegram_safe_limit: usize,

    // Storage
    pub database_path: PathBuf,

    // Directory service
    pub directory_url: String,
    pub directory_api_key: Option<String>,
    pub directory_timeout: Duration,

    // Commands
    pub refresh_timeout: Duration,
    pub welcome_message: String,

    // Identity
    pub identity: BotIdentity,

    pub debug: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let telegram_allowed_users = parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS"));
        let telegram_safe_limit = env_usize("TELEGRAM_SAFE_LIMIT").unwrap_or(4000);

        let database_path = env_path("CHM_DATABASE_PATH")
            .unwrap_or_else(|| PathBuf::from("channel-manager.db"));

        let directory_url = env_str("CHM_DIRECTORY_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_DIRECTORY_URL.to_string());
        if !(directory_url.starts_with("http://") || directory_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "CHM_DIRECTORY_URL must be an http(s) URL, got {directory_url}"
            )));
        }
        let directory_api_key = env_str("CHM_DIRECTORY_API_KEY").and_then(non_empty);
        let directory_timeout =
            Duration::from_millis(env_u64("CHM_DIRECTORY_TIMEOUT_MS").unwrap_or(10_000));

        let refresh_timeout =
            Duration::from_millis(env_u64("CHM_REFRESH_TIMEOUT_MS").unwrap_or(60_000));
        let welcome_message = env_str("CHM_WELCOME_MESSAGE")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_WELCOME.to_string());

        let identity = BotIdentity {
            display_name: env_str("CHM_BOT_NAME")
                .and_then(non_empty)
                .unwrap_or_else(|| BotIdentity::default().display_name),
            key_id: env_str("CHM_BOT_KEY_ID").and_then(non_empty),
        };

        let debug = env_bool("CHM_DEBUG").unwrap_or(false);

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            telegram_safe_limit,
            database_path,
            directory_url,
            directory_api_key,
            directory_timeout,
            refresh_timeout,
            welcome_message,
            identity,
            debug,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }
        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_parsing_skips_comments_and_strips_quotes() {
        let parsed = parse_dotenv(
            "# comment\n\nCHM_BOT_NAME=\"peroquet\"\nCHM_DEBUG = yes\nnot a pair\n=novalue\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("CHM_BOT_NAME".to_string(), "peroquet".to_string()),
                ("CHM_DEBUG".to_string(), "yes".to_string()),
            ]
        );
    }

    #[test]
    fn csv_ids_ignore_garbage() {
        assert_eq!(parse_csv_i64(Some("1, 2,x,,3".into())), vec![1, 2, 3]);
        assert!(parse_csv_i64(None).is_empty());
    }

    #[test]
    fn bool_flags() {
        assert!(parse_bool("ON"));
        assert!(parse_bool(" true "));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("nope"));
    }
}
