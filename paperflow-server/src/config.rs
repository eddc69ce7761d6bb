use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Server configuration, loaded once at startup from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Database
    pub database_url: String,

    // Secrets
    pub secret_key: String,
    pub encryption_key: String,

    // Moodle
    pub moodle_base_url: String,
    pub moodle_admin_token: Option<String>,

    // Remote extraction service; empty disables it
    pub hf_space_url: String,

    // File storage
    pub upload_dir: PathBuf,
    pub max_file_size_mb: usize,

    // Session lifetimes
    pub access_token_expire_minutes: i64,
    pub session_expire_hours: i64,

    // Email notifications. SendGrid is the wired channel; the SMTP block
    // is recognised so existing deployments keep their env files, and is
    // handed to whichever notifier implementation consumes it.
    pub sendgrid_api_key: String,
    pub email_from_email: String,
    pub email_from_name: String,
    pub staff_alert_email: Option<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_use_tls: bool,

    // CORS
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenv::dotenv().ok();

        Ok(Self {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .unwrap_or(8000),

            database_url: require("DATABASE_URL")?,
            secret_key: require("SECRET_KEY")?,
            encryption_key: require("ENCRYPTION_KEY")?,
            moodle_base_url: require("MOODLE_BASE_URL")?,
            moodle_admin_token: env::var("MOODLE_ADMIN_TOKEN").ok().filter(|v| !v.is_empty()),

            hf_space_url: env::var("HF_SPACE_URL").unwrap_or_default(),

            upload_dir: env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "./uploads".to_string())
                .into(),
            max_file_size_mb: parse_or("MAX_FILE_SIZE_MB", 50),

            access_token_expire_minutes: parse_or("ACCESS_TOKEN_EXPIRE_MINUTES", 60),
            session_expire_hours: parse_or("SESSION_EXPIRE_HOURS", 24),

            sendgrid_api_key: env::var("SENDGRID_API_KEY").unwrap_or_default(),
            email_from_email: env::var("EMAIL_FROM_EMAIL").unwrap_or_default(),
            email_from_name: env::var("EMAIL_FROM_NAME")
                .unwrap_or_else(|_| "Paperflow Middleware".to_string()),
            staff_alert_email: env::var("STAFF_ALERT_EMAIL").ok().filter(|v| !v.is_empty()),
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: parse_or("SMTP_PORT", 587),
            smtp_username: env::var("SMTP_USERNAME").unwrap_or_default(),
            smtp_password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            smtp_use_tls: parse_or("SMTP_USE_TLS", true),

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        Ok(())
    }
}

fn require(key: &str) -> anyhow::Result<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("{key} must be set"))
}

fn parse_or<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_file_size_converts_to_bytes() {
        let config = Config {
            server_host: "0.0.0.0".into(),
            server_port: 8000,
            database_url: "postgres://localhost/test".into(),
            secret_key: "secret".into(),
            encryption_key: "key".into(),
            moodle_base_url: "https://lms.example.edu".into(),
            moodle_admin_token: None,
            hf_space_url: String::new(),
            upload_dir: "./uploads".into(),
            max_file_size_mb: 50,
            access_token_expire_minutes: 60,
            session_expire_hours: 24,
            sendgrid_api_key: String::new(),
            email_from_email: String::new(),
            email_from_name: "Paperflow".into(),
            staff_alert_email: None,
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_use_tls: true,
            cors_allowed_origins: vec!["*".into()],
        };
        assert_eq!(config.max_file_size_bytes(), 50 * 1024 * 1024);
    }
}
