use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub smtp: SmtpConfig,
    pub processor: ProcessorConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
    /// Base URL the public invoice viewing link is built from.
    pub public_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ProcessorConfig {
    /// Recorded as `paid_via` on processor-confirmed payments.
    pub name: String,
    pub webhook_secret: Secret<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("LIFECYCLE_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("LIFECYCLE_SERVICE_PORT")
            .unwrap_or_else(|_| "3007".to_string())
            .parse()?;

        let db_url =
            env::var("LIFECYCLE_DATABASE_URL").expect("LIFECYCLE_DATABASE_URL must be set");
        let max_connections = env::var("LIFECYCLE_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("LIFECYCLE_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let smtp_enabled = env::var("LIFECYCLE_SMTP_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        let smtp_host = env::var("LIFECYCLE_SMTP_HOST").unwrap_or_else(|_| "localhost".to_string());
        let smtp_port = env::var("LIFECYCLE_SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse()?;
        let smtp_user = env::var("LIFECYCLE_SMTP_USER").unwrap_or_default();
        let smtp_password = env::var("LIFECYCLE_SMTP_PASSWORD").unwrap_or_default();
        let from_email = env::var("LIFECYCLE_SMTP_FROM_EMAIL")
            .unwrap_or_else(|_| "invoices@localhost".to_string());
        let from_name =
            env::var("LIFECYCLE_SMTP_FROM_NAME").unwrap_or_else(|_| "Invoices".to_string());
        let public_base_url = env::var("LIFECYCLE_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let processor_name =
            env::var("LIFECYCLE_PROCESSOR_NAME").unwrap_or_else(|_| "stripe".to_string());
        let webhook_secret =
            env::var("LIFECYCLE_PROCESSOR_WEBHOOK_SECRET").unwrap_or_else(|_| "dev-secret".to_string());

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            smtp: SmtpConfig {
                enabled: smtp_enabled,
                host: smtp_host,
                port: smtp_port,
                user: smtp_user,
                password: Secret::new(smtp_password),
                from_email,
                from_name,
                public_base_url,
            },
            processor: ProcessorConfig {
                name: processor_name,
                webhook_secret: Secret::new(webhook_secret),
            },
            service_name: "lifecycle-service".to_string(),
        })
    }
}
