use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub notify_buffer: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let notify_buffer = env::var("NOTIFY_BUFFER")
            .ok()
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(256);
        Ok(Self {
            port,
            database_url,
            host,
            notify_buffer,
        })
    }
}
