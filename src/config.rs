use serde::Deserialize;

/// Deployment mode; decides how much error detail reaches clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub cookie_ttl_days: i64,
}

/// Argon2 work factor. `cost` maps to the time cost (iterations).
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub cost: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// No host means mails are only logged.
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub minio_endpoint: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: Environment,
    pub public_url: String,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub mail: MailConfig,
    pub stripe: StripeConfig,
    pub storage: StorageConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let environment = Environment::parse(&env_or("APP_ENV", "development"));
        let public_url = env_or("PUBLIC_URL", "http://localhost:8080");

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: env_or("JWT_ISSUER", "tourbook"),
            audience: env_or("JWT_AUDIENCE", "tourbook-users"),
            ttl_minutes: env_parse("JWT_EXPIRES_IN_MINUTES", 60 * 24 * 90),
            cookie_ttl_days: env_parse("JWT_COOKIE_EXPIRES_IN_DAYS", 90),
        };

        let password = PasswordConfig {
            cost: env_parse("PASSWORD_HASH_COST", 3),
            memory_kib: env_parse("PASSWORD_HASH_MEMORY_KIB", 19 * 1024),
            parallelism: env_parse("PASSWORD_HASH_PARALLELISM", 1),
        };

        let mail = MailConfig {
            smtp_host: std::env::var("SMTP_HOST").ok().filter(|h| !h.is_empty()),
            smtp_port: env_parse("SMTP_PORT", 587),
            smtp_username: env_or("SMTP_USERNAME", ""),
            smtp_password: env_or("SMTP_PASSWORD", ""),
            from: env_or("EMAIL_FROM", "Tourbook <hello@tourbook.local>"),
        };

        let stripe = StripeConfig {
            secret_key: env_or("STRIPE_SECRET_KEY", ""),
            webhook_secret: env_or("STRIPE_WEBHOOK_SECRET", ""),
            api_base: env_or("STRIPE_API_BASE", "https://api.stripe.com"),
        };

        let storage = StorageConfig {
            minio_endpoint: env_or("MINIO_ENDPOINT", "http://localhost:9000"),
            minio_bucket: env_or("MINIO_BUCKET", "tourbook"),
            minio_access_key: env_or("MINIO_ACCESS_KEY", "minioadmin"),
            minio_secret_key: env_or("MINIO_SECRET_KEY", "minioadmin"),
        };

        Ok(Self {
            database_url,
            environment,
            public_url,
            jwt,
            password,
            mail,
            stripe,
            storage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_defaults_to_development() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse(" PROD "), Environment::Production);
        assert_eq!(Environment::parse("development"), Environment::Development);
        assert_eq!(Environment::parse("staging"), Environment::Development);
    }
}
