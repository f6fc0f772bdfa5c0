use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "your_jwt_secret_here",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub jwt_ttl: chrono::Duration,
    /// Anything but `production` counts as development.
    pub production: bool,
    pub cors_origin: String,
    /// `None` turns the limiter off (`DTP_RATE_LIMIT_MAX=0`).
    pub rate_limit: Option<(u32, Duration)>,
    pub upload_dir: PathBuf,
    pub public_url: String,
    pub imagekit: Option<ImageKitConfig>,
    pub init_hospitals: bool,
    pub seed_admin: Option<AdminSeed>,
}

#[derive(Debug, Clone)]
pub struct ImageKitConfig {
    pub private_key: String,
    pub folder: String,
}

#[derive(Clone)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |key: &str| var(key).is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes"));

        let jwt_secret = var("DTP_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("DTP_JWT_SECRET is unset or still a placeholder. Set it in your .env file and restart.");
        }

        let host = var("DTP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("DTP_PORT")
            .unwrap_or_else(|| "5000".into())
            .parse()
            .context("DTP_PORT must be a port number")?;

        let expires_days = var("DTP_JWT_EXPIRES_DAYS")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("DTP_JWT_EXPIRES_DAYS must be a whole number of days")?
            .unwrap_or(7);
        if expires_days <= 0 {
            bail!("DTP_JWT_EXPIRES_DAYS must be positive");
        }

        let rate_max = var("DTP_RATE_LIMIT_MAX")
            .map(|v| v.parse::<u32>())
            .transpose()
            .context("DTP_RATE_LIMIT_MAX must be a number")?
            .unwrap_or(100);
        let rate_window = var("DTP_RATE_LIMIT_WINDOW_SECS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("DTP_RATE_LIMIT_WINDOW_SECS must be a number of seconds")?
            .unwrap_or(15 * 60);

        let imagekit = var("IMAGEKIT_PRIVATE_KEY").map(|private_key| ImageKitConfig {
            private_key,
            folder: var("IMAGEKIT_FOLDER").unwrap_or_else(|| "/reports".into()),
        });

        let seed_admin = if flag("DTP_SEED_ADMIN") {
            let (Some(email), Some(password)) = (var("DTP_ADMIN_EMAIL"), var("DTP_ADMIN_PASSWORD")) else {
                bail!("DTP_SEED_ADMIN is set but DTP_ADMIN_EMAIL or DTP_ADMIN_PASSWORD is missing");
            };
            Some(AdminSeed {
                name: var("DTP_ADMIN_NAME").unwrap_or_else(|| "State Admin".into()),
                email,
                password,
            })
        } else {
            None
        };

        Ok(Self {
            public_url: var("DTP_PUBLIC_URL").unwrap_or_else(|| format!("http://localhost:{}/uploads", port)),
            host,
            port,
            db_path: var("DTP_DB_PATH").unwrap_or_else(|| "dtp.db".into()).into(),
            jwt_secret,
            jwt_ttl: chrono::Duration::days(expires_days),
            production: var("DTP_ENV").is_some_and(|v| v == "production"),
            cors_origin: var("DTP_CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".into()),
            rate_limit: (rate_max > 0).then(|| (rate_max, Duration::from_secs(rate_window))),
            upload_dir: var("DTP_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()).into(),
            imagekit,
            init_hospitals: flag("DTP_INIT_HOSPITALS"),
            seed_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("DTP_JWT_SECRET", "s3cr3t")]).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.jwt_ttl, chrono::Duration::days(7));
        assert_eq!(config.rate_limit, Some((100, Duration::from_secs(900))));
        assert_eq!(config.public_url, "http://localhost:5000/uploads");
        assert!(!config.production);
        assert!(config.imagekit.is_none());
        assert!(config.seed_admin.is_none());
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(load(&[]).is_err());
        assert!(load(&[("DTP_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn admin_seed_needs_credentials() {
        let err = load(&[("DTP_JWT_SECRET", "x"), ("DTP_SEED_ADMIN", "true")]).unwrap_err();
        assert!(err.to_string().contains("DTP_ADMIN_EMAIL"));

        let config = load(&[
            ("DTP_JWT_SECRET", "x"),
            ("DTP_SEED_ADMIN", "true"),
            ("DTP_ADMIN_EMAIL", "dps@dtp.ng"),
            ("DTP_ADMIN_PASSWORD", "Admin12345"),
        ])
        .unwrap();
        assert_eq!(config.seed_admin.unwrap().name, "State Admin");
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("DTP_JWT_SECRET", "x"),
            ("DTP_PORT", "8080"),
            ("DTP_ENV", "production"),
            ("DTP_RATE_LIMIT_MAX", "0"),
            ("IMAGEKIT_PRIVATE_KEY", "private_abc"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.production);
        assert!(config.rate_limit.is_none());
        assert_eq!(config.imagekit.unwrap().folder, "/reports");
        assert!(load(&[("DTP_JWT_SECRET", "x"), ("DTP_PORT", "http")]).is_err());
    }
}
