use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::net::IpAddr;

/// One year. Larger values overflow `chrono::Duration`.
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub cms: CmsConfig,
    pub session: SessionConfig,
    pub cookies: CookieConfig,
    pub security: SecurityConfig,
    pub upload: UploadConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CmsConfig {
    /// Base URL of the CMS, without a trailing slash.
    pub url: String,
    /// Server-side API token used for public reads when the caller has no token.
    pub api_token: Option<Secret<String>>,
    pub admin_login_path: String,
    pub player_login_path: String,
    pub verify_path: String,
    pub refresh_path: String,
    pub timeout_secs: u64,
    pub verify_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_hours: i64,
    /// 0 disables the cap.
    pub max_sessions_per_user: usize,
    pub security_event_retention: usize,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub secure: bool,
    pub same_site: SameSitePolicy,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    /// CMS role names/types/codes allowed into the admin panel (lowercase).
    pub admin_roles: Vec<String>,
    /// Reverse proxies allowed to set `x-forwarded-for` / `x-real-ip`.
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub max_questions: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = GatewayConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("trivia-gateway"))?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")))?,
            log_level: get_env("LOG_LEVEL", Some("info"))?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            cms: CmsConfig {
                url: get_env("CMS_URL", None)?.trim_end_matches('/').to_string(),
                api_token: get_optional_env("CMS_API_TOKEN").map(Secret::new),
                admin_login_path: get_env("CMS_ADMIN_LOGIN_PATH", Some("/api/admin/auth/local"))?,
                player_login_path: get_env("CMS_PLAYER_LOGIN_PATH", Some("/api/auth/local"))?,
                verify_path: get_env("CMS_VERIFY_PATH", Some("/api/users/me"))?,
                refresh_path: get_env("CMS_REFRESH_PATH", Some("/api/auth/refresh"))?,
                timeout_secs: parse_env("CMS_TIMEOUT_SECONDS", "15")?,
                verify_timeout_secs: parse_env("TOKEN_VERIFY_TIMEOUT_SECONDS", "5")?,
            },
            session: SessionConfig {
                ttl_hours: parse_env("SESSION_TTL_HOURS", "168")?,
                max_sessions_per_user: parse_env("SESSION_MAX_PER_USER", "10")?,
                security_event_retention: parse_env("SECURITY_EVENT_RETENTION", "1000")?,
                sweep_interval_secs: parse_env("SESSION_SWEEP_INTERVAL_SECONDS", "300")?,
            },
            cookies: CookieConfig {
                secure: parse_env("COOKIE_SECURE", if is_prod { "true" } else { "false" })?,
                same_site: get_env("COOKIE_SAME_SITE", Some("lax"))?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                domain: get_optional_env("COOKIE_DOMAIN"),
            },
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                )?),
                admin_roles: split_list(&get_env(
                    "ADMIN_ROLES",
                    Some("admin,super-admin,strapi-super-admin,strapi-editor"),
                )?)
                .into_iter()
                .map(|r| r.to_lowercase())
                .collect(),
                trusted_proxies: parse_ip_list(&get_env("TRUSTED_PROXIES", Some(""))?)?,
            },
            upload: UploadConfig {
                chunk_size: parse_env("BULK_UPLOAD_CHUNK_SIZE", "10")?,
                max_questions: parse_env("BULK_UPLOAD_MAX_QUESTIONS", "500")?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5")?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900")?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "100")?,
                global_ip_window_seconds: parse_env("RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS", "60")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if !self.cms.url.starts_with("http://") && !self.cms.url.starts_with("https://") {
            return Err(config_error("CMS_URL must be an http(s) URL"));
        }

        if self.session.ttl_hours <= 0 || self.session.ttl_hours > MAX_SESSION_TTL_HOURS {
            return Err(config_error(&format!(
                "SESSION_TTL_HOURS must be between 1 and {}",
                MAX_SESSION_TTL_HOURS
            )));
        }

        if self.cms.verify_timeout_secs == 0 || self.cms.timeout_secs == 0 {
            return Err(config_error("CMS timeouts must be positive"));
        }

        if self.upload.chunk_size == 0 {
            return Err(config_error("BULK_UPLOAD_CHUNK_SIZE must be positive"));
        }

        if self.security.admin_roles.is_empty() {
            return Err(config_error("ADMIN_ROLES must list at least one role"));
        }

        // SameSite=None is rejected by browsers unless the cookie is Secure
        if self.cookies.same_site == SameSitePolicy::None && !self.cookies.secure {
            return Err(config_error("COOKIE_SAME_SITE=none requires COOKIE_SECURE=true"));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }

            if !self.cookies.secure {
                tracing::error!("Auth cookies are not marked Secure in production");
            }
        }

        Ok(())
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            Some(def) => Ok(def.to_string()),
            None => Err(AppError::ConfigError(anyhow::anyhow!(format!(
                "{} is required but not set",
                key
            )))),
        },
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default))?.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!(format!("{} is invalid: {}", key, e)))
    })
}

fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>, AppError> {
    split_list(raw)
        .iter()
        .map(|ip| {
            ip.parse::<IpAddr>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("TRUSTED_PROXIES entry '{}': {}", ip, e))
            })
        })
        .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for SameSitePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(SameSitePolicy::Strict),
            "lax" => Ok(SameSitePolicy::Lax),
            "none" => Ok(SameSitePolicy::None),
            _ => Err(format!("Invalid SameSite policy: {}", s)),
        }
    }
}
