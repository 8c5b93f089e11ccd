//! Cross-field configuration constraints.

use warden_domain::error::{Error, Result};

use super::AppConfig;

pub(super) fn validate(config: &AppConfig) -> Result<()> {
    if config.process.poll_interval_secs == 0 {
        return Err(Error::config("process.poll_interval_secs must be positive"));
    }
    if config.process.max_concurrent_checks == 0 {
        return Err(Error::config(
            "process.max_concurrent_checks must be positive",
        ));
    }
    if config.dns.upstream_servers.is_empty() {
        return Err(Error::config("dns.upstream_servers must not be empty"));
    }
    if config.dns.cache_max_entries == 0 {
        return Err(Error::config("dns.cache_max_entries must be positive"));
    }
    if config.dns.response_deadline_secs == 0 {
        return Err(Error::config("dns.response_deadline_secs must be positive"));
    }
    if config.quota.flush_interval_secs == 0 {
        return Err(Error::config("quota.flush_interval_secs must be positive"));
    }
    if config.service.shutdown_timeout_secs == 0 {
        return Err(Error::config(
            "service.shutdown_timeout_secs must be positive",
        ));
    }
    // These two are mutually exclusive administrative modes.
    if config.service.emergency_mode && config.service.log_all_activity {
        return Err(Error::config(
            "service.emergency_mode and service.log_all_activity cannot both be enabled",
        ));
    }
    if !is_known_level(&config.logging.level) {
        return Err(Error::config(format!(
            "logging.level '{}' is not one of error|warn|info|debug|trace",
            config.logging.level
        )));
    }
    Ok(())
}

fn is_known_level(level: &str) -> bool {
    matches!(
        level.to_lowercase().as_str(),
        "error" | "warn" | "info" | "debug" | "trace"
    )
}
