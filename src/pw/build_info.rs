pub fn build_host() -> &'static str {
    option_env!("PROCWARDEN_BUILD_HOST").unwrap_or("unknown")
}

pub fn build_time_raw() -> &'static str {
    option_env!("PROCWARDEN_BUILD_TIME").unwrap_or("unknown")
}

pub fn build_time_pretty() -> String {
    let raw = build_time_raw().trim();
    // Reproducible builds stamp "epoch:<secs>"; normal builds stamp RFC3339 UTC.
    if let Some(epoch) = raw.strip_prefix("epoch:") {
        if let Ok(secs) = epoch.trim().parse::<i64>() {
            if let Some(dt) = chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0) {
                return dt.format("%Y-%m-%d %H:%M:%S").to_string();
            }
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return dt
            .with_timezone(&chrono::Utc)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
    }
    raw.replace('T', " ").trim_end_matches('Z').to_string()
}

pub fn banner() -> String {
    format!(
        "procwarden (built on {} at {})",
        build_host(),
        build_time_pretty()
    )
}
