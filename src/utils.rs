use chrono::{DateTime, Local, Utc};
use uuid::Uuid;

/// Seconds since the epoch, as stored in on-disk timestamps.
pub fn current_timestamp() -> u32 {
    u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX)
}

/// Local time rendering of an on-disk timestamp; 0 means never.
pub fn format_timestamp(ts: u32) -> String {
    if ts == 0 {
        return "never".to_string();
    }
    DateTime::from_timestamp(ts as i64, 0)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Fresh random volume id.
pub fn generate_uuid() -> [u8; 16] {
    *Uuid::new_v4().as_bytes()
}

pub fn format_uuid(bytes: &[u8; 16]) -> String {
    Uuid::from_bytes(*bytes).to_string()
}

/// 1536 -> "1.5 KiB"
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(8 * 1024 * 1024), "8.0 MiB");
    }

    #[test]
    fn test_uuid_round_trips_through_bytes() {
        let id = generate_uuid();
        assert_eq!(Uuid::parse_str(&format_uuid(&id)).unwrap().as_bytes(), &id);
    }

    #[test]
    fn test_zero_timestamp_is_never() {
        assert_eq!(format_timestamp(0), "never");
        assert!(current_timestamp() > 0);
    }
}
