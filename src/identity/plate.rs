pub const DEFAULT_PLATE_PREFIX: &str = "TEMP";

const MIN_PLATE_LEN: usize = 4;
const MAX_PLATE_LEN: usize = 12;

/// Values OCR backends emit when no plate was found.
const UNREADABLE_SENTINELS: &[&str] = &["SINPLACA", "NODETECTADA", "NOPLATE", "UNKNOWN"];

/// Upper-cases and strips whitespace; returns `None` unless the result looks
/// like a plate (4..=12 chars, at least half of them alphanumeric).
pub fn normalize_plate(raw: &str) -> Option<String> {
    let text: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();

    let len = text.chars().count();
    if !(MIN_PLATE_LEN..=MAX_PLATE_LEN).contains(&len) {
        return None;
    }
    if UNREADABLE_SENTINELS.contains(&text.as_str()) {
        return None;
    }
    let alnum = text.chars().filter(|c| c.is_alphanumeric()).count();
    if alnum == 0 || alnum * 2 < len {
        return None;
    }
    Some(text)
}

/// Ledger key for a vehicle whose plate could not be read.
///
/// `session` identifies the pipeline run that issued the key; track ids
/// restart at 1 per run, so time and track id alone can collide.
pub fn placeholder_plate(prefix: &str, now_s: u64, session: &str, track_id: u64) -> String {
    format!("{}-{}-{}-{}", prefix, now_s, session, track_id)
}

/// Fresh random session tag for `placeholder_plate`.
pub fn new_session_tag() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Key to look a user-typed plate up in the ledger: the normalized plate when
/// it is one, otherwise the trimmed text as typed (placeholder keys are longer
/// than any real plate and are stored verbatim).
pub fn plate_lookup_key(raw: &str) -> String {
    normalize_plate(raw).unwrap_or_else(|| raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_spacing() {
        assert_eq!(normalize_plate(" abc 123 ").as_deref(), Some("ABC123"));
        assert_eq!(normalize_plate("xyz-001").as_deref(), Some("XYZ-001"));
    }

    #[test]
    fn rejects_unreadable_text() {
        assert_eq!(normalize_plate(""), None);
        assert_eq!(normalize_plate("AB1"), None);
        assert_eq!(normalize_plate("ABCDEFGHIJ123"), None);
        assert_eq!(normalize_plate("--#-A-"), None);
        assert_eq!(normalize_plate("SIN PLACA"), None);
        assert_eq!(normalize_plate("No Detectada"), None);
    }

    #[test]
    fn placeholder_embeds_time_session_and_track() {
        assert_eq!(
            placeholder_plate("TEMP", 1_700_000_000, "0a1b2c3d", 42),
            "TEMP-1700000000-0a1b2c3d-42"
        );
    }

    #[test]
    fn session_tags_are_eight_hex_digits() {
        let tag = new_session_tag();
        assert_eq!(tag.len(), 8);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn lookup_key_matches_stored_plates() {
        assert_eq!(plate_lookup_key("abc 123"), "ABC123");
        assert_eq!(plate_lookup_key(" xyz-001"), "XYZ-001");
        assert_eq!(
            plate_lookup_key(" TEMP-1700000000-0a1b2c3d-4 "),
            "TEMP-1700000000-0a1b2c3d-4"
        );
    }
}
