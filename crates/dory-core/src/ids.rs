use uuid::Uuid;

/// `prefix` followed by the 32 hex digits of a random v4 UUID.
pub fn generate_prefixed_id(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4().simple())
}
