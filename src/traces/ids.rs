use rand::{Rng, thread_rng};

/// A new 16 hex character identifier for spans and transactions.
#[must_use]
pub fn generate_guid() -> String {
    let bytes: [u8; 8] = thread_rng().r#gen();
    hex::encode(bytes)
}

/// Lowercases a trace id and left pads it with zeros to 32 characters.
#[must_use]
pub fn format_w3c_trace_id(trace_id: &str) -> String {
    format!("{:0>32}", trace_id.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_is_sixteen_lower_hex() {
        let guid = generate_guid();
        assert_eq!(guid.len(), 16);
        assert!(guid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(guid, generate_guid());
    }

    #[test]
    fn w3c_trace_id_is_padded_and_lowercase() {
        assert_eq!(
            format_w3c_trace_id("ABC123"),
            "00000000000000000000000000abc123"
        );
        let full = "0af7651916cd43dd8448eb211c80319c";
        assert_eq!(format_w3c_trace_id(full), full);
    }
}
