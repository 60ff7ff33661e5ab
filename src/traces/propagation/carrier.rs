use std::collections::HashMap;

/// Injector provides an interface for a carrier to receive outbound
/// trace context headers.
pub trait Injector {
    /// Set a value in the carrier, replacing any value under the same key.
    fn set(&mut self, key: &str, value: String);
}

/// Extractor provides read access to inbound headers.
///
/// Header names are matched ignoring ASCII case with a linear scan. Header
/// sets are small, so no case-folded index is built.
pub trait Extractor {
    /// Get the first value for a key from the carrier.
    fn get(&self, key: &str) -> Option<&str>;

    /// Get every value for a key, in carrier order. Repeated headers such as
    /// `tracestate` may legitimately appear several times.
    fn get_all(&self, key: &str) -> Vec<&str>;
}

impl Extractor for [(String, String)] {
    fn get(&self, key: &str) -> Option<&str> {
        self.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    fn get_all(&self, key: &str) -> Vec<&str> {
        self.iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
            .collect()
    }
}

impl Extractor for Vec<(String, String)> {
    fn get(&self, key: &str) -> Option<&str> {
        Extractor::get(self.as_slice(), key)
    }

    fn get_all(&self, key: &str) -> Vec<&str> {
        self.as_slice().get_all(key)
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        self.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    fn get_all(&self, key: &str) -> Vec<&str> {
        self.iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
            .collect()
    }
}

impl Injector for Vec<(String, String)> {
    fn set(&mut self, key: &str, value: String) {
        self.retain(|(name, _)| !name.eq_ignore_ascii_case(key));
        self.push((key.to_lowercase(), value));
    }
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}
