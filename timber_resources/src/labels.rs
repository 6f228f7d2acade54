use std::fmt::Display;

use twox_hash::XxHash64;

const FINGERPRINT_SEED: u64 = 0;
const LABEL_SEPARATOR: u8 = 0xff;

/// A stable 64-bit identity for a label set.
///
/// The fingerprint is what the rest of the system uses to refer to a stream:
/// it keys the per-tenant stream map, pins a stream to a flush queue, and is
/// embedded in storage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Fingerprint {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A canonical set of labels identifying one stream.
///
/// Labels are kept sorted by name with duplicate names collapsed (last value
/// wins), so two sets built from the same pairs in any order compare equal
/// and hash to the same [`Fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LabelSet {
    labels: Vec<(String, String)>,
}

impl LabelSet {
    pub fn new<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        let mut labels: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        labels.sort_by(|a, b| a.0.cmp(&b.0));
        labels.dedup_by(|a, b| {
            if a.0 == b.0 {
                // keep the later pair
                b.1 = std::mem::take(&mut a.1);
                true
            } else {
                false
            }
        });

        Self { labels }
    }

    /// Return a copy of this set with `name` set to `value`, replacing any
    /// existing value for `name`.
    pub fn with_label(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = self.labels.clone();
        let name = name.into();
        let value = value.into();
        match labels.binary_search_by(|(n, _)| n.as_str().cmp(&name)) {
            Ok(idx) => labels[idx].1 = value,
            Err(idx) => labels.insert(idx, (name, value)),
        }

        Self { labels }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|idx| self.labels[idx].1.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Hash the canonical form of this set into a [`Fingerprint`].
    pub fn fingerprint(&self) -> Fingerprint {
        let mut buf = Vec::with_capacity(self.labels.len() * 16);
        for (name, value) in &self.labels {
            buf.extend_from_slice(name.as_bytes());
            buf.push(LABEL_SEPARATOR);
            buf.extend_from_slice(value.as_bytes());
            buf.push(LABEL_SEPARATOR);
        }

        Fingerprint(XxHash64::oneshot(FINGERPRINT_SEED, &buf))
    }
}

impl Display for LabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (idx, (name, value)) in self.labels.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", name, value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_set_is_canonical() {
        let a = LabelSet::new([("env", "prod"), ("app", "api")]);
        let b = LabelSet::new([("app", "api"), ("env", "prod")]);

        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_label_set_duplicate_names_last_wins() {
        let set = LabelSet::new([("app", "old"), ("app", "new")]);

        assert_eq!(set.len(), 1);
        assert_eq!(set.get("app"), Some("new"));
    }

    #[test]
    fn test_with_label_replaces_and_inserts() {
        let set = LabelSet::new([("app", "api")]);

        let replaced = set.with_label("app", "worker");
        assert_eq!(replaced.get("app"), Some("worker"));

        let inserted = set.with_label("env", "prod");
        assert_eq!(inserted.get("app"), Some("api"));
        assert_eq!(inserted.get("env"), Some("prod"));
        assert_ne!(set.fingerprint(), inserted.fingerprint());
    }

    #[test]
    fn test_fingerprints_differ_between_sets() {
        let a = LabelSet::new([("app", "api")]);
        let b = LabelSet::new([("app", "worker")]);

        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_display() {
        let set = LabelSet::new([("env", "prod"), ("app", "api")]);
        assert_eq!(set.to_string(), r#"{app="api", env="prod"}"#);
    }
}
