// Serde helpers for partial server payloads
// Distinguishes "field absent" (keep the local value) from "field explicitly null" (clear it)

use serde::{Deserialize, Deserializer};

/// Present-but-null becomes `Some(None)`; an absent field stays `None` via `#[serde(default)]`.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Treat an explicit null like an absent collection.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "nullable")]
        bio: Option<Option<String>>,
        #[serde(default, deserialize_with = "null_as_default")]
        tags: Vec<String>,
    }

    #[test]
    fn test_absent_null_and_present() {
        let absent: Probe = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.bio, None);
        assert!(absent.tags.is_empty());

        let nulled: Probe = serde_json::from_str(r#"{"bio": null, "tags": null}"#).unwrap();
        assert_eq!(nulled.bio, Some(None));
        assert!(nulled.tags.is_empty());

        let present: Probe = serde_json::from_str(r#"{"bio": "hi", "tags": ["a"]}"#).unwrap();
        assert_eq!(present.bio, Some(Some("hi".to_string())));
        assert_eq!(present.tags, vec!["a".to_string()]);
    }
}
