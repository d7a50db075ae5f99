//! Discriminator-driven decoding of stored documents.
//!
//! # Responsibility
//! - Map discriminator strings to decoders producing the repository's base
//!   type.
//! - Fall back to decoding the base type directly on a miss.
//!
//! # Invariants
//! - The registry is fixed at repository construction.
//! - A registered decoder always yields the base type, so callers use the
//!   result polymorphically.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

type Decoder<T> = fn(Value) -> serde_json::Result<T>;

/// Table of concrete decoders keyed by discriminator.
pub struct TypeRegistry<T> {
    decoders: HashMap<String, Decoder<T>>,
}

impl<T: DeserializeOwned> TypeRegistry<T> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers `S` as the concrete shape stored under `discriminator`.
    ///
    /// A later registration for the same discriminator replaces the earlier.
    pub fn register<S>(mut self, discriminator: impl Into<String>) -> Self
    where
        S: DeserializeOwned + Into<T>,
    {
        self.decoders
            .insert(discriminator.into(), decode_as::<S, T>);
        self
    }

    pub fn contains(&self, discriminator: &str) -> bool {
        self.decoders.contains_key(discriminator)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decodes `body` through the decoder registered for `discriminator`, or
    /// as `T` itself when none is.
    pub fn decode(&self, discriminator: &str, body: Value) -> serde_json::Result<T> {
        match self.decoders.get(discriminator) {
            Some(decoder) => decoder(body),
            None => serde_json::from_value(body),
        }
    }
}

impl<T: DeserializeOwned> Default for TypeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for TypeRegistry<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TypeRegistry")
            .field("discriminators", &names)
            .finish()
    }
}

fn decode_as<S, T>(body: Value) -> serde_json::Result<T>
where
    S: DeserializeOwned + Into<T>,
{
    serde_json::from_value::<S>(body).map(Into::into)
}

#[cfg(test)]
mod tests {
    use super::TypeRegistry;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Deserialize)]
    #[serde(untagged)]
    enum Shape {
        Circle { radius: f64 },
        Labeled { radius: f64, label: String },
    }

    #[derive(Deserialize)]
    struct LabeledShape {
        radius: f64,
        label: String,
    }

    impl From<LabeledShape> for Shape {
        fn from(value: LabeledShape) -> Self {
            Shape::Labeled {
                radius: value.radius,
                label: value.label,
            }
        }
    }

    #[test]
    fn miss_falls_back_to_base_type() {
        let registry = TypeRegistry::<Shape>::new();
        let decoded = registry
            .decode("Labeled", json!({"radius": 1.0, "label": "a"}))
            .unwrap();
        assert_eq!(decoded, Shape::Circle { radius: 1.0 });
    }

    #[test]
    fn hit_decodes_registered_shape() {
        let registry = TypeRegistry::<Shape>::new().register::<LabeledShape>("Labeled");
        let decoded = registry
            .decode("Labeled", json!({"radius": 1.0, "label": "a"}))
            .unwrap();
        assert_eq!(
            decoded,
            Shape::Labeled {
                radius: 1.0,
                label: "a".to_string()
            }
        );
        assert!(registry.contains("Labeled"));
        assert_eq!(registry.len(), 1);
    }
}
