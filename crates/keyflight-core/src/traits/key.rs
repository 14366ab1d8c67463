//! Request key trait and implementations

use std::fmt::Display;
use std::sync::Arc;

/// Separator placed between key parts and between namespace and body
pub const KEY_SEPARATOR: &str = ":";

/// Trait for types that identify a logical resource or operation
///
/// Keys are opaque to the coalescer and the cache: only the rendered string
/// matters. Two keys that render to the same string share a flight and a
/// cache slot.
pub trait RequestKey: Send + Sync {
    /// Render the key body, without namespace
    fn key_body(&self) -> String;

    /// Optional namespace for the key
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// Render the full key, `namespace:body` when a namespace is set
    fn render(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{ns}{KEY_SEPARATOR}{}", self.key_body()),
            None => self.key_body(),
        }
    }
}

impl RequestKey for str {
    fn key_body(&self) -> String {
        self.to_owned()
    }
}

impl RequestKey for String {
    fn key_body(&self) -> String {
        self.clone()
    }
}

impl<K: RequestKey + ?Sized> RequestKey for &K {
    fn key_body(&self) -> String {
        (**self).key_body()
    }

    fn namespace(&self) -> Option<&str> {
        (**self).namespace()
    }
}

impl<K: RequestKey + ?Sized> RequestKey for Arc<K> {
    fn key_body(&self) -> String {
        (**self).key_body()
    }

    fn namespace(&self) -> Option<&str> {
        (**self).namespace()
    }
}

macro_rules! int_keys {
    ($($t:ty),* $(,)?) => {
        $(
            impl RequestKey for $t {
                fn key_body(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

int_keys!(u16, u32, u64, u128, usize, i16, i32, i64, i128, isize);

macro_rules! tuple_keys {
    ($(($($name:ident . $idx:tt),+))*) => {
        $(
            impl<$($name: Display + Send + Sync),+> RequestKey for ($($name,)+) {
                fn key_body(&self) -> String {
                    [$(self.$idx.to_string()),+].join(KEY_SEPARATOR)
                }
            }
        )*
    };
}

tuple_keys! {
    (A.0)
    (A.0, B.1)
    (A.0, B.1, C.2)
    (A.0, B.1, C.2, D.3)
    (A.0, B.1, C.2, D.3, E.4)
}

/// Builder for keys assembled at runtime
///
/// ```
/// use keyflight_core::{KeyBuilder, RequestKey};
///
/// let key = KeyBuilder::new().namespace("search").part("foo").part(2);
/// assert_eq!(key.render(), "search:foo:2");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBuilder {
    parts: Vec<String>,
    ns: Option<String>,
}

impl KeyBuilder {
    /// Create an empty key builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.ns = Some(ns.into());
        self
    }

    /// Append one part
    pub fn part(mut self, part: impl Display) -> Self {
        self.parts.push(part.to_string());
        self
    }

    /// Append several parts
    pub fn parts<I>(mut self, parts: I) -> Self
    where
        I: IntoIterator,
        I::Item: Display,
    {
        self.parts.extend(parts.into_iter().map(|p| p.to_string()));
        self
    }
}

impl RequestKey for KeyBuilder {
    fn key_body(&self) -> String {
        self.parts.join(KEY_SEPARATOR)
    }

    fn namespace(&self) -> Option<&str> {
        self.ns.as_deref()
    }
}

/// Prefix `key` with `namespace` when one is configured
pub fn qualify(namespace: Option<&str>, key: &impl RequestKey) -> String {
    let rendered = key.render();
    match namespace {
        Some(ns) => format!("{ns}{KEY_SEPARATOR}{rendered}"),
        None => rendered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_and_string_keys() {
        assert_eq!("user:42".render(), "user:42");
        assert_eq!(String::from("orders").render(), "orders");
        assert_eq!((&&"nested").render(), "nested");
    }

    #[test]
    fn test_integer_key() {
        assert_eq!(42u64.render(), "42");
        assert_eq!((-7i32).render(), "-7");
    }

    #[test]
    fn test_tuple_keys() {
        assert_eq!(("user", 42).render(), "user:42");
        assert_eq!(("org", 1, "course", 9).render(), "org:1:course:9");
        assert_eq!(("solo",).render(), "solo");
    }

    #[test]
    fn test_builder_with_namespace() {
        let key = KeyBuilder::new().namespace("tenant-7").part("user").part(42);
        assert_eq!(key.key_body(), "user:42");
        assert_eq!(key.render(), "tenant-7:user:42");
    }

    #[test]
    fn test_builder_parts() {
        let key = KeyBuilder::new().parts(["a", "b", "c"]);
        assert_eq!(key.render(), "a:b:c");
        assert_eq!(KeyBuilder::new().render(), "");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify(None, &"k"), "k");
        assert_eq!(qualify(Some("app"), &("user", 1)), "app:user:1");
    }

    #[test]
    fn test_arc_key_forwards_namespace() {
        let key = Arc::new(KeyBuilder::new().namespace("ns").part("x"));
        assert_eq!(key.render(), "ns:x");
    }
}
