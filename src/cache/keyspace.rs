//! Physical key layout.

use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// Maps logical keys to physical keys.
///
/// A physical key is `<namespace>:<app>:<prefix>[:<subprefix>]:<key>`. It is
/// both the storage key and the routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    head: String,
}

impl Keyspace {
    pub fn new(namespace: &str, app: &str, prefix: &str, subprefix: Option<&str>) -> Self {
        let mut head = format!("{}:{}:{}:", namespace, app, prefix);
        if let Some(sub) = subprefix {
            head.push_str(sub);
            head.push(':');
        }
        Self { head }
    }

    /// Build a keyspace from configuration. The application name is required.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        if config.app.is_empty() {
            return Err(Error::Config("cache requires an application name".to_string()));
        }
        Ok(Self::new(
            &config.namespace,
            &config.app,
            &config.prefix,
            config.subprefix.as_deref(),
        ))
    }

    /// Physical key of `key`.
    pub fn physical(&self, key: &str) -> String {
        let mut physical = String::with_capacity(self.head.len() + key.len());
        physical.push_str(&self.head);
        physical.push_str(key);
        physical
    }

    /// Common head of every physical key, trailing colon included.
    pub fn head(&self) -> &str {
        &self.head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_key() {
        let ks = Keyspace::new("h", "orders", "user", None);
        assert_eq!(ks.physical("42"), "h:orders:user:42");
        assert_eq!(ks.head(), "h:orders:user:");
    }

    #[test]
    fn test_subprefix() {
        let ks = Keyspace::new("h", "orders", "user", Some("v2"));
        assert_eq!(ks.physical("42"), "h:orders:user:v2:42");
    }

    #[test]
    fn test_from_config() {
        let config = CacheConfig::new("orders", "user").with_namespace("x");
        assert_eq!(
            Keyspace::from_config(&config).unwrap().physical("1"),
            "x:orders:user:1"
        );

        let missing_app = CacheConfig::new("", "user");
        assert!(matches!(
            Keyspace::from_config(&missing_app),
            Err(Error::Config(_))
        ));
    }
}
