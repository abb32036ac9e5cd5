//! Backend registry for explicit dependency injection.
//!
//! The [`BackendRegistry`] maps a backend kind tag to a constructor. It is
//! built once and handed to the pipeline, so tests can register in-memory
//! backends and unknown tags fail fast instead of falling back to some
//! other backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::ConnectionConfig;
use crate::error::{Result, SluiceError};

use super::traits::Backend;

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    Postgres,
    Redshift,
    IbmDb2,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Postgres,
        BackendKind::Redshift,
        BackendKind::IbmDb2,
    ];

    /// Parse a `type` tag (case-insensitive).
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(BackendKind::Postgres),
            "redshift" => Ok(BackendKind::Redshift),
            "ibmdb2" | "db2" | "ibm_db2" => Ok(BackendKind::IbmDb2),
            _ => Err(SluiceError::UnknownBackend(s.to_string())),
        }
    }

    /// Canonical tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Redshift => "redshift",
            BackendKind::IbmDb2 => "ibmdb2",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            BackendKind::Postgres => 5432,
            BackendKind::Redshift => 5439,
            BackendKind::IbmDb2 => 50000,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Async constructor for one backend kind.
pub type BackendConstructor =
    Arc<dyn Fn(ConnectionConfig) -> BoxFuture<'static, Result<Arc<dyn Backend>>> + Send + Sync>;

/// Registry of backend constructors keyed by kind.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    constructors: HashMap<BackendKind, BackendConstructor>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in drivers.
    ///
    /// Postgres and Redshift are always available; IBM DB2 needs the `db2`
    /// feature (ODBC).
    pub fn with_builtins() -> Self {
        use crate::drivers::postgres::PostgresBackend;

        let mut registry = Self::new();
        for kind in [BackendKind::Postgres, BackendKind::Redshift] {
            registry.register(kind, move |conn| {
                Box::pin(async move {
                    let backend = PostgresBackend::connect(kind, &conn).await?;
                    Ok(Arc::new(backend) as Arc<dyn Backend>)
                })
            });
        }

        #[cfg(feature = "db2")]
        {
            use crate::drivers::db2::Db2Backend;

            registry.register(BackendKind::IbmDb2, |conn| {
                Box::pin(async move {
                    let backend = Db2Backend::connect(&conn).await?;
                    Ok(Arc::new(backend) as Arc<dyn Backend>)
                })
            });
        }

        registry
    }

    /// Register a constructor, replacing any previous one for `kind`.
    pub fn register<F>(&mut self, kind: BackendKind, constructor: F)
    where
        F: Fn(ConnectionConfig) -> BoxFuture<'static, Result<Arc<dyn Backend>>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind, Arc::new(constructor));
    }

    /// Check if a kind is registered.
    pub fn has(&self, kind: BackendKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<_> = self.constructors.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Connect using the constructor registered for the connection's `type`.
    pub async fn connect(&self, conn: &ConnectionConfig) -> Result<Arc<dyn Backend>> {
        let kind = BackendKind::parse(&conn.r#type)?;
        let constructor = self.constructors.get(&kind).ok_or_else(|| {
            let hint = if kind == BackendKind::IbmDb2 {
                " (build with the 'db2' feature)"
            } else {
                ""
            };
            SluiceError::UnknownBackend(format!("{} is not registered{}", kind, hint))
        })?;
        constructor(conn.clone()).await
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn conn(kind: &str) -> ConnectionConfig {
        serde_yaml::from_str(&format!(
            "type: {kind}\nhost: localhost\nusername: etl\ndatabase: dw\n"
        ))
        .unwrap()
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!(BackendKind::parse("PostgreSQL").unwrap(), BackendKind::Postgres);
        assert_eq!(BackendKind::parse("pg").unwrap(), BackendKind::Postgres);
        assert_eq!(BackendKind::parse("Redshift").unwrap(), BackendKind::Redshift);
        assert_eq!(BackendKind::parse("IBMDB2").unwrap(), BackendKind::IbmDb2);
        assert!(matches!(
            BackendKind::parse("oracle"),
            Err(SluiceError::UnknownBackend(_))
        ));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(BackendKind::Postgres.default_port(), 5432);
        assert_eq!(BackendKind::Redshift.default_port(), 5439);
        assert_eq!(BackendKind::IbmDb2.default_port(), 50000);
    }

    #[test]
    fn test_builtins() {
        let registry = BackendRegistry::with_builtins();
        assert!(registry.has(BackendKind::Postgres));
        assert!(registry.has(BackendKind::Redshift));
        assert_eq!(registry.has(BackendKind::IbmDb2), cfg!(feature = "db2"));
    }

    #[tokio::test]
    async fn test_connect_uses_registered_constructor() {
        let mut registry = BackendRegistry::new();
        registry.register(BackendKind::IbmDb2, |_conn| {
            Box::pin(async { Ok(Arc::new(MockBackend::new(BackendKind::IbmDb2)) as Arc<dyn Backend>) })
        });

        let backend = registry.connect(&conn("db2")).await.unwrap();
        assert_eq!(backend.kind(), BackendKind::IbmDb2);

        let err = registry.connect(&conn("redshift")).await.err().unwrap();
        assert!(matches!(err, SluiceError::UnknownBackend(_)));
    }
}
