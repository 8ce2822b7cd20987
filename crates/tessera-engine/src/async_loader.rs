//! Asynchronous loading of persisted units.
//!
//! Files are read with tokio's non-blocking file I/O; each unit is then
//! decoded and merged into the shared interner exactly as [`link::load`]
//! does.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tessera_engine::{AsyncLoader, Interner};
//!
//! #[tokio::main]
//! async fn main() {
//!     let loader = AsyncLoader::new(Arc::new(Interner::new()));
//!     let units = loader.load_all(&["a.tsb", "b.tsb"]).await;
//!     println!("{} units", units.len());
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use tokio::fs;

use crate::compiler::bytecode::Unit;
use crate::link::{self, LinkError};
use crate::runtime::interner::Interner;

/// Loads units from disk and links them against one interner.
#[derive(Debug, Clone)]
pub struct AsyncLoader {
    names: Arc<Interner>,
}

impl AsyncLoader {
    /// Creates a loader merging into `names`.
    pub fn new(names: Arc<Interner>) -> Self {
        Self { names }
    }

    /// The interner loaded units are linked against.
    pub fn names(&self) -> &Arc<Interner> {
        &self.names
    }

    /// Reads and links one unit.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<Unit, LinkError> {
        let path = path.as_ref();
        let bytes = fs::read(path).await?;
        let unit = link::load(&bytes, &self.names)?;
        tracing::debug!(path = %path.display(), instructions = unit.code.len(), "loaded unit");
        Ok(unit)
    }

    /// Reads several units concurrently.
    ///
    /// Results are returned in the order of `paths`. A failed file does not
    /// stop the others from loading.
    pub async fn load_all(&self, paths: &[impl AsRef<Path>]) -> Vec<Result<Unit, LinkError>> {
        let futures: Vec<_> = paths.iter().map(|p| self.load(p)).collect();
        futures::future::join_all(futures).await
    }

    /// Encodes `unit` and writes it without blocking the runtime.
    pub async fn write(&self, path: impl AsRef<Path>, unit: &Unit) -> Result<(), LinkError> {
        let bytes = link::encode(unit, &self.names)?;
        fs::write(path, bytes).await?;
        Ok(())
    }
}
