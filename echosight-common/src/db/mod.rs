//! Store initialization and schema reconciliation

pub mod init;
pub mod reconcile;
pub mod table_schemas;

pub use init::*;
pub use reconcile::*;
pub use table_schemas::*;
