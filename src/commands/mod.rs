pub mod bootstrap;
pub mod migrate;
pub mod run;

pub use bootstrap::handle_bootstrap;
pub use migrate::handle_migrate;
pub use run::{ReportSource, handle_run};
