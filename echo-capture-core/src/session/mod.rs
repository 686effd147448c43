pub mod capture_manager;
pub mod echo_canceller;
pub mod format_manager;
pub mod pipeline;
pub mod reference_manager;
