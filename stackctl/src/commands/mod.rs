mod backup;
mod config;
mod group;
mod health;
mod logs;
mod rollback;
mod status;

// Backup commands
pub use backup::{run_backup, run_list_backups, run_prune_backups, run_validate_backup};

// Config commands
pub use config::run_validate_config;

// Rollback commands
pub use rollback::run_rollback;

// Group commands
pub use group::{remove_group, restart_group, scale_service, start_group, stop_group};

// Status / logs / health
pub use health::{run_health, run_health_watch};
pub use logs::run_logs;
pub use status::run_status;
