// 私有模块声明
mod app;
mod cli;
mod commands;
mod utils;

// 通过 pub use 精确控制对外暴露的接口
pub use app::CliApp;
pub use cli::{Cli, Commands, GroupCommand, HealthSections, RollbackTarget};
pub use utils::setup_logging;
