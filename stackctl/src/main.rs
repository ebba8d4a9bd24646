use anyhow::Context;
use clap::Parser;
use stack_core::{StackError, error::exit_code};
use stackctl::{Cli, CliApp, setup_logging};
use tracing::error;

/// 找到错误链中的 StackError 并映射退出码
fn exit_code_for(e: &anyhow::Error) -> i32 {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<StackError>())
        .map_or(exit_code::FAILED, StackError::exit_code)
}

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录
    setup_logging(cli.verbose);

    let app = match CliApp::new_with_config(cli.config.as_deref())
        .await
        .context("应用初始化失败")
    {
        Ok(app) => app,
        Err(e) => {
            if matches!(e.downcast_ref::<StackError>(), Some(StackError::ConfigNotFound)) {
                if let Some(path) = &cli.config {
                    error!("❌ 配置文件 '{}' 未找到", path.display());
                }
            } else {
                error!("❌ {:#}", e);
            }
            std::process::exit(exit_code_for(&e));
        }
    };

    match app.run_command(cli.command).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let e = anyhow::Error::from(e);
            error!("❌ 操作失败: {:#}", e);
            std::process::exit(exit_code_for(&e));
        }
    }
}
